//! This module contains the run-handler seam: the interface through which
//! terminated paths become test cases and error reports for external
//! writers.
//!
//! The engine never writes files itself; it hands each artefact to the
//! configured handler, and the default [`CollectingHandler`] simply keeps
//! them in memory for the caller to consume.

use std::fmt::Debug;

use downcast_rs::{impl_downcast, Downcast};
use serde::{Deserialize, Serialize};

use crate::{error::ErrorKind, ir::InstId};

/// One input of a test case: the bytes assigned to one symbolic input.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct TestInput {
    /// The name of the symbolic input.
    pub name: String,

    /// The concrete bytes the path is witnessed by.
    pub bytes: Vec<u8>,
}

/// The record emitted for one terminated path.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct TestCase {
    /// The identity of the terminated state.
    pub state: u64,

    /// The witnessed inputs, in creation order.
    pub inputs: Vec<TestInput>,

    /// The file suffix an external writer should use: empty for a normal
    /// exit, `early`, `subsumed`, or an error suffix.
    pub suffix: String,

    /// The error message, for error terminations.
    pub error: Option<String>,

    /// The branch directions the path took at forks.
    pub path: Vec<bool>,

    /// The number of instructions the path executed.
    pub steps: u64,
}

/// The interface through which the engine reports run artefacts.
pub trait RunHandler
where
    Self: Debug + Downcast,
{
    /// Reports a test case for a terminated path.
    fn on_test_case(&mut self, test: TestCase);

    /// Reports a program-level error discovered along a path.
    fn on_error(&mut self, location: InstId, kind: ErrorKind, message: &str);
}

impl_downcast!(RunHandler);

/// A handler that keeps every artefact in memory.
#[derive(Clone, Debug, Default)]
pub struct CollectingHandler {
    /// The test cases reported so far.
    pub tests: Vec<TestCase>,

    /// The errors reported so far.
    pub errors: Vec<(InstId, ErrorKind, String)>,
}

impl CollectingHandler {
    /// Constructs an empty collecting handler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialises the collected test cases to JSON for an external writer.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if serialisation fails.
    pub fn tests_to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.tests)
    }
}

impl RunHandler for CollectingHandler {
    fn on_test_case(&mut self, test: TestCase) {
        self.tests.push(test);
    }

    fn on_error(&mut self, location: InstId, kind: ErrorKind, message: &str) {
        self.errors.push((location, kind, message.to_string()));
    }
}

#[cfg(test)]
mod test {
    use super::{CollectingHandler, RunHandler, TestCase, TestInput};

    #[test]
    fn collected_tests_round_trip_through_json() -> anyhow::Result<()> {
        let mut handler = CollectingHandler::new();
        handler.on_test_case(TestCase {
            state: 3,
            inputs: vec![TestInput {
                name: "x".into(),
                bytes: vec![5, 0, 0, 0],
            }],
            suffix: String::new(),
            error: None,
            path: vec![true, false],
            steps: 12,
        });

        let json = handler.tests_to_json()?;
        let parsed: Vec<TestCase> = serde_json::from_str(&json)?;
        assert_eq!(parsed, handler.tests);

        Ok(())
    }
}
