//! This module contains the seeding machinery: concrete inputs that guide
//! exploration down the paths they exercise before the engine explores
//! freely.

use crate::expr::{ArrayRef, Assignment, ExprRef};

/// One user-provided seed: concrete byte values for the symbolic inputs of
/// a run, in the order the program creates them.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Seed {
    /// The named input values of the seed.
    pub values: Vec<(String, Vec<u8>)>,
}

impl Seed {
    /// Constructs an empty seed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a named input value.
    #[must_use]
    pub fn with_value(mut self, name: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.values.push((name.into(), bytes));
        self
    }
}

/// The per-state view of one seed: which of its values have been consumed
/// and the array bindings they produced.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SeedInfo {
    /// The seed being replayed.
    pub seed: Seed,

    /// The index of the next unconsumed seed value.
    pub position: usize,

    /// The bindings produced by consuming seed values, patched whenever a
    /// new constraint contradicts them.
    pub assignment: Assignment,
}

impl SeedInfo {
    /// Constructs the initial view of `seed`.
    #[must_use]
    pub fn new(seed: Seed) -> Self {
        Self {
            seed,
            position: 0,
            assignment: Assignment::new(),
        }
    }

    /// Consumes the next seed value for the symbolic `array`, under the
    /// provided matching and sizing policy.
    ///
    /// With `named_matching`, the value is looked up by `name` instead of
    /// positionally. Length mismatches are governed by the extension and
    /// truncation flags; `None` is returned when the policy cannot
    /// reconcile the seed with the array, in which case the caller reports
    /// a user error.
    pub fn consume(
        &mut self,
        array: &ArrayRef,
        name: &str,
        named_matching: bool,
        allow_extension: bool,
        zero_extension: bool,
        allow_truncation: bool,
    ) -> Option<()> {
        let size = usize::try_from(array.size).unwrap_or(usize::MAX);

        let bytes = if named_matching {
            self.seed
                .values
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, b)| b.clone())
        } else {
            let value = self.seed.values.get(self.position).map(|(_, b)| b.clone());
            if value.is_some() {
                self.position += 1;
            }
            value
        };

        let mut bytes = match bytes {
            Some(bytes) => bytes,
            // A missing value is an extension of the seed with fresh
            // input.
            None if allow_extension || zero_extension => vec![0; size],
            None => return None,
        };

        match bytes.len() {
            n if n == size => {}
            n if n < size => {
                if !(allow_extension || zero_extension) {
                    return None;
                }
                bytes.resize(size, 0);
            }
            _ => {
                if !allow_truncation {
                    return None;
                }
                bytes.truncate(size);
            }
        }

        self.assignment.bind(array.id, bytes);
        Some(())
    }

    /// Evaluates `expr` under the seed's current bindings.
    #[must_use]
    pub fn evaluate_bool(&self, expr: &ExprRef) -> bool {
        self.assignment.evaluate_bool(expr)
    }
}
