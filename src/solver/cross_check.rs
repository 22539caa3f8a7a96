//! This module contains the cross-checking layer of the solver chain.
//!
//! The layer runs every check against two back-ends and fails loudly when
//! they give contradictory definite answers. It exists to validate an
//! external back-end integration against the built-in one before trusting
//! it alone.

use crate::{
    error::solver::{Error, Result},
    expr::ExprRef,
    solver::backend::{Backend, CheckResult, DynBackend},
};

/// A layer that checks two back-ends against each other.
#[derive(Debug)]
pub struct CrossCheckBackend {
    primary: DynBackend,
    reference: DynBackend,
}

impl CrossCheckBackend {
    /// Constructs the layer over a `primary` back-end whose answers are
    /// returned, and a `reference` back-end they are compared against.
    #[must_use]
    pub fn new(primary: DynBackend, reference: DynBackend) -> Self {
        Self { primary, reference }
    }
}

impl Backend for CrossCheckBackend {
    fn check(&mut self, terms: &[ExprRef]) -> Result<CheckResult> {
        let primary = self.primary.check(terms)?;
        let reference = self.reference.check(terms)?;

        let contradiction = matches!(
            (&primary, &reference),
            (CheckResult::Sat(_), CheckResult::Unsat) | (CheckResult::Unsat, CheckResult::Sat(_))
        );
        if contradiction {
            return Err(Error::BackendDisagreement {
                primary: self.primary.name().into(),
                reference: self.reference.name().into(),
            });
        }

        // Prefer whichever side is definite when the other gave up.
        match (primary, reference) {
            (CheckResult::Unknown, definite) => Ok(definite),
            (definite, _) => Ok(definite),
        }
    }

    fn name(&self) -> &'static str {
        "cross-check"
    }

    fn inner(&self) -> Option<&dyn Backend> {
        Some(self.primary.as_ref())
    }
}

#[cfg(test)]
mod test {
    use super::CrossCheckBackend;
    use crate::{
        constant::DEFAULT_MODEL_ENUMERATION_LIMIT,
        expr::ExprBuilder,
        solver::{
            backend::{Backend, CheckResult},
            boundary::BoundaryBackend,
        },
    };

    #[test]
    fn agreeing_backends_pass_through() -> anyhow::Result<()> {
        let builder = ExprBuilder::new();
        let mut layer = CrossCheckBackend::new(
            Box::new(BoundaryBackend::new(DEFAULT_MODEL_ENUMERATION_LIMIT)),
            Box::new(BoundaryBackend::new(DEFAULT_MODEL_ENUMERATION_LIMIT)),
        );

        let result = layer.check(&[builder.bool_true()])?;
        assert!(matches!(result, CheckResult::Sat(_)));

        let result = layer.check(&[builder.bool_false()])?;
        assert_eq!(result, CheckResult::Unsat);

        Ok(())
    }
}
