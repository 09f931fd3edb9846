//! Error type shared by all domains.

use crate::types::NumVar;

/// Failure of a domain operation.
///
/// [`DomainError::Unreachable`] is a control signal: the state being computed
/// denotes no concrete execution. All other variants indicate a wiring bug in
/// the surrounding domains or driver and are never recovered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// The program point cannot be reached.
    Unreachable,
    /// An operation referenced a variable outside the domain's support.
    VariableSupport { domain: &'static str, var: NumVar },
    /// An internal invariant was broken.
    InvariantViolation { domain: &'static str, reason: String },
    /// The domain deliberately does not implement the operation.
    Unimplemented {
        domain: &'static str,
        operation: &'static str,
    },
}

impl DomainError {
    pub fn is_unreachable(&self) -> bool {
        matches!(self, DomainError::Unreachable)
    }

    pub fn support(domain: &'static str, var: NumVar) -> Self {
        DomainError::VariableSupport { domain, var }
    }

    pub fn invariant(domain: &'static str, reason: impl Into<String>) -> Self {
        DomainError::InvariantViolation {
            domain,
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for DomainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DomainError::Unreachable => write!(f, "unreachable state"),
            DomainError::VariableSupport { domain, var } => {
                write!(f, "{}: variable {} is outside the support set", domain, var)
            }
            DomainError::InvariantViolation { domain, reason } => {
                write!(f, "{}: invariant violation: {}", domain, reason)
            }
            DomainError::Unimplemented { domain, operation } => {
                write!(f, "{}: operation '{}' is not implemented", domain, operation)
            }
        }
    }
}

impl std::error::Error for DomainError {}

pub type Result<T> = std::result::Result<T, DomainError>;

/// Turns an `Unreachable` outcome into `None`, propagating genuine errors.
pub fn reachable<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(DomainError::Unreachable) => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test]
    fn test_display() {
        let err = DomainError::support("Intervals", NumVar::new(3));
        assert_eq!(err.to_string(), "Intervals: variable x3 is outside the support set");
        assert_eq!(DomainError::Unreachable.to_string(), "unreachable state");
    }

    #[test]
    fn test_reachable_filters_only_unreachable() {
        assert_eq!(reachable::<()>(Err(DomainError::Unreachable)), Ok(None));
        assert_eq!(reachable(Ok(1)), Ok(Some(1)));
        let fatal = DomainError::invariant("Thresholds", "broken");
        assert_eq!(reachable::<()>(Err(fatal.clone())), Err(fatal));
    }
}
