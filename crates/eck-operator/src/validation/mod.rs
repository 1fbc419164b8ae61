//! Admission rules for Elasticsearch clusters and license Secrets.
//!
//! Every rule is applied and all violations are reported together, so users
//! can fix everything in one go.
use std::fmt::{self, Display, Formatter};

pub mod elasticsearch;
pub mod license;
pub mod settings;
pub mod version;

/// A rejected field together with the reason and offending value.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Violation {
    pub field: String,
    pub value: String,
    pub reason: &'static str,
}

impl Violation {
    pub fn new(field: impl Into<String>, value: impl Into<String>, reason: &'static str) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
            reason,
        }
    }
}

impl Display for Violation {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}: {} ({:?})", self.field, self.reason, self.value)
    }
}

/// The answer to an admission request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Verdict {
    pub allowed: bool,
    pub reason: String,
}

impl Verdict {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: String::new(),
        }
    }
}

impl From<Vec<Violation>> for Verdict {
    fn from(violations: Vec<Violation>) -> Self {
        Self {
            allowed: violations.is_empty(),
            reason: violations
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; "),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn violations_are_joined() {
        let verdict = Verdict::from(vec![
            Violation::new("spec.version", "5.0.0", "Unsupported version"),
            Violation::new("metadata.name", "x", "too long"),
        ]);
        assert!(!verdict.allowed);
        assert_eq!(
            verdict.reason,
            r#"spec.version: Unsupported version ("5.0.0"); metadata.name: too long ("x")"#
        );
    }

    #[test]
    fn no_violations_allow() {
        assert_eq!(Verdict::from(Vec::new()), Verdict::allow());
    }
}
