use thiserror::Error;

/// Raised by tree/rule construction. Surfaces to the host at pipeline start
/// and prevents the pipeline from running; never produced on the hot path.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("field op {op:?}: {reason}")]
    InvalidFieldOp { op: String, reason: String },

    #[error("logical op {op:?}: {reason}")]
    InvalidLogicalOp { op: String, reason: String },

    #[error("regex {pattern:?} failed to compile: {source}")]
    BadRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("distribution config invalid: {reason}")]
    InvalidDistribution { reason: String },

    #[error("rule config invalid: {reason}")]
    InvalidRule { reason: String },
}

/// Returned by [`crate::doif::DoIf::structural_eq`] when two trees differ.
/// `path` pinpoints the first difference as an indented path through the
/// tree, not just a boolean.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("predicate trees differ at {path}: {reason}")]
pub struct StructuralMismatch {
    pub path: String,
    pub reason: String,
}

impl StructuralMismatch {
    pub fn new(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
