//! Error types for cutflow

use thiserror::Error;

use crate::types::FieldKey;

/// cutflow error type
///
/// Variants fall into three tiers: configuration errors (raised before any
/// record is read), per-record errors (recovered by the runner), and
/// run/post-processing errors that abort one operation.
#[derive(Error, Debug)]
pub enum Error {
    /// A variable, cut label or histogram name is registered twice.
    #[error("duplicate {kind} name: '{name}'")]
    DuplicateName {
        /// What kind of entity collided (e.g. "variable", "cut", "histogram").
        kind: &'static str,
        /// The colliding name.
        name: String,
    },

    /// Variable definition is malformed (empty name, repeated dependency).
    #[error("invalid variable '{name}': {reason}")]
    InvalidVariable {
        /// Variable name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A cut label cannot be used as a namespace segment.
    #[error("invalid label '{0}': labels must be non-empty and must not contain '/'")]
    InvalidLabel(String),

    /// Reference to a variable that was never registered.
    #[error("unknown variable: '{0}'")]
    UnknownVariable(String),

    /// Record lacks a field a variable depends on.
    #[error("missing field: '{0}'")]
    MissingField(FieldKey),

    /// Axis binning is unusable (`n_bins == 0`, `low >= high`, non-finite edges).
    #[error("invalid axis: {0}")]
    InvalidAxis(String),

    /// Two distinct selections map onto one namespace path.
    #[error("duplicate namespace path: '{0}'")]
    DuplicateNamespace(String),

    /// Operands of a combinator do not share identical binning.
    #[error("axis mismatch: {0}")]
    AxisMismatch(String),

    /// A normalization target has zero integral.
    #[error("empty histogram: '{0}'")]
    EmptyHistogram(String),

    /// Lookup of a histogram path that does not exist in an output tree.
    #[error("unknown histogram: '{0}'")]
    UnknownHistogram(String),

    /// Expression parse error.
    #[error("expression error: {0}")]
    Expression(String),

    /// Record source failure; aborts the run.
    #[error("record source failed after {records_read} records: {message}")]
    Source {
        /// Records successfully read before the failure.
        records_read: u64,
        /// Underlying failure.
        message: String,
    },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

impl Error {
    /// `true` for errors the runner recovers from per record.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::MissingField(_))
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_field_is_recoverable() {
        let e = Error::MissingField(FieldKey::new("Candidates", "fKFPt"));
        assert!(e.is_recoverable());
        assert_eq!(e.to_string(), "missing field: 'Candidates.fKFPt'");
    }

    #[test]
    fn config_errors_are_fatal() {
        let e = Error::DuplicateName { kind: "variable", name: "pt".into() };
        assert!(!e.is_recoverable());
        assert_eq!(e.to_string(), "duplicate variable name: 'pt'");

        let e = Error::Source { records_read: 42, message: "truncated basket".into() };
        assert!(!e.is_recoverable());
        assert!(e.to_string().contains("after 42 records"));
    }
}
