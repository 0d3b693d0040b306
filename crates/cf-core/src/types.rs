//! Record data model: field keys and records.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A `(branch, field)` pair addressing one scalar on a [`Record`].
///
/// The textual form is `Branch.field`, split on the first `.`
/// (e.g. `Candidates.fKFPt`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldKey {
    /// Logical grouping (tree branch) of the field.
    pub branch: String,
    /// Field name within the branch.
    pub field: String,
}

impl FieldKey {
    /// Create a key from its parts.
    pub fn new(branch: impl Into<String>, field: impl Into<String>) -> Self {
        Self { branch: branch.into(), field: field.into() }
    }

    /// Parse `Branch.field`.
    pub fn parse(text: &str) -> Result<Self> {
        match text.split_once('.') {
            Some((branch, field)) if !branch.is_empty() && !field.is_empty() => {
                Ok(Self::new(branch, field))
            }
            _ => Err(Error::Config(format!("field reference '{text}' is not of the form Branch.field"))),
        }
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.branch, self.field)
    }
}

impl FromStr for FieldKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for FieldKey {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<FieldKey> for String {
    fn from(k: FieldKey) -> Self {
        k.to_string()
    }
}

/// One event/candidate: numeric values addressed by [`FieldKey`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    values: HashMap<FieldKey, f64>,
}

impl Record {
    /// Empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, branch: &str, field: &str, value: f64) -> Self {
        self.insert(FieldKey::new(branch, field), value);
        self
    }

    /// Set a field value, replacing any previous one.
    pub fn insert(&mut self, key: FieldKey, value: f64) {
        self.values.insert(key, value);
    }

    /// Value of a field, if present.
    pub fn get(&self, key: &FieldKey) -> Option<f64> {
        self.values.get(key).copied()
    }

    /// Value of a field or [`Error::MissingField`].
    pub fn require(&self, key: &FieldKey) -> Result<f64> {
        self.get(key).ok_or_else(|| Error::MissingField(key.clone()))
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// `true` if the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<(FieldKey, f64)> for Record {
    fn from_iter<T: IntoIterator<Item = (FieldKey, f64)>>(iter: T) -> Self {
        Self { values: iter.into_iter().collect() }
    }
}

/// Snapshot of run progress handed to a [`crate::ProgressObserver`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Records consumed from the source so far.
    pub records_processed: u64,
    /// Histogram fills skipped because of per-record errors.
    pub errors_skipped: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_key_parse_and_display() {
        let k: FieldKey = "Candidates.fKFPt".parse().unwrap();
        assert_eq!(k.branch, "Candidates");
        assert_eq!(k.field, "fKFPt");
        assert_eq!(k.to_string(), "Candidates.fKFPt");

        // Only the first dot splits.
        let k = FieldKey::parse("Sim.p.x").unwrap();
        assert_eq!(k.branch, "Sim");
        assert_eq!(k.field, "p.x");
    }

    #[test]
    fn field_key_rejects_malformed() {
        assert!(FieldKey::parse("pt").is_err());
        assert!(FieldKey::parse(".pt").is_err());
        assert!(FieldKey::parse("Candidates.").is_err());
    }

    #[test]
    fn field_key_serde_as_string() {
        let k = FieldKey::new("Candidates", "fLiteM");
        let s = serde_json::to_string(&k).unwrap();
        assert_eq!(s, "\"Candidates.fLiteM\"");
        let back: FieldKey = serde_json::from_str(&s).unwrap();
        assert_eq!(back, k);
        assert!(serde_json::from_str::<FieldKey>("\"nodot\"").is_err());
    }

    #[test]
    fn record_require() {
        let r = Record::new().with("Candidates", "fKFPt", 3.5);
        assert_eq!(r.len(), 1);
        assert_eq!(r.require(&FieldKey::new("Candidates", "fKFPt")).unwrap(), 3.5);
        let err = r.require(&FieldKey::new("Candidates", "fLiteY")).unwrap_err();
        assert!(matches!(err, Error::MissingField(_)));
    }
}
