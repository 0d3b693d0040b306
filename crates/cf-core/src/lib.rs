//! # cf-core
//!
//! Core types, traits and the error type shared by all cutflow crates.
//!
//! - [`Record`] / [`FieldKey`]: the data a run consumes
//! - [`RecordSource`]: pull-based record supplier (external collaborator)
//! - [`ProgressObserver`]: periodic progress sink
//! - [`Error`] / [`Result`]

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use traits::{
    IntoRecordResult, IterSource, LogProgress, NoProgress, ProgressObserver, RecordSource,
    source_error,
};
pub use types::{FieldKey, Progress, Record};
