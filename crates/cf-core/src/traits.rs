//! Core traits for cutflow
//!
//! The engine never reads files itself: records arrive through a
//! [`RecordSource`], and progress leaves through a [`ProgressObserver`].

use crate::types::{Progress, Record};
use crate::{Error, Result};

/// Pull-based supplier of records.
///
/// `Ok(None)` signals end of stream. An `Err` is fatal to the run.
pub trait RecordSource {
    /// Next record, `None` once exhausted.
    fn next_record(&mut self) -> Result<Option<Record>>;
}

impl<S: RecordSource + ?Sized> RecordSource for &mut S {
    fn next_record(&mut self) -> Result<Option<Record>> {
        (**self).next_record()
    }
}

impl<S: RecordSource + ?Sized> RecordSource for Box<S> {
    fn next_record(&mut self) -> Result<Option<Record>> {
        (**self).next_record()
    }
}

/// Adapts an iterator into a [`RecordSource`].
///
/// Accepts items of type `Record` or `Result<Record>`.
pub struct IterSource<I> {
    inner: I,
}

impl<I> IterSource<I> {
    /// Wrap an iterator.
    pub fn new<T>(iter: T) -> Self
    where
        T: IntoIterator<IntoIter = I>,
    {
        Self { inner: iter.into_iter() }
    }
}

/// Conversion of iterator items into source results.
pub trait IntoRecordResult {
    /// Convert into `Result<Record>`.
    fn into_record_result(self) -> Result<Record>;
}

impl IntoRecordResult for Record {
    fn into_record_result(self) -> Result<Record> {
        Ok(self)
    }
}

impl IntoRecordResult for Result<Record> {
    fn into_record_result(self) -> Result<Record> {
        self
    }
}

impl<I> RecordSource for IterSource<I>
where
    I: Iterator,
    I::Item: IntoRecordResult,
{
    fn next_record(&mut self) -> Result<Option<Record>> {
        self.inner.next().map(IntoRecordResult::into_record_result).transpose()
    }
}

/// Receiver of periodic run progress.
pub trait ProgressObserver {
    /// Called every reporting period and once when the run finishes.
    fn on_progress(&mut self, progress: &Progress);
}

/// Default observer: logs progress through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressObserver for LogProgress {
    fn on_progress(&mut self, progress: &Progress) {
        tracing::info!(
            records = progress.records_processed,
            errors_skipped = progress.errors_skipped,
            "processing"
        );
    }
}

/// Observer that discards progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_progress(&mut self, _progress: &Progress) {}
}

impl<F: FnMut(&Progress)> ProgressObserver for F {
    fn on_progress(&mut self, progress: &Progress) {
        self(progress)
    }
}

/// Wrap an arbitrary error message as a source failure.
///
/// The runner replaces `records_read` with its own count.
pub fn source_error(message: impl Into<String>) -> Error {
    Error::Source { records_read: 0, message: message.into() }
}
