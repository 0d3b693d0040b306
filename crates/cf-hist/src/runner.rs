//! Single-pass event loop: evaluate selections, fill histograms.

use cf_core::{Error, LogProgress, NoProgress, Progress, ProgressObserver, Record, RecordSource, Result};
use cf_select::{CutSet, EvalScope, Namespace};

use crate::histogram::{Histogram, HistogramSnapshot};
use crate::registry::{HistogramId, HistogramSpec, RunContext};

/// Histogram instances of one run, indexed by [`HistogramId`].
///
/// Slots are instantiated on first fill.
#[derive(Debug, Clone, Default)]
pub struct HistogramSet {
    slots: Vec<Option<Histogram>>,
    errors: Vec<u64>,
}

impl HistogramSet {
    /// Empty set with room for `len` histograms.
    pub fn with_len(len: usize) -> Self {
        Self { slots: vec![None; len], errors: vec![0; len] }
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// `true` if there are no slots.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// The histogram in slot `id`, if it was ever filled.
    pub fn get(&self, id: HistogramId) -> Option<&Histogram> {
        self.slots.get(id.index()).and_then(Option::as_ref)
    }

    /// Fills skipped for `id`.
    pub fn errors(&self, id: HistogramId) -> u64 {
        self.errors.get(id.index()).copied().unwrap_or(0)
    }

    fn fill(&mut self, id: HistogramId, spec: &HistogramSpec, values: &[f64]) -> Result<()> {
        let i = id.index();
        if self.slots[i].is_none() {
            self.slots[i] = Some(spec.instantiate()?);
        }
        if let Some(h) = self.slots[i].as_mut() {
            h.fill(values);
        }
        Ok(())
    }

    fn skip(&mut self, id: HistogramId) {
        self.errors[id.index()] += 1;
    }

    /// Bin-wise sum of `other` into `self`.
    pub fn merge(&mut self, other: HistogramSet) -> Result<()> {
        if other.len() != self.len() {
            return Err(Error::AxisMismatch(format!(
                "histogram sets differ in size: {} vs {}",
                self.len(),
                other.len()
            )));
        }
        for (mine, theirs) in self.slots.iter_mut().zip(other.slots) {
            let Some(b) = theirs else { continue };
            match mine {
                Some(a) => a.merge(&b)?,
                None => *mine = Some(b),
            }
        }
        for (mine, theirs) in self.errors.iter_mut().zip(other.errors) {
            *mine += theirs;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Pending,
    Pass,
    Fail,
    Missing,
}

/// Drives a [`RecordSource`] through a [`RunContext`].
///
/// ```
/// # use cf_core::{FieldKey, IterSource, Record};
/// # use cf_hist::{Axis, HistogramSpec, RunContext, TaskRunner};
/// # use cf_select::NamespaceEntry;
/// let mut ctx = RunContext::new();
/// let pt = ctx.variables_mut().register_field(FieldKey::new("Candidates", "fKFPt")).unwrap();
/// let axis = Axis::new("p_{T}", 10, 0.0, 10.0).unwrap();
/// let id = ctx.add_histogram(&NamespaceEntry::root(), HistogramSpec::h1("hPt", axis, pt)).unwrap();
///
/// let records = [1.0, 6.0, 3.0].map(|v| Record::new().with("Candidates", "fKFPt", v));
/// let result = TaskRunner::new(&ctx).run(IterSource::new(records)).unwrap();
/// assert_eq!(result.snapshot(id).entries, 3);
/// ```
pub struct TaskRunner<'c> {
    ctx: &'c RunContext,
    report_period: u64,
    observer: Box<dyn ProgressObserver + 'c>,
}

impl<'c> TaskRunner<'c> {
    /// Runner with progress reports disabled mid-run and the final report
    /// logged through `tracing`.
    pub fn new(ctx: &'c RunContext) -> Self {
        Self { ctx, report_period: 0, observer: Box::new(LogProgress) }
    }

    /// Report progress every `period` records; 0 disables periodic reports.
    pub fn report_every(mut self, period: u64) -> Self {
        self.report_period = period;
        self
    }

    /// Replace the progress observer.
    pub fn with_observer(mut self, observer: impl ProgressObserver + 'c) -> Self {
        self.observer = Box::new(observer);
        self
    }

    /// Process every record of `source` in order.
    ///
    /// Aborts with [`Error::Source`] when the source fails; no partial result
    /// is returned.
    pub fn run<S: RecordSource>(&mut self, mut source: S) -> Result<RunResult<'c>> {
        let span = tracing::info_span!("run", histograms = self.ctx.histograms().len());
        let _guard = span.enter();
        tracing::info!(
            variables = self.ctx.variables().len(),
            selections = self.ctx.histograms().selections().len(),
            "run started"
        );

        let (histograms, progress) =
            fill_pass(self.ctx, &mut source, self.report_period, self.observer.as_mut())?;
        self.observer.on_progress(&progress);

        tracing::info!(
            records = progress.records_processed,
            errors_skipped = progress.errors_skipped,
            "run finished"
        );
        Ok(RunResult { ctx: self.ctx, histograms, progress })
    }

    /// Process each source on the rayon pool with private histogram sets,
    /// then merge bin-wise in partition order.
    ///
    /// Periodic progress is not reported; the observer receives one report
    /// with the combined totals. A source failure aborts the run and its
    /// `records_read` counts records across all partitions up to the failing
    /// one, as a sequential run over the concatenated sources would.
    pub fn run_partitioned<S>(&mut self, sources: Vec<S>) -> Result<RunResult<'c>>
    where
        S: RecordSource + Send,
    {
        use rayon::prelude::*;

        let ctx = self.ctx;
        let partitions = sources.len();
        tracing::info!(partitions, histograms = ctx.histograms().len(), "partitioned run started");

        let parts: Vec<Result<(HistogramSet, Progress)>> = sources
            .into_par_iter()
            .map(|mut source| fill_pass(ctx, &mut source, 0, &mut NoProgress))
            .collect();

        let mut histograms = HistogramSet::with_len(ctx.histograms().len());
        let mut progress = Progress::default();
        for part in parts {
            let (set, p) = match part {
                Ok(done) => done,
                Err(Error::Source { records_read, message }) => {
                    return Err(Error::Source {
                        records_read: progress.records_processed + records_read,
                        message,
                    });
                }
                Err(e) => return Err(e),
            };
            histograms.merge(set)?;
            progress.records_processed += p.records_processed;
            progress.errors_skipped += p.errors_skipped;
        }
        self.observer.on_progress(&progress);

        tracing::info!(
            partitions,
            records = progress.records_processed,
            errors_skipped = progress.errors_skipped,
            "partitioned run finished"
        );
        Ok(RunResult { ctx, histograms, progress })
    }
}

fn fill_pass(
    ctx: &RunContext,
    source: &mut dyn RecordSource,
    report_period: u64,
    observer: &mut dyn ProgressObserver,
) -> Result<(HistogramSet, Progress)> {
    let registry = ctx.histograms();
    let selections = registry.selections();
    let mut histograms = HistogramSet::with_len(registry.len());
    let mut scope = EvalScope::new(ctx.variables());
    let mut verdicts = vec![Verdict::Pending; selections.len()];
    let mut coords = [0.0_f64; 2];
    let mut progress = Progress::default();

    loop {
        let record = match source.next_record() {
            Ok(Some(r)) => r,
            Ok(None) => break,
            Err(e) => {
                let message = match e {
                    Error::Source { message, .. } => message,
                    other => other.to_string(),
                };
                tracing::warn!(records = progress.records_processed, %message, "record source failed");
                return Err(Error::Source { records_read: progress.records_processed, message });
            }
        };

        scope.reset();
        verdicts.fill(Verdict::Pending);

        for (id, binding) in registry.iter() {
            let mut verdict = select(&mut verdicts, selections, binding.selection, &mut scope, &record)?;
            if verdict == Verdict::Pass
                && let Some(guard) = binding.guard
            {
                verdict = select(&mut verdicts, selections, guard, &mut scope, &record)?;
            }
            match verdict {
                Verdict::Fail => continue,
                Verdict::Missing => {
                    skip_fill(&mut histograms, &mut progress, id, binding.spec.name());
                    continue;
                }
                Verdict::Pass | Verdict::Pending => {}
            }

            let dims = binding.spec.bindings();
            let mut missing = false;
            for (slot, axis) in coords.iter_mut().zip(dims) {
                match scope.value(axis.variable, &record) {
                    Ok(v) => *slot = v,
                    Err(e) if e.is_recoverable() => {
                        missing = true;
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }
            if missing {
                skip_fill(&mut histograms, &mut progress, id, binding.spec.name());
                continue;
            }
            histograms.fill(id, &binding.spec, &coords[..dims.len()])?;
        }

        progress.records_processed += 1;
        if report_period > 0 && progress.records_processed % report_period == 0 {
            observer.on_progress(&progress);
        }
    }

    Ok((histograms, progress))
}

fn select(
    verdicts: &mut [Verdict],
    selections: &[CutSet],
    idx: usize,
    scope: &mut EvalScope<'_>,
    record: &Record,
) -> Result<Verdict> {
    if verdicts[idx] == Verdict::Pending {
        verdicts[idx] = match selections[idx].evaluate_in(scope, record) {
            Ok(true) => Verdict::Pass,
            Ok(false) => Verdict::Fail,
            Err(e) if e.is_recoverable() => Verdict::Missing,
            Err(e) => return Err(e),
        };
    }
    Ok(verdicts[idx])
}

fn skip_fill(histograms: &mut HistogramSet, progress: &mut Progress, id: HistogramId, name: &str) {
    histograms.skip(id);
    progress.errors_skipped += 1;
    tracing::trace!(histogram = name, record = progress.records_processed, "fill skipped: missing field");
}

/// Read-only view of one registered histogram after a run.
#[derive(Debug, Clone, Copy)]
pub struct HistogramView<'a> {
    /// Registration id.
    pub id: HistogramId,
    /// Output directory.
    pub path: &'a Namespace,
    /// Definition.
    pub spec: &'a HistogramSpec,
    /// State, or `None` if never filled.
    pub histogram: Option<&'a Histogram>,
    /// Fills skipped because of missing fields.
    pub errors: u64,
}

impl HistogramView<'_> {
    /// Snapshot named after the histogram; zeroed if never filled.
    pub fn snapshot(&self) -> HistogramSnapshot {
        let mut snap = match self.histogram {
            Some(h) => h.snapshot(self.spec.name()),
            None => HistogramSnapshot::zeroed(self.spec.name(), &self.spec.axes()),
        };
        snap.errors = self.errors;
        snap
    }
}

/// Outcome of a run: filled histograms plus final progress.
#[derive(Debug, Clone)]
pub struct RunResult<'c> {
    ctx: &'c RunContext,
    histograms: HistogramSet,
    progress: Progress,
}

impl<'c> RunResult<'c> {
    /// Context the run used.
    pub fn context(&self) -> &'c RunContext {
        self.ctx
    }

    /// Final progress.
    pub fn progress(&self) -> Progress {
        self.progress
    }

    /// Raw histogram arena.
    pub fn histograms(&self) -> &HistogramSet {
        &self.histograms
    }

    /// Every registered histogram, in registration order.
    pub fn iter(&self) -> impl Iterator<Item = HistogramView<'_>> {
        self.ctx.histograms().iter().map(|(id, binding)| HistogramView {
            id,
            path: &binding.path,
            spec: &binding.spec,
            histogram: self.histograms.get(id),
            errors: self.histograms.errors(id),
        })
    }

    /// View of `id`.
    pub fn view(&self, id: HistogramId) -> HistogramView<'_> {
        let binding = self.ctx.histograms().get(id);
        HistogramView {
            id,
            path: &binding.path,
            spec: &binding.spec,
            histogram: self.histograms.get(id),
            errors: self.histograms.errors(id),
        }
    }

    /// Snapshot of `id`.
    pub fn snapshot(&self, id: HistogramId) -> HistogramSnapshot {
        self.view(id).snapshot()
    }

    /// Snapshot of histogram `name` under `path` (e.g. `"prompt/pT_0_2"`).
    pub fn find(&self, path: &str, name: &str) -> Result<HistogramSnapshot> {
        self.ctx
            .histograms()
            .find(&Namespace::parse(path), name)
            .map(|id| self.snapshot(id))
            .ok_or_else(|| Error::UnknownHistogram(format!("{path}/{name}")))
    }

    /// Fold another result of the same context into this one.
    pub fn merge(&mut self, other: RunResult<'_>) -> Result<()> {
        self.histograms.merge(other.histograms)?;
        self.progress.records_processed += other.progress.records_processed;
        self.progress.errors_skipped += other.progress.errors_skipped;
        Ok(())
    }
}
