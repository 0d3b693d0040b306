//! Histogram definitions bound to namespaces, and the run context that owns
//! every registry.

use std::collections::{HashMap, HashSet};

use cf_core::{Error, Result};
use cf_select::{CutSet, Namespace, NamespaceEntry, VariableId, VariableRegistry};

use crate::axis::Axis;
use crate::histogram::Histogram;

/// One histogram dimension: an axis filled from a variable.
#[derive(Debug, Clone)]
pub struct AxisBinding {
    /// Binning and title.
    pub axis: Axis,
    /// Variable providing the coordinate.
    pub variable: VariableId,
}

/// Definition of a 1D or 2D histogram.
#[derive(Debug, Clone)]
pub struct HistogramSpec {
    name: String,
    dims: Vec<AxisBinding>,
    guard: CutSet,
}

impl HistogramSpec {
    /// 1D histogram of `variable`.
    pub fn h1(name: impl Into<String>, axis: Axis, variable: VariableId) -> Self {
        Self { name: name.into(), dims: vec![AxisBinding { axis, variable }], guard: CutSet::empty() }
    }

    /// 2D histogram of `(x_var, y_var)`.
    pub fn h2(
        name: impl Into<String>,
        (x_axis, x_var): (Axis, VariableId),
        (y_axis, y_var): (Axis, VariableId),
    ) -> Self {
        Self {
            name: name.into(),
            dims: vec![
                AxisBinding { axis: x_axis, variable: x_var },
                AxisBinding { axis: y_axis, variable: y_var },
            ],
            guard: CutSet::empty(),
        }
    }

    /// Only fill when `guard` passes (on top of the namespace selection).
    pub fn guarded(mut self, guard: CutSet) -> Self {
        self.guard = guard;
        self
    }

    /// Leaf name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Extra selection applied to this histogram only.
    pub fn guard(&self) -> &CutSet {
        &self.guard
    }

    /// 1 or 2.
    pub fn axis_count(&self) -> usize {
        self.dims.len()
    }

    /// Dimensions in order.
    pub fn bindings(&self) -> &[AxisBinding] {
        &self.dims
    }

    /// Axes in order.
    pub fn axes(&self) -> Vec<Axis> {
        self.dims.iter().map(|b| b.axis.clone()).collect()
    }

    /// Zeroed instance.
    pub(crate) fn instantiate(&self) -> Result<Histogram> {
        Histogram::new(&self.axes())
    }

    fn validate(&self, variables: &VariableRegistry) -> Result<()> {
        if self.name.is_empty() || self.name.contains('/') {
            return Err(Error::InvalidLabel(self.name.clone()));
        }
        if !(1..=2).contains(&self.dims.len()) {
            return Err(Error::Config(format!(
                "histogram '{}' has {} axes, expected 1 or 2",
                self.name,
                self.dims.len()
            )));
        }
        for b in &self.dims {
            b.axis.validate()?;
            if !variables.contains(b.variable) {
                return Err(Error::UnknownVariable(format!(
                    "variable #{} used by histogram '{}'",
                    b.variable.index(),
                    self.name
                )));
            }
        }
        for v in self.guard.variables() {
            if !variables.contains(v) {
                return Err(Error::UnknownVariable(format!(
                    "variable #{} used by the guard of '{}'",
                    v.index(),
                    self.name
                )));
            }
        }
        Ok(())
    }
}

/// Index of a registered histogram; also its slot in a run's histogram set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HistogramId(usize);

impl HistogramId {
    /// Position in registration order.
    pub fn index(self) -> usize {
        self.0
    }
}

/// A spec placed at a namespace path.
#[derive(Debug, Clone)]
pub struct Binding {
    /// Output path.
    pub path: Namespace,
    /// The definition.
    pub spec: HistogramSpec,
    pub(crate) selection: usize,
    pub(crate) guard: Option<usize>,
}

/// All histogram definitions of a run, in registration order.
///
/// Namespace selections are deduplicated per path; every distinct
/// selection is evaluated at most once per record.
#[derive(Debug, Clone, Default)]
pub struct HistogramRegistry {
    bindings: Vec<Binding>,
    selections: Vec<CutSet>,
    by_path: HashMap<Namespace, usize>,
    names: HashSet<(Namespace, String)>,
}

impl HistogramRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Place `spec` at `entry`.
    ///
    /// Errors: [`Error::InvalidAxis`], [`Error::UnknownVariable`],
    /// [`Error::DuplicateNamespace`] if the path is already bound to a
    /// selection with different cuts (labels alone do not make two
    /// selections equal), [`Error::DuplicateName`] if the path already holds
    /// a histogram of that name.
    pub fn register(
        &mut self,
        variables: &VariableRegistry,
        entry: &NamespaceEntry,
        spec: HistogramSpec,
    ) -> Result<HistogramId> {
        spec.validate(variables)?;
        for v in entry.selection.variables() {
            if !variables.contains(v) {
                return Err(Error::UnknownVariable(format!(
                    "variable #{} used by namespace '{}'",
                    v.index(),
                    entry.path
                )));
            }
        }

        if let Some(&idx) = self.by_path.get(&entry.path)
            && !self.selections[idx].same_selection(&entry.selection)
        {
            return Err(Error::DuplicateNamespace(format!(
                "{} (bound to '{}', now '{}')",
                entry.path,
                self.selections[idx].name(),
                entry.selection.name()
            )));
        }
        let key = (entry.path.clone(), spec.name().to_string());
        if self.names.contains(&key) {
            return Err(Error::DuplicateName {
                kind: "histogram",
                name: format!("{}/{}", entry.path, spec.name()),
            });
        }
        self.names.insert(key);

        let selection = match self.by_path.get(&entry.path) {
            Some(&idx) => idx,
            None => {
                self.selections.push(entry.selection.clone());
                let idx = self.selections.len() - 1;
                self.by_path.insert(entry.path.clone(), idx);
                idx
            }
        };

        let guard = if spec.guard().is_empty() {
            None
        } else {
            self.selections.push(spec.guard().clone());
            Some(self.selections.len() - 1)
        };

        let id = HistogramId(self.bindings.len());
        tracing::debug!(path = %entry.path, name = spec.name(), dims = spec.axis_count(), "histogram registered");
        self.bindings.push(Binding { path: entry.path.clone(), spec, selection, guard });
        Ok(id)
    }

    /// Place one spec under every entry.
    pub fn register_all(
        &mut self,
        variables: &VariableRegistry,
        entries: &[NamespaceEntry],
        spec: &HistogramSpec,
    ) -> Result<Vec<HistogramId>> {
        entries.iter().map(|e| self.register(variables, e, spec.clone())).collect()
    }

    /// Binding by id.
    pub fn get(&self, id: HistogramId) -> &Binding {
        &self.bindings[id.0]
    }

    /// Id of the histogram `name` at `path`.
    pub fn find(&self, path: &Namespace, name: &str) -> Option<HistogramId> {
        self.bindings
            .iter()
            .position(|b| &b.path == path && b.spec.name() == name)
            .map(HistogramId)
    }

    /// All bindings with their ids.
    pub fn iter(&self) -> impl Iterator<Item = (HistogramId, &Binding)> {
        self.bindings.iter().enumerate().map(|(i, b)| (HistogramId(i), b))
    }

    /// Number of registered histograms.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub(crate) fn selections(&self) -> &[CutSet] {
        &self.selections
    }
}

/// Everything a run needs, built up front and read-only during the run.
///
/// Passed by reference to [`crate::TaskRunner`]; there is no global state.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    variables: VariableRegistry,
    histograms: HistogramRegistry,
}

impl RunContext {
    /// Empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Context around an existing variable registry.
    pub fn with_variables(variables: VariableRegistry) -> Self {
        Self { variables, histograms: HistogramRegistry::new() }
    }

    /// Variables.
    pub fn variables(&self) -> &VariableRegistry {
        &self.variables
    }

    /// Mutable variables, for registration before the run.
    pub fn variables_mut(&mut self) -> &mut VariableRegistry {
        &mut self.variables
    }

    /// Histogram definitions.
    pub fn histograms(&self) -> &HistogramRegistry {
        &self.histograms
    }

    /// See [`HistogramRegistry::register`].
    pub fn add_histogram(&mut self, entry: &NamespaceEntry, spec: HistogramSpec) -> Result<HistogramId> {
        self.histograms.register(&self.variables, entry, spec)
    }

    /// See [`HistogramRegistry::register_all`].
    pub fn add_histogram_all(
        &mut self,
        entries: &[NamespaceEntry],
        spec: &HistogramSpec,
    ) -> Result<Vec<HistogramId>> {
        self.histograms.register_all(&self.variables, entries, spec)
    }
}
