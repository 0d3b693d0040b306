//! YAML analysis configuration.
//!
//! A single file declares variables, cut dimensions and histograms. JSON is
//! accepted too (YAML is a superset).
//!
//! ```yaml
//! report_period: 10000
//! top_dir: lc
//! variables:
//!   - name: ptRatio
//!     expr: Candidates.fKFPt / Candidates.fPtMother
//! dimensions:
//!   - name: type
//!     cuts:
//!       - { label: prompt, variable: Candidates.fKFSigBgStatus, equals: 1 }
//!       - { label: nonPrompt, variable: Candidates.fKFSigBgStatus, equals: 2 }
//!   - name: pt
//!     variable: Candidates.fKFPt
//!     edges: [0, 2, 5, 10]
//!     prefix: pT_
//! histograms:
//!   - name: hMass
//!     axes:
//!       - { variable: Candidates.fKFMassLc, title: "m (GeV)", bins: 600, low: 1.98, high: 2.58 }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use cf_core::{Error, Result};
use cf_select::{
    Cut, CutDimension, CutSet, DEFAULT_INCLUSIVE_LABEL, NamespaceBuilder, VariableRegistry,
    range_cuts,
};

use crate::axis::Axis;
use crate::registry::{HistogramSpec, RunContext};
use crate::runner::TaskRunner;

fn default_true() -> bool {
    true
}

fn default_inclusive_label() -> String {
    DEFAULT_INCLUSIVE_LABEL.to_string()
}

/// Top-level configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnalysisConfig {
    /// Progress report period in records (0 = only at the end).
    #[serde(default)]
    pub report_period: u64,
    /// Directory prefix for every output path.
    #[serde(default)]
    pub top_dir: Option<String>,
    /// Emit inclusive entries.
    #[serde(default = "default_true")]
    pub inclusive: bool,
    /// Segment name of inclusive entries.
    #[serde(default = "default_inclusive_label")]
    pub inclusive_label: String,
    /// Expression variables, registered in order.
    #[serde(default)]
    pub variables: Vec<VariableConfig>,
    /// Cut dimensions, outermost first.
    #[serde(default)]
    pub dimensions: Vec<DimensionConfig>,
    /// Histograms booked under every namespace entry.
    #[serde(default)]
    pub histograms: Vec<HistogramConfig>,
}

/// A named formula over `Branch.field` references.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VariableConfig {
    /// Variable name.
    pub name: String,
    /// Formula.
    pub expr: String,
}

/// One cut on a variable: `equals`, or a `[min, max)` range with either bound
/// optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CutConfig {
    /// Path segment; required for `equals`, defaults to `"{min}_{max}"`.
    #[serde(default)]
    pub label: Option<String>,
    /// Variable name or `Branch.field`.
    pub variable: String,
    /// Categorical value.
    #[serde(default)]
    pub equals: Option<f64>,
    /// Inclusive lower bound.
    #[serde(default)]
    pub min: Option<f64>,
    /// Exclusive upper bound.
    #[serde(default)]
    pub max: Option<f64>,
}

/// A cut dimension: explicit `cuts`, or ranges generated from `edges`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DimensionConfig {
    /// Dimension name.
    pub name: String,
    /// Explicit members.
    #[serde(default)]
    pub cuts: Vec<CutConfig>,
    /// Variable for generated ranges.
    #[serde(default)]
    pub variable: Option<String>,
    /// Range edges.
    #[serde(default)]
    pub edges: Vec<f64>,
    /// Label prefix for generated ranges.
    #[serde(default)]
    pub prefix: String,
    /// Decimals in generated labels.
    #[serde(default)]
    pub precision: usize,
}

/// One histogram axis.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AxisConfig {
    /// Variable name or `Branch.field`.
    pub variable: String,
    /// Axis title.
    #[serde(default)]
    pub title: String,
    /// Number of bins.
    pub bins: usize,
    /// Lower edge.
    pub low: f64,
    /// Upper edge.
    pub high: f64,
}

/// One histogram booked under every namespace entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HistogramConfig {
    /// Leaf name.
    pub name: String,
    /// One or two axes.
    pub axes: Vec<AxisConfig>,
    /// Extra cuts for this histogram only.
    #[serde(default)]
    pub guard: Vec<CutConfig>,
}

/// Run-time knobs that are not part of the [`RunContext`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSettings {
    /// See [`TaskRunner::report_every`].
    pub report_period: u64,
}

impl RunSettings {
    /// Runner over `ctx` with these settings.
    pub fn runner<'c>(&self, ctx: &'c RunContext) -> TaskRunner<'c> {
        TaskRunner::new(ctx).report_every(self.report_period)
    }
}

impl CutConfig {
    fn build(&self, vars: &mut VariableRegistry) -> Result<Cut> {
        let id = vars.resolve_or_field(&self.variable)?;
        match (self.equals, self.min, self.max) {
            (Some(value), None, None) => {
                let label = self.label.clone().ok_or_else(|| {
                    Error::Config(format!("equals cut on '{}' needs a label", self.variable))
                })?;
                Ok(Cut::equals(id, value, label))
            }
            (None, lo, hi) if lo.is_some() || hi.is_some() => {
                let lo = lo.unwrap_or(f64::NEG_INFINITY);
                let hi = hi.unwrap_or(f64::INFINITY);
                if lo.is_nan() || hi.is_nan() || lo >= hi {
                    return Err(Error::Config(format!(
                        "cut on '{}': need min < max, got [{lo}, {hi})",
                        self.variable
                    )));
                }
                let cut = Cut::range(id, lo, hi);
                Ok(match &self.label {
                    Some(label) => cut.labeled(label.as_str()),
                    None => cut,
                })
            }
            _ => Err(Error::Config(format!(
                "cut on '{}' needs either `equals` or `min`/`max`",
                self.variable
            ))),
        }
    }
}

impl DimensionConfig {
    fn build(&self, vars: &mut VariableRegistry) -> Result<CutDimension> {
        match (&self.variable, self.cuts.is_empty()) {
            (None, false) => {
                let cuts = self.cuts.iter().map(|c| c.build(vars)).collect::<Result<Vec<_>>>()?;
                CutDimension::from_cuts(self.name.as_str(), cuts)
            }
            (Some(variable), true) => {
                let id = vars.resolve_or_field(variable)?;
                CutDimension::from_cuts(
                    self.name.as_str(),
                    range_cuts(id, &self.prefix, &self.edges, self.precision)?,
                )
            }
            _ => Err(Error::Config(format!(
                "dimension '{}' needs either `cuts` or `variable` + `edges`",
                self.name
            ))),
        }
    }
}

impl HistogramConfig {
    fn build(&self, vars: &mut VariableRegistry) -> Result<HistogramSpec> {
        let mut bound = Vec::with_capacity(self.axes.len());
        for a in &self.axes {
            let axis = Axis::new(a.title.as_str(), a.bins, a.low, a.high)?;
            bound.push((axis, vars.resolve_or_field(&a.variable)?));
        }
        let mut bound = bound.into_iter();
        let spec = match (bound.next(), bound.next(), bound.next()) {
            (Some((axis, var)), None, None) => HistogramSpec::h1(self.name.as_str(), axis, var),
            (Some(x), Some(y), None) => HistogramSpec::h2(self.name.as_str(), x, y),
            _ => {
                return Err(Error::Config(format!(
                    "histogram '{}' has {} axes, expected 1 or 2",
                    self.name,
                    self.axes.len()
                )));
            }
        };
        if self.guard.is_empty() {
            return Ok(spec);
        }
        let guard = CutSet::new(self.guard.iter().map(|c| c.build(vars)).collect::<Result<Vec<_>>>()?)?;
        Ok(spec.guarded(guard))
    }
}

impl AnalysisConfig {
    /// Parse YAML (or JSON) text.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        Ok(serde_yaml_ng::from_str(text)?)
    }

    /// Read and parse a config file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        tracing::info!(path = %path.display(), "loading analysis config");
        Self::from_yaml_str(&text)
    }

    /// Build the run context. Every configuration error surfaces here, before
    /// any record is read.
    pub fn build(&self) -> Result<(RunContext, RunSettings)> {
        let mut vars = VariableRegistry::new();
        for v in &self.variables {
            vars.register_expr(v.name.as_str(), &v.expr)?;
        }

        let mut builder = NamespaceBuilder::new();
        if let Some(top) = &self.top_dir {
            builder = builder.top_dir(top);
        }
        builder = if self.inclusive {
            builder.inclusive_label(self.inclusive_label.as_str())
        } else {
            builder.without_inclusive()
        };
        for d in &self.dimensions {
            builder = builder.dimension(d.build(&mut vars)?);
        }
        let entries = builder.build()?;

        let specs = self.histograms.iter().map(|h| h.build(&mut vars)).collect::<Result<Vec<_>>>()?;

        let mut ctx = RunContext::with_variables(vars);
        for spec in &specs {
            ctx.add_histogram_all(&entries, spec)?;
        }
        tracing::info!(
            variables = ctx.variables().len(),
            namespaces = entries.len(),
            histograms = ctx.histograms().len(),
            "analysis config built"
        );
        Ok((ctx, RunSettings { report_period: self.report_period }))
    }
}
