//! Hierarchical output paths from orthogonal cut dimensions.

use std::collections::HashMap;
use std::fmt;

use cf_core::{Error, Result};

use crate::cut::{Cut, CutSet, check_label};

/// Default label of the unsliced entry emitted under each outer combination.
pub const DEFAULT_INCLUSIVE_LABEL: &str = "inclusive";

/// `/`-separated output path. The root path has no segments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Namespace {
    segments: Vec<String>,
}

impl Namespace {
    /// Root path.
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse `a/b/c`; empty segments are dropped.
    pub fn parse(path: &str) -> Self {
        Self { segments: path.split('/').filter(|s| !s.is_empty()).map(str::to_string).collect() }
    }

    /// Path with one more segment.
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self { segments }
    }

    /// Path segments, outermost first.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// `true` for the root path.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// `true` if `prefix` is an ancestor of (or equal to) `self`.
    pub fn starts_with(&self, prefix: &Namespace) -> bool {
        self.segments.starts_with(&prefix.segments)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

/// One selection combination and where its histograms go.
#[derive(Debug, Clone)]
pub struct NamespaceEntry {
    /// Output path.
    pub path: Namespace,
    /// AND of every member cut along the path.
    pub selection: CutSet,
}

impl NamespaceEntry {
    /// Root path, accept-all selection.
    pub fn root() -> Self {
        Self { path: Namespace::root(), selection: CutSet::empty() }
    }
}

/// One axis of slicing, e.g. data type or a set of pT bins.
///
/// Members are expected to be mutually exclusive; that is not checked.
#[derive(Debug, Clone)]
pub struct CutDimension {
    name: String,
    members: Vec<CutSet>,
}

impl CutDimension {
    /// Dimension from composed members.
    pub fn new(name: impl Into<String>, members: Vec<CutSet>) -> Self {
        Self { name: name.into(), members }
    }

    /// Dimension whose members are single cuts.
    pub fn from_cuts(name: impl Into<String>, cuts: impl IntoIterator<Item = Cut>) -> Result<Self> {
        let members = cuts.into_iter().map(CutSet::single).collect::<Result<Vec<_>>>()?;
        Ok(Self::new(name, members))
    }

    /// Dimension name (diagnostics only).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Members in order.
    pub fn members(&self) -> &[CutSet] {
        &self.members
    }
}

/// Builds the cartesian product of cut dimensions as namespace entries.
///
/// For dimensions `D1 .. Dn` it emits every full combination
/// `d1/d2/.../dn`, and for every k < n outer combination `d1/.../dk` an
/// inclusive entry `d1/.../dk/<inclusive>` selected by the outer cuts alone.
///
/// ```
/// # use cf_core::FieldKey;
/// # use cf_select::{Cut, CutDimension, NamespaceBuilder, VariableRegistry};
/// let mut vars = VariableRegistry::new();
/// let pt = vars.register_field(FieldKey::new("Candidates", "fKFPt")).unwrap();
/// let entries = NamespaceBuilder::new()
///     .dimension(CutDimension::from_cuts("pt", [
///         Cut::range(pt, 0.0, 5.0).labeled("loPt"),
///         Cut::range(pt, 5.0, 1000.0).labeled("hiPt"),
///     ]).unwrap())
///     .build()
///     .unwrap();
/// let paths: Vec<String> = entries.iter().map(|e| e.path.to_string()).collect();
/// assert_eq!(paths, ["inclusive", "loPt", "hiPt"]);
/// ```
#[derive(Debug, Clone)]
pub struct NamespaceBuilder {
    top: Namespace,
    dimensions: Vec<CutDimension>,
    inclusive: Option<String>,
}

impl Default for NamespaceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl NamespaceBuilder {
    /// No dimensions, inclusive entries labeled [`DEFAULT_INCLUSIVE_LABEL`].
    pub fn new() -> Self {
        Self {
            top: Namespace::root(),
            dimensions: Vec::new(),
            inclusive: Some(DEFAULT_INCLUSIVE_LABEL.to_string()),
        }
    }

    /// Prefix every path with a top-level directory.
    pub fn top_dir(mut self, path: &str) -> Self {
        self.top = Namespace::parse(path);
        self
    }

    /// Append an inner dimension.
    pub fn dimension(mut self, dimension: CutDimension) -> Self {
        self.dimensions.push(dimension);
        self
    }

    /// Rename the inclusive segment.
    pub fn inclusive_label(mut self, label: impl Into<String>) -> Self {
        self.inclusive = Some(label.into());
        self
    }

    /// Emit only full combinations.
    pub fn without_inclusive(mut self) -> Self {
        self.inclusive = None;
        self
    }

    /// Expand into entries.
    ///
    /// Fails with [`Error::DuplicateNamespace`] when two combinations land on
    /// one path, and with [`Error::Config`] on an empty dimension or when two
    /// dimensions share a cut label (cut labels must be unique across the
    /// combined selection, even though the paths would differ).
    pub fn build(&self) -> Result<Vec<NamespaceEntry>> {
        for seg in self.top.segments() {
            check_label(seg)?;
        }
        if let Some(label) = &self.inclusive {
            check_label(label)?;
        }
        for dim in &self.dimensions {
            if dim.members.is_empty() {
                return Err(Error::Config(format!("cut dimension '{}' has no members", dim.name)));
            }
            for member in &dim.members {
                check_label(&member.name())?;
            }
        }

        let mut out = Vec::new();
        let mut seen: HashMap<String, String> = HashMap::new();
        self.expand(0, self.top.clone(), CutSet::empty(), &mut out, &mut seen)?;
        tracing::debug!(
            entries = out.len(),
            dimensions = self.dimensions.len(),
            top = %self.top,
            "namespace expanded"
        );
        Ok(out)
    }

    fn expand(
        &self,
        level: usize,
        path: Namespace,
        selection: CutSet,
        out: &mut Vec<NamespaceEntry>,
        seen: &mut HashMap<String, String>,
    ) -> Result<()> {
        if level == self.dimensions.len() {
            return push_unique(NamespaceEntry { path, selection }, out, seen);
        }
        if let Some(label) = &self.inclusive {
            let entry = NamespaceEntry { path: path.child(label.as_str()), selection: selection.clone() };
            push_unique(entry, out, seen)?;
        }
        let dim = &self.dimensions[level];
        for member in &dim.members {
            let combined = selection.and(member).map_err(|e| match e {
                Error::DuplicateName { kind: "cut", name } => {
                    let outer = self.dimensions[..level]
                        .iter()
                        .find(|d| d.members.iter().any(|m| m.cuts().iter().any(|c| c.label() == name)))
                        .map_or("?", |d| d.name.as_str());
                    Error::Config(format!(
                        "cut label '{name}' is used by both dimension '{outer}' and dimension '{}'",
                        dim.name
                    ))
                }
                other => other,
            })?;
            self.expand(level + 1, path.child(member.name()), combined, out, seen)?;
        }
        Ok(())
    }
}

fn push_unique(
    entry: NamespaceEntry,
    out: &mut Vec<NamespaceEntry>,
    seen: &mut HashMap<String, String>,
) -> Result<()> {
    let key = entry.path.to_string();
    if let Some(previous) = seen.get(&key) {
        tracing::warn!(path = %key, first = %previous, second = %entry.selection.name(), "namespace collision");
        return Err(Error::DuplicateNamespace(key));
    }
    seen.insert(key, entry.selection.name());
    out.push(entry);
    Ok(())
}
