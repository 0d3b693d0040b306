//! Hierarchical, serializable output: one directory per namespace segment.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use cf_core::{Error, Result};
use cf_select::Namespace;

use crate::histogram::HistogramSnapshot;
use crate::runner::RunResult;

/// Schema tag written at the top of every output file.
pub const OUTPUT_SCHEMA_V1: &str = "cutflow_histograms_v1";

/// One output directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Directory {
    /// Subdirectories by segment name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dirs: BTreeMap<String, Directory>,
    /// Histograms by name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub histograms: BTreeMap<String, HistogramSnapshot>,
}

impl Directory {
    /// `true` if there are neither subdirectories nor histograms.
    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty() && self.histograms.is_empty()
    }

    /// Total number of histograms at and below this directory.
    pub fn histogram_count(&self) -> usize {
        self.histograms.len() + self.dirs.values().map(Directory::histogram_count).sum::<usize>()
    }
}

/// The whole output of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputTree {
    /// Always [`OUTPUT_SCHEMA_V1`].
    pub schema_version: String,
    /// Top-level directory.
    pub root: Directory,
}

impl Default for OutputTree {
    fn default() -> Self {
        Self { schema_version: OUTPUT_SCHEMA_V1.to_string(), root: Directory::default() }
    }
}

fn split_leaf(path: &str) -> Result<(Namespace, &str)> {
    let trimmed = path.trim_matches('/');
    let (dir, name) = match trimmed.rsplit_once('/') {
        Some((dir, name)) => (Namespace::parse(dir), name),
        None => (Namespace::root(), trimmed),
    };
    if name.is_empty() {
        return Err(Error::UnknownHistogram(path.to_string()));
    }
    Ok((dir, name))
}

impl OutputTree {
    /// Empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tree holding every registered histogram of `result`, filled or not.
    pub fn from_result(result: &RunResult<'_>) -> Self {
        let mut tree = Self::new();
        for view in result.iter() {
            tree.insert(view.path, view.snapshot());
        }
        tracing::debug!(histograms = tree.root.histogram_count(), "output tree built");
        tree
    }

    /// Place `snapshot` under `dir`, replacing any histogram of the same name.
    pub fn insert(&mut self, dir: &Namespace, snapshot: HistogramSnapshot) {
        let mut node = &mut self.root;
        for seg in dir.segments() {
            node = node.dirs.entry(seg.clone()).or_default();
        }
        node.histograms.insert(snapshot.name.clone(), snapshot);
    }

    /// Directory at `dir`, if present.
    pub fn dir(&self, dir: &Namespace) -> Option<&Directory> {
        dir.segments().iter().try_fold(&self.root, |node, seg| node.dirs.get(seg))
    }

    fn dir_mut(&mut self, dir: &Namespace) -> Option<&mut Directory> {
        dir.segments().iter().try_fold(&mut self.root, |node, seg| node.dirs.get_mut(seg))
    }

    /// Histogram at `dir/.../name`.
    pub fn get(&self, path: &str) -> Result<&HistogramSnapshot> {
        let (dir, name) = split_leaf(path)?;
        self.dir(&dir)
            .and_then(|d| d.histograms.get(name))
            .ok_or_else(|| Error::UnknownHistogram(path.to_string()))
    }

    /// Mutable histogram at `dir/.../name`.
    pub fn get_mut(&mut self, path: &str) -> Result<&mut HistogramSnapshot> {
        let (dir, name) = split_leaf(path)?;
        self.dir_mut(&dir)
            .and_then(|d| d.histograms.get_mut(name))
            .ok_or_else(|| Error::UnknownHistogram(path.to_string()))
    }

    /// Remove and return the histogram at `dir/.../name`.
    pub fn remove(&mut self, path: &str) -> Result<HistogramSnapshot> {
        let (dir, name) = split_leaf(path)?;
        self.dir_mut(&dir)
            .and_then(|d| d.histograms.remove(name))
            .ok_or_else(|| Error::UnknownHistogram(path.to_string()))
    }

    /// Pretty JSON.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write pretty JSON to `path`, replacing the file.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)?;
        OutputWriter::new(std::io::BufWriter::new(file)).write(self)?;
        tracing::info!(path = %path.display(), histograms = self.root.histogram_count(), "output written");
        Ok(())
    }

    /// Parse a tree previously written by [`OutputTree::to_json_string`].
    pub fn from_json_str(s: &str) -> Result<Self> {
        let tree: Self = serde_json::from_str(s)?;
        if tree.schema_version != OUTPUT_SCHEMA_V1 {
            return Err(Error::Config(format!(
                "unsupported schema_version for output tree: got={} expected={}",
                tree.schema_version, OUTPUT_SCHEMA_V1
            )));
        }
        Ok(tree)
    }

    /// Read a tree from a JSON file.
    pub fn read_json(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}

/// Streams an [`OutputTree`] as pretty JSON to any writer.
#[derive(Debug)]
pub struct OutputWriter<W: Write> {
    out: W,
}

impl<W: Write> OutputWriter<W> {
    /// Wrap `out`.
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Serialize `tree` followed by a newline, then flush.
    pub fn write(&mut self, tree: &OutputTree) -> Result<()> {
        serde_json::to_writer_pretty(&mut self.out, tree)?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        Ok(())
    }

    /// The wrapped writer.
    pub fn into_inner(self) -> W {
        self.out
    }
}
