//! # cf-hist
//!
//! Histogram layer of cutflow: booking histograms under namespace entries,
//! the single-pass fill loop, the output tree and post-processing.
//!
//! ```
//! use cf_core::{FieldKey, IterSource, Record};
//! use cf_hist::{Axis, HistogramSpec, OutputTree, RunContext, TaskRunner};
//! use cf_select::{Cut, CutDimension, NamespaceBuilder};
//!
//! let mut ctx = RunContext::new();
//! let pt = ctx.variables_mut().register_field(FieldKey::new("Candidates", "fKFPt")).unwrap();
//! let entries = NamespaceBuilder::new()
//!     .dimension(CutDimension::from_cuts("pt", [
//!         Cut::range(pt, 0.0, 5.0).labeled("loPt"),
//!         Cut::range(pt, 5.0, 1000.0).labeled("hiPt"),
//!     ]).unwrap())
//!     .build()
//!     .unwrap();
//! let axis = Axis::new("p_{T}", 20, 0.0, 20.0).unwrap();
//! ctx.add_histogram_all(&entries, &HistogramSpec::h1("hPt", axis, pt)).unwrap();
//!
//! let records = [1.0, 6.0, 3.0].map(|v| Record::new().with("Candidates", "fKFPt", v));
//! let result = TaskRunner::new(&ctx).run(IterSource::new(records)).unwrap();
//! let tree = OutputTree::from_result(&result);
//! assert_eq!(tree.get("loPt/hPt").unwrap().entries, 2);
//! assert_eq!(tree.get("inclusive/hPt").unwrap().entries, 3);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod axis;
pub mod config;
pub mod histogram;
pub mod output;
pub mod postprocess;
pub mod registry;
pub mod runner;

pub use axis::{Axis, Slot};
pub use config::{
    AnalysisConfig, AxisConfig, CutConfig, DimensionConfig, HistogramConfig, RunSettings,
    VariableConfig,
};
pub use histogram::{Hist1D, Hist2D, Histogram, HistogramSnapshot};
pub use output::{Directory, OUTPUT_SCHEMA_V1, OutputTree, OutputWriter};
pub use postprocess::{ErrorModel, efficiency, merge, merge_many, normalize_to_reference};
pub use registry::{AxisBinding, Binding, HistogramId, HistogramRegistry, HistogramSpec, RunContext};
pub use runner::{HistogramSet, HistogramView, RunResult, TaskRunner};
