//! # cf-select
//!
//! Selection layer of cutflow: derived variables, cuts, and the namespace
//! tree they induce.
//!
//! ```
//! use cf_core::{FieldKey, Record};
//! use cf_select::{Cut, VariableRegistry};
//!
//! let mut vars = VariableRegistry::new();
//! let pt = vars.register_field(FieldKey::new("Candidates", "fKFPt")).unwrap();
//! let lo_pt = Cut::range(pt, 0.0, 5.0).labeled("loPt");
//! let rec = Record::new().with("Candidates", "fKFPt", 3.0);
//! assert!(lo_pt.evaluate(&vars, &rec).unwrap());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cut;
pub mod expr;
pub mod namespace;
pub mod variable;

pub use cut::{Cut, CutSet, Predicate, range_cuts};
pub use expr::CompiledExpr;
pub use namespace::{
    CutDimension, DEFAULT_INCLUSIVE_LABEL, Namespace, NamespaceBuilder, NamespaceEntry,
};
pub use variable::{EvalScope, Evaluator, Variable, VariableId, VariableRegistry};
