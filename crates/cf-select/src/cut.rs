//! Named boolean predicates over variables, and their AND-composition.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use cf_core::{Error, Record, Result};

use crate::variable::{EvalScope, VariableId, VariableRegistry};

/// Predicate applied to one variable value.
#[derive(Clone)]
pub enum Predicate {
    /// Half-open interval `lo <= x < hi`.
    Range {
        /// Inclusive lower bound.
        lo: f64,
        /// Exclusive upper bound.
        hi: f64,
    },
    /// Exact equality. Meant for enumerated/categorical codes only; never
    /// use it on continuous quantities.
    Equals(f64),
    /// Arbitrary test.
    Custom(Arc<dyn Fn(f64) -> bool + Send + Sync>),
}

impl Predicate {
    /// Decide the predicate for `x`.
    pub fn test(&self, x: f64) -> bool {
        match self {
            Predicate::Range { lo, hi } => *lo <= x && x < *hi,
            #[allow(clippy::float_cmp)]
            Predicate::Equals(v) => x == *v,
            Predicate::Custom(f) => f(x),
        }
    }

    /// Structural equality. Custom predicates are only equivalent when they
    /// share the same closure.
    pub fn same_as(&self, other: &Predicate) -> bool {
        match (self, other) {
            (Predicate::Range { lo: a_lo, hi: a_hi }, Predicate::Range { lo: b_lo, hi: b_hi }) => {
                a_lo.to_bits() == b_lo.to_bits() && a_hi.to_bits() == b_hi.to_bits()
            }
            (Predicate::Equals(a), Predicate::Equals(b)) => a.to_bits() == b.to_bits(),
            (Predicate::Custom(a), Predicate::Custom(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Range { lo, hi } => write!(f, "[{lo}, {hi})"),
            Predicate::Equals(v) => write!(f, "== {v}"),
            Predicate::Custom(_) => f.write_str("<fn>"),
        }
    }
}

/// A labeled predicate over one variable.
#[derive(Debug, Clone)]
pub struct Cut {
    label: String,
    variable: VariableId,
    predicate: Predicate,
}

impl Cut {
    /// Arbitrary predicate on `variable`.
    pub fn simple<F>(variable: VariableId, label: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(f64) -> bool + Send + Sync + 'static,
    {
        Self { label: label.into(), variable, predicate: Predicate::Custom(Arc::new(predicate)) }
    }

    /// `lo <= x < hi`, labeled `"{lo}_{hi}"` until [`Cut::labeled`] renames it.
    pub fn range(variable: VariableId, lo: f64, hi: f64) -> Self {
        Self { label: format!("{lo}_{hi}"), variable, predicate: Predicate::Range { lo, hi } }
    }

    /// `x == value`, for categorical codes (e.g. a signal/background status).
    pub fn equals(variable: VariableId, value: f64, label: impl Into<String>) -> Self {
        Self { label: label.into(), variable, predicate: Predicate::Equals(value) }
    }

    /// Replace the label.
    pub fn labeled(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Namespace segment contributed by this cut.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Variable the predicate reads.
    pub fn variable(&self) -> VariableId {
        self.variable
    }

    /// The predicate.
    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    /// Same variable and predicate; the label is ignored.
    pub fn same_selection(&self, other: &Cut) -> bool {
        self.variable == other.variable && self.predicate.same_as(&other.predicate)
    }

    /// Decide the cut for an already-computed value.
    pub fn passes(&self, x: f64) -> bool {
        self.predicate.test(x)
    }

    /// Evaluate on a record. Fails only if the variable fails.
    pub fn evaluate(&self, registry: &VariableRegistry, record: &Record) -> Result<bool> {
        Ok(self.passes(registry.evaluate(self.variable, record)?))
    }

    /// Evaluate through a memoizing scope.
    pub fn evaluate_in(&self, scope: &mut EvalScope<'_>, record: &Record) -> Result<bool> {
        Ok(self.passes(scope.value(self.variable, record)?))
    }
}

/// Consecutive range cuts over sorted `edges`, labeled
/// `{prefix}{lo}_{hi}` with `precision` decimals (e.g. `pT_0_2`).
pub fn range_cuts(
    variable: VariableId,
    prefix: &str,
    edges: &[f64],
    precision: usize,
) -> Result<Vec<Cut>> {
    if edges.len() < 2 {
        return Err(Error::InvalidAxis(format!(
            "range cuts '{prefix}' need at least two edges, got {}",
            edges.len()
        )));
    }
    if edges.iter().any(|e| !e.is_finite()) || edges.windows(2).any(|w| w[0] >= w[1]) {
        return Err(Error::InvalidAxis(format!(
            "range cut edges for '{prefix}' must be finite and strictly increasing: {edges:?}"
        )));
    }
    Ok(edges
        .windows(2)
        .map(|w| {
            Cut::range(variable, w[0], w[1])
                .labeled(format!("{prefix}{:.p$}_{:.p$}", w[0], w[1], p = precision))
        })
        .collect())
}

pub(crate) fn check_label(label: &str) -> Result<()> {
    if label.is_empty() || label.contains('/') {
        return Err(Error::InvalidLabel(label.to_string()));
    }
    Ok(())
}

/// Ordered AND-combination of cuts.
///
/// The name is the member labels joined by `_`, in insertion order, so it is
/// identical across runs. An empty set accepts everything and is named `""`.
#[derive(Debug, Clone, Default)]
pub struct CutSet {
    cuts: Vec<Cut>,
}

impl CutSet {
    /// Accept-all set.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Combine `cuts`. Labels must be valid and unique within the set.
    pub fn new(cuts: impl IntoIterator<Item = Cut>) -> Result<Self> {
        let cuts: Vec<Cut> = cuts.into_iter().collect();
        let mut seen = HashSet::new();
        for cut in &cuts {
            check_label(cut.label())?;
            if !seen.insert(cut.label()) {
                return Err(Error::DuplicateName { kind: "cut", name: cut.label().to_string() });
            }
        }
        Ok(Self { cuts })
    }

    /// Set holding one cut.
    pub fn single(cut: Cut) -> Result<Self> {
        Self::new([cut])
    }

    /// Concatenation `self AND other`.
    pub fn and(&self, other: &CutSet) -> Result<Self> {
        Self::new(self.cuts.iter().chain(other.cuts.iter()).cloned())
    }

    /// Deterministic composed label.
    pub fn name(&self) -> String {
        self.cuts.iter().map(Cut::label).collect::<Vec<_>>().join("_")
    }

    /// `true` if both sets apply the same cuts in the same order, whatever
    /// their labels.
    pub fn same_selection(&self, other: &CutSet) -> bool {
        self.cuts.len() == other.cuts.len()
            && self.cuts.iter().zip(&other.cuts).all(|(a, b)| a.same_selection(b))
    }

    /// Member cuts in order.
    pub fn cuts(&self) -> &[Cut] {
        &self.cuts
    }

    /// `true` for the accept-all set.
    pub fn is_empty(&self) -> bool {
        self.cuts.is_empty()
    }

    /// Variables read by the members.
    pub fn variables(&self) -> impl Iterator<Item = VariableId> + '_ {
        self.cuts.iter().map(Cut::variable)
    }

    /// AND of all members, short-circuiting on the first rejection.
    pub fn evaluate(&self, registry: &VariableRegistry, record: &Record) -> Result<bool> {
        for cut in &self.cuts {
            if !cut.evaluate(registry, record)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Like [`CutSet::evaluate`], through a memoizing scope.
    pub fn evaluate_in(&self, scope: &mut EvalScope<'_>, record: &Record) -> Result<bool> {
        for cut in &self.cuts {
            if !cut.evaluate_in(scope, record)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cf_core::FieldKey;

    fn registry() -> (VariableRegistry, VariableId) {
        let mut reg = VariableRegistry::new();
        let pt = reg.register_field(FieldKey::new("Candidates", "fKFPt")).unwrap();
        (reg, pt)
    }

    #[test]
    fn range_is_half_open() {
        let (_, pt) = registry();
        let cut = Cut::range(pt, 0.0, 5.0);
        assert!(cut.passes(0.0));
        assert!(cut.passes(4.999));
        assert!(!cut.passes(5.0));
        assert!(!cut.passes(5.0001));
        assert!(!cut.passes(-0.0001));
        assert!(!cut.passes(f64::NAN));
        assert_eq!(cut.label(), "0_5");
    }

    #[test]
    fn equals_matches_codes() {
        let (mut reg, _) = registry();
        let st = reg.register_field(FieldKey::new("Candidates", "fKFSigBgStatus")).unwrap();
        let prompt = Cut::equals(st, 1.0, "prompt");
        let rec = Record::new().with("Candidates", "fKFSigBgStatus", 1.0);
        assert!(prompt.evaluate(&reg, &rec).unwrap());
        let rec = Record::new().with("Candidates", "fKFSigBgStatus", 2.0);
        assert!(!prompt.evaluate(&reg, &rec).unwrap());
    }

    #[test]
    fn simple_cut_and_missing_field() {
        let (reg, pt) = registry();
        let cut = Cut::simple(pt, "ptAbove2", |x| x > 2.0);
        assert!(cut.evaluate(&reg, &Record::new().with("Candidates", "fKFPt", 3.0)).unwrap());
        assert!(matches!(cut.evaluate(&reg, &Record::new()), Err(Error::MissingField(_))));
    }

    #[test]
    fn range_cuts_from_edges() {
        let (_, pt) = registry();
        let cuts = range_cuts(pt, "pT_", &[0.0, 2.0, 5.0, 8.0], 0).unwrap();
        let labels: Vec<_> = cuts.iter().map(Cut::label).collect();
        assert_eq!(labels, vec!["pT_0_2", "pT_2_5", "pT_5_8"]);
        assert!(cuts[1].passes(2.0));
        assert!(!cuts[1].passes(5.0));

        let cuts = range_cuts(pt, "T_", &[0.2, 0.35], 2).unwrap();
        assert_eq!(cuts[0].label(), "T_0.20_0.35");

        assert!(range_cuts(pt, "x", &[1.0], 0).is_err());
        assert!(range_cuts(pt, "x", &[2.0, 1.0], 0).is_err());
    }

    #[test]
    fn cutset_name_is_stable() {
        let (_, pt) = registry();
        let a = CutSet::new([Cut::range(pt, 0.0, 5.0).labeled("loPt"), Cut::equals(pt, 1.0, "one")])
            .unwrap();
        assert_eq!(a.name(), "loPt_one");
        assert_eq!(a.name(), a.clone().name());
        assert_eq!(CutSet::empty().name(), "");
    }

    #[test]
    fn cutset_rejects_duplicate_and_bad_labels() {
        let (_, pt) = registry();
        let err = CutSet::new([Cut::range(pt, 0.0, 1.0).labeled("a"), Cut::range(pt, 1.0, 2.0).labeled("a")])
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateName { kind: "cut", .. }));
        assert!(matches!(
            CutSet::single(Cut::range(pt, 0.0, 1.0).labeled("a/b")),
            Err(Error::InvalidLabel(_))
        ));
        assert!(matches!(CutSet::single(Cut::equals(pt, 0.0, "")), Err(Error::InvalidLabel(_))));
    }

    #[test]
    fn cutset_is_and_and_empty_accepts() {
        let (reg, pt) = registry();
        let set = CutSet::new([Cut::range(pt, 0.0, 5.0), Cut::simple(pt, "gt1", |x| x > 1.0)]).unwrap();
        let rec = |v| Record::new().with("Candidates", "fKFPt", v);
        assert!(set.evaluate(&reg, &rec(3.0)).unwrap());
        assert!(!set.evaluate(&reg, &rec(0.5)).unwrap());
        assert!(!set.evaluate(&reg, &rec(7.0)).unwrap());
        assert!(CutSet::empty().evaluate(&reg, &Record::new()).unwrap());

        let mut scope = EvalScope::new(&reg);
        assert!(set.evaluate_in(&mut scope, &rec(3.0)).unwrap());
        assert_eq!(scope.computed(), 1);
    }

    #[test]
    fn same_selection_compares_content_not_labels() {
        let (mut reg, pt) = registry();
        let st = reg.register_field(FieldKey::new("Candidates", "fKFSigBgStatus")).unwrap();
        let eq = CutSet::single(Cut::equals(st, 1.0, "signal")).unwrap();
        let range = CutSet::single(Cut::range(st, 0.9, 2.1).labeled("signal")).unwrap();
        assert_eq!(eq.name(), range.name());
        assert!(!eq.same_selection(&range));
        assert!(eq.same_selection(&CutSet::single(Cut::equals(st, 1.0, "other")).unwrap()));
        assert!(!eq.same_selection(&CutSet::single(Cut::equals(pt, 1.0, "signal")).unwrap()));

        let custom = Cut::simple(pt, "gt1", |x| x > 1.0);
        assert!(custom.same_selection(&custom.clone()));
        assert!(!custom.same_selection(&Cut::simple(pt, "gt1", |x| x > 1.0)));
        assert!(CutSet::empty().same_selection(&CutSet::empty()));
    }
}
