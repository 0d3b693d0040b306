//! Post-processing combinators over histogram snapshots.
//!
//! Every combinator requires identical binning and fails with
//! [`Error::AxisMismatch`] otherwise. A failing step leaves its inputs
//! untouched.

use cf_core::{Error, Result};
use cf_select::Namespace;

use crate::histogram::HistogramSnapshot;
use crate::output::OutputTree;

/// Scale every histogram after the first so its integral matches the first.
///
/// Bins and flows scale by `ref / this`, `sumw2` by the square. Returns the
/// factor applied to each element (1 for the reference). Nothing is modified
/// unless every target can be scaled.
pub fn normalize_to_reference(hists: &mut [HistogramSnapshot]) -> Result<Vec<f64>> {
    let Some((reference, targets)) = hists.split_first_mut() else {
        return Ok(Vec::new());
    };
    let ref_integral = reference.integral();

    let mut factors = Vec::with_capacity(targets.len() + 1);
    factors.push(1.0);
    for t in targets.iter() {
        reference.check_same_binning(t)?;
        let integral = t.integral();
        if integral == 0.0 {
            return Err(Error::EmptyHistogram(t.name.clone()));
        }
        factors.push(ref_integral / integral);
    }

    for (t, &f) in targets.iter_mut().zip(&factors[1..]) {
        t.scale(f);
    }
    tracing::debug!(reference = %reference.name, targets = targets.len(), "normalized to reference");
    Ok(factors)
}

/// Uncertainty propagation for [`efficiency`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ErrorModel {
    /// Numerator and denominator treated as independent:
    /// `σ² = (σr²·g² + σg²·r²) / g⁴`.
    #[default]
    Uncorrelated,
    /// Numerator is a subset of the denominator:
    /// `σ² = |(1 − 2ε)·σr² + ε²·σg²| / g²`.
    Binomial,
}

/// Bin-wise `100 · reconstructed / generated`, 0 where nothing was generated.
///
/// Flows are not carried; `entries` is taken from `reconstructed`.
pub fn efficiency(
    reconstructed: &HistogramSnapshot,
    generated: &HistogramSnapshot,
    model: ErrorModel,
) -> Result<HistogramSnapshot> {
    reconstructed.check_same_binning(generated)?;
    let mut out = HistogramSnapshot::zeroed(&reconstructed.name, &reconstructed.axes);
    out.entries = reconstructed.entries;

    for i in 0..out.bins.len() {
        let (r, g) = (reconstructed.bins[i], generated.bins[i]);
        if g == 0.0 {
            continue;
        }
        let (vr, vg) = (reconstructed.sumw2[i], generated.sumw2[i]);
        let eff = r / g;
        let var = match model {
            ErrorModel::Uncorrelated => (vr * g * g + vg * r * r) / (g * g * g * g),
            ErrorModel::Binomial => ((1.0 - 2.0 * eff) * vr + eff * eff * vg).abs() / (g * g),
        };
        out.bins[i] = 100.0 * eff;
        out.sumw2[i] = 100.0 * 100.0 * var;
    }
    Ok(out)
}

/// Bin-wise sum of `a` and `b` under a new name.
pub fn merge(name: &str, a: &HistogramSnapshot, b: &HistogramSnapshot) -> Result<HistogramSnapshot> {
    merge_many(name, &[a, b])
}

/// Bin-wise sum of all `parts` under a new name.
pub fn merge_many(name: &str, parts: &[&HistogramSnapshot]) -> Result<HistogramSnapshot> {
    let Some((first, rest)) = parts.split_first() else {
        return Err(Error::EmptyHistogram(format!("{name}: nothing to merge")));
    };
    let mut out = (*first).clone();
    out.name = name.to_string();
    for p in rest {
        first.check_same_binning(p)?;
        out.bins.iter_mut().zip(&p.bins).for_each(|(x, y)| *x += y);
        out.sumw2.iter_mut().zip(&p.sumw2).for_each(|(x, y)| *x += y);
        out.underflow += p.underflow;
        out.overflow += p.overflow;
        out.entries += p.entries;
        out.errors += p.errors;
    }
    Ok(out)
}

impl OutputTree {
    /// Replace histograms `a` and `b` in `dir` with their sum named `result`.
    ///
    /// `a` and `b` must be two different histograms.
    pub fn merge_siblings(&mut self, dir: &Namespace, a: &str, b: &str, result: &str) -> Result<()> {
        if a == b {
            return Err(Error::Config(format!("cannot merge '{a}' in '{dir}' with itself")));
        }
        let leaf = |name: &str| if dir.is_root() { name.to_string() } else { format!("{dir}/{name}") };
        let merged = merge(result, self.get(&leaf(a))?, self.get(&leaf(b))?)?;
        self.remove(&leaf(a))?;
        self.remove(&leaf(b))?;
        self.insert(dir, merged);
        tracing::debug!(dir = %dir, a, b, result, "merged siblings");
        Ok(())
    }

    /// [`normalize_to_reference`] over histograms addressed by path; the
    /// first path is the reference.
    pub fn normalize_paths(&mut self, paths: &[&str]) -> Result<Vec<f64>> {
        let mut hists = paths.iter().map(|p| self.get(p).cloned()).collect::<Result<Vec<_>>>()?;
        let factors = normalize_to_reference(&mut hists)?;
        for (path, h) in paths.iter().zip(hists) {
            *self.get_mut(path)? = h;
        }
        Ok(factors)
    }

    /// Store `efficiency(reconstructed, generated)` in `dir` under `result`.
    pub fn add_efficiency(
        &mut self,
        dir: &Namespace,
        reconstructed: &str,
        generated: &str,
        result: &str,
        model: ErrorModel,
    ) -> Result<()> {
        let mut eff = efficiency(self.get(reconstructed)?, self.get(generated)?, model)?;
        eff.name = result.to_string();
        self.insert(dir, eff);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axis::Axis;
    use approx::assert_relative_eq;

    fn snap(name: &str, bins: &[f64]) -> HistogramSnapshot {
        let mut s = HistogramSnapshot::zeroed(name, &[Axis::new("x", bins.len(), 0.0, 1.0).unwrap()]);
        s.bins = bins.to_vec();
        s.sumw2 = bins.to_vec();
        s.entries = bins.iter().sum::<f64>() as u64;
        s
    }

    #[test]
    fn normalize_matches_reference_integral() {
        let mut hs = vec![snap("ref", &[10.0, 30.0]), snap("a", &[1.0, 1.0]), snap("b", &[5.0, 15.0])];
        let factors = normalize_to_reference(&mut hs).unwrap();
        assert_relative_eq!(factors[1], 20.0);
        assert_relative_eq!(hs[1].integral(), 40.0, epsilon = 1e-12);
        assert_relative_eq!(hs[2].integral(), 40.0, epsilon = 1e-12);
        assert_relative_eq!(hs[1].sumw2[0], 400.0);
        assert_eq!(hs[0].bins, vec![10.0, 30.0]);
    }

    #[test]
    fn normalize_is_atomic() {
        let mut hs = vec![snap("ref", &[4.0]), snap("a", &[2.0]), snap("empty", &[0.0])];
        let err = normalize_to_reference(&mut hs).unwrap_err();
        assert!(matches!(err, Error::EmptyHistogram(n) if n == "empty"));
        assert_eq!(hs[1].bins, vec![2.0]);

        let mut mismatched = vec![snap("ref", &[4.0]), snap("a", &[2.0]), snap("wide", &[1.0, 1.0])];
        assert!(matches!(normalize_to_reference(&mut mismatched), Err(Error::AxisMismatch(_))));
        assert_eq!(mismatched[1].bins, vec![2.0]);
    }

    #[test]
    fn efficiency_uncorrelated() {
        let rec = snap("rec", &[5.0, 0.0, 3.0]);
        let gen_ = snap("gen", &[10.0, 0.0, 4.0]);
        let eff = efficiency(&rec, &gen_, ErrorModel::default()).unwrap();
        assert_relative_eq!(eff.bins[0], 50.0);
        assert_eq!(eff.bins[1], 0.0);
        assert_relative_eq!(eff.bins[2], 75.0);
        // (5·100 + 10·25) / 10⁴ · 100²
        assert_relative_eq!(eff.sumw2[0], 750.0, epsilon = 1e-9);
    }

    #[test]
    fn efficiency_binomial() {
        let rec = snap("rec", &[5.0]);
        let gen_ = snap("gen", &[10.0]);
        let eff = efficiency(&rec, &gen_, ErrorModel::Binomial).unwrap();
        // |(1 - 1)·5 + 0.25·10| / 100 · 100²
        assert_relative_eq!(eff.sumw2[0], 250.0, epsilon = 1e-9);
        assert_relative_eq!(eff.bin_errors()[0], 250.0_f64.sqrt());
    }

    #[test]
    fn efficiency_needs_same_binning() {
        let err = efficiency(&snap("r", &[1.0]), &snap("g", &[1.0, 1.0]), ErrorModel::Binomial);
        assert!(matches!(err, Err(Error::AxisMismatch(_))));
    }

    #[test]
    fn merge_adds_everything() {
        let mut a = snap("a", &[1.0, 2.0]);
        a.underflow = 1.0;
        a.errors = 2;
        let mut b = snap("b", &[3.0, 4.0]);
        b.overflow = 2.0;
        b.errors = 1;
        let m = merge("sum", &a, &b).unwrap();
        assert_eq!(m.name, "sum");
        assert_eq!(m.bins, vec![4.0, 6.0]);
        assert_eq!((m.underflow, m.overflow, m.entries, m.errors), (1.0, 2.0, 10, 3));
        assert!(merge_many("none", &[]).is_err());
    }

    #[test]
    fn tree_steps_leave_tree_intact_on_error() {
        let mut tree = OutputTree::new();
        let dir = Namespace::parse("prompt");
        tree.insert(&dir, snap("hA", &[1.0, 1.0]));
        tree.insert(&dir, snap("hB", &[2.0, 2.0]));
        tree.insert(&dir, snap("hWide", &[1.0, 1.0, 1.0]));

        assert!(tree.merge_siblings(&dir, "hA", "hWide", "hSum").is_err());
        assert!(tree.get("prompt/hA").is_ok());
        assert!(tree.get("prompt/hWide").is_ok());

        let before = tree.clone();
        assert!(matches!(tree.merge_siblings(&dir, "hA", "hA", "hSum"), Err(Error::Config(_))));
        assert_eq!(tree, before);

        tree.merge_siblings(&dir, "hA", "hB", "hSum").unwrap();
        assert_eq!(tree.get("prompt/hSum").unwrap().bins, vec![3.0, 3.0]);
        assert!(tree.get("prompt/hA").is_err());

        tree.insert(&dir, snap("hZero", &[0.0, 0.0]));
        let before = tree.clone();
        assert!(tree.normalize_paths(&["prompt/hSum", "prompt/hZero"]).is_err());
        assert_eq!(tree, before);

        tree.add_efficiency(&dir, "prompt/hSum", "prompt/hSum", "hEff", ErrorModel::Binomial).unwrap();
        assert_eq!(tree.get("prompt/hEff").unwrap().bins, vec![100.0, 100.0]);
    }
}
