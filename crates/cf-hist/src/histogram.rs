//! Live histogram state: 1D and 2D accumulators behind one interface.

use serde::{Deserialize, Serialize};

use cf_core::{Error, Result};

use crate::axis::{Axis, Slot};

/// A 1D accumulator with separate under/overflow.
#[derive(Debug, Clone, PartialEq)]
pub struct Hist1D {
    axis: Axis,
    bins: Vec<f64>,
    sumw2: Vec<f64>,
    underflow: f64,
    overflow: f64,
    entries: u64,
}

impl Hist1D {
    /// Zeroed histogram over `axis` (assumed validated).
    pub fn new(axis: Axis) -> Self {
        let n = axis.n_bins;
        Self { axis, bins: vec![0.0; n], sumw2: vec![0.0; n], underflow: 0.0, overflow: 0.0, entries: 0 }
    }

    /// Add `weight` at `x`.
    pub fn fill_weighted(&mut self, x: f64, weight: f64) {
        self.entries += 1;
        match self.axis.locate(x) {
            Slot::Underflow => self.underflow += weight,
            Slot::Overflow => self.overflow += weight,
            Slot::Bin(i) => {
                self.bins[i] += weight;
                self.sumw2[i] += weight * weight;
            }
        }
    }

    /// The axis.
    pub fn axis(&self) -> &Axis {
        &self.axis
    }

    /// In-range bin contents.
    pub fn bins(&self) -> &[f64] {
        &self.bins
    }
}

/// A 2D accumulator. Bins are stored x-major: index `ix * ny + iy`.
///
/// A fill below either axis counts as underflow; otherwise a fill at/above
/// either axis (or NaN) counts as overflow.
#[derive(Debug, Clone, PartialEq)]
pub struct Hist2D {
    x: Axis,
    y: Axis,
    bins: Vec<f64>,
    sumw2: Vec<f64>,
    underflow: f64,
    overflow: f64,
    entries: u64,
}

impl Hist2D {
    /// Zeroed histogram over `x` × `y` (assumed validated).
    pub fn new(x: Axis, y: Axis) -> Self {
        let n = x.n_bins * y.n_bins;
        Self { x, y, bins: vec![0.0; n], sumw2: vec![0.0; n], underflow: 0.0, overflow: 0.0, entries: 0 }
    }

    /// Add `weight` at `(x, y)`.
    pub fn fill_weighted(&mut self, x: f64, y: f64, weight: f64) {
        self.entries += 1;
        match (self.x.locate(x), self.y.locate(y)) {
            (Slot::Bin(ix), Slot::Bin(iy)) => {
                let i = ix * self.y.n_bins + iy;
                self.bins[i] += weight;
                self.sumw2[i] += weight * weight;
            }
            (Slot::Underflow, _) | (_, Slot::Underflow) => self.underflow += weight,
            _ => self.overflow += weight,
        }
    }

    /// Content of bin `(ix, iy)`.
    pub fn bin(&self, ix: usize, iy: usize) -> f64 {
        self.bins[ix * self.y.n_bins + iy]
    }

    /// X and Y axes.
    pub fn axes(&self) -> (&Axis, &Axis) {
        (&self.x, &self.y)
    }
}

/// One histogram instance, 1D or 2D.
#[derive(Debug, Clone, PartialEq)]
pub enum Histogram {
    /// One axis.
    OneD(Hist1D),
    /// Two axes.
    TwoD(Hist2D),
}

impl Histogram {
    /// Zeroed histogram for 1 or 2 validated axes.
    pub fn new(axes: &[Axis]) -> Result<Self> {
        for a in axes {
            a.validate()?;
        }
        match axes {
            [x] => Ok(Histogram::OneD(Hist1D::new(x.clone()))),
            [x, y] => Ok(Histogram::TwoD(Hist2D::new(x.clone(), y.clone()))),
            _ => Err(Error::Config(format!("histograms have 1 or 2 axes, got {}", axes.len()))),
        }
    }

    /// Unit-weight fill; `values` holds one coordinate per axis.
    pub fn fill(&mut self, values: &[f64]) {
        self.fill_weighted(values, 1.0);
    }

    /// Weighted fill.
    pub fn fill_weighted(&mut self, values: &[f64], weight: f64) {
        debug_assert_eq!(values.len(), self.axis_count());
        match self {
            Histogram::OneD(h) => h.fill_weighted(values[0], weight),
            Histogram::TwoD(h) => h.fill_weighted(values[0], values[1], weight),
        }
    }

    /// 1 or 2.
    pub fn axis_count(&self) -> usize {
        match self {
            Histogram::OneD(_) => 1,
            Histogram::TwoD(_) => 2,
        }
    }

    /// Axes in order.
    pub fn axes(&self) -> Vec<&Axis> {
        match self {
            Histogram::OneD(h) => vec![&h.axis],
            Histogram::TwoD(h) => vec![&h.x, &h.y],
        }
    }

    fn parts(&self) -> (&[f64], &[f64], f64, f64, u64) {
        match self {
            Histogram::OneD(h) => (h.bins.as_slice(), h.sumw2.as_slice(), h.underflow, h.overflow, h.entries),
            Histogram::TwoD(h) => (h.bins.as_slice(), h.sumw2.as_slice(), h.underflow, h.overflow, h.entries),
        }
    }

    fn parts_mut(&mut self) -> (&mut [f64], &mut [f64], &mut f64, &mut f64, &mut u64) {
        match self {
            Histogram::OneD(h) => (
                h.bins.as_mut_slice(),
                h.sumw2.as_mut_slice(),
                &mut h.underflow,
                &mut h.overflow,
                &mut h.entries,
            ),
            Histogram::TwoD(h) => (
                h.bins.as_mut_slice(),
                h.sumw2.as_mut_slice(),
                &mut h.underflow,
                &mut h.overflow,
                &mut h.entries,
            ),
        }
    }

    /// Number of fills, including under/overflow.
    pub fn entries(&self) -> u64 {
        self.parts().4
    }

    /// Sum of in-range bin contents.
    pub fn integral(&self) -> f64 {
        self.parts().0.iter().sum()
    }

    /// Underflow content.
    pub fn underflow(&self) -> f64 {
        self.parts().2
    }

    /// Overflow content.
    pub fn overflow(&self) -> f64 {
        self.parts().3
    }

    fn same_binning(&self, other: &Histogram) -> bool {
        let (a, b) = (self.axes(), other.axes());
        a.len() == b.len() && a.iter().zip(&b).all(|(x, y)| x.same_binning(y))
    }

    /// Bin-wise sum of `other` into `self`.
    pub fn merge(&mut self, other: &Histogram) -> Result<()> {
        if !self.same_binning(other) {
            return Err(Error::AxisMismatch(format!(
                "cannot merge histograms with axes {:?} and {:?}",
                self.axes(),
                other.axes()
            )));
        }
        let (bins, sumw2, under, over, entries) = other.parts();
        let (b, s, u, o, e) = self.parts_mut();
        b.iter_mut().zip(bins).for_each(|(x, y)| *x += y);
        s.iter_mut().zip(sumw2).for_each(|(x, y)| *x += y);
        *u += under;
        *o += over;
        *e += entries;
        Ok(())
    }

    /// Read-only copy of the state under `name`.
    pub fn snapshot(&self, name: &str) -> HistogramSnapshot {
        let (bins, sumw2, underflow, overflow, entries) = self.parts();
        HistogramSnapshot {
            name: name.to_string(),
            axes: self.axes().into_iter().cloned().collect(),
            bins: bins.to_vec(),
            sumw2: sumw2.to_vec(),
            underflow,
            overflow,
            entries,
            errors: 0,
        }
    }
}

/// Serializable histogram state: the unit of output and post-processing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramSnapshot {
    /// Histogram name (leaf name in the output tree).
    pub name: String,
    /// One or two axes.
    pub axes: Vec<Axis>,
    /// In-range contents (2D: x-major).
    pub bins: Vec<f64>,
    /// Sum of weights squared per bin.
    pub sumw2: Vec<f64>,
    /// Content below range.
    pub underflow: f64,
    /// Content above range.
    pub overflow: f64,
    /// Number of fills, including under/overflow.
    pub entries: u64,
    /// Fills skipped because of per-record errors.
    #[serde(default)]
    pub errors: u64,
}

impl HistogramSnapshot {
    /// Zeroed snapshot for the given axes.
    pub fn zeroed(name: &str, axes: &[Axis]) -> Self {
        let n = axes.iter().map(|a| a.n_bins).product();
        Self {
            name: name.to_string(),
            axes: axes.to_vec(),
            bins: vec![0.0; n],
            sumw2: vec![0.0; n],
            underflow: 0.0,
            overflow: 0.0,
            entries: 0,
            errors: 0,
        }
    }

    /// Sum of in-range bin contents.
    pub fn integral(&self) -> f64 {
        self.bins.iter().sum()
    }

    /// Per-bin statistical uncertainty, `sqrt(sumw2)`.
    pub fn bin_errors(&self) -> Vec<f64> {
        self.sumw2.iter().map(|v| v.sqrt()).collect()
    }

    /// `Ok` if both snapshots share dimension count and binning.
    pub fn check_same_binning(&self, other: &HistogramSnapshot) -> Result<()> {
        let same = self.axes.len() == other.axes.len()
            && self.axes.iter().zip(&other.axes).all(|(a, b)| a.same_binning(b))
            && self.bins.len() == other.bins.len();
        if same {
            Ok(())
        } else {
            Err(Error::AxisMismatch(format!(
                "'{}' and '{}' have different binning",
                self.name, other.name
            )))
        }
    }

    /// Multiply contents and flows by `factor` (sumw2 by `factor²`).
    pub fn scale(&mut self, factor: f64) {
        self.bins.iter_mut().for_each(|b| *b *= factor);
        self.sumw2.iter_mut().for_each(|s| *s *= factor * factor);
        self.underflow *= factor;
        self.overflow *= factor;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axis(n: usize, lo: f64, hi: f64) -> Axis {
        Axis::new("x", n, lo, hi).unwrap()
    }

    #[test]
    fn fill_1d_tracks_flows_separately() {
        let mut h = Histogram::new(&[axis(3, 0.0, 3.0)]).unwrap();
        for x in [0.5, 1.5, 2.5, 0.5, -1.0, 3.5, 3.0] {
            h.fill(&[x]);
        }
        let s = h.snapshot("h");
        assert_eq!(s.bins, vec![2.0, 1.0, 1.0]);
        assert_eq!(s.sumw2, vec![2.0, 1.0, 1.0]);
        assert_eq!(s.underflow, 1.0);
        assert_eq!(s.overflow, 2.0);
        assert_eq!(s.entries, 7);
        assert_eq!(h.integral(), 4.0);
    }

    #[test]
    fn weighted_sumw2() {
        let mut h = Histogram::new(&[axis(2, 0.0, 2.0)]).unwrap();
        h.fill_weighted(&[0.5], 2.0);
        h.fill_weighted(&[1.5], 3.0);
        h.fill_weighted(&[0.5], 1.0);
        let s = h.snapshot("w");
        assert_eq!(s.bins, vec![3.0, 3.0]);
        assert_eq!(s.sumw2, vec![5.0, 9.0]);
    }

    #[test]
    fn fill_2d() {
        let mut h = Histogram::new(&[axis(2, 0.0, 2.0), axis(3, 0.0, 3.0)]).unwrap();
        assert_eq!(h.axis_count(), 2);
        h.fill(&[1.5, 2.5]);
        h.fill(&[1.5, 2.5]);
        h.fill(&[0.5, 0.5]);
        h.fill(&[-1.0, 5.0]); // x under, y over -> underflow
        h.fill(&[0.5, 9.0]);
        let Histogram::TwoD(inner) = &h else { panic!("expected 2D") };
        assert_eq!(inner.bin(1, 2), 2.0);
        assert_eq!(inner.bin(0, 0), 1.0);
        assert_eq!(h.underflow(), 1.0);
        assert_eq!(h.overflow(), 1.0);
        assert_eq!(h.entries(), 5);
        assert_eq!(h.snapshot("h2").bins.len(), 6);
    }

    #[test]
    fn axis_count_validated() {
        assert!(Histogram::new(&[]).is_err());
        let a = axis(1, 0.0, 1.0);
        assert!(Histogram::new(&[a.clone(), a.clone(), a]).is_err());
        let bad = Axis { title: "bad".into(), n_bins: 0, low: 0.0, high: 1.0 };
        assert!(matches!(Histogram::new(&[bad]), Err(Error::InvalidAxis(_))));
    }

    #[test]
    fn merge_sums_everything() {
        let mut a = Histogram::new(&[axis(2, 0.0, 2.0)]).unwrap();
        let mut b = a.clone();
        a.fill(&[0.5]);
        a.fill(&[-3.0]);
        b.fill(&[1.5]);
        b.fill(&[7.0]);
        a.merge(&b).unwrap();
        let s = a.snapshot("m");
        assert_eq!(s.bins, vec![1.0, 1.0]);
        assert_eq!((s.underflow, s.overflow, s.entries), (1.0, 1.0, 4));

        let c = Histogram::new(&[axis(3, 0.0, 2.0)]).unwrap();
        assert!(matches!(a.merge(&c), Err(Error::AxisMismatch(_))));
    }

    #[test]
    fn snapshot_scale_and_zeroed() {
        let mut s = HistogramSnapshot::zeroed("z", &[axis(2, 0.0, 1.0), axis(2, 0.0, 1.0)]);
        assert_eq!(s.bins.len(), 4);
        s.bins[0] = 2.0;
        s.sumw2[0] = 2.0;
        s.overflow = 1.0;
        s.scale(3.0);
        assert_eq!(s.bins[0], 6.0);
        assert_eq!(s.sumw2[0], 18.0);
        assert_eq!(s.overflow, 3.0);
        assert_eq!(s.integral(), 6.0);
    }
}
