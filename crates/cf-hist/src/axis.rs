//! Uniform axis binning.

use serde::{Deserialize, Serialize};

use cf_core::{Error, Result};

/// Where a value lands on an axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Below `low`.
    Underflow,
    /// In-range bin index.
    Bin(usize),
    /// At or above `high`, or NaN.
    Overflow,
}

/// `n_bins` equal-width bins over `[low, high)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Axis {
    /// Axis title (display only; ignored when comparing binning).
    #[serde(default)]
    pub title: String,
    /// Number of in-range bins.
    pub n_bins: usize,
    /// Lower edge of the first bin.
    pub low: f64,
    /// Upper edge of the last bin.
    pub high: f64,
}

impl Axis {
    /// Validated axis.
    pub fn new(title: impl Into<String>, n_bins: usize, low: f64, high: f64) -> Result<Self> {
        let axis = Self { title: title.into(), n_bins, low, high };
        axis.validate()?;
        Ok(axis)
    }

    /// Check `n_bins > 0`, finite edges and `low < high`.
    pub fn validate(&self) -> Result<()> {
        if self.n_bins == 0 {
            return Err(Error::InvalidAxis(format!("axis '{}': n_bins must be > 0", self.title)));
        }
        if !self.low.is_finite() || !self.high.is_finite() || self.low >= self.high {
            return Err(Error::InvalidAxis(format!(
                "axis '{}': need finite low < high, got [{}, {})",
                self.title, self.low, self.high
            )));
        }
        Ok(())
    }

    /// Bin width.
    pub fn width(&self) -> f64 {
        (self.high - self.low) / self.n_bins as f64
    }

    /// Locate `x`. NaN is treated as overflow.
    pub fn locate(&self, x: f64) -> Slot {
        if x.is_nan() || x >= self.high {
            return Slot::Overflow;
        }
        if x < self.low {
            return Slot::Underflow;
        }
        let idx = (self.n_bins as f64 * (x - self.low) / (self.high - self.low)) as usize;
        // Rounding can push values just below `high` onto n_bins.
        Slot::Bin(idx.min(self.n_bins - 1))
    }

    /// Bin edges, `n_bins + 1` values.
    pub fn edges(&self) -> Vec<f64> {
        let w = self.width();
        (0..=self.n_bins)
            .map(|i| if i == self.n_bins { self.high } else { self.low + i as f64 * w })
            .collect()
    }

    /// Center of bin `i`.
    pub fn center(&self, i: usize) -> f64 {
        self.low + (i as f64 + 0.5) * self.width()
    }

    /// Same bin count and edges; titles may differ.
    #[allow(clippy::float_cmp)]
    pub fn same_binning(&self, other: &Axis) -> bool {
        self.n_bins == other.n_bins && self.low == other.low && self.high == other.high
    }
}
