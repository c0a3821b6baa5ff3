use super::{clamp_bucket, MAX_NUM_BUCKETS};
use crate::HistogramError;

/// Layout with buckets whose widths grow geometrically.
///
/// Bucket `n` starts at `first_bucket_size * (ratio^n - 1) / (ratio - 1)`, so the first bucket is `first_bucket_size`
/// wide and every following bucket is `ratio` times wider than the one before it. This keeps the relative error of
/// percentiles roughly constant across several orders of magnitude.
#[derive(Clone, Debug, PartialEq)]
pub struct ExponentialLayout {
    num_buckets: usize,
    first_bucket_size: f64,
    ratio: f64,
    epsilon: f64,
}

impl ExponentialLayout {
    /// Creates a new `ExponentialLayout` whose buckets cover values up to `max_value`.
    ///
    /// # Errors
    ///
    /// If `max_value`, `first_bucket_size`, or `epsilon` are not strictly positive, or if `ratio` is not greater than
    /// one, an error is returned.
    pub fn new(max_value: f64, first_bucket_size: f64, ratio: f64, epsilon: f64) -> Result<Self, HistogramError> {
        if !(max_value > 0.0) || !max_value.is_finite() {
            return Err(HistogramError::InvalidLayout {
                reason: "maximum value must be positive and finite",
            });
        }

        if !(first_bucket_size > 0.0) {
            return Err(HistogramError::InvalidLayout {
                reason: "first bucket size must be positive",
            });
        }

        if !(ratio > 1.0) || !ratio.is_finite() {
            return Err(HistogramError::InvalidLayout {
                reason: "ratio must be greater than one and finite",
            });
        }

        if !(epsilon > 0.0) {
            return Err(HistogramError::InvalidLayout {
                reason: "epsilon must be positive",
            });
        }

        let num_buckets = ((max_value * (ratio - 1.0) / first_bucket_size).ln_1p() / ratio.ln()).ceil();
        if !(num_buckets < MAX_NUM_BUCKETS as f64) {
            return Err(HistogramError::InvalidLayout {
                reason: "too many buckets",
            });
        }

        Ok(Self {
            num_buckets: num_buckets as usize + 1,
            first_bucket_size,
            ratio,
            epsilon,
        })
    }

    /// Returns the width of the first bucket.
    pub fn first_bucket_size(&self) -> f64 {
        self.first_bucket_size
    }

    /// Returns the growth ratio between consecutive bucket widths.
    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    pub(super) fn num_buckets(&self) -> usize {
        self.num_buckets
    }

    pub(super) fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub(super) fn find_bucket(&self, value: f64) -> usize {
        if value < self.first_bucket_size {
            return 0;
        }

        let position = (value * (self.ratio - 1.0) / self.first_bucket_size).ln_1p() / self.ratio.ln();
        clamp_bucket(position.floor(), self.num_buckets)
    }

    pub(super) fn bucket_start(&self, index: usize) -> f64 {
        if index == 0 {
            return 0.0;
        }

        self.first_bucket_size * (self.ratio.powf(index as f64) - 1.0) / (self.ratio - 1.0)
    }
}
