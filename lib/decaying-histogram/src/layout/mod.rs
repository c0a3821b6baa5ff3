//! Bucket layouts.
//!
//! A layout fixes how many buckets a histogram has and which range of values each bucket covers. Buckets are
//! half-open ranges `[start, next_start)`, except for the last bucket, which has no upper bound: every value above the
//! start of the last bucket lands in it, and every value below the start of the first bucket lands in the first one.

use crate::HistogramError;

mod exponential;
pub use self::exponential::ExponentialLayout;

mod linear;
pub use self::linear::LinearLayout;

/// Default minimum weight for a bucket to be considered non-empty.
pub const DEFAULT_EPSILON: f64 = 1e-4;

/// Maximum number of buckets in a layout.
///
/// Every histogram allocates one `f64` per bucket up front, so this caps a single histogram at 8 MiB of bucket weights.
pub const MAX_NUM_BUCKETS: usize = 1 << 20;

/// Maps sample values to bucket indices, and bucket indices back to the values they start at.
///
/// Two layouts are equal when they are the same kind and all of their parameters are equal. Only histograms with equal
/// layouts can be merged.
#[derive(Clone, Debug, PartialEq)]
pub enum BucketLayout {
    /// Buckets of a fixed width.
    Linear(LinearLayout),

    /// Buckets whose widths grow geometrically.
    Exponential(ExponentialLayout),
}

impl BucketLayout {
    /// Creates a linear layout with buckets of `bucket_size` width, covering values up to `max_value`.
    ///
    /// # Errors
    ///
    /// If any of the parameters are not strictly positive, an error is returned.
    pub fn linear(max_value: f64, bucket_size: f64, epsilon: f64) -> Result<Self, HistogramError> {
        LinearLayout::new(max_value, bucket_size, epsilon).map(Self::Linear)
    }

    /// Creates a linear layout with exactly `num_buckets` buckets of `bucket_size` width.
    ///
    /// # Errors
    ///
    /// If any of the parameters are not strictly positive, an error is returned.
    pub fn linear_with_num_buckets(num_buckets: usize, bucket_size: f64, epsilon: f64) -> Result<Self, HistogramError> {
        LinearLayout::with_num_buckets(num_buckets, bucket_size, epsilon).map(Self::Linear)
    }

    /// Creates an exponential layout covering values up to `max_value`.
    ///
    /// The first bucket is `first_bucket_size` wide, and each following bucket is `ratio` times wider than the one
    /// before it.
    ///
    /// # Errors
    ///
    /// If `max_value`, `first_bucket_size`, or `epsilon` are not strictly positive, or if `ratio` is not greater than
    /// one, an error is returned.
    pub fn exponential(
        max_value: f64, first_bucket_size: f64, ratio: f64, epsilon: f64,
    ) -> Result<Self, HistogramError> {
        ExponentialLayout::new(max_value, first_bucket_size, ratio, epsilon).map(Self::Exponential)
    }

    /// Returns the number of buckets.
    pub fn num_buckets(&self) -> usize {
        match self {
            Self::Linear(layout) => layout.num_buckets(),
            Self::Exponential(layout) => layout.num_buckets(),
        }
    }

    /// Returns the minimum weight for a bucket to be considered non-empty.
    pub fn epsilon(&self) -> f64 {
        match self {
            Self::Linear(layout) => layout.epsilon(),
            Self::Exponential(layout) => layout.epsilon(),
        }
    }

    /// Returns the index of the bucket the given value falls into.
    ///
    /// Values below the start of the first bucket map to the first bucket, and values beyond the start of the last
    /// bucket map to the last bucket.
    pub fn find_bucket(&self, value: f64) -> usize {
        match self {
            Self::Linear(layout) => layout.find_bucket(value),
            Self::Exponential(layout) => layout.find_bucket(value),
        }
    }

    /// Returns the value at which the given bucket starts.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not a valid bucket index for this layout.
    pub fn bucket_start(&self, index: usize) -> f64 {
        assert!(
            index < self.num_buckets(),
            "bucket index {} out of range for layout with {} buckets",
            index,
            self.num_buckets()
        );

        match self {
            Self::Linear(layout) => layout.bucket_start(index),
            Self::Exponential(layout) => layout.bucket_start(index),
        }
    }

    /// Returns the value at which the given bucket ends, which is the start of the following bucket.
    ///
    /// Returns `None` for the last bucket, which is unbounded.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not a valid bucket index for this layout.
    pub fn bucket_end(&self, index: usize) -> Option<f64> {
        assert!(
            index < self.num_buckets(),
            "bucket index {} out of range for layout with {} buckets",
            index,
            self.num_buckets()
        );

        (index + 1 < self.num_buckets()).then(|| self.bucket_start(index + 1))
    }
}

impl From<LinearLayout> for BucketLayout {
    fn from(layout: LinearLayout) -> Self {
        Self::Linear(layout)
    }
}

impl From<ExponentialLayout> for BucketLayout {
    fn from(layout: ExponentialLayout) -> Self {
        Self::Exponential(layout)
    }
}

/// Clamps a fractional bucket position to a valid bucket index.
///
/// NaN maps to the first bucket.
fn clamp_bucket(position: f64, num_buckets: usize) -> usize {
    if position >= num_buckets as f64 {
        num_buckets - 1
    } else if position >= 0.0 {
        position as usize
    } else {
        0
    }
}
