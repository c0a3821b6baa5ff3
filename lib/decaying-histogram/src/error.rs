use std::time::Duration;

use snafu::Snafu;

/// Histogram error.
///
/// Every variant describes a precondition that the caller violated. None of them leave the histogram partially
/// modified.
#[derive(Clone, Debug, PartialEq, Snafu)]
#[snafu(context(suffix(false)))]
pub enum HistogramError {
    /// A sample weight was negative or not finite.
    #[snafu(display("sample weight must be finite and non-negative, got {weight}"))]
    InvalidWeight {
        /// The rejected weight.
        weight: f64,
    },

    /// A scale factor was negative or not finite.
    #[snafu(display("scale factor must be finite and non-negative, got {factor}"))]
    InvalidScaleFactor {
        /// The rejected factor.
        factor: f64,
    },

    /// Applying a weight would push the histogram's weights past the largest finite value.
    #[snafu(display("weights would overflow, histogram total weight is {total_weight}"))]
    WeightOverflow {
        /// Total weight of the histogram before the rejected operation.
        total_weight: f64,
    },

    /// Two histograms with different bucket layouts were merged.
    #[snafu(display("cannot merge histograms with different bucket layouts"))]
    LayoutMismatch,

    /// Two decaying histograms with different half-lives were merged.
    #[snafu(display("cannot merge decaying histograms with different half-lives ({ours:?} vs {theirs:?})"))]
    HalfLifeMismatch {
        /// Half-life of the receiving histogram.
        ours: Duration,

        /// Half-life of the histogram being merged in.
        theirs: Duration,
    },

    /// A checkpoint referenced a bucket that does not exist in the histogram's layout.
    #[snafu(display("checkpoint bucket {index} exceeds the histogram's {num_buckets} buckets"))]
    BucketOutOfRange {
        /// The bucket index from the checkpoint.
        index: u32,

        /// Number of buckets in the histogram's layout.
        num_buckets: usize,
    },

    /// A checkpoint carried a negative or non-finite total weight.
    #[snafu(display("checkpoint total weight must be finite and non-negative, got {total_weight}"))]
    InvalidTotalWeight {
        /// The rejected total weight.
        total_weight: f64,
    },

    /// Bucket layout parameters were invalid.
    #[snafu(display("invalid bucket layout: {reason}"))]
    InvalidLayout {
        /// Description of the violated constraint.
        reason: &'static str,
    },

    /// The half-life of a decaying histogram was shorter than one millisecond.
    #[snafu(display("half-life must be at least one millisecond, got {half_life:?}"))]
    InvalidHalfLife {
        /// The rejected half-life.
        half_life: Duration,
    },
}
