//! Time-decaying weighted histograms.
//!
//! This crate summarizes a stream of weighted observations into a memory-bounded, bucketed distribution that can be
//! queried for percentiles, merged with other histograms of the same shape, and persisted through a compact, lossy
//! checkpoint.
//!
//! Two histograms are provided:
//!
//! - [`WeightedHistogram`]: a fixed-layout histogram of cumulative sample weight per bucket.
//! - [`DecayingHistogram`]: a [`WeightedHistogram`] where more recent samples carry exponentially more weight than
//!   older ones, controlled by a configurable half-life.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//!
//! use chrono::{TimeZone as _, Utc};
//! use decaying_histogram::{BucketLayout, DecayingHistogram, Histogram as _};
//!
//! let layout = BucketLayout::exponential(1000.0, 0.01, 1.05, 1e-4).unwrap();
//! let mut histogram = DecayingHistogram::new(layout, Duration::from_secs(24 * 60 * 60)).unwrap();
//!
//! let now = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
//! histogram.add_sample(2.5, 1.0, now).unwrap();
//! histogram.add_sample(7.5, 1.0, now).unwrap();
//!
//! let p90 = histogram.percentile(0.9);
//! assert!(p90 >= 7.5);
//! ```
//!
//! # Concurrency
//!
//! None of the types in this crate synchronize internally. A histogram is expected to be owned by a single aggregator,
//! and callers that share one across threads must serialize access themselves.
#![deny(missing_docs)]

use chrono::{DateTime, Utc};

mod checkpoint;
pub use self::checkpoint::{HistogramCheckpoint, MAX_CHECKPOINT_WEIGHT};

pub mod config;

mod decaying;
pub use self::decaying::{DecayingHistogram, MAX_DECAY_EXPONENT};

mod error;
pub use self::error::HistogramError;

mod histogram;
pub use self::histogram::WeightedHistogram;

pub mod layout;
pub use self::layout::BucketLayout;

/// A histogram of weighted samples.
///
/// Implemented by both [`WeightedHistogram`] and [`DecayingHistogram`], so that callers feeding samples in and reading
/// percentiles out can be generic over whether or not older samples decay.
pub trait Histogram {
    /// Adds a sample with the given weight, observed at `time`.
    ///
    /// # Errors
    ///
    /// If `weight` is negative (or NaN), an error is returned and the histogram is left unchanged.
    fn add_sample(&mut self, value: f64, weight: f64, time: DateTime<Utc>) -> Result<(), HistogramError>;

    /// Removes a sample with the given weight, observed at `time`.
    ///
    /// Removal never drives a bucket's weight below zero, and any bucket left with less than the layout's epsilon is
    /// cleared entirely.
    ///
    /// # Errors
    ///
    /// If `weight` is negative (or NaN), an error is returned and the histogram is left unchanged.
    fn subtract_sample(&mut self, value: f64, weight: f64, time: DateTime<Utc>) -> Result<(), HistogramError>;

    /// Returns the approximate value at the given percentile.
    ///
    /// `percentile` is expressed as a fraction between `0.0` and `1.0`, and is clamped to that range. The returned value
    /// is a bucket boundary: the end of the bucket in which the requested weight fraction is reached. Returns `0.0` if
    /// the histogram is empty.
    fn percentile(&self, percentile: f64) -> f64;

    /// Returns `true` if no bucket holds at least the layout's epsilon of weight.
    fn is_empty(&self) -> bool;
}
