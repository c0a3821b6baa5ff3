use std::{fmt, time::Duration};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::{histogram::validate_weight, BucketLayout, Histogram, HistogramCheckpoint, HistogramError, WeightedHistogram};

/// Maximum number of half-lives a sample may be ahead of the reference timestamp before the histogram is renormalized.
///
/// Keeps decay factors below `2^MAX_DECAY_EXPONENT`, well within the range of `f64`.
pub const MAX_DECAY_EXPONENT: i64 = 100;

/// A histogram where the weight of samples decays exponentially with their age.
///
/// Rather than periodically shrinking the weight of every existing sample, new samples are weighted up: a sample
/// observed `n` half-lives after the reference timestamp is added with `2^n` times its weight. Older samples therefore
/// contribute exponentially less to percentiles than newer ones.
///
/// To keep weights from overflowing, the reference timestamp is moved forward once a sample arrives more than
/// [`MAX_DECAY_EXPONENT`] half-lives after it, and all existing weights are scaled down to match. The reference timestamp
/// is always a multiple of the half-life, and never moves backwards.
#[derive(Clone, Debug, PartialEq)]
pub struct DecayingHistogram {
    histogram: WeightedHistogram,
    half_life: Duration,
    half_life_ms: i64,
    reference_timestamp_ms: i64,
}

impl DecayingHistogram {
    /// Creates a new, empty `DecayingHistogram` with the given layout and half-life.
    ///
    /// The half-life is truncated to millisecond precision. The reference timestamp starts at the Unix epoch.
    ///
    /// # Errors
    ///
    /// If the half-life is shorter than one millisecond, or so long that [`MAX_DECAY_EXPONENT`] half-lives do not fit in
    /// a signed 64-bit millisecond count, an error is returned.
    pub fn new(layout: BucketLayout, half_life: Duration) -> Result<Self, HistogramError> {
        let half_life_ms = i64::try_from(half_life.as_millis())
            .ok()
            .filter(|ms| *ms > 0 && ms.checked_mul(MAX_DECAY_EXPONENT).is_some())
            .ok_or(HistogramError::InvalidHalfLife { half_life })?;

        Ok(Self {
            histogram: WeightedHistogram::new(layout),
            half_life: Duration::from_millis(half_life_ms as u64),
            half_life_ms,
            reference_timestamp_ms: 0,
        })
    }

    /// Returns the half-life.
    pub fn half_life(&self) -> Duration {
        self.half_life
    }

    /// Returns the current reference timestamp.
    ///
    /// Samples observed at the reference timestamp are added with their weight unchanged.
    pub fn reference_timestamp(&self) -> DateTime<Utc> {
        millis_to_datetime(self.reference_timestamp_ms)
    }

    /// Returns a reference to the underlying histogram.
    ///
    /// Bucket weights and the total weight of the underlying histogram are expressed relative to the reference
    /// timestamp.
    pub fn inner(&self) -> &WeightedHistogram {
        &self.histogram
    }

    /// Returns the decay factor applied to samples observed at `time`.
    ///
    /// If `time` is more than [`MAX_DECAY_EXPONENT`] half-lives after the reference timestamp, the reference timestamp
    /// is shifted forward first.
    pub fn decay_factor(&mut self, time: DateTime<Utc>) -> f64 {
        self.decay_factor_ms(time.timestamp_millis())
    }

    /// Moves the reference timestamp forward to the multiple of the half-life nearest to `reference_timestamp`.
    ///
    /// All existing weights are scaled down by the number of half-lives the reference timestamp moves, so percentiles
    /// are unchanged. Weights scaled below the layout's epsilon are dropped from the non-empty range.
    ///
    /// If the rounded timestamp is not after the current reference timestamp, this is a no-op.
    pub fn shift_reference_timestamp(&mut self, reference_timestamp: DateTime<Utc>) {
        self.shift_reference_timestamp_ms(reference_timestamp.timestamp_millis());
    }

    /// Merges another decaying histogram into this one.
    ///
    /// Whichever histogram has the older reference timestamp is first shifted forward to the newer one, so that both
    /// share the same reference timestamp afterwards.
    ///
    /// # Errors
    ///
    /// If the histograms have different half-lives or bucket layouts, or their combined weight would overflow, an error
    /// is returned and neither histogram is changed.
    pub fn merge(&mut self, other: &mut Self) -> Result<(), HistogramError> {
        if self.half_life != other.half_life {
            return Err(HistogramError::HalfLifeMismatch {
                ours: self.half_life,
                theirs: other.half_life,
            });
        }

        if self.histogram.layout() != other.histogram.layout() {
            return Err(HistogramError::LayoutMismatch);
        }

        let reference_timestamp_ms = self.reference_timestamp_ms.max(other.reference_timestamp_ms);
        let combined_weight = self.histogram.total_weight() * self.rescale_factor(reference_timestamp_ms)
            + other.histogram.total_weight() * other.rescale_factor(reference_timestamp_ms);
        if !combined_weight.is_finite() {
            return Err(HistogramError::WeightOverflow {
                total_weight: self.histogram.total_weight(),
            });
        }

        if self.reference_timestamp_ms < other.reference_timestamp_ms {
            self.shift_reference_timestamp_ms(other.reference_timestamp_ms);
        } else if other.reference_timestamp_ms < self.reference_timestamp_ms {
            other.shift_reference_timestamp_ms(self.reference_timestamp_ms);
        }

        self.histogram.merge(&other.histogram)
    }

    /// Resets the histogram to its empty state, with the reference timestamp back at the Unix epoch.
    pub fn clear(&mut self) {
        self.histogram.clear();
        self.reference_timestamp_ms = 0;
    }

    /// Takes a lossy snapshot of the histogram, including its reference timestamp.
    pub fn save_to_checkpoint(&self) -> HistogramCheckpoint {
        let mut checkpoint = self.histogram.save_to_checkpoint();
        checkpoint.reference_timestamp = Some(self.reference_timestamp());
        checkpoint
    }

    /// Loads a checkpoint into the histogram.
    ///
    /// Weights are added the same way as [`WeightedHistogram::load_from_checkpoint`], and the reference timestamp is
    /// replaced by the checkpoint's (rounded to the nearest multiple of the half-life), if it has one.
    ///
    /// # Errors
    ///
    /// If the checkpoint's total weight is negative, or it references a bucket that does not exist in this histogram's
    /// layout, an error is returned and the histogram is left unchanged.
    pub fn load_from_checkpoint(&mut self, checkpoint: &HistogramCheckpoint) -> Result<(), HistogramError> {
        self.histogram.load_from_checkpoint(checkpoint)?;

        if let Some(reference_timestamp) = checkpoint.reference_timestamp {
            self.reference_timestamp_ms =
                round_to_multiple(reference_timestamp.timestamp_millis(), self.half_life_ms);
        }

        Ok(())
    }

    fn decay_factor_ms(&mut self, time_ms: i64) -> f64 {
        let (reference_timestamp_ms, factor) = self.plan_decay(time_ms);
        if let Some(reference_timestamp_ms) = reference_timestamp_ms {
            self.shift_reference_timestamp_ms(reference_timestamp_ms);
        }

        factor
    }

    /// Works out the decay factor for a sample observed at `time_ms`, along with the reference timestamp the histogram
    /// must shift to first, if any.
    fn plan_decay(&self, time_ms: i64) -> (Option<i64>, f64) {
        let max_allowed_ms = self
            .reference_timestamp_ms
            .saturating_add(self.half_life_ms * MAX_DECAY_EXPONENT);
        let new_reference_ms = (time_ms > max_allowed_ms).then(|| round_to_multiple(time_ms, self.half_life_ms));

        let reference_ms = new_reference_ms.unwrap_or(self.reference_timestamp_ms);
        let factor = ((time_ms - reference_ms) as f64 / self.half_life_ms as f64).exp2();
        (new_reference_ms, factor)
    }

    /// Validates a sample's weight and works out its decayed weight, along with the reference timestamp the histogram
    /// must shift to first, if any. Nothing is modified.
    fn decay_sample(&self, weight: f64, time: DateTime<Utc>) -> Result<(Option<i64>, f64), HistogramError> {
        validate_weight(weight)?;

        let (new_reference_ms, factor) = self.plan_decay(time.timestamp_millis());
        let decayed_weight = weight * factor;
        if !decayed_weight.is_finite() {
            return Err(HistogramError::WeightOverflow {
                total_weight: self.histogram.total_weight(),
            });
        }

        Ok((new_reference_ms, decayed_weight))
    }

    /// Returns the factor existing weights are scaled by when the reference timestamp moves to `new_reference_ms`.
    ///
    /// Never greater than one, since the reference timestamp only moves forward.
    fn rescale_factor(&self, new_reference_ms: i64) -> f64 {
        if new_reference_ms <= self.reference_timestamp_ms {
            return 1.0;
        }

        let exponent = ((self.reference_timestamp_ms - new_reference_ms) as f64 / self.half_life_ms as f64).round();
        2f64.powi(exponent.max(i32::MIN as f64) as i32)
    }

    fn shift_reference_timestamp_ms(&mut self, reference_timestamp_ms: i64) {
        let new_reference_ms = round_to_multiple(reference_timestamp_ms, self.half_life_ms);
        if new_reference_ms <= self.reference_timestamp_ms {
            return;
        }

        let factor = self.rescale_factor(new_reference_ms);

        debug!(
            old_reference_ms = self.reference_timestamp_ms,
            new_reference_ms,
            factor,
            "Shifting decaying histogram reference timestamp."
        );

        self.histogram.scale_by(factor);
        self.reference_timestamp_ms = new_reference_ms;
    }
}

impl Histogram for DecayingHistogram {
    fn add_sample(&mut self, value: f64, weight: f64, time: DateTime<Utc>) -> Result<(), HistogramError> {
        let (new_reference_ms, decayed_weight) = self.decay_sample(weight, time)?;

        let total_weight = self.histogram.total_weight();
        let rescaled_total = total_weight * new_reference_ms.map_or(1.0, |ms| self.rescale_factor(ms));
        if !(rescaled_total + decayed_weight).is_finite() {
            return Err(HistogramError::WeightOverflow { total_weight });
        }

        if let Some(new_reference_ms) = new_reference_ms {
            self.shift_reference_timestamp_ms(new_reference_ms);
        }
        self.histogram.add(value, decayed_weight)
    }

    fn subtract_sample(&mut self, value: f64, weight: f64, time: DateTime<Utc>) -> Result<(), HistogramError> {
        let (new_reference_ms, decayed_weight) = self.decay_sample(weight, time)?;

        if let Some(new_reference_ms) = new_reference_ms {
            self.shift_reference_timestamp_ms(new_reference_ms);
        }
        self.histogram.subtract(value, decayed_weight)
    }

    fn percentile(&self, percentile: f64) -> f64 {
        self.histogram.percentile(percentile)
    }

    fn is_empty(&self) -> bool {
        self.histogram.is_empty()
    }
}

impl fmt::Display for DecayingHistogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "reference timestamp: {}, half-life: {:?}\n{}",
            self.reference_timestamp().to_rfc3339(),
            self.half_life,
            self.histogram
        )
    }
}

/// Rounds `value` to the nearest multiple of `multiple`, with ties rounding up.
fn round_to_multiple(value: i64, multiple: i64) -> i64 {
    value.saturating_add(multiple / 2).div_euclid(multiple) * multiple
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(if ms < 0 {
        DateTime::<Utc>::MIN_UTC
    } else {
        DateTime::<Utc>::MAX_UTC
    })
}
