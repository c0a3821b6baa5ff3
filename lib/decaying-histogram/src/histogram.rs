use std::{fmt, ops::RangeInclusive};

use chrono::{DateTime, Utc};
use float_cmp::approx_eq;
use tracing::{trace, warn};

use crate::{BucketLayout, Histogram, HistogramCheckpoint, HistogramError, MAX_CHECKPOINT_WEIGHT};

/// Maximum difference between two bucket weights for them to be considered equal.
const BUCKET_WEIGHT_TOLERANCE: f64 = 1e-15;

/// A histogram of cumulative sample weight per bucket.
///
/// The histogram tracks the weight of each bucket in its [`BucketLayout`], the total weight of all samples, and the
/// range of buckets which hold at least the layout's epsilon of weight. Percentiles are only ever resolved to bucket
/// boundaries.
///
/// The non-empty range is maintained incrementally: adding weight can only widen it, while removing or scaling weight
/// narrows it by scanning inwards from both ends. When no bucket holds enough weight, the range is set to the "empty"
/// sentinel, where the minimum bucket is the last bucket and the maximum bucket is the first bucket.
#[derive(Clone, Debug)]
pub struct WeightedHistogram {
    layout: BucketLayout,
    bucket_weights: Box<[f64]>,
    total_weight: f64,
    min_bucket: usize,
    max_bucket: usize,
}

impl WeightedHistogram {
    /// Creates a new, empty `WeightedHistogram` with the given layout.
    pub fn new(layout: BucketLayout) -> Self {
        let num_buckets = layout.num_buckets();
        Self {
            layout,
            bucket_weights: vec![0.0; num_buckets].into_boxed_slice(),
            total_weight: 0.0,
            min_bucket: num_buckets - 1,
            max_bucket: 0,
        }
    }

    /// Returns a reference to the bucket layout.
    pub fn layout(&self) -> &BucketLayout {
        &self.layout
    }

    /// Returns the total weight of all samples.
    pub fn total_weight(&self) -> f64 {
        self.total_weight
    }

    /// Returns the weight held by the given bucket, or `None` if the bucket does not exist.
    pub fn bucket_weight(&self, index: usize) -> Option<f64> {
        self.bucket_weights.get(index).copied()
    }

    /// Returns the range of buckets holding at least the layout's epsilon of weight, or `None` if the histogram is
    /// empty.
    pub fn non_empty_range(&self) -> Option<RangeInclusive<usize>> {
        if self.is_empty() {
            None
        } else {
            Some(self.min_bucket..=self.max_bucket)
        }
    }

    /// Adds a sample with the given weight.
    ///
    /// # Errors
    ///
    /// If `weight` is negative or not finite, or adding it would overflow the histogram's weights, an error is returned
    /// and the histogram is left unchanged.
    pub fn add(&mut self, value: f64, weight: f64) -> Result<(), HistogramError> {
        validate_weight(weight)?;

        let bucket = self.layout.find_bucket(value);
        let bucket_weight = self.bucket_weights[bucket] + weight;
        let total_weight = self.total_weight + weight;
        if !bucket_weight.is_finite() || !total_weight.is_finite() {
            return Err(HistogramError::WeightOverflow {
                total_weight: self.total_weight,
            });
        }

        self.bucket_weights[bucket] = bucket_weight;
        self.total_weight = total_weight;

        if self.bucket_weights[bucket] >= self.layout.epsilon() {
            self.min_bucket = self.min_bucket.min(bucket);
            self.max_bucket = self.max_bucket.max(bucket);
        }

        Ok(())
    }

    /// Removes a sample with the given weight.
    ///
    /// The bucket's weight never drops below zero, and is cleared entirely if less than the layout's epsilon would
    /// remain.
    ///
    /// # Errors
    ///
    /// If `weight` is negative or not finite, an error is returned and the histogram is left unchanged.
    pub fn subtract(&mut self, value: f64, weight: f64) -> Result<(), HistogramError> {
        validate_weight(weight)?;

        let bucket = self.layout.find_bucket(value);
        let current = self.bucket_weights[bucket];
        let removed = if current - weight < self.layout.epsilon() {
            current
        } else {
            weight
        };

        self.bucket_weights[bucket] = current - removed;
        self.total_weight = (self.total_weight - removed).max(0.0);
        self.shrink_non_empty_range();

        Ok(())
    }

    /// Merges another histogram into this one.
    ///
    /// # Errors
    ///
    /// If the histograms do not have the same bucket layout, or their combined weight would overflow, an error is
    /// returned and this histogram is left unchanged.
    pub fn merge(&mut self, other: &Self) -> Result<(), HistogramError> {
        if self.layout != other.layout {
            return Err(HistogramError::LayoutMismatch);
        }

        if !(self.total_weight + other.total_weight).is_finite() {
            return Err(HistogramError::WeightOverflow {
                total_weight: self.total_weight,
            });
        }

        // An empty histogram has a min bucket greater than its max bucket, so this is a no-op for it.
        for bucket in other.min_bucket..=other.max_bucket {
            self.bucket_weights[bucket] += other.bucket_weights[bucket];
        }

        self.total_weight += other.total_weight;
        self.min_bucket = self.min_bucket.min(other.min_bucket);
        self.max_bucket = self.max_bucket.max(other.max_bucket);

        Ok(())
    }

    /// Returns the approximate value at the given percentile.
    ///
    /// `percentile` is clamped to `[0, 1]`. Buckets are accumulated from the lowest non-empty bucket until their weight
    /// reaches `percentile` of the total weight, and the end of the bucket where that happens is returned. If that is the
    /// last bucket, which has no end, its start is returned instead.
    ///
    /// Returns `0.0` if the histogram is empty.
    pub fn percentile(&self, percentile: f64) -> f64 {
        if self.is_empty() {
            return 0.0;
        }

        let threshold = percentile.clamp(0.0, 1.0) * self.total_weight;
        let mut partial_sum = 0.0;
        let mut bucket = self.min_bucket;
        while bucket < self.max_bucket {
            partial_sum += self.bucket_weights[bucket];
            if partial_sum >= threshold {
                break;
            }
            bucket += 1;
        }

        self.layout
            .bucket_end(bucket)
            .unwrap_or_else(|| self.layout.bucket_start(bucket))
    }

    /// Returns the approximate values at each of the given percentiles.
    pub fn percentiles(&self, percentiles: &[f64]) -> Vec<f64> {
        percentiles.iter().map(|p| self.percentile(*p)).collect()
    }

    /// Returns `true` if no bucket holds at least the layout's epsilon of weight.
    pub fn is_empty(&self) -> bool {
        self.bucket_weights[self.min_bucket] < self.layout.epsilon()
    }

    /// Multiplies the weight of every non-empty bucket, and the total weight, by `factor`.
    ///
    /// Percentiles are unaffected, unless buckets are scaled below the layout's epsilon, in which case they are no longer
    /// considered non-empty.
    ///
    /// # Errors
    ///
    /// If `factor` is negative or not finite, or scaling by it would overflow the histogram's weights, an error is
    /// returned and the histogram is left unchanged.
    pub fn scale(&mut self, factor: f64) -> Result<(), HistogramError> {
        if !factor.is_finite() || factor < 0.0 {
            return Err(HistogramError::InvalidScaleFactor { factor });
        }

        let max_weight = (self.min_bucket..=self.max_bucket)
            .map(|bucket| self.bucket_weights[bucket])
            .fold(self.total_weight, f64::max);
        if !(max_weight * factor).is_finite() {
            return Err(HistogramError::WeightOverflow {
                total_weight: self.total_weight,
            });
        }

        self.scale_by(factor);
        Ok(())
    }

    /// Scales the histogram by a factor that is already known not to overflow it.
    pub(crate) fn scale_by(&mut self, factor: f64) {
        for bucket in self.min_bucket..=self.max_bucket {
            self.bucket_weights[bucket] *= factor;
        }
        self.total_weight *= factor;
        self.shrink_non_empty_range();
    }

    /// Resets the histogram to its empty state.
    pub fn clear(&mut self) {
        self.bucket_weights.fill(0.0);
        self.total_weight = 0.0;
        self.min_bucket = self.layout.num_buckets() - 1;
        self.max_bucket = 0;
    }

    /// Takes a lossy snapshot of the histogram.
    ///
    /// Bucket weights are quantized relative to the heaviest bucket, which is assigned [`MAX_CHECKPOINT_WEIGHT`].
    /// Buckets which round down to zero are dropped. The total weight is kept exactly.
    pub fn save_to_checkpoint(&self) -> HistogramCheckpoint {
        let mut checkpoint = HistogramCheckpoint {
            total_weight: self.total_weight,
            ..Default::default()
        };

        let max_weight = (self.min_bucket..=self.max_bucket)
            .map(|bucket| self.bucket_weights[bucket])
            .fold(0.0, f64::max);
        if max_weight > 0.0 {
            let ratio = f64::from(MAX_CHECKPOINT_WEIGHT) / max_weight;
            for bucket in self.min_bucket..=self.max_bucket {
                let quantized = (self.bucket_weights[bucket] * ratio).round();
                if quantized > 0.0 {
                    checkpoint.bucket_weights.insert(bucket as u32, quantized as u32);
                }
            }
        }

        trace!(
            buckets = checkpoint.bucket_weights.len(),
            total_weight = checkpoint.total_weight,
            "Saved histogram checkpoint."
        );

        checkpoint
    }

    /// Loads a checkpoint into the histogram.
    ///
    /// Loading is additive: the checkpoint's weights are added on top of whatever the histogram already holds, the same
    /// as merging with a histogram restored from the checkpoint. The quantized bucket weights are scaled so that their
    /// sum matches the checkpoint's total weight.
    ///
    /// # Errors
    ///
    /// If the checkpoint's total weight is negative or not finite, it references a bucket that does not exist in this
    /// histogram's layout, or adding it would overflow the histogram's weights, an error is returned and the histogram
    /// is left unchanged.
    pub fn load_from_checkpoint(&mut self, checkpoint: &HistogramCheckpoint) -> Result<(), HistogramError> {
        if !checkpoint.total_weight.is_finite() || checkpoint.total_weight < 0.0 {
            return Err(HistogramError::InvalidTotalWeight {
                total_weight: checkpoint.total_weight,
            });
        }

        if !(self.total_weight + checkpoint.total_weight).is_finite() {
            return Err(HistogramError::WeightOverflow {
                total_weight: self.total_weight,
            });
        }

        let num_buckets = self.layout.num_buckets();
        if let Some(index) = checkpoint
            .bucket_weights
            .keys()
            .copied()
            .find(|index| *index as usize >= num_buckets)
        {
            return Err(HistogramError::BucketOutOfRange { index, num_buckets });
        }

        let quantized_sum = checkpoint.quantized_sum();
        if quantized_sum == 0 {
            return Ok(());
        }

        if !self.is_empty() {
            warn!(
                total_weight = self.total_weight,
                "Loading checkpoint into a non-empty histogram. Existing weights will be kept and added to."
            );
        }

        let dequantize_ratio = checkpoint.total_weight / quantized_sum as f64;
        let epsilon = self.layout.epsilon();
        for (&index, &weight) in &checkpoint.bucket_weights {
            let bucket = index as usize;
            self.bucket_weights[bucket] += f64::from(weight) * dequantize_ratio;
            if self.bucket_weights[bucket] >= epsilon {
                self.min_bucket = self.min_bucket.min(bucket);
                self.max_bucket = self.max_bucket.max(bucket);
            }
        }
        self.total_weight += checkpoint.total_weight;

        trace!(
            buckets = checkpoint.bucket_weights.len(),
            total_weight = checkpoint.total_weight,
            "Loaded histogram checkpoint."
        );

        Ok(())
    }

    /// Narrows the non-empty range past any buckets at either end which hold less than epsilon.
    fn shrink_non_empty_range(&mut self) {
        let epsilon = self.layout.epsilon();
        let last_bucket = self.layout.num_buckets() - 1;

        while self.bucket_weights[self.min_bucket] < epsilon && self.min_bucket < last_bucket {
            self.min_bucket += 1;
        }
        while self.bucket_weights[self.max_bucket] < epsilon && self.max_bucket > 0 {
            self.max_bucket -= 1;
        }
    }
}

impl Histogram for WeightedHistogram {
    fn add_sample(&mut self, value: f64, weight: f64, _time: DateTime<Utc>) -> Result<(), HistogramError> {
        self.add(value, weight)
    }

    fn subtract_sample(&mut self, value: f64, weight: f64, _time: DateTime<Utc>) -> Result<(), HistogramError> {
        self.subtract(value, weight)
    }

    fn percentile(&self, percentile: f64) -> f64 {
        WeightedHistogram::percentile(self, percentile)
    }

    fn is_empty(&self) -> bool {
        WeightedHistogram::is_empty(self)
    }
}

impl PartialEq for WeightedHistogram {
    fn eq(&self, other: &Self) -> bool {
        if self.layout != other.layout || self.min_bucket != other.min_bucket || self.max_bucket != other.max_bucket {
            return false;
        }

        (self.min_bucket..=self.max_bucket).all(|bucket| {
            approx_eq!(
                f64,
                self.bucket_weights[bucket],
                other.bucket_weights[bucket],
                epsilon = BUCKET_WEIGHT_TOLERANCE,
                ulps = 0
            )
        })
    }
}

impl fmt::Display for WeightedHistogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.non_empty_range() {
            None => write!(f, "empty histogram (total weight: {:.3})", self.total_weight),
            Some(range) => {
                write!(
                    f,
                    "buckets {}..={} (total weight: {:.3})",
                    range.start(),
                    range.end(),
                    self.total_weight
                )?;
                for bucket in range {
                    let weight = self.bucket_weights[bucket];
                    if weight > 0.0 {
                        write!(f, "\n{:.3}\t{:.6}", self.layout.bucket_start(bucket), weight)?;
                    }
                }
                Ok(())
            }
        }
    }
}

/// Rejects weights that are negative or not finite.
pub(crate) fn validate_weight(weight: f64) -> Result<(), HistogramError> {
    if !weight.is_finite() || weight < 0.0 {
        return Err(HistogramError::InvalidWeight { weight });
    }

    Ok(())
}
