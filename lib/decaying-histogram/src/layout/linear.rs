use super::{clamp_bucket, MAX_NUM_BUCKETS};
use crate::HistogramError;

/// Layout with buckets of a fixed width.
///
/// Bucket `n` starts at `n * bucket_size`.
#[derive(Clone, Debug, PartialEq)]
pub struct LinearLayout {
    num_buckets: usize,
    bucket_size: f64,
    epsilon: f64,
}

impl LinearLayout {
    /// Creates a new `LinearLayout` whose buckets cover values up to `max_value`.
    ///
    /// The layout ends up with `ceil(max_value / bucket_size) + 1` buckets, so that `max_value` itself falls into a
    /// bounded bucket.
    ///
    /// # Errors
    ///
    /// If any of the parameters are not strictly positive, an error is returned.
    pub fn new(max_value: f64, bucket_size: f64, epsilon: f64) -> Result<Self, HistogramError> {
        if !(max_value > 0.0) {
            return Err(HistogramError::InvalidLayout {
                reason: "maximum value must be positive",
            });
        }
        validate(bucket_size, epsilon)?;

        let num_buckets = (max_value / bucket_size).ceil();
        if !(num_buckets < MAX_NUM_BUCKETS as f64) {
            return Err(HistogramError::InvalidLayout {
                reason: "too many buckets",
            });
        }

        Self::with_num_buckets(num_buckets as usize + 1, bucket_size, epsilon)
    }

    /// Creates a new `LinearLayout` with exactly `num_buckets` buckets.
    ///
    /// # Errors
    ///
    /// If any of the parameters are not strictly positive, an error is returned.
    pub fn with_num_buckets(num_buckets: usize, bucket_size: f64, epsilon: f64) -> Result<Self, HistogramError> {
        if num_buckets == 0 {
            return Err(HistogramError::InvalidLayout {
                reason: "number of buckets must be positive",
            });
        }

        if num_buckets > MAX_NUM_BUCKETS {
            return Err(HistogramError::InvalidLayout {
                reason: "too many buckets",
            });
        }
        validate(bucket_size, epsilon)?;

        Ok(Self {
            num_buckets,
            bucket_size,
            epsilon,
        })
    }

    /// Returns the width of every bucket.
    pub fn bucket_size(&self) -> f64 {
        self.bucket_size
    }

    pub(super) fn num_buckets(&self) -> usize {
        self.num_buckets
    }

    pub(super) fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub(super) fn find_bucket(&self, value: f64) -> usize {
        clamp_bucket((value / self.bucket_size).floor(), self.num_buckets)
    }

    pub(super) fn bucket_start(&self, index: usize) -> f64 {
        index as f64 * self.bucket_size
    }
}

fn validate(bucket_size: f64, epsilon: f64) -> Result<(), HistogramError> {
    if !(bucket_size > 0.0) || !bucket_size.is_finite() {
        return Err(HistogramError::InvalidLayout {
            reason: "bucket size must be positive and finite",
        });
    }

    if !(epsilon > 0.0) {
        return Err(HistogramError::InvalidLayout {
            reason: "epsilon must be positive",
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn num_buckets_from_max_value() {
        let layout = LinearLayout::new(100.0, 10.0, 1e-4).unwrap();
        assert_eq!(layout.num_buckets(), 11);

        let layout = LinearLayout::new(101.0, 10.0, 1e-4).unwrap();
        assert_eq!(layout.num_buckets(), 12);

        let layout = LinearLayout::new(0.5, 10.0, 1e-4).unwrap();
        assert_eq!(layout.num_buckets(), 2);
    }

    #[test]
    fn find_bucket() {
        let layout = LinearLayout::new(100.0, 10.0, 1e-4).unwrap();
        assert_eq!(layout.find_bucket(0.0), 0);
        assert_eq!(layout.find_bucket(9.99), 0);
        assert_eq!(layout.find_bucket(10.0), 1);
        assert_eq!(layout.find_bucket(55.0), 5);
        assert_eq!(layout.find_bucket(100.0), 10);
        assert_eq!(layout.find_bucket(250.0), 10);
        assert_eq!(layout.find_bucket(-3.0), 0);
    }

    #[test]
    fn bucket_start() {
        let layout = LinearLayout::new(100.0, 10.0, 1e-4).unwrap();
        assert_eq!(layout.bucket_start(0), 0.0);
        assert_eq!(layout.bucket_start(3), 30.0);
        assert_eq!(layout.bucket_start(10), 100.0);
    }

    #[test]
    fn invalid_parameters() {
        assert!(LinearLayout::new(0.0, 10.0, 1e-4).is_err());
        assert!(LinearLayout::new(-1.0, 10.0, 1e-4).is_err());
        assert!(LinearLayout::new(100.0, 0.0, 1e-4).is_err());
        assert!(LinearLayout::new(100.0, -10.0, 1e-4).is_err());
        assert!(LinearLayout::new(100.0, 10.0, 0.0).is_err());
        assert!(LinearLayout::new(100.0, f64::NAN, 1e-4).is_err());
        assert!(LinearLayout::with_num_buckets(0, 10.0, 1e-4).is_err());
        assert!(LinearLayout::with_num_buckets(5, 10.0, -1e-4).is_err());
    }

    #[test]
    fn bucket_count_capped() {
        let too_many = Err(HistogramError::InvalidLayout {
            reason: "too many buckets",
        });
        assert_eq!(LinearLayout::new(1e15, 1.0, 1e-4), too_many);
        assert_eq!(LinearLayout::with_num_buckets(MAX_NUM_BUCKETS + 1, 1.0, 1e-4), too_many);

        let layout = LinearLayout::with_num_buckets(MAX_NUM_BUCKETS, 1.0, 1e-4).unwrap();
        assert_eq!(layout.num_buckets(), MAX_NUM_BUCKETS);

        let layout = LinearLayout::new((MAX_NUM_BUCKETS - 1) as f64, 1.0, 1e-4).unwrap();
        assert_eq!(layout.num_buckets(), MAX_NUM_BUCKETS);
    }
}
