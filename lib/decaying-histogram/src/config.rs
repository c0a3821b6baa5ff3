//! Histogram configuration.
//!
//! Layouts and decaying histograms can be described declaratively and deserialized from any `serde`-compatible
//! source. Parameters are validated during deserialization, so a successfully deserialized configuration always builds
//! a histogram.
//!
//! A decaying histogram configuration, in YAML, looks like this:
//!
//! ```yaml
//! layout:
//!   exponential:
//!     max_value: 1000.0
//!     first_bucket_size: 0.01
//!     ratio: 1.05
//! half_life: 86400000 # milliseconds
//! ```
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};

use crate::{layout::DEFAULT_EPSILON, BucketLayout, DecayingHistogram, HistogramError, WeightedHistogram};

fn default_epsilon() -> f64 {
    DEFAULT_EPSILON
}

/// Bucket layout configuration.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum BucketLayoutConfiguration {
    /// Buckets of a fixed width.
    ///
    /// Exactly one of `num_buckets` or `max_value` must be set.
    Linear {
        /// Number of buckets.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        num_buckets: Option<usize>,

        /// Largest value that should fall into a bounded bucket.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_value: Option<f64>,

        /// Width of every bucket.
        bucket_size: f64,

        /// Minimum weight for a bucket to be considered non-empty.
        ///
        /// Defaults to `1e-4`.
        #[serde(default = "default_epsilon")]
        epsilon: f64,
    },

    /// Buckets whose widths grow geometrically.
    Exponential {
        /// Largest value that should fall into a bounded bucket.
        max_value: f64,

        /// Width of the first bucket.
        first_bucket_size: f64,

        /// Growth ratio between consecutive bucket widths.
        ratio: f64,

        /// Minimum weight for a bucket to be considered non-empty.
        ///
        /// Defaults to `1e-4`.
        #[serde(default = "default_epsilon")]
        epsilon: f64,
    },
}

impl TryFrom<BucketLayoutConfiguration> for BucketLayout {
    type Error = HistogramError;

    fn try_from(config: BucketLayoutConfiguration) -> Result<Self, Self::Error> {
        match config {
            BucketLayoutConfiguration::Linear {
                num_buckets: Some(num_buckets),
                max_value: None,
                bucket_size,
                epsilon,
            } => BucketLayout::linear_with_num_buckets(num_buckets, bucket_size, epsilon),
            BucketLayoutConfiguration::Linear {
                num_buckets: None,
                max_value: Some(max_value),
                bucket_size,
                epsilon,
            } => BucketLayout::linear(max_value, bucket_size, epsilon),
            BucketLayoutConfiguration::Linear { .. } => Err(HistogramError::InvalidLayout {
                reason: "exactly one of `num_buckets` or `max_value` must be set for a linear layout",
            }),
            BucketLayoutConfiguration::Exponential {
                max_value,
                first_bucket_size,
                ratio,
                epsilon,
            } => BucketLayout::exponential(max_value, first_bucket_size, ratio, epsilon),
        }
    }
}

/// Weighted histogram configuration.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(try_from = "BucketLayoutConfiguration")]
pub struct HistogramConfiguration {
    layout: BucketLayout,
}

impl TryFrom<BucketLayoutConfiguration> for HistogramConfiguration {
    type Error = HistogramError;

    fn try_from(config: BucketLayoutConfiguration) -> Result<Self, Self::Error> {
        Ok(Self {
            layout: config.try_into()?,
        })
    }
}

impl HistogramConfiguration {
    /// Returns the configured bucket layout.
    pub fn layout(&self) -> &BucketLayout {
        &self.layout
    }

    /// Creates an empty histogram from this configuration.
    pub fn build(&self) -> WeightedHistogram {
        WeightedHistogram::new(self.layout.clone())
    }
}

#[serde_as]
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDecayingHistogramConfiguration {
    /// Bucket layout.
    layout: BucketLayoutConfiguration,

    /// Half-life, in milliseconds.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    half_life: Duration,
}

/// Decaying histogram configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(try_from = "RawDecayingHistogramConfiguration")]
pub struct DecayingHistogramConfiguration {
    template: DecayingHistogram,
}

impl TryFrom<RawDecayingHistogramConfiguration> for DecayingHistogramConfiguration {
    type Error = HistogramError;

    fn try_from(raw: RawDecayingHistogramConfiguration) -> Result<Self, Self::Error> {
        let layout = raw.layout.try_into()?;
        Ok(Self {
            template: DecayingHistogram::new(layout, raw.half_life)?,
        })
    }
}

impl DecayingHistogramConfiguration {
    /// Creates a new `DecayingHistogramConfiguration` from the given layout and half-life.
    ///
    /// # Errors
    ///
    /// If the half-life is shorter than one millisecond, an error is returned.
    pub fn new(layout: BucketLayout, half_life: Duration) -> Result<Self, HistogramError> {
        Ok(Self {
            template: DecayingHistogram::new(layout, half_life)?,
        })
    }

    /// Returns the configured bucket layout.
    pub fn layout(&self) -> &BucketLayout {
        self.template.inner().layout()
    }

    /// Returns the configured half-life.
    pub fn half_life(&self) -> Duration {
        self.template.half_life()
    }

    /// Creates an empty decaying histogram from this configuration.
    pub fn build(&self) -> DecayingHistogram {
        self.template.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_with_max_value() {
        let config: BucketLayoutConfiguration =
            serde_json::from_str(r#"{"linear": {"max_value": 100.0, "bucket_size": 10.0}}"#).unwrap();
        let layout = BucketLayout::try_from(config).unwrap();

        assert_eq!(layout, BucketLayout::linear(100.0, 10.0, DEFAULT_EPSILON).unwrap());
        assert_eq!(layout.num_buckets(), 11);
    }

    #[test]
    fn linear_with_num_buckets() {
        let config: BucketLayoutConfiguration =
            serde_json::from_str(r#"{"linear": {"num_buckets": 5, "bucket_size": 2.5, "epsilon": 0.001}}"#).unwrap();
        let layout = BucketLayout::try_from(config).unwrap();

        assert_eq!(layout, BucketLayout::linear_with_num_buckets(5, 2.5, 0.001).unwrap());
    }

    #[test]
    fn linear_requires_exactly_one_size() {
        let neither: BucketLayoutConfiguration =
            serde_json::from_str(r#"{"linear": {"bucket_size": 10.0}}"#).unwrap();
        assert!(BucketLayout::try_from(neither).is_err());

        let both: BucketLayoutConfiguration =
            serde_json::from_str(r#"{"linear": {"num_buckets": 5, "max_value": 100.0, "bucket_size": 10.0}}"#)
                .unwrap();
        assert!(BucketLayout::try_from(both).is_err());
    }

    #[test]
    fn unknown_fields_rejected() {
        let result = serde_json::from_str::<BucketLayoutConfiguration>(
            r#"{"linear": {"max_value": 100.0, "bucket_size": 10.0, "epsilom": 0.01}}"#,
        );
        let error = result.unwrap_err().to_string();
        assert!(error.contains("epsilom"), "unexpected error: {}", error);

        let result = serde_json::from_str::<DecayingHistogramConfiguration>(
            r#"{"layout": {"exponential": {"max_value": 1000.0, "first_bucket_size": 0.01, "ratio": 1.05, "epsilom": 0.01}}, "half_life": 1000}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn exponential() {
        let config: BucketLayoutConfiguration = serde_json::from_str(
            r#"{"exponential": {"max_value": 1000.0, "first_bucket_size": 0.01, "ratio": 1.05}}"#,
        )
        .unwrap();
        let layout = BucketLayout::try_from(config).unwrap();

        assert_eq!(
            layout,
            BucketLayout::exponential(1000.0, 0.01, 1.05, DEFAULT_EPSILON).unwrap()
        );
    }

    #[test]
    fn histogram_configuration_validates() {
        let config: HistogramConfiguration =
            serde_json::from_str(r#"{"linear": {"max_value": 50.0, "bucket_size": 5.0}}"#).unwrap();
        let histogram = config.build();
        assert!(histogram.is_empty());
        assert_eq!(histogram.layout(), config.layout());

        let result = serde_json::from_str::<HistogramConfiguration>(
            r#"{"exponential": {"max_value": 1000.0, "first_bucket_size": 0.01, "ratio": 1.0}}"#,
        );
        let error = result.unwrap_err().to_string();
        assert!(error.contains("ratio must be greater than one"), "unexpected error: {}", error);
    }

    #[test]
    fn decaying_histogram_configuration() {
        let config: DecayingHistogramConfiguration = serde_json::from_str(
            r#"{"layout": {"linear": {"max_value": 100.0, "bucket_size": 10.0}}, "half_life": 3600000}"#,
        )
        .unwrap();

        assert_eq!(config.half_life(), Duration::from_secs(3600));
        assert_eq!(config.layout().num_buckets(), 11);

        let histogram = config.build();
        assert_eq!(histogram.half_life(), Duration::from_secs(3600));
        assert_eq!(
            histogram,
            DecayingHistogram::new(config.layout().clone(), Duration::from_secs(3600)).unwrap()
        );
    }

    #[test]
    fn decaying_histogram_configuration_rejects_zero_half_life() {
        let result = serde_json::from_str::<DecayingHistogramConfiguration>(
            r#"{"layout": {"linear": {"max_value": 100.0, "bucket_size": 10.0}}, "half_life": 0}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn layout_configuration_round_trip() {
        let config = BucketLayoutConfiguration::Exponential {
            max_value: 1000.0,
            first_bucket_size: 0.01,
            ratio: 1.05,
            epsilon: 1e-4,
        };

        let json = serde_json::to_string(&config).unwrap();
        let decoded: BucketLayoutConfiguration = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, config);
    }
}
