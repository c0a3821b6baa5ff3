use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Quantized weight assigned to the heaviest bucket of a checkpoint.
///
/// Every other bucket is quantized relative to it, so a checkpoint only retains precision down to `1 /
/// MAX_CHECKPOINT_WEIGHT` of the heaviest bucket.
pub const MAX_CHECKPOINT_WEIGHT: u32 = 10_000;

/// A compact, lossy snapshot of a histogram.
///
/// Bucket weights are quantized to integers between `1` and [`MAX_CHECKPOINT_WEIGHT`], keyed by bucket index, while
/// the total weight is carried as-is so that the absolute scale can be restored on load.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistogramCheckpoint {
    /// Quantized weight of each non-empty bucket, keyed by bucket index.
    #[serde(default)]
    pub bucket_weights: BTreeMap<u32, u32>,

    /// Total weight of all samples in the histogram.
    pub total_weight: f64,

    /// Decay reference timestamp.
    ///
    /// Only set for checkpoints of a [`DecayingHistogram`][crate::DecayingHistogram].
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    pub reference_timestamp: Option<DateTime<Utc>>,
}

impl HistogramCheckpoint {
    /// Returns `true` if the checkpoint holds no bucket weights.
    pub fn is_empty(&self) -> bool {
        self.bucket_weights.is_empty()
    }

    /// Returns the sum of all quantized bucket weights.
    pub(crate) fn quantized_sum(&self) -> u64 {
        self.bucket_weights.values().map(|weight| u64::from(*weight)).sum()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone as _;

    use super::*;

    #[test]
    fn serialized_shape() {
        let checkpoint = HistogramCheckpoint {
            bucket_weights: BTreeMap::from([(0, 5_000), (3, 10_000)]),
            total_weight: 3.0,
            reference_timestamp: Some(Utc.timestamp_millis_opt(1_700_000_000_000).unwrap()),
        };

        let json = serde_json::to_value(&checkpoint).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "bucketWeights": { "0": 5000, "3": 10000 },
                "totalWeight": 3.0,
                "referenceTimestamp": 1_700_000_000_000i64,
            })
        );

        let decoded: HistogramCheckpoint = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, checkpoint);
    }

    #[test]
    fn reference_timestamp_omitted_when_unset() {
        let checkpoint = HistogramCheckpoint {
            bucket_weights: BTreeMap::from([(2, 10_000)]),
            total_weight: 1.5,
            reference_timestamp: None,
        };

        let json = serde_json::to_string(&checkpoint).unwrap();
        assert_eq!(json, r#"{"bucketWeights":{"2":10000},"totalWeight":1.5}"#);

        let decoded: HistogramCheckpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.reference_timestamp, None);
        assert_eq!(decoded.quantized_sum(), 10_000);
    }
}
