//! Persisting histogram state across restarts.

use std::time::Duration;

use chrono::{DateTime, TimeZone as _, Utc};
use decaying_histogram::{
    BucketLayout, DecayingHistogram, Histogram, HistogramCheckpoint, WeightedHistogram, MAX_CHECKPOINT_WEIGHT,
};

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

fn at(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).unwrap()
}

fn cpu_layout() -> BucketLayout {
    BucketLayout::exponential(1000.0, 0.01, 1.05, 1e-4).unwrap()
}

/// Returns the index of the bucket starting at `boundary`, which must be a bucket boundary of `layout`.
fn boundary_index(layout: &BucketLayout, boundary: f64) -> i64 {
    (0..layout.num_buckets())
        .find(|index| layout.bucket_start(*index) == boundary)
        .expect("percentiles should be bucket boundaries") as i64
}

fn feed<H: Histogram>(histogram: &mut H, start_ms: i64) {
    // One sample a minute over a week, with a weekly cycle in usage.
    for minute in 0..(7 * 24 * 60) {
        let usage = 0.5 + (minute % 1440) as f64 / 1440.0;
        histogram
            .add_sample(usage, 1.0, at(start_ms + minute * 60_000))
            .unwrap();
    }
}

#[test]
fn decaying_histogram_survives_restart() {
    let start_ms = 19_700 * DAY_MS;
    let mut histogram = DecayingHistogram::new(cpu_layout(), Duration::from_millis(DAY_MS as u64)).unwrap();
    feed(&mut histogram, start_ms);

    let serialized = serde_json::to_string(&histogram.save_to_checkpoint()).unwrap();
    let checkpoint: HistogramCheckpoint = serde_json::from_str(&serialized).unwrap();

    assert_eq!(checkpoint.reference_timestamp, Some(histogram.reference_timestamp()));
    assert!(checkpoint
        .bucket_weights
        .values()
        .all(|weight| (1..=MAX_CHECKPOINT_WEIGHT).contains(weight)));
    assert_eq!(checkpoint.bucket_weights.values().max(), Some(&MAX_CHECKPOINT_WEIGHT));

    let mut restored = DecayingHistogram::new(cpu_layout(), Duration::from_millis(DAY_MS as u64)).unwrap();
    restored.load_from_checkpoint(&checkpoint).unwrap();

    assert_eq!(restored.reference_timestamp(), histogram.reference_timestamp());
    assert!((restored.inner().total_weight() - histogram.inner().total_weight()).abs() < 1e-9);

    let layout = cpu_layout();
    for p in [0.5, 0.9, 0.95, 0.99] {
        let original = histogram.percentile(p);
        let recovered = restored.percentile(p);

        // Never more than one bucket apart.
        let original_index = boundary_index(&layout, original);
        let recovered_index = boundary_index(&layout, recovered);
        assert!(
            (original_index - recovered_index).abs() <= 1,
            "p{}: {} vs {}",
            p,
            original,
            recovered
        );
    }
}

#[test]
fn weighted_checkpoint_omits_reference_timestamp() {
    let mut histogram = WeightedHistogram::new(cpu_layout());
    feed(&mut histogram, 0);

    let checkpoint = histogram.save_to_checkpoint();
    let serialized = serde_json::to_value(&checkpoint).unwrap();
    assert!(serialized.get("referenceTimestamp").is_none());
    assert!(serialized.get("bucketWeights").is_some());
    assert!(serialized.get("totalWeight").is_some());

    let mut restored = WeightedHistogram::new(cpu_layout());
    restored.load_from_checkpoint(&checkpoint).unwrap();
    assert_eq!(restored.total_weight(), histogram.total_weight());
    assert!(!restored.is_empty());
}

#[test]
fn checkpoint_from_other_layout_rejected() {
    let mut histogram = WeightedHistogram::new(cpu_layout());
    feed(&mut histogram, 0);
    let checkpoint = histogram.save_to_checkpoint();

    let mut smaller = WeightedHistogram::new(BucketLayout::linear(10.0, 1.0, 1e-4).unwrap());
    assert!(smaller.load_from_checkpoint(&checkpoint).is_err());
    assert!(smaller.is_empty());
}
