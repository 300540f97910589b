// Aggregation logic tests: aggregate_samples (grouping, mean/min/max, missing fields)

mod common;

use common::{at, gpu, sample};
use devmon::metrics_repo::aggregation::aggregate_samples;
use devmon::models::{DeviceReading, Sample};

#[test]
fn aggregate_empty_returns_empty() {
    let samples: Vec<Sample> = vec![];
    assert!(aggregate_samples(&samples).is_empty());

    let empty_collections = vec![
        sample(at(2025, 1, 1, 10, 0, 0), vec![]),
        sample(at(2025, 1, 1, 10, 1, 0), vec![]),
    ];
    assert!(aggregate_samples(&empty_collections).is_empty());
}

#[test]
fn aggregate_two_samples_mean_min_max() {
    let samples = vec![
        sample(
            at(2025, 1, 1, 10, 0, 0),
            vec![gpu("GPU-1", "NVIDIA GeForce RTX 3080", 5120.0, 75.0)],
        ),
        sample(
            at(2025, 1, 1, 10, 1, 0),
            vec![gpu("GPU-1", "NVIDIA GeForce RTX 3080", 6144.0, 82.0)],
        ),
    ];
    let out = aggregate_samples(&samples);
    assert_eq!(out.len(), 1);
    let d = &out[0];
    assert_eq!(d.device_id, "GPU-1");
    assert_eq!(d.stat("memory_used_mb_mean"), Some(5632.0));
    assert_eq!(d.stat("memory_used_mb_min"), Some(5120.0));
    assert_eq!(d.stat("memory_used_mb_max"), Some(6144.0));
    assert_eq!(d.stat("sm_utilization_percent_mean"), Some(78.5));
    assert_eq!(d.stat("sm_utilization_percent_min"), Some(75.0));
    assert_eq!(d.stat("sm_utilization_percent_max"), Some(82.0));
}

#[test]
fn text_metrics_are_not_aggregated() {
    let samples = vec![sample(
        at(2025, 1, 1, 10, 0, 0),
        vec![gpu("GPU-1", "RTX", 1.0, 2.0)],
    )];
    let d = &aggregate_samples(&samples)[0];
    assert!(d.stats.keys().all(|k| !k.starts_with("pci_bus_id")));
    assert_eq!(d.stats.len(), 6);
}

#[test]
fn field_missing_in_one_sample_uses_only_present_values() {
    let samples = vec![
        sample(
            at(2025, 1, 1, 10, 0, 0),
            vec![
                DeviceReading::new("GPU-1", "RTX")
                    .with("memory_used_mb", 5120.0)
                    .with("sm_utilization_percent", 82.0),
            ],
        ),
        sample(
            at(2025, 1, 1, 10, 1, 0),
            vec![DeviceReading::new("GPU-1", "RTX").with("memory_used_mb", 6144.0)],
        ),
    ];
    let d = &aggregate_samples(&samples)[0];
    assert_eq!(d.stat("memory_used_mb_mean"), Some(5632.0));
    // Present once: mean is that value, not divided by 2.
    assert_eq!(d.stat("sm_utilization_percent_mean"), Some(82.0));
    assert_eq!(d.stat("sm_utilization_percent_min"), Some(82.0));
}

#[test]
fn fields_absent_from_first_reading_are_ignored() {
    let samples = vec![
        sample(
            at(2025, 1, 1, 10, 0, 0),
            vec![DeviceReading::new("GPU-1", "RTX").with("memory_used_mb", 1.0)],
        ),
        sample(
            at(2025, 1, 1, 10, 1, 0),
            vec![
                DeviceReading::new("GPU-1", "RTX")
                    .with("memory_used_mb", 3.0)
                    .with("fan_speed_percent", 40.0),
            ],
        ),
    ];
    let d = &aggregate_samples(&samples)[0];
    assert_eq!(d.stat("memory_used_mb_mean"), Some(2.0));
    assert_eq!(d.stat("fan_speed_percent_mean"), None);
}

#[test]
fn device_name_comes_from_last_reading() {
    let samples = vec![
        sample(
            at(2025, 1, 1, 10, 0, 0),
            vec![gpu("GPU-1", "old driver name", 1.0, 1.0)],
        ),
        sample(
            at(2025, 1, 1, 10, 1, 0),
            vec![gpu("GPU-1", "new driver name", 1.0, 1.0)],
        ),
    ];
    assert_eq!(aggregate_samples(&samples)[0].name, "new driver name");
}

#[test]
fn multiple_devices_grouped_by_id_in_first_seen_order() {
    let samples = vec![
        sample(
            at(2025, 1, 1, 10, 0, 0),
            vec![
                gpu("GPU-1234", "RTX 3080", 5120.0, 75.0),
                gpu("GPU-5678", "RTX 3090", 12288.0, 85.0),
            ],
        ),
        sample(
            at(2025, 1, 1, 10, 1, 0),
            vec![
                gpu("GPU-5678", "RTX 3090", 14336.0, 88.0),
                gpu("GPU-1234", "RTX 3080", 6144.0, 82.0),
            ],
        ),
    ];
    let out = aggregate_samples(&samples);
    assert_eq!(out.len(), 2);
    assert_eq!(out[0].device_id, "GPU-1234");
    assert_eq!(out[1].device_id, "GPU-5678");
    assert_eq!(out[0].stat("sm_utilization_percent_mean"), Some(78.5));
    assert_eq!(out[1].stat("memory_used_mb_mean"), Some(13312.0));
    assert_eq!(out[1].stat("sm_utilization_percent_mean"), Some(86.5));
}

#[test]
fn summary_serializes_flat() {
    let samples = vec![sample(
        at(2025, 1, 1, 10, 0, 0),
        vec![DeviceReading::new("GPU-1", "RTX").with("memory_used_mb", 5120.0)],
    )];
    let json = serde_json::to_value(aggregate_samples(&samples)).unwrap();
    assert_eq!(json[0]["device_id"], "GPU-1");
    assert_eq!(json[0]["name"], "RTX");
    assert_eq!(json[0]["memory_used_mb_max"], 5120.0);
}

#[test]
fn non_finite_values_are_not_reported() {
    let reading = DeviceReading::new("GPU-1", "RTX")
        .with("memory_used_mb", 5120.0)
        .with("temperature_celsius", f64::NAN)
        .with("power_watts", f64::INFINITY);
    assert_eq!(reading.metrics.len(), 1);

    let mut raw = DeviceReading::new("GPU-1", "RTX").with("memory_used_mb", 1.0);
    raw.metrics
        .insert("temperature_celsius".into(), f64::NEG_INFINITY.into());
    assert_eq!(raw.drop_non_finite(), 1);
    assert!(!raw.metrics.contains_key("temperature_celsius"));
}
