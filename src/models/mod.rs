// Domain models: raw samples, hourly aggregates, delivery attempt log.

mod aggregate;
mod delivery;
mod reading;
mod timestamp;

pub use aggregate::{Aggregate, DeviceSummary};
pub use delivery::{DeliveryAttempt, DeliverySummary, NewDeliveryAttempt};
pub use reading::{DeviceReading, MetricValue, Sample};
pub use timestamp::{
    AGGREGATION_KEY_FORMAT, TIMESTAMP_FORMAT, aggregation_key, format_timestamp, hour_start,
    normalize_prefix, parse_aggregation_key, parse_timestamp, window_bounds,
};
