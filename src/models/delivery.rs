// Delivery attempt log rows and the per-key summary shown by the reporting surface.

use serde::{Deserialize, Serialize};

/// One logged transmission try. Never mutated after insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub aggregation_key: String,
    pub attempted_at: String,
    /// 1-based, contiguous per aggregation key.
    pub attempt_number: u32,
    pub success: bool,
    pub error: Option<String>,
    pub ack_id: Option<String>,
    /// Serialized request body as sent.
    pub params: String,
}

/// Insert form of an attempt; the attempt number is assigned by the store.
#[derive(Debug, Clone)]
pub struct NewDeliveryAttempt<'a> {
    pub aggregation_key: &'a str,
    pub attempted_at: String,
    pub success: bool,
    pub error: Option<String>,
    pub ack_id: Option<String>,
    pub params: &'a str,
}

/// One row per aggregation key that has at least one attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliverySummary {
    pub aggregation_key: String,
    pub attempts: u32,
    pub first_attempt: String,
    pub last_attempt: String,
    pub last_error: Option<String>,
    pub ack_id: Option<String>,
    pub sent: bool,
}
