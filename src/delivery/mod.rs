// Delivery engine: moves one aggregate from unsent to sent, logging every try.
// PENDING -> (ATTEMPTING -> SUCCESS | FAILED_RETRYABLE)* -> DELIVERED | EXHAUSTED.
// Once the attempt log for a key reaches max_retries the key is exhausted and
// further calls fail fast without writing a new attempt row.

pub mod batch;

use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::metrics_repo::MetricsRepo;
use crate::models::{Aggregate, DeviceSummary, NewDeliveryAttempt, format_timestamp};

/// Header carrying the installation / contract identifier.
pub const CONTRACT_HEADER: &str = "X-Contract-Number";
/// Response field holding the server-assigned acknowledgment id.
pub const ACK_ID_FIELD: &str = "uid";
/// Optional response field echoing the received body.
pub const ECHO_FIELD: &str = "params";

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Maximum retry attempts ({0}) reached")]
    MaxRetries(u32),
    #[error("failed to send data: {0}")]
    Transport(String),
    #[error("server returned non-success status: {0}")]
    Status(u16),
    #[error("response is not a valid object")]
    InvalidResponse,
    #[error("response missing acknowledgment id")]
    MissingAck,
    #[error("response params do not match sent payload")]
    IntegrityMismatch { ack_id: String },
    #[error("payload serialization: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl DeliveryError {
    /// Ack id the server returned even though the attempt failed.
    pub fn ack_id(&self) -> Option<&str> {
        match self {
            DeliveryError::IntegrityMismatch { ack_id } => Some(ack_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { ack_id: String, attempt_number: u32 },
    /// No endpoint or offline configuration: nothing sent, nothing logged.
    Offline,
}

/// Request body sent to the collector.
#[derive(Debug, Serialize)]
pub struct DeliveryPayload<'a> {
    pub aggregation_time: &'a str,
    pub devices: &'a [DeviceSummary],
    pub contract_number: &'a str,
}

#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    pub url: String,
    pub contract_number: String,
    pub offline: bool,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

pub struct DeliveryClient {
    http: reqwest::Client,
    config: DeliveryConfig,
}

impl DeliveryClient {
    pub fn new(config: DeliveryConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { http, config })
    }

    pub fn is_offline(&self) -> bool {
        self.config.offline || self.config.url.trim().is_empty()
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// One delivery attempt for `aggregate`. Every transport or validation
    /// failure is recorded in the attempt log before being returned.
    #[instrument(skip(self, repo, aggregate), fields(aggregation_key = %aggregate.aggregation_key))]
    pub async fn deliver(
        &self,
        repo: &MetricsRepo,
        aggregate: &Aggregate,
    ) -> Result<DeliveryOutcome, DeliveryError> {
        if self.is_offline() {
            debug!("offline mode, skipping send");
            return Ok(DeliveryOutcome::Offline);
        }

        let key = aggregate.aggregation_key.as_str();
        let previous = repo.count_attempts(key).await?;
        if previous >= self.config.max_retries {
            let err = DeliveryError::MaxRetries(self.config.max_retries);
            warn!(attempts = previous, error = %err, "delivery exhausted");
            return Err(err);
        }

        let body = serde_json::to_value(DeliveryPayload {
            aggregation_time: key,
            devices: &aggregate.devices,
            contract_number: &self.config.contract_number,
        })?;
        let params = body.to_string();

        match self.transmit(&body).await {
            Ok(ack_id) => {
                let attempt_number = repo
                    .record_attempt(&NewDeliveryAttempt {
                        aggregation_key: key,
                        attempted_at: format_timestamp(Utc::now()),
                        success: true,
                        error: None,
                        ack_id: Some(ack_id.clone()),
                        params: &params,
                    })
                    .await?;
                info!(ack_id = %ack_id, attempt_number, "aggregate delivered");
                Ok(DeliveryOutcome::Delivered {
                    ack_id,
                    attempt_number,
                })
            }
            Err(err) => {
                let attempt_number = repo
                    .record_attempt(&NewDeliveryAttempt {
                        aggregation_key: key,
                        attempted_at: format_timestamp(Utc::now()),
                        success: false,
                        error: Some(err.to_string()),
                        ack_id: err.ack_id().map(str::to_string),
                        params: &params,
                    })
                    .await?;
                warn!(error = %err, attempt_number, "delivery attempt failed");
                Err(err)
            }
        }
    }

    /// POST the body and validate the response; returns the ack id.
    async fn transmit(&self, body: &Value) -> Result<String, DeliveryError> {
        let response = self
            .http
            .post(&self.config.url)
            .header(CONTRACT_HEADER, &self.config.contract_number)
            .json(body)
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DeliveryError::Status(status.as_u16()));
        }

        let text = response
            .text()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        validate_response(&text, body)
    }
}

/// Classifies a success-status response body against the body that was sent.
pub fn validate_response(text: &str, sent: &Value) -> Result<String, DeliveryError> {
    let value: Value = serde_json::from_str(text).map_err(|_| DeliveryError::InvalidResponse)?;
    let Some(obj) = value.as_object() else {
        return Err(DeliveryError::InvalidResponse);
    };

    let ack_id = match obj.get(ACK_ID_FIELD) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => return Err(DeliveryError::MissingAck),
        Some(other) => other.to_string(),
    };

    if let Some(echo) = obj.get(ECHO_FIELD)
        && echo != sent
    {
        return Err(DeliveryError::IntegrityMismatch { ack_id });
    }

    Ok(ack_id)
}
