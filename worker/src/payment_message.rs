use crate::payment::{PaymentJob, to_utc_seconds};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("malformed payment message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payment message has an empty correlationId")]
    MissingCorrelationId,
    #[error("payment message has a non-positive amount: {0}")]
    NonPositiveAmount(Decimal),
}

/// Shape of a payment on the `payments` topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentMessage {
    #[serde(rename = "correlationId")]
    pub correlation_id: String,
    pub amount: Decimal,
    #[serde(
        rename = "requestedAt",
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub requested_at: Option<OffsetDateTime>,
    #[serde(rename = "_retry_count", default, skip_serializing_if = "is_zero")]
    pub retry_count: u32,
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

impl PaymentMessage {
    pub fn decode(payload: &[u8]) -> Result<Self, MessageError> {
        let msg: PaymentMessage = serde_json::from_slice(payload)?;

        if msg.correlation_id.trim().is_empty() {
            return Err(MessageError::MissingCorrelationId);
        }
        if msg.amount <= Decimal::ZERO {
            return Err(MessageError::NonPositiveAmount(msg.amount));
        }

        Ok(msg)
    }

    pub fn encode(&self) -> Result<Vec<u8>, MessageError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Turns the message into a job, stamping `now` if it was never stamped.
    /// The stamp is always held in UTC at whole-second precision.
    pub fn into_job(self, now: OffsetDateTime) -> PaymentJob {
        PaymentJob {
            correlation_id: self.correlation_id,
            amount: self.amount,
            requested_at: to_utc_seconds(self.requested_at.unwrap_or(now)),
            retry_count: self.retry_count,
        }
    }
}

impl From<&PaymentJob> for PaymentMessage {
    fn from(job: &PaymentJob) -> Self {
        Self {
            correlation_id: job.correlation_id.clone(),
            amount: job.amount,
            requested_at: Some(job.requested_at),
            retry_count: job.retry_count,
        }
    }
}
