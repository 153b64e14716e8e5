use crate::processor_type::ProcessorType;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, UtcOffset};

/// A unit of work flowing from the bus through the queue to a worker.
///
/// `requested_at` is stamped once, when the payment is first ingested, and is
/// carried unchanged through every requeue.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentJob {
    pub correlation_id: String,
    pub amount: Decimal,
    pub requested_at: OffsetDateTime,
    pub retry_count: u32,
}

impl PaymentJob {
    pub fn new(correlation_id: impl Into<String>, amount: Decimal, now: OffsetDateTime) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            amount,
            requested_at: now,
            retry_count: 0,
        }
    }

    /// The same payment with its retry counter bumped by one.
    pub fn requeued(&self) -> Self {
        Self {
            retry_count: self.retry_count + 1,
            ..self.clone()
        }
    }
}

/// Ledger entry written once per successfully dispatched payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub processor: ProcessorType,
    #[serde(rename = "correlationId")]
    pub correlation_id: String,
    pub amount: Decimal,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl PaymentRecord {
    pub fn new(
        processor: ProcessorType,
        correlation_id: impl Into<String>,
        amount: Decimal,
        timestamp: OffsetDateTime,
    ) -> Self {
        Self {
            processor,
            correlation_id: correlation_id.into(),
            amount,
            timestamp,
        }
    }

    /// Sort key of the record in the ordered log.
    pub fn score(&self) -> i64 {
        self.timestamp.unix_timestamp()
    }
}

/// Current UTC time truncated to whole seconds.
pub fn utc_now_seconds() -> OffsetDateTime {
    to_utc_seconds(OffsetDateTime::now_utc())
}

/// The same instant in UTC, with any fraction of a second dropped.
pub fn to_utc_seconds(at: OffsetDateTime) -> OffsetDateTime {
    let utc = at.to_offset(UtcOffset::UTC);
    utc.replace_nanosecond(0).unwrap_or(utc)
}
