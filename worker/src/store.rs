//! Idempotent payment ledger.
//!
//! A payment is recorded at most once per correlation id: `save` claims a
//! time-bounded dedup marker with set-if-absent, and only the caller that wins
//! the claim writes the record and bumps the counters. Claim and writes are
//! applied together or not at all.

mod in_memory;
mod redis_ledger;

pub use in_memory::InMemoryLedger;
pub use redis_ledger::RedisLedger;

use crate::payment::{PaymentRecord, to_utc_seconds};
use crate::processor_type::ProcessorType;
use crate::summary::{PaymentsSummary, round_amount};
use async_trait::async_trait;
use rust_decimal::Decimal;
use time::OffsetDateTime;

pub const PAYMENTS_LOG: &str = "payments_log";

pub fn processed_key(correlation_id: &str) -> String {
    format!("processed:{}", correlation_id)
}

pub fn total_requests_key(processor: ProcessorType) -> String {
    format!("totalRequests:{}", processor)
}

pub fn total_amount_key(processor: ProcessorType) -> String {
    format!("totalAmount:{}", processor)
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redis command failed: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("no store connection available: {0}")]
    Pool(#[from] deadpool_redis::PoolError),
    #[error("ledger entry could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("ledger write failed: {0}")]
    WriteFailed(String),
}

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Records a payment unless its correlation id was already claimed.
    ///
    /// Returns `Ok(true)` when this call wrote the record and `Ok(false)` when
    /// another writer got there first, including an earlier call whose reply
    /// was lost. Retrying after `Err` never counts a payment twice.
    async fn save(
        &self,
        correlation_id: &str,
        processor: ProcessorType,
        amount: Decimal,
        timestamp: OffsetDateTime,
    ) -> Result<bool, StoreError>;

    async fn is_processed(&self, correlation_id: &str) -> Result<bool, StoreError>;

    /// Totals per processor. With no bounds this reads the running counters;
    /// with any bound it scans the record log between them, inclusive.
    async fn summary(
        &self,
        from: Option<OffsetDateTime>,
        to: Option<OffsetDateTime>,
    ) -> Result<PaymentsSummary, StoreError>;

    /// Drops every ledger entry, marker and counter.
    async fn purge_all(&self) -> Result<(), StoreError>;
}

/// The record as the ledger keeps it: amount normalized to cents, timestamp
/// in UTC whole seconds.
pub(crate) fn ledger_record(
    correlation_id: &str,
    processor: ProcessorType,
    amount: Decimal,
    timestamp: OffsetDateTime,
) -> PaymentRecord {
    PaymentRecord::new(
        processor,
        correlation_id,
        round_amount(amount),
        to_utc_seconds(timestamp),
    )
}

pub(crate) fn is_unbounded(from: Option<OffsetDateTime>, to: Option<OffsetDateTime>) -> bool {
    from.is_none() && to.is_none()
}
