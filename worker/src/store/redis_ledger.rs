use super::{
    Ledger, PAYMENTS_LOG, StoreError, is_unbounded, ledger_record, processed_key,
    total_amount_key, total_requests_key,
};
use crate::payment::PaymentRecord;
use crate::processor_type::ProcessorType;
use crate::summary::{PaymentsSummary, ProcessorSummary, to_cents};
use async_trait::async_trait;
use deadpool_redis::Pool;
use redis::AsyncCommands;
use rust_decimal::Decimal;
use std::time::Duration;
use time::OffsetDateTime;

// KEYS: marker, log, request counter, amount counter
// ARGV: ttl secs, score, member, cents
const SAVE_SCRIPT: &str = r#"
if not redis.call('SET', KEYS[1], '1', 'NX', 'EX', ARGV[1]) then
  return 0
end
redis.call('ZADD', KEYS[2], ARGV[2], ARGV[3])
redis.call('INCRBY', KEYS[3], 1)
redis.call('INCRBY', KEYS[4], ARGV[4])
return 1
"#;

pub struct RedisLedger {
    pool: Pool,
    dedup_ttl: Duration,
    save_script: redis::Script,
}

impl RedisLedger {
    pub fn new(pool: Pool, dedup_ttl: Duration) -> Self {
        Self {
            pool,
            dedup_ttl,
            save_script: redis::Script::new(SAVE_SCRIPT),
        }
    }
}

#[async_trait]
impl Ledger for RedisLedger {
    /// Claim, log entry and counters go through one script, so Redis applies
    /// all of them or none. A retry after a lost reply finds the claim taken.
    async fn save(
        &self,
        correlation_id: &str,
        processor: ProcessorType,
        amount: Decimal,
        timestamp: OffsetDateTime,
    ) -> Result<bool, StoreError> {
        let record = ledger_record(correlation_id, processor, amount, timestamp);
        let member = serde_json::to_string(&record)?;

        let mut conn = self.pool.get().await?;

        let claimed: i64 = self
            .save_script
            .key(processed_key(correlation_id))
            .key(PAYMENTS_LOG)
            .key(total_requests_key(processor))
            .key(total_amount_key(processor))
            .arg(self.dedup_ttl.as_secs().max(1))
            .arg(record.score())
            .arg(&member)
            .arg(to_cents(record.amount))
            .invoke_async(&mut conn)
            .await?;

        Ok(claimed == 1)
    }

    async fn is_processed(&self, correlation_id: &str) -> Result<bool, StoreError> {
        let mut conn = self.pool.get().await?;
        let exists: bool = conn.exists(processed_key(correlation_id)).await?;
        Ok(exists)
    }

    async fn summary(
        &self,
        from: Option<OffsetDateTime>,
        to: Option<OffsetDateTime>,
    ) -> Result<PaymentsSummary, StoreError> {
        let mut conn = self.pool.get().await?;

        if is_unbounded(from, to) {
            let (d_requests, d_cents, f_requests, f_cents): (
                Option<u64>,
                Option<i64>,
                Option<u64>,
                Option<i64>,
            ) = redis::pipe()
                .get(total_requests_key(ProcessorType::Default))
                .get(total_amount_key(ProcessorType::Default))
                .get(total_requests_key(ProcessorType::Fallback))
                .get(total_amount_key(ProcessorType::Fallback))
                .query_async(&mut conn)
                .await?;

            return Ok(PaymentsSummary {
                default: ProcessorSummary::from_counters(
                    d_requests.unwrap_or(0),
                    d_cents.unwrap_or(0),
                ),
                fallback: ProcessorSummary::from_counters(
                    f_requests.unwrap_or(0),
                    f_cents.unwrap_or(0),
                ),
            });
        }

        let min = from
            .map(|t| t.unix_timestamp().to_string())
            .unwrap_or_else(|| "-inf".to_string());
        let max = to
            .map(|t| t.unix_timestamp().to_string())
            .unwrap_or_else(|| "+inf".to_string());

        let entries: Vec<String> = conn.zrangebyscore(PAYMENTS_LOG, min, max).await?;

        let records: Vec<PaymentRecord> = entries
            .iter()
            .filter_map(|entry| match serde_json::from_str::<PaymentRecord>(entry) {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::warn!(error = %e, entry = %entry, "Skipping unreadable ledger entry");
                    None
                }
            })
            .collect();

        Ok(PaymentsSummary::from_records(&records))
    }

    async fn purge_all(&self) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        let _: () = redis::cmd("FLUSHDB").query_async(&mut conn).await?;
        tracing::info!("Ledger purged");
        Ok(())
    }
}
