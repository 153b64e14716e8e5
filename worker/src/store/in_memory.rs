use super::{Ledger, StoreError, is_unbounded, ledger_record};
use crate::payment::PaymentRecord;
use crate::processor_type::ProcessorType;
use crate::summary::{PaymentsSummary, ProcessorSummary, to_cents};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound::{Included, Unbounded};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Default)]
struct State {
    // correlation id -> marker expiry
    markers: HashMap<String, Instant>,
    // epoch seconds -> records stamped at that second
    log: BTreeMap<i64, Vec<PaymentRecord>>,
    // processor -> (requests, cents)
    counters: HashMap<ProcessorType, (u64, i64)>,
    failing_writes: u32,
    lost_replies: u32,
}

impl State {
    fn holds_marker(&mut self, correlation_id: &str, now: Instant) -> bool {
        match self.markers.get(correlation_id) {
            Some(expires_at) if *expires_at > now => true,
            Some(_) => {
                self.markers.remove(correlation_id);
                false
            }
            None => false,
        }
    }
}

/// Ledger kept in process memory, with the same contract as the Redis one.
#[derive(Clone)]
pub struct InMemoryLedger {
    state: Arc<Mutex<State>>,
    dedup_ttl: Duration,
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600))
    }
}

impl InMemoryLedger {
    pub fn new(dedup_ttl: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            dedup_ttl,
        }
    }

    /// Makes the next `count` saves fail without applying anything.
    pub async fn fail_next_writes(&self, count: u32) {
        self.state.lock().await.failing_writes = count;
    }

    /// Makes the next `count` successful saves report an error after they
    /// were applied, like a reply lost on the way back from the store.
    pub async fn lose_next_replies(&self, count: u32) {
        self.state.lock().await.lost_replies = count;
    }

    /// Every record in the log, ordered by timestamp.
    pub async fn records(&self) -> Vec<PaymentRecord> {
        let state = self.state.lock().await;
        state.log.values().flatten().cloned().collect()
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn save(
        &self,
        correlation_id: &str,
        processor: ProcessorType,
        amount: Decimal,
        timestamp: OffsetDateTime,
    ) -> Result<bool, StoreError> {
        let record = ledger_record(correlation_id, processor, amount, timestamp);
        let now = Instant::now();
        let mut state = self.state.lock().await;

        if state.failing_writes > 0 {
            state.failing_writes -= 1;
            return Err(StoreError::WriteFailed(format!(
                "injected failure recording {}",
                correlation_id
            )));
        }

        if state.holds_marker(correlation_id, now) {
            return Ok(false);
        }
        state
            .markers
            .insert(correlation_id.to_string(), now + self.dedup_ttl);

        let counter = state.counters.entry(processor).or_insert((0, 0));
        counter.0 += 1;
        counter.1 += to_cents(record.amount);
        state.log.entry(record.score()).or_default().push(record);

        if state.lost_replies > 0 {
            state.lost_replies -= 1;
            return Err(StoreError::WriteFailed(format!(
                "reply lost after recording {}",
                correlation_id
            )));
        }

        Ok(true)
    }

    async fn is_processed(&self, correlation_id: &str) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        Ok(state.holds_marker(correlation_id, Instant::now()))
    }

    async fn summary(
        &self,
        from: Option<OffsetDateTime>,
        to: Option<OffsetDateTime>,
    ) -> Result<PaymentsSummary, StoreError> {
        let state = self.state.lock().await;

        if is_unbounded(from, to) {
            let counters = |processor: ProcessorType| {
                let (requests, cents) = state.counters.get(&processor).copied().unwrap_or((0, 0));
                ProcessorSummary::from_counters(requests, cents)
            };
            return Ok(PaymentsSummary {
                default: counters(ProcessorType::Default),
                fallback: counters(ProcessorType::Fallback),
            });
        }

        let start = from.map(|t| Included(t.unix_timestamp())).unwrap_or(Unbounded);
        let end = to.map(|t| Included(t.unix_timestamp())).unwrap_or(Unbounded);

        if let (Included(start), Included(end)) = (start, end) {
            if start > end {
                return Ok(PaymentsSummary::default());
            }
        }

        Ok(PaymentsSummary::from_records(
            state.log.range((start, end)).flat_map(|(_, records)| records),
        ))
    }

    async fn purge_all(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.markers.clear();
        state.log.clear();
        state.counters.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use time::macros::datetime;

    const T0: OffsetDateTime = datetime!(2025-07-15 12:00:00 UTC);

    #[tokio::test]
    async fn first_writer_wins() {
        let ledger = InMemoryLedger::default();

        assert!(ledger.save("c1", ProcessorType::Default, dec!(19.90), T0).await.unwrap());
        assert!(!ledger.save("c1", ProcessorType::Fallback, dec!(19.90), T0).await.unwrap());
        assert!(ledger.is_processed("c1").await.unwrap());
        assert!(!ledger.is_processed("c2").await.unwrap());

        let summary = ledger.summary(None, None).await.unwrap();
        assert_eq!(summary.default.total_requests, 1);
        assert_eq!(summary.default.total_amount, dec!(19.90));
        assert_eq!(summary.fallback, ProcessorSummary::default());
        assert_eq!(ledger.records().await.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_saves_record_once() {
        let ledger = InMemoryLedger::default();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let ledger = ledger.clone();
                tokio::spawn(async move {
                    ledger.save("c2", ProcessorType::Default, dec!(10), T0).await.unwrap()
                })
            })
            .collect();

        let mut wins = 0;
        for handle in handles {
            if handle.await.unwrap() {
                wins += 1;
            }
        }

        assert_eq!(wins, 1);
        assert_eq!(ledger.summary(None, None).await.unwrap().default.total_requests, 1);
    }

    #[tokio::test]
    async fn range_scan_is_inclusive_and_matches_counters() {
        let ledger = InMemoryLedger::default();
        ledger.save("a", ProcessorType::Default, dec!(1.10), T0).await.unwrap();
        ledger
            .save("b", ProcessorType::Default, dec!(2.20), T0 + time::Duration::seconds(10))
            .await
            .unwrap();
        ledger
            .save("c", ProcessorType::Fallback, dec!(3.30), T0 + time::Duration::seconds(20))
            .await
            .unwrap();

        let window = ledger
            .summary(Some(T0), Some(T0 + time::Duration::seconds(10)))
            .await
            .unwrap();
        assert_eq!(window.default.total_requests, 2);
        assert_eq!(window.default.total_amount, dec!(3.30));
        assert_eq!(window.fallback.total_requests, 0);

        let open_ended = ledger
            .summary(Some(T0 + time::Duration::seconds(11)), None)
            .await
            .unwrap();
        assert_eq!(open_ended.default.total_requests, 0);
        assert_eq!(open_ended.fallback.total_amount, dec!(3.30));

        let everything = ledger.summary(None, Some(T0 + time::Duration::hours(1))).await.unwrap();
        assert_eq!(everything, ledger.summary(None, None).await.unwrap());

        let inverted = ledger
            .summary(Some(T0 + time::Duration::hours(1)), Some(T0))
            .await
            .unwrap();
        assert_eq!(inverted, PaymentsSummary::default());
    }

    #[tokio::test]
    async fn amounts_are_kept_in_cents() {
        let ledger = InMemoryLedger::default();
        ledger.save("a", ProcessorType::Default, dec!(0.105), T0).await.unwrap();

        assert_eq!(ledger.records().await[0].amount, dec!(0.11));
        assert_eq!(
            ledger.summary(None, None).await.unwrap().default.total_amount,
            dec!(0.11)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn marker_expires_after_ttl() {
        let ledger = InMemoryLedger::new(Duration::from_secs(60));
        ledger.save("c1", ProcessorType::Default, dec!(1), T0).await.unwrap();

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(ledger.is_processed("c1").await.unwrap());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!ledger.is_processed("c1").await.unwrap());
    }

    #[tokio::test]
    async fn retry_after_lost_reply_does_not_count_twice() {
        let ledger = InMemoryLedger::default();
        ledger.lose_next_replies(1).await;

        assert!(ledger.save("c1", ProcessorType::Default, dec!(5), T0).await.is_err());
        assert!(ledger.is_processed("c1").await.unwrap());
        assert!(!ledger.save("c1", ProcessorType::Default, dec!(5), T0).await.unwrap());

        let summary = ledger.summary(None, None).await.unwrap();
        assert_eq!(summary.default.total_requests, 1);
        assert_eq!(summary.default.total_amount, dec!(5));
        assert_eq!(ledger.records().await.len(), 1);
    }

    #[tokio::test]
    async fn stamps_are_kept_in_utc() {
        let ledger = InMemoryLedger::default();
        ledger
            .save("c1", ProcessorType::Default, dec!(1), datetime!(2025-07-15 14:00:00.5 +02:00))
            .await
            .unwrap();

        let record = &ledger.records().await[0];
        assert_eq!(record.timestamp, T0);
        assert_eq!(record.timestamp.offset(), time::UtcOffset::UTC);
    }

    #[tokio::test]
    async fn failed_write_leaves_no_claim() {
        let ledger = InMemoryLedger::default();
        ledger.fail_next_writes(1).await;

        assert!(ledger.save("c1", ProcessorType::Default, dec!(5), T0).await.is_err());
        assert!(!ledger.is_processed("c1").await.unwrap());
        assert!(ledger.save("c1", ProcessorType::Default, dec!(5), T0).await.unwrap());
        assert_eq!(ledger.summary(None, None).await.unwrap().default.total_requests, 1);
    }

    #[tokio::test]
    async fn purge_resets_everything() {
        let ledger = InMemoryLedger::default();
        ledger.save("c1", ProcessorType::Fallback, dec!(5), T0).await.unwrap();
        ledger.purge_all().await.unwrap();

        assert!(!ledger.is_processed("c1").await.unwrap());
        assert_eq!(ledger.summary(None, None).await.unwrap(), PaymentsSummary::default());
        assert!(ledger.records().await.is_empty());
    }
}
