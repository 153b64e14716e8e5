//! Per-job dispatch: dedup check, default processor with linear backoff,
//! single fallback attempt, then requeue through the bus or drop.

use crate::config::WorkerConfig;
use crate::payment::PaymentJob;
use crate::payment_processor::{PaymentGateway, PaymentRequest};
use crate::processor_type::ProcessorType;
use crate::publisher::JobPublisher;
use crate::store::Ledger;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct DispatchPolicy {
    pub max_attempts: u32,
    pub backoff_step: Duration,
    pub max_retries: u32,
    pub save_attempts: u32,
    pub republish_attempts: u32,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self::from(&WorkerConfig::default())
    }
}

impl From<&WorkerConfig> for DispatchPolicy {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff_step: config.backoff_step(),
            max_retries: config.max_retries,
            save_attempts: config.save_attempts.max(1),
            republish_attempts: config.republish_attempts.max(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The gateway accepted the payment and this worker recorded it.
    Recorded(ProcessorType),
    /// The gateway accepted the payment but another worker recorded it first.
    AlreadyRecorded(ProcessorType),
    /// A retried job whose payment was already recorded; nothing was sent.
    AlreadyProcessed,
    /// Both processors failed; the job went back on the bus.
    Requeued { retry_count: u32 },
    /// Both processors failed and the retry budget is spent.
    Dropped,
    /// Both processors failed and the job could not be put back on the bus.
    RequeueFailed,
    /// The gateway accepted the payment but the ledger write kept failing.
    StoreFailed(ProcessorType),
}

/// Delay before the attempt following `attempt` (1-based).
pub fn backoff_delay(step: Duration, attempt: u32) -> Duration {
    step.saturating_mul(attempt)
}

pub struct Dispatcher {
    gateway: Arc<dyn PaymentGateway>,
    ledger: Arc<dyn Ledger>,
    publisher: Arc<dyn JobPublisher>,
    policy: DispatchPolicy,
}

impl Dispatcher {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        ledger: Arc<dyn Ledger>,
        publisher: Arc<dyn JobPublisher>,
        policy: DispatchPolicy,
    ) -> Self {
        Self {
            gateway,
            ledger,
            publisher,
            policy,
        }
    }

    pub async fn process(&self, job: PaymentJob) -> DispatchOutcome {
        if job.retry_count > self.policy.max_retries {
            tracing::error!(
                correlation_id = %job.correlation_id,
                retry_count = job.retry_count,
                max_retries = self.policy.max_retries,
                "Payment arrived past its retry budget, dropping it"
            );
            return DispatchOutcome::Dropped;
        }

        // First deliveries skip the lookup; Save still guards against duplicates.
        if job.retry_count > 0 && self.already_processed(&job).await {
            tracing::info!(
                correlation_id = %job.correlation_id,
                retry_count = job.retry_count,
                "Payment already processed, skipping"
            );
            return DispatchOutcome::AlreadyProcessed;
        }

        let request = PaymentRequest::from(&job);

        for attempt in 1..=self.policy.max_attempts {
            if self.try_processor(ProcessorType::Default, &request, attempt).await {
                return self.record(&job, ProcessorType::Default).await;
            }

            if attempt < self.policy.max_attempts {
                tokio::time::sleep(backoff_delay(self.policy.backoff_step, attempt)).await;
            }
        }

        if self.try_processor(ProcessorType::Fallback, &request, 1).await {
            return self.record(&job, ProcessorType::Fallback).await;
        }

        self.requeue(job).await
    }

    async fn already_processed(&self, job: &PaymentJob) -> bool {
        match self.ledger.is_processed(&job.correlation_id).await {
            Ok(processed) => processed,
            Err(e) => {
                tracing::warn!(
                    correlation_id = %job.correlation_id,
                    error = %e,
                    "Dedup lookup failed, dispatching anyway"
                );
                false
            }
        }
    }

    async fn try_processor(
        &self,
        processor: ProcessorType,
        request: &PaymentRequest,
        attempt: u32,
    ) -> bool {
        match self.gateway.submit(processor, request).await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(
                    correlation_id = %request.correlation_id,
                    %processor,
                    attempt,
                    error = %e,
                    "Payment processor call failed"
                );
                false
            }
        }
    }

    async fn record(&self, job: &PaymentJob, processor: ProcessorType) -> DispatchOutcome {
        for attempt in 1..=self.policy.save_attempts {
            let saved = self
                .ledger
                .save(&job.correlation_id, processor, job.amount, job.requested_at)
                .await;

            match saved {
                Ok(true) => {
                    tracing::info!(
                        correlation_id = %job.correlation_id,
                        %processor,
                        "Payment recorded"
                    );
                    return DispatchOutcome::Recorded(processor);
                }
                Ok(false) => {
                    tracing::info!(
                        correlation_id = %job.correlation_id,
                        %processor,
                        "Payment already recorded by another worker"
                    );
                    return DispatchOutcome::AlreadyRecorded(processor);
                }
                Err(e) if attempt < self.policy.save_attempts => {
                    tracing::warn!(
                        correlation_id = %job.correlation_id,
                        %processor,
                        attempt,
                        error = %e,
                        "Failed to record payment, retrying"
                    );
                    tokio::time::sleep(backoff_delay(self.policy.backoff_step, attempt)).await;
                }
                Err(e) => {
                    tracing::error!(
                        correlation_id = %job.correlation_id,
                        %processor,
                        amount = %job.amount,
                        error = %e,
                        "Payment accepted by processor but could not be recorded"
                    );
                }
            }
        }

        DispatchOutcome::StoreFailed(processor)
    }

    async fn requeue(&self, job: PaymentJob) -> DispatchOutcome {
        if job.retry_count >= self.policy.max_retries {
            tracing::error!(
                correlation_id = %job.correlation_id,
                retry_count = job.retry_count,
                "Both processors failed and retries are exhausted, dropping payment"
            );
            return DispatchOutcome::Dropped;
        }

        let next = job.requeued();

        for attempt in 1..=self.policy.republish_attempts {
            match self.publisher.publish(&next).await {
                Ok(()) => {
                    tracing::warn!(
                        correlation_id = %next.correlation_id,
                        retry_count = next.retry_count,
                        max_retries = self.policy.max_retries,
                        "Both processors failed, payment requeued"
                    );
                    return DispatchOutcome::Requeued {
                        retry_count: next.retry_count,
                    };
                }
                Err(e) if attempt < self.policy.republish_attempts => {
                    tracing::warn!(
                        correlation_id = %next.correlation_id,
                        attempt,
                        error = %e,
                        "Failed to requeue payment, retrying"
                    );
                    tokio::time::sleep(backoff_delay(self.policy.backoff_step, attempt)).await;
                }
                Err(e) => {
                    tracing::error!(
                        correlation_id = %next.correlation_id,
                        retry_count = next.retry_count,
                        error = %e,
                        "Could not requeue payment, dropping it"
                    );
                }
            }
        }

        DispatchOutcome::RequeueFailed
    }
}
