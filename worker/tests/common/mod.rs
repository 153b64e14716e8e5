#![allow(dead_code)]

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use time::OffsetDateTime;
use time::macros::datetime;
use tokio::sync::Barrier;
use worker::dispatcher::{DispatchPolicy, Dispatcher};
use worker::payment::PaymentJob;
use worker::payment_processor::{PaymentGateway, PaymentProcessorError, PaymentRequest};
use worker::processor_type::ProcessorType;
use worker::publisher::{JobPublisher, PublisherError};
use worker::store::InMemoryLedger;

pub const REQUESTED_AT: OffsetDateTime = datetime!(2025-07-15 12:00:00 UTC);

pub fn job(correlation_id: &str, amount: Decimal, retry_count: u32) -> PaymentJob {
    PaymentJob {
        correlation_id: correlation_id.to_string(),
        amount,
        requested_at: REQUESTED_AT,
        retry_count,
    }
}

pub fn policy() -> DispatchPolicy {
    DispatchPolicy {
        max_attempts: 3,
        backoff_step: Duration::from_millis(2),
        max_retries: 3,
        save_attempts: 3,
        republish_attempts: 3,
    }
}

/// Answers per processor from a script, then with a fixed outcome.
struct Script {
    queued: VecDeque<bool>,
    then: bool,
}

impl Script {
    fn next(&mut self) -> bool {
        self.queued.pop_front().unwrap_or(self.then)
    }
}

pub struct ScriptedGateway {
    default: Mutex<Script>,
    fallback: Mutex<Script>,
    calls: Mutex<Vec<(ProcessorType, PaymentRequest)>>,
    barrier: Option<Barrier>,
}

impl ScriptedGateway {
    pub fn new(default_ok: bool, fallback_ok: bool) -> Self {
        Self::scripted(vec![], default_ok, vec![], fallback_ok)
    }

    pub fn scripted(
        default: Vec<bool>,
        default_then: bool,
        fallback: Vec<bool>,
        fallback_then: bool,
    ) -> Self {
        Self {
            default: Mutex::new(Script {
                queued: default.into(),
                then: default_then,
            }),
            fallback: Mutex::new(Script {
                queued: fallback.into(),
                then: fallback_then,
            }),
            calls: Mutex::new(Vec::new()),
            barrier: None,
        }
    }

    /// Holds every call until `parties` calls are in flight at once.
    pub fn with_barrier(mut self, parties: usize) -> Self {
        self.barrier = Some(Barrier::new(parties));
        self
    }

    pub fn calls(&self) -> Vec<ProcessorType> {
        self.calls.lock().unwrap().iter().map(|(p, _)| *p).collect()
    }

    pub fn requests(&self) -> Vec<PaymentRequest> {
        self.calls.lock().unwrap().iter().map(|(_, r)| r.clone()).collect()
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn submit(
        &self,
        processor: ProcessorType,
        request: &PaymentRequest,
    ) -> Result<(), PaymentProcessorError> {
        self.calls.lock().unwrap().push((processor, request.clone()));

        if let Some(barrier) = &self.barrier {
            barrier.wait().await;
        }

        let ok = match processor {
            ProcessorType::Default => self.default.lock().unwrap().next(),
            ProcessorType::Fallback => self.fallback.lock().unwrap().next(),
        };

        if ok {
            Ok(())
        } else {
            Err(PaymentProcessorError::Rejected(hyper::StatusCode::INTERNAL_SERVER_ERROR))
        }
    }
}

/// Keeps every published job; can be told to fail a number of publishes.
#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<PaymentJob>>,
    failures_left: Mutex<u32>,
    attempts: Mutex<u32>,
}

impl RecordingPublisher {
    pub fn failing(times: u32) -> Self {
        Self {
            failures_left: Mutex::new(times),
            ..Self::default()
        }
    }

    pub fn published(&self) -> Vec<PaymentJob> {
        self.published.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> u32 {
        *self.attempts.lock().unwrap()
    }
}

#[async_trait]
impl JobPublisher for RecordingPublisher {
    async fn publish(&self, job: &PaymentJob) -> Result<(), PublisherError> {
        *self.attempts.lock().unwrap() += 1;

        let mut failures_left = self.failures_left.lock().unwrap();
        if *failures_left > 0 {
            *failures_left -= 1;
            return Err(PublisherError::Publish(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "bus unreachable",
            ))));
        }
        drop(failures_left);

        self.published.lock().unwrap().push(job.clone());
        Ok(())
    }
}

pub struct Harness {
    pub gateway: Arc<ScriptedGateway>,
    pub ledger: Arc<InMemoryLedger>,
    pub publisher: Arc<RecordingPublisher>,
    pub dispatcher: Arc<Dispatcher>,
}

impl Harness {
    pub fn new(gateway: ScriptedGateway) -> Self {
        Self::with(gateway, InMemoryLedger::default(), RecordingPublisher::default(), policy())
    }

    pub fn with(
        gateway: ScriptedGateway,
        ledger: InMemoryLedger,
        publisher: RecordingPublisher,
        policy: DispatchPolicy,
    ) -> Self {
        let gateway = Arc::new(gateway);
        let ledger = Arc::new(ledger);
        let publisher = Arc::new(publisher);
        let dispatcher = Arc::new(Dispatcher::new(
            gateway.clone(),
            ledger.clone(),
            publisher.clone(),
            policy,
        ));

        Self {
            gateway,
            ledger,
            publisher,
            dispatcher,
        }
    }
}
