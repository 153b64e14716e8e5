use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::payment::PaymentJob;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Bounded queue between the receiver and the workers.
pub fn job_queue(capacity: usize) -> (mpsc::Sender<PaymentJob>, mpsc::Receiver<PaymentJob>) {
    mpsc::channel(capacity.max(1))
}

/// Fixed set of workers sharing one bounded job queue.
///
/// Workers stop once the queue is closed and empty, or once shutdown is
/// signalled and nothing is left to take. A job already taken always runs to
/// completion.
pub struct WorkerPool {
    num_workers: usize,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn start(
        num_workers: usize,
        receiver: mpsc::Receiver<PaymentJob>,
        dispatcher: Arc<Dispatcher>,
        shutdown: CancellationToken,
    ) -> Self {
        let receiver = Arc::new(Mutex::new(receiver));
        let num_workers = num_workers.max(1);

        let handles = (0..num_workers)
            .map(|worker_id| {
                let receiver = Arc::clone(&receiver);
                let dispatcher = Arc::clone(&dispatcher);
                let shutdown = shutdown.clone();

                tokio::spawn(async move {
                    Self::worker_loop(worker_id, receiver, dispatcher, shutdown).await;
                })
            })
            .collect();

        tracing::info!("Started {} workers", num_workers);

        Self {
            num_workers,
            handles,
        }
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Waits for every worker to exit.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Worker task ended abnormally");
            }
        }
        tracing::info!("All workers stopped");
    }

    async fn next_job(
        receiver: &Mutex<mpsc::Receiver<PaymentJob>>,
        shutdown: &CancellationToken,
    ) -> Option<PaymentJob> {
        let mut receiver = receiver.lock().await;

        // queued jobs win over shutdown so the queue drains first
        tokio::select! {
            biased;
            job = receiver.recv() => job,
            _ = shutdown.cancelled() => receiver.try_recv().ok(),
        }
    }

    async fn worker_loop(
        id: usize,
        receiver: Arc<Mutex<mpsc::Receiver<PaymentJob>>>,
        dispatcher: Arc<Dispatcher>,
        shutdown: CancellationToken,
    ) {
        tracing::debug!(worker_id = id, "Worker started");

        while let Some(job) = Self::next_job(&receiver, &shutdown).await {
            let correlation_id = job.correlation_id.clone();

            match dispatcher.process(job).await {
                DispatchOutcome::Recorded(_)
                | DispatchOutcome::AlreadyRecorded(_)
                | DispatchOutcome::AlreadyProcessed
                | DispatchOutcome::Requeued { .. } => {}
                outcome => {
                    tracing::debug!(
                        worker_id = id,
                        correlation_id = %correlation_id,
                        ?outcome,
                        "Job finished without a record"
                    );
                }
            }
        }

        tracing::info!(worker_id = id, "Worker shutting down - queue drained");
    }
}
