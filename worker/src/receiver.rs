use crate::payment::{PaymentJob, utc_now_seconds};
use crate::payment_message::PaymentMessage;
use futures_util::{Stream, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum ReceiverError {
    #[error("bus subscription failed: {0}")]
    Subscribe(#[from] redis::RedisError),
}

/// Why [`Receiver::forward`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardEnd {
    Shutdown,
    StreamClosed,
    QueueClosed,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ForwardStats {
    pub submitted: u64,
    pub discarded: u64,
}

/// Sole consumer of the payments topic; feeds the bounded job queue.
pub struct Receiver {
    client: redis::Client,
    topic: String,
}

impl Receiver {
    pub fn new(client: redis::Client, topic: impl Into<String>) -> Self {
        Self {
            client,
            topic: topic.into(),
        }
    }

    /// Runs until shutdown, resubscribing whenever the subscription drops.
    pub async fn start(self, jobs: mpsc::Sender<PaymentJob>, shutdown: CancellationToken) {
        tracing::info!(topic = %self.topic, "Starting receiver");
        let mut stats = ForwardStats::default();

        loop {
            match self.subscribe_and_forward(&jobs, &shutdown, &mut stats).await {
                Ok(ForwardEnd::Shutdown) | Ok(ForwardEnd::QueueClosed) => break,
                Ok(ForwardEnd::StreamClosed) => {
                    tracing::warn!(topic = %self.topic, "Bus subscription closed, resubscribing");
                }
                Err(e) => {
                    tracing::warn!(topic = %self.topic, error = %e, "Failed to subscribe, retrying");
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(RESUBSCRIBE_DELAY) => {}
            }
        }

        tracing::info!(
            submitted = stats.submitted,
            discarded = stats.discarded,
            "Receiver stopped"
        );
    }

    async fn subscribe_and_forward(
        &self,
        jobs: &mpsc::Sender<PaymentJob>,
        shutdown: &CancellationToken,
        stats: &mut ForwardStats,
    ) -> Result<ForwardEnd, ReceiverError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(&self.topic).await?;
        tracing::info!(topic = %self.topic, "Subscribed to bus");

        let messages = pubsub
            .on_message()
            .map(|msg| msg.get_payload_bytes().to_vec());

        Ok(Self::forward(messages, jobs, shutdown, stats).await)
    }

    /// Moves raw bus payloads into the job queue until the stream ends, the
    /// queue closes or shutdown is signalled.
    ///
    /// Malformed payloads are logged and skipped. A full queue blocks the
    /// forwarder instead of dropping the job.
    pub async fn forward<S>(
        messages: S,
        jobs: &mpsc::Sender<PaymentJob>,
        shutdown: &CancellationToken,
        stats: &mut ForwardStats,
    ) -> ForwardEnd
    where
        S: Stream<Item = Vec<u8>>,
    {
        futures_util::pin_mut!(messages);

        loop {
            let payload = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return ForwardEnd::Shutdown,
                payload = messages.next() => match payload {
                    Some(payload) => payload,
                    None => return ForwardEnd::StreamClosed,
                },
            };

            let job = match PaymentMessage::decode(&payload) {
                Ok(msg) => msg.into_job(utc_now_seconds()),
                Err(e) => {
                    stats.discarded += 1;
                    tracing::warn!(
                        error = %e,
                        payload = %String::from_utf8_lossy(&payload),
                        "Discarding bus message"
                    );
                    continue;
                }
            };

            let correlation_id = job.correlation_id.clone();
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return ForwardEnd::Shutdown,
                sent = jobs.send(job) => {
                    if sent.is_err() {
                        tracing::warn!(correlation_id = %correlation_id, "Job queue closed");
                        return ForwardEnd::QueueClosed;
                    }
                }
            }

            stats.submitted += 1;
            tracing::debug!(correlation_id = %correlation_id, "Submitted job to worker pool");
        }
    }
}
