use crate::payment::PaymentJob;
use crate::payment_message::{MessageError, PaymentMessage};
use async_trait::async_trait;
use deadpool_redis::Pool;
use redis::AsyncCommands;

pub const PAYMENTS_TOPIC: &str = "payments";

#[derive(Debug, thiserror::Error)]
pub enum PublisherError {
    #[error("could not encode job: {0}")]
    Encode(#[from] MessageError),
    #[error("no bus connection available: {0}")]
    Connection(#[from] deadpool_redis::PoolError),
    #[error("publish failed: {0}")]
    Publish(#[from] redis::RedisError),
}

/// Puts a job back on the bus so any worker in the fleet can pick it up.
#[async_trait]
pub trait JobPublisher: Send + Sync {
    async fn publish(&self, job: &PaymentJob) -> Result<(), PublisherError>;
}

pub struct RedisPublisher {
    pool: Pool,
    topic: String,
}

impl RedisPublisher {
    pub fn new(pool: Pool, topic: impl Into<String>) -> Self {
        Self {
            pool,
            topic: topic.into(),
        }
    }
}

#[async_trait]
impl JobPublisher for RedisPublisher {
    async fn publish(&self, job: &PaymentJob) -> Result<(), PublisherError> {
        let payload = PaymentMessage::from(job).encode()?;
        let mut conn = self.pool.get().await?;
        let receivers: i64 = conn.publish(&self.topic, payload).await?;

        if receivers == 0 {
            tracing::warn!(
                correlation_id = %job.correlation_id,
                topic = %self.topic,
                "Requeued job has no subscriber listening"
            );
        }
        Ok(())
    }
}
