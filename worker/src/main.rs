use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use worker::config::WorkerConfig;
use worker::dispatcher::{DispatchPolicy, Dispatcher};
use worker::payment_processor::{HttpPaymentGateway, PaymentProcessor};
use worker::publisher::{PAYMENTS_TOPIC, RedisPublisher};
use worker::receiver::Receiver;
use worker::store::RedisLedger;
use worker::worker_pool::{WorkerPool, job_queue};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize tracing with default level WARN, overridable via RUST_LOG
    {
        use tracing_subscriber::{EnvFilter, fmt};
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = fmt().with_env_filter(env_filter).try_init();
    }

    let config = WorkerConfig::from_env()?;
    tracing::warn!(
        redis_pool_size = config.redis_pool_size,
        num_workers = config.num_workers,
        job_channel_size = config.job_channel_size,
        max_attempts = config.max_attempts,
        max_retries = config.max_retries,
        "Payment worker starting"
    );

    let mut redis_config = deadpool_redis::Config::from_url(config.redis_url.clone());
    redis_config.pool = Some(deadpool_redis::PoolConfig::new(config.redis_pool_size));
    let pool = redis_config.create_pool(Some(deadpool_redis::Runtime::Tokio1))?;

    {
        let mut conn = pool.get().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
    }

    let gateway = Arc::new(HttpPaymentGateway::new(
        PaymentProcessor::new(&config.default_processor_url, config.default_timeout()),
        PaymentProcessor::new(&config.fallback_processor_url, config.fallback_timeout()),
    ));
    let ledger = Arc::new(RedisLedger::new(pool.clone(), config.dedup_ttl()));
    let publisher = Arc::new(RedisPublisher::new(pool.clone(), PAYMENTS_TOPIC));
    let dispatcher = Arc::new(Dispatcher::new(
        gateway,
        ledger,
        publisher,
        DispatchPolicy::from(&config),
    ));

    let shutdown = CancellationToken::new();
    let (sender, receiver) = job_queue(config.job_channel_size);

    let worker_pool = WorkerPool::start(config.num_workers, receiver, dispatcher, shutdown.clone());

    let bus = redis::Client::open(config.redis_url.as_str())?;
    let receiver_task = tokio::spawn(Receiver::new(bus, PAYMENTS_TOPIC).start(sender, shutdown.clone()));

    wait_for_signal().await?;
    tracing::warn!("Shutting down gracefully");
    shutdown.cancel();

    if let Err(e) = receiver_task.await {
        tracing::error!(error = %e, "Receiver task ended abnormally");
    }
    worker_pool.join().await;

    tracing::warn!("Worker shutdown complete");
    Ok(())
}

async fn wait_for_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res,
        _ = terminate.recv() => Ok(()),
    }
}
