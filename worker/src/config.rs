use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} must be an integer, got {value:?}")]
    NotANumber { key: &'static str, value: String },
    #[error("{key} must be at least {min}, got {value}")]
    TooSmall {
        key: &'static str,
        min: u64,
        value: u64,
    },
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub redis_url: String,
    pub redis_pool_size: usize,
    pub num_workers: usize,
    pub job_channel_size: usize,
    pub max_attempts: u32,
    pub backoff_sleep_ms: u64,
    pub default_timeout_ms: u64,
    pub fallback_timeout_ms: u64,
    pub max_retries: u32,
    pub save_attempts: u32,
    pub republish_attempts: u32,
    pub dedup_ttl_secs: u64,
    pub default_processor_url: String,
    pub fallback_processor_url: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://redis:6379/0".to_string(),
            redis_pool_size: 10,
            num_workers: 10,
            job_channel_size: 1000,
            max_attempts: 3,
            backoff_sleep_ms: 2,
            default_timeout_ms: 300,
            fallback_timeout_ms: 100,
            max_retries: 3,
            save_attempts: 3,
            republish_attempts: 3,
            dedup_ttl_secs: 3600,
            default_processor_url: "http://payment-processor-default:8080".to_string(),
            fallback_processor_url: "http://payment-processor-fallback:8080".to_string(),
        }
    }
}

impl WorkerConfig {
    pub fn from_env() -> Result<WorkerConfig, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup; unset or empty keys keep
    /// their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<WorkerConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = WorkerConfig::default();
        let env = Env { lookup: &lookup };

        Ok(WorkerConfig {
            redis_url: env.string("REDIS_URL", defaults.redis_url),
            redis_pool_size: env.int(
                "WORKER_REDIS_POOL_SIZE",
                defaults.redis_pool_size as u64,
                1,
            )? as usize,
            num_workers: env.int("WORKER_POOL_SIZE", defaults.num_workers as u64, 1)? as usize,
            job_channel_size: env.int(
                "WORKER_JOB_CHANNEL_SIZE",
                defaults.job_channel_size as u64,
                1,
            )? as usize,
            max_attempts: env.int("WORKER_MAX_ATTEMPTS", defaults.max_attempts.into(), 1)? as u32,
            backoff_sleep_ms: env.int("WORKER_BACKOFF_SLEEP_MS", defaults.backoff_sleep_ms, 1)?,
            default_timeout_ms: env.int(
                "WORKER_DEFAULT_TIMEOUT_MS",
                defaults.default_timeout_ms,
                1,
            )?,
            fallback_timeout_ms: env.int(
                "WORKER_FALLBACK_TIMEOUT_MS",
                defaults.fallback_timeout_ms,
                1,
            )?,
            max_retries: env.int("WORKER_MAX_RETRIES", defaults.max_retries.into(), 0)? as u32,
            save_attempts: env.int("WORKER_SAVE_ATTEMPTS", defaults.save_attempts.into(), 1)?
                as u32,
            republish_attempts: env.int(
                "WORKER_REPUBLISH_ATTEMPTS",
                defaults.republish_attempts.into(),
                1,
            )? as u32,
            dedup_ttl_secs: env.int("WORKER_DEDUP_TTL_SECS", defaults.dedup_ttl_secs, 1)?,
            default_processor_url: env
                .string("DEFAULT_PROCESSOR_URL", defaults.default_processor_url),
            fallback_processor_url: env
                .string("FALLBACK_PROCESSOR_URL", defaults.fallback_processor_url),
        })
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn fallback_timeout(&self) -> Duration {
        Duration::from_millis(self.fallback_timeout_ms)
    }

    pub fn backoff_step(&self) -> Duration {
        Duration::from_millis(self.backoff_sleep_ms)
    }

    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_secs(self.dedup_ttl_secs)
    }
}

struct Env<'a, F> {
    lookup: &'a F,
}

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.trim().is_empty())
    }

    fn string(&self, key: &str, default: String) -> String {
        self.raw(key).unwrap_or(default)
    }

    fn int(&self, key: &'static str, default: u64, min: u64) -> Result<u64, ConfigError> {
        let value = match self.raw(key) {
            None => return Ok(default),
            Some(value) => value,
        };

        // u32 fields are narrowed by the caller, keep the parse in range for them
        let parsed = value
            .trim()
            .parse::<u32>()
            .map_err(|_| ConfigError::NotANumber {
                key,
                value: value.clone(),
            })? as u64;

        if parsed < min {
            return Err(ConfigError::TooSmall {
                key,
                min,
                value: parsed,
            });
        }

        Ok(parsed)
    }
}
