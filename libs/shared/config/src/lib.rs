use std::env;
use std::str::FromStr;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_service_key: String,
    pub jwt_secret: String,
    pub redis_url: String,
    pub cache_ttl_seconds: u64,
    pub queue_max_retry: u32,
    pub appointment_queue_concurrency: usize,
    pub email_queue_concurrency: usize,
    pub worker_poll_interval_ms: u64,
    pub worker_error_backoff_ms: u64,
    pub job_timeout_seconds: u64,
    pub shutdown_timeout_seconds: u64,
    pub slot_lock_ttl_seconds: u64,
    pub api_port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            supabase_url: String::new(),
            supabase_service_key: String::new(),
            jwt_secret: String::new(),
            redis_url: "redis://localhost:6379".to_string(),
            cache_ttl_seconds: 300,
            queue_max_retry: 5,
            appointment_queue_concurrency: 10,
            email_queue_concurrency: 5,
            worker_poll_interval_ms: 200,
            worker_error_backoff_ms: 2000,
            job_timeout_seconds: 120,
            shutdown_timeout_seconds: 30,
            slot_lock_ttl_seconds: 30,
            api_port: 3000,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_service_key: env::var("SUPABASE_SERVICE_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_SERVICE_KEY not set, using empty value");
                    String::new()
                }),
            jwt_secret: env::var("JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("JWT_SECRET not set, using empty value");
                    String::new()
                }),
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| {
                    warn!("REDIS_URL not set, using default");
                    defaults.redis_url.clone()
                }),
            cache_ttl_seconds: parse_var("CACHE_TTL_SECONDS", defaults.cache_ttl_seconds),
            queue_max_retry: parse_var("QUEUE_MAX_RETRY", defaults.queue_max_retry),
            appointment_queue_concurrency: parse_var(
                "APPOINTMENT_QUEUE_CONCURRENCY",
                defaults.appointment_queue_concurrency,
            ),
            email_queue_concurrency: parse_var("EMAIL_QUEUE_CONCURRENCY", defaults.email_queue_concurrency),
            worker_poll_interval_ms: parse_var("WORKER_POLL_INTERVAL_MS", defaults.worker_poll_interval_ms),
            worker_error_backoff_ms: parse_var("WORKER_ERROR_BACKOFF_MS", defaults.worker_error_backoff_ms),
            job_timeout_seconds: parse_var("JOB_TIMEOUT_SECONDS", defaults.job_timeout_seconds),
            shutdown_timeout_seconds: parse_var("SHUTDOWN_TIMEOUT_SECONDS", defaults.shutdown_timeout_seconds),
            slot_lock_ttl_seconds: parse_var("SLOT_LOCK_TTL_SECONDS", defaults.slot_lock_ttl_seconds),
            api_port: parse_var("API_PORT", defaults.api_port),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_service_key.is_empty()
            && !self.jwt_secret.is_empty()
    }
}

fn parse_var<T: FromStr + Copy + std::fmt::Display>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has invalid value '{}', using default {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}
