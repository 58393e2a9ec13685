//! Configuration loading from environment.

use std::env;
use std::time::Duration;

use billing_types::Currency;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub paystack_secret_key: String,
    pub paystack_base_url: String,
    pub payment_callback_url: Option<String>,
    pub payout_currency: Currency,
    pub gateway_timeout: Duration,
    pub outbox_poll_interval: Duration,
    pub outbox_batch_size: i64,
    pub outbox_max_attempts: i32,
    pub log_format: LogFormat,
    /// OTLP collector; span export is off when unset.
    pub otlp_endpoint: Option<String>,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &str| {
            get(key).ok_or_else(|| anyhow::anyhow!("{} environment variable is required", key))
        };
        let parsed = |key: &str, default: &str| -> anyhow::Result<u64> {
            let raw = get(key).unwrap_or_else(|| default.to_string());
            raw.trim()
                .parse()
                .map_err(|e| anyhow::anyhow!("{} must be a positive integer: {}", key, e))
        };

        let port = get("PORT")
            .unwrap_or_else(|| "3000".to_string())
            .parse()
            .map_err(|e| anyhow::anyhow!("PORT is not a valid port: {}", e))?;

        let payout_currency = match get("PAYOUT_CURRENCY") {
            Some(code) => code
                .parse()
                .map_err(|e| anyhow::anyhow!("PAYOUT_CURRENCY: {}", e))?,
            None => Currency::default(),
        };

        let log_format = match get("LOG_FORMAT").as_deref() {
            Some(f) if f.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        let outbox_batch_size = parsed("OUTBOX_BATCH_SIZE", "10")?;
        let outbox_max_attempts = parsed("OUTBOX_MAX_ATTEMPTS", "5")?;
        if outbox_batch_size == 0 || outbox_max_attempts == 0 {
            anyhow::bail!("OUTBOX_BATCH_SIZE and OUTBOX_MAX_ATTEMPTS must be at least 1");
        }

        Ok(Self {
            port,
            database_url: required("DATABASE_URL")?,
            paystack_secret_key: required("PAYSTACK_SECRET_KEY")?,
            paystack_base_url: get("PAYSTACK_BASE_URL")
                .unwrap_or_else(|| billing_repo::paystack::DEFAULT_BASE_URL.to_string()),
            payment_callback_url: get("PAYMENT_CALLBACK_URL"),
            payout_currency,
            gateway_timeout: Duration::from_secs(parsed("GATEWAY_TIMEOUT_SECS", "15")?),
            outbox_poll_interval: Duration::from_millis(parsed("OUTBOX_POLL_INTERVAL_MS", "1000")?),
            outbox_batch_size: i64::try_from(outbox_batch_size)?,
            outbox_max_attempts: i32::try_from(outbox_max_attempts)?,
            log_format,
            otlp_endpoint: get("OTEL_EXPORTER_OTLP_ENDPOINT"),
        })
    }
}
