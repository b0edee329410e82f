use anyhow::Context;
use dotenvy::dotenv;
use std::env;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::s3p::signer::Credentials;
use crate::services::retry::RetryPolicy;
use crate::validation::{TridRules, DEFAULT_TRID_MIN_LEN, DEFAULT_TRID_PREFIX};

pub mod catalog;

pub const DEFAULT_S3P_URL: &str = "https://s3p.smobilpay.staging.maviance.info/v2";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => anyhow::bail!("LOG_FORMAT must be 'text' or 'json', got '{}'", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct S3pSettings {
    pub base_url: String,
    pub credentials: Credentials,
    pub request_timeout: Duration,
    pub breaker_threshold: u32,
    pub breaker_reset_secs: u64,
}

#[derive(Debug, Clone)]
pub struct WebhookSettings {
    pub enabled: bool,
    pub bind_addr: IpAddr,
    pub port: u16,
    pub bind_attempts: u16,
    pub public_url: Option<String>,
    pub log_bodies: bool,
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8085,
            bind_attempts: 10,
            public_url: None,
            log_bodies: false,
        }
    }
}

/// Knobs of the transaction state machine.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub trid_rules: TridRules,
    pub quote_retry: RetryPolicy,
    pub collect_retry: RetryPolicy,
    pub poll: RetryPolicy,
    pub callback_wait: Duration,
    pub initial_poll_delay: Duration,
    pub cashout_initial_poll_delay: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            trid_rules: TridRules::default(),
            quote_retry: RetryPolicy::new(3, Duration::from_millis(500), 2.0, Duration::from_secs(10)),
            collect_retry: RetryPolicy::new(2, Duration::from_secs(1), 2.0, Duration::from_secs(10)),
            poll: RetryPolicy::new(12, Duration::from_secs(5), 1.5, Duration::from_secs(60)),
            callback_wait: Duration::from_secs(60),
            initial_poll_delay: Duration::from_secs(20),
            cashout_initial_poll_delay: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub concurrency: usize,
    pub delay: Duration,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            concurrency: 1,
            delay: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub s3p: S3pSettings,
    pub webhook: WebhookSettings,
    pub engine: EngineSettings,
    pub batch: BatchSettings,
    pub report_dir: PathBuf,
    pub log_format: LogFormat,
}

fn var_or<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{} is invalid: {}", name, e)),
        _ => Ok(default),
    }
}

fn secs(name: &str, default: u64) -> anyhow::Result<Duration> {
    Ok(Duration::from_secs(var_or(name, default)?))
}

fn millis(name: &str, default: u64) -> anyhow::Result<Duration> {
    Ok(Duration::from_millis(var_or(name, default)?))
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok(); // Load .env file if present

        let engine_defaults = EngineSettings::default();

        let poll_max_delay = secs("POLL_MAX_DELAY_SECS", 60)?;
        let poll = RetryPolicy::new(
            var_or("POLL_MAX_ATTEMPTS", engine_defaults.poll.max_attempts)?,
            secs("POLL_INTERVAL_SECS", 5)?,
            engine_defaults.poll.multiplier,
            poll_max_delay,
        );
        let quote_retry = RetryPolicy::new(
            var_or("QUOTE_MAX_ATTEMPTS", engine_defaults.quote_retry.max_attempts)?,
            millis("QUOTE_BASE_DELAY_MS", 500)?,
            engine_defaults.quote_retry.multiplier,
            engine_defaults.quote_retry.max_delay,
        );
        let collect_retry = RetryPolicy::new(
            var_or("COLLECT_MAX_ATTEMPTS", engine_defaults.collect_retry.max_attempts)?,
            millis("COLLECT_BASE_DELAY_MS", 1000)?,
            engine_defaults.collect_retry.multiplier,
            engine_defaults.collect_retry.max_delay,
        );

        Ok(Config {
            s3p: S3pSettings {
                base_url: var_or("S3P_URL", DEFAULT_S3P_URL.to_string())?,
                credentials: Credentials::new(
                    env::var("S3P_KEY").unwrap_or_default(),
                    env::var("S3P_SECRET").unwrap_or_default(),
                ),
                request_timeout: secs("S3P_REQUEST_TIMEOUT_SECS", 30)?,
                breaker_threshold: var_or("S3P_BREAKER_THRESHOLD", 5)?,
                breaker_reset_secs: var_or("S3P_BREAKER_RESET_SECS", 30)?,
            },
            webhook: WebhookSettings {
                enabled: var_or("WEBHOOK_ENABLED", false)?,
                bind_addr: var_or("WEBHOOK_BIND_ADDR", IpAddr::V4(Ipv4Addr::UNSPECIFIED))?,
                port: var_or("WEBHOOK_PORT", 8085)?,
                bind_attempts: var_or("WEBHOOK_BIND_ATTEMPTS", 10)?,
                public_url: env::var("WEBHOOK_PUBLIC_URL").ok().filter(|s| !s.trim().is_empty()),
                log_bodies: false,
            },
            engine: EngineSettings {
                trid_rules: TridRules {
                    prefix: var_or("TRID_PREFIX", DEFAULT_TRID_PREFIX.to_string())?,
                    min_len: var_or("TRID_MIN_LEN", DEFAULT_TRID_MIN_LEN)?,
                },
                quote_retry,
                collect_retry,
                poll,
                callback_wait: secs("CALLBACK_WAIT_SECS", 60)?,
                initial_poll_delay: secs("POLL_INITIAL_DELAY_SECS", 20)?,
                cashout_initial_poll_delay: secs("CASHOUT_POLL_INITIAL_DELAY_SECS", 120)?,
            },
            batch: BatchSettings {
                concurrency: var_or("BATCH_CONCURRENCY", 1usize)?,
                delay: millis("BATCH_DELAY_MS", 2000)?,
            },
            report_dir: PathBuf::from(var_or("REPORT_DIR", ".".to_string())?),
            log_format: var_or("LOG_FORMAT", LogFormat::Text)?,
        })
    }

    /// Checks what `from_env` cannot: values that CLI flags may still fill in.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.s3p.credentials.key.trim().is_empty() || self.s3p.credentials.secret.trim().is_empty() {
            anyhow::bail!(
                "S3P API key and secret are required. Set S3P_KEY/S3P_SECRET or pass --key/--secret"
            );
        }
        url::Url::parse(&self.s3p.base_url)
            .with_context(|| format!("S3P_URL '{}' is not a valid URL", self.s3p.base_url))?;
        if let Some(public_url) = &self.webhook.public_url {
            url::Url::parse(public_url)
                .with_context(|| format!("WEBHOOK_PUBLIC_URL '{}' is not a valid URL", public_url))?;
        }
        if self.batch.concurrency == 0 {
            anyhow::bail!("BATCH_CONCURRENCY must be at least 1");
        }
        if self.engine.trid_rules.prefix.is_empty() {
            anyhow::bail!("TRID_PREFIX must not be empty");
        }
        Ok(())
    }
}
