use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::config::catalog::{self, TridGenerator};
use crate::config::Config;
use crate::domain::{ServiceType, TransactionRequest};
use crate::utils::sanitize::mask;

#[derive(Parser, Debug)]
#[command(name = "s3p-harness")]
#[command(about = "S3P payment API test harness", long_about = None)]
pub struct Cli {
    /// Debug logging, including sanitized callback bodies
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Wait for S3P callbacks before falling back to polling
    #[arg(long, global = true)]
    pub webhook: bool,

    /// Preferred callback listener port
    #[arg(long, global = true, value_name = "PORT")]
    pub webhook_port: Option<u16>,

    /// Public URL S3P should call back (e.g. a tunnel)
    #[arg(long, global = true, value_name = "URL")]
    pub webhook_url: Option<String>,

    /// Transactions in flight at once
    #[arg(long, global = true, value_name = "N")]
    pub concurrency: Option<usize>,

    #[arg(long, global = true, value_name = "DIR")]
    pub report_dir: Option<PathBuf>,

    /// S3P base URL
    #[arg(long, global = true)]
    pub url: Option<String>,

    #[arg(long, global = true)]
    pub key: Option<String>,

    #[arg(long, global = true)]
    pub secret: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Commands {
    /// Run one cash-in, one cash-out and one top-up (default)
    Default,

    /// Run the transactions listed in a JSON file
    Batch {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Run a single transaction
    Single {
        /// cashin, cashout, topup, product, subscription or bill
        #[arg(value_name = "SERVICE_TYPE")]
        service_type: ServiceType,

        /// Defaults to the service's first recommended amount
        #[arg(value_name = "AMOUNT")]
        amount: Option<u64>,

        #[arg(long)]
        service_id: Option<String>,

        #[arg(long)]
        service_number: Option<String>,

        /// Generated when omitted
        #[arg(long)]
        transaction_id: Option<String>,
    },

    /// Every service type at its first two recommended amounts
    Suite,

    /// Many cash-in transactions at the default amount
    Stress {
        #[arg(short, long, default_value_t = 10)]
        count: usize,
    },

    /// Print the effective configuration
    Config,
}

impl Cli {
    /// Flags win over environment values.
    pub fn apply_overrides(&self, config: &mut Config) {
        if self.verbose {
            config.webhook.log_bodies = true;
        }
        if self.webhook {
            config.webhook.enabled = true;
        }
        if let Some(port) = self.webhook_port {
            config.webhook.port = port;
        }
        if let Some(url) = &self.webhook_url {
            config.webhook.public_url = Some(url.clone());
        }
        if let Some(concurrency) = self.concurrency {
            config.batch.concurrency = concurrency;
        }
        if let Some(dir) = &self.report_dir {
            config.report_dir = dir.clone();
        }
        if let Some(url) = &self.url {
            config.s3p.base_url = url.clone();
        }
        if let Some(key) = &self.key {
            config.s3p.credentials.key = key.clone();
        }
        if let Some(secret) = &self.secret {
            config.s3p.credentials.secret = secret.clone();
        }
    }

    pub fn command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Default)
    }
}

impl Commands {
    /// Requests to run for this command. `Config` runs nothing.
    pub fn requests(&self, ids: &mut TridGenerator) -> anyhow::Result<Vec<TransactionRequest>> {
        match self {
            Commands::Default => Ok(catalog::default_set(ids)),
            Commands::Batch { file } => load_batch_file(file, ids),
            Commands::Single {
                service_type,
                amount,
                service_id,
                service_number,
                transaction_id,
            } => {
                let trid = transaction_id
                    .clone()
                    .unwrap_or_else(|| ids.generate(*service_type));
                let mut request = catalog::request_for(*service_type, *amount, trid);
                if let Some(service_id) = service_id {
                    request.service_id = service_id.clone();
                }
                if let Some(service_number) = service_number {
                    request.service_number = service_number.clone();
                }
                Ok(vec![request])
            }
            Commands::Suite => Ok(catalog::suite(ids)),
            Commands::Stress { count } => Ok(catalog::stress(ids, *count)),
            Commands::Config => Ok(Vec::new()),
        }
    }
}

/// One entry of a batch file. Only the service type is required; the rest
/// falls back to the built-in service defaults.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BatchEntry {
    service_type: ServiceType,
    #[serde(default)]
    amount: Option<u64>,
    #[serde(default)]
    service_id: Option<String>,
    #[serde(default)]
    service_number: Option<String>,
    #[serde(default)]
    transaction_id: Option<String>,
    #[serde(default)]
    customer_phone: Option<String>,
    #[serde(default)]
    customer_email: Option<String>,
    #[serde(default)]
    customer_name: Option<String>,
    #[serde(default)]
    customer_address: Option<String>,
}

impl BatchEntry {
    fn into_request(self, ids: &mut TridGenerator) -> TransactionRequest {
        let trid = self
            .transaction_id
            .unwrap_or_else(|| ids.generate(self.service_type));
        let mut request = catalog::request_for(self.service_type, self.amount, trid);
        if let Some(v) = self.service_id {
            request.service_id = v;
        }
        if let Some(v) = self.service_number {
            request.service_number = v;
        }
        if let Some(v) = self.customer_phone {
            request.customer.customer_phone = v;
        }
        if let Some(v) = self.customer_email {
            request.customer.customer_email = v;
        }
        if let Some(v) = self.customer_name {
            request.customer.customer_name = v;
        }
        if let Some(v) = self.customer_address {
            request.customer.customer_address = v;
        }
        request
    }
}

pub fn load_batch_file(path: &Path, ids: &mut TridGenerator) -> anyhow::Result<Vec<TransactionRequest>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read batch file {}", path.display()))?;
    let entries: Vec<BatchEntry> = serde_json::from_str(&raw)
        .with_context(|| format!("batch file {} is not a JSON list of transactions", path.display()))?;

    Ok(entries
        .into_iter()
        .map(|entry| entry.into_request(ids))
        .collect())
}

pub fn handle_config(config: &Config) -> anyhow::Result<()> {
    tracing::info!("Validating configuration...");

    println!("Configuration:");
    println!("  S3P URL: {}", config.s3p.base_url);
    println!("  S3P Key: {}", mask(&config.s3p.credentials.key));
    println!("  S3P Secret: {}", mask(&config.s3p.credentials.secret));
    println!("  Request Timeout: {:?}", config.s3p.request_timeout);
    println!("  Webhook: {}", if config.webhook.enabled { "enabled" } else { "disabled" });
    println!("  Webhook Port: {}", config.webhook.port);
    if let Some(url) = &config.webhook.public_url {
        println!("  Webhook URL: {}", url);
    }
    println!("  Callback Wait: {:?}", config.engine.callback_wait);
    println!(
        "  Poll: {} attempt(s), first after {:?} ({:?} for cashout)",
        config.engine.poll.max_attempts,
        config.engine.initial_poll_delay,
        config.engine.cashout_initial_poll_delay
    );
    println!("  Poll Backoff Budget: {:?}", config.engine.poll.total_delay());
    println!("  Concurrency: {}", config.batch.concurrency);
    println!("  Report Dir: {}", config.report_dir.display());

    config.validate()?;
    tracing::info!("Configuration is valid");
    println!("✓ Configuration is valid");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::TridRules;
    use std::io::Write;

    #[test]
    fn test_no_subcommand_means_default() {
        let cli = Cli::try_parse_from(["s3p-harness"]).unwrap();
        assert_eq!(cli.command(), Commands::Default);
    }

    #[test]
    fn test_single_parses_service_type_and_amount() {
        let cli = Cli::try_parse_from(["s3p-harness", "single", "product", "15000", "--webhook"]).unwrap();
        assert!(cli.webhook);
        assert_eq!(
            cli.command(),
            Commands::Single {
                service_type: ServiceType::Product,
                amount: Some(15000),
                service_id: None,
                service_number: None,
                transaction_id: None,
            }
        );
        assert!(Cli::try_parse_from(["s3p-harness", "single", "lottery"]).is_err());
    }

    #[test]
    fn test_single_builds_request_with_overrides() {
        let cli = Cli::try_parse_from([
            "s3p-harness",
            "single",
            "cashin",
            "--service-id",
            "30052",
            "--transaction-id",
            "JAYCASHIN17000000000099",
        ])
        .unwrap();
        let mut ids = TridGenerator::new(TridRules::default());

        let requests = cli.command().requests(&mut ids).unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].service_id, "30052");
        assert_eq!(requests[0].amount, 1000);
        assert_eq!(requests[0].transaction_id, "JAYCASHIN17000000000099");
    }

    #[test]
    fn test_global_flags_override_config() {
        let cli = Cli::try_parse_from([
            "s3p-harness",
            "suite",
            "--verbose",
            "--webhook-port",
            "9000",
            "--concurrency",
            "4",
            "--key",
            "k",
            "--secret",
            "s",
        ])
        .unwrap();
        let mut config = Config::from_env().unwrap();
        cli.apply_overrides(&mut config);

        assert_eq!(config.webhook.port, 9000);
        assert!(config.webhook.log_bodies);
        assert_eq!(config.batch.concurrency, 4);
        assert_eq!(config.s3p.credentials.key, "k");
        assert_eq!(config.s3p.credentials.secret, "s");
    }

    #[test]
    fn test_batch_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[
                {{"service_type": "cashin", "amount": 2000, "transaction_id": "JAYCASHIN17000000000042"}},
                {{"service_type": "product"}}
            ]"#
        )
        .unwrap();
        let mut ids = TridGenerator::new(TridRules::default());

        let requests = load_batch_file(file.path(), &mut ids).unwrap();

        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].amount, 2000);
        assert_eq!(requests[0].service_id, "20052");
        assert_eq!(requests[1].service_id, "90006");
        assert_eq!(requests[1].amount, 10000);
        assert!(requests[1].transaction_id.starts_with("JAYPRODUCT"));
    }

    #[test]
    fn test_batch_file_rejects_garbage() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"service_type": "cashin"}}"#).unwrap();
        let mut ids = TridGenerator::new(TridRules::default());
        assert!(load_batch_file(file.path(), &mut ids).is_err());
    }
}
