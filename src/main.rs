use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use s3p_harness::cli::{self, Cli, Commands};
use s3p_harness::config::catalog::TridGenerator;
use s3p_harness::config::{Config, LogFormat};
use s3p_harness::report;
use s3p_harness::s3p::S3pClient;
use s3p_harness::services::{BatchOrchestrator, CallbackListener, TransactionMachine};

fn init_tracing(format: LogFormat, verbose: bool) {
    let default_level = if verbose { "s3p_harness=debug,info" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_level.into());

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    cli.apply_overrides(&mut config);

    init_tracing(config.log_format, cli.verbose);

    let command = cli.command();
    if command == Commands::Config {
        cli::handle_config(&config)?;
        return Ok(ExitCode::SUCCESS);
    }
    config.validate()?;

    let mut ids = TridGenerator::new(config.engine.trid_rules.clone());
    let requests = command.requests(&mut ids)?;
    if requests.is_empty() {
        tracing::warn!("nothing to run");
        return Ok(ExitCode::SUCCESS);
    }

    let client = S3pClient::with_circuit_breaker(
        config.s3p.base_url.clone(),
        config.s3p.credentials.clone(),
        config.s3p.request_timeout,
        config.s3p.breaker_threshold,
        config.s3p.breaker_reset_secs,
    );
    tracing::info!("S3P client initialized with URL: {}", config.s3p.base_url);

    let mut machine = TransactionMachine::new(Arc::new(client), config.engine.clone());

    let listener = if config.webhook.enabled {
        match CallbackListener::start(&config.webhook).await {
            Ok(listener) => Some(Arc::new(listener)),
            Err(e) => {
                tracing::warn!(error = %e, "callback listener unavailable, using polling only");
                None
            }
        }
    } else {
        None
    };
    if let Some(listener) = &listener {
        machine = machine.with_listener(listener.clone());
    }

    let orchestrator = BatchOrchestrator::new(machine, config.batch.clone());
    let summary = orchestrator
        .run_until(requests, async {
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        })
        .await;

    if let Some(listener) = &listener {
        listener.stop().await;
    }

    summary.log();
    let path = report::write_report(&config.report_dir, &summary.records)?;
    println!(
        "{} succeeded, {} failed, {} errored of {} ({})",
        summary.succeeded(),
        summary.failed(),
        summary.errored(),
        summary.total(),
        path.display()
    );

    Ok(if summary.all_succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
