//! Stake Batcher - stake CSV records on behalf of recipients

use alloy::primitives::utils::format_ether;
use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stake_batcher::amount::to_decimal_string;
use stake_batcher::cli::{Cli, OutputFormat};
use stake_batcher::prelude::*;
use stake_batcher::settings::RunConfig;
use stake_batcher::shutdown;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = RunConfig::from_cli(&cli).context("Failed to resolve configuration")?;

    let client = StakingClient::connect(config.client_config())
        .await
        .context("Failed to connect to staking contract")?;

    let context = RunContext::new(
        client.signer(),
        config.staking_contract,
        config.token_contract,
        config.network.clone(),
        config.rpc_url.clone(),
    )?;

    let cancel = CancellationToken::new();
    let stop = cancel.clone();
    tokio::spawn(async move {
        if shutdown::watch_interrupts(tokio::signal::ctrl_c, stop).await {
            std::process::exit(shutdown::FORCED_EXIT_CODE);
        }
    });

    info!(
        "Run {} on {} from {}",
        context.run_id,
        context.network,
        config.csv_path.display()
    );

    let mut coordinator =
        RunCoordinator::new(client, context, config.options.clone()).with_cancellation(cancel);
    let source = CsvRecordSource::new(&config.csv_path);

    if let Err(e) = coordinator.run(&source).await {
        tracing::error!("Run failed: {:#}", e);
    }

    let summary = coordinator.summary();
    match cli.output {
        OutputFormat::Text => print_summary(summary),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary.to_json())?),
    }

    std::process::exit(summary.exit_code());
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!("=== Stake run {} ===", summary.run_id);
    println!("State:            {:?}", summary.final_state);
    if let Some(reason) = &summary.abort_reason {
        println!("Abort reason:     {}", reason);
    }
    println!("Records:          {}", summary.total_records);
    println!(
        "Batches:          {} planned, {} succeeded, {} failed, {} skipped",
        summary.planned_batches,
        summary.successful_batches,
        summary.failed_batches,
        summary.skipped_batches
    );
    match summary.final_validation_passed {
        Some(true) => println!(
            "Final validation: passed ({} unreadable)",
            summary.final_validation_unknown
        ),
        Some(false) => println!("Final validation: MISMATCH"),
        None if summary.final_validation_unknown > 0 => println!(
            "Final validation: unknown ({} unreadable)",
            summary.final_validation_unknown
        ),
        None => println!("Final validation: not run"),
    }
    println!("Fees paid:        {}", format_ether(summary.total_fees_paid));
    println!(
        "Native balance:   {} -> {}",
        format_ether(summary.start_native_balance),
        summary
            .end_native_balance
            .map(format_ether)
            .unwrap_or_else(|| "?".to_string())
    );
    println!(
        "Token balance:    {} -> {}",
        to_decimal_string(summary.start_token_balance),
        summary
            .end_token_balance
            .map(to_decimal_string)
            .unwrap_or_else(|| "?".to_string())
    );
    if let Some(path) = &summary.success_log {
        println!("Success log:      {}", path.display());
    }
    if let Some(path) = &summary.failure_log {
        println!("Failure log:      {}", path.display());
    }
}
