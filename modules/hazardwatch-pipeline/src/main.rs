use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use hazardwatch_common::{load_config, resolve_config_path, ConfigError, Secrets};
use hazardwatch_pipeline::notify::{DigestNotifier, DryRunNotifier, SlackWebhook};
use hazardwatch_pipeline::{JsonFileStore, MemoryStore, Pipeline, PipelineError, StateStore};
use hazardwatch_providers::build_adapters;

#[derive(Parser)]
#[command(
    name = "hazardwatch",
    version,
    about = "Digest of new and updated USGS earthquakes and NWS weather alerts"
)]
struct Cli {
    /// Path to config TOML file (default: $HAZARDWATCH_CONFIG, then ./config/hazardwatch.toml)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Run end to end but only log the digest; state is left untouched
    #[arg(long)]
    dry_run: bool,

    /// Print the effective configuration (secrets redacted) and exit
    #[arg(long)]
    print_config: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.json) {
        eprintln!("failed to initialize logging: {e:#}");
        return ExitCode::from(1);
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e @ PipelineError::LockConflict { .. }) => {
            info!("{e}, skipping this run");
            ExitCode::from(e.exit_code())
        }
        Err(e) => {
            error!(error = %e, "Hazardwatch run failed");
            ExitCode::from(e.exit_code())
        }
    }
}

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("hazardwatch=info".parse()?);
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<(), PipelineError> {
    let config_path = resolve_config_path(cli.config.as_deref());
    info!(config = %config_path.display(), "Loading config");
    let config = load_config(&config_path)?;
    let secrets = Secrets::from_env();

    if cli.print_config {
        let effective = serde_json::json!({
            "config_path": config_path,
            "config": config,
            "secrets": secrets.redacted(),
        });
        println!("{effective:#}");
        return Ok(());
    }

    let adapters = build_adapters(&config)
        .map_err(|e| ConfigError::Invalid(format!("could not build provider adapters: {e}")))?;

    // Dry runs classify against real state but never write it.
    let file_store = JsonFileStore::new(config.app.state_file.clone());
    let store: Box<dyn StateStore> = if cli.dry_run {
        Box::new(MemoryStore::with_snapshot(file_store.load()?))
    } else {
        Box::new(file_store)
    };

    let notifier: Box<dyn DigestNotifier> = if cli.dry_run {
        info!("Dry run: digest will be logged, not sent");
        Box::new(DryRunNotifier)
    } else {
        match &secrets.slack_webhook_url {
            Some(url) => {
                info!("Webhook notifications enabled");
                Box::new(
                    SlackWebhook::new(url.clone())
                        .map_err(|e| ConfigError::Invalid(format!("{e:#}")))?,
                )
            }
            None => {
                warn!("No SLACK_WEBHOOK_URL set, digests will only be logged");
                Box::new(DryRunNotifier)
            }
        }
    };

    let run_timeout_secs = config.app.run_timeout_secs;
    let pipeline = Pipeline::new(config, adapters, store, notifier);

    // Losing either race drops the run future before commit; the lock guard
    // goes with it.
    let report = tokio::select! {
        result = pipeline.run() => result?,
        _ = tokio::time::sleep(Duration::from_secs(run_timeout_secs)) => {
            return Err(PipelineError::RunTimeout { secs: run_timeout_secs });
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, abandoning run before commit");
            return Err(PipelineError::Interrupted);
        }
    };

    for failure in &report.provider_failures {
        warn!(
            provider = failure.provider.as_str(),
            retryable = failure.retryable,
            error = failure.error.as_str(),
            "Provider skipped this run"
        );
    }
    info!("Hazardwatch run finished. {report}");
    Ok(())
}
