//! `harvest` - collect operational metrics from many sources and merge them into one
//! JSON document per (site, date, shift, plan type).

mod exit_codes;
mod logging;
mod sources;

use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

use harvest_core::app::{Orchestrator, TaskRegistry};
use harvest_core::config::{HarvestConfig, load_config};
use harvest_core::domain::RunParams;
use harvest_core::impls::{CsvMetricsSink, FileCredential, StaticCredential};
use harvest_core::ports::{CredentialHandle, SystemClock};
use harvest_core::store::merge_store::to_pretty_json;

use crate::sources::{SourceSpec, SpecFactory, load_sources};

#[derive(Parser)]
#[command(
    name = "harvest",
    version,
    about = "Concurrent metrics collection with credential-aware retry"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Collect the requested modules and merge them into the run's document.
    Run(RunArgs),
    /// Load and validate the configuration, then print what would run.
    CheckConfig {
        #[arg(long, default_value = "harvest.toml")]
        config: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    #[arg(long)]
    site: String,
    /// Start of shift (`YYYY-MM-DD HH:MM:SS`).
    #[arg(long)]
    sos: String,
    /// End of shift (`YYYY-MM-DD HH:MM:SS`).
    #[arg(long)]
    eos: String,
    #[arg(long)]
    plan_type: String,
    #[arg(long)]
    shift: String,
    /// Comma-separated module names; every configured source when omitted.
    #[arg(long, value_delimiter = ',')]
    modules: Vec<String>,
    #[arg(long, default_value = "harvest.toml")]
    config: PathBuf,
    #[arg(long)]
    max_workers: Option<usize>,
    /// Print the collected document to stdout instead of writing it.
    #[arg(long)]
    print_json: bool,
}

#[tokio::main]
async fn main() {
    logging::init();
    let code = match run(Cli::parse()).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::FATAL
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Run(args) => cmd_run(args).await,
        Command::CheckConfig { config } => cmd_check_config(&config),
    }
}

fn load(path: &Path) -> Result<(HarvestConfig, Vec<SourceSpec>)> {
    let config = load_config(path).with_context(|| format!("load config {}", path.display()))?;
    let specs = load_sources(path)?;
    Ok((config, specs))
}

fn cmd_check_config(path: &Path) -> Result<i32> {
    let (config, specs) = load(path)?;
    registry_from(&specs)?;
    println!("config: {}", path.display());
    println!("max_workers: {}", config.max_workers);
    println!("reauth_timeout_secs: {}", config.reauth_timeout_secs);
    for target in &config.targets {
        println!("target {}: {} ({:?})", target.name, target.root.display(), target.layout);
    }
    for spec in &specs {
        println!("source {}", spec.name);
    }
    Ok(exit_codes::OK)
}

fn registry_from(specs: &[SourceSpec]) -> Result<TaskRegistry> {
    let mut registry = TaskRegistry::new();
    for spec in specs {
        registry.register(Arc::new(SpecFactory::new(spec.clone())))?;
    }
    Ok(registry)
}

/// Anonymous when no credential is configured or every requested module is standalone.
fn credential_for(
    config: &HarvestConfig,
    specs: &[SourceSpec],
    requested: &BTreeSet<String>,
) -> Arc<dyn CredentialHandle> {
    let all_standalone = requested.iter().all(|name| {
        specs
            .iter()
            .any(|spec| &spec.name == name && spec.standalone)
    });
    match &config.credential {
        Some(credential) if !all_standalone => Arc::new(FileCredential::new(
            &credential.file,
            credential.refresh_command.clone(),
            config.credential_max_age(),
        )),
        _ => {
            info!("running without a session credential");
            Arc::new(StaticCredential::anonymous())
        }
    }
}

fn user_login() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

async fn cmd_run(args: RunArgs) -> Result<i32> {
    let (mut config, specs) = load(&args.config)?;
    if let Some(max_workers) = args.max_workers {
        config.max_workers = max_workers;
    }
    config.validate()?;

    let requested_modules = if args.modules.is_empty() {
        specs.iter().map(|s| s.name.clone()).collect()
    } else {
        args.modules.clone()
    };
    if requested_modules.is_empty() {
        bail!("no modules requested and no sources configured");
    }
    let params = RunParams {
        site: args.site,
        sos: args.sos,
        eos: args.eos,
        plan_type: args.plan_type,
        shift: args.shift,
        requested_modules,
    };

    let registry = registry_from(&specs)?;
    let credential = credential_for(&config, &specs, &params.requested());

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, no further modules will be scheduled");
            let _ = stop_tx.send(true);
        }
    });

    let clock = Arc::new(SystemClock);
    let mut orchestrator = Orchestrator::new(config.clone(), registry, credential)
        .with_clock(clock.clone())
        .with_user_login(user_login())
        .with_stop_signal(stop_rx);
    if let Some(sink) = CsvMetricsSink::from_config(&config.metrics, clock) {
        orchestrator = orchestrator.with_metrics(Arc::new(sink));
    }

    if args.print_json {
        let fragment = orchestrator.collect(&params).await?;
        let bytes = to_pretty_json(&fragment)?;
        std::io::stdout().write_all(&bytes).context("write stdout")?;
        return Ok(exit_codes::OK);
    }

    let summary = orchestrator.run(&params).await?;
    for (module, status) in &summary.statuses {
        info!(module = %module, %status, "module status");
    }
    match summary.path {
        Some(path) => {
            println!("{}", path.display());
            Ok(exit_codes::OK)
        }
        None => {
            eprintln!("no output target could be written for {}", summary.run_key);
            Ok(exit_codes::NOT_PERSISTED)
        }
    }
}
