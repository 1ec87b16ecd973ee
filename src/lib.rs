// src/lib.rs

pub mod cli;
pub mod config;
pub mod environment;
pub mod errors;
pub mod exec;
pub mod external;
pub mod fs;
pub mod logging;
pub mod project;
pub mod runner;
pub mod types;

use anyhow::{Result, bail};
use tracing::{info, warn};

use crate::cli::CliArgs;
use crate::config::{BackendConfig, RunSettings, load_backend_config, resolve_tracking_uri};
use crate::exec::RunHandle;
use crate::external::Services;
use crate::runner::{LocalRunner, RunPlan, RunRequest, cancel_and_record, wait_and_record};
use crate::types::RunStatus;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - backend config loading and CLI overrides
/// - tracking settings and default collaborators
/// - the local runner
/// - waiting on the run, with Ctrl-C cancelling it
pub async fn run(args: CliArgs) -> Result<()> {
    let base = match &args.backend_config {
        Some(path) => load_backend_config(path)?,
        None => BackendConfig::default(),
    };
    let config = args.apply_to(base);

    let settings = RunSettings::new(
        resolve_tracking_uri(args.tracking_uri.as_deref())?,
        args.experiment_id.clone(),
    );
    let services = Services::local(&settings)?;
    let runner = LocalRunner::new(services.clone(), settings);

    let mut request = RunRequest::new(&args.uri, &args.entry_point);
    request.params = args.user_params();
    request.version = args.version.clone();

    if args.dry_run {
        let plan = runner.plan(&request, &config)?;
        print_dry_run(&plan);
        return Ok(());
    }

    let mut handle = runner.run(&request, &config).await?;

    if !config.synchronous {
        println!(
            "run {} launched in the background (pid {})",
            handle.run_id(),
            handle
                .pid()
                .map(|p| p.to_string())
                .unwrap_or_else(|| "unknown".to_string())
        );
        return Ok(());
    }

    let status = tokio::select! {
        status = wait_and_record(&mut handle, &services) => status?,
        signal = tokio::signal::ctrl_c() => match signal {
            Ok(()) => {
                info!(run_id = %handle.run_id(), "interrupted; cancelling run");
                cancel_and_record(&mut handle, &services).await?
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for Ctrl+C");
                wait_and_record(&mut handle, &services).await?
            }
        },
    };

    match status {
        RunStatus::Finished => Ok(()),
        other => bail!("run {} ended with status {other}", handle.run_id()),
    }
}

fn print_dry_run(plan: &RunPlan) {
    println!("projrun dry-run");
    println!("  work_dir    = {}", plan.work_dir.display());
    println!("  entry_point = {}", plan.entry_point);
    println!(
        "  environment = {}",
        plan.environment
            .map(|k| k.as_str())
            .unwrap_or("system")
    );
    println!("  command     = {}", plan.command);
}
