//! CLI command handling
//!
//! Wires real collaborators (adb, reqwest, the filesystem sink) to the
//! harness and formats output. Reports go to stdout, logs to stderr.

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::commands::Commands;
use crate::common::config::Config;
use crate::common::paths::config_path;
use crate::common::{Error, Result};
use crate::correlator::{LogCorrelator, Pattern};
use crate::device::{
    AdbDevice, Clock, Collaborators, CommandRunner, ReqwestHttpClient, ShellRunner, SystemClock,
};
use crate::diagnostics::{ArtifactSink, FsArtifactSink};
use crate::orchestrator::Orchestrator;
use crate::report::Report;
use crate::scenario::load_journeys;
use crate::snapshot::SnapshotSource;

/// Dispatch a CLI command
pub async fn dispatch(command: Commands, config_file: Option<&Path>) -> Result<()> {
    let mut config = match config_file {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    match command {
        Commands::Run {
            files,
            json,
            only,
            artifacts,
        } => {
            if let Some(dir) = artifacts {
                config.artifacts.dir = Some(dir);
            }
            let collaborators = collaborators(&mut config)?;

            let mut orchestrator =
                Orchestrator::new(collaborators, config).with_cancel(cancel_on_ctrl_c());
            for file in &files {
                for journey in load_journeys(file)? {
                    if only.is_empty() || only.iter().any(|name| name == journey.name()) {
                        orchestrator.register(journey);
                    }
                }
            }
            if let Some(missing) = only
                .iter()
                .find(|name| !orchestrator.journey_names().contains(&name.as_str()))
            {
                return Err(Error::JourneyNotFound(missing.clone()));
            }

            let sink = orchestrator.context().collaborators.sink.clone();
            match orchestrator.run_all().await {
                Ok(report) => {
                    save_report(&report, sink.as_ref()).await;
                    print_report(&report, json)?;
                    Ok(())
                }
                Err(e) => {
                    if let Some(report) = e.report() {
                        save_report(report, sink.as_ref()).await;
                        print_report(report, json)?;
                    }
                    Err(e)
                }
            }
        }

        Commands::Snapshot { raw } => {
            let collaborators = collaborators(&mut config)?;
            let source = SnapshotSource::new(collaborators.ui, collaborators.clock);
            let capture = source.capture_raw().await?;
            if raw {
                println!("{}", capture.raw);
            } else {
                println!("{}", serde_json::to_string_pretty(&capture.snapshot)?);
            }
            Ok(())
        }

        Commands::Logs { patterns, since_ms } => {
            let collaborators = collaborators(&mut config)?;
            let patterns = patterns
                .iter()
                .enumerate()
                .map(|(i, regex)| Pattern::new(format!("p{}", i + 1), regex))
                .collect::<Result<Vec<_>>>()?;
            let since = since_ms.unwrap_or_else(|| collaborators.clock.now_ms());
            let correlator = LogCorrelator::from_config(collaborators.logs, &config.logs);
            let lookback = std::time::Duration::from_millis(config.logs.lookback_ms);

            let events = correlator.find_events(&patterns, since, lookback).await?;
            if events.is_empty() {
                println!("No matching log events");
            }
            for event in &events {
                println!("{}", serde_json::to_string(event)?);
            }
            Ok(())
        }

        Commands::Config => {
            match config_path() {
                Some(path) if path.exists() => println!("{}", path.display()),
                Some(path) => println!("{} (not present, using defaults)", path.display()),
                None => println!("No configuration directory on this platform"),
            }
            Ok(())
        }
    }
}

/// Real collaborators for a device reached over adb
///
/// The resolved adb path is written back into `config` so scenario steps
/// issue the same executable.
fn collaborators(config: &mut Config) -> Result<Collaborators> {
    config.device.adb_path = config.resolve_adb()?;

    let runner: Arc<dyn CommandRunner> = Arc::new(ShellRunner::new(config.command_timeout()));
    let device = Arc::new(AdbDevice::from_config(config, runner.clone())?);
    let http = Arc::new(ReqwestHttpClient::new(&config.http)?);
    let sink = Arc::new(FsArtifactSink::new(config.artifacts.resolved_dir()));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    Ok(Collaborators {
        commands: runner,
        ui: device.clone(),
        logs: device,
        http,
        sink,
        clock,
    })
}

/// Cancel in-flight waits on Ctrl-C; the current step then fails and the
/// run aborts with a report
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling waits");
            token.cancel();
        }
    });
    cancel
}

async fn save_report(report: &Report, sink: &dyn ArtifactSink) {
    match report.persist(sink).await {
        Ok(artifact) => info!(location = %artifact.location, "saved run report"),
        Err(e) => warn!(error = %e, "failed to save run report"),
    }
}

fn print_report(report: &Report, json: bool) -> Result<()> {
    if json {
        println!("{}", report.to_json()?);
    } else {
        print!("{report}");
    }
    Ok(())
}
