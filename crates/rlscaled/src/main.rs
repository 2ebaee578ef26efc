//! rlscaled: the rlscale daemon.
//!
//! Assembles the decision loop from its collaborators:
//! - Metrics recorder fed from a line-oriented sample feed
//! - Dry-run platform connector seeded from the config
//! - Optional redb training store
//! - Value models loaded from JSON files
//!
//! # Usage
//!
//! ```text
//! rlscaled init --apps frontend,worker > rlscale.toml
//! rlscaled check --config rlscale.toml
//! rlscaled run --config rlscale.toml --metrics-feed - --textfile /var/lib/node_exporter/rlscale.prom
//! ```

mod platform;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use rlscale_core::AutoscalerConfig;
use rlscale_engine::{
    DecisionEngine, EngineController, IterationReport, epoch_ms, render_prometheus,
};
use rlscale_metrics::MetricsRecorder;
use rlscale_policy::{LinearValueModel, ModelRegistry};
use rlscale_state::TrainingStore;
use tokio::io::{AsyncBufRead, BufReader};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::platform::DryRunPlatform;

const DAY_MS: u64 = 24 * 60 * 60 * 1000;

/// How often old training rows are purged.
const PURGE_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Parser)]
#[command(name = "rlscaled", about = "rlscale autoscaling daemon", version)]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the decision loop until interrupted.
    Run {
        /// Path to rlscale.toml.
        #[arg(short, long)]
        config: PathBuf,

        /// Sample feed (`<metric> <app|-> <value>` per line); `-` for stdin.
        #[arg(long)]
        metrics_feed: Option<String>,

        /// Write the decision state in Prometheus text format here after
        /// every scaling round.
        #[arg(long)]
        textfile: Option<PathBuf>,

        /// Value model for an app, as `app=path/to/model.json`. Repeatable.
        #[arg(long = "model", value_parser = parse_model_arg)]
        models: Vec<(String, PathBuf)>,

        /// Start the loop even if `scaling.autostart` is false.
        #[arg(long)]
        start: bool,
    },
    /// Validate a config file and print its live-editable settings.
    Check {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Print a config scaffold for the given apps.
    Init {
        /// Comma-separated app names.
        #[arg(long, value_delimiter = ',', default_value = "frontend")]
        apps: Vec<String>,
    },
}

fn parse_model_arg(s: &str) -> Result<(String, PathBuf), String> {
    match s.split_once('=') {
        Some((app, path)) if !app.is_empty() && !path.is_empty() => {
            Ok((app.to_string(), PathBuf::from(path)))
        }
        _ => Err(format!("expected app=path, got {s:?}")),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,rlscaled=debug,rlscale=debug"));
    if cli.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    match cli.command {
        Command::Run {
            config,
            metrics_feed,
            textfile,
            models,
            start,
        } => run(&config, metrics_feed, textfile, models, start).await,
        Command::Check { config } => check(&config),
        Command::Init { apps } => {
            let apps: Vec<&str> = apps.iter().map(String::as_str).collect();
            print!("{}", AutoscalerConfig::scaffold(&apps).to_toml_string()?);
            Ok(())
        }
    }
}

fn check(path: &Path) -> anyhow::Result<()> {
    let config = AutoscalerConfig::from_file(path)?;
    println!(
        "{}: {} app(s), {} rule(s)",
        path.display(),
        config.scaling.kpis.len(),
        config.rules.len()
    );
    print!(
        "{}",
        rlscale_engine::LiveSettings::from_config(&config).render_editable()
    );
    Ok(())
}

async fn run(
    config_path: &Path,
    metrics_feed: Option<String>,
    textfile: Option<PathBuf>,
    model_args: Vec<(String, PathBuf)>,
    force_start: bool,
) -> anyhow::Result<()> {
    let config = Arc::new(AutoscalerConfig::from_file(config_path)?);
    info!(path = %config_path.display(), apps = config.scaling.kpis.len(), "config loaded");

    // ── Collaborators ──────────────────────────────────────────

    let retention = config.scaling_interval().max(config.scrape_interval()) * 2;
    let recorder = Arc::new(MetricsRecorder::from_config(&config.metrics, retention)?);
    let platform = Arc::new(DryRunPlatform::new(&config.platform.initial_instances));

    let models = ModelRegistry::new();
    for (app, path) in &model_args {
        let model = LinearValueModel::from_file(path)?;
        models.set_model(app, Arc::new(model));
        info!(%app, path = %path.display(), "value model loaded");
    }

    let store = open_training_store(&config)?;

    // ── Engine ─────────────────────────────────────────────────

    let mut engine = DecisionEngine::new(
        config.clone(),
        recorder.clone(),
        platform,
        Arc::new(models),
    )?;
    if let Some(store) = &store {
        engine = engine.with_training_sink(Arc::new(store.clone()));
    }
    if let Some(path) = textfile {
        engine = engine.with_report_fn(move |report: &IterationReport| {
            write_textfile(&path, report);
        });
    }
    let mut controller = EngineController::new(engine);

    // ── Background tasks ───────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    tasks.push(tokio::spawn(
        recorder
            .clone()
            .run_pruner(config.scrape_interval(), shutdown_rx.clone()),
    ));

    if let Some(feed) = metrics_feed {
        let recorder = recorder.clone();
        tokio::spawn(async move {
            let result = match feed.as_str() {
                "-" => feed_from(BufReader::new(tokio::io::stdin()), &recorder).await,
                path => match tokio::fs::File::open(path).await {
                    Ok(file) => feed_from(BufReader::new(file), &recorder).await,
                    Err(e) => Err(e),
                },
            };
            if let Err(e) = result {
                error!(error = %e, "metrics feed failed");
            }
        });
    }

    if let Some(store) = store {
        let keep_ms = u64::from(config.training.keep_days) * DAY_MS;
        tasks.push(tokio::spawn(purge_loop(store, keep_ms, shutdown_rx.clone())));
    }

    if config.scaling.autostart || force_start {
        controller.start()?;
    } else {
        info!("autostart disabled, loop idle (send SIGUSR1 to toggle)");
    }

    // ── Control signals ────────────────────────────────────────

    wait_for_shutdown(&mut controller).await;
    info!("shutdown signal received");

    if controller.is_running()
        && let Err(e) = controller.stop().await
    {
        error!(error = %e, "failed to stop decision engine cleanly");
    }
    let _ = shutdown_tx.send(true);
    for task in tasks {
        let _ = task.await;
    }

    info!("rlscaled stopped");
    Ok(())
}

fn open_training_store(config: &AutoscalerConfig) -> anyhow::Result<Option<TrainingStore>> {
    let training = &config.training;
    let store = match (&training.database, training.export_enabled) {
        (Some(path), _) => TrainingStore::open(path)?,
        (None, true) => {
            warn!("training export enabled without database, rows are kept in memory only");
            TrainingStore::open_in_memory()?
        }
        (None, false) => return Ok(None),
    };
    let store = match &training.exclusion_regex {
        Some(pattern) => store.with_exclusion_regex(pattern)?,
        None => store,
    };
    Ok(Some(store))
}

async fn feed_from<R>(reader: R, recorder: &MetricsRecorder) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let n = rlscale_metrics::ingest(reader, recorder).await?;
    info!(samples = n, "metrics feed ended");
    Ok(())
}

async fn purge_loop(store: TrainingStore, keep_ms: u64, mut shutdown: watch::Receiver<bool>) {
    loop {
        let cutoff = epoch_ms().saturating_sub(keep_ms);
        match store.purge_older_than(cutoff) {
            Ok(removed) if removed > 0 => info!(removed, "old training rows purged"),
            Ok(_) => {}
            Err(e) => error!(error = %e, "training purge failed"),
        }
        tokio::select! {
            _ = tokio::time::sleep(PURGE_INTERVAL) => {}
            _ = shutdown.changed() => break,
        }
    }
}

fn write_textfile(path: &Path, report: &IterationReport) {
    let text = render_prometheus(&report.instances, &report.actions);
    if let Err(e) = std::fs::write(path, text) {
        warn!(path = %path.display(), error = %e, "failed to write textfile");
    }
}

/// Wait for Ctrl-C. On Unix, SIGUSR1 toggles the loop between running and
/// idle in the meantime.
#[cfg(unix)]
async fn wait_for_shutdown(controller: &mut EngineController) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut toggle = match signal(SignalKind::user_defined1()) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "cannot install SIGUSR1 handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return,
            _ = toggle.recv() => {
                let result = if controller.is_running() {
                    controller.stop().await
                } else {
                    controller.start()
                };
                match result {
                    Ok(()) => info!(state = ?controller.state(), "loop toggled"),
                    Err(e) => error!(error = %e, "failed to toggle loop"),
                }
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(_controller: &mut EngineController) {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_args_split_on_equals() {
        assert_eq!(
            parse_model_arg("web=models/web.json").unwrap(),
            ("web".to_string(), PathBuf::from("models/web.json"))
        );
        assert!(parse_model_arg("web").is_err());
        assert!(parse_model_arg("=x").is_err());
    }

    #[test]
    fn cli_parses_run_flags() {
        let cli = Cli::try_parse_from([
            "rlscaled",
            "--log-json",
            "run",
            "--config",
            "rlscale.toml",
            "--model",
            "web=w.json",
            "--model",
            "api=a.json",
            "--start",
        ])
        .unwrap();
        assert!(cli.log_json);
        match cli.command {
            Command::Run { models, start, .. } => {
                assert_eq!(models.len(), 2);
                assert!(start);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn training_store_follows_config() {
        let mut config = AutoscalerConfig::scaffold(&["web"]);
        config.training.export_enabled = false;
        config.training.database = None;
        assert!(open_training_store(&config).unwrap().is_none());

        config.training.export_enabled = true;
        assert!(open_training_store(&config).unwrap().is_some());

        config.training.exclusion_regex = Some("(".to_string());
        assert!(open_training_store(&config).is_err());
    }

    #[test]
    fn textfile_contains_gauges() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rlscale.prom");
        let report = IterationReport {
            instances: [("web".to_string(), 3)].into_iter().collect(),
            actions: [("web".to_string(), 1)].into_iter().collect(),
            ..Default::default()
        };
        write_textfile(&path, &report);
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("rlscale_instances{app=\"web\"} 3"));
        assert!(text.contains("rlscale_last_action{app=\"web\"} 1"));
    }
}
