use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::info;

use flowcast_compute::error::bounded;
use flowcast_compute::pipeline::load_model;
use flowcast_compute::{detect_once, Detector, SeasonalForecaster, SeasonalModel, Trainer, Worker};
use flowcast_core::{Config, TimeRange};
use flowcast_storage::{FileModelStore, FileWatermarkStore, ModelStore, PgSeriesStore, SeriesStore};

use crate::cli::{CliArgs, Command};
use crate::report;

/// How a command that ran to completion went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Clean,
    /// Some variables were skipped or failed.
    Partial,
}

impl Status {
    fn from_clean(clean: bool) -> Self {
        if clean {
            Status::Clean
        } else {
            Status::Partial
        }
    }
}

pub async fn run(args: CliArgs) -> Result<Status> {
    let mut config = Config::from_file(&args.config)
        .with_context(|| format!("failed to load config from {}", args.config))?;
    if let Command::Worker {
        interval: Some(minutes),
    } = &args.command
    {
        config.worker.tick_interval_minutes = *minutes;
    }
    config.validate().context("invalid configuration")?;
    config.log_summary();

    match args.command {
        Command::Train {
            variables,
            since,
            until,
        } => train(&config, variables, TimeRange::between(since, until)).await,
        Command::Detect {
            variables,
            since,
            until,
            top,
        } => detect(&config, variables, TimeRange::between(since, until), top).await,
        Command::Worker { .. } => worker(&config).await,
        Command::Models { json } => models(&config, json).await,
    }
}

async fn connect(config: &Config) -> Result<PgSeriesStore> {
    config.database.require_url()?;
    let store = PgSeriesStore::connect(&config.database)
        .await
        .context("failed to connect to database")?;
    store
        .ensure_schema()
        .await
        .context("failed to prepare database schema")?;
    Ok(store)
}

fn model_store(config: &Config) -> Result<Arc<dyn ModelStore>> {
    let store = FileModelStore::new(&config.storage.models_dir).with_context(|| {
        format!(
            "failed to open models directory {}",
            config.storage.models_dir.display()
        )
    })?;
    Ok(Arc::new(store))
}

async fn train(config: &Config, variables: Vec<String>, range: TimeRange) -> Result<Status> {
    let series = connect(config).await?;
    let models = model_store(config)?;
    let timeout = config.worker.store_timeout();

    let variables = if variables.is_empty() {
        bounded(timeout, "variable list", series.variables())
            .await
            .context("failed to list variables")?
    } else {
        variables
    };
    info!(variables = variables.len(), "training");

    let trainer = Trainer::new(SeasonalForecaster::new(&config.anomaly), models, &config.anomaly)
        .with_store_timeout(timeout);
    let training = trainer.train_all(&series, &variables, range).await;
    series.close().await;

    report::print_training(&training);
    Ok(Status::from_clean(training.is_clean()))
}

async fn detect(
    config: &Config,
    variables: Vec<String>,
    range: TimeRange,
    top: usize,
) -> Result<Status> {
    let series = connect(config).await?;
    let models = model_store(config)?;
    let timeout = config.worker.store_timeout();

    let variables = if variables.is_empty() {
        bounded(timeout, "model list", models.list())
            .await
            .context("failed to list trained models")?
    } else {
        variables
    };

    let detector: Detector<SeasonalModel> =
        Detector::new(models, &config.anomaly).with_store_timeout(timeout);
    let run = detect_once(&series, &detector, &variables, range, timeout).await;
    series.close().await;

    report::print_detection(&run, top);
    Ok(Status::from_clean(run.is_clean()))
}

async fn worker(config: &Config) -> Result<Status> {
    let series = Arc::new(connect(config).await?);
    let models = model_store(config)?;
    let watermarks = Arc::new(FileWatermarkStore::new(&config.worker.watermark_path));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_signal_listener(shutdown_tx)?;

    let worker: Worker<SeasonalModel> = Worker::new(
        config.worker.clone(),
        &config.anomaly,
        series.clone(),
        models,
        watermarks,
    );
    let metrics = worker.run(shutdown_rx).await;
    series.close().await;

    Ok(Status::from_clean(
        metrics.variables_failed == 0 && metrics.ticks_failed == 0,
    ))
}

async fn models(config: &Config, json: bool) -> Result<Status> {
    let store = model_store(config)?;
    let timeout = config.worker.store_timeout();
    let variables = bounded(timeout, "model list", store.list())
        .await
        .context("failed to list trained models")?;

    let mut entries = Vec::with_capacity(variables.len());
    for variable in variables {
        let loaded = load_model::<SeasonalModel>(&*store, &variable, timeout).await;
        entries.push(report::ModelEntry::new(variable, loaded.as_ref().map_err(|e| e.to_string())));
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report::models_json(&entries))?);
    } else {
        report::print_models(&entries);
    }
    let clean = entries.iter().all(|e| e.error.is_none());
    Ok(Status::from_clean(clean))
}

/// Flip the shutdown channel on SIGINT or SIGTERM.
#[cfg(unix)]
fn spawn_signal_listener(tx: watch::Sender<bool>) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt()).context("failed to register SIGINT")?;
    let mut sigterm = signal(SignalKind::terminate()).context("failed to register SIGTERM")?;
    tokio::spawn(async move {
        tokio::select! {
            _ = sigint.recv() => info!("SIGINT received, stopping after the current tick"),
            _ = sigterm.recv() => info!("SIGTERM received, stopping after the current tick"),
        }
        let _ = tx.send(true);
    });
    Ok(())
}

#[cfg(not(unix))]
fn spawn_signal_listener(tx: watch::Sender<bool>) -> Result<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, stopping after the current tick");
        }
        let _ = tx.send(true);
    });
    Ok(())
}
