//! ratflow demo - Main Entry Point
//!
//! Runs a producer pipeline (ticker → script → hand-off queue) feeding a
//! slower consumer pipeline (hand-off queue → log), prints the status table
//! through the control bridge, pauses the producer once and shuts down.
//!
//! Usage: `ratflow [config.toml|config.json]`

use anyhow::Context;
use ratflow::{
    config::{default_config_path, AppConfig, GuardSettings, LoggingConfig, QueueSettings},
    flow::{actors::Script, FlowBuilder},
    rats::{
        inputs::{DeQueue, Ticker},
        outputs::{EnQueueOutput, LogOutput},
        ControlServer, MaxSize, QueueBridge, Rat, Supervisor, SupervisorHandle,
    },
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> anyhow::Result<()> {
    let config = match std::env::args_os().nth(1) {
        Some(path) => {
            AppConfig::load(&path).with_context(|| format!("Failed to load config {:?}", path))?
        }
        None => default_config_path()
            .filter(|p| p.exists())
            .map(AppConfig::load_or_default)
            .unwrap_or_default(),
    };

    // Keep the guard alive so buffered file logs are flushed on exit
    let _log_guard = init_logging(&config.logging);

    tracing::info!("Starting ratflow demo");
    run_demo(&config)
}

fn init_logging(logging: &LoggingConfig) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.filter));

    let (file_layer, guard) = match &logging.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, &logging.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();
    guard
}

fn run_demo(config: &AppConfig) -> anyhow::Result<()> {
    let demo = &config.demo;

    let handoff = Arc::new(QueueBridge::from_settings(
        "handoff",
        &QueueSettings {
            guard: GuardSettings::MaxSize {
                limit: demo.handoff_limit,
                poll_interval_ms: MaxSize::DEFAULT_POLL_INTERVAL_MS,
            },
            ..QueueSettings::default()
        },
    ));

    let mut ticker = Ticker::new("ticker", Duration::from_millis(demo.tick_interval_ms));
    if let Some(ticks) = demo.ticks {
        ticker = ticker.with_limit(ticks);
    }
    let transform = FlowBuilder::new("transform")
        .add(Script::new("script", demo.script.clone()))
        .build()?;
    let producer = Rat::new(
        "producer",
        ticker,
        EnQueueOutput::new("handoff", Arc::clone(&handoff)),
    )
    .with_actors(transform)
    .with_settings(config.rat("producer"));

    let consumer = Rat::new(
        "consumer",
        DeQueue::new("handoff", Arc::clone(&handoff)),
        LogOutput::new("log").with_delay(Duration::from_millis(demo.consumer_delay_ms)),
    )
    .with_settings(config.rat("consumer"));

    let mut supervisor = Supervisor::new(config.supervisor.clone());
    supervisor.register(producer)?;
    supervisor.register(consumer)?;
    let handle = SupervisorHandle::new(supervisor);
    let (bridge, mut server) = ControlServer::spawn(handle.clone(), config.supervisor.tick())?;

    let started = handle.start_all()?;
    tracing::info!(?started, "Pipelines started");

    let run_for = Duration::from_secs(demo.run_secs);
    let status_every = Duration::from_millis(demo.status_interval_ms.max(1));
    let begin = Instant::now();
    let mut paused_once = false;

    while begin.elapsed() < run_for {
        std::thread::sleep(status_every.min(run_for.saturating_sub(begin.elapsed())));
        print!("{}", bridge.status_text()?);
        tracing::info!(queued = handoff.size(), "Hand-off queue");

        if !paused_once && begin.elapsed() >= run_for / 2 {
            paused_once = true;
            match bridge.pause("producer") {
                Ok(()) => {
                    std::thread::sleep(status_every);
                    print!("{}", bridge.status_text()?);
                    bridge.resume("producer")?;
                }
                Err(e) => tracing::warn!("Producer not paused: {}", e),
            }
        }
    }

    tracing::info!("Shutting down...");
    let stopped = bridge.stop_all()?;
    tracing::info!(?stopped, "Pipelines stopped");
    server.shutdown();

    {
        let sup = handle.lock();
        for name in sup.names() {
            if let Ok(stats) = sup.stats(&name) {
                tracing::info!(rat = %name, ?stats, "Final counters");
            }
        }
    }
    handle.shutdown();
    Ok(())
}
