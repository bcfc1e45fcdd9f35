//! Procaudit monitors process lifecycle events on the local host.
//!
//! A kernel trace session (with a polling fallback when tracing is
//! unavailable) feeds a three-stage pipeline: raw notices are read,
//! enriched into finished events with parent-process correlation, and
//! fanned out to the configured sinks. Events are delivered to stdout
//! and, optionally, to a JSONL file, a directory of JSON files, or an
//! AMQP queue.
//!
//! ```sh
//! # Everything, to stdout
//! procaudit run
//!
//! # Descendants of PID 1234, appended to a file
//! procaudit run --ancestor-pid 1234 --output-file /var/log/procaudit.jsonl
//! ```

use std::{sync::Arc, time::Duration};

use amqp_notifier::AmqpSink;
use anyhow::{Context, Result};
use event_logger::{DirectorySink, JsonlFileSink, StdoutSink};
use procaudit_core::{
    host::Host,
    process::{ProcessFilter, ProcfsInspector},
    shutdown::ShutdownSignal,
};
use process_monitor::{EventPipeline, PipelineConfig};
use tokio::signal::unix::{signal, SignalKind};

pub mod cli;

/// Init logger. We log from info level and above, hide timestamp
/// and module path.
/// If RUST_LOG is set, we assume the user wants to debug something
/// and use env_logger default behaviour.
pub fn init_logger(override_log_level: Option<log::LevelFilter>) {
    if std::env::var_os("RUST_LOG").is_some() {
        env_logger::init();
    } else {
        let level_filter = override_log_level.unwrap_or(log::LevelFilter::Info);

        env_logger::builder().filter_level(level_filter).init();
    }
}

pub async fn run(options: cli::Opts) -> Result<()> {
    let cli::Command::Run(options) = options.command;
    log::trace!("options: {options:?}");

    let host = Host::detect();
    log::info!("monitoring {host}");

    let mut pipeline = EventPipeline::new(Arc::new(ProcfsInspector::new()))
        .with_filter(subscription(&options))
        .with_config(PipelineConfig {
            poll_interval: Duration::from_secs(options.poll_interval),
            ..PipelineConfig::default()
        })
        .with_sink(Box::new(StdoutSink::new()));

    if let Some(path) = &options.output_file {
        let sink = JsonlFileSink::new(path)
            .with_context(|| format!("cannot use output file {}", path.display()))?;
        pipeline = pipeline.with_sink(Box::new(sink));
    }
    if let Some(directory) = &options.output_dir {
        let sink = DirectorySink::new(directory)
            .with_context(|| format!("cannot use output directory {}", directory.display()))?;
        pipeline = pipeline.with_sink(Box::new(sink));
    }
    if let (Some(url), Some(queue)) = (&options.amqp_url, &options.amqp_queue) {
        let sink = AmqpSink::new(url, queue);
        log::info!("publishing to {} (queue: {queue})", sink.masked_uri());
        pipeline = pipeline.with_sink(Box::new(sink));
    }

    let mut sig_int = signal(SignalKind::interrupt())?;
    let mut sig_term = signal(SignalKind::terminate())?;
    let (sender, shutdown) = ShutdownSignal::new();
    tokio::spawn(async move {
        tokio::select! {
            _ = sig_int.recv() => log::trace!("SIGINT received"),
            _ = sig_term.recv() => log::trace!("SIGTERM received"),
        }
        log::info!("terminating...");
        sender.send_signal();
    });

    pipeline
        .run(shutdown)
        .await
        .context("event pipeline failed")?;
    log::debug!("pipeline drained, exiting");
    Ok(())
}

/// One filter for the run, built from the subscription flags before
/// the pipeline starts.
fn subscription(options: &cli::RunOpts) -> ProcessFilter {
    let mut filter = ProcessFilter::new();
    filter.add_pids(options.pids.iter().copied());
    filter.add_ppids(options.ppids.iter().copied());
    filter.add_ancestor_pids(options.ancestor_pids.iter().copied());
    filter.add_descendant_pids(options.descendant_pids.iter().copied());
    filter
}
