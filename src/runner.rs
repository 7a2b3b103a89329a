//! Load test orchestration.
//!
//! Starts `--users` simulated sensors at `--spawn-rate` per second. Each one
//! registers with the shared [`PublisherLifecycle`], ticks at `--pacing` until
//! the run is cancelled, then deregisters; the last one out flushes the
//! publisher. The run is cancelled by Ctrl-C, by `--run-time` expiring, or by
//! the publisher failing to build.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use chrono::Utc;
use sensor_kafka_producer::{
    create_topic_if_not_exists, BatchedPublisher, FanoutSink, FlushReport, LifecycleError,
    OutcomeSink, PublisherFactory, PublisherLifecycle, TracingSink, Worker,
};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::args::Cli;
use crate::report::RunSummary;
use crate::stats::{OutcomeStats, StatsSnapshot};

/// Run the load test described by `cli` to completion.
pub async fn run_load(cli: Cli) -> anyhow::Result<RunSummary> {
    anyhow::ensure!(cli.load.users > 0, "--users must be at least 1");
    anyhow::ensure!(
        cli.load.spawn_rate > 0.0 && cli.load.spawn_rate.is_finite(),
        "--spawn-rate must be a positive number"
    );
    anyhow::ensure!(!cli.load.pacing.is_zero(), "--pacing must be greater than zero");
    let spawn_interval = Duration::try_from_secs_f64(1.0 / cli.load.spawn_rate)
        .with_context(|| format!("--spawn-rate {} is too small", cli.load.spawn_rate))?;

    let config = cli.producer_config();
    let dry_run = cli.load.dry_run;
    if dry_run {
        info!("Dry run: publishing to an in-process buffer");
    } else {
        config.validate().context("Invalid Kafka configuration")?;
        info!("Kafka producer configuration: {}", config.redacted());

        if cli.kafka.create_topic {
            create_topic_if_not_exists(
                &config,
                cli.kafka.partitions,
                cli.kafka.replication_factor,
            )
            .await
            .with_context(|| format!("Failed to create topic '{}'", config.topic))?;
        }
    }

    let stats = Arc::new(OutcomeStats::new());
    let sink: Arc<dyn OutcomeSink> = Arc::new(
        FanoutSink::new()
            .with(stats.clone())
            .with(Arc::new(TracingSink)),
    );

    let flush_timeout = config.flush_timeout;
    let topic = config.topic.clone();
    let factory: PublisherFactory = Box::new(move || {
        if dry_run {
            Ok(BatchedPublisher::in_memory(&config, sink.clone()))
        } else {
            BatchedPublisher::kafka(&config, sink.clone())
        }
    });
    let lifecycle = Arc::new(PublisherLifecycle::new(factory, flush_timeout));

    let cancel = CancellationToken::new();
    let stop_trigger = spawn_stop_trigger(cli.load.run_time, cancel.clone());
    let progress = spawn_progress(stats.clone(), cli.load.report_interval, cancel.clone());

    let started_at = Utc::now();
    let started = Instant::now();
    info!(
        "Starting {} user(s) at {}/s with {:?} pacing",
        cli.load.users, cli.load.spawn_rate, cli.load.pacing
    );

    let workers = spawn_users(
        &lifecycle,
        cli.load.users,
        spawn_interval,
        cli.load.pacing,
        &cancel,
    )
    .await;
    cancel.cancelled().await;
    info!("Stopping users");

    let mut flush: Option<FlushReport> = None;
    let mut startup_error: Option<LifecycleError> = None;
    for handle in workers {
        match handle.await {
            Ok(Ok(Some(report))) => flush = Some(report),
            Ok(Ok(None)) => {}
            Ok(Err(e)) => {
                startup_error.get_or_insert(e);
            }
            Err(e) => error!("User task failed: {e}"),
        }
    }
    // Covers users that never deregistered.
    if let Some(report) = lifecycle.shutdown().await {
        flush = Some(report);
    }

    stop_trigger.abort();
    if let Err(e) = progress.await {
        warn!("Progress reporter failed: {e}");
    }

    if let Some(e) = startup_error {
        return Err(e).context("Failed to start publisher");
    }

    let mut summary = RunSummary {
        started_at,
        finished_at: Utc::now(),
        duration_ms: started.elapsed().as_millis() as u64,
        topic,
        users: cli.load.users,
        dry_run,
        outcomes: stats.snapshot(),
        unresolved: 0,
        flush_timed_out: false,
        flush_elapsed_ms: None,
    };
    if let Some(report) = &flush {
        summary.apply_flush(report);
    }

    info!(
        "Run complete: {} delivered, {} errors, {} unresolved in {:.1}s",
        summary.outcomes.produce_ok,
        summary.outcomes.errors(),
        summary.unresolved,
        summary.duration_secs()
    );
    Ok(summary)
}

type UserHandle = JoinHandle<Result<Option<FlushReport>, LifecycleError>>;

/// Start users one by one, `spawn_interval` apart, until all are running or
/// the run is cancelled.
async fn spawn_users(
    lifecycle: &Arc<PublisherLifecycle>,
    users: usize,
    spawn_interval: Duration,
    pacing: Duration,
    cancel: &CancellationToken,
) -> Vec<UserHandle> {
    let mut handles = Vec::with_capacity(users);

    for id in 0..users {
        if cancel.is_cancelled() {
            break;
        }
        handles.push(tokio::spawn(run_user(
            id,
            Arc::clone(lifecycle),
            pacing,
            cancel.clone(),
        )));

        if id + 1 < users {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(spawn_interval) => {}
            }
        }
    }

    info!("{} user(s) started", handles.len());
    handles
}

async fn run_user(
    id: usize,
    lifecycle: Arc<PublisherLifecycle>,
    pacing: Duration,
    cancel: CancellationToken,
) -> Result<Option<FlushReport>, LifecycleError> {
    let publisher = match lifecycle.start().await {
        Ok(publisher) => publisher,
        Err(LifecycleError::Closed) => return Ok(None),
        Err(e) => {
            error!("User {id} could not start: {e}");
            cancel.cancel();
            return Err(e);
        }
    };

    let ticks = Worker::new(publisher).run_paced(pacing, cancel).await;
    debug!("User {id} stopped after {ticks} tick(s)");

    Ok(lifecycle.stop().await)
}

/// Cancel the run on Ctrl-C or when `run_time` elapses.
fn spawn_stop_trigger(run_time: Option<Duration>, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let expired = async {
            match run_time {
                Some(run_time) => tokio::time::sleep(run_time).await,
                None => std::future::pending().await,
            }
        };

        let interrupted = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                // Keep running until run time or an explicit cancel.
                error!("Failed to listen for Ctrl-C: {e}");
                std::future::pending::<()>().await;
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = expired => info!("Run time elapsed"),
            _ = interrupted => info!("Received Ctrl-C"),
        }
        cancel.cancel();
    })
}

/// Log a throughput snapshot every `interval` until cancelled.
fn spawn_progress(
    stats: Arc<OutcomeStats>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if interval.is_zero() {
            return;
        }
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        let mut previous = stats.snapshot();
        let mut previous_at = Instant::now();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let current = stats.snapshot();
            let now = Instant::now();
            log_progress(
                &current.since(&previous),
                &current,
                now.duration_since(previous_at),
            );
            previous = current;
            previous_at = now;
        }
    })
}

fn log_progress(delta: &StatsSnapshot, total: &StatsSnapshot, elapsed: Duration) {
    let rate = if elapsed.is_zero() {
        0.0
    } else {
        delta.produce_ok as f64 / elapsed.as_secs_f64()
    };
    let avg_ms = total.latency.map(|l| l.avg_ms).unwrap_or(0.0);
    info!(
        "{:.1} msgs/s | ok {} | errors {} | buffer full {} | avg latency {:.2}ms",
        rate, total.produce_ok, total.errors(), delta.local_buffer_full, avg_ms
    );
}
