//! Scheduler module for running probes on a fixed cadence.
//!
//! Every tick snapshots the registry and probes each target concurrently,
//! publishing each result as soon as it is available. A tick that is still
//! running when the next one is due causes that next tick to be skipped.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;

use crate::probe::{duration_ms, Prober};
use crate::registry::{FailureKind, ProbeResult, Target, TargetRegistry};
use crate::stream::ResultStream;

/// Scheduler error types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("scheduler is already running")]
    AlreadyRunning,
    #[error("scheduler failed: {0}")]
    Fatal(String),
}

/// Lifecycle of the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum SchedulerState {
    Stopped,
    Running,
    /// Probing halted on an unrecoverable error.
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Time between ticks (default: 5s)
    pub interval: Duration,
    /// Hard limit on a single prober call (default: 2.5s)
    pub probe_deadline: Duration,
    /// A wall-clock gap between ticks larger than this is treated as the
    /// process having been suspended (default: 30s)
    pub resume_gap: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            probe_deadline: Duration::from_millis(2500),
            resume_gap: Duration::from_secs(30),
        }
    }
}

type ResumeHook = Arc<dyn Fn() + Send + Sync>;

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct TickOutcome {
    dispatched: usize,
    /// Probes that died before producing their own result.
    failed_to_run: usize,
}

#[derive(Clone)]
struct TickContext {
    registry: Arc<TargetRegistry>,
    prober: Arc<dyn Prober>,
    stream: ResultStream,
    deadline: Duration,
}

struct Driver {
    stop_tx: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

/// The main scheduler that orchestrates probe execution.
pub struct Scheduler {
    ctx: TickContext,
    config: SchedulerConfig,
    resume_hook: Option<ResumeHook>,
    state: Arc<watch::Sender<SchedulerState>>,
    driver: Mutex<Option<Driver>>,
}

impl Scheduler {
    pub fn new(
        registry: Arc<TargetRegistry>,
        prober: Arc<dyn Prober>,
        stream: ResultStream,
        config: SchedulerConfig,
    ) -> Self {
        let (state, _) = watch::channel(SchedulerState::Stopped);
        Self {
            ctx: TickContext {
                registry,
                prober,
                stream,
                deadline: config.probe_deadline,
            },
            config,
            resume_hook: None,
            state: Arc::new(state),
            driver: Mutex::new(None),
        }
    }

    /// Called before the first tick after a suspension is detected.
    pub fn with_resume_hook(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.resume_hook = Some(Arc::new(hook));
        self
    }

    pub fn state(&self) -> SchedulerState {
        self.state.borrow().clone()
    }

    /// Start ticking. The first tick fires immediately.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        let mut driver = self.driver.lock().await;
        if driver.as_ref().is_some_and(|d| !d.handle.is_finished()) {
            return Err(SchedulerError::AlreadyRunning);
        }

        let (stop_tx, stop_rx) = broadcast::channel(1);
        self.state.send_replace(SchedulerState::Running);

        tracing::info!(
            "Starting scheduler: interval {:?}, probe deadline {:?}",
            self.config.interval,
            self.config.probe_deadline
        );

        let handle = tokio::spawn(run_driver(
            self.ctx.clone(),
            self.config.clone(),
            self.resume_hook.clone(),
            self.state.clone(),
            stop_rx,
        ));

        *driver = Some(Driver { stop_tx, handle });
        Ok(())
    }

    /// Stop ticking and wait for the in-flight tick to finish.
    pub async fn shutdown(&self) {
        let Some(driver) = self.driver.lock().await.take() else {
            return;
        };

        let _ = driver.stop_tx.send(());
        if let Err(e) = driver.handle.await {
            tracing::error!("Scheduler driver ended abnormally: {}", e);
        }

        // A failure reason stays visible after shutdown
        self.state.send_if_modified(|state| {
            if *state == SchedulerState::Running {
                *state = SchedulerState::Stopped;
                true
            } else {
                false
            }
        });
        tracing::info!("Scheduler stopped");
    }

    /// Resolves with the reason once the scheduler has failed.
    pub async fn wait_failed(&self) -> String {
        let mut rx = self.state.subscribe();
        loop {
            if let SchedulerState::Failed(reason) = &*rx.borrow_and_update() {
                return reason.clone();
            }
            if rx.changed().await.is_err() {
                return std::future::pending().await;
            }
        }
    }
}

async fn run_driver(
    ctx: TickContext,
    config: SchedulerConfig,
    resume_hook: Option<ResumeHook>,
    state: Arc<watch::Sender<SchedulerState>>,
    mut stop_rx: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(config.interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // Holds at most one tick
    let mut ticks: JoinSet<TickOutcome> = JoinSet::new();
    let mut last_tick: Option<DateTime<Utc>> = None;
    let mut tick_number: u64 = 0;

    loop {
        tokio::select! {
            _ = stop_rx.recv() => break,
            Some(joined) = ticks.join_next(), if !ticks.is_empty() => {
                if let Err(reason) = check_tick(joined) {
                    fail(&state, reason);
                    return;
                }
            }
            _ = interval.tick() => {
                if !ticks.is_empty() {
                    tracing::warn!("Skipping tick: previous tick still has probes in flight");
                    continue;
                }

                let now = Utc::now();
                if let Some(previous) = last_tick {
                    let gap = (now - previous).to_std().unwrap_or_default();
                    if gap > config.resume_gap {
                        tracing::info!("No tick for {:?}, assuming resume from suspension", gap);
                        if let Some(hook) = &resume_hook {
                            hook();
                        }
                    }
                }
                last_tick = Some(now);

                tick_number += 1;
                ticks.spawn(run_tick(ctx.clone(), tick_number));
            }
        }
    }

    // Let the last tick finish; every probe in it is bounded by the deadline
    while let Some(joined) = ticks.join_next().await {
        if let Err(reason) = check_tick(joined) {
            fail(&state, reason);
            return;
        }
    }
}

fn check_tick(joined: Result<TickOutcome, tokio::task::JoinError>) -> Result<(), String> {
    match joined {
        Ok(outcome) if outcome.dispatched > 0 && outcome.failed_to_run == outcome.dispatched => {
            Err(format!("none of the {} probes of a tick could run", outcome.dispatched))
        }
        Ok(_) => Ok(()),
        Err(e) => Err(format!("tick task died: {}", e)),
    }
}

fn fail(state: &watch::Sender<SchedulerState>, reason: String) {
    tracing::error!("Scheduler halted: {}", reason);
    state.send_replace(SchedulerState::Failed(reason));
}

/// Probe every target of the current snapshot concurrently.
async fn run_tick(ctx: TickContext, tick_number: u64) -> TickOutcome {
    let targets = ctx.registry.snapshot();
    let mut outcome = TickOutcome {
        dispatched: targets.len(),
        failed_to_run: 0,
    };
    if targets.is_empty() {
        return outcome;
    }

    tracing::debug!("Tick {}: probing {} targets", tick_number, targets.len());

    let mut probes = JoinSet::new();
    for target in targets.iter().cloned() {
        let prober = ctx.prober.clone();
        let stream = ctx.stream.clone();
        let deadline = ctx.deadline;

        probes.spawn(async move {
            let attempt = AssertUnwindSafe(probe_with_deadline(prober.as_ref(), &target, deadline))
                .catch_unwind()
                .await;

            let (result, ran) = match attempt {
                Ok(result) => (result, true),
                Err(_) => {
                    tracing::error!("Probe of {} panicked", target.name);
                    let result = ProbeResult::failure(
                        &target,
                        FailureKind::Internal,
                        "probe task panicked",
                        0.0,
                        Utc::now(),
                    );
                    (result, false)
                }
            };

            stream.publish(result);
            ran
        });
    }

    while let Some(joined) = probes.join_next().await {
        if !joined.unwrap_or(false) {
            outcome.failed_to_run += 1;
        }
    }

    outcome
}

/// Run one prober call, converting an overrun of `deadline` into a timeout result.
pub async fn probe_with_deadline(prober: &dyn Prober, target: &Target, deadline: Duration) -> ProbeResult {
    let started = Utc::now();
    match tokio::time::timeout(deadline, prober.probe(target)).await {
        Ok(result) => result,
        Err(_) => ProbeResult::failure(
            target,
            FailureKind::Timeout,
            format!("probe timed out after {:?}", deadline),
            duration_ms(deadline),
            started,
        ),
    }
}
