//! Monitor: the probing core behind one handle.
//!
//! Owns the target registry, the scheduler, the result stream and the window
//! aggregator, and runs the recorder task that feeds results from the stream
//! into the aggregator.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::probe::{Capabilities, NetworkProber, Prober};
use crate::registry::{ProbeResult, RegistryError, Target, TargetRegistry};
use crate::scheduler::{probe_with_deadline, Scheduler, SchedulerConfig, SchedulerError, SchedulerState};
use crate::stats::{SyncReport, TargetSummary, WindowAggregator, WindowSummary, DEFAULT_WINDOW};
use crate::stream::{ResultStream, Subscription, DEFAULT_STREAM_CAPACITY};

/// Extra time the scheduler allows a prober beyond its own timeout.
const DEADLINE_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub probe_interval: Duration,
    pub probe_timeout: Duration,
    pub window: Duration,
    pub resume_gap: Duration,
    pub stream_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(5),
            probe_timeout: Duration::from_millis(2000),
            window: DEFAULT_WINDOW,
            resume_gap: Duration::from_secs(30),
            stream_capacity: DEFAULT_STREAM_CAPACITY,
        }
    }
}

impl MonitorConfig {
    pub fn probe_deadline(&self) -> Duration {
        self.probe_timeout + DEADLINE_GRACE
    }
}

struct Recorder {
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

pub struct Monitor {
    config: MonitorConfig,
    registry: Arc<TargetRegistry>,
    aggregator: Arc<WindowAggregator>,
    stream: ResultStream,
    prober: Arc<dyn Prober>,
    scheduler: Scheduler,
    /// Orders "check endpoint, record" against "replace targets, sync windows".
    sync_lock: Arc<Mutex<()>>,
    recorder: tokio::sync::Mutex<Option<Recorder>>,
}

impl Monitor {
    /// Monitor probing the real network.
    pub fn new(config: MonitorConfig, targets: Vec<Target>) -> Result<Self, RegistryError> {
        let prober = Arc::new(NetworkProber::new(config.probe_timeout));
        Self::with_prober(config, targets, prober)
    }

    pub fn with_prober(
        config: MonitorConfig,
        targets: Vec<Target>,
        prober: Arc<dyn Prober>,
    ) -> Result<Self, RegistryError> {
        let registry = Arc::new(TargetRegistry::new(targets)?);
        let aggregator = Arc::new(WindowAggregator::new(config.window));
        aggregator.sync(&registry.snapshot());

        let stream = ResultStream::new(config.stream_capacity);

        let scheduler_config = SchedulerConfig {
            interval: config.probe_interval,
            probe_deadline: config.probe_deadline(),
            resume_gap: config.resume_gap,
        };
        let on_resume = aggregator.clone();
        let scheduler = Scheduler::new(registry.clone(), prober.clone(), stream.clone(), scheduler_config)
            .with_resume_hook(move || {
                let cleared = on_resume.reset_all();
                tracing::info!("Cleared {} windows after resume", cleared);
            });

        Ok(Self {
            config,
            registry,
            aggregator,
            stream,
            prober,
            scheduler,
            sync_lock: Arc::new(Mutex::new(())),
            recorder: tokio::sync::Mutex::new(None),
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Start recording and probing.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        let mut recorder = self.recorder.lock().await;
        if recorder.is_none() {
            let (stop_tx, stop_rx) = oneshot::channel();
            let handle = tokio::spawn(run_recorder(
                self.stream.subscribe(),
                self.registry.clone(),
                self.aggregator.clone(),
                self.sync_lock.clone(),
                stop_rx,
            ));
            *recorder = Some(Recorder { stop_tx, handle });
        }
        drop(recorder);

        self.scheduler.start().await?;
        tracing::info!("Monitor started with {} targets", self.registry.len());
        Ok(())
    }

    /// Stop probing, then record whatever is still buffered and stop recording.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;

        if let Some(recorder) = self.recorder.lock().await.take() {
            let _ = recorder.stop_tx.send(());
            if let Err(e) = recorder.handle.await {
                tracing::error!("Recorder ended abnormally: {}", e);
            }
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    /// Resolves with the reason once probing has halted on a fatal error.
    pub async fn wait_failed(&self) -> String {
        self.scheduler.wait_failed().await
    }

    pub fn targets(&self) -> Arc<Vec<Target>> {
        self.registry.snapshot()
    }

    /// Replace the target list used from the next tick on.
    ///
    /// Windows of removed targets are discarded and windows of targets whose
    /// host, port or probe type changed are cleared.
    pub fn set_targets(&self, targets: Vec<Target>) -> Result<SyncReport, RegistryError> {
        let _guard = self.sync_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let snapshot = targets.clone();
        self.registry.replace(targets)?;
        let report = self.aggregator.sync(&snapshot);

        tracing::info!(
            "Targets updated: {} targets, {} reset, {} removed",
            snapshot.len(),
            report.reset.len(),
            report.removed.len()
        );
        Ok(report)
    }

    /// Clear one target's window. Returns `false` for an unknown id.
    pub fn refresh_target(&self, id: &str) -> bool {
        if !self.registry.contains(id) {
            return false;
        }
        self.aggregator.reset(id);
        true
    }

    pub fn refresh_all(&self) {
        self.aggregator.reset_all();
    }

    /// The process returned from a suspended state; collected data is stale.
    pub fn on_resume(&self) {
        let cleared = self.aggregator.reset_all();
        tracing::info!("Resume reported, cleared {} windows", cleared);
    }

    /// Probe a target once, outside the schedule. The result is not recorded.
    pub async fn probe_once(&self, target: &Target) -> ProbeResult {
        probe_with_deadline(self.prober.as_ref(), target, self.config.probe_deadline()).await
    }

    pub fn subscribe(&self) -> Subscription {
        self.stream.subscribe()
    }

    /// Window statistics for a target, `None` if the id is unknown.
    pub fn summarize(&self, id: &str) -> Option<WindowSummary> {
        if !self.registry.contains(id) {
            return None;
        }
        Some(self.aggregator.summarize(id))
    }

    pub fn summarize_all(&self) -> Vec<TargetSummary> {
        self.aggregator.summarize_all(&self.registry.snapshot())
    }

    pub fn capabilities(&self) -> Capabilities {
        self.prober.capabilities()
    }
}

async fn run_recorder(
    mut results: Subscription,
    registry: Arc<TargetRegistry>,
    aggregator: Arc<WindowAggregator>,
    sync_lock: Arc<Mutex<()>>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut stop_rx => break,
            result = results.recv() => match result {
                Some(result) => record_if_current(&registry, &aggregator, &sync_lock, result),
                None => return,
            },
        }
    }

    while let Some(result) = results.try_recv() {
        record_if_current(&registry, &aggregator, &sync_lock, result);
    }
}

/// Record a result unless its target was removed or re-pointed since it was probed.
fn record_if_current(
    registry: &TargetRegistry,
    aggregator: &WindowAggregator,
    sync_lock: &Mutex<()>,
    result: ProbeResult,
) {
    let _guard = sync_lock.lock().unwrap_or_else(PoisonError::into_inner);

    if registry.endpoint_of(&result.target_id).as_ref() != Some(&result.endpoint) {
        tracing::debug!("Discarding result for outdated target {}", result.target_id);
        return;
    }
    aggregator.record(result);
}
