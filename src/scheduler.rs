use crate::analytics::PlaybackReconciler;
use crate::error::{ArrboardError, Result};
use crate::metrics::MetricsService;
use crate::sync::{SyncService, SyncTarget};
use crate::webhook::WebhookGuard;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Manual triggers waiting behind a running pass.
const TRIGGER_QUEUE: usize = 8;

#[derive(Debug, Clone, Copy)]
pub struct Intervals {
    pub sync: Duration,
    pub capture: Duration,
    pub cleanup: Duration,
}

/// Owns the background loops: sync, metrics capture, and cleanup.
pub struct Scheduler {
    sync: Arc<SyncService>,
    reconciler: Arc<PlaybackReconciler>,
    metrics: Arc<MetricsService>,
    webhook_guard: Arc<WebhookGuard>,
    intervals: Intervals,
    running: AtomicBool,
    shutdown: watch::Sender<bool>,
    trigger_tx: Mutex<Option<mpsc::Sender<SyncTarget>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        sync: Arc<SyncService>,
        reconciler: Arc<PlaybackReconciler>,
        metrics: Arc<MetricsService>,
        webhook_guard: Arc<WebhookGuard>,
        intervals: Intervals,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            sync,
            reconciler,
            metrics,
            webhook_guard,
            intervals,
            running: AtomicBool::new(false),
            shutdown,
            trigger_tx: Mutex::new(None),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.shutdown.send_replace(false);

        let (tx, rx) = mpsc::channel(TRIGGER_QUEUE);
        *self
            .trigger_tx
            .lock()
            .map_err(|_| ArrboardError::Unknown("scheduler lock poisoned".to_string()))? = Some(tx);

        let handles = vec![
            tokio::spawn(sync_loop(
                self.sync.clone(),
                self.intervals.sync,
                rx,
                self.shutdown.subscribe(),
            )),
            tokio::spawn(capture_loop(
                self.metrics.clone(),
                self.intervals.capture,
                self.shutdown.subscribe(),
            )),
            tokio::spawn(cleanup_loop(
                self.reconciler.clone(),
                self.metrics.clone(),
                self.webhook_guard.clone(),
                self.intervals.cleanup,
                self.shutdown.subscribe(),
            )),
        ];
        self.handles
            .lock()
            .map_err(|_| ArrboardError::Unknown("scheduler lock poisoned".to_string()))?
            .extend(handles);

        info!(
            sync_secs = self.intervals.sync.as_secs(),
            capture_secs = self.intervals.capture.as_secs(),
            cleanup_secs = self.intervals.cleanup.as_secs(),
            "Scheduler started"
        );
        Ok(())
    }

    /// Signal every loop and wait for them to finish their current iteration.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shutdown.send_replace(true);

        if let Ok(mut tx) = self.trigger_tx.lock() {
            tx.take();
        }
        let handles: Vec<JoinHandle<()>> = match self.handles.lock() {
            Ok(mut handles) => handles.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Scheduler task ended abnormally");
            }
        }
        info!("Scheduler stopped");
    }

    /// Queue a sync run without waiting for it.
    pub fn trigger(&self, target: SyncTarget) -> Result<()> {
        let tx = self
            .trigger_tx
            .lock()
            .map_err(|_| ArrboardError::Unknown("scheduler lock poisoned".to_string()))?
            .clone()
            .ok_or_else(|| ArrboardError::Config("scheduler is not running".to_string()))?;

        match tx.try_send(target) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(?target, "Sync queue full, trigger dropped");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(ArrboardError::Config("scheduler is not running".to_string()))
            }
        }
    }
}

async fn sync_loop(
    sync: Arc<SyncService>,
    every: Duration,
    mut triggers: mpsc::Receiver<SyncTarget>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let target = tokio::select! {
            _ = ticker.tick() => SyncTarget::All,
            Some(target) = triggers.recv() => target,
            _ = shutdown.changed() => break,
        };

        match sync.run(target).await {
            Ok(reports) => {
                let failed = reports.iter().filter(|r| r.error.is_some()).count();
                debug!(?target, services = reports.len(), failed, "Sync run finished");
            }
            Err(e) => warn!(?target, error = %e, "Sync run rejected"),
        }
    }
    debug!("Sync loop exiting");
}

async fn capture_loop(metrics: Arc<MetricsService>, every: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = metrics.capture().await {
                    warn!(error = %e, "Metrics capture failed");
                }
            }
            _ = shutdown.changed() => break,
        }
    }
    debug!("Capture loop exiting");
}

async fn cleanup_loop(
    reconciler: Arc<PlaybackReconciler>,
    metrics: Arc<MetricsService>,
    webhook_guard: Arc<WebhookGuard>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }

        let now = Utc::now();
        if let Err(e) = reconciler.sweep_orphans_at(now).await {
            warn!(error = %e, "Orphan sweep failed");
        }
        if let Err(e) = reconciler.rollup_yesterday(now).await {
            warn!(error = %e, "Device rollup failed");
        }
        if let Err(e) = metrics.prune_at(now).await {
            warn!(error = %e, "Metrics retention failed");
        }
        webhook_guard.prune();
    }
    debug!("Cleanup loop exiting");
}
