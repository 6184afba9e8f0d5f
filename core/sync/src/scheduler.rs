//! Sync scheduling - manual and periodic modes.
//!
//! All invocations of a process go through one worker, so two triggers never
//! race on the same sync state rows.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crmsync_common::{Error, Result};

use crate::orchestrator::{InvocationReport, InvocationRequest, Orchestrator};

/// Sync mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Only explicit requests run.
    Manual,
    /// Explicit requests plus a default invocation every `interval`.
    Periodic { interval: Duration },
}

impl SyncMode {
    fn interval(&self) -> Option<Duration> {
        match self {
            SyncMode::Manual => None,
            SyncMode::Periodic { interval } => Some(*interval),
        }
    }
}

/// Sync request types.
#[derive(Debug)]
pub enum SyncRequest {
    Invoke(InvocationRequest),
    Shutdown,
}

type Reply = oneshot::Sender<Result<InvocationReport>>;

/// Cloneable front of the sync worker.
#[derive(Clone)]
pub struct SyncScheduler {
    mode: SyncMode,
    request_tx: mpsc::Sender<(SyncRequest, Reply)>,
}

impl SyncScheduler {
    /// Create a scheduler and the handle that runs its worker.
    pub fn new(mode: SyncMode) -> (Self, SyncSchedulerHandle) {
        let (request_tx, request_rx) = mpsc::channel(32);
        let scheduler = Self { mode, request_tx };
        let handle = SyncSchedulerHandle { mode, request_rx };
        (scheduler, handle)
    }

    /// Spawn a worker that runs invocations on `orchestrator`.
    pub fn spawn(orchestrator: Arc<Orchestrator>, mode: SyncMode) -> (Self, JoinHandle<()>) {
        let (scheduler, handle) = Self::new(mode);
        let task = tokio::spawn(handle.run(move |request| {
            let orchestrator = orchestrator.clone();
            async move { orchestrator.invoke(request).await }
        }));
        (scheduler, task)
    }

    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    /// Queue an invocation and wait for its report.
    ///
    /// # Errors
    /// - `Error::Scheduler` if the worker is gone
    /// - any error of the invocation itself
    pub async fn invoke(&self, mut request: InvocationRequest) -> Result<InvocationReport> {
        request.received_at.get_or_insert_with(Instant::now);
        let (response_tx, response_rx) = oneshot::channel();

        self.request_tx
            .send((SyncRequest::Invoke(request), response_tx))
            .await
            .map_err(|_| Error::Scheduler("scheduler not running".to_string()))?;

        response_rx
            .await
            .map_err(|_| Error::Scheduler("failed to receive sync result".to_string()))?
    }

    /// Stop the worker after the invocation it is running, if any.
    pub async fn shutdown(&self) {
        let (response_tx, _) = oneshot::channel();
        let _ = self
            .request_tx
            .send((SyncRequest::Shutdown, response_tx))
            .await;
    }
}

/// Receiving side of the scheduler; run it on a tokio task.
pub struct SyncSchedulerHandle {
    mode: SyncMode,
    request_rx: mpsc::Receiver<(SyncRequest, Reply)>,
}

impl SyncSchedulerHandle {
    /// Run the worker until shutdown or until every [`SyncScheduler`] is
    /// dropped. In periodic mode the first invocation starts immediately.
    pub async fn run<F, Fut>(mut self, sync_fn: F)
    where
        F: Fn(InvocationRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<InvocationReport>> + Send,
    {
        let mut periodic = self.mode.interval().map(|period| {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        info!(mode = ?self.mode, "Sync scheduler started");

        loop {
            tokio::select! {
                received = self.request_rx.recv() => {
                    match received {
                        Some((SyncRequest::Invoke(request), response_tx)) => {
                            debug!(?request, "Processing sync request");
                            let result = sync_fn(request).await;
                            let _ = response_tx.send(result);
                        }
                        Some((SyncRequest::Shutdown, _)) => {
                            info!("Received shutdown request");
                            break;
                        }
                        None => {
                            debug!("All schedulers dropped");
                            break;
                        }
                    }
                }

                _ = Self::wait_for_periodic(&mut periodic) => {
                    debug!("Triggering periodic sync");
                    let request = InvocationRequest {
                        received_at: Some(Instant::now()),
                        ..Default::default()
                    };
                    match sync_fn(request).await {
                        Ok(report) => info!(
                            ok = report.ok,
                            partial = report.partial,
                            results = ?report.results,
                            "Periodic sync completed"
                        ),
                        Err(e) => error!("Periodic sync failed: {}", e),
                    }
                }
            }
        }

        info!("Sync scheduler stopped");
    }

    async fn wait_for_periodic(periodic: &mut Option<Interval>) {
        match periodic {
            Some(ticker) => {
                ticker.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
    }
}
