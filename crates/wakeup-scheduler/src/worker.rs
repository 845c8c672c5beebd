use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::{runner::ExecutionRunner, store::JobStore};

/// An execution handed to the worker pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub execution_id: String,
    /// Do not start before this instant.
    pub not_before: DateTime<Utc>,
}

/// Producer side of the execution queue. Cheap to clone.
#[derive(Clone)]
pub struct ExecutionQueue {
    tx: mpsc::Sender<WorkItem>,
    store: Arc<JobStore>,
}

impl ExecutionQueue {
    pub fn channel(capacity: usize, store: Arc<JobStore>) -> (Self, mpsc::Receiver<WorkItem>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx, store }, rx)
    }

    /// Hand an execution to the workers. When the queue is full or closed the
    /// execution is failed instead of silently dropped.
    pub fn enqueue(&self, execution_id: &str, not_before: DateTime<Utc>) -> bool {
        let item = WorkItem {
            execution_id: execution_id.to_string(),
            not_before,
        };
        let reason = match self.tx.try_send(item) {
            Ok(()) => return true,
            Err(mpsc::error::TrySendError::Full(_)) => "execution queue full",
            Err(mpsc::error::TrySendError::Closed(_)) => "execution queue closed",
        };
        warn!(%execution_id, reason, "could not enqueue execution");
        if let Err(e) = self.store.fail_execution(execution_id, reason, Utc::now()) {
            error!(%execution_id, error = %e, "failed to mark unqueued execution as failed");
        }
        false
    }
}

/// Consumes the queue and runs executions with bounded concurrency.
pub struct WorkerPool {
    rx: mpsc::Receiver<WorkItem>,
    runner: Arc<ExecutionRunner>,
    semaphore: Arc<Semaphore>,
    tasks: JoinSet<()>,
}

impl WorkerPool {
    pub fn new(rx: mpsc::Receiver<WorkItem>, runner: Arc<ExecutionRunner>, workers: usize) -> Self {
        Self {
            rx,
            runner,
            semaphore: Arc::new(Semaphore::new(workers.max(1))),
            tasks: JoinSet::new(),
        }
    }

    /// Run until `shutdown` flips to `true` or every queue handle is dropped,
    /// then wait for executions already running. Items still waiting for
    /// their `not_before` stay pending for startup recovery.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(workers = self.semaphore.available_permits(), "worker pool started");
        loop {
            tokio::select! {
                item = self.rx.recv() => {
                    let Some(item) = item else { break };
                    self.spawn(item, shutdown.clone());
                }
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    log_join(joined);
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        if !self.tasks.is_empty() {
            info!(in_flight = self.tasks.len(), "waiting for running executions");
        }
        while let Some(joined) = self.tasks.join_next().await {
            log_join(joined);
        }
        info!("worker pool stopped");
    }

    fn spawn(&mut self, item: WorkItem, mut shutdown: watch::Receiver<bool>) {
        let runner = self.runner.clone();
        let semaphore = self.semaphore.clone();
        self.tasks.spawn(async move {
            let wait = (item.not_before - Utc::now()).to_std().unwrap_or_default();
            if !wait.is_zero() && !*shutdown.borrow() {
                let deadline = tokio::time::Instant::now() + wait;
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {}
                    stopped = async { shutdown.wait_for(|stop| *stop).await.is_ok() } => {
                        if !stopped {
                            tokio::time::sleep_until(deadline).await;
                        }
                    }
                }
            }
            if *shutdown.borrow() && Utc::now() < item.not_before {
                debug!(execution_id = %item.execution_id, "shutdown before start time, left pending");
                return;
            }
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return;
            };
            if let Err(e) = runner.run(&item.execution_id).await {
                error!(execution_id = %item.execution_id, error = %e, "execution run failed");
            }
        });
    }
}

fn log_join(joined: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        error!(error = %e, "execution task panicked or was cancelled");
    }
}
