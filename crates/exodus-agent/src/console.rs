//! Console reporter.
//!
//! While the operator targets connected mode, a tick loop pushes the agent
//! status to the console every interval and uploads the inventory when its
//! content changes. Remote 401/410 responses are terminal: the loop stops
//! and stays down until the operator re-enables connected mode.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use exodus_scheduler::{Scheduler, SchedulerError, TaskHandle};
use exodus_store::{Database, StoreError};

use crate::console_client::{ConsoleClient, ConsoleError};
use crate::models::{AgentMode, CollectorState, ConsoleConnection, ConsoleStatus};

/// The narrow, read-only collector view the reporter depends on.
pub trait Collector: Send + Sync {
    fn state(&self) -> CollectorState;

    /// Current inventory bytes; `{}` when nothing has been collected yet.
    fn inventory(&self) -> Result<Vec<u8>, StoreError>;
}

type Fingerprint = [u8; 32];
type SendOutcome = Result<(), ConsoleError>;

#[derive(Clone)]
pub struct Console {
    update_interval: Duration,
    agent_id: Uuid,
    source_id: Uuid,
    scheduler: Arc<Scheduler>,
    client: Arc<ConsoleClient>,
    collector: Arc<dyn Collector>,
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    status: ConsoleStatus,
    run_token: Option<CancellationToken>,
    // Distinguishes the live loop from stale ones when clearing run_token.
    run_generation: u64,
    last_fingerprint: Option<Fingerprint>,
}

impl Console {
    /// Build the reporter and start its loop when the agent mode flag or the
    /// persisted data-sharing consent asks for connected mode.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        agent_id: Uuid,
        source_id: Uuid,
        mode: AgentMode,
        update_interval: Duration,
        scheduler: Arc<Scheduler>,
        client: Arc<ConsoleClient>,
        collector: Arc<dyn Collector>,
        db: &Database,
    ) -> Self {
        let sharing_allowed = matches!(db.get_credentials(), Ok(c) if c.is_data_sharing_allowed);
        let connect = mode == AgentMode::Connected || sharing_allowed;

        let target = if connect {
            ConsoleConnection::Connected
        } else {
            ConsoleConnection::Disconnected
        };

        let console = Self {
            update_interval,
            agent_id,
            source_id,
            scheduler,
            client,
            collector,
            inner: Arc::new(Mutex::new(Inner {
                status: ConsoleStatus {
                    current: ConsoleConnection::Disconnected,
                    target,
                    error: None,
                },
                run_token: None,
                run_generation: 0,
                last_fingerprint: None,
            })),
        };

        if connect {
            info!(
                consent = sharing_allowed,
                "console reporting enabled at startup"
            );
            console.start_loop();
        }
        console
    }

    pub fn status(&self) -> ConsoleStatus {
        self.lock().status.clone()
    }

    /// Switch the reporting target. Idempotent in both directions.
    pub fn set_mode(&self, mode: AgentMode) {
        let mut inner = self.lock();
        debug!(target = %mode, current_target = ?inner.status.target, "setting agent mode");

        match mode {
            AgentMode::Connected => {
                if inner.status.target == ConsoleConnection::Connected
                    && inner.run_token.is_some()
                {
                    return;
                }
                inner.status.target = ConsoleConnection::Connected;
                inner.status.error = None;
                drop(inner);
                self.start_loop();
            }
            AgentMode::Disconnected => {
                if let Some(token) = inner.run_token.take() {
                    debug!("stopping run loop for disconnected mode");
                    token.cancel();
                }
                inner.status.target = ConsoleConnection::Disconnected;
                inner.status.current = ConsoleConnection::Disconnected;
            }
        }
    }

    /// Stop the loop without touching the operator's target. Used at
    /// process shutdown.
    pub fn shutdown(&self) {
        let mut inner = self.lock();
        if let Some(token) = inner.run_token.take() {
            token.cancel();
        }
    }

    fn start_loop(&self) {
        let token = CancellationToken::new();
        let generation = {
            let mut inner = self.lock();
            inner.run_generation += 1;
            inner.run_token = Some(token.clone());
            inner.status.current = ConsoleConnection::Connecting;
            inner.run_generation
        };
        let console = self.clone();
        tokio::spawn(async move { console.run(token, generation).await });
    }

    async fn run(self, token: CancellationToken, generation: u64) {
        debug!("console run loop started");
        let mut tick = tokio::time::interval(self.update_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tick.tick().await;

        let mut status_job = match self.dispatch_status() {
            Ok(job) => job,
            Err(e) => {
                warn!(error = %e, "scheduler unavailable, console loop exiting");
                self.clear_loop(generation);
                return;
            }
        };
        let mut inventory_job: Option<TaskHandle<SendOutcome>> = None;
        let mut pending_fingerprint: Option<Fingerprint> = None;

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("close signal received, exiting console run loop");
                    return;
                }
                _ = tick.tick() => {}
            }

            // At most one status request in flight: only re-dispatch once the
            // previous one resolved.
            if let Some(result) = status_job.poll() {
                match result {
                    Ok(Ok(())) => self.set_current(ConsoleConnection::Connected),
                    Ok(Err(e)) if e.is_terminal() => {
                        self.fail_terminal(generation, &e);
                        return;
                    }
                    Ok(Err(e)) => debug!(error = %e, "status update failed, retrying next tick"),
                    Err(e) => debug!(error = %e, "status task did not run"),
                }
                status_job = match self.dispatch_status() {
                    Ok(job) => job,
                    Err(e) => {
                        warn!(error = %e, "scheduler unavailable, console loop exiting");
                        self.clear_loop(generation);
                        return;
                    }
                };
            }

            let inventory_result = inventory_job.as_ref().and_then(TaskHandle::poll);
            if let Some(result) = inventory_result {
                inventory_job = None;
                match result {
                    Ok(Ok(())) => {
                        info!("inventory uploaded to console");
                        self.lock().last_fingerprint = pending_fingerprint;
                    }
                    Ok(Err(e)) if e.is_terminal() => {
                        self.fail_terminal(generation, &e);
                        return;
                    }
                    Ok(Err(e)) => {
                        // Remember the rejected content so it is not retried
                        // until the inventory changes again.
                        warn!(error = %e, "inventory upload failed");
                        let mut inner = self.lock();
                        inner.last_fingerprint = pending_fingerprint;
                        inner.status.error =
                            Some(format!("failed to update source inventory: {e}"));
                    }
                    Err(e) => debug!(error = %e, "inventory task did not run"),
                }
            }

            if inventory_job.is_none() && self.collector.state() == CollectorState::Collected {
                match self.collector.inventory() {
                    Ok(bytes) => {
                        let fingerprint: Fingerprint = Sha256::digest(&bytes).into();
                        if self.lock().last_fingerprint != Some(fingerprint) {
                            pending_fingerprint = Some(fingerprint);
                            match self.dispatch_inventory(bytes) {
                                Ok(job) => inventory_job = Some(job),
                                Err(e) => warn!(error = %e, "failed to schedule inventory upload"),
                            }
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to read inventory"),
                }
            }
        }
    }

    fn dispatch_status(&self) -> Result<TaskHandle<SendOutcome>, SchedulerError> {
        let client = self.client.clone();
        let agent_id = self.agent_id;
        let source_id = self.source_id;
        let status = self.collector.state();
        self.scheduler.add_work(move |_cancel| async move {
            client.update_agent_status(agent_id, source_id, status).await
        })
    }

    fn dispatch_inventory(
        &self,
        inventory: Vec<u8>,
    ) -> Result<TaskHandle<SendOutcome>, SchedulerError> {
        let client = self.client.clone();
        let source_id = self.source_id;
        self.scheduler.add_work(move |_cancel| async move {
            client.update_source_inventory(source_id, inventory).await
        })
    }

    fn set_current(&self, current: ConsoleConnection) {
        self.lock().status.current = current;
    }

    /// Record a terminal remote error and tear the loop down. A superseded
    /// loop generation leaves the live loop's status alone.
    fn fail_terminal(&self, generation: u64, err: &ConsoleError) {
        let mut inner = self.lock();
        if inner.run_generation != generation {
            return;
        }
        error!(error = %err, "terminal console error, stopping reporter");
        inner.status.current = ConsoleConnection::Error;
        inner.status.error = Some(err.to_string());
        inner.run_token = None;
    }

    fn clear_loop(&self, generation: u64) {
        let mut inner = self.lock();
        if inner.run_generation == generation {
            inner.run_token = None;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
