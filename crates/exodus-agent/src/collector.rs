//! Collector state machine.
//!
//! Guards one collection job at a time: saves credentials, verifies them
//! against vCenter inline (so the HTTP caller gets fast feedback on bad
//! credentials), then hands the actual inventory walk to the scheduler.
//! State transitions are serialized under one lock; the running job updates
//! the same state from a worker.

use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tracing::{debug, error, info};

use exodus_scheduler::{Scheduler, TaskHandle};
use exodus_store::{Credentials, Database, Inventory, StoreError};

use crate::error::CollectorError;
use crate::models::{CollectorState, CollectorStatus};
use crate::vsphere::{self, InventoryWalker, VSphereError};

const VERIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Brief pause in the collected state before returning to ready, so the
/// terminal state is observable by pollers. Consumers must not rely on
/// catching it.
const READY_DWELL: Duration = Duration::from_millis(100);

pub struct CollectorService {
    scheduler: Arc<Scheduler>,
    db: Database,
    walker: Arc<dyn InventoryWalker>,
    data_folder: Option<PathBuf>,
    inner: Arc<RwLock<Inner>>,
    // Serializes concurrent start() calls across the verification await.
    admission: tokio::sync::Mutex<()>,
}

struct Inner {
    state: CollectorState,
    last_error: Option<String>,
    job: Option<TaskHandle<()>>,
}

impl CollectorService {
    pub fn new(
        scheduler: Arc<Scheduler>,
        db: Database,
        walker: Arc<dyn InventoryWalker>,
        data_folder: Option<PathBuf>,
    ) -> Self {
        match db.get_credentials() {
            Ok(_) => info!("collector initialized with existing credentials"),
            Err(StoreError::NotFound) => info!("collector initialized, awaiting credentials"),
            Err(e) => error!(error = %e, "collector failed to read stored credentials"),
        }

        Self {
            scheduler,
            db,
            walker,
            data_folder,
            inner: Arc::new(RwLock::new(Inner {
                state: CollectorState::Ready,
                last_error: None,
                job: None,
            })),
            admission: tokio::sync::Mutex::new(()),
        }
    }

    /// Current status; `has_credentials` is recomputed from the store.
    pub fn status(&self) -> CollectorStatus {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        CollectorStatus {
            status: inner.state,
            error: inner.last_error.clone(),
            has_credentials: self.db.get_credentials().is_ok(),
        }
    }

    /// Save credentials, verify them and kick off async collection.
    ///
    /// Rejects with [`CollectorError::CollectionInProgress`] while a prior
    /// job is unresolved. Verification is awaited inline under a hard
    /// timeout; the collection itself runs on the scheduler.
    pub async fn start(&self, creds: Credentials) -> Result<(), CollectorError> {
        let _admission = self.admission.lock().await;

        {
            let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(job) = &inner.job {
                if !job.is_resolved() {
                    return Err(CollectorError::CollectionInProgress);
                }
            }
        }

        self.db.save_credentials(&creds)?;
        set_state(&self.inner, CollectorState::Connecting);

        info!(url = %creds.url, "verifying vCenter credentials");
        match tokio::time::timeout(VERIFY_TIMEOUT, self.walker.verify(&creds)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                set_error(&self.inner, e.to_string());
                return Err(e.into());
            }
            Err(_) => {
                let e = VSphereError::Timeout;
                set_error(&self.inner, e.to_string());
                return Err(e.into());
            }
        }
        info!("vCenter credentials verified");
        set_state(&self.inner, CollectorState::Connected);

        self.spawn_collection(creds)
    }

    fn spawn_collection(&self, creds: Credentials) -> Result<(), CollectorError> {
        let walker = self.walker.clone();
        let db = self.db.clone();
        let inner = self.inner.clone();
        let db_path = vsphere::run_db_path(self.data_folder.as_deref());

        let handle = self.scheduler.add_work(move |cancel| async move {
            set_state(&inner, CollectorState::Collecting);
            info!("starting vSphere inventory collection");

            match walker.collect(&creds, &db_path, cancel.clone()).await {
                Ok(data) => {
                    if let Err(e) = db.save_inventory(&data) {
                        error!(error = %e, "failed to persist inventory");
                        set_error(&inner, e.to_string());
                        return;
                    }
                    info!(bytes = data.len(), "inventory collection completed");
                    set_state(&inner, CollectorState::Collected);

                    tokio::time::sleep(READY_DWELL).await;
                    transition(&inner, CollectorState::Collected, CollectorState::Ready);
                }
                Err(e) => {
                    if cancel.is_cancelled() {
                        // stop() already reset the state; don't overwrite it.
                        debug!("inventory collection cancelled");
                        return;
                    }
                    error!(error = %e, "inventory collection failed");
                    set_error(&inner, e.to_string());
                }
            }
        })?;

        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .job = Some(handle);
        Ok(())
    }

    /// Cancel any running collection and return to ready.
    ///
    /// Credentials are kept so the operator can retry.
    pub fn stop(&self) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(job) = inner.job.take() {
            if !job.is_resolved() {
                job.stop();
            }
        }
        inner.state = CollectorState::Ready;
        inner.last_error = None;
        debug!("collector stopped, credentials kept");
    }

    pub fn get_inventory(&self) -> Result<Inventory, StoreError> {
        self.db.get_inventory()
    }
}

fn set_state(inner: &RwLock<Inner>, state: CollectorState) {
    let mut inner = inner.write().unwrap_or_else(PoisonError::into_inner);
    debug!(from = %inner.state, to = %state, "collector state transition");
    inner.state = state;
    if state != CollectorState::Error {
        inner.last_error = None;
    }
}

/// Transition only when the machine is still in `from`.
fn transition(inner: &RwLock<Inner>, from: CollectorState, to: CollectorState) {
    let mut inner = inner.write().unwrap_or_else(PoisonError::into_inner);
    if inner.state == from {
        debug!(from = %from, to = %to, "collector state transition");
        inner.state = to;
        if to != CollectorState::Error {
            inner.last_error = None;
        }
    }
}

fn set_error(inner: &RwLock<Inner>, message: String) {
    let mut inner = inner.write().unwrap_or_else(PoisonError::into_inner);
    debug!(from = %inner.state, error = %message, "collector entering error state");
    inner.state = CollectorState::Error;
    inner.last_error = Some(message);
}

// Narrow read-only view consumed by the console reporter.
impl crate::console::Collector for CollectorService {
    fn state(&self) -> CollectorState {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .state
    }

    fn inventory(&self) -> Result<Vec<u8>, StoreError> {
        match self.db.get_inventory() {
            Ok(inventory) => Ok(inventory.data),
            Err(StoreError::NotFound) => Ok(b"{}".to_vec()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    use crate::console::Collector as CollectorView;

    const INVENTORY: &[u8] = br#"{"vms":[{"name":"vm1"}]}"#;

    /// Walker with scripted verify/collect behavior.
    struct MockWalker {
        verify: Mutex<Result<(), VSphereError>>,
        verify_delay: Duration,
        collect: Mutex<Result<Vec<u8>, VSphereError>>,
        block_until_cancelled: bool,
    }

    impl MockWalker {
        fn ok() -> Self {
            Self {
                verify: Mutex::new(Ok(())),
                verify_delay: Duration::ZERO,
                collect: Mutex::new(Ok(INVENTORY.to_vec())),
                block_until_cancelled: false,
            }
        }

        fn rejecting() -> Self {
            let walker = Self::ok();
            *walker.verify.lock().unwrap() = Err(VSphereError::InvalidCredentials);
            walker
        }

        fn blocking() -> Self {
            Self {
                block_until_cancelled: true,
                ..Self::ok()
            }
        }
    }

    #[async_trait]
    impl InventoryWalker for MockWalker {
        async fn verify(&self, _creds: &Credentials) -> Result<(), VSphereError> {
            if !self.verify_delay.is_zero() {
                tokio::time::sleep(self.verify_delay).await;
            }
            self.verify.lock().unwrap().clone()
        }

        async fn collect(
            &self,
            _creds: &Credentials,
            _db_path: &std::path::Path,
            cancel: CancellationToken,
        ) -> Result<Vec<u8>, VSphereError> {
            if self.block_until_cancelled {
                cancel.cancelled().await;
                return Err(VSphereError::Cancelled);
            }
            self.collect.lock().unwrap().clone()
        }
    }

    fn service(walker: MockWalker) -> CollectorService {
        service_with(Arc::new(walker))
    }

    fn service_with(walker: Arc<MockWalker>) -> CollectorService {
        CollectorService::new(
            Arc::new(Scheduler::new(1)),
            Database::open(None).unwrap(),
            walker,
            None,
        )
    }

    fn creds() -> Credentials {
        Credentials::new(
            "https://vcenter.example.com".to_string(),
            "admin".to_string(),
            "secret".to_string(),
        )
    }

    async fn wait_for_state(service: &CollectorService, state: CollectorState) {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if service.status().status == state {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| {
            panic!(
                "never reached {state}, stuck in {}",
                service.status().status
            )
        });
    }

    #[tokio::test]
    async fn start_collects_and_returns_to_ready() {
        let service = service(MockWalker::ok());
        service.start(creds()).await.unwrap();

        wait_for_state(&service, CollectorState::Ready).await;

        let status = service.status();
        assert!(status.has_credentials);
        assert!(status.error.is_none());
        assert_eq!(service.get_inventory().unwrap().data, INVENTORY);
    }

    #[tokio::test]
    async fn rejected_credentials_enter_error_state() {
        let service = service(MockWalker::rejecting());

        let err = service.start(creds()).await.unwrap_err();
        assert!(err.is_invalid_credentials());

        let status = service.status();
        assert_eq!(status.status, CollectorState::Error);
        assert!(status.error.unwrap().contains("invalid credentials"));
        // Credentials were saved before verification failed.
        assert!(status.has_credentials);
    }

    #[tokio::test]
    async fn error_state_accepts_a_new_start() {
        let walker = Arc::new(MockWalker::rejecting());
        let service = service_with(walker.clone());
        service.start(creds()).await.unwrap_err();

        *walker.verify.lock().unwrap() = Ok(());

        service.start(creds()).await.unwrap();
        wait_for_state(&service, CollectorState::Ready).await;
        assert!(service.status().error.is_none());
    }

    #[tokio::test]
    async fn overlapping_start_is_rejected() {
        let service = Arc::new(service(MockWalker::blocking()));

        service.start(creds()).await.unwrap();
        let err = service.start(creds()).await.unwrap_err();
        assert!(matches!(err, CollectorError::CollectionInProgress));
    }

    #[tokio::test]
    async fn concurrent_starts_accept_exactly_one() {
        let walker = MockWalker {
            verify_delay: Duration::from_millis(100),
            ..MockWalker::blocking()
        };
        let service = Arc::new(service(walker));

        let (first, second) = tokio::join!(service.start(creds()), service.start(creds()));
        let accepted = [&first, &second].iter().filter(|r| r.is_ok()).count();
        assert_eq!(accepted, 1);
        assert!([first, second]
            .into_iter()
            .any(|r| matches!(r, Err(CollectorError::CollectionInProgress))));
    }

    #[tokio::test]
    async fn stop_during_collection_keeps_credentials() {
        let service = service(MockWalker::blocking());
        service.start(creds()).await.unwrap();
        wait_for_state(&service, CollectorState::Collecting).await;

        service.stop();

        wait_for_state(&service, CollectorState::Ready).await;
        let status = service.status();
        assert!(status.has_credentials);
        assert!(status.error.is_none());
        // Nothing was collected.
        assert!(matches!(
            service.get_inventory(),
            Err(StoreError::NotFound)
        ));
        // And the stopped job does not flip the state back to error.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(service.status().status, CollectorState::Ready);
    }

    #[tokio::test]
    async fn failed_collection_surfaces_the_error() {
        let walker = MockWalker::ok();
        *walker.collect.lock().unwrap() = Err(VSphereError::Status {
            status: 503,
            message: "maintenance".to_string(),
        });
        let service = service(walker);

        service.start(creds()).await.unwrap();
        wait_for_state(&service, CollectorState::Error).await;
        assert!(service.status().error.unwrap().contains("503"));
    }

    #[tokio::test]
    async fn console_view_substitutes_empty_inventory() {
        let service = service(MockWalker::ok());
        assert_eq!(CollectorView::inventory(&service).unwrap(), b"{}");
        assert_eq!(CollectorView::state(&service), CollectorState::Ready);
    }
}
