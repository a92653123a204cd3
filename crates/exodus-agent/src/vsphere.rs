//! vCenter access.
//!
//! The collector depends only on the [`InventoryWalker`] trait; the
//! production [`VCenterWalker`] binds it to the vCenter Automation REST API.
//! A collection run persists the raw objects to a per-run `vsphere.db` next
//! to the agent database and returns the inventory as one JSON document.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

use exodus_store::Credentials;

const DEFAULT_SDK_PATH: &str = "/sdk";
const SESSION_HEADER: &str = "vmware-api-session-id";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Object kinds walked per collection run, with the inventory key each one
/// lands under.
const INVENTORY_KINDS: &[(&str, &str)] = &[
    ("vm", "vms"),
    ("host", "hosts"),
    ("datastore", "datastores"),
    ("network", "networks"),
];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VSphereError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("invalid vCenter URL: {0}")]
    InvalidUrl(String),

    #[error("vCenter request failed: {0}")]
    Http(String),

    #[error("vCenter returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("inventory database error: {0}")]
    Database(String),

    #[error("collection cancelled")]
    Cancelled,

    #[error("credential verification timed out")]
    Timeout,
}

/// Parse and normalize the endpoint URL from stored credentials.
///
/// An empty or root path defaults to the SDK endpoint.
pub fn parse_vcenter_url(creds: &Credentials) -> Result<Url, VSphereError> {
    let mut url = Url::parse(&creds.url).map_err(|e| VSphereError::InvalidUrl(e.to_string()))?;
    if url.host_str().is_none() {
        return Err(VSphereError::InvalidUrl("missing host".to_string()));
    }
    if url.path().is_empty() || url.path() == "/" {
        url.set_path(DEFAULT_SDK_PATH);
    }
    Ok(url)
}

/// Map a login failure onto [`VSphereError`].
///
/// vCenter reports rejected credentials in a handful of phrasings; anything
/// else is surfaced verbatim.
fn classify_login_error(status: u16, message: String) -> VSphereError {
    if status == 401 || is_login_failure(&message) {
        return VSphereError::InvalidCredentials;
    }
    VSphereError::Status { status, message }
}

fn is_login_failure(message: &str) -> bool {
    message.contains("Login failure")
        || (message.contains("incorrect") && message.contains("password"))
}

/// The inventory walker consumed by the collector.
#[async_trait]
pub trait InventoryWalker: Send + Sync {
    /// Check that the credentials open a session against the endpoint.
    async fn verify(&self, creds: &Credentials) -> Result<(), VSphereError>;

    /// Walk the endpoint's inventory, persisting raw objects to `db_path`,
    /// and return the assembled inventory JSON.
    async fn collect(
        &self,
        creds: &Credentials,
        db_path: &Path,
        cancel: CancellationToken,
    ) -> Result<Vec<u8>, VSphereError>;
}

/// Production walker over the vCenter Automation REST API.
pub struct VCenterWalker {
    http: reqwest::Client,
}

impl VCenterWalker {
    /// vCenter appliances commonly run self-signed certificates, so TLS
    /// verification is disabled on this client.
    pub fn new() -> Result<Self, VSphereError> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| VSphereError::Http(e.to_string()))?;
        Ok(Self { http })
    }

    fn api_base(creds: &Credentials) -> Result<Url, VSphereError> {
        let mut base = parse_vcenter_url(creds)?;
        base.set_path("/api");
        base.set_query(None);
        Ok(base)
    }

    async fn login(&self, base: &Url, creds: &Credentials) -> Result<String, VSphereError> {
        let response = self
            .http
            .post(format!("{base}/session"))
            .basic_auth(&creds.username, Some(&creds.password))
            .send()
            .await
            .map_err(|e| VSphereError::Http(e.to_string()))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(classify_login_error(status.as_u16(), body));
        }

        // The session endpoint returns the token as a bare JSON string.
        serde_json::from_str(&body).map_err(|e| VSphereError::Http(e.to_string()))
    }

    async fn logout(&self, base: &Url, session: &str) {
        let _ = self
            .http
            .delete(format!("{base}/session"))
            .header(SESSION_HEADER, session)
            .send()
            .await;
    }

    async fn list(&self, base: &Url, session: &str, kind: &str) -> Result<Value, VSphereError> {
        let response = self
            .http
            .get(format!("{base}/vcenter/{kind}"))
            .header(SESSION_HEADER, session)
            .send()
            .await
            .map_err(|e| VSphereError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(VSphereError::Status {
                status: status.as_u16(),
                message,
            });
        }
        response
            .json()
            .await
            .map_err(|e| VSphereError::Http(e.to_string()))
    }

    async fn walk(
        &self,
        base: &Url,
        session: &str,
        db_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, VSphereError> {
        let run_db = RunDatabase::create(db_path)?;
        let mut inventory = serde_json::Map::new();

        for (kind, key) in INVENTORY_KINDS {
            let objects = tokio::select! {
                _ = cancel.cancelled() => return Err(VSphereError::Cancelled),
                result = self.list(base, session, kind) => result?,
            };
            let count = objects.as_array().map(Vec::len).unwrap_or(0);
            debug!(kind, count, "walked inventory objects");

            run_db.insert(kind, &objects)?;
            inventory.insert((*key).to_string(), objects);
        }

        serde_json::to_vec(&Value::Object(inventory)).map_err(|e| VSphereError::Http(e.to_string()))
    }
}

#[async_trait]
impl InventoryWalker for VCenterWalker {
    async fn verify(&self, creds: &Credentials) -> Result<(), VSphereError> {
        let base = Self::api_base(creds)?;
        let session = self.login(&base, creds).await?;
        self.logout(&base, &session).await;
        Ok(())
    }

    async fn collect(
        &self,
        creds: &Credentials,
        db_path: &Path,
        cancel: CancellationToken,
    ) -> Result<Vec<u8>, VSphereError> {
        let base = Self::api_base(creds)?;
        let session = self.login(&base, creds).await?;
        info!(endpoint = %base, db = %db_path.display(), "starting inventory walk");

        let result = self.walk(&base, &session, db_path, &cancel).await;
        self.logout(&base, &session).await;
        result
    }
}

/// Raw-object database backing one collection run.
///
/// Owned exclusively by the run; a fresh run deletes the previous file.
struct RunDatabase {
    conn: rusqlite::Connection,
}

impl RunDatabase {
    fn create(path: &Path) -> Result<Self, VSphereError> {
        if path.exists() {
            std::fs::remove_file(path).map_err(|e| VSphereError::Database(e.to_string()))?;
        }
        let conn =
            rusqlite::Connection::open(path).map_err(|e| VSphereError::Database(e.to_string()))?;
        conn.execute_batch(
            "CREATE TABLE objects (
                kind TEXT NOT NULL,
                body TEXT NOT NULL
            );",
        )
        .map_err(|e| VSphereError::Database(e.to_string()))?;
        Ok(Self { conn })
    }

    fn insert(&self, kind: &str, objects: &Value) -> Result<(), VSphereError> {
        let Some(objects) = objects.as_array() else {
            return Ok(());
        };
        for object in objects {
            self.conn
                .execute(
                    "INSERT INTO objects (kind, body) VALUES (?1, ?2)",
                    rusqlite::params![kind, object.to_string()],
                )
                .map_err(|e| VSphereError::Database(e.to_string()))?;
        }
        Ok(())
    }
}

/// Path of the raw-object database for a collection run.
pub fn run_db_path(data_folder: Option<&Path>) -> PathBuf {
    data_folder
        .map(Path::to_path_buf)
        .unwrap_or_else(std::env::temp_dir)
        .join("vsphere.db")
}
