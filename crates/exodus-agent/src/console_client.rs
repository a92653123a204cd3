//! Outbound client for the hosted console.
//!
//! Two endpoints: agent status (`PUT /agents/{agent_id}`) and source
//! inventory (`PUT /sources/{source_id}`), both bearer-authenticated when
//! the agent was started with authentication enabled.

use reqwest::StatusCode;
use serde::Serialize;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

use crate::models::CollectorState;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsoleError {
    #[error("console rejected the agent token")]
    Unauthorized,

    #[error("agent or source is gone")]
    Gone,

    #[error("console returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("console request failed: {0}")]
    Transport(String),
}

impl ConsoleError {
    /// Terminal errors stop the reporter until the operator re-enables
    /// connected mode; everything else is retried on the next tick.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConsoleError::Unauthorized | ConsoleError::Gone)
    }
}

#[derive(Serialize)]
struct AgentStatusUpdate {
    source_id: Uuid,
    status: CollectorState,
}

pub struct ConsoleClient {
    http: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl ConsoleClient {
    pub fn new(base_url: Url, token: Option<String>) -> Result<Self, ConsoleError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("exodus-agent/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ConsoleError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url,
            token,
        })
    }

    pub async fn update_agent_status(
        &self,
        agent_id: Uuid,
        source_id: Uuid,
        status: CollectorState,
    ) -> Result<(), ConsoleError> {
        let url = self.endpoint(&format!("agents/{agent_id}"));
        let mut request = self
            .http
            .put(url)
            .json(&AgentStatusUpdate { source_id, status });
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ConsoleError::Transport(e.to_string()))?;
        Self::check(response).await
    }

    /// Upload the inventory JSON as-is.
    pub async fn update_source_inventory(
        &self,
        source_id: Uuid,
        inventory: Vec<u8>,
    ) -> Result<(), ConsoleError> {
        let url = self.endpoint(&format!("sources/{source_id}"));
        let mut request = self
            .http
            .put(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(inventory);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ConsoleError::Transport(e.to_string()))?;
        Self::check(response).await
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.as_str().trim_end_matches('/'), path)
    }

    async fn check(response: reqwest::Response) -> Result<(), ConsoleError> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let message = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::UNAUTHORIZED => ConsoleError::Unauthorized,
            StatusCode::GONE => ConsoleError::Gone,
            other => ConsoleError::Status {
                status: other.as_u16(),
                message,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_classification() {
        assert!(ConsoleError::Unauthorized.is_terminal());
        assert!(ConsoleError::Gone.is_terminal());
        assert!(!ConsoleError::Status {
            status: 500,
            message: String::new()
        }
        .is_terminal());
        assert!(!ConsoleError::Transport("timeout".to_string()).is_terminal());
    }

    #[test]
    fn endpoints_join_with_and_without_trailing_slash() {
        let agent_id = Uuid::new_v4();
        for base in ["https://console.example.com", "https://console.example.com/"] {
            let client = ConsoleClient::new(Url::parse(base).unwrap(), None).unwrap();
            assert_eq!(
                client.endpoint(&format!("agents/{agent_id}")),
                format!("https://console.example.com/agents/{agent_id}")
            );
        }
    }
}
