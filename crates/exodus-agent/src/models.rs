//! Agent-side state types shared by the collector, the console reporter and
//! the REST surface.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Collector state machine positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectorState {
    /// Quiescent; waiting for a collection request.
    Ready,
    /// Verifying credentials with vCenter.
    Connecting,
    /// Credentials verified.
    Connected,
    /// Async collection in progress.
    Collecting,
    /// Collection complete (auto-transitions back to ready).
    Collected,
    /// Error during connecting or collecting.
    Error,
}

impl fmt::Display for CollectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CollectorState::Ready => "ready",
            CollectorState::Connecting => "connecting",
            CollectorState::Connected => "connected",
            CollectorState::Collecting => "collecting",
            CollectorState::Collected => "collected",
            CollectorState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Snapshot of the collector exposed over the REST surface.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectorStatus {
    pub status: CollectorState,
    pub has_credentials: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Operator-selected reporting mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    Connected,
    Disconnected,
}

impl FromStr for AgentMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "connected" => Ok(AgentMode::Connected),
            "disconnected" => Ok(AgentMode::Disconnected),
            other => Err(format!(
                "invalid mode {other:?}: must be \"connected\" or \"disconnected\""
            )),
        }
    }
}

impl fmt::Display for AgentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentMode::Connected => f.write_str("connected"),
            AgentMode::Disconnected => f.write_str("disconnected"),
        }
    }
}

/// Console link state as observed (and targeted) by the reporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleConnection {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Reporter status: what the operator asked for and what was last observed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleStatus {
    pub current: ConsoleConnection,
    pub target: ConsoleConnection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Top-level agent status returned by `GET /agent`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    pub console: ConsoleStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collector_state_serializes_lowercase() {
        let json = serde_json::to_string(&CollectorState::Collecting).unwrap();
        assert_eq!(json, "\"collecting\"");
    }

    #[test]
    fn agent_mode_parses() {
        assert_eq!("connected".parse::<AgentMode>(), Ok(AgentMode::Connected));
        assert_eq!(
            "disconnected".parse::<AgentMode>(),
            Ok(AgentMode::Disconnected)
        );
        assert!("other".parse::<AgentMode>().is_err());
    }

    #[test]
    fn collector_status_uses_camel_case() {
        let status = CollectorStatus {
            status: CollectorState::Ready,
            has_credentials: true,
            error: None,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["status"], "ready");
        assert_eq!(json["hasCredentials"], true);
        assert!(json.get("error").is_none());
    }
}
