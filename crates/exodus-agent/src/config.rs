//! Command line and configuration.
//!
//! Every default lives on the clap attributes below; [`Config::from_args`]
//! turns parsed flags into the immutable runtime configuration and
//! [`Config::validate`] rejects inconsistent combinations before anything
//! is started.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::builder::TypedValueParser;
use clap::{Args, Parser, Subcommand};
use thiserror::Error;
use url::Url;
use uuid::Uuid;

use crate::models::AgentMode;

#[derive(Parser, Debug)]
#[command(name = "exodus-agent", about = "On-premise migration agent", version)]
pub struct Cli {
    /// Format of the logs: console or json.
    #[arg(long, global = true, default_value = "console")]
    pub log_format: LogFormat,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "debug")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the agent.
    Run(RunArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    // Server
    /// Port on which the HTTP server is listening.
    #[arg(long = "server-http-port", default_value_t = 8080)]
    pub http_port: u16,

    /// Path to the statics folder served to the frontend.
    #[arg(long = "server-statics-folder")]
    pub statics_folder: Option<PathBuf>,

    /// Server mode: prod or dev. Prod requires the statics folder.
    #[arg(long = "server-mode", default_value = "dev")]
    pub server_mode: ServerMode,

    // Authentication
    /// Authenticate against the console with a bearer token.
    #[arg(long = "authentication-enabled")]
    pub authentication_enabled: bool,

    /// Path of the JWT file used as the bearer token.
    #[arg(long = "authentication-jwt-filepath")]
    pub jwt_filepath: Option<PathBuf>,

    // Agent
    /// Agent mode: connected or disconnected.
    #[arg(long, default_value = "disconnected")]
    pub mode: AgentMode,

    /// Unique identifier (UUID) for this agent.
    #[arg(long = "agent-id")]
    pub agent_id: Uuid,

    /// Source identifier (UUID) for this agent.
    #[arg(long = "source-id")]
    pub source_id: Uuid,

    /// Number of scheduler workers.
    #[arg(long = "num-workers", default_value_t = 3)]
    pub num_workers: usize,

    /// Path to the persistent data folder. In-memory storage when unset.
    #[arg(long = "data-folder", value_parser = clap::builder::StringValueParser::new().map(PathBuf::from))]
    pub data_folder: Option<PathBuf>,

    /// Path to the OPA policies folder.
    #[arg(long = "opa-policies-folder")]
    pub opa_policies_folder: Option<PathBuf>,

    // Console
    /// Base URL of the hosted console.
    #[arg(long = "console-url", default_value = "https://console.redhat.com")]
    pub console_url: Url,

    /// Interval between console status updates.
    #[arg(long = "console-update-interval", default_value = "5s")]
    pub update_interval: humantime::Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerMode {
    Prod,
    Dev,
}

impl FromStr for ServerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prod" => Ok(ServerMode::Prod),
            "dev" => Ok(ServerMode::Dev),
            other => Err(format!(
                "invalid server mode {other:?}: must be \"prod\" or \"dev\""
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Console,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "console" => Ok(LogFormat::Console),
            "json" => Ok(LogFormat::Json),
            other => Err(format!(
                "invalid log-format {other:?}: must be \"console\" or \"json\""
            )),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("statics folder must be set when server mode is prod")]
    MissingStaticsFolder,

    #[error("authentication-jwt-filepath must be set when authentication is enabled")]
    MissingJwtFilepath,

    #[error("invalid http-port {0}: must be between 1 and 65535")]
    InvalidPort(u16),

    #[error("invalid num-workers {0}: must be at least 1")]
    InvalidNumWorkers(usize),

    #[error("invalid log level {0:?}")]
    InvalidLogLevel(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub agent: AgentConfig,
    pub console: ConsoleConfig,
    pub log_format: LogFormat,
    pub log_level: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub http_port: u16,
    pub statics_folder: Option<PathBuf>,
    pub mode: ServerMode,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub enabled: bool,
    pub jwt_filepath: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub mode: AgentMode,
    pub agent_id: Uuid,
    pub source_id: Uuid,
    pub num_workers: usize,
    pub data_folder: Option<PathBuf>,
    pub opa_policies_folder: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ConsoleConfig {
    pub url: Url,
    pub update_interval: Duration,
}

impl Config {
    pub fn from_args(args: RunArgs, log_format: LogFormat, log_level: String) -> Self {
        Self {
            server: ServerConfig {
                http_port: args.http_port,
                statics_folder: args.statics_folder,
                mode: args.server_mode,
            },
            auth: AuthConfig {
                enabled: args.authentication_enabled,
                jwt_filepath: args.jwt_filepath,
            },
            agent: AgentConfig {
                mode: args.mode,
                agent_id: args.agent_id,
                source_id: args.source_id,
                num_workers: args.num_workers,
                // An empty path means "no persistence", same as omitting it.
                data_folder: args
                    .data_folder
                    .filter(|p| !p.as_os_str().is_empty()),
                opa_policies_folder: args.opa_policies_folder,
            },
            console: ConsoleConfig {
                url: args.console_url,
                update_interval: args.update_interval.into(),
            },
            log_format,
            log_level,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.http_port == 0 {
            return Err(ConfigError::InvalidPort(self.server.http_port));
        }
        if self.server.mode == ServerMode::Prod && self.server.statics_folder.is_none() {
            return Err(ConfigError::MissingStaticsFolder);
        }
        if self.auth.enabled && self.auth.jwt_filepath.is_none() {
            return Err(ConfigError::MissingJwtFilepath);
        }
        if self.agent.num_workers < 1 {
            return Err(ConfigError::InvalidNumWorkers(self.agent.num_workers));
        }
        if tracing_subscriber::EnvFilter::try_new(&self.log_level).is_err() {
            return Err(ConfigError::InvalidLogLevel(self.log_level.clone()));
        }
        Ok(())
    }
}

impl fmt::Display for ServerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerMode::Prod => f.write_str("prod"),
            ServerMode::Dev => f.write_str("dev"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AGENT_ID: &str = "550e8400-e29b-41d4-a716-446655440000";
    const SOURCE_ID: &str = "6ba7b810-9dad-11d1-80b4-00c04fd430c8";

    fn parse(extra: &[&str]) -> Result<Config, clap::Error> {
        let mut argv = vec![
            "exodus-agent",
            "run",
            "--agent-id",
            AGENT_ID,
            "--source-id",
            SOURCE_ID,
        ];
        argv.extend_from_slice(extra);

        let cli = Cli::try_parse_from(argv)?;
        let Command::Run(args) = cli.command;
        Ok(Config::from_args(args, cli.log_format, cli.log_level))
    }

    #[test]
    fn defaults_are_applied() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.server.http_port, 8080);
        assert_eq!(config.server.mode, ServerMode::Dev);
        assert_eq!(config.agent.mode, AgentMode::Disconnected);
        assert_eq!(config.agent.num_workers, 3);
        assert!(config.agent.data_folder.is_none());
        assert_eq!(config.console.update_interval, Duration::from_secs(5));
        assert_eq!(config.log_format, LogFormat::Console);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn agent_ids_are_required_uuids() {
        assert!(Cli::try_parse_from(["exodus-agent", "run"]).is_err());
        assert!(Cli::try_parse_from([
            "exodus-agent",
            "run",
            "--agent-id",
            "not-a-uuid",
            "--source-id",
            SOURCE_ID,
        ])
        .is_err());
    }

    #[test]
    fn invalid_mode_is_rejected_at_parse_time() {
        assert!(parse(&["--mode", "sideways"]).is_err());
        assert!(parse(&["--server-mode", "staging"]).is_err());
        assert!(parse(&["--log-format", "xml"]).is_err());
    }

    #[test]
    fn prod_requires_statics_folder() {
        let config = parse(&["--server-mode", "prod"]).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingStaticsFolder)
        ));

        let config = parse(&["--server-mode", "prod", "--server-statics-folder", "/www"]).unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn auth_requires_jwt_filepath() {
        let config = parse(&["--authentication-enabled"]).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingJwtFilepath)
        ));
    }

    #[test]
    fn workers_must_be_positive() {
        let config = parse(&["--num-workers", "0"]).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidNumWorkers(0))
        ));
    }

    #[test]
    fn empty_data_folder_means_in_memory() {
        let config = parse(&["--data-folder", ""]).unwrap();
        assert!(config.agent.data_folder.is_none());
    }

    #[test]
    fn update_interval_parses_human_durations() {
        let config = parse(&["--console-update-interval", "250ms"]).unwrap();
        assert_eq!(config.console.update_interval, Duration::from_millis(250));
    }
}
