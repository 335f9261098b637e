use clap::{Args, Parser};
use std::path::PathBuf;

use crate::config::{ClientConfig, ConfigError, DEFAULT_HOST, DEFAULT_RECONNECT_DELAY_MS};
use crate::history::DEFAULT_HISTORY_CAPACITY;
use crate::session::DEFAULT_SCROLLBACK_BYTES;
use crate::session::registry::DEFAULT_SESSION_ID;
use crate::telemetry::logging::{LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "shoreline",
    about = "Multiplex interactive shell sessions over one workspace connection",
    author,
    version
)]
pub struct Cli {
    #[arg(
        long,
        env = "SHORELINE_HOST",
        default_value = DEFAULT_HOST,
        help = "Workspace terminal endpoint (ws://, wss://, http:// or https://)"
    )]
    pub host: String,

    #[arg(
        long,
        env = "SHORELINE_PROJECT",
        value_name = "ID",
        help = "Project whose workspace to attach to"
    )]
    pub project: Option<String>,

    #[arg(
        long = "reconnect-delay-ms",
        env = "SHORELINE_RECONNECT_DELAY_MS",
        value_name = "MS",
        default_value_t = DEFAULT_RECONNECT_DELAY_MS,
        help = "Fixed delay between reconnect attempts"
    )]
    pub reconnect_delay_ms: u64,

    #[arg(
        long = "reconnect-jitter-ms",
        env = "SHORELINE_RECONNECT_JITTER_MS",
        value_name = "MS",
        default_value_t = 0,
        help = "Random extra delay added to each reconnect attempt (0 disables)"
    )]
    pub reconnect_jitter_ms: u64,

    #[arg(
        long = "default-session",
        env = "SHORELINE_DEFAULT_SESSION",
        value_name = "ID",
        default_value = DEFAULT_SESSION_ID,
        help = "Id of the session the host opens for every workspace"
    )]
    pub default_session: String,

    #[arg(
        long = "history-size",
        value_name = "N",
        default_value_t = DEFAULT_HISTORY_CAPACITY,
        help = "Commands remembered per session"
    )]
    pub history_size: usize,

    #[arg(
        long = "scrollback-bytes",
        value_name = "BYTES",
        default_value_t = DEFAULT_SCROLLBACK_BYTES,
        help = "Output kept per session for replay when switching"
    )]
    pub scrollback_bytes: usize,

    #[command(flatten)]
    pub logging: LoggingArgs,
}

impl Cli {
    pub fn client_config(&self) -> Result<ClientConfig, ConfigError> {
        Ok(
            ClientConfig::new(&self.host, self.project.as_deref().unwrap_or_default())?
                .with_reconnect(self.reconnect_delay_ms, self.reconnect_jitter_ms)?
                .with_default_session(&self.default_session)?
                .with_history_capacity(self.history_size)?
                .with_scrollback_bytes(self.scrollback_bytes),
        )
    }
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        env = "SHORELINE_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        env = "SHORELINE_LOG_FILE",
        help = "Write logs to this file instead of stderr"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_build_a_client_config() {
        let cli = Cli::try_parse_from([
            "shoreline",
            "--host",
            "https://ide.example.com/terminal",
            "--project",
            "demo",
            "--reconnect-jitter-ms",
            "500",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(cli.logging.level, LogLevel::Debug);
        let config = cli.client_config().unwrap();
        assert_eq!(
            config.endpoint().as_str(),
            "wss://ide.example.com/terminal?projectId=demo"
        );
        assert_eq!(config.reconnect().jitter.as_millis(), 500);
    }

    #[test]
    fn rejects_invalid_log_level() {
        assert!(Cli::try_parse_from(["shoreline", "--log-level", "loud"]).is_err());
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
