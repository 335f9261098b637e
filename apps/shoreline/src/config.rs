use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::session::RegistryOptions;
use crate::transport::ReconnectPolicy;

pub const DEFAULT_HOST: &str = "ws://127.0.0.1:8080/terminal";
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 3_000;
pub const PROJECT_QUERY_PARAM: &str = "projectId";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid host url: {0}")]
    InvalidUrl(String),
    #[error("a project id is required (--project or SHORELINE_PROJECT)")]
    MissingProject,
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Where to connect and how the client behaves once connected.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    host: Url,
    project: String,
    reconnect: ReconnectPolicy,
    registry: RegistryOptions,
}

impl ClientConfig {
    pub fn new(host: &str, project: &str) -> Result<Self, ConfigError> {
        let project = project.trim();
        if project.is_empty() {
            return Err(ConfigError::MissingProject);
        }
        Ok(Self {
            host: normalize_host(host)?,
            project: project.to_string(),
            reconnect: ReconnectPolicy::default(),
            registry: RegistryOptions::default(),
        })
    }

    pub fn with_reconnect(mut self, delay_ms: u64, jitter_ms: u64) -> Result<Self, ConfigError> {
        if delay_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "reconnect delay",
                reason: "must be greater than zero".into(),
            });
        }
        self.reconnect = ReconnectPolicy::fixed(Duration::from_millis(delay_ms))
            .with_jitter(Duration::from_millis(jitter_ms));
        Ok(self)
    }

    pub fn with_default_session(mut self, id: &str) -> Result<Self, ConfigError> {
        let id = id.trim();
        if id.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "default session",
                reason: "cannot be blank".into(),
            });
        }
        self.registry.default_session_id = id.to_string();
        self.registry.default_session_name = id.to_string();
        Ok(self)
    }

    pub fn with_history_capacity(mut self, capacity: usize) -> Result<Self, ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "history capacity",
                reason: "must be at least 1".into(),
            });
        }
        self.registry.history_capacity = capacity;
        Ok(self)
    }

    pub fn with_scrollback_bytes(mut self, bytes: usize) -> Self {
        self.registry.scrollback_bytes = bytes;
        self
    }

    pub fn host(&self) -> &Url {
        &self.host
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn reconnect(&self) -> ReconnectPolicy {
        self.reconnect
    }

    pub fn registry_options(&self) -> &RegistryOptions {
        &self.registry
    }

    /// The handshake URL: the host with the project id appended as a query
    /// parameter.
    pub fn endpoint(&self) -> Url {
        let mut url = self.host.clone();
        url.query_pairs_mut()
            .append_pair(PROJECT_QUERY_PARAM, &self.project);
        url
    }
}

/// Turns a user-supplied host into a WebSocket URL. A missing scheme becomes
/// `ws` for loopback hosts and `wss` otherwise; `http`/`https` map to their
/// WebSocket counterparts; `localhost` is pinned to IPv4.
pub fn normalize_host(raw: &str) -> Result<Url, ConfigError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::InvalidUrl("host cannot be empty".into()));
    }
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("{}://{trimmed}", infer_scheme(trimmed))
    };
    let mut url = Url::parse(&with_scheme)
        .map_err(|err| ConfigError::InvalidUrl(format!("{trimmed}: {err}")))?;

    let websocket_scheme = match url.scheme() {
        "ws" | "wss" => None,
        "http" => Some("ws"),
        "https" => Some("wss"),
        other => {
            return Err(ConfigError::InvalidUrl(format!(
                "unsupported scheme `{other}`"
            )));
        }
    };
    if let Some(scheme) = websocket_scheme {
        url.set_scheme(scheme)
            .map_err(|()| ConfigError::InvalidUrl(format!("cannot use {scheme} for {trimmed}")))?;
    }
    if url.host_str() == Some("localhost") {
        url.set_host(Some("127.0.0.1"))
            .map_err(|err| ConfigError::InvalidUrl(err.to_string()))?;
    }
    Ok(url)
}

fn infer_scheme(host: &str) -> &'static str {
    let authority = host.split(['/', '?']).next().unwrap_or(host);
    let hostname = match authority.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => authority,
    };
    match hostname {
        "localhost" | "127.0.0.1" | "[::1]" => "ws",
        _ => "wss",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_scheme_from_host() {
        assert_eq!(
            normalize_host("localhost:8080/terminal").unwrap().as_str(),
            "ws://127.0.0.1:8080/terminal"
        );
        assert_eq!(
            normalize_host("127.0.0.1:9000").unwrap().as_str(),
            "ws://127.0.0.1:9000/"
        );
        assert_eq!(
            normalize_host("ide.example.com/terminal").unwrap().as_str(),
            "wss://ide.example.com/terminal"
        );
    }

    #[test]
    fn maps_http_schemes_to_websocket() {
        assert_eq!(
            normalize_host("https://ide.example.com/terminal")
                .unwrap()
                .scheme(),
            "wss"
        );
        assert_eq!(
            normalize_host("http://localhost:3000/terminal").unwrap().as_str(),
            "ws://127.0.0.1:3000/terminal"
        );
    }

    #[test]
    fn rejects_unusable_hosts() {
        assert!(matches!(normalize_host("  "), Err(ConfigError::InvalidUrl(_))));
        assert!(matches!(
            normalize_host("ftp://files.example.com"),
            Err(ConfigError::InvalidUrl(_))
        ));
    }

    #[test]
    fn endpoint_carries_project_id() {
        let config = ClientConfig::new(DEFAULT_HOST, "proj 42").unwrap();
        let endpoint = config.endpoint();
        assert_eq!(endpoint.path(), "/terminal");
        let pairs: Vec<(String, String)> = endpoint
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(pairs, vec![("projectId".to_string(), "proj 42".to_string())]);
    }

    #[test]
    fn project_is_required() {
        assert_eq!(
            ClientConfig::new(DEFAULT_HOST, " ").unwrap_err(),
            ConfigError::MissingProject
        );
    }

    #[test]
    fn builder_validates_values() {
        let config = ClientConfig::new(DEFAULT_HOST, "p")
            .unwrap()
            .with_reconnect(500, 250)
            .unwrap()
            .with_default_session("shell")
            .unwrap()
            .with_history_capacity(10)
            .unwrap()
            .with_scrollback_bytes(1024);
        assert_eq!(config.reconnect().delay, Duration::from_millis(500));
        assert_eq!(config.reconnect().jitter, Duration::from_millis(250));
        assert_eq!(config.registry_options().default_session_id, "shell");
        assert_eq!(config.registry_options().history_capacity, 10);
        assert_eq!(config.registry_options().scrollback_bytes, 1024);

        let base = ClientConfig::new(DEFAULT_HOST, "p").unwrap();
        assert!(base.clone().with_reconnect(0, 0).is_err());
        assert!(base.clone().with_default_session("").is_err());
        assert!(base.with_history_capacity(0).is_err());
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = ClientConfig::new(DEFAULT_HOST, "p").unwrap();
        assert_eq!(config.reconnect().delay, Duration::from_secs(3));
        assert!(config.reconnect().jitter.is_zero());
        assert_eq!(config.registry_options().history_capacity, 50);
        assert_eq!(config.registry_options().default_session_id, "main");
    }
}
