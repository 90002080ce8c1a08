//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.relay/config.json`) and environment.
//! Every field has a default, so an empty or missing file yields a working loopback setup
//! that only lacks the backend URL and channel credentials.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::conversation::DEFAULT_ERROR_REPLY;
use crate::responder::DEFAULT_FALLBACK_REPLY;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// HTTP server settings (health, webhooks).
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Backend responder endpoint and reply texts.
    #[serde(default)]
    pub backend: BackendConfig,

    /// Channel settings (e.g. Telegram).
    #[serde(default)]
    pub channels: ChannelsConfig,
}

/// Gateway bind and port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Port for HTTP (default 3008).
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_gateway_bind")]
    pub bind: String,
}

fn default_gateway_port() -> u16 {
    3008
}

fn default_gateway_bind() -> String {
    "127.0.0.1".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
        }
    }
}

/// Backend responder settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    /// Endpoint that receives `{message, conversationId}`. Overridden by URL_BACKEND env.
    #[serde(default)]
    pub url: Option<String>,

    /// Upper bound for one backend call, in seconds (default 30, minimum 1).
    #[serde(default = "default_backend_timeout_secs")]
    pub timeout_secs: u64,

    /// Sent when the backend answers without a `respuesta` field.
    #[serde(default = "default_fallback_reply")]
    pub fallback_reply: String,

    /// Sent when the backend call fails (network, non-2xx, timeout).
    #[serde(default = "default_error_reply")]
    pub error_reply: String,
}

fn default_backend_timeout_secs() -> u64 {
    30
}

fn default_fallback_reply() -> String {
    DEFAULT_FALLBACK_REPLY.to_string()
}

fn default_error_reply() -> String {
    DEFAULT_ERROR_REPLY.to_string()
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: default_backend_timeout_secs(),
            fallback_reply: default_fallback_reply(),
            error_reply: default_error_reply(),
        }
    }
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

/// Per-channel config (e.g. Telegram bot token).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelsConfig {
    #[serde(default)]
    pub telegram: TelegramChannelConfig,
}

/// Telegram channel config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelegramChannelConfig {
    /// Bot token from BotFather. Overridden by TELEGRAM_BOT_TOKEN env when set.
    pub bot_token: Option<String>,
    /// When set, use webhook mode: Telegram POSTs updates to this URL. If unset, long-poll getUpdates is used.
    pub webhook_url: Option<String>,
    /// Optional secret for webhook verification (X-Telegram-Bot-Api-Secret-Token). Used only when webhook_url is set.
    pub webhook_secret: Option<String>,
    /// Bot API base URL (default https://api.telegram.org).
    pub api_base: Option<String>,
}

/// Trimmed, non-empty override from `lookup`, else the trimmed, non-empty configured value.
fn override_value(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
    configured: Option<String>,
) -> Option<String> {
    lookup(var)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            configured
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
}

/// Apply environment overrides to a loaded config: `PORT` (gateway port), `URL_BACKEND`,
/// `TELEGRAM_BOT_TOKEN`, and `TELEGRAM_API_BASE`. Blank configured values become `None`.
/// The gateway itself never reads the environment; it runs with the config it is given.
pub fn apply_env_overrides(config: &mut Config) {
    apply_overrides(config, |var| std::env::var(var).ok());
}

fn apply_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(port) = lookup("PORT")
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
    {
        match port.parse::<u16>() {
            Ok(p) => config.gateway.port = p,
            Err(_) => log::warn!("ignoring invalid PORT {:?}, using {}", port, config.gateway.port),
        }
    }
    config.backend.url = override_value(&lookup, "URL_BACKEND", config.backend.url.take());
    let telegram = &mut config.channels.telegram;
    telegram.bot_token = override_value(&lookup, "TELEGRAM_BOT_TOKEN", telegram.bot_token.take());
    telegram.api_base = override_value(&lookup, "TELEGRAM_API_BASE", telegram.api_base.take());
}

/// True if the bind address is loopback (127.0.0.1, ::1, etc.).
pub fn is_loopback_bind(bind: &str) -> bool {
    let b = bind.trim();
    b == "127.0.0.1" || b == "::1" || b == "localhost"
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("RELAY_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".relay").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the given path, else the default path (or RELAY_CONFIG_PATH). Missing file => default config.
/// Environment overrides are applied. Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let mut config: Config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    apply_env_overrides(&mut config);
    Ok((config, path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.gateway.port, 3008);
        assert_eq!(config.gateway.bind, "127.0.0.1");
        assert_eq!(config.backend.url, None);
        assert_eq!(config.backend.timeout(), Duration::from_secs(30));
        assert_eq!(config.backend.error_reply, DEFAULT_ERROR_REPLY);
        assert_eq!(config.backend.fallback_reply, DEFAULT_FALLBACK_REPLY);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: Config = serde_json::from_str(
            r#"{"backend":{"url":"http://127.0.0.1:8000/chat","timeoutSecs":5},"channels":{"telegram":{"webhookSecret":"s"}}}"#,
        )
        .unwrap();
        assert_eq!(config.gateway.port, 3008);
        assert_eq!(config.backend.url.as_deref(), Some("http://127.0.0.1:8000/chat"));
        assert_eq!(config.backend.timeout(), Duration::from_secs(5));
        assert_eq!(config.backend.error_reply, DEFAULT_ERROR_REPLY);
        assert_eq!(config.channels.telegram.webhook_secret.as_deref(), Some("s"));
    }

    #[test]
    fn zero_timeout_is_clamped() {
        let mut backend = BackendConfig::default();
        backend.timeout_secs = 0;
        assert_eq!(backend.timeout(), Duration::from_secs(1));
    }

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var: &str| vars.get(var).cloned()
    }

    #[test]
    fn environment_overrides_config() {
        let mut config = Config::default();
        config.backend.url = Some("http://from-file/chat".to_string());
        apply_overrides(
            &mut config,
            lookup(&[
                ("PORT", " 8080 "),
                ("URL_BACKEND", "http://from-env/chat"),
                ("TELEGRAM_BOT_TOKEN", "123:abc"),
                ("TELEGRAM_API_BASE", "http://127.0.0.1:9"),
            ]),
        );
        assert_eq!(config.gateway.port, 8080);
        assert_eq!(config.backend.url.as_deref(), Some("http://from-env/chat"));
        assert_eq!(config.channels.telegram.bot_token.as_deref(), Some("123:abc"));
        assert_eq!(config.channels.telegram.api_base.as_deref(), Some("http://127.0.0.1:9"));
    }

    #[test]
    fn invalid_or_blank_port_keeps_configured_port() {
        let mut config = Config::default();
        config.gateway.port = 4000;
        apply_overrides(&mut config, lookup(&[("PORT", "not-a-port")]));
        assert_eq!(config.gateway.port, 4000);
        apply_overrides(&mut config, lookup(&[("PORT", "  ")]));
        assert_eq!(config.gateway.port, 4000);
    }

    #[test]
    fn blank_values_are_ignored() {
        let mut config = Config::default();
        config.backend.url = Some(" http://backend ".to_string());
        config.channels.telegram.bot_token = Some("   ".to_string());
        apply_overrides(&mut config, lookup(&[("URL_BACKEND", "  ")]));
        assert_eq!(config.backend.url.as_deref(), Some("http://backend"));
        assert_eq!(config.channels.telegram.bot_token, None);
    }

    #[test]
    fn loopback_binds() {
        assert!(is_loopback_bind("127.0.0.1"));
        assert!(is_loopback_bind(" localhost "));
        assert!(!is_loopback_bind("0.0.0.0"));
    }

    #[test]
    fn missing_file_loads_defaults() {
        let path = std::env::temp_dir().join("relay-config-test-missing").join("config.json");
        let (config, used) = load_config(Some(path.clone())).unwrap();
        assert_eq!(used, path);
        assert_eq!(config.gateway.bind, "127.0.0.1");
        assert_eq!(config.backend.timeout(), Duration::from_secs(30));
    }
}
