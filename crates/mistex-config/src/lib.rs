//! Configuration for the mistex exporter.
//!
//! A YAML file with `${VAR}` references expanded from the environment,
//! layered under `MISTEX_` environment overrides, then validated and
//! translated into the runtime types of `mistex-api` and `mistex-core`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Yaml},
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use url::Url;

use mistex_api::{DEFAULT_BASE_URL, TlsMode, TransportConfig};
use mistex_core::ExporterConfig;

/// Prefix of environment overrides; nested keys are separated by `__`,
/// e.g. `MISTEX_COLLECTOR__MAX_CONCURRENCY=4`.
pub const ENV_PREFIX: &str = "MISTEX_";

/// Placeholder rendered instead of the API key.
pub const REDACTED: &str = "*****";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("failed to render config: {0}")]
    Render(#[from] serde_yaml::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── YAML config structs ─────────────────────────────────────────────

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    /// Organization to export. Resolved from the API key when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,

    #[serde(default)]
    pub mist_api: MistApi,

    #[serde(default)]
    pub exporter: Exporter,

    #[serde(default)]
    pub collector: Collector,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct MistApi {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Never serialized; see [`Config::redacted_yaml`].
    #[serde(default, skip_serializing)]
    pub api_key: Option<SecretString>,

    /// Stream endpoint override; derived from `base_url` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub websocket_url: Option<String>,

    /// PEM file with an extra root certificate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert: Option<PathBuf>,

    #[serde(default = "default_api_timeout", with = "duration")]
    pub timeout: Duration,
}

impl Default for MistApi {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            websocket_url: None,
            ca_cert: None,
            timeout: default_api_timeout(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Exporter {
    #[serde(default = "default_address")]
    pub address: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for Exporter {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Collector {
    #[serde(default = "default_collect_timeout", with = "duration")]
    pub collect_timeout: Duration,

    #[serde(default = "default_site_refresh_interval", with = "duration")]
    pub site_refresh_interval: Duration,

    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default)]
    pub site_filter: SiteFilter,
}

impl Default for Collector {
    fn default() -> Self {
        Self {
            collect_timeout: default_collect_timeout(),
            site_refresh_interval: default_site_refresh_interval(),
            max_concurrency: default_max_concurrency(),
            site_filter: SiteFilter::default(),
        }
    }
}

/// Glob patterns matched against site names. Exclusion wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct SiteFilter {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.into()
}
fn default_api_timeout() -> Duration {
    Duration::from_secs(30)
}
fn default_address() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    9200
}
fn default_collect_timeout() -> Duration {
    Duration::from_secs(30)
}
fn default_site_refresh_interval() -> Duration {
    Duration::from_secs(60)
}
fn default_max_concurrency() -> usize {
    mistex_core::config::DEFAULT_MAX_CONCURRENCY
}

/// Durations as humantime strings (`30s`, `1m`, `1h 30m`).
mod duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)
    }
}

// ── Loading ─────────────────────────────────────────────────────────

/// Load, expand, layer and validate the config at `path`.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config = from_yaml(&raw)?;
    config.validate()?;
    Ok(config)
}

/// Parse YAML text (after `${VAR}` expansion) under the environment
/// overrides. Does not validate.
pub fn from_yaml(raw: &str) -> Result<Config, ConfigError> {
    let expanded = expand_env(raw);
    let config = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Yaml::string(&expanded))
        .merge(Env::prefixed(ENV_PREFIX).split("__").ignore(&["config", "log_format"]))
        .extract()?;
    Ok(config)
}

/// Replace every `${NAME}` with the value of the environment variable
/// `NAME`. Unset variables expand to the empty string; an unterminated
/// `${` is left as is.
pub fn expand_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let name = &after[..end];
        match std::env::var(name) {
            Ok(value) => out.push_str(&value),
            Err(_) => warn!(var = name, "config references an unset environment variable"),
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    out
}

// ── Validation & translation ────────────────────────────────────────

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match &self.mist_api.api_key {
            Some(key) if !key.expose_secret().trim().is_empty() => {}
            _ => return Err(invalid("mist_api.api_key", "must be set")),
        }
        self.base_url()?;
        self.websocket_url()?;
        if self.org_id.as_deref().is_some_and(|id| id.trim().is_empty()) {
            return Err(invalid("org_id", "must not be empty when set"));
        }
        for (field, value) in [
            ("mist_api.timeout", self.mist_api.timeout),
            ("collector.collect_timeout", self.collector.collect_timeout),
            (
                "collector.site_refresh_interval",
                self.collector.site_refresh_interval,
            ),
        ] {
            if value.is_zero() {
                return Err(invalid(field, "must be greater than zero"));
            }
        }
        if self.collector.max_concurrency == 0 {
            return Err(invalid("collector.max_concurrency", "must be at least 1"));
        }
        if self.exporter.address.trim().is_empty() {
            return Err(invalid("exporter.address", "must not be empty"));
        }
        Ok(())
    }

    /// The API key, if configured.
    pub fn api_key(&self) -> Option<&SecretString> {
        self.mist_api.api_key.as_ref()
    }

    pub fn base_url(&self) -> Result<Url, ConfigError> {
        parse_url("mist_api.base_url", &self.mist_api.base_url, &["http", "https"])
    }

    /// The stream endpoint override, if any.
    pub fn websocket_url(&self) -> Result<Option<Url>, ConfigError> {
        self.mist_api
            .websocket_url
            .as_deref()
            .map(|raw| parse_url("mist_api.websocket_url", raw, &["ws", "wss"]))
            .transpose()
    }

    /// `address:port` for the HTTP listener.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.exporter.address, self.exporter.port)
    }

    pub fn transport_config(&self) -> TransportConfig {
        let tls = self
            .mist_api
            .ca_cert
            .clone()
            .map_or(TlsMode::System, TlsMode::CustomCa);
        TransportConfig {
            tls,
            timeout: self.mist_api.timeout,
        }
    }

    /// Orchestration settings for the resolved organization.
    pub fn exporter_config(&self, org_id: impl Into<String>) -> ExporterConfig {
        ExporterConfig {
            org_id: org_id.into(),
            collect_timeout: self.collector.collect_timeout,
            site_refresh_interval: self.collector.site_refresh_interval,
            max_concurrency: self.collector.max_concurrency,
        }
    }

    /// Render the effective config as YAML with the API key masked.
    pub fn redacted_yaml(&self) -> Result<String, ConfigError> {
        let mut value = serde_yaml::to_value(self)?;
        if let Some(api) = value
            .get_mut("mist_api")
            .and_then(serde_yaml::Value::as_mapping_mut)
        {
            api.insert("api_key".into(), REDACTED.into());
        }
        Ok(serde_yaml::to_string(&value)?)
    }
}

fn parse_url(field: &str, raw: &str, schemes: &[&str]) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| invalid(field, format!("invalid URL {raw}: {e}")))?;
    if !schemes.contains(&url.scheme()) {
        return Err(invalid(
            field,
            format!("scheme must be one of {}", schemes.join(", ")),
        ));
    }
    Ok(url)
}
