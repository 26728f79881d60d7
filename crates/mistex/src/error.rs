//! Startup error types with miette diagnostics.
//!
//! Everything that can stop the exporter before (or while) it serves
//! lands here, with a help line and a distinct exit code.

use miette::Diagnostic;
use thiserror::Error;

use mistex_config::ConfigError;
use mistex_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const CONFIG: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const ORGANIZATION: i32 = 4;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Configuration ────────────────────────────────────────────────
    #[error("Invalid configuration in {path}")]
    #[diagnostic(
        code(mistex::config),
        help(
            "Check the file passed with --config (or MISTEX_CONFIG).\n\
             Run: mistex --check-config to validate it without connecting."
        )
    )]
    Config {
        path: String,
        #[source]
        source: ConfigError,
    },

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(mistex::validation))]
    Validation { field: String, reason: String },

    // ── Upstream ─────────────────────────────────────────────────────
    #[error("Authentication with the Mist API failed: {message}")]
    #[diagnostic(
        code(mistex::auth_failed),
        help("Verify mist_api.api_key. Tokens are created under My Account > API Token.")
    )]
    AuthFailed { message: String },

    #[error("Could not reach the Mist API")]
    #[diagnostic(
        code(mistex::connection_failed),
        help("Check mist_api.base_url and network access to the Mist cloud.")
    )]
    ConnectionFailed {
        #[source]
        source: mistex_api::Error,
    },

    #[error("API token grants access to {found} organizations, expected exactly one")]
    #[diagnostic(
        code(mistex::organization),
        help("Set org_id in the configuration file to pick the organization to export.")
    )]
    Organization { found: usize },

    #[error("Startup failed: {0}")]
    #[diagnostic(code(mistex::startup))]
    Startup(CoreError),

    // ── Serving ──────────────────────────────────────────────────────
    #[error("Cannot listen on {addr}")]
    #[diagnostic(
        code(mistex::bind),
        help("Change exporter.address / exporter.port or free the port.")
    )]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. } | Self::Validation { .. } => exit_code::CONFIG,
            Self::AuthFailed { .. } => exit_code::AUTH,
            Self::Organization { .. } => exit_code::ORGANIZATION,
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            _ => exit_code::GENERAL,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            other => Self::Config {
                path: "(config)".into(),
                source: other,
            },
        }
    }
}

impl From<mistex_api::Error> for CliError {
    fn from(err: mistex_api::Error) -> Self {
        if err.is_auth() {
            return Self::AuthFailed {
                message: err.to_string(),
            };
        }
        match err {
            mistex_api::Error::InvalidUrl(_) | mistex_api::Error::Tls(_) => Self::Validation {
                field: "mist_api".into(),
                reason: err.to_string(),
            },
            other => Self::ConnectionFailed { source: other },
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::AuthenticationFailed { message } => Self::AuthFailed { message },
            CoreError::Config { message } => Self::Validation {
                field: "configuration".into(),
                reason: message,
            },
            other => Self::Startup(other),
        }
    }
}
