// ── Core error types ──
//
// Failures the orchestrator can observe. Per-site variants never
// escape the loop that produced them; they are logged and the site is
// skipped or retried on the next reconciliation tick. The
// `From<mistex_api::Error>` impl keeps HTTP status codes and transport
// detail out of the domain vocabulary.

use mistex_api::StreamKind;
use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Directory / organization ─────────────────────────────────────
    /// The site list could not be fetched. Skips one reconciliation
    /// tick or aborts one scrape.
    #[error("Site directory unavailable: {reason}")]
    DirectoryUnavailable { reason: String },

    /// Organization alarm/ticket counters could not be fetched; the
    /// scrape is aborted before any per-site work is dispatched.
    #[error("Organization counters unavailable: {reason}")]
    OrgCountersUnavailable { reason: String },

    // ── Streaming ────────────────────────────────────────────────────
    #[error("Cannot open {feed} stream for site {site}: {reason}")]
    SubscriptionOpenFailed {
        site: String,
        feed: StreamKind,
        reason: String,
    },

    #[error("{feed} stream for site {site} closed upstream")]
    SubscriptionClosed { site: String, feed: StreamKind },

    // ── Polling ──────────────────────────────────────────────────────
    #[error("Fetching stats for site {site} failed: {reason}")]
    SiteFetchFailed { site: String, reason: String },

    // ── Filtering ────────────────────────────────────────────────────
    /// The inclusion predicate errored; the site is treated as excluded
    /// for this cycle.
    #[error("Cannot evaluate site filter for {site}: {reason}")]
    FilterEvaluationFailed { site: String, reason: String },

    // ── Upstream (wrapped, not exposed raw) ──────────────────────────
    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("API error: {message}")]
    Api {
        message: String,
        /// HTTP status code (if applicable).
        status: Option<u16>,
    },

    // ── Configuration / metrics ──────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Metrics registry error: {0}")]
    Metrics(#[from] prometheus::Error),

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Site this error is scoped to, if any.
    pub fn site(&self) -> Option<&str> {
        match self {
            Self::SubscriptionOpenFailed { site, .. }
            | Self::SubscriptionClosed { site, .. }
            | Self::SiteFetchFailed { site, .. }
            | Self::FilterEvaluationFailed { site, .. } => Some(site),
            _ => None,
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<mistex_api::Error> for CoreError {
    fn from(err: mistex_api::Error) -> Self {
        if err.is_auth() {
            return CoreError::AuthenticationFailed {
                message: err.to_string(),
            };
        }
        match err {
            mistex_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            mistex_api::Error::Tls(msg) => CoreError::Config {
                message: format!("TLS error: {msg}"),
            },
            other => CoreError::Api {
                status: other.status(),
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_errors_stay_distinct() {
        let err = CoreError::from(mistex_api::Error::Authentication {
            status: 401,
            message: "Invalid token.".into(),
        });
        assert!(matches!(err, CoreError::AuthenticationFailed { .. }));
    }

    #[test]
    fn api_status_is_preserved() {
        let err = CoreError::from(mistex_api::Error::RateLimited {
            retry_after_secs: 5,
        });
        match err {
            CoreError::Api { status, .. } => assert_eq!(status, Some(429)),
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[test]
    fn site_scoped_errors_report_their_site() {
        let err = CoreError::SubscriptionClosed {
            site: "HQ".into(),
            feed: StreamKind::Devices,
        };
        assert_eq!(err.site(), Some("HQ"));
        assert_eq!(err.to_string(), "devices stream for site HQ closed upstream");
        assert_eq!(
            CoreError::DirectoryUnavailable {
                reason: "down".into()
            }
            .site(),
            None
        );
    }
}
