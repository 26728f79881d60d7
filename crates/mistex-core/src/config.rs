// ── Runtime orchestration configuration ──
//
// Tuning knobs for the reconciler and the scrape collector. Like the
// rest of this crate it never touches disk: the binary loads the YAML
// file through `mistex-config` and hands a finished `ExporterConfig` in.

use std::time::Duration;

/// Default number of sites fetched concurrently during one scrape.
pub const DEFAULT_MAX_CONCURRENCY: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExporterConfig {
    /// Organization whose sites are collected. Reported when `run` starts;
    /// the source carries its own copy for the API calls.
    pub org_id: String,
    /// Upper bound for one scrape, from request to response.
    pub collect_timeout: Duration,
    /// Cadence of the site-directory reconciliation.
    pub site_refresh_interval: Duration,
    /// Worker limit for the per-scrape site fan-out.
    pub max_concurrency: usize,
}

impl ExporterConfig {
    pub fn new(org_id: impl Into<String>) -> Self {
        Self {
            org_id: org_id.into(),
            ..Self::default()
        }
    }
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            org_id: String::new(),
            collect_timeout: Duration::from_secs(30),
            site_refresh_interval: Duration::from_secs(60),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}
