// mistex-core: Site reconciliation, per-site stream supervision and the
// bounded scrape fan-out, written against an abstract source and sink.

pub mod collector;
pub mod config;
pub mod error;
pub mod exporter;
pub mod filter;
pub mod reconcile;
pub mod sink;
pub mod source;
pub mod supervisor;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod testing;

// ── Primary re-exports ──────────────────────────────────────────────
pub use collector::{Collector, ScrapeReport};
pub use config::ExporterConfig;
pub use error::CoreError;
pub use exporter::Exporter;
pub use filter::{SiteFilter, SitePredicate};
pub use reconcile::{ReconcileReport, Reconciler, SupervisedSite};
pub use sink::{MetricSink, PrometheusSink};
pub use source::{MistSource, OrgClient};
pub use supervisor::StreamSupervisor;
