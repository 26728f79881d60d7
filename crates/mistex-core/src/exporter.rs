// ── Exporter facade ──
//
// Ties the streaming domain (reconciler + supervisors) and the scrape
// domain (fan-out collector) to one source, predicate and sink. Cheaply
// cloneable; the HTTP layer holds a clone for scrapes while `run` drives
// reconciliation on its own task.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::collector::{Collector, ScrapeReport};
use crate::config::ExporterConfig;
use crate::error::CoreError;
use crate::filter::SitePredicate;
use crate::reconcile::{Reconciler, SupervisedSite};
use crate::sink::MetricSink;
use crate::source::MistSource;

pub struct Exporter<S> {
    inner: Arc<ExporterInner<S>>,
}

impl<S> Clone for Exporter<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct ExporterInner<S> {
    config: ExporterConfig,
    reconciler: Reconciler<S>,
    collector: Collector<S>,
    ready: watch::Sender<bool>,
}

impl<S: MistSource> Exporter<S> {
    pub fn new(
        config: ExporterConfig,
        source: Arc<S>,
        predicate: Arc<dyn SitePredicate>,
        sink: Arc<dyn MetricSink>,
    ) -> Self {
        let reconciler = Reconciler::new(
            Arc::clone(&source),
            Arc::clone(&predicate),
            Arc::clone(&sink),
        );
        let collector = Collector::new(source, predicate, sink, config.max_concurrency);
        let (ready, _) = watch::channel(false);

        Self {
            inner: Arc::new(ExporterInner {
                config,
                reconciler,
                collector,
                ready,
            }),
        }
    }

    pub fn config(&self) -> &ExporterConfig {
        &self.inner.config
    }

    // ── Streaming domain ─────────────────────────────────────────

    /// Reconcile once, signal readiness, then reconcile on every
    /// `site_refresh_interval` until `cancel` fires.
    ///
    /// Returns an error only if the first reconciliation fails. On
    /// cancellation every supervisor is stopped and awaited before
    /// returning `Ok(())`.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), CoreError> {
        let reconciler = &self.inner.reconciler;

        let first = reconciler.reconcile(&cancel).await;
        let report = match first {
            Ok(report) => report,
            Err(e) => {
                reconciler.shutdown().await;
                return Err(e);
            }
        };
        info!(
            org_id = %self.inner.config.org_id,
            sites = report.started.len(),
            "initial site streams started"
        );
        self.inner.ready.send_replace(true);

        let period = self.inner.config.site_refresh_interval.max(Duration::from_secs(1));
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = reconciler.reconcile(&cancel).await {
                        warn!(error = %e, "site reconciliation failed");
                    }
                }
            }
        }

        reconciler.shutdown().await;
        info!("exporter stopped");
        Ok(())
    }

    /// Resolves once the first reconciliation has completed.
    pub async fn ready(&self) {
        let mut rx = self.inner.ready.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|ready| *ready).await;
    }

    pub fn is_ready(&self) -> bool {
        *self.inner.ready.borrow()
    }

    pub fn supervised_sites(&self) -> Vec<SupervisedSite> {
        self.inner.reconciler.supervised_sites()
    }

    // ── Scrape domain ────────────────────────────────────────────

    /// Scrape with the configured `collect_timeout`.
    pub async fn collect(&self) -> Result<ScrapeReport, CoreError> {
        self.collect_until(Instant::now() + self.inner.config.collect_timeout)
            .await
    }

    pub async fn collect_until(&self, deadline: Instant) -> Result<ScrapeReport, CoreError> {
        self.inner.collector.collect(deadline).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    use crate::filter::SiteFilter;
    use crate::testing::{FakeSource, RecordingSink};

    fn exporter(source: &Arc<FakeSource>, sink: &Arc<RecordingSink>) -> Exporter<FakeSource> {
        let config = ExporterConfig {
            site_refresh_interval: Duration::from_secs(60),
            ..ExporterConfig::new("org-1")
        };
        Exporter::new(
            config,
            Arc::clone(source),
            Arc::new(SiteFilter::allow_all()),
            Arc::clone(sink) as Arc<dyn MetricSink>,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn ready_fires_after_first_reconcile() {
        let sink = Arc::new(RecordingSink::default());
        let exp = exporter(&Arc::new(FakeSource::with_sites(&["a", "b"])), &sink);
        assert!(!exp.is_ready());

        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let exp = exp.clone();
            let cancel = cancel.clone();
            async move { exp.run(cancel).await }
        });

        exp.ready().await;
        assert!(exp.is_ready());
        assert_eq!(exp.config().org_id, "org-1");
        assert_eq!(exp.supervised_sites().len(), 2);

        cancel.cancel();
        task.await.unwrap().unwrap();
        assert!(exp.supervised_sites().iter().all(|s| !s.running));
    }

    #[tokio::test(start_paused = true)]
    async fn first_reconcile_failure_is_fatal() {
        let source = Arc::new(FakeSource::with_sites(&["a"]));
        source.directory_down.store(true, Ordering::SeqCst);
        let sink = Arc::new(RecordingSink::default());
        let exp = exporter(&source, &sink);

        let err = exp.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, CoreError::DirectoryUnavailable { .. }));
        assert!(!exp.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_tick_picks_up_new_sites() {
        let source = Arc::new(FakeSource::with_sites(&["a"]));
        let sink = Arc::new(RecordingSink::default());
        let exp = exporter(&source, &sink);
        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let exp = exp.clone();
            let cancel = cancel.clone();
            async move { exp.run(cancel).await }
        });
        exp.ready().await;

        assert_eq!(exp.supervised_sites().len(), 1);

        source.set_sites(&["a", "b"]);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(exp.supervised_sites().len(), 1);
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(exp.supervised_sites().len(), 2);

        // A directory outage after startup is logged, not fatal.
        source.directory_down.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(exp.supervised_sites().len(), 2);
        assert!(!task.is_finished());

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn collect_uses_configured_timeout() {
        let source = Arc::new(FakeSource::with_sites(&["a", "slow"]));
        source.set_delay("slow", Duration::from_secs(3600));
        let sink = Arc::new(RecordingSink::default());
        let exp = exporter(&source, &sink);

        let start = Instant::now();
        let report = exp.collect().await.unwrap();
        assert_eq!(report.abandoned, 1);
        let elapsed = start.elapsed();
        let timeout = exp.config().collect_timeout;
        assert!(elapsed >= timeout && elapsed < timeout + Duration::from_millis(5));
    }
}
