// ── Bounded fan-out collector ──
//
// Services one scrape: organization counters first, then every in-scope
// site fetched concurrently under a per-scrape semaphore. The whole scrape
// is bounded by a deadline; units still pending when it passes are
// aborted and simply missing from this scrape. Nothing outlives the call.

use std::sync::Arc;

use mistex_api::Site;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::filter::{SitePredicate, select_sites};
use crate::sink::MetricSink;
use crate::source::MistSource;

/// Outcome of one scrape.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScrapeReport {
    /// In-scope sites dispatched.
    pub sites: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Still pending at the deadline.
    pub abandoned: usize,
}

pub struct Collector<S> {
    source: Arc<S>,
    predicate: Arc<dyn SitePredicate>,
    sink: Arc<dyn MetricSink>,
    max_concurrency: usize,
}

impl<S: MistSource> Collector<S> {
    pub fn new(
        source: Arc<S>,
        predicate: Arc<dyn SitePredicate>,
        sink: Arc<dyn MetricSink>,
        max_concurrency: usize,
    ) -> Self {
        Self {
            source,
            predicate,
            sink,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Run one scrape, returning no later than `deadline`.
    ///
    /// Fails only when the organization counters or the site directory
    /// cannot be fetched; in that case no site metrics are written.
    pub async fn collect(&self, deadline: Instant) -> Result<ScrapeReport, CoreError> {
        let counters = timeout_at(deadline, async {
            tokio::try_join!(self.source.alarm_counts(), self.source.ticket_counts())
        })
        .await;
        let (alarms, tickets) = match counters {
            Ok(Ok(counts)) => counts,
            Ok(Err(e)) => {
                return Err(CoreError::OrgCountersUnavailable {
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                return Err(CoreError::OrgCountersUnavailable {
                    reason: "deadline elapsed".into(),
                });
            }
        };
        self.sink.record_org_alarms(&alarms);
        self.sink.record_org_tickets(&tickets);

        let sites = match timeout_at(deadline, self.source.list_sites()).await {
            Ok(Ok(sites)) => sites,
            Ok(Err(e)) => {
                return Err(CoreError::DirectoryUnavailable {
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                return Err(CoreError::DirectoryUnavailable {
                    reason: "deadline elapsed".into(),
                });
            }
        };
        let sites = select_sites(self.predicate.as_ref(), sites);
        for site in &sites {
            self.sink.record_site(site);
        }

        let mut report = ScrapeReport {
            sites: sites.len(),
            ..ScrapeReport::default()
        };
        let limit = Arc::new(Semaphore::new(self.max_concurrency));
        let mut units = JoinSet::new();
        for site in sites {
            units.spawn(fetch_site(
                site,
                Arc::clone(&self.source),
                Arc::clone(&self.sink),
                Arc::clone(&limit),
            ));
        }

        let drained = timeout_at(deadline, async {
            while let Some(joined) = units.join_next().await {
                match joined {
                    Ok(Ok(())) => report.succeeded += 1,
                    Ok(Err(e)) => {
                        warn!(error = %e, "site omitted from scrape");
                        report.failed += 1;
                    }
                    Err(e) => {
                        warn!(error = %e, "site fetch task failed");
                        report.failed += 1;
                    }
                }
            }
        })
        .await;

        if drained.is_err() {
            report.abandoned = units.len();
            units.abort_all();
            warn!(abandoned = report.abandoned, "scrape deadline elapsed, abandoning slow sites");
        }
        debug!(
            sites = report.sites,
            succeeded = report.succeeded,
            failed = report.failed,
            abandoned = report.abandoned,
            "scrape finished"
        );
        Ok(report)
    }
}

/// One unit of work: both point-in-time fetches for a site, then the
/// writes. A site only reaches the sink if both fetches succeed.
async fn fetch_site<S: MistSource>(
    site: Site,
    source: Arc<S>,
    sink: Arc<dyn MetricSink>,
    limit: Arc<Semaphore>,
) -> Result<(), CoreError> {
    let _permit = limit
        .acquire_owned()
        .await
        .map_err(|e| CoreError::Internal(e.to_string()))?;

    let (devices, clients) =
        tokio::try_join!(source.device_stats(&site.id), source.client_stats(&site.id)).map_err(
            |e| CoreError::SiteFetchFailed {
                site: site.name.clone(),
                reason: e.to_string(),
            },
        )?;

    for stat in &devices {
        sink.record_device_stat(&site, stat);
    }
    for stat in &clients {
        sink.record_client_stat(&site, stat);
    }
    debug!(site = %site.name, devices = devices.len(), clients = clients.len(), "site collected");
    Ok(())
}
