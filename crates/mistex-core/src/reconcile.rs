// ── Stream reconciler ──
//
// Keeps the supervisor registry equal to the filtered site directory.
// Each tick takes a fresh directory snapshot and diffs it against the
// registry with `plan`; there is no incremental bookkeeping that could
// drift from the directory.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use mistex_api::Site;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::error::CoreError;
use crate::filter::{SitePredicate, select_sites};
use crate::sink::MetricSink;
use crate::source::MistSource;
use crate::supervisor::StreamSupervisor;

// ── Planning ─────────────────────────────────────────────────────────

/// Registry changes for one tick.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct Plan {
    /// In scope with no supervisor.
    pub create: Vec<String>,
    /// In scope, registered, but the last run has ended.
    pub restart: Vec<String>,
    /// Registered but no longer in scope.
    pub retire: Vec<String>,
    /// In scope and running; left alone.
    pub keep: Vec<String>,
}

/// Diff `wanted` site ids against `registered` (site id → running).
pub(crate) fn plan<'a>(
    wanted: impl IntoIterator<Item = &'a str>,
    registered: &HashMap<String, bool>,
) -> Plan {
    let mut out = Plan::default();
    let mut seen = HashSet::new();

    for id in wanted {
        if !seen.insert(id) {
            continue;
        }
        match registered.get(id) {
            None => out.create.push(id.to_owned()),
            Some(false) => out.restart.push(id.to_owned()),
            Some(true) => out.keep.push(id.to_owned()),
        }
    }
    out.retire = registered
        .keys()
        .filter(|id| !seen.contains(id.as_str()))
        .cloned()
        .collect();
    out.retire.sort_unstable();
    out
}

// ── Reports ──────────────────────────────────────────────────────────

/// What one reconciliation tick changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub started: Vec<String>,
    pub restarted: Vec<String>,
    pub retired: Vec<String>,
    pub kept: usize,
}

/// Status of one registered site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SupervisedSite {
    pub site_id: String,
    pub site_name: String,
    pub running: bool,
}

// ── Reconciler ───────────────────────────────────────────────────────

pub struct Reconciler<S> {
    source: Arc<S>,
    predicate: Arc<dyn SitePredicate>,
    sink: Arc<dyn MetricSink>,
    registry: Mutex<HashMap<String, Arc<StreamSupervisor<S>>>>,
    tracker: TaskTracker,
}

impl<S: MistSource> Reconciler<S> {
    pub fn new(
        source: Arc<S>,
        predicate: Arc<dyn SitePredicate>,
        sink: Arc<dyn MetricSink>,
    ) -> Self {
        Self {
            source,
            predicate,
            sink,
            registry: Mutex::new(HashMap::new()),
            tracker: TaskTracker::new(),
        }
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<String, Arc<StreamSupervisor<S>>>> {
        self.registry
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Run one tick. Supervisors are started as children of `root`.
    ///
    /// A directory failure skips the tick and leaves every existing
    /// supervisor untouched.
    pub async fn reconcile(&self, root: &CancellationToken) -> Result<ReconcileReport, CoreError> {
        let sites = self
            .source
            .list_sites()
            .await
            .map_err(|e| CoreError::DirectoryUnavailable {
                reason: e.to_string(),
            })?;
        let wanted = select_sites(self.predicate.as_ref(), sites);
        let by_id: HashMap<&str, &Site> = wanted.iter().map(|s| (s.id.as_str(), s)).collect();

        // Held for the whole diff-and-apply; nothing below awaits.
        let mut registry = self.registry();
        let status: HashMap<String, bool> = registry
            .iter()
            .map(|(id, sup)| (id.clone(), sup.is_running()))
            .collect();
        let plan = plan(wanted.iter().map(|s| s.id.as_str()), &status);

        for id in &plan.create {
            let Some(site) = by_id.get(id.as_str()) else {
                continue;
            };
            self.sink.admit_site(id);
            let sup = Arc::new(StreamSupervisor::new(
                (*site).clone(),
                Arc::clone(&self.source),
                Arc::clone(&self.sink),
            ));
            sup.start(root, &self.tracker);
            registry.insert(id.clone(), sup);
            info!(site = %site.name, site_id = %id, "supervising new site");
        }

        for id in &plan.restart {
            if let Some(sup) = registry.get(id) {
                if sup.start(root, &self.tracker) {
                    info!(site = %sup.site().name, site_id = %id, "restarting site stream");
                }
            }
        }

        for id in &plan.retire {
            if let Some(sup) = registry.remove(id) {
                sup.stop();
                info!(site = %sup.site().name, site_id = %id, "site left scope, stream stopped");
            }
            self.sink.forget_site(id);
        }

        let report = ReconcileReport {
            started: plan.create,
            restarted: plan.restart,
            retired: plan.retire,
            kept: plan.keep.len(),
        };
        debug!(
            started = report.started.len(),
            restarted = report.restarted.len(),
            retired = report.retired.len(),
            kept = report.kept,
            "reconciliation finished"
        );
        Ok(report)
    }

    /// Snapshot of the registry, sorted by site name.
    pub fn supervised_sites(&self) -> Vec<SupervisedSite> {
        let mut sites: Vec<SupervisedSite> = self
            .registry()
            .iter()
            .map(|(id, sup)| SupervisedSite {
                site_id: id.clone(),
                site_name: sup.site().name.clone(),
                running: sup.is_running(),
            })
            .collect();
        sites.sort_by(|a, b| a.site_name.cmp(&b.site_name).then(a.site_id.cmp(&b.site_id)));
        sites
    }

    /// Stop every supervisor and wait for all of their tasks to exit.
    pub async fn shutdown(&self) {
        {
            let registry = self.registry();
            for sup in registry.values() {
                sup.stop();
            }
        }
        self.tracker.close();
        self.tracker.wait().await;
        debug!("all site streams stopped");
    }
}
