// ── Stream supervisor ──
//
// Owns one site's pair of live subscriptions. Both forwarding loops run
// under a single run scope; whichever loop ends first cancels the scope,
// which closes the sibling's subscription, so the pair always exits
// together. Nothing is retried here: the reconciler restarts a
// supervisor that is no longer running on its next tick.

use std::sync::{Arc, Mutex, MutexGuard};

use mistex_api::{Site, StreamKind};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::sink::MetricSink;
use crate::source::MistSource;

#[derive(Debug, Default)]
struct RunState {
    running: bool,
    cancel: Option<CancellationToken>,
}

/// How a forwarding loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopExit {
    /// The run scope was cancelled (stop, shutdown, or the sibling loop).
    Cancelled,
    /// The subscription channel closed on its own.
    Closed(StreamKind),
}

pub struct StreamSupervisor<S> {
    site: Site,
    source: Arc<S>,
    sink: Arc<dyn MetricSink>,
    state: Mutex<RunState>,
}

impl<S: MistSource> StreamSupervisor<S> {
    pub fn new(site: Site, source: Arc<S>, sink: Arc<dyn MetricSink>) -> Self {
        Self {
            site,
            source,
            sink,
            state: Mutex::new(RunState::default()),
        }
    }

    pub fn site(&self) -> &Site {
        &self.site
    }

    pub fn is_running(&self) -> bool {
        self.state().running
    }

    fn state(&self) -> MutexGuard<'_, RunState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Start a run under a child scope of `parent`.
    ///
    /// The running flag and cancel handle are set before the task is
    /// spawned, so a second `start` before the task is scheduled is a
    /// no-op. Returns `false` if a run is already active.
    pub fn start(self: &Arc<Self>, parent: &CancellationToken, tracker: &TaskTracker) -> bool {
        let scope = parent.child_token();
        {
            let mut state = self.state();
            if state.running {
                return false;
            }
            state.running = true;
            state.cancel = Some(scope.clone());
        }

        let this = Arc::clone(self);
        tracker.spawn(async move { this.run(scope).await });
        true
    }

    /// Cancel the active run, if any. Idempotent.
    pub fn stop(&self) {
        if let Some(cancel) = &self.state().cancel {
            cancel.cancel();
        }
    }

    async fn run(self: Arc<Self>, scope: CancellationToken) {
        info!(site = %self.site.name, site_id = %self.site.id, "starting site stream");

        match self.stream(&scope).await {
            Ok(()) => debug!(site = %self.site.name, "site stream cancelled"),
            Err(e) => warn!(site = %self.site.name, error = %e, "site stream ended"),
        }

        let mut state = self.state();
        state.running = false;
        state.cancel = None;
        drop(state);
        info!(site = %self.site.name, "site stream stopped");
    }

    async fn stream(&self, scope: &CancellationToken) -> Result<(), CoreError> {
        // Any early return tears down whatever was already opened.
        let _scope_guard = scope.clone().drop_guard();
        let site_id = self.site.id.as_str();

        let devices = self
            .source
            .stream_device_stats(scope.clone(), site_id)
            .await
            .map_err(|e| self.open_failed(StreamKind::Devices, &e))?;
        debug!(site = %self.site.name, "device stats stream started");

        let clients = self
            .source
            .stream_client_stats(scope.clone(), site_id)
            .await
            .map_err(|e| self.open_failed(StreamKind::Clients, &e))?;
        debug!(site = %self.site.name, "client stats stream started");

        let mut loops = JoinSet::new();
        {
            let sink = Arc::clone(&self.sink);
            let site = self.site.clone();
            loops.spawn(forward(StreamKind::Devices, devices, scope.clone(), move |stat| {
                sink.record_device_stat(&site, &stat);
            }));
        }
        {
            let sink = Arc::clone(&self.sink);
            let site = self.site.clone();
            loops.spawn(forward(StreamKind::Clients, clients, scope.clone(), move |stat| {
                sink.record_client_stat(&site, &stat);
            }));
        }

        let first = loops.join_next().await;
        while loops.join_next().await.is_some() {}

        match first {
            Some(Ok(LoopExit::Closed(feed))) => Err(CoreError::SubscriptionClosed {
                site: self.site.name.clone(),
                feed,
            }),
            Some(Ok(LoopExit::Cancelled)) | None => Ok(()),
            Some(Err(e)) => Err(CoreError::Internal(format!("forwarding task failed: {e}"))),
        }
    }

    fn open_failed(&self, feed: StreamKind, err: &mistex_api::Error) -> CoreError {
        CoreError::SubscriptionOpenFailed {
            site: self.site.name.clone(),
            feed,
            reason: err.to_string(),
        }
    }
}

/// Drain `rx` into `write` until the channel closes or `scope` is
/// cancelled. Exiting for any reason cancels `scope`.
async fn forward<T, F>(
    kind: StreamKind,
    mut rx: mpsc::Receiver<T>,
    scope: CancellationToken,
    mut write: F,
) -> LoopExit
where
    T: Send,
    F: FnMut(T) + Send,
{
    let _guard = scope.clone().drop_guard();
    loop {
        tokio::select! {
            biased;
            () = scope.cancelled() => return LoopExit::Cancelled,
            record = rx.recv() => match record {
                Some(record) => write(record),
                None => return LoopExit::Closed(kind),
            },
        }
    }
}
