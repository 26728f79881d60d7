// In-memory source and sink used by the orchestrator unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mistex_api::{ClientStat, DeviceStat, Site};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::sink::MetricSink;
use crate::source::MistSource;

pub(crate) fn site(id: &str) -> Site {
    Site {
        id: id.into(),
        name: format!("site-{id}"),
        ..Site::default()
    }
}

pub(crate) fn device(id: &str) -> DeviceStat {
    DeviceStat {
        id: id.into(),
        uptime: Some(1.0),
        ..DeviceStat::default()
    }
}

pub(crate) fn client(mac: &str) -> ClientStat {
    ClientStat {
        mac: mac.into(),
        ..ClientStat::default()
    }
}

fn unavailable(what: &str) -> mistex_api::Error {
    mistex_api::Error::Api {
        status: 503,
        message: format!("{what} unavailable"),
    }
}

/// Upstream-side handles of one open subscription. Dropping a sender
/// simulates the upstream ending that feed.
#[derive(Default)]
pub(crate) struct Feeds {
    pub devices: Option<mpsc::Sender<DeviceStat>>,
    pub clients: Option<mpsc::Sender<ClientStat>>,
}

#[derive(Default)]
pub(crate) struct FakeSource {
    sites: Mutex<Vec<Site>>,
    pub directory_down: AtomicBool,
    pub org_down: AtomicBool,
    /// Per-site delay applied to `device_stats`.
    pub delays: Mutex<HashMap<String, Duration>>,
    /// Sites whose point-in-time fetch fails.
    pub failing: Mutex<HashSet<String>>,
    /// Sites whose stream subscription cannot be opened.
    pub refuse_streams: Mutex<HashSet<String>>,
    pub feeds: Mutex<HashMap<String, Feeds>>,
    pub opens: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl FakeSource {
    pub fn with_sites(ids: &[&str]) -> Self {
        let source = Self::default();
        source.set_sites(ids);
        source
    }

    pub fn set_sites(&self, ids: &[&str]) {
        *self.sites.lock().unwrap() = ids.iter().map(|id| site(id)).collect();
    }

    pub fn set_delay(&self, site_id: &str, delay: Duration) {
        self.delays
            .lock()
            .unwrap()
            .insert(site_id.to_owned(), delay);
    }

    /// Drop the upstream end of a site's device feed.
    pub fn close_device_feed(&self, site_id: &str) {
        if let Some(feeds) = self.feeds.lock().unwrap().get_mut(site_id) {
            feeds.devices = None;
        }
    }

    pub fn device_sender(&self, site_id: &str) -> Option<mpsc::Sender<DeviceStat>> {
        self.feeds
            .lock()
            .unwrap()
            .get(site_id)
            .and_then(|f| f.devices.clone())
    }

    pub fn client_sender(&self, site_id: &str) -> Option<mpsc::Sender<ClientStat>> {
        self.feeds
            .lock()
            .unwrap()
            .get(site_id)
            .and_then(|f| f.clients.clone())
    }

    fn check_site(&self, site_id: &str) -> Result<(), mistex_api::Error> {
        if self.failing.lock().unwrap().contains(site_id) {
            return Err(unavailable(site_id));
        }
        Ok(())
    }

    /// Relay records from an upstream handle into the returned receiver
    /// until the handle is dropped or `cancel` fires.
    fn relay<T: Send + 'static>(cancel: CancellationToken) -> (mpsc::Sender<T>, mpsc::Receiver<T>) {
        let (up_tx, mut up_rx) = mpsc::channel::<T>(16);
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    rec = up_rx.recv() => match rec {
                        Some(r) => {
                            if tx.send(r).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        });
        (up_tx, rx)
    }
}

impl MistSource for FakeSource {
    async fn list_sites(&self) -> Result<Vec<Site>, mistex_api::Error> {
        if self.directory_down.load(Ordering::SeqCst) {
            return Err(unavailable("directory"));
        }
        Ok(self.sites.lock().unwrap().clone())
    }

    async fn alarm_counts(&self) -> Result<HashMap<String, u64>, mistex_api::Error> {
        if self.org_down.load(Ordering::SeqCst) {
            return Err(unavailable("alarms"));
        }
        Ok(HashMap::from([("device_down".to_string(), 1)]))
    }

    async fn ticket_counts(&self) -> Result<HashMap<String, u64>, mistex_api::Error> {
        if self.org_down.load(Ordering::SeqCst) {
            return Err(unavailable("tickets"));
        }
        Ok(HashMap::from([("open".to_string(), 2)]))
    }

    async fn device_stats(&self, site_id: &str) -> Result<Vec<DeviceStat>, mistex_api::Error> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = self.delays.lock().unwrap().get(site_id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.check_site(site_id)?;
        Ok(vec![device(&format!("{site_id}-ap"))])
    }

    async fn client_stats(&self, site_id: &str) -> Result<Vec<ClientStat>, mistex_api::Error> {
        self.check_site(site_id)?;
        Ok(vec![client(&format!("{site_id}-mac"))])
    }

    async fn stream_device_stats(
        &self,
        cancel: CancellationToken,
        site_id: &str,
    ) -> Result<mpsc::Receiver<DeviceStat>, mistex_api::Error> {
        if self.refuse_streams.lock().unwrap().contains(site_id) {
            return Err(mistex_api::Error::WebSocketConnect("refused".into()));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        let (up, rx) = Self::relay(cancel);
        self.feeds
            .lock()
            .unwrap()
            .entry(site_id.to_owned())
            .or_default()
            .devices = Some(up);
        Ok(rx)
    }

    async fn stream_client_stats(
        &self,
        cancel: CancellationToken,
        site_id: &str,
    ) -> Result<mpsc::Receiver<ClientStat>, mistex_api::Error> {
        let (up, rx) = Self::relay(cancel);
        self.feeds
            .lock()
            .unwrap()
            .entry(site_id.to_owned())
            .or_default()
            .clients = Some(up);
        Ok(rx)
    }
}

/// Sink that records what was written, keyed by site id.
#[derive(Default)]
pub(crate) struct RecordingSink {
    pub sites: Mutex<Vec<String>>,
    pub devices: Mutex<Vec<(String, String)>>,
    pub clients: Mutex<Vec<(String, String)>>,
    pub alarms: Mutex<Option<HashMap<String, u64>>>,
    pub tickets: Mutex<Option<HashMap<String, u64>>>,
    pub forgotten: Mutex<Vec<String>>,
    pub admitted: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn device_sites(&self) -> HashSet<String> {
        self.devices
            .lock()
            .unwrap()
            .iter()
            .map(|(site, _)| site.clone())
            .collect()
    }
}

impl MetricSink for RecordingSink {
    fn record_site(&self, site: &Site) {
        self.sites.lock().unwrap().push(site.id.clone());
    }

    fn record_device_stat(&self, site: &Site, stat: &DeviceStat) {
        self.devices
            .lock()
            .unwrap()
            .push((site.id.clone(), stat.id.clone()));
    }

    fn record_client_stat(&self, site: &Site, stat: &ClientStat) {
        self.clients
            .lock()
            .unwrap()
            .push((site.id.clone(), stat.mac.clone()));
    }

    fn record_org_alarms(&self, counts: &HashMap<String, u64>) {
        *self.alarms.lock().unwrap() = Some(counts.clone());
    }

    fn record_org_tickets(&self, counts: &HashMap<String, u64>) {
        *self.tickets.lock().unwrap() = Some(counts.clone());
    }

    fn forget_site(&self, site_id: &str) {
        self.forgotten.lock().unwrap().push(site_id.to_owned());
    }

    fn admit_site(&self, site_id: &str) {
        self.admitted.lock().unwrap().push(site_id.to_owned());
    }
}

pub(crate) fn shared() -> (Arc<FakeSource>, Arc<RecordingSink>) {
    (Arc::new(FakeSource::default()), Arc::new(RecordingSink::default()))
}
