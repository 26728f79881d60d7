// ── Upstream data source ──
//
// Everything the orchestrator needs from the Mist cloud, scoped to one
// organization. `OrgClient` is the production implementation over
// `MistClient`; tests substitute in-memory fakes.

use std::collections::HashMap;
use std::future::Future;

use mistex_api::{ClientStat, DeviceStat, MistClient, Site};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Org-scoped view of the upstream API.
///
/// The stream methods return a receiver that closes when the
/// subscription ends for any reason, including cancellation of `cancel`.
pub trait MistSource: Send + Sync + 'static {
    fn list_sites(&self) -> impl Future<Output = Result<Vec<Site>, mistex_api::Error>> + Send;

    fn alarm_counts(
        &self,
    ) -> impl Future<Output = Result<HashMap<String, u64>, mistex_api::Error>> + Send;

    fn ticket_counts(
        &self,
    ) -> impl Future<Output = Result<HashMap<String, u64>, mistex_api::Error>> + Send;

    fn device_stats(
        &self,
        site_id: &str,
    ) -> impl Future<Output = Result<Vec<DeviceStat>, mistex_api::Error>> + Send;

    fn client_stats(
        &self,
        site_id: &str,
    ) -> impl Future<Output = Result<Vec<ClientStat>, mistex_api::Error>> + Send;

    fn stream_device_stats(
        &self,
        cancel: CancellationToken,
        site_id: &str,
    ) -> impl Future<Output = Result<mpsc::Receiver<DeviceStat>, mistex_api::Error>> + Send;

    fn stream_client_stats(
        &self,
        cancel: CancellationToken,
        site_id: &str,
    ) -> impl Future<Output = Result<mpsc::Receiver<ClientStat>, mistex_api::Error>> + Send;
}

/// A [`MistClient`] bound to one organization.
#[derive(Debug, Clone)]
pub struct OrgClient {
    client: MistClient,
    org_id: String,
}

impl OrgClient {
    pub fn new(client: MistClient, org_id: impl Into<String>) -> Self {
        Self {
            client,
            org_id: org_id.into(),
        }
    }

    pub fn org_id(&self) -> &str {
        &self.org_id
    }
}

impl MistSource for OrgClient {
    async fn list_sites(&self) -> Result<Vec<Site>, mistex_api::Error> {
        self.client.list_org_sites(&self.org_id).await
    }

    async fn alarm_counts(&self) -> Result<HashMap<String, u64>, mistex_api::Error> {
        self.client.count_org_alarms(&self.org_id).await
    }

    async fn ticket_counts(&self) -> Result<HashMap<String, u64>, mistex_api::Error> {
        self.client.count_org_tickets(&self.org_id).await
    }

    async fn device_stats(&self, site_id: &str) -> Result<Vec<DeviceStat>, mistex_api::Error> {
        self.client.site_device_stats(site_id).await
    }

    async fn client_stats(&self, site_id: &str) -> Result<Vec<ClientStat>, mistex_api::Error> {
        self.client.site_clients(site_id).await
    }

    async fn stream_device_stats(
        &self,
        cancel: CancellationToken,
        site_id: &str,
    ) -> Result<mpsc::Receiver<DeviceStat>, mistex_api::Error> {
        self.client.stream_device_stats(cancel, site_id).await
    }

    async fn stream_client_stats(
        &self,
        cancel: CancellationToken,
        site_id: &str,
    ) -> Result<mpsc::Receiver<ClientStat>, mistex_api::Error> {
        self.client.stream_client_stats(cancel, site_id).await
    }
}
