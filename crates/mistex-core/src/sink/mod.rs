// ── Metric sink ──
//
// Write-only destination for everything the orchestrator collects.
// Streaming supervisors and scrape workers write concurrently from
// many tasks, so implementations must be safe for concurrent use.
// Writes to the same label set are last-write-wins.

use std::collections::HashMap;

use mistex_api::{ClientStat, DeviceStat, Site};

pub mod labels;
mod prom;

pub use self::prom::PrometheusSink;

pub trait MetricSink: Send + Sync {
    /// Site directory entry (`mist_org_sites`).
    fn record_site(&self, site: &Site);

    fn record_device_stat(&self, site: &Site, stat: &DeviceStat);

    fn record_client_stat(&self, site: &Site, stat: &ClientStat);

    /// Alarm counts keyed by alarm type. Replaces the previous set.
    fn record_org_alarms(&self, counts: &HashMap<String, u64>);

    /// Ticket counts keyed by status. Replaces the previous set.
    fn record_org_tickets(&self, counts: &HashMap<String, u64>);

    /// Drop every series written for `site_id` and refuse further writes
    /// for it. Writes still in flight when the site leaves scope must not
    /// bring its series back.
    fn forget_site(&self, site_id: &str);

    /// Accept writes for `site_id` again after [`forget_site`](Self::forget_site).
    /// Called when the site comes back into scope.
    fn admit_site(&self, _site_id: &str) {}
}
