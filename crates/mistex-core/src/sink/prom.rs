// ── Prometheus sink ──
//
// Gauge families are declared as tables of (name, help, extractor).
// An extractor returning `None` means the upstream payload did not carry
// the field, and nothing is written for it.
//
// Every label set written is remembered per site so `forget_site` can
// delete the site's series once it leaves scope.

use std::collections::{HashMap, HashSet};

use dashmap::DashMap;
use mistex_api::{ClientStat, DeviceStat, EnvStat, RadioStat, Site};
use prometheus::{Encoder, Gauge, GaugeVec, Opts, Registry, TextEncoder};
use tracing::debug;

use super::MetricSink;
use super::labels;
use crate::error::CoreError;

const NAMESPACE: &str = "mist";

type Extract<T> = fn(&T) -> Option<f64>;

fn flag(b: bool) -> f64 {
    if b { 1.0 } else { 0.0 }
}

fn env(stat: &DeviceStat, field: fn(&EnvStat) -> Option<f64>) -> Option<f64> {
    stat.env_stat.as_ref().and_then(field)
}

// ── Family tables ────────────────────────────────────────────────────

const DEVICE_GAUGES: &[(&str, &str, Extract<DeviceStat>)] = &[
    ("acceleration_x_g", "Accelerometer reading on the X-axis in G-force.", |d| env(d, |e| e.accel_x)),
    ("acceleration_y_g", "Accelerometer reading on the Y-axis in G-force.", |d| env(d, |e| e.accel_y)),
    ("acceleration_z_g", "Accelerometer reading on the Z-axis in G-force.", |d| env(d, |e| e.accel_z)),
    ("ambient_temperature_celsius", "Ambient temperature measured by the device in Celsius.", |d| env(d, |e| e.ambient_temp)),
    ("attitude_degrees", "Device attitude or orientation in degrees.", |d| env(d, |e| e.attitude)),
    ("cpu_temperature_celsius", "CPU temperature of the device in Celsius.", |d| env(d, |e| e.cpu_temp)),
    ("cpu_utilization_percent", "Current CPU utilization of the device.", |d| d.cpu_util),
    ("created_timestamp_seconds", "The time the device was created, as a Unix timestamp.", |d| d.created_time),
    ("humidity_percent", "Relative humidity percentage.", |d| env(d, |e| e.humidity)),
    ("last_seen_timestamp_seconds", "The last time the device was seen, as a Unix timestamp.", |d| d.last_seen),
    ("magnetometer_x_tesla", "Magnetometer reading on the X-axis in micro-Teslas.", |d| env(d, |e| e.magne_x)),
    ("magnetometer_y_tesla", "Magnetometer reading on the Y-axis in micro-Teslas.", |d| env(d, |e| e.magne_y)),
    ("magnetometer_z_tesla", "Magnetometer reading on the Z-axis in micro-Teslas.", |d| env(d, |e| e.magne_z)),
    ("modified_timestamp_seconds", "The time the device was last modified, as a Unix timestamp.", |d| d.modified_time),
    ("power_budget_watts", "PoE power budget of the device in watts.", |d| d.power_budget),
    ("power_constrained_status", "Whether the device is running power constrained (1) or not (0).", |d| d.power_constrained.map(flag)),
    ("pressure_pascals", "Barometric pressure in pascals.", |d| env(d, |e| e.pressure)),
    ("receive_bits_per_second", "Receive rate of the device in bits per second.", |d| d.rx_bps),
    ("status_code", "Device status: 0 disconnected, 1 connected, 2 restarting, 3 upgrading, -1 unknown.", |d| d.status.map(mistex_api::DeviceStatus::code)),
    ("transmit_bits_per_second", "Transmit rate of the device in bits per second.", |d| d.tx_bps),
    ("uptime_seconds", "Time since the device last booted, in seconds.", |d| d.uptime),
    ("vcore_voltage_volts", "Core voltage of the device in volts.", |d| env(d, |e| e.vcore_voltage)),
];

const RADIO_GAUGES: &[(&str, &str, Extract<RadioStat>)] = &[
    ("radio_bandwidth_mhz", "Channel width of the radio in MHz.", |r| r.bandwidth),
    ("radio_channel", "Channel the radio is operating on.", |r| r.channel),
    ("radio_dynamic_chaining_enabled", "Whether dynamic chaining is enabled on the radio.", |r| r.dynamic_chaining_enabled.map(flag)),
    ("radio_noise_floor_dbm", "Noise floor seen by the radio in dBm.", |r| r.noise_floor),
    ("radio_clients_total", "Clients associated to the radio.", |r| r.num_clients),
    ("radio_wlans_total", "WLANs broadcast on the radio.", |r| r.num_wlans),
    ("radio_transmit_power_dbm", "Transmit power of the radio in dBm.", |r| r.power),
    ("radio_receive_bytes_total", "Bytes received by the radio.", |r| r.rx_bytes),
    ("radio_receive_packets_total", "Packets received by the radio.", |r| r.rx_pkts),
    ("radio_transmit_bytes_total", "Bytes transmitted by the radio.", |r| r.tx_bytes),
    ("radio_transmit_packets_total", "Packets transmitted by the radio.", |r| r.tx_pkts),
    ("radio_utilization_all_percent", "Total channel utilization.", |r| r.util_all),
    ("radio_utilization_non_wifi_percent", "Channel utilization from non-WiFi interference.", |r| r.util_non_wifi),
    ("radio_utilization_receive_in_bss_percent", "Channel utilization receiving in-BSS traffic.", |r| r.util_rx_in_bss),
    ("radio_utilization_receive_other_bss_percent", "Channel utilization receiving other-BSS traffic.", |r| r.util_rx_other_bss),
    ("radio_utilization_transmit_percent", "Channel utilization transmitting.", |r| r.util_tx),
    ("radio_utilization_undecodable_wifi_percent", "Channel utilization from undecodable WiFi.", |r| r.util_undecodable_wifi),
    ("radio_utilization_unknown_wifi_percent", "Channel utilization from unknown WiFi.", |r| r.util_unknown_wifi),
];

const CLIENT_GAUGES: &[(&str, &str, Extract<ClientStat>)] = &[
    ("channel", "Channel the client is connected on.", |c| c.channel),
    ("dual_band_capable", "Whether the client is dual-band capable.", |c| c.dual_band.map(flag)),
    ("idle_seconds", "Time since the client was last active, in seconds.", |c| c.idle_time),
    ("is_guest_status", "Whether the client is a guest.", |c| c.is_guest.map(flag)),
    ("last_seen_timestamp_seconds", "The last time the client was seen, as a Unix timestamp.", |c| c.last_seen),
    ("locating_aps_total", "Access points that can locate the client.", |c| c.num_locating_aps),
    ("power_saving_mode_active", "Whether the client is in power-saving mode.", |c| c.power_saving.map(flag)),
    ("rssi_dbm", "Received signal strength of the client in dBm.", |c| c.rssi),
    ("receive_bits_per_second", "Receive rate of the client in bits per second.", |c| c.rx_bps),
    ("receive_bytes_total", "Bytes received from the client.", |c| c.rx_bytes),
    ("receive_packets_total", "Packets received from the client.", |c| c.rx_pkts),
    ("receive_rate_mbps", "Receive data rate of the client in Mbps.", |c| c.rx_rate),
    ("receive_retries_total", "Receive retries for the client.", |c| c.rx_retries),
    ("snr_db", "Signal-to-noise ratio of the client in dB.", |c| c.snr),
    ("transmit_bits_per_second", "Transmit rate to the client in bits per second.", |c| c.tx_bps),
    ("transmit_bytes_total", "Bytes transmitted to the client.", |c| c.tx_bytes),
    ("transmit_packets_total", "Packets transmitted to the client.", |c| c.tx_pkts),
    ("transmit_rate_mbps", "Transmit data rate to the client in Mbps.", |c| c.tx_rate),
    ("transmit_retries_total", "Transmit retries for the client.", |c| c.tx_retries),
    ("uptime_seconds", "Time the client has been connected, in seconds.", |c| c.uptime),
];

// ── Families ─────────────────────────────────────────────────────────

struct Family<T> {
    gauge: GaugeVec,
    extract: Extract<T>,
}

impl<T> Family<T> {
    fn write(&self, record: &T, labels: &[&str]) {
        let Some(value) = (self.extract)(record) else {
            return;
        };
        match self.gauge.get_metric_with_label_values(labels) {
            Ok(g) => g.set(value),
            Err(e) => debug!(error = %e, "dropping sample with mismatched labels"),
        }
    }

    fn remove(&self, labels: &[&str]) {
        // Absent when the series was never written.
        let _ = self.gauge.remove_label_values(labels);
    }
}

fn gauge(
    registry: &Registry,
    subsystem: &str,
    name: &str,
    help: &str,
    labels: &[&str],
) -> Result<GaugeVec, CoreError> {
    let mut opts = Opts::new(name, help).namespace(NAMESPACE);
    if !subsystem.is_empty() {
        opts = opts.subsystem(subsystem);
    }
    let vec = GaugeVec::new(opts, labels)?;
    registry.register(Box::new(vec.clone()))?;
    Ok(vec)
}

fn families<T>(
    registry: &Registry,
    subsystem: &str,
    table: &[(&str, &str, Extract<T>)],
    labels: &[&str],
) -> Result<Vec<Family<T>>, CoreError> {
    table
        .iter()
        .map(|&(name, help, extract)| {
            Ok(Family {
                gauge: gauge(registry, subsystem, name, help, labels)?,
                extract,
            })
        })
        .collect()
}

fn refs(values: &[String]) -> Vec<&str> {
    values.iter().map(String::as_str).collect()
}

/// Label sets written for one device: its own and one per radio.
#[derive(Default)]
struct DeviceSeries {
    labels: Vec<String>,
    radios: HashSet<Vec<String>>,
}

/// Label sets written on behalf of one site, keyed by the upstream id
/// whose labels may change between writes.
///
/// A retired entry is a tombstone: the site left scope and every write
/// for it is refused until [`MetricSink::admit_site`].
#[derive(Default)]
struct SiteSeries {
    retired: bool,
    info: Option<Vec<String>>,
    devices: HashMap<String, DeviceSeries>,
    clients: HashMap<String, Vec<String>>,
}

// ── PrometheusSink ───────────────────────────────────────────────────

/// [`MetricSink`] backed by a private `prometheus::Registry`. On Linux the
/// registry also carries the standard `process_*` collector for the
/// exporter itself.
pub struct PrometheusSink {
    registry: Registry,
    devices: Vec<Family<DeviceStat>>,
    radios: Vec<Family<RadioStat>>,
    clients: Vec<Family<ClientStat>>,
    org_alarms: GaugeVec,
    org_tickets: GaugeVec,
    org_sites: GaugeVec,
    scrape_success: Gauge,
    series: DashMap<String, SiteSeries>,
}

impl std::fmt::Debug for PrometheusSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusSink")
            .field("tracked_sites", &self.series.len())
            .finish_non_exhaustive()
    }
}

impl PrometheusSink {
    pub fn new() -> Result<Self, CoreError> {
        let registry = Registry::new();
        #[cfg(target_os = "linux")]
        registry.register(Box::new(
            prometheus::process_collector::ProcessCollector::for_self(),
        ))?;

        let devices = families(&registry, "device", DEVICE_GAUGES, &labels::DEVICE_LABELS)?;
        let radios = families(&registry, "device", RADIO_GAUGES, &labels::RADIO_LABELS)?;
        let clients = families(&registry, "client", CLIENT_GAUGES, &labels::CLIENT_LABELS)?;
        let org_alarms = gauge(
            &registry,
            "",
            "org_alarms",
            "Number of alarms in the organization",
            &labels::ALARM_LABELS,
        )?;
        let org_tickets = gauge(
            &registry,
            "",
            "org_tickets",
            "Number of tickets in the organization",
            &labels::TICKET_LABELS,
        )?;
        let org_sites = gauge(
            &registry,
            "",
            "org_sites",
            "Sites in the organization (always 1, labelled by site)",
            &labels::SITE_INFO_LABELS,
        )?;

        let scrape_success = Gauge::with_opts(
            Opts::new(
                "scrape_success",
                "Whether the last scrape fetched the organization counters and site directory",
            )
            .namespace(NAMESPACE),
        )?;
        registry.register(Box::new(scrape_success.clone()))?;

        Ok(Self {
            registry,
            devices,
            radios,
            clients,
            org_alarms,
            org_tickets,
            org_sites,
            scrape_success,
            series: DashMap::new(),
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encode every family in the Prometheus text exposition format.
    pub fn render(&self) -> Result<String, CoreError> {
        let families = self.registry.gather();
        let mut buf = Vec::new();
        TextEncoder::new().encode(&families, &mut buf)?;
        String::from_utf8(buf).map_err(|e| CoreError::Internal(e.to_string()))
    }

    /// Outcome of the last scrape (`mist_scrape_success`).
    pub fn record_scrape(&self, success: bool) {
        self.scrape_success.set(flag(success));
    }

    /// Content type of [`render`](Self::render) output.
    pub fn content_type(&self) -> String {
        TextEncoder::new().format_type().to_owned()
    }

    #[allow(clippy::cast_precision_loss, clippy::as_conversions)]
    fn replace_counts(vec: &GaugeVec, counts: &HashMap<String, u64>) {
        vec.reset();
        for (key, count) in counts {
            vec.with_label_values(&[key.as_str()]).set(*count as f64);
        }
    }
}

impl PrometheusSink {
    fn remove_device(&self, device: &DeviceSeries) {
        if !device.labels.is_empty() {
            let r = refs(&device.labels);
            self.devices.iter().for_each(|f| f.remove(&r));
        }
        for values in &device.radios {
            let r = refs(values);
            self.radios.iter().for_each(|f| f.remove(&r));
        }
    }

    fn remove_client(&self, values: &[String]) {
        let r = refs(values);
        self.clients.iter().for_each(|f| f.remove(&r));
    }
}

// Writers hold the site's map entry for the whole write, so a concurrent
// `forget_site` either sees the new label sets or tombstones the site first.
impl MetricSink for PrometheusSink {
    fn record_site(&self, site: &Site) {
        let values = labels::site_info_values(site);
        let mut series = self.series.entry(site.id.clone()).or_default();
        if series.retired {
            debug!(site_id = %site.id, "dropping directory entry for retired site");
            return;
        }
        if let Some(old) = series.info.as_ref().filter(|old| **old != values) {
            let _ = self.org_sites.remove_label_values(&refs(old));
        }
        self.org_sites.with_label_values(&refs(&values)).set(1.0);
        series.info = Some(values);
    }

    fn record_device_stat(&self, site: &Site, stat: &DeviceStat) {
        let mut series = self.series.entry(site.id.clone()).or_default();
        if series.retired {
            debug!(site_id = %site.id, device_id = %stat.id, "dropping device stat for retired site");
            return;
        }

        let values = labels::device_values(site, stat);
        let device = series.devices.entry(stat.id.clone()).or_default();
        if device.labels != values {
            self.remove_device(device);
            device.radios.clear();
            device.labels = values;
        }

        let device_refs = refs(&device.labels);
        for family in &self.devices {
            family.write(stat, &device_refs);
        }

        for (band, radio) in &stat.radio_stat {
            let values = labels::radio_values(site, stat, band);
            let radio_refs = refs(&values);
            for family in &self.radios {
                family.write(radio, &radio_refs);
            }
            device.radios.insert(values);
        }
    }

    fn record_client_stat(&self, site: &Site, stat: &ClientStat) {
        let mut series = self.series.entry(site.id.clone()).or_default();
        if series.retired {
            debug!(site_id = %site.id, "dropping client stat for retired site");
            return;
        }

        let values = labels::client_values(site, stat);
        if let Some(old) = series.clients.get(&stat.mac).filter(|old| **old != values) {
            self.remove_client(old);
        }
        let value_refs = refs(&values);
        for family in &self.clients {
            family.write(stat, &value_refs);
        }
        series.clients.insert(stat.mac.clone(), values);
    }

    fn record_org_alarms(&self, counts: &HashMap<String, u64>) {
        Self::replace_counts(&self.org_alarms, counts);
    }

    fn record_org_tickets(&self, counts: &HashMap<String, u64>) {
        Self::replace_counts(&self.org_tickets, counts);
    }

    fn admit_site(&self, site_id: &str) {
        if let Some(mut series) = self.series.get_mut(site_id) {
            series.retired = false;
        }
    }

    fn forget_site(&self, site_id: &str) {
        let mut series = self.series.entry(site_id.to_owned()).or_default();
        let old = std::mem::replace(
            &mut *series,
            SiteSeries {
                retired: true,
                ..SiteSeries::default()
            },
        );
        if let Some(info) = &old.info {
            let _ = self.org_sites.remove_label_values(&refs(info));
        }
        for device in old.devices.values() {
            self.remove_device(device);
        }
        for values in old.clients.values() {
            self.remove_client(values);
        }
        debug!(site_id, "forgot site series");
    }
}
