// Mist API response models.
//
// The cloud API omits fields freely (sensor blocks are only present on
// hardware that has them, streamed stats are often partial), so almost
// everything is optional. Unknown fields are ignored.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

// ── Organization ─────────────────────────────────────────────────────

/// `GET /api/v1/self`
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SelfInfo {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub privileges: Vec<Privilege>,
}

impl SelfInfo {
    /// Org IDs this token holds an org-scoped privilege for.
    pub fn org_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self
            .privileges
            .iter()
            .filter(|p| p.scope == "org")
            .filter_map(|p| p.org_id.as_deref())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Privilege {
    pub scope: String,
    #[serde(default)]
    pub org_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

/// Envelope of the `.../count?distinct=<field>` endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CountResponse {
    #[serde(default)]
    pub distinct: Option<String>,
    #[serde(default)]
    pub results: Vec<serde_json::Map<String, serde_json::Value>>,
}

impl CountResponse {
    /// Collapse the result rows into `value -> count`, keyed by the
    /// `distinct` field (falling back to `field` if the API omitted it).
    pub fn into_counts(self, field: &str) -> HashMap<String, u64> {
        let key = self.distinct.unwrap_or_else(|| field.to_owned());
        self.results
            .into_iter()
            .filter_map(|row| {
                let name = match row.get(&key)? {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                let count = row.get("count")?.as_u64()?;
                Some((name, count))
            })
            .collect()
    }
}

// ── Site ─────────────────────────────────────────────────────────────

/// A managed location. Identity is the opaque `id`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Site {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
}

// ── Devices ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DeviceType {
    Ap,
    Switch,
    Gateway,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DeviceStatus {
    Connected,
    Disconnected,
    Restarting,
    Upgrading,
    #[default]
    #[serde(other)]
    Unknown,
}

impl DeviceStatus {
    /// Numeric encoding exported as `mist_device_status_code`.
    pub fn code(self) -> f64 {
        match self {
            Self::Disconnected => 0.0,
            Self::Connected => 1.0,
            Self::Restarting => 2.0,
            Self::Upgrading => 3.0,
            Self::Unknown => -1.0,
        }
    }
}

/// Point-in-time statistics for one device
/// (`GET /api/v1/sites/{id}/stats/devices`, or a streamed update).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DeviceStat {
    pub id: String,
    #[serde(default)]
    pub mac: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub device_type: DeviceType,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub hw_rev: Option<String>,
    #[serde(default)]
    pub status: Option<DeviceStatus>,
    #[serde(default)]
    pub uptime: Option<f64>,
    #[serde(default)]
    pub last_seen: Option<f64>,
    #[serde(default)]
    pub created_time: Option<f64>,
    #[serde(default)]
    pub modified_time: Option<f64>,
    #[serde(default)]
    pub tx_bps: Option<f64>,
    #[serde(default)]
    pub rx_bps: Option<f64>,
    #[serde(default)]
    pub cpu_util: Option<f64>,
    #[serde(default)]
    pub num_clients: Option<f64>,
    #[serde(default)]
    pub power_budget: Option<f64>,
    #[serde(default)]
    pub power_constrained: Option<bool>,
    #[serde(default)]
    pub env_stat: Option<EnvStat>,
    /// Per-band radio stats, keyed by band (`band_24`, `band_5`, `band_6`).
    #[serde(default)]
    pub radio_stat: BTreeMap<String, RadioStat>,
}

/// Environmental sensor block reported by APs that carry sensors.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EnvStat {
    #[serde(default)]
    pub accel_x: Option<f64>,
    #[serde(default)]
    pub accel_y: Option<f64>,
    #[serde(default)]
    pub accel_z: Option<f64>,
    #[serde(default)]
    pub ambient_temp: Option<f64>,
    #[serde(default)]
    pub attitude: Option<f64>,
    #[serde(default)]
    pub cpu_temp: Option<f64>,
    #[serde(default)]
    pub humidity: Option<f64>,
    #[serde(default)]
    pub magne_x: Option<f64>,
    #[serde(default)]
    pub magne_y: Option<f64>,
    #[serde(default)]
    pub magne_z: Option<f64>,
    #[serde(default)]
    pub pressure: Option<f64>,
    #[serde(default)]
    pub vcore_voltage: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RadioStat {
    #[serde(default)]
    pub bandwidth: Option<f64>,
    #[serde(default)]
    pub channel: Option<f64>,
    #[serde(default)]
    pub dynamic_chaining_enabled: Option<bool>,
    #[serde(default)]
    pub noise_floor: Option<f64>,
    #[serde(default)]
    pub num_clients: Option<f64>,
    #[serde(default)]
    pub num_wlans: Option<f64>,
    #[serde(default)]
    pub power: Option<f64>,
    #[serde(default)]
    pub rx_bytes: Option<f64>,
    #[serde(default)]
    pub rx_pkts: Option<f64>,
    #[serde(default)]
    pub tx_bytes: Option<f64>,
    #[serde(default)]
    pub tx_pkts: Option<f64>,
    #[serde(default)]
    pub util_all: Option<f64>,
    #[serde(default)]
    pub util_non_wifi: Option<f64>,
    #[serde(default)]
    pub util_rx_in_bss: Option<f64>,
    #[serde(default)]
    pub util_rx_other_bss: Option<f64>,
    #[serde(default)]
    pub util_tx: Option<f64>,
    #[serde(default)]
    pub util_undecodable_wifi: Option<f64>,
    #[serde(default)]
    pub util_unknown_wifi: Option<f64>,
}

// ── Clients ──────────────────────────────────────────────────────────

/// Point-in-time statistics for one wireless client
/// (`GET /api/v1/sites/{id}/stats/clients`, or a streamed update).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ClientStat {
    pub mac: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub os: Option<String>,
    #[serde(default)]
    pub manufacture: Option<String>,
    #[serde(default)]
    pub family: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub ap_id: Option<String>,
    #[serde(default)]
    pub proto: Option<String>,
    #[serde(default)]
    pub band: Option<String>,
    #[serde(default)]
    pub ssid: Option<String>,
    #[serde(default)]
    pub channel: Option<f64>,
    #[serde(default)]
    pub dual_band: Option<bool>,
    #[serde(default)]
    pub idle_time: Option<f64>,
    #[serde(default)]
    pub is_guest: Option<bool>,
    #[serde(default)]
    pub last_seen: Option<f64>,
    #[serde(default)]
    pub num_locating_aps: Option<f64>,
    #[serde(default)]
    pub power_saving: Option<bool>,
    #[serde(default)]
    pub rssi: Option<f64>,
    #[serde(default)]
    pub snr: Option<f64>,
    #[serde(default)]
    pub rx_bps: Option<f64>,
    #[serde(default)]
    pub rx_bytes: Option<f64>,
    #[serde(default)]
    pub rx_pkts: Option<f64>,
    #[serde(default)]
    pub rx_rate: Option<f64>,
    #[serde(default)]
    pub rx_retries: Option<f64>,
    #[serde(default)]
    pub tx_bps: Option<f64>,
    #[serde(default)]
    pub tx_bytes: Option<f64>,
    #[serde(default)]
    pub tx_pkts: Option<f64>,
    #[serde(default)]
    pub tx_rate: Option<f64>,
    #[serde(default)]
    pub tx_retries: Option<f64>,
    #[serde(default)]
    pub uptime: Option<f64>,
}
