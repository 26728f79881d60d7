// Label names and value builders shared by every metric family.
//
// Value builders return owned strings in the same order as the
// matching `*_LABELS` constant. Absent upstream fields become "".

use mistex_api::{ClientStat, DeviceStat, Site};

pub const SITE_LABELS: [&str; 3] = ["site_name", "country_code", "timezone"];

pub const DEVICE_LABELS: [&str; 8] = [
    "site_name",
    "country_code",
    "timezone",
    "device_id",
    "device_name",
    "device_type",
    "device_model",
    "device_hw_rev",
];

pub const RADIO_LABELS: [&str; 9] = [
    "site_name",
    "country_code",
    "timezone",
    "device_id",
    "device_name",
    "device_type",
    "device_model",
    "device_hw_rev",
    "radio",
];

pub const CLIENT_LABELS: [&str; 14] = [
    "site_name",
    "country_code",
    "timezone",
    "client_mac",
    "client_username",
    "client_hostname",
    "client_os",
    "client_manufacture",
    "client_family",
    "client_model",
    "device_id",
    "proto",
    "radio",
    "ssid",
];

/// Labels of `mist_org_sites`.
pub const SITE_INFO_LABELS: [&str; 3] = ["site_id", "site_name", "country_code"];

pub const ALARM_LABELS: [&str; 1] = ["alarm_type"];
pub const TICKET_LABELS: [&str; 1] = ["ticket_status"];

fn text(v: Option<&String>) -> String {
    v.cloned().unwrap_or_default()
}

pub fn site_values(site: &Site) -> Vec<String> {
    vec![
        site.name.clone(),
        text(site.country_code.as_ref()),
        text(site.timezone.as_ref()),
    ]
}

pub fn site_info_values(site: &Site) -> Vec<String> {
    vec![
        site.id.clone(),
        site.name.clone(),
        text(site.country_code.as_ref()),
    ]
}

pub fn device_values(site: &Site, stat: &DeviceStat) -> Vec<String> {
    let mut values = site_values(site);
    values.extend([
        stat.id.clone(),
        text(stat.name.as_ref()),
        stat.device_type.to_string(),
        text(stat.model.as_ref()),
        text(stat.hw_rev.as_ref()),
    ]);
    values
}

/// `band` is the `radio_stat` key; the `band_` prefix is dropped so
/// radios and clients share the same `radio` vocabulary (`24`, `5`, `6`).
pub fn radio_values(site: &Site, stat: &DeviceStat, band: &str) -> Vec<String> {
    let mut values = device_values(site, stat);
    values.push(band.strip_prefix("band_").unwrap_or(band).to_owned());
    values
}

pub fn client_values(site: &Site, stat: &ClientStat) -> Vec<String> {
    let mut values = site_values(site);
    values.extend([
        stat.mac.clone(),
        text(stat.username.as_ref()),
        text(stat.hostname.as_ref()),
        text(stat.os.as_ref()),
        text(stat.manufacture.as_ref()),
        text(stat.family.as_ref()),
        text(stat.model.as_ref()),
        text(stat.ap_id.as_ref()),
        text(stat.proto.as_ref()),
        text(stat.band.as_ref()),
        text(stat.ssid.as_ref()),
    ]);
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use mistex_api::DeviceType;

    fn site() -> Site {
        Site {
            id: "s1".into(),
            name: "HQ".into(),
            country_code: Some("GB".into()),
            timezone: None,
        }
    }

    #[test]
    fn value_builders_match_label_arity() {
        let device = DeviceStat {
            id: "d1".into(),
            device_type: DeviceType::Switch,
            ..DeviceStat::default()
        };
        let client = ClientStat {
            mac: "aabbccddeeff".into(),
            ..ClientStat::default()
        };
        assert_eq!(site_values(&site()).len(), SITE_LABELS.len());
        assert_eq!(site_info_values(&site()).len(), SITE_INFO_LABELS.len());
        assert_eq!(device_values(&site(), &device).len(), DEVICE_LABELS.len());
        assert_eq!(radio_values(&site(), &device, "band_5").len(), RADIO_LABELS.len());
        assert_eq!(client_values(&site(), &client).len(), CLIENT_LABELS.len());
    }

    #[test]
    fn radio_label_drops_band_prefix() {
        let device = DeviceStat {
            id: "d1".into(),
            ..DeviceStat::default()
        };
        let values = radio_values(&site(), &device, "band_24");
        assert_eq!(values.last().map(String::as_str), Some("24"));
        assert_eq!(values[5], "unknown");
        assert_eq!(values[2], "");
    }
}
