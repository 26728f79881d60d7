#![allow(clippy::unwrap_used)]
// Integration tests for `MistClient` using wiremock.

use secrecy::SecretString;
use serde_json::json;
use url::Url;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use mistex_api::{DeviceStatus, DeviceType, Error, MistClient, TransportConfig};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, MistClient) {
    let server = MockServer::start().await;
    let base_url = Url::parse(&server.uri()).unwrap();
    let key = SecretString::from("test-token".to_string());
    let client = MistClient::new(base_url, key, None, &TransportConfig::default()).unwrap();
    (server, client)
}

// ── Organization tests ──────────────────────────────────────────────

#[tokio::test]
async fn test_get_self_sends_token_header() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/self"))
        .and(header("authorization", "Token test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "email": "ops@example.com",
            "privileges": [
                { "scope": "org", "org_id": "org-1", "name": "Acme", "role": "read" }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let info = client.get_self().await.unwrap();
    assert_eq!(info.org_ids(), vec!["org-1"]);
}

#[tokio::test]
async fn test_list_org_sites() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/orgs/org-1/sites"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "s1", "name": "HQ", "country_code": "US", "timezone": "America/New_York" },
            { "id": "s2", "name": "Lab" }
        ])))
        .mount(&server)
        .await;

    let sites = client.list_org_sites("org-1").await.unwrap();
    assert_eq!(sites.len(), 2);
    assert_eq!(sites[0].name, "HQ");
    assert_eq!(sites[0].country_code.as_deref(), Some("US"));
    assert!(sites[1].timezone.is_none());
}

#[tokio::test]
async fn test_count_org_alarms() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/orgs/org-1/alarms/count"))
        .and(query_param("distinct", "type"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "distinct": "type",
            "results": [
                { "type": "device_down", "count": 2 },
                { "type": "ap_offline", "count": 5 }
            ]
        })))
        .mount(&server)
        .await;

    let counts = client.count_org_alarms("org-1").await.unwrap();
    assert_eq!(counts["device_down"], 2);
    assert_eq!(counts["ap_offline"], 5);
}

#[tokio::test]
async fn test_count_org_tickets() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/orgs/org-1/tickets/count"))
        .and(query_param("distinct", "status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "distinct": "status",
            "results": [ { "status": "open", "count": 1 } ]
        })))
        .mount(&server)
        .await;

    let counts = client.count_org_tickets("org-1").await.unwrap();
    assert_eq!(counts.len(), 1);
    assert_eq!(counts["open"], 1);
}

// ── Site stat tests ─────────────────────────────────────────────────

#[tokio::test]
async fn test_site_device_stats() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/sites/s1/stats/devices"))
        .and(query_param("type", "all"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": "d1",
            "mac": "5c5b35000001",
            "name": "AP-Lobby",
            "type": "ap",
            "model": "AP43",
            "status": "connected",
            "uptime": 86400,
            "cpu_util": 12,
            "env_stat": { "cpu_temp": 54.0 },
            "radio_stat": {
                "band_24": { "channel": 6, "noise_floor": -92 },
                "band_5": { "channel": 36, "util_all": 21 }
            }
        }])))
        .mount(&server)
        .await;

    let devices = client.site_device_stats("s1").await.unwrap();
    assert_eq!(devices.len(), 1);
    let ap = &devices[0];
    assert_eq!(ap.device_type, DeviceType::Ap);
    assert_eq!(ap.status, Some(DeviceStatus::Connected));
    assert_eq!(ap.uptime, Some(86400.0));
    assert_eq!(ap.env_stat.as_ref().unwrap().cpu_temp, Some(54.0));
    assert_eq!(ap.radio_stat.len(), 2);
}

#[tokio::test]
async fn test_site_clients() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/sites/s1/stats/clients"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "mac": "aabbccddeeff",
            "hostname": "laptop",
            "ap_id": "d1",
            "band": "5",
            "ssid": "corp",
            "rssi": -55,
            "is_guest": false
        }])))
        .mount(&server)
        .await;

    let clients = client.site_clients("s1").await.unwrap();
    assert_eq!(clients[0].hostname.as_deref(), Some("laptop"));
    assert_eq!(clients[0].rssi, Some(-55.0));
    assert_eq!(clients[0].is_guest, Some(false));
}

// ── Error mapping tests ─────────────────────────────────────────────

#[tokio::test]
async fn test_unauthorized_maps_to_authentication() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/self"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({ "detail": "Invalid token." })),
        )
        .mount(&server)
        .await;

    let result = client.get_self().await;
    match result {
        Err(Error::Authentication { status, message }) => {
            assert_eq!(status, 401);
            assert_eq!(message, "Invalid token.");
        }
        other => panic!("expected Authentication error, got: {other:?}"),
    }
}

#[tokio::test]
async fn test_rate_limited_reads_retry_after() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/orgs/org-1/sites"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "17"))
        .mount(&server)
        .await;

    let result = client.list_org_sites("org-1").await;
    assert!(
        matches!(result, Err(Error::RateLimited { retry_after_secs: 17 })),
        "expected RateLimited error, got: {result:?}"
    );
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/sites/s1/stats/devices"))
        .respond_with(ResponseTemplate::new(502).set_body_string("Bad Gateway"))
        .mount(&server)
        .await;

    let err = client.site_device_stats("s1").await.unwrap_err();
    assert!(err.is_transient());
    assert_eq!(err.status(), Some(502));
}

#[tokio::test]
async fn test_malformed_body_keeps_raw_text() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/sites/s1/stats/clients"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    match client.site_clients("s1").await {
        Err(Error::Deserialization { body, .. }) => assert_eq!(body, "<html>oops</html>"),
        other => panic!("expected Deserialization error, got: {other:?}"),
    }
}

#[tokio::test]
async fn test_websocket_url_derived_from_mock_host() {
    let (server, client) = setup().await;
    let expected = format!(
        "ws://{}/api-ws/v1/stream",
        server.uri().trim_start_matches("http://")
    );
    assert_eq!(client.websocket_url().as_str(), expected);
}
