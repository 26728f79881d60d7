// Mist REST API client
//
// Wraps `reqwest::Client` with Mist URL construction, token auth and
// status/error mapping. The websocket subscriptions live in `stream.rs`
// as inherent methods on the same type.

use std::collections::HashMap;

use reqwest::StatusCode;
use secrecy::SecretString;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::models::{ClientStat, CountResponse, DeviceStat, SelfInfo, Site};
use crate::transport::TransportConfig;

/// Default public cloud endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.mist.com";

const WEBSOCKET_PATH: &str = "/api-ws/v1/stream";
const MAX_ERROR_BODY: usize = 256;

/// Async client for the Mist cloud API.
///
/// Cheaply cloneable: the underlying `reqwest::Client` is reference counted.
#[derive(Clone)]
pub struct MistClient {
    http: reqwest::Client,
    base_url: Url,
    ws_url: Url,
    pub(crate) api_key: SecretString,
}

impl std::fmt::Debug for MistClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MistClient")
            .field("base_url", &self.base_url.as_str())
            .field("ws_url", &self.ws_url.as_str())
            .finish_non_exhaustive()
    }
}

impl MistClient {
    /// Create a client for `base_url`.
    ///
    /// `ws_url` overrides the stream endpoint; when `None` it is derived
    /// from the REST host (see [`websocket_url_for`]).
    pub fn new(
        base_url: Url,
        api_key: SecretString,
        ws_url: Option<Url>,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let http = transport.build_client(&api_key)?;
        let ws_url = match ws_url {
            Some(u) => u,
            None => websocket_url_for(&base_url)?,
        };
        Ok(Self {
            http,
            base_url,
            ws_url,
            api_key,
        })
    }

    /// The REST base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The websocket stream endpoint.
    pub fn websocket_url(&self) -> &Url {
        &self.ws_url
    }

    // ── Endpoints ────────────────────────────────────────────────────

    /// `GET /api/v1/self`
    pub async fn get_self(&self) -> Result<SelfInfo, Error> {
        self.get(self.api_url("self")?).await
    }

    /// `GET /api/v1/orgs/{org_id}/sites`
    pub async fn list_org_sites(&self, org_id: &str) -> Result<Vec<Site>, Error> {
        debug!(org_id, "listing sites");
        self.get(self.api_url(&format!("orgs/{org_id}/sites"))?)
            .await
    }

    /// `GET /api/v1/orgs/{org_id}/alarms/count?distinct=type`
    pub async fn count_org_alarms(&self, org_id: &str) -> Result<HashMap<String, u64>, Error> {
        let mut url = self.api_url(&format!("orgs/{org_id}/alarms/count"))?;
        url.query_pairs_mut().append_pair("distinct", "type");
        let resp: CountResponse = self.get(url).await?;
        Ok(resp.into_counts("type"))
    }

    /// `GET /api/v1/orgs/{org_id}/tickets/count?distinct=status`
    pub async fn count_org_tickets(&self, org_id: &str) -> Result<HashMap<String, u64>, Error> {
        let mut url = self.api_url(&format!("orgs/{org_id}/tickets/count"))?;
        url.query_pairs_mut().append_pair("distinct", "status");
        let resp: CountResponse = self.get(url).await?;
        Ok(resp.into_counts("status"))
    }

    /// `GET /api/v1/sites/{site_id}/stats/devices?type=all`
    pub async fn site_device_stats(&self, site_id: &str) -> Result<Vec<DeviceStat>, Error> {
        let mut url = self.api_url(&format!("sites/{site_id}/stats/devices"))?;
        url.query_pairs_mut().append_pair("type", "all");
        self.get(url).await
    }

    /// `GET /api/v1/sites/{site_id}/stats/clients`
    pub async fn site_clients(&self, site_id: &str) -> Result<Vec<ClientStat>, Error> {
        self.get(self.api_url(&format!("sites/{site_id}/stats/clients"))?)
            .await
    }

    // ── Request helpers ──────────────────────────────────────────────

    /// Build `{base}/api/v1/{path}`.
    pub(crate) fn api_url(&self, path: &str) -> Result<Url, Error> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{base}/api/v1/{path}"))?)
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, Error> {
        debug!("GET {}", url);
        let resp = self.http.get(url).send().await?;
        let status = resp.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(60);
            return Err(Error::RateLimited { retry_after_secs });
        }

        let body = resp.text().await?;

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(Error::Authentication {
                status: status.as_u16(),
                message: error_detail(&body),
            });
        }
        if !status.is_success() {
            return Err(Error::Api {
                status: status.as_u16(),
                message: error_detail(&body),
            });
        }

        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body,
        })
    }
}

/// Pull `detail` out of a Mist error body, or fall back to a clipped
/// copy of the raw text.
fn error_detail(body: &str) -> String {
    #[derive(serde::Deserialize)]
    struct Detail {
        detail: String,
    }

    if let Ok(d) = serde_json::from_str::<Detail>(body) {
        return d.detail;
    }
    let trimmed = body.trim();
    if trimmed.len() <= MAX_ERROR_BODY {
        return trimmed.to_owned();
    }
    let mut end = MAX_ERROR_BODY;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &trimmed[..end])
}

/// Derive the stream endpoint from a REST base URL.
///
/// `https://api.mist.com` → `wss://api-ws.mist.com/api-ws/v1/stream`,
/// `https://api.eu.mist.com` → `wss://api-ws.eu.mist.com/api-ws/v1/stream`.
/// Hosts that don't start with `api.` keep their name.
pub fn websocket_url_for(base_url: &Url) -> Result<Url, Error> {
    let scheme = if base_url.scheme() == "http" { "ws" } else { "wss" };
    let host = base_url.host_str().ok_or(Error::InvalidUrl(url::ParseError::EmptyHost))?;
    let host = host
        .strip_prefix("api.")
        .map_or_else(|| host.to_owned(), |rest| format!("api-ws.{rest}"));
    let url = match base_url.port() {
        Some(p) => format!("{scheme}://{host}:{p}{WEBSOCKET_PATH}"),
        None => format!("{scheme}://{host}{WEBSOCKET_PATH}"),
    };
    Ok(Url::parse(&url)?)
}
