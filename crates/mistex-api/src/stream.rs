//! Websocket stat subscriptions.
//!
//! Each subscription opens its own connection to the Mist stream endpoint,
//! subscribes to one channel, and forwards decoded records through a
//! bounded [`tokio::sync::mpsc`] channel. The channel closes when the
//! server closes the socket, a read fails, the receiver is dropped, or the
//! cancellation token fires. There is no reconnect loop here: callers
//! decide when to subscribe again.
//!
//! ```rust,ignore
//! let cancel = CancellationToken::new();
//! let mut rx = client.stream_device_stats(cancel.clone(), &site_id).await?;
//! while let Some(stat) = rx.recv().await {
//!     println!("{} up {:?}s", stat.id, stat.uptime);
//! }
//! ```

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use strum::Display;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder, Message};
use tokio_util::sync::CancellationToken;

use crate::client::MistClient;
use crate::error::Error;
use crate::models::{ClientStat, DeviceStat};
use crate::transport::auth_header;

const STREAM_BUFFER: usize = 256;

/// Which per-site feed a subscription carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum StreamKind {
    Devices,
    Clients,
}

impl StreamKind {
    /// Mist channel name for `site_id`.
    pub fn channel(self, site_id: &str) -> String {
        match self {
            Self::Devices => format!("/sites/{site_id}/stats/devices"),
            Self::Clients => format!("/sites/{site_id}/stats/clients"),
        }
    }
}

impl MistClient {
    /// Subscribe to live device stats for a site.
    pub async fn stream_device_stats(
        &self,
        cancel: CancellationToken,
        site_id: &str,
    ) -> Result<mpsc::Receiver<DeviceStat>, Error> {
        self.subscribe(cancel, StreamKind::Devices.channel(site_id))
            .await
    }

    /// Subscribe to live wireless client stats for a site.
    pub async fn stream_client_stats(
        &self,
        cancel: CancellationToken,
        site_id: &str,
    ) -> Result<mpsc::Receiver<ClientStat>, Error> {
        self.subscribe(cancel, StreamKind::Clients.channel(site_id))
            .await
    }

    /// Connect, send the subscribe request, and spawn the reader task.
    ///
    /// Returns once the subscribe request has been written; any failure
    /// up to that point is returned as [`Error::WebSocketConnect`].
    async fn subscribe<T>(
        &self,
        cancel: CancellationToken,
        channel: String,
    ) -> Result<mpsc::Receiver<T>, Error>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let uri: tungstenite::http::Uri = self
            .websocket_url()
            .as_str()
            .parse()
            .map_err(|e: tungstenite::http::uri::InvalidUri| {
                Error::WebSocketConnect(e.to_string())
            })?;
        let token = auth_header(&self.api_key)?
            .to_str()
            .map_err(|_| Error::InvalidApiKey)?
            .to_owned();
        let request = ClientRequestBuilder::new(uri).with_header("Authorization", token);

        tracing::debug!(channel = %channel, "opening stream subscription");
        let (ws_stream, _response) = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Err(Error::WebSocketConnect("cancelled before connect".into()));
            }
            result = tokio_tungstenite::connect_async(request) => {
                result.map_err(|e| Error::WebSocketConnect(e.to_string()))?
            }
        };

        let (mut write, mut read) = ws_stream.split();
        let subscribe = serde_json::json!({ "subscribe": channel }).to_string();
        write
            .send(Message::Text(subscribe.into()))
            .await
            .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                    () = tx.closed() => break,
                    frame = read.next() => match frame {
                        Some(Ok(Message::Text(text))) => match parse_frame::<T>(&text) {
                            Ok(StreamFrame::Data(record)) => {
                                if tx.send(record).await.is_err() {
                                    break;
                                }
                            }
                            Ok(StreamFrame::Subscribed(ch)) => {
                                tracing::debug!(channel = %ch, "stream subscription acknowledged");
                            }
                            Ok(StreamFrame::Other(event)) => {
                                tracing::trace!(channel = %channel, event = %event, "ignoring stream event");
                            }
                            Err(e) => {
                                tracing::debug!(channel = %channel, error = %e, "undecodable stream frame");
                            }
                        },
                        Some(Ok(Message::Close(frame))) => {
                            if let Some(cf) = frame {
                                tracing::info!(
                                    channel = %channel,
                                    code = %cf.code,
                                    reason = %cf.reason,
                                    "stream closed by server"
                                );
                            } else {
                                tracing::info!(channel = %channel, "stream closed by server");
                            }
                            break;
                        }
                        Some(Err(e)) => {
                            tracing::warn!(channel = %channel, error = %e, "stream read failed");
                            break;
                        }
                        None => {
                            tracing::info!(channel = %channel, "stream ended");
                            break;
                        }
                        // Ping/Pong/Binary -- tungstenite answers pings itself
                        Some(Ok(_)) => {}
                    },
                }
            }
            tracing::debug!(channel = %channel, "stream reader exiting");
        });

        Ok(rx)
    }
}

// ── Frame parsing ────────────────────────────────────────────────────

/// Raw envelope the stream endpoint sends:
/// `{"event": "data", "channel": "/sites/../stats/devices", "data": "<json>"}`.
#[derive(Debug, Deserialize)]
struct RawFrame {
    event: String,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

#[derive(Debug)]
enum StreamFrame<T> {
    Data(T),
    Subscribed(String),
    Other(String),
}

fn parse_frame<T: DeserializeOwned>(text: &str) -> Result<StreamFrame<T>, Error> {
    let raw: RawFrame = serde_json::from_str(text).map_err(|e| Error::Deserialization {
        message: e.to_string(),
        body: text.to_owned(),
    })?;

    match raw.event.as_str() {
        "data" => {
            let decoded = match raw.data {
                // The payload is normally a JSON document encoded as a string.
                Some(serde_json::Value::String(s)) => serde_json::from_str(&s),
                Some(v) => serde_json::from_value(v),
                None => {
                    return Err(Error::Deserialization {
                        message: "data frame without payload".into(),
                        body: text.to_owned(),
                    });
                }
            };
            decoded
                .map(StreamFrame::Data)
                .map_err(|e| Error::Deserialization {
                    message: e.to_string(),
                    body: text.to_owned(),
                })
        }
        "channel_subscribed" => Ok(StreamFrame::Subscribed(raw.channel.unwrap_or_default())),
        _ => Ok(StreamFrame::Other(raw.event)),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn channel_names() {
        assert_eq!(StreamKind::Devices.channel("s1"), "/sites/s1/stats/devices");
        assert_eq!(StreamKind::Clients.channel("s1"), "/sites/s1/stats/clients");
        assert_eq!(StreamKind::Clients.to_string(), "clients");
    }

    #[test]
    fn parse_string_encoded_data_frame() {
        let inner = json!({ "id": "d1", "type": "ap", "uptime": 42 }).to_string();
        let frame = json!({
            "event": "data",
            "channel": "/sites/s1/stats/devices",
            "data": inner
        })
        .to_string();

        match parse_frame::<DeviceStat>(&frame).unwrap() {
            StreamFrame::Data(stat) => {
                assert_eq!(stat.id, "d1");
                assert_eq!(stat.uptime, Some(42.0));
            }
            other => panic!("expected data frame, got {other:?}"),
        }
    }

    #[test]
    fn parse_object_data_frame() {
        let frame = json!({
            "event": "data",
            "channel": "/sites/s1/stats/clients",
            "data": { "mac": "aabbccddeeff", "rssi": -61 }
        })
        .to_string();

        match parse_frame::<ClientStat>(&frame).unwrap() {
            StreamFrame::Data(stat) => {
                assert_eq!(stat.mac, "aabbccddeeff");
                assert_eq!(stat.rssi, Some(-61.0));
            }
            other => panic!("expected data frame, got {other:?}"),
        }
    }

    #[test]
    fn parse_subscription_ack() {
        let frame = json!({
            "event": "channel_subscribed",
            "channel": "/sites/s1/stats/devices"
        })
        .to_string();
        assert!(matches!(
            parse_frame::<DeviceStat>(&frame).unwrap(),
            StreamFrame::Subscribed(ch) if ch == "/sites/s1/stats/devices"
        ));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_frame::<DeviceStat>("not json").is_err());
        let frame = json!({ "event": "data", "data": "{\"no_id\": true}" }).to_string();
        assert!(parse_frame::<DeviceStat>(&frame).is_err());
    }
}
