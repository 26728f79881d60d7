// mistex-api: Async Rust client for the Mist cloud API (REST + websocket streams)

pub mod client;
pub mod error;
pub mod models;
pub mod stream;
pub mod transport;

pub use client::{DEFAULT_BASE_URL, MistClient, websocket_url_for};
pub use error::Error;
pub use models::{
    ClientStat, DeviceStat, DeviceStatus, DeviceType, EnvStat, Privilege, RadioStat, SelfInfo,
    Site,
};
pub use stream::StreamKind;
pub use transport::{TlsMode, TransportConfig};
