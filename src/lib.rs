//! Roost: management and coordination server for fleets of always-on voice
//! satellites.
//!
//! Each satellite holds a persistent WebSocket session with the server; the
//! server delivers configuration, firmware, and notifications, arbitrates
//! wake events across co-located satellites, and proxies recognized intents
//! to a home-automation backend.
//!
//! # Architecture
//!
//! The real-time coordination plane is built from independent components
//! sharing one [`server::ServerState`]:
//! - **Connection manager** ([`connmgr`]): the live session table.
//! - **Wake arbiter** ([`wake`]): windowed loudest-wins elections.
//! - **Notify queue** ([`notify`]): per-satellite FIFO delivery with expiry.
//! - **Command endpoints** ([`endpoints`]): Home Assistant (WebSocket and
//!   REST), openHAB, generic REST, and MQTT intent backends.
//! - **Release cache** ([`releases`]): path-safe OTA firmware memoization.
//! - **Config store** ([`store`]): SQLite-backed typed settings.

pub mod api;
pub mod assets;
pub mod config;
pub mod connmgr;
pub mod endpoints;
pub mod error;
pub mod notify;
pub mod paths;
pub mod releases;
pub mod server;
pub mod session;
pub mod settings;
pub mod store;
pub mod tz;
pub mod urls;
pub mod wake;

pub use error::{Result, RoostError};
pub use server::ServerState;
pub use settings::Settings;
