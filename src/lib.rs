//! Rust client for Feathers services over Primus websockets.
//!
//! Two protocols share one websocket: Primus keepalive frames
//! (`"primus::ping::<nonce>"` answered with `"primus::pong::<nonce>"`) and
//! Feathers JSON payloads carrying events and call results.
//!
//! # Quick start
//!
//! ```no_run
//! use feathers_primus::Connection;
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), feathers_primus::FeathersError> {
//! let mut conn = Connection::builder("https://api.ezdevice.net")
//!     .on("disconnect", |_| println!("disconnected"))
//!     .connect()
//!     .await?;
//!
//! let devices = conn.service("devices");
//! conn.on(&devices.event_name("patched"), |device| println!("{device}")).await;
//!
//! let device = devices.get("f0001", json!({})).await?;
//! println!("{device}");
//!
//! conn.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! Calls are correlated by id only, so results may arrive in any order.
//! Every call still pending when the transport ends fails with
//! [`FeathersError::ConnectionClosed`].

pub mod config;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod protocol;

pub use config::ClientConfig;
pub use connection::{
    Connection, ConnectionBuilder, ConnectionState, EventHandler, HandlerId, PendingCall, Service,
    service_event_name,
};
pub use error::{FeathersError, Result};
pub use protocol::{Frame, Message, PayloadCodec, ProtocolError, ServerError};
