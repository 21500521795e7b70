//! Primus framing and Feathers payload protocol.
//!
//! Two layers share one text channel: Primus keepalive frames
//! (`"primus::ping::<nonce>"` / `"primus::pong::<nonce>"`) and JSON payload
//! frames carrying Feathers events and call results.

mod codec;
mod frame;

pub use codec::{CallMessage, Message, PayloadCodec, ProtocolError, ServerError};
pub use frame::Frame;
