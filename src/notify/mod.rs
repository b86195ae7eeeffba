//! Realtime notify modules.
//!
//! - `codec`: signed envelope encoding for outbound commands.
//! - `connection`: dialing, per-connection heartbeat and reconnect handling.
//! - `proto`: command and response messages shared with the notify service.
//! - `session`: subscribe/publish/acknowledge API over a reconnecting
//!   connection.
//! - `transport`: dial seam and the websocket implementation.

/// Signed envelope codec.
pub mod codec;
/// Connection lifecycle, options and state.
pub mod connection;
/// Notify session errors.
pub mod error;
mod heartbeat;
/// Notify protocol messages.
pub mod proto;
/// Session API with delivery queues.
pub mod session;
/// Frame transport traits and the websocket dialer.
pub mod transport;

pub use codec::{Codec, CodecError, DecodeError, Envelope};
pub use connection::{ConnectionState, NotifyDefaults, NotifyOptions};
pub use error::NotifyError;
pub use proto::{Command, CommandBody, MsgData, Response, ResponseResult};
pub use session::{Delivery, DeliveryQueue, NotifySession};
pub use transport::{Dialer, FrameSink, FrameSource, Transport, TransportError, UpgradeRequest, WebSocketDialer};
