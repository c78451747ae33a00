//! # xbee-session
//!
//! An async session layer for XBee-style radio modules attached over
//! USB/serial.
//!
//! The device is half duplex and answers one request at a time, so the
//! session serializes all outbound commands through a single queue and
//! correlates every response back to its request by frame id. On top of
//! that it keeps a registry of the remote nodes it has seen, watches their
//! liveness, and fans inbound traffic out as events.
//!
//! ## Features
//!
//! - Async/await based API using Tokio
//! - Command/response correlation with per-command timeouts
//! - Transparent fragmentation of large payloads
//! - Node discovery, auto-registration and heartbeat liveness tracking
//! - Event-driven architecture for unsolicited traffic
//!
//! The byte-level wire format lives behind the [`FrameCodec`] and
//! [`FrameDecoder`] traits; the session works entirely on typed frames.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use xbee_session::{SerialConfig, SerialTransport, Session, SessionConfig};
//! # use bytes::Bytes;
//! # use xbee_session::{CodecError, CommandSpec, Frame, FrameCodec, FrameDecoder};
//! # struct Codec;
//! # impl FrameCodec for Codec {
//! #     fn encode(&self, _: &CommandSpec) -> Result<Bytes, CodecError> { unimplemented!() }
//! #     fn max_payload_size(&self) -> usize { 74 }
//! # }
//! # struct Decoder;
//! # impl FrameDecoder for Decoder {
//! #     fn feed(&mut self, _: &[u8]) {}
//! #     fn next_frame(&mut self) -> Result<Option<Frame>, CodecError> { Ok(None) }
//! # }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), xbee_session::Error> {
//!     let transport = SerialTransport::new(SerialConfig::new("/dev/ttyUSB0"));
//!     let session = Session::new(
//!         transport,
//!         Arc::new(Codec),
//!         Box::new(Decoder),
//!         SessionConfig::default(),
//!     );
//!
//!     // Connect and query the device's identity.
//!     let parameters = session.connect().await?;
//!     println!("up as '{}' ({})", parameters.identifier, parameters.address);
//!
//!     // Scan the network.
//!     for address in session.discover(None).await {
//!         println!("found node {address}");
//!     }
//!
//!     session.disconnect().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`protocol`] - Typed frames, addressing, status codes and the codec
//!   boundary traits
//! - [`transport`] - Byte-stream transports (currently USB/serial)
//! - [`session`] - The high-level [`Session`], its command queue and
//!   bootstrap
//! - [`node`] - Remote node registry, liveness and per-node operations
//! - [`event`] - Async event system for unsolicited notifications

pub mod error;
pub mod event;
pub mod node;
pub mod protocol;
pub mod session;
pub mod transport;

mod correlation;
mod queue;
mod router;

#[cfg(test)]
mod testing;

// Re-exports for convenience
pub use error::{Error, Result};
pub use event::{Event, EventDispatcher, EventFilter, EventKind, Subscription};
pub use node::{Node, ParserFactory, PayloadParser};
pub use protocol::{
    AtCommandName, CodecError, CommandSpec, CommandStatus, CorrelationTag, DeliveryStatus,
    DeviceRole, Frame, FrameCodec, FrameDecoder, FrameKind, HardwareAddress, IoSample,
    ModemStatusCode, NetworkAddress, NodeContact,
};
pub use session::{Session, SessionConfig, SessionParameters};
pub use transport::{
    SerialTransport, Transport,
    serial::{SerialConfig, list_ports},
};
