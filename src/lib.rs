//! RFC 6455 WebSocket frame codec and connection state machine.
//!
//! This crate covers the two hard parts of a WebSocket implementation:
//! a bit-exact [`frame`] codec (masking, extended length encoding,
//! opcode dispatch) and the [`Connection`] state machine that aggregates
//! frames into messages and enforces protocol invariants. HTTP Upgrade
//! negotiation, subprotocols, extensions, and transport/TLS concerns are
//! out of scope: callers hand this crate an already-upgraded
//! `AsyncRead + AsyncWrite` stream.
//!
//! ```ignore
//! let framer = Framer::new(stream);
//! let mut conn = Connection::new(framer); // server role: unmasked
//! while let Some(message) = conn.read().await? {
//!     conn.write(message).await?;
//! }
//! ```

pub mod close_code;
pub mod config;
pub mod connection;
pub mod error;
pub mod frame;
pub mod framer;
pub mod mask;
pub mod message;

pub use close_code::CloseCode;
pub use config::ConnectionConfig;
pub use connection::Connection;
pub use error::{WebsocketError, WebsocketResult};
pub use frame::{Frame, Opcode};
pub use framer::Framer;
pub use mask::MaskMode;
pub use message::Message;
