use std::convert::From;
use std::fmt;
use std::io;

use crate::close_code::CloseCode;

pub type WebsocketResult<T> = Result<T, WebsocketError>;

/// Everything that can go wrong on a connection.
///
/// `Protocol` and `Closed` carry a close code the way the wire protocol
/// does; `Io` is the transport's own failure, including `UnexpectedEof`
/// for a short read mid-frame (the only EOF that is an error — a clean
/// EOF on a frame boundary is not represented as an error at all, see
/// `Framer::read_frame`).
#[derive(Debug)]
pub enum WebsocketError {
    Io(io::Error),
    /// The peer (or our own state machine) violated the protocol.
    Protocol { code: CloseCode, message: String },
    /// The peer closed the connection with a non-`NO_ERROR` code.
    Closed { code: CloseCode, message: String },
}

impl WebsocketError {
    pub fn protocol(code: CloseCode, message: impl Into<String>) -> Self {
        WebsocketError::Protocol {
            code,
            message: message.into(),
        }
    }

    pub fn closed(code: CloseCode, message: impl Into<String>) -> Self {
        WebsocketError::Closed {
            code,
            message: message.into(),
        }
    }

    /// The close code to send back to the peer for this error. An `Io`
    /// error carries no close code of its own, so it maps to
    /// `PROTOCOL_ERROR`.
    pub fn close_code(&self) -> CloseCode {
        match self {
            WebsocketError::Protocol { code, .. } => *code,
            WebsocketError::Closed { code, .. } => *code,
            WebsocketError::Io(_) => CloseCode::PROTOCOL_ERROR,
        }
    }
}

impl fmt::Display for WebsocketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebsocketError::Io(ref err) => write!(f, "{}", err),
            WebsocketError::Protocol { code, message } => {
                write!(f, "protocol error ({}): {}", code.as_u16(), message)
            }
            WebsocketError::Closed { code, message } => {
                write!(f, "connection closed by peer ({}): {}", code.as_u16(), message)
            }
        }
    }
}

impl std::error::Error for WebsocketError {}

impl From<io::Error> for WebsocketError {
    fn from(err: io::Error) -> Self {
        WebsocketError::Io(err)
    }
}
