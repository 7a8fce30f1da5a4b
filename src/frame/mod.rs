//! REFERENCE
//! =========
//! [RFC 6455 5.2](https://tools.ietf.org/html/rfc6455#section-5.2)
//!
//! ```ignore
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |     Extended payload length continued, if payload len == 127  |
//! + - - - - - - - - - - - - - - - +-------------------------------+
//! |                               |Masking-key, if MASK set to 1  |
//! +-------------------------------+-------------------------------+
//! | Masking-key (continued)       |          Payload Data         |
//! +-------------------------------- - - - - - - - - - - - - - - - +
//! :                     Payload Data continued ...                :
//! + - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - +
//! |                     Payload Data continued ...                |
//! +---------------------------------------------------------------+
//! ```
//!
//! RSV bits are read but otherwise ignored: extension negotiation is out
//! of scope for this core. Every frame here is a tagged variant of a
//! single enum rather than a subclass of a common base — dispatch on
//! opcode happens through a `match` in `Connection::handle_frame`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

pub mod opcode;

pub use opcode::Opcode;

use crate::close_code::CloseCode;
use crate::config::ConnectionConfig;
use crate::error::{WebsocketError, WebsocketResult};

const MAX_CONTROL_PAYLOAD: usize = 125;

/// A single WebSocket frame, already unmasked in memory if it arrived
/// masked on the wire.
///
/// One arm per opcode family, carrying only the fields that family
/// actually needs (e.g. `Close` carries a decoded `(code, reason)` pair
/// rather than a raw payload).
#[derive(Debug, Clone)]
pub enum Frame {
    Continuation {
        fin: bool,
        mask: Option<[u8; 4]>,
        payload: Bytes,
    },
    Text {
        fin: bool,
        mask: Option<[u8; 4]>,
        payload: Bytes,
    },
    Binary {
        fin: bool,
        mask: Option<[u8; 4]>,
        payload: Bytes,
    },
    Close {
        mask: Option<[u8; 4]>,
        code: Option<u16>,
        reason: String,
    },
    Ping {
        mask: Option<[u8; 4]>,
        payload: Bytes,
    },
    Pong {
        mask: Option<[u8; 4]>,
        payload: Bytes,
    },
    /// A reserved or otherwise unrecognized opcode (0x3..=0x7 or
    /// 0xB..=0xF). Carried through rather than rejected, so
    /// `Connection::receive_frame` can log and ignore it.
    Other {
        opcode: u8,
        fin: bool,
        mask: Option<[u8; 4]>,
        payload: Bytes,
    },
}

impl Frame {
    pub fn opcode(&self) -> Opcode {
        match self {
            Frame::Continuation { .. } => Opcode::Continuation,
            Frame::Text { .. } => Opcode::Text,
            Frame::Binary { .. } => Opcode::Binary,
            Frame::Close { .. } => Opcode::Close,
            Frame::Ping { .. } => Opcode::Ping,
            Frame::Pong { .. } => Opcode::Pong,
            Frame::Other { opcode, .. } => Opcode::from(*opcode),
        }
    }

    pub fn fin(&self) -> bool {
        match self {
            Frame::Continuation { fin, .. } => *fin,
            Frame::Text { fin, .. } => *fin,
            Frame::Binary { fin, .. } => *fin,
            Frame::Close { .. } => true,
            Frame::Ping { .. } => true,
            Frame::Pong { .. } => true,
            Frame::Other { fin, .. } => *fin,
        }
    }

    pub fn is_control(&self) -> bool {
        self.opcode().is_control()
    }

    pub fn mask(&self) -> Option<[u8; 4]> {
        match self {
            Frame::Continuation { mask, .. } => *mask,
            Frame::Text { mask, .. } => *mask,
            Frame::Binary { mask, .. } => *mask,
            Frame::Close { mask, .. } => *mask,
            Frame::Ping { mask, .. } => *mask,
            Frame::Pong { mask, .. } => *mask,
            Frame::Other { mask, .. } => *mask,
        }
    }

    /// The payload as it appears on the wire, before masking. For
    /// `Close` this is the big-endian code followed by the reason
    /// bytes, not the raw in-memory fields.
    fn wire_payload(&self) -> Bytes {
        match self {
            Frame::Close { code, reason, .. } => {
                let mut buf = BytesMut::new();
                if let Some(code) = code {
                    buf.put_u16(*code);
                    buf.put_slice(reason.as_bytes());
                }
                buf.freeze()
            }
            Frame::Continuation { payload, .. }
            | Frame::Text { payload, .. }
            | Frame::Binary { payload, .. }
            | Frame::Ping { payload, .. }
            | Frame::Pong { payload, .. }
            | Frame::Other { payload, .. } => payload.clone(),
        }
    }

    /// The raw payload bytes for the data-carrying variants (`Text`,
    /// `Binary`, `Continuation`, `Ping`, `Pong`). Returns `None` for
    /// `Close`, which has its own `(code, reason)` shape — see
    /// `Frame::close_parts`.
    pub fn payload(&self) -> Option<&Bytes> {
        match self {
            Frame::Continuation { payload, .. }
            | Frame::Text { payload, .. }
            | Frame::Binary { payload, .. }
            | Frame::Ping { payload, .. }
            | Frame::Pong { payload, .. }
            | Frame::Other { payload, .. } => Some(payload),
            Frame::Close { .. } => None,
        }
    }

    /// `(code, reason)` for a `Close` frame, where `code` is absent
    /// iff the frame carried an empty payload.
    pub fn close_parts(&self) -> Option<(Option<u16>, &str)> {
        match self {
            Frame::Close { code, reason, .. } => Some((*code, reason.as_str())),
            _ => None,
        }
    }

    pub fn text(payload: impl Into<Bytes>, fin: bool, mask: Option<[u8; 4]>) -> Self {
        Frame::Text {
            fin,
            mask,
            payload: payload.into(),
        }
    }

    pub fn binary(payload: impl Into<Bytes>, fin: bool, mask: Option<[u8; 4]>) -> Self {
        Frame::Binary {
            fin,
            mask,
            payload: payload.into(),
        }
    }

    pub fn continuation(payload: impl Into<Bytes>, fin: bool, mask: Option<[u8; 4]>) -> Self {
        Frame::Continuation {
            fin,
            mask,
            payload: payload.into(),
        }
    }

    pub fn ping(payload: impl Into<Bytes>, mask: Option<[u8; 4]>) -> WebsocketResult<Self> {
        let payload = payload.into();
        if payload.len() > MAX_CONTROL_PAYLOAD {
            return Err(WebsocketError::protocol(
                CloseCode::PROTOCOL_ERROR,
                "ping payload exceeds 125 bytes",
            ));
        }
        Ok(Frame::Ping { mask, payload })
    }

    pub fn pong(payload: impl Into<Bytes>, mask: Option<[u8; 4]>) -> WebsocketResult<Self> {
        let payload = payload.into();
        if payload.len() > MAX_CONTROL_PAYLOAD {
            return Err(WebsocketError::protocol(
                CloseCode::PROTOCOL_ERROR,
                "pong payload exceeds 125 bytes",
            ));
        }
        Ok(Frame::Pong { mask, payload })
    }

    pub fn close(code: CloseCode, reason: Option<impl Into<String>>, mask: Option<[u8; 4]>) -> Self {
        Frame::Close {
            mask,
            code: Some(code.as_u16()),
            reason: reason.map(Into::into).unwrap_or_default(),
        }
    }

    /// A Pong carrying the same payload and a caller-supplied mask,
    /// `None` if called on anything but a `Ping`.
    pub fn reply(&self, mask: Option<[u8; 4]>) -> Option<Frame> {
        match self {
            Frame::Ping { payload, .. } => Some(Frame::Pong {
                mask,
                payload: payload.clone(),
            }),
            _ => None,
        }
    }

    /// Reads one frame from `stream`, or `Ok(None)` on a clean EOF at the
    /// 2-byte header boundary (end of stream, not an error). Any other
    /// EOF is a fatal `Io(UnexpectedEof)`.
    pub async fn read<S>(
        stream: &mut S,
        config: &ConnectionConfig,
    ) -> WebsocketResult<Option<Frame>>
    where
        S: AsyncRead + Unpin,
    {
        let mut byte0 = [0u8; 1];
        let n = stream.read(&mut byte0).await?;
        if n == 0 {
            return Ok(None);
        }

        let mut byte1 = [0u8; 1];
        read_exact(stream, &mut byte1).await?;

        let fin = byte0[0] & 0x80 != 0;
        // RSV1-3 (byte0 & 0x70) are read but ignored: extensions are out of scope.
        let opcode = Opcode::from(byte0[0]);
        let masked = byte1[0] & 0x80 != 0;
        let short_len = byte1[0] & 0x7F;

        let length: u64 = match short_len {
            0..=125 => short_len as u64,
            126 => {
                let mut buf = [0u8; 2];
                read_exact(stream, &mut buf).await?;
                u16::from_be_bytes(buf) as u64
            }
            127 => {
                let mut buf = [0u8; 8];
                read_exact(stream, &mut buf).await?;
                let len = u64::from_be_bytes(buf);
                if len & (1 << 63) != 0 {
                    return Err(WebsocketError::protocol(
                        CloseCode::PROTOCOL_ERROR,
                        "extended length has the high bit set",
                    ));
                }
                len
            }
            _ => unreachable!("payload length is a 7-bit field"),
        };

        if opcode.is_control() && (length as usize > MAX_CONTROL_PAYLOAD || !fin) {
            return Err(WebsocketError::protocol(
                CloseCode::PROTOCOL_ERROR,
                "control frames must be final and at most 125 bytes",
            ));
        }

        if let Some(max) = config.max_payload_len {
            if length > max {
                return Err(WebsocketError::protocol(
                    CloseCode::MESSAGE_TOO_BIG,
                    format!("payload length {} exceeds configured maximum {}", length, max),
                ));
            }
        }

        let mask = if masked {
            let mut key = [0u8; 4];
            read_exact(stream, &mut key).await?;
            Some(key)
        } else {
            None
        };

        let mut payload = vec![0u8; length as usize];
        read_exact(stream, &mut payload).await?;
        if payload.len() != length as usize {
            return Err(WebsocketError::protocol(
                CloseCode::PROTOCOL_ERROR,
                "short payload read",
            ));
        }

        if let Some(key) = mask {
            for (i, byte) in payload.iter_mut().enumerate() {
                *byte ^= key[i % 4];
            }
        }
        let payload = Bytes::from(payload);

        let frame = match opcode {
            Opcode::Continuation => Frame::Continuation { fin, mask, payload },
            Opcode::Text => Frame::Text { fin, mask, payload },
            Opcode::Binary => Frame::Binary { fin, mask, payload },
            Opcode::Close => {
                let (code, reason) = unpack_close(&payload)?;
                Frame::Close { mask, code, reason }
            }
            Opcode::Ping => Frame::Ping { mask, payload },
            Opcode::Pong => Frame::Pong { mask, payload },
            Opcode::Other(byte) => Frame::Other {
                opcode: byte,
                fin,
                mask,
                payload,
            },
        };

        trace!(opcode = ?frame.opcode(), len = length, fin, "read frame");
        Ok(Some(frame))
    }

    /// Writes this frame's header, mask key (if any), and payload.
    ///
    /// The masking key and XOR-masked payload are assembled into one
    /// buffer and written with a single `write_all` call, so the two
    /// never interleave with another frame's write on a shared stream.
    pub async fn write<S>(&self, stream: &mut S) -> WebsocketResult<()>
    where
        S: AsyncWrite + Unpin,
    {
        let opcode = self.opcode();
        let fin = self.fin();
        let mask = self.mask();
        let payload = self.wire_payload();

        if opcode.is_control() && payload.len() > MAX_CONTROL_PAYLOAD {
            return Err(WebsocketError::protocol(
                CloseCode::PROTOCOL_ERROR,
                "refusing to write a control frame payload over 125 bytes",
            ));
        }

        let mut header = BytesMut::with_capacity(14);
        header.put_u8((if fin { 0x80 } else { 0 }) | opcode.as_u8());

        let mask_bit = if mask.is_some() { 0x80 } else { 0 };
        let len = payload.len();
        if len <= 125 {
            header.put_u8(mask_bit | len as u8);
        } else if len <= u16::MAX as usize {
            header.put_u8(mask_bit | 126);
            header.put_u16(len as u16);
        } else {
            header.put_u8(mask_bit | 127);
            header.put_u64(len as u64);
        }
        stream.write_all(&header).await?;

        if let Some(key) = mask {
            let mut body = BytesMut::with_capacity(4 + len);
            body.put_slice(&key);
            for (i, byte) in payload.iter().enumerate() {
                body.put_u8(byte ^ key[i % 4]);
            }
            stream.write_all(&body).await?;
        } else {
            stream.write_all(&payload).await?;
        }

        trace!(?opcode, len, fin, "wrote frame");
        Ok(())
    }
}

/// Strict `read_exact`: any short read (including EOF) past the initial
/// header byte is a fatal error, never a clean end-of-stream.
async fn read_exact<S>(stream: &mut S, buf: &mut [u8]) -> WebsocketResult<()>
where
    S: AsyncRead + Unpin,
{
    stream.read_exact(buf).await.map_err(WebsocketError::Io)?;
    Ok(())
}

fn unpack_close(payload: &Bytes) -> WebsocketResult<(Option<u16>, String)> {
    match payload.len() {
        0 => Ok((None, String::new())),
        1 => Err(WebsocketError::protocol(
            CloseCode::PROTOCOL_ERROR,
            "close frame payload of length 1 cannot carry a code",
        )),
        _ => {
            let mut buf = payload.clone();
            let code = buf.get_u16();
            let reason = String::from_utf8_lossy(&buf).into_owned();
            Ok((Some(code), reason))
        }
    }
}
