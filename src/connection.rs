use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{info, warn};

use crate::close_code::CloseCode;
use crate::error::{WebsocketError, WebsocketResult};
use crate::frame::{Frame, Opcode};
use crate::framer::Framer;
use crate::mask::{self, MaskMode};
use crate::message::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Closed,
}

/// The message-assembly layer on top of a [`Framer`].
///
/// Owns its framer exclusively: there is no spawned writer task and no
/// channel hand-off between a reader and writer half. A caller wanting
/// concurrent read/write must provide their own synchronization around
/// a `Connection`, same as the framer it wraps.
#[derive(Debug)]
pub struct Connection<S> {
    framer: Framer<S>,
    mask: Option<[u8; 4]>,
    state: State,
    /// Partial-message buffer. Invariant: if non-empty, `frames[0]` is
    /// Text or Binary, every later element is Continuation, and only
    /// the last element may have `fin == true`.
    frames: Vec<Frame>,
    strict_utf8: bool,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// An unmasked connection (the server role, typically).
    pub fn new(framer: Framer<S>) -> Self {
        Self::with_mask(framer, MaskMode::None).expect("MaskMode::None never fails to resolve")
    }

    /// A connection whose outgoing frames are masked, per `mode`. The
    /// mask, once resolved, is immutable for the connection's lifetime.
    pub fn with_mask(framer: Framer<S>, mode: MaskMode) -> WebsocketResult<Self> {
        let mask = mask::resolve(mode)?;
        let strict_utf8 = framer.config().strict_utf8;
        Ok(Self {
            framer,
            mask,
            state: State::Open,
            frames: Vec::new(),
            strict_utf8,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.state == State::Closed
    }

    fn ensure_open(&self) -> WebsocketResult<()> {
        if self.is_closed() {
            Err(WebsocketError::protocol(
                CloseCode::PROTOCOL_ERROR,
                "cannot send on a closed connection",
            ))
        } else {
            Ok(())
        }
    }

    /// Reads one frame, applies it (buffering it or acting on it
    /// depending on its opcode), and returns it to the caller for raw
    /// access. On any error, attempts `send_close` with the error's
    /// close code before
    /// re-raising (the attempt is best-effort: its own failure is
    /// suppressed). Returns `Ok(None)` on a clean end of stream, or
    /// immediately if the connection is already closed.
    pub async fn read_frame(&mut self) -> WebsocketResult<Option<Frame>> {
        if self.is_closed() {
            return Ok(None);
        }

        match self.read_and_apply().await {
            Ok(frame) => Ok(frame),
            Err(err) => {
                let code = err.close_code();
                if let Err(close_err) = self.send_close(code, err.to_string()).await {
                    warn!(error = %close_err, "failed to send close frame after read error");
                }
                Err(err)
            }
        }
    }

    async fn read_and_apply(&mut self) -> WebsocketResult<Option<Frame>> {
        let frame = match self.framer.read_frame().await? {
            Some(frame) => frame,
            None => return Ok(None),
        };
        self.handle_frame(frame.clone()).await?;
        Ok(Some(frame))
    }

    async fn handle_frame(&mut self, frame: Frame) -> WebsocketResult<()> {
        match frame.opcode() {
            Opcode::Continuation => self.receive_continuation(frame),
            Opcode::Text => self.receive_text(frame),
            Opcode::Binary => self.receive_binary(frame),
            Opcode::Close => self.receive_close(frame),
            Opcode::Ping => self.receive_ping(frame).await,
            Opcode::Pong => self.receive_pong(frame),
            Opcode::Other(_) => self.receive_frame(frame),
        }
    }

    fn receive_text(&mut self, frame: Frame) -> WebsocketResult<()> {
        self.receive_first_fragment(frame)
    }

    fn receive_binary(&mut self, frame: Frame) -> WebsocketResult<()> {
        self.receive_first_fragment(frame)
    }

    fn receive_first_fragment(&mut self, frame: Frame) -> WebsocketResult<()> {
        if !self.frames.is_empty() {
            return Err(WebsocketError::protocol(
                CloseCode::PROTOCOL_ERROR,
                "Received text/binary, but expecting continuation!",
            ));
        }
        self.frames.push(frame);
        Ok(())
    }

    fn receive_continuation(&mut self, frame: Frame) -> WebsocketResult<()> {
        if self.frames.is_empty() {
            return Err(WebsocketError::protocol(
                CloseCode::PROTOCOL_ERROR,
                "Received unexpected continuation!",
            ));
        }
        self.frames.push(frame);
        Ok(())
    }

    async fn receive_ping(&mut self, frame: Frame) -> WebsocketResult<()> {
        if self.is_closed() {
            return Err(WebsocketError::protocol(
                CloseCode::PROTOCOL_ERROR,
                "received ping on a closed connection",
            ));
        }
        let pong = frame
            .reply(self.mask)
            .expect("receive_ping is only reached for Ping frames");
        self.framer.write_frame(&pong).await?;
        self.framer.flush().await
    }

    fn receive_pong(&mut self, _frame: Frame) -> WebsocketResult<()> {
        Ok(())
    }

    fn receive_close(&mut self, frame: Frame) -> WebsocketResult<()> {
        self.state = State::Closed;
        info!("connection closed by peer");
        let (code, reason) = frame.close_parts().unwrap_or((None, ""));
        match code.map(CloseCode::from) {
            Some(code) if !code.is_no_error() => {
                Err(WebsocketError::closed(code, reason.to_string()))
            }
            _ => Ok(()),
        }
    }

    fn receive_frame(&mut self, frame: Frame) -> WebsocketResult<()> {
        warn!(
            opcode = frame.opcode().as_u8(),
            len = frame.payload().map(Bytes::len).unwrap_or(0),
            "received frame with an unhandled opcode; ignoring"
        );
        Ok(())
    }

    /// The canonical message read loop: flushes any pending writes, then
    /// reads frames (applying each one) until a final frame completes a
    /// message, then concatenates the buffered fragments and returns
    /// them as one [`Message`]. Returns `Ok(None)` on end of stream or
    /// once the connection has closed.
    pub async fn read(&mut self) -> WebsocketResult<Option<Message>> {
        self.framer.flush().await?;

        loop {
            let frame = match self.read_frame().await? {
                Some(frame) => frame,
                None => return Ok(None),
            };

            if frame.is_control() {
                continue;
            }

            if frame.fin() {
                break;
            }
        }

        let message = self.assemble_message()?;
        self.frames.clear();
        Ok(Some(message))
    }

    fn assemble_message(&self) -> WebsocketResult<Message> {
        let first = self
            .frames
            .first()
            .expect("read() only assembles after a non-empty fragment sequence");
        let is_text = first.opcode().is_text();

        let mut buf = BytesMut::new();
        for frame in &self.frames {
            if let Some(payload) = frame.payload() {
                buf.put_slice(payload);
            }
        }
        let bytes = buf.freeze();

        if is_text {
            let text = if self.strict_utf8 {
                String::from_utf8(bytes.to_vec()).map_err(|_| {
                    WebsocketError::protocol(
                        CloseCode::INVALID_FRAME_PAYLOAD_DATA,
                        "text message is not valid UTF-8",
                    )
                })?
            } else {
                String::from_utf8_lossy(&bytes).into_owned()
            };
            Ok(Message::Text(text))
        } else {
            Ok(Message::Binary(bytes))
        }
    }

    /// Dispatches on `message`'s variant — the only place text/binary
    /// selection on send is automatic.
    pub async fn write(&mut self, message: Message) -> WebsocketResult<()> {
        self.ensure_open()?;
        let frame = match message {
            Message::Text(text) => Frame::text(Bytes::from(text), true, self.mask),
            Message::Binary(bytes) => Frame::binary(bytes, true, self.mask),
        };
        self.write_frame(&frame).await
    }

    pub async fn send_text(&mut self, text: impl Into<String>) -> WebsocketResult<()> {
        self.ensure_open()?;
        let frame = Frame::text(Bytes::from(text.into()), true, self.mask);
        self.write_frame(&frame).await
    }

    pub async fn send_binary(&mut self, payload: impl Into<Bytes>) -> WebsocketResult<()> {
        self.ensure_open()?;
        let frame = Frame::binary(payload.into(), true, self.mask);
        self.write_frame(&frame).await
    }

    pub async fn send_ping(&mut self, payload: impl Into<Bytes>) -> WebsocketResult<()> {
        self.ensure_open()?;
        let frame = Frame::ping(payload, self.mask)?;
        self.write_frame(&frame).await
    }

    /// Idempotent-safe: a no-op if the connection is already closed, so
    /// it's safe to call from error paths without double-closing.
    pub async fn send_close(
        &mut self,
        code: CloseCode,
        reason: impl Into<String>,
    ) -> WebsocketResult<()> {
        if self.is_closed() {
            return Ok(());
        }
        let frame = Frame::close(code, Some(reason.into()), self.mask);
        self.framer.write_frame(&frame).await?;
        self.framer.flush().await?;
        self.state = State::Closed;
        info!("connection closed locally");
        Ok(())
    }

    /// Sends a close (if not already closed) and shuts down the framer.
    pub async fn close(&mut self) -> WebsocketResult<()> {
        self.send_close(CloseCode::NO_ERROR, String::new()).await?;
        self.framer.close().await
    }

    /// `write_frame` is the raw escape hatch: it still enforces the
    /// closed-state invariant (any send after close is a `ProtocolError`)
    /// but performs no message-assembly bookkeeping.
    pub async fn write_frame(&mut self, frame: &Frame) -> WebsocketResult<()> {
        self.ensure_open()?;
        self.framer.write_frame(frame).await?;
        self.framer.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use std::io::Cursor;

    fn connection(bytes: Vec<u8>) -> Connection<Cursor<Vec<u8>>> {
        Connection::new(Framer::new(Cursor::new(bytes)))
    }

    #[tokio::test]
    async fn fragmented_message_reassembles_in_order() {
        let mut wire = Vec::new();
        Frame::text(&b"Hel"[..], false, None)
            .write(&mut wire)
            .await
            .unwrap();
        Frame::continuation(&b"lo "[..], false, None)
            .write(&mut wire)
            .await
            .unwrap();
        Frame::continuation(&b"World"[..], true, None)
            .write(&mut wire)
            .await
            .unwrap();

        let mut conn = connection(wire);
        let message = conn.read().await.unwrap().unwrap();
        assert_eq!(message, Message::Text("Hello World".to_string()));
    }

    #[tokio::test]
    async fn continuation_with_empty_buffer_is_a_protocol_error_and_closes() {
        let mut wire = Vec::new();
        Frame::continuation(&b"oops"[..], true, None)
            .write(&mut wire)
            .await
            .unwrap();

        let mut conn = connection(wire);
        let result = conn.read().await;
        assert!(matches!(result, Err(WebsocketError::Protocol { .. })));
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn text_with_non_empty_buffer_is_a_protocol_error() {
        let mut wire = Vec::new();
        Frame::text(&b"first"[..], false, None)
            .write(&mut wire)
            .await
            .unwrap();
        Frame::text(&b"second"[..], true, None)
            .write(&mut wire)
            .await
            .unwrap();

        let mut conn = connection(wire);
        let result = conn.read().await;
        assert!(matches!(result, Err(WebsocketError::Protocol { .. })));
    }

    #[tokio::test]
    async fn ping_triggers_a_synchronous_pong_reply() {
        let duplex_payload = b"hello".to_vec();
        let ping = Frame::ping(duplex_payload.clone(), None).unwrap();
        let mut wire = Vec::new();
        ping.write(&mut wire).await.unwrap();

        let (mut client, server) = tokio::io::duplex(256);
        tokio::spawn(async move {
            let mut conn = Connection::new(Framer::new(server));
            // Block on a read so the ping gets applied and the pong written.
            let _ = conn.read_frame().await;
            // keep the connection (and its framer) alive until the pong has
            // been observed by the test
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        });

        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        client.write_all(&wire).await.unwrap();

        let mut response = vec![0u8; 2 + duplex_payload.len()];
        client.read_exact(&mut response).await.unwrap();
        assert_eq!(response[0], 0x8A); // FIN + Pong opcode
        assert_eq!(&response[2..], duplex_payload.as_slice());
    }

    #[tokio::test]
    async fn close_idempotence_sends_at_most_one_close_frame() {
        let (mut client, server) = tokio::io::duplex(256);
        let mut conn = Connection::new(Framer::new(server));

        conn.close().await.unwrap();
        conn.close().await.unwrap();
        assert!(conn.is_closed());

        use tokio::io::AsyncReadExt;
        let mut buf = vec![0u8; 2];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf[0], 0x88); // FIN + Close opcode, exactly one frame's header

        // No second close frame should follow: either the read times out
        // (no more data queued) or it returns Ok(0) because `close()`
        // shut down the peer's write half.
        let mut probe = [0u8; 1];
        let result = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            client.read(&mut probe),
        )
        .await;
        match result {
            Err(_) => {}
            Ok(Ok(0)) => {}
            other => panic!("expected no further bytes after idempotent close, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn send_ping_and_send_close_fail_once_closed() {
        let (_client, server) = tokio::io::duplex(256);
        let mut conn = Connection::new(Framer::new(server));
        conn.close().await.unwrap();

        assert!(matches!(
            conn.send_ping(&b"p"[..]).await,
            Err(WebsocketError::Protocol { .. })
        ));
    }

    #[tokio::test]
    async fn read_returns_none_after_close() {
        let (_client, server) = tokio::io::duplex(256);
        let mut conn = Connection::new(Framer::new(server));
        conn.close().await.unwrap();
        assert!(conn.read().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn receive_close_with_no_error_code_does_not_raise() {
        let mut wire = Vec::new();
        Frame::close(CloseCode::NO_ERROR, Some("bye"), None)
            .write(&mut wire)
            .await
            .unwrap();

        let mut conn = connection(wire);
        let result = conn.read_frame().await;
        assert!(result.is_ok());
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn receive_close_with_error_code_raises_closed_error() {
        let mut wire = Vec::new();
        Frame::close(CloseCode::PROTOCOL_ERROR, Some("bad juju"), None)
            .write(&mut wire)
            .await
            .unwrap();

        let mut conn = connection(wire);
        let result = conn.read_frame().await;
        assert!(matches!(result, Err(WebsocketError::Closed { .. })));
    }

    #[tokio::test]
    async fn strict_utf8_rejects_invalid_text_message() {
        let invalid_utf8 = vec![0xFF, 0xFE, 0xFD];
        let mut wire = Vec::new();
        Frame::text(invalid_utf8, true, None)
            .write(&mut wire)
            .await
            .unwrap();

        let framer = Framer::with_config(
            Cursor::new(wire),
            ConnectionConfig::default().with_strict_utf8(true),
        );
        let mut conn = Connection::new(framer);
        let result = conn.read().await;
        assert!(matches!(result, Err(WebsocketError::Protocol { .. })));
    }

    #[tokio::test]
    async fn lenient_mode_lossily_decodes_invalid_text_message() {
        let invalid_utf8 = vec![0xFF, 0xFE];
        let mut wire = Vec::new();
        Frame::text(invalid_utf8, true, None)
            .write(&mut wire)
            .await
            .unwrap();

        let mut conn = connection(wire);
        let message = conn.read().await.unwrap().unwrap();
        assert!(matches!(message, Message::Text(_)));
    }

    #[tokio::test]
    async fn reserved_opcode_is_logged_and_leaves_connection_untouched() {
        // FIN + reserved non-control opcode 0x3, no mask, empty payload.
        let wire = vec![0x83u8, 0x00];
        let mut conn = connection(wire);

        let frame = conn.read_frame().await.unwrap().unwrap();
        assert!(matches!(frame.opcode(), Opcode::Other(0x3)));
        assert!(!conn.is_closed());
        assert!(conn.frames.is_empty());
    }

    #[tokio::test]
    async fn reserved_control_opcode_is_logged_and_leaves_connection_untouched() {
        // FIN + reserved control opcode 0xB, no mask, empty payload.
        let wire = vec![0x8Bu8, 0x00];
        let mut conn = connection(wire);

        let frame = conn.read_frame().await.unwrap().unwrap();
        assert!(matches!(frame.opcode(), Opcode::Other(0xB)));
        assert!(!conn.is_closed());
        assert!(conn.frames.is_empty());
    }
}
