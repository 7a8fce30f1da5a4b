use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::config::ConnectionConfig;
use crate::error::WebsocketResult;
use crate::frame::Frame;

/// Thin adapter between a byte stream and a sequence of [`Frame`]s.
///
/// Owns the stream exclusively; a `Connection` owns exactly one
/// `Framer`. All the actual bit-twiddling lives on `Frame::read` /
/// `Frame::write` — the framer's job is just to hold the stream and the
/// config those need.
#[derive(Debug)]
pub struct Framer<S> {
    stream: S,
    config: ConnectionConfig,
}

impl<S> Framer<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self::with_config(stream, ConnectionConfig::default())
    }

    pub fn with_config(stream: S, config: ConnectionConfig) -> Self {
        Self { stream, config }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Reads one frame, or `None` on a clean end of stream.
    pub async fn read_frame(&mut self) -> WebsocketResult<Option<Frame>> {
        Frame::read(&mut self.stream, &self.config).await
    }

    pub async fn write_frame(&mut self, frame: &Frame) -> WebsocketResult<()> {
        frame.write(&mut self.stream).await
    }

    pub async fn flush(&mut self) -> WebsocketResult<()> {
        self.stream.flush().await?;
        Ok(())
    }

    /// Shuts down the write half so the peer observes a clean transport
    /// close once the final Close frame has been flushed.
    pub async fn close(&mut self) -> WebsocketResult<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use std::io::Cursor;

    #[tokio::test]
    async fn write_then_read_round_trips_through_the_framer() {
        let mut framer = Framer::new(Cursor::new(Vec::<u8>::new()));
        framer
            .write_frame(&Frame::text(&b"hi"[..], true, None))
            .await
            .unwrap();
        framer.flush().await.unwrap();

        // Rewind the cursor to read back what was just written.
        framer.stream.set_position(0);
        let frame = framer.read_frame().await.unwrap().unwrap();
        assert_eq!(frame.payload().unwrap().as_ref(), b"hi");
    }

    #[tokio::test]
    async fn read_frame_returns_none_on_clean_eof() {
        let mut framer = Framer::new(Cursor::new(Vec::<u8>::new()));
        assert!(framer.read_frame().await.unwrap().is_none());
    }
}
