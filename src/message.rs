use bytes::Bytes;

/// A fully assembled message: the concatenation of a Text/Binary frame
/// and any Continuation frames up to and including the one with `fin`.
///
/// The variant is the tag `Connection::write` dispatches on — the Rust
/// rendition of "if bytes are tagged as UTF-8, send as Text; else
/// Binary": the tag is the type, there is no runtime sniffing.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Text(String),
    Binary(Bytes),
}

impl Message {
    pub fn text(s: impl Into<String>) -> Self {
        Message::Text(s.into())
    }

    pub fn binary(bytes: impl Into<Bytes>) -> Self {
        Message::Binary(bytes.into())
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Message::Text(_))
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, Message::Binary(_))
    }
}

impl From<String> for Message {
    fn from(s: String) -> Self {
        Message::Text(s)
    }
}

impl From<Bytes> for Message {
    fn from(b: Bytes) -> Self {
        Message::Binary(b)
    }
}
