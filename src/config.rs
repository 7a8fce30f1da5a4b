/// Implementer-facing knobs the wire protocol itself leaves open.
/// Neither field changes the wire format or the state machine's
/// transitions; both default to the more lenient behavior.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Validate UTF-8 on completed Text messages. When `false` (the
    /// default), invalid bytes are lossily decoded instead of rejected.
    pub strict_utf8: bool,
    /// Reject, before reading the payload, any frame whose declared
    /// length exceeds this many bytes. `None` means unbounded, matching
    /// the wire format's "MUST accept any conforming peer framing".
    pub max_payload_len: Option<u64>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            strict_utf8: false,
            max_payload_len: None,
        }
    }
}

impl ConnectionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_strict_utf8(mut self, strict: bool) -> Self {
        self.strict_utf8 = strict;
        self
    }

    pub fn with_max_payload_len(mut self, max: u64) -> Self {
        self.max_payload_len = Some(max);
        self
    }
}
