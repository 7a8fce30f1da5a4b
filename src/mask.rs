use crate::error::{WebsocketError, WebsocketResult};
use std::io;

/// How a connection's outgoing mask is established.
///
/// The core uses a single per-connection key rather than a fresh key per
/// frame; the RFC permits either, and a fixed key avoids re-rolling the
/// RNG on every outgoing frame.
#[derive(Debug, Clone, Copy)]
pub enum MaskMode {
    /// Do not mask outgoing frames (the server role, typically).
    None,
    /// Mask outgoing frames with this literal key.
    Key([u8; 4]),
    /// Mask outgoing frames with a key drawn from a cryptographic RNG at
    /// construction time.
    Generate,
}

/// Materializes a `MaskMode` into the optional 4-byte key a `Connection`
/// actually stores.
pub(crate) fn resolve(mode: MaskMode) -> WebsocketResult<Option<[u8; 4]>> {
    match mode {
        MaskMode::None => Ok(None),
        MaskMode::Key(key) => Ok(Some(key)),
        MaskMode::Generate => Ok(Some(generate()?)),
    }
}

fn generate() -> WebsocketResult<[u8; 4]> {
    let mut key = [0u8; 4];
    getrandom::fill(&mut key).map_err(|err| {
        WebsocketError::Io(io::Error::new(io::ErrorKind::Other, err))
    })?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_resolves_to_no_mask() {
        assert_eq!(resolve(MaskMode::None).unwrap(), None);
    }

    #[test]
    fn key_resolves_to_the_literal_key() {
        let key = [1, 2, 3, 4];
        assert_eq!(resolve(MaskMode::Key(key)).unwrap(), Some(key));
    }

    #[test]
    fn generate_produces_some_key() {
        assert!(resolve(MaskMode::Generate).unwrap().is_some());
    }
}
