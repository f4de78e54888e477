//! WebSocket opening handshake (RFC 6455 §4.2).

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha1::{Digest, Sha1};
use thiserror::Error;

use crate::request::RequestHead;

/// Fixed GUID appended to the client key before hashing.
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Sent when a request on the WebSocket port is not a valid upgrade.
pub const BAD_REQUEST: &[u8] =
    b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    #[error("request is not a WebSocket upgrade")]
    NotUpgrade,

    #[error("missing Sec-WebSocket-Key header")]
    MissingKey,
}

/// Compute the `Sec-WebSocket-Accept` value for a client key.
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.trim().as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Validate an upgrade request and return the client's key.
pub fn validate(head: &RequestHead) -> Result<&str, HandshakeError> {
    if !head.has_token("upgrade", "websocket") || !head.has_token("connection", "upgrade") {
        return Err(HandshakeError::NotUpgrade);
    }
    head.header("sec-websocket-key")
        .filter(|key| !key.is_empty())
        .ok_or(HandshakeError::MissingKey)
}

/// The `101 Switching Protocols` response for a validated key.
pub fn switching_protocols(key: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        accept_key(key)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_rfc_sample_key() {
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_validate_upgrade() {
        let head = RequestHead::parse(
            b"GET / HTTP/1.1\r\nUpgrade: WebSocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n",
        )
        .unwrap();
        assert_eq!(validate(&head).unwrap(), "dGhlIHNhbXBsZSBub25jZQ==");

        let response = switching_protocols("dGhlIHNhbXBsZSBub25jZQ==");
        assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(response.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
        assert!(response.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_validate_rejects_plain_get() {
        let head = RequestHead::parse(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
        assert_eq!(validate(&head), Err(HandshakeError::NotUpgrade));

        let keyless = RequestHead::parse(
            b"GET / HTTP/1.1\r\nUpgrade: websocket\r\nConnection: keep-alive, Upgrade\r\n\r\n",
        )
        .unwrap();
        assert_eq!(validate(&keyless), Err(HandshakeError::MissingKey));
    }

    #[test]
    fn test_validate_requires_connection_upgrade() {
        let head = RequestHead::parse(
            b"GET / HTTP/1.1\r\nUpgrade: websocket\r\nConnection: keep-alive\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n",
        )
        .unwrap();
        assert_eq!(validate(&head), Err(HandshakeError::NotUpgrade));
    }

    proptest! {
        #[test]
        fn prop_accept_key_matches_formula(raw in proptest::collection::vec(any::<u8>(), 16)) {
            let key = STANDARD.encode(&raw);
            let mut concatenated = key.clone().into_bytes();
            concatenated.extend_from_slice(WEBSOCKET_GUID.as_bytes());
            let expected = STANDARD.encode(Sha1::digest(&concatenated));

            let accept = accept_key(&key);
            prop_assert_eq!(&accept, &expected);
            prop_assert_eq!(STANDARD.decode(&accept).unwrap().len(), 20);
        }
    }
}
