//! The HTTP/1.1 → WebSocket upgrade handshake (RFC 6455 ยง1.3).
//!
//! Grounded on `proxmox-http`'s `websocket::WebSocket::new`: validate `Upgrade: websocket` and
//! `Sec-WebSocket-Version: 13`, then derive `Sec-WebSocket-Accept` from the client's
//! `Sec-WebSocket-Key` and the RFC 6455 magic GUID.
use base64::Engine;
use headers::HeaderMapExt;
use http::{HeaderMap, HeaderValue, Request, Response, StatusCode};
use sha1::{Digest, Sha1};
use thiserror::Error;

use crate::{body::Body, upgrade::Upgrade, Connection};

use super::{run, WebSocketHandler, DEFAULT_MAX_MESSAGE_SIZE};

pub const MAGIC_WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("missing or invalid Upgrade header")]
    NotAnUpgrade,
    #[error("unsupported Sec-WebSocket-Version (only 13 is supported)")]
    UnsupportedVersion,
    #[error("missing Sec-WebSocket-Key header")]
    MissingKey,
}

impl HandshakeError {
    pub fn status(&self) -> StatusCode {
        match self {
            HandshakeError::NotAnUpgrade => StatusCode::BAD_REQUEST,
            HandshakeError::UnsupportedVersion => StatusCode::UPGRADE_REQUIRED,
            HandshakeError::MissingKey => StatusCode::BAD_REQUEST,
        }
    }
}

/// Derives the `Sec-WebSocket-Accept` value for a client's `Sec-WebSocket-Key`.
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(MAGIC_WEBSOCKET_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// Validates that `headers` describes a well-formed WebSocket upgrade request and returns the
/// derived `Sec-WebSocket-Accept` header value.
pub fn validate(headers: &HeaderMap) -> Result<HeaderValue, HandshakeError> {
    if headers.typed_get::<headers::Upgrade>().is_none() {
        return Err(HandshakeError::NotAnUpgrade);
    }

    let version_ok = headers
        .get("sec-websocket-version")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim() == "13")
        .unwrap_or(false);

    if !version_ok {
        return Err(HandshakeError::UnsupportedVersion);
    }

    let client_key = headers
        .get("sec-websocket-key")
        .and_then(|v| v.to_str().ok())
        .ok_or(HandshakeError::MissingKey)?;

    accept_key(client_key)
        .parse()
        .map_err(|_| HandshakeError::MissingKey)
}

/// Validates `req` as a WebSocket upgrade request and, if well-formed, builds the
/// `101 Switching Protocols` response that accepts it. The returned response carries an
/// [`crate::upgrade::Upgrade`] extension that hands the connection to [`super::run`] with
/// `handler` once the server writes the response and transfers the socket.
pub fn respond<H>(req: &Request<Body>, handler: H) -> Result<Response<Body>, HandshakeError>
where
    H: WebSocketHandler + 'static,
{
    let accept = validate(req.headers())?;

    let res = Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(http::header::UPGRADE, "websocket")
        .header(http::header::CONNECTION, "Upgrade")
        .header("sec-websocket-accept", accept)
        .body(Body::empty())
        .unwrap();

    Ok(res.upgrade(move |conn: Connection| run(conn, DEFAULT_MAX_MESSAGE_SIZE, handler)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_the_accept_key_from_the_rfc_6455_example() {
        // https://datatracker.ietf.org/doc/html/rfc6455#section-1.3
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn rejects_requests_missing_the_upgrade_header() {
        let (parts, _) = http::Request::builder()
            .header("sec-websocket-version", "13")
            .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
            .body(())
            .unwrap()
            .into_parts();

        assert!(matches!(validate(&parts.headers), Err(HandshakeError::NotAnUpgrade)));
    }

    #[test]
    fn rejects_unsupported_versions() {
        let (parts, _) = http::Request::builder()
            .header("upgrade", "websocket")
            .header("sec-websocket-version", "8")
            .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
            .body(())
            .unwrap()
            .into_parts();

        assert!(matches!(
            validate(&parts.headers),
            Err(HandshakeError::UnsupportedVersion)
        ));
    }

    #[test]
    fn accepts_a_well_formed_upgrade_request() {
        let (parts, _) = http::Request::builder()
            .header("upgrade", "websocket")
            .header("sec-websocket-version", "13")
            .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
            .body(())
            .unwrap()
            .into_parts();

        let accept = validate(&parts.headers).unwrap();
        assert_eq!(accept.to_str().unwrap(), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    struct NoopHandler;

    impl WebSocketHandler for NoopHandler {
        fn on_text(&mut self, _sender: &super::super::WebSocketSender, _text: String) {}
        fn on_binary(&mut self, _sender: &super::super::WebSocketSender, _data: Vec<u8>) {}
    }

    #[test]
    fn respond_builds_the_switching_protocols_response() {
        let req = Request::builder()
            .header("upgrade", "websocket")
            .header("sec-websocket-version", "13")
            .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
            .body(Body::empty())
            .unwrap();

        let res = respond(&req, NoopHandler).unwrap();

        assert_eq!(res.status(), StatusCode::SWITCHING_PROTOCOLS);
        assert_eq!(
            res.headers().get("sec-websocket-accept").unwrap(),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn respond_rejects_a_non_upgrade_request() {
        let req = Request::builder().body(Body::empty()).unwrap();

        assert!(matches!(
            respond(&req, NoopHandler),
            Err(HandshakeError::NotAnUpgrade)
        ));
    }
}
