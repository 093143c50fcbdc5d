use std::io::{self, BufRead, Read};
use std::path::PathBuf;

use headers::HeaderMapExt;
use http::{Method, Request, StatusCode, Version};
use thiserror::Error;

use crate::{body::Body, post_spool};

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("connection closed")]
    ConnectionClosed,
    #[error("io error")]
    Io(#[from] io::Error),
    #[error("invalid request")]
    Invalid(#[from] httparse::Error),
    #[error("incomplete request")]
    IncompleteRequest,
    #[error("unsupported http version: {0}")]
    UnsupportedHttpVersion(u8),
    #[error("invalid Transfer-Encoding header")]
    InvalidTransferEncoding,
    #[error("invalid header")]
    InvalidHeader(#[from] headers::Error),
    #[error("invalid chunk size")]
    InvalidChunkSize,
    #[error("request headers larger than {0} bytes")]
    HeadersTooLarge(usize),
    #[error("request body larger than {0} bytes")]
    PayloadTooLarge(u64),
    #[error("a request body requires either Content-Length or Transfer-Encoding: chunked")]
    LengthRequired,
    #[error("request uri larger than {0} bytes")]
    UriTooLong(usize),
    #[error("failed to parse http request")]
    Unknown,
}

impl ParseError {
    /// The status code a well-behaved server should answer with before closing the connection.
    pub(crate) fn status(&self) -> StatusCode {
        match self {
            ParseError::HeadersTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ParseError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ParseError::LengthRequired => StatusCode::LENGTH_REQUIRED,
            ParseError::UriTooLong(_) => StatusCode::URI_TOO_LONG,
            ParseError::UnsupportedHttpVersion(_) => StatusCode::HTTP_VERSION_NOT_SUPPORTED,
            ParseError::ConnectionClosed => StatusCode::BAD_REQUEST,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

/// Request-parsing limits, mirroring [`crate::server::ServerOptions`] so `request.rs` doesn't
/// need to depend on the `server` feature to enforce them.
pub(crate) struct RequestLimits {
    pub max_header_bytes: usize,
    pub max_post_bytes: u64,
    pub max_uri_bytes: usize,
    pub file_upload_threshold: u64,
    pub temp_dir: PathBuf,
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            max_header_bytes: 256 * 1024,
            max_post_bytes: 1024 * 1024 * 1024,
            max_uri_bytes: 8 * 1024,
            file_upload_threshold: 1024 * 1024,
            temp_dir: std::env::temp_dir(),
        }
    }
}

pub(crate) fn parse_request(
    stream: impl BufRead + 'static,
) -> Result<Request<Body>, ParseError> {
    parse_request_bounded(stream, &RequestLimits::default())
}

pub(crate) fn parse_request_bounded(
    mut stream: impl BufRead + 'static,
    limits: &RequestLimits,
) -> Result<Request<Body>, ParseError> {
    let mut buf = Vec::with_capacity(800);

    loop {
        let read = match stream.read_until(b'\n', &mut buf) {
            Ok(read) => read,
            // An idle-timeout expiry surfaces as WouldBlock/TimedOut; treat it exactly like a
            // clean EOF so the server closes the connection silently instead of answering it.
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                return Err(ParseError::ConnectionClosed);
            }
            Err(err) => return Err(ParseError::Io(err)),
        };

        if read == 0 {
            break;
        }

        if buf.len() > limits.max_header_bytes {
            return Err(ParseError::HeadersTooLarge(limits.max_header_bytes));
        }

        match buf.as_slice() {
            [.., b'\r', b'\n', b'\r', b'\n'] => break,
            [.., b'\n', b'\n'] => break,
            _ => continue,
        }
    }

    if buf.is_empty() {
        return Err(ParseError::ConnectionClosed);
    }

    let mut headers = [httparse::EMPTY_HEADER; 64];
    let mut req = httparse::Request::new(&mut headers);
    req.parse(&buf)?;

    let method = req
        .method
        .map(|method| method.as_bytes())
        .ok_or(ParseError::IncompleteRequest)?;

    let path = req.path.ok_or(ParseError::IncompleteRequest)?;

    if path.len() > limits.max_uri_bytes {
        return Err(ParseError::UriTooLong(limits.max_uri_bytes));
    }

    let version = match req.version.ok_or(ParseError::IncompleteRequest)? {
        0 => Version::HTTP_10,
        1 => Version::HTTP_11,
        version => return Err(ParseError::UnsupportedHttpVersion(version)),
    };

    let method = Method::from_bytes(method).map_err(|_| ParseError::IncompleteRequest)?;

    let request = Request::builder().method(method.clone()).uri(path).version(version);

    let request = headers
        .into_iter()
        .take_while(|header| *header != httparse::EMPTY_HEADER)
        .map(|header| (header.name, header.value))
        .fold(request, |req, (name, value)| req.header(name, value));

    let headers = request.headers_ref().ok_or(ParseError::Unknown)?;

    let body = if let Some(encoding) = headers.typed_try_get::<headers::TransferEncoding>()? {
        if !encoding.is_chunked() {
            // https://datatracker.ietf.org/doc/html/rfc2616#section-3.6
            return Err(ParseError::InvalidTransferEncoding);
        }
        Body::from_iter(ChunkedReader(Box::new(stream)))
    } else if let Some(len) = headers.typed_try_get::<headers::ContentLength>()? {
        if len.0 > limits.max_post_bytes {
            return Err(ParseError::PayloadTooLarge(limits.max_post_bytes));
        }

        if len.0 >= limits.file_upload_threshold {
            post_spool::spool_to_tempfile(stream, len.0, &limits.temp_dir)?
        } else if len.0 < 1024 {
            // Let's automatically buffer small bodies
            let mut buf = vec![0_u8; len.0 as usize];
            stream.read_exact(&mut buf)?;
            Body::from(buf)
        } else {
            Body::from_reader(stream, len.0 as usize)
        }
    } else if matches!(method, Method::POST | Method::PUT | Method::PATCH) {
        return Err(ParseError::LengthRequired);
    } else {
        Body::empty()
    };

    request.body(body).map_err(|_| ParseError::Unknown)
}

pub(crate) struct ChunkedReader(pub(crate) Box<dyn BufRead>);

impl Iterator for ChunkedReader {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut buf = Vec::new();

        loop {
            if self.0.read_until(b'\n', &mut buf).ok()? == 0 {
                return None;
            }

            match httparse::parse_chunk_size(&buf) {
                Ok(httparse::Status::Complete((_pos, size))) if size == 0 => {
                    return None;
                }
                Ok(httparse::Status::Complete((_pos, size))) => {
                    let mut chunk = vec![0_u8; size as usize];
                    self.0.read_exact(&mut chunk).ok()?;
                    self.0.read_until(b'\n', &mut buf).ok()?;
                    return Some(chunk);
                }
                Ok(httparse::Status::Partial) => continue,
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod test {
    use crate::body::HttpBody;

    use super::*;

    #[test]
    fn parse_request_without_body() {
        let req = "GET /lolwut HTTP/1.1\r\nHost: lol.com\r\n\r\n";
        let req = std::io::Cursor::new(req);

        let req = parse_request(req).unwrap();

        assert_eq!(Version::HTTP_11, req.version());
        assert_eq!("/lolwut", req.uri().path());
        assert_eq!(
            Some("lol.com"),
            req.headers()
                .get(http::header::HOST)
                .and_then(|v| v.to_str().ok())
        );
    }

    #[test]
    fn parse_request_with_content_length_body() {
        let req = "POST /lol HTTP/1.1\r\nHost: lol.com\r\nContent-Length: 6\r\n\r\nlolwut ignored";
        let req = std::io::Cursor::new(req);

        let req = parse_request(req).unwrap();

        assert_eq!(req.into_body().into_bytes().unwrap(), b"lolwut");
    }

    #[test]
    fn parse_request_with_chunked_body() {
        let req = "POST /lol HTTP/1.1\r\nHost: lol.com\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nlol\r\n3\r\nwut\r\n0\r\n\r\n";
        let req = std::io::Cursor::new(req);

        let req = parse_request(req).unwrap();

        assert_eq!(req.into_body().into_bytes().unwrap(), b"lolwut");
    }

    #[test]
    fn parse_request_with_chunked_body_and_extensions() {
        let req = "POST /lol HTTP/1.1\r\nHost: lol.com\r\nTransfer-Encoding: chunked\r\n\r\n3;extension\r\nlol\r\n3\r\nwut\r\n0\r\n\r\n";
        let req = std::io::Cursor::new(req);

        let req = parse_request(req).unwrap();

        assert_eq!(req.into_body().into_bytes().unwrap(), b"lolwut");
    }

    #[test]
    fn parse_request_with_streaming_body() {
        let req = b"POST /lol HTTP/1.1\r\nHost: lol.com\r\nContent-Length: 2048\r\n\r\n";
        let body = [65_u8; 2048];
        let req = std::io::Cursor::new([req.as_ref(), body.as_ref()].concat());

        let req = parse_request(req).unwrap();

        assert_eq!(req.into_body().into_bytes().unwrap(), body);
    }

    #[test]
    fn fails_to_parse_incomplete_request() {
        let req = std::io::Cursor::new("POST /lol");

        assert!(matches!(
            parse_request(req),
            Err(ParseError::IncompleteRequest)
        ));
    }

    #[test]
    fn rejects_post_without_a_declared_length() {
        let req = "POST /lol HTTP/1.1\r\nHost: lol.com\r\n\r\n";
        let req = std::io::Cursor::new(req);

        assert!(matches!(parse_request(req), Err(ParseError::LengthRequired)));
    }

    #[test]
    fn rejects_headers_larger_than_the_configured_limit() {
        let mut req = "GET /lol HTTP/1.1\r\nHost: lol.com\r\n".to_string();
        req.push_str(&format!("X-Padding: {}\r\n\r\n", "a".repeat(100)));
        let req = std::io::Cursor::new(req);

        let limits = RequestLimits {
            max_header_bytes: 64,
            ..RequestLimits::default()
        };

        assert!(matches!(
            parse_request_bounded(req, &limits),
            Err(ParseError::HeadersTooLarge(64))
        ));
    }

    #[test]
    fn rejects_a_request_uri_longer_than_the_configured_limit() {
        let path = format!("/{}", "a".repeat(100));
        let req = format!("GET {path} HTTP/1.1\r\nHost: lol.com\r\n\r\n");
        let req = std::io::Cursor::new(req);

        let limits = RequestLimits {
            max_uri_bytes: 64,
            ..RequestLimits::default()
        };

        assert!(matches!(
            parse_request_bounded(req, &limits),
            Err(ParseError::UriTooLong(64))
        ));
    }

    #[test]
    fn spools_bodies_at_or_above_the_file_upload_threshold() {
        let body = vec![b'x'; 64];
        let req = format!(
            "POST /lol HTTP/1.1\r\nHost: lol.com\r\nContent-Length: {}\r\n\r\n",
            body.len()
        );
        let req = std::io::Cursor::new([req.into_bytes(), body.clone()].concat());

        let limits = RequestLimits {
            file_upload_threshold: 32,
            ..RequestLimits::default()
        };

        let req = parse_request_bounded(req, &limits).unwrap();
        assert_eq!(req.into_body().into_bytes().unwrap(), body);
    }
}
