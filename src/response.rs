use std::io::{self, Read, Write};

use flate2::{read::GzEncoder, Compression};
use headers::{HeaderMap, HeaderMapExt};
use http::{response::Parts, Version};

use crate::{body::Chunk, gzip, upgrade::UpgradeExtension, Body, HttpBody};

#[derive(PartialEq, Eq)]
pub(crate) enum Encoding {
    FixedLength(u64),
    Chunked,
    CloseDelimited,
}

pub(crate) enum Outcome {
    Close,
    KeepAlive,
    Upgrade(UpgradeExtension),
}

/// Controls whether a response body is gzip-compressed before being written to the wire.
///
/// Attach one to a response with the [`Gzip`] extension trait. Absent a policy, responses are
/// sent as-is (`Never`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GzipPolicy {
    /// Always compress, regardless of what the client advertised.
    Always,
    /// Never compress.
    #[default]
    Never,
    /// Compress only when the client sent `Accept-Encoding: gzip` and the response's
    /// `Content-Type` is one of the compressible MIME types (see [`gzip::is_compressible`]).
    AutoDetect,
}

/// Attaches a [`GzipPolicy`] to a response, mirroring how [`crate::upgrade::Upgrade`] attaches an
/// upgrade handler.
pub trait Gzip {
    fn gzip(self, policy: GzipPolicy) -> Self;
}

impl Gzip for http::response::Builder {
    fn gzip(self, policy: GzipPolicy) -> Self {
        self.extension(policy)
    }
}

impl<T> Gzip for http::Response<T> {
    fn gzip(mut self, policy: GzipPolicy) -> Self {
        self.extensions_mut().insert(policy);
        self
    }
}

/// Serializes a response to `stream`.
///
/// `write_body` lets callers skip writing body bytes while still computing and sending the
/// headers that describe them (used to implement `HEAD` responses). `client_accepts_gzip` is
/// only consulted when the response carries [`GzipPolicy::AutoDetect`].
pub(crate) fn write_response<B: HttpBody>(
    res: http::Response<B>,
    stream: &mut impl Write,
    write_body: bool,
    client_accepts_gzip: bool,
) -> io::Result<Outcome> {
    let (
        Parts {
            status,
            version,
            mut headers,
            mut extensions,
            ..
        },
        body,
    ) = res.into_parts();

    let gzip_policy = extensions.remove::<GzipPolicy>().unwrap_or_default();
    let content_type = headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let should_gzip = match gzip_policy {
        GzipPolicy::Always => true,
        GzipPolicy::Never => false,
        GzipPolicy::AutoDetect => client_accepts_gzip && gzip::is_compressible(&content_type),
    };

    if should_gzip {
        headers.remove(http::header::CONTENT_LENGTH);
        headers.insert(http::header::CONTENT_ENCODING, "gzip".parse().unwrap());
        headers.typed_insert(headers::TransferEncoding::chunked());

        stream.write_all(format!("{version:?} {status}\r\n").as_bytes())?;
        for (name, val) in headers.iter() {
            stream
                .write_all(&[format!("{name}: ").as_bytes(), val.as_bytes(), b"\r\n"].concat())?;
        }
        stream.write_all(b"\r\n")?;

        if write_body {
            write_gzip_chunked(body.into_reader(), stream)?;
        }

        let outcome = if let Some(upgrade) = extensions.remove::<UpgradeExtension>() {
            Outcome::Upgrade(upgrade)
        } else {
            Outcome::KeepAlive
        };
        return Ok(outcome);
    }

    let has_chunked_encoding = headers
        .typed_get::<headers::TransferEncoding>()
        .filter(|te| te.is_chunked())
        .is_some();

    let has_connection_close = headers
        .typed_get::<headers::Connection>()
        .filter(|conn| conn.contains("close"))
        .is_some();

    let content_length = headers.typed_get::<headers::ContentLength>();

    let encoding = if has_chunked_encoding && version == Version::HTTP_11 {
        Encoding::Chunked
    } else if content_length.is_some() || body.len().is_some() {
        match (content_length, body.len()) {
            (Some(len), Some(body_len)) => {
                if len.0 != body_len {
                    return Err(io::Error::new(
                        io::ErrorKind::Other,
                        "content-length doesn't match body length",
                    ));
                }
                Encoding::FixedLength(len.0)
            }
            (Some(len), None) => Encoding::FixedLength(len.0),
            (None, Some(len)) => {
                headers.typed_insert::<headers::ContentLength>(headers::ContentLength(len));
                Encoding::FixedLength(len)
            }
            (None, None) => unreachable!(),
        }
    } else if body.len().is_none() && !has_connection_close && version == Version::HTTP_11 {
        headers.typed_insert::<headers::TransferEncoding>(headers::TransferEncoding::chunked());
        Encoding::Chunked
    } else {
        if !has_connection_close {
            headers.typed_insert::<headers::Connection>(headers::Connection::close());
        }
        Encoding::CloseDelimited
    };

    if version == Version::HTTP_10 && has_chunked_encoding {
        headers.remove(http::header::TRANSFER_ENCODING);
    };

    stream.write_all(format!("{version:?} {status}\r\n").as_bytes())?;

    for (name, val) in headers.iter() {
        stream.write_all(&[format!("{name}: ").as_bytes(), val.as_bytes(), b"\r\n"].concat())?;
    }

    stream.write_all(b"\r\n")?;

    if write_body {
        match encoding {
            // Just buffer small bodies
            Encoding::FixedLength(len) if len < 1024 => {
                stream.write_all(&body.into_bytes()?)?;
            }
            Encoding::FixedLength(_) | Encoding::CloseDelimited => {
                io::copy(&mut body.into_reader(), stream)?;
            }
            Encoding::Chunked => {
                let mut trailers = HeaderMap::new();
                let mut writer = ChunkedWriter::new(stream);

                for chunk in body.into_chunks() {
                    match chunk? {
                        Chunk::Data(chunk) => writer.write_chunk(&chunk)?,
                        Chunk::Trailers(te) => trailers.extend(te),
                    }
                }

                writer.finish(&trailers)?;
            }
        };
    }

    let connection = headers.typed_get::<headers::Connection>();

    let outcome = if let Some(upgrade) = extensions.remove::<UpgradeExtension>() {
        Outcome::Upgrade(upgrade)
    } else if encoding == Encoding::CloseDelimited
        || connection.filter(|conn| conn.contains("close")).is_some()
    {
        Outcome::Close
    } else {
        Outcome::KeepAlive
    };

    Ok(outcome)
}

/// Writes a chunked-transfer-encoded body one chunk at a time: `HEX_LEN CRLF PAYLOAD CRLF` per
/// [`write_chunk`](Self::write_chunk) call, terminated by [`finish`](Self::finish)'s
/// `0 CRLF [trailers] CRLF`.
///
/// A zero-length `Data` chunk serializes to the exact same bytes as the terminator, which would
/// end the body early and strand any data written after it; `write_chunk` treats an empty slice
/// as a no-op instead of writing anything, so only `finish` can ever emit the zero-length marker.
struct ChunkedWriter<'a, W: Write> {
    stream: &'a mut W,
}

impl<'a, W: Write> ChunkedWriter<'a, W> {
    fn new(stream: &'a mut W) -> Self {
        Self { stream }
    }

    fn write_chunk(&mut self, data: &[u8]) -> io::Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        self.stream
            .write_all(format!("{:x}\r\n", data.len()).as_bytes())?;
        self.stream.write_all(data)?;
        self.stream.write_all(b"\r\n")?;
        self.stream.flush()
    }

    fn finish(self, trailers: &HeaderMap) -> io::Result<()> {
        self.stream.write_all(b"0\r\n")?;
        for (name, val) in trailers.iter() {
            self.stream
                .write_all(&[format!("{name}: ").as_bytes(), val.as_bytes(), b"\r\n"].concat())?;
        }
        self.stream.write_all(b"\r\n")
    }
}

fn write_gzip_chunked(reader: impl Read, stream: &mut impl Write) -> io::Result<()> {
    let mut encoder = GzEncoder::new(reader, Compression::default());
    let mut buf = [0_u8; 8 * 1024];

    loop {
        let read = encoder.read(&mut buf)?;
        if read == 0 {
            break;
        }
        stream.write_all(format!("{read:x}\r\n").as_bytes())?;
        stream.write_all(&buf[..read])?;
        stream.write_all(b"\r\n")?;
    }

    stream.write_all(b"0\r\n\r\n")?;
    stream.flush()
}

#[cfg(test)]
mod tests {
    use std::{io::Cursor, thread};

    use crate::{upgrade::Upgrade, Body};

    use super::*;
    use http::{Response, StatusCode};

    fn write(res: http::Response<Body>) -> (Vec<u8>, Outcome) {
        let mut output: Cursor<Vec<u8>> = Cursor::new(Vec::new());
        let outcome = write_response(res, &mut output, true, false).unwrap();
        (output.into_inner(), outcome)
    }

    #[test]
    fn writes_responses_without_bodies() {
        let res = Response::builder()
            .status(StatusCode::OK)
            .body(Body::empty())
            .unwrap();

        let (output, outcome) = write(res);

        assert_eq!(output, b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n");
        assert!(matches!(outcome, Outcome::KeepAlive));
    }

    #[test]
    fn writes_responses_with_bodies() {
        let res = Response::builder()
            .status(StatusCode::OK)
            .body(Body::from("lol"))
            .unwrap();

        let (output, outcome) = write(res);

        assert_eq!(output, b"HTTP/1.1 200 OK\r\ncontent-length: 3\r\n\r\nlol");
        assert!(matches!(outcome, Outcome::KeepAlive));
    }

    #[test]
    fn allows_to_skip_body_writing() {
        let res = Response::builder()
            .status(StatusCode::OK)
            .body(Body::from("lol"))
            .unwrap();

        let mut output: Cursor<Vec<u8>> = Cursor::new(Vec::new());
        let outcome = write_response(res, &mut output, false, false).unwrap();

        assert_eq!(
            output.get_ref(),
            b"HTTP/1.1 200 OK\r\ncontent-length: 3\r\n\r\n"
        );
        assert!(matches!(outcome, Outcome::KeepAlive));
    }

    #[test]
    fn fails_when_the_informed_content_length_does_not_match_the_body_length() {
        let res = Response::builder()
            .status(StatusCode::OK)
            .header("content-length", "5")
            .body(Body::from("lol"))
            .unwrap();

        let mut output: Cursor<Vec<u8>> = Cursor::new(Vec::new());
        assert!(write_response(res, &mut output, true, false).is_err());
    }

    #[test]
    fn writes_chunked_responses() {
        let res = Response::builder()
            .status(StatusCode::OK)
            .header("transfer-encoding", "chunked")
            .body(Body::from_iter(vec![
                b"chunk1".to_vec(),
                b"chunk2".to_vec(),
            ]))
            .unwrap();

        let (output, outcome) = write(res);

        assert_eq!(
            output,
            b"HTTP/1.1 200 OK\r\ntransfer-encoding: chunked\r\n\r\n6\r\nchunk1\r\n6\r\nchunk2\r\n0\r\n\r\n"
        );
        assert!(matches!(outcome, Outcome::KeepAlive));
    }

    #[test]
    fn chunked_writer_ignores_zero_length_data_chunks() {
        let mut output: Cursor<Vec<u8>> = Cursor::new(Vec::new());
        let mut writer = ChunkedWriter::new(&mut output);

        writer.write_chunk(b"lol").unwrap();
        writer.write_chunk(b"").unwrap();
        writer.write_chunk(b"wut").unwrap();
        writer.finish(&HeaderMap::new()).unwrap();

        assert_eq!(output.into_inner(), b"3\r\nlol\r\n3\r\nwut\r\n0\r\n\r\n");
    }

    #[test]
    fn writes_chunked_responses_with_trailers() {
        let (sender, body) = Body::channel();

        let send_thread = thread::spawn(move || {
            sender.send("lol").unwrap();
            sender.send("wut").unwrap();
            sender.send_trailer("content-length", "6").unwrap();
        });

        let res = Response::builder()
            .status(StatusCode::OK)
            .header("trailers", "content-length")
            .body(body)
            .unwrap();

        let (output, outcome) = write(res);
        send_thread.join().unwrap();

        assert_eq!(
            output,
            b"HTTP/1.1 200 OK\r\ntrailers: content-length\r\ntransfer-encoding: chunked\r\n\r\n3\r\nlol\r\n3\r\nwut\r\n0\r\ncontent-length: 6\r\n\r\n"
        );
        assert!(matches!(outcome, Outcome::KeepAlive));
    }

    #[test]
    fn writes_responses_from_reader_with_known_size() {
        let res = Response::builder()
            .status(StatusCode::OK)
            .body(Body::from_reader(Cursor::new(b"lol"), Some(3)))
            .unwrap();

        let (output, outcome) = write(res);

        assert_eq!(output, b"HTTP/1.1 200 OK\r\ncontent-length: 3\r\n\r\nlol");
        assert!(matches!(outcome, Outcome::KeepAlive));
    }

    #[test]
    fn limits_the_from_reader_response_body_size() {
        let res = Response::builder()
            .status(StatusCode::OK)
            .body(Body::from_reader(Cursor::new(b"lolwut"), Some(3)))
            .unwrap();

        let (output, outcome) = write(res);

        assert_eq!(output, b"HTTP/1.1 200 OK\r\ncontent-length: 3\r\n\r\nlol");
        assert!(matches!(outcome, Outcome::KeepAlive));
    }

    #[test]
    fn uses_chunked_transfer_when_the_reader_size_is_undefined() {
        let res = Response::builder()
            .status(StatusCode::OK)
            .body(Body::from_reader(Cursor::new(b"lolwut"), None))
            .unwrap();

        let (output, outcome) = write(res);

        assert_eq!(
            output,
            b"HTTP/1.1 200 OK\r\ntransfer-encoding: chunked\r\n\r\n6\r\nlolwut\r\n0\r\n\r\n"
        );
        assert!(matches!(outcome, Outcome::KeepAlive));
    }

    #[test]
    fn does_not_use_chunked_encoding_when_the_reader_size_is_undefined_and_connection_is_close() {
        let res = Response::builder()
            .status(StatusCode::OK)
            .header("connection", "close")
            .body(Body::from_reader(Cursor::new(b"lolwut"), None))
            .unwrap();

        let (output, outcome) = write(res);

        assert_eq!(output, b"HTTP/1.1 200 OK\r\nconnection: close\r\n\r\nlolwut");
        assert!(matches!(outcome, Outcome::Close));
    }

    #[test]
    fn supports_channel_response_bodies() {
        let (sender, body) = Body::channel();

        let send_thread = thread::spawn(move || {
            sender.send("lol").unwrap();
            sender.send("wut").unwrap();
        });

        let res = Response::builder()
            .status(StatusCode::OK)
            .header("connection", "close")
            .body(body)
            .unwrap();

        let (output, outcome) = write(res);
        send_thread.join().unwrap();

        assert_eq!(std::str::from_utf8(&output).unwrap(), "HTTP/1.1 200 OK\r\nconnection: close\r\n\r\nlolwut");
        assert!(matches!(outcome, Outcome::Close));
    }

    #[test]
    fn returns_a_close_connection_outcome_when_informed_an_explicit_close_connection_header() {
        let res = Response::builder()
            .status(StatusCode::OK)
            .header("connection", "close")
            .body(Body::empty())
            .unwrap();

        let (_, outcome) = write(res);
        assert!(matches!(outcome, Outcome::Close));
    }

    #[test]
    fn returns_a_close_keep_alive_outcome_when_no_close_connection_is_informed() {
        let res = Response::builder()
            .status(StatusCode::OK)
            .body(Body::empty())
            .unwrap();

        let (_, outcome) = write(res);
        assert!(matches!(outcome, Outcome::KeepAlive));
    }

    #[test]
    fn returns_upgrade_outcome() {
        let res = Response::builder()
            .status(StatusCode::SWITCHING_PROTOCOLS)
            .upgrade(|_| {})
            .body(Body::empty())
            .unwrap();

        let (_, outcome) = write(res);
        assert!(matches!(outcome, Outcome::Upgrade(_)));
    }

    #[test]
    fn writes_http_10_responses() {
        let res = Response::builder()
            .status(StatusCode::OK)
            .version(Version::HTTP_10)
            .body(Body::from("lol"))
            .unwrap();

        let (output, outcome) = write(res);

        assert_eq!(output, b"HTTP/1.0 200 OK\r\ncontent-length: 3\r\n\r\nlol");
        assert!(matches!(outcome, Outcome::KeepAlive));
    }

    #[test]
    fn removes_chunked_transfer_encoding_from_http_10_responses() {
        let res = Response::builder()
            .status(StatusCode::OK)
            .version(Version::HTTP_10)
            .header("transfer-encoding", "chunked")
            .body(Body::from_iter(std::iter::once("lol")))
            .unwrap();

        let (output, outcome) = write(res);

        assert_eq!(output, b"HTTP/1.0 200 OK\r\nconnection: close\r\n\r\nlol");
        assert!(matches!(outcome, Outcome::Close));
    }

    #[test]
    fn gzips_responses_with_the_always_policy() {
        let res = Response::builder()
            .status(StatusCode::OK)
            .header("content-type", "text/plain")
            .gzip(GzipPolicy::Always)
            .body(Body::from("hello world"))
            .unwrap();

        let (output, _) = write(res);
        let head_end = output.windows(4).position(|w| w == b"\r\n\r\n").unwrap();
        let head = std::str::from_utf8(&output[..head_end]).unwrap();
        assert!(head.contains("content-encoding: gzip"));
        assert!(head.contains("transfer-encoding: chunked"));
    }

    #[test]
    fn auto_detect_skips_gzip_when_client_did_not_advertise_support() {
        let res = Response::builder()
            .status(StatusCode::OK)
            .header("content-type", "text/plain")
            .gzip(GzipPolicy::AutoDetect)
            .body(Body::from("hello world"))
            .unwrap();

        let mut output: Cursor<Vec<u8>> = Cursor::new(Vec::new());
        write_response(res, &mut output, true, false).unwrap();
        let output = output.into_inner();

        assert!(!std::str::from_utf8(&output)
            .unwrap()
            .contains("content-encoding"));
    }
}
