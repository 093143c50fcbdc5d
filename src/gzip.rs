//! Gzip compression policy for response bodies.
//!
//! Wraps a body's reader in a [`flate2::read::GzEncoder`] when [`crate::response::GzipPolicy`]
//! calls for it, deciding whether compression is worthwhile from the response's `Content-Type`
//! and whether the client advertised support for it.
use headers::HeaderMap;

/// MIME types worth spending CPU cycles compressing. Already-compressed formats (images, video,
/// archives) are deliberately excluded.
pub fn is_compressible(content_type: &str) -> bool {
    let mime = content_type.split(';').next().unwrap_or("").trim();
    mime.starts_with("text/")
        || matches!(
            mime,
            "application/json" | "application/javascript" | "application/xhtml+xml"
        )
}

/// Whether the client's `Accept-Encoding` header advertises gzip support.
pub fn client_accepts_gzip(headers: &HeaderMap) -> bool {
    headers
        .get(http::header::ACCEPT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|value| {
            value
                .split(',')
                .map(|enc| enc.trim().split(';').next().unwrap_or("").trim())
                .any(|enc| enc.eq_ignore_ascii_case("gzip") || enc == "*")
        })
        .unwrap_or(false)
}
