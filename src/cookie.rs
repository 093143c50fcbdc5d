//! Response cookies.
//!
//! [`Cookie`] is a plain data carrier, not a parser: building the `Set-Cookie` header value is
//! its only job. The cookie-octet grammar (RFC 6265 ยง4.1.1) doesn't allow a long list of bytes
//! commonly present in values (commas, semicolons, whitespace, quotes), so values are
//! percent-escaped on the way out with [`percent_encoding`] and percent-decoded on the way back
//! in when reading a request's `Cookie:` header — the one "implementer must decide" policy the
//! spec leaves open, resolved the same way on both ends so a value round-trips.
use std::fmt;

use httpdate::HttpDate;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use std::time::SystemTime;

/// Characters the cookie-octet grammar does not allow unescaped, beyond the base ASCII control
/// set: DQUOTE, comma, semicolon, backslash and space.
const COOKIE_VALUE: &AsciiSet = &CONTROLS
    .add(b'"')
    .add(b',')
    .add(b';')
    .add(b'\\')
    .add(b' ');

#[derive(Debug, Clone)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: Option<String>,
    pub path: Option<String>,
    pub expires: Option<SystemTime>,
    pub http_only: bool,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: None,
            path: None,
            expires: None,
            http_only: false,
        }
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn expires(mut self, expires: SystemTime) -> Self {
        self.expires = Some(expires);
        self
    }

    pub fn http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    /// Percent-decodes a raw `name=value` pair as found in a request's `Cookie:` header.
    pub fn parse_pair(pair: &str) -> Option<(String, String)> {
        let (name, value) = pair.trim().split_once('=')?;
        let value = percent_decode_str(value).decode_utf8().ok()?.into_owned();
        Some((name.trim().to_string(), value))
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}={}",
            self.name,
            utf8_percent_encode(&self.value, COOKIE_VALUE)
        )?;

        if let Some(domain) = &self.domain {
            write!(f, "; Domain={domain}")?;
        }

        if let Some(path) = &self.path {
            write!(f, "; Path={path}")?;
        }

        if let Some(expires) = self.expires {
            write!(f, "; Expires={}", HttpDate::from(expires))?;
        }

        if self.http_only {
            write!(f, "; HttpOnly")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn formats_a_minimal_cookie() {
        let cookie = Cookie::new("session", "abc123");
        assert_eq!(cookie.to_string(), "session=abc123");
    }

    #[test]
    fn percent_escapes_values_with_reserved_characters() {
        let cookie = Cookie::new("greeting", "hello, world; \"quoted\"");
        assert_eq!(
            cookie.to_string(),
            "greeting=hello%2C%20world%3B%20%22quoted%22"
        );
    }

    #[test]
    fn round_trips_percent_escaped_values() {
        let cookie = Cookie::new("greeting", "hello, world");
        let line = cookie.to_string();
        let (_, raw_value) = line.split_once('=').unwrap();
        let (name, value) = Cookie::parse_pair(&format!("greeting={raw_value}")).unwrap();
        assert_eq!(name, "greeting");
        assert_eq!(value, "hello, world");
    }

    #[test]
    fn formats_full_attribute_set() {
        let cookie = Cookie::new("session", "abc123")
            .domain("example.com")
            .path("/")
            .expires(SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000_000))
            .http_only(true);

        let formatted = cookie.to_string();
        assert!(formatted.starts_with("session=abc123; Domain=example.com; Path=/; Expires="));
        assert!(formatted.ends_with("HttpOnly"));
    }
}
