use std::io::{self, Cursor, Read};

/// A reader that yields exactly `max_bytes` bytes drawn from an inner stream, optionally preceded
/// by bytes the caller already pulled off the wire (the header parser reads past the request line
/// into a fixed-size buffer and may end up holding the first few bytes of the body).
///
/// Once the cap is reached, or the inner stream runs dry, every further read returns `Ok(0)`: the
/// body is considered fully drained and the connection is free to move on to the next request.
pub struct BoundedRequestBody<R> {
    inner: R,
    remaining: u64,
    pushback: Option<Cursor<Vec<u8>>>,
}

/// Reads are served from an internal buffer of at most this many bytes per call into the inner
/// stream, so a single `read()` can never block on more than one syscall's worth of data.
const READ_CHUNK: usize = 64 * 1024;

impl<R: Read> BoundedRequestBody<R> {
    pub fn new(inner: R, max_bytes: u64) -> Self {
        Self {
            inner,
            remaining: max_bytes,
            pushback: None,
        }
    }

    /// Creates a bounded body with bytes the caller already read off the wire prepended.
    ///
    /// If `initial` is longer than `max_bytes`, it is truncated and the surplus is discarded —
    /// those bytes were never supposed to belong to this body in the first place.
    pub fn with_pushback(inner: R, max_bytes: u64, mut initial: Vec<u8>) -> Self {
        if initial.len() as u64 > max_bytes {
            initial.truncate(max_bytes as usize);
        }
        let remaining = max_bytes - initial.len() as u64;
        let pushback = (!initial.is_empty()).then(|| Cursor::new(initial));
        Self {
            inner,
            remaining,
            pushback,
        }
    }
}

impl<R: Read> Read for BoundedRequestBody<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(pushback) = self.pushback.as_mut() {
            let read = pushback.read(buf)?;
            if read > 0 {
                return Ok(read);
            }
            self.pushback = None;
        }

        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }

        let want = (buf.len() as u64).min(self.remaining).min(READ_CHUNK as u64) as usize;
        let read = self.inner.read(&mut buf[..want])?;
        self.remaining -= read as u64;
        if read == 0 {
            self.remaining = 0;
        }
        Ok(read)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_exactly_max_bytes_from_inner_stream() {
        let inner = Cursor::new(b"hello world, this is a longer body".to_vec());
        let mut body = BoundedRequestBody::new(inner, 5);

        let mut buf = Vec::new();
        body.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"hello");

        let mut trailing = [0_u8; 4];
        assert_eq!(body.read(&mut trailing).unwrap(), 0);
    }

    #[test]
    fn stops_at_inner_eof_even_under_the_cap() {
        let inner = Cursor::new(b"hi".to_vec());
        let mut body = BoundedRequestBody::new(inner, 1024);

        let mut buf = Vec::new();
        body.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"hi");
        assert_eq!(body.read(&mut [0; 8]).unwrap(), 0);
    }

    #[test]
    fn serves_pushback_bytes_before_the_inner_stream() {
        let inner = Cursor::new(b"world".to_vec());
        let mut body = BoundedRequestBody::with_pushback(inner, 10, b"hello".to_vec());

        let mut buf = Vec::new();
        body.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"helloworld");
    }

    #[test]
    fn truncates_pushback_bytes_that_exceed_the_cap() {
        let inner = Cursor::new(Vec::new());
        let mut body = BoundedRequestBody::with_pushback(inner, 3, b"hello".to_vec());

        let mut buf = Vec::new();
        body.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"hel");
    }
}
