use std::{
    io::{self, Cursor, Read},
    iter,
};

use headers::HeaderMap;

/// A single item produced while streaming a body in chunks.
///
/// Most bodies only ever produce [`Chunk::Data`]. [`Chunk::Trailers`] lets a body announce
/// trailing headers once it has finished streaming data, which [`super::Body::channel`] bodies
/// use to carry HTTP trailers.
#[derive(Debug, Clone)]
pub enum Chunk {
    Data(Vec<u8>),
    Trailers(HeaderMap),
}

impl<T: Into<Vec<u8>>> From<T> for Chunk {
    fn from(data: T) -> Self {
        Chunk::Data(data.into())
    }
}

/// Describes all possible bodies used by [`Requests`](http::Request) and
/// [`Responses`](http::Response).
///
/// Implement this trait if you need fine grained control over how a body is streamed or chunked.
/// [`super::Body`] is a decent default implementation for both receiving and sending bodies.
pub trait HttpBody: Sized {
    type Reader: Read;
    type Chunks: Iterator<Item = io::Result<Chunk>>;

    /// The length of this body in bytes, if known ahead of time.
    fn len(&self) -> Option<u64>;

    fn is_empty(&self) -> bool {
        matches!(self.len(), Some(0))
    }

    /// Turns this body into a [`Read`].
    fn into_reader(self) -> Self::Reader;

    /// Turns this body into an iterator of [`Chunk`]s, used when writing with chunked transfer
    /// encoding.
    fn into_chunks(self) -> Self::Chunks;

    /// Reads this body fully into memory.
    fn into_bytes(self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(1024);
        self.into_reader().read_to_end(&mut buf)?;
        Ok(buf)
    }
}

impl HttpBody for () {
    type Reader = io::Empty;
    type Chunks = iter::Empty<io::Result<Chunk>>;

    fn len(&self) -> Option<u64> {
        Some(0)
    }

    fn into_reader(self) -> Self::Reader {
        io::empty()
    }

    fn into_bytes(self) -> io::Result<Vec<u8>> {
        Ok(Vec::new())
    }

    fn into_chunks(self) -> Self::Chunks {
        iter::empty()
    }
}

impl HttpBody for String {
    type Reader = Cursor<Vec<u8>>;
    type Chunks = iter::Once<io::Result<Chunk>>;

    fn len(&self) -> Option<u64> {
        String::len(self).try_into().ok()
    }

    fn into_reader(self) -> Self::Reader {
        Cursor::new(self.into_bytes())
    }

    fn into_bytes(self) -> io::Result<Vec<u8>> {
        Ok(self.into_bytes())
    }

    fn into_chunks(self) -> Self::Chunks {
        iter::once(Ok(self.into_bytes().into()))
    }
}

impl HttpBody for &'static str {
    type Reader = Cursor<Vec<u8>>;
    type Chunks = iter::Once<io::Result<Chunk>>;

    fn len(&self) -> Option<u64> {
        str::len(self).try_into().ok()
    }

    fn into_reader(self) -> Self::Reader {
        Cursor::new(self.as_bytes().to_vec())
    }

    fn into_bytes(self) -> io::Result<Vec<u8>> {
        Ok(self.as_bytes().to_vec())
    }

    fn into_chunks(self) -> Self::Chunks {
        iter::once(Ok(self.as_bytes().to_vec().into()))
    }
}

impl HttpBody for &'static [u8] {
    type Reader = Cursor<&'static [u8]>;
    type Chunks = iter::Once<io::Result<Chunk>>;

    fn len(&self) -> Option<u64> {
        (*self).len().try_into().ok()
    }

    fn into_reader(self) -> Self::Reader {
        Cursor::new(self)
    }

    fn into_bytes(self) -> io::Result<Vec<u8>> {
        Ok(self.to_vec())
    }

    fn into_chunks(self) -> Self::Chunks {
        iter::once(Ok(self.to_vec().into()))
    }
}

impl HttpBody for Vec<u8> {
    type Reader = Cursor<Vec<u8>>;
    type Chunks = iter::Once<io::Result<Chunk>>;

    fn len(&self) -> Option<u64> {
        Vec::len(self).try_into().ok()
    }

    fn into_reader(self) -> Self::Reader {
        Cursor::new(self)
    }

    fn into_bytes(self) -> io::Result<Vec<u8>> {
        Ok(self)
    }

    fn into_chunks(self) -> Self::Chunks {
        iter::once(Ok(self.into()))
    }
}
