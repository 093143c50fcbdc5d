//! Spooling large request bodies to disk.
//!
//! A body backed by an open file is already a first-class [`Body`](crate::Body), so spooling
//! just means writing the incoming bytes to a [`tempfile::NamedTempFile`] before handing it off
//! as the request body, instead of buffering the whole thing (or the whole unbounded stream) in
//! memory.
use std::io::{self, Read, Write};

use tempfile::NamedTempFile;

use crate::Body;

/// Copies up to `len` bytes from `reader` into a fresh temp file under `dir` and returns a
/// [`Body`] reading back from it. The file is unlinked as soon as the returned body (and the
/// underlying handle) is dropped, same as any other [`tempfile`] file.
pub(crate) fn spool_to_tempfile(
    reader: impl Read,
    len: u64,
    dir: &std::path::Path,
) -> io::Result<Body> {
    let mut tempfile = NamedTempFile::new_in(dir)?;
    io::copy(&mut reader.take(len), tempfile.as_file_mut())?;
    tempfile.flush()?;

    let file = tempfile.into_file();
    file.try_into()
}
