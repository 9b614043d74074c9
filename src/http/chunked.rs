//! Chunked transfer coding (RFC 9112 §7.1).

use std::fmt;

/// Terminating zero-length chunk with an empty trailer section.
pub const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

/// Largest chunk we are willing to buffer.
const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Longest chunk-size line (size plus extensions) we accept.
const MAX_LINE_LEN: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chunk {
    /// Chunk payload located at `buf[start..start + len]`
    Data { start: usize, len: usize },
    /// Zero-length chunk; trailers (if any) have been consumed
    Last,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidChunk(&'static str);

impl fmt::Display for InvalidChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid chunked encoding: {}", self.0)
    }
}

impl std::error::Error for InvalidChunk {}

/// Parses one chunk from the front of `buf`.
///
/// Returns `Ok(None)` when more bytes are needed, otherwise the chunk and the
/// number of bytes it occupies.
pub fn parse_chunk(buf: &[u8]) -> Result<Option<(Chunk, usize)>, InvalidChunk> {
    let Some(line_end) = find(buf, b"\r\n") else {
        if buf.len() > MAX_LINE_LEN {
            return Err(InvalidChunk("chunk size line too long"));
        }
        return Ok(None);
    };

    let line = std::str::from_utf8(&buf[..line_end])
        .map_err(|_| InvalidChunk("chunk size is not UTF-8"))?;
    let size = line.split_once(';').map_or(line, |(size, _)| size).trim();
    let size = usize::from_str_radix(size, 16).map_err(|_| InvalidChunk("bad chunk size"))?;

    if size > MAX_CHUNK_SIZE {
        return Err(InvalidChunk("chunk too large"));
    }

    let data_start = line_end + 2;

    if size == 0 {
        let rest = &buf[data_start..];
        if rest.starts_with(b"\r\n") {
            return Ok(Some((Chunk::Last, data_start + 2)));
        }
        return Ok(find(rest, b"\r\n\r\n").map(|pos| (Chunk::Last, data_start + pos + 4)));
    }

    let data_end = data_start + size;
    if buf.len() < data_end + 2 {
        return Ok(None);
    }

    if &buf[data_end..data_end + 2] != b"\r\n" {
        return Err(InvalidChunk("missing CRLF after chunk data"));
    }

    Ok(Some((
        Chunk::Data {
            start: data_start,
            len: size,
        },
        data_end + 2,
    )))
}

/// Frames `data` as a single chunk.
pub fn encode_chunk(data: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(data.len() + 12);
    buf.extend_from_slice(format!("{:x}\r\n", data.len()).as_bytes());
    buf.extend_from_slice(data);
    buf.extend_from_slice(b"\r\n");
    buf
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
