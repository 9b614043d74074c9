//! Response bodies.
//!
//! A body is either fully buffered (locally generated responses) or streamed
//! from an upstream connection one chunk at a time. Streaming bodies decode
//! the upstream framing; the writer re-frames them for the client.

use bytes::{Bytes, BytesMut};
use std::fmt;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::http::chunked::{parse_chunk, Chunk};
use crate::http::headers::Headers;

const READ_SIZE: usize = 8192;

/// How the end of an upstream body is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// No body at all (HEAD, 1xx, 204, 304)
    Empty,
    /// Exactly this many bytes remain
    Length(u64),
    /// `Transfer-Encoding: chunked`
    Chunked,
    /// Body runs until the peer closes the connection
    UntilClose,
}

impl Framing {
    /// Derives the framing of a response from its status and headers.
    pub fn for_response(status: u16, headers: &Headers, head_request: bool) -> io::Result<Self> {
        if head_request || (100..200).contains(&status) || status == 204 || status == 304 {
            return Ok(Framing::Empty);
        }

        if headers.has_token("Transfer-Encoding", "chunked") {
            return Ok(Framing::Chunked);
        }

        match headers.get("Content-Length") {
            Some(value) => value
                .trim()
                .parse()
                .map(Framing::Length)
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "invalid Content-Length")),
            None => Ok(Framing::UntilClose),
        }
    }
}

/// A body read incrementally from an upstream connection.
pub struct StreamingBody {
    source: Box<dyn AsyncRead + Send + Unpin>,
    buffer: BytesMut,
    framing: Framing,
    done: bool,
}

impl StreamingBody {
    /// `buffer` holds bytes already read past the response head.
    pub fn new(
        source: impl AsyncRead + Send + Unpin + 'static,
        buffer: BytesMut,
        framing: Framing,
    ) -> Self {
        Self {
            source: Box::new(source),
            buffer,
            framing,
            done: framing == Framing::Empty,
        }
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Returns the next piece of decoded body data, or `None` at the end.
    ///
    /// Each call yields whatever the upstream has delivered so far, so a
    /// flushed upstream chunk becomes available without waiting for the rest.
    pub async fn next_chunk(&mut self) -> io::Result<Option<Bytes>> {
        if self.done {
            return Ok(None);
        }

        match self.framing {
            Framing::Empty => {
                self.done = true;
                Ok(None)
            }

            Framing::Length(remaining) => {
                if remaining == 0 {
                    self.done = true;
                    return Ok(None);
                }

                if self.buffer.is_empty() && self.fill().await? == 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "upstream closed before complete body received",
                    ));
                }

                let take = self.buffer.len().min(remaining as usize);
                self.framing = Framing::Length(remaining - take as u64);
                Ok(Some(self.buffer.split_to(take).freeze()))
            }

            Framing::UntilClose => {
                if self.buffer.is_empty() && self.fill().await? == 0 {
                    self.done = true;
                    return Ok(None);
                }

                Ok(Some(self.buffer.split().freeze()))
            }

            Framing::Chunked => loop {
                match parse_chunk(&self.buffer)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?
                {
                    Some((Chunk::Data { start, len }, consumed)) => {
                        let mut frame = self.buffer.split_to(consumed);
                        let data = frame.split_off(start).split_to(len);
                        return Ok(Some(data.freeze()));
                    }
                    Some((Chunk::Last, consumed)) => {
                        let _ = self.buffer.split_to(consumed);
                        self.done = true;
                        return Ok(None);
                    }
                    None => {
                        if self.fill().await? == 0 {
                            return Err(io::Error::new(
                                io::ErrorKind::UnexpectedEof,
                                "upstream closed inside a chunked body",
                            ));
                        }
                    }
                }
            },
        }
    }

    async fn fill(&mut self) -> io::Result<usize> {
        self.buffer.reserve(READ_SIZE);
        self.source.read_buf(&mut self.buffer).await
    }
}

impl fmt::Debug for StreamingBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingBody")
            .field("framing", &self.framing)
            .field("buffered", &self.buffer.len())
            .field("done", &self.done)
            .finish()
    }
}

#[derive(Debug)]
pub enum Body {
    Full(Vec<u8>),
    Streaming(StreamingBody),
}

impl Body {
    /// Buffered bytes, if this body is not streamed.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Body::Full(bytes) => Some(bytes),
            Body::Streaming(_) => None,
        }
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, Body::Streaming(_))
    }
}

impl Default for Body {
    fn default() -> Self {
        Body::Full(Vec::new())
    }
}
