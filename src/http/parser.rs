use crate::http::chunked::{parse_chunk, Chunk};
use crate::http::headers::Headers;
use crate::http::request::{Method, Request};

/// Default cap on a buffered request body.
pub const DEFAULT_MAX_BODY: usize = 16 * 1024 * 1024;

/// Cap on the request line plus headers.
pub const MAX_HEAD_SIZE: usize = 64 * 1024;

#[derive(Debug, PartialEq, Eq)]
pub enum ParseError {
    InvalidRequest,
    InvalidMethod,
    InvalidHeader,
    InvalidContentLength,
    InvalidChunk,
    HeadTooLarge,
    BodyTooLarge,
    Incomplete,
}

impl ParseError {
    /// Whether the failure happened while reading the body.
    pub fn is_body_error(&self) -> bool {
        matches!(
            self,
            ParseError::InvalidContentLength | ParseError::InvalidChunk | ParseError::BodyTooLarge
        )
    }
}

pub fn parse_http_request(buf: &[u8]) -> Result<(Request, usize), ParseError> {
    parse_http_request_limited(buf, DEFAULT_MAX_BODY)
}

/// Parses one request from the front of `buf`, buffering its whole body.
///
/// Returns the request and the number of bytes consumed, or
/// `ParseError::Incomplete` if `buf` does not yet hold the full request.
pub fn parse_http_request_limited(
    buf: &[u8],
    max_body: usize,
) -> Result<(Request, usize), ParseError> {
    RequestReader::new(max_body).advance(buf)
}

/// Reads requests off a growing connection buffer.
///
/// The parsed head and the chunk-decoding progress are kept between calls to
/// [`RequestReader::advance`], so each call only looks at bytes that arrived
/// since the last one.
#[derive(Debug)]
pub struct RequestReader {
    max_body: usize,
    pending: Option<PendingRequest>,
}

#[derive(Debug)]
struct PendingRequest {
    request: Request,
    body_start: usize,
    body: PendingBody,
    continue_sent: bool,
}

#[derive(Debug)]
enum PendingBody {
    Length(usize),
    Chunked(ChunkedDecoder),
}

impl RequestReader {
    pub fn new(max_body: usize) -> Self {
        Self {
            max_body,
            pending: None,
        }
    }

    /// Tries to complete the request at the front of `buf`.
    ///
    /// `buf` must be the same buffer as on the previous call, possibly with
    /// more bytes appended. On success the reader is reset and the caller
    /// drains the returned number of bytes.
    pub fn advance(&mut self, buf: &[u8]) -> Result<(Request, usize), ParseError> {
        let result = self.try_advance(buf);
        if !matches!(result, Err(ParseError::Incomplete)) {
            self.pending = None;
        }
        result
    }

    /// The request whose head has been parsed but whose body is still arriving.
    pub fn pending_head(&self) -> Option<&Request> {
        self.pending.as_ref().map(|p| &p.request)
    }

    /// Returns true exactly once for a pending HTTP/1.1 request that sent
    /// `Expect: 100-continue`.
    pub fn take_continue(&mut self) -> bool {
        match &mut self.pending {
            Some(pending) if !pending.continue_sent => {
                let request = &pending.request;
                let wants = request.version != "HTTP/1.0"
                    && request.headers.has_token("Expect", "100-continue");
                pending.continue_sent = true;
                wants
            }
            _ => false,
        }
    }

    fn try_advance(&mut self, buf: &[u8]) -> Result<(Request, usize), ParseError> {
        if self.pending.is_none() {
            self.pending = Some(parse_head(buf, self.max_body)?);
        }

        let Some(pending) = self.pending.as_mut() else {
            return Err(ParseError::Incomplete);
        };
        let body_bytes = buf.get(pending.body_start..).unwrap_or_default();

        let body_len = match &mut pending.body {
            PendingBody::Length(len) => {
                if body_bytes.len() < *len {
                    return Err(ParseError::Incomplete);
                }
                pending.request.body = body_bytes[..*len].to_vec();
                *len
            }
            PendingBody::Chunked(decoder) => {
                let wire_len = decoder.decode(body_bytes, self.max_body)?;
                pending.request.body = decoder.take_body();
                wire_len
            }
        };

        let consumed = pending.body_start + body_len;
        match self.pending.take() {
            Some(pending) => Ok((pending.request, consumed)),
            None => Err(ParseError::Incomplete),
        }
    }
}

fn parse_head(buf: &[u8], max_body: usize) -> Result<PendingRequest, ParseError> {
    // Look for header/body separator
    let Some(headers_end) = find_headers_end(buf) else {
        if buf.len() > MAX_HEAD_SIZE {
            return Err(ParseError::HeadTooLarge);
        }
        return Err(ParseError::Incomplete);
    };
    let header_bytes = &buf[..headers_end];
    let body_start = headers_end + 4;

    let headers_str = std::str::from_utf8(header_bytes)
        .map_err(|_| ParseError::InvalidRequest)?;

    let mut lines = headers_str.split("\r\n");

    // Request line
    let request_line = lines.next().ok_or(ParseError::InvalidRequest)?;
    let mut parts = request_line.split_whitespace();

    let method_str = parts.next().ok_or(ParseError::InvalidRequest)?;
    let path = parts.next().ok_or(ParseError::InvalidRequest)?;
    let version = parts.next().ok_or(ParseError::InvalidRequest)?;

    if parts.next().is_some() || !version.starts_with("HTTP/1.") {
        return Err(ParseError::InvalidRequest);
    }

    let method = Method::from_str(method_str).ok_or(ParseError::InvalidMethod)?;

    // Headers
    let mut headers = Headers::new();

    for line in lines {
        if line.is_empty() {
            continue;
        }

        let (key, value) = line
            .split_once(':')
            .ok_or(ParseError::InvalidHeader)?;

        if key.is_empty() || key.ends_with(char::is_whitespace) {
            return Err(ParseError::InvalidHeader);
        }

        headers.append(key.trim(), value.trim());
    }

    // Body framing
    let body = if headers.has_token("Transfer-Encoding", "chunked") {
        PendingBody::Chunked(ChunkedDecoder::default())
    } else {
        let content_length = headers
            .get("Content-Length")
            .map(|v| v.parse::<usize>().map_err(|_| ParseError::InvalidContentLength))
            .transpose()?
            .unwrap_or(0);

        if content_length > max_body {
            return Err(ParseError::BodyTooLarge);
        }
        PendingBody::Length(content_length)
    };

    let request = Request {
        method,
        path: path.to_string(),
        version: version.to_string(),
        headers,
        body: Vec::new(),
        remote_addr: None,
    };

    Ok(PendingRequest {
        request,
        body_start,
        body,
        continue_sent: false,
    })
}

/// Incremental decoder for a chunked request body.
#[derive(Debug, Default)]
pub struct ChunkedDecoder {
    /// Wire bytes of complete chunks already decoded
    consumed: usize,
    body: Vec<u8>,
}

impl ChunkedDecoder {
    /// Decodes the chunks in `buf` past those already seen.
    ///
    /// `buf` starts at the first chunk and only grows between calls. Returns
    /// the wire length of the whole body once the last chunk has arrived.
    pub fn decode(&mut self, buf: &[u8], max_body: usize) -> Result<usize, ParseError> {
        loop {
            let rest = buf.get(self.consumed..).unwrap_or_default();
            match parse_chunk(rest).map_err(|_| ParseError::InvalidChunk)? {
                Some((Chunk::Data { start, len }, used)) => {
                    if self.body.len() + len > max_body {
                        return Err(ParseError::BodyTooLarge);
                    }
                    self.body.extend_from_slice(&rest[start..start + len]);
                    self.consumed += used;
                }
                Some((Chunk::Last, used)) => return Ok(self.consumed + used),
                None => return Err(ParseError::Incomplete),
            }
        }
    }

    /// Bytes of body decoded so far.
    pub fn decoded_len(&self) -> usize {
        self.body.len()
    }

    fn take_body(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.body)
    }
}

fn find_headers_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4)
        .position(|w| w == b"\r\n\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_get() {
        let req = b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n";

        let (parsed, consumed) = parse_http_request(req).unwrap();

        assert_eq!(parsed.path, "/");
        assert_eq!(parsed.headers.get("Host").unwrap(), "example.com");
        assert_eq!(consumed, req.len());
    }

    #[test]
    fn parse_chunked_body() {
        let req = b"POST /upload HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n4\r\ntest\r\n3\r\n123\r\n0\r\n\r\nGET";

        let (parsed, consumed) = parse_http_request(req).unwrap();

        assert_eq!(parsed.body, b"test123");
        assert_eq!(consumed, req.len() - 3);
    }

    #[test]
    fn partial_chunked_body_is_incomplete() {
        let req = b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nte";
        assert_eq!(parse_http_request(req).unwrap_err(), ParseError::Incomplete);
    }

    #[test]
    fn body_over_limit_is_rejected_before_it_arrives() {
        let req = b"POST / HTTP/1.1\r\nContent-Length: 100\r\n\r\n";
        let err = parse_http_request_limited(req, 99).unwrap_err();

        assert_eq!(err, ParseError::BodyTooLarge);
        assert!(err.is_body_error());
    }

    #[test]
    fn chunked_decoder_resumes_where_it_stopped() {
        let mut decoder = ChunkedDecoder::default();
        let wire = b"4\r\ntest\r\n3\r\n123\r\n0\r\n\r\n";

        assert_eq!(decoder.decode(&wire[..12], 64), Err(ParseError::Incomplete));
        assert_eq!(decoder.decoded_len(), 4);
        assert_eq!(decoder.consumed, 9);

        assert_eq!(decoder.decode(&wire[..17], 64), Err(ParseError::Incomplete));
        assert_eq!(decoder.decoded_len(), 7);

        assert_eq!(decoder.decode(wire, 64), Ok(wire.len()));
        assert_eq!(decoder.take_body(), b"test123");
    }

    #[test]
    fn reader_keeps_head_across_reads() {
        let mut reader = RequestReader::new(1024);
        let mut buf = b"POST /up HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n".to_vec();

        assert_eq!(reader.advance(&buf).unwrap_err(), ParseError::Incomplete);
        assert_eq!(reader.pending_head().map(|r| r.path.as_str()), Some("/up"));

        buf.extend_from_slice(b"2\r\nhi\r\n");
        assert_eq!(reader.advance(&buf).unwrap_err(), ParseError::Incomplete);

        buf.extend_from_slice(b"0\r\n\r\n");
        let (request, consumed) = reader.advance(&buf).unwrap();
        assert_eq!(request.body, b"hi");
        assert_eq!(consumed, buf.len());
        assert!(reader.pending_head().is_none());
    }

    #[test]
    fn continue_requested_once_for_http11_only() {
        let mut reader = RequestReader::new(1024);
        let head = b"PUT / HTTP/1.1\r\nExpect: 100-continue\r\nContent-Length: 4\r\n\r\n";
        assert_eq!(reader.advance(head).unwrap_err(), ParseError::Incomplete);
        assert!(reader.take_continue());
        assert!(!reader.take_continue());

        let mut old = RequestReader::new(1024);
        let head = b"PUT / HTTP/1.0\r\nExpect: 100-continue\r\nContent-Length: 4\r\n\r\n";
        assert_eq!(old.advance(head).unwrap_err(), ParseError::Incomplete);
        assert!(!old.take_continue());
    }
}
