use crate::http::body::{Body, StreamingBody};
use crate::http::headers::Headers;

/// HTTP status codes.
///
/// Codes the balancer produces itself have named variants; anything else
/// relayed from a backend is carried as `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// 200 OK
    Ok,
    /// 204 No Content
    NoContent,
    /// 400 Bad Request
    BadRequest,
    /// 413 Payload Too Large
    PayloadTooLarge,
    /// 429 Too Many Requests
    TooManyRequests,
    /// 500 Internal Server Error
    InternalServerError,
    /// 502 Bad Gateway
    BadGateway,
    /// Any other status relayed verbatim
    Other(u16),
}

impl StatusCode {
    pub fn from_u16(code: u16) -> Self {
        match code {
            200 => StatusCode::Ok,
            204 => StatusCode::NoContent,
            400 => StatusCode::BadRequest,
            413 => StatusCode::PayloadTooLarge,
            429 => StatusCode::TooManyRequests,
            500 => StatusCode::InternalServerError,
            502 => StatusCode::BadGateway,
            other => StatusCode::Other(other),
        }
    }

    /// Returns the numeric HTTP status code.
    ///
    /// # Example
    ///
    /// ```
    /// # use sluice::http::response::StatusCode;
    /// assert_eq!(StatusCode::TooManyRequests.as_u16(), 429);
    /// assert_eq!(StatusCode::Other(418).as_u16(), 418);
    /// ```
    pub fn as_u16(&self) -> u16 {
        match self {
            StatusCode::Ok => 200,
            StatusCode::NoContent => 204,
            StatusCode::BadRequest => 400,
            StatusCode::PayloadTooLarge => 413,
            StatusCode::TooManyRequests => 429,
            StatusCode::InternalServerError => 500,
            StatusCode::BadGateway => 502,
            StatusCode::Other(code) => *code,
        }
    }

    /// Returns the standard HTTP reason phrase for this status code.
    pub fn reason_phrase(&self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::NoContent => "No Content",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::PayloadTooLarge => "Payload Too Large",
            StatusCode::TooManyRequests => "Too Many Requests",
            StatusCode::InternalServerError => "Internal Server Error",
            StatusCode::BadGateway => "Bad Gateway",
            StatusCode::Other(code) => match code {
                100..=199 => "Informational",
                200..=299 => "Success",
                300..=399 => "Redirection",
                400..=499 => "Client Error",
                _ => "Server Error",
            },
        }
    }
}

/// An HTTP response on its way to a client.
#[derive(Debug)]
pub struct Response {
    /// The HTTP status code
    pub status: StatusCode,
    /// Reason phrase received from upstream, if any
    pub reason: Option<String>,
    /// HTTP headers
    pub headers: Headers,
    /// Buffered or streaming body
    pub body: Body,
}

/// Builder for constructing HTTP responses in a fluent style.
///
/// # Example
///
/// ```ignore
/// let response = ResponseBuilder::new(StatusCode::Ok)
///     .header("Content-Type", "application/json")
///     .body(b"{}".to_vec())
///     .build();
/// ```
pub struct ResponseBuilder {
    status: StatusCode,
    reason: Option<String>,
    headers: Headers,
    body: Body,
}

impl ResponseBuilder {
    /// Creates a new response builder with the specified status code.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            reason: None,
            headers: Headers::new(),
            body: Body::default(),
        }
    }

    /// Overrides the standard reason phrase. Empty phrases are ignored.
    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        self.reason = (!reason.is_empty()).then_some(reason);
        self
    }

    /// Adds or replaces a header.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(key, value);
        self
    }

    /// Replaces all headers, keeping their order.
    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Sets a buffered response body.
    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = Body::Full(body);
        self
    }

    /// Sets a body that is streamed from upstream.
    pub fn streaming(mut self, body: StreamingBody) -> Self {
        self.body = Body::Streaming(body);
        self
    }

    /// Builds the final Response.
    ///
    /// Buffered bodies get a Content-Length header if none is present.
    /// Streaming bodies keep whatever framing headers upstream sent.
    pub fn build(mut self) -> Response {
        if let Body::Full(bytes) = &self.body {
            if !self.headers.contains("Content-Length") {
                self.headers.set("Content-Length", bytes.len().to_string());
            }
        }

        Response {
            status: self.status,
            reason: self.reason,
            headers: self.headers,
            body: self.body,
        }
    }
}

impl Response {
    /// Reason phrase for the status line.
    pub fn reason_phrase(&self) -> &str {
        self.reason
            .as_deref()
            .unwrap_or_else(|| self.status.reason_phrase())
    }

    /// Creates a simple 200 OK response with the given body.
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        ResponseBuilder::new(StatusCode::Ok)
            .body(body.into())
            .build()
    }

    /// Creates a plain-text response; a trailing newline is appended.
    pub fn text(status: StatusCode, message: impl Into<String>) -> Self {
        let mut body = message.into().into_bytes();
        body.push(b'\n');

        ResponseBuilder::new(status)
            .header("Content-Type", "text/plain; charset=utf-8")
            .header("X-Content-Type-Options", "nosniff")
            .body(body)
            .build()
    }

    /// Whether the client can find the end of this response without the
    /// connection being closed.
    pub fn is_delimited(&self) -> bool {
        match &self.body {
            Body::Full(_) => true,
            Body::Streaming(body) => {
                body.framing() == crate::http::body::Framing::Empty
                    || self.headers.has_token("Transfer-Encoding", "chunked")
                    || self.headers.contains("Content-Length")
            }
        }
    }

    /// Whether the response carries a server-sent event stream.
    pub fn is_event_stream(&self) -> bool {
        self.headers
            .get("Content-Type")
            .is_some_and(|v| v.trim() == crate::http::EVENT_STREAM)
    }
}
