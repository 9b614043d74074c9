use std::net::SocketAddr;

use crate::http::headers::Headers;

/// HTTP request methods.
///
/// The balancer forwards every method unchanged; methods outside the common
/// set are carried as `Extension`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    /// GET - Retrieve a resource
    GET,
    /// POST - Create or submit data
    POST,
    /// PUT - Replace a resource
    PUT,
    /// DELETE - Delete a resource
    DELETE,
    /// HEAD - Like GET but without the response body
    HEAD,
    /// OPTIONS - Describe communication options
    OPTIONS,
    /// PATCH - Partial modification of a resource
    PATCH,
    /// Any other method token (e.g. `PROPFIND`)
    Extension(String),
}

/// Represents a parsed HTTP request from a client.
///
/// The body is fully buffered by the time a request reaches the balancer.
#[derive(Debug, Clone)]
pub struct Request {
    /// The HTTP method (GET, POST, etc.)
    pub method: Method,
    /// The request target including any query (e.g., "/events?topic=a")
    pub path: String,
    /// HTTP version (typically "HTTP/1.1")
    pub version: String,
    /// Request headers
    pub headers: Headers,
    /// Request body, de-chunked if it arrived chunked
    pub body: Vec<u8>,
    /// Address of the client that sent the request, when known
    pub remote_addr: Option<SocketAddr>,
}

/// Builder for constructing Request objects.
pub struct RequestBuilder {
    method: Option<Method>,
    path: Option<String>,
    version: Option<String>,
    headers: Headers,
    body: Vec<u8>,
    remote_addr: Option<SocketAddr>,
}

impl Method {
    /// Parses an HTTP method from a string.
    ///
    /// Methods are case-sensitive tokens. Known methods map to their variant;
    /// any other valid token becomes `Extension`.
    ///
    /// # Example
    ///
    /// ```
    /// # use sluice::http::request::Method;
    /// assert_eq!(Method::from_str("GET"), Some(Method::GET));
    /// assert_eq!(Method::from_str("PURGE"), Some(Method::Extension("PURGE".into())));
    /// assert_eq!(Method::from_str("GE T"), None);
    /// ```
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "GET" => Some(Method::GET),
            "POST" => Some(Method::POST),
            "PUT" => Some(Method::PUT),
            "DELETE" => Some(Method::DELETE),
            "HEAD" => Some(Method::HEAD),
            "OPTIONS" => Some(Method::OPTIONS),
            "PATCH" => Some(Method::PATCH),
            _ if is_token(s) => Some(Method::Extension(s.to_string())),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::HEAD => "HEAD",
            Method::OPTIONS => "OPTIONS",
            Method::PATCH => "PATCH",
            Method::Extension(s) => s,
        }
    }
}

fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b))
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self {
            method: None,
            path: None,
            version: None,
            headers: Headers::new(),
            body: Vec::new(),
            remote_addr: None,
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(key, value);
        self
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn build(self) -> Result<Request, &'static str> {
        Ok(Request {
            method: self.method.ok_or("method missing")?,
            path: self.path.ok_or("path missing")?,
            version: self.version.unwrap_or_else(|| "HTTP/1.1".to_string()),
            headers: self.headers,
            body: self.body,
            remote_addr: self.remote_addr,
        })
    }
}

impl Request {
    /// Retrieves a header value by name, ignoring case.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key)
    }

    /// Retrieves the Content-Length header value and parses it as a usize.
    ///
    /// Returns 0 if the header is missing or not a valid number.
    pub fn content_length(&self) -> usize {
        self.header("Content-Length")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }

    /// Determines whether the connection should remain open after the response.
    ///
    /// HTTP/1.1 defaults to keep-alive unless `Connection: close` is sent;
    /// HTTP/1.0 closes unless `Connection: keep-alive` is sent.
    pub fn keep_alive(&self) -> bool {
        if self.headers.has_token("Connection", "close") {
            return false;
        }
        if self.version == "HTTP/1.0" {
            return self.headers.has_token("Connection", "keep-alive");
        }
        true
    }

    /// Whether the client asked for a server-sent event stream.
    pub fn accepts_event_stream(&self) -> bool {
        self.header("Accept")
            .is_some_and(|v| v.trim() == crate::http::EVENT_STREAM)
    }
}
