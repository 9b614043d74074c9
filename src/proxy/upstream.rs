//! Upstream connection and request forwarding
//!
//! This module connects to the selected node, sends it the buffered request
//! and hands back a response whose body is still streaming from the node.

use bytes::BytesMut;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use url::Url;

use crate::config::ServerConfig;
use crate::error::{ProxyError, Result};
use crate::http::body::{Framing, StreamingBody};
use crate::http::headers::Headers;
use crate::http::request::{Method, Request};
use crate::http::response::{Response, ResponseBuilder, StatusCode};
use crate::proxy::node::Node;

/// Default buffer size for reading from upstream
const BUFFER_SIZE: usize = 8192;

/// Upper bound on a response head
const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Request headers that only apply to the client hop.
const HOP_BY_HOP_REQUEST: &[&str] = &[
    "Connection",
    "Keep-Alive",
    "Proxy-Connection",
    "Transfer-Encoding",
    "Upgrade",
    "TE",
    "Trailer",
    "Expect",
];

/// Response headers that only apply to the upstream hop. Framing headers are
/// kept because the body is relayed with the same framing.
const HOP_BY_HOP_RESPONSE: &[&str] = &["Connection", "Keep-Alive", "Proxy-Connection", "Upgrade"];

/// Forwards admitted requests to their node
#[derive(Debug, Clone)]
pub struct ProxyAdapter {
    /// Connection timeout duration
    connect_timeout: Duration,

    /// Bound on sending the request and receiving the response head
    request_timeout: Duration,
}

impl ProxyAdapter {
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            request_timeout,
        }
    }

    pub fn from_config(cfg: &ServerConfig) -> Self {
        Self::new(cfg.connect_timeout(), cfg.request_timeout())
    }

    /// Forward a request to `node`.
    ///
    /// Any network failure before the response head arrives is reported as
    /// `ProxyError::Gateway`. There is no retry on another node.
    pub async fn forward(&self, request: &Request, node: &Node) -> Result<Response> {
        tracing::debug!(
            node = node.display_name(),
            method = request.method.as_str(),
            path = %request.path,
            "Forwarding request to node"
        );

        self.proxy_to_node(request, node)
            .await
            .map_err(|source| ProxyError::Gateway {
                node: node.display_name().to_string(),
                source,
            })
    }

    async fn proxy_to_node(&self, request: &Request, node: &Node) -> io::Result<Response> {
        let target = node.target();
        let host = target
            .host_str()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "node URL missing host"))?;
        let port = target.port_or_known_default().unwrap_or(80);

        // Connect to node with timeout
        let addr = format!("{}:{}", host, port);
        let mut stream = timeout(self.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timeout"))??;

        tracing::trace!(node = node.display_name(), "Connected to node");

        let request_bytes = self.build_http_request(request, target);
        let head_only = request.method == Method::HEAD;

        let (head, buffer) = timeout(self.request_timeout, async {
            stream.write_all(&request_bytes).await?;
            stream.flush().await?;
            read_response_head(&mut stream).await
        })
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "timed out waiting for response"))??;

        let status = head.status;
        let framing = Framing::for_response(status, &head.headers, head_only)?;
        let mut response = ResponseBuilder::new(StatusCode::from_u16(status))
            .reason(head.reason)
            .headers(head.headers)
            .streaming(StreamingBody::new(stream, buffer, framing))
            .build();

        rewrite_response_headers(&mut response);

        tracing::info!(
            node = node.display_name(),
            status = status,
            method = request.method.as_str(),
            path = %request.path,
            event_stream = response.is_event_stream(),
            "Request forwarded"
        );

        Ok(response)
    }

    /// Build HTTP request bytes to send to the node
    pub fn build_http_request(&self, request: &Request, target: &Url) -> Vec<u8> {
        let mut buffer = Vec::new();

        buffer.extend_from_slice(
            format!(
                "{} {} HTTP/1.1\r\n",
                request.method.as_str(),
                join_path(target, &request.path)
            )
            .as_bytes(),
        );

        let mut headers = request.headers.clone();
        for name in HOP_BY_HOP_REQUEST {
            headers.remove(name);
        }

        // Set/update Host header to node host
        if let Some(host) = target.host_str() {
            let host_value = match target.port() {
                Some(port) => format!("{}:{}", host, port),
                None => host.to_string(),
            };
            headers.set("Host", host_value);
        }

        if let Some(addr) = request.remote_addr {
            let forwarded = match headers.get("X-Forwarded-For") {
                Some(prior) => format!("{}, {}", prior, addr.ip()),
                None => addr.ip().to_string(),
            };
            headers.set("X-Forwarded-For", forwarded);
        }

        if request.accepts_event_stream() {
            headers.set("Connection", "keep-alive");
            headers.set("Cache-Control", "no-cache");
        } else {
            headers.set("Connection", "close");
        }

        if !request.body.is_empty() || request.headers.contains("Content-Length") {
            headers.set("Content-Length", request.body.len().to_string());
        } else {
            headers.remove("Content-Length");
        }

        for (key, value) in headers.iter() {
            buffer.extend_from_slice(format!("{}: {}\r\n", key, value).as_bytes());
        }

        // End of headers
        buffer.extend_from_slice(b"\r\n");
        buffer.extend_from_slice(&request.body);

        buffer
    }
}

/// Drops upstream-only headers and applies the event-stream rewrite.
pub fn rewrite_response_headers(response: &mut Response) {
    for name in HOP_BY_HOP_RESPONSE {
        response.headers.remove(name);
    }

    if response.is_event_stream() {
        response.headers.set("Connection", "keep-alive");
        response.headers.set("Cache-Control", "no-cache");
        response.headers.set("Transfer-Encoding", "chunked");
        response.headers.remove("Content-Length");
    }
}

/// Joins the node's base path with the request target.
///
/// ```
/// # use sluice::proxy::upstream::join_path;
/// let base = url::Url::parse("http://node/api/?key=1").unwrap();
/// assert_eq!(join_path(&base, "/users?page=2"), "/api/users?key=1&page=2");
/// ```
pub fn join_path(target: &Url, request_target: &str) -> String {
    let (path, query) = match request_target.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (request_target, None),
    };

    let base = target.path();
    let mut joined = match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{}{}", base, &path[1..]),
        (false, false) => format!("{}/{}", base, path),
        _ => format!("{}{}", base, path),
    };

    let query = match (target.query().filter(|q| !q.is_empty()), query.filter(|q| !q.is_empty())) {
        (Some(a), Some(b)) => Some(format!("{}&{}", a, b)),
        (Some(a), None) => Some(a.to_string()),
        (None, Some(b)) => Some(b.to_string()),
        (None, None) => None,
    };

    if let Some(query) = query {
        joined.push('?');
        joined.push_str(&query);
    }

    joined
}

/// Status line and headers of an upstream response.
#[derive(Debug)]
struct ResponseHead {
    status: u16,
    reason: String,
    headers: Headers,
}

/// Reads the status line and headers, skipping interim 1xx responses.
///
/// Returns the head and any body bytes read past it.
async fn read_response_head(stream: &mut TcpStream) -> io::Result<(ResponseHead, BytesMut)> {
    let mut buffer = BytesMut::with_capacity(BUFFER_SIZE);

    loop {
        if let Some(headers_end) = buffer.windows(4).position(|window| window == b"\r\n\r\n") {
            let head = buffer.split_to(headers_end + 4);
            let head = parse_response_head(&head)?;

            if (100..200).contains(&head.status) && head.status != 101 {
                tracing::trace!(status = head.status, "Skipping interim response");
                continue;
            }

            return Ok((head, buffer));
        }

        // Prevent unbounded header growth
        if buffer.len() > MAX_HEAD_SIZE {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "response head too large"));
        }

        buffer.reserve(BUFFER_SIZE);
        let n = stream.read_buf(&mut buffer).await?;

        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before response head received",
            ));
        }
    }
}

fn parse_response_head(head: &[u8]) -> io::Result<ResponseHead> {
    let invalid = |msg: &str| io::Error::new(io::ErrorKind::InvalidData, msg.to_string());

    let head = std::str::from_utf8(head).map_err(|_| invalid("response head is not UTF-8"))?;
    let mut lines = head.split("\r\n");

    // Parse status line
    let status_line = lines.next().ok_or_else(|| invalid("empty response"))?;
    let mut parts = status_line.splitn(3, ' ');

    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/1.") {
        return Err(invalid("invalid status line"));
    }

    let status: u16 = parts
        .next()
        .and_then(|code| code.parse().ok())
        .filter(|code| (100..1000).contains(code))
        .ok_or_else(|| invalid("invalid status code"))?;
    let reason = parts.next().unwrap_or_default().trim().to_string();

    let mut headers = Headers::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }

        if let Some((key, value)) = line.split_once(':') {
            headers.append(key.trim(), value.trim());
        }
    }

    Ok(ResponseHead {
        status,
        reason,
        headers,
    })
}
