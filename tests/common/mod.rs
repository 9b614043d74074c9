//! Test backends and a minimal client for end-to-end balancer tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, Notify};

use sluice::http::chunked::{encode_chunk, parse_chunk, Chunk, LAST_CHUNK};
use sluice::http::headers::Headers;
use sluice::http::parser::{parse_http_request, ParseError};
use sluice::http::request::Request;
use sluice::proxy::{LoadBalancer, ProxyAdapter, RateLimit, Selector};

pub const MAX_BODY: usize = 1024 * 1024;

pub struct Backend {
    pub addr: SocketAddr,
    hits: Arc<AtomicUsize>,
}

impl Backend {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Number of requests this backend has received.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

/// Spawns a backend that answers every request with `respond(request)`.
pub async fn spawn_backend<F>(respond: F) -> Backend
where
    F: Fn(&Request) -> Vec<u8> + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let respond = Arc::new(respond);

    let counter = hits.clone();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let respond = respond.clone();
            let counter = counter.clone();
            tokio::spawn(async move {
                if let Some(request) = read_request(&mut socket).await {
                    counter.fetch_add(1, Ordering::SeqCst);
                    let _ = socket.write_all(&respond(&request)).await;
                    let _ = socket.shutdown().await;
                }
            });
        }
    });

    Backend { addr, hits }
}

/// Backend that replies `{name}|{body}` and reports what it saw in headers.
pub async fn spawn_echo(name: &'static str) -> Backend {
    spawn_backend(move |req| {
        let body = format!("{}|{}", name, String::from_utf8_lossy(&req.body));
        format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nX-Seen-Method: {}\r\nX-Seen-Path: {}\r\nX-Seen-Accept: {}\r\nX-Seen-Cache-Control: {}\r\n\r\n{}",
            body.len(),
            req.method.as_str(),
            req.path,
            req.header("Accept").unwrap_or("-"),
            req.header("Cache-Control").unwrap_or("-"),
            body
        )
        .into_bytes()
    })
    .await
}

/// Backend that streams five server-sent events as separate chunks.
///
/// With a `gate`, the backend sends the first event and then waits for the
/// gate to be notified before sending the rest.
pub async fn spawn_sse(name: &'static str, gate: Option<Arc<Notify>>) -> Backend {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));

    let counter = hits.clone();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let counter = counter.clone();
            let gate = gate.clone();
            tokio::spawn(async move {
                if read_request(&mut socket).await.is_none() {
                    return;
                }
                counter.fetch_add(1, Ordering::SeqCst);

                let head = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nCache-Control: no-cache\r\nConnection: keep-alive\r\nTransfer-Encoding: chunked\r\n\r\n";
                if socket.write_all(head.as_bytes()).await.is_err() {
                    return;
                }

                for i in 0..5 {
                    let event = format!("data: {{\"message\": \"{} event {}\"}}\n\n", name, i);
                    if socket.write_all(&encode_chunk(event.as_bytes())).await.is_err() {
                        return;
                    }
                    let _ = socket.flush().await;

                    match (&gate, i) {
                        (Some(gate), 0) => gate.notified().await,
                        _ => tokio::time::sleep(Duration::from_millis(20)).await,
                    }
                }

                let _ = socket.write_all(LAST_CHUNK).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    Backend { addr, hits }
}

/// Backend that streams events every 20ms until a write fails.
///
/// The receiver fires once the backend notices its peer has gone away.
pub async fn spawn_endless_sse(name: &'static str) -> (Backend, oneshot::Receiver<usize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = oneshot::channel();

    let counter = hits.clone();
    tokio::spawn(async move {
        let Ok((mut socket, _)) = listener.accept().await else {
            return;
        };
        if read_request(&mut socket).await.is_none() {
            return;
        }
        counter.fetch_add(1, Ordering::SeqCst);

        let head = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nTransfer-Encoding: chunked\r\n\r\n";
        let mut written = 0;
        let mut result = socket.write_all(head.as_bytes()).await;

        // Bounded so a stuck test fails instead of hanging
        while result.is_ok() && written < 1000 {
            let event = format!("data: {} event {}\n\n", name, written);
            result = socket.write_all(&encode_chunk(event.as_bytes())).await;
            written += 1;
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        if result.is_err() {
            let _ = tx.send(written);
        }
    });

    (Backend { addr, hits }, rx)
}

/// An address nothing is listening on.
pub async fn dead_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

pub async fn read_request(socket: &mut TcpStream) -> Option<Request> {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 4096];

    loop {
        match parse_http_request(&buf) {
            Ok((request, _)) => return Some(request),
            Err(ParseError::Incomplete) => {}
            Err(_) => return None,
        }

        let n = socket.read(&mut tmp).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&tmp[..n]);
    }
}

/// Builds a selector from `(url, bytes_per_minute, requests_per_minute)`.
pub fn selector(nodes: &[(String, u64, u64)]) -> Selector {
    let mut selector = Selector::new();
    for (url, bpm, rpm) in nodes {
        selector.register(url, RateLimit::new(*bpm, *rpm)).unwrap();
    }
    selector
}

/// Serves `selector` on an ephemeral port.
pub async fn spawn_balancer(selector: Selector) -> SocketAddr {
    spawn_balancer_with_limit(selector, MAX_BODY).await
}

pub async fn spawn_balancer_with_limit(selector: Selector, max_body: usize) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let adapter = ProxyAdapter::new(Duration::from_secs(2), Duration::from_secs(5));
    let balancer = Arc::new(LoadBalancer::new(selector, adapter));

    tokio::spawn(sluice::server::serve(listener, balancer, max_body));
    addr
}

#[derive(Debug)]
pub struct TestResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl TestResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

pub fn post(path: &str, body: &[u8]) -> Vec<u8> {
    let mut raw = format!(
        "POST {} HTTP/1.1\r\nHost: lb\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        path,
        body.len()
    )
    .into_bytes();
    raw.extend_from_slice(body);
    raw
}

pub fn get_event_stream(path: &str) -> Vec<u8> {
    format!(
        "GET {} HTTP/1.1\r\nHost: lb\r\nAccept: text/event-stream\r\nConnection: close\r\n\r\n",
        path
    )
    .into_bytes()
}

/// Sends raw bytes and reads until the balancer closes the connection.
pub async fn send_raw(addr: SocketAddr, raw: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(raw).await.unwrap();

    let mut buf = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), stream.read_to_end(&mut buf))
        .await
        .expect("balancer did not close the connection")
        .unwrap();
    buf
}

pub async fn send(addr: SocketAddr, raw: &[u8]) -> TestResponse {
    parse_response(&send_raw(addr, raw).await)
}

/// Parses the first response in `buf`, decoding a chunked body.
pub fn parse_response(buf: &[u8]) -> TestResponse {
    let head_end = buf
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("no response head");
    let head = std::str::from_utf8(&buf[..head_end]).unwrap();
    let mut lines = head.split("\r\n");

    let status = lines
        .next()
        .and_then(|line| line.split(' ').nth(1))
        .and_then(|code| code.parse().ok())
        .expect("bad status line");

    let headers: Headers = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim(), v.trim()))
        .collect();

    let raw_body = &buf[head_end + 4..];
    let body = if headers.has_token("Transfer-Encoding", "chunked") {
        let mut body = Vec::new();
        let mut offset = 0;
        loop {
            match parse_chunk(&raw_body[offset..]).unwrap().expect("truncated chunked body") {
                (Chunk::Data { start, len }, used) => {
                    body.extend_from_slice(&raw_body[offset + start..offset + start + len]);
                    offset += used;
                }
                (Chunk::Last, _) => break,
            }
        }
        body
    } else {
        raw_body.to_vec()
    };

    TestResponse {
        status,
        headers,
        body,
    }
}
