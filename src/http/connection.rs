use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::ProxyError;
use crate::http::parser::{ParseError, RequestReader};
use crate::http::request::Request;
use crate::http::response::{Response, StatusCode};
use crate::http::writer::ResponseWriter;
use crate::proxy::LoadBalancer;

pub struct Connection {
    stream: TcpStream,
    peer: Option<SocketAddr>,
    buffer: Vec<u8>,
    reader: RequestReader,
    state: ConnectionState,
    balancer: Arc<LoadBalancer>,
    max_body: usize,
}

const CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

pub enum ConnectionState {
    Reading,
    Processing(Request),
    Writing(ResponseWriter, bool), // bool = keep_alive?
    Closed,
}

/// Outcome of trying to read one request off the socket.
enum ReadOutcome {
    Request(Request),
    /// The request could not be read; answer with this and close
    Rejected(Response),
    Eof,
}

impl Connection {
    pub fn new(stream: TcpStream, balancer: Arc<LoadBalancer>, max_body: usize) -> Self {
        let peer = stream.peer_addr().ok();
        Self {
            stream,
            peer,
            buffer: Vec::with_capacity(4096),
            reader: RequestReader::new(max_body),
            state: ConnectionState::Reading,
            balancer,
            max_body,
        }
    }

    pub async fn run(&mut self) -> anyhow::Result<()> {
        loop {
            let state = std::mem::replace(&mut self.state, ConnectionState::Closed);

            self.state = match state {
                ConnectionState::Reading => match self.read_request().await? {
                    ReadOutcome::Request(req) => ConnectionState::Processing(req),
                    ReadOutcome::Rejected(response) => {
                        ConnectionState::Writing(ResponseWriter::new(response), false)
                    }
                    ReadOutcome::Eof => ConnectionState::Closed,
                },

                ConnectionState::Processing(req) => {
                    let client_keep_alive = req.keep_alive();
                    let http10 = req.version == "HTTP/1.0";
                    let mut response = self.balancer.handle(req).await;

                    // HTTP/1.0 has no chunked coding; send the raw bytes and close
                    let downgraded = http10
                        && response.body.is_streaming()
                        && response.headers.has_token("Transfer-Encoding", "chunked");
                    if downgraded {
                        response.headers.remove("Transfer-Encoding");
                        response.headers.set("Connection", "close");
                    }

                    let keep_alive = client_keep_alive && response.is_delimited();
                    if !keep_alive && !response.headers.contains("Connection") {
                        response.headers.set("Connection", "close");
                    }

                    ConnectionState::Writing(ResponseWriter::new(response), keep_alive)
                }

                ConnectionState::Writing(mut writer, keep_alive) => {
                    writer.write_to_stream(&mut self.stream).await?;

                    if keep_alive {
                        ConnectionState::Reading // go back for next request
                    } else {
                        ConnectionState::Closed
                    }
                }

                ConnectionState::Closed => {
                    break;
                }
            };
        }

        Ok(())
    }

    async fn read_request(&mut self) -> anyhow::Result<ReadOutcome> {
        loop {
            // Try parsing whatever we already have
            match self.reader.advance(&self.buffer) {
                Ok((mut request, consumed)) => {
                    self.buffer.drain(..consumed);
                    request.remote_addr = self.peer;
                    return Ok(ReadOutcome::Request(request));
                }

                Err(ParseError::Incomplete) => {
                    // Need more data; a client waiting on 100-continue gets it now
                    if self.reader.take_continue() {
                        self.stream.write_all(CONTINUE).await?;
                        self.stream.flush().await?;
                    }
                }

                Err(ParseError::BodyTooLarge) => {
                    let err = ProxyError::BodyTooLarge { limit: self.max_body };
                    tracing::warn!(peer = ?self.peer, error = %err, "Rejecting request");
                    return Ok(ReadOutcome::Rejected(err.to_response()));
                }

                Err(e) if e.is_body_error() => {
                    let err = ProxyError::ClientBody(format!("{e:?}"));
                    tracing::warn!(peer = ?self.peer, error = %err, "Rejecting request");
                    return Ok(ReadOutcome::Rejected(err.to_response()));
                }

                Err(e) => {
                    tracing::warn!(peer = ?self.peer, error = ?e, "Malformed request");
                    return Ok(ReadOutcome::Rejected(Response::text(
                        StatusCode::BadRequest,
                        "Bad Request",
                    )));
                }
            }

            // Read more data
            let mut temp = [0u8; 4096];
            let n = self.stream.read(&mut temp).await?;

            if n == 0 {
                if self.buffer.is_empty() {
                    // Client closed connection between requests
                    return Ok(ReadOutcome::Eof);
                }

                // Closed mid-request; the body can never be completed
                let err = ProxyError::ClientBody("connection closed mid-request".into());
                tracing::debug!(peer = ?self.peer, error = %err, "Rejecting request");
                return Ok(ReadOutcome::Rejected(err.to_response()));
            }

            self.buffer.extend_from_slice(&temp[..n]);
        }
    }
}
