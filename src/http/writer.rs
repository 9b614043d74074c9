use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::http::body::{Body, Framing};
use crate::http::chunked::{encode_chunk, LAST_CHUNK};
use crate::http::response::Response;

const HTTP_VERSION: &str = "HTTP/1.1";

fn serialize_head(resp: &Response) -> Vec<u8> {
    let mut buf = Vec::new();

    // Status line
    let status_line = format!(
        "{} {} {}\r\n",
        HTTP_VERSION,
        resp.status.as_u16(),
        resp.reason_phrase()
    );
    buf.extend_from_slice(status_line.as_bytes());

    // Headers
    for (k, v) in resp.headers.iter() {
        buf.extend_from_slice(k.as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(v.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }

    // Header/body separator
    buf.extend_from_slice(b"\r\n");

    buf
}

/// Writes a response to the client.
///
/// Streaming bodies are forwarded piece by piece with a flush after each
/// piece. If the response advertises `Transfer-Encoding: chunked`, every
/// piece is framed as a chunk; otherwise bytes go out as received.
pub struct ResponseWriter {
    response: Response,
}

impl ResponseWriter {
    pub fn new(response: Response) -> Self {
        Self { response }
    }

    pub async fn write_to_stream<W>(&mut self, stream: &mut W) -> anyhow::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        stream.write_all(&serialize_head(&self.response)).await?;

        match &mut self.response.body {
            Body::Full(bytes) => {
                stream.write_all(bytes).await?;
            }

            // HEAD, 1xx, 204 and 304 keep their framing headers but send nothing
            Body::Streaming(body) if body.framing() == Framing::Empty => {}

            Body::Streaming(body) => {
                let chunked = self.response.headers.has_token("Transfer-Encoding", "chunked");
                stream.flush().await?;

                while let Some(piece) = body.next_chunk().await? {
                    if piece.is_empty() {
                        continue;
                    }

                    if chunked {
                        stream.write_all(&encode_chunk(&piece)).await?;
                    } else {
                        stream.write_all(&piece).await?;
                    }
                    stream.flush().await?;
                }

                if chunked {
                    stream.write_all(LAST_CHUNK).await?;
                }
            }
        }

        stream.flush().await?;
        Ok(())
    }
}
