//! HTTP protocol implementation.
//!
//! A small HTTP/1.1 server and client codec for the load balancer, with
//! support for keep-alive connections and streamed responses.
//!
//! # Architecture
//!
//! - **`connection`**: The per-client request-response state machine
//! - **`parser`**: Parses incoming requests, buffering the whole body
//! - **`request`**: HTTP request representation
//! - **`response`**: HTTP response representation with builder pattern
//! - **`headers`**: Ordered, case-insensitive header list
//! - **`body`**: Buffered and streaming bodies
//! - **`chunked`**: Chunked transfer coding
//! - **`writer`**: Serializes and writes responses, flushing streamed pieces
//!
//! # Connection State Machine
//!
//! ```text
//!        ┌─────────────┐
//!        │   Reading   │ ← Wait for a complete request (body included)
//!        └──────┬──────┘
//!               │ Request received
//!               ▼
//!        ┌──────────────────┐
//!        │   Processing     │ ← Select a node and forward
//!        └──────┬───────────┘
//!               │ Response head ready
//!               ▼
//!        ┌──────────────────┐
//!        │    Writing       │ ← Send head, then stream the body
//!        └──────┬───────────┘
//!               │ Response sent
//!               ├─ Keep-Alive → Reading (same connection)
//!               └─ Close → Closed
//! ```
//!
//! A request that cannot be read is answered with a 4xx response straight
//! from `Reading` and the connection is closed.

pub mod body;
pub mod chunked;
pub mod connection;
pub mod headers;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;

/// Media type of server-sent event streams.
pub const EVENT_STREAM: &str = "text/event-stream";
