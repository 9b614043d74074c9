//! Sluice - rate-limited HTTP load balancer
//!
//! Requests go to the first backend node, in registration order, whose
//! per-minute request and byte budget still has room. Server-sent event
//! streams are relayed chunk by chunk.

pub mod config;
pub mod error;
pub mod http;
pub mod proxy;
pub mod server;

pub use error::{ProxyError, Result};
