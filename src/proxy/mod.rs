//! Rate-limited reverse proxying
//!
//! This module holds the per-node rate limiting, priority node selection and
//! request forwarding.

pub mod balancer;
pub mod limiter;
pub mod node;
pub mod upstream;

pub use balancer::LoadBalancer;
pub use limiter::{Clock, ManualClock, RateLimit, RateLimiter, SystemClock};
pub use node::{Node, Selector};
pub use upstream::ProxyAdapter;
