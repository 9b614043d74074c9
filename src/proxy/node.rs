//! Backend nodes and priority selection
//!
//! Nodes are registered once during setup. While serving, the selector is
//! only read: every request scans the nodes in registration order and takes
//! the first one whose rate limiter admits it.

use std::sync::Arc;
use url::Url;

use crate::config::NodeConfig;
use crate::error::{ProxyError, Result};
use crate::proxy::limiter::{Clock, RateLimit, RateLimiter, SystemClock};

/// A backend target with its rate-limit state.
#[derive(Debug)]
pub struct Node {
    target: Url,
    name: Option<String>,
    limiter: RateLimiter,
}

impl Node {
    /// Validates `address` and creates a node with a fresh window.
    pub fn new(
        address: &str,
        name: Option<String>,
        limit: RateLimit,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let invalid = |reason: &str| ProxyError::InvalidAddress {
            address: address.to_string(),
            reason: reason.to_string(),
        };

        let target = Url::parse(address).map_err(|e| invalid(&e.to_string()))?;

        if target.scheme() != "http" {
            return Err(invalid("only http:// backends are supported"));
        }
        if target.host_str().is_none() {
            return Err(invalid("missing host"));
        }

        Ok(Self {
            target,
            name,
            limiter: RateLimiter::with_clock(limit, clock),
        })
    }

    pub fn target(&self) -> &Url {
        &self.target
    }

    /// Get a display name for the node (name or URL)
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.target.as_str())
    }

    pub fn limit(&self) -> RateLimit {
        self.limiter.limit()
    }

    /// Charges the request against this node's window if it fits.
    pub fn admit(&self, body_size: u64) -> bool {
        self.limiter.admit(body_size)
    }
}

/// Ordered list of nodes, highest priority first.
pub struct Selector {
    nodes: Vec<Node>,
    clock: Arc<dyn Clock>,
}

impl Default for Selector {
    fn default() -> Self {
        Self::new()
    }
}

impl Selector {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Nodes registered on this selector read time from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            nodes: Vec::new(),
            clock,
        }
    }

    /// Builds a selector from configuration, keeping the configured order.
    pub fn from_config(configs: &[NodeConfig]) -> Result<Self> {
        let mut selector = Self::new();
        for cfg in configs {
            selector.register_named(
                &cfg.url,
                cfg.name.clone(),
                RateLimit::new(cfg.bytes_per_minute, cfg.requests_per_minute),
            )?;
        }
        Ok(selector)
    }

    /// Appends a node with the lowest priority so far.
    ///
    /// A failed registration leaves the existing nodes untouched.
    pub fn register(&mut self, address: &str, limit: RateLimit) -> Result<()> {
        self.register_named(address, None, limit)
    }

    pub fn register_named(
        &mut self,
        address: &str,
        name: Option<String>,
        limit: RateLimit,
    ) -> Result<()> {
        let node = Node::new(address, name, limit, self.clock.clone())?;

        tracing::info!(
            node = node.display_name(),
            priority = self.nodes.len(),
            bytes_per_minute = limit.bytes_per_minute,
            requests_per_minute = limit.requests_per_minute,
            "Registered node"
        );

        self.nodes.push(node);
        Ok(())
    }

    /// Returns the first node, in registration order, that admits a request
    /// of `body_size` bytes.
    pub fn pick(&self, body_size: u64) -> Option<&Node> {
        self.nodes.iter().find(|node| node.admit(body_size))
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::limiter::ManualClock;
    use std::time::Duration;

    fn picked(selector: &Selector, body_size: u64) -> Option<&str> {
        selector.pick(body_size).map(|n| n.target().as_str())
    }

    #[test]
    fn rpm_exhaustion_spills_to_next_node() {
        let mut selector = Selector::new();
        selector.register("http://node-a:8081", RateLimit::new(1000, 3)).unwrap();
        selector.register("http://node-b:8082", RateLimit::new(1000, 5)).unwrap();

        for _ in 0..3 {
            assert_eq!(picked(&selector, 4), Some("http://node-a:8081/"));
        }
        assert_eq!(picked(&selector, 4), Some("http://node-b:8082/"));
    }

    #[test]
    fn byte_exhaustion_spills_to_next_node() {
        let mut selector = Selector::new();
        selector.register("http://node-a", RateLimit::new(100, 100)).unwrap();
        selector.register("http://node-b", RateLimit::new(200, 100)).unwrap();

        assert_eq!(picked(&selector, 99), Some("http://node-a/"));
        assert_eq!(picked(&selector, 99), Some("http://node-b/"));
    }

    #[test]
    fn single_node_byte_budget_rejects_second_request() {
        let mut selector = Selector::new();
        selector.register("http://node-a", RateLimit::new(100, 100)).unwrap();

        assert!(selector.pick(99).is_some());
        assert!(selector.pick(99).is_none());
    }

    #[test]
    fn all_nodes_exhausted_returns_none() {
        let mut selector = Selector::new();
        selector.register("http://node-a", RateLimit::new(10, 1)).unwrap();
        selector.register("http://node-b", RateLimit::new(10, 1)).unwrap();

        assert_eq!(picked(&selector, 4), Some("http://node-a/"));
        assert_eq!(picked(&selector, 4), Some("http://node-b/"));
        assert_eq!(picked(&selector, 4), None);
    }

    #[test]
    fn earlier_node_regains_priority_after_reset() {
        let clock = Arc::new(ManualClock::new());
        let mut selector = Selector::with_clock(clock.clone());
        selector.register("http://node-a", RateLimit::new(1000, 1)).unwrap();
        selector.register("http://node-b", RateLimit::new(1000, 10)).unwrap();

        assert_eq!(picked(&selector, 0), Some("http://node-a/"));
        assert_eq!(picked(&selector, 0), Some("http://node-b/"));

        clock.advance(Duration::from_secs(60));
        assert_eq!(picked(&selector, 0), Some("http://node-a/"));
    }

    #[test]
    fn invalid_address_does_not_disturb_existing_nodes() {
        let mut selector = Selector::new();
        selector.register("http://node-a", RateLimit::new(1000, 1)).unwrap();

        for bad in ["not a url", "/relative/path", "https://node-b", "unix:/tmp/sock"] {
            let err = selector.register(bad, RateLimit::new(1000, 1)).unwrap_err();
            assert!(matches!(err, ProxyError::InvalidAddress { .. }), "{bad}");
        }

        assert_eq!(selector.len(), 1);
        assert_eq!(picked(&selector, 0), Some("http://node-a/"));
    }

    #[test]
    fn from_config_keeps_order_and_names() {
        let configs = vec![
            NodeConfig {
                url: "http://localhost:8081".into(),
                name: Some("echo-1".into()),
                bytes_per_minute: 1000,
                requests_per_minute: 60,
            },
            NodeConfig {
                url: "http://localhost:8082".into(),
                name: None,
                bytes_per_minute: 2000,
                requests_per_minute: 120,
            },
        ];

        let selector = Selector::from_config(&configs).unwrap();
        let names: Vec<_> = selector.nodes().iter().map(Node::display_name).collect();

        assert_eq!(names, vec!["echo-1", "http://localhost:8082/"]);
        assert_eq!(selector.nodes()[1].limit(), RateLimit::new(2000, 120));
    }
}
