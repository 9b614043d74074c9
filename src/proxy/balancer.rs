use crate::error::{ProxyError, Result};
use crate::http::request::Request;
use crate::http::response::Response;
use crate::proxy::node::Selector;
use crate::proxy::upstream::ProxyAdapter;

/// Request pipeline: pick an admitting node, then forward to it.
pub struct LoadBalancer {
    selector: Selector,
    adapter: ProxyAdapter,
}

impl LoadBalancer {
    pub fn new(selector: Selector, adapter: ProxyAdapter) -> Self {
        Self { selector, adapter }
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    /// Fails when there is nothing to balance across.
    pub fn ensure_nodes(&self) -> Result<()> {
        if self.selector.is_empty() {
            return Err(ProxyError::NoNodes);
        }
        Ok(())
    }

    /// Handles one fully buffered request.
    ///
    /// Quota consumed by admission is kept even if forwarding then fails.
    pub async fn handle(&self, request: Request) -> Response {
        let body_size = request.body.len() as u64;

        let Some(node) = self.selector.pick(body_size) else {
            tracing::warn!(
                method = request.method.as_str(),
                path = %request.path,
                body_size,
                "Every node is rate limited"
            );
            return ProxyError::RateLimitExceeded.to_response();
        };

        match self.adapter.forward(&request, node).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    method = request.method.as_str(),
                    path = %request.path,
                    "Forward failed"
                );
                e.to_response()
            }
        }
    }
}
