use std::net::SocketAddr;
use std::sync::Arc;

use rmcp::transport::sse_server::SseServer;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::container::ProviderContainer;
use crate::proxy_server::ProxyServer;

/// Drives the facing MCP surface: binds the listen address, accepts SSE
/// sessions, and serves the aggregated [`ProxyServer`] on each one.
/// Spec §4.8 calls for SSE specifically (not the Streamable HTTP path the
/// teacher primarily exercises) — grounded on the `transport-sse-server`
/// feature already present in the dependency surface, and on the original
/// Starlette `/sse` route's structure (accept, construct a per-connection
/// session, tear down on disconnect).
pub struct SessionDriver {
    container: Arc<ProviderContainer>,
}

impl SessionDriver {
    pub fn new(container: Arc<ProviderContainer>) -> Self {
        Self { container }
    }

    /// Runs until `shutdown` fires, serving every accepted SSE connection
    /// with its own [`ProxyServer`] handle (cheap: it's just an `Arc`
    /// clone around the shared container).
    pub async fn serve(
        &self,
        listen_addr: SocketAddr,
        shutdown: CancellationToken,
    ) -> anyhow::Result<()> {
        info!(target: "session_driver", %listen_addr, "facing SSE server listening");
        let container = self.container.clone();
        let server = SseServer::serve(listen_addr)
            .await?
            .with_service(move || ProxyServer::new(container.clone()));

        shutdown.cancelled().await;
        server.cancel();
        info!(target: "session_driver", "facing SSE server stopped");
        Ok(())
    }
}
