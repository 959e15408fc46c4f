use std::sync::Arc;

use rmcp::model as mcp;
use rmcp::service::{Peer, RequestContext};
use rmcp::{RoleServer, Service as McpService};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

use crate::container::ProviderContainer;
use crate::error::ProxyError;
use crate::model::{routing_key, FeatureKind};
use crate::notification_hub::NotificationHub;

/// The single facing MCP server: presents one aggregated tool/resource/
/// prompt list to clients and dispatches calls to whichever Loaded
/// Provider currently owns that name, per spec §4.7.
///
/// One instance is constructed per facing SSE connection (see
/// [`crate::session_driver::SessionDriver`]), so `broadcast_task` is this
/// connection's own guard: started on `initialize`, aborted on `Drop`. This
/// is the RAII-guard lifecycle pattern spec §9's Design Notes calls for in
/// place of the source's nested context managers.
#[derive(Clone)]
pub struct ProxyServer {
    container: Arc<ProviderContainer>,
    broadcast_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ProxyServer {
    pub fn new(container: Arc<ProviderContainer>) -> Self {
        Self {
            container,
            broadcast_task: Arc::new(Mutex::new(None)),
        }
    }

    fn hub(&self) -> Arc<NotificationHub> {
        self.container.hub()
    }

    /// Mints a fresh progress token — the "mint-if-absent" policy spec
    /// §4.7 step 4 requires so upstream progress always has somewhere to go.
    fn mint_progress_token() -> mcp::ProgressToken {
        mcp::ProgressToken(mcp::NumberOrString::String(Uuid::new_v4().to_string().into()))
    }

    /// Spawns the task that relays every upstream progress notification
    /// carrying `token` onto `peer` — the facing client connection that
    /// made the request — for the duration of one dispatched call. Dropping
    /// the returned guard (by aborting it once the call finishes) closes the
    /// Progress subscription, matching spec §4.7 step 6.
    fn spawn_progress_relay(&self, token: mcp::ProgressToken, peer: Peer<RoleServer>) -> JoinHandle<()> {
        let mut subscription = self.hub().subscribe_progress(progress_token_key(&token));
        tokio::spawn(async move {
            while let Some(notification) = subscription.recv().await {
                if let Err(err) = peer.send_notification(notification).await {
                    warn!(target: "proxy_server", error = %err, "failed to relay progress to facing client");
                    return;
                }
            }
        })
    }

    /// Ensures `request.extensions` carries a progress token (reusing the
    /// client's if present, minting one otherwise). `CallToolRequestParam`
    /// and its siblings carry only their wire fields (`name`/`uri`,
    /// `arguments`); the token travels in the request envelope's
    /// `extensions` map instead, the same slot `RequestContext::extensions`
    /// exposes for transport-level metadata (spec §4.7 step 4).
    fn attach_progress_token(extensions: &mut mcp::Extensions) -> mcp::ProgressToken {
        let token = extensions
            .get::<mcp::ProgressToken>()
            .cloned()
            .unwrap_or_else(Self::mint_progress_token);
        extensions.insert(token.clone());
        token
    }

    async fn dispatch_tool_call(
        &self,
        mut request: mcp::CallToolRequest,
        peer: Peer<RoleServer>,
    ) -> Result<mcp::CallToolResult, ProxyError> {
        let name = request.params.name.to_string();
        let key = routing_key(FeatureKind::Tools, &name);
        let routing = self.container.routing_table().await;
        let provider = routing
            .get(&key)
            .ok_or_else(|| ProxyError::NotFound(name.clone()))?;

        let token = Self::attach_progress_token(&mut request.extensions);
        let relay = self.spawn_progress_relay(token, peer);
        let result = provider
            .with_client(|client| {
                let peer = client.peer().clone();
                async move { peer.send_request(mcp::ClientRequest::CallToolRequest(request)).await }
            })
            .await;
        relay.abort();
        match result {
            None => Err(ProxyError::Unavailable(name)),
            Some(Ok(mcp::ServerResult::CallToolResult(r))) => Ok(r),
            Some(Ok(_)) => Err(ProxyError::UpstreamError(name, "unexpected result shape".to_string())),
            Some(Err(e)) => Err(ProxyError::UpstreamError(name, e.to_string())),
        }
    }

    async fn dispatch_read_resource(
        &self,
        mut request: mcp::ReadResourceRequest,
        peer: Peer<RoleServer>,
    ) -> Result<mcp::ReadResourceResult, ProxyError> {
        let uri = request.params.uri.clone();
        let key = routing_key(FeatureKind::Resources, &uri);
        let routing = self.container.routing_table().await;
        let provider = routing
            .get(&key)
            .ok_or_else(|| ProxyError::NotFound(uri.clone()))?;

        let token = Self::attach_progress_token(&mut request.extensions);
        let relay = self.spawn_progress_relay(token, peer);
        let result = provider
            .with_client(|client| {
                let peer = client.peer().clone();
                async move { peer.send_request(mcp::ClientRequest::ReadResourceRequest(request)).await }
            })
            .await;
        relay.abort();
        match result {
            None => Err(ProxyError::Unavailable(uri)),
            Some(Ok(mcp::ServerResult::ReadResourceResult(r))) => Ok(r),
            Some(Ok(_)) => Err(ProxyError::UpstreamError(uri, "unexpected result shape".to_string())),
            Some(Err(e)) => Err(ProxyError::UpstreamError(uri, e.to_string())),
        }
    }

    async fn dispatch_get_prompt(
        &self,
        mut request: mcp::GetPromptRequest,
        peer: Peer<RoleServer>,
    ) -> Result<mcp::GetPromptResult, ProxyError> {
        let name = request.params.name.to_string();
        let key = routing_key(FeatureKind::Prompts, &name);
        let routing = self.container.routing_table().await;
        let provider = routing
            .get(&key)
            .ok_or_else(|| ProxyError::NotFound(name.clone()))?;

        let token = Self::attach_progress_token(&mut request.extensions);
        let relay = self.spawn_progress_relay(token, peer);
        let result = provider
            .with_client(|client| {
                let peer = client.peer().clone();
                async move { peer.send_request(mcp::ClientRequest::GetPromptRequest(request)).await }
            })
            .await;
        relay.abort();
        match result {
            None => Err(ProxyError::Unavailable(name)),
            Some(Ok(mcp::ServerResult::GetPromptResult(r))) => Ok(r),
            Some(Ok(_)) => Err(ProxyError::UpstreamError(name, "unexpected result shape".to_string())),
            Some(Err(e)) => Err(ProxyError::UpstreamError(name, e.to_string())),
        }
    }

    /// Installs this connection's Broadcast subscription: every non-progress
    /// notification from every upstream, relayed onto `peer` for as long as
    /// the connection lives. Called once, from the `initialize` handler,
    /// since that is the first point a facing connection's `peer` is
    /// available — spec §4.8 step 2.
    async fn install_broadcast_relay(&self, peer: Peer<RoleServer>) {
        let mut subscription = self.hub().subscribe_broadcast();
        let task = tokio::spawn(async move {
            while let Some(notification) = subscription.recv().await {
                if peer.send_notification(notification).await.is_err() {
                    return;
                }
            }
        });
        *self.broadcast_task.lock().await = Some(task);
    }
}

impl Drop for ProxyServer {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.broadcast_task.try_lock() {
            if let Some(task) = guard.take() {
                task.abort();
            }
        }
    }
}

/// The key a Progress subscription is scoped to. Matches
/// [`crate::notification_hub`]'s own extraction of a notification's token
/// (`progress_token.0.to_string()`) so the two sides compare equal.
fn progress_token_key(token: &mcp::ProgressToken) -> String {
    token.0.to_string()
}

impl McpService<RoleServer> for ProxyServer {
    async fn handle_request(
        &self,
        request: mcp::ClientRequest,
        context: RequestContext<RoleServer>,
    ) -> Result<mcp::ServerResult, mcp::ErrorData> {
        match request {
            mcp::ClientRequest::InitializeRequest(_req) => {
                self.install_broadcast_relay(context.peer.clone()).await;
                let capabilities = mcp::ServerCapabilities::builder()
                    .enable_tools()
                    .enable_tool_list_changed()
                    .enable_resources()
                    .enable_resource_list_changed()
                    .enable_prompts()
                    .enable_prompt_list_changed()
                    .build();
                Ok(mcp::ServerResult::InitializeResult(mcp::InitializeResult {
                    protocol_version: mcp::ProtocolVersion::V_2025_03_26,
                    capabilities,
                    server_info: mcp::Implementation {
                        name: "mcp-proxy".into(),
                        title: None,
                        version: env!("CARGO_PKG_VERSION").into(),
                        icons: None,
                        website_url: None,
                    },
                    instructions: None,
                }))
            }
            mcp::ClientRequest::ListToolsRequest(_req) => {
                Ok(mcp::ServerResult::ListToolsResult(mcp::ListToolsResult {
                    tools: self.container.aggregate_tools().await,
                    next_cursor: None,
                }))
            }
            mcp::ClientRequest::ListResourcesRequest(_req) => Ok(mcp::ServerResult::ListResourcesResult(
                mcp::ListResourcesResult {
                    resources: self.container.aggregate_resources().await,
                    next_cursor: None,
                },
            )),
            mcp::ClientRequest::ListPromptsRequest(_req) => {
                Ok(mcp::ServerResult::ListPromptsResult(mcp::ListPromptsResult {
                    prompts: self.container.aggregate_prompts().await,
                    next_cursor: None,
                }))
            }
            mcp::ClientRequest::CallToolRequest(req) => self
                .dispatch_tool_call(req, context.peer.clone())
                .await
                .map(mcp::ServerResult::CallToolResult)
                .map_err(ProxyError::into_error_data),
            mcp::ClientRequest::ReadResourceRequest(req) => self
                .dispatch_read_resource(req, context.peer.clone())
                .await
                .map(mcp::ServerResult::ReadResourceResult)
                .map_err(ProxyError::into_error_data),
            mcp::ClientRequest::GetPromptRequest(req) => self
                .dispatch_get_prompt(req, context.peer.clone())
                .await
                .map(mcp::ServerResult::GetPromptResult)
                .map_err(ProxyError::into_error_data),
            _ => Err(ProxyError::NotFound("unsupported method".to_string()).into_error_data()),
        }
    }

    async fn handle_notification(
        &self,
        _notification: mcp::ClientNotification,
        _context: rmcp::service::NotificationContext<RoleServer>,
    ) -> Result<(), mcp::ErrorData> {
        Ok(())
    }

    fn get_info(&self) -> mcp::ServerInfo {
        mcp::ServerInfo {
            protocol_version: mcp::ProtocolVersion::V_2025_03_26,
            capabilities: mcp::ServerCapabilities::builder()
                .enable_tools()
                .enable_tool_list_changed()
                .enable_resources()
                .enable_resource_list_changed()
                .enable_prompts()
                .enable_prompt_list_changed()
                .build(),
            server_info: mcp::Implementation {
                name: "mcp-proxy".into(),
                title: None,
                version: env!("CARGO_PKG_VERSION").into(),
                icons: None,
                website_url: None,
            },
            instructions: None,
        }
    }
}
