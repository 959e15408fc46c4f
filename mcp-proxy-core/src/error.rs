use rmcp::model::ErrorData;

/// The taxonomy a dispatched request or a provider operation can fail with.
///
/// `NotFound`/`Unavailable`/`Timeout` map to client-correctable conditions,
/// `TransportBroken`/`UpstreamError` describe provider misbehavior, and
/// `Configuration`/`Fatal` are operator-facing.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("no provider offers '{0}'")]
    NotFound(String),

    #[error("provider for '{0}' is not ready")]
    Unavailable(String),

    #[error("request to '{0}' timed out")]
    Timeout(String),

    #[error("transport to provider '{0}' is broken: {1}")]
    TransportBroken(String, String),

    #[error("upstream provider '{0}' returned an error: {1}")]
    UpstreamError(String, String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("fatal error: {0}")]
    Fatal(String),
}

impl ProxyError {
    /// Maps each kind to the MCP JSON-RPC error code closest in meaning,
    /// per the propagation policy: callers see an ordinary MCP error, never
    /// an internal Rust type or panic.
    pub fn into_error_data(self) -> ErrorData {
        match self {
            ProxyError::NotFound(msg) => {
                ErrorData::invalid_params(format!("not found: {msg}"), None)
            }
            ProxyError::Unavailable(msg) => {
                ErrorData::internal_error(format!("unavailable: {msg}"), None)
            }
            ProxyError::Timeout(msg) => ErrorData::internal_error(format!("timeout: {msg}"), None),
            ProxyError::TransportBroken(server, msg) => {
                ErrorData::internal_error(format!("transport broken for {server}: {msg}"), None)
            }
            ProxyError::UpstreamError(server, msg) => {
                ErrorData::internal_error(format!("{server}: {msg}"), None)
            }
            ProxyError::Configuration(msg) => {
                ErrorData::invalid_params(format!("configuration: {msg}"), None)
            }
            ProxyError::Fatal(msg) => ErrorData::internal_error(format!("fatal: {msg}"), None),
        }
    }
}
