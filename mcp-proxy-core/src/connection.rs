use rmcp::service::{RoleClient, Service};
use rmcp::transport::sse_client::SseClientConfig;
use rmcp::transport::{SseClientTransport, TokioChildProcess};
use rmcp::ServiceExt;

use anyhow::{anyhow, Context, Result};

use crate::model::ProviderDescriptor;

/// A live upstream MCP session, the Connection Factory's product.
pub type ProviderClient = rmcp::service::RunningService<RoleClient, ()>;

/// Builds a fresh upstream connection for a descriptor, served by the
/// no-op handler. The connection is stateless with respect to prior
/// sessions — every call spawns a new subprocess or opens a new SSE
/// stream, matching `LoadedProvider._initialize_session`'s
/// "always discard, always rebuild" reconnection policy.
pub async fn connect(descriptor: &ProviderDescriptor) -> Result<ProviderClient> {
    connect_with_handler(descriptor, ()).await
}

/// Same as [`connect`], but served by a caller-supplied handler so the
/// Loaded Provider can receive upstream notifications instead of
/// discarding them.
pub async fn connect_with_handler<H>(
    descriptor: &ProviderDescriptor,
    handler: H,
) -> Result<rmcp::service::RunningService<RoleClient, H>>
where
    H: Service<RoleClient> + Send + 'static,
{
    match descriptor {
        ProviderDescriptor::Uvx {
            location,
            executable_command,
        } => {
            let executable = if executable_command.is_empty() {
                discover_uvx_command(location).await?
            } else {
                executable_command.clone()
            };
            let mut command = tokio::process::Command::new("uvx");
            command.args(["--from", location, &executable]);
            let transport = TokioChildProcess::new(command)
                .with_context(|| format!("spawning uvx provider {location}"))?;
            handler
                .serve(transport)
                .await
                .with_context(|| format!("initializing session with {descriptor}"))
        }
        ProviderDescriptor::RemoteMcp { location } => {
            let client = reqwest::Client::builder()
                .build()
                .context("building http client for remote provider")?;
            let transport = SseClientTransport::start_with_client(
                client,
                SseClientConfig {
                    sse_endpoint: location.clone().into(),
                    ..Default::default()
                },
            )
            .await
            .with_context(|| format!("opening SSE stream to {location}"))?;
            handler
                .serve(transport)
                .await
                .with_context(|| format!("initializing session with {descriptor}"))
        }
    }
}

/// When a `uvx` provider has no explicit `executable_command`, discover it
/// by asking `uvx` to run a command that can't exist: the resulting error
/// text names the package's real entry points, e.g.
/// `provided by package "foo":\n- foo-cli`. This mirrors the probing trick
/// `UvxProvider.get_connection` uses in the system this proxy generalizes.
pub async fn discover_uvx_command(location: &str) -> Result<String> {
    let output = tokio::process::Command::new("uvx")
        .args(["--from", location, "_nonexistent_command"])
        .output()
        .await
        .with_context(|| format!("probing uvx package {location}"))?;
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let combined = format!("{stdout}\n{stderr}");
    parse_provided_by(&combined)
        .ok_or_else(|| anyhow!("could not determine executable for uvx package {location}"))
}

fn parse_provided_by(text: &str) -> Option<String> {
    let idx = text.find("provided by")?;
    let rest = &text[idx..];
    let dash_idx = rest.find('-')?;
    let after_dash = rest[dash_idx + 1..].trim_start();
    let name: String = after_dash
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_provided_by_error_text() {
        let text = "error: command was not found\nprovided by package \"foo\":\n- foo-cli\n";
        assert_eq!(parse_provided_by(text), Some("foo-cli".to_string()));
    }

    #[test]
    fn returns_none_without_a_provided_by_line() {
        assert_eq!(parse_provided_by("some unrelated error"), None);
    }
}
