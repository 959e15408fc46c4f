use std::collections::HashMap;
use std::fmt;

use rmcp::model::{Prompt, Resource, Tool};
use serde::{Deserialize, Serialize};

/// A persisted description of an upstream provider, as stored by the
/// Provider Repository. Two descriptors are considered the same provider
/// (for reconciliation purposes) when they compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderDescriptor {
    /// Launched as a local subprocess via `uvx`.
    Uvx {
        /// Package/project location passed to `uvx --from`.
        location: String,
        /// Explicit executable name; if empty, the Connection Factory
        /// probes the package to discover it.
        #[serde(default)]
        executable_command: String,
    },
    /// A remote MCP server reachable over SSE.
    RemoteMcp { location: String },
}

impl fmt::Display for ProviderDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderDescriptor::Uvx { location, executable_command } if !executable_command.is_empty() => {
                write!(f, "uvx:{location}#{executable_command}")
            }
            ProviderDescriptor::Uvx { location, .. } => write!(f, "uvx:{location}"),
            ProviderDescriptor::RemoteMcp { location } => write!(f, "mcp:{location}"),
        }
    }
}

/// The document persisted by the Provider Repository: a flat list of
/// descriptors, read as JSON or YAML, written as canonical JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfigDocument {
    #[serde(default)]
    pub providers: Vec<ProviderDescriptor>,
}

/// The lifecycle of a single Loaded Provider, per spec §3/§4.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderState {
    Connecting,
    Ready,
    Degraded,
    Closed,
}

/// The feature inventory loaded from a single upstream provider, mirroring
/// `LoadedProvider.tools/resources/prompts` in the original implementation.
/// Agents and agent templates are excluded: they are original_source-only
/// MCP extensions outside the `rmcp`-level protocol surface this proxy
/// speaks, so they are not represented here.
#[derive(Debug, Clone, Default)]
pub struct FeatureInventory {
    pub tools: Vec<Tool>,
    pub resources: Vec<Resource>,
    pub prompts: Vec<Prompt>,
}

/// Which inventory kinds to (re)load; a targeted reload only touches the
/// kinds a list-changed notification names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureKind {
    Tools,
    Resources,
    Prompts,
}

impl FeatureKind {
    pub const ALL: [FeatureKind; 3] = [FeatureKind::Tools, FeatureKind::Resources, FeatureKind::Prompts];
}

/// A snapshot of a loaded provider's routing contribution, keyed the way
/// `ProviderContainer.routing_table` keys its dict: `"{kind}/{name}"`.
pub fn routing_key(kind: FeatureKind, name: &str) -> String {
    let kind = match kind {
        FeatureKind::Tools => "tool",
        FeatureKind::Resources => "resource",
        FeatureKind::Prompts => "prompt",
    };
    format!("{kind}/{name}")
}

/// Read-only snapshot of a provider's state, for status reporting/tests.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub descriptor: ProviderDescriptor,
    pub state: ProviderState,
    pub tool_count: usize,
    pub resource_count: usize,
    pub prompt_count: usize,
    pub last_error: Option<String>,
}

/// Aggregated counts used by tests asserting collision handling (spec §3's
/// "Open Question" on name collisions, resolved as last-writer-wins with a
/// required log + detection hook).
#[derive(Debug, Clone, Default, Serialize)]
pub struct CollisionReport {
    pub collisions: HashMap<String, usize>,
}

impl CollisionReport {
    pub fn record(&mut self, key: &str) {
        *self.collisions.entry(key.to_string()).or_insert(0) += 1;
    }

    pub fn total(&self) -> usize {
        self.collisions.values().sum()
    }
}
