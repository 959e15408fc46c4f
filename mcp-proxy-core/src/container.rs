use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::RwLock;
use tracing::info;

use crate::config::Settings;
use crate::model::{routing_key, CollisionReport, FeatureKind, ProviderDescriptor, ProviderStatus};
use crate::notification_hub::NotificationHub;
use crate::periodic::Periodic;
use crate::provider::LoadedProvider;
use crate::repository::ProviderRepository;

pub const RELOAD_PERIOD: Duration = Duration::from_secs(60);

/// What a single `tool/{name}`, `resource/{uri}` or `prompt/{name}` key
/// routes to: the provider that currently serves it.
pub struct RoutingTable {
    entries: std::collections::HashMap<String, Arc<LoadedProvider>>,
}

impl RoutingTable {
    pub fn get(&self, key: &str) -> Option<Arc<LoadedProvider>> {
        self.entries.get(key).cloned()
    }
}

/// Owns the set of currently Loaded Providers, reconciling them against
/// the Provider Repository on a timer (or immediately when the repository
/// reports a change), and aggregating their feature inventories into a
/// single routing table. Mirrors `ProviderContainer` in the system this
/// proxy generalizes: `RELOAD_PERIOD` is the unchanged 1-minute default.
pub struct ProviderContainer {
    repository: Arc<ProviderRepository>,
    settings: Settings,
    hub: Arc<NotificationHub>,
    loaded: RwLock<Vec<Arc<LoadedProvider>>>,
    collisions: RwLock<CollisionReport>,
    reload: Periodic<Box<dyn Fn() -> ReloadFuture + Send + Sync>>,
}

type ReloadFuture = std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send>>;

impl ProviderContainer {
    pub fn new(repository: Arc<ProviderRepository>, settings: Settings) -> Arc<Self> {
        let hub = Arc::new(NotificationHub::new());
        let loaded = RwLock::new(Vec::new());
        let collisions = RwLock::new(CollisionReport::default());

        Arc::new_cyclic(|weak: &std::sync::Weak<Self>| {
            let weak_for_reload = weak.clone();
            let reload_fn: Box<dyn Fn() -> ReloadFuture + Send + Sync> = Box::new(move || {
                let weak = weak_for_reload.clone();
                Box::pin(async move {
                    if let Some(this) = weak.upgrade() {
                        this.reconcile().await?;
                    }
                    Ok(())
                })
            });
            let reload_period = settings.reconcile_period;
            Self {
                repository,
                settings,
                hub,
                loaded,
                collisions,
                reload: Periodic::new("reconcile-providers", reload_period, reload_fn),
            }
        })
    }

    pub async fn start(self: &Arc<Self>) -> anyhow::Result<()> {
        self.reconcile().await?;
        self.reload.start().await;
        let poke_container = Arc::downgrade(self);
        self.repository.subscribe(move |_event| {
            if let Some(container) = poke_container.upgrade() {
                container.reload.poke();
            }
        });
        Ok(())
    }

    pub async fn stop(&self) {
        self.reload.stop().await;
        let providers = self.loaded.write().await.split_off(0);
        for provider in providers {
            provider.close().await;
            self.hub.remove(&provider.descriptor).await;
        }
    }

    /// Runs one reconciliation pass: diff the repository's current
    /// descriptor set against the loaded set, close removed providers,
    /// init added ones, leave the rest untouched. This is the Rust
    /// translation of `ProviderContainer._reload`'s set-difference
    /// algorithm, unchanged in meaning.
    async fn reconcile(&self) -> anyhow::Result<()> {
        info!(target: "container", "reconciling providers");
        let repository_providers: HashSet<ProviderDescriptor> =
            self.repository.list()?.into_iter().collect();

        let mut loaded = self.loaded.write().await;
        let current: HashSet<ProviderDescriptor> =
            loaded.iter().map(|p| p.descriptor.clone()).collect();

        let added: Vec<ProviderDescriptor> = repository_providers
            .difference(&current)
            .cloned()
            .collect();
        let (to_remove, to_keep): (Vec<_>, Vec<_>) = loaded
            .drain(..)
            .partition(|p| !repository_providers.contains(&p.descriptor));

        info!(target: "container", removed = to_remove.len(), added = added.len(), "reconciliation batch");

        for provider in &to_remove {
            provider.close().await;
            self.hub.remove(&provider.descriptor).await;
        }

        let mut next = to_keep;
        for descriptor in added {
            let (provider, notif_rx) = LoadedProvider::new(descriptor.clone(), &self.settings);
            let provider = Arc::new(provider);
            provider.init().await;
            self.hub.register(descriptor, notif_rx).await;
            next.push(provider);
        }
        *loaded = next;
        Ok(())
    }

    pub fn hub(&self) -> Arc<NotificationHub> {
        self.hub.clone()
    }

    /// Snapshots every loaded provider's inventory concurrently rather than
    /// one at a time, the same `join_all`-over-per-provider-tasks shape the
    /// teacher's `BouncerService::fetch_all_tools` uses to query multiple
    /// upstream sessions at once instead of serializing on slow ones.
    async fn snapshot_inventories(&self) -> Vec<(Arc<LoadedProvider>, crate::model::FeatureInventory)> {
        let providers: Vec<Arc<LoadedProvider>> = self.loaded.read().await.clone();
        join_all(providers.into_iter().map(|provider| async move {
            let inventory = provider.inventory().await;
            (provider, inventory)
        }))
        .await
    }

    /// Builds the current routing table plus a collision report, logging
    /// (and counting, for tests) every name a later provider overwrites —
    /// the resolution the spec gives to the "which provider wins a name
    /// collision" open question: last-writer-wins, always logged.
    pub async fn routing_table(&self) -> RoutingTable {
        let snapshot = self.snapshot_inventories().await;
        let mut entries = std::collections::HashMap::new();
        let mut collisions = CollisionReport::default();
        for (provider, inventory) in &snapshot {
            for tool in &inventory.tools {
                insert_routed(&mut entries, &mut collisions, FeatureKind::Tools, &tool.name, provider);
            }
            for resource in &inventory.resources {
                insert_routed(
                    &mut entries,
                    &mut collisions,
                    FeatureKind::Resources,
                    &resource.uri,
                    provider,
                );
            }
            for prompt in &inventory.prompts {
                insert_routed(&mut entries, &mut collisions, FeatureKind::Prompts, &prompt.name, provider);
            }
        }
        *self.collisions.write().await = collisions;
        RoutingTable { entries }
    }

    pub async fn collision_report(&self) -> CollisionReport {
        self.collisions.read().await.clone()
    }

    pub async fn statuses(&self) -> Vec<ProviderStatus> {
        let snapshot = self.snapshot_inventories().await;
        let mut out = Vec::with_capacity(snapshot.len());
        for (provider, inventory) in &snapshot {
            out.push(ProviderStatus {
                descriptor: provider.descriptor.clone(),
                state: provider.state().await,
                tool_count: inventory.tools.len(),
                resource_count: inventory.resources.len(),
                prompt_count: inventory.prompts.len(),
                last_error: provider.last_error().await,
            });
        }
        out
    }

    pub async fn loaded_count(&self) -> usize {
        self.loaded.read().await.len()
    }

    /// Flattens every loaded provider's tools into one list, mirroring the
    /// `tools` property in the system this container generalizes.
    pub async fn aggregate_tools(&self) -> Vec<rmcp::model::Tool> {
        self.snapshot_inventories()
            .await
            .into_iter()
            .flat_map(|(_, inventory)| inventory.tools)
            .collect()
    }

    pub async fn aggregate_resources(&self) -> Vec<rmcp::model::Resource> {
        self.snapshot_inventories()
            .await
            .into_iter()
            .flat_map(|(_, inventory)| inventory.resources)
            .collect()
    }

    pub async fn aggregate_prompts(&self) -> Vec<rmcp::model::Prompt> {
        self.snapshot_inventories()
            .await
            .into_iter()
            .flat_map(|(_, inventory)| inventory.prompts)
            .collect()
    }
}

fn insert_routed(
    entries: &mut std::collections::HashMap<String, Arc<LoadedProvider>>,
    collisions: &mut CollisionReport,
    kind: FeatureKind,
    name: &str,
    provider: &Arc<LoadedProvider>,
) {
    let key = routing_key(kind, name);
    if entries.contains_key(&key) {
        tracing::warn!(target: "container", key = %key, "name collision, last writer wins");
        collisions.record(&key);
    }
    entries.insert(key, provider.clone());
}
