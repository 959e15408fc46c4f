use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rmcp::model::{ClientInfo, ServerNotification};
use rmcp::service::{NotificationContext, RequestContext, RoleClient, Service};
use rmcp::ErrorData;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{info, warn};

use crate::config::Settings;
use crate::connection::connect_with_handler;
use crate::model::{FeatureInventory, FeatureKind, ProviderDescriptor, ProviderState};
use crate::periodic::Periodic;

/// The concrete session type a Loaded Provider holds: a client serving
/// [`NotificationForwarder`] so upstream notifications reach the hub
/// instead of being silently dropped by the default no-op handler.
type ProviderClient = rmcp::service::RunningService<RoleClient, NotificationForwarder>;

/// Forwards every notification the upstream session receives into a
/// channel the container hands off to the [`crate::notification_hub::NotificationHub`].
/// This is the client-role analogue of the facing server's request
/// handler: where the server side dispatches *requests* it receives, this
/// side only has *notifications* to react to (list-changed, progress),
/// since the proxy never accepts server-initiated requests (sampling,
/// roots) from upstream providers.
#[derive(Clone)]
struct NotificationForwarder {
    tx: mpsc::Sender<ServerNotification>,
    reload: mpsc::Sender<FeatureKind>,
}

impl Service<RoleClient> for NotificationForwarder {
    async fn handle_request(
        &self,
        _request: rmcp::model::ServerRequest,
        _context: RequestContext<RoleClient>,
    ) -> Result<rmcp::model::ClientResult, ErrorData> {
        Err(ErrorData::internal_error(
            "this proxy does not serve roots/sampling requests from providers",
            None,
        ))
    }

    async fn handle_notification(
        &self,
        notification: ServerNotification,
        _context: NotificationContext<RoleClient>,
    ) {
        let kind = match &notification {
            ServerNotification::ToolListChangedNotification(_) => Some(FeatureKind::Tools),
            ServerNotification::ResourceListChangedNotification(_) => Some(FeatureKind::Resources),
            ServerNotification::PromptListChangedNotification(_) => Some(FeatureKind::Prompts),
            _ => None,
        };
        if let Some(kind) = kind {
            let _ = self.reload.send(kind).await;
        }
        let _ = self.tx.send(notification).await;
    }

    fn get_info(&self) -> ClientInfo {
        ClientInfo::default()
    }
}

/// Manages one upstream provider's connection lifecycle: connect, load
/// feature inventory, stream notifications, reconnect on failure, ping to
/// detect silent death. Mirrors `LoadedProvider` in the system this proxy
/// generalizes, with `RECONNECT_INTERVAL`/`PING_TIMEOUT` carried over
/// unchanged (10s / 5s).
pub struct LoadedProvider {
    pub descriptor: ProviderDescriptor,
    state: Arc<RwLock<ProviderState>>,
    inventory: Arc<RwLock<FeatureInventory>>,
    last_error: Arc<RwLock<Option<String>>>,
    client: Arc<Mutex<Option<ProviderClient>>>,
    periodic: Periodic<Box<dyn Fn() -> BoxedUnitFuture + Send + Sync>>,
    reload_rx: Arc<Mutex<mpsc::Receiver<FeatureKind>>>,
}

type BoxedUnitFuture = std::pin::Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

pub const RECONNECT_INTERVAL: Duration = Duration::from_secs(10);
pub const PING_TIMEOUT: Duration = Duration::from_secs(5);

impl LoadedProvider {
    /// Builds a new loaded provider and the notification channel its
    /// upstream session will forward into; the caller (the Provider
    /// Container) registers that receiver with the Notification Hub.
    pub fn new(
        descriptor: ProviderDescriptor,
        settings: &Settings,
    ) -> (Self, mpsc::Receiver<ServerNotification>) {
        let (notif_tx, notif_rx) = mpsc::channel(256);
        let (reload_tx, reload_rx) = mpsc::channel(32);

        let state = Arc::new(RwLock::new(ProviderState::Connecting));
        let inventory = Arc::new(RwLock::new(FeatureInventory::default()));
        let last_error = Arc::new(RwLock::new(None));
        let client: Arc<Mutex<Option<ProviderClient>>> = Arc::new(Mutex::new(None));
        let reload_rx_shared = Arc::new(Mutex::new(reload_rx));

        let tag = descriptor.clone();
        let state_c = state.clone();
        let inventory_c = inventory.clone();
        let last_error_c = last_error.clone();
        let client_c = client.clone();
        let ping_timeout = settings.ping_timeout;
        let notif_tx_for_tick = notif_tx.clone();
        let reload_tx_for_tick = reload_tx.clone();
        let reload_rx_for_tick = reload_rx_shared.clone();

        let executor: Box<dyn Fn() -> BoxedUnitFuture + Send + Sync> = Box::new(move || {
            let tag = tag.clone();
            let state = state_c.clone();
            let inventory = inventory_c.clone();
            let last_error = last_error_c.clone();
            let client = client_c.clone();
            let notif_tx = notif_tx_for_tick.clone();
            let reload_tx = reload_tx_for_tick.clone();
            let reload_rx = reload_rx_for_tick.clone();
            Box::pin(async move {
                ensure_session(
                    &tag,
                    &state,
                    &inventory,
                    &last_error,
                    &client,
                    notif_tx,
                    reload_tx,
                    &reload_rx,
                    ping_timeout,
                )
                .await
            })
        });

        let periodic = Periodic::new(
            format!("ensure-session:{descriptor}"),
            settings.reconnect_interval,
            executor,
        );

        (
            Self {
                descriptor,
                state,
                inventory,
                last_error,
                client,
                periodic,
                reload_rx: reload_rx_shared,
            },
            notif_rx,
        )
    }

    pub async fn init(&self) {
        info!(target: "provider", provider = %self.descriptor, "loading provider");
        self.periodic.start().await;
    }

    pub async fn close(&self) {
        self.periodic.stop().await;
        *self.client.lock().await = None;
        *self.state.write().await = ProviderState::Closed;
        info!(target: "provider", provider = %self.descriptor, "removed provider");
    }

    pub async fn state(&self) -> ProviderState {
        *self.state.read().await
    }

    pub async fn last_error(&self) -> Option<String> {
        self.last_error.read().await.clone()
    }

    pub async fn inventory(&self) -> FeatureInventory {
        self.inventory.read().await.clone()
    }

    /// Runs `f` with access to the live client, returning `None` if the
    /// provider currently has no session (Connecting/Degraded). Holds the
    /// client lock for the duration of `f`, so a slow upstream call
    /// delays this provider's next reconnect tick but never another
    /// provider's.
    pub async fn with_client<F, Fut, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&ProviderClient) -> Fut,
        Fut: Future<Output = R>,
    {
        let guard = self.client.lock().await;
        match guard.as_ref() {
            Some(client) => Some(f(client).await),
            None => None,
        }
    }

    /// Drains any pending targeted-reload requests a notification
    /// triggered, returning the distinct kinds to reload.
    pub async fn take_pending_reloads(&self) -> Vec<FeatureKind> {
        drain_pending_reloads(&self.reload_rx).await
    }
}

/// Drains every pending list-changed notification collected since the
/// last tick, deduplicated by kind.
async fn drain_pending_reloads(reload_rx: &Mutex<mpsc::Receiver<FeatureKind>>) -> Vec<FeatureKind> {
    let mut rx = reload_rx.lock().await;
    let mut kinds = Vec::new();
    while let Ok(kind) = rx.try_recv() {
        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }
    kinds
}

/// Replaces a single kind's slice of the inventory, leaving the others
/// untouched: the "targeted re-inventory" spec §4.4 requires a
/// `*ListChanged` notification to trigger.
fn apply_partial(inventory: &mut FeatureInventory, kind: FeatureKind, partial: FeatureInventory) {
    match kind {
        FeatureKind::Tools => inventory.tools = partial.tools,
        FeatureKind::Resources => inventory.resources = partial.resources,
        FeatureKind::Prompts => inventory.prompts = partial.prompts,
    }
}

#[allow(clippy::too_many_arguments)]
async fn ensure_session(
    descriptor: &ProviderDescriptor,
    state: &RwLock<ProviderState>,
    inventory: &RwLock<FeatureInventory>,
    last_error: &RwLock<Option<String>>,
    client: &Mutex<Option<ProviderClient>>,
    notif_tx: mpsc::Sender<ServerNotification>,
    reload_tx: mpsc::Sender<FeatureKind>,
    reload_rx: &Mutex<mpsc::Receiver<FeatureKind>>,
    ping_timeout: Duration,
) -> anyhow::Result<()> {
    let pending_kinds = drain_pending_reloads(reload_rx).await;

    let mut guard = client.lock().await;
    if let Some(session) = guard.as_ref() {
        if !pending_kinds.is_empty() {
            for kind in &pending_kinds {
                let partial = load_features(descriptor, session, std::slice::from_ref(kind)).await;
                apply_partial(&mut *inventory.write().await, *kind, partial);
                info!(target: "provider", provider = %descriptor, ?kind, "refreshed inventory after list-changed notification");
            }
        }

        // rmcp's RunningService has no raw ping; a cheap list call serves
        // as the liveness probe, matching `send_ping`'s intent (detect a
        // dead connection without mutating remote state).
        match tokio::time::timeout(ping_timeout, session.list_tools(Default::default())).await {
            Ok(Ok(_)) => return Ok(()),
            Ok(Err(err)) => {
                warn!(target: "provider", provider = %descriptor, error = %err, "connection broken, reconnecting");
                *guard = None;
                *state.write().await = ProviderState::Degraded;
            }
            Err(_) => {
                warn!(target: "provider", provider = %descriptor, "no response within ping timeout, assuming busy");
                return Ok(());
            }
        }
    }

    *state.write().await = ProviderState::Connecting;
    info!(target: "provider", provider = %descriptor, "initializing session");
    let handler = NotificationForwarder {
        tx: notif_tx,
        reload: reload_tx,
    };
    match connect_with_handler(descriptor, handler).await {
        Ok(session) => {
            // Per-kind load failures are absorbed inside `load_all_features`
            // (logged, that kind cleared); a successful `initialize` is
            // enough for the provider to become Ready, per spec §4.4.
            let loaded_inventory = load_all_features(descriptor, &session).await;
            *inventory.write().await = loaded_inventory;
            *guard = Some(session);
            *state.write().await = ProviderState::Ready;
            *last_error.write().await = None;
        }
        Err(err) => {
            warn!(target: "provider", provider = %descriptor, error = %err, "connection attempt failed");
            *last_error.write().await = Some(err.to_string());
            *state.write().await = ProviderState::Degraded;
        }
    }
    Ok(())
}

async fn load_all_features(descriptor: &ProviderDescriptor, session: &ProviderClient) -> FeatureInventory {
    load_features(descriptor, session, &FeatureKind::ALL).await
}

/// Loads each requested kind independently: per spec §4.4's inventory
/// loading rules, a failure on one kind is logged and clears only that
/// kind's slice, it never aborts the kinds that haven't loaded yet and it
/// never fails the provider as a whole.
async fn load_features(
    descriptor: &ProviderDescriptor,
    session: &ProviderClient,
    kinds: &[FeatureKind],
) -> FeatureInventory {
    let mut inventory = FeatureInventory::default();
    let info = session.peer_info();
    let caps = info.map(|i| i.capabilities.clone()).unwrap_or_default();

    for kind in kinds {
        match kind {
            FeatureKind::Tools if caps.tools.is_some() => {
                match session.list_all_tools().await {
                    Ok(tools) => {
                        info!(target: "provider", provider = %descriptor, count = tools.len(), "loaded tools");
                        inventory.tools = tools;
                    }
                    Err(err) => {
                        warn!(target: "provider", provider = %descriptor, error = %err, "failed loading tools, clearing kind");
                        inventory.tools.clear();
                    }
                }
            }
            FeatureKind::Resources if caps.resources.is_some() => {
                match session.list_all_resources().await {
                    Ok(resources) => {
                        info!(target: "provider", provider = %descriptor, count = resources.len(), "loaded resources");
                        inventory.resources = resources;
                    }
                    Err(err) => {
                        warn!(target: "provider", provider = %descriptor, error = %err, "failed loading resources, clearing kind");
                        inventory.resources.clear();
                    }
                }
            }
            FeatureKind::Prompts if caps.prompts.is_some() => {
                match session.list_all_prompts().await {
                    Ok(prompts) => {
                        info!(target: "provider", provider = %descriptor, count = prompts.len(), "loaded prompts");
                        inventory.prompts = prompts;
                    }
                    Err(err) => {
                        warn!(target: "provider", provider = %descriptor, error = %err, "failed loading prompts, clearing kind");
                        inventory.prompts.clear();
                    }
                }
            }
            _ => {}
        }
    }
    inventory
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_match_the_reference_implementation() {
        assert_eq!(RECONNECT_INTERVAL, Duration::from_secs(10));
        assert_eq!(PING_TIMEOUT, Duration::from_secs(5));
    }
}
