use std::collections::HashMap;
use std::sync::Arc;

use rmcp::model::ServerNotification;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, warn};

use crate::model::ProviderDescriptor;

/// Which subset of notifications a subscriber wants, mirroring
/// `NotificationStreamType` in the system this proxy generalizes:
/// `Broadcast` forwards everything except progress notifications (those
/// are private to the request that triggered them), `Progress` forwards
/// only progress notifications matching a specific token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Broadcast,
    Progress,
}

fn is_progress(notification: &ServerNotification) -> bool {
    matches!(notification, ServerNotification::ProgressNotification(_))
}

fn progress_token(notification: &ServerNotification) -> Option<String> {
    match notification {
        ServerNotification::ProgressNotification(n) => Some(n.params.progress_token.0.to_string()),
        _ => None,
    }
}

/// Fans notifications in from every Loaded Provider and fans them back
/// out to facing-client subscribers, per spec §4.5. A `tokio::broadcast`
/// channel backs the fan-out; lagging subscribers drop old notifications
/// rather than block the hub (matching the "fan-out must not let one slow
/// subscriber stall the others" requirement).
pub struct NotificationHub {
    sender: broadcast::Sender<ServerNotification>,
    provider_tasks: Mutex<HashMap<ProviderDescriptor, tokio::task::JoinHandle<()>>>,
}

impl NotificationHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self {
            sender,
            provider_tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Starts forwarding everything a provider sends on `incoming` into
    /// the shared fan-in stream. Call once per newly loaded provider.
    pub async fn register(
        &self,
        descriptor: ProviderDescriptor,
        mut incoming: mpsc::Receiver<ServerNotification>,
    ) {
        let sender = self.sender.clone();
        let tag = descriptor.clone();
        let task = tokio::spawn(async move {
            while let Some(notification) = incoming.recv().await {
                debug!(target: "notification_hub", provider = %tag, "forwarding notification");
                // A send error just means there are currently no subscribers.
                let _ = sender.send(notification);
            }
        });
        self.provider_tasks.lock().await.insert(descriptor, task);
    }

    /// Stops forwarding from a provider being unloaded.
    pub async fn remove(&self, descriptor: &ProviderDescriptor) {
        if let Some(task) = self.provider_tasks.lock().await.remove(descriptor) {
            task.abort();
        }
    }

    /// Subscribes a facing session to `Broadcast` notifications: every
    /// non-progress notification from every provider.
    pub fn subscribe_broadcast(&self) -> HubSubscription {
        HubSubscription {
            receiver: self.sender.subscribe(),
            kind: StreamKind::Broadcast,
            progress_token: None,
        }
    }

    /// Subscribes to `Progress` notifications carrying a specific token,
    /// scoped to the single in-flight request that minted it.
    pub fn subscribe_progress(&self, token: impl Into<String>) -> HubSubscription {
        HubSubscription {
            receiver: self.sender.subscribe(),
            kind: StreamKind::Progress,
            progress_token: Some(token.into()),
        }
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}

/// A live subscription to the hub's fan-out; call `recv` in a loop.
pub struct HubSubscription {
    receiver: broadcast::Receiver<ServerNotification>,
    kind: StreamKind,
    progress_token: Option<String>,
}

impl HubSubscription {
    /// Returns the next notification this subscription cares about,
    /// skipping ones the filter rejects. Returns `None` once the hub is
    /// gone and no further notifications will arrive.
    pub async fn recv(&mut self) -> Option<ServerNotification> {
        loop {
            match self.receiver.recv().await {
                Ok(notification) => {
                    if self.accepts(&notification) {
                        return Some(notification);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(target: "notification_hub", skipped, "subscriber lagged, notifications dropped");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    fn accepts(&self, notification: &ServerNotification) -> bool {
        match self.kind {
            StreamKind::Broadcast => !is_progress(notification),
            StreamKind::Progress => {
                is_progress(notification)
                    && progress_token(notification).as_deref() == self.progress_token.as_deref()
            }
        }
    }
}

pub type SharedNotificationHub = Arc<NotificationHub>;

#[cfg(test)]
mod tests {
    use super::*;
    use rmcp::model::{NumberOrString, ProgressNotification, ProgressNotificationParam};

    fn progress(token: &str) -> ServerNotification {
        ServerNotification::ProgressNotification(ProgressNotification {
            method: Default::default(),
            params: ProgressNotificationParam {
                progress_token: rmcp::model::ProgressToken(NumberOrString::String(token.into())),
                progress: 1.0,
                total: None,
                message: None,
            },
            extensions: Default::default(),
        })
    }

    #[tokio::test]
    async fn progress_subscription_only_sees_matching_token() {
        let hub = NotificationHub::new();
        let mut sub = hub.subscribe_progress("abc");
        let (tx, rx) = mpsc::channel(8);
        hub.register(
            ProviderDescriptor::RemoteMcp {
                location: "https://x".into(),
            },
            rx,
        )
        .await;
        tx.send(progress("other")).await.unwrap();
        tx.send(progress("abc")).await.unwrap();
        let received = sub.recv().await.unwrap();
        assert_eq!(progress_token(&received).as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn broadcast_subscription_excludes_progress() {
        let hub = NotificationHub::new();
        let mut sub = hub.subscribe_broadcast();
        let (tx, rx) = mpsc::channel(8);
        hub.register(
            ProviderDescriptor::RemoteMcp {
                location: "https://y".into(),
            },
            rx,
        )
        .await;
        tx.send(progress("ignored")).await.unwrap();
        // Broadcast subscribers never see it; dropping the sender closes the
        // channel so recv() returns None instead of hanging the test.
        drop(tx);
        assert!(sub.recv().await.is_none());
    }
}
