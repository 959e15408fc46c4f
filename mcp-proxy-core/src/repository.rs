use std::sync::{Arc, Mutex};

use tracing::info;

use crate::config::{load_providers_with, save_providers_with, ConfigProvider};
use crate::model::{ProviderConfigDocument, ProviderDescriptor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepositoryEventKind {
    Create,
    Delete,
}

#[derive(Debug, Clone)]
pub struct RepositoryEvent {
    pub kind: RepositoryEventKind,
    pub descriptor: ProviderDescriptor,
}

type Handler = Arc<dyn Fn(&RepositoryEvent) + Send + Sync>;

/// The persisted set of provider descriptors, with synchronous
/// subscriber notification on every mutation (handlers run inline from
/// the mutator, matching `FilesystemProviderRepository`'s `_notify_subscribers`).
pub struct ProviderRepository {
    cp: Arc<dyn ConfigProvider>,
    subscribers: Mutex<Vec<Handler>>,
}

impl ProviderRepository {
    pub fn new(cp: Arc<dyn ConfigProvider>) -> Self {
        Self {
            cp,
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self, handler: impl Fn(&RepositoryEvent) + Send + Sync + 'static) {
        self.subscribers.lock().unwrap().push(Arc::new(handler));
    }

    fn notify(&self, event: RepositoryEvent) {
        let handlers = self.subscribers.lock().unwrap().clone();
        for handler in handlers {
            handler(&event);
        }
    }

    pub fn list(&self) -> anyhow::Result<Vec<ProviderDescriptor>> {
        Ok(load_providers_with(self.cp.as_ref())?.providers)
    }

    /// Adds a descriptor if it isn't already present; a no-op otherwise.
    pub fn create(&self, descriptor: ProviderDescriptor) -> anyhow::Result<()> {
        let mut doc = load_providers_with(self.cp.as_ref())?;
        if doc.providers.contains(&descriptor) {
            return Ok(());
        }
        doc.providers.push(descriptor.clone());
        save_providers_with(self.cp.as_ref(), &doc)?;
        info!(target: "repository", provider = %descriptor, "provider added");
        self.notify(RepositoryEvent {
            kind: RepositoryEventKind::Create,
            descriptor,
        });
        Ok(())
    }

    /// Removes a descriptor if present; a no-op otherwise.
    pub fn delete(&self, descriptor: &ProviderDescriptor) -> anyhow::Result<()> {
        let mut doc = load_providers_with(self.cp.as_ref())?;
        let before = doc.providers.len();
        doc.providers.retain(|d| d != descriptor);
        if doc.providers.len() == before {
            return Ok(());
        }
        save_providers_with(self.cp.as_ref(), &doc)?;
        info!(target: "repository", provider = %descriptor, "provider removed");
        self.notify(RepositoryEvent {
            kind: RepositoryEventKind::Delete,
            descriptor: descriptor.clone(),
        });
        Ok(())
    }

    pub fn document(&self) -> anyhow::Result<ProviderConfigDocument> {
        load_providers_with(self.cp.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_support::TempConfigProvider;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn remote(loc: &str) -> ProviderDescriptor {
        ProviderDescriptor::RemoteMcp {
            location: loc.to_string(),
        }
    }

    #[test]
    fn create_is_idempotent_and_notifies_once() {
        let cp: Arc<dyn ConfigProvider> = Arc::new(TempConfigProvider::new("repo-create"));
        let repo = ProviderRepository::new(cp);
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        repo.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        let d = remote("https://a.invalid");
        repo.create(d.clone()).unwrap();
        repo.create(d).unwrap();
        assert_eq!(repo.list().unwrap().len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delete_missing_is_a_silent_no_op() {
        let cp: Arc<dyn ConfigProvider> = Arc::new(TempConfigProvider::new("repo-delete"));
        let repo = ProviderRepository::new(cp);
        repo.delete(&remote("https://gone.invalid")).unwrap();
        assert!(repo.list().unwrap().is_empty());
    }
}
