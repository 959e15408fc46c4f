use std::path::PathBuf;
use std::sync::Arc;

use mcp_proxy_core::config::{ConfigProvider, Settings};
use mcp_proxy_core::container::ProviderContainer;
use mcp_proxy_core::model::{ProviderDescriptor, ProviderState};
use mcp_proxy_core::repository::ProviderRepository;

#[derive(Clone)]
struct TempConfigProvider(PathBuf);

impl TempConfigProvider {
    fn new(tag: &str) -> Self {
        let stamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("mcp-proxy-it-{tag}-{}-{stamp}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        Self(dir)
    }
}

impl ConfigProvider for TempConfigProvider {
    fn base_dir(&self) -> PathBuf {
        self.0.clone()
    }
}

fn fast_settings() -> Settings {
    Settings {
        reconcile_period: std::time::Duration::from_millis(20),
        reconnect_interval: std::time::Duration::from_millis(20),
        ping_timeout: std::time::Duration::from_millis(20),
        ..Settings::default()
    }
}

#[tokio::test]
async fn unreachable_provider_degrades_instead_of_disappearing() {
    let cp: Arc<dyn ConfigProvider> = Arc::new(TempConfigProvider::new("container-degrade"));
    let repo = Arc::new(ProviderRepository::new(cp));
    repo.create(ProviderDescriptor::RemoteMcp {
        location: "http://127.0.0.1:1/does-not-exist".to_string(),
    })
    .unwrap();

    let container = ProviderContainer::new(repo, fast_settings());
    container.start().await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(150)).await;
    assert_eq!(container.loaded_count().await, 1);
    let statuses = container.statuses().await;
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].state, ProviderState::Degraded);
    assert!(statuses[0].last_error.is_some());

    container.stop().await;
    assert_eq!(container.loaded_count().await, 0);
}

#[tokio::test]
async fn removing_from_repository_removes_the_loaded_provider() {
    let cp: Arc<dyn ConfigProvider> = Arc::new(TempConfigProvider::new("container-remove"));
    let repo = Arc::new(ProviderRepository::new(cp));
    let descriptor = ProviderDescriptor::RemoteMcp {
        location: "http://127.0.0.1:1/gone".to_string(),
    };
    repo.create(descriptor.clone()).unwrap();

    let container = ProviderContainer::new(repo.clone(), fast_settings());
    container.start().await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(60)).await;
    assert_eq!(container.loaded_count().await, 1);

    repo.delete(&descriptor).unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert_eq!(container.loaded_count().await, 0);

    container.stop().await;
}
