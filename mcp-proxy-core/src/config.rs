use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::model::ProviderConfigDocument;

/// Abstracts *where* persisted state lives, so tests can point it at a
/// temp directory instead of the real OS config dir.
pub trait ConfigProvider: Send + Sync {
    fn base_dir(&self) -> PathBuf;
}

#[derive(Clone, Default)]
pub struct OsConfigProvider;

impl ConfigProvider for OsConfigProvider {
    fn base_dir(&self) -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("mcp-proxy")
    }
}

/// Proxy-wide settings beyond the provider list itself: listen address and
/// the three timers named in spec §4.1/§4.4/§4.6, overridable so tests don't
/// have to wait out the real 1-minute/10-second/5-second defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub listen_addr: String,
    pub log_level: String,
    #[serde(with = "duration_secs")]
    pub reconcile_period: Duration,
    #[serde(with = "duration_secs")]
    pub reconnect_interval: Duration,
    #[serde(with = "duration_secs")]
    pub ping_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8808".to_string(),
            log_level: "info".to_string(),
            reconcile_period: Duration::from_secs(60),
            reconnect_interval: Duration::from_secs(10),
            ping_timeout: Duration::from_secs(5),
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

fn providers_path(cp: &dyn ConfigProvider) -> PathBuf {
    cp.base_dir().join("providers.json")
}

fn settings_path(cp: &dyn ConfigProvider) -> PathBuf {
    cp.base_dir().join("settings.json")
}

/// Reads the persisted provider document. Accepts both JSON and YAML since
/// JSON is a YAML subset; returns an empty document if the file is absent.
pub fn load_providers_with(cp: &dyn ConfigProvider) -> anyhow::Result<ProviderConfigDocument> {
    let path = providers_path(cp);
    if !path.exists() {
        return Ok(ProviderConfigDocument::default());
    }
    let raw = fs::read_to_string(&path)
        .map_err(|e| anyhow::anyhow!("reading {}: {e}", path.display()))?;
    let doc: ProviderConfigDocument = serde_yaml::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("parsing {} as JSON/YAML: {e}", path.display()))?;
    Ok(doc)
}

/// Writes the provider document as canonical, pretty-printed JSON, ensuring
/// the parent directory exists first. Writes to a sibling temp file and
/// renames it into place so a reader never observes a partial write, per
/// spec §4.2's "write-temp-then-rename or equivalent" requirement.
pub fn save_providers_with(
    cp: &dyn ConfigProvider,
    doc: &ProviderConfigDocument,
) -> anyhow::Result<()> {
    let path = providers_path(cp);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let body = serde_json::to_string_pretty(doc)?;
    write_atomically(&path, &body)
}

fn write_atomically(path: &std::path::Path, body: &str) -> anyhow::Result<()> {
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, body)
        .map_err(|e| anyhow::anyhow!("writing {}: {e}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .map_err(|e| anyhow::anyhow!("renaming {} to {}: {e}", tmp_path.display(), path.display()))?;
    Ok(())
}

pub fn load_settings_with(cp: &dyn ConfigProvider) -> Settings {
    let path = settings_path(cp);
    fs::read_to_string(&path)
        .ok()
        .and_then(|raw| serde_yaml::from_str(&raw).ok())
        .unwrap_or_default()
}

pub fn save_settings_with(cp: &dyn ConfigProvider, settings: &Settings) -> anyhow::Result<()> {
    let path = settings_path(cp);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let body = serde_json::to_string_pretty(settings)?;
    write_atomically(&path, &body)
}

#[cfg(test)]
pub mod test_support {
    use super::ConfigProvider;
    use std::fs;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    #[derive(Clone)]
    pub struct TempConfigProvider(pub PathBuf);

    impl TempConfigProvider {
        pub fn new(tag: &str) -> Self {
            let stamp = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
            let dir = std::env::temp_dir().join(format!("mcp-proxy-{tag}-{}-{stamp}", std::process::id()));
            fs::create_dir_all(&dir).unwrap();
            Self(dir)
        }
    }

    impl ConfigProvider for TempConfigProvider {
        fn base_dir(&self) -> PathBuf {
            self.0.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ProviderDescriptor;
    use test_support::TempConfigProvider;

    #[test]
    fn round_trips_providers_as_json() {
        let cp = TempConfigProvider::new("cfg-json");
        let doc = ProviderConfigDocument {
            providers: vec![ProviderDescriptor::RemoteMcp {
                location: "https://example.invalid/mcp".to_string(),
            }],
        };
        save_providers_with(&cp, &doc).unwrap();
        let loaded = load_providers_with(&cp).unwrap();
        assert_eq!(loaded.providers, doc.providers);
    }

    #[test]
    fn reads_hand_written_yaml() {
        let cp = TempConfigProvider::new("cfg-yaml");
        let path = providers_path(&cp);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(
            &path,
            "providers:\n  - type: uvx\n    location: some-pkg\n    executable_command: some-cmd\n",
        )
        .unwrap();
        let loaded = load_providers_with(&cp).unwrap();
        assert_eq!(loaded.providers.len(), 1);
        assert!(matches!(
            loaded.providers[0],
            ProviderDescriptor::Uvx { ref location, ref executable_command }
                if location == "some-pkg" && executable_command == "some-cmd"
        ));
    }

    #[test]
    fn missing_file_yields_empty_document() {
        let cp = TempConfigProvider::new("cfg-missing");
        let loaded = load_providers_with(&cp).unwrap();
        assert!(loaded.providers.is_empty());
    }
}
