/// `load_config` module: Loads a static YAML config and turns it into the inputs of a sync run.
///
/// This module is the only place where untrusted YAML is parsed and mapped to
/// strongly-typed structs from `asset-sync-core`.
///
/// # Responsibilities
/// - Parse the YAML file into [`CliConfig`] (store endpoint, sync settings, asset queue)
/// - Resolve `path:` assets relative to the config file and read them as inline bytes
/// - Surface clear diagnostics: every failure names the file or asset involved
///
/// Secrets (the store token) are never read from YAML; see [`crate::store_client`].
///
/// # Errors
/// All errors in this module use `anyhow::Error` and are surfaced at the CLI boundary.
use anyhow::{bail, Context, Result};
use asset_sync_core::config::SyncSettings;
use asset_sync_core::contract::{AssetDescriptor, AssetSource};
use bytes::Bytes;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

#[derive(Debug, Deserialize)]
pub struct CliConfig {
    pub store: StoreSection,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub assets: Vec<AssetSpec>,
    /// Directory of the config file; relative asset paths resolve against it.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
pub struct StoreSection {
    pub url: String,
}

/// One queued asset. Exactly one of `url` and `path` must be set.
#[derive(Debug, Clone, Deserialize)]
pub struct AssetSpec {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub content_type: Option<String>,
}

impl CliConfig {
    pub fn trace_loaded(&self) {
        info!(
            store_url = %self.store.url,
            assets = self.assets.len(),
            "Loaded CliConfig"
        );
        self.sync.trace_loaded();
    }

    /// Build the ordered descriptor queue, reading local files into memory.
    pub fn descriptors(&self) -> Result<Vec<AssetDescriptor>> {
        self.assets
            .iter()
            .map(|spec| spec.to_descriptor(&self.base_dir))
            .collect()
    }
}

impl AssetSpec {
    pub fn to_descriptor(&self, base_dir: &Path) -> Result<AssetDescriptor> {
        let source = match (&self.url, &self.path) {
            (Some(url), None) => AssetSource::Url(url.clone()),
            (None, Some(path)) => {
                let full = base_dir.join(path);
                let content = fs::read(&full).with_context(|| {
                    format!("Failed to read asset {} from {:?}", self.id, full)
                })?;
                info!(id = %self.id, path = ?full, bytes = content.len(), "Read inline asset");
                AssetSource::Inline(Bytes::from(content))
            }
            (Some(_), Some(_)) => bail!("Asset {} sets both url and path", self.id),
            (None, None) => bail!("Asset {} needs either url or path", self.id),
        };
        Ok(AssetDescriptor {
            id: self.id.clone(),
            source,
            content_type: self.content_type.clone(),
        })
    }
}

/// Loads a static YAML config file (no secrets).
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => {
            info!(config_path = ?path_ref, "Config file read successfully");
            content
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path_ref,
                e
            ));
        }
    };

    let mut config: CliConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    config.base_dir = path_ref
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    config.trace_loaded();
    Ok(config)
}
