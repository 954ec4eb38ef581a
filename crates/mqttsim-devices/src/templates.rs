//! Device templates: named capability presets.
//!
//! Templates are read-only input to device creation. A [`TemplateSource`]
//! hands out immutable snapshots; how and when it refreshes is its own
//! business.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use mqttsim_core::{Error, Result};

/// A named capability preset for one kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceTemplate {
    /// Kind identifier the template applies to.
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Map<String, Value>>,
}

/// Snapshot of all known templates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateSet {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub templates: BTreeMap<String, DeviceTemplate>,
}

fn default_version() -> u32 {
    1
}

impl Default for TemplateSet {
    fn default() -> Self {
        Self {
            version: default_version(),
            templates: BTreeMap::new(),
        }
    }
}

impl TemplateSet {
    pub fn get(&self, id: &str) -> Option<&DeviceTemplate> {
        self.templates.get(id)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.templates.keys().map(String::as_str).collect()
    }
}

/// Provider of template snapshots.
pub trait TemplateSource: Send + Sync {
    fn snapshot(&self) -> Result<Arc<TemplateSet>>;
}

/// Fixed in-memory template set.
#[derive(Debug, Clone, Default)]
pub struct StaticTemplateSource {
    set: Arc<TemplateSet>,
}

impl StaticTemplateSource {
    pub fn new(set: TemplateSet) -> Self {
        Self { set: Arc::new(set) }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

impl TemplateSource for StaticTemplateSource {
    fn snapshot(&self) -> Result<Arc<TemplateSet>> {
        Ok(self.set.clone())
    }
}

/// Templates loaded from a JSON or TOML file, re-read when its mtime changes.
///
/// A missing file yields an empty set.
pub struct FileTemplateSource {
    path: PathBuf,
    cache: Mutex<Option<(Option<SystemTime>, Arc<TemplateSet>)>>,
}

impl FileTemplateSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<TemplateSet> {
        if !self.path.exists() {
            return Ok(TemplateSet::default());
        }
        let raw = std::fs::read_to_string(&self.path)?;
        let is_json = self
            .path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let set = if is_json {
            serde_json::from_str(&raw).map_err(|e| {
                Error::Config(format!("invalid template file {}: {}", self.path.display(), e))
            })?
        } else {
            toml::from_str(&raw).map_err(|e| {
                Error::Config(format!("invalid template file {}: {}", self.path.display(), e))
            })?
        };
        Ok(set)
    }
}

impl TemplateSource for FileTemplateSource {
    fn snapshot(&self) -> Result<Arc<TemplateSet>> {
        let mtime = std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .ok();

        let mut cache = self.cache.lock();
        if let Some((cached_mtime, set)) = cache.as_ref() {
            if *cached_mtime == mtime {
                return Ok(set.clone());
            }
        }

        let set = Arc::new(self.read()?);
        tracing::debug!(
            path = %self.path.display(),
            count = set.templates.len(),
            "Loaded device templates"
        );
        *cache = Some((mtime, set.clone()));
        Ok(set)
    }
}
