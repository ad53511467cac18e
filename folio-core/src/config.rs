use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::geometry::Size;
use crate::selection::SelectionSettings;
use crate::Document;

const CONFIG_FILENAME: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path:?}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "scroll_debounce_ms")]
    pub scroll_debounce: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "selection_settle_ms")]
    pub selection_settle: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "selection_clear_grace_ms")]
    pub selection_clear_grace: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            scroll_debounce: Duration::from_millis(150),
            selection_settle: Duration::from_millis(10),
            selection_clear_grace: Duration::from_millis(100),
        }
    }
}

/// Sizes, in characters, of the text handed to context consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub window_chars: usize,
    pub margin_chars: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            window_chars: 3000,
            margin_chars: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    pub anchor_offset: f64,
    pub edge_margin: f64,
    pub menu_width: f64,
    pub menu_height: f64,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            anchor_offset: 10.0,
            edge_margin: 10.0,
            menu_width: 200.0,
            menu_height: 140.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoomConfig {
    pub min: f32,
    pub max: f32,
    pub step: f32,
}

impl Default for ZoomConfig {
    fn default() -> Self {
        Self {
            min: 0.5,
            max: 2.0,
            step: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub name: String,
    pub locator: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub timing: TimingConfig,
    pub context: ContextConfig,
    pub selection: SelectionConfig,
    pub zoom: ZoomConfig,
    pub documents: Vec<CatalogEntry>,
}

impl ViewerConfig {
    /// Platform config path: `<config_dir>/folio/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("net", "folio", "folio")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILENAME))
    }

    /// Loads the platform config file, falling back to defaults when it does
    /// not exist.
    pub fn load() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => {
                debug!("no config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        debug!(?path, documents = config.documents.len(), "config loaded");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.context.window_chars == 0 {
            return Err(ConfigError::Invalid(
                "context.window_chars must be positive".into(),
            ));
        }
        let zoom = &self.zoom;
        if !(zoom.min > 0.0 && zoom.min <= zoom.max) || zoom.step <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "zoom range {}..={} with step {} is not usable",
                zoom.min, zoom.max, zoom.step
            )));
        }
        Ok(())
    }

    pub fn selection_settings(&self) -> SelectionSettings {
        SelectionSettings {
            settle_delay: self.timing.selection_settle,
            clear_grace: self.timing.selection_clear_grace,
            anchor_offset: self.selection.anchor_offset,
            edge_margin: self.selection.edge_margin,
            menu_size: Size::new(self.selection.menu_width, self.selection.menu_height),
        }
    }

    pub fn catalog(&self) -> DocumentCatalog {
        let documents = self
            .documents
            .iter()
            .map(|entry| {
                let mut document = Document::new(entry.name.clone(), entry.locator.clone());
                if let Some(id) = entry.id {
                    document.id = id;
                }
                document
            })
            .collect();
        DocumentCatalog { documents }
    }
}

/// Documents offered for reading.
#[derive(Debug, Clone, Default)]
pub struct DocumentCatalog {
    documents: Vec<Document>,
}

impl DocumentCatalog {
    pub fn new(documents: Vec<Document>) -> Self {
        Self { documents }
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn get(&self, id: Uuid) -> Option<&Document> {
        self.documents.iter().find(|doc| doc.id == id)
    }

    /// Case-insensitive lookup by display name.
    pub fn find_by_name(&self, name: &str) -> Option<&Document> {
        self.documents
            .iter()
            .find(|doc| doc.name.eq_ignore_ascii_case(name))
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}
