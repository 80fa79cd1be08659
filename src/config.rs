use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use crate::{
    mapping_loader::{MappingError, MappingLoader},
    mapping_table::{MappingTable, MappingTables},
    pipeline::{DEFAULT_SOURCE_CONTAINER, DEFAULT_TARGET_CONTAINER},
    reporter::ReportFormat,
    request::MappingProperties,
    transformation_rule::MappingDocument,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Where a mapping file comes from: a local path or an http(s) URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MappingSource {
    Path(PathBuf),
    Url(String),
}

impl MappingSource {
    pub fn is_remote(&self) -> bool {
        matches!(self, MappingSource::Url(_))
    }

    /// Anchor a relative path at `base`; URLs and absolute paths are unchanged
    pub fn resolved_against(self, base: &Path) -> Self {
        match self {
            MappingSource::Path(path) if path.is_relative() => MappingSource::Path(base.join(path)),
            other => other,
        }
    }

    async fn fetch(url: &str) -> Result<String, MappingError> {
        let fetch_error = |message: String| MappingError::Fetch {
            url: url.to_string(),
            message,
        };
        let response = reqwest::get(url).await.map_err(|e| fetch_error(e.to_string()))?;
        if !response.status().is_success() {
            return Err(fetch_error(format!("HTTP {}", response.status())));
        }
        response.text().await.map_err(|e| fetch_error(e.to_string()))
    }

    /// Load a flat two-column table from this source
    pub async fn load_table(&self, loader: &MappingLoader<'_>) -> Result<MappingTable<String, String>, MappingError> {
        match self {
            MappingSource::Path(path) => loader.load_flat_table(path),
            MappingSource::Url(url) => {
                let text = Self::fetch(url).await?;
                Ok(loader.flat_table_from_text(&text, url))
            }
        }
    }

    /// Load the layout/web-part mapping document from this source
    pub async fn load_document(&self, loader: &MappingLoader<'_>) -> Result<MappingDocument, MappingError> {
        match self {
            MappingSource::Path(path) => loader.load_mapping_document(path),
            MappingSource::Url(url) => {
                let text = Self::fetch(url).await?;
                loader.mapping_document_from_text(&text, url)
            }
        }
    }
}

impl From<String> for MappingSource {
    fn from(value: String) -> Self {
        let lowered = value.to_ascii_lowercase();
        if lowered.starts_with("http://") || lowered.starts_with("https://") {
            MappingSource::Url(value)
        } else {
            MappingSource::Path(PathBuf::from(value))
        }
    }
}

impl From<MappingSource> for String {
    fn from(value: MappingSource) -> Self {
        value.to_string()
    }
}

impl fmt::Display for MappingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MappingSource::Path(path) => write!(f, "{}", path.display()),
            MappingSource::Url(url) => f.write_str(url),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSettings {
    #[serde(default)]
    pub format: ReportFormat,
    /// File the event log and batch report are appended to; stdout when absent
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// One transformation run, as described in a YAML config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransformConfig {
    #[serde(default)]
    pub url_mapping: Option<MappingSource>,
    #[serde(default)]
    pub user_mapping: Option<MappingSource>,
    #[serde(default)]
    pub term_mapping: Option<MappingSource>,
    pub layout_mapping: MappingSource,
    #[serde(default = "default_source_container")]
    pub source_container: String,
    #[serde(default = "default_target_container")]
    pub target_container: String,
    #[serde(default)]
    pub target_prefix: Option<String>,
    #[serde(default)]
    pub overwrite: bool,
    #[serde(default)]
    pub skip_telemetry: bool,
    #[serde(default)]
    pub mapping_properties: MappingProperties,
    #[serde(default)]
    pub report: ReportSettings,
}

fn default_source_container() -> String {
    DEFAULT_SOURCE_CONTAINER.to_string()
}

fn default_target_container() -> String {
    DEFAULT_TARGET_CONTAINER.to_string()
}

impl TransformConfig {
    pub fn new(layout_mapping: MappingSource) -> Self {
        Self {
            url_mapping: None,
            user_mapping: None,
            term_mapping: None,
            layout_mapping,
            source_container: default_source_container(),
            target_container: default_target_container(),
            target_prefix: None,
            overwrite: false,
            skip_telemetry: false,
            mapping_properties: MappingProperties::new(),
            report: ReportSettings::default(),
        }
    }

    /// Read a config file; relative paths inside it resolve against its directory
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml_str(&text)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Ok(config.resolved_against(base))
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let config: TransformConfig = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.source_container.trim().is_empty() || self.target_container.trim().is_empty() {
            return Err(ConfigError::Invalid("containers must not be empty".to_string()));
        }
        if self.source_container == self.target_container && self.target_prefix.is_none() {
            return Err(ConfigError::Invalid(format!(
                "source and target container are both '{}' and no target_prefix is set",
                self.source_container
            )));
        }
        Ok(())
    }

    pub fn resolved_against(mut self, base: &Path) -> Self {
        self.url_mapping = self.url_mapping.map(|s| s.resolved_against(base));
        self.user_mapping = self.user_mapping.map(|s| s.resolved_against(base));
        self.term_mapping = self.term_mapping.map(|s| s.resolved_against(base));
        self.layout_mapping = self.layout_mapping.resolved_against(base);
        self.report.path = self.report.path.map(|p| if p.is_relative() { base.join(p) } else { p });
        self
    }

    /// Load the flat tables. Absent sources give empty tables; a named source
    /// that cannot be loaded is fatal.
    pub async fn load_tables(&self, loader: &MappingLoader<'_>) -> Result<MappingTables, MappingError> {
        let mut tables = MappingTables::default();
        if let Some(ref source) = self.url_mapping {
            tables.urls = source.load_table(loader).await?;
        }
        if let Some(ref source) = self.user_mapping {
            tables.users = source.load_table(loader).await?;
        }
        if let Some(ref source) = self.term_mapping {
            tables.terms = source.load_table(loader).await?;
        }
        Ok(tables)
    }
}
