use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::AtlasError;

/// Top-level configuration loaded from `.atlas.toml`.
///
/// Every field has a default, so an empty file (or no file at all) is valid.
///
/// # Examples
///
/// ```
/// use atlas_core::AtlasConfig;
///
/// let config = AtlasConfig::default();
/// assert_eq!(config.repomap.map_tokens, 1024);
/// assert_eq!(config.graph.batch_size, 300);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AtlasConfig {
    /// Repo map generation settings.
    #[serde(default)]
    pub repomap: RepoMapConfig,
    /// Repository walking settings.
    #[serde(default)]
    pub walk: WalkConfig,
    /// Graph persistence settings.
    #[serde(default)]
    pub graph: GraphConfig,
}

impl AtlasConfig {
    /// Load configuration from a TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::Io`] if the file cannot be read,
    /// [`AtlasError::Toml`] if the content is not valid TOML, or
    /// [`AtlasError::Config`] if a value is out of range.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use atlas_core::AtlasConfig;
    /// use std::path::Path;
    ///
    /// let config = AtlasConfig::from_file(Path::new(".atlas.toml")).unwrap();
    /// ```
    pub fn from_file(path: &Path) -> Result<Self, AtlasError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::Toml`] if parsing fails, or
    /// [`AtlasError::Config`] if a value is out of range.
    ///
    /// # Examples
    ///
    /// ```
    /// use atlas_core::AtlasConfig;
    ///
    /// let toml = r#"
    /// [graph]
    /// batch_size = 50
    /// "#;
    /// let config = AtlasConfig::from_toml(toml).unwrap();
    /// assert_eq!(config.graph.batch_size, 50);
    /// ```
    pub fn from_toml(content: &str) -> Result<Self, AtlasError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AtlasError> {
        if self.graph.batch_size == 0 {
            return Err(AtlasError::Config("graph.batch_size must be positive".into()));
        }
        if self.repomap.max_line_length == 0 {
            return Err(AtlasError::Config(
                "repomap.max_line_length must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Repo map generation configuration.
///
/// # Examples
///
/// ```
/// use atlas_core::RepoMapConfig;
///
/// let config = RepoMapConfig::default();
/// assert_eq!(config.map_multiplier_no_files, 8);
/// assert_eq!(config.max_line_length, 100);
/// assert!(config.max_context_window.is_none());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoMapConfig {
    /// Default token budget for the map (default: 1024).
    #[serde(default = "default_map_tokens")]
    pub map_tokens: usize,
    /// Budget multiplier applied when no files are in focus (default: 8).
    #[serde(default = "default_map_multiplier")]
    pub map_multiplier_no_files: usize,
    /// Model context window; enables the no-focus multiplier when set.
    pub max_context_window: Option<usize>,
    /// Rendered lines are cut to this many characters (default: 100).
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
    /// Text prepended to non-empty maps. `{other}` expands to `"other "` when
    /// files are in focus.
    pub repo_content_prefix: Option<String>,
}

fn default_map_tokens() -> usize {
    1024
}

fn default_map_multiplier() -> usize {
    8
}

fn default_max_line_length() -> usize {
    100
}

impl Default for RepoMapConfig {
    fn default() -> Self {
        Self {
            map_tokens: default_map_tokens(),
            map_multiplier_no_files: default_map_multiplier(),
            max_context_window: None,
            max_line_length: default_max_line_length(),
            repo_content_prefix: None,
        }
    }
}

/// Repository walking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkConfig {
    /// Files larger than this many bytes are skipped (default: 1 MiB).
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
}

fn default_max_file_size() -> u64 {
    1_048_576
}

impl Default for WalkConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
        }
    }
}

/// Graph persistence configuration.
///
/// # Examples
///
/// ```
/// use atlas_core::GraphConfig;
///
/// let config = GraphConfig::default();
/// assert_eq!(config.batch_size, 300);
/// assert_eq!(config.max_retries, 3);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Path of the SQLite graph database (default: `.atlas/graph.db`).
    #[serde(default = "default_database")]
    pub database: PathBuf,
    /// Nodes or edges written per batch (default: 300).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Retries per batch on transient store failures (default: 3).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay between retries in milliseconds, multiplied by the attempt (default: 50).
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_database() -> PathBuf {
    PathBuf::from(".atlas/graph.db")
}

fn default_batch_size() -> usize {
    300
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    50
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let config = AtlasConfig::default();
        assert_eq!(config.repomap.map_tokens, 1024);
        assert_eq!(config.repomap.map_multiplier_no_files, 8);
        assert_eq!(config.repomap.max_line_length, 100);
        assert!(config.repomap.repo_content_prefix.is_none());
        assert_eq!(config.walk.max_file_size, 1_048_576);
        assert_eq!(config.graph.database, PathBuf::from(".atlas/graph.db"));
        assert_eq!(config.graph.batch_size, 300);
        assert_eq!(config.graph.max_retries, 3);
        assert_eq!(config.graph.retry_backoff_ms, 50);
    }

    #[test]
    fn parse_full_toml() {
        let toml = r#"
[repomap]
map_tokens = 2048
max_context_window = 128000
repo_content_prefix = "Here are summaries of some {other}files:\n"

[walk]
max_file_size = 4096

[graph]
database = "/tmp/graph.db"
batch_size = 100
max_retries = 5
"#;
        let config = AtlasConfig::from_toml(toml).unwrap();
        assert_eq!(config.repomap.map_tokens, 2048);
        assert_eq!(config.repomap.max_context_window, Some(128_000));
        assert!(config
            .repomap
            .repo_content_prefix
            .as_deref()
            .unwrap()
            .contains("{other}"));
        assert_eq!(config.walk.max_file_size, 4096);
        assert_eq!(config.graph.database, PathBuf::from("/tmp/graph.db"));
        assert_eq!(config.graph.batch_size, 100);
        assert_eq!(config.graph.max_retries, 5);
        assert_eq!(config.graph.retry_backoff_ms, 50);
    }

    #[test]
    fn empty_toml_gives_defaults() {
        let config = AtlasConfig::from_toml("").unwrap();
        assert_eq!(config.repomap.map_tokens, 1024);
        assert_eq!(config.graph.batch_size, 300);
    }

    #[test]
    fn invalid_toml_returns_error() {
        let result = AtlasConfig::from_toml("{{invalid}}");
        assert!(matches!(result, Err(AtlasError::Toml(_))));
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let result = AtlasConfig::from_toml("[graph]\nbatch_size = 0\n");
        assert!(matches!(result, Err(AtlasError::Config(_))));
    }
}
