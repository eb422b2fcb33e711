use std::path::PathBuf;

/// Errors that can occur across Atlas.
///
/// Each variant wraps a specific error domain. Library crates use this type
/// directly; the binary renders it through `miette` at the boundary.
///
/// "No results" conditions (unsupported languages, unreadable files, dangling
/// references) are never reported through this type.
///
/// # Examples
///
/// ```
/// use atlas_core::AtlasError;
///
/// let err = AtlasError::Config("batch_size must be positive".into());
/// assert!(err.to_string().contains("batch_size"));
/// ```
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum AtlasError {
    /// Filesystem I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    #[diagnostic(help("check .atlas.toml or the --config path"))]
    Config(String),

    /// A bundled tag query failed to compile against its grammar.
    #[error("grammar error for {language}: {message}")]
    Grammar {
        /// Language whose query is malformed.
        language: String,
        /// Message reported by tree-sitter.
        message: String,
    },

    /// Source code parsing failure.
    #[error("parse error: {0}")]
    Parse(String),

    /// The graph store is unreachable or rejected an operation.
    #[error("database error: {0}")]
    Database(String),

    /// The graph store is temporarily unavailable (locked or busy).
    #[error("database busy: {0}")]
    Busy(String),

    /// A persistence batch failed after all retries. Earlier batches stay committed.
    #[error("{stage} batch {index} failed: {source}")]
    #[diagnostic(help("batches before index {index} were committed; run cleanup before retrying"))]
    Batch {
        /// `"nodes"` or `"edges"`.
        stage: &'static str,
        /// Zero-based batch index within the stage.
        index: usize,
        /// Underlying store error.
        #[source]
        source: Box<AtlasError>,
    },

    /// JSON serialization / deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML deserialization failure.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A required file was not found.
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),
}

impl AtlasError {
    /// Whether retrying the same operation may succeed.
    ///
    /// # Examples
    ///
    /// ```
    /// use atlas_core::AtlasError;
    ///
    /// assert!(AtlasError::Busy("locked".into()).is_transient());
    /// assert!(!AtlasError::Database("no such table".into()).is_transient());
    /// ```
    pub fn is_transient(&self) -> bool {
        matches!(self, AtlasError::Busy(_))
    }
}
