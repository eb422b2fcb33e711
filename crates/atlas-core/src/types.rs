use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// An inclusive range of zero-based line rows within one file.
///
/// # Examples
///
/// ```
/// use atlas_core::LineSpan;
///
/// let span = LineSpan::new(3, 7);
/// assert!(span.contains(5));
/// assert!(!span.contains(8));
/// assert_eq!(span.len(), 5);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LineSpan {
    /// First row (zero-based).
    pub start: usize,
    /// Last row (zero-based, inclusive).
    pub end: usize,
}

impl LineSpan {
    /// Build a span; `end` is clamped to be at least `start`.
    pub fn new(start: usize, end: usize) -> Self {
        Self {
            start,
            end: end.max(start),
        }
    }

    /// Whether `row` falls inside the span.
    pub fn contains(&self, row: usize) -> bool {
        self.start <= row && row <= self.end
    }

    /// Whether `other` lies entirely inside this span.
    pub fn encloses(&self, other: &LineSpan) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Number of rows covered.
    pub fn len(&self) -> usize {
        self.end - self.start + 1
    }

    /// Always `false`: a span covers at least one row.
    pub fn is_empty(&self) -> bool {
        false
    }
}

impl fmt::Display for LineSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start + 1, self.end + 1)
    }
}

/// Repository metadata supplied by the hosting collaborator.
///
/// `repo_id` scopes every persisted node and edge; `owner_identity` feeds the
/// deterministic node-id hash.
///
/// # Examples
///
/// ```
/// use atlas_core::RepoMetadata;
///
/// let meta = RepoMetadata {
///     repo_id: "proj-1".into(),
///     owner_identity: "user-42".into(),
///     default_branch: "main".into(),
/// };
/// assert_eq!(meta.default_branch, "main");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoMetadata {
    /// Repository-scoped identifier for the persisted graph.
    pub repo_id: String,
    /// Identity of the owning user or organisation.
    pub owner_identity: String,
    /// Branch the graph was built from.
    pub default_branch: String,
}

/// Output format for CLI results.
///
/// # Examples
///
/// ```
/// use atlas_core::OutputFormat;
///
/// let fmt: OutputFormat = "json".parse().unwrap();
/// assert_eq!(fmt, OutputFormat::Json);
/// assert_eq!(fmt.to_string(), "json");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable text.
    #[default]
    Text,
    /// Machine-readable JSON with camelCase keys.
    Json,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}
