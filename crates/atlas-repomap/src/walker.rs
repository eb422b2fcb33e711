use std::path::{Path, PathBuf};

use atlas_core::{AtlasError, WalkConfig};

use crate::languages::Language;

/// Number of bytes to check for binary detection.
const BINARY_CHECK_SIZE: usize = 8192;

/// A decodable text file discovered during repository walking.
///
/// # Examples
///
/// ```
/// use std::path::PathBuf;
/// use atlas_repomap::languages::Language;
/// use atlas_repomap::walker::SourceFile;
///
/// let file = SourceFile {
///     path: PathBuf::from("src/main.rs"),
///     abs_path: PathBuf::from("/repo/src/main.rs"),
///     language: Language::Rust,
///     content: "fn main() {}".to_string(),
/// };
/// assert!(file.is_supported());
/// ```
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Path relative to the repository root.
    pub path: PathBuf,
    /// Absolute path on disk.
    pub abs_path: PathBuf,
    /// Detected programming language (`Unknown` for plain text).
    pub language: Language,
    /// Full file content.
    pub content: String,
}

impl SourceFile {
    /// Whether a grammar exists for this file's language.
    pub fn is_supported(&self) -> bool {
        self.language != Language::Unknown
    }
}

/// Walk a repository, respecting `.gitignore`, returning every decodable text file.
///
/// Skips binary files (NUL bytes near the start), files larger than
/// `config.max_file_size`, and files that are not valid UTF-8. Files in
/// unsupported languages are kept with [`Language::Unknown`]. Returned paths
/// are relative to `root` and sorted.
///
/// # Errors
///
/// Returns [`AtlasError::FileNotFound`] if `root` is not a directory.
///
/// # Examples
///
/// ```no_run
/// use std::path::Path;
/// use atlas_core::WalkConfig;
/// use atlas_repomap::walker::walk_repo;
///
/// let files = walk_repo(Path::new("."), &WalkConfig::default()).unwrap();
/// for f in &files {
///     println!("{}: {}", f.path.display(), f.language);
/// }
/// ```
pub fn walk_repo(root: &Path, config: &WalkConfig) -> Result<Vec<SourceFile>, AtlasError> {
    if !root.is_dir() {
        return Err(AtlasError::FileNotFound(root.to_path_buf()));
    }

    let walker = ignore::WalkBuilder::new(root).build();
    let mut files = Vec::new();

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::debug!(error = %e, "skipping unreadable walk entry");
                continue;
            }
        };

        let Some(file_type) = entry.file_type() else {
            continue;
        };
        if !file_type.is_file() {
            continue;
        }

        let path = entry.path();
        if let Some(file) = read_source_file(root, path, config.max_file_size) {
            files.push(file);
        }
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    tracing::debug!(root = %root.display(), files = files.len(), "walked repository");
    Ok(files)
}

/// Load one file as a [`SourceFile`], or `None` when it is not usable text.
///
/// `path` may be absolute or relative to `root`.
pub fn read_source_file(root: &Path, path: &Path, max_file_size: u64) -> Option<SourceFile> {
    let abs_path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    };

    let metadata = match std::fs::metadata(&abs_path) {
        Ok(m) => m,
        Err(e) => {
            tracing::debug!(path = %abs_path.display(), error = %e, "cannot stat file");
            return None;
        }
    };
    if !metadata.is_file() {
        return None;
    }
    if metadata.len() > max_file_size {
        tracing::debug!(path = %abs_path.display(), size = metadata.len(), "skipping large file");
        return None;
    }

    let content = match std::fs::read_to_string(&abs_path) {
        Ok(c) => c,
        Err(e) => {
            tracing::debug!(path = %abs_path.display(), error = %e, "skipping undecodable file");
            return None;
        }
    };

    let check_len = content.len().min(BINARY_CHECK_SIZE);
    if content.as_bytes()[..check_len].contains(&0) {
        tracing::debug!(path = %abs_path.display(), "skipping binary file");
        return None;
    }

    let relative = match abs_path.strip_prefix(root) {
        Ok(r) => r.to_path_buf(),
        Err(_) => abs_path.clone(),
    };

    Some(SourceFile {
        language: Language::from_path(&relative),
        path: relative,
        abs_path,
        content,
    })
}
