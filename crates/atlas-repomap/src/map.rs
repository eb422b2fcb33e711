use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

use atlas_core::{AtlasError, RepoMapConfig, WalkConfig};
use rayon::prelude::*;

use crate::budget::{fit_to_budget, ApproxTokenCounter, TokenCounter};
use crate::graph::{FileGraph, RankContext};
use crate::languages::GrammarRegistry;
use crate::output::{to_tree, TreeContext};
use crate::parser::{extract_tags, Tag};
use crate::render::RenderCache;
use crate::walker::{read_source_file, SourceFile};

/// Room left for the rest of the prompt when the no-focus multiplier applies.
const CONTEXT_WINDOW_PADDING: usize = 4096;

/// What to put in one repo map.
///
/// Paths may be absolute or relative to the repository root.
#[derive(Debug, Clone, Default)]
pub struct MapRequest {
    /// Files already in focus; excluded from the map but used to bias ranking.
    pub focus_files: Vec<PathBuf>,
    /// Candidate files to summarize.
    pub other_files: Vec<PathBuf>,
    /// Files named in the conversation.
    pub mentioned_files: BTreeSet<PathBuf>,
    /// Identifiers named in the conversation.
    pub mentioned_idents: BTreeSet<String>,
    /// Token budget; falls back to `map_tokens` from the configuration.
    pub token_budget: Option<usize>,
}

/// A repo map run: owns the compiled grammars, the render cache and the set
/// of files already warned about.
///
/// One `RepoMap` can serve many requests. Files are re-read and the render
/// cache is rebuilt on every [`RepoMap::generate`] call, so edits between
/// requests always show up.
///
/// # Examples
///
/// ```no_run
/// use std::path::{Path, PathBuf};
/// use atlas_core::{RepoMapConfig, WalkConfig};
/// use atlas_repomap::{MapRequest, RepoMap};
///
/// let mut repo_map = RepoMap::new(Path::new("."), RepoMapConfig::default(), WalkConfig::default()).unwrap();
/// let request = MapRequest {
///     other_files: vec![PathBuf::from("src/main.rs")],
///     ..Default::default()
/// };
/// println!("{}", repo_map.generate(&request).unwrap());
/// ```
pub struct RepoMap {
    root: PathBuf,
    config: RepoMapConfig,
    walk: WalkConfig,
    registry: GrammarRegistry,
    counter: Box<dyn TokenCounter>,
    cache: RenderCache,
    warned: HashSet<PathBuf>,
}

impl RepoMap {
    /// Create a run rooted at `root` with the approximate token counter.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::Grammar`] if a bundled tag query is malformed.
    pub fn new(root: &Path, config: RepoMapConfig, walk: WalkConfig) -> Result<Self, AtlasError> {
        Ok(Self {
            root: root.to_path_buf(),
            config,
            walk,
            registry: GrammarRegistry::new()?,
            counter: Box::new(ApproxTokenCounter),
            cache: RenderCache::new(),
            warned: HashSet::new(),
        })
    }

    /// Replace the token counter.
    pub fn with_token_counter(mut self, counter: Box<dyn TokenCounter>) -> Self {
        self.counter = counter;
        self
    }

    /// The compiled grammars owned by this run.
    pub fn registry(&self) -> &GrammarRegistry {
        &self.registry
    }

    /// Render cache statistics: `(entries, hits)`.
    pub fn cache_stats(&self) -> (usize, usize) {
        (self.cache.len(), self.cache.hits())
    }

    /// Token count of `text` under this run's counter.
    pub fn count_tokens(&self, text: &str) -> usize {
        self.counter.count(text)
    }

    /// Generate the repo map for `request`.
    ///
    /// Missing or non-regular files are skipped with one warning per run.
    /// The result never exceeds the effective budget; it is empty when the
    /// budget is zero or nothing links to anything.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::Parse`] if a grammar cannot be loaded.
    pub fn generate(&mut self, request: &MapRequest) -> Result<String, AtlasError> {
        self.cache.clear();
        let budget = self.effective_budget(request);
        if budget == 0 {
            return Ok(String::new());
        }

        let focus = self.load_all(&request.focus_files);
        let others = self.load_all(&request.other_files);

        let context = RankContext {
            focus_files: focus.iter().map(|f| f.path.clone()).collect(),
            other_files: others.iter().map(|f| f.path.clone()).collect(),
            mentioned_files: request
                .mentioned_files
                .iter()
                .map(|p| self.relative(p))
                .collect(),
            mentioned_idents: request.mentioned_idents.clone(),
        };

        let mut files: Vec<SourceFile> = focus;
        files.extend(others);
        files.sort_by(|a, b| a.path.cmp(&b.path));
        files.dedup_by(|a, b| a.path == b.path);

        let registry = &self.registry;
        let per_file: Vec<Result<Vec<Tag>, AtlasError>> = files
            .par_iter()
            .map(|f| extract_tags(registry, &f.path, &f.abs_path, &f.content))
            .collect();
        let mut tags = Vec::new();
        for result in per_file {
            tags.extend(result?);
        }

        let graph = FileGraph::build(&tags, &context);
        let ranked = graph.ranked_items(&context);
        tracing::debug!(
            files = files.len(),
            tags = tags.len(),
            graph_nodes = graph.node_count(),
            graph_edges = graph.edge_count(),
            ranked = ranked.len(),
            "ranked repository"
        );
        if ranked.is_empty() {
            return Ok(String::new());
        }

        let prefix = self.prefix(!context.focus_files.is_empty());
        let prefix_tokens = prefix.as_deref().map_or(0, |p| self.counter.count(p));
        let map_budget = budget.saturating_sub(prefix_tokens);

        let sources: HashMap<PathBuf, String> =
            files.into_iter().map(|f| (f.path, f.content)).collect();
        let tree_ctx = TreeContext {
            registry: &self.registry,
            sources: &sources,
            focus_files: &context.focus_files,
            max_line_length: self.config.max_line_length,
        };
        let cache = &mut self.cache;
        let counter = &*self.counter;
        let map = fit_to_budget(ranked.len(), map_budget, counter, |n| {
            to_tree(&ranked[..n], &tree_ctx, cache)
        });

        if map.is_empty() {
            return Ok(map);
        }
        Ok(match prefix {
            Some(prefix) => format!("{prefix}{map}"),
            None => map,
        })
    }

    fn effective_budget(&self, request: &MapRequest) -> usize {
        let budget = request.token_budget.unwrap_or(self.config.map_tokens);
        match self.config.max_context_window {
            Some(window) if request.focus_files.is_empty() && budget > 0 => {
                let raised = budget.saturating_mul(self.config.map_multiplier_no_files);
                raised.min(window.saturating_sub(CONTEXT_WINDOW_PADDING))
            }
            _ => budget,
        }
    }

    fn prefix(&self, has_focus: bool) -> Option<String> {
        let template = self.config.repo_content_prefix.as_deref()?;
        let other = if has_focus { "other " } else { "" };
        Some(template.replace("{other}", other))
    }

    fn relative(&self, path: &Path) -> PathBuf {
        path.strip_prefix(&self.root).unwrap_or(path).to_path_buf()
    }

    fn load_all(&mut self, paths: &[PathBuf]) -> Vec<SourceFile> {
        let mut files = Vec::new();
        for path in paths {
            let abs = if path.is_absolute() {
                path.clone()
            } else {
                self.root.join(path)
            };
            if !abs.is_file() {
                if self.warned.insert(abs.clone()) {
                    tracing::warn!(path = %abs.display(), "repo map can't include file: not found or not a regular file");
                }
                continue;
            }
            if let Some(file) = read_source_file(&self.root, &abs, self.walk.max_file_size) {
                files.push(file);
            }
        }
        files
    }

    #[cfg(test)]
    fn warned_count(&self) -> usize {
        self.warned.len()
    }
}

/// Build a repo map in one call with default settings.
///
/// See [`RepoMap::generate`].
///
/// # Errors
///
/// Returns [`AtlasError::Grammar`] or [`AtlasError::Parse`] if a grammar
/// cannot be loaded.
///
/// # Examples
///
/// ```no_run
/// use std::collections::BTreeSet;
/// use std::path::{Path, PathBuf};
/// use atlas_repomap::build_repo_map;
///
/// let map = build_repo_map(
///     Path::new("."),
///     &[],
///     &[PathBuf::from("src/lib.rs")],
///     &BTreeSet::new(),
///     &BTreeSet::new(),
///     1024,
/// )
/// .unwrap();
/// println!("{map}");
/// ```
pub fn build_repo_map(
    root: &Path,
    focus_files: &[PathBuf],
    other_files: &[PathBuf],
    mentioned_files: &BTreeSet<PathBuf>,
    mentioned_idents: &BTreeSet<String>,
    token_budget: usize,
) -> Result<String, AtlasError> {
    let mut repo_map = RepoMap::new(root, RepoMapConfig::default(), WalkConfig::default())?;
    repo_map.generate(&MapRequest {
        focus_files: focus_files.to_vec(),
        other_files: other_files.to_vec(),
        mentioned_files: mentioned_files.clone(),
        mentioned_idents: mentioned_idents.clone(),
        token_budget: Some(token_budget),
    })
}
