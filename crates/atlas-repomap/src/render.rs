//! Source excerpts with their enclosing scopes.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use tree_sitter::Node;

use crate::languages::GrammarRegistry;
use crate::parser::parse_source;

/// Prefix for every shown line.
pub const LINE_MARKER: &str = "\u{2502}";

/// Placeholder for a run of elided lines.
pub const ELISION: &str = "\u{22ee}...";

/// Rendered excerpts for one run, keyed by file and lines of interest.
#[derive(Debug, Default)]
pub struct RenderCache {
    entries: HashMap<(PathBuf, Vec<usize>), String>,
    hits: usize,
}

impl RenderCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Excerpt of `content` around `lois`, rendered once per key.
    pub fn render(
        &mut self,
        registry: &GrammarRegistry,
        rel_path: &Path,
        content: &str,
        lois: &BTreeSet<usize>,
    ) -> &str {
        let key = (rel_path.to_path_buf(), lois.iter().copied().collect::<Vec<_>>());
        if self.entries.contains_key(&key) {
            self.hits += 1;
        }
        self.entries
            .entry(key)
            .or_insert_with(|| render_excerpt(registry, rel_path, content, lois))
    }

    /// Drop every excerpt and reset the hit counter.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.hits = 0;
    }

    /// Number of distinct excerpts rendered.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been rendered yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of lookups answered from the cache.
    pub fn hits(&self) -> usize {
        self.hits
    }
}

/// Render the lines of interest of one file plus the header line of every
/// structural scope (function, class, impl, ...) that encloses them.
///
/// One-line gaps between shown lines are closed, and a blank line right after
/// a shown line is shown too. Shown lines are prefixed with `│`; each elided
/// run becomes a single `⋮...` line. Files without a grammar show only the
/// lines of interest.
///
/// # Examples
///
/// ```
/// use std::collections::BTreeSet;
/// use std::path::Path;
/// use atlas_repomap::languages::GrammarRegistry;
/// use atlas_repomap::render::render_excerpt;
///
/// let registry = GrammarRegistry::new().unwrap();
/// let src = "import os\n\nclass Cache:\n    size = 0\n\n    def get(self, key):\n        return key\n";
/// let lois = BTreeSet::from([5]);
/// let out = render_excerpt(&registry, Path::new("cache.py"), src, &lois);
/// assert_eq!(out, "⋮...\n│class Cache:\n⋮...\n│    def get(self, key):\n⋮...\n");
/// ```
pub fn render_excerpt(
    registry: &GrammarRegistry,
    rel_path: &Path,
    content: &str,
    lois: &BTreeSet<usize>,
) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let mut show: BTreeSet<usize> = lois.iter().copied().filter(|&l| l < lines.len()).collect();

    for (start, end) in scope_spans(registry, rel_path, content) {
        if show.iter().any(|&l| start <= l && l <= end) {
            show.insert(start);
        }
    }

    let show = close_small_gaps(&lines, show);

    let mut out = String::new();
    let mut dots = !show.contains(&0);
    for (i, line) in lines.iter().enumerate() {
        if !show.contains(&i) {
            if dots {
                out.push_str(ELISION);
                out.push('\n');
                dots = false;
            }
            continue;
        }
        out.push_str(LINE_MARKER);
        out.push_str(line);
        out.push('\n');
        dots = true;
    }
    out
}

/// Row spans of every structural node, found without recursion.
fn scope_spans(registry: &GrammarRegistry, rel_path: &Path, content: &str) -> Vec<(usize, usize)> {
    let Some(grammar) = registry.for_path(rel_path) else {
        return Vec::new();
    };
    let tree = match parse_source(grammar, content) {
        Ok(Some(tree)) => tree,
        Ok(None) => return Vec::new(),
        Err(e) => {
            tracing::debug!(path = %rel_path.display(), error = %e, "cannot parse for rendering");
            return Vec::new();
        }
    };

    let language = grammar.language();
    let mut spans = Vec::new();
    let mut stack: Vec<Node> = vec![tree.root_node()];
    while let Some(node) = stack.pop() {
        if language.category_of_kind(node.kind()).is_some() {
            spans.push((node.start_position().row, node.end_position().row));
        }
        let mut cursor = node.walk();
        stack.extend(node.children(&mut cursor));
    }
    spans
}

fn close_small_gaps(lines: &[&str], show: BTreeSet<usize>) -> BTreeSet<usize> {
    let mut closed = show.clone();
    let sorted: Vec<usize> = show.into_iter().collect();
    for pair in sorted.windows(2) {
        if pair[1] - pair[0] == 2 {
            closed.insert(pair[0] + 1);
        }
    }

    let shown: Vec<usize> = closed.iter().copied().collect();
    for i in shown {
        if i + 2 < lines.len() && !lines[i].trim().is_empty() && lines[i + 1].trim().is_empty() {
            closed.insert(i + 1);
        }
    }
    closed
}
