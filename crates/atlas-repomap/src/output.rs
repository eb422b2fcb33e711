use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use crate::graph::RankedItem;
use crate::languages::GrammarRegistry;
use crate::render::RenderCache;

/// Everything [`to_tree`] needs besides the ranked entries.
pub struct TreeContext<'a> {
    /// Grammars used to find enclosing scopes.
    pub registry: &'a GrammarRegistry,
    /// File contents keyed by relative path.
    pub sources: &'a HashMap<PathBuf, String>,
    /// Files in focus; never rendered.
    pub focus_files: &'a BTreeSet<PathBuf>,
    /// Output lines are cut to this many characters.
    pub max_line_length: usize,
}

/// Render ranked entries as the repo map tree.
///
/// Entries are grouped per file in path order. A file with definitions is
/// rendered as `"\n{path}:\n{excerpt}"`, a bare file entry as `"\n{path}\n"`.
/// Every line is cut to `max_line_length` characters. An empty entry list
/// renders as an empty string.
///
/// # Examples
///
/// ```
/// use std::collections::{BTreeSet, HashMap};
/// use std::path::PathBuf;
/// use atlas_repomap::graph::RankedItem;
/// use atlas_repomap::languages::GrammarRegistry;
/// use atlas_repomap::output::{to_tree, TreeContext};
/// use atlas_repomap::render::RenderCache;
///
/// let registry = GrammarRegistry::new().unwrap();
/// let sources = HashMap::new();
/// let focus = BTreeSet::new();
/// let ctx = TreeContext {
///     registry: &registry,
///     sources: &sources,
///     focus_files: &focus,
///     max_line_length: 100,
/// };
/// let items = vec![RankedItem::File(PathBuf::from("README.md"))];
/// let tree = to_tree(&items, &ctx, &mut RenderCache::new());
/// assert_eq!(tree, "\nREADME.md\n");
/// ```
pub fn to_tree(items: &[RankedItem], ctx: &TreeContext<'_>, cache: &mut RenderCache) -> String {
    // path -> lines of interest (None for bare file entries)
    let mut by_file: BTreeMap<&Path, Option<BTreeSet<usize>>> = BTreeMap::new();
    for item in items {
        let path = item.rel_path();
        if ctx.focus_files.contains(path) {
            continue;
        }
        let entry = by_file.entry(path).or_default();
        if let RankedItem::Tag(def) = item {
            entry.get_or_insert_with(BTreeSet::new).insert(def.span.start);
        }
    }

    if by_file.is_empty() {
        return String::new();
    }

    let mut out = String::new();
    for (path, lois) in &by_file {
        out.push('\n');
        match (lois, ctx.sources.get(*path)) {
            (Some(lois), Some(content)) => {
                out.push_str(&format!("{}:\n", path.display()));
                out.push_str(cache.render(ctx.registry, path, content, lois));
            }
            _ => {
                out.push_str(&format!("{}\n", path.display()));
            }
        }
    }

    let mut truncated = String::with_capacity(out.len());
    for line in out.lines() {
        truncated.push_str(truncate_line(line, ctx.max_line_length));
        truncated.push('\n');
    }
    truncated
}

/// Cut `line` to at most `max_chars` characters.
fn truncate_line(line: &str, max_chars: usize) -> &str {
    match line.char_indices().nth(max_chars) {
        Some((end, _)) => &line[..end],
        None => line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Definition;
    use atlas_core::LineSpan;

    fn tag(path: &str, line: usize) -> RankedItem {
        RankedItem::Tag(Definition {
            rel_path: PathBuf::from(path),
            abs_path: PathBuf::from("/repo").join(path),
            name: "x".into(),
            tag_type: "function".into(),
            span: LineSpan::new(line, line),
            byte_range: 0..1,
            scope: vec![],
        })
    }

    fn render(items: &[RankedItem], sources: &[(&str, &str)], focus: &[&str], width: usize) -> String {
        let registry = GrammarRegistry::new().unwrap();
        let sources: HashMap<PathBuf, String> = sources
            .iter()
            .map(|(p, c)| (PathBuf::from(p), c.to_string()))
            .collect();
        let focus: BTreeSet<PathBuf> = focus.iter().map(PathBuf::from).collect();
        let ctx = TreeContext {
            registry: &registry,
            sources: &sources,
            focus_files: &focus,
            max_line_length: width,
        };
        to_tree(items, &ctx, &mut RenderCache::new())
    }

    #[test]
    fn groups_tags_per_file_in_path_order() {
        let items = vec![tag("b.txt", 0), tag("a.txt", 1), tag("b.txt", 2)];
        let tree = render(
            &items,
            &[("a.txt", "one\ntwo\n"), ("b.txt", "x\ny\nz\nw\n")],
            &[],
            100,
        );
        assert_eq!(tree, "\na.txt:\n⋮...\n│two\n\nb.txt:\n│x\n│y\n│z\n⋮...\n");
    }

    #[test]
    fn focus_files_are_excluded() {
        let items = vec![tag("a.txt", 0), RankedItem::File(PathBuf::from("b.txt"))];
        let tree = render(&items, &[("a.txt", "one\n")], &["a.txt"], 100);
        assert_eq!(tree, "\nb.txt\n");
    }

    #[test]
    fn long_lines_are_truncated_on_char_boundaries() {
        let items = vec![tag("a.txt", 0)];
        let tree = render(&items, &[("a.txt", "éééééééé\n")], &[], 6);
        assert_eq!(tree, "\na.txt:\n│ééééé\n");
    }

    #[test]
    fn empty_items_render_nothing() {
        assert!(render(&[], &[], &[], 100).is_empty());
    }
}
