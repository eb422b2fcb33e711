use std::collections::HashSet;
use std::ops::Range;
use std::path::{Path, PathBuf};

use atlas_core::{AtlasError, LineSpan};
use streaming_iterator::StreamingIterator;
use tree_sitter::{Node, Parser, QueryCursor, Tree};

use crate::languages::{Grammar, GrammarRegistry, Language};
use crate::tokenize;

/// Tag type given to references produced by the fallback tokenizer.
pub const UNKNOWN_TAG_TYPE: &str = "unknown";

/// A definition site captured by a `name.definition.*` pattern.
///
/// # Examples
///
/// ```
/// use std::path::PathBuf;
/// use atlas_core::LineSpan;
/// use atlas_repomap::parser::Definition;
///
/// let def = Definition {
///     rel_path: PathBuf::from("pkg/shapes.py"),
///     abs_path: PathBuf::from("/repo/pkg/shapes.py"),
///     name: "area".into(),
///     tag_type: "function".into(),
///     span: LineSpan::new(4, 4),
///     byte_range: 60..64,
///     scope: vec!["Circle".into()],
/// };
/// assert_eq!(def.enclosing_class(), Some("Circle"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Definition {
    /// Path relative to the repository root.
    pub rel_path: PathBuf,
    /// Absolute path on disk.
    pub abs_path: PathBuf,
    /// Defined identifier.
    pub name: String,
    /// Last segment of the capture name (`function`, `class`, ...).
    pub tag_type: String,
    /// Rows covered by the captured name node.
    pub span: LineSpan,
    /// Byte range of the captured name node.
    pub byte_range: Range<usize>,
    /// Names of the enclosing class-like scopes, outermost first.
    pub scope: Vec<String>,
}

impl Definition {
    /// Name of the innermost enclosing class-like scope.
    pub fn enclosing_class(&self) -> Option<&str> {
        self.scope.last().map(String::as_str)
    }
}

/// A use site captured by a `name.reference.*` pattern or the fallback
/// tokenizer.
///
/// Fallback references have no line information, so `span` is optional.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    /// Path relative to the repository root.
    pub rel_path: PathBuf,
    /// Absolute path on disk.
    pub abs_path: PathBuf,
    /// Referenced identifier.
    pub name: String,
    /// Last segment of the capture name, or `"unknown"` for fallback tokens.
    pub tag_type: String,
    /// Rows covered by the captured node, `None` for fallback tokens.
    pub span: Option<LineSpan>,
    /// Names of the enclosing class-like scopes, outermost first.
    pub scope: Vec<String>,
}

impl Reference {
    /// Name of the innermost enclosing class-like scope.
    pub fn enclosing_class(&self) -> Option<&str> {
        self.scope.last().map(String::as_str)
    }
}

/// A definition or reference extracted from one file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Tag {
    Def(Definition),
    Ref(Reference),
}

impl Tag {
    /// The tagged identifier.
    pub fn name(&self) -> &str {
        match self {
            Tag::Def(d) => &d.name,
            Tag::Ref(r) => &r.name,
        }
    }

    /// Path of the file the tag came from, relative to the repository root.
    pub fn rel_path(&self) -> &Path {
        match self {
            Tag::Def(d) => &d.rel_path,
            Tag::Ref(r) => &r.rel_path,
        }
    }

    /// The tag type (`function`, `call`, `unknown`, ...).
    pub fn tag_type(&self) -> &str {
        match self {
            Tag::Def(d) => &d.tag_type,
            Tag::Ref(r) => &r.tag_type,
        }
    }
}

/// Parse `content` with the grammar's language.
///
/// Returns `Ok(None)` when tree-sitter gives up on the input.
///
/// # Errors
///
/// Returns [`AtlasError::Parse`] if the grammar cannot be loaded into the parser.
pub fn parse_source(grammar: &Grammar, content: &str) -> Result<Option<Tree>, AtlasError> {
    let mut parser = Parser::new();
    parser
        .set_language(grammar.ts_language())
        .map_err(|e| AtlasError::Parse(format!("failed to set language: {e}")))?;
    Ok(parser.parse(content, None))
}

/// Extract all tags from one file.
///
/// Unsupported languages yield an empty list. Tree-sitter is error-tolerant,
/// so files with syntax errors still produce partial results.
///
/// # Errors
///
/// Returns [`AtlasError::Parse`] if the language grammar cannot be loaded.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use atlas_repomap::languages::GrammarRegistry;
/// use atlas_repomap::parser::{extract_tags, Tag};
///
/// let registry = GrammarRegistry::new().unwrap();
/// let tags = extract_tags(
///     &registry,
///     Path::new("b.py"),
///     Path::new("/repo/b.py"),
///     "from a import foo\n\ndef bar():\n    foo()\n",
/// )
/// .unwrap();
/// assert!(tags.iter().any(|t| matches!(t, Tag::Def(d) if d.name == "bar")));
/// assert!(tags.iter().any(|t| matches!(t, Tag::Ref(r) if r.name == "foo")));
/// ```
pub fn extract_tags(
    registry: &GrammarRegistry,
    rel_path: &Path,
    abs_path: &Path,
    content: &str,
) -> Result<Vec<Tag>, AtlasError> {
    let Some(grammar) = registry.for_path(rel_path) else {
        return Ok(Vec::new());
    };
    let Some(tree) = parse_source(grammar, content)? else {
        return Ok(Vec::new());
    };
    Ok(tags_from_tree(grammar, &tree, rel_path, abs_path, content))
}

/// Run the grammar's tag query over an already parsed tree.
///
/// When the file has definitions but no references and the query declares no
/// reference captures at all, every identifier token becomes an
/// [`UNKNOWN_TAG_TYPE`] reference without a line span.
pub fn tags_from_tree(
    grammar: &Grammar,
    tree: &Tree,
    rel_path: &Path,
    abs_path: &Path,
    content: &str,
) -> Vec<Tag> {
    let language = grammar.language();
    let query = grammar.query();
    let capture_names = query.capture_names();
    let source = content.as_bytes();

    let mut tags = Vec::new();
    let mut seen: HashSet<(bool, usize)> = HashSet::new();
    let mut cursor = QueryCursor::new();
    let mut matches = cursor.matches(query, tree.root_node(), source);

    while let Some(m) = matches.next() {
        for capture in m.captures {
            let capture_name = capture_names[capture.index as usize];
            let (is_def, tag_type) = if let Some(t) = capture_name.strip_prefix("name.definition.") {
                (true, t)
            } else if let Some(t) = capture_name.strip_prefix("name.reference.") {
                (false, t)
            } else {
                continue;
            };

            let node = capture.node;
            if !seen.insert((is_def, node.start_byte())) {
                continue;
            }
            let Ok(name) = node.utf8_text(source) else {
                continue;
            };

            let span = LineSpan::new(node.start_position().row, node.end_position().row);
            let scope = enclosing_scopes(language, node, source);

            if is_def {
                tags.push(Tag::Def(Definition {
                    rel_path: rel_path.to_path_buf(),
                    abs_path: abs_path.to_path_buf(),
                    name: name.to_string(),
                    tag_type: tag_type.to_string(),
                    span,
                    byte_range: node.start_byte()..node.end_byte(),
                    scope,
                }));
            } else {
                tags.push(Tag::Ref(Reference {
                    rel_path: rel_path.to_path_buf(),
                    abs_path: abs_path.to_path_buf(),
                    name: name.to_string(),
                    tag_type: tag_type.to_string(),
                    span: Some(span),
                    scope,
                }));
            }
        }
    }

    let has_defs = tags.iter().any(|t| matches!(t, Tag::Def(_)));
    let has_refs = tags.iter().any(|t| matches!(t, Tag::Ref(_)));
    if has_defs && !has_refs && !grammar.has_reference_captures() {
        tags.extend(tokenize::identifiers(content).into_iter().map(|name| {
            Tag::Ref(Reference {
                rel_path: rel_path.to_path_buf(),
                abs_path: abs_path.to_path_buf(),
                name: name.to_string(),
                tag_type: UNKNOWN_TAG_TYPE.to_string(),
                span: None,
                scope: Vec::new(),
            })
        }));
    }

    tags
}

/// Names of the class-like ancestors of `node`, outermost first.
///
/// A class does not count as its own scope.
fn enclosing_scopes(language: Language, node: Node, source: &[u8]) -> Vec<String> {
    let class_kinds = language.class_kinds();
    let mut scopes = Vec::new();
    let mut current = node.parent();

    while let Some(ancestor) = current {
        if class_kinds.contains(&ancestor.kind()) {
            let named = scope_name_node(&ancestor);
            if named.map(|n| n.id()) != Some(node.id()) {
                if let Some(name) = named.and_then(|n| n.utf8_text(source).ok()) {
                    scopes.push(name.to_string());
                }
            }
        }
        current = ancestor.parent();
    }

    scopes.reverse();
    scopes
}

fn scope_name_node<'t>(node: &Node<'t>) -> Option<Node<'t>> {
    node.child_by_field_name("name")
        .or_else(|| node.child_by_field_name("type"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags_for(path: &str, content: &str) -> Vec<Tag> {
        let registry = GrammarRegistry::new().unwrap();
        extract_tags(
            &registry,
            Path::new(path),
            &Path::new("/repo").join(path),
            content,
        )
        .unwrap()
    }

    fn defs(tags: &[Tag]) -> Vec<&Definition> {
        tags.iter()
            .filter_map(|t| match t {
                Tag::Def(d) => Some(d),
                Tag::Ref(_) => None,
            })
            .collect()
    }

    fn refs(tags: &[Tag]) -> Vec<&Reference> {
        tags.iter()
            .filter_map(|t| match t {
                Tag::Ref(r) => Some(r),
                Tag::Def(_) => None,
            })
            .collect()
    }

    #[test]
    fn python_defs_and_calls() {
        let src = "class Shape:\n    def area(self):\n        return compute(self)\n";
        let tags = tags_for("shape.py", src);

        let defs = defs(&tags);
        assert_eq!(defs.len(), 2);
        let shape = defs.iter().find(|d| d.name == "Shape").unwrap();
        assert_eq!(shape.tag_type, "class");
        assert!(shape.scope.is_empty());
        let area = defs.iter().find(|d| d.name == "area").unwrap();
        assert_eq!(area.span, LineSpan::new(1, 1));
        assert_eq!(area.enclosing_class(), Some("Shape"));

        let refs = refs(&tags);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].name, "compute");
        assert_eq!(refs[0].tag_type, "call");
        assert_eq!(refs[0].span, Some(LineSpan::new(2, 2)));
        assert_eq!(refs[0].enclosing_class(), Some("Shape"));
    }

    #[test]
    fn rust_impl_methods_are_scoped_by_type() {
        let src = "struct Config;\n\nimpl Config {\n    fn load() -> Self { parse() }\n}\n";
        let tags = tags_for("src/config.rs", src);

        let load = defs(&tags).into_iter().find(|d| d.name == "load").unwrap();
        assert_eq!(load.enclosing_class(), Some("Config"));

        let impl_ref = refs(&tags)
            .into_iter()
            .find(|r| r.tag_type == "implementation")
            .unwrap();
        assert_eq!(impl_ref.name, "Config");
        assert!(impl_ref.scope.is_empty());
    }

    #[test]
    fn c_file_falls_back_to_tokens_without_lines() {
        let src = "int helper(int x) { return x; }\nint main() { return helper(2); }\n";
        let tags = tags_for("main.c", src);

        assert!(defs(&tags).iter().any(|d| d.name == "main"));
        let refs = refs(&tags);
        assert!(!refs.is_empty());
        assert!(refs.iter().all(|r| r.span.is_none()));
        assert!(refs.iter().all(|r| r.tag_type == UNKNOWN_TAG_TYPE));
        assert!(refs.iter().any(|r| r.name == "helper"));
    }

    #[test]
    fn python_without_calls_gets_no_fallback() {
        let tags = tags_for("a.py", "def foo():\n    return 1\n");
        assert_eq!(defs(&tags).len(), 1);
        assert!(refs(&tags).is_empty());
    }

    #[test]
    fn c_without_defs_gets_no_fallback() {
        let tags = tags_for("x.h", "extern int counter;\n");
        assert!(refs(&tags).is_empty());
    }

    #[test]
    fn unknown_extension_yields_nothing() {
        assert!(tags_for("notes.txt", "def foo(): pass").is_empty());
    }

    #[test]
    fn syntax_errors_still_produce_partial_tags() {
        let tags = tags_for("broken.py", "def ok():\n    pass\n\ndef broken(:\n");
        assert!(defs(&tags).iter().any(|d| d.name == "ok"));
    }

    #[test]
    fn typescript_interfaces_and_new() {
        let src = "interface Shape { area(): number }\nclass Circle {}\nconst c = new Circle();\n";
        let tags = tags_for("shapes.ts", src);
        let defs = defs(&tags);
        assert!(defs.iter().any(|d| d.name == "Shape" && d.tag_type == "interface"));
        assert!(refs(&tags)
            .iter()
            .any(|r| r.name == "Circle" && r.tag_type == "class"));
    }
}
