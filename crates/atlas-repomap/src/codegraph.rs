//! Whole-repository definition/reference graph for persistence.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use atlas_core::{AtlasError, LineSpan, WalkConfig};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use rayon::prelude::*;
use serde::Serialize;
use tree_sitter::{Node, Tree};

use crate::languages::{GrammarRegistry, Language, StructuralCategory};
use crate::parser::{parse_source, tags_from_tree, Definition, Reference, Tag};
use crate::resolve::DefinitionIndex;
use crate::walker::{walk_repo, SourceFile};

/// What a [`CodeNode`] stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Function,
    Class,
}

impl NodeKind {
    /// Lowercase label, as persisted.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::File => "file",
            NodeKind::Function => "function",
            NodeKind::Class => "class",
        }
    }
}

impl From<StructuralCategory> for NodeKind {
    fn from(category: StructuralCategory) -> Self {
        match category {
            StructuralCategory::Function => NodeKind::Function,
            StructuralCategory::Class => NodeKind::Class,
        }
    }
}

/// A file or a definition in the code graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeNode {
    pub kind: NodeKind,
    /// Identifier, or the relative path for file nodes.
    pub name: String,
    /// `rel_path` for files, `rel_path:Outer.Inner.name` for definitions.
    pub qualified_path: String,
    pub rel_path: PathBuf,
    /// Zero-based rows of the definition; `None` for file nodes.
    pub span: Option<LineSpan>,
    /// Exact source of the definition, or the whole file.
    pub source_text: String,
}

/// A resolved reference from a referencing node to its definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeEdge {
    /// Reference category from the tag query (`call`, `class`, `unknown`, ...).
    pub relationship: String,
    /// The referenced identifier.
    pub ident: String,
    /// Rows of the reference; `None` for fallback references.
    pub ref_span: Option<LineSpan>,
    /// Rows of the target definition.
    pub def_span: LineSpan,
}

/// Directed multigraph of files and definitions.
///
/// # Examples
///
/// ```
/// use std::path::PathBuf;
/// use atlas_repomap::codegraph::build_code_graph;
/// use atlas_repomap::languages::{GrammarRegistry, Language};
/// use atlas_repomap::walker::SourceFile;
///
/// let file = |path: &str, content: &str| SourceFile {
///     path: PathBuf::from(path),
///     abs_path: PathBuf::from("/repo").join(path),
///     language: Language::Python,
///     content: content.to_string(),
/// };
/// let registry = GrammarRegistry::new().unwrap();
/// let graph = build_code_graph(
///     &registry,
///     &[file("a.py", "def foo():\n    return 1\n"), file("b.py", "foo()\n")],
/// );
/// assert_eq!(graph.node_count(), 3);
/// assert_eq!(graph.edge_count(), 1);
/// ```
#[derive(Debug, Default)]
pub struct CodeGraph {
    graph: DiGraph<CodeNode, CodeEdge>,
}

impl CodeGraph {
    /// Number of nodes (files plus definitions).
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of resolved references.
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Nodes in insertion order: files sorted by path, each followed by its
    /// definitions.
    pub fn nodes(&self) -> impl Iterator<Item = &CodeNode> {
        self.graph.node_weights()
    }

    /// Edges as `(source, target, edge)` in insertion order.
    pub fn edges(&self) -> impl Iterator<Item = (&CodeNode, &CodeNode, &CodeEdge)> {
        self.graph
            .edge_references()
            .map(|e| (&self.graph[e.source()], &self.graph[e.target()], e.weight()))
    }

    /// Node with the given qualified path.
    pub fn find(&self, qualified_path: &str) -> Option<&CodeNode> {
        self.graph
            .node_weights()
            .find(|n| n.qualified_path == qualified_path)
    }
}

/// A definition whose structural node was found.
struct LocatedDef {
    def: Definition,
    kind: NodeKind,
    span: LineSpan,
    source_text: String,
}

/// Everything extracted from one file, before the sequential merge.
struct FileExtraction {
    file: CodeNode,
    defs: Vec<LocatedDef>,
    /// References paired with the local index of their innermost enclosing
    /// located definition.
    refs: Vec<(Reference, Option<usize>)>,
}

/// Walk `root` and build its code graph.
///
/// # Errors
///
/// Returns [`AtlasError::FileNotFound`] if `root` is not a directory.
pub fn build_code_graph_from_root(
    registry: &GrammarRegistry,
    root: &Path,
    config: &WalkConfig,
) -> Result<CodeGraph, AtlasError> {
    let files = walk_repo(root, config)?;
    Ok(build_code_graph(registry, &files))
}

/// Build the code graph of `files`.
///
/// Files are processed in parallel and merged in path order, so the result
/// does not depend on scheduling. Every file gets a node; a file that fails
/// to parse simply contributes no definitions or references.
pub fn build_code_graph(registry: &GrammarRegistry, files: &[SourceFile]) -> CodeGraph {
    let mut extractions: Vec<FileExtraction> = files
        .par_iter()
        .map(|file| extract_file(registry, file))
        .collect();
    extractions.sort_by(|a, b| a.file.rel_path.cmp(&b.file.rel_path));

    let mut graph = DiGraph::new();
    let mut by_qualified: HashMap<String, NodeIndex> = HashMap::new();
    let mut indexed_defs: Vec<Definition> = Vec::new();
    let mut def_nodes: Vec<NodeIndex> = Vec::new();
    let mut pending: Vec<(NodeIndex, Reference, Option<usize>)> = Vec::new();

    for extraction in extractions {
        let file_idx = graph.add_node(extraction.file);
        let offset = indexed_defs.len();

        for located in extraction.defs {
            let qualified_path = qualified_path(&located.def);
            let idx = *by_qualified.entry(qualified_path.clone()).or_insert_with(|| {
                graph.add_node(CodeNode {
                    kind: located.kind,
                    name: located.def.name.clone(),
                    qualified_path,
                    rel_path: located.def.rel_path.clone(),
                    span: Some(located.span),
                    source_text: located.source_text,
                })
            });
            indexed_defs.push(located.def);
            def_nodes.push(idx);
        }

        for (reference, own) in extraction.refs {
            let own = own.map(|local| offset + local);
            let source = own.map_or(file_idx, |id| def_nodes[id]);
            pending.push((source, reference, own));
        }
    }

    let index = DefinitionIndex::new(indexed_defs);
    let mut dangling = 0usize;
    for (source, reference, own) in pending {
        let Some(target) = index.resolve(&reference, own) else {
            dangling += 1;
            continue;
        };
        let target_idx = def_nodes[target];
        let def_span = graph[target_idx].span.unwrap_or(index.get(target).span);
        graph.add_edge(
            source,
            target_idx,
            CodeEdge {
                relationship: reference.tag_type,
                ident: reference.name,
                ref_span: reference.span,
                def_span,
            },
        );
    }

    tracing::info!(
        files = files.len(),
        nodes = graph.node_count(),
        edges = graph.edge_count(),
        dangling,
        "built code graph"
    );
    CodeGraph { graph }
}

/// `rel_path:Outer.Inner.name`.
fn qualified_path(def: &Definition) -> String {
    let mut segments = def.scope.clone();
    segments.push(def.name.clone());
    format!("{}:{}", def.rel_path.display(), segments.join("."))
}

fn extract_file(registry: &GrammarRegistry, file: &SourceFile) -> FileExtraction {
    let file_node = CodeNode {
        kind: NodeKind::File,
        name: file.path.display().to_string(),
        qualified_path: file.path.display().to_string(),
        rel_path: file.path.clone(),
        span: None,
        source_text: file.content.clone(),
    };
    let mut extraction = FileExtraction {
        file: file_node,
        defs: Vec::new(),
        refs: Vec::new(),
    };

    let Some(grammar) = registry.get(file.language) else {
        return extraction;
    };
    let tree = match parse_source(grammar, &file.content) {
        Ok(Some(tree)) => tree,
        Ok(None) => return extraction,
        Err(e) => {
            tracing::warn!(path = %file.path.display(), error = %e, "skipping unparseable file");
            return extraction;
        }
    };

    let tags = tags_from_tree(grammar, &tree, &file.path, &file.abs_path, &file.content);
    let mut refs = Vec::new();
    for tag in tags {
        match tag {
            Tag::Def(def) => {
                if let Some(located) = locate(file.language, &tree, &file.content, def) {
                    extraction.defs.push(located);
                }
            }
            Tag::Ref(r) => refs.push(r),
        }
    }

    extraction.refs = refs
        .into_iter()
        .map(|r| {
            let own = r.span.and_then(|span| innermost_def(&extraction.defs, span.start));
            (r, own)
        })
        .collect();
    extraction
}

/// Find the structural node of `def`: the smallest node of its category that
/// starts on the definition's line, else the smallest one containing it.
fn locate(language: Language, tree: &Tree, content: &str, def: Definition) -> Option<LocatedDef> {
    let category = StructuralCategory::from_tag_type(&def.tag_type)?;
    let kinds = match category {
        StructuralCategory::Function => language.function_kinds(),
        StructuralCategory::Class => language.class_kinds(),
    };

    let name_node = tree
        .root_node()
        .descendant_for_byte_range(def.byte_range.start, def.byte_range.end)?;

    let mut starting_on_line: Option<Node> = None;
    let mut containing: Option<Node> = None;
    let mut current = Some(name_node);
    while let Some(node) = current {
        if kinds.contains(&node.kind()) {
            if containing.is_none() {
                containing = Some(node);
            }
            if node.start_position().row == def.span.start {
                starting_on_line = Some(node);
                break;
            }
        }
        current = node.parent();
    }

    // `const foo = () => {}`: the function is the declarator's value, not an ancestor.
    let node = match starting_on_line {
        Some(node) => node,
        None => name_node
            .parent()
            .and_then(|parent| descendant_starting_on(parent, kinds, def.span.start))
            .or(containing)?,
    };
    let source_text = content.get(node.start_byte()..node.end_byte())?.to_string();
    Some(LocatedDef {
        span: LineSpan::new(node.start_position().row, node.end_position().row),
        kind: category.into(),
        source_text,
        def,
    })
}

/// First node below `root` (pre-order) of one of `kinds` that starts on `row`.
fn descendant_starting_on<'t>(root: Node<'t>, kinds: &[&str], row: usize) -> Option<Node<'t>> {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.start_position().row > row {
            continue;
        }
        if kinds.contains(&node.kind()) && node.start_position().row == row {
            return Some(node);
        }
        for i in (0..node.child_count()).rev() {
            if let Some(child) = node.child(i) {
                stack.push(child);
            }
        }
    }
    None
}

/// Local index of the smallest located definition whose span contains `row`.
fn innermost_def(defs: &[LocatedDef], row: usize) -> Option<usize> {
    defs.iter()
        .enumerate()
        .filter(|(_, d)| d.span.contains(row))
        .min_by_key(|(i, d)| (d.span.len(), *i))
        .map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str, content: &str) -> SourceFile {
        SourceFile {
            path: PathBuf::from(path),
            abs_path: PathBuf::from("/repo").join(path),
            language: Language::from_path(Path::new(path)),
            content: content.to_string(),
        }
    }

    fn build(files: &[SourceFile]) -> CodeGraph {
        let registry = GrammarRegistry::new().unwrap();
        build_code_graph(&registry, files)
    }

    fn edge_pairs(graph: &CodeGraph) -> Vec<(String, String)> {
        graph
            .edges()
            .map(|(s, t, _)| (s.qualified_path.clone(), t.qualified_path.clone()))
            .collect()
    }

    #[test]
    fn module_level_call_links_file_to_definition() {
        let graph = build(&[
            file("a.py", "def foo():\n    return 1\n"),
            file("b.py", "from a import foo\n\nfoo()\n"),
        ]);
        assert_eq!(graph.node_count(), 3);
        assert_eq!(
            edge_pairs(&graph),
            vec![("b.py".to_string(), "a.py:foo".to_string())]
        );

        let (_, _, edge) = graph.edges().next().unwrap();
        assert_eq!(edge.relationship, "call");
        assert_eq!(edge.ref_span, Some(LineSpan::new(2, 2)));
        assert_eq!(edge.def_span, LineSpan::new(0, 1));
    }

    #[test]
    fn definition_node_holds_exact_source() {
        let src = "x = 1\n\nclass Greeter:\n    def hello(self):\n        return 'hi'\n";
        let graph = build(&[file("greet.py", src)]);

        let class = graph.find("greet.py:Greeter").unwrap();
        assert_eq!(class.kind, NodeKind::Class);
        assert_eq!(class.span, Some(LineSpan::new(2, 4)));
        assert!(class.source_text.starts_with("class Greeter:"));

        let method = graph.find("greet.py:Greeter.hello").unwrap();
        assert_eq!(method.kind, NodeKind::Function);
        assert_eq!(
            method.source_text,
            "def hello(self):\n        return 'hi'"
        );
    }

    #[test]
    fn call_inside_function_starts_at_that_function() {
        let graph = build(&[
            file("lib.py", "def helper():\n    pass\n"),
            file("app.py", "def main():\n    helper()\n"),
        ]);
        assert_eq!(
            edge_pairs(&graph),
            vec![("app.py:main".to_string(), "lib.py:helper".to_string())]
        );
    }

    #[test]
    fn javascript_function_values_become_nodes() {
        let graph = build(&[
            file(
                "a.js",
                "const foo = () => {\n  return 1;\n};\n\nconst bar = function () {\n  return 2;\n};\n",
            ),
            file("b.js", "foo();\nbar();\n"),
        ]);
        assert_eq!(graph.node_count(), 4);

        let foo = graph.find("a.js:foo").unwrap();
        assert_eq!(foo.kind, NodeKind::Function);
        assert_eq!(foo.span, Some(LineSpan::new(0, 2)));
        assert_eq!(foo.source_text, "() => {\n  return 1;\n}");

        let bar = graph.find("a.js:bar").unwrap();
        assert_eq!(bar.span, Some(LineSpan::new(4, 6)));
        assert!(bar.source_text.starts_with("function ()"));

        let mut pairs = edge_pairs(&graph);
        pairs.sort();
        assert_eq!(
            pairs,
            vec![
                ("b.js".to_string(), "a.js:bar".to_string()),
                ("b.js".to_string(), "a.js:foo".to_string()),
            ]
        );
    }

    #[test]
    fn typescript_arrow_function_becomes_a_node() {
        let graph = build(&[
            file("a.ts", "export const foo = (): number => {\n  return 1;\n};\n"),
            file("b.ts", "import { foo } from './a';\n\nfoo();\n"),
        ]);
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.find("a.ts:foo").unwrap().span, Some(LineSpan::new(0, 2)));
        assert_eq!(
            edge_pairs(&graph),
            vec![("b.ts".to_string(), "a.ts:foo".to_string())]
        );
    }

    #[test]
    fn references_inside_arrow_functions_start_at_them() {
        let graph = build(&[
            file("util.js", "function helper() {\n  return 1;\n}\n"),
            file("app.js", "const run = () => {\n  helper();\n};\n"),
        ]);
        assert_eq!(
            edge_pairs(&graph),
            vec![("app.js:run".to_string(), "util.js:helper".to_string())]
        );
    }

    #[test]
    fn nested_arrow_function_gets_its_own_span() {
        let graph = build(&[file(
            "a.js",
            "function outer() {\n  const inner = () => 1;\n  return inner();\n}\n",
        )]);
        assert_eq!(graph.find("a.js:inner").unwrap().span, Some(LineSpan::new(1, 1)));
        assert_eq!(graph.find("a.js:outer").unwrap().span, Some(LineSpan::new(0, 3)));
        assert_eq!(
            edge_pairs(&graph),
            vec![("a.js:outer".to_string(), "a.js:inner".to_string())]
        );
    }

    #[test]
    fn ambiguous_reference_prefers_same_directory() {
        let graph = build(&[
            file("api/handler.py", "def handle():\n    parse()\n"),
            file("api/parse.py", "def parse():\n    pass\n"),
            file("util/parse.py", "def parse():\n    pass\n"),
        ]);
        assert_eq!(
            edge_pairs(&graph),
            vec![(
                "api/handler.py:handle".to_string(),
                "api/parse.py:parse".to_string()
            )]
        );
    }

    #[test]
    fn unsupported_files_still_get_a_node() {
        let graph = build(&[file("README.md", "# hi\n"), file("a.py", "def f():\n    pass\n")]);
        let readme = graph.find("README.md").unwrap();
        assert_eq!(readme.kind, NodeKind::File);
        assert_eq!(readme.source_text, "# hi\n");
        assert_eq!(graph.node_count(), 3);
    }

    #[test]
    fn duplicate_qualified_paths_merge_into_first() {
        let src = "def run():\n    pass\n\ndef run():\n    return 2\n";
        let graph = build(&[file("dup.py", src)]);
        assert_eq!(graph.node_count(), 2);
        let run = graph.find("dup.py:run").unwrap();
        assert_eq!(run.span, Some(LineSpan::new(0, 1)));
    }

    #[test]
    fn c_fallback_references_have_no_span() {
        let graph = build(&[
            file("util.c", "int helper(int x) {\n    return x;\n}\n"),
            file("main.c", "int main(void) {\n    return helper(1);\n}\n"),
        ]);
        let edges: Vec<_> = graph
            .edges()
            .filter(|(_, t, _)| t.qualified_path == "util.c:helper")
            .collect();
        assert!(!edges.is_empty());
        for (source, _, edge) in edges {
            assert_eq!(edge.relationship, "unknown");
            assert!(edge.ref_span.is_none());
            assert_eq!(source.kind, NodeKind::File);
        }
    }

    #[test]
    fn input_order_does_not_change_the_graph() {
        let files = vec![
            file("z.py", "def z():\n    a()\n"),
            file("a.py", "def a():\n    z()\n"),
        ];
        let mut reversed = files.clone();
        reversed.reverse();

        let first: Vec<String> = build(&files).nodes().map(|n| n.qualified_path.clone()).collect();
        let second: Vec<String> = build(&reversed)
            .nodes()
            .map(|n| n.qualified_path.clone())
            .collect();
        assert_eq!(first, second);
        assert_eq!(first[0], "a.py");
    }
}
