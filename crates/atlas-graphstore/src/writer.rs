//! Batched, retrying persistence of a [`CodeGraph`].

use std::thread;
use std::time::Duration;

use atlas_core::{AtlasError, GraphConfig};
use atlas_repomap::{CodeGraph, CodeNode};
use serde::{Deserialize, Serialize};

use crate::node_id::node_id;
use crate::store::{GraphCounts, GraphEdge, GraphNode, GraphStore};

/// What a persistence run wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistSummary {
    /// Nodes written.
    pub node_count: usize,
    /// Edges written.
    pub edge_count: usize,
}

/// Writes code graphs into a [`GraphStore`].
///
/// Nodes go first in batches of `batch_size`, then edges. Each batch is
/// retried on its own after a transient failure; a batch that still fails
/// aborts the run with [`AtlasError::Batch`] and leaves earlier batches
/// committed.
///
/// # Examples
///
/// ```
/// use atlas_core::GraphConfig;
/// use atlas_graphstore::store::SqliteGraphStore;
/// use atlas_graphstore::writer::GraphWriter;
/// use atlas_repomap::codegraph::build_code_graph;
/// use atlas_repomap::GrammarRegistry;
///
/// let registry = GrammarRegistry::new().unwrap();
/// let graph = build_code_graph(&registry, &[]);
/// let store = SqliteGraphStore::in_memory().unwrap();
/// let writer = GraphWriter::new(&store, &GraphConfig::default());
/// let summary = writer.create_and_store(&graph, "repo", "owner").unwrap();
/// assert_eq!(summary.node_count, 0);
/// ```
pub struct GraphWriter<'s, S: GraphStore + ?Sized> {
    store: &'s S,
    batch_size: usize,
    max_retries: u32,
    backoff: Duration,
}

impl<'s, S: GraphStore + ?Sized> GraphWriter<'s, S> {
    /// Create a writer using the batch and retry settings from `config`.
    pub fn new(store: &'s S, config: &GraphConfig) -> Self {
        Self {
            store,
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
            backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }

    /// Persist `graph` under `repo_id`.
    ///
    /// Performs no reconciliation with rows already stored: writing a graph
    /// whose nodes exist fails on the `(repo_id, node_id)` key. Run
    /// [`GraphWriter::cleanup`] first to replace a graph.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::Batch`] naming the stage and batch that failed.
    pub fn create_and_store(
        &self,
        graph: &CodeGraph,
        repo_id: &str,
        owner_identity: &str,
    ) -> Result<PersistSummary, AtlasError> {
        let nodes: Vec<GraphNode> = graph
            .nodes()
            .map(|node| to_graph_node(node, repo_id, owner_identity))
            .collect();
        let edges: Vec<GraphEdge> = graph
            .edges()
            .map(|(source, target, edge)| GraphEdge {
                repo_id: repo_id.to_string(),
                source_id: node_id(owner_identity, &source.qualified_path),
                target_id: node_id(owner_identity, &target.qualified_path),
                relationship_type: edge.relationship.clone(),
                ident: edge.ident.clone(),
                ref_start_line: edge.ref_span.map(|s| s.start + 1),
                ref_end_line: edge.ref_span.map(|s| s.end + 1),
                def_start_line: edge.def_span.start + 1,
                def_end_line: edge.def_span.end + 1,
            })
            .collect();

        for (index, batch) in nodes.chunks(self.batch_size).enumerate() {
            self.with_retry("nodes", index, || self.store.insert_nodes(batch))?;
            tracing::debug!(repo_id, batch = index, size = batch.len(), "stored node batch");
        }
        for (index, batch) in edges.chunks(self.batch_size).enumerate() {
            self.with_retry("edges", index, || self.store.insert_edges(batch))?;
            tracing::debug!(repo_id, batch = index, size = batch.len(), "stored edge batch");
        }

        tracing::info!(
            repo_id,
            nodes = nodes.len(),
            edges = edges.len(),
            "persisted code graph"
        );
        Ok(PersistSummary {
            node_count: nodes.len(),
            edge_count: edges.len(),
        })
    }

    /// Delete every node and edge stored for `repo_id`. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns the store error if the deletion fails.
    pub fn cleanup(&self, repo_id: &str) -> Result<GraphCounts, AtlasError> {
        let removed = self.store.delete_repo(repo_id)?;
        tracing::info!(
            repo_id,
            nodes = removed.nodes,
            edges = removed.edges,
            "removed stored graph"
        );
        Ok(removed)
    }

    fn with_retry(
        &self,
        stage: &'static str,
        index: usize,
        mut op: impl FnMut() -> Result<(), AtlasError>,
    ) -> Result<(), AtlasError> {
        let mut attempt = 0;
        loop {
            match op() {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(stage, batch = index, attempt, error = %e, "retrying batch");
                    thread::sleep(self.backoff * attempt);
                }
                Err(e) => {
                    return Err(AtlasError::Batch {
                        stage,
                        index,
                        source: Box::new(e),
                    })
                }
            }
        }
    }
}

fn to_graph_node(node: &CodeNode, repo_id: &str, owner_identity: &str) -> GraphNode {
    GraphNode {
        node_id: node_id(owner_identity, &node.qualified_path),
        repo_id: repo_id.to_string(),
        name: node.name.clone(),
        qualified_name: node.qualified_path.clone(),
        file_path: slash_path(&node.rel_path),
        start_line: node.span.map(|s| s.start + 1),
        end_line: node.span.map(|s| s.end + 1),
        node_type: node.kind.as_str().to_string(),
        source_text: node.source_text.clone(),
        docstring: None,
    }
}

fn slash_path(path: &std::path::Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};

    use super::*;
    use crate::store::SqliteGraphStore;

    /// Fails the first `fail_times` calls of one stage with the given error.
    struct FlakyStore {
        inner: SqliteGraphStore,
        stage: &'static str,
        fail_times: Cell<u32>,
        transient: bool,
        calls: RefCell<Vec<&'static str>>,
    }

    impl FlakyStore {
        fn new(stage: &'static str, fail_times: u32, transient: bool) -> Self {
            Self {
                inner: SqliteGraphStore::in_memory().unwrap(),
                stage,
                fail_times: Cell::new(fail_times),
                transient,
                calls: RefCell::new(Vec::new()),
            }
        }

        fn maybe_fail(&self, stage: &'static str) -> Result<(), AtlasError> {
            self.calls.borrow_mut().push(stage);
            if stage == self.stage && self.fail_times.get() > 0 {
                self.fail_times.set(self.fail_times.get() - 1);
                return Err(if self.transient {
                    AtlasError::Busy("database is locked".into())
                } else {
                    AtlasError::Database("disk I/O error".into())
                });
            }
            Ok(())
        }
    }

    impl GraphStore for FlakyStore {
        fn insert_nodes(&self, nodes: &[GraphNode]) -> Result<(), AtlasError> {
            self.maybe_fail("nodes")?;
            self.inner.insert_nodes(nodes)
        }
        fn insert_edges(&self, edges: &[GraphEdge]) -> Result<(), AtlasError> {
            self.maybe_fail("edges")?;
            self.inner.insert_edges(edges)
        }
        fn delete_repo(&self, repo_id: &str) -> Result<GraphCounts, AtlasError> {
            self.inner.delete_repo(repo_id)
        }
        fn get_node(&self, node_id: &str, repo_id: &str) -> Result<Option<GraphNode>, AtlasError> {
            self.inner.get_node(node_id, repo_id)
        }
        fn outgoing(&self, repo_id: &str, node_id: &str) -> Result<Vec<GraphEdge>, AtlasError> {
            self.inner.outgoing(repo_id, node_id)
        }
        fn incoming(&self, repo_id: &str, node_id: &str) -> Result<Vec<GraphEdge>, AtlasError> {
            self.inner.incoming(repo_id, node_id)
        }
        fn nodes_in_file(&self, repo_id: &str, file_path: &str) -> Result<Vec<GraphNode>, AtlasError> {
            self.inner.nodes_in_file(repo_id, file_path)
        }
        fn nodes_under_path(&self, repo_id: &str, prefix: &str) -> Result<Vec<GraphNode>, AtlasError> {
            self.inner.nodes_under_path(repo_id, prefix)
        }
        fn find_by_name(&self, repo_id: &str, name: &str) -> Result<Vec<GraphNode>, AtlasError> {
            self.inner.find_by_name(repo_id, name)
        }
        fn set_docstring(&self, repo_id: &str, node_id: &str, docstring: &str) -> Result<bool, AtlasError> {
            self.inner.set_docstring(repo_id, node_id, docstring)
        }
        fn counts(&self, repo_id: &str) -> Result<GraphCounts, AtlasError> {
            self.inner.counts(repo_id)
        }
    }

    fn two_file_graph() -> CodeGraph {
        use atlas_repomap::walker::SourceFile;
        use atlas_repomap::{GrammarRegistry, Language};
        use std::path::PathBuf;

        let file = |path: &str, content: &str| SourceFile {
            path: PathBuf::from(path),
            abs_path: PathBuf::from("/repo").join(path),
            language: Language::Python,
            content: content.to_string(),
        };
        let registry = GrammarRegistry::new().unwrap();
        atlas_repomap::codegraph::build_code_graph(
            &registry,
            &[
                file("a.py", "def foo():\n    return 42\n"),
                file("b.py", "from a import foo\n\nfoo()\n"),
            ],
        )
    }

    fn config(batch_size: usize) -> GraphConfig {
        GraphConfig {
            batch_size,
            retry_backoff_ms: 0,
            ..GraphConfig::default()
        }
    }

    #[test]
    fn stores_nodes_and_edges_with_one_based_lines() {
        let store = SqliteGraphStore::in_memory().unwrap();
        let summary = GraphWriter::new(&store, &config(300))
            .create_and_store(&two_file_graph(), "repo", "owner")
            .unwrap();
        assert_eq!(summary, PersistSummary { node_count: 3, edge_count: 1 });

        let foo = store
            .get_node(&node_id("owner", "a.py:foo"), "repo")
            .unwrap()
            .unwrap();
        assert_eq!(foo.node_type, "function");
        assert_eq!((foo.start_line, foo.end_line), (Some(1), Some(2)));

        let file = store.get_node(&node_id("owner", "b.py"), "repo").unwrap().unwrap();
        assert!(file.is_file());
        assert_eq!(file.start_line, None);

        let edges = store.outgoing("repo", &file.node_id).unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].target_id, foo.node_id);
        assert_eq!(edges[0].ref_start_line, Some(3));
        assert_eq!(edges[0].def_start_line, 1);
    }

    #[test]
    fn small_batches_store_everything() {
        let store = SqliteGraphStore::in_memory().unwrap();
        GraphWriter::new(&store, &config(1))
            .create_and_store(&two_file_graph(), "repo", "owner")
            .unwrap();
        assert_eq!(
            store.counts("repo").unwrap(),
            GraphCounts { nodes: 3, edges: 1 }
        );
    }

    #[test]
    fn rewriting_without_cleanup_fails_loudly() {
        let store = SqliteGraphStore::in_memory().unwrap();
        let writer = GraphWriter::new(&store, &config(300));
        let graph = two_file_graph();
        writer.create_and_store(&graph, "repo", "owner").unwrap();

        let err = writer.create_and_store(&graph, "repo", "owner").unwrap_err();
        assert!(matches!(err, AtlasError::Batch { stage: "nodes", index: 0, .. }));
        assert_eq!(store.counts("repo").unwrap().nodes, 3);

        writer.cleanup("repo").unwrap();
        writer.create_and_store(&graph, "repo", "owner").unwrap();
        assert_eq!(store.counts("repo").unwrap().nodes, 3);
    }

    #[test]
    fn transient_failures_are_retried() {
        let store = FlakyStore::new("nodes", 2, true);
        let summary = GraphWriter::new(&store, &config(2))
            .create_and_store(&two_file_graph(), "repo", "owner")
            .unwrap();
        assert_eq!(summary.node_count, 3);
        assert_eq!(store.counts("repo").unwrap().nodes, 3);
        // two failed attempts, then batches 0 and 1, then one edge batch
        assert_eq!(*store.calls.borrow(), vec!["nodes", "nodes", "nodes", "nodes", "edges"]);
    }

    #[test]
    fn retries_are_bounded() {
        let store = FlakyStore::new("edges", 10, true);
        let err = GraphWriter::new(&store, &config(300))
            .create_and_store(&two_file_graph(), "repo", "owner")
            .unwrap_err();
        match err {
            AtlasError::Batch { stage, index, source } => {
                assert_eq!((stage, index), ("edges", 0));
                assert!(source.is_transient());
            }
            other => panic!("unexpected error: {other}"),
        }
        // 1 node batch + 1 edge attempt + 3 retries
        assert_eq!(store.calls.borrow().len(), 5);
        assert_eq!(store.counts("repo").unwrap(), GraphCounts { nodes: 3, edges: 0 });
    }

    #[test]
    fn permanent_failures_are_not_retried() {
        let store = FlakyStore::new("nodes", 1, false);
        let err = GraphWriter::new(&store, &config(300))
            .create_and_store(&two_file_graph(), "repo", "owner")
            .unwrap_err();
        assert!(matches!(err, AtlasError::Batch { stage: "nodes", index: 0, .. }));
        assert_eq!(store.calls.borrow().len(), 1);
    }

    #[test]
    fn nested_paths_use_forward_slashes() {
        let path: std::path::PathBuf = ["src", "pkg", "mod.py"].iter().collect();
        assert_eq!(slash_path(&path), "src/pkg/mod.py");
    }
}
