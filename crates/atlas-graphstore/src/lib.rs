//! Persistence and querying of repository code graphs.
//!
//! - [`store`]: the [`GraphStore`] trait and its SQLite implementation
//! - [`node_id`]: deterministic node identity
//! - [`writer`]: batched, retrying writes of a [`atlas_repomap::CodeGraph`]
//! - [`query`]: neighbours, reference trees, entry points, diff impact
//!
//! [`build_and_persist_graph`] is the one-call ingestion path: walk, parse,
//! resolve, then replace whatever was stored for the repository.

pub mod node_id;
pub mod query;
pub mod store;
pub mod writer;

use std::path::Path;

use atlas_core::{AtlasConfig, AtlasError};
use atlas_repomap::codegraph::build_code_graph_from_root;
use atlas_repomap::GrammarRegistry;

pub use store::{GraphCounts, GraphEdge, GraphNode, GraphStore, SqliteGraphStore};
pub use writer::{GraphWriter, PersistSummary};

/// Build the code graph of `repo_root` and store it under `repo_id`, using
/// default settings.
///
/// Any graph previously stored for `repo_id` is deleted first.
///
/// # Errors
///
/// Returns [`AtlasError::FileNotFound`] if the root is not a directory and
/// [`AtlasError::Batch`] if a write batch fails.
///
/// # Examples
///
/// ```
/// use atlas_graphstore::{build_and_persist_graph, GraphStore, SqliteGraphStore};
///
/// let dir = tempfile::tempdir().unwrap();
/// std::fs::write(dir.path().join("a.py"), "def foo():\n    return 42\n").unwrap();
/// std::fs::write(dir.path().join("b.py"), "foo()\n").unwrap();
///
/// let store = SqliteGraphStore::in_memory().unwrap();
/// let summary = build_and_persist_graph(&store, dir.path(), "repo", "owner").unwrap();
/// assert_eq!((summary.node_count, summary.edge_count), (3, 1));
/// ```
pub fn build_and_persist_graph(
    store: &dyn GraphStore,
    repo_root: &Path,
    repo_id: &str,
    owner_identity: &str,
) -> Result<PersistSummary, AtlasError> {
    build_and_persist_graph_with(
        store,
        repo_root,
        repo_id,
        owner_identity,
        &AtlasConfig::default(),
    )
}

/// [`build_and_persist_graph`] with explicit walk and batch settings.
///
/// # Errors
///
/// See [`build_and_persist_graph`].
pub fn build_and_persist_graph_with(
    store: &dyn GraphStore,
    repo_root: &Path,
    repo_id: &str,
    owner_identity: &str,
    config: &AtlasConfig,
) -> Result<PersistSummary, AtlasError> {
    let registry = GrammarRegistry::new()?;
    let graph = build_code_graph_from_root(&registry, repo_root, &config.walk)?;

    let writer = GraphWriter::new(store, &config.graph);
    writer.cleanup(repo_id)?;
    writer.create_and_store(&graph, repo_id, owner_identity)
}

/// Delete every node and edge stored for `repo_id`. Idempotent.
///
/// # Errors
///
/// Returns the store error if the deletion fails.
pub fn cleanup_graph(store: &dyn GraphStore, repo_id: &str) -> Result<GraphCounts, AtlasError> {
    store.delete_repo(repo_id)
}
