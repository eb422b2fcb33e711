//! Ingestion into SQLite and queries over the stored graph.

use std::fs;
use std::path::Path;

use atlas_core::{AtlasConfig, AtlasError};
use atlas_graphstore::node_id::node_id;
use atlas_graphstore::query::{code_graph, entry_points, nodes_touching_lines};
use atlas_graphstore::{
    build_and_persist_graph, build_and_persist_graph_with, cleanup_graph, GraphCounts,
    GraphStore, SqliteGraphStore,
};

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

fn two_file_repo() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.py", "def foo():\n    return 42\n");
    write(dir.path(), "b.py", "from a import foo\n\nfoo()\n");
    dir
}

fn layered_repo() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "app/main.py",
        "from app.service import handle\n\ndef main():\n    handle()\n",
    );
    write(
        dir.path(),
        "app/service.py",
        "from app.db import save\n\ndef handle():\n    data = 1\n    save(data)\n    return data\n",
    );
    write(
        dir.path(),
        "app/db.py",
        "def save(row):\n    print(row)\n",
    );
    dir
}

#[test]
fn two_files_give_three_nodes_and_one_edge() {
    let repo = two_file_repo();
    let store = SqliteGraphStore::in_memory().unwrap();

    let summary = build_and_persist_graph(&store, repo.path(), "repo", "acme").unwrap();
    assert_eq!((summary.node_count, summary.edge_count), (3, 1));

    let b = node_id("acme", "b.py");
    let foo = node_id("acme", "a.py:foo");
    let edges = store.outgoing("repo", &b).unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].target_id, foo);
    assert_eq!(edges[0].ident, "foo");
}

#[test]
fn node_ids_are_stable_across_runs() {
    let repo = layered_repo();
    let first = SqliteGraphStore::in_memory().unwrap();
    let second = SqliteGraphStore::in_memory().unwrap();
    build_and_persist_graph(&first, repo.path(), "repo", "acme").unwrap();
    build_and_persist_graph(&second, repo.path(), "repo", "acme").unwrap();

    let ids = |store: &SqliteGraphStore| {
        store
            .nodes_under_path("repo", "")
            .unwrap()
            .into_iter()
            .map(|n| n.node_id)
            .collect::<Vec<_>>()
    };
    assert_eq!(ids(&first), ids(&second));
    assert!(ids(&first).contains(&node_id("acme", "app/service.py:handle")));
}

#[test]
fn reingest_replaces_previous_graph() {
    let repo = layered_repo();
    let store = SqliteGraphStore::in_memory().unwrap();
    let first = build_and_persist_graph(&store, repo.path(), "repo", "acme").unwrap();

    write(repo.path(), "app/extra.py", "def unused():\n    pass\n");
    let second = build_and_persist_graph(&store, repo.path(), "repo", "acme").unwrap();

    assert_eq!(second.node_count, first.node_count + 2);
    assert_eq!(
        store.counts("repo").unwrap(),
        GraphCounts {
            nodes: second.node_count,
            edges: second.edge_count
        }
    );
}

#[test]
fn cleanup_is_idempotent_and_scoped() {
    let repo = two_file_repo();
    let store = SqliteGraphStore::in_memory().unwrap();
    build_and_persist_graph(&store, repo.path(), "one", "acme").unwrap();
    build_and_persist_graph(&store, repo.path(), "two", "acme").unwrap();

    let removed = cleanup_graph(&store, "one").unwrap();
    assert_eq!(removed, GraphCounts { nodes: 3, edges: 1 });
    assert_eq!(cleanup_graph(&store, "one").unwrap(), GraphCounts::default());
    assert_eq!(store.counts("two").unwrap(), GraphCounts { nodes: 3, edges: 1 });
}

#[test]
fn undecodable_file_is_skipped() {
    let repo = two_file_repo();
    fs::write(repo.path().join("broken.py"), [0x66, 0x6f, 0xff, 0xfe, 0x6f]).unwrap();
    let store = SqliteGraphStore::in_memory().unwrap();

    let summary = build_and_persist_graph(&store, repo.path(), "repo", "acme").unwrap();
    assert_eq!(summary.node_count, 3);
    assert!(store.nodes_in_file("repo", "broken.py").unwrap().is_empty());
}

#[test]
fn missing_root_is_an_error() {
    let store = SqliteGraphStore::in_memory().unwrap();
    let err = build_and_persist_graph(&store, Path::new("/no/such/repo"), "repo", "acme")
        .unwrap_err();
    assert!(matches!(err, AtlasError::FileNotFound(_)));
}

#[test]
fn tiny_batches_persist_the_same_graph() {
    let repo = layered_repo();
    let default_store = SqliteGraphStore::in_memory().unwrap();
    let batched_store = SqliteGraphStore::in_memory().unwrap();

    let mut config = AtlasConfig::default();
    config.graph.batch_size = 1;
    let a = build_and_persist_graph(&default_store, repo.path(), "repo", "acme").unwrap();
    let b =
        build_and_persist_graph_with(&batched_store, repo.path(), "repo", "acme", &config).unwrap();
    assert_eq!(a, b);
}

#[test]
fn queries_over_an_ingested_repo() {
    let repo = layered_repo();
    let store = SqliteGraphStore::in_memory().unwrap();
    build_and_persist_graph(&store, repo.path(), "repo", "acme").unwrap();

    let save = node_id("acme", "app/db.py:save");
    let entries: Vec<String> = entry_points(&store, "repo", &save)
        .unwrap()
        .into_iter()
        .map(|n| n.qualified_name)
        .collect();
    assert_eq!(entries, vec!["app/main.py:main"]);

    let main = node_id("acme", "app/main.py:main");
    let tree = code_graph(&store, "repo", &main, 5).unwrap().unwrap();
    assert_eq!(tree.children[0].name, "handle");
    assert_eq!(tree.children[0].children[0].name, "save");

    // line 5 is `save(data)` inside handle (lines 3-6)
    let touched = nodes_touching_lines(&store, "repo", "app/service.py", &[5]).unwrap();
    let names: Vec<_> = touched.iter().map(|n| n.name.as_str()).collect();
    assert_eq!(names, vec!["handle"]);
}
