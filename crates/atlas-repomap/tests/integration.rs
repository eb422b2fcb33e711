//! Integration tests: walk → tags → rank/graph on small fixture repositories.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use atlas_core::{RepoMapConfig, WalkConfig};
use atlas_repomap::codegraph::build_code_graph_from_root;
use atlas_repomap::walker::walk_repo;
use atlas_repomap::{build_repo_map, GrammarRegistry, MapRequest, NodeKind, RepoMap};

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

fn fixture() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(
        root,
        "shop/cart.py",
        "from shop.pricing import total\n\nclass Cart:\n    def __init__(self):\n        self.items = []\n\n    def checkout(self):\n        return total(self.items)\n",
    );
    write(
        root,
        "shop/pricing.py",
        "def total(items):\n    return sum(price(i) for i in items)\n\ndef price(item):\n    return item.cost\n",
    );
    write(
        root,
        "web/views.py",
        "from shop.cart import Cart\n\ndef checkout_view():\n    cart = Cart()\n    return cart.checkout()\n",
    );
    write(root, "README.md", "# shop\n");
    dir
}

fn all_files(root: &Path) -> Vec<PathBuf> {
    walk_repo(root, &WalkConfig::default())
        .unwrap()
        .into_iter()
        .map(|f| f.path)
        .collect()
}

#[test]
fn end_to_end_two_file_graph() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.py", "def foo():\n    return 42\n");
    write(dir.path(), "b.py", "from a import foo\n\nfoo()\n");

    let registry = GrammarRegistry::new().unwrap();
    let graph = build_code_graph_from_root(&registry, dir.path(), &WalkConfig::default()).unwrap();

    assert_eq!(graph.node_count(), 3);
    assert_eq!(graph.edge_count(), 1);
    let (source, target, _) = graph.edges().next().unwrap();
    assert_eq!(source.qualified_path, "b.py");
    assert_eq!(source.kind, NodeKind::File);
    assert_eq!(target.qualified_path, "a.py:foo");
}

#[test]
fn code_graph_skips_undecodable_files() {
    let dir = fixture();
    fs::write(dir.path().join("shop/legacy.py"), [0x64, 0x65, 0x66, 0xff, 0xfe]).unwrap();

    let registry = GrammarRegistry::new().unwrap();
    let graph = build_code_graph_from_root(&registry, dir.path(), &WalkConfig::default()).unwrap();

    assert!(graph.find("shop/legacy.py").is_none());
    assert!(graph.find("shop/cart.py:Cart.checkout").is_some());
    assert!(graph.find("README.md").is_some());
    assert!(graph
        .edges()
        .any(|(s, t, _)| s.qualified_path == "shop/cart.py:Cart.checkout"
            && t.qualified_path == "shop/pricing.py:total"));
}

#[test]
fn code_graph_is_deterministic() {
    let dir = fixture();
    let registry = GrammarRegistry::new().unwrap();

    let render = |graph: &atlas_repomap::CodeGraph| {
        graph
            .edges()
            .map(|(s, t, e)| format!("{}->{}:{}", s.qualified_path, t.qualified_path, e.ident))
            .collect::<Vec<_>>()
    };

    let first = build_code_graph_from_root(&registry, dir.path(), &WalkConfig::default()).unwrap();
    let second = build_code_graph_from_root(&registry, dir.path(), &WalkConfig::default()).unwrap();
    assert_eq!(render(&first), render(&second));
    assert!(!render(&first).is_empty());
}

#[test]
fn repo_map_ranks_shared_definitions() {
    let dir = fixture();
    let files = all_files(dir.path());

    let map = build_repo_map(
        dir.path(),
        &[],
        &files,
        &BTreeSet::new(),
        &BTreeSet::new(),
        1024,
    )
    .unwrap();

    assert!(map.contains("shop/pricing.py:\n"), "map was:\n{map}");
    assert!(map.contains("│def total(items):"));
    assert!(map.contains("\nREADME.md\n"));
}

#[test]
fn repo_map_respects_every_budget() {
    let dir = fixture();
    let files = all_files(dir.path());
    let mut repo_map = RepoMap::new(
        dir.path(),
        RepoMapConfig::default(),
        WalkConfig::default(),
    )
    .unwrap();

    for budget in [0, 1, 5, 10, 20, 40, 80, 160, 1024] {
        let map = repo_map
            .generate(&MapRequest {
                other_files: files.clone(),
                token_budget: Some(budget),
                ..Default::default()
            })
            .unwrap();
        assert!(
            repo_map.count_tokens(&map) <= budget,
            "budget {budget} exceeded by:\n{map}"
        );
        if budget == 0 {
            assert!(map.is_empty());
        }
    }
}

#[test]
fn mentioned_identifier_moves_to_the_top() {
    let dir = fixture();
    let files = all_files(dir.path());

    let mentioned: BTreeSet<String> = ["price".to_string()].into();
    let map = build_repo_map(dir.path(), &[], &files, &BTreeSet::new(), &mentioned, 1024).unwrap();
    let plain = build_repo_map(
        dir.path(),
        &[],
        &files,
        &BTreeSet::new(),
        &BTreeSet::new(),
        1024,
    )
    .unwrap();

    assert!(map.contains("│def price(item):"), "map was:\n{map}");
    assert!(plain.contains("shop/pricing.py:"));
}

#[test]
fn focus_file_is_left_out_of_the_map() {
    let dir = fixture();
    let files = all_files(dir.path());
    let focus = vec![PathBuf::from("shop/pricing.py")];
    let others: Vec<PathBuf> = files.into_iter().filter(|f| !focus.contains(f)).collect();

    let map = build_repo_map(
        dir.path(),
        &focus,
        &others,
        &BTreeSet::new(),
        &BTreeSet::new(),
        1024,
    )
    .unwrap();

    assert!(!map.contains("shop/pricing.py"));
    assert!(map.contains("shop/cart.py"), "map was:\n{map}");
}

#[test]
fn repo_without_links_has_an_empty_map() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.py", "def foo():\n    return 1\n");
    write(dir.path(), "b.py", "print('hi')\n");

    let files = all_files(dir.path());
    let map = build_repo_map(
        dir.path(),
        &[],
        &files,
        &BTreeSet::new(),
        &BTreeSet::new(),
        1024,
    )
    .unwrap();
    assert!(map.is_empty(), "map was:\n{map}");
}
