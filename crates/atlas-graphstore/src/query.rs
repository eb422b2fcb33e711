//! Read-side traversals over a stored graph.
//!
//! All traversals are iterative and keep an explicit visited set, so cycles
//! and deep call chains are safe.

use std::collections::{BTreeSet, HashSet, VecDeque};

use atlas_core::AtlasError;
use serde::{Deserialize, Serialize};

use crate::store::{GraphNode, GraphStore};

/// One node of an outgoing reference tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeTree {
    /// Node id.
    pub node_id: String,
    /// Node name.
    pub name: String,
    /// `file`, `function` or `class`.
    pub node_type: String,
    /// Repository-relative file path.
    pub file_path: String,
    /// First line, one-based.
    pub start_line: Option<usize>,
    /// Last line, one-based.
    pub end_line: Option<usize>,
    /// Relationship of the edge leading here; `None` for the root.
    pub relationship: Option<String>,
    /// Referenced nodes not already shown elsewhere in the tree.
    pub children: Vec<CodeTree>,
}

/// Distinct nodes one hop away from any of `node_ids`, in either direction.
///
/// The input nodes themselves are not part of the result. Results are sorted
/// by file path and line.
///
/// # Errors
///
/// Propagates store errors.
pub fn neighbours(
    store: &dyn GraphStore,
    repo_id: &str,
    node_ids: &[String],
) -> Result<Vec<GraphNode>, AtlasError> {
    let inputs: HashSet<&str> = node_ids.iter().map(String::as_str).collect();
    let mut found: BTreeSet<String> = BTreeSet::new();

    for id in node_ids {
        for edge in store.outgoing(repo_id, id)? {
            found.insert(edge.target_id);
        }
        for edge in store.incoming(repo_id, id)? {
            found.insert(edge.source_id);
        }
    }
    found.retain(|id| !inputs.contains(id.as_str()));

    let mut nodes = Vec::with_capacity(found.len());
    for id in &found {
        if let Some(node) = store.get_node(id, repo_id)? {
            nodes.push(node);
        }
    }
    sort_nodes(&mut nodes);
    Ok(nodes)
}

/// Outgoing reference tree rooted at `node_id`, at most `max_depth` levels deep.
///
/// Breadth-first: each node appears once, at its shallowest depth. Returns
/// `None` if the root does not exist.
///
/// # Errors
///
/// Propagates store errors.
pub fn code_graph(
    store: &dyn GraphStore,
    repo_id: &str,
    node_id: &str,
    max_depth: usize,
) -> Result<Option<CodeTree>, AtlasError> {
    let Some(root) = store.get_node(node_id, repo_id)? else {
        return Ok(None);
    };

    // Flat arena in BFS order; children always come after their parent.
    let mut arena: Vec<(CodeTree, Vec<usize>)> = vec![(tree_node(&root, None), Vec::new())];
    let mut visited: HashSet<String> = HashSet::from([root.node_id.clone()]);
    let mut queue: VecDeque<(usize, usize)> = VecDeque::from([(0, 0)]);

    while let Some((slot, depth)) = queue.pop_front() {
        if depth >= max_depth {
            continue;
        }
        let id = arena[slot].0.node_id.clone();
        for edge in store.outgoing(repo_id, &id)? {
            if !visited.insert(edge.target_id.clone()) {
                continue;
            }
            let Some(target) = store.get_node(&edge.target_id, repo_id)? else {
                continue;
            };
            let child = arena.len();
            arena.push((tree_node(&target, Some(edge.relationship_type)), Vec::new()));
            arena[slot].1.push(child);
            queue.push_back((child, depth + 1));
        }
    }

    let mut built: Vec<Option<CodeTree>> = Vec::with_capacity(arena.len());
    let mut child_lists = Vec::with_capacity(arena.len());
    for (tree, children) in arena {
        built.push(Some(tree));
        child_lists.push(children);
    }
    for slot in (0..built.len()).rev() {
        let children: Vec<CodeTree> = child_lists[slot]
            .iter()
            .filter_map(|&c| built[c].take())
            .collect();
        if let Some(tree) = built[slot].as_mut() {
            tree.children = children;
        }
    }
    Ok(built.into_iter().next().flatten())
}

/// Nodes that transitively reference `node_id` and are not referenced
/// themselves.
///
/// A node nobody references is its own entry point. Self references do not
/// count as inbound. Nodes only reachable through a cycle with no outside
/// caller yield no entry point.
///
/// # Errors
///
/// Propagates store errors.
pub fn entry_points(
    store: &dyn GraphStore,
    repo_id: &str,
    node_id: &str,
) -> Result<Vec<GraphNode>, AtlasError> {
    let mut visited: HashSet<String> = HashSet::from([node_id.to_string()]);
    let mut stack = vec![node_id.to_string()];
    let mut entries: BTreeSet<String> = BTreeSet::new();

    while let Some(current) = stack.pop() {
        let callers: Vec<String> = store
            .incoming(repo_id, &current)?
            .into_iter()
            .map(|e| e.source_id)
            .filter(|source| *source != current)
            .collect();
        if callers.is_empty() {
            entries.insert(current);
            continue;
        }
        for caller in callers {
            if visited.insert(caller.clone()) {
                stack.push(caller);
            }
        }
    }

    let mut nodes = Vec::with_capacity(entries.len());
    for id in &entries {
        if let Some(node) = store.get_node(id, repo_id)? {
            nodes.push(node);
        }
    }
    sort_nodes(&mut nodes);
    Ok(nodes)
}

/// Definitions in `file_path` whose span strictly contains one of `lines`.
///
/// Lines are one-based. The first and last line of a definition do not count,
/// so a change to a signature alone does not mark the body as touched.
///
/// # Errors
///
/// Propagates store errors.
pub fn nodes_touching_lines(
    store: &dyn GraphStore,
    repo_id: &str,
    file_path: &str,
    lines: &[usize],
) -> Result<Vec<GraphNode>, AtlasError> {
    Ok(store
        .nodes_in_file(repo_id, file_path)?
        .into_iter()
        .filter(|node| match (node.start_line, node.end_line) {
            (Some(start), Some(end)) => lines.iter().any(|&l| start < l && l < end),
            _ => false,
        })
        .collect())
}

/// Attach a derived summary to a node.
///
/// # Errors
///
/// Returns [`AtlasError::Database`] if the node does not exist.
pub fn annotate(
    store: &dyn GraphStore,
    repo_id: &str,
    node_id: &str,
    docstring: &str,
) -> Result<(), AtlasError> {
    if store.set_docstring(repo_id, node_id, docstring)? {
        Ok(())
    } else {
        Err(AtlasError::Database(format!(
            "no node '{node_id}' in repository '{repo_id}'"
        )))
    }
}

fn tree_node(node: &GraphNode, relationship: Option<String>) -> CodeTree {
    CodeTree {
        node_id: node.node_id.clone(),
        name: node.name.clone(),
        node_type: node.node_type.clone(),
        file_path: node.file_path.clone(),
        start_line: node.start_line,
        end_line: node.end_line,
        relationship,
        children: Vec::new(),
    }
}

fn sort_nodes(nodes: &mut [GraphNode]) {
    nodes.sort_by(|a, b| {
        (&a.file_path, a.start_line, &a.qualified_name).cmp(&(
            &b.file_path,
            b.start_line,
            &b.qualified_name,
        ))
    });
}
