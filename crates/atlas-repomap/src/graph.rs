use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;

use crate::parser::{Definition, Tag};
use crate::resolve::DefinitionIndex;

/// PageRank damping factor.
pub const DAMPING: f64 = 0.85;

/// Iteration cap for the power method.
pub const MAX_ITERATIONS: usize = 100;

/// Per-node convergence tolerance; the total error bound is `TOLERANCE * N`.
pub const TOLERANCE: f64 = 1e-6;

/// One entry of the ranked repo map.
#[derive(Debug, Clone, PartialEq)]
pub enum RankedItem {
    /// A definition to show with its surrounding context.
    Tag(Definition),
    /// A file listed by path only.
    File(PathBuf),
}

impl RankedItem {
    /// Path of the file the entry belongs to.
    pub fn rel_path(&self) -> &Path {
        match self {
            RankedItem::Tag(d) => &d.rel_path,
            RankedItem::File(p) => p,
        }
    }
}

/// Inputs that bias the ranking toward what the user is working on.
///
/// All paths are relative to the repository root.
#[derive(Debug, Clone, Default)]
pub struct RankContext {
    /// Files already in focus; their definitions are never listed.
    pub focus_files: BTreeSet<PathBuf>,
    /// Remaining candidate files.
    pub other_files: BTreeSet<PathBuf>,
    /// Files named in the conversation.
    pub mentioned_files: BTreeSet<PathBuf>,
    /// Identifiers named in the conversation.
    pub mentioned_idents: BTreeSet<String>,
}

impl RankContext {
    fn candidate_count(&self) -> usize {
        self.focus_files.union(&self.other_files).count()
    }
}

/// Edge of the file-level reference graph.
#[derive(Debug, Clone)]
struct RefEdge {
    ident: String,
    weight: f64,
}

/// Directed multigraph of files linked by identifier references.
///
/// Each edge points from a referencing file to a file that defines the
/// referenced identifier.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use atlas_repomap::graph::FileGraph;
/// use atlas_repomap::languages::GrammarRegistry;
/// use atlas_repomap::parser::extract_tags;
///
/// let registry = GrammarRegistry::new().unwrap();
/// let mut tags = extract_tags(&registry, Path::new("a.py"), Path::new("/r/a.py"), "def foo():\n    pass\n").unwrap();
/// tags.extend(extract_tags(&registry, Path::new("b.py"), Path::new("/r/b.py"), "foo()\n").unwrap());
///
/// let graph = FileGraph::build(&tags, &Default::default());
/// assert_eq!(graph.edge_count(), 1);
/// ```
pub struct FileGraph {
    graph: DiGraph<PathBuf, RefEdge>,
    index: DefinitionIndex,
}

impl FileGraph {
    /// Build the file graph from every tag of the candidate files.
    ///
    /// When no references exist at all, definitions are counted as references
    /// so that files still link to themselves.
    pub fn build(tags: &[Tag], context: &RankContext) -> Self {
        let defs: Vec<Definition> = tags
            .iter()
            .filter_map(|t| match t {
                Tag::Def(d) => Some(d.clone()),
                Tag::Ref(_) => None,
            })
            .collect();
        let index = DefinitionIndex::new(defs);

        let graph = Self::link(tags, &index, context);
        Self { graph, index }
    }

    fn link(
        tags: &[Tag],
        index: &DefinitionIndex,
        context: &RankContext,
    ) -> DiGraph<PathBuf, RefEdge> {
        // ident -> referencer -> occurrence count
        let mut references: BTreeMap<&str, BTreeMap<&Path, usize>> = BTreeMap::new();
        for tag in tags {
            if let Tag::Ref(r) = tag {
                *references
                    .entry(r.name.as_str())
                    .or_default()
                    .entry(r.rel_path.as_path())
                    .or_default() += 1;
            }
        }
        if references.is_empty() {
            for def in index.definitions() {
                references
                    .entry(def.name.as_str())
                    .or_default()
                    .insert(def.rel_path.as_path(), 1);
            }
        }

        let mut graph = DiGraph::new();
        let mut nodes: HashMap<PathBuf, NodeIndex> = HashMap::new();
        let mut node_for = |graph: &mut DiGraph<PathBuf, RefEdge>, path: &Path| {
            *nodes
                .entry(path.to_path_buf())
                .or_insert_with(|| graph.add_node(path.to_path_buf()))
        };

        for (ident, referencers) in &references {
            let definers = index.definers(ident);
            if definers.is_empty() {
                continue;
            }

            let mul = if context.mentioned_idents.contains(*ident) {
                10.0
            } else if ident.starts_with('_') {
                0.1
            } else {
                1.0
            };

            for (referencer, &count) in referencers {
                for definer in &definers {
                    let src = node_for(&mut graph, *referencer);
                    let dst = node_for(&mut graph, *definer);
                    graph.add_edge(
                        src,
                        dst,
                        RefEdge {
                            ident: ident.to_string(),
                            weight: mul * (count as f64).sqrt(),
                        },
                    );
                }
            }
        }

        graph
    }

    /// Number of file nodes.
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of reference edges.
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Rank definitions and files for the repo map.
    ///
    /// Definitions in focus files are skipped. Ranked definitions come first
    /// (each group in line order), then files from the graph by rank, then
    /// other candidate files that were not listed yet. A graph without edges
    /// ranks nothing.
    pub fn ranked_items(&self, context: &RankContext) -> Vec<RankedItem> {
        if self.graph.edge_count() == 0 {
            return Vec::new();
        }

        let n = self.graph.node_count();
        let candidates = context.candidate_count().max(1) as f64;
        let personalization: Vec<f64> = self
            .graph
            .node_indices()
            .map(|idx| {
                let path = &self.graph[idx];
                if context.focus_files.contains(path) || context.mentioned_files.contains(path) {
                    100.0 / candidates
                } else {
                    0.0
                }
            })
            .collect();
        debug_assert_eq!(personalization.len(), n);

        let ranks = personalized_pagerank(&self.graph, |e| e.weight, &personalization);

        // Split each file's rank over its out-edges by weight.
        let mut out_weight = vec![0.0; n];
        for edge in self.graph.edge_references() {
            out_weight[edge.source().index()] += edge.weight().weight;
        }
        let mut by_definition: HashMap<(&Path, &str), f64> = HashMap::new();
        for edge in self.graph.edge_references() {
            let src = edge.source().index();
            let share = ranks[src] * edge.weight().weight / out_weight[src];
            let definer = self.graph[edge.target()].as_path();
            *by_definition
                .entry((definer, edge.weight().ident.as_str()))
                .or_default() += share;
        }

        let mut ranked_defs: Vec<((&Path, &str), f64)> = by_definition.into_iter().collect();
        ranked_defs.sort_by(|a, b| by_rank_desc(a.1, b.1).then_with(|| a.0.cmp(&b.0)));

        let mut items = Vec::new();
        let mut included: BTreeSet<&Path> = BTreeSet::new();
        for ((path, ident), _) in &ranked_defs {
            if context.focus_files.contains(*path) {
                continue;
            }
            let mut defs: Vec<&Definition> = self
                .index
                .candidates(ident)
                .iter()
                .map(|&id| self.index.get(id))
                .filter(|d| d.rel_path == *path)
                .collect();
            defs.sort_by_key(|d| (d.span.start, d.byte_range.start));
            items.extend(defs.into_iter().cloned().map(RankedItem::Tag));
            included.insert(*path);
        }

        let mut ranked_files: Vec<(&Path, f64)> = self
            .graph
            .node_indices()
            .map(|idx| (self.graph[idx].as_path(), ranks[idx.index()]))
            .collect();
        ranked_files.sort_by(|a, b| by_rank_desc(a.1, b.1).then_with(|| a.0.cmp(b.0)));

        let remaining = ranked_files
            .into_iter()
            .map(|(path, _)| path)
            .chain(context.other_files.iter().map(PathBuf::as_path))
            .collect::<Vec<_>>();
        for path in remaining {
            if context.focus_files.contains(path) || !included.insert(path) {
                continue;
            }
            items.push(RankedItem::File(path.to_path_buf()));
        }

        items
    }
}

fn by_rank_desc(a: f64, b: f64) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

/// Personalized PageRank by power iteration.
///
/// `personalization` holds one non-negative weight per node (by index); it is
/// normalized, and replaced with the uniform vector when it sums to zero.
/// Dangling nodes redistribute their rank by the same vector. Parallel edges
/// add up. Stops when the L1 change drops below `TOLERANCE * N` or after
/// [`MAX_ITERATIONS`].
///
/// # Examples
///
/// ```
/// use petgraph::graph::DiGraph;
/// use atlas_repomap::graph::personalized_pagerank;
///
/// let mut g = DiGraph::<&str, f64>::new();
/// let a = g.add_node("a");
/// let b = g.add_node("b");
/// g.add_edge(a, b, 1.0);
///
/// let ranks = personalized_pagerank(&g, |w| *w, &[0.0, 0.0]);
/// assert!(ranks[b.index()] > ranks[a.index()]);
/// assert!((ranks.iter().sum::<f64>() - 1.0).abs() < 1e-6);
/// ```
pub fn personalized_pagerank<N, E>(
    graph: &DiGraph<N, E>,
    weight: impl Fn(&E) -> f64,
    personalization: &[f64],
) -> Vec<f64> {
    let n = graph.node_count();
    if n == 0 {
        return Vec::new();
    }
    let n_f64 = n as f64;

    let total: f64 = personalization.iter().take(n).sum();
    let p: Vec<f64> = if personalization.len() == n && total > 0.0 {
        personalization.iter().map(|v| v / total).collect()
    } else {
        vec![1.0 / n_f64; n]
    };

    let mut out_weight = vec![0.0; n];
    for edge in graph.edge_references() {
        out_weight[edge.source().index()] += weight(edge.weight());
    }

    let mut ranks = vec![1.0 / n_f64; n];
    for iteration in 0..MAX_ITERATIONS {
        let dangling: f64 = (0..n)
            .filter(|&i| out_weight[i] <= 0.0)
            .map(|i| ranks[i])
            .sum();

        let mut next: Vec<f64> = p
            .iter()
            .map(|pi| (1.0 - DAMPING) * pi + DAMPING * dangling * pi)
            .collect();
        for edge in graph.edge_references() {
            let src = edge.source().index();
            if out_weight[src] > 0.0 {
                next[edge.target().index()] +=
                    DAMPING * ranks[src] * weight(edge.weight()) / out_weight[src];
            }
        }

        let err: f64 = next.iter().zip(&ranks).map(|(a, b)| (a - b).abs()).sum();
        ranks = next;
        if err < n_f64 * TOLERANCE {
            tracing::trace!(iteration, "pagerank converged");
            break;
        }
    }

    ranks
}
