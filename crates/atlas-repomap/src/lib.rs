//! Tree-sitter tag extraction, reference resolution and ranking.
//!
//! Two products share one extraction pipeline:
//!
//! - a ranked, token-budgeted **repo map** ([`RepoMap`], [`build_repo_map`]):
//!   tags → file reference graph → personalized PageRank → binary-searched
//!   prefix rendered with enclosing scopes;
//! - the complete **code graph** ([`codegraph::build_code_graph`]): one node per
//!   file and per structural definition, one edge per resolved reference.

pub mod budget;
pub mod codegraph;
pub mod graph;
pub mod languages;
pub mod map;
pub mod output;
pub mod parser;
pub mod render;
pub mod resolve;
pub mod tokenize;
pub mod walker;

pub use codegraph::{CodeEdge, CodeGraph, CodeNode, NodeKind};
pub use languages::{GrammarRegistry, Language};
pub use map::{build_repo_map, MapRequest, RepoMap};
pub use parser::{Definition, Reference, Tag};
