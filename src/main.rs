use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use serde::Serialize;

use atlas_core::{AtlasConfig, OutputFormat, RepoMetadata};
use atlas_graphstore::query;
use atlas_graphstore::{GraphNode, GraphStore, SqliteGraphStore};
use atlas_repomap::walker::walk_repo;
use atlas_repomap::{MapRequest, RepoMap};

#[derive(Parser)]
#[command(
    name = "atlas",
    version,
    about = "Code knowledge graph builder",
    long_about = "Atlas parses a repository with tree-sitter, resolves references between\n\
                  definitions, and either renders a ranked, token-budgeted repo map or\n\
                  persists the full call graph to SQLite for later queries.\n\n\
                  Examples:\n  \
                    atlas map --path .                     Ranked map of the repository\n  \
                    atlas map --focus src/lib.rs --mention parse\n  \
                    atlas ingest --path .                  Build and store the code graph\n  \
                    atlas entry-points <NODE_ID>           Who ends up calling this?\n  \
                    atlas changed --file src/a.py --lines 10,11"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to configuration file (default: .atlas.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        global = true,
        default_value = "text",
        long_help = "Output format for command results.\n\n\
                       Formats:\n  \
                         text  Human-readable output (default)\n  \
                         json  Machine-readable JSON with camelCase keys"
    )]
    format: OutputFormat,

    /// Enable verbose output
    #[arg(long, short, global = true)]
    verbose: bool,
}

/// Which stored repository a command works on.
#[derive(Args)]
struct RepoArgs {
    /// Repository path (default: current directory)
    #[arg(long, default_value = ".")]
    path: PathBuf,

    /// Repository id in the graph store (default: repository directory name)
    #[arg(long)]
    repo_id: Option<String>,
}

impl RepoArgs {
    fn repo_id(&self) -> Result<String> {
        if let Some(id) = &self.repo_id {
            return Ok(id.clone());
        }
        let root = self.path.canonicalize().into_diagnostic()?;
        root.file_name()
            .map(|name| name.to_string_lossy().to_string())
            .ok_or_else(|| miette::miette!("cannot derive a repository id from {}", root.display()))
    }
}

#[derive(Subcommand)]
enum Command {
    /// Render a ranked, token-budgeted map of the repository
    #[command(long_about = "Render a ranked, token-budgeted map of the repository.\n\n\
        Definitions are ranked with personalized PageRank over the file reference\n\
        graph. Focus files are left out of the map but steer the ranking towards\n\
        what they use; mentioned identifiers and files get a boost.\n\n\
        Examples:\n  atlas map --path .\n  atlas map --max-tokens 2048 --focus src/main.rs")]
    Map {
        /// Repository path (default: current directory)
        #[arg(long, default_value = ".")]
        path: PathBuf,

        /// Token budget (default: repomap.map_tokens from config)
        #[arg(long)]
        max_tokens: Option<usize>,

        /// Files being worked on; excluded from the map
        #[arg(long)]
        focus: Vec<PathBuf>,

        /// Identifiers to boost
        #[arg(long)]
        mention: Vec<String>,

        /// Files to boost
        #[arg(long)]
        mention_file: Vec<PathBuf>,
    },
    /// Build the code graph and store it, replacing any previous graph
    Ingest {
        #[command(flatten)]
        repo: RepoArgs,

        /// Owner identity mixed into node ids
        #[arg(long, default_value = "local")]
        owner: String,

        /// Branch the graph is built from
        #[arg(long, default_value = "main")]
        branch: String,
    },
    /// Delete the stored graph of a repository
    Cleanup {
        #[command(flatten)]
        repo: RepoArgs,
    },
    /// Look up nodes by id or by name
    Node {
        /// Node id
        id: Option<String>,

        /// Find nodes with this name instead
        #[arg(long, conflicts_with = "id")]
        name: Option<String>,

        #[command(flatten)]
        repo: RepoArgs,
    },
    /// Nodes one reference away from the given nodes
    Neighbours {
        /// Node ids
        #[arg(required = true)]
        ids: Vec<String>,

        #[command(flatten)]
        repo: RepoArgs,
    },
    /// Outgoing reference tree of a node
    Tree {
        /// Node id
        id: String,

        /// Maximum depth
        #[arg(long, default_value = "3")]
        depth: usize,

        #[command(flatten)]
        repo: RepoArgs,
    },
    /// Nodes that transitively reference a node and have no callers
    EntryPoints {
        /// Node id
        id: String,

        #[command(flatten)]
        repo: RepoArgs,
    },
    /// Definitions whose body contains the given changed lines
    Changed {
        /// Repository-relative file
        #[arg(long)]
        file: String,

        /// One-based line numbers, comma separated
        #[arg(long, value_delimiter = ',', required = true)]
        lines: Vec<usize>,

        #[command(flatten)]
        repo: RepoArgs,
    },
    /// Attach a summary to a node
    Annotate {
        /// Node id
        id: String,

        /// Summary text
        docstring: String,

        #[command(flatten)]
        repo: RepoArgs,
    },
    /// Run a read-only SQL query against the graph database
    Query {
        /// SQL statement (writes are rejected)
        sql: String,
    },
    /// Create a default .atlas.toml configuration file
    Init,
}

const DEFAULT_CONFIG: &str = r#"# Atlas Configuration

[repomap]
# Token budget for `atlas map`
# map_tokens = 1024
# Budget multiplier when no focus files are given
# map_multiplier_no_files = 8
# Model context window; caps the multiplied budget
# max_context_window = 128000
# Map lines are cut to this many characters
# max_line_length = 100
# Text placed before the map (counted against the budget)
# repo_content_prefix = "Repository map:\n{other}"

[walk]
# Files larger than this many bytes are skipped
# max_file_size = 1048576

[graph]
# SQLite database holding persisted graphs
# database = ".atlas/graph.db"
# Nodes or edges written per transaction
# batch_size = 300
# Retries for a batch when the database is busy
# max_retries = 3
# Backoff step between retries, in milliseconds
# retry_backoff_ms = 50
"#;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MapOutput<'a> {
    map: &'a str,
    tokens: usize,
    files: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IngestOutput<'a> {
    #[serde(flatten)]
    repo: &'a RepoMetadata,
    node_count: usize,
    edge_count: usize,
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .build(),
        )
    }))?;
    human_panic::setup_panic!();

    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => AtlasConfig::from_file(path)?,
        None => {
            let default_path = Path::new(".atlas.toml");
            if default_path.exists() {
                AtlasConfig::from_file(default_path)?
            } else {
                AtlasConfig::default()
            }
        }
    };
    tracing::debug!(format = %cli.format, database = %config.graph.database.display(), "loaded configuration");

    match cli.command {
        Command::Map {
            ref path,
            max_tokens,
            ref focus,
            ref mention,
            ref mention_file,
        } => {
            let files = walk_repo(path, &config.walk)?;
            let focus_set: BTreeSet<&PathBuf> = focus.iter().collect();
            let other_files: Vec<PathBuf> = files
                .into_iter()
                .map(|f| f.path)
                .filter(|p| !focus_set.contains(p))
                .collect();
            let file_count = other_files.len();

            let mut repo_map = RepoMap::new(path, config.repomap.clone(), config.walk.clone())?;
            let map = repo_map.generate(&MapRequest {
                focus_files: focus.clone(),
                other_files,
                mentioned_files: mention_file.iter().cloned().collect(),
                mentioned_idents: mention.iter().cloned().collect(),
                token_budget: max_tokens,
            })?;

            match cli.format {
                OutputFormat::Json => {
                    let output = MapOutput {
                        map: &map,
                        tokens: repo_map.count_tokens(&map),
                        files: file_count,
                    };
                    println!("{}", serde_json::to_string_pretty(&output).into_diagnostic()?);
                }
                OutputFormat::Text => print!("{map}"),
            }
        }
        Command::Ingest {
            ref repo,
            ref owner,
            ref branch,
        } => {
            let metadata = RepoMetadata {
                repo_id: repo.repo_id()?,
                owner_identity: owner.clone(),
                default_branch: branch.clone(),
            };
            let store = SqliteGraphStore::open(&config.graph.database)?;
            let summary = atlas_graphstore::build_and_persist_graph_with(
                &store,
                &repo.path,
                &metadata.repo_id,
                &metadata.owner_identity,
                &config,
            )?;

            match cli.format {
                OutputFormat::Json => {
                    let output = IngestOutput {
                        repo: &metadata,
                        node_count: summary.node_count,
                        edge_count: summary.edge_count,
                    };
                    println!("{}", serde_json::to_string_pretty(&output).into_diagnostic()?);
                }
                OutputFormat::Text => println!(
                    "Stored {} nodes and {} edges for {} ({})",
                    summary.node_count, summary.edge_count, metadata.repo_id, metadata.default_branch
                ),
            }
        }
        Command::Cleanup { ref repo } => {
            let repo_id = repo.repo_id()?;
            let store = SqliteGraphStore::open(&config.graph.database)?;
            let removed = atlas_graphstore::cleanup_graph(&store, &repo_id)?;
            match cli.format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&removed).into_diagnostic()?);
                }
                OutputFormat::Text => println!(
                    "Removed {} nodes and {} edges for {repo_id}",
                    removed.nodes, removed.edges
                ),
            }
        }
        Command::Node {
            ref id,
            ref name,
            ref repo,
        } => {
            let repo_id = repo.repo_id()?;
            let store = SqliteGraphStore::open(&config.graph.database)?;
            let nodes = match (id, name) {
                (Some(id), _) => store.get_node(id, &repo_id)?.into_iter().collect(),
                (None, Some(name)) => store.find_by_name(&repo_id, name)?,
                (None, None) => miette::bail!("provide a node id or --name"),
            };
            print_nodes(&nodes, cli.format, true)?;
        }
        Command::Neighbours { ref ids, ref repo } => {
            let repo_id = repo.repo_id()?;
            let store = SqliteGraphStore::open(&config.graph.database)?;
            let nodes = query::neighbours(&store, &repo_id, ids)?;
            print_nodes(&nodes, cli.format, false)?;
        }
        Command::Tree {
            ref id,
            depth,
            ref repo,
        } => {
            let repo_id = repo.repo_id()?;
            let store = SqliteGraphStore::open(&config.graph.database)?;
            let Some(tree) = query::code_graph(&store, &repo_id, id, depth)? else {
                miette::bail!("no node '{id}' in repository '{repo_id}'");
            };
            match cli.format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&tree).into_diagnostic()?);
                }
                OutputFormat::Text => {
                    let mut stack = vec![(&tree, 0usize)];
                    while let Some((node, level)) = stack.pop() {
                        let lines = match (node.start_line, node.end_line) {
                            (Some(start), Some(end)) => format!(":{start}-{end}"),
                            _ => String::new(),
                        };
                        println!(
                            "{}{} [{}] {}{lines}",
                            "  ".repeat(level),
                            node.name,
                            node.node_type,
                            node.file_path
                        );
                        for child in node.children.iter().rev() {
                            stack.push((child, level + 1));
                        }
                    }
                }
            }
        }
        Command::EntryPoints { ref id, ref repo } => {
            let repo_id = repo.repo_id()?;
            let store = SqliteGraphStore::open(&config.graph.database)?;
            let nodes = query::entry_points(&store, &repo_id, id)?;
            print_nodes(&nodes, cli.format, false)?;
        }
        Command::Changed {
            ref file,
            ref lines,
            ref repo,
        } => {
            let repo_id = repo.repo_id()?;
            let store = SqliteGraphStore::open(&config.graph.database)?;
            let nodes = query::nodes_touching_lines(&store, &repo_id, file, lines)?;
            print_nodes(&nodes, cli.format, false)?;
        }
        Command::Annotate {
            ref id,
            ref docstring,
            ref repo,
        } => {
            let repo_id = repo.repo_id()?;
            let store = SqliteGraphStore::open(&config.graph.database)?;
            query::annotate(&store, &repo_id, id, docstring)?;
            if cli.format == OutputFormat::Text {
                println!("Annotated {id}");
            }
        }
        Command::Query { ref sql } => {
            let store = SqliteGraphStore::open(&config.graph.database)?;
            let rows = store.query_readonly(sql)?;
            match cli.format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&rows).into_diagnostic()?);
                }
                OutputFormat::Text => {
                    for row in &rows {
                        println!("{}", serde_json::to_string(row).into_diagnostic()?);
                    }
                }
            }
        }
        Command::Init => {
            let path = Path::new(".atlas.toml");
            if path.exists() {
                miette::bail!(".atlas.toml already exists");
            }
            std::fs::write(path, DEFAULT_CONFIG).into_diagnostic()?;
            println!("Created .atlas.toml with default configuration");
        }
    }

    Ok(())
}

fn print_nodes(nodes: &[GraphNode], format: OutputFormat, with_source: bool) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(nodes).into_diagnostic()?);
        }
        OutputFormat::Text => {
            if nodes.is_empty() {
                println!("No matching nodes.");
            }
            for node in nodes {
                let lines = match (node.start_line, node.end_line) {
                    (Some(start), Some(end)) => format!(":{start}-{end}"),
                    _ => String::new(),
                };
                println!(
                    "{} [{}] {}{lines}  {}",
                    node.qualified_name, node.node_type, node.file_path, node.node_id
                );
                if let Some(doc) = &node.docstring {
                    println!("  {doc}");
                }
                if with_source && !node.is_file() {
                    for line in node.source_text.lines() {
                        println!("  │{line}");
                    }
                }
            }
        }
    }
    Ok(())
}
