//! Graph storage: the [`GraphStore`] seam and its SQLite implementation.
//!
//! Every row is scoped by `repo_id`. Nodes are keyed by `(repo_id, node_id)`
//! and inserted without upsert, so writing the same graph twice without a
//! cleanup fails on the key instead of duplicating rows.

use std::path::Path;
use std::time::Duration;

use atlas_core::AtlasError;
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, ErrorCode, Row};
use serde::{Deserialize, Serialize};

/// A persisted node: one file, function or class.
///
/// Line numbers are one-based. File nodes carry no line span.
///
/// # Examples
///
/// ```
/// use atlas_graphstore::store::GraphNode;
///
/// let node = GraphNode {
///     node_id: "abc".into(),
///     repo_id: "repo".into(),
///     name: "foo".into(),
///     qualified_name: "a.py:foo".into(),
///     file_path: "a.py".into(),
///     start_line: Some(1),
///     end_line: Some(2),
///     node_type: "function".into(),
///     source_text: "def foo():\n    return 42".into(),
///     docstring: None,
/// };
/// assert!(!node.is_file());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    /// Deterministic id, see [`crate::node_id::node_id`].
    pub node_id: String,
    /// Repository the node belongs to.
    pub repo_id: String,
    /// Definition name; the relative path for file nodes.
    pub name: String,
    /// `path` for files, `path:Outer.name` for definitions.
    pub qualified_name: String,
    /// Repository-relative path with `/` separators.
    pub file_path: String,
    /// First line, one-based.
    pub start_line: Option<usize>,
    /// Last line, one-based and inclusive.
    pub end_line: Option<usize>,
    /// `file`, `function` or `class`.
    pub node_type: String,
    /// Source text of the definition.
    pub source_text: String,
    /// Derived summary attached after ingestion.
    pub docstring: Option<String>,
}

impl GraphNode {
    /// Whether this node stands for a whole file.
    pub fn is_file(&self) -> bool {
        self.node_type == "file"
    }
}

/// A persisted edge from a referencing node to the definition it resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphEdge {
    /// Repository the edge belongs to.
    pub repo_id: String,
    /// Referencing node.
    pub source_id: String,
    /// Referenced definition.
    pub target_id: String,
    /// Reference category (`call`, `class`, `implementation`, `unknown`, ...).
    pub relationship_type: String,
    /// Identifier at the reference site.
    pub ident: String,
    /// Reference lines, absent for references without a location.
    pub ref_start_line: Option<usize>,
    /// See `ref_start_line`.
    pub ref_end_line: Option<usize>,
    /// Definition lines, one-based.
    pub def_start_line: usize,
    /// See `def_start_line`.
    pub def_end_line: usize,
}

/// Row counts for one repository.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphCounts {
    /// Number of nodes.
    pub nodes: usize,
    /// Number of edges.
    pub edges: usize,
}

/// Storage backend for repository graphs.
///
/// `insert_nodes` and `insert_edges` are atomic per call: either the whole
/// slice is written or nothing is. Transient failures are reported as
/// [`AtlasError::Busy`] so callers can retry.
pub trait GraphStore {
    /// Insert a batch of nodes.
    fn insert_nodes(&self, nodes: &[GraphNode]) -> Result<(), AtlasError>;

    /// Insert a batch of edges.
    fn insert_edges(&self, edges: &[GraphEdge]) -> Result<(), AtlasError>;

    /// Delete every node and edge of a repository, returning what was removed.
    fn delete_repo(&self, repo_id: &str) -> Result<GraphCounts, AtlasError>;

    /// Look a node up by id.
    fn get_node(&self, node_id: &str, repo_id: &str) -> Result<Option<GraphNode>, AtlasError>;

    /// Edges leaving `node_id`, in insertion order.
    fn outgoing(&self, repo_id: &str, node_id: &str) -> Result<Vec<GraphEdge>, AtlasError>;

    /// Edges arriving at `node_id`, in insertion order.
    fn incoming(&self, repo_id: &str, node_id: &str) -> Result<Vec<GraphEdge>, AtlasError>;

    /// Nodes of one file, file node first, then by start line.
    fn nodes_in_file(&self, repo_id: &str, file_path: &str) -> Result<Vec<GraphNode>, AtlasError>;

    /// Nodes of every file at or below a directory (or the file itself).
    fn nodes_under_path(&self, repo_id: &str, prefix: &str)
        -> Result<Vec<GraphNode>, AtlasError>;

    /// Nodes with the given short name.
    fn find_by_name(&self, repo_id: &str, name: &str) -> Result<Vec<GraphNode>, AtlasError>;

    /// Attach a docstring. Returns `false` if the node does not exist.
    fn set_docstring(
        &self,
        repo_id: &str,
        node_id: &str,
        docstring: &str,
    ) -> Result<bool, AtlasError>;

    /// Node and edge counts of a repository.
    fn counts(&self, repo_id: &str) -> Result<GraphCounts, AtlasError>;
}

const NODE_COLUMNS: &str = "node_id, repo_id, name, qualified_name, file_path, start_line, \
                            end_line, node_type, source_text, docstring";

const EDGE_COLUMNS: &str = "repo_id, source_id, target_id, relationship_type, ident, \
                            ref_start_line, ref_end_line, def_start_line, def_end_line";

const NODE_ORDER: &str = "ORDER BY file_path, start_line, qualified_name";

/// SQLite-backed [`GraphStore`].
///
/// # Examples
///
/// ```
/// use atlas_graphstore::store::{GraphStore, SqliteGraphStore};
///
/// let store = SqliteGraphStore::in_memory().unwrap();
/// let counts = store.counts("repo").unwrap();
/// assert_eq!(counts.nodes, 0);
/// ```
pub struct SqliteGraphStore {
    conn: Connection,
}

impl SqliteGraphStore {
    /// Open or create a graph database at the given path.
    ///
    /// Creates the parent directory and the schema if missing.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::Database`] if the database cannot be opened.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::path::Path;
    /// use atlas_graphstore::store::SqliteGraphStore;
    ///
    /// let store = SqliteGraphStore::open(Path::new(".atlas/graph.db")).unwrap();
    /// ```
    pub fn open(path: &Path) -> Result<Self, AtlasError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    AtlasError::Database(format!("failed to create graph directory: {e}"))
                })?;
            }
        }
        let conn = Connection::open(path)
            .map_err(|e| AtlasError::Database(format!("failed to open database: {e}")))?;
        conn.busy_timeout(Duration::from_millis(250))
            .map_err(|e| AtlasError::Database(format!("failed to set busy timeout: {e}")))?;

        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::Database`] if schema creation fails.
    pub fn in_memory() -> Result<Self, AtlasError> {
        let conn = Connection::open_in_memory().map_err(|e| {
            AtlasError::Database(format!("failed to create in-memory database: {e}"))
        })?;

        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), AtlasError> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS nodes (
                    repo_id TEXT NOT NULL,
                    node_id TEXT NOT NULL,
                    name TEXT NOT NULL,
                    qualified_name TEXT NOT NULL,
                    file_path TEXT NOT NULL,
                    start_line INTEGER,
                    end_line INTEGER,
                    node_type TEXT NOT NULL,
                    source_text TEXT NOT NULL,
                    docstring TEXT,
                    PRIMARY KEY (repo_id, node_id)
                );

                CREATE INDEX IF NOT EXISTS idx_nodes_node_id ON nodes(node_id);
                CREATE INDEX IF NOT EXISTS idx_nodes_file ON nodes(repo_id, file_path);
                CREATE INDEX IF NOT EXISTS idx_nodes_name ON nodes(repo_id, name);

                CREATE TABLE IF NOT EXISTS edges (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    repo_id TEXT NOT NULL,
                    source_id TEXT NOT NULL,
                    target_id TEXT NOT NULL,
                    relationship_type TEXT NOT NULL,
                    ident TEXT NOT NULL,
                    ref_start_line INTEGER,
                    ref_end_line INTEGER,
                    def_start_line INTEGER NOT NULL,
                    def_end_line INTEGER NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_edges_source ON edges(repo_id, source_id);
                CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(repo_id, target_id);
                ",
            )
            .map_err(|e| AtlasError::Database(format!("failed to create schema: {e}")))?;

        Ok(())
    }

    /// Run an arbitrary read-only query and return its rows as JSON objects.
    ///
    /// Statements that could modify the database are rejected before they run.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::Database`] for invalid SQL or write statements.
    ///
    /// # Examples
    ///
    /// ```
    /// use atlas_graphstore::store::SqliteGraphStore;
    ///
    /// let store = SqliteGraphStore::in_memory().unwrap();
    /// let rows = store.query_readonly("SELECT 1 AS one").unwrap();
    /// assert_eq!(rows[0]["one"], 1);
    /// assert!(store.query_readonly("DELETE FROM nodes").is_err());
    /// ```
    pub fn query_readonly(
        &self,
        sql: &str,
    ) -> Result<Vec<serde_json::Map<String, serde_json::Value>>, AtlasError> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| db_error("failed to prepare query", e))?;
        if !stmt.readonly() {
            return Err(AtlasError::Database(
                "refusing to run a statement that writes to the graph".into(),
            ));
        }

        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let mut rows = stmt
            .query([])
            .map_err(|e| db_error("failed to run query", e))?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().map_err(|e| db_error("failed to read row", e))? {
            let mut object = serde_json::Map::new();
            for (i, column) in columns.iter().enumerate() {
                let value = row
                    .get_ref(i)
                    .map_err(|e| db_error("failed to read column", e))?;
                object.insert(column.clone(), json_value(value));
            }
            results.push(object);
        }
        Ok(results)
    }

    fn query_nodes(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<GraphNode>, AtlasError> {
        let mut stmt = self
            .conn
            .prepare_cached(sql)
            .map_err(|e| db_error("failed to prepare node query", e))?;
        let rows = stmt
            .query_map(params, node_from_row)
            .map_err(|e| db_error("failed to query nodes", e))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| db_error("failed to read nodes", e))
    }

    fn query_edges(&self, column: &str, repo_id: &str, id: &str) -> Result<Vec<GraphEdge>, AtlasError> {
        let sql = format!(
            "SELECT {EDGE_COLUMNS} FROM edges WHERE repo_id = ?1 AND {column} = ?2 ORDER BY id"
        );
        let mut stmt = self
            .conn
            .prepare_cached(&sql)
            .map_err(|e| db_error("failed to prepare edge query", e))?;
        let rows = stmt
            .query_map(params![repo_id, id], edge_from_row)
            .map_err(|e| db_error("failed to query edges", e))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| db_error("failed to read edges", e))
    }
}

impl GraphStore for SqliteGraphStore {
    fn insert_nodes(&self, nodes: &[GraphNode]) -> Result<(), AtlasError> {
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|e| db_error("failed to begin node batch", e))?;
        {
            let mut stmt = tx
                .prepare_cached(&format!(
                    "INSERT INTO nodes ({NODE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                ))
                .map_err(|e| db_error("failed to prepare node insert", e))?;
            for node in nodes {
                stmt.execute(params![
                    node.node_id,
                    node.repo_id,
                    node.name,
                    node.qualified_name,
                    node.file_path,
                    node.start_line,
                    node.end_line,
                    node.node_type,
                    node.source_text,
                    node.docstring,
                ])
                .map_err(|e| db_error(&format!("failed to insert node '{}'", node.qualified_name), e))?;
            }
        }
        tx.commit()
            .map_err(|e| db_error("failed to commit node batch", e))
    }

    fn insert_edges(&self, edges: &[GraphEdge]) -> Result<(), AtlasError> {
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|e| db_error("failed to begin edge batch", e))?;
        {
            let mut stmt = tx
                .prepare_cached(&format!(
                    "INSERT INTO edges ({EDGE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
                ))
                .map_err(|e| db_error("failed to prepare edge insert", e))?;
            for edge in edges {
                stmt.execute(params![
                    edge.repo_id,
                    edge.source_id,
                    edge.target_id,
                    edge.relationship_type,
                    edge.ident,
                    edge.ref_start_line,
                    edge.ref_end_line,
                    edge.def_start_line,
                    edge.def_end_line,
                ])
                .map_err(|e| db_error("failed to insert edge", e))?;
            }
        }
        tx.commit()
            .map_err(|e| db_error("failed to commit edge batch", e))
    }

    fn delete_repo(&self, repo_id: &str) -> Result<GraphCounts, AtlasError> {
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|e| db_error("failed to begin cleanup", e))?;
        let edges = tx
            .execute("DELETE FROM edges WHERE repo_id = ?1", params![repo_id])
            .map_err(|e| db_error(&format!("failed to delete edges of '{repo_id}'"), e))?;
        let nodes = tx
            .execute("DELETE FROM nodes WHERE repo_id = ?1", params![repo_id])
            .map_err(|e| db_error(&format!("failed to delete nodes of '{repo_id}'"), e))?;
        tx.commit()
            .map_err(|e| db_error("failed to commit cleanup", e))?;
        Ok(GraphCounts { nodes, edges })
    }

    fn get_node(&self, node_id: &str, repo_id: &str) -> Result<Option<GraphNode>, AtlasError> {
        let result = self.conn.query_row(
            &format!("SELECT {NODE_COLUMNS} FROM nodes WHERE repo_id = ?1 AND node_id = ?2"),
            params![repo_id, node_id],
            node_from_row,
        );

        match result {
            Ok(node) => Ok(Some(node)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(db_error(&format!("failed to get node '{node_id}'"), e)),
        }
    }

    fn outgoing(&self, repo_id: &str, node_id: &str) -> Result<Vec<GraphEdge>, AtlasError> {
        self.query_edges("source_id", repo_id, node_id)
    }

    fn incoming(&self, repo_id: &str, node_id: &str) -> Result<Vec<GraphEdge>, AtlasError> {
        self.query_edges("target_id", repo_id, node_id)
    }

    fn nodes_in_file(&self, repo_id: &str, file_path: &str) -> Result<Vec<GraphNode>, AtlasError> {
        self.query_nodes(
            &format!(
                "SELECT {NODE_COLUMNS} FROM nodes WHERE repo_id = ?1 AND file_path = ?2 {NODE_ORDER}"
            ),
            params![repo_id, file_path],
        )
    }

    fn nodes_under_path(
        &self,
        repo_id: &str,
        prefix: &str,
    ) -> Result<Vec<GraphNode>, AtlasError> {
        let prefix = prefix.trim_end_matches('/');
        if prefix.is_empty() || prefix == "." {
            return self.query_nodes(
                &format!("SELECT {NODE_COLUMNS} FROM nodes WHERE repo_id = ?1 {NODE_ORDER}"),
                params![repo_id],
            );
        }

        // '0' sorts right after '/', so [prefix/, prefix0) is exactly the subtree.
        let lower = format!("{prefix}/");
        let upper = format!("{prefix}0");
        self.query_nodes(
            &format!(
                "SELECT {NODE_COLUMNS} FROM nodes
                 WHERE repo_id = ?1 AND (file_path = ?2 OR (file_path >= ?3 AND file_path < ?4))
                 {NODE_ORDER}"
            ),
            params![repo_id, prefix, lower, upper],
        )
    }

    fn find_by_name(&self, repo_id: &str, name: &str) -> Result<Vec<GraphNode>, AtlasError> {
        self.query_nodes(
            &format!("SELECT {NODE_COLUMNS} FROM nodes WHERE repo_id = ?1 AND name = ?2 {NODE_ORDER}"),
            params![repo_id, name],
        )
    }

    fn set_docstring(
        &self,
        repo_id: &str,
        node_id: &str,
        docstring: &str,
    ) -> Result<bool, AtlasError> {
        let updated = self
            .conn
            .execute(
                "UPDATE nodes SET docstring = ?3 WHERE repo_id = ?1 AND node_id = ?2",
                params![repo_id, node_id, docstring],
            )
            .map_err(|e| db_error(&format!("failed to annotate node '{node_id}'"), e))?;
        Ok(updated > 0)
    }

    fn counts(&self, repo_id: &str) -> Result<GraphCounts, AtlasError> {
        let count = |table: &str| -> Result<usize, AtlasError> {
            self.conn
                .query_row(
                    &format!("SELECT COUNT(*) FROM {table} WHERE repo_id = ?1"),
                    params![repo_id],
                    |row| row.get::<_, usize>(0),
                )
                .map_err(|e| db_error(&format!("failed to count {table}"), e))
        };
        Ok(GraphCounts {
            nodes: count("nodes")?,
            edges: count("edges")?,
        })
    }
}

fn node_from_row(row: &Row<'_>) -> rusqlite::Result<GraphNode> {
    Ok(GraphNode {
        node_id: row.get(0)?,
        repo_id: row.get(1)?,
        name: row.get(2)?,
        qualified_name: row.get(3)?,
        file_path: row.get(4)?,
        start_line: row.get(5)?,
        end_line: row.get(6)?,
        node_type: row.get(7)?,
        source_text: row.get(8)?,
        docstring: row.get(9)?,
    })
}

fn edge_from_row(row: &Row<'_>) -> rusqlite::Result<GraphEdge> {
    Ok(GraphEdge {
        repo_id: row.get(0)?,
        source_id: row.get(1)?,
        target_id: row.get(2)?,
        relationship_type: row.get(3)?,
        ident: row.get(4)?,
        ref_start_line: row.get(5)?,
        ref_end_line: row.get(6)?,
        def_start_line: row.get(7)?,
        def_end_line: row.get(8)?,
    })
}

/// Busy and locked databases are transient; everything else is not.
fn db_error(action: &str, e: rusqlite::Error) -> AtlasError {
    match e.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
            AtlasError::Busy(format!("{action}: {e}"))
        }
        _ => AtlasError::Database(format!("{action}: {e}")),
    }
}

fn json_value(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Value::from(f),
        ValueRef::Text(t) => serde_json::Value::from(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => serde_json::Value::from(b.to_vec()),
    }
}
