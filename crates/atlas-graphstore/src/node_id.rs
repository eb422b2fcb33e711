//! Deterministic node identity.

use sha2::{Digest, Sha256};

/// Derive the persisted id of a graph node.
///
/// The id is the SHA-256 hex digest of `"{owner_identity}:{qualified_path}"`,
/// so re-parsing the same repository yields the same ids and two owners
/// never collide on the same path.
///
/// # Examples
///
/// ```
/// use atlas_graphstore::node_id::node_id;
///
/// let id = node_id("acme", "src/a.py:foo");
/// assert_eq!(id.len(), 64);
/// assert_eq!(id, node_id("acme", "src/a.py:foo"));
/// assert_ne!(id, node_id("other", "src/a.py:foo"));
/// ```
pub fn node_id(owner_identity: &str, qualified_path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(owner_identity.as_bytes());
    hasher.update(b":");
    hasher.update(qualified_path.as_bytes());
    format!("{:x}", hasher.finalize())
}
