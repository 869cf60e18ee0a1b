//! Key layout inside a byte store.
//!
//! Node bytes live under the `nodes` namespace keyed by hex hash; the current
//! head hash lives under the fixed `refs/head` key.

use strand_core::Hash;

/// Namespace prefix of node keys.
pub const NODES_PREFIX: &str = "nodes/";

/// Key holding the current head hash (hex).
pub const HEAD_KEY: &str = "refs/head";

/// The key a node's bytes are stored under.
pub fn node_key(hash: &Hash) -> String {
    format!("{NODES_PREFIX}{}", hash.to_hex())
}

/// Parses a node key back into its hash.
pub fn hash_from_node_key(key: &str) -> Option<Hash> {
    key.strip_prefix(NODES_PREFIX)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_key_roundtrip() {
        let hash = Hash::of(b"n");
        let key = node_key(&hash);
        assert!(key.starts_with("nodes/"));
        assert_eq!(key.len(), "nodes/".len() + 40);
        assert_eq!(hash_from_node_key(&key), Some(hash));
        assert_eq!(hash_from_node_key(HEAD_KEY), None);
    }
}
