//! Node persistence on top of a [`ByteStore`].
//!
//! [`NodeStore`] saves and loads DAG nodes through a [`NodeCodec`], keyed by
//! their content hash, and keeps the mutable head pointer. It implements
//! [`NodeSource`] so a [`Graph`](strand_core::Graph) can resolve hash-only
//! references straight from storage.

use std::sync::Arc;

use strand_core::error::SourceError;
use strand_core::{Hash, NodeSource, NodeVal};

use crate::codec::{JsonCodec, NodeCodec};
use crate::error::StorageError;
use crate::hash::encode_and_hash;
use crate::traits::ByteStore;
use crate::types::{hash_from_node_key, node_key, HEAD_KEY, NODES_PREFIX};

/// Content-addressed node storage plus the head pointer.
#[derive(Clone)]
pub struct NodeStore {
    bytes: Arc<dyn ByteStore>,
    codec: Arc<dyn NodeCodec>,
}

impl NodeStore {
    /// A node store using the JSON codec.
    pub fn new(bytes: Arc<dyn ByteStore>) -> Self {
        Self::with_codec(bytes, Arc::new(JsonCodec))
    }

    pub fn with_codec(bytes: Arc<dyn ByteStore>, codec: Arc<dyn NodeCodec>) -> Self {
        NodeStore { bytes, codec }
    }

    pub fn byte_store(&self) -> &Arc<dyn ByteStore> {
        &self.bytes
    }

    pub fn codec(&self) -> &dyn NodeCodec {
        self.codec.as_ref()
    }

    /// Content address `node` would be stored under.
    pub fn hash_of(&self, node: &NodeVal) -> Result<Hash, StorageError> {
        encode_and_hash(self.codec.as_ref(), node).map(|(hash, _)| hash)
    }

    /// Writes `node` and returns its hash. Parents must already be hashed.
    ///
    /// Saving a node that is already present is a no-op.
    pub fn save(&self, node: &NodeVal) -> Result<Hash, StorageError> {
        let (hash, bytes) = encode_and_hash(self.codec.as_ref(), node)?;
        self.bytes.put(&node_key(&hash), &bytes)?;
        tracing::debug!(hash = %hash.short(), kind = node.kind_name(), facts = node.data.len(), "stored node");
        Ok(hash)
    }

    /// Loads the node under `hash`, with its hash filled in.
    pub fn load(&self, hash: &Hash) -> Result<Option<NodeVal>, StorageError> {
        match self.bytes.get(&node_key(hash))? {
            Some(bytes) => Ok(Some(self.codec.decode(&bytes)?.with_hash(*hash))),
            None => Ok(None),
        }
    }

    pub fn contains(&self, hash: &Hash) -> Result<bool, StorageError> {
        self.bytes.contains(&node_key(hash))
    }

    /// Re-hashes the stored bytes of `hash` and checks they match.
    pub fn verify(&self, hash: &Hash) -> Result<bool, StorageError> {
        let Some(bytes) = self.bytes.get(&node_key(hash))? else {
            return Ok(false);
        };
        let actual = Hash::of(&bytes);
        if actual != *hash {
            return Err(StorageError::HashMismatch {
                expected: *hash,
                actual,
            });
        }
        Ok(true)
    }

    /// Every stored node hash, ascending.
    pub fn node_hashes(&self) -> Result<Vec<Hash>, StorageError> {
        Ok(self
            .bytes
            .list_keys(NODES_PREFIX)?
            .iter()
            .filter_map(|key| hash_from_node_key(key))
            .collect())
    }

    /// The current head, `None` for a store that was never initialized.
    pub fn head(&self) -> Result<Option<Hash>, StorageError> {
        let Some(bytes) = self.bytes.get(HEAD_KEY)? else {
            return Ok(None);
        };
        let text = String::from_utf8_lossy(&bytes);
        text.trim()
            .parse::<Hash>()
            .map(Some)
            .map_err(|_| StorageError::CorruptHead {
                value: text.into_owned(),
            })
    }

    /// Moves the head pointer.
    pub fn set_head(&self, hash: &Hash) -> Result<(), StorageError> {
        self.bytes.overwrite(HEAD_KEY, hash.to_hex().as_bytes())?;
        tracing::debug!(head = %hash.short(), "moved head");
        Ok(())
    }
}

impl NodeSource for NodeStore {
    fn load(&self, hash: &Hash) -> Result<Option<NodeVal>, SourceError> {
        NodeStore::load(self, hash).map_err(|e| Box::new(e) as SourceError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::sqlite::SqliteStore;
    use chrono::DateTime;
    use strand_core::{Fact, Gid, Graph, InstanceId, Node};

    fn ts(secs: i64) -> chrono::DateTime<chrono::Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn stores() -> Vec<NodeStore> {
        vec![
            NodeStore::new(Arc::new(MemoryStore::new())),
            NodeStore::new(Arc::new(SqliteStore::in_memory().unwrap())),
        ]
    }

    #[test]
    fn save_load_and_head() {
        for store in stores() {
            assert_eq!(store.head().unwrap(), None);

            let root = NodeVal::root(InstanceId::ROOT, ts(0), vec![]);
            let root_hash = store.save(&root).unwrap();
            assert_eq!(store.save(&root).unwrap(), root_hash);

            let leaf = NodeVal::leaf(
                root_hash.into(),
                InstanceId::ROOT,
                ts(1),
                vec![Fact::new(Gid::new(0, 1), "User/name", "ann")],
            );
            let leaf_hash = store.save(&leaf).unwrap();
            store.set_head(&leaf_hash).unwrap();

            assert_eq!(store.head().unwrap(), Some(leaf_hash));
            let loaded = store.load(&leaf_hash).unwrap().unwrap();
            assert_eq!(loaded.hash, Some(leaf_hash));
            assert_eq!(loaded.data.len(), 1);
            assert!(store.verify(&leaf_hash).unwrap());
            assert_eq!(store.node_hashes().unwrap().len(), 2);
            assert!(store.load(&Hash::of(b"missing")).unwrap().is_none());
        }
    }

    #[test]
    fn graph_resolves_through_store() {
        let store = Arc::new(NodeStore::new(Arc::new(MemoryStore::new())));
        let root_hash = store
            .save(&NodeVal::root(InstanceId::ROOT, ts(0), vec![]))
            .unwrap();
        let leaf_hash = store
            .save(&NodeVal::leaf(root_hash.into(), InstanceId::ROOT, ts(1), vec![]))
            .unwrap();

        let graph = Graph::new(store);
        let lineage: Vec<_> = graph
            .lineage(&Node::Ref(leaf_hash))
            .map(|n| n.unwrap().hash.unwrap())
            .collect();
        assert_eq!(lineage, vec![leaf_hash, root_hash]);
    }

    #[test]
    fn tampered_bytes_fail_verification() {
        let bytes = Arc::new(MemoryStore::new());
        let store = NodeStore::new(bytes.clone());
        let hash = store
            .save(&NodeVal::root(InstanceId::ROOT, ts(0), vec![]))
            .unwrap();
        bytes.overwrite(&node_key(&hash), b"{}").unwrap();
        assert!(matches!(
            store.verify(&hash),
            Err(StorageError::HashMismatch { .. })
        ));
    }

    #[test]
    fn corrupt_head_is_reported() {
        let bytes = Arc::new(MemoryStore::new());
        bytes.overwrite(HEAD_KEY, b"not-a-hash").unwrap();
        let store = NodeStore::new(bytes);
        assert!(matches!(store.head(), Err(StorageError::CorruptHead { .. })));
    }
}
