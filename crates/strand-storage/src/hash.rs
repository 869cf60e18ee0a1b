//! Content hashing of nodes.
//!
//! A node's hash is the digest of its encoded bytes, so it covers the
//! payload (source, timestamp, facts) and the parent hashes, which makes the
//! DAG a Merkle structure. Hashes are never stored inside the node bytes.

use strand_core::{Hash, NodeVal};

use crate::codec::NodeCodec;
use crate::error::StorageError;

/// Encodes `node` and returns its content address together with the bytes.
pub fn encode_and_hash(
    codec: &dyn NodeCodec,
    node: &NodeVal,
) -> Result<(Hash, Vec<u8>), StorageError> {
    let bytes = codec.encode(node)?;
    Ok((Hash::of(&bytes), bytes))
}

/// Content address of `node`.
pub fn hash_node(codec: &dyn NodeCodec, node: &NodeVal) -> Result<Hash, StorageError> {
    encode_and_hash(codec, node).map(|(hash, _)| hash)
}
