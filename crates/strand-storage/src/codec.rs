//! Node wire format.
//!
//! A [`NodeCodec`] turns a [`NodeVal`] into the bytes that are hashed and
//! stored, and back. Parent links are written as hashes, so a node can only
//! be encoded once its parents have content addresses. Decoding always yields
//! hash-only (`Ref`) parents, resolved later through a graph.
//!
//! [`JsonCodec`] is the default: canonical serde_json with fixed field order
//! and facts in node order. It carries no `HashMap`, so the same node always
//! encodes to the same bytes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use strand_core::{Fact, Hash, InstanceId, Node, NodeKind, NodeVal};

use crate::error::StorageError;

/// Encoding of nodes to and from stored bytes.
pub trait NodeCodec: Send + Sync {
    fn encode(&self, node: &NodeVal) -> Result<Vec<u8>, StorageError>;

    /// Decodes a node. The result carries no hash of its own.
    fn decode(&self, bytes: &[u8]) -> Result<NodeVal, StorageError>;
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum WireKind {
    Root,
    Leaf { parent: Hash },
    Merge { parent1: Hash, parent2: Hash },
}

#[derive(Debug, Serialize, Deserialize)]
struct WireNode {
    source: InstanceId,
    timestamp: DateTime<Utc>,
    links: WireKind,
    data: Vec<Fact>,
}

fn parent_hash(parent: &Node) -> Result<Hash, StorageError> {
    parent.hash().ok_or(StorageError::UnhashedParent)
}

impl WireNode {
    fn from_node(node: &NodeVal) -> Result<Self, StorageError> {
        let links = match &node.kind {
            NodeKind::Root => WireKind::Root,
            NodeKind::Leaf { parent } => WireKind::Leaf {
                parent: parent_hash(parent)?,
            },
            NodeKind::Merge { parent1, parent2 } => WireKind::Merge {
                parent1: parent_hash(parent1)?,
                parent2: parent_hash(parent2)?,
            },
        };
        Ok(WireNode {
            source: node.source,
            timestamp: node.timestamp,
            links,
            data: node.data.clone(),
        })
    }

    fn into_node(self) -> NodeVal {
        match self.links {
            WireKind::Root => NodeVal::root(self.source, self.timestamp, self.data),
            WireKind::Leaf { parent } => {
                NodeVal::leaf(parent.into(), self.source, self.timestamp, self.data)
            }
            WireKind::Merge { parent1, parent2 } => NodeVal::merge(
                parent1.into(),
                parent2.into(),
                self.source,
                self.timestamp,
                self.data,
            ),
        }
    }
}

/// serde_json node codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl NodeCodec for JsonCodec {
    fn encode(&self, node: &NodeVal) -> Result<Vec<u8>, StorageError> {
        Ok(serde_json::to_vec(&WireNode::from_node(node)?)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<NodeVal, StorageError> {
        let wire: WireNode = serde_json::from_slice(bytes).map_err(|e| StorageError::Codec {
            reason: e.to_string(),
        })?;
        Ok(wire.into_node())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use chrono::FixedOffset;
    use strand_core::{Decimal, Gid, Value};

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn leaf_keeps_parent_hash_and_facts() {
        let parent = Hash::of(b"parent");
        let data = vec![
            Fact::new(Gid::new(0, 7), "User/name", "ann"),
            Fact::new(Gid::new(0, 7), "User/friend", Gid::new(3, 1)),
        ];
        let node = NodeVal::leaf(parent.into(), InstanceId(3), ts(10), data.clone());
        let bytes = JsonCodec.encode(&node).unwrap();
        let back = JsonCodec.decode(&bytes).unwrap();

        assert!(back.hash.is_none());
        assert_eq!(back.source, InstanceId(3));
        assert_eq!(back.timestamp, ts(10));
        assert_eq!(back.data, data);
        let parent_back = back.primary_parent().unwrap();
        assert!(parent_back.is_ref());
        assert_eq!(parent_back.hash(), Some(parent));
    }

    #[test]
    fn merge_keeps_parent_order() {
        let p1 = Hash::of(b"p1");
        let p2 = Hash::of(b"p2");
        let node = NodeVal::merge(p1.into(), p2.into(), InstanceId::ROOT, ts(0), vec![]);
        let back = JsonCodec.decode(&JsonCodec.encode(&node).unwrap()).unwrap();
        let parents = back.parents();
        assert_eq!(parents[0].hash(), Some(p1));
        assert_eq!(parents[1].hash(), Some(p2));
    }

    #[test]
    fn unhashed_parent_cannot_be_encoded() {
        let parent: Node = NodeVal::root(InstanceId::ROOT, ts(0), vec![]).into();
        let node = NodeVal::leaf(parent, InstanceId::ROOT, ts(1), vec![]);
        assert!(matches!(
            JsonCodec.encode(&node),
            Err(StorageError::UnhashedParent)
        ));
    }

    #[test]
    fn garbage_is_a_codec_error() {
        assert!(matches!(
            JsonCodec.decode(b"{not json"),
            Err(StorageError::Codec { .. })
        ));
    }

    fn arb_instant() -> impl Strategy<Value = DateTime<Utc>> {
        // Roughly year 5 to year 9987, so any offset keeps a four-digit year.
        (-62_000_000_000i64..253_000_000_000, 0u32..1_000_000_000)
            .prop_map(|(secs, nanos)| DateTime::from_timestamp(secs, nanos).unwrap())
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<bool>().prop_map(Value::Bool),
            any::<u8>().prop_map(Value::Byte),
            prop_oneof![Just(i32::MIN), Just(i32::MAX), any::<i32>()].prop_map(Value::Int),
            prop_oneof![Just(i64::MIN), Just(i64::MAX), any::<i64>()].prop_map(Value::Long),
            "[a-z \"\\\\]{0,12}".prop_map(Value::Str),
            proptest::collection::vec(any::<u8>(), 0..8).prop_map(Value::Bytes),
            (prop_oneof![Just(i64::MIN), Just(i64::MAX), any::<i64>()], any::<u8>())
                .prop_map(|(unscaled, scale)| Value::Decimal(Decimal::new(unscaled, scale))),
            arb_instant().prop_map(Value::Instant),
            (arb_instant(), -1439i32..=1439).prop_map(|(at, minutes)| {
                let offset = FixedOffset::east_opt(minutes * 60).unwrap();
                Value::Zoned(at.with_timezone(&offset))
            }),
            (any::<u32>(), any::<u32>()).prop_map(|(i, l)| Value::Ref(Gid::new(i, l))),
        ]
    }

    fn arb_links() -> impl Strategy<Value = (Option<Hash>, Option<Hash>)> {
        let hash = any::<[u8; 8]>().prop_map(|seed| Hash::of(&seed));
        prop_oneof![
            Just((None, None)),
            hash.clone().prop_map(|p| (Some(p), None)),
            (hash.clone(), hash).prop_map(|(p1, p2)| (Some(p1), Some(p2))),
        ]
    }

    fn arb_node() -> impl Strategy<Value = NodeVal> {
        (
            arb_links(),
            any::<u32>(),
            arb_instant(),
            proptest::collection::vec(("[A-Z][a-z]{0,4}/[a-z]{1,6}", arb_value()), 0..6),
        )
            .prop_map(|(links, source, at, facts)| {
                let source = InstanceId(source);
                let data: Vec<Fact> = facts
                    .into_iter()
                    .enumerate()
                    .map(|(i, (attr, v))| Fact::new(Gid::new(source.0, i as u32 + 1), attr, v))
                    .collect();
                match links {
                    (Some(p1), Some(p2)) => NodeVal::merge(p1.into(), p2.into(), source, at, data),
                    (Some(parent), None) => NodeVal::leaf(parent.into(), source, at, data),
                    _ => NodeVal::root(source, at, data),
                }
            })
    }

    proptest! {
        #[test]
        fn encoding_is_canonical(node in arb_node()) {
            let bytes = JsonCodec.encode(&node).unwrap();
            prop_assert_eq!(&bytes, &JsonCodec.encode(&node).unwrap());

            let back = JsonCodec.decode(&bytes).unwrap();
            prop_assert_eq!(back.kind_name(), node.kind_name());
            prop_assert_eq!(back.source, node.source);
            prop_assert_eq!(back.timestamp, node.timestamp);
            prop_assert_eq!(&back.data, &node.data);
            let parents: Vec<_> = node.parents().iter().map(|p| p.hash()).collect();
            let parents_back: Vec<_> = back.parents().iter().map(|p| p.hash()).collect();
            prop_assert_eq!(parents_back, parents);

            // Re-encoding the decoded node reproduces the stored bytes.
            prop_assert_eq!(JsonCodec.encode(&back).unwrap(), bytes);
        }
    }

    #[test]
    fn extreme_values_reencode_identically() {
        let zone = FixedOffset::west_opt(3 * 3600 + 1800).unwrap();
        let data = vec![
            Fact::new(Gid::new(0, 1), "A/d", Value::Decimal(Decimal::new(i64::MIN, 255))),
            Fact::new(Gid::new(0, 1), "A/i", Value::Instant(DateTime::from_timestamp(-86_400 * 365, 7).unwrap())),
            Fact::new(Gid::new(0, 1), "A/z", Value::Zoned(ts(1_000).with_timezone(&zone))),
            Fact::new(Gid::new(0, 1), "A/l", Value::Long(i64::MAX)),
            Fact::new(Gid::new(0, 1), "A/s", Value::Str(String::new())),
            Fact::new(Gid::new(0, 1), "A/b", Value::Bytes(Vec::new())),
        ];
        let root = NodeVal::root(InstanceId::ROOT, ts(-1), data.clone());
        let merge = NodeVal::merge(Hash::of(b"a").into(), Hash::of(b"b").into(), InstanceId(u32::MAX), ts(0), data);
        for node in [root, merge] {
            let bytes = JsonCodec.encode(&node).unwrap();
            let back = JsonCodec.decode(&bytes).unwrap();
            assert_eq!(back.data, node.data);
            assert_eq!(JsonCodec.encode(&back).unwrap(), bytes);
        }
    }
}
