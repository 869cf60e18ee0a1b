//! Whole-history view of the DAG for inspection.
//!
//! [`HistoryGraph`] loads every node reachable from a head (both merge
//! parents, unlike the primary-lineage reads) into a petgraph
//! `StableDiGraph` with parent → child edges. It backs the CLI's history
//! listing and DOT export.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use petgraph::algo::toposort;
use petgraph::dot::{Config, Dot};
use petgraph::graph::NodeIndex;
use petgraph::stable_graph::StableDiGraph;
use serde::Serialize;

use crate::error::CoreError;
use crate::graph::Graph;
use crate::hash::Hash;
use crate::id::InstanceId;
use crate::node::Node;

/// One node as shown in history listings.
#[derive(Debug, Clone, Serialize)]
pub struct NodeSummary {
    pub hash: Hash,
    pub kind: &'static str,
    pub source: InstanceId,
    pub timestamp: DateTime<Utc>,
    pub fact_count: usize,
}

impl fmt::Display for NodeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} src={} facts={}",
            self.hash.short(),
            self.kind,
            self.source,
            self.fact_count
        )
    }
}

/// Which parent slot an edge fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ParentLink {
    Primary,
    Secondary,
}

impl fmt::Display for ParentLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParentLink::Primary => f.write_str("parent"),
            ParentLink::Secondary => f.write_str("parent2"),
        }
    }
}

/// Every node reachable from a head.
pub struct HistoryGraph {
    dag: StableDiGraph<NodeSummary, ParentLink>,
    by_hash: HashMap<Hash, NodeIndex>,
    head: Hash,
}

impl HistoryGraph {
    /// Loads the full history under `head`.
    pub fn load(graph: &Graph, head: &Node) -> Result<Self, CoreError> {
        let head_val = graph.resolve(head)?;
        let head_hash = head_val
            .hash
            .ok_or_else(|| CoreError::InvalidHash {
                input: "unhashed head".into(),
            })?;

        let mut dag = StableDiGraph::new();
        let mut by_hash = HashMap::new();
        let mut stack = vec![head.clone()];
        let mut edges: Vec<(Hash, Hash, ParentLink)> = Vec::new();

        while let Some(next) = stack.pop() {
            let val = graph.resolve(&next)?;
            let Some(hash) = val.hash else { continue };
            if by_hash.contains_key(&hash) {
                continue;
            }
            let idx = dag.add_node(NodeSummary {
                hash,
                kind: val.kind_name(),
                source: val.source,
                timestamp: val.timestamp,
                fact_count: val.data.len(),
            });
            by_hash.insert(hash, idx);
            for (slot, parent) in val.parents().into_iter().enumerate() {
                let link = if slot == 0 {
                    ParentLink::Primary
                } else {
                    ParentLink::Secondary
                };
                if let Some(parent_hash) = parent.hash() {
                    edges.push((parent_hash, hash, link));
                }
                stack.push(parent.clone());
            }
        }

        for (parent, child, link) in edges {
            if let (Some(&p), Some(&c)) = (by_hash.get(&parent), by_hash.get(&child)) {
                dag.add_edge(p, c, link);
            }
        }

        Ok(HistoryGraph {
            dag,
            by_hash,
            head: head_hash,
        })
    }

    pub fn head(&self) -> Hash {
        self.head
    }

    pub fn node_count(&self) -> usize {
        self.dag.node_count()
    }

    pub fn get(&self, hash: &Hash) -> Option<&NodeSummary> {
        self.by_hash.get(hash).and_then(|idx| self.dag.node_weight(*idx))
    }

    /// Nodes ordered so that every parent precedes its children.
    pub fn topo_order(&self) -> Vec<&NodeSummary> {
        // Parent hashes are content addresses, so the history is acyclic.
        toposort(&self.dag, None)
            .map(|order| order.into_iter().filter_map(|idx| self.dag.node_weight(idx)).collect())
            .unwrap_or_default()
    }

    /// Graphviz rendering.
    pub fn to_dot(&self) -> String {
        format!("{}", Dot::with_config(&self.dag, &[Config::GraphContentOnly]))
            .lines()
            .map(|line| format!("    {}", line.trim()))
            .fold(String::from("digraph history {\n"), |mut acc, line| {
                acc.push_str(&line);
                acc.push('\n');
                acc
            })
            + "}\n"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::tests::{put, MapSource};
    use crate::node::NodeVal;
    use std::sync::Arc;

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn loads_both_merge_parents_in_topo_order() {
        let source = Arc::new(MapSource::default());
        let root = put(&source, "root", NodeVal::root(InstanceId::ROOT, ts(0), vec![]));
        let a = put(&source, "a", NodeVal::leaf(root.into(), InstanceId::ROOT, ts(1), vec![]));
        let b = put(&source, "b", NodeVal::leaf(root.into(), InstanceId(5), ts(2), vec![]));
        let m = put(
            &source,
            "m",
            NodeVal::merge(a.into(), b.into(), InstanceId::ROOT, ts(3), vec![]),
        );
        let graph = Graph::new(source);
        let history = HistoryGraph::load(&graph, &Node::Ref(m)).unwrap();

        assert_eq!(history.node_count(), 4);
        assert_eq!(history.head(), m);
        assert_eq!(history.get(&b).unwrap().source, InstanceId(5));

        let order: Vec<Hash> = history.topo_order().iter().map(|n| n.hash).collect();
        let pos = |h: Hash| order.iter().position(|x| *x == h).unwrap();
        assert_eq!(pos(root), 0);
        assert!(pos(a) < pos(m));
        assert!(pos(b) < pos(m));

        let dot = history.to_dot();
        assert!(dot.starts_with("digraph history {"));
        assert!(dot.contains("parent2"));
    }
}
