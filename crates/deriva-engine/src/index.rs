//! The dependency index: which mutation affects which computation.
//!
//! Built in one pass over all registered computations at setup. The index
//! is a directed graph with record-type nodes and computation nodes;
//! an edge `record → computation` carries the dependency kind. Lookup
//! walks one record node's outgoing edges -- no runtime introspection of
//! computations.
//!
//! [`DependencyIndex::find_affected`] returns computation ids in
//! ascending order, which is declaration order: stable and deterministic,
//! but NOT a dependency-topological order. A consumer declared before its
//! producer can transiently observe a stale value within one cascade.

use std::collections::HashMap;

use petgraph::graph::NodeIndex;
use petgraph::stable_graph::StableGraph;
use petgraph::visit::EdgeRef;
use petgraph::{Directed, Direction};
use smallvec::SmallVec;

use deriva_core::event::{MutationEvent, MutationKind};
use deriva_core::id::ComputationId;

use crate::deps::DataDep;

/// Node weight: a record type or a registered computation.
#[derive(Debug, Clone, PartialEq, Eq)]
enum IndexNode {
    Record(String),
    Computation(ComputationId),
}

/// Edge weight: how the computation depends on the record type.
#[derive(Debug, Clone)]
enum DepEdge {
    /// Any mutation affects the computation; with attributes listed,
    /// update events are filtered to those touching a listed attribute.
    Records { attributes: Vec<String> },
    /// Only update events touching a listed attribute affect it.
    Property { attributes: Vec<String> },
}

/// Reverse index from record-type name to affected computations.
#[derive(Debug, Default)]
pub struct DependencyIndex {
    graph: StableGraph<IndexNode, DepEdge, Directed, u32>,
    record_nodes: HashMap<String, NodeIndex<u32>>,
    computation_nodes: HashMap<ComputationId, NodeIndex<u32>>,
}

impl DependencyIndex {
    pub fn new() -> Self {
        DependencyIndex::default()
    }

    fn record_node(&mut self, name: &str) -> NodeIndex<u32> {
        if let Some(&idx) = self.record_nodes.get(name) {
            return idx;
        }
        let idx = self.graph.add_node(IndexNode::Record(name.to_string()));
        self.record_nodes.insert(name.to_string(), idx);
        idx
    }

    /// Registers one computation's declared dependencies.
    pub fn register(&mut self, computation: ComputationId, deps: &[DataDep]) {
        let comp_idx = *self
            .computation_nodes
            .entry(computation)
            .or_insert_with(|| self.graph.add_node(IndexNode::Computation(computation)));
        for dep in deps {
            let record_idx = self.record_node(dep.source());
            let edge = match dep {
                DataDep::Records { attributes, .. } => DepEdge::Records {
                    attributes: attributes.clone(),
                },
                DataDep::Property { attributes, .. } => DepEdge::Property {
                    attributes: attributes.clone(),
                },
            };
            self.graph.add_edge(record_idx, comp_idx, edge);
        }
    }

    /// Computations affected by one mutation event, in declaration order.
    pub fn find_affected(&self, event: &MutationEvent) -> SmallVec<[ComputationId; 8]> {
        let Some(&record_idx) = self.record_nodes.get(&event.record_name) else {
            return SmallVec::new();
        };

        // Changed attributes only matter for update events.
        let changed = match event.kind {
            MutationKind::Update => event.changed_attributes(),
            _ => Vec::new(),
        };

        let mut affected: SmallVec<[ComputationId; 8]> = SmallVec::new();
        for edge in self.graph.edges_directed(record_idx, Direction::Outgoing) {
            let relevant = match edge.weight() {
                DepEdge::Records { attributes } => {
                    event.kind != MutationKind::Update
                        || attributes.is_empty()
                        || attributes.iter().any(|a| changed.contains(a))
                }
                DepEdge::Property { attributes } => {
                    event.kind == MutationKind::Update
                        && attributes.iter().any(|a| changed.contains(a))
                }
            };
            if !relevant {
                continue;
            }
            if let IndexNode::Computation(id) = &self.graph[edge.target()] {
                affected.push(*id);
            }
        }
        affected.sort();
        affected.dedup();
        affected
    }

    /// Number of registered computations.
    pub fn computation_count(&self) -> usize {
        self.computation_nodes.len()
    }
}
