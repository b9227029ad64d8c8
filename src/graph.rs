//! The facility network: which nodes ship to which, and the paths between two layers.
use crate::entity::{EntityRegistry, NodeRef};
use crate::id::Moniker;
use crate::series::Series;
use crate::units::Money;
use anyhow::{Context, Result, ensure};
use log::info;
use petgraph::Direction;
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

/// An edge of the network, as read from the input
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkEdge {
    /// Moniker of the shipping node
    pub upstream: Moniker,
    /// Moniker of the receiving node
    pub downstream: Moniker,
    /// Transport means
    pub means: String,
    /// Transport cost per unit shipped
    pub cost: f64,
}

/// How a node is valued along a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Valuation {
    /// Present value of the node's opex and capex
    CostPv,
    /// Cost of shipping the node's production to the next node on the path
    TransportCost,
}

/// A transport link between two nodes
#[derive(Debug, Clone, PartialEq)]
struct Link {
    means: String,
    cost: f64,
}

/// A directed graph over the nodes of a registry
#[derive(Debug)]
pub struct Network {
    graph: DiGraph<NodeRef, Link>,
    indices: HashMap<NodeRef, NodeIndex>,
}

impl Network {
    /// Build the network from its edges.
    ///
    /// Every moniker must name a node of the registry. A node may ship to the same downstream
    /// node by one means only and the network may not contain cycles.
    pub fn build(registry: &EntityRegistry, edges: &[NetworkEdge]) -> Result<Self> {
        let mut network = Self {
            graph: DiGraph::new(),
            indices: HashMap::new(),
        };

        for edge in edges {
            let upstream = registry.node_by_moniker(edge.upstream.as_str())?;
            let downstream = registry.node_by_moniker(edge.downstream.as_str())?;
            let from = network.index_of(upstream);
            let to = network.index_of(downstream);
            let duplicate = network
                .graph
                .edges_connecting(from, to)
                .any(|existing| existing.weight().means == edge.means);
            ensure!(
                !duplicate,
                "Downstream node {} via {} already exists for node {}",
                edge.downstream,
                edge.means,
                edge.upstream
            );
            network.graph.add_edge(
                from,
                to,
                Link {
                    means: edge.means.clone(),
                    cost: edge.cost,
                },
            );
        }
        ensure!(
            !is_cyclic_directed(&network.graph),
            "The facility network contains a cycle"
        );

        Ok(network)
    }

    fn index_of(&mut self, node: NodeRef) -> NodeIndex {
        if let Some(&index) = self.indices.get(&node) {
            return index;
        }
        let index = self.graph.add_node(node);
        self.indices.insert(node, index);
        index
    }

    /// Every path from `start` to `end`, each listed from `start`
    pub fn paths(&self, start: NodeRef, end: NodeRef) -> Vec<Vec<NodeRef>> {
        let (Some(&from), Some(&to)) = (self.indices.get(&start), self.indices.get(&end)) else {
            return Vec::new();
        };

        let mut paths = Vec::new();
        self.find_paths(from, to, &mut Vec::new(), &mut paths);
        paths
    }

    fn find_paths(
        &self,
        from: NodeIndex,
        to: NodeIndex,
        path: &mut Vec<NodeRef>,
        paths: &mut Vec<Vec<NodeRef>>,
    ) {
        path.push(self.graph[from]);
        if from == to {
            paths.push(path.clone());
        } else {
            for next in self.graph.neighbors_directed(from, Direction::Outgoing) {
                self.find_paths(next, to, path, paths);
            }
        }
        path.pop();
    }

    /// Paths from the departure nodes to the arrival nodes.
    ///
    /// Only the paths between the last departure and the last arrival node are kept.
    pub fn layer_paths(&self, departure: &[NodeRef], arrival: &[NodeRef]) -> Vec<Vec<NodeRef>> {
        let paths = match (departure.last(), arrival.last()) {
            (Some(&start), Some(&end)) => self.paths(start, end),
            _ => Vec::new(),
        };
        info!("Number of paths: {}", paths.len());

        paths
    }

    /// Value each node of a path, walking it from the last node back to the first
    pub fn value_path(
        &self,
        registry: &EntityRegistry,
        path: &[NodeRef],
        valuation: Valuation,
    ) -> Result<Vec<Money>> {
        let mut values = Vec::with_capacity(path.len());
        let mut next = None;
        for &node in path.iter().rev() {
            values.push(self.value_node(registry, node, next, valuation)?);
            next = Some(node);
        }

        Ok(values)
    }

    fn value_node(
        &self,
        registry: &EntityRegistry,
        node: NodeRef,
        next: Option<NodeRef>,
        valuation: Valuation,
    ) -> Result<Money> {
        let entities = registry.entities_of(node);
        match valuation {
            Valuation::CostPv => Ok(entities
                .iter()
                .map(|&id| registry.get(id).state.cost_pv)
                .sum()),
            Valuation::TransportCost => {
                let Some(next) = next else {
                    return Ok(Money(0.0));
                };
                let link = self
                    .link(node, next)
                    .with_context(|| {
                        format!(
                            "{} does not ship to {}",
                            registry.moniker(node),
                            registry.moniker(next)
                        )
                    })?;
                let shipped: f64 = entities
                    .iter()
                    .flat_map(|&id| registry.get(id).state.production.values())
                    .map(Series::sum)
                    .sum();
                Ok(Money(link.cost * shipped))
            }
        }
    }

    fn link(&self, from: NodeRef, to: NodeRef) -> Option<&Link> {
        let from = *self.indices.get(&from)?;
        let to = *self.indices.get(&to)?;
        self.graph
            .edges_connecting(from, to)
            .next()
            .map(|edge| edge.weight())
    }

    /// Number of edges
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{assert_error, extended_model};
    use crate::model::Model;
    use rstest::rstest;

    fn edge(upstream: &str, downstream: &str) -> NetworkEdge {
        NetworkEdge {
            upstream: upstream.into(),
            downstream: downstream.into(),
            means: "Pipe".into(),
            cost: 2.0,
        }
    }

    #[rstest]
    fn test_paths(extended_model: Model) {
        let registry = EntityRegistry::build(&extended_model, None).unwrap();
        let network = Network::build(&registry, &extended_model.network).unwrap();

        let start = registry
            .node_by_moniker(
                "mine/Khouribga/OC/Existing--beneficiation/Khouribga/flotation/Existing",
            )
            .unwrap();
        let end = registry
            .node_by_moniker("pap/Safi/dihydrate/Existing")
            .unwrap();
        let paths = network.paths(start, end);
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].first(), Some(&start));
        assert_eq!(paths[0].last(), Some(&end));
    }

    #[rstest]
    fn test_unknown_moniker(extended_model: Model) {
        let registry = EntityRegistry::build(&extended_model, None).unwrap();
        assert_error!(
            Network::build(
                &registry,
                &[edge("pap/Safi/dihydrate/Existing", "pap/Nowhere")]
            ),
            "Unknown moniker: pap/Nowhere"
        );
    }

    #[rstest]
    fn test_cycle(extended_model: Model) {
        let registry = EntityRegistry::build(&extended_model, None).unwrap();
        let a = "pap/Safi/dihydrate/Existing";
        let b = "pap/Safi/dihydrate/NEW1";
        assert_error!(
            Network::build(&registry, &[edge(a, b), edge(b, a)]),
            "The facility network contains a cycle"
        );
    }

    #[rstest]
    fn test_duplicate_edge(extended_model: Model) {
        let registry = EntityRegistry::build(&extended_model, None).unwrap();
        let a = "pap/Safi/dihydrate/Existing";
        let b = "pap/Safi/dihydrate/NEW1";
        assert_error!(
            Network::build(&registry, &[edge(a, b), edge(a, b)]),
            "Downstream node pap/Safi/dihydrate/NEW1 via Pipe already exists for node \
            pap/Safi/dihydrate/Existing"
        );
    }

    #[rstest]
    fn test_value_path(extended_model: Model) {
        let mut registry = EntityRegistry::build(&extended_model, None).unwrap();
        let a = "pap/Safi/dihydrate/Existing";
        let b = "pap/Safi/dihydrate/NEW1";
        let network = Network::build(&registry, &[edge(a, b)]).unwrap();
        let a = registry.entity_by_moniker(a).unwrap();
        let b = registry.entity_by_moniker(b).unwrap();
        let len = registry.timeline().len();
        registry
            .get_mut(a)
            .add_production("ACP 29", &Series::constant(len, 1.0));
        registry.get_mut(b).state.cost_pv = Money(7.0);

        let path = [NodeRef::Entity(a), NodeRef::Entity(b)];
        let costs = network
            .value_path(&registry, &path, Valuation::CostPv)
            .unwrap();
        assert_eq!(costs, [Money(7.0), Money(0.0)]);
        let transport = network
            .value_path(&registry, &path, Valuation::TransportCost)
            .unwrap();
        assert_eq!(transport, [Money(0.0), Money(2.0 * len as f64)]);
    }
}
