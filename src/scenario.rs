//! Full scenarios and the generators which enumerate them.
//!
//! A scenario holds one sub-scenario per scenario layer, in flow order: phosphoric acid units
//! first, then sulfuric acid units, then mine-beneficiation threads. Demand is pulled upstream
//! through the layers in that order.
use crate::entity::{EntityRegistry, LayerKind, NodeRef, Status};
use crate::graph::Network;
use crate::id::Moniker;
use crate::layer::{Layer, ShuffleContext, SubScenario};
use crate::model::Model;
use anyhow::{Result, ensure};
use itertools::Itertools;
use log::info;

/// Scenario layers in the order demand flows through them
pub const SCENARIO_LAYERS: [LayerKind; 3] = [
    LayerKind::Pap,
    LayerKind::Sap,
    LayerKind::MineBeneficiation,
];

/// One selection of nodes per scenario layer
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Scenario {
    layers: [SubScenario; 3],
}

impl Scenario {
    /// Put together a scenario from its sub-scenarios
    pub fn new(pap: SubScenario, sap: SubScenario, threads: SubScenario) -> Self {
        Self {
            layers: [pap, sap, threads],
        }
    }

    /// Sub-scenarios in flow order
    pub fn layers(&self) -> &[SubScenario] {
        &self.layers
    }

    /// Every node, in flow order
    pub fn nodes(&self) -> impl Iterator<Item = NodeRef> + '_ {
        self.layers.iter().flatten().copied()
    }

    /// Identifies the scenario: the concatenation of its monikers
    pub fn hash_id(&self, registry: &EntityRegistry) -> String {
        self.nodes()
            .map(|node| registry.moniker(node).as_str())
            .collect()
    }

    /// Monikers per layer
    pub fn monikers(&self, registry: &EntityRegistry) -> Vec<Vec<Moniker>> {
        self.layers
            .iter()
            .map(|nodes| {
                nodes
                    .iter()
                    .map(|&node| registry.moniker(node).clone())
                    .collect()
            })
            .collect()
    }

    /// Rebuild a scenario from monikers grouped by layer.
    ///
    /// Nodes are bucketed by kind, so the grouping of the input does not matter.
    pub fn from_monikers(registry: &EntityRegistry, monikers: &[Vec<Moniker>]) -> Result<Self> {
        let nodes = monikers
            .iter()
            .flatten()
            .map(|moniker| registry.node_by_moniker(moniker.as_str()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_nodes(registry, nodes))
    }

    /// Bucket nodes by scenario layer, keeping the first occurrence of each. Nodes of other layers
    /// are dropped.
    pub fn from_nodes<I>(registry: &EntityRegistry, nodes: I) -> Self
    where
        I: IntoIterator<Item = NodeRef>,
    {
        Self::bucket(nodes.into_iter().map(|node| (node, registry.kind(node))))
    }

    fn bucket<I>(nodes: I) -> Self
    where
        I: IntoIterator<Item = (NodeRef, LayerKind)>,
    {
        let mut layers: [SubScenario; 3] = Default::default();
        for (node, kind) in nodes {
            let Some(idx) = SCENARIO_LAYERS.iter().position(|&k| k == kind) else {
                continue;
            };
            if !layers[idx].contains(&node) {
                layers[idx].push(node);
            }
        }

        Self { layers }
    }

    /// The phosphoric acid sub-scenario
    pub fn paps(&self) -> &[NodeRef] {
        &self.layers[0]
    }

    /// The sulfuric acid sub-scenario
    pub fn saps(&self) -> &[NodeRef] {
        &self.layers[1]
    }

    /// The mine-beneficiation sub-scenario
    pub fn threads(&self) -> &[NodeRef] {
        &self.layers[2]
    }
}

/// Enumerates scenarios in a deterministic order
pub trait ScenarioGenerator {
    /// Number of scenarios the generator yields
    fn len(&self) -> usize;

    /// Whether the generator yields nothing
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate over the scenarios
    fn scenarios(&self) -> Box<dyn Iterator<Item = Scenario> + '_>;
}

/// The cartesian product of the shuffles of each scenario layer
pub struct FromOptions {
    scenarios: Vec<Scenario>,
}

impl FromOptions {
    /// Shuffle every scenario layer and combine the results.
    ///
    /// Pairs of sulfuric and phosphoric acid sub-scenarios are only kept when their last units
    /// share a location and every existing sulfuric acid unit tied to a phosphoric acid unit finds
    /// it in the pair.
    pub fn new(model: &Model, registry: &EntityRegistry) -> Self {
        let ctx = ShuffleContext {
            registry,
            sales_plan: &model.sales_plan,
            parameters: &model.parameters,
            priority_mines: &model.priority_mines,
        };
        let shuffle = |kind: LayerKind| {
            Layer::from_registry(registry, kind, model.parameters.shuffle.level_for(kind))
                .shuffle(&ctx)
        };
        let saps = shuffle(LayerKind::Sap);
        let paps = shuffle(LayerKind::Pap);
        let threads = shuffle(LayerKind::MineBeneficiation);

        let scenarios = saps
            .iter()
            .cartesian_product(&paps)
            .filter(|(sap, pap)| acid_units_match(registry, sap, pap))
            .cartesian_product(&threads)
            .map(|((sap, pap), threads)| Scenario::new(pap.clone(), sap.clone(), threads.clone()))
            .collect_vec();
        info!("Number of scenarios: {}", scenarios.len());

        Self { scenarios }
    }
}

impl ScenarioGenerator for FromOptions {
    fn len(&self) -> usize {
        self.scenarios.len()
    }

    fn scenarios(&self) -> Box<dyn Iterator<Item = Scenario> + '_> {
        Box::new(self.scenarios.iter().cloned())
    }
}

/// Whether a sulfuric acid sub-scenario can feed a phosphoric acid sub-scenario
pub fn acid_units_match(registry: &EntityRegistry, saps: &[NodeRef], paps: &[NodeRef]) -> bool {
    let (Some(&last_sap), Some(&last_pap)) = (saps.last(), paps.last()) else {
        return false;
    };
    if registry.location(last_sap) != registry.location(last_pap) {
        return false;
    }

    saps.iter().all(|&sap| {
        let NodeRef::Entity(id) = sap else {
            return true;
        };
        let unit = registry.get(id);
        match &unit.details.associated_pap {
            Some(pap) if unit.status == Status::Existing => paps
                .iter()
                .any(|&node| registry.moniker(node) == pap),
            _ => true,
        }
    })
}

/// Every non-empty set of network paths between the departure and arrival layers
pub struct FromPaths {
    paths: Vec<Vec<(NodeRef, LayerKind)>>,
}

impl FromPaths {
    /// Find the paths between the configured departure and arrival layers
    pub fn new(model: &Model, registry: &EntityRegistry) -> Result<Self> {
        let network = Network::build(registry, &model.network)?;
        let nodes = |kind: LayerKind| match kind {
            LayerKind::MineBeneficiation => registry.combo_ids().map(NodeRef::Combo).collect_vec(),
            _ => registry
                .layer(kind)
                .iter()
                .copied()
                .map(NodeRef::Entity)
                .collect_vec(),
        };
        let paths = network.layer_paths(
            &nodes(model.parameters.path_departure),
            &nodes(model.parameters.path_arrival),
        );
        ensure!(
            paths.len() < 64,
            "Too many network paths to enumerate their sets: {}",
            paths.len()
        );

        let paths = paths
            .into_iter()
            .map(|path| {
                path.into_iter()
                    .map(|node| (node, registry.kind(node)))
                    .collect()
            })
            .collect();

        Ok(Self { paths })
    }
}

impl ScenarioGenerator for FromPaths {
    fn len(&self) -> usize {
        (1usize << self.paths.len()) - 1
    }

    fn scenarios(&self) -> Box<dyn Iterator<Item = Scenario> + '_> {
        let count = self.paths.len();
        Box::new((1..=self.len()).map(move |mask| {
            let nodes = (0..count)
                .filter(|i| mask & (1 << (count - 1 - i)) != 0)
                .flat_map(|i| self.paths[i].iter().copied());
            Scenario::bucket(nodes)
        }))
    }
}

/// A fixed list of scenarios
pub struct Specific(pub Vec<Scenario>);

impl ScenarioGenerator for Specific {
    fn len(&self) -> usize {
        self.0.len()
    }

    fn scenarios(&self) -> Box<dyn Iterator<Item = Scenario> + '_> {
        Box::new(self.0.iter().cloned())
    }
}
