//! The arena holding every entity and mine-beneficiation thread of one simulator.
use super::{ComboNode, Entity, EntityState, LayerKind, Status};
use crate::error::DataContractError;
use crate::id::Moniker;
use crate::market::RawMaterials;
use crate::model::Model;
use crate::year::Timeline;
use anyhow::{Context, Result};
use indexmap::{IndexMap, IndexSet};
use log::debug;
use std::collections::{HashMap, HashSet};

/// Index of an entity in the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub usize);

/// Index of a mine-beneficiation thread in the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComboId(pub usize);

/// A node of a layer: a plain entity or a mine-beneficiation thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeRef {
    /// A single facility
    Entity(EntityId),
    /// A mine paired with a beneficiation plant
    Combo(ComboId),
}

/// An unnamed option from which replicas were made
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicaTemplate {
    /// Moniker of the option before replication
    pub moniker: Moniker,
    /// The layer of the option
    pub kind: LayerKind,
    /// Number of replicas made
    pub count: usize,
}

/// The mutable state of every entity of a registry, in entity order
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrySnapshot(Vec<EntityState>);

/// Owns every entity of a run
#[derive(Debug, Clone)]
pub struct EntityRegistry {
    entities: Vec<Entity>,
    index: HashMap<Moniker, EntityId>,
    layers: IndexMap<LayerKind, Vec<EntityId>>,
    templates: Vec<ReplicaTemplate>,
    combos: Vec<ComboNode>,
    combo_index: HashMap<Moniker, ComboId>,
    timeline: Timeline,
}

impl EntityRegistry {
    /// Build every entity of the model.
    ///
    /// Unnamed `New` options are replicated. With a `filter`, only the listed monikers are kept,
    /// along with logistics links and the base entities of kept extensions, and threads are made
    /// from the listed composite monikers only. Without one, threads pair every connected mine and beneficiation plant whose capacity
    /// is large enough.
    pub fn build(model: &Model, filter: Option<&[Moniker]>) -> Result<Self> {
        let wanted: Option<IndexSet<Moniker>> = filter.map(|monikers| {
            monikers
                .iter()
                .flat_map(|moniker| match moniker.split_composite() {
                    Some((mine, benef)) => vec![mine, benef],
                    None => vec![moniker.clone()],
                })
                .collect()
        });

        let mut registry = Self {
            entities: Vec::new(),
            index: HashMap::new(),
            layers: IndexMap::new(),
            templates: Vec::new(),
            combos: Vec::new(),
            combo_index: HashMap::new(),
            timeline: model.timeline.clone(),
        };

        for (&kind, tables) in &model.layers {
            let mut layer_entities = Vec::new();
            let mut signature = 0;
            for row in &tables.options {
                let entity = Entity::from_option(
                    kind,
                    row,
                    tables,
                    &model.timeline,
                    &model.raw_materials,
                    model.products(),
                )
                .with_context(|| format!("Invalid option {}", row.moniker))?;

                if kind.is_unnamed() && row.status == Status::New {
                    let count: usize = row.name.trim().parse().with_context(|| {
                        format!(
                            "The name of unnamed option {} must be its number of replicas",
                            row.moniker
                        )
                    })?;
                    layer_entities.extend(
                        (1..=count).map(|index| entity.clone().into_replica(signature, index)),
                    );
                    registry.templates.push(ReplicaTemplate {
                        moniker: row.moniker.clone(),
                        kind,
                        count,
                    });
                    signature += 1;
                } else {
                    layer_entities.push(entity);
                }
            }

            if let Some(wanted) = &wanted
                && kind != LayerKind::Logistics
            {
                let extended: HashSet<String> = layer_entities
                    .iter()
                    .filter(|entity| {
                        entity.status == Status::Extension && wanted.contains(&entity.moniker)
                    })
                    .map(|entity| entity.name.clone())
                    .collect();
                layer_entities.retain(|entity| {
                    wanted.contains(&entity.moniker)
                        || (entity.status != Status::Extension && extended.contains(&entity.name))
                });
            }

            let ids = layer_entities
                .into_iter()
                .map(|entity| registry.insert(entity))
                .collect();
            registry.layers.insert(kind, ids);
        }

        registry.link_base_entities();
        match filter {
            Some(monikers) => registry.build_combos_from_monikers(monikers)?,
            None => registry.build_combos_from_connections(model),
        }
        debug!(
            "Built {} entities and {} mine-beneficiation threads",
            registry.entities.len(),
            registry.combos.len()
        );

        Ok(registry)
    }

    fn insert(&mut self, entity: Entity) -> EntityId {
        let id = EntityId(self.entities.len());
        self.index.insert(entity.moniker.clone(), id);
        self.entities.push(entity);
        id
    }

    /// An extension's base is the first entity of its layer with the same name which is
    /// `Existing` or `New`
    fn link_base_entities(&mut self) {
        for ids in self.layers.values() {
            for &id in ids {
                if self.entities[id.0].status != Status::Extension {
                    continue;
                }
                let name = &self.entities[id.0].name;
                let base = ids.iter().copied().find(|other| {
                    let other = &self.entities[other.0];
                    &other.name == name && matches!(other.status, Status::Existing | Status::New)
                });
                self.entities[id.0].base_entity = base;
            }
        }
    }

    fn build_combos_from_connections(&mut self, model: &Model) {
        let mut combos = Vec::new();
        for &mine_id in self.layer(LayerKind::Mine) {
            let mine = self.get(mine_id);
            if !model.connections.has_mine_location(&mine.location) {
                continue;
            }
            for &benef_id in self.layer(LayerKind::Beneficiation) {
                let benef = self.get(benef_id);
                if !model
                    .connections
                    .is_connected(&mine.location, &benef.location)
                    || mine.nominal_capacity > benef.nominal_capacity
                {
                    continue;
                }
                combos.push(ComboNode::new(mine_id, mine, benef_id, benef));
            }
        }

        for combo in combos {
            self.insert_combo(combo);
        }
    }

    fn build_combos_from_monikers(
        &mut self,
        monikers: &[Moniker],
    ) -> Result<(), DataContractError> {
        for (mine, benef) in monikers.iter().filter_map(Moniker::split_composite) {
            let mine_id = self.entity_by_moniker(mine.as_str())?;
            let benef_id = self.entity_by_moniker(benef.as_str())?;
            let combo = ComboNode::new(
                mine_id,
                &self.entities[mine_id.0],
                benef_id,
                &self.entities[benef_id.0],
            );
            self.insert_combo(combo);
        }

        Ok(())
    }

    fn insert_combo(&mut self, combo: ComboNode) {
        let id = ComboId(self.combos.len());
        self.combo_index.insert(combo.moniker.clone(), id);
        self.combos.push(combo);
    }

    /// The run timeline
    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    /// Look up an entity
    pub fn get(&self, id: EntityId) -> &Entity {
        &self.entities[id.0]
    }

    /// Look up an entity for mutation
    pub fn get_mut(&mut self, id: EntityId) -> &mut Entity {
        &mut self.entities[id.0]
    }

    /// Look up a thread
    pub fn combo(&self, id: ComboId) -> &ComboNode {
        &self.combos[id.0]
    }

    /// Every thread, in creation order
    pub fn combo_ids(&self) -> impl Iterator<Item = ComboId> + '_ {
        (0..self.combos.len()).map(ComboId)
    }

    /// Every entity, in creation order
    pub fn entity_ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        (0..self.entities.len()).map(EntityId)
    }

    /// The entities of a layer, in input order
    pub fn layer(&self, kind: LayerKind) -> &[EntityId] {
        self.layers.get(&kind).map_or(&[], Vec::as_slice)
    }

    /// Unnamed options which were replicated
    pub fn templates(&self) -> &[ReplicaTemplate] {
        &self.templates
    }

    /// Find the node with the given moniker, whether an entity or a thread
    pub fn node_by_moniker(&self, moniker: &str) -> Result<NodeRef, DataContractError> {
        if let Some(&id) = self.index.get(moniker) {
            return Ok(NodeRef::Entity(id));
        }
        self.combo_index
            .get(moniker)
            .map(|&id| NodeRef::Combo(id))
            .ok_or_else(|| DataContractError::UnknownMoniker(moniker.to_string()))
    }

    /// Find the entity with the given moniker
    pub fn entity_by_moniker(&self, moniker: &str) -> Result<EntityId, DataContractError> {
        self.index
            .get(moniker)
            .copied()
            .ok_or_else(|| DataContractError::UnknownMoniker(moniker.to_string()))
    }

    /// Moniker of a node
    pub fn moniker(&self, node: NodeRef) -> &Moniker {
        match node {
            NodeRef::Entity(id) => &self.get(id).moniker,
            NodeRef::Combo(id) => &self.combo(id).moniker,
        }
    }

    /// Name of a node
    pub fn name(&self, node: NodeRef) -> &str {
        match node {
            NodeRef::Entity(id) => &self.get(id).name,
            NodeRef::Combo(id) => &self.combo(id).name,
        }
    }

    /// Whether a node can produce `product`
    pub fn produces(&self, node: NodeRef, product: &str) -> bool {
        match node {
            NodeRef::Entity(id) => self.get(id).produces(product),
            NodeRef::Combo(id) => self.combo(id).produces(product),
        }
    }

    /// Location of a node. A thread is located at its beneficiation plant.
    pub fn location(&self, node: NodeRef) -> &str {
        match node {
            NodeRef::Entity(id) => &self.get(id).location,
            NodeRef::Combo(id) => &self.get(self.combo(id).beneficiation).location,
        }
    }

    /// Layer of a node
    pub fn kind(&self, node: NodeRef) -> LayerKind {
        match node {
            NodeRef::Entity(id) => self.get(id).kind,
            NodeRef::Combo(_) => LayerKind::MineBeneficiation,
        }
    }

    /// The entities behind a node
    pub fn entities_of(&self, node: NodeRef) -> Vec<EntityId> {
        match node {
            NodeRef::Entity(id) => vec![id],
            NodeRef::Combo(id) => {
                let combo = self.combo(id);
                vec![combo.mine, combo.beneficiation]
            }
        }
    }

    /// The mutable state of every entity
    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot(self.entities.iter().map(Entity::snapshot).collect())
    }

    /// Put back the states taken with [`EntityRegistry::snapshot`]
    pub fn restore(&mut self, snapshot: &RegistrySnapshot) {
        for (entity, state) in self.entities.iter_mut().zip(&snapshot.0) {
            entity.restore(state);
        }
    }

    /// Reset the state of every entity
    pub fn reset_all(&mut self) {
        for entity in &mut self.entities {
            entity.reset();
        }
    }

    /// Recompute every opex from new raw material prices
    pub fn reprice(&mut self, raw_materials: &RawMaterials) {
        for entity in &mut self.entities {
            entity.update_opex(raw_materials, &self.timeline);
        }
        for combo in &mut self.combos {
            combo.update(
                &self.entities[combo.mine.0],
                &self.entities[combo.beneficiation.0],
            );
        }
    }
}
