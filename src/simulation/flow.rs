//! Upstream propagation of demand through the layers of a scenario.
//!
//! Demand for a product is allocated greedily to the nodes of a layer which produce it, in the
//! order the sub-scenario lists them. Each producer then pulls its own inputs from the layers
//! further upstream.
use crate::entity::combo::wp_equivalents;
use crate::entity::{ComboId, EntityId, EntityRegistry, LayerKind, NodeRef};
use crate::id::ItemID;
use crate::input::layer::ANY_INPUT;
use crate::layer::SubScenario;
use crate::model::ProductNames;
use crate::series::Series;
use indexmap::IndexMap;
use std::collections::HashSet;

/// Pull `driver` units of `product` through `layers`, starting with the first.
///
/// A layer with no producer of `product` is skipped. Mine-beneficiation threads end the
/// recursion.
pub fn flow_upstream(
    registry: &mut EntityRegistry,
    products: &ProductNames,
    product: &str,
    driver: &Series,
    layers: &[SubScenario],
) {
    let Some((layer, upstream)) = layers.split_first() else {
        return;
    };
    let producers: Vec<NodeRef> = layer
        .iter()
        .copied()
        .filter(|&node| registry.produces(node, product))
        .collect();
    if producers.is_empty() {
        flow_upstream(registry, products, product, driver, upstream);
        return;
    }

    if registry.kind(producers[0]) == LayerKind::MineBeneficiation {
        let threads: Vec<ComboId> = producers
            .iter()
            .filter_map(|node| match node {
                NodeRef::Combo(id) => Some(*id),
                NodeRef::Entity(_) => None,
            })
            .collect();
        allocate_threads(registry, products, product, driver, &threads);
        return;
    }

    let units: Vec<EntityId> = producers
        .iter()
        .filter_map(|node| match node {
            NodeRef::Entity(id) => Some(*id),
            NodeRef::Combo(_) => None,
        })
        .collect();
    for (id, produced) in allocate(registry, product, driver, &units) {
        let entity = registry.get(id);
        let mut needs = Vec::new();
        if entity.main_input.as_str() != ANY_INPUT {
            if let Some(sc) = entity.specific(product, entity.main_input.as_str()) {
                needs.push((entity.main_input.clone(), &produced * sc));
            }
        }
        if let Some(sc) = entity.specific(product, products.sulfuric_acid.as_str()) {
            needs.push((products.sulfuric_acid.clone(), &produced * sc));
        }

        for (input, need) in needs {
            flow_upstream(registry, products, input.as_str(), &need, upstream);
        }
    }
}

/// Allocate `driver` to `units` in order, each taking as much as its remaining capacity allows.
///
/// Returns the volume each unit took, skipping units which took nothing.
pub fn allocate(
    registry: &mut EntityRegistry,
    product: &str,
    driver: &Series,
    units: &[EntityId],
) -> Vec<(EntityId, Series)> {
    let mut remaining = driver.clone();
    let mut allocation = Vec::new();
    for &id in units {
        if remaining.is_zero() {
            break;
        }

        let entity = registry.get_mut(id);
        let produced = remaining.served_by(&entity.state.capacity);
        if produced.is_zero() {
            continue;
        }
        entity.add_production(product, &produced);
        entity.state.capacity -= &produced;
        remaining -= &produced;
        allocation.push((id, produced));
    }

    allocation
}

/// The pair of entities a thread draws capacity from, with the capacity each may give
struct ThreadTarget {
    mine: EntityId,
    beneficiation: EntityId,
    mine_capacity: Series,
    beneficiation_capacity: Series,
}

/// Volume left over and the product volumes the mine and the beneficiation plant could each have
/// supported
struct ThreadOutcome {
    remaining: Series,
    mine_bound: Series,
    beneficiation_bound: Series,
}

/// Produce what `target` can of `driver`, given raw rock needs `rrc` per unit of product
fn produce(
    registry: &mut EntityRegistry,
    products: &ProductNames,
    product: &str,
    driver: &Series,
    rrc: &Series,
    target: ThreadTarget,
) -> ThreadOutcome {
    let mine_bound = target.mine_capacity.checked_div(rrc);
    let beneficiation_bound = target.beneficiation_capacity.checked_div(rrc);
    let produced = driver.served_by(&mine_bound.min(&beneficiation_bound));
    let raw_rock = &produced * rrc;

    let mine = registry.get_mut(target.mine);
    mine.state.capacity -= &raw_rock;
    mine.add_production(products.raw_rock.as_str(), &raw_rock);
    let beneficiation = registry.get_mut(target.beneficiation);
    beneficiation.state.capacity -= &raw_rock;
    beneficiation.add_production(product, &raw_rock);

    ThreadOutcome {
        remaining: driver - &produced,
        mine_bound,
        beneficiation_bound,
    }
}

fn capacity_of(registry: &EntityRegistry, id: EntityId) -> Series {
    registry.get(id).state.capacity.clone()
}

/// Capacity left to an extension once its base has taken its nominal share
fn extension_capacity(registry: &EntityRegistry, extension: EntityId, base: EntityId) -> Series {
    let nominal = registry.get(base).nominal_capacity;
    registry
        .get(extension)
        .state
        .capacity
        .map(|v| (v - nominal).max(0.0))
}

/// Allocate `driver` to mine-beneficiation threads in order.
///
/// Where the mine or the beneficiation plant of a thread extends a base entity, the base capacity
/// is used first. The extension only takes what the base could not serve.
pub fn allocate_threads(
    registry: &mut EntityRegistry,
    products: &ProductNames,
    product: &str,
    driver: &Series,
    threads: &[ComboId],
) {
    let len = registry.timeline().len();
    let mut remaining = driver.clone();
    for &id in threads {
        if remaining.is_zero() {
            break;
        }

        let combo = registry.combo(id);
        let (mine, beneficiation) = (combo.mine, combo.beneficiation);
        let rrc = combo.rrc(product, len);
        let mine_base = registry.get(mine).base_entity;
        let beneficiation_base = registry.get(beneficiation).base_entity;

        remaining = match (mine_base, beneficiation_base) {
            (None, None) => {
                let target = ThreadTarget {
                    mine,
                    beneficiation,
                    mine_capacity: capacity_of(registry, mine),
                    beneficiation_capacity: capacity_of(registry, beneficiation),
                };
                produce(registry, products, product, &remaining, &rrc, target).remaining
            }
            (Some(base), None) => {
                let target = ThreadTarget {
                    mine: base,
                    beneficiation,
                    mine_capacity: capacity_of(registry, base),
                    beneficiation_capacity: capacity_of(registry, beneficiation),
                };
                let outcome = produce(registry, products, product, &remaining, &rrc, target);
                let mine_binds = outcome
                    .mine_bound
                    .iter()
                    .zip(outcome.beneficiation_bound.iter())
                    .any(|(m, b)| m < b);
                if outcome.remaining.is_zero() || !mine_binds {
                    outcome.remaining
                } else {
                    let target = ThreadTarget {
                        mine,
                        beneficiation,
                        mine_capacity: extension_capacity(registry, mine, base),
                        beneficiation_capacity: capacity_of(registry, beneficiation),
                    };
                    produce(registry, products, product, &outcome.remaining, &rrc, target)
                        .remaining
                }
            }
            (None, Some(base)) => {
                let target = ThreadTarget {
                    mine,
                    beneficiation: base,
                    mine_capacity: capacity_of(registry, mine),
                    beneficiation_capacity: capacity_of(registry, base),
                };
                let outcome = produce(registry, products, product, &remaining, &rrc, target);
                let beneficiation_binds = outcome
                    .beneficiation_bound
                    .iter()
                    .zip(outcome.mine_bound.iter())
                    .any(|(b, m)| b < m);
                if outcome.remaining.is_zero() || !beneficiation_binds {
                    outcome.remaining
                } else {
                    let target = ThreadTarget {
                        mine,
                        beneficiation,
                        mine_capacity: capacity_of(registry, mine),
                        beneficiation_capacity: extension_capacity(registry, beneficiation, base),
                    };
                    produce(registry, products, product, &outcome.remaining, &rrc, target)
                        .remaining
                }
            }
            (Some(mine_base), Some(beneficiation_base)) => {
                let target = ThreadTarget {
                    mine: mine_base,
                    beneficiation: beneficiation_base,
                    mine_capacity: capacity_of(registry, mine_base),
                    beneficiation_capacity: capacity_of(registry, beneficiation_base),
                };
                let outcome = produce(registry, products, product, &remaining, &rrc, target);
                if outcome.remaining.is_zero() {
                    outcome.remaining
                } else {
                    let target = ThreadTarget {
                        mine,
                        beneficiation,
                        mine_capacity: extension_capacity(registry, mine, mine_base),
                        beneficiation_capacity: extension_capacity(
                            registry,
                            beneficiation,
                            beneficiation_base,
                        ),
                    };
                    produce(registry, products, product, &outcome.remaining, &rrc, target)
                        .remaining
                }
            }
        };
    }
}

/// Move production from a base entity to its extension from the first year the extension
/// produces anything
fn rebalance_extension(registry: &mut EntityRegistry, extension: EntityId) {
    let Some(base) = registry.get(extension).base_entity else {
        return;
    };
    let Some(start) = registry
        .get(extension)
        .state
        .production
        .values()
        .filter_map(Series::first_positive)
        .min()
    else {
        return;
    };

    let moved: Vec<_> = registry
        .get(base)
        .state
        .production
        .iter()
        .map(|(product, volume)| (product.clone(), volume.clone()))
        .collect();
    for (product, volume) in moved {
        registry
            .get_mut(extension)
            .add_production(product.as_str(), &volume.from_position(start));
        registry
            .get_mut(base)
            .set_production(product.as_str(), volume.before_position(start));
    }
}

/// Rebalance base and extension production along every thread, then account the opex and input
/// balances of mines and beneficiation plants.
///
/// An entity shared by several threads is accounted once.
pub fn rebalance(registry: &mut EntityRegistry, products: &ProductNames, threads: &[NodeRef]) {
    let mut accounted = HashSet::new();
    for &node in threads {
        let NodeRef::Combo(id) = node else {
            continue;
        };
        let combo = registry.combo(id);
        let (mine, beneficiation) = (combo.mine, combo.beneficiation);
        rebalance_extension(registry, mine);
        rebalance_extension(registry, beneficiation);
        account_thread(registry, products, id, &mut accounted);
    }
}

fn account_thread(
    registry: &mut EntityRegistry,
    products: &ProductNames,
    id: ComboId,
    accounted: &mut HashSet<EntityId>,
) {
    let combo = registry.combo(id);
    let (mine, beneficiation) = (combo.mine, combo.beneficiation);
    let mine_base = registry.get(mine).base_entity;
    let beneficiation_base = registry.get(beneficiation).base_entity;

    for unit in [Some(mine), mine_base].into_iter().flatten() {
        if accounted.insert(unit) {
            account_mine(registry, products, unit);
        }
    }

    if accounted.insert(beneficiation) {
        let combo = registry.combo(id);
        let (consumption, opex) = (combo.wp_consumption.clone(), combo.wp_opex.clone());
        account_beneficiation(registry, beneficiation, &consumption, &opex);
    }
    if let Some(base) = beneficiation_base {
        if accounted.insert(base) {
            let combo = registry.combo(id);
            let (consumption, opex) = wp_equivalents(
                registry.get(mine),
                registry.get(base),
                &combo.raw_rock_consumption,
            );
            account_beneficiation(registry, base, &consumption, &opex);
        }
    }
}

/// Opex and input balances of a mine from its raw rock production
fn account_mine(registry: &mut EntityRegistry, products: &ProductNames, id: EntityId) {
    let entity = registry.get(id);
    let raw_rock = products.raw_rock.as_str();
    let Some(produced) = entity.production_of(raw_rock).cloned() else {
        return;
    };
    let opex = entity.opex_of(raw_rock).map(|opex| &produced * opex);
    let consumed: Vec<_> = entity
        .consumption_of(raw_rock)
        .into_iter()
        .flatten()
        .map(|(item, sc)| (item.clone(), &produced * sc))
        .collect();

    let state = &mut registry.get_mut(id).state;
    if let Some(opex) = opex {
        state.total_opex = opex;
    }
    for (item, volume) in consumed {
        if let Some(balance) = state.consumption.get_mut(&item) {
            *balance += &volume;
        }
    }
}

/// Opex and input balances of a beneficiation plant from its per-product equivalents
fn account_beneficiation(
    registry: &mut EntityRegistry,
    id: EntityId,
    consumption: &IndexMap<ItemID, IndexMap<ItemID, Series>>,
    opex: &IndexMap<ItemID, Series>,
) {
    let state = &mut registry.get_mut(id).state;
    for (product, unit_opex) in opex {
        let Some(produced) = state.production.get(product).cloned() else {
            continue;
        };
        state.total_opex += &(&produced * unit_opex);
        for (item, sc) in consumption.get(product).into_iter().flatten() {
            if let Some(balance) = state.consumption.get_mut(item) {
                *balance += &(&produced * sc);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::extended_model;
    use crate::model::Model;
    use float_cmp::assert_approx_eq;
    use rstest::rstest;

    fn id(registry: &EntityRegistry, moniker: &str) -> EntityId {
        registry.entity_by_moniker(moniker).unwrap()
    }

    #[rstest]
    fn test_allocate_fills_units_in_order(extended_model: Model) {
        let mut registry = EntityRegistry::build(&extended_model, None).unwrap();
        let existing = id(&registry, "pap/Safi/dihydrate/Existing");
        let new = id(&registry, "pap/Safi/dihydrate/NEW1");
        let product = extended_model.products().phosphoric_acid.clone();
        let driver = Series::constant(registry.timeline().len(), 150.0);

        let allocation = allocate(&mut registry, product.as_str(), &driver, &[existing, new]);
        assert_eq!(allocation.len(), 2);
        assert_eq!(allocation[0].0, existing);
        let first = registry.get(existing);
        let second = registry.get(new);
        let taken_by_first = first.production_of(product.as_str()).unwrap();
        for (taken, left) in taken_by_first.iter().zip(first.state.capacity.iter()) {
            assert_approx_eq!(f64, taken, 100.0);
            assert_approx_eq!(f64, left, 0.0);
        }
        for taken in second.production_of(product.as_str()).unwrap().iter() {
            assert_approx_eq!(f64, taken, 50.0);
        }
    }

    #[rstest]
    fn test_allocate_stops_when_served(extended_model: Model) {
        let mut registry = EntityRegistry::build(&extended_model, None).unwrap();
        let existing = id(&registry, "pap/Safi/dihydrate/Existing");
        let new = id(&registry, "pap/Safi/dihydrate/NEW1");
        let driver = Series::constant(registry.timeline().len(), 40.0);
        let allocation = allocate(&mut registry, "ACP 29", &driver, &[existing, new]);
        assert_eq!(allocation.len(), 1);
        assert!(!registry.get(new).has_produced());
    }

    #[rstest]
    fn test_flow_upstream_reaches_mines(extended_model: Model) {
        let mut registry = EntityRegistry::build(&extended_model, None).unwrap();
        let products = extended_model.products().clone();
        let pap = registry.node_by_moniker("pap/Safi/dihydrate/Existing").unwrap();
        let sap = registry.node_by_moniker("sap/Safi/contact/Existing").unwrap();
        let thread = registry
            .node_by_moniker("mine/Khouribga/OC/Existing--beneficiation/Khouribga/flotation/Existing")
            .unwrap();
        let layers = vec![vec![pap], vec![sap], vec![thread]];
        let driver = Series::constant(registry.timeline().len(), 10.0);

        flow_upstream(&mut registry, &products, "ACP 29", &driver, &layers);
        for node in [pap, sap, thread] {
            for entity in registry.entities_of(node) {
                assert!(registry.get(entity).has_produced(), "{}", registry.get(entity).moniker);
            }
        }
    }

    #[rstest]
    fn test_flow_upstream_without_producers_is_a_no_op(extended_model: Model) {
        let mut registry = EntityRegistry::build(&extended_model, None).unwrap();
        let products = extended_model.products().clone();
        let sap = registry.node_by_moniker("sap/Safi/contact/Existing").unwrap();
        let driver = Series::constant(registry.timeline().len(), 10.0);
        flow_upstream(&mut registry, &products, "DAP", &driver, &[vec![sap]]);
        flow_upstream(&mut registry, &products, "ACS", &driver, &[]);
        assert!(registry.entity_ids().all(|id| !registry.get(id).has_produced()));
    }

    #[rstest]
    fn test_extension_takes_over_from_base(extended_model: Model) {
        let mut registry = EntityRegistry::build(&extended_model, None).unwrap();
        let products = extended_model.products().clone();
        let base = id(&registry, "mine/Khouribga/OC/Existing");
        let extension = id(&registry, "mine/Khouribga/OC/Extension");
        let thread = registry
            .node_by_moniker("mine/Khouribga/OC/Extension--beneficiation/Khouribga/flotation/Existing")
            .unwrap();
        let NodeRef::Combo(combo) = thread else {
            panic!("Expected a thread");
        };
        let len = registry.timeline().len();

        allocate_threads(&mut registry, &products, "Chimie", &Series::constant(len, 10.0), &[combo]);
        assert!(registry.get(base).has_produced());
        assert!(!registry.get(extension).has_produced());

        rebalance(&mut registry, &products, &[thread]);
        // The extension produces nothing itself, so the base keeps its volume
        assert!(registry.get(base).has_produced());
        assert!(registry.get(base).state.total_opex.any_positive());
    }

    #[rstest]
    fn test_rebalance_moves_production_to_extension(extended_model: Model) {
        let mut registry = EntityRegistry::build(&extended_model, None).unwrap();
        let products = extended_model.products().clone();
        let base = id(&registry, "mine/Khouribga/OC/Existing");
        let extension = id(&registry, "mine/Khouribga/OC/Extension");
        let thread = registry
            .node_by_moniker("mine/Khouribga/OC/Extension--beneficiation/Khouribga/flotation/Existing")
            .unwrap();
        let raw_rock = products.raw_rock.as_str();
        registry
            .get_mut(base)
            .set_production(raw_rock, vec![5.0, 5.0, 5.0].into());
        registry
            .get_mut(extension)
            .set_production(raw_rock, vec![0.0, 1.0, 0.0].into());

        rebalance(&mut registry, &products, &[thread]);
        let moved = registry.get(extension).production_of(raw_rock).unwrap();
        let kept = registry.get(base).production_of(raw_rock).unwrap();
        assert_eq!(moved.values(), &[0.0, 6.0, 5.0]);
        assert_eq!(kept.values(), &[5.0, 0.0, 0.0]);
    }
}
