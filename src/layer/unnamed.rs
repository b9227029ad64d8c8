//! Shuffle of layers whose new units are interchangeable replicas.
//!
//! Replicas are grouped by location and process into baskets of signatures. Every distinct
//! ordering of a basket is mapped back onto physical replicas by counting, for each slot, how many
//! times its signature has already appeared. Orderings are then ranked by the present cost of
//! serving each demand driver with them, and only the first few per basket are kept.
use super::{Layer, ShuffleContext, SubScenario, cartesian_product, name_baskets};
use crate::entity::{EntityRegistry, LayerKind, NodeRef, Status};
use crate::finance::npv;
use crate::id::ItemID;
use crate::market::ProductType;
use crate::series::Series;
use crate::units::{Dimensionless, Money};
use indexmap::{IndexMap, IndexSet};
use itertools::Itertools;
use std::collections::HashMap;

/// Location and process shared by the replicas of a basket
type BasketKey = (String, Option<String>);

/// Enumerate sub-scenarios of a layer with unnamed replicas.
///
/// Each sub-scenario lists the existing units first, then one choice among existing units sharing
/// a name, then one of the retained orderings of the replicas.
pub fn shuffle(layer: &Layer, ctx: &ShuffleContext) -> Vec<SubScenario> {
    let registry = ctx.registry;
    let permutations = replica_permutations(registry, &layer.nodes);
    let retained = if permutations.is_empty() {
        vec![Vec::new()]
    } else {
        let products = &ctx.parameters.products;
        match layer.kind {
            LayerKind::Pap => simple_allocator(
                ctx,
                &permutations,
                &acid_drivers(ctx),
                &products.phosphoric_acid,
            ),
            LayerKind::Sap => simple_allocator(
                ctx,
                &permutations,
                &sulfuric_drivers(ctx, &acid_drivers(ctx)),
                &products.sulfuric_acid,
            ),
            _ => permutations.into_values().flatten().collect(),
        }
    };

    let existing = layer
        .nodes
        .iter()
        .copied()
        .filter(|&node| status(registry, node) == Some(Status::Existing))
        .collect_vec();
    let baskets = name_baskets(registry, &existing);
    let unique = existing
        .iter()
        .copied()
        .filter(|&node| baskets[registry.name(node)].len() == 1)
        .collect_vec();
    let alternatives = baskets
        .into_values()
        .filter(|basket| basket.len() > 1)
        .collect_vec();

    let mut scenarios = Vec::new();
    for choice in cartesian_product(&alternatives) {
        for ordering in &retained {
            let mut scenario = unique.clone();
            scenario.extend(choice.iter().copied());
            scenario.extend(ordering.iter().copied());
            scenarios.push(scenario);
        }
    }

    scenarios
}

fn status(registry: &EntityRegistry, node: NodeRef) -> Option<Status> {
    match node {
        NodeRef::Entity(id) => Some(registry.get(id).status),
        NodeRef::Combo(_) => None,
    }
}

/// Every distinct ordering of the replicas of each basket
fn replica_permutations(
    registry: &EntityRegistry,
    nodes: &[NodeRef],
) -> IndexMap<BasketKey, Vec<SubScenario>> {
    let mut baskets: IndexMap<BasketKey, Vec<usize>> = IndexMap::new();
    let mut replicas: HashMap<(usize, usize), NodeRef> = HashMap::new();
    let mut seen: HashMap<usize, usize> = HashMap::new();
    for &node in nodes {
        let NodeRef::Entity(id) = node else {
            continue;
        };
        let entity = registry.get(id);
        let (Status::New, Some(replica)) = (entity.status, entity.replica) else {
            continue;
        };
        let rank = seen.entry(replica.signature).or_insert(0);
        *rank += 1;
        replicas.insert((replica.signature, *rank), node);
        baskets
            .entry((entity.location.clone(), entity.process.clone()))
            .or_default()
            .push(replica.signature);
    }

    baskets
        .into_iter()
        .map(|(key, signatures)| {
            let orderings = permutate(&signatures)
                .into_iter()
                .map(|ordering| {
                    ordering
                        .iter()
                        .zip(mirror_counter(&ordering))
                        .filter_map(|(&signature, rank)| replicas.get(&(signature, rank)).copied())
                        .collect()
                })
                .collect();
            (key, orderings)
        })
        .collect()
}

/// Every distinct ordering of `elements`.
///
/// Up to nine elements the orderings are enumerated directly. Beyond that, the first element is
/// inserted at every position of every ordering of the others.
pub fn permutate(elements: &[usize]) -> Vec<Vec<usize>> {
    match elements.len() {
        0 => Vec::new(),
        len if len <= 9 => elements
            .iter()
            .copied()
            .permutations(len)
            .collect::<IndexSet<_>>()
            .into_iter()
            .collect(),
        _ => {
            let mut orderings = IndexSet::new();
            for tail in permutate(&elements[1..]) {
                for position in 0..=tail.len() {
                    let mut ordering = tail.clone();
                    ordering.insert(position, elements[0]);
                    orderings.insert(ordering);
                }
            }
            orderings.into_iter().collect()
        }
    }
}

/// For each slot, the number of times its signature has appeared so far, counting itself
pub fn mirror_counter(signatures: &[usize]) -> Vec<usize> {
    let mut counts: HashMap<usize, usize> = HashMap::new();
    signatures
        .iter()
        .map(|&signature| {
            let count = counts.entry(signature).or_insert(0);
            *count += 1;
            *count
        })
        .collect()
}

/// Keep, for each driver and each basket, the `keep_best_permutations` orderings with the highest
/// present cost.
///
/// Orderings are returned basket by basket, in the order they were first retained. Without any
/// driver every ordering scores zero, so the first orderings of each basket are kept.
pub fn simple_allocator(
    ctx: &ShuffleContext,
    permutations: &IndexMap<BasketKey, Vec<SubScenario>>,
    drivers: &[Series],
    product: &ItemID,
) -> Vec<SubScenario> {
    let registry = ctx.registry;
    let keep = ctx.parameters.keep_best_permutations;
    let no_demand = [registry.timeline().zeros()];
    let drivers = if drivers.is_empty() {
        &no_demand[..]
    } else {
        drivers
    };

    let mut retained: IndexMap<&BasketKey, IndexSet<usize>> = IndexMap::new();
    for driver in drivers {
        for (key, orderings) in permutations {
            let mut scores = orderings
                .iter()
                .enumerate()
                .map(|(index, ordering)| {
                    let cost = ordering_cost(registry, ordering, driver, product, ctx.parameters.wacc);
                    (index, cost)
                })
                .collect_vec();
            scores.sort_by(|a, b| b.1.value().total_cmp(&a.1.value()));
            retained
                .entry(key)
                .or_default()
                .extend(scores.into_iter().take(keep).map(|(index, _)| index));
        }
    }

    retained
        .into_iter()
        .flat_map(|(key, indices)| {
            indices
                .into_iter()
                .map(move |index| permutations[key][index].clone())
        })
        .collect()
}

/// Present cost of serving `driver` with the units of `ordering`, filling each unit to capacity
/// in turn
fn ordering_cost(
    registry: &EntityRegistry,
    ordering: &[NodeRef],
    driver: &Series,
    product: &ItemID,
    wacc: Dimensionless,
) -> Money {
    let timeline = registry.timeline();
    let mut remaining = driver.clone();
    let mut cost = Money(0.0);
    for &node in ordering {
        let NodeRef::Entity(id) = node else {
            continue;
        };
        let unit = registry.get(id);
        let produced = remaining.served_by(unit.initial_capacity());
        remaining -= &produced;
        if !produced.is_zero() {
            let opex = unit
                .opex_of(product.as_str())
                .map_or_else(|| timeline.zeros(), |opex| &produced * opex);
            let capex = unit.capex_from(timeline, opex.first_positive());
            cost += npv(wacc, timeline, &(&opex + &capex));
        }
        if remaining.is_zero() {
            break;
        }
    }

    cost
}

/// Phosphoric acid demand for each granulation process able to make every fertilizer of the
/// sales plan: merchant acid plus the acid consumed by granulation
fn acid_drivers(ctx: &ShuffleContext) -> Vec<Series> {
    let registry = ctx.registry;
    let len = registry.timeline().len();
    let acid = &ctx.parameters.products.phosphoric_acid;

    let mut consumption_by_process: IndexMap<Option<&str>, IndexMap<&str, &Series>> =
        IndexMap::new();
    for &id in registry.layer(LayerKind::Granulation) {
        let unit = registry.get(id);
        for product in &unit.outputs {
            if let Some(sc) = unit.specific(product.as_str(), acid.as_str()) {
                consumption_by_process
                    .entry(unit.process.as_deref())
                    .or_default()
                    .entry(product.as_str())
                    .or_insert(sc);
            }
        }
    }

    let merchant = ctx.sales_plan.total_of_type(ProductType::Acid, len);
    let fertilizers = ctx
        .sales_plan
        .iter()
        .filter(|(_, entry)| entry.product_type == ProductType::Fertilizer)
        .collect_vec();
    consumption_by_process
        .values()
        .filter(|by_product| {
            fertilizers
                .iter()
                .all(|(product, _)| by_product.contains_key(product.as_str()))
        })
        .map(|by_product| {
            let mut driver = merchant.clone();
            for (product, entry) in &fertilizers {
                driver += &(&entry.volume * by_product[product.as_str()]);
            }
            driver
        })
        .collect()
}

/// Sulfuric acid demand for each phosphoric acid process and acid driver
fn sulfuric_drivers(ctx: &ShuffleContext, acid_drivers: &[Series]) -> Vec<Series> {
    let registry = ctx.registry;
    let products = &ctx.parameters.products;
    let mut consumption_by_process: IndexMap<Option<&str>, &Series> = IndexMap::new();
    for &id in registry.layer(LayerKind::Pap) {
        let unit = registry.get(id);
        if let Some(sc) = unit.specific(
            products.phosphoric_acid.as_str(),
            products.sulfuric_acid.as_str(),
        ) {
            consumption_by_process
                .entry(unit.process.as_deref())
                .or_insert(sc);
        }
    }

    consumption_by_process
        .values()
        .flat_map(|&sc| acid_drivers.iter().map(move |driver| driver * sc))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::extended_model;
    use crate::model::{Model, ShuffleLevel};
    use rstest::rstest;

    #[test]
    fn test_permutate_skips_duplicates() {
        assert!(permutate(&[]).is_empty());
        assert_eq!(permutate(&[0, 0]), vec![vec![0, 0]]);
        assert_eq!(
            permutate(&[0, 0, 1]),
            vec![vec![0, 0, 1], vec![0, 1, 0], vec![1, 0, 0]]
        );
    }

    #[test]
    fn test_permutate_large_basket() {
        // One odd element among ten can sit in any of the ten slots, including the last
        let mut elements = vec![1];
        elements.extend([0; 9]);
        let orderings = permutate(&elements);
        assert_eq!(orderings.len(), 10);
        assert!(orderings.contains(&[vec![0; 9], vec![1]].concat()));
    }

    #[test]
    fn test_mirror_counter() {
        assert_eq!(mirror_counter(&[0, 1, 0, 0, 1]), vec![1, 1, 2, 3, 2]);
        assert!(mirror_counter(&[]).is_empty());
    }

    #[rstest]
    fn test_shuffle_pap(extended_model: Model) {
        let registry = EntityRegistry::build(&extended_model, None).unwrap();
        let ctx = ShuffleContext {
            registry: &registry,
            sales_plan: &extended_model.sales_plan,
            parameters: &extended_model.parameters,
            priority_mines: &[],
        };
        let layer = Layer::from_registry(&registry, LayerKind::Pap, ShuffleLevel::WithUnnamed);
        let shuffled = shuffle(&layer, &ctx);
        let names = shuffled
            .iter()
            .map(|scenario| scenario.iter().map(|&n| registry.name(n)).collect_vec())
            .collect_vec();
        assert_eq!(names, [["PAP Safi", "Safi/100/NEW1", "Safi/100/NEW2"]]);
    }

    #[rstest]
    fn test_shuffle_sap(extended_model: Model) {
        let registry = EntityRegistry::build(&extended_model, None).unwrap();
        let ctx = ShuffleContext {
            registry: &registry,
            sales_plan: &extended_model.sales_plan,
            parameters: &extended_model.parameters,
            priority_mines: &[],
        };
        let layer = Layer::from_registry(&registry, LayerKind::Sap, ShuffleLevel::WithUnnamed);
        let shuffled = shuffle(&layer, &ctx);
        assert_eq!(shuffled.len(), 1);
        assert_eq!(shuffled[0].len(), 2);
        assert_eq!(registry.name(shuffled[0][0]), "SAP Safi");
    }

    #[rstest]
    fn test_acid_drivers(extended_model: Model) {
        let registry = EntityRegistry::build(&extended_model, None).unwrap();
        let ctx = ShuffleContext {
            registry: &registry,
            sales_plan: &extended_model.sales_plan,
            parameters: &extended_model.parameters,
            priority_mines: &[],
        };
        let drivers = acid_drivers(&ctx);
        assert_eq!(drivers.len(), 1);
        assert!(drivers[0].any_positive());
        assert_eq!(sulfuric_drivers(&ctx, &drivers).len(), 1);
    }
}
