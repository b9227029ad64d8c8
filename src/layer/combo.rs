//! Connections between mine and beneficiation sites and the shuffle of mine-beneficiation
//! threads.
use super::{SubScenario, cartesian_product};
use crate::entity::{ComboId, EntityRegistry, NodeRef};
use indexmap::{IndexMap, IndexSet};
use itertools::Itertools;
use log::warn;

/// Which mine locations may feed which beneficiation locations
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Connections(IndexMap<String, IndexMap<String, Option<f64>>>);

impl Connections {
    /// Record the weight of a connection. A blank weight means no connection.
    pub fn insert(
        &mut self,
        mine_location: String,
        beneficiation_location: String,
        weight: Option<f64>,
    ) {
        self.0
            .entry(mine_location)
            .or_default()
            .insert(beneficiation_location, weight);
    }

    /// Whether the two locations are connected by a non-zero weight
    pub fn is_connected(&self, mine_location: &str, beneficiation_location: &str) -> bool {
        self.0
            .get(mine_location)
            .and_then(|targets| targets.get(beneficiation_location))
            .copied()
            .flatten()
            .is_some_and(|weight| weight != 0.0 && !weight.is_nan())
    }

    /// Whether any connection starts at the mine location
    pub fn has_mine_location(&self, mine_location: &str) -> bool {
        self.0.contains_key(mine_location)
    }
}

/// Enumerate sub-scenarios of mine-beneficiation threads.
///
/// For each pair of mine and beneficiation locations, one thread is picked per mine name, and the
/// threads of one mine location must all feed the same beneficiation plant. Mine locations are
/// then combined, priority locations first, keeping only combinations where each beneficiation
/// location is served by a single plant whose capacity covers the mines feeding it.
pub fn shuffle(
    registry: &EntityRegistry,
    combos: &[ComboId],
    priority_mines: &[String],
) -> Vec<SubScenario> {
    let mut by_site: IndexMap<&str, IndexMap<&str, IndexMap<&str, Vec<NodeRef>>>> =
        IndexMap::new();
    for &id in combos {
        let combo = registry.combo(id);
        let mine = registry.get(combo.mine);
        let benef = registry.get(combo.beneficiation);
        by_site
            .entry(mine.location.as_str())
            .or_default()
            .entry(benef.location.as_str())
            .or_default()
            .entry(mine.name.as_str())
            .or_default()
            .push(NodeRef::Combo(id));
    }

    let mut by_mine: IndexMap<&str, Vec<SubScenario>> = IndexMap::new();
    for (mine_location, by_benef) in by_site {
        let mut candidates = Vec::new();
        for by_name in by_benef.into_values() {
            let groups = by_name.into_values().collect_vec();
            candidates.extend(
                cartesian_product(&groups)
                    .into_iter()
                    .filter(|threads| beneficiation_plants(registry, threads).len() == 1),
            );
        }
        if candidates.is_empty() {
            warn!("No values available for mine {mine_location}");
        }
        by_mine.insert(mine_location, candidates);
    }

    let (priority, others): (Vec<_>, Vec<_>) = by_mine
        .into_iter()
        .partition(|(location, _)| priority_mines.iter().any(|p| p.as_str() == *location));
    let combine = |groups: Vec<(&str, Vec<SubScenario>)>| {
        groups
            .into_iter()
            .fold(vec![Vec::new()], |acc, (_, candidates)| {
                product_and_reduce(registry, &acc, &candidates)
            })
    };
    let combined = product_and_reduce(registry, &combine(priority), &combine(others));

    filter_over_beneficiation_capacity(registry, combined)
        .into_iter()
        .filter(|threads| !threads.is_empty())
        .collect()
}

/// Beneficiation plants fed by the threads
fn beneficiation_plants(registry: &EntityRegistry, threads: &[NodeRef]) -> IndexSet<usize> {
    threads
        .iter()
        .filter_map(|&node| match node {
            NodeRef::Combo(id) => Some(registry.combo(id).beneficiation.0),
            NodeRef::Entity(_) => None,
        })
        .collect()
}

/// Concatenate every pair drawn from the two lists, keeping those where each beneficiation
/// location is served by a single plant
pub fn product_and_reduce(
    registry: &EntityRegistry,
    first: &[SubScenario],
    second: &[SubScenario],
) -> Vec<SubScenario> {
    first
        .iter()
        .cartesian_product(second)
        .map(|(a, b)| [a.as_slice(), b.as_slice()].concat())
        .filter(|threads| {
            let mut plants: IndexMap<&str, IndexSet<usize>> = IndexMap::new();
            for &node in threads {
                if let NodeRef::Combo(id) = node {
                    let benef = registry.combo(id).beneficiation;
                    plants
                        .entry(registry.get(benef).location.as_str())
                        .or_default()
                        .insert(benef.0);
                }
            }
            plants.values().all(|ids| ids.len() == 1)
        })
        .collect()
}

/// Keep combinations where no beneficiation plant is fed more mine capacity than it has
pub fn filter_over_beneficiation_capacity(
    registry: &EntityRegistry,
    candidates: Vec<SubScenario>,
) -> Vec<SubScenario> {
    candidates
        .into_iter()
        .filter(|threads| {
            let mut headroom: IndexMap<&str, f64> = IndexMap::new();
            for &node in threads {
                let NodeRef::Combo(id) = node else {
                    continue;
                };
                let combo = registry.combo(id);
                let benef = registry.get(combo.beneficiation);
                let mine = registry.get(combo.mine);
                *headroom
                    .entry(benef.location.as_str())
                    .or_insert(benef.nominal_capacity) -= mine.nominal_capacity;
            }
            headroom.values().all(|&left| left >= 0.0)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::extended_model;
    use crate::model::Model;
    use rstest::rstest;

    #[test]
    fn test_connections() {
        let mut connections = Connections::default();
        connections.insert("Khouribga".into(), "Jorf".into(), Some(1.0));
        connections.insert("Khouribga".into(), "Safi".into(), None);
        connections.insert("Gantour".into(), "Safi".into(), Some(f64::NAN));
        assert!(connections.is_connected("Khouribga", "Jorf"));
        assert!(!connections.is_connected("Khouribga", "Safi"));
        assert!(!connections.is_connected("Gantour", "Safi"));
        assert!(connections.has_mine_location("Gantour"));
        assert!(!connections.has_mine_location("Benguerir"));
    }

    #[rstest]
    fn test_shuffle_one_thread_per_mine_name(extended_model: Model) {
        let registry = EntityRegistry::build(&extended_model, None).unwrap();
        let combos = registry.combo_ids().collect_vec();
        let shuffled = shuffle(&registry, &combos, &[]);
        let expected = combos
            .iter()
            .map(|&id| vec![NodeRef::Combo(id)])
            .collect_vec();
        assert_eq!(shuffled, expected);
    }

    #[rstest]
    fn test_priority_mines_are_combined_first(extended_model: Model) {
        let registry = EntityRegistry::build(&extended_model, None).unwrap();
        let combos = registry.combo_ids().collect_vec();
        let priority = ["Khouribga".to_string()];
        assert_eq!(
            shuffle(&registry, &combos, &priority),
            shuffle(&registry, &combos, &[])
        );
    }

    #[rstest]
    fn test_product_and_reduce_rejects_two_plants_per_site(extended_model: Model) {
        let registry = EntityRegistry::build(&extended_model, None).unwrap();
        let threads = registry.combo_ids().map(NodeRef::Combo).collect_vec();
        // Both threads feed the same plant
        let reduced = product_and_reduce(&registry, &[vec![threads[0]]], &[vec![threads[1]]]);
        assert_eq!(reduced, [threads.clone()]);
        // Together the two mines exceed the plant's capacity
        assert!(filter_over_beneficiation_capacity(&registry, reduced).is_empty());
    }

    #[rstest]
    fn test_empty_layer(extended_model: Model) {
        let registry = EntityRegistry::build(&extended_model, None).unwrap();
        assert!(shuffle(&registry, &[], &[]).is_empty());
    }
}
