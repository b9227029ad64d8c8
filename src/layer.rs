//! Layers group the nodes of one facility kind and enumerate the candidate sub-scenarios drawn
//! from them.
use crate::entity::{EntityRegistry, LayerKind, NodeRef};
use crate::market::{ProductType, SalesPlan};
use crate::model::{ModelParameters, ShuffleLevel};
use crate::series::Series;
use indexmap::{IndexMap, IndexSet};
use itertools::Itertools;
use log::warn;

pub mod combo;
pub mod unnamed;

/// One candidate selection of nodes within a layer, in allocation order
pub type SubScenario = Vec<NodeRef>;

/// Everything a shuffle reads besides the nodes of its layer
pub struct ShuffleContext<'a> {
    /// The entities and threads of the run
    pub registry: &'a EntityRegistry,
    /// Demand the shuffled layers must be able to serve
    pub sales_plan: &'a SalesPlan,
    /// Model parameters
    pub parameters: &'a ModelParameters,
    /// Mine locations whose threads are combined first
    pub priority_mines: &'a [String],
}

/// The nodes of one facility kind
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    /// Facility kind
    pub kind: LayerKind,
    /// How the layer is shuffled
    pub level: ShuffleLevel,
    /// Nodes in input order
    pub nodes: Vec<NodeRef>,
}

impl Layer {
    /// Gather the nodes of `kind` from the registry. The mine-beneficiation layer holds threads.
    pub fn from_registry(registry: &EntityRegistry, kind: LayerKind, level: ShuffleLevel) -> Self {
        let nodes = match kind {
            LayerKind::MineBeneficiation => registry.combo_ids().map(NodeRef::Combo).collect(),
            _ => registry
                .layer(kind)
                .iter()
                .copied()
                .map(NodeRef::Entity)
                .collect(),
        };

        Self { kind, level, nodes }
    }

    /// Enumerate the candidate sub-scenarios of this layer.
    ///
    /// A layer without nodes yields nothing.
    pub fn shuffle(&self, ctx: &ShuffleContext) -> Vec<SubScenario> {
        if self.nodes.is_empty() {
            return Vec::new();
        }
        if self.kind == LayerKind::MineBeneficiation {
            let combos = self
                .nodes
                .iter()
                .filter_map(|node| match node {
                    NodeRef::Combo(id) => Some(*id),
                    NodeRef::Entity(_) => None,
                })
                .collect_vec();
            return combo::shuffle(ctx.registry, &combos, ctx.priority_mines);
        }

        match self.level {
            ShuffleLevel::WithoutPermutations => self.one_per_name(ctx.registry),
            ShuffleLevel::WithPermutations => with_permutations(self.subsets(ctx.registry)),
            ShuffleLevel::WithPermutationsWithFilters => self.filtered_permutations(ctx),
            ShuffleLevel::WithUnnamed => unnamed::shuffle(self, ctx),
            ShuffleLevel::Undefined => {
                warn!("Undefined shuffling method for layer {}", self.kind);
                Vec::new()
            }
        }
    }

    /// One representative of every name, for every choice of representatives
    pub fn one_per_name(&self, registry: &EntityRegistry) -> Vec<SubScenario> {
        let baskets = name_baskets(registry, &self.nodes);
        cartesian_product(&baskets.into_values().collect_vec())
    }

    /// Every non-empty subset of every choice of one representative per name, without duplicates
    pub fn subsets(&self, registry: &EntityRegistry) -> Vec<SubScenario> {
        let mut subsets = IndexSet::new();
        for choice in self.one_per_name(registry) {
            for size in 1..=choice.len() {
                subsets.extend(choice.iter().copied().combinations(size));
            }
        }

        subsets.into_iter().collect()
    }

    fn filtered_permutations(&self, ctx: &ShuffleContext) -> Vec<SubScenario> {
        let registry = ctx.registry;
        let candidates = filter_same_location(registry, self.subsets(registry));
        let candidates = filter_same_process(registry, candidates);
        let len = registry.timeline().len();
        let candidates = match self.kind {
            LayerKind::Pap => filter_by_capacity(registry, candidates, &acid_needs(ctx)),
            LayerKind::Granulation => filter_by_capacity(
                registry,
                candidates,
                &ctx.sales_plan.total_of_type(ProductType::Fertilizer, len),
            ),
            _ => candidates,
        };

        with_permutations(candidates)
    }
}

/// Nodes grouped by name, in order of first appearance
pub fn name_baskets<'a>(
    registry: &'a EntityRegistry,
    nodes: &[NodeRef],
) -> IndexMap<&'a str, Vec<NodeRef>> {
    let mut baskets: IndexMap<&str, Vec<NodeRef>> = IndexMap::new();
    for &node in nodes {
        baskets.entry(registry.name(node)).or_default().push(node);
    }

    baskets
}

/// Every way of picking one element from each group. No groups gives a single empty pick.
pub fn cartesian_product<T: Clone>(groups: &[Vec<T>]) -> Vec<Vec<T>> {
    if groups.is_empty() {
        return vec![Vec::new()];
    }

    groups
        .iter()
        .map(|group| group.iter().cloned())
        .multi_cartesian_product()
        .collect()
}

/// Every ordering of every candidate
pub fn with_permutations(candidates: Vec<SubScenario>) -> Vec<SubScenario> {
    candidates
        .into_iter()
        .flat_map(|candidate| {
            let len = candidate.len();
            candidate.into_iter().permutations(len)
        })
        .collect()
}

/// Keep candidates whose nodes share one location
pub fn filter_same_location(
    registry: &EntityRegistry,
    candidates: Vec<SubScenario>,
) -> Vec<SubScenario> {
    candidates
        .into_iter()
        .filter(|candidate| candidate.iter().map(|&n| registry.location(n)).all_equal())
        .collect()
}

/// Keep candidates whose nodes share one process
pub fn filter_same_process(
    registry: &EntityRegistry,
    candidates: Vec<SubScenario>,
) -> Vec<SubScenario> {
    candidates
        .into_iter()
        .filter(|candidate| candidate.iter().map(|&n| process(registry, n)).all_equal())
        .collect()
}

/// Keep candidates whose summed capacity covers `needs` in every year
pub fn filter_by_capacity(
    registry: &EntityRegistry,
    candidates: Vec<SubScenario>,
    needs: &Series,
) -> Vec<SubScenario> {
    candidates
        .into_iter()
        .filter(|candidate| {
            let mut capacity = Series::zeros(needs.len());
            for &node in candidate {
                capacity += &node_capacity(registry, node);
            }
            capacity.dominates(needs)
        })
        .collect()
}

fn process(registry: &EntityRegistry, node: NodeRef) -> Option<&str> {
    let id = match node {
        NodeRef::Entity(id) => id,
        NodeRef::Combo(id) => registry.combo(id).beneficiation,
    };
    registry.get(id).process.as_deref()
}

/// Capacity schedule of a node before any allocation. A thread is bounded by its beneficiation
/// plant.
pub fn node_capacity(registry: &EntityRegistry, node: NodeRef) -> Series {
    let id = match node {
        NodeRef::Entity(id) => id,
        NodeRef::Combo(id) => registry.combo(id).beneficiation,
    };
    registry.get(id).initial_capacity().clone()
}

/// A lower bound on the phosphoric acid the chain must make: merchant acid demand, plus every
/// fertilizer made with the least acid-hungry granulation recipe
fn acid_needs(ctx: &ShuffleContext) -> Series {
    let registry = ctx.registry;
    let len = registry.timeline().len();
    let acid = &ctx.parameters.products.phosphoric_acid;
    let least_acid = registry
        .layer(LayerKind::Granulation)
        .iter()
        .map(|&id| registry.get(id))
        .flat_map(|unit| {
            unit.outputs
                .iter()
                .filter_map(move |product| unit.specific(product.as_str(), acid.as_str()))
        })
        .filter_map(Series::min_value)
        .min_by(f64::total_cmp)
        .unwrap_or(0.0);

    let fertilizers = ctx.sales_plan.total_of_type(ProductType::Fertilizer, len);
    &ctx.sales_plan.total_of_type(ProductType::Acid, len) + &(&fertilizers * least_acid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::extended_model;
    use crate::model::Model;
    use rstest::rstest;

    fn pap_layer(registry: &EntityRegistry, level: ShuffleLevel) -> Layer {
        Layer::from_registry(registry, LayerKind::Pap, level)
    }

    #[rstest]
    fn test_empty_layer_shuffles_to_nothing(extended_model: Model) {
        let registry = EntityRegistry::build(&extended_model, None).unwrap();
        let ctx = ShuffleContext {
            registry: &registry,
            sales_plan: &extended_model.sales_plan,
            parameters: &extended_model.parameters,
            priority_mines: &[],
        };
        for level in [
            ShuffleLevel::WithoutPermutations,
            ShuffleLevel::WithPermutations,
            ShuffleLevel::WithPermutationsWithFilters,
            ShuffleLevel::WithUnnamed,
        ] {
            let layer = Layer {
                kind: LayerKind::Pap,
                level,
                nodes: Vec::new(),
            };
            assert!(layer.shuffle(&ctx).is_empty());
        }
    }

    #[rstest]
    fn test_one_per_name(extended_model: Model) {
        let registry = EntityRegistry::build(&extended_model, None).unwrap();
        let layer = pap_layer(&registry, ShuffleLevel::WithoutPermutations);
        assert_eq!(layer.one_per_name(&registry), vec![layer.nodes.clone()]);
    }

    #[rstest]
    fn test_subsets_and_permutations(extended_model: Model) {
        let registry = EntityRegistry::build(&extended_model, None).unwrap();
        let layer = pap_layer(&registry, ShuffleLevel::WithPermutations);
        let subsets = layer.subsets(&registry);
        assert_eq!(subsets.len(), 7);
        // 3 singles, 3 pairs with 2 orders each, 1 triple with 6 orders
        assert_eq!(with_permutations(subsets).len(), 15);
    }

    #[rstest]
    fn test_filters_are_monotonic_and_idempotent(extended_model: Model) {
        let registry = EntityRegistry::build(&extended_model, None).unwrap();
        let ctx = ShuffleContext {
            registry: &registry,
            sales_plan: &extended_model.sales_plan,
            parameters: &extended_model.parameters,
            priority_mines: &[],
        };
        let layer = pap_layer(&registry, ShuffleLevel::WithPermutationsWithFilters);
        let all = with_permutations(layer.subsets(&registry));
        let filtered = layer.shuffle(&ctx);
        assert!(filtered.iter().all(|candidate| all.contains(candidate)));

        let needs = acid_needs(&ctx);
        let once = filter_by_capacity(&registry, layer.subsets(&registry), &needs);
        let twice = filter_by_capacity(&registry, once.clone(), &needs);
        assert_eq!(once, twice);
        let once = filter_same_location(&registry, layer.subsets(&registry));
        assert_eq!(filter_same_location(&registry, once.clone()), once);
    }

    #[rstest]
    fn test_undefined_level(extended_model: Model) {
        let registry = EntityRegistry::build(&extended_model, None).unwrap();
        let ctx = ShuffleContext {
            registry: &registry,
            sales_plan: &extended_model.sales_plan,
            parameters: &extended_model.parameters,
            priority_mines: &[],
        };
        assert!(pap_layer(&registry, ShuffleLevel::Undefined).shuffle(&ctx).is_empty());
    }

    #[test]
    fn test_cartesian_product() {
        assert_eq!(cartesian_product::<u8>(&[]), vec![Vec::<u8>::new()]);
        assert_eq!(
            cartesian_product(&[vec![1, 2], vec![3]]),
            vec![vec![1, 3], vec![2, 3]]
        );
        assert!(cartesian_product(&[vec![1], vec![]]).is_empty());
    }
}
