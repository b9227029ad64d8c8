//! A mine paired with a beneficiation plant, valued per unit of beneficiated product.
use super::{Entity, EntityId};
use crate::id::{ItemID, Moniker};
use crate::series::Series;
use indexmap::IndexMap;

/// A mine-beneficiation thread.
///
/// Specific consumptions and opex of the beneficiation plant are given per rock quality. The thread
/// expresses them per unit of beneficiated product, given the composition of the mine it is fed
/// by.
#[derive(Debug, Clone, PartialEq)]
pub struct ComboNode {
    /// `{mine moniker}--{beneficiation moniker}`
    pub moniker: Moniker,
    /// `{mine name}--{beneficiation name}`
    pub name: String,
    /// The upstream mine
    pub mine: EntityId,
    /// The downstream beneficiation plant
    pub beneficiation: EntityId,
    /// Products of the beneficiation plant
    pub outputs: Vec<ItemID>,
    /// Raw rock needed per unit of each product
    pub raw_rock_consumption: IndexMap<ItemID, Series>,
    /// Specific consumption per product and item, per unit of product
    pub wp_consumption: IndexMap<ItemID, IndexMap<ItemID, Series>>,
    /// Opex per unit of product
    pub wp_opex: IndexMap<ItemID, Series>,
}

impl ComboNode {
    /// Pair `mine` with `beneficiation`
    pub fn new(mine_id: EntityId, mine: &Entity, benef_id: EntityId, benef: &Entity) -> Self {
        let raw_rock_consumption = raw_rock_consumption(mine, benef);
        let (wp_consumption, wp_opex) = wp_equivalents(mine, benef, &raw_rock_consumption);

        Self {
            moniker: Moniker::composite(&mine.moniker, &benef.moniker),
            name: format!("{}{}{}", mine.name, crate::id::COMPOSITE_SEPARATOR, benef.name),
            mine: mine_id,
            beneficiation: benef_id,
            outputs: benef.outputs.clone(),
            raw_rock_consumption,
            wp_consumption,
            wp_opex,
        }
    }

    /// Recompute the per-product equivalents, e.g. after raw material prices change
    pub fn update(&mut self, mine: &Entity, benef: &Entity) {
        self.raw_rock_consumption = raw_rock_consumption(mine, benef);
        (self.wp_consumption, self.wp_opex) =
            wp_equivalents(mine, benef, &self.raw_rock_consumption);
    }

    /// Whether the thread can produce `product`
    pub fn produces(&self, product: &str) -> bool {
        self.outputs.iter().any(|output| output.as_str() == product)
    }

    /// Raw rock needed per unit of `product`. Zero for a product the thread cannot make.
    pub fn rrc(&self, product: &str, len: usize) -> Series {
        self.raw_rock_consumption
            .get(product)
            .cloned()
            .unwrap_or_else(|| Series::zeros(len))
    }
}

/// Mine composition for one rock quality
fn composition<'a>(mine: &'a Entity, quality: &str) -> Option<&'a Series> {
    mine.ratio_of(quality)
}

/// Raw rock needed per unit of each beneficiation product: `1 / Σ_q composition[q] × yield[q]`.
///
/// Years where the mine yields nothing of the product give zero.
pub fn raw_rock_consumption(mine: &Entity, benef: &Entity) -> IndexMap<ItemID, Series> {
    let len = benef.initial_capacity().len();
    benef
        .specific_production
        .iter()
        .map(|(product, yields)| {
            let mut denominator = Series::zeros(len);
            for (quality, yield_) in yields {
                if let Some(share) = composition(mine, quality.as_str()) {
                    denominator += &(share * yield_);
                }
            }
            (product.clone(), Series::constant(len, 1.0).checked_div(&denominator))
        })
        .collect()
}

/// Specific consumptions and opex of `benef` expressed per unit of its products when fed by
/// `mine`
pub fn wp_equivalents(
    mine: &Entity,
    benef: &Entity,
    raw_rock_consumption: &IndexMap<ItemID, Series>,
) -> (IndexMap<ItemID, IndexMap<ItemID, Series>>, IndexMap<ItemID, Series>) {
    let len = benef.initial_capacity().len();
    let mut consumption = IndexMap::new();
    let mut opex = IndexMap::new();
    for product in &benef.outputs {
        let rrc = raw_rock_consumption
            .get(product)
            .cloned()
            .unwrap_or_else(|| Series::zeros(len));
        let yields = benef.specific_production.get(product);
        let mut per_item: IndexMap<ItemID, Series> = IndexMap::new();
        for item in &benef.inputs {
            let mut total = Series::zeros(len);
            for (quality, items) in benef.specific_consumption.get(product).into_iter().flatten() {
                let yield_ = yields.and_then(|y| y.get(quality));
                if let (Some(yield_), Some(sc)) = (yield_, items.get(item)) {
                    total += &(yield_ * sc);
                }
            }
            per_item.insert(item.clone(), &rrc * &total);
        }
        consumption.insert(product.clone(), per_item);

        let mut product_opex = Series::zeros(len);
        for (quality, quality_opex) in benef.opex.get(product).into_iter().flatten() {
            if let Some(share) = composition(mine, quality.as_str()) {
                product_opex += &(share * quality_opex);
            }
        }
        opex.insert(product.clone(), product_opex);
    }

    (consumption, opex)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{beneficiation_entity, mine_entity};
    use float_cmp::assert_approx_eq;
    use rstest::rstest;

    #[rstest]
    fn test_raw_rock_consumption(mine_entity: Entity, beneficiation_entity: Entity) {
        // 60% HT at 0.5 yield and 40% BT at 0.25 yield
        let rrc = raw_rock_consumption(&mine_entity, &beneficiation_entity);
        for value in rrc["Chimie"].iter() {
            assert_approx_eq!(f64, value, 2.5);
        }
    }

    #[rstest]
    fn test_wp_equivalents(mine_entity: Entity, beneficiation_entity: Entity) {
        let combo = ComboNode::new(
            EntityId(0),
            &mine_entity,
            EntityId(1),
            &beneficiation_entity,
        );
        assert_eq!(
            combo.moniker.as_str(),
            "mine/Khouribga/OC/Existing--beneficiation/Khouribga/flotation/Existing"
        );
        // Water: 2.5 * (0.5 * 2 + 0.25 * 4) = 5
        for value in combo.wp_consumption["Chimie"]["Water"].iter() {
            assert_approx_eq!(f64, value, 5.0);
        }
        // Opex: 0.6 * 10 + 0.4 * 20 = 14
        for value in combo.wp_opex["Chimie"].iter() {
            assert_approx_eq!(f64, value, 14.0);
        }
    }

    #[rstest]
    fn test_unknown_product_needs_no_rock(mine_entity: Entity, beneficiation_entity: Entity) {
        let combo = ComboNode::new(
            EntityId(0),
            &mine_entity,
            EntityId(1),
            &beneficiation_entity,
        );
        assert!(combo.rrc("Other", 3).is_zero());
        assert!(!combo.produces("Other"));
        assert!(combo.produces("Chimie"));
    }
}
