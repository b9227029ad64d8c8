//! Market reference data: the sales plan and raw material prices.
use crate::id::ItemID;
use crate::series::Series;
use indexmap::IndexMap;
use log::warn;
use serde_string_enum::DeserializeLabeledStringEnum;

/// The class of a product in the sales plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, DeserializeLabeledStringEnum, strum::Display)]
pub enum ProductType {
    /// Granulated fertilizers (DAP, MAP, NPK, TSP...)
    #[string = "Fertilizer"]
    Fertilizer,
    /// Merchant phosphoric acid
    #[string = "Acid"]
    Acid,
    /// Phosphate rock
    #[string = "Rock"]
    Rock,
}

/// Demand for one product
#[derive(Debug, Clone, PartialEq)]
pub struct SalesPlanEntry {
    /// The product's class
    pub product_type: ProductType,
    /// Volume to deliver each year
    pub volume: Series,
}

/// Product demand per year, in the order products first appear in the input
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SalesPlan(pub IndexMap<ItemID, SalesPlanEntry>);

impl SalesPlan {
    /// Iterate over products and their demand
    pub fn iter(&self) -> impl Iterator<Item = (&ItemID, &SalesPlanEntry)> {
        self.0.iter()
    }

    /// Demand for a product, if it is in the plan
    pub fn get(&self, product: &str) -> Option<&SalesPlanEntry> {
        self.0.get(product)
    }

    /// Total demand over all products of the given class
    pub fn total_of_type(&self, product_type: ProductType, len: usize) -> Series {
        let mut total = Series::zeros(len);
        for entry in self.0.values().filter(|e| e.product_type == product_type) {
            total += &entry.volume;
        }

        total
    }

    /// Add `delta` to the demand for `product`, if the product is in the plan
    pub fn adjust(&mut self, product: &str, delta: &Series) {
        if let Some(entry) = self.0.get_mut(product) {
            entry.volume += delta;
        }
    }

    /// Subtract `delta` from the demand for `product`, if the product is in the plan
    pub fn reduce(&mut self, product: &str, delta: &Series) {
        if let Some(entry) = self.0.get_mut(product) {
            entry.volume -= delta;
        }
    }
}

/// Price per unit of each raw material, per year
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawMaterials(pub IndexMap<ItemID, Series>);

impl RawMaterials {
    /// The price series for `item`, if it is a priced raw material
    pub fn price(&self, item: &str) -> Option<&Series> {
        self.0.get(item)
    }

    /// The priced items, in input order
    pub fn items(&self) -> impl Iterator<Item = &ItemID> {
        self.0.keys()
    }

    /// Add `shock` to every year of the price of `item`.
    ///
    /// Returns `false` (with a warning) if the item is not a known raw material.
    pub fn bump(&mut self, item: &str, shock: f64) -> bool {
        let Some(price) = self.0.get_mut(item) else {
            warn!("Cannot shock {item}: it is not a known raw material");
            return false;
        };

        *price = price.map(|p| p + shock);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::indexmap;

    fn sales_plan() -> SalesPlan {
        SalesPlan(indexmap! {
            "DAP".into() => SalesPlanEntry {
                product_type: ProductType::Fertilizer,
                volume: vec![10.0, 20.0].into(),
            },
            "NPK".into() => SalesPlanEntry {
                product_type: ProductType::Fertilizer,
                volume: vec![5.0, 5.0].into(),
            },
            "ACP 29".into() => SalesPlanEntry {
                product_type: ProductType::Acid,
                volume: vec![1.0, 2.0].into(),
            },
        })
    }

    #[test]
    fn test_total_of_type() {
        let plan = sales_plan();
        assert_eq!(
            plan.total_of_type(ProductType::Fertilizer, 2).values(),
            &[15.0, 25.0]
        );
        assert_eq!(plan.total_of_type(ProductType::Rock, 2).values(), &[0.0, 0.0]);
    }

    #[test]
    fn test_adjust_and_reduce() {
        let mut plan = sales_plan();
        plan.reduce("NPK", &vec![5.0, 1.0].into());
        plan.adjust("ACP 29", &vec![1.0, 1.0].into());
        plan.adjust("MAP", &vec![1.0, 1.0].into());
        assert_eq!(plan.get("NPK").unwrap().volume.values(), &[0.0, 4.0]);
        assert_eq!(plan.get("ACP 29").unwrap().volume.values(), &[2.0, 3.0]);
        assert!(plan.get("MAP").is_none());
    }

    #[test]
    fn test_bump_raw_material() {
        let mut raw_materials = RawMaterials(indexmap! {"Sulfur".into() => vec![100.0, 110.0].into()});
        assert!(raw_materials.bump("Sulfur", 1.0));
        assert_eq!(raw_materials.price("Sulfur").unwrap().values(), &[101.0, 111.0]);
        assert!(raw_materials.bump("Sulfur", -1.0));
        assert_eq!(raw_materials.price("Sulfur").unwrap().values(), &[100.0, 110.0]);
        assert!(!raw_materials.bump("Ammonia", 1.0));
    }
}
