//! Code for reading raw material prices and the sales plan.
use super::conversion::{UnitConversion, UnitValue, read_csv_with_units};
use super::*;
use crate::id::ItemID;
use crate::market::{ProductType, RawMaterials, SalesPlan, SalesPlanEntry};
use serde::Deserialize;

const RAW_MATERIALS_FILE_NAME: &str = "raw_materials.csv";
const SALES_PLAN_FILE_NAME: &str = "sales_plan.csv";

#[derive(Deserialize)]
struct RawMaterialRow {
    item: ItemID,
    unit: String,
    year: u32,
    price: f64,
}

impl UnitValue for RawMaterialRow {
    fn unit(&self) -> &str {
        &self.unit
    }

    fn convert(&mut self, rate: f64, uniform_unit: &str) {
        self.price *= rate;
        self.unit = uniform_unit.to_string();
    }
}

#[derive(Deserialize)]
struct SalesPlanRow {
    #[serde(rename = "type")]
    product_type: ProductType,
    product: ItemID,
    unit: String,
    year: u32,
    volume: f64,
}

impl UnitValue for SalesPlanRow {
    fn unit(&self) -> &str {
        &self.unit
    }

    fn convert(&mut self, rate: f64, uniform_unit: &str) {
        self.volume *= rate;
        self.unit = uniform_unit.to_string();
    }
}

/// Read raw material prices from the model directory.
///
/// Years outside the run timeline are dropped and missing years are priced at zero.
pub fn read_raw_materials(
    model_dir: &Path,
    conversion: &UnitConversion,
    timeline: &Timeline,
) -> Result<RawMaterials> {
    let file_path = model_dir.join(RAW_MATERIALS_FILE_NAME);
    let rows: Vec<RawMaterialRow> = read_csv_with_units(&file_path, conversion)?;
    ensure!(
        !rows.is_empty(),
        "No raw material prices found in {}",
        file_path.display()
    );

    let mut prices: IndexMap<ItemID, Vec<(u32, f64)>> = IndexMap::new();
    for row in rows {
        ensure!(
            row.price.is_finite(),
            "Price of {} in {} must be finite",
            row.item,
            row.year
        );
        prices.entry(row.item).or_default().push((row.year, row.price));
    }

    Ok(RawMaterials(
        prices
            .into_iter()
            .map(|(item, values)| (item, timeline.series_from(values)))
            .collect(),
    ))
}

/// Read the sales plan from the model directory.
///
/// A product must have a single type throughout the table.
pub fn read_sales_plan(
    model_dir: &Path,
    conversion: &UnitConversion,
    timeline: &Timeline,
) -> Result<SalesPlan> {
    let file_path = model_dir.join(SALES_PLAN_FILE_NAME);
    let rows: Vec<SalesPlanRow> = read_csv_with_units(&file_path, conversion)?;
    ensure!(
        !rows.is_empty(),
        "No sales plan found in {}",
        file_path.display()
    );

    let mut volumes: IndexMap<ItemID, (ProductType, Vec<(u32, f64)>)> = IndexMap::new();
    for row in rows {
        let (product_type, values) = volumes
            .entry(row.product.clone())
            .or_insert_with(|| (row.product_type, Vec::new()));
        ensure!(
            *product_type == row.product_type,
            "Product {} has more than one type in {}",
            row.product,
            file_path.display()
        );
        values.push((row.year, row.volume));
    }

    Ok(SalesPlan(
        volumes
            .into_iter()
            .map(|(product, (product_type, values))| {
                let entry = SalesPlanEntry {
                    product_type,
                    volume: timeline.series_from(values),
                };
                (product, entry)
            })
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::conversion::read_unit_conversion;
    use std::fs;
    use tempfile::tempdir;

    fn setup(dir: &Path) -> (UnitConversion, Timeline) {
        fs::write(
            dir.join("unit_conversion.csv"),
            "unit,uniform_unit,conversion_rate\nUSD/t,USD/t,1\nkt,t,1000\n",
        )
        .unwrap();

        (
            read_unit_conversion(dir).unwrap(),
            Timeline::new(vec![2020, 2021]).unwrap(),
        )
    }

    #[test]
    fn test_read_raw_materials() {
        let dir = tempdir().unwrap();
        let (conversion, timeline) = setup(dir.path());
        fs::write(
            dir.path().join(RAW_MATERIALS_FILE_NAME),
            "item,unit,year,price\nSulfur,USD/t,2020,100\nSulfur,USD/t,2021,110\n\
            Sulfur,USD/t,2040,500\nAmmonia,USD/t,2021,300\n",
        )
        .unwrap();

        let raw_materials = read_raw_materials(dir.path(), &conversion, &timeline).unwrap();
        assert_eq!(
            raw_materials.items().map(ItemID::as_str).collect::<Vec<_>>(),
            ["Sulfur", "Ammonia"]
        );
        assert_eq!(raw_materials.price("Sulfur").unwrap().values(), &[100.0, 110.0]);
        assert_eq!(raw_materials.price("Ammonia").unwrap().values(), &[0.0, 300.0]);
    }

    #[test]
    fn test_read_sales_plan() {
        let dir = tempdir().unwrap();
        let (conversion, timeline) = setup(dir.path());
        fs::write(
            dir.path().join(SALES_PLAN_FILE_NAME),
            "type,product,unit,year,volume\nFertilizer,DAP,kt,2020,1\nFertilizer,DAP,kt,2021,2\n\
            Acid,ACP 29,kt,2021,0.5\n",
        )
        .unwrap();

        let sales_plan = read_sales_plan(dir.path(), &conversion, &timeline).unwrap();
        let dap = sales_plan.get("DAP").unwrap();
        assert_eq!(dap.product_type, ProductType::Fertilizer);
        assert_eq!(dap.volume.values(), &[1000.0, 2000.0]);
        assert_eq!(
            sales_plan.get("ACP 29").unwrap().volume.values(),
            &[0.0, 500.0]
        );
    }

    #[test]
    fn test_read_sales_plan_inconsistent_type() {
        let dir = tempdir().unwrap();
        let (conversion, timeline) = setup(dir.path());
        fs::write(
            dir.path().join(SALES_PLAN_FILE_NAME),
            "type,product,unit,year,volume\nFertilizer,DAP,kt,2020,1\nAcid,DAP,kt,2021,2\n",
        )
        .unwrap();

        assert!(read_sales_plan(dir.path(), &conversion, &timeline).is_err());
    }
}
