//! Fixtures for tests

use crate::entity::{Entity, LayerKind, Status};
use crate::id::{ItemID, Moniker};
use crate::input::layer::{CapexRow, ConsumptionRow, LayerTables, OptionRow, ProductionRow};
use crate::market::RawMaterials;
use crate::model::{Model, ProductNames};
use crate::year::Timeline;
use indexmap::indexmap;
use rstest::fixture;

/// Assert that an error with the given message occurs
macro_rules! assert_error {
    ($result:expr, $msg:expr) => {
        assert_eq!(
            $result.unwrap_err().chain().next().unwrap().to_string(),
            $msg
        );
    };
}
pub(crate) use assert_error;

const YEARS: [u32; 3] = [2020, 2021, 2022];

#[fixture]
pub fn timeline() -> Timeline {
    Timeline::new(YEARS.to_vec()).unwrap()
}

/// An `Existing` options row with every optional column blank apart from the process
pub fn option_row(moniker: &str, name: &str, location: &str, capacity: f64) -> OptionRow {
    OptionRow {
        moniker: moniker.into(),
        name: name.into(),
        location: location.into(),
        process: Some("dihydrate".into()),
        status: Status::Existing,
        capacity,
        unit: "t".into(),
        starting_date: None,
        closing_date: None,
        extraction: None,
        associated_pap: None,
        production_site: None,
        products: None,
        granulation_type: None,
        upstream: None,
        downstream: None,
        method: None,
        product: None,
        layer_to_layer: None,
        pap_location: None,
    }
}

/// The same consumption for every year
fn consumption(
    moniker: &str,
    product: &str,
    input: Option<&str>,
    item: &str,
    value: f64,
) -> Vec<ConsumptionRow> {
    YEARS
        .iter()
        .map(|&year| ConsumptionRow {
            moniker: moniker.into(),
            product: product.into(),
            input: input.map(ItemID::from),
            item: item.into(),
            unit: "t".into(),
            year,
            value,
        })
        .collect()
}

/// The same specific production for every year
fn production(moniker: &str, product: &str, input: Option<&str>, value: f64) -> Vec<ProductionRow> {
    YEARS
        .iter()
        .map(|&year| ProductionRow {
            moniker: moniker.into(),
            product: product.into(),
            input: input.map(ItemID::from),
            unit: "t".into(),
            year,
            value,
        })
        .collect()
}

fn build(kind: LayerKind, row: OptionRow, tables: LayerTables, prices: &RawMaterials) -> Entity {
    Entity::from_option(
        kind,
        &row,
        &tables,
        &timeline(),
        prices,
        &ProductNames::default(),
    )
    .unwrap()
}

#[fixture]
pub fn pap_entity() -> Entity {
    let moniker = "pap/Safi/dihydrate/Existing";
    let capex = [(0, 100.0), (1, 50.0), (2, 25.0)]
        .into_iter()
        .map(|(offset, amount)| CapexRow {
            moniker: moniker.into(),
            item: "Total".into(),
            unit: "USD".into(),
            amount,
            offset,
            share: Some(1.0),
        })
        .collect();
    let tables = LayerTables {
        options: Vec::new(),
        consumption: [
            consumption(moniker, "ACP 29", Some("Chimie"), "Chimie", 3.0),
            consumption(moniker, "ACP 29", Some("Chimie"), "ACS", 2.5),
        ]
        .concat(),
        production: [
            production(moniker, "ACP 29", Some("Chimie"), 1.0),
            production(moniker, "Gypsum", Some("Chimie"), 5.0),
        ]
        .concat(),
        capex,
    };
    let prices = RawMaterials(indexmap! { "Chimie".into() => vec![10.0; 3].into() });

    build(
        LayerKind::Pap,
        option_row(moniker, "PAP1", "Safi", 100.0),
        tables,
        &prices,
    )
}

#[fixture]
pub fn mine_entity() -> Entity {
    let moniker = "mine/Khouribga/OC/Existing";
    let tables = LayerTables {
        production: [
            production(moniker, "HT", None, 0.6),
            production(moniker, "BT", None, 0.4),
        ]
        .concat(),
        ..LayerTables::default()
    };
    let mut row = option_row(moniker, "Mine KH", "Khouribga", 100.0);
    row.process = Some("OC".into());

    build(LayerKind::Mine, row, tables, &RawMaterials::default())
}

#[fixture]
pub fn beneficiation_entity() -> Entity {
    let moniker = "beneficiation/Khouribga/flotation/Existing";
    let tables = LayerTables {
        consumption: [
            consumption(moniker, "Chimie", Some("HT"), "Water", 2.0),
            consumption(moniker, "Chimie", Some("BT"), "Water", 4.0),
            consumption(moniker, "Chimie", Some("HT"), "Total", 10.0),
            consumption(moniker, "Chimie", Some("BT"), "Total", 20.0),
        ]
        .concat(),
        production: [
            production(moniker, "Chimie", Some("HT"), 0.5),
            production(moniker, "Chimie", Some("BT"), 0.25),
        ]
        .concat(),
        ..LayerTables::default()
    };
    let mut row = option_row(moniker, "WP KH", "Khouribga", 100.0);
    row.process = Some("flotation".into());

    build(LayerKind::Beneficiation, row, tables, &RawMaterials::default())
}

fn demo_model(name: &str) -> Model {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("demos")
        .join(name);
    Model::from_path(path).unwrap()
}

/// The smallest complete chain: one option per layer
#[fixture]
pub fn simple_model() -> Model {
    demo_model("simple")
}

/// A chain with extensions, unnamed options and an explicit network
#[fixture]
pub fn extended_model() -> Model {
    demo_model("extended")
}

/// Monikers from string slices
pub fn monikers(values: &[&str]) -> Vec<Moniker> {
    values.iter().map(|&value| value.into()).collect()
}
