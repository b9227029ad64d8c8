//! Code for reading the four tables describing the facility options of one layer.
use super::conversion::{UnitConversion, UnitValue, read_csv_with_units};
use super::*;
use crate::entity::{LayerKind, Status};
use crate::id::{ItemID, Moniker};
use crate::market::ProductType;
use serde::Deserialize;

/// The main input recorded for rows which leave the `input` column blank
pub const ANY_INPUT: &str = "All";

/// One facility option, as read from `<layer>_options.csv`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OptionRow {
    /// Unique identifier of the option
    pub moniker: Moniker,
    /// Human-readable name. For unnamed `New` options this is the number of replicas.
    pub name: String,
    /// Site of the facility
    pub location: String,
    /// Production process
    #[serde(default)]
    pub process: Option<String>,
    /// Lifecycle status
    pub status: Status,
    /// Nominal capacity per year
    pub capacity: f64,
    /// Unit of `capacity`
    pub unit: String,
    /// First year of operation (blank for no bound)
    #[serde(default)]
    pub starting_date: Option<u32>,
    /// Year in which the facility closes (blank for no bound)
    #[serde(default)]
    pub closing_date: Option<u32>,
    /// Extraction method (mines)
    #[serde(default)]
    pub extraction: Option<String>,
    /// The phosphoric acid unit an existing sulfuric acid unit is tied to
    #[serde(default)]
    pub associated_pap: Option<Moniker>,
    /// Country or region where a granulation unit produces
    #[serde(default)]
    pub production_site: Option<String>,
    /// `/`-separated list of granulated products
    #[serde(default)]
    pub products: Option<String>,
    /// Granulation type
    #[serde(default)]
    pub granulation_type: Option<String>,
    /// Departure location of a logistics link
    #[serde(default)]
    pub upstream: Option<String>,
    /// Arrival location of a logistics link
    #[serde(default)]
    pub downstream: Option<String>,
    /// Transport method of a logistics link
    #[serde(default)]
    pub method: Option<String>,
    /// Class of product carried by a logistics link
    #[serde(default)]
    pub product: Option<ProductType>,
    /// Which pair of layers a logistics link connects (e.g. `WP2WP`)
    #[serde(default)]
    pub layer_to_layer: Option<String>,
    /// Location of the phosphoric acid plant a train link serves
    #[serde(default)]
    pub pap_location: Option<String>,
}

impl UnitValue for OptionRow {
    fn unit(&self) -> &str {
        &self.unit
    }

    fn convert(&mut self, rate: f64, uniform_unit: &str) {
        self.capacity *= rate;
        self.unit = uniform_unit.to_string();
    }
}

/// A specific consumption (or direct opex when `item` is `Total`) for one year
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConsumptionRow {
    /// Option the row applies to
    pub moniker: Moniker,
    /// The product being made
    pub product: ItemID,
    /// The main input the consumption is specific to
    #[serde(default)]
    pub input: Option<ItemID>,
    /// The item consumed
    pub item: ItemID,
    /// Unit of `value`
    pub unit: String,
    /// Year
    pub year: u32,
    /// Quantity consumed per unit of product
    pub value: f64,
}

impl ConsumptionRow {
    /// The main input, defaulting to [`ANY_INPUT`]
    pub fn input(&self) -> ItemID {
        self.input.clone().unwrap_or_else(|| ANY_INPUT.into())
    }

    /// Whether this row gives a total opex per unit rather than a consumption
    pub fn is_total(&self) -> bool {
        unicase::eq(self.item.as_str(), TOTAL_ITEM)
    }
}

impl UnitValue for ConsumptionRow {
    fn unit(&self) -> &str {
        &self.unit
    }

    fn convert(&mut self, rate: f64, uniform_unit: &str) {
        self.value *= rate;
        self.unit = uniform_unit.to_string();
    }
}

/// A specific production (composition, yield, co-product ratio or granulation ratio) for one year
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProductionRow {
    /// Option the row applies to
    pub moniker: Moniker,
    /// The product (or rock quality for mines)
    pub product: ItemID,
    /// The main input the value is specific to
    #[serde(default)]
    pub input: Option<ItemID>,
    /// Unit of `value`
    pub unit: String,
    /// Year
    pub year: u32,
    /// The value
    pub value: f64,
}

impl ProductionRow {
    /// The main input, defaulting to [`ANY_INPUT`]
    pub fn input(&self) -> ItemID {
        self.input.clone().unwrap_or_else(|| ANY_INPUT.into())
    }
}

impl UnitValue for ProductionRow {
    fn unit(&self) -> &str {
        &self.unit
    }

    fn convert(&mut self, rate: f64, uniform_unit: &str) {
        self.value *= rate;
        self.unit = uniform_unit.to_string();
    }
}

/// One line of a capital expenditure schedule
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CapexRow {
    /// Option the row applies to
    pub moniker: Moniker,
    /// Capex item (`Total` overrides the other items)
    pub item: String,
    /// Unit of `amount`
    pub unit: String,
    /// Total amount for the item
    pub amount: f64,
    /// Years after the start of production at which the expense falls
    pub offset: u32,
    /// Share of `amount` spent at `offset` (blank means nothing is spent)
    #[serde(default)]
    pub share: Option<f64>,
}

impl CapexRow {
    /// The expense at this row's offset
    pub fn expense(&self) -> f64 {
        self.amount * self.share.unwrap_or(0.0)
    }

    /// Whether this row gives the total capex
    pub fn is_total(&self) -> bool {
        unicase::eq(self.item.as_str(), TOTAL_ITEM)
    }
}

impl UnitValue for CapexRow {
    fn unit(&self) -> &str {
        &self.unit
    }

    fn convert(&mut self, rate: f64, uniform_unit: &str) {
        self.amount *= rate;
        self.unit = uniform_unit.to_string();
    }
}

/// The item name marking a row as a total rather than a breakdown
pub const TOTAL_ITEM: &str = "Total";

/// The input tables for the options of one layer
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LayerTables {
    /// One row per option
    pub options: Vec<OptionRow>,
    /// Specific consumptions and direct opex
    pub consumption: Vec<ConsumptionRow>,
    /// Specific productions
    pub production: Vec<ProductionRow>,
    /// Capex schedules
    pub capex: Vec<CapexRow>,
}

impl LayerTables {
    /// Consumption rows for one option
    pub fn consumption_for<'a>(
        &'a self,
        moniker: &'a Moniker,
    ) -> impl Iterator<Item = &'a ConsumptionRow> {
        self.consumption.iter().filter(move |row| &row.moniker == moniker)
    }

    /// Production rows for one option
    pub fn production_for<'a>(
        &'a self,
        moniker: &'a Moniker,
    ) -> impl Iterator<Item = &'a ProductionRow> {
        self.production.iter().filter(move |row| &row.moniker == moniker)
    }

    /// Capex rows for one option
    pub fn capex_for<'a>(&'a self, moniker: &'a Moniker) -> impl Iterator<Item = &'a CapexRow> {
        self.capex.iter().filter(move |row| &row.moniker == moniker)
    }
}

/// Read the options, consumption, production and capex tables for one layer.
///
/// Options and consumption tables are required for every layer except logistics, which may be
/// absent altogether. Capex tables are always optional.
pub fn read_layer_tables(
    model_dir: &Path,
    kind: LayerKind,
    conversion: &UnitConversion,
) -> Result<LayerTables> {
    let path_for = |table: &str| model_dir.join(format!("{kind}_{table}.csv"));
    let required = kind != LayerKind::Logistics;

    let options_path = path_for("options");
    let options: Vec<OptionRow> = read_csv_with_units(&options_path, conversion)?;
    if required {
        ensure!(
            !options.is_empty(),
            "No options found for layer {kind} in {}",
            options_path.display()
        );
    }

    let consumption_path = path_for("consumption");
    let consumption: Vec<ConsumptionRow> = read_csv_with_units(&consumption_path, conversion)?;
    if required {
        ensure!(
            !consumption.is_empty(),
            "No specific consumptions found for layer {kind} in {}",
            consumption_path.display()
        );
    }

    let tables = LayerTables {
        options,
        consumption,
        production: read_csv_with_units(&path_for("production"), conversion)?,
        capex: read_csv_with_units(&path_for("capex"), conversion)?,
    };
    check_rows_refer_to_options(&tables)
        .with_context(|| format!("Invalid tables for layer {kind}"))?;

    Ok(tables)
}

/// Check that every consumption, production and capex row refers to a known option
fn check_rows_refer_to_options(tables: &LayerTables) -> Result<()> {
    let monikers: HashSet<_> = tables.options.iter().map(|row| &row.moniker).collect();
    let referenced = tables
        .consumption
        .iter()
        .map(|row| &row.moniker)
        .chain(tables.production.iter().map(|row| &row.moniker))
        .chain(tables.capex.iter().map(|row| &row.moniker));
    for moniker in referenced {
        ensure!(
            monikers.contains(moniker),
            "Row refers to unknown option {moniker}"
        );
    }

    Ok(())
}
