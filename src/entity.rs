//! Facility entities: the economic and physical description of one facility option, together with
//! the mutable state filled in while a scenario is valued.
use crate::finance::npv;
use crate::id::{ItemID, Moniker};
use crate::input::layer::{ANY_INPUT, LayerTables, OptionRow};
use crate::market::{ProductType, RawMaterials};
use crate::model::ProductNames;
use crate::series::Series;
use crate::units::{Dimensionless, Money};
use crate::year::Timeline;
use anyhow::{Context, Result, ensure};
use indexmap::IndexMap;
use serde::Deserialize;
use serde_string_enum::DeserializeLabeledStringEnum;
use std::collections::BTreeMap;

pub mod combo;
pub mod registry;
pub use combo::ComboNode;
pub use registry::{ComboId, EntityId, EntityRegistry, NodeRef, RegistrySnapshot};

/// The kind of facility held by a layer, in chain order
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Deserialize,
    strum::Display,
    strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LayerKind {
    /// Extraction of raw rock
    Mine,
    /// Washing and flotation of raw rock into merchant rock qualities
    Beneficiation,
    /// Sulfuric acid production
    Sap,
    /// Phosphoric acid production
    Pap,
    /// Fertilizer granulation
    Granulation,
    /// Transport links between sites
    Logistics,
    /// Synthetic layer pairing mines with beneficiation plants
    MineBeneficiation,
}

impl LayerKind {
    /// Whether options for this layer are read from input files
    pub fn has_input_tables(self) -> bool {
        self != LayerKind::MineBeneficiation
    }

    /// Whether `New` options in this layer are unnamed, i.e. replicated from a count
    pub fn is_unnamed(self) -> bool {
        matches!(
            self,
            LayerKind::Sap | LayerKind::Pap | LayerKind::Granulation
        )
    }

    /// Whether this layer takes part in the scenarios enumerated downstream of granulation
    pub fn is_scenario_layer(self) -> bool {
        matches!(
            self,
            LayerKind::Sap | LayerKind::Pap | LayerKind::MineBeneficiation
        )
    }
}

/// Lifecycle status of a facility option
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, DeserializeLabeledStringEnum, strum::Display)]
pub enum Status {
    /// Operating today
    #[string = "Existing"]
    Existing,
    /// A possible new facility
    #[string = "New"]
    New,
    /// A capacity extension of another facility
    #[string = "Extension"]
    Extension,
}

/// Kind-specific attributes copied from the options row
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OptionDetails {
    /// The phosphoric acid unit an existing sulfuric acid unit is tied to
    pub associated_pap: Option<Moniker>,
    /// Where a granulation unit produces
    pub production_site: Option<String>,
    /// Granulation type
    pub granulation_type: Option<String>,
    /// Departure location of a logistics link
    pub upstream: Option<String>,
    /// Arrival location of a logistics link
    pub downstream: Option<String>,
    /// Transport method of a logistics link
    pub method: Option<String>,
    /// Class of product carried by a logistics link
    pub product: Option<ProductType>,
    /// Which pair of layers a logistics link connects
    pub layer_to_layer: Option<String>,
    /// Location of the phosphoric acid plant served by a train link
    pub pap_location: Option<String>,
}

impl OptionDetails {
    fn from_row(row: &OptionRow) -> Self {
        Self {
            associated_pap: row.associated_pap.clone(),
            production_site: row.production_site.clone(),
            granulation_type: row.granulation_type.clone(),
            upstream: row.upstream.clone(),
            downstream: row.downstream.clone(),
            method: row.method.clone(),
            product: row.product,
            layer_to_layer: row.layer_to_layer.clone(),
            pap_location: row.pap_location.clone(),
        }
    }
}

/// Identifies one replica of an unnamed `New` option
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Replica {
    /// Shared by every replica of the same option within a layer
    pub signature: usize,
    /// 1-based index of this replica
    pub index: usize,
}

/// Specific consumptions: product → main input → item → series
pub type ConsumptionTable = IndexMap<ItemID, IndexMap<ItemID, IndexMap<ItemID, Series>>>;

/// Series keyed by product then main input
pub type ProductInputTable = IndexMap<ItemID, IndexMap<ItemID, Series>>;

/// The values of an entity which change while a scenario is valued
#[derive(Debug, Clone, PartialEq)]
pub struct EntityState {
    /// Capacity left to allocate, per year
    pub capacity: Series,
    /// Consumed volume per item
    pub consumption: IndexMap<ItemID, Series>,
    /// Produced volume per product
    pub production: IndexMap<ItemID, Series>,
    /// Operating expenses per year
    pub total_opex: Series,
    /// Capital expenses per year, aligned with the first year of operation
    pub total_capex: Series,
    /// Present value of opex and capex
    pub cost_pv: Money,
}

/// A facility option
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    /// Unique identifier
    pub moniker: Moniker,
    /// Human-readable name. Replicas are named `{location}/{capacity}/NEW{index}`.
    pub name: String,
    /// The layer the entity belongs to
    pub kind: LayerKind,
    /// Lifecycle status
    pub status: Status,
    /// Site of the facility
    pub location: String,
    /// Production process
    pub process: Option<String>,
    /// Capacity per year when open
    pub nominal_capacity: f64,
    /// First year of operation
    pub starting_date: Option<u32>,
    /// Year in which the facility closes
    pub closing_date: Option<u32>,
    /// Kind-specific attributes
    pub details: OptionDetails,
    /// The input which drives upstream flow, or [`ANY_INPUT`]
    pub main_input: ItemID,
    /// Products the entity can produce
    pub outputs: Vec<ItemID>,
    /// Consumed items, excluding direct totals
    pub inputs: Vec<ItemID>,
    /// The product whose volume drives secondary products
    pub main_product: Option<ItemID>,
    /// Products whose volume follows the main product
    pub secondary_products: Vec<ItemID>,
    /// Specific consumption per product, main input and item
    pub specific_consumption: ConsumptionTable,
    /// Specific production per product and input (composition, yield or ratio depending on kind)
    pub specific_production: ProductInputTable,
    /// Directly given opex per unit
    pub direct_opex: ProductInputTable,
    /// Opex per unit of product, per main input
    pub opex: ProductInputTable,
    /// Capex amount per offset from the first year of operation
    pub capex: BTreeMap<u32, f64>,
    /// Pre-extension counterpart of an `Extension`
    pub base_entity: Option<EntityId>,
    /// Set for replicas of unnamed options
    pub replica: Option<Replica>,
    zero_state: EntityState,
    /// Mutable valuation state
    pub state: EntityState,
}

impl Entity {
    /// Build an entity from its options row and the layer's tables
    pub fn from_option(
        kind: LayerKind,
        row: &OptionRow,
        tables: &LayerTables,
        timeline: &Timeline,
        raw_materials: &RawMaterials,
        products: &ProductNames,
    ) -> Result<Self> {
        let moniker = &row.moniker;
        let mut consumption_values: IndexMap<(ItemID, ItemID, ItemID), Vec<(u32, f64)>> =
            IndexMap::new();
        let mut direct_values: IndexMap<(ItemID, ItemID), Vec<(u32, f64)>> = IndexMap::new();
        for c in tables.consumption_for(moniker) {
            if c.is_total() {
                direct_values
                    .entry((c.product.clone(), c.input()))
                    .or_default()
                    .push((c.year, c.value));
            } else {
                consumption_values
                    .entry((c.product.clone(), c.input(), c.item.clone()))
                    .or_default()
                    .push((c.year, c.value));
            }
        }

        let mut specific_consumption = ConsumptionTable::new();
        let mut inputs: Vec<ItemID> = Vec::new();
        for ((product, input, item), values) in consumption_values {
            if !inputs.contains(&item) {
                inputs.push(item.clone());
            }
            specific_consumption
                .entry(product)
                .or_default()
                .entry(input)
                .or_default()
                .insert(item, timeline.series_from(values));
        }

        let mut direct_opex = ProductInputTable::new();
        for ((product, input), values) in direct_values {
            direct_opex
                .entry(product)
                .or_default()
                .insert(input, timeline.series_from(values));
        }

        let mut production_values: IndexMap<(ItemID, ItemID), Vec<(u32, f64)>> = IndexMap::new();
        for p in tables.production_for(moniker) {
            production_values
                .entry((p.product.clone(), p.input()))
                .or_default()
                .push((p.year, p.value));
        }
        let mut specific_production = ProductInputTable::new();
        for ((product, input), values) in production_values {
            specific_production
                .entry(product)
                .or_default()
                .insert(input, timeline.series_from(values));
        }

        let capex = capex_schedule(tables, moniker);
        let (main_input, outputs, main_product) =
            flow_keys(kind, row, &specific_production, products)
                .with_context(|| format!("Cannot determine the products of {moniker}"))?;
        let secondary_products = match &main_product {
            Some(main) => outputs.iter().filter(|o| *o != main).cloned().collect(),
            None => Vec::new(),
        };

        let capacity = timeline.capacity_schedule(
            row.capacity,
            row.starting_date,
            row.closing_date,
        );
        let zero_state = EntityState {
            capacity,
            consumption: inputs
                .iter()
                .map(|item| (item.clone(), timeline.zeros()))
                .collect(),
            production: outputs
                .iter()
                .map(|product| (product.clone(), timeline.zeros()))
                .collect(),
            total_opex: timeline.zeros(),
            total_capex: timeline.zeros(),
            cost_pv: Money(0.0),
        };

        let mut entity = Self {
            moniker: moniker.clone(),
            name: row.name.clone(),
            kind,
            status: row.status,
            location: row.location.clone(),
            process: row.process.clone(),
            nominal_capacity: row.capacity,
            starting_date: row.starting_date,
            closing_date: row.closing_date,
            details: OptionDetails::from_row(row),
            main_input,
            outputs,
            inputs,
            main_product,
            secondary_products,
            specific_consumption,
            specific_production,
            direct_opex,
            opex: ProductInputTable::new(),
            capex,
            base_entity: None,
            replica: None,
            state: zero_state.clone(),
            zero_state,
        };
        entity.update_opex(raw_materials, timeline);

        Ok(entity)
    }

    /// Make this entity the replica `index` of an unnamed option
    pub fn into_replica(mut self, signature: usize, index: usize) -> Self {
        self.name = format!("{}/{}/NEW{index}", self.location, self.nominal_capacity);
        self.moniker = self.moniker.with_token(3, &format!("NEW{index}"));
        self.replica = Some(Replica { signature, index });
        self
    }

    /// Recompute opex per unit from raw material prices.
    ///
    /// A direct total takes precedence. Otherwise opex is the sum over items of specific
    /// consumption times price, where unpriced items cost nothing.
    pub fn update_opex(&mut self, raw_materials: &RawMaterials, timeline: &Timeline) {
        let mut opex = ProductInputTable::new();
        for (product, by_input) in &self.specific_consumption {
            for (input, items) in by_input {
                let mut total = timeline.zeros();
                for (item, sc) in items {
                    if let Some(price) = raw_materials.price(item.as_str()) {
                        total += &(sc * price);
                    }
                }
                opex.entry(product.clone())
                    .or_default()
                    .insert(input.clone(), total);
            }
        }
        for (product, by_input) in &self.direct_opex {
            for (input, total) in by_input {
                opex.entry(product.clone())
                    .or_default()
                    .insert(input.clone(), total.clone());
            }
        }

        self.opex = opex;
    }

    /// Specific consumptions of `product` for the main input, falling back to [`ANY_INPUT`]
    pub fn consumption_of(&self, product: &str) -> Option<&IndexMap<ItemID, Series>> {
        let by_input = self.specific_consumption.get(product)?;
        by_input
            .get(&self.main_input)
            .or_else(|| by_input.get(ANY_INPUT))
    }

    /// Specific consumption of `item` per unit of `product`
    pub fn specific(&self, product: &str, item: &str) -> Option<&Series> {
        self.consumption_of(product)?.get(item)
    }

    /// Opex per unit of `product` for the main input, falling back to [`ANY_INPUT`]
    pub fn opex_of(&self, product: &str) -> Option<&Series> {
        let by_input = self.opex.get(product)?;
        by_input
            .get(&self.main_input)
            .or_else(|| by_input.get(ANY_INPUT))
    }

    /// The first specific production series of `product`, whatever its input
    pub fn ratio_of(&self, product: &str) -> Option<&Series> {
        self.specific_production.get(product)?.values().next()
    }

    /// Whether the entity can produce `product`
    pub fn produces(&self, product: &str) -> bool {
        self.outputs.iter().any(|output| output.as_str() == product)
    }

    /// Produced volume of `product`
    pub fn production_of(&self, product: &str) -> Option<&Series> {
        self.state.production.get(product)
    }

    /// Add `volume` to the production of `product`
    pub fn add_production(&mut self, product: &str, volume: &Series) {
        if let Some(production) = self.state.production.get_mut(product) {
            *production += volume;
        }
    }

    /// Replace the production of `product`
    pub fn set_production(&mut self, product: &str, volume: Series) {
        if let Some(production) = self.state.production.get_mut(product) {
            *production = volume;
        }
    }

    /// Whether any product has a positive volume in any year
    pub fn has_produced(&self) -> bool {
        self.state.production.values().any(Series::any_positive)
    }

    /// Capacity schedule before any allocation
    pub fn initial_capacity(&self) -> &Series {
        &self.zero_state.capacity
    }

    /// Copy of the mutable state
    pub fn snapshot(&self) -> EntityState {
        self.state.clone()
    }

    /// Reapply a state taken with [`Entity::snapshot`]
    pub fn restore(&mut self, state: &EntityState) {
        self.state.clone_from(state);
    }

    /// Return the mutable state to its initial values
    pub fn reset(&mut self) {
        self.state.clone_from(&self.zero_state);
    }

    /// Compute balances, opex, capex and cost PV once production has been allocated.
    ///
    /// Input balances and opex of mines and beneficiation plants are filled in when production is
    /// rebalanced across a mine-beneficiation thread, so they are not recomputed here.
    pub fn compute_metrics(&mut self, timeline: &Timeline, wacc: Dimensionless) {
        if !matches!(self.kind, LayerKind::Mine | LayerKind::Beneficiation) {
            self.compute_input_balances();
            self.compute_total_opex();
        }
        self.compute_secondary_production();
        self.compute_total_capex(timeline);
        let expenses = &self.state.total_opex + &self.state.total_capex;
        self.state.cost_pv = npv(wacc, timeline, &expenses);
    }

    fn compute_input_balances(&mut self) {
        for (product, by_input) in &self.specific_consumption {
            let Some(items) = by_input
                .get(&self.main_input)
                .or_else(|| by_input.get(ANY_INPUT))
            else {
                continue;
            };
            let Some(produced) = self.state.production.get(product) else {
                continue;
            };
            for (item, sc) in items {
                if let Some(consumed) = self.state.consumption.get_mut(item) {
                    *consumed += &(produced * sc);
                }
            }
        }
    }

    fn compute_total_opex(&mut self) {
        for (product, by_input) in &self.opex {
            let Some(opex) = by_input
                .get(&self.main_input)
                .or_else(|| by_input.get(ANY_INPUT))
            else {
                continue;
            };
            if let Some(produced) = self.state.production.get(product) {
                self.state.total_opex += &(produced * opex);
            }
        }
    }

    fn compute_secondary_production(&mut self) {
        let Some(main) = &self.main_product else {
            return;
        };
        let Some(main_volume) = self.state.production.get(main).cloned() else {
            return;
        };
        for product in &self.secondary_products {
            let Some(ratio) = self
                .specific_production
                .get(product)
                .and_then(|by_input| by_input.values().next())
            else {
                continue;
            };
            if let Some(production) = self.state.production.get_mut(product) {
                *production = &main_volume * ratio;
            }
        }
    }

    /// Shift the capex schedule to the first year with positive opex. An entity which never
    /// operates has no capex.
    fn compute_total_capex(&mut self, timeline: &Timeline) {
        self.state.total_capex = self.capex_from(timeline, self.state.total_opex.first_positive());
    }

    /// The capex schedule starting at timeline position `start`, dropping anything which falls
    /// outside the timeline
    pub fn capex_from(&self, timeline: &Timeline, start: Option<usize>) -> Series {
        let mut total = timeline.zeros();
        if let Some(start) = start {
            let start_year = timeline.years()[start];
            for (&offset, &amount) in &self.capex {
                if let Some(idx) = timeline.index_of(start_year + offset) {
                    total[idx] += amount;
                }
            }
        }

        total
    }
}

/// Capex amount per offset. Items named `Total` take precedence over the breakdown.
fn capex_schedule(tables: &LayerTables, moniker: &Moniker) -> BTreeMap<u32, f64> {
    let has_total = tables.capex_for(moniker).any(|row| row.is_total());
    let mut capex = BTreeMap::new();
    for row in tables
        .capex_for(moniker)
        .filter(|row| row.is_total() == has_total)
    {
        *capex.entry(row.offset).or_insert(0.0) += row.expense();
    }

    capex
}

/// Main input, production keys and main product of an entity, by kind
fn flow_keys(
    kind: LayerKind,
    row: &OptionRow,
    specific_production: &ProductInputTable,
    products: &ProductNames,
) -> Result<(ItemID, Vec<ItemID>, Option<ItemID>)> {
    let any_input = ItemID::new(ANY_INPUT);
    let produced: Vec<ItemID> = specific_production.keys().cloned().collect();
    let first_input = || {
        specific_production
            .values()
            .flat_map(IndexMap::keys)
            .next()
            .cloned()
            .unwrap_or_else(|| any_input.clone())
    };
    let with_main = |main: &ItemID| {
        let mut outputs = vec![main.clone()];
        outputs.extend(produced.iter().filter(|p| *p != main).cloned());
        outputs
    };

    let keys = match kind {
        LayerKind::Mine => (any_input.clone(), vec![products.raw_rock.clone()], None),
        LayerKind::Beneficiation => {
            ensure!(
                !produced.is_empty(),
                "Beneficiation plants need at least one yield"
            );
            (products.raw_rock.clone(), produced, None)
        }
        LayerKind::Sap => (
            any_input.clone(),
            with_main(&products.sulfuric_acid),
            Some(products.sulfuric_acid.clone()),
        ),
        LayerKind::Pap => (
            first_input(),
            with_main(&products.phosphoric_acid),
            Some(products.phosphoric_acid.clone()),
        ),
        LayerKind::Granulation => {
            let outputs: Vec<ItemID> = row
                .products
                .as_deref()
                .unwrap_or_default()
                .split('/')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(ItemID::from)
                .collect();
            ensure!(
                !outputs.is_empty(),
                "Granulation units must list the products they make"
            );
            (first_input(), outputs, None)
        }
        LayerKind::Logistics => {
            let product = row
                .product
                .context("Logistics links must name the class of product they carry")?;
            (any_input.clone(), vec![product.to_string().into()], None)
        }
        LayerKind::MineBeneficiation => {
            anyhow::bail!("Mine-beneficiation entities are not read from options")
        }
    };

    Ok(keys)
}
