//! Sensitivity of a fixed scenario to raw material prices, by bump and reprice.
use crate::id::{ItemID, Moniker};
use crate::market::RawMaterials;
use crate::model::Model;
use crate::output::CollectedResults;
use crate::scenario::{Scenario, Specific};
use crate::simulation::{SimulateOptions, Simulator};
use crate::worker::LogMonitor;
use anyhow::{Context, Result};
use indexmap::IndexMap;
use itertools::Itertools;
use log::info;

/// One saved scenario, valued against a registry holding only its entities
struct FixedScenario<'a> {
    simulator: Simulator<'a>,
    generator: Specific,
    options: SimulateOptions,
}

impl<'a> FixedScenario<'a> {
    /// Rebuild the scenario from the monikers of a global record
    fn new(model: &'a Model, scenario: &[Vec<Moniker>], logistics_lp: bool) -> Result<Self> {
        let filter = scenario.iter().flatten().cloned().collect_vec();
        let simulator = Simulator::new(model, Some(&filter))?;
        let generator = Specific(vec![Scenario::from_monikers(
            simulator.registry(),
            scenario,
        )?]);
        let options = SimulateOptions {
            granulation: scenario.first().cloned(),
            logistics_lp,
            ..SimulateOptions::default()
        };

        Ok(Self {
            simulator,
            generator,
            options,
        })
    }

    /// The cost PV of the scenario at the current prices
    fn cost(&mut self) -> Result<f64> {
        let mut results = CollectedResults::default();
        self.simulator
            .simulate(&self.generator, &self.options, &mut results, &mut LogMonitor)?;
        results
            .globals()
            .next()
            .map(|global| global.cost_pv)
            .context("The scenario could not be priced")
    }

    fn reprice(&mut self, raw_materials: &RawMaterials) {
        self.simulator.reprice(raw_materials);
    }
}

/// The cost delta of a scenario for each shocked raw material.
///
/// `scenario` lists monikers as saved in a global record: the granulation tuple, then one list
/// per scenario layer. Only that granulation tuple is valued. The scenario is priced once with
/// the model prices, then once per shock with only that item's price moved by the shock. Items
/// which are not raw materials of the model get a zero delta.
pub fn compute_delta(
    model: &Model,
    scenario: &[Vec<Moniker>],
    shocks: &IndexMap<ItemID, f64>,
    logistics_lp: bool,
) -> Result<IndexMap<ItemID, f64>> {
    let mut fixed = FixedScenario::new(model, scenario, logistics_lp)?;
    let base = fixed.cost()?;
    info!("Base cost of the scenario: {base}");

    let mut deltas = IndexMap::new();
    for (item, &shock) in shocks {
        let mut shocked = model.raw_materials.clone();
        if !shocked.bump(item.as_str(), shock) {
            deltas.insert(item.clone(), 0.0);
            continue;
        }

        fixed.reprice(&shocked);
        let delta = fixed.cost()? - base;
        fixed.reprice(&model.raw_materials);
        deltas.insert(item.clone(), delta);
    }

    Ok(deltas)
}

/// The same shock for every raw material of the model
pub fn uniform_shocks(model: &Model, shock: f64) -> IndexMap<ItemID, f64> {
    model
        .raw_materials
        .items()
        .map(|item| (item.clone(), shock))
        .collect()
}
