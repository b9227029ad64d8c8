//! Functionality for valuing scenarios.
//!
//! A valuation pass solves the granulation problem for every granulation tuple, then pulls the
//! resulting demand upstream through every scenario and prices the entities which produced
//! something. The registry is snapshotted once a tuple is solved and restored after every
//! scenario, then reset before the next tuple, so one registry serves the whole pass.
use crate::entity::{EntityId, EntityRegistry, LayerKind, NodeRef, Status};
use crate::id::Moniker;
use crate::market::{ProductType, RawMaterials, SalesPlan};
use crate::model::{GeneratorKind, Model};
use crate::optimisation::granulation::{self, GranulationTuple, granulation_tuples, is_domestic};
use crate::optimisation::logistics;
use crate::output::{COST_UNIT, DetailRecord, GlobalRecord, ResultSink};
use crate::scenario::{FromOptions, FromPaths, Scenario, ScenarioGenerator};
use crate::series::Series;
use crate::worker::{Progress, ProgressMonitor};
use anyhow::Result;
use indexmap::IndexSet;
use itertools::Itertools;
use log::{debug, info, warn};

pub mod flow;
use flow::{flow_upstream, rebalance};

/// Options of one valuation pass
#[derive(Debug, Clone, PartialEq)]
pub struct SimulateOptions {
    /// Number of phases the scenarios are split into
    pub cycle: usize,
    /// The phase to evaluate: scenarios whose ordinal modulo `cycle` equals `phase`
    pub phase: usize,
    /// Stop once this many scenarios have been considered
    pub counter_limit: Option<usize>,
    /// Only evaluate the scenarios with these ordinals
    pub scenarios_filter: Option<IndexSet<usize>>,
    /// Only evaluate the granulation tuple made of exactly these units
    pub granulation: Option<Vec<Moniker>>,
    /// Route volumes with the logistics problem after each scenario
    pub logistics_lp: bool,
    /// Number of scenarios between two progress snapshots
    pub progress_step: usize,
}

impl Default for SimulateOptions {
    fn default() -> Self {
        Self {
            cycle: 1,
            phase: 0,
            counter_limit: None,
            scenarios_filter: None,
            granulation: None,
            logistics_lp: false,
            progress_step: 1,
        }
    }
}

/// Counts from a valuation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SimulationSummary {
    /// Number of scenarios considered, including skipped ones
    pub counter: usize,
    /// Number of scenarios priced and saved
    pub saved: usize,
}

/// Values scenarios against the entities of one model
pub struct Simulator<'a> {
    model: &'a Model,
    registry: EntityRegistry,
}

impl<'a> Simulator<'a> {
    /// Build the entities of `model`, optionally keeping only the listed monikers
    pub fn new(model: &'a Model, filter: Option<&[Moniker]>) -> Result<Self> {
        let registry = EntityRegistry::build(model, filter)?;
        debug!(
            "Built {} entities and {} mine-beneficiation threads",
            registry.entity_ids().count(),
            registry.combo_ids().count()
        );

        Ok(Self { model, registry })
    }

    /// The entities being valued
    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    /// The scenario generator configured for the model
    pub fn generator(&self) -> Result<Box<dyn ScenarioGenerator>> {
        let generator: Box<dyn ScenarioGenerator> = match self.model.parameters.scenario_generator
        {
            GeneratorKind::FromOptions => Box::new(FromOptions::new(self.model, &self.registry)),
            GeneratorKind::FromPaths => Box::new(FromPaths::new(self.model, &self.registry)?),
        };

        Ok(generator)
    }

    /// Recompute every opex from new raw material prices
    pub fn reprice(&mut self, raw_materials: &RawMaterials) {
        self.registry.reprice(raw_materials);
    }

    /// Value the scenarios of `generator` against every granulation tuple.
    ///
    /// Scenario ordinals run over tuples and scenarios, starting at 1. A tuple whose granulation
    /// problem is infeasible skips all of its scenarios. A scenario whose logistics problem is
    /// infeasible is skipped.
    pub fn simulate(
        &mut self,
        generator: &dyn ScenarioGenerator,
        options: &SimulateOptions,
        sink: &mut dyn ResultSink,
        monitor: &mut dyn ProgressMonitor,
    ) -> Result<SimulationSummary> {
        let model = self.model;
        let tuples = granulation_tuples(&self.registry, &model.sales_plan, &model.parameters)
            .into_iter()
            .filter(|tuple| {
                options
                    .granulation
                    .as_deref()
                    .is_none_or(|monikers| self.has_units(tuple, monikers))
            })
            .collect_vec();
        let scenarios_len = generator.len();
        let total = tuples.len() * scenarios_len;
        info!(
            "Valuing {total} scenarios ({} granulation tuples) in phase {} of {}",
            tuples.len(),
            options.phase,
            options.cycle
        );

        let mut filter = options.scenarios_filter.clone();
        let mut summary = SimulationSummary::default();
        let mut scenario_counter = 0;
        for (index, tuple) in tuples.iter().enumerate() {
            if options
                .counter_limit
                .is_some_and(|limit| summary.counter > limit)
            {
                break;
            }

            let Some(granulation) = self.value_tuple(tuple, index)? else {
                summary.counter += scenarios_len;
                monitor.report(options.phase, Progress::new(summary.counter, total));
                continue;
            };
            let granulated = self.registry.snapshot();

            for scenario in generator.scenarios() {
                summary.counter += 1;
                if let Some(filter) = filter.as_mut() {
                    if !filter.shift_remove(&summary.counter) {
                        continue;
                    }
                }
                scenario_counter += 1;
                if options
                    .counter_limit
                    .is_some_and(|limit| scenario_counter > limit)
                {
                    break;
                }
                if scenario_counter % options.progress_step.max(1) == 0
                    || summary.counter + options.phase >= total
                {
                    monitor.report(options.phase, Progress::new(summary.counter, total));
                }
                if scenario_counter % options.cycle != options.phase {
                    continue;
                }

                let valued =
                    self.value_scenario(&scenario, &granulation, summary.counter, options)?;
                self.registry.restore(&granulated);
                let Some((cost_pv, details)) = valued else {
                    continue;
                };

                let mut moniker = vec![granulation.monikers.clone()];
                moniker.extend(scenario.monikers(&self.registry));
                let global = GlobalRecord {
                    scenario: summary.counter,
                    cost_pv: granulation.cost_pv + cost_pv,
                    unit: COST_UNIT.into(),
                    moniker,
                };
                let mut all_details = granulation.details.clone();
                all_details.extend(details);
                sink.save(global, all_details)?;
                summary.saved += 1;
            }

            self.registry.reset_all();
        }

        sink.close()?;
        info!(
            "Phase {}: {} of {} scenarios saved",
            options.phase, summary.saved, summary.counter
        );

        Ok(summary)
    }

    /// Solve the granulation problem of a tuple and price its units.
    ///
    /// Returns `None` if the problem is infeasible.
    fn value_tuple(
        &mut self,
        tuple: &GranulationTuple,
        index: usize,
    ) -> Result<Option<TupleValuation>> {
        let model = self.model;
        let parameters = &model.parameters;
        let products = &parameters.products;
        let solution = match granulation::solve(&self.registry, tuple, parameters) {
            Ok(solution) => solution,
            Err(err) => {
                debug!("Granulation tuple {index} skipped: {err}");
                return Ok(None);
            }
        };
        granulation::write_results(&mut self.registry, &solution)?;

        let len = self.registry.timeline().len();
        let mut acid_needs = Series::zeros(len);
        let mut rock_needs = Series::zeros(len);
        for &id in &tuple.units {
            let unit = self.registry.get_mut(id);
            if !is_domestic(unit, parameters) {
                let capacity = unit.state.capacity.clone();
                unit.set_production(products.abroad_fertilizer.as_str(), capacity);
                continue;
            }

            for product in &unit.outputs {
                let Some(produced) = unit.production_of(product.as_str()) else {
                    continue;
                };
                if let Some(sc) = unit.specific(product.as_str(), products.phosphoric_acid.as_str())
                {
                    acid_needs += &(produced * sc);
                }
            }
            if let (Some(produced), Some(sc)) = (
                unit.production_of(products.tsp.as_str()),
                unit.specific(products.tsp.as_str(), products.rock.as_str()),
            ) {
                rock_needs += &(produced * sc);
            }
        }

        let timeline = self.registry.timeline().clone();
        let mut cost_pv = 0.0;
        let mut details = Vec::new();
        for &id in &tuple.units {
            let unit = self.registry.get_mut(id);
            unit.compute_metrics(&timeline, parameters.wacc);
            cost_pv += unit.state.cost_pv.value();
            details.push(DetailRecord::new(unit));
        }

        Ok(Some(TupleValuation {
            monikers: tuple
                .units
                .iter()
                .map(|&id| self.registry.get(id).moniker.clone())
                .collect(),
            sales_plan: tuple.sales_plan.clone(),
            acid_needs,
            rock_needs,
            cost_pv,
            details,
        }))
    }

    /// Pull the demand of a granulation tuple through `scenario` and price what was produced.
    ///
    /// Returns `None` if logistics are routed and the routing problem is infeasible. The entities
    /// of the scenario keep their state; the caller restores it.
    fn value_scenario(
        &mut self,
        scenario: &Scenario,
        granulation: &TupleValuation,
        counter: usize,
        options: &SimulateOptions,
    ) -> Result<Option<(f64, Vec<DetailRecord>)>> {
        let model = self.model;
        let parameters = &model.parameters;
        let products = &parameters.products;
        let layers = scenario.layers();

        for (product, entry) in granulation.sales_plan.iter() {
            if entry.product_type == ProductType::Fertilizer {
                continue;
            }
            let driver = if *product == products.phosphoric_acid {
                &entry.volume + &granulation.acid_needs
            } else {
                entry.volume.clone()
            };
            flow_upstream(
                &mut self.registry,
                products,
                product.as_str(),
                &driver,
                layers,
            );
        }
        flow_upstream(
            &mut self.registry,
            products,
            products.rock.as_str(),
            &granulation.rock_needs,
            layers,
        );
        rebalance(&mut self.registry, products, scenario.threads());

        let timeline = self.registry.timeline().clone();
        let producers: Vec<EntityId> = self
            .registry
            .entity_ids()
            .filter(|&id| {
                let entity = self.registry.get(id);
                entity.kind != LayerKind::Granulation && entity.has_produced()
            })
            .collect();
        let mut cost_pv = 0.0;
        let mut details = Vec::new();
        for id in producers {
            let entity = self.registry.get_mut(id);
            entity.compute_metrics(&timeline, parameters.wacc);
            cost_pv += entity.state.cost_pv.value();
            details.push(DetailRecord::new(entity));
        }

        let mut feasible = true;
        if options.logistics_lp {
            let links = logistics::available_links(&self.registry, self.pap_location(scenario));
            match logistics::solve(&self.registry, &links, &granulation.sales_plan, parameters) {
                Ok(solution) => {
                    for id in logistics::write_results(&mut self.registry, &solution)? {
                        let link = self.registry.get_mut(id);
                        link.compute_metrics(&timeline, parameters.wacc);
                        cost_pv += link.state.cost_pv.value();
                        details.push(DetailRecord::new(link));
                    }
                }
                Err(err) => {
                    warn!("Logistics solver failed for scenario {counter}: {err}");
                    feasible = false;
                }
            }
        }

        Ok(feasible.then_some((cost_pv, details)))
    }

    /// Whether the units of `tuple` are exactly those named by `monikers`
    fn has_units(&self, tuple: &GranulationTuple, monikers: &[Moniker]) -> bool {
        tuple.units.len() == monikers.len()
            && tuple
                .units
                .iter()
                .all(|&id| monikers.contains(&self.registry.get(id).moniker))
    }

    /// Where trains deliver rock: the first new phosphoric acid unit of the scenario, else the port
    fn pap_location(&self, scenario: &Scenario) -> &str {
        scenario
            .paps()
            .iter()
            .find_map(|&node| match node {
                NodeRef::Entity(id) if self.registry.get(id).status == Status::New => {
                    Some(self.registry.get(id).location.as_str())
                }
                _ => None,
            })
            .unwrap_or(self.model.parameters.port_location.as_str())
    }
}

/// What a solved granulation tuple passes on to every scenario
struct TupleValuation {
    monikers: Vec<Moniker>,
    sales_plan: SalesPlan,
    acid_needs: Series,
    rock_needs: Series,
    cost_pv: f64,
    details: Vec<DetailRecord>,
}
