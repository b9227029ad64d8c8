//! The granulation mix: which granulation units make which fertilizer, and which new domestic
//! units are built.
//!
//! One problem is solved per [`GranulationTuple`]. A tuple fixes the existing units, one group of
//! new domestic units and the abroad units assumed to run at full capacity. The fertilizer made
//! abroad is taken off the sales plan and the acid and DAP it needs are added to it.
use super::{Solution, VariableMap, VariableName, discounted, discounted_capex, minimise};
use crate::entity::{Entity, EntityId, EntityRegistry, LayerKind, Status};
use crate::error::InfeasibleError;
use crate::layer::cartesian_product;
use crate::market::{ProductType, SalesPlan};
use crate::model::ModelParameters;
use crate::series::Series;
use anyhow::{Context, Result};
use highs::RowProblem as Problem;
use indexmap::IndexMap;
use itertools::Itertools;

/// A choice of granulation units together with the sales plan they have to serve
#[derive(Debug, Clone, PartialEq)]
pub struct GranulationTuple {
    /// Existing units, then new domestic units, then abroad units
    pub units: Vec<EntityId>,
    /// The sales plan once abroad production is accounted for
    pub sales_plan: SalesPlan,
}

/// Whether a granulation unit produces at the domestic site. Units without a production site are
/// domestic.
pub fn is_domestic(unit: &Entity, parameters: &ModelParameters) -> bool {
    unit.details
        .production_site
        .as_deref()
        .is_none_or(|site| site == parameters.domestic_site)
}

/// Enumerate every granulation tuple.
///
/// Existing domestic units are grouped by closing date and new domestic units by location and
/// process. Each pair of groups is combined with every subset of the abroad units, the empty
/// subset included. A side without any group contributes a single empty group.
pub fn granulation_tuples(
    registry: &EntityRegistry,
    sales_plan: &SalesPlan,
    parameters: &ModelParameters,
) -> Vec<GranulationTuple> {
    let units = registry.layer(LayerKind::Granulation);
    let mut existing: IndexMap<Option<u32>, Vec<EntityId>> = IndexMap::new();
    let mut new: IndexMap<(&str, Option<&str>), Vec<EntityId>> = IndexMap::new();
    let mut abroad = Vec::new();
    for &id in units {
        let unit = registry.get(id);
        if !is_domestic(unit, parameters) {
            abroad.push(id);
            continue;
        }
        match unit.status {
            Status::Existing => existing.entry(unit.closing_date).or_default().push(id),
            Status::New => new
                .entry((unit.location.as_str(), unit.process.as_deref()))
                .or_default()
                .push(id),
            Status::Extension => {}
        }
    }

    let groups = |groups: Vec<Vec<EntityId>>| {
        if groups.is_empty() {
            vec![Vec::new()]
        } else {
            groups
        }
    };
    let domestic = cartesian_product(&[
        groups(existing.into_values().collect()),
        groups(new.into_values().collect()),
    ])
    .into_iter()
    .map(|pair| pair.concat())
    .collect_vec();

    let mut tuples = Vec::new();
    for size in 0..=abroad.len() {
        for subset in abroad.iter().copied().combinations(size) {
            let adjusted = abroad_sales_plan(registry, sales_plan, parameters, &subset);
            for units in &domestic {
                tuples.push(GranulationTuple {
                    units: [units.as_slice(), subset.as_slice()].concat(),
                    sales_plan: adjusted.clone(),
                });
            }
        }
    }

    tuples
}

/// The sales plan left once the abroad units make their fertilizer at full capacity
fn abroad_sales_plan(
    registry: &EntityRegistry,
    sales_plan: &SalesPlan,
    parameters: &ModelParameters,
    abroad: &[EntityId],
) -> SalesPlan {
    let products = &parameters.products;
    let fertilizer = products.abroad_fertilizer.as_str();
    let len = registry.timeline().len();
    let mut produced = Series::zeros(len);
    let mut acid = Series::zeros(len);
    let mut dap = Series::zeros(len);
    for &id in abroad {
        let unit = registry.get(id);
        let capacity = unit.initial_capacity();
        produced += capacity;
        if let Some(sc) = unit.specific(fertilizer, products.phosphoric_acid.as_str()) {
            acid += &(capacity * sc);
        }
        if let Some(sc) = unit.specific(fertilizer, products.dap.as_str()) {
            dap += &(capacity * sc);
        }
    }

    let mut adjusted = sales_plan.clone();
    adjusted.reduce(fertilizer, &produced);
    adjusted.adjust(products.phosphoric_acid.as_str(), &acid);
    adjusted.adjust(products.dap.as_str(), &dap);
    adjusted
}

/// Find the cheapest way for the domestic units of a tuple to meet its fertilizer demand.
///
/// Existing units may produce up to their capacity. New units must first be invested in, at most
/// once, and then produce up to the capacity of the investment year. When demand relaxation is
/// enabled, unmet demand is allowed at a penalty per unit.
pub fn solve(
    registry: &EntityRegistry,
    tuple: &GranulationTuple,
    parameters: &ModelParameters,
) -> Result<Solution, InfeasibleError> {
    let timeline = registry.timeline();
    let years = timeline.years();
    let wacc = parameters.wacc;
    let domestic = |status: Status| {
        tuple
            .units
            .iter()
            .copied()
            .filter(move |&id| {
                let unit = registry.get(id);
                unit.status == status && is_domestic(unit, parameters)
            })
            .collect_vec()
    };
    let existing = domestic(Status::Existing);
    let new = domestic(Status::New);
    let fertilizers = tuple
        .sales_plan
        .iter()
        .filter(|(_, entry)| entry.product_type == ProductType::Fertilizer)
        .collect_vec();

    let mut problem = Problem::default();
    let mut variables = VariableMap::default();
    let production_name = |id: EntityId, product: &str, year: u32| {
        let unit = registry.get(id);
        let moniker = unit.moniker.clone();
        let product = product.into();
        if unit.status == Status::New {
            VariableName::NewProd {
                moniker,
                product,
                year,
            }
        } else {
            VariableName::ExistingProd {
                moniker,
                product,
                year,
            }
        }
    };

    for &id in existing.iter().chain(&new) {
        let unit = registry.get(id);
        for product in &unit.outputs {
            let opex = unit.opex_of(product.as_str());
            for (i, &year) in years.iter().enumerate() {
                let cost = opex.map_or(0.0, |opex| discounted(opex[i], wacc, timeline, year));
                variables.add_continuous(
                    &mut problem,
                    production_name(id, product.as_str(), year),
                    cost,
                );
            }
        }
    }
    for &id in &new {
        let unit = registry.get(id);
        for &year in years {
            let name = VariableName::NewInvestment {
                moniker: unit.moniker.clone(),
                year,
            };
            let cost = discounted_capex(&unit.capex, wacc, timeline, year);
            variables.add_binary(&mut problem, name, cost);
        }
    }
    if parameters.relax_granulation_demand {
        for &year in years {
            for (product, _) in &fertilizers {
                let name = VariableName::Relax {
                    product: (*product).clone(),
                    year,
                };
                variables.add_continuous(&mut problem, name, parameters.relaxation_penalty);
            }
        }
    }

    // Demand
    for (i, &year) in years.iter().enumerate() {
        for (product, entry) in &fertilizers {
            let mut terms: Vec<_> = existing
                .iter()
                .chain(&new)
                .filter_map(|&id| variables.get(&production_name(id, product.as_str(), year)))
                .map(|var| (var, 1.0))
                .collect();
            let relax = VariableName::Relax {
                product: (*product).clone(),
                year,
            };
            if let Some(var) = variables.get(&relax) {
                terms.push((var, 1.0));
            }
            problem.add_row(entry.volume[i].., terms);
        }
    }

    // Capacity
    for &id in existing.iter().chain(&new) {
        let unit = registry.get(id);
        let capacity = unit.initial_capacity();
        for (i, &year) in years.iter().enumerate() {
            let mut terms = production_terms(&variables, unit, i, |product| {
                production_name(id, product, year)
            });
            if unit.status == Status::New {
                for (j, &investment_year) in years.iter().enumerate().take(i + 1) {
                    let name = VariableName::NewInvestment {
                        moniker: unit.moniker.clone(),
                        year: investment_year,
                    };
                    if let Some(var) = variables.get(&name) {
                        terms.push((var, -capacity[j]));
                    }
                }
                problem.add_row(..=0.0, terms);
            } else {
                problem.add_row(..=capacity[i], terms);
            }
        }
    }

    // A new unit is invested in at most once
    for &id in &new {
        let unit = registry.get(id);
        let terms = years
            .iter()
            .filter_map(|&year| {
                variables.get(&VariableName::NewInvestment {
                    moniker: unit.moniker.clone(),
                    year,
                })
            })
            .map(|var| (var, 1.0))
            .collect_vec();
        problem.add_row(..=1.0, terms);
    }

    minimise(problem, variables, "Granulation")
}

/// Production of every product of `unit` in year `i`, scaled by the inverse of its ratio. Products
/// with a zero or missing ratio take no capacity.
fn production_terms<F>(
    variables: &VariableMap,
    unit: &Entity,
    i: usize,
    name: F,
) -> Vec<(super::Variable, f64)>
where
    F: Fn(&str) -> VariableName,
{
    unit.outputs
        .iter()
        .filter_map(|product| {
            let ratio = unit.ratio_of(product.as_str())?[i];
            if ratio == 0.0 {
                return None;
            }
            let var = variables.get(&name(product.as_str()))?;
            Some((var, 1.0 / ratio))
        })
        .collect()
}

/// Write the production found by the solver onto the granulation units
pub fn write_results(registry: &mut EntityRegistry, solution: &Solution) -> Result<()> {
    for (name, value) in solution.non_zero() {
        let (VariableName::ExistingProd {
            moniker,
            product,
            year,
        }
        | VariableName::NewProd {
            moniker,
            product,
            year,
        }) = name
        else {
            continue;
        };

        let idx = registry
            .timeline()
            .index_of(*year)
            .with_context(|| format!("Year {year} of variable {name} is not in the timeline"))?;
        let id = registry.entity_by_moniker(moniker.as_str())?;
        if let Some(production) = registry
            .get_mut(id)
            .state
            .production
            .get_mut(product.as_str())
        {
            production[idx] = value;
        }
    }

    Ok(())
}
