//! Routing of rock and acid between sites once every facility of a scenario has produced.
use super::{Solution, Variable, VariableMap, VariableName, discounted, discounted_capex, minimise};
use crate::entity::{EntityId, EntityRegistry, LayerKind, Status};
use crate::error::InfeasibleError;
use crate::market::{ProductType, SalesPlan};
use crate::model::ModelParameters;
use crate::optimisation::granulation::is_domestic;
use anyhow::{Context, Result};
use highs::RowProblem as Problem;
use indexmap::IndexSet;
use itertools::Itertools;

/// Transport method whose links only serve one phosphoric acid site
const TRAIN: &str = "Train";

/// Links between beneficiation plants
const WASHPLANT_TO_WASHPLANT: &str = "WP2WP";

/// The links available to a scenario: every link which is not a train, and the train links
/// serving `pap_location`
pub fn available_links(registry: &EntityRegistry, pap_location: &str) -> Vec<EntityId> {
    registry
        .layer(LayerKind::Logistics)
        .iter()
        .copied()
        .filter(|&id| {
            let details = &registry.get(id).details;
            details.method.as_deref() != Some(TRAIN)
                || details.pap_location.as_deref() == Some(pap_location)
        })
        .collect()
}

/// Known volumes a location must receive (or, when negative, supplies itself) in one year
#[derive(Default)]
struct Needs {
    volume: f64,
    present: bool,
}

impl Needs {
    fn add(&mut self, volume: f64) {
        self.volume += volume;
        self.present = true;
    }
}

/// Find the cheapest routing of the volumes produced by the current scenario.
///
/// Rock and acid delivered to each site must cover what its phosphoric acid and granulation
/// units consume, net of the acid made on site, plus the merchant sales plan at the port. Rock
/// leaving a beneficiation site must balance what is produced there and received from other
/// beneficiation sites.
pub fn solve(
    registry: &EntityRegistry,
    links: &[EntityId],
    sales_plan: &SalesPlan,
    parameters: &ModelParameters,
) -> Result<Solution, InfeasibleError> {
    let timeline = registry.timeline();
    let years = timeline.years();
    let wacc = parameters.wacc;
    let products = &parameters.products;

    let mut problem = Problem::default();
    let mut variables = VariableMap::default();
    for &id in links {
        let link = registry.get(id);
        let opex = link
            .outputs
            .first()
            .and_then(|product| link.opex_of(product.as_str()));
        for (i, &year) in years.iter().enumerate() {
            let cost = opex.map_or(0.0, |opex| discounted(opex[i], wacc, timeline, year));
            let name = VariableName::Volume {
                moniker: link.moniker.clone(),
                year,
            };
            variables.add_continuous(&mut problem, name, cost);
        }
    }
    for &id in links {
        let link = registry.get(id);
        if link.status != Status::New {
            continue;
        }
        for &year in years {
            let name = VariableName::Investment {
                moniker: link.moniker.clone(),
                year,
            };
            let cost = discounted_capex(&link.capex, wacc, timeline, year);
            variables.add_binary(&mut problem, name, cost);
        }
    }
    let volume = |id: EntityId, year: u32| {
        variables.get(&VariableName::Volume {
            moniker: registry.get(id).moniker.clone(),
            year,
        })
    };
    let carries = |id: EntityId, product: ProductType| {
        registry.get(id).details.product == Some(product)
    };
    let upstream = |id: EntityId| registry.get(id).details.upstream.as_deref();
    let downstream = |id: EntityId| registry.get(id).details.downstream.as_deref();

    let locations: IndexSet<&str> = links
        .iter()
        .flat_map(|&id| [upstream(id), downstream(id)])
        .flatten()
        .collect();
    let paps = registry.layer(LayerKind::Pap);
    let granulation = registry
        .layer(LayerKind::Granulation)
        .iter()
        .copied()
        .filter(|&id| is_domestic(registry.get(id), parameters))
        .collect_vec();
    let port_rock = sales_plan.total_of_type(ProductType::Rock, timeline.len());
    let port_acid = sales_plan.total_of_type(ProductType::Acid, timeline.len());
    let consumed = |id: EntityId, item: &str, i: usize| {
        registry
            .get(id)
            .state
            .consumption
            .get(item)
            .map(|series| series[i])
    };
    let produced = |id: EntityId, product: &str, i: usize| {
        registry.get(id).production_of(product).map(|series| series[i])
    };

    // Consumption at destination
    for &location in &locations {
        for (i, &year) in years.iter().enumerate() {
            let at = |id: &&EntityId| registry.get(**id).location == location;
            for product in [ProductType::Rock, ProductType::Acid] {
                let delivered = links
                    .iter()
                    .filter(|&&id| downstream(id) == Some(location) && carries(id, product))
                    .filter_map(|&id| volume(id, year))
                    .map(|var| (var, 1.0))
                    .collect_vec();

                let mut needs = Needs::default();
                match product {
                    ProductType::Rock => {
                        for &id in paps.iter().filter(at).chain(granulation.iter().filter(at)) {
                            if let Some(value) = consumed(id, products.rock.as_str(), i) {
                                needs.add(value);
                            }
                        }
                        if location == parameters.port_location {
                            needs.add(port_rock[i]);
                        }
                    }
                    ProductType::Acid => {
                        for &id in paps.iter().filter(at) {
                            if let Some(value) = produced(id, products.phosphoric_acid.as_str(), i)
                            {
                                needs.add(-value);
                            }
                        }
                        for &id in granulation.iter().filter(at) {
                            if let Some(value) =
                                consumed(id, products.phosphoric_acid.as_str(), i)
                            {
                                needs.add(value);
                            }
                        }
                        if location == parameters.port_location {
                            needs.add(port_acid[i]);
                        }
                    }
                    ProductType::Fertilizer => {}
                }

                if !delivered.is_empty() && needs.present {
                    problem.add_row(needs.volume.., delivered);
                }
            }
        }
    }

    // Capacity
    for &id in links {
        let link = registry.get(id);
        let capacity = link.initial_capacity();
        for (i, &year) in years.iter().enumerate() {
            let Some(var) = volume(id, year) else {
                continue;
            };
            if link.status == Status::New {
                let mut terms = vec![(var, 1.0)];
                terms.extend(years.iter().enumerate().take(i + 1).filter_map(
                    |(j, &investment_year)| {
                        investment(&variables, registry, id, investment_year)
                            .map(|inv| (inv, -capacity[j]))
                    },
                ));
                problem.add_row(..=0.0, terms);
            } else {
                problem.add_row(..=capacity[i], [(var, 1.0)]);
            }
        }
    }

    // A new link is invested in at most once
    for &id in links.iter().filter(|&&id| registry.get(id).status == Status::New) {
        let terms = years
            .iter()
            .filter_map(|&year| investment(&variables, registry, id, year))
            .map(|var| (var, 1.0))
            .collect_vec();
        problem.add_row(..=1.0, terms);
    }

    // Rock balance at beneficiation sites
    let washplants = registry.layer(LayerKind::Beneficiation);
    for &location in &locations {
        for (i, &year) in years.iter().enumerate() {
            let received = links
                .iter()
                .filter(|&&id| {
                    downstream(id) == Some(location)
                        && registry.get(id).details.layer_to_layer.as_deref()
                            == Some(WASHPLANT_TO_WASHPLANT)
                })
                .filter_map(|&id| volume(id, year))
                .collect_vec();
            let shipped = links
                .iter()
                .filter(|&&id| upstream(id) == Some(location) && carries(id, ProductType::Rock))
                .filter_map(|&id| volume(id, year))
                .collect_vec();
            let mut made = Needs::default();
            for &id in washplants
                .iter()
                .filter(|&&id| registry.get(id).location == location)
            {
                made.add(produced(id, products.rock.as_str(), i).unwrap_or(0.0));
            }

            if (received.is_empty() && !made.present) || shipped.is_empty() {
                continue;
            }
            let terms = received
                .into_iter()
                .map(|var| (var, 1.0))
                .chain(shipped.into_iter().map(|var| (var, -1.0)))
                .collect_vec();
            problem.add_row(-made.volume..=-made.volume, terms);
        }
    }

    minimise(problem, variables, "Logistics")
}

fn investment(
    variables: &VariableMap,
    registry: &EntityRegistry,
    id: EntityId,
    year: u32,
) -> Option<Variable> {
    variables.get(&VariableName::Investment {
        moniker: registry.get(id).moniker.clone(),
        year,
    })
}

/// Write the routed volumes onto the links and return the links which carry anything, in the
/// order the solver reports them
pub fn write_results(registry: &mut EntityRegistry, solution: &Solution) -> Result<Vec<EntityId>> {
    let mut used = IndexSet::new();
    for (name, value) in solution.non_zero() {
        let VariableName::Volume { moniker, year } = name else {
            continue;
        };

        let idx = registry
            .timeline()
            .index_of(*year)
            .with_context(|| format!("Year {year} of variable {name} is not in the timeline"))?;
        let id = registry.entity_by_moniker(moniker.as_str())?;
        let link = registry.get_mut(id);
        if let Some(production) = link
            .outputs
            .first()
            .cloned()
            .and_then(|product| link.state.production.get_mut(&product))
        {
            production[idx] = value;
        }
        used.insert(id);
    }

    Ok(used.into_iter().collect())
}
