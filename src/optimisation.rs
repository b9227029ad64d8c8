//! The linear programs embedded in a valuation pass.
//!
//! Both problems are built column by column with [`VariableMap`], solved with HiGHS and read back
//! by variable name. A problem which cannot be solved to optimality gives an [`InfeasibleError`],
//! which callers treat as "skip this tuple or scenario".
use crate::error::InfeasibleError;
use crate::finance::discount_factor;
use crate::id::{ItemID, Moniker};
use crate::units::Dimensionless;
use crate::year::Timeline;
use anyhow::Result;
use highs::{HighsModelStatus, RowProblem as Problem, Sense};
use indexmap::IndexMap;
use log::{LevelFilter, trace};
use std::fmt;

pub mod granulation;
pub mod logistics;

/// Separator between the fields of a variable name
pub const VARIABLE_SEPARATOR: char = '#';

/// A decision variable in the optimisation
///
/// Note that this type does **not** include the value of the variable; it just refers to a
/// particular column of the problem.
pub type Variable = highs::Col;

/// What a column of one of the embedded problems stands for
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VariableName {
    /// Production of an existing granulation unit
    ExistingProd {
        /// The unit
        moniker: Moniker,
        /// The fertilizer produced
        product: ItemID,
        /// Year of production
        year: u32,
    },
    /// Production of a new domestic granulation unit
    NewProd {
        /// The unit
        moniker: Moniker,
        /// The fertilizer produced
        product: ItemID,
        /// Year of production
        year: u32,
    },
    /// Whether a new granulation unit is built in a year
    NewInvestment {
        /// The unit
        moniker: Moniker,
        /// Year of the investment
        year: u32,
    },
    /// Unmet fertilizer demand
    Relax {
        /// The fertilizer
        product: ItemID,
        /// Year of the shortfall
        year: u32,
    },
    /// Volume carried by a logistics link
    Volume {
        /// The link
        moniker: Moniker,
        /// Year of transport
        year: u32,
    },
    /// Whether a new logistics link is built in a year
    Investment {
        /// The link
        moniker: Moniker,
        /// Year of the investment
        year: u32,
    },
}

impl fmt::Display for VariableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sep = VARIABLE_SEPARATOR;
        match self {
            Self::ExistingProd {
                moniker,
                product,
                year,
            } => write!(f, "ExistingProd{sep}{moniker}{sep}{product}{sep}{year}"),
            Self::NewProd {
                moniker,
                product,
                year,
            } => write!(f, "NewProd{sep}{moniker}{sep}{product}{sep}{year}"),
            Self::NewInvestment { moniker, year } => {
                write!(f, "NewInvestment{sep}{moniker}{sep}{year}")
            }
            Self::Relax { product, year } => {
                write!(f, "Relax_DemandSatisfaction{sep}{product}{sep}{year}")
            }
            Self::Volume { moniker, year } => write!(f, "Volume{sep}{moniker}{sep}{year}"),
            Self::Investment { moniker, year } => write!(f, "Investment{sep}{moniker}{sep}{year}"),
        }
    }
}

/// A map for easy lookup of variables in the problem.
///
/// The entries are ordered (see [`IndexMap`]) in the order columns were added, which lets values
/// be read back from the solution by position.
#[derive(Default)]
pub struct VariableMap(IndexMap<VariableName, Variable>);

impl VariableMap {
    /// Add a non-negative continuous column with cost `cost`
    pub fn add_continuous(&mut self, problem: &mut Problem, name: VariableName, cost: f64) -> Variable {
        let var = problem.add_column(cost, 0.0..);
        self.insert(name, var)
    }

    /// Add a binary column with cost `cost`
    pub fn add_binary(&mut self, problem: &mut Problem, name: VariableName, cost: f64) -> Variable {
        let var = problem.add_integer_column(cost, 0.0..=1.0);
        self.insert(name, var)
    }

    fn insert(&mut self, name: VariableName, var: Variable) -> Variable {
        let existing = self.0.insert(name, var).is_some();
        assert!(!existing, "Duplicate entry for var");
        var
    }

    /// Get the [`Variable`] with the given name, if it was added
    pub fn get(&self, name: &VariableName) -> Option<Variable> {
        self.0.get(name).copied()
    }

    /// Number of variables
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no variable was added
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The values taken by the variables of a solved problem
#[derive(Debug, Clone, PartialEq)]
pub struct Solution(Vec<(VariableName, f64)>);

impl Solution {
    /// Iterate over the variables and their values
    pub fn iter(&self) -> impl Iterator<Item = (&VariableName, f64)> {
        self.0.iter().map(|(name, value)| (name, *value))
    }

    /// Iterate over the variables which took a non-zero value
    pub fn non_zero(&self) -> impl Iterator<Item = (&VariableName, f64)> {
        self.iter().filter(|(_, value)| *value != 0.0)
    }

    /// The value of the named variable, if it is part of the problem
    pub fn value(&self, name: &VariableName) -> Option<f64> {
        self.0
            .iter()
            .find(|(other, _)| other == name)
            .map(|(_, value)| *value)
    }
}

/// Minimise the problem and read back the value of every variable.
///
/// `label` names the problem in the error returned when no optimal solution exists.
pub fn minimise(
    problem: Problem,
    variables: VariableMap,
    label: &'static str,
) -> Result<Solution, InfeasibleError> {
    let mut model = problem.optimise(Sense::Minimise);
    enable_highs_logging(&mut model);

    let solved = model.solve();
    match solved.status() {
        HighsModelStatus::Optimal | HighsModelStatus::ModelEmpty => {
            let solution = solved.get_solution();
            let values = variables
                .0
                .into_keys()
                .zip(solution.columns().iter().copied())
                .collect::<Vec<_>>();
            for (name, value) in &values {
                trace!("{name} = {value}");
            }

            Ok(Solution(values))
        }
        status => Err(InfeasibleError {
            problem: label,
            status: format!("{status:?}"),
        }),
    }
}

/// Let HiGHS write to the console only when tracing
fn enable_highs_logging(model: &mut highs::Model) {
    let verbose = log::max_level() >= LevelFilter::Trace;
    model.set_option("output_flag", verbose);
    model.set_option("log_to_console", verbose);
}

/// The cost coefficient of a yearly flow: `value / (1 + wacc)^(year - first year)`
pub fn discounted(value: f64, wacc: Dimensionless, timeline: &Timeline, year: u32) -> f64 {
    value / discount_factor(wacc, timeline.offset(year)).0
}

/// Discounted cost of investing in `year`: every capex amount is discounted from `year` plus its
/// offset
pub fn discounted_capex<'a, I>(capex: I, wacc: Dimensionless, timeline: &Timeline, year: u32) -> f64
where
    I: IntoIterator<Item = (&'a u32, &'a f64)>,
{
    capex
        .into_iter()
        .map(|(&offset, &amount)| {
            amount / discount_factor(wacc, timeline.offset(year) + f64::from(offset)).0
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{assert_error, timeline};
    use anyhow::{Context, bail};
    use float_cmp::assert_approx_eq;
    use rstest::rstest;
    use std::collections::BTreeMap;
    use std::str::FromStr;

    impl FromStr for VariableName {
        type Err = anyhow::Error;

        fn from_str(s: &str) -> Result<Self> {
            let fields: Vec<&str> = s.split(VARIABLE_SEPARATOR).collect();
            let year = |field: &str| -> Result<u32> {
                field
                    .parse()
                    .with_context(|| format!("Invalid year in variable name {s}"))
            };

            let name = match fields.as_slice() {
                ["ExistingProd", moniker, product, y] => Self::ExistingProd {
                    moniker: (*moniker).into(),
                    product: (*product).into(),
                    year: year(y)?,
                },
                ["NewProd", moniker, product, y] => Self::NewProd {
                    moniker: (*moniker).into(),
                    product: (*product).into(),
                    year: year(y)?,
                },
                ["NewInvestment", moniker, y] => Self::NewInvestment {
                    moniker: (*moniker).into(),
                    year: year(y)?,
                },
                ["Relax_DemandSatisfaction", product, y] => Self::Relax {
                    product: (*product).into(),
                    year: year(y)?,
                },
                ["Volume", moniker, y] => Self::Volume {
                    moniker: (*moniker).into(),
                    year: year(y)?,
                },
                ["Investment", moniker, y] => Self::Investment {
                    moniker: (*moniker).into(),
                    year: year(y)?,
                },
                _ => bail!("Unrecognised variable name: {s}"),
            };

            Ok(name)
        }
    }

    #[rstest]
    #[case("ExistingProd#granulation/Jorf/slurry/Existing#DAP#2021")]
    #[case("NewInvestment#granulation/Jorf/slurry/NEW1#2020")]
    #[case("Relax_DemandSatisfaction#TSP#2022")]
    #[case("Volume#logistics/Khouribga/Jorf/Pipe/Existing/WP2PAP#2020")]
    fn test_variable_name_parses_what_it_prints(#[case] name: &str) {
        let parsed: VariableName = name.parse().unwrap();
        assert_eq!(parsed.to_string(), name);
    }

    #[test]
    fn test_variable_name_fields() {
        let parsed: VariableName = "NewProd#granulation/Jorf/slurry/NEW2#NPK#2021"
            .parse()
            .unwrap();
        assert_eq!(
            parsed,
            VariableName::NewProd {
                moniker: "granulation/Jorf/slurry/NEW2".into(),
                product: "NPK".into(),
                year: 2021,
            }
        );
    }

    #[rstest]
    #[case("Volume#a/b")]
    #[case("Unknown#a/b#2020")]
    fn test_unrecognised_variable_name(#[case] name: &str) {
        assert_error!(
            name.parse::<VariableName>(),
            format!("Unrecognised variable name: {name}")
        );
    }

    #[test]
    fn test_invalid_year() {
        assert_error!(
            "Volume#a/b#soon".parse::<VariableName>(),
            "Invalid year in variable name Volume#a/b#soon"
        );
    }

    #[rstest]
    fn test_discounted(timeline: Timeline) {
        let wacc = Dimensionless(0.1);
        assert_approx_eq!(f64, discounted(121.0, wacc, &timeline, 2022), 100.0);
        let capex = BTreeMap::from([(0, 110.0), (1, 121.0)]);
        // Investing in 2021: 110 / 1.1 + 121 / 1.21
        assert_approx_eq!(f64, discounted_capex(&capex, wacc, &timeline, 2021), 200.0);
    }

    #[test]
    fn test_minimise() {
        let mut problem = Problem::default();
        let mut variables = VariableMap::default();
        let cheap = VariableName::Volume {
            moniker: "a".into(),
            year: 2020,
        };
        let dear = VariableName::Volume {
            moniker: "b".into(),
            year: 2020,
        };
        let x = variables.add_continuous(&mut problem, cheap.clone(), 1.0);
        let y = variables.add_continuous(&mut problem, dear.clone(), 2.0);
        problem.add_row(..=4.0, [(x, 1.0)]);
        problem.add_row(6.0.., [(x, 1.0), (y, 1.0)]);

        let solution = minimise(problem, variables, "Test").unwrap();
        assert_approx_eq!(f64, solution.value(&cheap).unwrap(), 4.0);
        assert_approx_eq!(f64, solution.value(&dear).unwrap(), 2.0);
    }

    #[test]
    fn test_minimise_infeasible() {
        let mut problem = Problem::default();
        let mut variables = VariableMap::default();
        let x = variables.add_continuous(
            &mut problem,
            VariableName::Relax {
                product: "DAP".into(),
                year: 2020,
            },
            1.0,
        );
        problem.add_row(..=-1.0, [(x, 1.0)]);

        let err = minimise(problem, variables, "Test").unwrap_err();
        assert_eq!(err.problem, "Test");
    }
}
