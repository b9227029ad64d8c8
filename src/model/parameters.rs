//! Defines the `ModelParameters` struct, which represents the contents of `model.toml`.
use crate::entity::LayerKind;
use crate::id::ItemID;
use crate::input::{input_err_msg, read_toml};
use crate::units::Dimensionless;
use anyhow::{Context, Result, ensure};
use serde::Deserialize;
use serde_string_enum::DeserializeLabeledStringEnum;
use std::path::Path;

const MODEL_PARAMETERS_FILE_NAME: &str = "model.toml";

macro_rules! define_param_default {
    ($name:ident, $type: ty, $value: expr) => {
        fn $name() -> $type {
            $value
        }
    };
}

macro_rules! define_item_default {
    ($name:ident, $value: expr) => {
        fn $name() -> ItemID {
            ItemID::new($value)
        }
    };
}

define_param_default!(default_wacc, Dimensionless, Dimensionless(0.1));
define_param_default!(default_keep_best_permutations, usize, 1);
define_param_default!(default_relaxation_penalty, f64, 1e6);
define_param_default!(default_domestic_site, String, "Morocco".into());
define_param_default!(default_port_location, String, "Safi".into());
define_param_default!(default_path_departure, LayerKind, LayerKind::MineBeneficiation);
define_param_default!(default_path_arrival, LayerKind, LayerKind::Pap);
define_param_default!(default_unnamed_shuffle, ShuffleLevel, ShuffleLevel::WithUnnamed);
define_item_default!(default_raw_rock, "Raw Rock");
define_item_default!(default_rock, "Chimie");
define_item_default!(default_sulfuric_acid, "ACS");
define_item_default!(default_phosphoric_acid, "ACP 29");
define_item_default!(default_tsp, "TSP");
define_item_default!(default_dap, "DAP");
define_item_default!(default_abroad_fertilizer, "NPK");

/// Represents the contents of the entire model file.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ModelParameters {
    /// Discount rate used for every present value
    #[serde(default = "default_wacc")]
    pub wacc: Dimensionless,
    /// How full scenarios are composed
    #[serde(default)]
    pub scenario_generator: GeneratorKind,
    /// Shuffle strategy per layer
    #[serde(default)]
    pub shuffle: ShuffleLevels,
    /// Number of permutations kept per location and process when allocating unnamed units
    #[serde(default = "default_keep_best_permutations")]
    pub keep_best_permutations: usize,
    /// Allow the granulation problem to leave fertilizer demand unmet, at a penalty
    #[serde(default)]
    pub relax_granulation_demand: bool,
    /// Cost per unit of unmet fertilizer demand when relaxation is enabled
    #[serde(default = "default_relaxation_penalty")]
    pub relaxation_penalty: f64,
    /// Whether to route volumes with the logistics problem after each scenario
    #[serde(default)]
    pub logistics_lp: bool,
    /// Production site of domestic granulation units. Units elsewhere are abroad.
    #[serde(default = "default_domestic_site")]
    pub domestic_site: String,
    /// Location of the export port
    #[serde(default = "default_port_location")]
    pub port_location: String,
    /// Layer whose nodes start paths for path-based scenarios
    #[serde(default = "default_path_departure")]
    pub path_departure: LayerKind,
    /// Layer whose nodes end paths for path-based scenarios
    #[serde(default = "default_path_arrival")]
    pub path_arrival: LayerKind,
    /// Names of the products the engine treats specially
    #[serde(default)]
    pub products: ProductNames,
}

/// How full scenarios are composed from the layers
#[derive(DeserializeLabeledStringEnum, Debug, Clone, Copy, PartialEq, Default)]
pub enum GeneratorKind {
    /// Cartesian product of per-layer shuffles
    #[default]
    #[string = "from_options"]
    FromOptions,
    /// Every non-empty set of network paths
    #[string = "from_paths"]
    FromPaths,
}

/// The combinatorial strategy used to shuffle a layer
#[derive(DeserializeLabeledStringEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShuffleLevel {
    /// No strategy: the layer yields nothing
    #[default]
    #[string = "undefined"]
    Undefined,
    /// One representative per name, every name present
    #[string = "without_permutations"]
    WithoutPermutations,
    /// Every ordering of every non-empty subset
    #[string = "with_permutations"]
    WithPermutations,
    /// Subsets sharing one location and process, filtered by capacity, then permuted
    #[string = "with_permutations_with_filters"]
    WithPermutationsWithFilters,
    /// Allocation over permutations of unnamed replicas
    #[string = "with_unnamed"]
    WithUnnamed,
}

/// Shuffle strategies for the layers which are shuffled individually
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ShuffleLevels {
    /// Sulfuric acid layer
    #[serde(default = "default_unnamed_shuffle")]
    pub sap: ShuffleLevel,
    /// Phosphoric acid layer
    #[serde(default = "default_unnamed_shuffle")]
    pub pap: ShuffleLevel,
    /// Granulation layer
    #[serde(default)]
    pub granulation: ShuffleLevel,
}

impl Default for ShuffleLevels {
    fn default() -> Self {
        Self {
            sap: ShuffleLevel::WithUnnamed,
            pap: ShuffleLevel::WithUnnamed,
            granulation: ShuffleLevel::Undefined,
        }
    }
}

impl ShuffleLevels {
    /// The strategy for a layer
    pub fn level_for(&self, kind: LayerKind) -> ShuffleLevel {
        match kind {
            LayerKind::Sap => self.sap,
            LayerKind::Pap => self.pap,
            LayerKind::Granulation => self.granulation,
            _ => ShuffleLevel::Undefined,
        }
    }
}

/// Names of the products which drive the flow of volumes through the chain
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ProductNames {
    /// What mines produce
    #[serde(default = "default_raw_rock")]
    pub raw_rock: ItemID,
    /// Beneficiated rock consumed by acid plants and exported
    #[serde(default = "default_rock")]
    pub rock: ItemID,
    /// Output of sulfuric acid units
    #[serde(default = "default_sulfuric_acid")]
    pub sulfuric_acid: ItemID,
    /// Output of phosphoric acid units
    #[serde(default = "default_phosphoric_acid")]
    pub phosphoric_acid: ItemID,
    /// Fertilizer which consumes rock directly
    #[serde(default = "default_tsp")]
    pub tsp: ItemID,
    /// Fertilizer which absorbs part of the acid needs of abroad units
    #[serde(default = "default_dap")]
    pub dap: ItemID,
    /// Fertilizer produced by units abroad
    #[serde(default = "default_abroad_fertilizer")]
    pub abroad_fertilizer: ItemID,
}

impl Default for ProductNames {
    fn default() -> Self {
        Self {
            raw_rock: default_raw_rock(),
            rock: default_rock(),
            sulfuric_acid: default_sulfuric_acid(),
            phosphoric_acid: default_phosphoric_acid(),
            tsp: default_tsp(),
            dap: default_dap(),
            abroad_fertilizer: default_abroad_fertilizer(),
        }
    }
}

/// Check that the `wacc` parameter is valid
fn check_wacc(value: Dimensionless) -> Result<()> {
    ensure!(
        value.is_finite() && value > Dimensionless(-1.0),
        "wacc must be a finite number greater than -1"
    );

    Ok(())
}

/// Check that the `keep_best_permutations` parameter is valid
fn check_keep_best_permutations(value: usize) -> Result<()> {
    ensure!(value > 0, "keep_best_permutations cannot be zero");

    Ok(())
}

/// Check that the `relaxation_penalty` parameter is valid
fn check_relaxation_penalty(value: f64) -> Result<()> {
    ensure!(
        value.is_finite() && value > 0.0,
        "relaxation_penalty must be a finite number greater than zero"
    );

    Ok(())
}

/// Check that path-based scenarios start and end on layers which are part of a scenario
fn check_path_layers(departure: LayerKind, arrival: LayerKind) -> Result<()> {
    for kind in [departure, arrival] {
        ensure!(
            kind.is_scenario_layer(),
            "Paths cannot start or end on the {kind} layer"
        );
    }
    ensure!(
        departure != arrival,
        "path_departure and path_arrival must be different layers"
    );

    Ok(())
}

impl ModelParameters {
    /// Read a model file from the specified directory.
    ///
    /// # Arguments
    ///
    /// * `model_dir` - Folder containing model configuration files
    ///
    /// # Returns
    ///
    /// The model file contents as a [`ModelParameters`] struct or an error if the file is invalid
    pub fn from_path<P: AsRef<Path>>(model_dir: P) -> Result<ModelParameters> {
        let file_path = model_dir.as_ref().join(MODEL_PARAMETERS_FILE_NAME);
        let model_params: ModelParameters = read_toml(&file_path)?;

        model_params
            .validate()
            .with_context(|| input_err_msg(file_path))?;

        Ok(model_params)
    }

    /// Validate parameters after reading in file
    fn validate(&self) -> Result<()> {
        check_wacc(self.wacc)?;
        check_keep_best_permutations(self.keep_best_permutations)?;
        check_relaxation_penalty(self.relaxation_penalty)?;
        check_path_layers(self.path_departure, self.path_arrival)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_model_params_from_path_defaults() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(MODEL_PARAMETERS_FILE_NAME), "").unwrap();

        let params = ModelParameters::from_path(dir.path()).unwrap();
        assert_eq!(params.wacc, Dimensionless(0.1));
        assert_eq!(params.scenario_generator, GeneratorKind::FromOptions);
        assert_eq!(params.shuffle, ShuffleLevels::default());
        assert_eq!(params.keep_best_permutations, 1);
        assert!(!params.relax_granulation_demand);
        assert_eq!(params.products.phosphoric_acid, ItemID::new("ACP 29"));
        assert_eq!(params.domestic_site, "Morocco");
    }

    #[test]
    fn test_model_params_from_path() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(MODEL_PARAMETERS_FILE_NAME),
            "wacc = 0.08\nscenario_generator = \"from_paths\"\n\
            [shuffle]\npap = \"with_permutations_with_filters\"\n\
            [products]\nrock = \"Rock\"\n",
        )
        .unwrap();

        let params = ModelParameters::from_path(dir.path()).unwrap();
        assert_eq!(params.wacc, Dimensionless(0.08));
        assert_eq!(params.scenario_generator, GeneratorKind::FromPaths);
        assert_eq!(
            params.shuffle.level_for(LayerKind::Pap),
            ShuffleLevel::WithPermutationsWithFilters
        );
        assert_eq!(
            params.shuffle.level_for(LayerKind::Sap),
            ShuffleLevel::WithUnnamed
        );
        assert_eq!(params.products.rock, ItemID::new("Rock"));
        assert_eq!(params.products.sulfuric_acid, ItemID::new("ACS"));
    }

    #[rstest]
    #[case(0.1, true)]
    #[case(0.0, true)]
    #[case(-0.5, true)]
    #[case(-1.0, false)]
    #[case(f64::INFINITY, false)]
    #[case(f64::NAN, false)]
    fn test_check_wacc(#[case] value: f64, #[case] expected_valid: bool) {
        assert_eq!(check_wacc(Dimensionless(value)).is_ok(), expected_valid);
    }

    #[rstest]
    #[case(1, true)]
    #[case(5, true)]
    #[case(0, false)]
    fn test_check_keep_best_permutations(#[case] value: usize, #[case] expected_valid: bool) {
        assert_eq!(check_keep_best_permutations(value).is_ok(), expected_valid);
    }

    #[rstest]
    #[case(LayerKind::MineBeneficiation, LayerKind::Pap, true)]
    #[case(LayerKind::Sap, LayerKind::Pap, true)]
    #[case(LayerKind::Pap, LayerKind::Pap, false)]
    #[case(LayerKind::Mine, LayerKind::Pap, false)]
    #[case(LayerKind::MineBeneficiation, LayerKind::Granulation, false)]
    fn test_check_path_layers(
        #[case] departure: LayerKind,
        #[case] arrival: LayerKind,
        #[case] expected_valid: bool,
    ) {
        assert_eq!(
            check_path_layers(departure, arrival).is_ok(),
            expected_valid
        );
    }
}
