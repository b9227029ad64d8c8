//! The model: everything read from a model directory before any entity is built.
use crate::entity::LayerKind;
use crate::graph::NetworkEdge;
use crate::input::layer::LayerTables;
use crate::layer::combo::Connections;
use crate::market::{RawMaterials, SalesPlan};
use crate::year::Timeline;
use anyhow::Result;
use indexmap::IndexMap;
use std::path::{Path, PathBuf};

pub mod parameters;
pub use parameters::{GeneratorKind, ModelParameters, ProductNames, ShuffleLevel};

/// Model definition
#[derive(Debug, Clone)]
pub struct Model {
    /// Path to model folder
    pub model_path: PathBuf,
    /// Parameters from the model TOML file
    pub parameters: ModelParameters,
    /// Years over which every entity is valued
    pub timeline: Timeline,
    /// Raw material prices
    pub raw_materials: RawMaterials,
    /// Product demand
    pub sales_plan: SalesPlan,
    /// Input tables for each layer, in chain order
    pub layers: IndexMap<LayerKind, LayerTables>,
    /// Which mine locations can feed which beneficiation locations
    pub connections: Connections,
    /// Mine locations whose combinations are enumerated first
    pub priority_mines: Vec<String>,
    /// Explicit edges of the facility network
    pub network: Vec<NetworkEdge>,
}

impl Model {
    /// Read a model from the specified directory.
    pub fn from_path<P: AsRef<Path>>(model_dir: P) -> Result<Self> {
        crate::input::load_model(model_dir)
    }

    /// The input tables of one layer. Layers without input files have no tables.
    pub fn tables(&self, kind: LayerKind) -> Option<&LayerTables> {
        self.layers.get(&kind)
    }

    /// Product names from the model parameters
    pub fn products(&self) -> &ProductNames {
        &self.parameters.products
    }
}
