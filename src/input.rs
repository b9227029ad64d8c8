//! Common routines for handling input data.
use crate::entity::LayerKind;
use crate::model::{Model, ModelParameters};
use crate::year::Timeline;
use anyhow::{Context, Result, ensure};
use indexmap::IndexMap;
use itertools::Itertools;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use strum::IntoEnumIterator;

pub mod conversion;
use conversion::read_unit_conversion;
pub mod layer;
use layer::{LayerTables, read_layer_tables};
pub mod market;
use market::{read_raw_materials, read_sales_plan};
pub mod network;
use network::{read_connections, read_network_edges, read_priority_mines};

/// Read a series of type `T`s from a CSV file.
///
/// The file must exist and contain at least one row.
pub fn read_csv<T: DeserializeOwned>(file_path: &Path) -> Result<Vec<T>> {
    let vec = read_csv_internal(file_path)?;
    ensure!(
        !vec.is_empty(),
        "CSV file {} cannot be empty",
        file_path.display()
    );

    Ok(vec)
}

/// Read a series of type `T`s from a CSV file which may be absent or empty
pub fn read_csv_optional<T: DeserializeOwned>(file_path: &Path) -> Result<Vec<T>> {
    if !file_path.exists() {
        return Ok(Vec::new());
    }

    read_csv_internal(file_path)
}

fn read_csv_internal<T: DeserializeOwned>(file_path: &Path) -> Result<Vec<T>> {
    let vec = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(file_path)
        .with_context(|| input_err_msg(file_path))?
        .into_deserialize()
        .process_results(|iter| iter.collect_vec())
        .with_context(|| input_err_msg(file_path))?;

    Ok(vec)
}

/// Whether the header row of a CSV file contains `column`
pub fn csv_has_column(file_path: &Path, column: &str) -> Result<bool> {
    let mut reader = csv::Reader::from_path(file_path).with_context(|| input_err_msg(file_path))?;
    let headers = reader.headers().with_context(|| input_err_msg(file_path))?;

    Ok(headers.iter().any(|header| header.trim() == column))
}

/// Parse a TOML file at the specified path.
pub fn read_toml<T: DeserializeOwned>(file_path: &Path) -> Result<T> {
    let toml_str = fs::read_to_string(file_path).with_context(|| input_err_msg(file_path))?;
    let toml_data = toml::from_str(&toml_str).with_context(|| input_err_msg(file_path))?;
    Ok(toml_data)
}

/// Format an error message to include the file path.
pub fn input_err_msg<P: AsRef<Path>>(file_path: P) -> String {
    format!("Error reading {}", file_path.as_ref().display())
}

/// Indicates whether the values in `iter` are strictly increasing
pub fn is_sorted_and_unique<T, I>(iter: I) -> bool
where
    T: PartialOrd + Clone,
    I: IntoIterator<Item = T>,
{
    iter.into_iter().tuple_windows().all(|(a, b)| a < b)
}

/// Load a model from the specified directory.
///
/// The run timeline is the set of years found in the specific consumption tables. Every moniker
/// must be unique across all layers.
pub fn load_model<P: AsRef<Path>>(model_dir: P) -> Result<Model> {
    let model_dir = model_dir.as_ref();
    let parameters = ModelParameters::from_path(model_dir)?;
    let conversion = read_unit_conversion(model_dir)?;

    let mut layers = IndexMap::new();
    for kind in LayerKind::iter().filter(|kind| kind.has_input_tables()) {
        let tables = read_layer_tables(model_dir, kind, &conversion)
            .with_context(|| format!("Failed to read {kind} tables"))?;
        layers.insert(kind, tables);
    }
    check_monikers_unique(&layers)?;

    let timeline = Timeline::from_years(
        layers
            .values()
            .flat_map(|tables| tables.consumption.iter().map(|row| row.year)),
    )
    .context("Could not determine the run timeline from the consumption tables")?;

    let raw_materials = read_raw_materials(model_dir, &conversion, &timeline)?;
    let sales_plan = read_sales_plan(model_dir, &conversion, &timeline)?;
    let connections = read_connections(model_dir)?;
    let priority_mines = read_priority_mines(model_dir)?;
    let network = read_network_edges(model_dir)?;

    Ok(Model {
        model_path: model_dir.to_path_buf(),
        parameters,
        timeline,
        raw_materials,
        sales_plan,
        layers,
        connections,
        priority_mines,
        network,
    })
}

/// Check that no moniker is used by two options rows
fn check_monikers_unique(layers: &IndexMap<LayerKind, LayerTables>) -> Result<()> {
    let mut seen = HashSet::new();
    for (kind, tables) in layers {
        for option in &tables.options {
            ensure!(
                seen.insert(option.moniker.clone()),
                "Duplicate moniker {} found in {kind} options",
                option.moniker
            );
        }
    }

    Ok(())
}
