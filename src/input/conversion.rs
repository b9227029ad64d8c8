//! Unit conversion of input tables.
//!
//! Every table carrying a `unit` column is brought to the uniform units of the conversion matrix
//! as it is read.
use super::*;
use crate::error::DataContractError;
use serde::Deserialize;
use std::collections::HashMap;

const UNIT_CONVERSION_FILE_NAME: &str = "unit_conversion.csv";

/// Name of the column holding units
const UNIT_COLUMN: &str = "unit";

#[derive(Deserialize)]
struct UnitConversionRaw {
    unit: String,
    uniform_unit: String,
    conversion_rate: f64,
}

/// Maps each known unit to its uniform unit and the factor to convert values into it
#[derive(Debug, Default, PartialEq)]
pub struct UnitConversion(HashMap<String, (String, f64)>);

impl UnitConversion {
    /// Look up the uniform unit and conversion rate for `unit`
    pub fn lookup(&self, unit: &str) -> Result<(&str, f64), DataContractError> {
        self.0
            .get(unit)
            .map(|(uniform, rate)| (uniform.as_str(), *rate))
            .ok_or_else(|| DataContractError::UnknownUnit(unit.to_string()))
    }
}

impl FromIterator<(String, String, f64)> for UnitConversion {
    fn from_iter<I: IntoIterator<Item = (String, String, f64)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(unit, uniform, rate)| (unit, (uniform, rate)))
                .collect(),
        )
    }
}

/// A row of an input table whose values are expressed in a unit
pub trait UnitValue {
    /// The unit the row is expressed in
    fn unit(&self) -> &str;

    /// Multiply the row's values by `rate` and relabel it with `uniform_unit`
    fn convert(&mut self, rate: f64, uniform_unit: &str);
}

/// Read the unit conversion matrix from the model directory
pub fn read_unit_conversion(model_dir: &Path) -> Result<UnitConversion> {
    let file_path = model_dir.join(UNIT_CONVERSION_FILE_NAME);
    if !csv_has_column(&file_path, UNIT_COLUMN)? {
        Err(DataContractError::MissingConversionUnitColumn(
            file_path.display().to_string(),
        ))?;
    }

    let rows: Vec<UnitConversionRaw> = read_csv(&file_path)?;
    for row in &rows {
        ensure!(
            row.conversion_rate.is_finite(),
            "Conversion rate for unit {} must be finite",
            row.unit
        );
    }

    Ok(rows
        .into_iter()
        .map(|row| (row.unit, row.uniform_unit, row.conversion_rate))
        .collect())
}

/// Read a CSV table with a `unit` column, converting every row to uniform units.
///
/// A missing file yields no rows.
pub fn read_csv_with_units<T>(file_path: &Path, conversion: &UnitConversion) -> Result<Vec<T>>
where
    T: DeserializeOwned + UnitValue,
{
    if !file_path.exists() {
        return Ok(Vec::new());
    }

    if !csv_has_column(file_path, UNIT_COLUMN)? {
        Err(DataContractError::MissingUnitColumn(
            file_path.display().to_string(),
        ))?;
    }

    let mut rows: Vec<T> = read_csv_optional(file_path)?;
    for row in &mut rows {
        let (uniform_unit, rate) = conversion
            .lookup(row.unit())
            .with_context(|| input_err_msg(file_path))?;
        row.convert(rate, uniform_unit);
    }

    Ok(rows)
}
