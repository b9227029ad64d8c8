//! Result records and the sinks which receive them.
//!
//! Every priced scenario gives one [`GlobalRecord`] and one [`DetailRecord`] per entity which
//! contributed to its cost. Records are handed to a [`ResultSink`]: kept in memory, written to CSV
//! files or published in batches.
use crate::entity::Entity;
use crate::id::{ItemID, Moniker};
use crate::series::Series;
use anyhow::{Context, Result, ensure};
use indexmap::IndexMap;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub mod metadata;

/// The root folder in which model-specific output folders will be created
const OUTPUT_DIRECTORY_ROOT: &str = "mine2farm_results";

/// The output file name for scenario totals
const GLOBAL_FILE_NAME: &str = "global.csv";

/// The output file name for per-entity results
const DETAILS_FILE_NAME: &str = "details.csv";

/// The output file name for per-entity time series
const SERIES_FILE_NAME: &str = "detailed_series.csv";

/// Currency unit of every cost
pub const COST_UNIT: &str = "$";

/// Get the output folder for the model at `model_dir`
pub fn get_output_dir(model_dir: &Path) -> Result<PathBuf> {
    let model_dir = model_dir
        .canonicalize() // canonicalise in case the user has specified "."
        .context("Could not resolve path to model")?;

    let model_name = model_dir
        .file_name()
        .context("Model cannot be in root folder")?
        .to_str()
        .context("Invalid chars in model dir name")?;

    Ok([OUTPUT_DIRECTORY_ROOT, model_name].iter().collect())
}

/// Create the output directory, if needed.
///
/// Returns whether a non-empty directory is about to be overwritten. Without `allow_overwrite`, a
/// non-empty directory is an error.
pub fn create_output_directory(output_dir: &Path, allow_overwrite: bool) -> Result<bool> {
    let overwrite = if let Ok(mut it) = fs::read_dir(output_dir) {
        if it.next().is_none() {
            // Empty folder
            return Ok(false);
        }

        ensure!(
            allow_overwrite,
            "Output folder already exists and is not empty. \
            Please specify a different output folder, or use --overwrite."
        );
        true
    } else {
        false
    };

    fs::create_dir_all(output_dir)?;

    Ok(overwrite)
}

/// The cost of one scenario
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GlobalRecord {
    /// Ordinal of the scenario in the enumeration
    #[serde(rename = "Scenario")]
    pub scenario: usize,
    /// Present value of every cost in the scenario
    #[serde(rename = "Cost PV")]
    pub cost_pv: f64,
    /// Currency of `cost_pv`
    #[serde(rename = "Unit")]
    pub unit: String,
    /// The granulation tuple, then one list per scenario layer
    #[serde(rename = "Moniker")]
    pub moniker: Vec<Vec<Moniker>>,
}

/// What one entity contributed to a scenario
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetailRecord {
    /// The entity
    pub moniker: Moniker,
    /// Display name
    pub name: String,
    /// Layer of the entity
    pub layer: String,
    /// Location of the entity
    pub location: String,
    /// Lifecycle status
    pub status: String,
    /// Nominal capacity
    pub capacity: f64,
    /// Present value of the entity's opex and capex
    pub cost_pv: f64,
    /// Production per product
    pub production: IndexMap<ItemID, Series>,
    /// Consumption per input
    pub consumption: IndexMap<ItemID, Series>,
    /// Yearly opex
    pub total_opex: Series,
    /// Yearly capex
    pub total_capex: Series,
}

impl DetailRecord {
    /// Take the current state of `entity`
    pub fn new(entity: &Entity) -> Self {
        Self {
            moniker: entity.moniker.clone(),
            name: entity.name.clone(),
            layer: entity.kind.to_string(),
            location: entity.location.clone(),
            status: entity.status.to_string(),
            capacity: entity.nominal_capacity,
            cost_pv: entity.state.cost_pv.value(),
            production: entity.state.production.clone(),
            consumption: entity.state.consumption.clone(),
            total_opex: entity.state.total_opex.clone(),
            total_capex: entity.state.total_capex.clone(),
        }
    }

    /// Every series of the record, labelled with its kind and item
    fn series(&self) -> impl Iterator<Item = (&'static str, &str, &Series)> {
        let production = self
            .production
            .iter()
            .map(|(item, series)| ("production", item.as_str(), series));
        let consumption = self
            .consumption
            .iter()
            .map(|(item, series)| ("consumption", item.as_str(), series));
        production
            .chain(consumption)
            .chain([
                ("opex", "", &self.total_opex),
                ("capex", "", &self.total_capex),
            ])
    }
}

/// Receives the results of every priced scenario
pub trait ResultSink {
    /// Save the records of one scenario
    fn save(&mut self, global: GlobalRecord, details: Vec<DetailRecord>) -> Result<()>;

    /// Flush anything still held back
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Keeps every record in memory
#[derive(Debug, Default)]
pub struct CollectedResults {
    /// Records in the order they were saved
    pub records: Vec<(GlobalRecord, Vec<DetailRecord>)>,
}

impl CollectedResults {
    /// The global records
    pub fn globals(&self) -> impl Iterator<Item = &GlobalRecord> {
        self.records.iter().map(|(global, _)| global)
    }
}

impl ResultSink for CollectedResults {
    fn save(&mut self, global: GlobalRecord, details: Vec<DetailRecord>) -> Result<()> {
        self.records.push((global, details));
        Ok(())
    }
}

/// A row of the global results file. Monikers are kept as JSON.
#[derive(Serialize)]
struct GlobalRow<'a> {
    #[serde(rename = "Scenario")]
    scenario: usize,
    #[serde(rename = "Cost PV")]
    cost_pv: f64,
    #[serde(rename = "Unit")]
    unit: &'a str,
    #[serde(rename = "Moniker")]
    moniker: String,
}

#[derive(Serialize)]
struct DetailRow<'a> {
    scenario: usize,
    moniker: &'a str,
    name: &'a str,
    layer: &'a str,
    location: &'a str,
    status: &'a str,
    capacity: f64,
    cost_pv: f64,
}

#[derive(Serialize)]
struct SeriesRow<'a> {
    scenario: usize,
    moniker: &'a str,
    series: &'a str,
    item: &'a str,
    year: u32,
    value: f64,
}

/// Writes results to CSV files
pub struct DataWriter {
    years: Vec<u32>,
    global_writer: csv::Writer<File>,
    details_writer: csv::Writer<File>,
    series_writer: csv::Writer<File>,
}

impl DataWriter {
    /// Open CSV files to write output data to
    ///
    /// # Arguments
    ///
    /// * `output_path` - Folder where files will be saved
    /// * `years` - Years of the run timeline, labelling the values of every series
    pub fn create(output_path: &Path, years: &[u32]) -> Result<Self> {
        let new_writer = |file_name| {
            let file_path = output_path.join(file_name);
            csv::Writer::from_path(file_path)
        };

        Ok(Self {
            years: years.to_vec(),
            global_writer: new_writer(GLOBAL_FILE_NAME)?,
            details_writer: new_writer(DETAILS_FILE_NAME)?,
            series_writer: new_writer(SERIES_FILE_NAME)?,
        })
    }

    /// Flush the underlying streams
    pub fn flush(&mut self) -> Result<()> {
        self.global_writer.flush()?;
        self.details_writer.flush()?;
        self.series_writer.flush()?;

        Ok(())
    }
}

impl ResultSink for DataWriter {
    fn save(&mut self, global: GlobalRecord, details: Vec<DetailRecord>) -> Result<()> {
        self.global_writer.serialize(GlobalRow {
            scenario: global.scenario,
            cost_pv: global.cost_pv,
            unit: &global.unit,
            moniker: serde_json::to_string(&global.moniker)?,
        })?;

        for detail in &details {
            self.details_writer.serialize(DetailRow {
                scenario: global.scenario,
                moniker: detail.moniker.as_str(),
                name: &detail.name,
                layer: &detail.layer,
                location: &detail.location,
                status: &detail.status,
                capacity: detail.capacity,
                cost_pv: detail.cost_pv,
            })?;

            for (series, item, values) in detail.series() {
                for (&year, value) in self.years.iter().zip(values.iter()) {
                    self.series_writer.serialize(SeriesRow {
                        scenario: global.scenario,
                        moniker: detail.moniker.as_str(),
                        series,
                        item,
                        year,
                        value,
                    })?;
                }
            }
        }

        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.flush()
    }
}

/// Somewhere batches of serialised records can be sent
pub trait Publish {
    /// Send one batch
    fn publish(&mut self, batch: &[String]) -> Result<()>;
}

/// Appends every batch to a file, one record per line
pub struct FilePublisher {
    path: PathBuf,
}

impl FilePublisher {
    /// Publish to the file at `path`, which is created if needed
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Publish for FilePublisher {
    fn publish(&mut self, batch: &[String]) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Could not open {}", self.path.display()))?;
        for line in batch {
            writeln!(file, "{line}")?;
        }

        Ok(())
    }
}

/// Serialises records into tagged lines and publishes them in fixed-size batches.
///
/// Each line reads `TASK {task id on 12 digits}{database name}${record as JSON}`.
pub struct BatchPublisher<P: Publish> {
    db_name: String,
    batch_size: usize,
    pending: Vec<String>,
    publisher: P,
}

impl<P: Publish> BatchPublisher<P> {
    /// Publish to `publisher` in batches of `batch_size` lines
    pub fn new(publisher: P, db_name: &str, batch_size: usize) -> Self {
        Self {
            db_name: db_name.to_string(),
            batch_size: batch_size.max(1),
            pending: Vec::new(),
            publisher,
        }
    }

    /// Format one record as a tagged line
    pub fn format_line<T: Serialize>(&self, task_id: usize, record: &T) -> Result<String> {
        Ok(format!(
            "TASK {task_id:012}{}${}",
            self.db_name,
            serde_json::to_string(record)?
        ))
    }

    /// Queue a record, publishing the batch once it is full
    pub fn push<T: Serialize>(&mut self, task_id: usize, record: &T) -> Result<()> {
        let line = self.format_line(task_id, record)?;
        self.pending.push(line);
        if self.pending.len() >= self.batch_size {
            self.flush()?;
        }

        Ok(())
    }

    /// Publish whatever is queued
    pub fn flush(&mut self) -> Result<()> {
        if !self.pending.is_empty() {
            self.publisher.publish(&self.pending)?;
            self.pending.clear();
        }

        Ok(())
    }
}

/// Publishes global and detail records on two streams, tagged with the scenario ordinal
pub struct PublishingSink<P: Publish> {
    /// Stream of global records
    pub global: BatchPublisher<P>,
    /// Stream of detail records
    pub details: BatchPublisher<P>,
}

impl<P: Publish> ResultSink for PublishingSink<P> {
    fn save(&mut self, global: GlobalRecord, details: Vec<DetailRecord>) -> Result<()> {
        let task_id = global.scenario;
        self.global.push(task_id, &global)?;
        for detail in &details {
            self.details.push(task_id, detail)?;
        }

        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.global.flush()?;
        self.details.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::pap_entity;
    use rstest::{fixture, rstest};
    use tempfile::tempdir;

    #[fixture]
    fn global() -> GlobalRecord {
        GlobalRecord {
            scenario: 7,
            cost_pv: 1250.5,
            unit: COST_UNIT.into(),
            moniker: vec![
                vec!["granulation/Jorf/slurry/Existing".into()],
                vec!["pap/Safi/dihydrate/Existing".into()],
            ],
        }
    }

    /// Collects published batches
    #[derive(Default)]
    struct Recorder(Vec<Vec<String>>);

    impl Publish for &mut Recorder {
        fn publish(&mut self, batch: &[String]) -> Result<()> {
            self.0.push(batch.to_vec());
            Ok(())
        }
    }

    #[rstest]
    fn test_global_record_field_names(global: GlobalRecord) {
        let json = serde_json::to_value(&global).unwrap();
        assert_eq!(json["Scenario"], 7);
        assert_eq!(json["Cost PV"], 1250.5);
        assert_eq!(json["Unit"], "$");
        assert_eq!(json["Moniker"][1][0], "pap/Safi/dihydrate/Existing");
    }

    #[rstest]
    fn test_detail_record(pap_entity: Entity) {
        let detail = DetailRecord::new(&pap_entity);
        assert_eq!(detail.layer, "pap");
        assert_eq!(detail.status, "Existing");
        assert_eq!(detail.series().count(), detail.production.len() + detail.consumption.len() + 2);
    }

    #[rstest]
    fn test_format_line(global: GlobalRecord) {
        let mut recorder = Recorder::default();
        let publisher = BatchPublisher::new(&mut recorder, "run1", 2);
        let line = publisher.format_line(42, &global).unwrap();
        assert!(line.starts_with("TASK 000000000042run1${\"Scenario\":7"));
    }

    #[rstest]
    fn test_batches_are_flushed_when_full_and_on_close(global: GlobalRecord) {
        let mut recorder = Recorder::default();
        {
            let mut publisher = BatchPublisher::new(&mut recorder, "run1", 2);
            for task_id in 1..=5 {
                publisher.push(task_id, &global).unwrap();
            }
            publisher.flush().unwrap();
        }
        let sizes: Vec<_> = recorder.0.iter().map(Vec::len).collect();
        assert_eq!(sizes, [2, 2, 1]);
    }

    #[rstest]
    fn test_data_writer(global: GlobalRecord, pap_entity: Entity) {
        let dir = tempdir().unwrap();
        {
            let mut writer = DataWriter::create(dir.path(), &[2020, 2021, 2022]).unwrap();
            writer
                .save(global, vec![DetailRecord::new(&pap_entity)])
                .unwrap();
            writer.close().unwrap();
        }

        let globals = fs::read_to_string(dir.path().join(GLOBAL_FILE_NAME)).unwrap();
        let mut lines = globals.lines();
        assert_eq!(lines.next(), Some("Scenario,Cost PV,Unit,Moniker"));
        assert!(lines.next().unwrap().starts_with("7,1250.5,$,"));

        let details = fs::read_to_string(dir.path().join(DETAILS_FILE_NAME)).unwrap();
        assert_eq!(details.lines().count(), 2);
        let series = fs::read_to_string(dir.path().join(SERIES_FILE_NAME)).unwrap();
        assert!(series.lines().skip(1).all(|line| line.starts_with("7,pap/")));
    }

    #[rstest]
    fn test_file_publisher_appends(global: GlobalRecord) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("results.batches");
        let mut sink = PublishingSink {
            global: BatchPublisher::new(FilePublisher::new(path.clone()), "db", 10),
            details: BatchPublisher::new(FilePublisher::new(path.clone()), "db", 10),
        };
        sink.save(global.clone(), vec![]).unwrap();
        sink.save(global, vec![]).unwrap();
        sink.close().unwrap();

        let contents = fs::read_to_string(path).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[test]
    fn test_create_output_directory() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("results");
        assert!(!create_output_directory(&output, false).unwrap());
        fs::write(output.join("global.csv"), "").unwrap();
        assert!(create_output_directory(&output, false).is_err());
        assert!(create_output_directory(&output, true).unwrap());
    }
}
