//! The command line interface for the engine.
use crate::id::{ItemID, Moniker};
use crate::log;
use crate::model::Model;
use crate::output::metadata::write_metadata;
use crate::output::{
    BatchPublisher, DataWriter, FilePublisher, PublishingSink, ResultSink,
    create_output_directory, get_output_dir,
};
use crate::risk::{compute_delta, uniform_shocks};
use crate::settings::Settings;
use crate::simulation::{SimulateOptions, Simulator};
use crate::worker::{LogMonitor, TaskPayload, run_task};
use ::log::{info, warn};
use anyhow::{Context, Result, ensure};
use clap::{Args, CommandFactory, Parser, Subcommand};
use indexmap::IndexMap;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

pub mod demo;
use demo::DemoSubcommands;
pub mod settings;
use settings::SettingsSubcommands;

/// The output file name for sensitivity deltas
const SENSITIVITY_FILE_NAME: &str = "sensitivity.csv";

/// The output file name for batched global records of a task
const GLOBAL_BATCHES_FILE_NAME: &str = "global.batches";

/// The output file name for batched detail records of a task
const DETAILS_BATCHES_FILE_NAME: &str = "details.batches";

/// The output file name for the phase history of a task
const HISTORY_FILE_NAME: &str = "history.json";

/// The command line interface for the engine.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// The available commands.
    #[command(subcommand)]
    command: Option<Commands>,
    /// Flag to provide the CLI docs as markdown
    #[arg(long, hide = true)]
    markdown_help: bool,
}

/// Options for the run command
#[derive(Args)]
pub struct RunOpts {
    /// Directory for output files
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,
    /// Whether to overwrite the output directory if it already exists
    #[arg(long)]
    pub overwrite: bool,
    /// Number of phases the scenarios are split into
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u64).range(1..))]
    pub cycle: u64,
    /// The phase to run
    #[arg(long, default_value_t = 0)]
    pub phase: u64,
    /// Stop after this many scenarios
    #[arg(long)]
    pub counter_limit: Option<usize>,
    /// Route volumes with the logistics problem, whatever the model file says
    #[arg(long)]
    pub logistics_lp: bool,
}

impl Default for RunOpts {
    fn default() -> Self {
        Self {
            output_dir: None,
            overwrite: false,
            cycle: 1,
            phase: 0,
            counter_limit: None,
            logistics_lp: false,
        }
    }
}

/// Options for the sensitivity command
#[derive(Args)]
pub struct SensitivityOpts {
    /// JSON file holding the monikers of the scenario, as saved in the global results
    #[arg(long)]
    pub scenario: PathBuf,
    /// Amount added to the price of each shocked item
    #[arg(long, default_value_t = 1.0)]
    pub shock: f64,
    /// Item to shock. Every raw material is shocked if none is given.
    #[arg(long = "item")]
    pub items: Vec<String>,
    /// Directory for output files
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,
}

/// The available commands.
#[derive(Subcommand)]
enum Commands {
    /// Value every scenario of a model.
    Run {
        /// Path to the model directory.
        model_dir: PathBuf,
        /// Other run options
        #[command(flatten)]
        opts: RunOpts,
    },
    /// Validate a model.
    Validate {
        /// The path to the model directory.
        model_dir: PathBuf,
    },
    /// Compute the sensitivity of one scenario to raw material prices.
    Sensitivity {
        /// The path to the model directory.
        model_dir: PathBuf,
        /// Sensitivity options
        #[command(flatten)]
        opts: SensitivityOpts,
    },
    /// Run one worker phase described by a task payload.
    Task {
        /// The path to the model directory.
        model_dir: PathBuf,
        /// The task payload as JSON, e.g. `{"cycle": 4, "phase": 0, "db_name": "run1"}`
        #[arg(long)]
        payload: String,
        /// Directory for output files
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },
    /// Manage demo models.
    Demo {
        /// The available subcommands for managing demo models.
        #[command(subcommand)]
        subcommand: DemoSubcommands,
    },
    /// Manage settings file.
    Settings {
        /// The subcommands for managing the settings file.
        #[command(subcommand)]
        subcommand: SettingsSubcommands,
    },
}

impl Commands {
    /// Execute the supplied CLI command
    fn execute(self) -> Result<()> {
        match self {
            Self::Run { model_dir, opts } => handle_run_command(&model_dir, &opts, None),
            Self::Validate { model_dir } => handle_validate_command(&model_dir, None),
            Self::Sensitivity { model_dir, opts } => {
                handle_sensitivity_command(&model_dir, &opts, None)
            }
            Self::Task {
                model_dir,
                payload,
                output_dir,
            } => handle_task_command(&model_dir, &payload, output_dir.as_deref(), None),
            Self::Demo { subcommand } => subcommand.execute(),
            Self::Settings { subcommand } => subcommand.execute(),
        }
    }
}

/// Parse CLI arguments and start the engine
pub fn run_cli() -> Result<()> {
    let cli = Cli::parse();

    // Invoked as: `$ mine2farm --markdown-help`
    if cli.markdown_help {
        clap_markdown::print_help_markdown::<Cli>();
        return Ok(());
    }

    let Some(command) = cli.command else {
        // Output program help in markdown format
        let help_str = Cli::command().render_long_help().to_string();
        println!("{help_str}");
        return Ok(());
    };

    command.execute()
}

/// Load program settings, if not provided
fn settings_or_load(settings: Option<Settings>) -> Result<Settings> {
    if let Some(settings) = settings {
        Ok(settings)
    } else {
        Settings::load().context("Failed to load settings.")
    }
}

/// The output folder from the command line, else the default one for the model
fn resolve_output_dir(model_path: &Path, output_dir: Option<&Path>) -> Result<PathBuf> {
    match output_dir {
        Some(path) => Ok(path.to_path_buf()),
        None => get_output_dir(model_path),
    }
}

/// Create the output folder and start logging to it
fn prepare_output(output_path: &Path, overwrite: bool, settings: &Settings) -> Result<()> {
    let overwrite = create_output_directory(output_path, overwrite).with_context(|| {
        format!(
            "Failed to create output directory: {}",
            output_path.display()
        )
    })?;

    log::init(Some(&settings.log_level), Some(output_path))
        .context("Failed to initialise logging.")?;

    // NB: We have to wait until the logger is initialised to display this warning
    if overwrite {
        warn!("Output folder will be overwritten");
    }

    Ok(())
}

/// Handle the `run` command.
pub fn handle_run_command(
    model_path: &Path,
    opts: &RunOpts,
    settings: Option<Settings>,
) -> Result<()> {
    let settings = settings_or_load(settings)?;
    let output_path = resolve_output_dir(model_path, opts.output_dir.as_deref())?;
    prepare_output(&output_path, opts.overwrite || settings.overwrite, &settings)?;

    let model = Model::from_path(model_path).context("Failed to load model.")?;
    info!("Loaded model from {}", model_path.display());
    info!("Output folder: {}", output_path.display());

    let cycle = usize::try_from(opts.cycle)?;
    let phase = usize::try_from(opts.phase)?;
    ensure!(phase < cycle, "phase must be less than cycle");
    let options = SimulateOptions {
        cycle,
        phase,
        counter_limit: opts.counter_limit,
        scenarios_filter: None,
        granulation: None,
        logistics_lp: opts.logistics_lp || model.parameters.logistics_lp,
        progress_step: settings.progress_step,
    };
    write_metadata(&output_path, model_path, model.parameters.wacc.0, &options)
        .context("Failed to save metadata.")?;

    let mut simulator = Simulator::new(&model, None)?;
    let generator = simulator.generator()?;
    let mut writer = DataWriter::create(&output_path, model.timeline.years())?;
    let summary = simulator.simulate(generator.as_ref(), &options, &mut writer, &mut LogMonitor)?;
    info!(
        "Simulation complete! {} scenarios saved out of {}",
        summary.saved, summary.counter
    );

    Ok(())
}

/// Handle the `validate` command.
pub fn handle_validate_command(model_path: &Path, settings: Option<Settings>) -> Result<()> {
    let settings = settings_or_load(settings)?;

    // Initialise program logger (we won't save log files when running the validate command)
    log::init(Some(&settings.log_level), None).context("Failed to initialise logging.")?;

    // Load the model and build everything a run would need
    let model = Model::from_path(model_path).context("Failed to validate model.")?;
    let simulator = Simulator::new(&model, None).context("Failed to validate model.")?;
    let generator = simulator.generator().context("Failed to validate model.")?;
    info!(
        "Model validation successful! {} scenarios per granulation tuple",
        generator.len()
    );

    Ok(())
}

/// A row of the sensitivity output file
#[derive(Serialize)]
struct DeltaRow<'a> {
    item: &'a str,
    delta: f64,
}

/// Handle the `sensitivity` command.
pub fn handle_sensitivity_command(
    model_path: &Path,
    opts: &SensitivityOpts,
    settings: Option<Settings>,
) -> Result<()> {
    let settings = settings_or_load(settings)?;
    let output_path = resolve_output_dir(model_path, opts.output_dir.as_deref())?;
    prepare_output(&output_path, true, &settings)?;

    let model = Model::from_path(model_path).context("Failed to load model.")?;
    let scenario = fs::read_to_string(&opts.scenario)
        .with_context(|| format!("Could not read {}", opts.scenario.display()))?;
    let scenario: Vec<Vec<Moniker>> = serde_json::from_str(&scenario)
        .with_context(|| format!("Invalid scenario in {}", opts.scenario.display()))?;

    let shocks = if opts.items.is_empty() {
        uniform_shocks(&model, opts.shock)
    } else {
        opts.items
            .iter()
            .map(|item| (ItemID::new(item), opts.shock))
            .collect::<IndexMap<_, _>>()
    };
    let deltas = compute_delta(&model, &scenario, &shocks, model.parameters.logistics_lp)?;

    let mut writer = csv::Writer::from_path(output_path.join(SENSITIVITY_FILE_NAME))?;
    for (item, &delta) in &deltas {
        writer.serialize(DeltaRow {
            item: item.as_str(),
            delta,
        })?;
    }
    writer.flush()?;
    info!("Sensitivity computed for {} items", deltas.len());

    Ok(())
}

/// Handle the `task` command.
pub fn handle_task_command(
    model_path: &Path,
    payload: &str,
    output_dir: Option<&Path>,
    settings: Option<Settings>,
) -> Result<()> {
    let settings = settings_or_load(settings)?;
    let output_path = resolve_output_dir(model_path, output_dir)?;
    prepare_output(&output_path, true, &settings)?;

    let payload = TaskPayload::from_json(payload)?;
    let model = Model::from_path(model_path).context("Failed to load model.")?;
    let publisher = |file_name: &str| {
        BatchPublisher::new(
            FilePublisher::new(output_path.join(file_name)),
            &payload.db_name,
            settings.results_batch_size,
        )
    };
    let mut sink = PublishingSink {
        global: publisher(GLOBAL_BATCHES_FILE_NAME),
        details: publisher(DETAILS_BATCHES_FILE_NAME),
    };

    let history = run_task(
        &model,
        &payload,
        settings.progress_step,
        &mut sink,
        &mut LogMonitor,
    );
    sink.close()?;
    fs::write(
        output_path.join(HISTORY_FILE_NAME),
        serde_json::to_string_pretty(&history)?,
    )?;
    info!("{}", history.message);

    Ok(())
}
