//! The boundary between the engine and whatever distributes phases to workers.
//!
//! A worker receives a [`TaskPayload`], values one phase of the model and reports a
//! [`PhaseHistory`]. Any error escaping the valuation is caught here and reported as a failed
//! phase.
use crate::model::Model;
use crate::output::ResultSink;
use crate::simulation::{SimulateOptions, SimulationSummary, Simulator};
use anyhow::{Context, Result, ensure};
use chrono::Local;
use log::{debug, error, info};
use serde::{Deserialize, Serialize};

/// Format of `time_start` in the phase history
const TIME_FORMAT: &str = "%d/%m/%y %H:%M:%S";

/// What a worker is asked to do
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TaskPayload {
    /// Number of phases the scenarios are split into
    pub cycle: usize,
    /// The phase to run
    pub phase: usize,
    /// Name of the database the results belong to
    #[serde(default)]
    pub db_name: String,
    /// Route volumes with the logistics problem
    #[serde(default)]
    pub logistics_lp: bool,
}

impl TaskPayload {
    /// Parse a payload from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        let payload: TaskPayload =
            serde_json::from_str(json).context("Could not parse task payload")?;
        ensure!(payload.cycle > 0, "cycle must be greater than zero");
        ensure!(
            payload.phase < payload.cycle,
            "phase must be less than cycle"
        );

        Ok(payload)
    }
}

/// Outcome of a phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseStatus {
    /// At least one scenario was saved
    Ok,
    /// Nothing was saved, or the phase failed
    Error,
}

impl PhaseStatus {
    /// The numeric code of the status
    pub fn code(self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::Error => -1,
        }
    }
}

impl Serialize for PhaseStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.code())
    }
}

/// The record kept for each phase run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseHistory {
    /// Phase which was run
    pub phase: usize,
    /// Database the results belong to
    pub db_name: String,
    /// When the phase started
    pub time_start: String,
    /// Number of scenarios considered
    pub total_scenario: usize,
    /// Human-readable outcome
    pub message: String,
    /// Outcome
    pub status: PhaseStatus,
}

/// Progress through the scenarios of a phase
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Progress {
    /// Share of scenarios considered, in percent
    pub progress: f64,
    /// Number of scenarios considered
    pub counter: usize,
}

impl Progress {
    /// Progress after `counter` of `total` scenarios
    pub fn new(counter: usize, total: usize) -> Self {
        let progress = if total == 0 {
            100.0
        } else {
            counter as f64 * 100.0 / total as f64
        };

        Self { progress, counter }
    }
}

/// Receives progress snapshots while a phase runs
pub trait ProgressMonitor {
    /// Record a snapshot for `phase`
    fn report(&mut self, phase: usize, progress: Progress);
}

/// Logs every snapshot at debug level
pub struct LogMonitor;

impl ProgressMonitor for LogMonitor {
    fn report(&mut self, phase: usize, progress: Progress) {
        debug!(
            "{}: {:.1}% ({} scenarios)",
            progress_key(phase),
            progress.progress,
            progress.counter
        );
    }
}

/// The key under which progress snapshots of a phase are published
pub fn progress_key(phase: usize) -> String {
    format!("workers_info_{phase}")
}

/// Run one phase of `model` and report how it went.
///
/// Errors from the valuation are not propagated: they give a history with an `ERROR` status.
pub fn run_task(
    model: &Model,
    payload: &TaskPayload,
    progress_step: usize,
    sink: &mut dyn ResultSink,
    monitor: &mut dyn ProgressMonitor,
) -> PhaseHistory {
    let time_start = Local::now().format(TIME_FORMAT).to_string();
    let phase = payload.phase;
    info!("Running phase {phase} of {} for {}", payload.cycle, payload.db_name);

    let outcome = run_phase(model, payload, progress_step, sink, monitor);

    let history = |total_scenario, message: String, status| PhaseHistory {
        phase,
        db_name: payload.db_name.clone(),
        time_start: time_start.clone(),
        total_scenario,
        message,
        status,
    };
    match outcome {
        Ok(summary) if summary.saved > 0 => {
            info!("Phase {phase} done successfully");
            history(
                summary.counter,
                format!("Phase {phase} done successfully"),
                PhaseStatus::Ok,
            )
        }
        Ok(summary) => {
            error!("All scenarios have failed for phase {phase}");
            history(
                summary.counter,
                format!("All scenarios have failed for phase {phase}"),
                PhaseStatus::Error,
            )
        }
        Err(err) => {
            error!(
                "Worker failed for {} (started {time_start}): {err:?}",
                payload.db_name
            );
            history(0, format!("Worker failed: {err}"), PhaseStatus::Error)
        }
    }
}

fn run_phase(
    model: &Model,
    payload: &TaskPayload,
    progress_step: usize,
    sink: &mut dyn ResultSink,
    monitor: &mut dyn ProgressMonitor,
) -> Result<SimulationSummary> {
    let mut simulator = Simulator::new(model, None)?;
    let generator = simulator.generator()?;
    let options = SimulateOptions {
        cycle: payload.cycle,
        phase: payload.phase,
        logistics_lp: payload.logistics_lp,
        progress_step,
        ..SimulateOptions::default()
    };
    simulator.simulate(generator.as_ref(), &options, sink, monitor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::simple_model;
    use crate::output::CollectedResults;
    use float_cmp::assert_approx_eq;
    use rstest::rstest;

    /// Keeps every snapshot
    #[derive(Default)]
    struct Recorder(Vec<(usize, Progress)>);

    impl ProgressMonitor for Recorder {
        fn report(&mut self, phase: usize, progress: Progress) {
            self.0.push((phase, progress));
        }
    }

    #[rstest]
    #[case(r#"{"cycle": 4, "phase": 1, "db_name": "run1", "logistics_lp": true}"#, true)]
    #[case(r#"{"cycle": 4, "phase": 1}"#, false)]
    fn test_parse_payload(#[case] json: &str, #[case] logistics_lp: bool) {
        let payload = TaskPayload::from_json(json).unwrap();
        assert_eq!(payload.cycle, 4);
        assert_eq!(payload.phase, 1);
        assert_eq!(payload.logistics_lp, logistics_lp);
    }

    #[rstest]
    #[case(r#"{"cycle": 0, "phase": 0}"#)]
    #[case(r#"{"cycle": 2, "phase": 2}"#)]
    #[case(r#"{"phase": 0}"#)]
    fn test_invalid_payload(#[case] json: &str) {
        assert!(TaskPayload::from_json(json).is_err());
    }

    #[test]
    fn test_progress() {
        assert_approx_eq!(f64, Progress::new(1, 4).progress, 25.0);
        assert_approx_eq!(f64, Progress::new(0, 0).progress, 100.0);
        assert_eq!(progress_key(3), "workers_info_3");
    }

    #[rstest]
    fn test_run_task(simple_model: Model) {
        let payload = TaskPayload::from_json(r#"{"cycle": 1, "phase": 0, "db_name": "db"}"#).unwrap();
        let mut results = CollectedResults::default();
        let mut monitor = Recorder::default();
        let history = run_task(&simple_model, &payload, 1, &mut results, &mut monitor);
        assert_eq!(history.status, PhaseStatus::Ok);
        assert_eq!(history.message, "Phase 0 done successfully");
        assert_eq!(history.total_scenario, 1);
        assert!(!monitor.0.is_empty());

        let json = serde_json::to_value(&history).unwrap();
        assert_eq!(json["status"], 0);
    }

    #[rstest]
    fn test_empty_phase_is_an_error(simple_model: Model) {
        // The only scenario belongs to phase 1
        let payload = TaskPayload::from_json(r#"{"cycle": 2, "phase": 0}"#).unwrap();
        let history = run_task(
            &simple_model,
            &payload,
            1,
            &mut CollectedResults::default(),
            &mut LogMonitor,
        );
        assert_eq!(history.status, PhaseStatus::Error);
        assert_eq!(history.message, "All scenarios have failed for phase 0");
    }
}
