//! Integration tests for splitting a run into phases.
use mine2farm::model::Model;
use mine2farm::output::CollectedResults;
use mine2farm::simulation::{SimulateOptions, Simulator};
use mine2farm::worker::LogMonitor;
use std::path::Path;

fn load(name: &str) -> Model {
    Model::from_path(Path::new("demos").join(name)).unwrap()
}

/// Scenario ordinals and costs for one phase
fn run_phase(model: &Model, cycle: usize, phase: usize) -> Vec<(usize, f64)> {
    let mut simulator = Simulator::new(model, None).unwrap();
    let generator = simulator.generator().unwrap();
    let options = SimulateOptions {
        cycle,
        phase,
        ..SimulateOptions::default()
    };
    let mut results = CollectedResults::default();
    simulator
        .simulate(generator.as_ref(), &options, &mut results, &mut LogMonitor)
        .unwrap();
    results
        .globals()
        .map(|global| (global.scenario, global.cost_pv))
        .collect()
}

#[test]
fn test_phases_cover_every_scenario_once() {
    let model = load("extended");
    let all = run_phase(&model, 1, 0);
    assert_eq!(all.len(), 4);

    for cycle in 2..=3 {
        let mut phased: Vec<_> = (0..cycle)
            .flat_map(|phase| run_phase(&model, cycle, phase))
            .collect();
        phased.sort_by_key(|(scenario, _)| *scenario);
        assert_eq!(phased, all, "cycle {cycle}");
    }
}

#[test]
fn test_runs_are_idempotent() {
    // Entities are reset between scenarios, so costs do not depend on what was valued before
    for name in ["simple", "extended"] {
        let model = load(name);
        assert_eq!(run_phase(&model, 1, 0), run_phase(&model, 1, 0));
    }
}
