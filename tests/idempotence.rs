//! Integration tests for valuing the same scenarios more than once with one simulator.
use mine2farm::model::Model;
use mine2farm::output::CollectedResults;
use mine2farm::scenario::{ScenarioGenerator, Specific};
use mine2farm::simulation::{SimulateOptions, Simulator};
use mine2farm::worker::LogMonitor;
use std::path::Path;

fn simulate(simulator: &mut Simulator, generator: &dyn ScenarioGenerator) -> CollectedResults {
    let mut results = CollectedResults::default();
    simulator
        .simulate(
            generator,
            &SimulateOptions::default(),
            &mut results,
            &mut LogMonitor,
        )
        .unwrap();
    results
}

#[test]
fn test_repeated_scenarios_have_identical_results() {
    let model = Model::from_path(Path::new("demos/extended")).unwrap();
    let mut simulator = Simulator::new(&model, None).unwrap();
    let doubled = Specific(
        simulator
            .generator()
            .unwrap()
            .scenarios()
            .flat_map(|scenario| [scenario.clone(), scenario])
            .collect(),
    );

    let first = simulate(&mut simulator, &doubled);
    // Two granulation tuples, two scenarios each, every scenario valued twice
    assert_eq!(first.records.len(), 8);
    for pair in first.records.chunks(2) {
        let (global, details) = &pair[0];
        let (again, again_details) = &pair[1];
        assert_eq!(again.scenario, global.scenario + 1);
        assert_eq!(again.cost_pv.to_bits(), global.cost_pv.to_bits());
        assert_eq!(again.moniker, global.moniker);
        assert_eq!(again_details, details);
    }

    // A second pass over the same registry starts from a clean state
    let second = simulate(&mut simulator, &doubled);
    assert_eq!(second.records, first.records);
}
