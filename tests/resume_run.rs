//! Integration tests: snapshot store + resume
//!
//! A run is recorded to disk, restored at an earlier time point and
//! continued into the same store.

use approx::assert_relative_eq;

use microbenthos_rs::error::BenthosError;
use microbenthos_rs::output::{
    check_compatibility, restore_at, truncate, ModelDataExporter, SnapshotStore,
};
use microbenthos_rs::solver::{Simulation, SimulationConfig, SimulationRunner, Steppable};

mod common;
use common::{build, values_of, DECAY_MODEL, EVENT_MODEL, MAT_MODEL};

fn config(hours: f64) -> SimulationConfig {
    SimulationConfig::default()
        .with_total_hours(hours)
        .with_snapshot_interval(60.0)
}

fn record(yaml: &str, path: &std::path::Path, hours: f64) {
    let mut model = build(yaml);
    let mut sim = Simulation::new(config(hours)).unwrap();
    let mut runner = SimulationRunner::new().with_exporter(Box::new(ModelDataExporter::new(path)));
    runner.run(&mut sim, &mut model).unwrap();
}

#[test]
fn test_recorded_store_matches_snapshots() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("simulation_data.json");
    record(DECAY_MODEL, &path, 0.1);

    let store = SnapshotStore::load(&path).unwrap();
    let times = store.times();
    assert_eq!(times[0], 0.0);
    assert_relative_eq!(*times.last().unwrap(), 360.0, epsilon = 1e-9);
    for pair in times.windows(2) {
        assert!(pair[1] - pair[0] >= 60.0 - 1e-6);
    }

    let oxy = store.root().unwrap().get(&["env", "oxy"]).unwrap();
    assert_eq!(oxy.require_data("oxy").unwrap().array.shape(), &[times.len(), 30]);
    check_compatibility(&build(DECAY_MODEL), &store).unwrap();
}

#[test]
fn test_other_model_is_incompatible() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("simulation_data.json");
    record(DECAY_MODEL, &path, 0.05);

    let store = SnapshotStore::load(&path).unwrap();
    let err = check_compatibility(&build(MAT_MODEL), &store).unwrap_err();
    assert!(matches!(err, BenthosError::Incompatible { .. }));
}

#[test]
fn test_resume_continues_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("simulation_data.json");
    record(DECAY_MODEL, &path, 0.1);

    let mut store = SnapshotStore::load(&path).unwrap();
    let recorded = store.len();
    let tidx = recorded / 2;
    let restored_time = store.times()[tidx];

    let mut model = build(DECAY_MODEL);
    let time = restore_at(&mut model, &store, tidx).unwrap();
    assert_relative_eq!(time, restored_time);
    assert_relative_eq!(model.clock().seconds(), restored_time);

    let stored = store.root().unwrap().get(&["env", "oxy"]).unwrap();
    let expected = stored.require_data("oxy").unwrap().to_vector(Some(tidx), 30).unwrap();
    assert_eq!(values_of(&model, "env.oxy"), expected.iter().copied().collect::<Vec<_>>());

    assert_eq!(truncate(&mut store, tidx).unwrap(), tidx);

    let mut sim = Simulation::new(config(0.15)).unwrap();
    let mut runner = SimulationRunner::new()
        .with_exporter(Box::new(ModelDataExporter::new(&path).with_store(store)));
    let summary = runner.run(&mut sim, &mut model).unwrap();
    assert_relative_eq!(summary.final_time, 540.0, epsilon = 1e-9);

    let continued = SnapshotStore::load(&path).unwrap();
    let times = continued.times();
    assert!(continued.len() > recorded);
    assert_relative_eq!(times[tidx], restored_time);
    assert_relative_eq!(*times.last().unwrap(), 540.0, epsilon = 1e-9);
    for pair in times.windows(2) {
        assert!(pair[1] > pair[0], "times must increase: {:?}", times);
    }
}

#[test]
fn test_restore_out_of_range_keeps_model() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("simulation_data.json");
    record(DECAY_MODEL, &path, 0.05);
    let store = SnapshotStore::load(&path).unwrap();

    let mut model = build(DECAY_MODEL);
    let before = values_of(&model, "env.oxy");
    assert!(restore_at(&mut model, &store, store.len()).is_err());
    assert_eq!(values_of(&model, "env.oxy"), before);
    assert_eq!(model.clock().seconds(), 0.0);
}

#[test]
fn test_snapshot_restores_into_fresh_model() {
    let mut model = build(MAT_MODEL);
    model.advance_clock(3600.0).unwrap();
    common::commit_step(&mut model, 20.0);
    let state = model.snapshot().unwrap();

    let mut fresh = build(MAT_MODEL);
    fresh.restore_from(&state, None).unwrap();
    assert_relative_eq!(fresh.clock().seconds(), 3620.0);
    assert_eq!(values_of(&fresh, "env.oxy"), values_of(&model, "env.oxy"));
    assert_eq!(
        values_of(&fresh, "env.irradiance.channels.par"),
        values_of(&model, "env.irradiance.channels.par")
    );
    let again = fresh.snapshot().unwrap();
    assert_eq!(again.child("env"), state.child("env"));
    assert_eq!(again.child("microbes"), state.child("microbes"));
}

#[test]
fn test_restore_keeps_response_event_timers() {
    let mut model = build(EVENT_MODEL);
    model.advance_clock(40.0).unwrap();
    let state = model.snapshot().unwrap();
    let exposed = state
        .get(&["env", "resp", "responses", "lag", "events", "exposed"])
        .unwrap()
        .require_data("exposed")
        .unwrap()
        .to_vector(None, 30)
        .unwrap();
    assert!(exposed.iter().all(|t| *t == 40.0));

    let mut fresh = build(EVENT_MODEL);
    fresh.restore_from(&state, None).unwrap();
    assert_eq!(fresh.snapshot().unwrap().child("env"), state.child("env"));

    // timers continue from the restored value
    fresh.advance_clock(5.0).unwrap();
    let continued = fresh.snapshot().unwrap();
    let timer = continued
        .get(&["env", "resp", "responses", "lag", "events", "exposed"])
        .unwrap()
        .require_data("exposed")
        .unwrap()
        .to_vector(None, 30)
        .unwrap();
    assert_relative_eq!(timer[10], 45.0);
}
