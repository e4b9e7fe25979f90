//! Common utilities for integration tests

#![allow(dead_code)]

use microbenthos_rs::model::MicroBenthosModel;
use microbenthos_rs::physics::LinearSolver;
use microbenthos_rs::solver::Steppable;
use tracing_subscriber::EnvFilter;

/// Oxygen diffusing into a sediment with first-order consumption
pub const DECAY_MODEL: &str = r#"
domain:
  cls: SedimentDBLDomain
  init_params: {cell_size: 0.1 mm, sediment_length: 2 mm, dbl_length: 1 mm}
environment:
  oxy:
    cls: Variable
    init_params:
      create: {value: 0.1, unit: mol/m**3, hasOld: true}
      constraints: {top: 0.2}
  D_oxy:
    cls: Variable
    init_params:
      create: {value: 2.0e-9, unit: m**2/s}
  resp:
    cls: Process
    init_params:
      expr: -k * oxy
      params: {k: 1.0e-3}
equations:
  oxyEqn:
    transient: [env.oxy, 1]
    diffusion: [env.D_oxy, 1]
    sources: [[env.resp, 1]]
    track_budget: true
"#;

/// A cyanobacterial mat: light-driven oxygen production under a diel cycle
pub const MAT_MODEL: &str = r#"
domain:
  cls: SedimentDBLDomain
  init_params: {cell_size: 0.1 mm, sediment_length: 2 mm, dbl_length: 1 mm}
formulae:
  saturation:
    vars: [x, Ks]
    expr: x / (Ks + x)
environment:
  oxy:
    cls: Variable
    init_params:
      create: {value: 0.1, unit: mol/m**3, hasOld: true}
      constraints: {top: 0.2}
      clip_min: 0
  D_oxy:
    cls: Variable
    init_params:
      create: {value: 2.0e-9, unit: m**2/s}
  irradiance:
    cls: Irradiance
    init_params:
      hours_total: 4
      day_fraction: 0.5
      channels:
        - name: par
          k0: 15
  resp:
    cls: Process
    init_params:
      expr: -k * oxy
      params: {k: 1.0e-3}
microbes:
  cyano:
    cls: MicrobialGroup
    init_params:
      features:
        biomass:
          create: {value: 1.0, unit: kg/m**3}
      processes:
        oxyProd:
          expr: Pmax * biomass * saturation(par, Ks)
          params: {Pmax: 1.0e-6, Ks: 20}
          implicit: false
equations:
  oxyEqn:
    transient: [env.oxy, 1]
    diffusion: [env.D_oxy, 1]
    sources:
      - [env.resp, 1]
      - [microbes.cyano.processes.oxyProd, 1]
    track_budget: true
"#;

/// Consumption switched on after oxygen has been present for 10 s, scaled
/// by a response that doubles once the cell was exposed at all
pub const EVENT_MODEL: &str = r#"
domain:
  cls: SedimentDBLDomain
  init_params: {cell_size: 0.1 mm, sediment_length: 2 mm, dbl_length: 1 mm}
environment:
  oxy:
    cls: Variable
    init_params:
      create: {value: 0.1, unit: mol/m**3, hasOld: true}
  resp:
    cls: Process
    init_params:
      expr: -k * oxy**2 * (induced > 10)
      params: {k: 1.0}
      events:
        induced:
          expr: oxy > 0.05
      responses:
        lag:
          expr: 1 + (exposed > 0)
          events:
            exposed:
              expr: oxy > 0
equations:
  oxyEqn:
    transient: [env.oxy, 1]
    sources: [[env.resp, 1]]
"#;

/// Route model logs to the test output, filtered by `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Build a model from one of the definitions above
pub fn build(yaml: &str) -> MicroBenthosModel {
    init_tracing();
    MicroBenthosModel::from_yaml_str(yaml).unwrap()
}

/// One accepted step of `dt`, the way the adaptive loop commits it
pub fn commit_step(model: &mut MicroBenthosModel, dt: f64) {
    for _ in 0..3 {
        model.sweep(dt, LinearSolver::Tridiagonal).unwrap();
    }
    model.update_vars().unwrap();
    model.update_equations(dt).unwrap();
    model.advance_clock(dt).unwrap();
}

/// Values of the field registered at a model path
pub fn values_of(model: &MicroBenthosModel, path: &str) -> Vec<f64> {
    let id = model.field_paths()[path];
    model.domain().field(id).values().iter().copied().collect()
}

/// Compute relative error: |actual - expected| / |expected|
pub fn relative_error(actual: f64, expected: f64) -> f64 {
    if expected.abs() < 1e-10 {
        (actual - expected).abs()
    } else {
        (actual - expected).abs() / expected.abs()
    }
}
