//! Adaptive time stepping
//!
//! # Algorithm
//!
//! Each attempt advances the model by the current step `dt`:
//!
//! 1. Sweep every equation until the combined residual `sqrt(Σ r²)` drops
//!    below `max_residual` or `max_sweeps` is reached. A numerical error of
//!    the linear solve ends the attempt with a sentinel residual.
//! 2. A residual still at or above the target rejects the attempt: the
//!    tentative values are reverted and `dt` is halved.
//! 3. An accepted attempt commits the values, accounts the equation
//!    budgets and advances the clock by `dt`.
//! 4. When every residual of the recent window (10 attempts) lies below the
//!    target, `dt` grows by a factor 1.25.
//!
//! `dt` always stays within `simtime_lims` and never overshoots the total
//! simulated time, so the run ends exactly on it.
//!
//! # Safety valves
//!
//! - more than `max_retries` consecutive rejections ([`BenthosError::RetryLimit`])
//! - a halved step below the minimum ([`BenthosError::StepSizeExhausted`])
//! - a first sweep with a residual of exactly zero, which points at a
//!   degenerate model ([`BenthosError::ZeroResidual`])
//!
//! # Example
//!
//! ```rust,ignore
//! let mut sim = Simulation::new(SimulationConfig::default().with_total_hours(1.0))?;
//! for output in sim.evolution(&mut model)? {
//!     let output = output?;
//!     if let Some(state) = output.state {
//!         store.append(&state)?;
//!     }
//! }
//! ```

use std::collections::VecDeque;

use tracing::{debug, info, warn};

use crate::entity::StateNode;
use crate::error::{BenthosError, BenthosResult};
use crate::solver::traits::{SimulationConfig, Steppable};

/// Number of recent residuals that decide step growth
pub const WINDOW: usize = 10;

/// Factor applied to `dt` after a run of good residuals
pub const GROWTH_FACTOR: f64 = 1.25;

/// Factor applied to `dt` after a rejected attempt
pub const SHRINK_FACTOR: f64 = 0.5;

/// Residual recorded when a sweep failed numerically
pub const RESIDUAL_SENTINEL: f64 = f64::MAX;

const TIME_EPS: f64 = 1e-9;

/// Whether an evolution is running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationState {
    /// No evolution
    Idle,
    /// An evolution is borrowing the simulation
    Evolving,
}

/// Result of one attempt
#[derive(Debug, Clone)]
pub struct StepOutput {
    /// Number of accepted steps so far
    pub step: usize,
    /// Model time after the attempt (s)
    pub time: f64,
    /// Step size of the attempt (s)
    pub dt: f64,
    /// Combined residual of the last sweep
    pub residual: f64,
    /// Sweeps performed
    pub sweeps: usize,
    /// Whether the attempt was committed
    pub accepted: bool,
    /// Full model state, on snapshot steps
    pub state: Option<StateNode>,
}

impl StepOutput {
    /// Whether the output carries a full snapshot
    pub fn is_snapshot(&self) -> bool {
        self.state.is_some()
    }
}

/// Adaptive simulation of a [`Steppable`] model
#[derive(Debug)]
pub struct Simulation {
    config: SimulationConfig,
    dt: f64,
    dt_min: f64,
    dt_max: f64,
    interval: f64,
    residuals: VecDeque<f64>,
    sweeps: VecDeque<usize>,
    state: SimulationState,
}

impl Simulation {
    /// Validate `config` and prepare the step state
    pub fn new(config: SimulationConfig) -> BenthosResult<Self> {
        config.validate()?;
        let (dt_min, dt_max) = config.lims_seconds()?;
        let dt = config.step_seconds()?.clamp(dt_min, dt_max);
        let interval = config.interval_seconds()?;
        debug!(
            "Simulation: dt={} s in [{}, {}] s, max_sweeps={}, max_residual={:e}",
            dt, dt_min, dt_max, config.max_sweeps, config.max_residual
        );
        Ok(Self {
            config,
            dt,
            dt_min,
            dt_max,
            interval,
            residuals: VecDeque::with_capacity(WINDOW),
            sweeps: VecDeque::with_capacity(WINDOW),
            state: SimulationState::Idle,
        })
    }

    /// The configuration
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Step size of the next attempt
    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// Step limits in seconds
    pub fn dt_lims(&self) -> (f64, f64) {
        (self.dt_min, self.dt_max)
    }

    /// Evolution state
    pub fn state(&self) -> SimulationState {
        self.state
    }

    /// Residuals of the recent attempts, oldest first
    pub fn recent_residuals(&self) -> impl Iterator<Item = f64> + '_ {
        self.residuals.iter().copied()
    }

    /// Sweep counts of the recent attempts, oldest first
    pub fn recent_sweeps(&self) -> impl Iterator<Item = usize> + '_ {
        self.sweeps.iter().copied()
    }

    /// Total simulated time for `model` in seconds
    ///
    /// With `simtime_days` set this is that many diel periods of the model.
    pub fn total_time<M: Steppable + ?Sized>(&self, model: &M) -> BenthosResult<f64> {
        match self.config.simtime_days {
            None => self.config.total_seconds(),
            Some(days) => {
                let period = model.diel_period().ok_or_else(|| {
                    BenthosError::config("simulation", "simtime_days requires an irradiance")
                })?;
                let total = days * period;
                warn!(
                    "Setting simtime_total={} h for {} days of simtime",
                    total / 3600.0,
                    days
                );
                Ok(total)
            }
        }
    }

    /// Start evolving `model`
    ///
    /// The returned iterator first yields the initial snapshot, then one
    /// output per attempt until the total time is reached.
    pub fn evolution<'a, M: Steppable + ?Sized>(
        &'a mut self,
        model: &'a mut M,
    ) -> BenthosResult<Evolution<'a, M>> {
        if self.state == SimulationState::Evolving {
            return Err(BenthosError::AlreadyEvolving);
        }
        let total = self.total_time(model)?;
        let start = model.clock().seconds();
        info!(
            "Simulation evolution starting at {} towards {} h",
            model.clock(),
            total / 3600.0
        );
        self.state = SimulationState::Evolving;
        Ok(Evolution {
            sim: self,
            model,
            total,
            step: 0,
            retries: 0,
            last_snapshot: start,
            phase: Phase::Start,
        })
    }

    fn record(&mut self, residual: f64, sweeps: usize) {
        if self.residuals.len() == WINDOW {
            self.residuals.pop_front();
            self.sweeps.pop_front();
        }
        self.residuals.push_back(residual);
        self.sweeps.push_back(sweeps);
    }

    fn grow(&mut self) {
        let target = self.config.max_residual;
        if self.residuals.iter().all(|r| *r < target) {
            let next = (self.dt * GROWTH_FACTOR).min(self.dt_max);
            if next > self.dt {
                debug!("Growing time step {} -> {} s", self.dt, next);
            }
            self.dt = next;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Start,
    Running,
    Done,
}

/// A running evolution; see [`Simulation::evolution`]
pub struct Evolution<'a, M: Steppable + ?Sized> {
    sim: &'a mut Simulation,
    model: &'a mut M,
    total: f64,
    step: usize,
    retries: usize,
    last_snapshot: f64,
    phase: Phase,
}

impl<M: Steppable + ?Sized> Evolution<'_, M> {
    /// Total simulated time in seconds
    pub fn total_time(&self) -> f64 {
        self.total
    }

    /// Accepted steps so far
    pub fn steps(&self) -> usize {
        self.step
    }

    fn remaining(&self) -> f64 {
        self.total - self.model.clock().seconds()
    }

    fn initial(&mut self) -> BenthosResult<StepOutput> {
        self.model.update_vars()?;
        let time = self.model.clock().seconds();
        Ok(StepOutput {
            step: 0,
            time,
            dt: 0.0,
            residual: 0.0,
            sweeps: 0,
            accepted: true,
            state: Some(self.model.snapshot()?),
        })
    }

    fn run_sweeps(&mut self, dt: f64) -> BenthosResult<(f64, usize)> {
        let max_sweeps = self.sim.config.max_sweeps;
        let target = self.sim.config.max_residual;
        let solver = self.sim.config.solver;
        let mut residual = RESIDUAL_SENTINEL;
        let mut sweeps = 0;
        while sweeps < max_sweeps {
            sweeps += 1;
            let per_equation = match self.model.sweep(dt, solver) {
                Ok(res) => res,
                Err(err) if err.is_numerical() => {
                    warn!("Sweep {} failed: {}", sweeps, err);
                    residual = RESIDUAL_SENTINEL;
                    break;
                }
                Err(err) => return Err(err),
            };
            let combined = per_equation.iter().map(|(_, r)| r * r).sum::<f64>().sqrt();
            if sweeps == 1 && combined == 0.0 {
                let equations = per_equation
                    .iter()
                    .filter(|(_, r)| *r == 0.0)
                    .map(|(name, _)| name.clone())
                    .collect();
                return Err(BenthosError::ZeroResidual { equations, dt });
            }
            if !combined.is_finite() {
                warn!("Sweep {} gave a non-finite residual", sweeps);
                residual = RESIDUAL_SENTINEL;
                break;
            }
            residual = combined;
            debug!("Sweeps: {}  residual: {:.2e}", sweeps, residual);
            if residual < target {
                break;
            }
        }
        Ok((residual, sweeps))
    }

    fn attempt(&mut self) -> BenthosResult<StepOutput> {
        let dt = self.sim.dt.min(self.remaining());
        let (residual, sweeps) = self.run_sweeps(dt)?;
        self.sim.record(residual, sweeps);

        if residual < self.sim.config.max_residual {
            self.model.update_vars()?;
            self.model.update_equations(dt)?;
            self.model.advance_clock(dt)?;
            self.step += 1;
            self.retries = 0;
            self.sim.grow();

            let time = self.model.clock().seconds();
            let finished = self.total - time <= TIME_EPS * self.total.max(1.0);
            let due = time - self.last_snapshot >= self.sim.interval - TIME_EPS;
            let state = if due || finished {
                self.last_snapshot = time;
                Some(self.model.snapshot()?)
            } else {
                None
            };
            debug!(
                "Step #{} accepted: t={:.3} s dt={} s residual={:.2e} sweeps={}",
                self.step, time, dt, residual, sweeps
            );
            return Ok(StepOutput {
                step: self.step,
                time,
                dt,
                residual,
                sweeps,
                accepted: true,
                state,
            });
        }

        self.model.revert_vars()?;
        self.retries += 1;
        warn!(
            "Step rejected: dt={} s residual={:.2e} after {} sweeps (retry {})",
            dt, residual, sweeps, self.retries
        );
        if self.retries > self.sim.config.max_retries {
            return Err(BenthosError::RetryLimit {
                retries: self.retries,
                dt,
            });
        }
        let next = dt * SHRINK_FACTOR;
        if next < self.sim.dt_min {
            return Err(BenthosError::StepSizeExhausted {
                dt: next,
                min: self.sim.dt_min,
            });
        }
        self.sim.dt = next;
        Ok(StepOutput {
            step: self.step,
            time: self.model.clock().seconds(),
            dt,
            residual,
            sweeps,
            accepted: false,
            state: None,
        })
    }
}

impl<M: Steppable + ?Sized> Iterator for Evolution<'_, M> {
    type Item = BenthosResult<StepOutput>;

    fn next(&mut self) -> Option<Self::Item> {
        let result = match self.phase {
            Phase::Done => return None,
            Phase::Start => {
                self.phase = Phase::Running;
                self.initial()
            }
            Phase::Running => {
                if self.remaining() <= TIME_EPS * self.total.max(1.0) {
                    info!(
                        "Simulation evolution completed after {} steps at {}",
                        self.step,
                        self.model.clock()
                    );
                    self.phase = Phase::Done;
                    return None;
                }
                self.attempt()
            }
        };
        if let Err(err) = &result {
            warn!("Simulation evolution aborted: {}", err);
            self.phase = Phase::Done;
        }
        Some(result)
    }
}

impl<M: Steppable + ?Sized> Drop for Evolution<'_, M> {
    fn drop(&mut self) {
        self.sim.state = SimulationState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::LinearSolver;
    use crate::solver::ModelClock;
    use approx::assert_relative_eq;

    /// Model whose sweeps fail above a step size
    struct MockModel {
        clock: ModelClock,
        fail_above: f64,
        numerical_failure: bool,
        zero_residual: bool,
        reverts: usize,
        updates: usize,
        budget_time: f64,
        snapshots: usize,
        period: Option<f64>,
    }

    impl MockModel {
        fn new() -> Self {
            Self {
                clock: ModelClock::new(),
                fail_above: f64::INFINITY,
                numerical_failure: false,
                zero_residual: false,
                reverts: 0,
                updates: 0,
                budget_time: 0.0,
                snapshots: 0,
                period: None,
            }
        }
    }

    impl Steppable for MockModel {
        fn clock(&self) -> ModelClock {
            self.clock
        }

        fn sweep(&mut self, dt: f64, _solver: LinearSolver) -> BenthosResult<Vec<(String, f64)>> {
            if self.zero_residual {
                return Ok(vec![("oxyEqn".to_string(), 0.0), ("h2sEqn".to_string(), 1e-3)]);
            }
            if dt > self.fail_above {
                if self.numerical_failure {
                    return Err(BenthosError::numerical("singular matrix"));
                }
                return Ok(vec![("oxyEqn".to_string(), 1.0)]);
            }
            Ok(vec![("oxyEqn".to_string(), 1e-12)])
        }

        fn update_vars(&mut self) -> BenthosResult<()> {
            self.updates += 1;
            Ok(())
        }

        fn revert_vars(&mut self) -> BenthosResult<()> {
            self.reverts += 1;
            Ok(())
        }

        fn update_equations(&mut self, dt: f64) -> BenthosResult<()> {
            self.budget_time += dt;
            Ok(())
        }

        fn advance_clock(&mut self, dt: f64) -> BenthosResult<()> {
            self.clock.increment_time(dt)
        }

        fn snapshot(&self) -> BenthosResult<StateNode> {
            Ok(StateNode::new().meta("time", self.clock.seconds()))
        }

        fn diel_period(&self) -> Option<f64> {
            self.period
        }
    }

    fn config(total_s: f64, step: f64, min: f64, max: f64) -> SimulationConfig {
        SimulationConfig::default()
            .with_total_hours(total_s / 3600.0)
            .with_step(step)
            .with_lims(min, max)
    }

    fn run(sim: &mut Simulation, model: &mut MockModel) -> BenthosResult<Vec<StepOutput>> {
        sim.evolution(model)?.collect()
    }

    #[test]
    fn test_first_output_is_initial_snapshot() {
        let mut sim = Simulation::new(config(60.0, 1.0, 0.1, 10.0)).unwrap();
        let mut model = MockModel::new();
        let first = sim.evolution(&mut model).unwrap().next().unwrap().unwrap();
        assert_eq!(first.step, 0);
        assert_eq!(first.time, 0.0);
        assert!(first.is_snapshot());
        assert_eq!(model.updates, 1);
    }

    #[test]
    fn test_runs_exactly_to_total_time() {
        let mut sim = Simulation::new(config(600.0, 1.0, 0.1, 60.0)).unwrap();
        let mut model = MockModel::new();
        let outputs = run(&mut sim, &mut model).unwrap();

        let last = outputs.last().unwrap();
        assert_relative_eq!(last.time, 600.0, epsilon = 1e-9);
        assert!(last.is_snapshot());
        assert_relative_eq!(model.clock.seconds(), 600.0, epsilon = 1e-9);
        assert_relative_eq!(model.budget_time, 600.0, epsilon = 1e-9);
        assert!(outputs.iter().all(|o| o.accepted));
        assert_eq!(sim.state(), SimulationState::Idle);
    }

    #[test]
    fn test_step_grows_until_max() {
        let mut sim = Simulation::new(config(3600.0, 1.0, 0.1, 30.0)).unwrap();
        let mut model = MockModel::new();
        let outputs = run(&mut sim, &mut model).unwrap();

        assert_relative_eq!(outputs[1].dt, 1.0);
        assert_relative_eq!(outputs[2].dt, 1.25);
        assert_relative_eq!(outputs[3].dt, 1.5625);
        assert!(outputs.iter().all(|o| o.dt <= 30.0));
        assert!(outputs.iter().any(|o| o.dt == 30.0));
    }

    #[test]
    fn test_rejection_reverts_and_halves() {
        let mut sim = Simulation::new(config(120.0, 20.0, 0.1, 60.0)).unwrap();
        let mut model = MockModel::new();
        model.fail_above = 5.0;
        let outputs = run(&mut sim, &mut model).unwrap();

        let rejected: Vec<_> = outputs.iter().filter(|o| !o.accepted).collect();
        assert_eq!(rejected[0].dt, 20.0);
        assert_eq!(rejected[1].dt, 10.0);
        assert_eq!(rejected[0].time, 0.0);
        assert!(rejected.iter().all(|o| o.state.is_none()));
        assert_eq!(model.reverts, rejected.len());

        let first_accepted = outputs.iter().skip(1).find(|o| o.accepted).unwrap();
        assert_eq!(first_accepted.dt, 5.0);
        assert!(outputs.iter().filter(|o| o.accepted).all(|o| o.dt <= 5.0));
        assert_relative_eq!(model.clock.seconds(), 120.0, epsilon = 1e-9);
    }

    #[test]
    fn test_rejection_holds_growth_for_a_window() {
        let mut sim = Simulation::new(config(600.0, 8.0, 0.1, 60.0)).unwrap();
        let mut model = MockModel::new();
        model.fail_above = 5.0;
        let outputs = run(&mut sim, &mut model).unwrap();
        let accepted: Vec<_> = outputs.iter().skip(1).filter(|o| o.accepted).collect();
        // the rejection stays in the window for the next accepted steps
        assert!(accepted[..WINDOW - 1].iter().all(|o| o.dt == 4.0));
    }

    #[test]
    fn test_numerical_errors_are_recovered() {
        let mut sim = Simulation::new(config(60.0, 4.0, 0.1, 60.0)).unwrap();
        let mut model = MockModel::new();
        model.fail_above = 1.0;
        model.numerical_failure = true;
        let outputs = run(&mut sim, &mut model).unwrap();
        let rejected = outputs.iter().find(|o| !o.accepted).unwrap();
        assert_eq!(rejected.residual, RESIDUAL_SENTINEL);
        assert_eq!(rejected.sweeps, 1);
        assert_relative_eq!(model.clock.seconds(), 60.0, epsilon = 1e-9);
    }

    #[test]
    fn test_retry_limit() {
        let mut cfg = config(60.0, 1.0, 1e-6, 10.0);
        cfg.max_retries = 3;
        let mut sim = Simulation::new(cfg).unwrap();
        let mut model = MockModel::new();
        model.fail_above = 0.0;
        let err = run(&mut sim, &mut model).unwrap_err();
        assert!(matches!(err, BenthosError::RetryLimit { retries: 4, .. }));
        assert_eq!(model.clock.seconds(), 0.0);
    }

    #[test]
    fn test_step_size_exhausted() {
        let mut sim = Simulation::new(config(60.0, 1.0, 0.4, 10.0)).unwrap();
        let mut model = MockModel::new();
        model.fail_above = 0.0;
        let err = run(&mut sim, &mut model).unwrap_err();
        assert!(matches!(err, BenthosError::StepSizeExhausted { min, .. } if min == 0.4));
    }

    #[test]
    fn test_zero_residual_fails_loudly() {
        struct Degenerate(ModelClock);
        impl Steppable for Degenerate {
            fn clock(&self) -> ModelClock {
                self.0
            }
            fn sweep(&mut self, _dt: f64, _s: LinearSolver) -> BenthosResult<Vec<(String, f64)>> {
                Ok(vec![("oxyEqn".to_string(), 0.0)])
            }
            fn update_vars(&mut self) -> BenthosResult<()> {
                Ok(())
            }
            fn revert_vars(&mut self) -> BenthosResult<()> {
                Ok(())
            }
            fn update_equations(&mut self, _dt: f64) -> BenthosResult<()> {
                Ok(())
            }
            fn advance_clock(&mut self, dt: f64) -> BenthosResult<()> {
                self.0.increment_time(dt)
            }
            fn snapshot(&self) -> BenthosResult<StateNode> {
                Ok(StateNode::new())
            }
        }
        let mut sim = Simulation::new(config(60.0, 1.0, 0.1, 10.0)).unwrap();
        let mut degenerate = Degenerate(ModelClock::new());
        let mut evolution = sim.evolution(&mut degenerate).unwrap();
        evolution.next().unwrap().unwrap();
        match evolution.next().unwrap() {
            Err(BenthosError::ZeroResidual { equations, .. }) => assert_eq!(equations, ["oxyEqn"]),
            other => panic!("expected a zero residual error, got {:?}", other),
        }
        assert!(evolution.next().is_none());
    }

    #[test]
    fn test_single_zero_equation_is_not_degenerate() {
        let mut sim = Simulation::new(config(60.0, 1.0, 0.1, 10.0)).unwrap();
        let mut model = MockModel::new();
        model.zero_residual = true;
        let second = sim.evolution(&mut model).unwrap().nth(1).unwrap().unwrap();
        assert!(!second.accepted);
        assert_relative_eq!(second.residual, 1e-3);
    }

    #[test]
    fn test_snapshot_cadence() {
        let mut sim = Simulation::new(
            config(300.0, 10.0, 10.0, 10.0).with_snapshot_interval(60.0),
        )
        .unwrap();
        let mut model = MockModel::new();
        let outputs = run(&mut sim, &mut model).unwrap();
        let times: Vec<f64> = outputs
            .iter()
            .filter(|o| o.is_snapshot())
            .map(|o| o.time.round())
            .collect();
        assert_eq!(times, vec![0.0, 60.0, 120.0, 180.0, 240.0, 300.0]);
        assert_eq!(outputs.len(), 31);
    }

    #[test]
    fn test_simtime_days_uses_diel_period() {
        let cfg = SimulationConfig {
            simtime_days: Some(0.5),
            ..config(60.0, 1.0, 0.1, 60.0)
        };
        let sim = Simulation::new(cfg).unwrap();
        let mut model = MockModel::new();
        assert!(sim.total_time(&model).is_err());
        model.period = Some(3600.0);
        assert_relative_eq!(sim.total_time(&model).unwrap(), 1800.0);
    }

    #[test]
    fn test_evolution_state_resets_on_drop() {
        let mut sim = Simulation::new(config(60.0, 1.0, 0.1, 10.0)).unwrap();
        let mut model = MockModel::new();
        {
            let mut evolution = sim.evolution(&mut model).unwrap();
            evolution.next();
        }
        assert_eq!(sim.state(), SimulationState::Idle);
        let restarted = sim.evolution(&mut model).unwrap().count();
        assert!(restarted > 1);
    }
}
