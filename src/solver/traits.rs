//! Simulation configuration and the model interface
//!
//! [`SimulationConfig`] is the `simulation` section of a model definition.
//! Time values accept plain numbers (hours for the total time, seconds for
//! everything else) or quantities with a time unit:
//!
//! ```yaml
//! simulation:
//!   simtime_total: 12 h
//!   simtime_lims: [0.01, 180]
//!   simtime_step: 2 s
//!   snapshot_interval: 10 min
//!   max_sweeps: 15
//!   max_residual: 1.0e-8
//!   solver: tridiagonal
//! ```
//!
//! [`Steppable`] is everything the adaptive loop needs from a model.

use serde::{Deserialize, Serialize};

use crate::entity::StateNode;
use crate::error::{BenthosError, BenthosResult};
use crate::physics::{LinearSolver, ParamValue, Unit};
use crate::solver::ModelClock;

fn default_total() -> ParamValue {
    ParamValue::Number(6.0)
}

fn default_lims() -> (ParamValue, ParamValue) {
    (ParamValue::Number(0.01), ParamValue::Number(180.0))
}

fn default_step() -> ParamValue {
    ParamValue::Number(1.0)
}

fn default_interval() -> ParamValue {
    ParamValue::Number(60.0)
}

fn default_max_sweeps() -> usize {
    15
}

fn default_max_residual() -> f64 {
    1e-8
}

fn default_max_retries() -> usize {
    20
}

/// Parameters of an adaptive simulation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulationConfig {
    /// Total simulated time; plain numbers are hours
    #[serde(default = "default_total")]
    pub simtime_total: ParamValue,

    /// Run for this many diel periods of the irradiance instead
    #[serde(default)]
    pub simtime_days: Option<f64>,

    /// Smallest and largest time step; plain numbers are seconds
    #[serde(default = "default_lims")]
    pub simtime_lims: (ParamValue, ParamValue),

    /// Initial time step; plain numbers are seconds
    #[serde(default = "default_step")]
    pub simtime_step: ParamValue,

    /// Simulated time between full snapshots; plain numbers are seconds
    #[serde(default = "default_interval")]
    pub snapshot_interval: ParamValue,

    /// Sweeps per attempt, at least 2
    #[serde(default = "default_max_sweeps")]
    pub max_sweeps: usize,

    /// Residual below which a step is accepted, at most 1e-6
    #[serde(default = "default_max_residual")]
    pub max_residual: f64,

    /// Consecutive rejections tolerated before the run is aborted
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Linear solver of each sweep
    #[serde(default)]
    pub solver: LinearSolver,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            simtime_total: default_total(),
            simtime_days: None,
            simtime_lims: default_lims(),
            simtime_step: default_step(),
            snapshot_interval: default_interval(),
            max_sweeps: default_max_sweeps(),
            max_residual: default_max_residual(),
            max_retries: default_max_retries(),
            solver: LinearSolver::default(),
        }
    }
}

impl SimulationConfig {
    /// Builder: total simulated time in hours
    pub fn with_total_hours(mut self, hours: f64) -> Self {
        self.simtime_total = ParamValue::Number(hours);
        self
    }

    /// Builder: step limits in seconds
    pub fn with_lims(mut self, min: f64, max: f64) -> Self {
        self.simtime_lims = (ParamValue::Number(min), ParamValue::Number(max));
        self
    }

    /// Builder: initial step in seconds
    pub fn with_step(mut self, seconds: f64) -> Self {
        self.simtime_step = ParamValue::Number(seconds);
        self
    }

    /// Builder: snapshot interval in seconds
    pub fn with_snapshot_interval(mut self, seconds: f64) -> Self {
        self.snapshot_interval = ParamValue::Number(seconds);
        self
    }

    /// Total time in seconds, ignoring `simtime_days`
    pub fn total_seconds(&self) -> BenthosResult<f64> {
        seconds_of(&self.simtime_total, "h", "simtime_total")
    }

    /// Step limits in seconds
    pub fn lims_seconds(&self) -> BenthosResult<(f64, f64)> {
        Ok((
            seconds_of(&self.simtime_lims.0, "s", "simtime_lims")?,
            seconds_of(&self.simtime_lims.1, "s", "simtime_lims")?,
        ))
    }

    /// Initial step in seconds
    pub fn step_seconds(&self) -> BenthosResult<f64> {
        seconds_of(&self.simtime_step, "s", "simtime_step")
    }

    /// Snapshot interval in seconds
    pub fn interval_seconds(&self) -> BenthosResult<f64> {
        seconds_of(&self.snapshot_interval, "s", "snapshot_interval")
    }

    /// Check the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - a time value is not a positive time
    /// - the step limits are not ordered
    /// - `max_sweeps` is below 2 or `max_residual` above 1e-6
    pub fn validate(&self) -> BenthosResult<()> {
        let ctx = "simulation";
        if self.total_seconds()? <= 0.0 {
            return Err(BenthosError::config(ctx, "simtime_total must be > 0"));
        }
        if let Some(days) = self.simtime_days
            && !(days > 0.0)
        {
            return Err(BenthosError::config(
                ctx,
                format!("simtime_days should be > 0, not {}", days),
            ));
        }
        let (min, max) = self.lims_seconds()?;
        if !(min > 0.0) || min > max {
            return Err(BenthosError::config(
                ctx,
                format!("simtime_lims must satisfy 0 < min <= max, got [{}, {}]", min, max),
            ));
        }
        if self.step_seconds()? <= 0.0 {
            return Err(BenthosError::config(ctx, "simtime_step must be > 0"));
        }
        if self.interval_seconds()? <= 0.0 {
            return Err(BenthosError::config(ctx, "snapshot_interval must be > 0"));
        }
        if self.max_sweeps < 2 {
            return Err(BenthosError::config(
                ctx,
                format!("max_sweeps {} should be > 1", self.max_sweeps),
            ));
        }
        if !(self.max_residual > 0.0) || self.max_residual > 1e-6 {
            return Err(BenthosError::config(
                ctx,
                format!("max_residual {} should be in (0, 1e-6]", self.max_residual),
            ));
        }
        Ok(())
    }
}

fn seconds_of(value: &ParamValue, implied: &str, field: &str) -> BenthosResult<f64> {
    let quantity = value.to_quantity(&Unit::parse(implied)?)?;
    quantity
        .in_units_of(&Unit::second())
        .map_err(|_| BenthosError::unit_mismatch(field, quantity.unit.label(), "s"))
}

/// The interface of a model driven by [`Simulation`](crate::solver::Simulation)
pub trait Steppable {
    /// Current simulated time
    fn clock(&self) -> ModelClock;

    /// One sweep of every equation over `dt`, returning the residual of each
    fn sweep(&mut self, dt: f64, solver: LinearSolver) -> BenthosResult<Vec<(String, f64)>>;

    /// Commit the current values as the start of the next step
    fn update_vars(&mut self) -> BenthosResult<()>;

    /// Return to the values at the start of the step
    fn revert_vars(&mut self) -> BenthosResult<()>;

    /// Account an accepted step of `dt`
    fn update_equations(&mut self, dt: f64) -> BenthosResult<()>;

    /// Advance the clock by `dt` and notify time-dependent entities
    fn advance_clock(&mut self, dt: f64) -> BenthosResult<()>;

    /// Full state of the model
    fn snapshot(&self) -> BenthosResult<StateNode>;

    /// Length of the diel cycle in seconds, if the model has one
    fn diel_period(&self) -> Option<f64> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_defaults() {
        let config = SimulationConfig::default();
        config.validate().unwrap();
        assert_relative_eq!(config.total_seconds().unwrap(), 6.0 * 3600.0);
        assert_eq!(config.lims_seconds().unwrap(), (0.01, 180.0));
        assert_eq!(config.max_sweeps, 15);
        assert_eq!(config.solver, LinearSolver::Tridiagonal);
    }

    #[test]
    fn test_units_in_yaml() {
        let config: SimulationConfig = serde_yaml::from_str(
            "simtime_total: 90 min\nsimtime_lims: [0.1, 2 min]\nsnapshot_interval: {value: 5, unit: min}\nsolver: dense_lu\n",
        )
        .unwrap();
        config.validate().unwrap();
        assert_relative_eq!(config.total_seconds().unwrap(), 5400.0);
        assert_relative_eq!(config.lims_seconds().unwrap().1, 120.0);
        assert_relative_eq!(config.interval_seconds().unwrap(), 300.0);
        assert_eq!(config.solver, LinearSolver::DenseLu);
    }

    #[test]
    fn test_validation_failures() {
        let bad_sweeps = SimulationConfig {
            max_sweeps: 1,
            ..Default::default()
        };
        assert!(bad_sweeps.validate().is_err());

        let bad_residual = SimulationConfig {
            max_residual: 1e-3,
            ..Default::default()
        };
        assert!(bad_residual.validate().is_err());

        let bad_lims = SimulationConfig::default().with_lims(10.0, 1.0);
        assert!(bad_lims.validate().is_err());

        let bad_days = SimulationConfig {
            simtime_days: Some(0.0),
            ..Default::default()
        };
        assert!(bad_days.validate().is_err());

        let wrong_unit: SimulationConfig = serde_yaml::from_str("simtime_step: 3 mm\n").unwrap();
        assert!(matches!(
            wrong_unit.validate(),
            Err(BenthosError::UnitMismatch { .. })
        ));
    }
}
