//! Run a simulation into exporters

use tracing::{info, warn};

use crate::error::BenthosResult;
use crate::output::export::Exporter;
use crate::solver::simulation::Simulation;
use crate::solver::traits::Steppable;

/// Counts of a finished run
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunSummary {
    /// Accepted steps
    pub steps: usize,
    /// Rejected attempts
    pub rejected: usize,
    /// Full snapshots emitted
    pub snapshots: usize,
    /// Model time at the end (s)
    pub final_time: f64,
}

/// Drives a [`Simulation`] and forwards every output to its exporters
#[derive(Default)]
pub struct SimulationRunner {
    exporters: Vec<Box<dyn Exporter>>,
}

impl SimulationRunner {
    /// Runner without exporters
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: add an exporter
    pub fn with_exporter(mut self, exporter: Box<dyn Exporter>) -> Self {
        self.exporters.push(exporter);
        self
    }

    /// Add an exporter
    pub fn add_exporter(&mut self, exporter: Box<dyn Exporter>) {
        self.exporters.push(exporter);
    }

    /// Names of the exporters, in call order
    pub fn exporter_names(&self) -> Vec<&str> {
        self.exporters.iter().map(|e| e.name()).collect()
    }

    /// Evolve `model` to the end and finish the exporters
    ///
    /// Exporters are finished even when the evolution fails, so whatever was
    /// exported up to the failure is kept.
    pub fn run<M: Steppable + ?Sized>(
        &mut self,
        sim: &mut Simulation,
        model: &mut M,
    ) -> BenthosResult<RunSummary> {
        for exporter in self.exporters.iter_mut() {
            exporter.prepare(sim.config())?;
        }
        info!("Running simulation with exporters {:?}", self.exporter_names());

        let result = self.drive(sim, model);

        for exporter in self.exporters.iter_mut() {
            if let Err(err) = exporter.finish() {
                warn!("Exporter {} failed to finish: {}", exporter.name(), err);
                if result.is_ok() {
                    return Err(err);
                }
            }
        }
        let summary = result?;
        info!(
            "Simulation done: {} steps ({} rejected), {} snapshots, t = {} s",
            summary.steps, summary.rejected, summary.snapshots, summary.final_time
        );
        Ok(summary)
    }

    fn drive<M: Steppable + ?Sized>(
        &mut self,
        sim: &mut Simulation,
        model: &mut M,
    ) -> BenthosResult<RunSummary> {
        let mut summary = RunSummary::default();
        for output in sim.evolution(model)? {
            let output = output?;
            if output.accepted {
                summary.steps = output.step;
            } else {
                summary.rejected += 1;
            }
            if output.is_snapshot() {
                summary.snapshots += 1;
            }
            summary.final_time = output.time;
            for exporter in self.exporters.iter_mut() {
                exporter.process(&output)?;
            }
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::StateNode;
    use crate::error::BenthosError;
    use crate::physics::LinearSolver;
    use crate::solver::{ModelClock, SimulationConfig, StepOutput};
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Ramp {
        clock: ModelClock,
        fail_at: Option<f64>,
    }

    impl Steppable for Ramp {
        fn clock(&self) -> ModelClock {
            self.clock
        }
        fn sweep(&mut self, _dt: f64, _solver: LinearSolver) -> BenthosResult<Vec<(String, f64)>> {
            if let Some(t) = self.fail_at
                && self.clock.seconds() >= t
            {
                return Err(BenthosError::config("ramp", "broken"));
            }
            Ok(vec![("eqn".to_string(), 1e-12)])
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
            self.clock.increment_time(dt)
        }
        fn snapshot(&self) -> BenthosResult<StateNode> {
            Ok(StateNode::new())
        }
    }

    #[derive(Default)]
    struct Log {
        prepared: bool,
        processed: usize,
        finished: bool,
    }

    struct Recorder(Rc<RefCell<Log>>);

    impl Exporter for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }
        fn prepare(&mut self, _config: &SimulationConfig) -> BenthosResult<()> {
            self.0.borrow_mut().prepared = true;
            Ok(())
        }
        fn process(&mut self, _output: &StepOutput) -> BenthosResult<()> {
            self.0.borrow_mut().processed += 1;
            Ok(())
        }
        fn finish(&mut self) -> BenthosResult<()> {
            self.0.borrow_mut().finished = true;
            Ok(())
        }
    }

    fn config() -> SimulationConfig {
        SimulationConfig::default()
            .with_total_hours(0.1)
            .with_step(30.0)
            .with_lims(30.0, 30.0)
    }

    #[test]
    fn test_runner_feeds_exporters() {
        let log = Rc::new(RefCell::new(Log::default()));
        let mut runner = SimulationRunner::new().with_exporter(Box::new(Recorder(log.clone())));
        let mut sim = Simulation::new(config()).unwrap();
        let mut model = Ramp {
            clock: ModelClock::new(),
            fail_at: None,
        };
        let summary = runner.run(&mut sim, &mut model).unwrap();

        assert_eq!(summary.steps, 12);
        assert_eq!(summary.rejected, 0);
        assert_eq!(runner.exporter_names(), ["recorder"]);
        let log = log.borrow();
        assert!(log.prepared && log.finished);
        assert_eq!(log.processed, 13);
    }

    #[test]
    fn test_exporters_finish_on_failure() {
        let log = Rc::new(RefCell::new(Log::default()));
        let mut runner = SimulationRunner::new().with_exporter(Box::new(Recorder(log.clone())));
        let mut sim = Simulation::new(config()).unwrap();
        let mut model = Ramp {
            clock: ModelClock::new(),
            fail_at: Some(60.0),
        };
        assert!(runner.run(&mut sim, &mut model).is_err());
        let log = log.borrow();
        assert!(log.finished);
        assert_eq!(log.processed, 3);
    }
}
