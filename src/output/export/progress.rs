//! Progress lines through `tracing`

use tracing::{info, warn};

use crate::error::BenthosResult;
use crate::output::export::Exporter;
use crate::solver::{SimulationConfig, StepOutput};

/// Logs the progress of a run
///
/// Every `every`-th accepted step and every snapshot is logged at info
/// level, rejected attempts at warn level.
#[derive(Debug, Clone)]
pub struct ProgressExporter {
    every: usize,
    total_seconds: Option<f64>,
    max_sweeps: usize,
    lines: usize,
}

impl Default for ProgressExporter {
    fn default() -> Self {
        Self {
            every: 1,
            total_seconds: None,
            max_sweeps: 0,
            lines: 0,
        }
    }
}

impl ProgressExporter {
    /// Log only every `every`-th accepted step (at least 1)
    pub fn every(every: usize) -> Self {
        Self {
            every: every.max(1),
            ..Default::default()
        }
    }

    /// Number of lines logged so far
    pub fn lines(&self) -> usize {
        self.lines
    }

    fn progress(&self, time: f64) -> String {
        match self.total_seconds {
            Some(total) if total > 0.0 => format!(
                "{:.1}/{:.1} h ({:.1}%)",
                time / 3600.0,
                total / 3600.0,
                100.0 * time / total
            ),
            _ => format!("{:.1} h", time / 3600.0),
        }
    }
}

impl Exporter for ProgressExporter {
    fn name(&self) -> &str {
        "progress"
    }

    fn prepare(&mut self, config: &SimulationConfig) -> BenthosResult<()> {
        self.total_seconds = match config.simtime_days {
            Some(_) => None,
            None => Some(config.total_seconds()?),
        };
        self.max_sweeps = config.max_sweeps;
        self.lines = 0;
        Ok(())
    }

    fn process(&mut self, output: &StepOutput) -> BenthosResult<()> {
        if !output.accepted {
            warn!(
                "Step {} rejected at {}: dt = {:.3} s, residual = {:.2e} after {}/{} sweeps",
                output.step + 1,
                self.progress(output.time),
                output.dt,
                output.residual,
                output.sweeps,
                self.max_sweeps
            );
            self.lines += 1;
            return Ok(());
        }
        if output.is_snapshot() || output.step % self.every == 0 {
            info!(
                "Step {} at {}: dt = {:.3} s, residual = {:.2e}, sweeps {}/{}{}",
                output.step,
                self.progress(output.time),
                output.dt,
                output.residual,
                output.sweeps,
                self.max_sweeps,
                if output.is_snapshot() { " [snapshot]" } else { "" }
            );
            self.lines += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::StateNode;

    fn output(step: usize, accepted: bool, snapshot: bool) -> StepOutput {
        StepOutput {
            step,
            time: step as f64 * 60.0,
            dt: 60.0,
            residual: 1e-9,
            sweeps: 3,
            accepted,
            state: snapshot.then(StateNode::new),
        }
    }

    #[test]
    fn test_every_nth_step() {
        let mut progress = ProgressExporter::every(3);
        progress.prepare(&SimulationConfig::default()).unwrap();
        for step in 1..=6 {
            progress.process(&output(step, true, false)).unwrap();
        }
        assert_eq!(progress.lines(), 2);
        progress.process(&output(7, true, true)).unwrap();
        progress.process(&output(7, false, false)).unwrap();
        assert_eq!(progress.lines(), 4);
    }

    #[test]
    fn test_progress_text() {
        let mut progress = ProgressExporter::default();
        progress.prepare(&SimulationConfig::default().with_total_hours(2.0)).unwrap();
        assert_eq!(progress.progress(3600.0), "1.0/2.0 h (50.0%)");

        let days = SimulationConfig {
            simtime_days: Some(1.0),
            ..Default::default()
        };
        progress.prepare(&days).unwrap();
        assert_eq!(progress.progress(3600.0), "1.0 h");
    }
}
