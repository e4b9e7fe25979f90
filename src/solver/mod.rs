//! Simulated time and adaptive stepping
//!
//! # Module Organization
//!
//! - **`clock`**: [`ModelClock`], the simulated time of a model
//! - **`traits`**: [`SimulationConfig`] and the [`Steppable`] model interface
//! - **`simulation`**: [`Simulation`] and its [`Evolution`] iterator
//! - **`runner`**: [`SimulationRunner`], forwarding outputs to exporters
//!
//! # Workflow
//!
//! ```text
//! ┌────────────────────┐
//! │ MicroBenthosModel  │  (equations, clock, snapshot)
//! └─────────┬──────────┘
//!           │ Steppable
//! ┌─────────▼──────────┐
//! │ Simulation         │ ← SimulationConfig
//! │  evolution()       │
//! └─────────┬──────────┘
//!           │ StepOutput (step, time, dt, residual, state?)
//! ┌─────────▼──────────┐
//! │ SimulationRunner   │ → exporters (store, CSV, progress)
//! └────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use microbenthos_rs::solver::{Simulation, SimulationConfig};
//!
//! let config = SimulationConfig::default().with_total_hours(2.0);
//! let mut sim = Simulation::new(config)?;
//! for output in sim.evolution(&mut model)? {
//!     let output = output?;
//!     println!("{} s (dt = {} s, residual = {:.1e})", output.time, output.dt, output.residual);
//! }
//! ```

// =================================================================================================
// Module Declarations
// =================================================================================================
mod clock;
mod runner;
mod simulation;
mod traits;

// =================================================================================================
// Parallel Field Updates
// =================================================================================================

use std::sync::atomic::{AtomicUsize, Ordering};

/// Mesh size above which field updates run on the Rayon pool
///
/// Typical sediment meshes have a few hundred cells, where a sequential
/// loop is faster than dispatching to the pool.
const DEFAULT_PARALLEL_CELLS: usize = 999;

static PARALLEL_CELLS: AtomicUsize = AtomicUsize::new(DEFAULT_PARALLEL_CELLS);

/// Number of cells above which [`FieldData::apply()`](crate::physics::FieldData::apply)
/// iterates in parallel (with the `parallel` feature)
///
/// ```rust
/// use microbenthos_rs::solver::parallel_threshold;
///
/// assert!(parallel_threshold() > 0);
/// ```
pub fn parallel_threshold() -> usize {
    PARALLEL_CELLS.load(Ordering::Relaxed)
}

/// Change the parallel threshold for the whole process
///
/// # Panics
///
/// Panics when `cells == 0`.
pub fn set_parallel_threshold(cells: usize) {
    assert!(cells > 0, "parallel threshold must be at least 1");
    PARALLEL_CELLS.store(cells, Ordering::Relaxed);
}

/// Sets the threshold for the lifetime of the guard
#[cfg(test)]
pub(crate) struct ThresholdGuard {
    previous: usize,
}

#[cfg(test)]
impl ThresholdGuard {
    pub(crate) fn save(cells: usize) -> Self {
        let previous = parallel_threshold();
        set_parallel_threshold(cells);
        Self { previous }
    }
}

#[cfg(test)]
impl Drop for ThresholdGuard {
    fn drop(&mut self) {
        PARALLEL_CELLS.store(self.previous, Ordering::Relaxed);
    }
}

// =================================================================================================
// Public Re-exports
// =================================================================================================

pub use clock::ModelClock;
pub use runner::{RunSummary, SimulationRunner};
pub use simulation::{
    Evolution, Simulation, SimulationState, StepOutput, GROWTH_FACTOR, RESIDUAL_SENTINEL,
    SHRINK_FACTOR, WINDOW,
};
pub use traits::{SimulationConfig, Steppable};

// =================================================================================================
// Tests
// =================================================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_restores_threshold() {
        let before = parallel_threshold();
        {
            let _guard = ThresholdGuard::save(64);
            assert_eq!(parallel_threshold(), 64);
        }
        assert_eq!(parallel_threshold(), before);
    }

    #[test]
    #[should_panic(expected = "parallel threshold must be at least 1")]
    fn test_zero_threshold_panics() {
        set_parallel_threshold(0);
    }
}
