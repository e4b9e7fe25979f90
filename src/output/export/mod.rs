//! Exporters fed by a simulation run
//!
//! # Architecture
//!
//! This module defines the [`Exporter`] trait that a
//! [`SimulationRunner`](crate::solver::SimulationRunner) calls for every
//! output of an evolution. Each format is an independent implementation in
//! its own sub-module, so adding a format means adding a file.
//!
//! # Available exporters
//!
//! | Exporter              | Module           | Output                          |
//! |-----------------------|------------------|---------------------------------|
//! | [`CsvExporter`]       | [`csv`]          | depth profiles per model path   |
//! | [`ModelDataExporter`] | [`model_data`]   | snapshot store as JSON          |
//! | [`ProgressExporter`]  | [`progress`]     | progress lines through `tracing`|
//!
//! # Usage example
//!
//! ```rust,ignore
//! use microbenthos_rs::output::export::{CsvExporter, ModelDataExporter, ProgressExporter};
//! use microbenthos_rs::solver::SimulationRunner;
//!
//! let mut runner = SimulationRunner::new()
//!     .with_exporter(Box::new(ProgressExporter::default()))
//!     .with_exporter(Box::new(ModelDataExporter::new("out/simulation_data.json")))
//!     .with_exporter(Box::new(CsvExporter::new("out", &["env.oxy"])));
//! runner.run(&mut sim, &mut model)?;
//! ```

pub mod csv;
pub mod model_data;
pub mod progress;

pub use csv::{export_profiles_csv, export_series_csv, CsvConfig, CsvExporter, CsvMetadata};
pub use model_data::ModelDataExporter;
pub use progress::ProgressExporter;

use crate::error::BenthosResult;
use crate::solver::{SimulationConfig, StepOutput};

/// Consumer of the outputs of an evolution
///
/// `prepare` is called once before the first output and `finish` once after
/// the last one, also when the evolution failed. Outputs without a state are
/// attempts between snapshots; most exporters only act on
/// [`StepOutput::is_snapshot`].
pub trait Exporter {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Set up resources for a run with `config`
    fn prepare(&mut self, _config: &SimulationConfig) -> BenthosResult<()> {
        Ok(())
    }

    /// Handle one output of the evolution
    fn process(&mut self, output: &StepOutput) -> BenthosResult<()>;

    /// Flush and release resources
    fn finish(&mut self) -> BenthosResult<()> {
        Ok(())
    }
}
