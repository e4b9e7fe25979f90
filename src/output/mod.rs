//! Output of simulation results
//!
//! This module stores, resumes and exports the snapshots of a model run:
//! - **Store**: the time series of all snapshots, persisted as JSON
//! - **Resume**: compatibility check, restore at a time index, truncation
//! - **Export**: exporters fed by a [`SimulationRunner`](crate::solver::SimulationRunner)
//!
//! # Architecture
//!
//! ```text
//! output/
//! ├── mod.rs              ← This file
//! ├── store.rs            ← SnapshotStore
//! ├── resume.rs           ← check_compatibility, restore_at, truncate
//! └── export/             ← Exporters
//!     ├── mod.rs
//!     ├── csv.rs
//!     ├── model_data.rs
//!     └── progress.rs
//! ```
//!
//! # Quick Start
//!
//! ## Record a run
//!
//! ```rust,ignore
//! use microbenthos_rs::output::ModelDataExporter;
//!
//! let mut runner = SimulationRunner::new()
//!     .with_exporter(Box::new(ModelDataExporter::new("out/simulation_data.json")));
//! runner.run(&mut sim, &mut model)?;
//! ```
//!
//! ## Resume it
//!
//! ```rust,ignore
//! use microbenthos_rs::output::{restore_at, truncate, SnapshotStore};
//!
//! let mut store = SnapshotStore::load("out/simulation_data.json")?;
//! let last = store.len() - 1;
//! restore_at(&mut model, &store, last)?;
//! truncate(&mut store, last)?;
//! ```

pub mod export;
pub mod resume;
pub mod store;

// Re-export commonly used items for convenience
pub use export::{
    export_profiles_csv,
    export_series_csv,
    CsvConfig,
    CsvExporter,
    Exporter,
    ModelDataExporter,
    ProgressExporter,
};
pub use resume::{check_compatibility, restore_at, truncate};
pub use store::SnapshotStore;
