//! Persist snapshots into a [`SnapshotStore`] file

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::BenthosResult;
use crate::output::export::Exporter;
use crate::output::store::SnapshotStore;
use crate::solver::{SimulationConfig, StepOutput};

/// Appends every snapshot of a run to a JSON snapshot store
///
/// The store is saved after each snapshot, so an interrupted run keeps the
/// data up to its last snapshot. An existing file is continued unless
/// [`overwrite`](Self::overwrite) is set; a run restored with
/// [`restore_at`](crate::output::restore_at) should truncate the store first.
#[derive(Debug)]
pub struct ModelDataExporter {
    path: PathBuf,
    overwrite: bool,
    store: SnapshotStore,
}

impl ModelDataExporter {
    /// Exporter writing to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            overwrite: false,
            store: SnapshotStore::new(),
        }
    }

    /// Continue from an already loaded (and possibly truncated) store
    pub fn with_store(mut self, store: SnapshotStore) -> Self {
        self.store = store;
        self
    }

    /// Builder: discard an existing file instead of continuing it
    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Target file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshots collected so far
    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }
}

impl Exporter for ModelDataExporter {
    fn name(&self) -> &str {
        "model_data"
    }

    fn prepare(&mut self, _config: &SimulationConfig) -> BenthosResult<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        if self.path.exists() {
            if self.overwrite {
                warn!("Removing existing model data at {}", self.path.display());
                std::fs::remove_file(&self.path)?;
                self.store = SnapshotStore::new();
            } else if self.store.is_empty() {
                self.store = SnapshotStore::load(&self.path)?;
                info!(
                    "Continuing model data at {} from {} time points",
                    self.path.display(),
                    self.store.len()
                );
            }
        }
        Ok(())
    }

    fn process(&mut self, output: &StepOutput) -> BenthosResult<()> {
        let Some(state) = &output.state else {
            return Ok(());
        };
        self.store.append(state)?;
        self.store.save(&self.path)?;
        debug!("Saved snapshot at {} s to {}", output.time, self.path.display());
        Ok(())
    }

    fn finish(&mut self) -> BenthosResult<()> {
        info!(
            "Model data at {} holds {} time points",
            self.path.display(),
            self.store.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{DataNode, StateNode};

    fn output(time: f64) -> StepOutput {
        let mut state = StateNode::new();
        state.insert_child("time", StateNode::with_data(DataNode::scalar(time, "s")));
        StepOutput {
            step: 1,
            time,
            dt: 1.0,
            residual: 1e-10,
            sweeps: 2,
            accepted: true,
            state: Some(state),
        }
    }

    fn attempt(time: f64) -> StepOutput {
        StepOutput { state: None, ..output(time) }
    }

    #[test]
    fn test_saves_each_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run").join("simulation_data.json");
        let mut exporter = ModelDataExporter::new(&path);
        exporter.prepare(&SimulationConfig::default()).unwrap();
        exporter.process(&output(0.0)).unwrap();
        exporter.process(&attempt(5.0)).unwrap();
        exporter.process(&output(10.0)).unwrap();
        exporter.finish().unwrap();

        assert_eq!(exporter.store().len(), 2);
        assert_eq!(SnapshotStore::load(&path).unwrap().times(), vec![0.0, 10.0]);
    }

    #[test]
    fn test_continues_or_overwrites_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("simulation_data.json");
        let mut first = ModelDataExporter::new(&path);
        first.prepare(&SimulationConfig::default()).unwrap();
        first.process(&output(0.0)).unwrap();

        let mut next = ModelDataExporter::new(&path);
        next.prepare(&SimulationConfig::default()).unwrap();
        next.process(&output(10.0)).unwrap();
        assert_eq!(SnapshotStore::load(&path).unwrap().len(), 2);

        let mut fresh = ModelDataExporter::new(&path).overwrite(true);
        fresh.prepare(&SimulationConfig::default()).unwrap();
        assert!(!path.exists());
        fresh.process(&output(20.0)).unwrap();
        assert_eq!(SnapshotStore::load(&path).unwrap().times(), vec![20.0]);
    }
}
