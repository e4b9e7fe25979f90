//! Time series of model snapshots
//!
//! A [`SnapshotStore`] mirrors the snapshot tree of a model. The first
//! appended snapshot fixes the structure; every later one must have exactly
//! the same nodes and array shapes, and its `data` arrays are stacked along a
//! leading time axis. `data_static` and `metadata` are kept from the first
//! snapshot.
//!
//! The store persists as one JSON document.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use tracing::{debug, info};

use crate::entity::StateNode;
use crate::error::{BenthosError, BenthosResult};

/// Stacked snapshots of one model run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotStore {
    root: Option<StateNode>,
}

fn as_series(node: &StateNode) -> StateNode {
    StateNode {
        data: node.data.as_ref().map(|d| d.as_series()),
        data_static: node.data_static.clone(),
        metadata: node.metadata.clone(),
        children: node
            .children
            .iter()
            .map(|(name, child)| (name.clone(), as_series(child)))
            .collect(),
    }
}

fn incompatible(path: &[String], message: impl std::fmt::Display) -> BenthosError {
    BenthosError::Incompatible {
        message: format!("/{}: {}", path.join("/"), message),
    }
}

fn append_frame(series: &mut StateNode, frame: &StateNode, path: &mut Vec<String>) -> BenthosResult<()> {
    if series.children.len() != frame.children.len()
        || !series.children.keys().all(|k| frame.children.contains_key(k))
    {
        return Err(incompatible(
            path,
            format!(
                "children {:?} differ from stored {:?}",
                frame.children.keys().collect::<Vec<_>>(),
                series.children.keys().collect::<Vec<_>>()
            ),
        ));
    }
    match (series.data.as_mut(), frame.data.as_ref()) {
        (Some(stored), Some(data)) => {
            if stored.unit != data.unit {
                return Err(incompatible(
                    path,
                    format!("unit {:?} differs from stored {:?}", data.unit, stored.unit),
                ));
            }
            stored.push_frame(data).map_err(|e| incompatible(path, e))?;
        }
        (None, None) => {}
        _ => return Err(incompatible(path, "data present in only one of store and snapshot")),
    }
    for (name, child) in series.children.iter_mut() {
        if let Some(next) = frame.children.get(name) {
            path.push(name.clone());
            append_frame(child, next, path)?;
            path.pop();
        }
    }
    Ok(())
}

impl SnapshotStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether no snapshot was appended yet
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// The stored series tree
    pub fn root(&self) -> Option<&StateNode> {
        self.root.as_ref()
    }

    /// Number of stored time points
    pub fn len(&self) -> usize {
        self.root
            .as_ref()
            .and_then(|r| r.child("time"))
            .and_then(|t| t.data.as_ref())
            .map_or(0, |d| d.time_len())
    }

    /// Stored model times in seconds
    pub fn times(&self) -> Vec<f64> {
        self.root
            .as_ref()
            .and_then(|r| r.child("time"))
            .and_then(|t| t.data.as_ref())
            .map(|d| d.array.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Append one snapshot
    ///
    /// # Errors
    ///
    /// Returns [`BenthosError::Incompatible`] when the snapshot structure,
    /// units or array shapes differ from the stored ones. The store is left
    /// unchanged in that case.
    pub fn append(&mut self, snapshot: &StateNode) -> BenthosResult<()> {
        match &self.root {
            None => {
                if snapshot.child("time").and_then(|t| t.data.as_ref()).is_none() {
                    return Err(BenthosError::snapshot("time", "snapshot has no model time"));
                }
                info!("Starting snapshot store");
                self.root = Some(as_series(snapshot));
            }
            Some(root) => {
                let mut next = root.clone();
                append_frame(&mut next, snapshot, &mut Vec::new())?;
                self.root = Some(next);
            }
        }
        debug!("Snapshot store holds {} time points", self.len());
        Ok(())
    }

    /// Keep the first `len` time points
    pub fn truncate(&mut self, len: usize) -> BenthosResult<()> {
        if let Some(root) = self.root.as_mut() {
            root.for_each_data_mut(&mut |data| {
                data.truncate_time(len);
                Ok(())
            })?;
        }
        debug!("Truncated snapshot store to {} time points", self.len());
        Ok(())
    }

    /// Write the store as JSON, replacing `path` only once the write completed
    pub fn save(&self, path: impl AsRef<Path>) -> BenthosResult<()> {
        let path = path.as_ref();
        let root = self
            .root
            .as_ref()
            .ok_or_else(|| BenthosError::snapshot(path.display().to_string(), "nothing to save"))?;
        let partial = path.with_extension("partial");
        {
            let mut writer = BufWriter::new(File::create(&partial)?);
            serde_json::to_writer(&mut writer, root)?;
            writer.flush()?;
        }
        std::fs::rename(&partial, path)?;
        debug!("Saved {} time points to {}", self.len(), path.display());
        Ok(())
    }

    /// Read a store written by [`save`](Self::save)
    pub fn load(path: impl AsRef<Path>) -> BenthosResult<Self> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);
        let root: StateNode = serde_json::from_reader(reader)?;
        let store = Self { root: Some(root) };
        info!("Loaded {} time points from {}", store.len(), path.display());
        Ok(store)
    }
}
