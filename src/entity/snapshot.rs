//! Snapshot tree
//!
//! Every entity serialises its state into a [`StateNode`]: an optional time
//! varying `data` array, an optional `data_static` array, scalar `metadata`
//! and named children. A single snapshot holds per-cell 1-D arrays (or 0-D
//! arrays for scalars such as the clock); a stored time series holds the
//! same arrays stacked along a leading time axis.

use std::collections::BTreeMap;

use nalgebra::DVector;
use ndarray::{concatenate, Array1, ArrayD, Axis, IxDyn, Slice};
use serde::{Deserialize, Serialize};

use crate::error::{BenthosError, BenthosResult};

/// Scalar attribute stored in `metadata`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    /// Flag
    Bool(bool),
    /// Number
    Number(f64),
    /// Free text, also used for quantities with units
    Text(String),
    /// List of names
    List(Vec<String>),
}

impl From<bool> for MetaValue {
    fn from(value: bool) -> Self {
        MetaValue::Bool(value)
    }
}

impl From<f64> for MetaValue {
    fn from(value: f64) -> Self {
        MetaValue::Number(value)
    }
}

impl From<&str> for MetaValue {
    fn from(value: &str) -> Self {
        MetaValue::Text(value.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(value: String) -> Self {
        MetaValue::Text(value)
    }
}

impl From<Vec<String>> for MetaValue {
    fn from(value: Vec<String>) -> Self {
        MetaValue::List(value)
    }
}

/// Array with its unit label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataNode {
    /// Values, cells along the last axis
    pub array: ArrayD<f64>,
    /// Unit label of the values
    pub unit: String,
}

impl DataNode {
    /// 0-D array holding `value`
    pub fn scalar(value: f64, unit: impl Into<String>) -> Self {
        Self {
            array: ArrayD::from_elem(IxDyn(&[]), value),
            unit: unit.into(),
        }
    }

    /// 1-D array of cell values
    pub fn cells(values: &DVector<f64>, unit: impl Into<String>) -> Self {
        Self {
            array: Array1::from_iter(values.iter().copied()).into_dyn(),
            unit: unit.into(),
        }
    }

    /// Number of time points when read as a series
    pub fn time_len(&self) -> usize {
        self.array.shape().first().copied().unwrap_or(1)
    }

    /// The array at time index `tidx`, or the whole array for `None`
    pub fn at(&self, tidx: Option<usize>) -> BenthosResult<ArrayD<f64>> {
        match tidx {
            None => Ok(self.array.clone()),
            Some(i) => {
                if self.array.ndim() == 0 || i >= self.array.shape()[0] {
                    return Err(BenthosError::snapshot(
                        "data",
                        format!(
                            "time index {} out of range for array of shape {:?}",
                            i,
                            self.array.shape()
                        ),
                    ));
                }
                Ok(self.array.index_axis(Axis(0), i).to_owned())
            }
        }
    }

    /// Cell values at `tidx`, checked against the expected cell count
    pub fn to_vector(&self, tidx: Option<usize>, cells: usize) -> BenthosResult<DVector<f64>> {
        let array = self.at(tidx)?;
        match array.ndim() {
            0 => Ok(DVector::from_element(cells, array.iter().copied().next().unwrap_or(0.0))),
            1 if array.len() == cells => Ok(DVector::from_iterator(cells, array.iter().copied())),
            _ => Err(BenthosError::snapshot(
                "data",
                format!("expected {} cell values, got shape {:?}", cells, array.shape()),
            )),
        }
    }

    /// Scalar value at `tidx`
    pub fn to_scalar(&self, tidx: Option<usize>) -> BenthosResult<f64> {
        let array = self.at(tidx)?;
        if array.len() != 1 {
            return Err(BenthosError::snapshot(
                "data",
                format!("expected a scalar, got shape {:?}", array.shape()),
            ));
        }
        Ok(array.iter().copied().next().unwrap_or(0.0))
    }

    /// A one-point series holding this frame
    pub fn as_series(&self) -> DataNode {
        DataNode {
            array: self.array.clone().insert_axis(Axis(0)),
            unit: self.unit.clone(),
        }
    }

    /// Append a frame along the time axis of this series
    pub fn push_frame(&mut self, frame: &DataNode) -> BenthosResult<()> {
        if self.array.ndim() != frame.array.ndim() + 1
            || self.array.shape()[1..] != *frame.array.shape()
        {
            return Err(BenthosError::Incompatible {
                message: format!(
                    "frame of shape {:?} does not fit series of shape {:?}",
                    frame.array.shape(),
                    self.array.shape()
                ),
            });
        }
        let next = frame.array.view().insert_axis(Axis(0));
        self.array = concatenate(Axis(0), &[self.array.view(), next]).map_err(|e| {
            BenthosError::Incompatible {
                message: e.to_string(),
            }
        })?;
        Ok(())
    }

    /// Keep the first `len` time points
    pub fn truncate_time(&mut self, len: usize) {
        if self.array.ndim() == 0 {
            return;
        }
        let len = len.min(self.array.shape()[0]);
        self.array = self.array.slice_axis(Axis(0), Slice::from(0..len)).to_owned();
    }
}

/// Node of the snapshot tree
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateNode {
    /// Time-varying values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<DataNode>,
    /// Values that do not evolve with time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_static: Option<DataNode>,
    /// Scalar attributes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, MetaValue>,
    /// Named sub-trees
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub children: BTreeMap<String, StateNode>,
}

impl StateNode {
    /// Empty node
    pub fn new() -> Self {
        Self::default()
    }

    /// Node holding only `data`
    pub fn with_data(data: DataNode) -> Self {
        Self {
            data: Some(data),
            ..Self::default()
        }
    }

    /// Node holding only `data_static`
    pub fn with_static(data: DataNode) -> Self {
        Self {
            data_static: Some(data),
            ..Self::default()
        }
    }

    /// Builder: add a metadata entry
    pub fn meta(mut self, key: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Insert or replace a child
    pub fn insert_child(&mut self, name: impl Into<String>, child: StateNode) {
        self.children.insert(name.into(), child);
    }

    /// Child by name
    pub fn child(&self, name: &str) -> Option<&StateNode> {
        self.children.get(name)
    }

    /// Descend through `path`
    pub fn get(&self, path: &[&str]) -> Option<&StateNode> {
        path.iter().try_fold(self, |node, part| node.child(part))
    }

    /// The `data` node, or a snapshot error naming `context`
    pub fn require_data(&self, context: &str) -> BenthosResult<&DataNode> {
        self.data
            .as_ref()
            .ok_or_else(|| BenthosError::snapshot(context, "missing \"data\""))
    }

    /// Visit every node depth-first with its path
    pub fn walk<F>(&self, f: &mut F)
    where
        F: FnMut(&[String], &StateNode),
    {
        let mut path = Vec::new();
        self.walk_inner(&mut path, f);
    }

    fn walk_inner<F>(&self, path: &mut Vec<String>, f: &mut F)
    where
        F: FnMut(&[String], &StateNode),
    {
        f(path, self);
        for (name, child) in &self.children {
            path.push(name.clone());
            child.walk_inner(path, f);
            path.pop();
        }
    }

    /// Apply `f` to every `data` node of the tree
    pub fn for_each_data_mut<F>(&mut self, f: &mut F) -> BenthosResult<()>
    where
        F: FnMut(&mut DataNode) -> BenthosResult<()>,
    {
        if let Some(data) = self.data.as_mut() {
            f(data)?;
        }
        for child in self.children.values_mut() {
            child.for_each_data_mut(f)?;
        }
        Ok(())
    }
}
