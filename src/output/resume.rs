//! Resume a model from a snapshot store
//!
//! ```text
//! check_compatibility ──▶ restore_at(tidx) ──▶ truncate(tidx) ──▶ evolve
//! ```
//!
//! Restoring reads one time point and leaves the store alone. Truncation is a
//! separate destructive step: it drops the restored point and everything
//! after it, because the resumed evolution emits the restored state again as
//! its first snapshot.

use tracing::{debug, info, warn};

use crate::entity::{DataNode, StateNode};
use crate::error::{BenthosError, BenthosResult};
use crate::model::MicroBenthosModel;
use crate::output::store::SnapshotStore;
use crate::solver::Steppable;

const STATIC_RTOL: f64 = 1e-5;
const STATIC_ATOL: f64 = 1e-8;

fn incompatible(path: &[String], message: impl Into<String>) -> BenthosError {
    BenthosError::Incompatible {
        message: format!("/{}: {}", path.join("/"), message.into()),
    }
}

fn allclose(a: &DataNode, b: &DataNode) -> bool {
    a.array.shape() == b.array.shape()
        && a
            .array
            .iter()
            .zip(b.array.iter())
            .all(|(x, y)| (x - y).abs() <= STATIC_ATOL + STATIC_RTOL * y.abs())
}

fn root_series<'s>(store: &'s SnapshotStore) -> BenthosResult<&'s StateNode> {
    store.root().ok_or_else(|| BenthosError::Incompatible {
        message: "snapshot store is empty".to_string(),
    })
}

/// Check that the store holds series of the snapshot structure of `model`
///
/// Every node of a fresh snapshot must exist in the store with equal
/// metadata, matching `data_static` and a `data` series of one more
/// dimension than the snapshot array.
pub fn check_compatibility<M: Steppable + ?Sized>(model: &M, store: &SnapshotStore) -> BenthosResult<()> {
    let root = root_series(store)?;
    let state = model.snapshot()?;
    let n_time = store.len();
    info!("Checking compatibility with store of {} time points", n_time);

    let mut failure: Option<BenthosError> = None;
    state.walk(&mut |path, node| {
        if failure.is_some() {
            return;
        }
        let parts: Vec<&str> = path.iter().map(String::as_str).collect();
        let Some(stored) = root.get(&parts) else {
            failure = Some(incompatible(path, "missing in store"));
            return;
        };

        let extra: Vec<&String> = stored
            .metadata
            .keys()
            .filter(|k| !node.metadata.contains_key(*k))
            .collect();
        if !extra.is_empty() {
            warn!("/{}: metadata has divergent keys {:?}", path.join("/"), extra);
        }
        for (key, value) in &node.metadata {
            if stored.metadata.get(key) != Some(value) {
                failure = Some(incompatible(
                    path,
                    format!("metadata {} = {:?}, stored {:?}", key, value, stored.metadata.get(key)),
                ));
                return;
            }
        }

        if let Some(fixed) = &node.data_static {
            match &stored.data_static {
                Some(s) if allclose(fixed, s) => {}
                _ => {
                    failure = Some(incompatible(path, "data_static differs from store"));
                    return;
                }
            }
        }

        if let Some(data) = &node.data {
            let Some(series) = &stored.data else {
                failure = Some(incompatible(path, "data missing in store"));
                return;
            };
            let (ndim, shape) = (series.array.ndim(), series.array.shape());
            if ndim != data.array.ndim() + 1 {
                failure = Some(incompatible(
                    path,
                    format!("store shape {:?} is not a series of {:?}", shape, data.array.shape()),
                ));
                return;
            }
            if shape[0] != n_time || shape[1..] != *data.array.shape() {
                failure = Some(incompatible(
                    path,
                    format!(
                        "store shape {:?} for {} time points, snapshot {:?}",
                        shape,
                        n_time,
                        data.array.shape()
                    ),
                ));
                return;
            }
            if series.unit != data.unit {
                failure = Some(incompatible(
                    path,
                    format!("unit {:?}, stored {:?}", data.unit, series.unit),
                ));
            }
        }
    });
    match failure {
        Some(err) => {
            warn!("Model and stored data not compatible: {}", err);
            Err(err)
        }
        None => {
            debug!("Store is compatible with the model");
            Ok(())
        }
    }
}

/// Restore `model` to time index `tidx` of the store
///
/// Returns the restored model time in seconds.
pub fn restore_at(model: &mut MicroBenthosModel, store: &SnapshotStore, tidx: usize) -> BenthosResult<f64> {
    check_compatibility(model, store)?;
    let len = store.len();
    if tidx >= len {
        return Err(BenthosError::snapshot(
            "time",
            format!("time index {} out of range for {} stored points", tidx, len),
        ));
    }
    model.restore_from(root_series(store)?, Some(tidx))?;
    let time = model.clock().seconds();
    info!("Restored model to time index {} ({} s)", tidx, time);
    Ok(time)
}

/// Drop time index `tidx` and everything after it
///
/// Returns the new number of stored points.
pub fn truncate(store: &mut SnapshotStore, tidx: usize) -> BenthosResult<usize> {
    let len = store.len();
    if tidx >= len {
        return Err(BenthosError::snapshot(
            "time",
            format!("time index {} out of range for {} stored points", tidx, len),
        ));
    }
    warn!("Truncating snapshot store from {} to {} time points", len, tidx);
    store.truncate(tidx)?;
    Ok(store.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::LinearSolver;

    const MODEL: &str = r#"
domain:
  cls: SedimentDBLDomain
  init_params: {cell_size: 0.1 mm, sediment_length: 1 mm, dbl_length: 0.5 mm}
environment:
  oxy:
    cls: Variable
    init_params:
      create: {value: 1.0, unit: mol/m**3, hasOld: true}
  decay:
    cls: Process
    init_params: {expr: -k * oxy, params: {k: 1.0e-2}}
equations:
  oxyEqn:
    transient: [env.oxy, 1]
    sources: [[env.decay, 1]]
"#;

    fn model() -> MicroBenthosModel {
        MicroBenthosModel::from_yaml_str(MODEL).unwrap()
    }

    fn step(model: &mut MicroBenthosModel, dt: f64) {
        model.sweep(dt, LinearSolver::Tridiagonal).unwrap();
        model.update_vars().unwrap();
        model.update_equations(dt).unwrap();
        model.advance_clock(dt).unwrap();
    }

    fn recorded() -> (MicroBenthosModel, SnapshotStore) {
        let mut model = model();
        let mut store = SnapshotStore::new();
        store.append(&model.snapshot().unwrap()).unwrap();
        for _ in 0..3 {
            step(&mut model, 10.0);
            store.append(&model.snapshot().unwrap()).unwrap();
        }
        (model, store)
    }

    #[test]
    fn test_empty_store_is_incompatible() {
        assert!(matches!(
            check_compatibility(&model(), &SnapshotStore::new()),
            Err(BenthosError::Incompatible { .. })
        ));
    }

    #[test]
    fn test_restore_middle_point() {
        let (_, store) = recorded();
        let mut fresh = model();
        check_compatibility(&fresh, &store).unwrap();

        let time = restore_at(&mut fresh, &store, 1).unwrap();
        assert_eq!(time, 10.0);
        let id = fresh.field_paths()["env.oxy"];
        let stored = store.root().unwrap().get(&["env", "oxy"]).unwrap();
        let expected = stored
            .require_data("oxy")
            .unwrap()
            .to_vector(Some(1), fresh.domain().cells())
            .unwrap();
        assert_eq!(fresh.domain().field(id).values(), &expected);
        assert_eq!(fresh.domain().field(id).old_values(), &expected);
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn test_restore_out_of_range() {
        let (_, store) = recorded();
        assert!(restore_at(&mut model(), &store, 4).is_err());
    }

    #[test]
    fn test_other_domain_is_incompatible() {
        let (_, store) = recorded();
        let yaml = MODEL.replace("sediment_length: 1 mm", "sediment_length: 2 mm");
        let other = MicroBenthosModel::from_yaml_str(&yaml).unwrap();
        assert!(matches!(
            check_compatibility(&other, &store),
            Err(BenthosError::Incompatible { .. })
        ));
    }

    #[test]
    fn test_truncate_drops_restored_point() {
        let (_, mut store) = recorded();
        assert_eq!(truncate(&mut store, 2).unwrap(), 2);
        assert_eq!(store.times(), vec![0.0, 10.0]);
        assert!(truncate(&mut store, 5).is_err());
    }
}
