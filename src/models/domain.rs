//! Sediment column with a diffusive boundary layer
//!
//! The domain is a uniform 1-D mesh whose first `dbl_cells` cells form the
//! diffusive boundary layer (DBL) and whose remaining cells form the
//! sediment. Depths are cell centres shifted so that the first sediment
//! cell sits at zero; DBL depths are negative.
//!
//! All fields live in an arena owned by the domain and are addressed by
//! [`FieldId`]. Fields created with `store = true` are also reachable by
//! name. Every mutable access to a field bumps the domain revision, which
//! process caches use to detect stale inputs.

use std::collections::BTreeMap;
use std::ops::Range;

use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::entity::{DataNode, DomainId, StateNode};
use crate::error::{BenthosError, BenthosResult};
use crate::physics::{CellField, FieldData, FieldId, Grid1D, ParamValue, Unit};

// =================================================================================================
// Parameters
// =================================================================================================

fn default_cell_size() -> ParamValue {
    ParamValue::Number(0.1)
}

fn default_sediment_length() -> ParamValue {
    ParamValue::Number(10.0)
}

fn default_dbl_length() -> ParamValue {
    ParamValue::Number(1.0)
}

fn default_porosity() -> f64 {
    0.6
}

/// Domain definition; plain lengths are millimetres
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DomainParams {
    /// Mesh cell size
    #[serde(default = "default_cell_size")]
    pub cell_size: ParamValue,
    /// Length of the sediment column
    #[serde(default = "default_sediment_length")]
    pub sediment_length: ParamValue,
    /// Length of the diffusive boundary layer
    #[serde(default = "default_dbl_length")]
    pub dbl_length: ParamValue,
    /// Sediment porosity, strictly between 0.1 and 0.9
    #[serde(default = "default_porosity")]
    pub porosity: f64,
}

impl Default for DomainParams {
    fn default() -> Self {
        Self {
            cell_size: default_cell_size(),
            sediment_length: default_sediment_length(),
            dbl_length: default_dbl_length(),
            porosity: default_porosity(),
        }
    }
}

/// Named region of the domain used for constraints
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Location {
    /// First cell
    Top,
    /// Last cell
    Bottom,
    /// The DBL cells
    Dbl,
    /// The sediment cells
    Sediment,
}

impl Location {
    /// Definition key of the location
    pub fn as_str(&self) -> &'static str {
        match self {
            Location::Top => "top",
            Location::Bottom => "bottom",
            Location::Dbl => "dbl",
            Location::Sediment => "sediment",
        }
    }
}

// =================================================================================================
// Evaluation scope
// =================================================================================================

/// Named fields visible to an expression evaluation
pub trait VarScope {
    /// Identity of the scope, part of cache keys
    fn scope_id(&self) -> u64;

    /// Revision of the field values, bumped on mutation
    fn revision(&self) -> u64;

    /// Field by name
    fn lookup(&self, name: &str) -> Option<&CellField>;

    /// Field by handle, including fields not registered by name
    fn field(&self, id: FieldId) -> &CellField;

    /// Number of cells of the fields
    fn cells(&self) -> usize;
}

// =================================================================================================
// Domain
// =================================================================================================

/// The sediment + DBL model domain
#[derive(Debug, Clone)]
pub struct SedimentDBLDomain {
    id: DomainId,
    grid: Grid1D,
    cell_size: f64,
    sediment_cells: usize,
    dbl_cells: usize,
    porosity: f64,
    depths: DVector<f64>,
    distances: DVector<f64>,
    fields: Vec<CellField>,
    names: BTreeMap<String, FieldId>,
    revision: u64,
}

fn count_cells(length: f64, cell_size: f64) -> usize {
    // lengths that are exact multiples must not lose a cell to round-off
    (length / cell_size + 1e-9).floor() as usize
}

impl SedimentDBLDomain {
    /// Build the mesh and the `porosity` and `sed_mask` fields
    pub fn new(params: &DomainParams) -> BenthosResult<Self> {
        let mm = Unit::parse("mm")?;
        let meter = Unit::meter();
        let cell_size = params.cell_size.to_quantity(&mm)?.in_units_of(&meter)?;
        let sediment_length = params.sediment_length.to_quantity(&mm)?.in_units_of(&meter)?;
        let dbl_length = params.dbl_length.to_quantity(&mm)?.in_units_of(&meter)?;

        if cell_size <= 0.0 || !cell_size.is_finite() {
            return Err(BenthosError::config("domain", "cell_size should be positive"));
        }
        if sediment_length <= 0.0 {
            return Err(BenthosError::config("domain", "sediment_length should be positive"));
        }
        if dbl_length < 0.0 {
            return Err(BenthosError::config("domain", "dbl_length should be positive or zero"));
        }
        let sediment_cells = count_cells(sediment_length, cell_size);
        if sediment_cells < 10 {
            return Err(BenthosError::config(
                "domain",
                format!(
                    "sediment length {} m too small for cell size {} m (needs at least 10 cells)",
                    sediment_length, cell_size
                ),
            ));
        }
        let dbl_cells = count_cells(dbl_length, cell_size);
        let total = sediment_cells + dbl_cells;

        info!(
            "Creating Grid1D with {} sediment and {} DBL cells of {} m",
            sediment_cells, dbl_cells, cell_size
        );
        let grid = Grid1D::new(cell_size, total)?;
        let centers = grid.cell_centers();
        let surface = centers[dbl_cells];
        let depths = centers.map(|z| z - surface);
        let distances = grid.cell_distances();

        let mut domain = Self {
            id: DomainId::fresh(),
            grid,
            cell_size,
            sediment_cells,
            dbl_cells,
            porosity: params.porosity,
            depths,
            distances,
            fields: Vec::new(),
            names: BTreeMap::new(),
            revision: 0,
        };

        let mask = DVector::from_fn(total, |i, _| if i < dbl_cells { 0.0 } else { 1.0 });
        domain.create_field("sed_mask", Unit::dimensionless(), mask.into(), false, true)?;
        domain.set_porosity(params.porosity)?;
        Ok(domain)
    }

    /// Set the sediment porosity; the DBL porosity is 1
    pub fn set_porosity(&mut self, porosity: f64) -> BenthosResult<()> {
        if !(porosity > 0.1 && porosity < 0.9) {
            return Err(BenthosError::config(
                "domain",
                format!("sediment porosity={} should be between (0.1, 0.9)", porosity),
            ));
        }
        let values = DVector::from_fn(self.cells(), |i, _| {
            if i < self.dbl_cells { 1.0 } else { porosity }
        });
        let id = match self.field_id("porosity") {
            Some(id) => id,
            None => self.create_field("porosity", Unit::dimensionless(), 1.0.into(), false, true)?,
        };
        self.field_mut(id).set_values(values)?;
        self.porosity = porosity;
        info!("Set sediment porosity to {} and DBL porosity to 1.0", porosity);
        Ok(())
    }

    /// Identity token
    pub fn id(&self) -> DomainId {
        self.id
    }

    /// The mesh
    pub fn grid(&self) -> &Grid1D {
        &self.grid
    }

    /// Total number of cells
    pub fn cells(&self) -> usize {
        self.grid.cells()
    }

    /// Cell size in metres
    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    /// Number of sediment cells
    pub fn sediment_cells(&self) -> usize {
        self.sediment_cells
    }

    /// Number of DBL cells
    pub fn dbl_cells(&self) -> usize {
        self.dbl_cells
    }

    /// Index of the first sediment cell
    pub fn idx_surface(&self) -> usize {
        self.dbl_cells
    }

    /// Sediment porosity
    pub fn porosity(&self) -> f64 {
        self.porosity
    }

    /// Cell depths in metres, zero at the sediment surface
    pub fn depths(&self) -> &DVector<f64> {
        &self.depths
    }

    /// Distances between neighbouring cell centres in metres
    pub fn distances(&self) -> &DVector<f64> {
        &self.distances
    }

    /// Cell range of a location
    pub fn location(&self, location: Location) -> Range<usize> {
        let n = self.cells();
        match location {
            Location::Top => 0..1,
            Location::Bottom => n - 1..n,
            Location::Dbl => 0..self.dbl_cells,
            Location::Sediment => self.dbl_cells..n,
        }
    }

    // ============================================ fields ============================================

    /// Create a field on the mesh
    ///
    /// `value` is in the base units given by `unit` and broadcast to all
    /// cells when scalar. With `store` the field is registered by name.
    pub fn create_field(
        &mut self,
        name: &str,
        unit: Unit,
        value: FieldData,
        has_old: bool,
        store: bool,
    ) -> BenthosResult<FieldId> {
        if name.is_empty() {
            return Err(BenthosError::config("domain", "field name must not be empty"));
        }
        if store && self.names.contains_key(name) {
            return Err(BenthosError::duplicate(name, "domain"));
        }
        let values = value.to_vector(self.cells())?;
        let id = FieldId(self.fields.len());
        self.fields.push(CellField::new(name, unit, values, has_old));
        if store {
            self.names.insert(name.to_string(), id);
        }
        debug!("Created field {:?} (store={}) as {:?}", name, store, id);
        Ok(id)
    }

    /// Field by id
    ///
    /// # Panics
    ///
    /// Panics if `id` was created by another domain with more fields.
    pub fn field(&self, id: FieldId) -> &CellField {
        &self.fields[id.index()]
    }

    /// Mutable field by id; bumps the revision
    pub fn field_mut(&mut self, id: FieldId) -> &mut CellField {
        self.revision += 1;
        &mut self.fields[id.index()]
    }

    /// Id of a stored field
    pub fn field_id(&self, name: &str) -> Option<FieldId> {
        self.names.get(name).copied()
    }

    /// Stored field by name
    pub fn get(&self, name: &str) -> Option<&CellField> {
        self.field_id(name).map(|id| self.field(id))
    }

    /// Whether a stored field has this name
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    /// Names of stored fields, sorted
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.names.keys().map(String::as_str)
    }

    /// Field revision counter
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Stored field values restricted to the sediment
    pub fn in_sediment(&self, name: &str) -> Option<DVector<f64>> {
        let n = self.cells();
        self.get(name)
            .map(|f| f.values().rows(self.dbl_cells, n - self.dbl_cells).into_owned())
    }

    /// Stored field values restricted to the DBL
    pub fn in_dbl(&self, name: &str) -> Option<DVector<f64>> {
        self.get(name)
            .map(|f| f.values().rows(0, self.dbl_cells).into_owned())
    }

    // =========================================== snapshot ===========================================

    /// Mesh geometry and porosity
    pub fn snapshot(&self) -> StateNode {
        let meter = Unit::meter();
        let mut state = StateNode::new()
            .meta("cell_size", format!("{} m", self.cell_size))
            .meta("sediment_length", format!("{} m", self.sediment_cells as f64 * self.cell_size))
            .meta("DBL_length", format!("{} m", self.dbl_cells as f64 * self.cell_size))
            .meta("sediment_cells", self.sediment_cells as f64)
            .meta("DBL_cells", self.dbl_cells as f64)
            .meta("total_cells", self.cells() as f64)
            .meta("total_length", format!("{} m", self.cells() as f64 * self.cell_size))
            .meta("sediment_porosity", self.porosity)
            .meta("idx_surface", self.idx_surface() as f64);
        state.insert_child(
            "depths",
            StateNode::with_static(DataNode::cells(&self.depths, meter.label())),
        );
        state.insert_child(
            "distances",
            StateNode::with_static(DataNode::cells(&self.distances, meter.label())),
        );
        state
    }
}

impl VarScope for SedimentDBLDomain {
    fn scope_id(&self) -> u64 {
        self.id.get()
    }

    fn revision(&self) -> u64 {
        self.revision
    }

    fn lookup(&self, name: &str) -> Option<&CellField> {
        self.get(name)
    }

    fn field(&self, id: FieldId) -> &CellField {
        SedimentDBLDomain::field(self, id)
    }

    fn cells(&self) -> usize {
        self.grid.cells()
    }
}

// =================================================================================================
// Tests
// =================================================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_default_domain_cells() {
        let domain = SedimentDBLDomain::new(&DomainParams::default()).unwrap();
        assert_eq!(domain.sediment_cells(), 100);
        assert_eq!(domain.dbl_cells(), 10);
        assert_eq!(domain.cells(), 110);
        assert_eq!(domain.idx_surface(), 10);

        let porosity = domain.get("porosity").unwrap().values();
        assert!(porosity.rows(0, 10).iter().all(|p| *p == 1.0));
        assert!(porosity.rows(10, 100).iter().all(|p| *p == 0.6));

        let mask = domain.get("sed_mask").unwrap().values();
        assert_eq!(mask[9], 0.0);
        assert_eq!(mask[10], 1.0);
    }

    #[test]
    fn test_depths_zero_at_surface() {
        let domain = SedimentDBLDomain::new(&DomainParams::default()).unwrap();
        let depths = domain.depths();
        assert_eq!(depths[10], 0.0);
        assert_relative_eq!(depths[0], -1e-3, epsilon = 1e-12);
        assert_relative_eq!(depths[109], 9.9e-3, epsilon = 1e-12);
        assert_relative_eq!(domain.distances()[0], 5e-5, epsilon = 1e-15);
        assert_relative_eq!(domain.distances()[1], 1e-4, epsilon = 1e-15);
    }

    #[test]
    fn test_tagged_lengths() {
        let params: DomainParams = serde_yaml::from_str(
            "cell_size: 50 mum\nsediment_length: 0.5 cm\ndbl_length: {value: 0.5, unit: mm}\n",
        )
        .unwrap();
        let domain = SedimentDBLDomain::new(&params).unwrap();
        assert_eq!(domain.sediment_cells(), 100);
        assert_eq!(domain.dbl_cells(), 10);
    }

    #[test]
    fn test_too_few_sediment_cells() {
        let params = DomainParams {
            sediment_length: ParamValue::Number(0.5),
            ..DomainParams::default()
        };
        assert!(SedimentDBLDomain::new(&params).is_err());
    }

    #[test]
    fn test_porosity_range() {
        for p in [0.1, 0.9, 1.2] {
            let params = DomainParams {
                porosity: p,
                ..DomainParams::default()
            };
            assert!(SedimentDBLDomain::new(&params).is_err());
        }
    }

    #[test]
    fn test_duplicate_stored_field() {
        let mut domain = SedimentDBLDomain::new(&DomainParams::default()).unwrap();
        domain
            .create_field("oxy", Unit::dimensionless(), 0.0.into(), true, true)
            .unwrap();
        let err = domain
            .create_field("oxy", Unit::dimensionless(), 0.0.into(), true, true)
            .unwrap_err();
        assert!(matches!(err, BenthosError::DuplicateName { .. }));
        // unstored fields may share names
        domain
            .create_field("oxy", Unit::dimensionless(), 0.0.into(), false, false)
            .unwrap();
    }

    #[test]
    fn test_value_shape_checked() {
        let mut domain = SedimentDBLDomain::new(&DomainParams::default()).unwrap();
        let wrong = FieldData::from_vec(vec![1.0; 3]);
        assert!(domain
            .create_field("x", Unit::dimensionless(), wrong, false, true)
            .is_err());
    }

    #[test]
    fn test_revision_bumps_on_mutation() {
        let mut domain = SedimentDBLDomain::new(&DomainParams::default()).unwrap();
        let id = domain.field_id("sed_mask").unwrap();
        let before = domain.revision();
        domain.field_mut(id);
        assert!(domain.revision() > before);
    }

    #[test]
    fn test_locations() {
        let domain = SedimentDBLDomain::new(&DomainParams::default()).unwrap();
        assert_eq!(domain.location(Location::Top), 0..1);
        assert_eq!(domain.location(Location::Bottom), 109..110);
        assert_eq!(domain.location(Location::Dbl), 0..10);
        assert_eq!(domain.location(Location::Sediment), 10..110);
        assert_eq!(domain.in_dbl("porosity").unwrap().len(), 10);
        assert_eq!(domain.in_sediment("porosity").unwrap().len(), 100);
    }

    #[test]
    fn test_snapshot_geometry() {
        let domain = SedimentDBLDomain::new(&DomainParams::default()).unwrap();
        let state = domain.snapshot();
        let depths = state.child("depths").unwrap().data_static.as_ref().unwrap();
        assert_eq!(depths.array.len(), 110);
        assert_eq!(state.metadata["total_cells"], 110.0.into());
    }
}
