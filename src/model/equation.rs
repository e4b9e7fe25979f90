//! Transient equation of one model variable
//!
//! ```text
//! c · ∂v/∂t = ∂/∂z (D · ∂v/∂z) + Σ_k coeff_k · S_k
//! ```
//!
//! An equation is assembled while open and becomes read-only once
//! [`finalize`](ModelEquation::finalize)d. Each source `S_k` is split into an
//! explicit part and, for processes marked implicit, a coefficient of `v`
//! that enters the diagonal of the linear system.
//!
//! # Budget tracking
//!
//! With `track_budget` the equation keeps a depth integrated account of the
//! variable:
//!
//! ```text
//! expected += (sources_rate + transport_rate) · dt
//! actual    = ∫ v dz
//! ```
//!
//! `transport_rate` is Fick's law at the two domain edges using the
//! neighbouring cells,
//! `−D[1]·(v[0]−v[1])/(z[1]−z[0]) − D[n−2]·(v[n−1]−v[n−2])/(z[n−1]−z[n−2])`.
//! The budget is a diagnostic and never feeds back into the solve.

use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::entity::{DataNode, StateNode};
use crate::error::{BenthosError, BenthosResult};
use crate::expression::{CompiledExpr, Expr};
use crate::model::paths::{ModelView, ProcessHandle, TermTarget};
use crate::models::{call_in_scope, SedimentDBLDomain, SourceSplit};
use crate::physics::{sweep, FieldId, LinearSolver, TermCoefficients, Unit};

/// Assembly state of an equation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EquationState {
    /// Terms may be added
    Open,
    /// Read-only and solvable
    Finalized,
}

/// Tracked budget quantities, depth integrated in base units
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Tracked {
    /// Length of the last step (s)
    pub time_step: f64,
    /// Quantity expected from the accumulated changes
    pub var_expected: f64,
    /// Quantity present in the domain
    pub var_actual: f64,
    /// Change caused by the sources over the last step
    pub sources_change: f64,
    /// Change caused by transport over the last step
    pub transport_change: f64,
}

impl Tracked {
    const FIELDS: [&'static str; 5] = [
        "time_step",
        "var_expected",
        "var_actual",
        "sources_change",
        "transport_change",
    ];

    fn values(&self) -> [f64; 5] {
        [
            self.time_step,
            self.var_expected,
            self.var_actual,
            self.sources_change,
            self.transport_change,
        ]
    }

    /// Relative error of the expected against the actual quantity
    pub fn relative_error(&self) -> f64 {
        if self.var_actual == 0.0 {
            0.0
        } else {
            (self.var_expected - self.var_actual) / self.var_actual
        }
    }
}

/// Source of an equation as handed over by the model
#[derive(Debug, Clone)]
pub enum SourceInput {
    /// A field added explicitly
    Field(FieldId),
    /// A process with its split for the equation variable
    Process {
        /// Where the process lives
        handle: ProcessHandle,
        /// Explicit and implicit parts
        split: SourceSplit,
        /// Full formula, parameters substituted
        formula: Expr,
        /// Event symbols with their timer fields
        events: Vec<(String, FieldId)>,
    },
}

#[derive(Debug)]
enum SourceKind {
    Field(FieldId),
    Process {
        handle: ProcessHandle,
        explicit: CompiledExpr,
        implicit: Option<CompiledExpr>,
        formula: Expr,
        events: Vec<(String, FieldId)>,
    },
}

#[derive(Debug)]
struct SourceTerm {
    path: String,
    coeff: f64,
    kind: SourceKind,
}

#[derive(Debug, Clone)]
struct DiffusionTerm {
    path: String,
    coeff: f64,
    target: TermTarget,
}

fn compile(expr: &Expr) -> CompiledExpr {
    let args: Vec<String> = expr.free_symbols().into_iter().collect();
    CompiledExpr::compile(expr, &args)
}

/// Trapezoidal integral of `y` over `x`
pub(crate) fn trapz(y: &DVector<f64>, x: &DVector<f64>) -> f64 {
    (1..y.len().min(x.len()))
        .map(|i| 0.5 * (x[i] - x[i - 1]) * (y[i] + y[i - 1]))
        .sum()
}

/// Equation of one transient variable
#[derive(Debug)]
pub struct ModelEquation {
    name: String,
    var_path: String,
    var_name: String,
    var_id: FieldId,
    transient: Option<f64>,
    diffusion: Option<DiffusionTerm>,
    sources: Vec<SourceTerm>,
    state: EquationState,
    track_budget: bool,
    tracked: Tracked,
}

impl ModelEquation {
    /// Open equation of the field `var_id` named `var_name` at `var_path`
    pub fn new(
        name: impl Into<String>,
        var_path: impl Into<String>,
        var_name: impl Into<String>,
        var_id: FieldId,
        track_budget: bool,
    ) -> Self {
        let name = name.into();
        let var_path = var_path.into();
        debug!("Initializing equation {} for {:?}", name, var_path);
        Self {
            name,
            var_path,
            var_name: var_name.into(),
            var_id,
            transient: None,
            diffusion: None,
            sources: Vec::new(),
            state: EquationState::Open,
            track_budget,
            tracked: Tracked::default(),
        }
    }

    /// Equation name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Model path of the variable
    pub fn var_path(&self) -> &str {
        &self.var_path
    }

    /// Field of the variable
    pub fn var_id(&self) -> FieldId {
        self.var_id
    }

    /// Assembly state
    pub fn state(&self) -> EquationState {
        self.state
    }

    /// Whether the equation is finalized
    pub fn is_finalized(&self) -> bool {
        self.state == EquationState::Finalized
    }

    /// Whether the budget is tracked
    pub fn track_budget(&self) -> bool {
        self.track_budget
    }

    /// Tracked budget
    pub fn tracked(&self) -> &Tracked {
        &self.tracked
    }

    /// Paths and coefficients of the sources, in insertion order
    pub fn source_coeffs(&self) -> Vec<(&str, f64)> {
        self.sources.iter().map(|s| (s.path.as_str(), s.coeff)).collect()
    }

    /// Path and coefficient of the diffusion term
    pub fn diffusion_def(&self) -> Option<(&str, f64)> {
        self.diffusion.as_ref().map(|d| (d.path.as_str(), d.coeff))
    }

    fn require_open(&self) -> BenthosResult<()> {
        if self.is_finalized() {
            return Err(BenthosError::EquationFinalized {
                name: self.name.clone(),
            });
        }
        Ok(())
    }

    fn require_finalized(&self) -> BenthosResult<()> {
        if !self.is_finalized() {
            return Err(BenthosError::equation(&self.name, "equation is not finalized"));
        }
        Ok(())
    }

    fn check_coeff(&self, coeff: f64) -> BenthosResult<()> {
        if !coeff.is_finite() {
            return Err(BenthosError::equation(
                &self.name,
                format!("coefficient must be a finite number, got {}", coeff),
            ));
        }
        Ok(())
    }

    /// Set the coefficient of the transient term, exactly once
    pub fn set_transient(&mut self, coeff: f64) -> BenthosResult<()> {
        self.require_open()?;
        self.check_coeff(coeff)?;
        if self.transient.is_some() {
            return Err(BenthosError::TermAlreadySet {
                name: self.name.clone(),
                term: "transient",
            });
        }
        debug!("{}: transient term with coeff {}", self.name, coeff);
        self.transient = Some(coeff);
        Ok(())
    }

    /// Set the diffusion coefficient from `path` times `coeff`, at most once
    pub fn set_diffusion(&mut self, path: &str, coeff: f64, target: TermTarget) -> BenthosResult<()> {
        self.require_open()?;
        self.check_coeff(coeff)?;
        if self.diffusion.is_some() {
            return Err(BenthosError::TermAlreadySet {
                name: self.name.clone(),
                term: "diffusion",
            });
        }
        info!("{}: diffusion term from {:?} with coeff {}", self.name, path, coeff);
        self.diffusion = Some(DiffusionTerm {
            path: path.to_string(),
            coeff,
            target,
        });
        Ok(())
    }

    /// Add a source from `path` scaled by `coeff`
    pub fn add_source(&mut self, path: &str, coeff: f64, source: SourceInput) -> BenthosResult<()> {
        self.require_open()?;
        self.check_coeff(coeff)?;
        if self.sources.iter().any(|s| s.path == path) {
            return Err(BenthosError::duplicate(path, format!("sources of equation {}", self.name)));
        }
        let kind = match source {
            SourceInput::Field(id) => SourceKind::Field(id),
            SourceInput::Process {
                handle,
                split,
                formula,
                events,
            } => {
                let c = Expr::Num(coeff);
                let explicit = compile(&Expr::mul(c.clone(), split.explicit));
                let implicit = split.implicit.map(|s1| compile(&Expr::mul(c.clone(), s1)));
                debug!(
                    "{}: source {:?} explicit={} implicit={:?}",
                    self.name,
                    path,
                    explicit.source(),
                    implicit.as_ref().map(|c| c.source().to_string())
                );
                SourceKind::Process {
                    handle,
                    explicit,
                    implicit,
                    formula: Expr::mul(c, formula),
                    events,
                }
            }
        };
        info!("{}: added source term from {:?} with coeff {}", self.name, path, coeff);
        self.sources.push(SourceTerm {
            path: path.to_string(),
            coeff,
            kind,
        });
        Ok(())
    }

    /// Close the equation for assembly
    ///
    /// Requires the transient term and a diffusion term or a source. Repeated
    /// calls only warn.
    pub fn finalize(&mut self, view: &ModelView<'_>) -> BenthosResult<()> {
        if self.is_finalized() {
            warn!("Equation {} already finalized", self.name);
            return Ok(());
        }
        if self.transient.is_none() {
            return Err(BenthosError::equation(
                &self.name,
                "cannot finalize equation without transient term",
            ));
        }
        if self.diffusion.is_none() && self.sources.is_empty() {
            return Err(BenthosError::equation(
                &self.name,
                "cannot finalize equation without right-hand side terms",
            ));
        }
        self.state = EquationState::Finalized;
        if self.track_budget {
            let quantity = self.var_quantity(view.domain);
            self.tracked = Tracked {
                var_expected: quantity,
                var_actual: quantity,
                ..Tracked::default()
            };
        }
        info!("Final equation: {}", self.as_symbolic());
        Ok(())
    }

    // ========================================== evaluation ==========================================

    /// Cell diffusivities
    pub fn diffusion_coeff(&self, view: &ModelView<'_>) -> BenthosResult<Option<DVector<f64>>> {
        let Some(term) = &self.diffusion else {
            return Ok(None);
        };
        let n = view.domain.cells();
        let values = match &term.target {
            TermTarget::Field(id) => view.domain.field(*id).values().clone(),
            TermTarget::Process(handle) => {
                let scope = view.scope(&handle.scope)?;
                view.process(handle)?.evaluate(&scope, None)?.to_vector(n)?
            }
        };
        Ok(Some(values * term.coeff))
    }

    /// Numeric coefficients of the equation for the current field values
    pub fn coefficients(&self, view: &ModelView<'_>) -> BenthosResult<TermCoefficients> {
        self.require_finalized()?;
        let n = view.domain.cells();
        let transient = self.transient.unwrap_or(1.0);
        let mut terms = TermCoefficients::transient_only(transient, n);
        terms.diffusion = self.diffusion_coeff(view)?;
        for source in &self.sources {
            match &source.kind {
                SourceKind::Field(id) => {
                    terms.explicit += view.domain.field(*id).values() * source.coeff;
                }
                SourceKind::Process {
                    handle,
                    explicit,
                    implicit,
                    events,
                    ..
                } => {
                    let scope = view.scope(&handle.scope)?;
                    terms.explicit += call_in_scope(explicit, &scope, events)?.to_vector(n)?;
                    if let Some(implicit) = implicit {
                        terms.implicit += call_in_scope(implicit, &scope, events)?.to_vector(n)?;
                    }
                }
            }
        }
        Ok(terms)
    }

    /// One sweep of the variable with `terms` over `dt`
    pub fn sweep(
        &self,
        domain: &mut SedimentDBLDomain,
        terms: &TermCoefficients,
        dt: f64,
        solver: LinearSolver,
    ) -> BenthosResult<f64> {
        let dx = domain.cell_size();
        sweep(domain.field_mut(self.var_id), terms, dx, dt, solver)
    }

    /// Sum of the sources, each evaluated in full
    pub fn sources_total(&self, view: &ModelView<'_>) -> BenthosResult<DVector<f64>> {
        let n = view.domain.cells();
        let mut total = DVector::zeros(n);
        for source in &self.sources {
            match &source.kind {
                SourceKind::Field(id) => total += view.domain.field(*id).values() * source.coeff,
                SourceKind::Process { handle, .. } => {
                    let scope = view.scope(&handle.scope)?;
                    let value = view.process(handle)?.evaluate(&scope, None)?.to_vector(n)?;
                    total += value * source.coeff;
                }
            }
        }
        Ok(total)
    }

    /// Depth integral of the sources
    pub fn sources_rate(&self, view: &ModelView<'_>) -> BenthosResult<f64> {
        Ok(trapz(&self.sources_total(view)?, view.domain.depths()))
    }

    /// Transport through the domain edges
    pub fn transport_rate(&self, view: &ModelView<'_>) -> BenthosResult<f64> {
        let Some(d) = self.diffusion_coeff(view)? else {
            return Ok(0.0);
        };
        let v = view.domain.field(self.var_id).values();
        let z = view.domain.depths();
        let n = v.len();
        let top = -d[1] * (v[0] - v[1]) / (z[1] - z[0]);
        let bottom = -d[n - 2] * (v[n - 1] - v[n - 2]) / (z[n - 1] - z[n - 2]);
        Ok(top + bottom)
    }

    /// Depth integral of the variable
    pub fn var_quantity(&self, domain: &SedimentDBLDomain) -> f64 {
        trapz(domain.field(self.var_id).values(), domain.depths())
    }

    /// Account an accepted step of `dt`
    pub fn update_tracked_budget(&mut self, dt: f64, view: &ModelView<'_>) -> BenthosResult<()> {
        if !self.track_budget {
            return Ok(());
        }
        let sources_change = dt * self.sources_rate(view)?;
        let transport_change = dt * self.transport_rate(view)?;
        self.tracked = Tracked {
            time_step: dt,
            var_expected: self.tracked.var_expected + sources_change + transport_change,
            var_actual: self.var_quantity(view.domain),
            sources_change,
            transport_change,
        };
        debug!("{}: tracked budget {:?}", self.name, self.tracked);
        Ok(())
    }

    /// Textual form `d<v>/dt = D<v>·c·d²<v>/dz² + Σ sources`
    pub fn as_symbolic(&self) -> String {
        let v = &self.var_name;
        let lhs = match self.transient {
            Some(c) if c != 1.0 => format!("{}*d{}/dt", c, v),
            _ => format!("d{}/dt", v),
        };
        let mut rhs: Vec<String> = Vec::new();
        if let Some(d) = &self.diffusion {
            rhs.push(format!("D{}*{}*d2{}/dz2", v, d.coeff, v));
        }
        for source in &self.sources {
            match &source.kind {
                SourceKind::Field(_) => rhs.push(format!("{}*{}", source.coeff, source.path)),
                SourceKind::Process { formula, .. } => rhs.push(formula.to_string()),
            }
        }
        format!("{} = {}", lhs, rhs.join(" + "))
    }

    // =========================================== snapshot ===========================================

    /// State of the equation
    pub fn snapshot(&self, view: &ModelView<'_>) -> BenthosResult<StateNode> {
        self.require_finalized()?;
        let var_unit = view.domain.field(self.var_id).unit().base();
        let rate_unit = &var_unit / &Unit::second();

        let mut diffusion = StateNode::new();
        if let Some(d) = &self.diffusion {
            diffusion = diffusion.meta(d.path.clone(), d.coeff);
        }
        let transient = StateNode::new().meta(self.var_path.clone(), self.transient.unwrap_or(1.0));
        let mut sources =
            StateNode::with_data(DataNode::cells(&self.sources_total(view)?, rate_unit.label()));
        for s in &self.sources {
            sources = sources.meta(s.path.clone(), s.coeff);
        }

        let mut state = StateNode::new().meta("variable", self.var_path.clone());
        state.insert_child("diffusion", diffusion);
        state.insert_child("transient", transient);
        state.insert_child("sources", sources);

        if self.track_budget {
            let quantity_unit = (&var_unit * &Unit::meter()).label().to_string();
            let mut tracked = StateNode::new();
            for (field, value) in Tracked::FIELDS.iter().zip(self.tracked.values()) {
                let unit = if *field == "time_step" { "s" } else { quantity_unit.as_str() };
                tracked.insert_child(*field, StateNode::with_data(DataNode::scalar(value, unit)));
            }
            state.insert_child("tracked_budget", tracked);
        }
        Ok(state)
    }

    /// Restore the tracked budget, when stored
    pub fn restore_from(&mut self, state: &StateNode, tidx: Option<usize>) -> BenthosResult<()> {
        let Some(tracked) = state.child("tracked_budget") else {
            return Ok(());
        };
        let mut values = [0.0; 5];
        for (slot, field) in values.iter_mut().zip(Tracked::FIELDS) {
            let node = tracked.child(field).ok_or_else(|| {
                BenthosError::snapshot(
                    format!("equations.{}.tracked_budget", self.name),
                    format!("missing {}", field),
                )
            })?;
            *slot = node.require_data(field)?.to_scalar(tidx)?;
        }
        let [time_step, var_expected, var_actual, sources_change, transport_change] = values;
        self.tracked = Tracked {
            time_step,
            var_expected,
            var_actual,
            sources_change,
            transport_change,
        };
        debug!("Restored {} budget: {:?}", self.name, self.tracked);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DomainParams;
    use approx::assert_relative_eq;
    use std::collections::BTreeMap;

    fn domain() -> SedimentDBLDomain {
        let mut domain = SedimentDBLDomain::new(&DomainParams::default()).unwrap();
        domain
            .create_field("oxy", Unit::parse("mol/m**3").unwrap(), 1.0.into(), true, true)
            .unwrap();
        domain
            .create_field("D", Unit::parse("m**2/s").unwrap(), 1e-9.into(), false, true)
            .unwrap();
        domain
    }

    fn equation(domain: &SedimentDBLDomain, track: bool) -> ModelEquation {
        let id = domain.field_id("oxy").unwrap();
        ModelEquation::new("oxyEqn", "domain.oxy", "oxy", id, track)
    }

    #[test]
    fn test_transient_only_once() {
        let domain = domain();
        let mut eq = equation(&domain, false);
        eq.set_transient(1.0).unwrap();
        assert!(matches!(
            eq.set_transient(1.0),
            Err(BenthosError::TermAlreadySet { term: "transient", .. })
        ));
    }

    #[test]
    fn test_finalize_requires_terms() {
        let domain = domain();
        let (env, microbes) = (BTreeMap::new(), BTreeMap::new());
        let view = ModelView::new(&domain, &env, &microbes);

        let mut eq = equation(&domain, false);
        assert!(eq.finalize(&view).is_err());
        eq.set_transient(1.0).unwrap();
        assert!(eq.finalize(&view).is_err());
        assert_eq!(eq.state(), EquationState::Open);
    }

    #[test]
    fn test_finalize_is_idempotent() {
        let domain = domain();
        let (env, microbes) = (BTreeMap::new(), BTreeMap::new());
        let view = ModelView::new(&domain, &env, &microbes);
        let d = domain.field_id("D").unwrap();

        let mut eq = equation(&domain, false);
        eq.set_transient(1.0).unwrap();
        eq.set_diffusion("domain.D", 1.0, TermTarget::Field(d)).unwrap();
        eq.finalize(&view).unwrap();
        eq.finalize(&view).unwrap();
        assert!(eq.is_finalized());
        assert!(eq.diffusion_def().is_some());
        assert!(matches!(
            eq.add_source("domain.D", 1.0, SourceInput::Field(d)),
            Err(BenthosError::EquationFinalized { .. })
        ));
    }

    #[test]
    fn test_duplicate_source_path() {
        let domain = domain();
        let d = domain.field_id("D").unwrap();
        let mut eq = equation(&domain, false);
        eq.add_source("domain.D", 1.0, SourceInput::Field(d)).unwrap();
        assert!(matches!(
            eq.add_source("domain.D", 2.0, SourceInput::Field(d)),
            Err(BenthosError::DuplicateName { .. })
        ));
        assert_eq!(eq.source_coeffs(), vec![("domain.D", 1.0)]);
    }

    #[test]
    fn test_transport_vanishes_for_uniform_field() {
        let domain = domain();
        let (env, microbes) = (BTreeMap::new(), BTreeMap::new());
        let view = ModelView::new(&domain, &env, &microbes);
        let d = domain.field_id("D").unwrap();
        let mut eq = equation(&domain, true);
        eq.set_transient(1.0).unwrap();
        eq.set_diffusion("domain.D", 1.0, TermTarget::Field(d)).unwrap();
        eq.finalize(&view).unwrap();
        assert_relative_eq!(eq.transport_rate(&view).unwrap(), 0.0);
        assert_relative_eq!(eq.tracked().var_actual, eq.var_quantity(&domain));
    }

    #[test]
    fn test_budget_follows_constant_source() {
        let mut domain = domain();
        let rate = domain
            .create_field("rate", Unit::parse("mol/m**3/s").unwrap(), 2e-3.into(), false, true)
            .unwrap();
        let id = domain.field_id("oxy").unwrap();
        let mut eq = ModelEquation::new("oxyEqn", "domain.oxy", "oxy", id, true);
        eq.set_transient(1.0).unwrap();
        eq.add_source("domain.rate", 1.0, SourceInput::Field(rate)).unwrap();
        let (env, microbes) = (BTreeMap::new(), BTreeMap::new());
        eq.finalize(&ModelView::new(&domain, &env, &microbes)).unwrap();

        let start = eq.var_quantity(&domain);
        let dt = 10.0;
        let terms = eq.coefficients(&ModelView::new(&domain, &env, &microbes)).unwrap();
        eq.sweep(&mut domain, &terms, dt, LinearSolver::Tridiagonal).unwrap();
        eq.update_tracked_budget(dt, &ModelView::new(&domain, &env, &microbes)).unwrap();

        let tracked = *eq.tracked();
        assert_relative_eq!(tracked.time_step, dt);
        assert_relative_eq!(tracked.var_expected, tracked.var_actual, max_relative = 1e-9);
        assert!(tracked.var_actual > start);
        assert!(tracked.relative_error().abs() < 1e-9);
    }

    #[test]
    fn test_snapshot_and_restore_budget() {
        let domain = domain();
        let (env, microbes) = (BTreeMap::new(), BTreeMap::new());
        let view = ModelView::new(&domain, &env, &microbes);
        let d = domain.field_id("D").unwrap();
        let mut eq = equation(&domain, true);
        eq.set_transient(1.0).unwrap();
        eq.set_diffusion("domain.D", 1.0, TermTarget::Field(d)).unwrap();
        eq.finalize(&view).unwrap();

        let state = eq.snapshot(&view).unwrap();
        assert!(state.get(&["tracked_budget", "var_expected"]).is_some());
        assert!(state.child("sources").unwrap().data.is_some());

        let mut other = equation(&domain, true);
        other.restore_from(&state, None).unwrap();
        assert_relative_eq!(other.tracked().var_expected, eq.tracked().var_expected);
    }

    #[test]
    fn test_symbolic_form() {
        let domain = domain();
        let d = domain.field_id("D").unwrap();
        let mut eq = equation(&domain, false);
        eq.set_transient(1.0).unwrap();
        eq.set_diffusion("domain.D", 1.0, TermTarget::Field(d)).unwrap();
        assert_eq!(eq.as_symbolic(), "doxy/dt = Doxy*1*d2oxy/dz2");
    }
}
