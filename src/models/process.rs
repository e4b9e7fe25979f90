//! Processes
//!
//! A [`Process`] binds a formula to the variables it reads, constant
//! parameters, and nested response processes multiplied into its result.
//! Evaluation gathers variables by name from a [`VarScope`], parameters as
//! base-unit scalars, and is memoised on
//! `(scope identity, field revision, parameter set)`.
//!
//! Processes may also carry events: a condition over domain variables
//! whose active duration is tracked per cell and exposed to the formula as
//! a symbol named after the event.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};

use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::entity::{DataNode, Entity, EntityCore, SetupContext, StateNode};
use crate::error::{BenthosError, BenthosResult};
use crate::expression::{CompiledExpr, Expr, Expression, FormulaDef, Namespace};
use crate::models::domain::{SedimentDBLDomain, VarScope};
use crate::physics::{FieldData, FieldId, ParamValue, Quantity, Unit};
use crate::solver::ModelClock;

// =================================================================================================
// Parameters
// =================================================================================================

fn default_implicit() -> bool {
    true
}

/// Definition of an event of a process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EventParams {
    /// Condition over domain variables
    pub expr: FormulaDef,
}

/// Definition of a process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcessParams {
    /// The formula
    #[serde(alias = "formula")]
    pub expr: FormulaDef,
    /// Variables read from the scope; inferred from the formula when absent
    #[serde(default)]
    pub varnames: Option<Vec<String>>,
    /// Constant parameters
    #[serde(default)]
    pub params: BTreeMap<String, ParamValue>,
    /// Sub-processes multiplied into the result
    #[serde(default)]
    pub responses: BTreeMap<String, ProcessParams>,
    /// Split into explicit and implicit parts when used as a source
    #[serde(default = "default_implicit")]
    pub implicit: bool,
    /// Tracked conditions
    #[serde(default)]
    pub events: BTreeMap<String, EventParams>,
}

impl ProcessParams {
    /// Definition with only a formula
    pub fn formula(text: &str) -> Self {
        Self {
            expr: FormulaDef::from(text),
            varnames: None,
            params: BTreeMap::new(),
            responses: BTreeMap::new(),
            implicit: true,
            events: BTreeMap::new(),
        }
    }
}

/// Base-unit parameter values of a process and its responses
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamSet {
    /// Parameter values by name
    pub values: BTreeMap<String, f64>,
    /// Parameter sets of the responses by name
    pub responses: BTreeMap<String, ParamSet>,
}

/// A process split into source terms for one variable
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSplit {
    /// The variable, when the process depends on it
    pub var: Option<String>,
    /// Explicit part `S0`
    pub explicit: Expr,
    /// Coefficient `S1` of the variable, when linearised
    pub implicit: Option<Expr>,
}

// =================================================================================================
// Events
// =================================================================================================

#[derive(Debug)]
struct ProcessEvent {
    name: String,
    condition: Expr,
    compiled: CompiledExpr,
    field: Option<FieldId>,
    prev_clock: f64,
}

impl ProcessEvent {
    fn new(name: &str, params: &EventParams, namespace: &Namespace) -> BenthosResult<Self> {
        let condition = Expression::parse(&params.expr, namespace)?.value();
        let args: Vec<String> = condition.free_symbols().into_iter().collect();
        debug!("Creating event {:?}: {}", name, condition);
        Ok(Self {
            name: name.to_string(),
            compiled: CompiledExpr::compile(&condition, &args),
            condition,
            field: None,
            prev_clock: 0.0,
        })
    }
}

// =================================================================================================
// Process
// =================================================================================================

#[derive(Debug, Clone)]
struct CacheEntry {
    scope: u64,
    revision: u64,
    params: ParamSet,
    value: FieldData,
}

/// A formula evaluated over the model fields
#[derive(Debug)]
pub struct Process {
    core: EntityCore,
    expr: Expression,
    varnames: Vec<String>,
    params: BTreeMap<String, Quantity>,
    responses: BTreeMap<String, Process>,
    events: BTreeMap<String, ProcessEvent>,
    implicit: bool,
    compiled: CompiledExpr,
    cache: RefCell<Option<CacheEntry>>,
    evaluations: Cell<usize>,
}

impl Process {
    /// Parse and compile a definition against `namespace`
    pub fn new(
        name: impl Into<String>,
        params: &ProcessParams,
        namespace: &Namespace,
    ) -> BenthosResult<Self> {
        let name = name.into();
        let expr = Expression::parse(&params.expr, namespace)?;

        let mut quantities = BTreeMap::new();
        for (key, value) in &params.params {
            quantities.insert(key.clone(), value.to_quantity(&Unit::dimensionless())?);
        }

        let mut responses = BTreeMap::new();
        for (key, def) in &params.responses {
            responses.insert(key.clone(), Process::new(key.clone(), def, namespace)?);
        }

        let mut events = BTreeMap::new();
        for (key, def) in &params.events {
            if quantities.contains_key(key) {
                return Err(BenthosError::duplicate(key.clone(), format!("process {}", name)));
            }
            events.insert(key.clone(), ProcessEvent::new(key, def, namespace)?);
        }

        let varnames = match &params.varnames {
            Some(names) => names.clone(),
            None => expr
                .free_symbols()
                .into_iter()
                .filter(|s| !quantities.contains_key(s) && !events.contains_key(s))
                .collect(),
        };
        for var in &varnames {
            if quantities.contains_key(var) {
                return Err(BenthosError::config(
                    format!("process {}", name),
                    format!("{:?} is both a variable and a parameter", var),
                ));
            }
        }

        let args: Vec<String> = varnames
            .iter()
            .chain(quantities.keys())
            .chain(events.keys())
            .cloned()
            .collect();
        let compiled = CompiledExpr::compile(&expr.value(), &args);
        debug!("Created process {} = {} over {:?}", name, expr, args);

        Ok(Self {
            core: EntityCore::new(name),
            expr,
            varnames,
            params: quantities,
            responses,
            events,
            implicit: params.implicit,
            compiled,
            cache: RefCell::new(None),
            evaluations: Cell::new(0),
        })
    }

    /// The formula
    pub fn expression(&self) -> &Expression {
        &self.expr
    }

    /// Variables read from the scope
    pub fn varnames(&self) -> &[String] {
        &self.varnames
    }

    /// Parameters as given
    pub fn params(&self) -> &BTreeMap<String, Quantity> {
        &self.params
    }

    /// Response sub-processes
    pub fn responses(&self) -> &BTreeMap<String, Process> {
        &self.responses
    }

    /// Whether sources are linearised in their variable
    pub fn is_implicit(&self) -> bool {
        self.implicit
    }

    /// Variables this process and its responses depend on
    pub fn dependent_vars(&self) -> Vec<String> {
        let mut vars = self.varnames.clone();
        for response in self.responses.values() {
            vars.extend(response.dependent_vars());
        }
        vars.sort();
        vars.dedup();
        vars
    }

    /// Number of evaluations that missed the cache
    pub fn evaluation_count(&self) -> usize {
        self.evaluations.get()
    }

    /// Default parameters in base units
    pub fn param_set(&self) -> ParamSet {
        ParamSet {
            values: self
                .params
                .iter()
                .map(|(k, q)| (k.clone(), q.base_value()))
                .collect(),
            responses: self
                .responses
                .iter()
                .map(|(k, r)| (k.clone(), r.param_set()))
                .collect(),
        }
    }

    fn param_value(&self, name: &str, params: &ParamSet) -> BenthosResult<f64> {
        params
            .values
            .get(name)
            .copied()
            .or_else(|| self.params.get(name).map(Quantity::base_value))
            .ok_or_else(|| BenthosError::missing_key(name, format!("params of {}", self.name())))
    }

    /// Evaluate over `scope`, with the default parameters for `None`
    pub fn evaluate(&self, scope: &dyn VarScope, params: Option<&ParamSet>) -> BenthosResult<FieldData> {
        let owned;
        let params = match params {
            Some(p) => p,
            None => {
                owned = self.param_set();
                &owned
            }
        };

        if let Some(entry) = self.cache.borrow().as_ref()
            && entry.scope == scope.scope_id()
            && entry.revision == scope.revision()
            && entry.params == *params
        {
            return Ok(entry.value.clone());
        }

        let mut args = Vec::with_capacity(self.compiled.args().len());
        for var in &self.varnames {
            let field = scope
                .lookup(var)
                .ok_or_else(|| BenthosError::not_found(var.clone()))?;
            args.push(FieldData::Cells(field.values().clone()));
        }
        for name in self.params.keys() {
            args.push(FieldData::Scalar(self.param_value(name, params)?));
        }
        for event in self.events.values() {
            let id = event.field.ok_or_else(|| BenthosError::NotSetUp {
                name: format!("{}:{}", self.name(), event.name),
            })?;
            args.push(FieldData::Cells(scope.field(id).values().clone()));
        }

        let mut value = self.compiled.call(&args)?;
        for (name, response) in &self.responses {
            let r = response.evaluate(scope, params.responses.get(name))?;
            value = value.zip_with(&r, |a, b| a * b)?;
        }
        self.evaluations.set(self.evaluations.get() + 1);

        *self.cache.borrow_mut() = Some(CacheEntry {
            scope: scope.scope_id(),
            revision: scope.revision(),
            params: params.clone(),
            value: value.clone(),
        });
        Ok(value)
    }

    /// The full formula with parameters substituted and responses multiplied in
    pub fn full_expr(&self, params: Option<&ParamSet>) -> BenthosResult<Expr> {
        let owned;
        let params = match params {
            Some(p) => p,
            None => {
                owned = self.param_set();
                &owned
            }
        };
        let mut map = HashMap::new();
        for name in self.params.keys() {
            map.insert(name.clone(), Expr::Num(self.param_value(name, params)?));
        }
        let mut expr = self.expr.value().substitute(&map);
        for (name, response) in &self.responses {
            expr = Expr::mul(expr, response.full_expr(params.responses.get(name))?);
        }
        Ok(expr.simplify())
    }

    /// Split into source terms for `var`
    ///
    /// With `implicit` set and `dS/dvar` still depending on `var`, the result
    /// is `S0 = S − S1·var` plus `S1 = dS/dvar`. Otherwise the whole
    /// formula is explicit.
    pub fn as_source_for(&self, var: &str, params: Option<&ParamSet>) -> BenthosResult<SourceSplit> {
        debug!("{}: creating as source for variable {:?}", self.name(), var);
        let s = self.full_expr(params)?;
        if !s.depends_on(var) {
            return Ok(SourceSplit {
                var: None,
                explicit: s,
                implicit: None,
            });
        }
        if self.implicit {
            let s1 = s.derivative(var).simplify();
            if s1.depends_on(var) {
                debug!("S1 dependent on {}, so should be implicit condition", var);
                let s0 = Expr::sub(s.clone(), Expr::mul(s1.clone(), Expr::sym(var))).simplify();
                return Ok(SourceSplit {
                    var: Some(var.to_string()),
                    explicit: s0,
                    implicit: Some(s1),
                });
            }
        }
        Ok(SourceSplit {
            var: Some(var.to_string()),
            explicit: s,
            implicit: None,
        })
    }

    // ============================================ events ============================================

    /// Evaluate the event conditions of this process and its responses
    pub fn event_conditions(&self, scope: &dyn VarScope) -> BenthosResult<Vec<DVector<f64>>> {
        let mut out = Vec::new();
        self.collect_conditions(scope, &mut out)?;
        Ok(out)
    }

    fn collect_conditions(&self, scope: &dyn VarScope, out: &mut Vec<DVector<f64>>) -> BenthosResult<()> {
        for event in self.events.values() {
            let value = call_in_scope(&event.compiled, scope, &[])?;
            out.push(value.to_vector(scope.cells())?);
        }
        for response in self.responses.values() {
            response.collect_conditions(scope, out)?;
        }
        Ok(())
    }

    /// Advance event timers to `time` using conditions from [`event_conditions`](Self::event_conditions)
    pub fn advance_events(
        &mut self,
        domain: &mut SedimentDBLDomain,
        conditions: Vec<DVector<f64>>,
        time: f64,
    ) -> BenthosResult<()> {
        let mut iter = conditions.into_iter();
        self.apply_conditions(domain, &mut iter, time)
    }

    fn apply_conditions(
        &mut self,
        domain: &mut SedimentDBLDomain,
        conditions: &mut impl Iterator<Item = DVector<f64>>,
        time: f64,
    ) -> BenthosResult<()> {
        for event in self.events.values_mut() {
            let condition = conditions
                .next()
                .ok_or_else(|| BenthosError::numerical("missing event condition"))?;
            let id = event.field.ok_or_else(|| BenthosError::NotSetUp {
                name: event.name.clone(),
            })?;
            let dt = time - event.prev_clock;
            let field = domain.field_mut(id);
            let values = field
                .values()
                .zip_map(&condition, |t, c| if c != 0.0 { t + dt } else { 0.0 });
            field.set_values(values)?;
            event.prev_clock = time;
        }
        for response in self.responses.values_mut() {
            response.apply_conditions(domain, conditions, time)?;
        }
        Ok(())
    }

    /// Event symbols of this process and its responses with their timer fields
    pub fn event_fields(&self) -> BenthosResult<Vec<(String, FieldId)>> {
        let mut out = Vec::new();
        for event in self.events.values() {
            let id = event.field.ok_or_else(|| BenthosError::NotSetUp {
                name: format!("{}:{}", self.name(), event.name),
            })?;
            out.push((event.name.clone(), id));
        }
        for response in self.responses.values() {
            out.extend(response.event_fields()?);
        }
        Ok(out)
    }

    /// Set the reference time of the event timers
    pub fn reset_event_clock(&mut self, time: f64) {
        for event in self.events.values_mut() {
            event.prev_clock = time;
        }
        for response in self.responses.values_mut() {
            response.reset_event_clock(time);
        }
    }

    // =========================================== snapshot ===========================================

    /// State evaluated over `scope`
    pub fn snapshot_in(&self, scope: &dyn VarScope) -> BenthosResult<StateNode> {
        let value = self.evaluate(scope, None)?.to_vector(scope.cells())?;
        let mut state = StateNode::with_data(DataNode::cells(&value, Unit::dimensionless().label()))
            .meta("expr", self.expr.to_string())
            .meta("param_names", self.params.keys().cloned().collect::<Vec<_>>());
        for (name, q) in &self.params {
            state = state.meta(name.clone(), q.to_string());
        }
        if !self.events.is_empty() {
            let mut events = StateNode::new();
            for (name, event) in &self.events {
                if let Some(id) = event.field {
                    events.insert_child(
                        name.clone(),
                        StateNode::with_data(DataNode::cells(
                            scope.field(id).values(),
                            Unit::second().label(),
                        ))
                        .meta("expr", event.condition.to_string()),
                    );
                }
            }
            state.insert_child("events", events);
        }
        if !self.responses.is_empty() {
            let mut responses = StateNode::new();
            for (name, response) in &self.responses {
                responses.insert_child(name.clone(), response.snapshot_in(scope)?);
            }
            state.insert_child("responses", responses);
        }
        Ok(state)
    }

    fn setup_events(&mut self, domain: &mut SedimentDBLDomain) -> BenthosResult<()> {
        let owner = self.name().to_string();
        for event in self.events.values_mut() {
            if event.field.is_none() {
                let name = format!("{}:{}", owner, event.name);
                event.field = Some(domain.create_field(&name, Unit::second(), 0.0.into(), false, false)?);
                info!("Added event {}: {}", name, event.condition);
            }
        }
        for response in self.responses.values_mut() {
            response.setup_events(domain)?;
        }
        Ok(())
    }

    fn restore_events(
        &mut self,
        domain: &mut SedimentDBLDomain,
        state: &StateNode,
        tidx: Option<usize>,
    ) -> BenthosResult<()> {
        if let Some(events) = state.child("events") {
            for (name, event) in &self.events {
                if let (Some(id), Some(node)) = (event.field, events.child(name)) {
                    let values = node.require_data(name)?.to_vector(tidx, domain.cells())?;
                    domain.field_mut(id).set_values(values)?;
                }
            }
        }
        if let Some(responses) = state.child("responses") {
            for (name, response) in self.responses.iter_mut() {
                if let Some(node) = responses.child(name) {
                    response.restore_events(domain, node, tidx)?;
                }
            }
        }
        Ok(())
    }
}

/// Evaluate `compiled` with its arguments looked up by name in `scope`
///
/// Names in `bound` resolve to their field first; this is how event
/// symbols, whose fields are not registered under the symbol, are found.
pub fn call_in_scope(
    compiled: &CompiledExpr,
    scope: &dyn VarScope,
    bound: &[(String, FieldId)],
) -> BenthosResult<FieldData> {
    let mut args = Vec::with_capacity(compiled.args().len());
    for name in compiled.args() {
        let field = match bound.iter().find(|(symbol, _)| symbol == name) {
            Some((_, id)) => scope.field(*id),
            None => scope
                .lookup(name)
                .ok_or_else(|| BenthosError::not_found(name.clone()))?,
        };
        args.push(FieldData::Cells(field.values().clone()));
    }
    compiled.call(&args)
}

impl Entity for Process {
    fn core(&self) -> &EntityCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut EntityCore {
        &mut self.core
    }

    fn on_domain_set(&mut self, domain: &SedimentDBLDomain) -> BenthosResult<()> {
        for response in self.responses.values_mut() {
            response.set_domain(domain)?;
        }
        Ok(())
    }

    fn setup(&mut self, ctx: &mut SetupContext<'_>) -> BenthosResult<()> {
        if self.is_setup() {
            return Ok(());
        }
        self.core.check_domain(ctx.domain)?;
        self.setup_events(ctx.domain)?;
        for response in self.responses.values_mut() {
            response.setup(ctx)?;
        }
        self.core.mark_setup()
    }

    fn on_time_updated(&mut self, domain: &mut SedimentDBLDomain, clock: &ModelClock) -> BenthosResult<()> {
        let conditions = self.event_conditions(domain)?;
        self.advance_events(domain, conditions, clock.seconds())
    }

    fn snapshot(&self, domain: &SedimentDBLDomain) -> BenthosResult<StateNode> {
        self.core.check_domain(domain)?;
        self.snapshot_in(domain)
    }

    fn restore_from(
        &mut self,
        domain: &mut SedimentDBLDomain,
        state: &StateNode,
        tidx: Option<usize>,
    ) -> BenthosResult<()> {
        self.core.check_domain(domain)?;
        self.restore_events(domain, state, tidx)
    }
}

// =================================================================================================
// Tests
// =================================================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::domain::DomainParams;
    use approx::assert_relative_eq;

    fn domain() -> SedimentDBLDomain {
        let mut domain = SedimentDBLDomain::new(&DomainParams::default()).unwrap();
        domain
            .create_field("a", Unit::dimensionless(), 2.0.into(), false, true)
            .unwrap();
        domain
            .create_field("b", Unit::dimensionless(), 3.0.into(), false, true)
            .unwrap();
        domain
    }

    fn process(yaml: &str) -> Process {
        let params: ProcessParams = serde_yaml::from_str(yaml).unwrap();
        Process::new("p", &params, &Namespace::new()).unwrap()
    }

    #[test]
    fn test_sum_over_uniform_fields() {
        let domain = domain();
        let p = process("expr: a+b\nvarnames: [a, b]\n");
        let out = p.evaluate(&domain, None).unwrap();
        assert_eq!(out, FieldData::uniform(110, 5.0));
    }

    #[test]
    fn test_inferred_varnames_exclude_params() {
        let p = process("expr: k * a\nparams: {k: 2}\n");
        assert_eq!(p.varnames(), &["a".to_string()]);
    }

    #[test]
    fn test_params_in_base_units() {
        let domain = domain();
        let p = process("expr: k * a\nparams: {k: 3 1/h}\n");
        let out = p.evaluate(&domain, None).unwrap();
        assert_relative_eq!(out.to_vector(110).unwrap()[0], 2.0 * 3.0 / 3600.0);
    }

    #[test]
    fn test_responses_multiply() {
        let domain = domain();
        let p = process(
            "expr: a\nresponses:\n  sat:\n    expr: b / (b + K)\n    params: {K: 1}\n",
        );
        let out = p.evaluate(&domain, None).unwrap();
        assert_eq!(out.to_vector(110).unwrap()[4], 2.0 * 0.75);

        let mut params = p.param_set();
        params
            .responses
            .get_mut("sat")
            .unwrap()
            .values
            .insert("K".to_string(), 3.0);
        let out = p.evaluate(&domain, Some(&params)).unwrap();
        assert_eq!(out.to_vector(110).unwrap()[4], 2.0 * 0.5);
    }

    #[test]
    fn test_cache_hit_and_invalidation() {
        let mut domain = domain();
        let p = process("expr: a*b\n");
        p.evaluate(&domain, None).unwrap();
        p.evaluate(&domain, None).unwrap();
        assert_eq!(p.evaluation_count(), 1);

        let id = domain.field_id("a").unwrap();
        domain
            .field_mut(id)
            .set_values(DVector::from_element(110, 4.0))
            .unwrap();
        let out = p.evaluate(&domain, None).unwrap();
        assert_eq!(p.evaluation_count(), 2);
        assert_eq!(out.to_vector(110).unwrap()[0], 12.0);
    }

    #[test]
    fn test_missing_variable() {
        let domain = domain();
        let p = process("expr: a * c\n");
        let err = p.evaluate(&domain, None).unwrap_err();
        assert!(matches!(err, BenthosError::ObjectNotFound { path } if path == "c"));
    }

    #[test]
    fn test_source_independent_of_var() {
        let p = process("expr: k * a\nparams: {k: 2}\n");
        let split = p.as_source_for("oxy", None).unwrap();
        assert_eq!(split.var, None);
        assert!(split.implicit.is_none());
        assert!(!split.explicit.depends_on("k"));
    }

    #[test]
    fn test_source_linear_in_var_is_explicit() {
        let p = process("expr: -k * oxy\nparams: {k: 2}\n");
        let split = p.as_source_for("oxy", None).unwrap();
        assert_eq!(split.var.as_deref(), Some("oxy"));
        assert!(split.implicit.is_none());
    }

    #[test]
    fn test_source_nonlinear_split() {
        let p = process("expr: -oxy**2\n");
        let split = p.as_source_for("oxy", None).unwrap();
        let s1 = split.implicit.unwrap();
        let args = vec!["oxy".to_string()];
        let at = |e: &Expr| {
            CompiledExpr::compile(e, &args)
                .call(&[FieldData::Scalar(3.0)])
                .unwrap()
                .try_as_scalar()
                .unwrap()
        };
        assert_eq!(at(&s1), -6.0);
        // S0 + S1·v reproduces S
        assert_eq!(at(&split.explicit) + at(&s1) * 3.0, -9.0);
    }

    #[test]
    fn test_explicit_flag_disables_split() {
        let p = process("expr: -oxy**2\nimplicit: false\n");
        let split = p.as_source_for("oxy", None).unwrap();
        assert!(split.implicit.is_none());
    }

    #[test]
    fn test_event_timer() {
        let mut domain = domain();
        let mut p = process("expr: a * induced\nevents:\n  induced:\n    expr: b > 2\n");
        p.set_domain(&domain).unwrap();
        let fields = BTreeMap::new();
        let mut ctx = SetupContext::new(&mut domain, &fields);
        p.setup(&mut ctx).unwrap();

        let mut clock = ModelClock::new();
        clock.increment_time(60.0).unwrap();
        p.on_time_updated(&mut domain, &clock).unwrap();
        let out = p.evaluate(&domain, None).unwrap();
        assert_eq!(out.to_vector(110).unwrap()[0], 120.0);

        let state = p.snapshot(&domain).unwrap();
        assert!(state.get(&["events", "induced"]).is_some());
    }

    fn set_up(p: &mut Process, domain: &mut SedimentDBLDomain) {
        p.set_domain(domain).unwrap();
        let fields = BTreeMap::new();
        p.setup(&mut SetupContext::new(domain, &fields)).unwrap();
    }

    const GATED: &str = r#"
expr: a * induced
events:
  induced: {expr: b > 2}
responses:
  lag:
    expr: 1 + exposed
    events:
      exposed: {expr: a > 1}
"#;

    #[test]
    fn test_event_fields_include_responses() {
        let mut domain = domain();
        let mut p = process(GATED);
        set_up(&mut p, &mut domain);
        let names: Vec<String> = p.event_fields().unwrap().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["induced".to_string(), "exposed".to_string()]);
        assert!(domain.field_id("p:induced").is_none());
    }

    #[test]
    fn test_response_event_timers_round_trip() {
        let mut domain = domain();
        let mut p = process(GATED);
        set_up(&mut p, &mut domain);

        let mut clock = ModelClock::new();
        clock.increment_time(30.0).unwrap();
        p.on_time_updated(&mut domain, &clock).unwrap();
        let state = p.snapshot(&domain).unwrap();
        let stored = state.get(&["responses", "lag", "events", "exposed"]).unwrap();
        let timer = stored.require_data("exposed").unwrap().to_vector(None, 110).unwrap();
        assert_eq!(timer[3], 30.0);

        let mut fresh_domain = self::domain();
        let mut fresh = process(GATED);
        set_up(&mut fresh, &mut fresh_domain);
        fresh.restore_from(&mut fresh_domain, &state, None).unwrap();
        let (_, exposed) = fresh.event_fields().unwrap()[1].clone();
        assert_eq!(fresh_domain.field(exposed).values()[3], 30.0);
        // a * induced * (1 + exposed)
        let out = fresh.evaluate(&fresh_domain, None).unwrap();
        assert_eq!(out.to_vector(110).unwrap()[3], 2.0 * 30.0 * 31.0);
    }

    #[test]
    fn test_snapshot_metadata() {
        let mut domain = domain();
        let mut p = process("expr: k * a\nparams: {k: 2}\n");
        p.set_domain(&domain).unwrap();
        let fields = BTreeMap::new();
        p.setup(&mut SetupContext::new(&mut domain, &fields)).unwrap();
        let state = p.snapshot(&domain).unwrap();
        assert_eq!(state.metadata["k"], "2".into());
        assert_eq!(
            state.metadata["param_names"],
            vec!["k".to_string()].into()
        );
        assert_eq!(state.data.unwrap().array.len(), 110);
    }
}
