//! Class registry for declarative definitions
//!
//! A definition node names its class with `cls` and carries the
//! constructor parameters in `init_params`:
//!
//! ```yaml
//! oxy:
//!   cls: Variable
//!   init_params:
//!     create: {value: 0, unit: mol/m**3, hasOld: true}
//! ```
//!
//! The [`Registry`] maps class paths to factory functions. Unqualified names
//! are looked up in the `microbenthos.` namespace, and aliases map legacy
//! names onto the registered classes.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{BenthosError, BenthosResult};
use crate::expression::Namespace;
use crate::models::{
    DomainParams, Irradiance, IrradianceParams, MicrobesParams, MicrobialGroup, ModelVariable,
    Process, ProcessParams, SedimentDBLDomain, VariableParams,
};

/// Namespace of unqualified class names
pub const DEFAULT_NAMESPACE: &str = "microbenthos";

/// A `cls`/`init_params` definition node
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntityDef {
    /// Class path, e.g. `microbenthos.Irradiance` or `Irradiance`
    #[serde(default)]
    pub cls: Option<String>,
    /// Constructor parameters
    #[serde(default)]
    pub init_params: serde_yaml::Value,
    /// Parameters handed to [`EntityKind::post_init`]
    #[serde(default)]
    pub post_params: Option<serde_yaml::Value>,
}

impl EntityDef {
    /// Definition of `cls` with typed parameters
    pub fn new<P: Serialize>(cls: &str, params: &P) -> BenthosResult<Self> {
        Ok(Self {
            cls: Some(cls.to_string()),
            init_params: serde_yaml::to_value(params)?,
            post_params: None,
        })
    }

    /// Deserialize `init_params` into the parameter struct of a class
    pub fn params<P: DeserializeOwned>(&self) -> BenthosResult<P> {
        let value = match &self.init_params {
            serde_yaml::Value::Null => serde_yaml::Value::Mapping(Default::default()),
            other => other.clone(),
        };
        Ok(serde_yaml::from_value(value)?)
    }
}

/// An entity built by the registry
#[derive(Debug)]
pub enum EntityKind {
    /// The model domain
    Domain(Box<SedimentDBLDomain>),
    /// A model variable
    Variable(ModelVariable),
    /// A process
    Process(Process),
    /// The irradiance
    Irradiance(Irradiance),
    /// A group of microbes
    MicrobialGroup(MicrobialGroup),
}

impl EntityKind {
    /// Short class name of the variant
    pub fn class_name(&self) -> &'static str {
        match self {
            EntityKind::Domain(_) => "SedimentDBLDomain",
            EntityKind::Variable(_) => "ModelVariable",
            EntityKind::Process(_) => "Process",
            EntityKind::Irradiance(_) => "Irradiance",
            EntityKind::MicrobialGroup(_) => "MicrobialGroup",
        }
    }

    /// Second construction phase with `post_params`
    ///
    /// None of the built-in classes take post parameters; they are logged
    /// and ignored.
    pub fn post_init(&mut self, params: Option<&serde_yaml::Value>) -> BenthosResult<()> {
        if let Some(params) = params {
            debug!("{} ignores post_init params {:?}", self.class_name(), params);
        }
        Ok(())
    }
}

/// What factories can use besides the parameters
pub struct FactoryContext<'a> {
    /// Formula namespace of the model
    pub namespace: &'a Namespace,
}

/// Constructor of a registered class
pub type Factory = fn(&str, &EntityDef, &FactoryContext<'_>) -> BenthosResult<EntityKind>;

/// Class path to factory table
pub struct Registry {
    factories: BTreeMap<String, Factory>,
    aliases: BTreeMap<String, String>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("classes", &self.factories.keys().collect::<Vec<_>>())
            .field("aliases", &self.aliases)
            .finish()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn qualify(cls: &str) -> String {
    if cls.contains('.') {
        cls.to_string()
    } else {
        format!("{}.{}", DEFAULT_NAMESPACE, cls)
    }
}

impl Registry {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
            aliases: BTreeMap::new(),
        }
    }

    /// Registry with the built-in classes
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("SedimentDBLDomain", |_, def, _| {
            let params: DomainParams = def.params()?;
            Ok(EntityKind::Domain(Box::new(SedimentDBLDomain::new(&params)?)))
        });
        registry.register("ModelVariable", |name, def, _| {
            let params: VariableParams = def.params()?;
            Ok(EntityKind::Variable(ModelVariable::new(name, params)?))
        });
        registry.register("Process", |name, def, ctx| {
            let params: ProcessParams = def.params()?;
            Ok(EntityKind::Process(Process::new(name, &params, ctx.namespace)?))
        });
        registry.register("Irradiance", |name, def, _| {
            let params: IrradianceParams = def.params()?;
            Ok(EntityKind::Irradiance(Irradiance::new(name, &params)?))
        });
        registry.register("MicrobialGroup", |name, def, ctx| {
            let params: MicrobesParams = def.params()?;
            Ok(EntityKind::MicrobialGroup(MicrobialGroup::new(
                name,
                &params,
                ctx.namespace,
            )?))
        });

        registry.alias("Variable", "ModelVariable");
        registry.alias("ExprProcess", "Process");
        registry.alias("microbenthos.domain.SedimentDBLDomain", "SedimentDBLDomain");
        registry.alias("microbenthos.irradiance.Irradiance", "Irradiance");
        registry.alias("microbenthos.microbes.MicrobialGroup", "MicrobialGroup");
        registry
    }

    /// Register a factory under `cls`; a later registration replaces it
    pub fn register(&mut self, cls: &str, factory: Factory) {
        let key = qualify(cls);
        debug!("Registered entity class {}", key);
        self.factories.insert(key, factory);
    }

    /// Make `alias` resolve to `target`
    pub fn alias(&mut self, alias: &str, target: &str) {
        self.aliases.insert(qualify(alias), qualify(target));
    }

    /// Fully qualified class path registered for `cls`
    pub fn resolve(&self, cls: &str) -> BenthosResult<&str> {
        let key = qualify(cls);
        let key = self.aliases.get(&key).unwrap_or(&key);
        self.factories
            .get_key_value(key)
            .map(|(k, _)| k.as_str())
            .ok_or_else(|| BenthosError::ClassLookup { cls: cls.to_string() })
    }

    /// Whether `cls` resolves to a registered class
    pub fn contains(&self, cls: &str) -> bool {
        self.resolve(cls).is_ok()
    }

    /// Build the entity `name` from a definition node
    pub fn create(
        &self,
        name: &str,
        def: &EntityDef,
        ctx: &FactoryContext<'_>,
    ) -> BenthosResult<EntityKind> {
        let cls = def
            .cls
            .as_deref()
            .ok_or_else(|| BenthosError::missing_key("cls", name))?;
        let key = self.resolve(cls)?;
        let factory = self
            .factories
            .get(key)
            .ok_or_else(|| BenthosError::ClassLookup { cls: cls.to_string() })?;
        debug!("Creating {} as {}", name, key);
        let mut entity = factory(name, def, ctx)?;
        entity.post_init(def.post_params.as_ref())?;
        Ok(entity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create(yaml: &str) -> BenthosResult<EntityKind> {
        let def: EntityDef = serde_yaml::from_str(yaml).unwrap();
        let ns = Namespace::new();
        Registry::with_defaults().create("thing", &def, &FactoryContext { namespace: &ns })
    }

    #[test]
    fn test_resolve_qualifies_and_follows_aliases() {
        let registry = Registry::with_defaults();
        assert_eq!(registry.resolve("Variable").unwrap(), "microbenthos.ModelVariable");
        assert_eq!(
            registry.resolve("microbenthos.ExprProcess").unwrap(),
            "microbenthos.Process"
        );
        assert_eq!(
            registry.resolve("microbenthos.irradiance.Irradiance").unwrap(),
            "microbenthos.Irradiance"
        );
    }

    #[test]
    fn test_missing_cls() {
        let err = create("init_params: {}\n").unwrap_err();
        assert!(matches!(err, BenthosError::MissingKey { ref key, .. } if key == "cls"));
    }

    #[test]
    fn test_unknown_cls() {
        let err = create("cls: Nonexistent\n").unwrap_err();
        assert!(matches!(err, BenthosError::ClassLookup { .. }));
    }

    #[test]
    fn test_create_variable_and_process() {
        let var = create("cls: Variable\ninit_params:\n  create: {value: 3, unit: mol/m**3}\n").unwrap();
        assert!(matches!(var, EntityKind::Variable(_)));

        let proc = create("cls: ExprProcess\ninit_params:\n  formula: a * b\n").unwrap();
        match proc {
            EntityKind::Process(p) => assert_eq!(p.varnames(), ["a", "b"]),
            other => panic!("unexpected {:?}", other.class_name()),
        }
    }

    #[test]
    fn test_domain_without_params_uses_defaults() {
        match create("cls: SedimentDBLDomain\n").unwrap() {
            EntityKind::Domain(domain) => assert_eq!(domain.cells(), 110),
            other => panic!("unexpected {:?}", other.class_name()),
        }
    }

    #[test]
    fn test_invalid_params_are_reported() {
        let err = create("cls: Variable\ninit_params: {bogus: 1}\n").unwrap_err();
        assert!(matches!(err, BenthosError::Yaml(_)));
    }
}
