//! Error handling
//!
//! Provides the [`BenthosError`] enum and the [`BenthosResult`] alias used across
//! the whole crate.
//!
//! # Error families
//!
//! - **Configuration**: bad formulas, unknown classes, invalid units, duplicate
//!   names and missing keys. Raised at construction time, never coerced.
//! - **Invariant violations**: attaching twice, adding terms to a finalized
//!   equation, evaluating before setup. Always fail fast.
//! - **Numerical**: solver failures. The simulation loop recovers these by
//!   shrinking the step size and only surfaces them when it cannot progress.
//! - **Persistence**: IO and (de)serialization of definitions and snapshots.
//!
//! # Example
//!
//! ```
//! use microbenthos_rs::error::{BenthosError, BenthosResult};
//!
//! fn porosity(value: f64) -> BenthosResult<f64> {
//!     BenthosError::check_range("porosity", value, 0.1, 0.9)?;
//!     Ok(value)
//! }
//!
//! assert!(porosity(0.6).is_ok());
//! assert!(porosity(1.2).is_err());
//! ```

use thiserror::Error;

/// Crate-wide result type
pub type BenthosResult<T> = Result<T, BenthosError>;

/// Errors raised while building or running a model
#[derive(Error, Debug)]
pub enum BenthosError {
    // ========================================================================
    // Configuration
    // ========================================================================
    /// A formula could not be parsed
    #[error("cannot parse formula {formula:?}: {message}")]
    Parse {
        /// Offending formula text
        formula: String,
        /// What went wrong
        message: String,
    },

    /// A unit string could not be understood
    #[error("invalid unit {unit:?}: {message}")]
    InvalidUnit {
        /// Unit text as given
        unit: String,
        /// What went wrong
        message: String,
    },

    /// Two quantities have incompatible dimensions
    #[error("unit mismatch in {context}: {from} is not compatible with {to}")]
    UnitMismatch {
        /// Where the conversion was attempted
        context: String,
        /// Source unit
        from: String,
        /// Target unit
        to: String,
    },

    /// A required definition key is absent
    #[error("missing required key {key:?} in {context}")]
    MissingKey {
        /// Key name
        key: String,
        /// Definition being read
        context: String,
    },

    /// The class path of an entity definition is not registered
    #[error("unknown entity class {cls:?}")]
    ClassLookup {
        /// Fully qualified class path
        cls: String,
    },

    /// A name is already taken
    #[error("duplicate name {name:?} in {context}")]
    DuplicateName {
        /// Conflicting name
        name: String,
        /// Container holding the name
        context: String,
    },

    /// Generic configuration error
    #[error("invalid configuration of {context}: {message}")]
    Config {
        /// Component being configured
        context: String,
        /// What went wrong
        message: String,
    },

    /// A value is outside of its allowed range
    #[error("value out of range: {field}={value}, expected [{min}, {max}]")]
    OutOfRange {
        /// Field name
        field: &'static str,
        /// Actual value
        value: f64,
        /// Lower bound
        min: f64,
        /// Upper bound
        max: f64,
    },

    // ========================================================================
    // Invariant violations
    // ========================================================================
    /// The entity already has a domain
    #[error("entity {name:?} is already attached to a domain")]
    AlreadyAttached {
        /// Entity name
        name: String,
    },

    /// The entity has no domain yet
    #[error("entity {name:?} is not attached to a domain")]
    NotAttached {
        /// Entity name
        name: String,
    },

    /// The entity is used with a domain it was not attached to
    #[error("entity {name:?} is attached to a different domain")]
    DomainMismatch {
        /// Entity name
        name: String,
    },

    /// The entity or its field was used before `setup`
    #[error("entity {name:?} is not set up")]
    NotSetUp {
        /// Entity name
        name: String,
    },

    /// Terms cannot be added once the equation is finalized
    #[error("equation {name:?} is already finalized")]
    EquationFinalized {
        /// Equation name
        name: String,
    },

    /// A term that may only be set once was set again
    #[error("equation {name:?}: {term} term has already been set")]
    TermAlreadySet {
        /// Equation name
        name: String,
        /// Term kind
        term: &'static str,
    },

    /// Generic equation assembly error
    #[error("equation {name:?}: {message}")]
    Equation {
        /// Equation name
        name: String,
        /// What went wrong
        message: String,
    },

    /// A second evolution was requested on a running simulation
    #[error("simulation is already evolving")]
    AlreadyEvolving,

    // ========================================================================
    // Lookup
    // ========================================================================
    /// No object is stored at the model path
    #[error("unknown model path {path:?}")]
    ObjectNotFound {
        /// Requested path
        path: String,
    },

    /// The path is not a dotted path
    #[error("model path should be a dotted string, got {path:?}")]
    InvalidPath {
        /// Requested path
        path: String,
    },

    /// An expression was evaluated with a symbol that has no value
    #[error("symbol {symbol:?} has no value in the evaluation arguments")]
    UnboundSymbol {
        /// Symbol name
        symbol: String,
    },

    // ========================================================================
    // Numerical
    // ========================================================================
    /// Linear solve or arithmetic failure
    #[error("numerical error: {message}")]
    Numerical {
        /// What went wrong
        message: String,
    },

    /// The first sweep of a step produced an exactly zero residual
    #[error("zero residual for a step of {dt} s in equations {equations:?}")]
    ZeroResidual {
        /// Equations that reported zero residual
        equations: Vec<String>,
        /// Step duration
        dt: f64,
    },

    /// The step size was driven below the configured minimum
    #[error("time step {dt} s fell below the minimum {min} s")]
    StepSizeExhausted {
        /// Step size that would be needed
        dt: f64,
        /// Configured minimum
        min: f64,
    },

    /// Too many consecutive rejected steps
    #[error("step rejected {retries} times in a row (last dt = {dt} s)")]
    RetryLimit {
        /// Number of consecutive rejections
        retries: usize,
        /// Step size of the last attempt
        dt: f64,
    },

    // ========================================================================
    // Persistence
    // ========================================================================
    /// Stored state cannot be used with this model
    #[error("incompatible stored state: {message}")]
    Incompatible {
        /// What did not match
        message: String,
    },

    /// Malformed snapshot structure
    #[error("invalid snapshot at {path}: {message}")]
    Snapshot {
        /// Position in the snapshot tree
        path: String,
        /// What went wrong
        message: String,
    },

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML (de)serialization error
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON (de)serialization error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BenthosError {
    /// Parse error for a formula
    pub fn parse(formula: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            formula: formula.into(),
            message: message.into(),
        }
    }

    /// Invalid unit error
    pub fn invalid_unit(unit: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidUnit {
            unit: unit.into(),
            message: message.into(),
        }
    }

    /// Unit mismatch error
    pub fn unit_mismatch(
        context: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Self::UnitMismatch {
            context: context.into(),
            from: from.into(),
            to: to.into(),
        }
    }

    /// Missing key error
    pub fn missing_key(key: impl Into<String>, context: impl Into<String>) -> Self {
        Self::MissingKey {
            key: key.into(),
            context: context.into(),
        }
    }

    /// Duplicate name error
    pub fn duplicate(name: impl Into<String>, context: impl Into<String>) -> Self {
        Self::DuplicateName {
            name: name.into(),
            context: context.into(),
        }
    }

    /// Configuration error
    pub fn config(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Equation assembly error
    pub fn equation(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Equation {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Numerical error
    pub fn numerical(message: impl Into<String>) -> Self {
        Self::Numerical {
            message: message.into(),
        }
    }

    /// Snapshot structure error
    pub fn snapshot(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Snapshot {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Object lookup error
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::ObjectNotFound { path: path.into() }
    }

    /// Whether the simulation loop may recover from this error by retrying
    pub fn is_numerical(&self) -> bool {
        matches!(self, Self::Numerical { .. })
    }

    /// Check that `value` lies in the closed interval `[min, max]`
    pub fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> BenthosResult<()> {
        if value.is_finite() && value >= min && value <= max {
            Ok(())
        } else {
            Err(Self::OutOfRange {
                field,
                value,
                min,
                max,
            })
        }
    }
}
