//! CSV export of model profiles
//!
//! This module writes depth profiles and time series to CSV (Comma-Separated
//! Values), readable by spreadsheets, pandas and most analysis tools.
//!
//! # Features
//!
//! - **Simple interface**: free functions over `&[f64]` slices
//! - **Metadata support**: optional `#` header with run parameters
//! - **Customizable**: delimiter, precision, decimal separator
//! - **Exporter**: [`CsvExporter`] collects snapshot profiles during a run
//!
//! # Quick Examples
//!
//! ## Depth profiles
//!
//! ```rust,ignore
//! use microbenthos_rs::output::export::export_profiles_csv;
//!
//! let depths = vec![-0.0002, -0.0001, 0.0, 0.0001];
//! let at_0h = vec![0.2, 0.2, 0.15, 0.1];
//! let at_1h = vec![0.2, 0.19, 0.12, 0.05];
//!
//! export_profiles_csv(&depths, &[at_0h, at_1h], &["0.0000 h", "1.0000 h"], "oxy.csv", None)?;
//! ```
//!
//! **Output** (`oxy.csv`):
//! ```csv
//! Depth (m),0.0000 h,1.0000 h
//! -0.000200,0.200000,0.200000
//! -0.000100,0.200000,0.190000
//! ...
//! ```
//!
//! ## With Metadata
//!
//! ```rust,ignore
//! let metadata = CsvMetadata {
//!     model_name: Some("cyano mat".to_string()),
//!     variable: Some("env.oxy".to_string()),
//!     unit: Some("mol/m**3".to_string()),
//!     ..Default::default()
//! };
//! let config = CsvConfig::default().with_metadata(metadata);
//! ```
//!
//! **Output**:
//! ```csv
//! # MicroBenthos Simulation Data
//! # Generated: 2026-02-11T15:30:00Z
//! # Model: cyano mat
//! # Variable: env.oxy
//! # Unit: mol/m**3
//! #
//! Depth (m),0.0000 h,1.0000 h
//! ```

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::entity::StateNode;
use crate::error::{BenthosError, BenthosResult};
use crate::output::export::Exporter;
use crate::solver::{SimulationConfig, StepOutput};

// =============================================================================
// Configuration Structures
// =============================================================================

/// Configuration for CSV export
///
/// # Example
///
/// ```rust,ignore
/// let config = CsvConfig {
///     delimiter: ';',
///     precision: 10,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct CsvConfig {
    /// Column delimiter (default: ',')
    pub delimiter: char,

    /// Decimal separator (default: '.')
    pub decimal_separator: char,

    /// Number of decimal places for floating-point values (default: 6)
    pub precision: usize,

    /// Include metadata header comments (default: false)
    pub include_metadata: bool,

    /// Metadata to include in header
    pub metadata: Option<CsvMetadata>,

    /// Header of the depth column of profile files (default: "Depth (m)")
    pub depth_header: String,

    /// Header of the time column of series files (default: "Time (h)")
    pub time_header: String,
}

impl Default for CsvConfig {
    fn default() -> Self {
        Self {
            delimiter: ',',
            decimal_separator: '.',
            precision: 6,
            include_metadata: false,
            metadata: None,
            depth_header: "Depth (m)".to_string(),
            time_header: "Time (h)".to_string(),
        }
    }
}

impl CsvConfig {
    /// European CSV format (semicolon, comma for decimal)
    pub fn european() -> Self {
        Self {
            delimiter: ';',
            decimal_separator: ',',
            ..Default::default()
        }
    }

    /// High precision (12 decimal places), e.g. for micromolar profiles in mol/m**3
    pub fn high_precision() -> Self {
        Self {
            precision: 12,
            ..Default::default()
        }
    }

    /// Builder pattern: set delimiter
    pub fn delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Builder pattern: set precision
    pub fn precision(mut self, precision: usize) -> Self {
        self.precision = precision;
        self
    }

    /// Builder pattern: enable metadata
    pub fn with_metadata(mut self, metadata: CsvMetadata) -> Self {
        self.include_metadata = true;
        self.metadata = Some(metadata);
        self
    }

    fn validate(&self) -> BenthosResult<()> {
        if self.delimiter == self.decimal_separator {
            return Err(BenthosError::config(
                "csv",
                format!("delimiter and decimal separator are both {:?}", self.delimiter),
            ));
        }
        Ok(())
    }
}

/// Metadata for CSV header comments
///
/// Only fields that are set appear in the header.
#[derive(Debug, Clone, Default)]
pub struct CsvMetadata {
    /// Model description
    pub model_name: Option<String>,

    /// Model path of the exported quantity
    pub variable: Option<String>,

    /// Unit of the exported values
    pub unit: Option<String>,

    /// Total simulated time (h)
    pub total_time: Option<f64>,

    /// Number of exported snapshots
    pub snapshots: Option<usize>,

    /// Additional custom parameters
    pub custom: Vec<(String, String)>,
}

impl CsvMetadata {
    /// Metadata of one exported quantity
    pub fn for_variable(variable: &str, unit: &str) -> Self {
        Self {
            variable: Some(variable.to_string()),
            unit: Some(unit.to_string()),
            ..Default::default()
        }
    }

    /// Add custom parameter
    pub fn add_custom(&mut self, key: String, value: String) {
        self.custom.push((key, value));
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Write metadata header comments
fn write_metadata_header(out: &mut impl Write, metadata: &CsvMetadata) -> BenthosResult<()> {
    writeln!(out, "# MicroBenthos Simulation Data")?;

    let now = chrono::Utc::now();
    writeln!(out, "# Generated: {}", now.to_rfc3339())?;

    if let Some(model) = &metadata.model_name {
        writeln!(out, "# Model: {}", model)?;
    }
    if let Some(variable) = &metadata.variable {
        writeln!(out, "# Variable: {}", variable)?;
    }
    if let Some(unit) = &metadata.unit {
        writeln!(out, "# Unit: {}", unit)?;
    }
    if let Some(total_time) = metadata.total_time {
        writeln!(out, "# Total Time: {} h", total_time)?;
    }
    if let Some(snapshots) = metadata.snapshots {
        writeln!(out, "# Snapshots: {}", snapshots)?;
    }
    for (key, value) in &metadata.custom {
        writeln!(out, "# {}: {}", key, value)?;
    }
    writeln!(out, "#")?;
    Ok(())
}

/// Format number with configured precision and decimal separator
fn format_number(value: f64, config: &CsvConfig) -> String {
    let formatted = format!("{:.prec$}", value, prec = config.precision);
    if config.decimal_separator != '.' {
        formatted.replace('.', &config.decimal_separator.to_string())
    } else {
        formatted
    }
}

fn check_columns(axis: &[f64], columns: &[Vec<f64>], labels: &[&str], what: &str) -> BenthosResult<()> {
    let err = |message: String| BenthosError::config("csv", message);
    if axis.is_empty() || columns.is_empty() {
        return Err(err(format!("empty data: {} and columns must not be empty", what)));
    }
    if axis.iter().any(|v| !v.is_finite()) {
        return Err(err(format!("NaN or Inf detected in {}", what)));
    }
    if columns.len() != labels.len() {
        return Err(err(format!(
            "{} columns versus {} labels",
            columns.len(),
            labels.len()
        )));
    }
    for (column, label) in columns.iter().zip(labels) {
        if column.len() != axis.len() {
            return Err(err(format!(
                "column {} has {} values for {} {}",
                label,
                column.len(),
                axis.len(),
                what
            )));
        }
        if column.iter().any(|v| !v.is_finite()) {
            return Err(err(format!("NaN or Inf detected in column {}", label)));
        }
    }
    Ok(())
}

fn write_table(
    output_path: &Path,
    axis_header: &str,
    axis: &[f64],
    columns: &[Vec<f64>],
    labels: &[&str],
    config: &CsvConfig,
) -> BenthosResult<()> {
    config.validate()?;
    let mut file = BufWriter::new(File::create(output_path)?);

    if config.include_metadata
        && let Some(metadata) = &config.metadata
    {
        write_metadata_header(&mut file, metadata)?;
    }

    write!(file, "{}", axis_header)?;
    for label in labels {
        write!(file, "{}{}", config.delimiter, label)?;
    }
    writeln!(file)?;

    for (i, x) in axis.iter().enumerate() {
        write!(file, "{}", format_number(*x, config))?;
        for column in columns {
            write!(file, "{}{}", config.delimiter, format_number(column[i], config))?;
        }
        writeln!(file)?;
    }
    file.flush()?;
    Ok(())
}

// =============================================================================
// Export Functions
// =============================================================================

/// Export depth profiles to CSV, one column per profile
///
/// # Errors
///
/// - Empty data
/// - A profile length differs from the depths
/// - NaN or Inf values
/// - File creation errors
pub fn export_profiles_csv(
    depths: &[f64],
    profiles: &[Vec<f64>],
    labels: &[&str],
    output_path: impl AsRef<Path>,
    configuration: Option<&CsvConfig>,
) -> BenthosResult<()> {
    check_columns(depths, profiles, labels, "depths")?;
    let binding = CsvConfig::default();
    let configuration = configuration.unwrap_or(&binding);
    write_table(
        output_path.as_ref(),
        &configuration.depth_header,
        depths,
        profiles,
        labels,
        configuration,
    )
}

/// Export time series to CSV, one column per series
///
/// `times` are written as given; the header comes from
/// [`CsvConfig::time_header`].
pub fn export_series_csv(
    times: &[f64],
    series: &[Vec<f64>],
    labels: &[&str],
    output_path: impl AsRef<Path>,
    configuration: Option<&CsvConfig>,
) -> BenthosResult<()> {
    check_columns(times, series, labels, "times")?;
    let binding = CsvConfig::default();
    let configuration = configuration.unwrap_or(&binding);
    write_table(
        output_path.as_ref(),
        &configuration.time_header,
        times,
        series,
        labels,
        configuration,
    )
}

// =============================================================================
// Exporter
// =============================================================================

#[derive(Debug, Default)]
struct Collected {
    unit: String,
    labels: Vec<String>,
    columns: Vec<Vec<f64>>,
    times: Vec<f64>,
    scalars: Vec<f64>,
}

/// Collects the values of model paths at every snapshot
///
/// At the end of the run each path `env.oxy` is written to `<dir>/env.oxy.csv`:
/// per-cell data as depth profiles with one column per snapshot, scalar data
/// (such as budget entries) as a time series. Paths absent from a snapshot
/// are skipped with a warning.
#[derive(Debug)]
pub struct CsvExporter {
    dir: PathBuf,
    paths: Vec<String>,
    config: CsvConfig,
    depths: Option<Vec<f64>>,
    collected: BTreeMap<String, Collected>,
    total_hours: Option<f64>,
}

impl CsvExporter {
    /// Export `paths` into `dir`
    pub fn new(dir: impl Into<PathBuf>, paths: &[&str]) -> Self {
        Self {
            dir: dir.into(),
            paths: paths.iter().map(|p| p.to_string()).collect(),
            config: CsvConfig::default(),
            depths: None,
            collected: BTreeMap::new(),
            total_hours: None,
        }
    }

    /// Builder: CSV formatting
    pub fn with_config(mut self, config: CsvConfig) -> Self {
        self.config = config;
        self
    }

    /// File written for `path`
    pub fn output_path(&self, path: &str) -> PathBuf {
        self.dir.join(format!("{}.csv", path))
    }

    fn collect(&mut self, time: f64, state: &StateNode) -> BenthosResult<()> {
        if self.depths.is_none() {
            let depths = state
                .get(&["domain", "depths"])
                .and_then(|n| n.data_static.as_ref())
                .ok_or_else(|| BenthosError::snapshot("domain.depths", "missing depths"))?;
            self.depths = Some(depths.array.iter().copied().collect());
        }
        for path in &self.paths {
            let parts: Vec<&str> = path.split('.').collect();
            let Some(data) = state.get(&parts).and_then(|n| n.data.as_ref()) else {
                warn!("CSV export: no data at {} in snapshot at {} s", path, time);
                continue;
            };
            let entry = self.collected.entry(path.clone()).or_default();
            entry.unit = data.unit.clone();
            if data.array.ndim() == 0 {
                entry.times.push(time / 3600.0);
                entry.scalars.push(data.to_scalar(None)?);
            } else {
                entry.labels.push(format!("{:.4} h", time / 3600.0));
                entry.columns.push(data.array.iter().copied().collect());
            }
        }
        Ok(())
    }

    fn metadata_for(&self, path: &str, entry: &Collected, snapshots: usize) -> CsvConfig {
        let mut config = self.config.clone();
        if config.include_metadata {
            let mut metadata = config.metadata.take().unwrap_or_default();
            metadata.variable = Some(path.to_string());
            metadata.unit = Some(entry.unit.clone());
            metadata.snapshots = Some(snapshots);
            if metadata.total_time.is_none() {
                metadata.total_time = self.total_hours;
            }
            config.metadata = Some(metadata);
        }
        config
    }
}

impl Exporter for CsvExporter {
    fn name(&self) -> &str {
        "csv"
    }

    fn prepare(&mut self, config: &SimulationConfig) -> BenthosResult<()> {
        std::fs::create_dir_all(&self.dir)?;
        self.config.validate()?;
        self.total_hours = config.total_seconds().ok().map(|s| s / 3600.0);
        self.depths = None;
        self.collected.clear();
        debug!("CSV export of {:?} into {}", self.paths, self.dir.display());
        Ok(())
    }

    fn process(&mut self, output: &StepOutput) -> BenthosResult<()> {
        match &output.state {
            Some(state) => self.collect(output.time, state),
            None => Ok(()),
        }
    }

    fn finish(&mut self) -> BenthosResult<()> {
        let Some(depths) = &self.depths else {
            debug!("CSV export: no snapshots received");
            return Ok(());
        };
        for (path, entry) in &self.collected {
            let target = self.output_path(path);
            if !entry.columns.is_empty() {
                let config = self.metadata_for(path, entry, entry.columns.len());
                let labels: Vec<&str> = entry.labels.iter().map(String::as_str).collect();
                export_profiles_csv(depths, &entry.columns, &labels, &target, Some(&config))?;
            } else {
                let config = self.metadata_for(path, entry, entry.scalars.len());
                let series = [entry.scalars.clone()];
                export_series_csv(&entry.times, &series, &[entry.unit.as_str()], &target, Some(&config))?;
            }
            info!("Exported {} to {}", path, target.display());
        }
        Ok(())
    }
}

// =================================================================================================
// Tests
// =================================================================================================
