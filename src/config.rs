//! # Run configuration
//!
//! A `yaml` file with four groups:
//! ```yaml
//! params:
//!   nx: 128
//!   ny: 128
//!   Re: 20.0
//!   Wi: 10.0
//!   eta: 0.1
//! run:
//!   stop_sim_time: 100.0
//!   dt: 1.0e-3
//! init:
//!   noise: 1.0e-3
//! analysis:
//!   snapshot_sim_dt: 1.0e-2
//! ```
//! Only the `params` entries are required. Stop thresholds that are
//! absent, `null` or zero are unbounded.
use crate::error::ConfigurationError;
use crate::solver::SchemeKind;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Complete configuration of one simulation
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Physical parameters and grid
    pub params: Params,
    /// Time loop
    pub run: RunConfig,
    /// Initial condition
    pub init: InitConfig,
    /// Output cadences
    pub analysis: AnalysisConfig,
}

/// Physical parameters and grid size
#[derive(Debug, Clone, PartialEq)]
pub struct Params {
    /// Grid points along x
    pub nx: usize,
    /// Grid points along y
    pub ny: usize,
    /// Reynolds number
    pub re: f64,
    /// Weissenberg number
    pub wi: f64,
    /// Viscosity ratio (polymer / solvent)
    pub eta: f64,
    /// Amplitude of the Kolmogorov forcing
    pub forcing: f64,
}

/// Time loop settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Wall clock limit in seconds
    pub stop_wall_time: Option<f64>,
    /// Iteration limit
    pub stop_iteration: Option<usize>,
    /// Simulation time limit
    pub stop_sim_time: Option<f64>,
    /// Time step size
    pub dt: f64,
    /// Multistep scheme
    pub scheme: SchemeKind,
    /// Abort on non-finite fields
    pub check_finite: bool,
    /// Apply 2/3 dealiasing to explicit terms
    pub dealias: bool,
    /// Log progress every n iterations
    pub log_cadence: usize,
    /// Root directory of analysis output
    pub data_dir: PathBuf,
    /// Merged checkpoint file to restart from
    pub restart: Option<PathBuf>,
}

/// Initial disturbance
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InitConfig {
    /// Amplitude of uniform noise on the velocity
    pub noise: f64,
    /// Random seed
    pub seed: u64,
}

/// Cadences of the three output groups
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisConfig {
    /// Wall clock interval of checkpoints
    pub checkpoint_wall_dt: f64,
    /// Records per checkpoint segment
    pub checkpoint_max_writes: Option<usize>,
    /// Simulation time interval of snapshots
    pub snapshot_sim_dt: f64,
    /// Records per snapshot segment
    pub snapshot_max_writes: Option<usize>,
    /// Iteration interval of the timeseries
    pub timeseries_iter: usize,
    /// Records per timeseries segment
    pub timeseries_max_writes: Option<usize>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            stop_wall_time: None,
            stop_iteration: None,
            stop_sim_time: None,
            dt: 1e-3,
            scheme: SchemeKind::Mcnab2,
            check_finite: true,
            dealias: false,
            log_cadence: 10,
            data_dir: PathBuf::from("data"),
            restart: None,
        }
    }
}

impl Default for InitConfig {
    fn default() -> Self {
        Self {
            noise: 0.,
            seed: 0,
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            checkpoint_wall_dt: 3540.,
            checkpoint_max_writes: Some(50),
            snapshot_sim_dt: 1e-2,
            snapshot_max_writes: Some(200),
            timeseries_iter: 100,
            timeseries_max_writes: None,
        }
    }
}

/// Raw file layout, before validation
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    params: Option<RawParams>,
    #[serde(default)]
    run: RunConfig,
    #[serde(default)]
    init: InitConfig,
    #[serde(default)]
    analysis: AnalysisConfig,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawParams {
    nx: Option<usize>,
    ny: Option<usize>,
    #[serde(rename = "Re")]
    re: Option<f64>,
    #[serde(rename = "Wi")]
    wi: Option<f64>,
    eta: Option<f64>,
    forcing: Option<f64>,
}

fn required<T>(value: Option<T>, name: &str) -> Result<T, ConfigurationError> {
    value.ok_or_else(|| ConfigurationError::Missing(name.to_owned()))
}

fn invalid(name: &str, reason: &str) -> ConfigurationError {
    ConfigurationError::Invalid {
        name: name.to_owned(),
        reason: reason.to_owned(),
    }
}

impl Config {
    /// Read and validate configuration from a file
    ///
    /// # Errors
    /// File not readable, malformed yaml or invalid values.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigurationError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&contents)
    }

    /// Parse and validate configuration from a `yaml` string
    ///
    /// # Errors
    /// Malformed yaml, missing parameters or invalid values.
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigurationError> {
        let raw: RawConfig = serde_yaml::from_str(contents)?;
        let params = required(raw.params, "params")?;
        let params = Params {
            nx: required(params.nx, "params.nx")?,
            ny: required(params.ny, "params.ny")?,
            re: required(params.re, "params.Re")?,
            wi: required(params.wi, "params.Wi")?,
            eta: required(params.eta, "params.eta")?,
            forcing: params.forcing.unwrap_or(1.),
        };
        let config = Self {
            params,
            run: raw.run.normalized(),
            init: raw.init,
            analysis: raw.analysis,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check ranges of all values
    ///
    /// # Errors
    /// First value out of range.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let p = &self.params;
        if p.nx < 2 {
            return Err(invalid("params.nx", "at least 2 grid points needed"));
        }
        if p.ny < 2 {
            return Err(invalid("params.ny", "at least 2 grid points needed"));
        }
        for (name, value) in [("params.Re", p.re), ("params.Wi", p.wi)] {
            if !(value.is_finite() && value > 0.) {
                return Err(invalid(name, "must be positive"));
            }
        }
        if !(p.eta.is_finite() && p.eta >= 0.) {
            return Err(invalid("params.eta", "must be non-negative"));
        }
        if !p.forcing.is_finite() {
            return Err(invalid("params.forcing", "must be finite"));
        }
        if !(self.run.dt.is_finite() && self.run.dt > 0.) {
            return Err(invalid("run.dt", "must be positive"));
        }
        if self.run.log_cadence == 0 {
            return Err(invalid("run.log_cadence", "must be positive"));
        }
        if !self.init.noise.is_finite() || self.init.noise < 0. {
            return Err(invalid("init.noise", "must be non-negative"));
        }
        let a = &self.analysis;
        if !(a.checkpoint_wall_dt > 0. && a.snapshot_sim_dt > 0.) {
            return Err(invalid("analysis", "cadence intervals must be positive"));
        }
        if a.timeseries_iter == 0 {
            return Err(invalid("analysis.timeseries_iter", "must be positive"));
        }
        for (name, value) in [
            ("analysis.checkpoint_max_writes", a.checkpoint_max_writes),
            ("analysis.snapshot_max_writes", a.snapshot_max_writes),
            ("analysis.timeseries_max_writes", a.timeseries_max_writes),
        ] {
            if value == Some(0) {
                return Err(invalid(name, "must be positive"));
            }
        }
        Ok(())
    }
}

impl RunConfig {
    /// Zero thresholds mean "no limit"
    fn normalized(mut self) -> Self {
        self.stop_wall_time = self.stop_wall_time.filter(|t| *t > 0.);
        self.stop_iteration = self.stop_iteration.filter(|i| *i > 0);
        self.stop_sim_time = self.stop_sim_time.filter(|t| *t > 0.);
        self
    }
}
