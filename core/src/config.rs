//! Layered configuration (§1a, §6): a TOML file deserialized via `serde`,
//! with dotted-path CLI overrides applied on top, mirroring the teacher's
//! `core/src/config.rs` load-then-merge pattern.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{HoudiniError, Result};

/// Whether the target is Z3 (only Z3 is queried for `:rlimit`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolverFlavor {
    #[default]
    Z3,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerbosityLevel {
    Quiet,
    #[default]
    Normal,
    Verbose,
}

impl From<VerbosityLevel> for crate::process_session::Verbosity {
    fn from(level: VerbosityLevel) -> Self {
        match level {
            VerbosityLevel::Quiet => crate::process_session::Verbosity::Quiet,
            VerbosityLevel::Normal => crate::process_session::Verbosity::Normal,
            VerbosityLevel::Verbose => crate::process_session::Verbosity::Verbose,
        }
    }
}

/// Top-level configuration surface. Deserialized from TOML, then overlaid
/// with `--set key=value` overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub solver_path: String,
    pub solver_args: Vec<String>,
    pub solver_flavor: SolverFlavor,
    pub verbosity: VerbosityLevel,
    pub log_path: Option<String>,
    pub cross_dependencies: bool,
    pub inline_depth: u32,
    pub unsat_core_inference: bool,
    pub reverse_queue_order: bool,
    pub max_control_flow_steps: usize,
    pub rlimit_option: String,
    /// Staging overrides (§4.F): forces every `stage_active`-tagged constant
    /// to this stage, and every `stage_complete`-tagged constant to whether
    /// its stage is in `completed_stages`, for the whole `infer` run.
    pub current_stage: Option<u32>,
    pub completed_stages: Vec<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            solver_path: "z3".to_string(),
            solver_args: vec!["-in".to_string(), "-smt2".to_string()],
            solver_flavor: SolverFlavor::default(),
            verbosity: VerbosityLevel::default(),
            log_path: None,
            cross_dependencies: false,
            inline_depth: 0,
            unsat_core_inference: true,
            reverse_queue_order: false,
            max_control_flow_steps: 10_000,
            rlimit_option: "rlimit".to_string(),
            current_stage: None,
            completed_stages: Vec::new(),
        }
    }
}

impl Config {
    /// Loads the TOML file at `path`, falling back to defaults for any
    /// field the file omits (`#[serde(default)]` above).
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| HoudiniError::ConfigError(e.to_string()))
    }

    /// Applies one `key=value` override (dotted paths are not nested here:
    /// this crate's config is flat, unlike the teacher's tree-shaped one).
    pub fn apply_override(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "solver_path" => self.solver_path = value.to_string(),
            "solver_args" => {
                self.solver_args = value.split_whitespace().map(str::to_string).collect()
            }
            "solver_flavor" => {
                self.solver_flavor = match value.to_lowercase().as_str() {
                    "z3" => SolverFlavor::Z3,
                    "other" => SolverFlavor::Other,
                    other => {
                        return Err(HoudiniError::ConfigError(format!(
                            "unknown solver_flavor override: {other}"
                        )))
                    }
                }
            }
            "verbosity" => {
                self.verbosity = match value.to_lowercase().as_str() {
                    "quiet" => VerbosityLevel::Quiet,
                    "normal" => VerbosityLevel::Normal,
                    "verbose" => VerbosityLevel::Verbose,
                    other => {
                        return Err(HoudiniError::ConfigError(format!(
                            "unknown verbosity override: {other}"
                        )))
                    }
                }
            }
            "log_path" => self.log_path = Some(value.to_string()),
            "cross_dependencies" => self.cross_dependencies = parse_bool(key, value)?,
            "inline_depth" => self.inline_depth = parse_num(key, value)?,
            "unsat_core_inference" => self.unsat_core_inference = parse_bool(key, value)?,
            "reverse_queue_order" => self.reverse_queue_order = parse_bool(key, value)?,
            "max_control_flow_steps" => self.max_control_flow_steps = parse_num(key, value)?,
            "rlimit_option" => self.rlimit_option = value.to_string(),
            "current_stage" => self.current_stage = Some(parse_num(key, value)?),
            "completed_stages" => {
                self.completed_stages = value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| parse_num(key, s))
                    .collect::<Result<Vec<u32>>>()?
            }
            other => {
                return Err(HoudiniError::ConfigError(format!(
                    "unknown config key: {other}"
                )))
            }
        }
        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    value
        .parse()
        .map_err(|_| HoudiniError::ConfigError(format!("expected bool for {key}, got {value}")))
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| HoudiniError::ConfigError(format!("expected number for {key}, got {value}")))
}
