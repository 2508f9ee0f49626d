use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, StyleError};
use crate::units::BorderWidthProfile;

pub const ENV_PARALLEL: &str = "DOCSTYLE_PARALLEL";
pub const ENV_WORKERS: &str = "DOCSTYLE_WORKERS";
pub const ENV_MONITOR: &str = "DOCSTYLE_MONITOR";
pub const ENV_DEBUG_PATH: &str = "DOCSTYLE_DEBUG_PATH";

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Use the parallel layer when the tree is large enough.
    pub parallel: bool,
    pub workers: usize,
    /// Collect per-phase and per-node timings.
    pub metrics: bool,
    /// Trees with fewer nodes always run sequentially.
    pub min_nodes_for_parallel: usize,
    /// Bound on collecting all chunk results.
    pub chunk_timeout: Duration,
    /// Base for percentage lengths, in points. Percentages resolve to zero
    /// without one.
    pub percentage_base: Option<f32>,
    pub border_width_profile: BorderWidthProfile,
    pub user_agent_defaults: bool,
    pub debug_path: Option<PathBuf>,
    pub metrics_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            workers: 4,
            metrics: false,
            min_nodes_for_parallel: 64,
            chunk_timeout: Duration::from_secs(300),
            percentage_base: None,
            border_width_profile: BorderWidthProfile::Css,
            user_agent_defaults: false,
            debug_path: None,
            metrics_path: None,
        }
    }
}

impl EngineConfig {
    /// Defaults with `DOCSTYLE_*` environment overrides applied.
    pub fn from_env() -> Self {
        Self::from_env_with(|name| std::env::var(name).ok())
    }

    /// Like [`EngineConfig::from_env`] with a caller-supplied lookup.
    /// Values that do not parse are ignored with a warning.
    pub fn from_env_with(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(raw) = lookup(ENV_PARALLEL) {
            match parse_flag(&raw) {
                Some(value) => config.parallel = value,
                None => log::warn!("ignoring {ENV_PARALLEL}={raw:?}: expected a boolean"),
            }
        }
        if let Some(raw) = lookup(ENV_WORKERS) {
            match raw.trim().parse::<usize>() {
                Ok(workers) if workers > 0 => config.workers = workers,
                _ => log::warn!("ignoring {ENV_WORKERS}={raw:?}: expected a positive integer"),
            }
        }
        if let Some(raw) = lookup(ENV_MONITOR) {
            match parse_flag(&raw) {
                Some(value) => config.metrics = value,
                None => log::warn!("ignoring {ENV_MONITOR}={raw:?}: expected a boolean"),
            }
        }
        if let Some(raw) = lookup(ENV_DEBUG_PATH) {
            let raw = raw.trim();
            if !raw.is_empty() {
                config.debug_path = Some(PathBuf::from(raw));
            }
        }
        config
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(StyleError::InvalidConfiguration(
                "workers must be at least 1".to_string(),
            ));
        }
        if self.chunk_timeout.is_zero() {
            return Err(StyleError::InvalidConfiguration(
                "chunk_timeout must be non-zero".to_string(),
            ));
        }
        if let Some(base) = self.percentage_base {
            if !base.is_finite() {
                return Err(StyleError::InvalidConfiguration(format!(
                    "percentage_base must be finite, got {base}"
                )));
            }
        }
        Ok(())
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    let v = raw.trim();
    if v == "1" || v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes") || v.eq_ignore_ascii_case("on") {
        Some(true)
    } else if v == "0"
        || v.eq_ignore_ascii_case("false")
        || v.eq_ignore_ascii_case("no")
        || v.eq_ignore_ascii_case("off")
    {
        Some(false)
    } else {
        None
    }
}
