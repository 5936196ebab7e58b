//! Grading scale configuration.
//!
//! `GRADEBOOK_GRADING_SCALE` may name a TOML file of the form
//!
//! ```toml
//! [levels.PRIMARY]
//! bands = [ { min = 80, max = 100, code = "1", remark = "Highest" } ]
//! ```
//!
//! with all three levels present. Without it the built-in scale applies.

use crate::error::{CoreError, CoreResult};
use crate::grading::{GradeBand, GradingScales};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{error, info};

pub const SCALE_ENV: &str = "GRADEBOOK_GRADING_SCALE";

#[derive(Debug, Deserialize)]
struct ScaleFile {
    levels: BTreeMap<String, LevelFile>,
}

#[derive(Debug, Deserialize)]
struct LevelFile {
    bands: Vec<GradeBand>,
}

pub fn parse_scale(text: &str) -> CoreResult<GradingScales> {
    let file: ScaleFile =
        toml::from_str(text).map_err(|e| CoreError::Config(format!("invalid TOML: {}", e)))?;
    let raw = file
        .levels
        .into_iter()
        .map(|(level, l)| (level, l.bands))
        .collect();
    GradingScales::from_levels(raw)
}

pub fn load_scale_file(path: &Path) -> CoreResult<GradingScales> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| CoreError::Config(format!("cannot read {}: {}", path.display(), e)))?;
    parse_scale(&text)
}

/// Resolves the active grading scale once at start-up. Any error here is
/// fatal to the process.
pub fn load_scale_from_env() -> CoreResult<GradingScales> {
    match std::env::var(SCALE_ENV) {
        Ok(path) if !path.trim().is_empty() => match load_scale_file(Path::new(&path)) {
            Ok(scales) => {
                info!(target: "config", %path, "loaded grading scale (TOML)");
                Ok(scales)
            }
            Err(e) => {
                error!(target: "config", %path, error = %e, "rejected grading scale");
                Err(e)
            }
        },
        _ => {
            info!(target: "config", "using built-in grading scale");
            GradingScales::builtin()
        }
    }
}
