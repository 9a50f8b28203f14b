// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{PlanFile, RawPlanFile};
use crate::errors::Result;

/// Read and deserialize a plan file without semantic validation. Use
/// [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawPlanFile> {
    let contents = fs::read_to_string(path.as_ref())?;
    load_from_str(&contents)
}

pub fn load_from_str(contents: &str) -> Result<RawPlanFile> {
    let raw: RawPlanFile = toml::from_str(contents)?;
    Ok(raw)
}

/// Load a plan file and validate it into a [`PlanFile`]:
///
/// - Reads TOML.
/// - Applies `[config]` defaults (serde defaults).
/// - Checks node references, self references, cycles and config sanity.
/// - Builds the immutable `Plan`.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<PlanFile> {
    let raw = load_from_path(&path)?;
    PlanFile::try_from(raw)
}

/// `Nodeflow.toml` in the current working directory.
pub fn default_plan_path() -> PathBuf {
    PathBuf::from("Nodeflow.toml")
}
