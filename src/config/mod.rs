// src/config/mod.rs

//! Plan file loading and validation.
//!
//! - `model.rs`: TOML-backed data model and [`EngineConfig`].
//! - `loader.rs`: read a plan file from disk or a string.
//! - `validate.rs`: references, cycles, config sanity; builds the `Plan`.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_plan_path, load_and_validate, load_from_path, load_from_str};
pub use model::{AdviserConfig, EngineConfig, NodeConfig, PlanFile, PlanSection, RawPlanFile};
pub use validate::{validate_engine_config, validate_plan_file};
