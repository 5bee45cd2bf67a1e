// src/config/mod.rs

//! Configuration loading and validation.
//!
//! - `model.rs`: the TOML-backed data model.
//! - `loader.rs`: reading a config file from disk.
//! - `validate.rs`: port and connection sanity checks.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path, parse_str};
pub use model::{
    CacheSection, ConfigFile, ConnectionConfig, EvaluatorSection, PortConfig, PortKind,
    RawConfigFile, StageConfig, StageRole,
};
