// src/config/validate.rs

use std::collections::BTreeSet;

use crate::config::model::{ConfigFile, PortKind, RawConfigFile, StageConfig};
use crate::errors::{FramedagError, Result};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::FramedagError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_stages(cfg)?;
    validate_evaluator_section(cfg)?;
    for (name, stage) in cfg.stage.iter() {
        validate_stage_ports(name, stage)?;
    }
    validate_connections(cfg)?;
    Ok(())
}

fn ensure_has_stages(cfg: &RawConfigFile) -> Result<()> {
    if cfg.stage.is_empty() {
        return Err(FramedagError::ConfigError(
            "config must contain at least one [stage.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_evaluator_section(cfg: &RawConfigFile) -> Result<()> {
    let section = &cfg.evaluator;
    if section.pool_size == 0 {
        return Err(FramedagError::ConfigError(
            "[evaluator].pool_size must be >= 1 (got 0)".to_string(),
        ));
    }
    if let Some(slot) = section.picking_slot {
        if slot >= section.pool_size {
            return Err(FramedagError::ConfigError(format!(
                "[evaluator].picking_slot {} is outside the pool [0, {})",
                slot, section.pool_size
            )));
        }
    }
    Ok(())
}

fn validate_stage_ports(name: &str, stage: &StageConfig) -> Result<()> {
    if name.contains('.') {
        return Err(FramedagError::ConfigError(format!(
            "stage name '{}' must not contain '.'",
            name
        )));
    }

    let mut seen = BTreeSet::new();
    let declared = stage
        .inputs
        .iter()
        .chain(stage.outputs.iter())
        .map(|p| p.name.as_str())
        .chain(stage.private.iter().map(String::as_str));
    for port in declared {
        if !seen.insert(port) {
            return Err(FramedagError::ConfigError(format!(
                "stage '{}' declares port '{}' more than once",
                name, port
            )));
        }
    }

    for port in stage.inputs.iter().chain(stage.outputs.iter()) {
        if port.kind == PortKind::Generic && port.type_tag.is_none() {
            return Err(FramedagError::ConfigError(format!(
                "generic port '{}.{}' needs a `type_tag`",
                name, port.name
            )));
        }
    }
    Ok(())
}

fn validate_connections(cfg: &RawConfigFile) -> Result<()> {
    for conn in cfg.connection.iter() {
        let (Some((from_stage, from_port)), Some((to_stage, to_port))) =
            (conn.source(), conn.target())
        else {
            return Err(FramedagError::ConfigError(format!(
                "connection '{}' -> '{}' must use `stage.port` on both ends",
                conn.from, conn.to
            )));
        };

        let producer = cfg.stage.get(from_stage).ok_or_else(|| {
            FramedagError::ConfigError(format!(
                "connection from unknown stage '{}'",
                from_stage
            ))
        })?;
        let consumer = cfg.stage.get(to_stage).ok_or_else(|| {
            FramedagError::ConfigError(format!("connection to unknown stage '{}'", to_stage))
        })?;

        if !producer.outputs.iter().any(|p| p.name == from_port) {
            return Err(FramedagError::ConfigError(format!(
                "stage '{}' has no output '{}'",
                from_stage, from_port
            )));
        }
        if !consumer.inputs.iter().any(|p| p.name == to_port) {
            return Err(FramedagError::ConfigError(format!(
                "stage '{}' has no input '{}'",
                to_stage, to_port
            )));
        }
    }
    Ok(())
}
