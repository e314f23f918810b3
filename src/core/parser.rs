//! DS-006: YAML parsing and validation.
//!
//! Parses dagsmith.yaml and validates structural constraints:
//! - Version must be "1.0"
//! - Every stage kind must have a route
//! - Every layer body must be a mapping whose values are null or mappings
//! - The first stage cannot be conditional

use super::error::{CompileError, Result};
use super::router::Router;
use super::types::*;
use serde_yaml_ng::Value;
use std::path::Path;

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Parse a dagsmith.yaml file from disk.
pub fn parse_config_file(path: &Path) -> Result<PipelineConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| CompileError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    parse_config(&content)
}

/// Parse a dagsmith.yaml from a string.
pub fn parse_config(yaml: &str) -> Result<PipelineConfig> {
    serde_yaml_ng::from_str(yaml).map_err(|e| CompileError::Parse(e.to_string()))
}

/// Convert one raw layer body into a validated [`LayerConfig`].
pub fn parse_layer_config(value: &Value) -> Result<LayerConfig> {
    let mapping = match value {
        Value::Mapping(m) => m,
        Value::Tagged(t) => return parse_layer_config(&t.value),
        _ => {
            return Err(CompileError::structure(
                "<root>",
                "layer configuration must be a mapping",
            ))
        }
    };

    let mut config = LayerConfig::default();
    for (key, val) in mapping {
        let family = parse_family_key(key)?;
        let entry = parse_config_value(&family, val)?;
        config.entries.insert(family, entry);
    }
    Ok(config)
}

fn parse_family_key(key: &Value) -> Result<FamilyKey> {
    match key {
        Value::String(s) => Ok(FamilyKey::Single(s.clone())),
        Value::Sequence(items) if !items.is_empty() => {
            let mut targets = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::String(s) => targets.push(s.clone()),
                    other => {
                        return Err(CompileError::structure(
                            describe(other),
                            "tuple keys must contain only strings",
                        ))
                    }
                }
            }
            Ok(FamilyKey::Tuple(targets))
        }
        other => Err(CompileError::structure(
            describe(other),
            "keys must be a target name or a non-empty list of target names",
        )),
    }
}

fn parse_config_value(family: &FamilyKey, value: &Value) -> Result<ConfigValue> {
    match value {
        Value::Null => Ok(ConfigValue::Leaf),
        Value::Mapping(ops) => {
            let mut operations = OperationMap::new();
            for (op, params) in ops {
                let op_name = match op {
                    Value::String(s) => s.clone(),
                    other => {
                        return Err(CompileError::structure(
                            format!("{}.{}", family, describe(other)),
                            "operation names must be strings",
                        ))
                    }
                };
                let params = parse_params(&format!("{}.{}", family, op_name), params)?;
                operations.insert(op_name, params);
            }
            Ok(ConfigValue::OperationMap(operations))
        }
        _ => Err(CompileError::structure(
            family.to_string(),
            "values must be null or a mapping of operations",
        )),
    }
}

fn parse_params(key: &str, value: &Value) -> Result<Option<ParamMap>> {
    match value {
        Value::Null => Ok(None),
        Value::Mapping(m) => {
            let mut params = ParamMap::new();
            for (name, v) in m {
                match name {
                    Value::String(s) => {
                        params.insert(s.clone(), v.clone());
                    }
                    other => {
                        return Err(CompileError::structure(
                            format!("{}.{}", key, describe(other)),
                            "parameter names must be strings",
                        ))
                    }
                }
            }
            Ok(Some(params))
        }
        _ => Err(CompileError::structure(
            key,
            "operation parameters must be null or a mapping",
        )),
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        other => format!("{:?}", other),
    }
}

/// Validate a parsed config. Returns a list of errors (empty = valid).
pub fn validate_config(config: &PipelineConfig, router: &Router) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    // Version check
    if config.version != "1.0" {
        errors.push(ValidationError {
            message: format!("version must be \"1.0\", got \"{}\"", config.version),
        });
    }

    // Name check
    if config.name.is_empty() {
        errors.push(ValidationError {
            message: "name must not be empty".to_string(),
        });
    }

    for (index, stage) in config.stages.iter().enumerate() {
        if !router.contains(&stage.kind) {
            errors.push(ValidationError {
                message: format!("stage {} has unknown kind '{}'", index, stage.kind),
            });
        }

        if stage.layers.is_empty() {
            errors.push(ValidationError {
                message: format!("stage {} ({}) has no layers", index, stage.kind),
            });
        }

        if index == 0 && stage.conditional {
            errors.push(ValidationError {
                message: format!(
                    "stage {} ({}) is conditional but has no upstream stage",
                    index, stage.kind
                ),
            });
        }

        for (layer_index, layer) in stage.layers.iter().enumerate() {
            if let Err(e) = parse_layer_config(layer) {
                errors.push(ValidationError {
                    message: format!(
                        "stage {} ({}) layer {}: {}",
                        index, stage.kind, layer_index, e
                    ),
                });
            }
        }
    }

    errors
}
