//! Nullable service variables
//!
//! The platform rejects empty values for a few variables that are filled in
//! later. They are given explicit placeholders before a build.

use crate::error::ConfigurationError;
use crate::workspace::{read_to_string, write_file};
use log::{debug, info};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

/// Variable name and the placeholder replacing an empty value
const NULLABLE_VARIABLES: [(&str, &str); 3] = [
    ("ON_CHAIN_SERVICE_ID", "null"),
    ("MECH_TO_CONFIG", "{}"),
    ("MECH_TO_MAX_DELIVERY_RATE", "{}"),
];

/// Replace empty nullable values in a service config document.
///
/// Returns whether anything changed.
pub fn normalize_service_config(document: &mut Value) -> bool {
    let Some(variables) = document.get_mut("env_variables").and_then(Value::as_object_mut) else {
        return false;
    };

    let mut changed = false;
    for (key, placeholder) in NULLABLE_VARIABLES {
        let Some(entry) = variables.get_mut(key).and_then(Value::as_object_mut) else {
            continue;
        };
        let empty = match entry.get("value") {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.is_empty(),
            _ => false,
        };
        if empty {
            entry.insert("value".to_string(), Value::String(placeholder.to_string()));
            changed = true;
        }
    }
    changed
}

/// Normalize the chain template and every existing service config.
///
/// Files are rewritten only when a value changed. Returns the rewritten paths.
pub fn normalize_service_files(template: &Path, operate_dir: &Path) -> Result<Vec<PathBuf>, ConfigurationError> {
    let mut targets = vec![template.to_path_buf()];
    targets.extend(service_config_paths(operate_dir)?);

    let mut rewritten = Vec::new();
    for path in targets {
        if !path.is_file() {
            continue;
        }
        let mut document: Value =
            serde_json::from_str(&read_to_string(&path)?).map_err(|e| ConfigurationError::json(&path, e))?;
        if normalize_service_config(&mut document) {
            let text = serde_json::to_string_pretty(&document).map_err(|e| ConfigurationError::json(&path, e))?;
            write_file(&path, format!("{}\n", text).as_bytes())?;
            info!("Normalized nullable variables in {}", path.display());
            rewritten.push(path);
        } else {
            debug!("{} needs no normalization", path.display());
        }
    }
    Ok(rewritten)
}

/// `<operate home>/services/sc-*/config.json`, sorted by directory name
pub fn service_config_paths(operate_dir: &Path) -> Result<Vec<PathBuf>, ConfigurationError> {
    let services_dir = operate_dir.join("services");
    if !services_dir.is_dir() {
        return Ok(Vec::new());
    }

    let entries = fs::read_dir(&services_dir).map_err(|e| ConfigurationError::io(&services_dir, e))?;
    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ConfigurationError::io(&services_dir, e))?;
        let is_service = entry.file_name().to_string_lossy().starts_with("sc-");
        let config = entry.path().join("config.json");
        if is_service && config.is_file() {
            paths.push(config);
        }
    }
    paths.sort();
    Ok(paths)
}
