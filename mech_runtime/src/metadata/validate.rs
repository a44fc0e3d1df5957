//! Manifest validation
//!
//! Structural checks run in a fixed order and stop at the first failure.
//! Publishing only accepts a [`ValidatedManifest`], which can only be
//! obtained from this module.

use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Error: Metadata file not found at {0}")]
    FileNotFound(PathBuf),

    #[error("Error: Metadata file contains invalid JSON.")]
    InvalidJson(#[source] serde_json::Error),

    #[error("{0}")]
    Schema(String),
}

/// Manifest bytes that passed [`validate`]
#[derive(Debug, Clone)]
pub struct ValidatedManifest {
    bytes: Vec<u8>,
    tools: usize,
}

impl ValidatedManifest {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn tool_count(&self) -> usize {
        self.tools
    }
}

#[derive(Clone, Copy)]
enum Kind {
    String,
    Array,
    Object,
}

impl Kind {
    fn matches(&self, value: &Value) -> bool {
        match self {
            Kind::String => value.is_string(),
            Kind::Array => value.is_array(),
            Kind::Object => value.is_object(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Kind::String => "string",
            Kind::Array => "array",
            Kind::Object => "object",
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

const MANIFEST_FIELDS: [(&str, Kind); 7] = [
    ("name", Kind::String),
    ("description", Kind::String),
    ("inputFormat", Kind::String),
    ("outputFormat", Kind::String),
    ("image", Kind::String),
    ("tools", Kind::Array),
    ("toolMetadata", Kind::Object),
];

const DESCRIPTOR_FIELDS: [(&str, Kind); 4] = [
    ("name", Kind::String),
    ("description", Kind::String),
    ("input", Kind::Object),
    ("output", Kind::Object),
];

const INPUT_FIELDS: [(&str, Kind); 2] = [("type", Kind::String), ("description", Kind::String)];

const OUTPUT_FIELDS: [(&str, Kind); 3] = [
    ("type", Kind::String),
    ("description", Kind::String),
    ("schema", Kind::Object),
];

const SCHEMA_FIELDS: [(&str, Kind); 3] = [
    ("properties", Kind::Object),
    ("required", Kind::Array),
    ("type", Kind::String),
];

const PROPERTIES: [&str; 3] = ["requestId", "result", "prompt"];

const PROPERTY_FIELDS: [(&str, Kind); 2] = [("type", Kind::String), ("description", Kind::String)];

fn fail<T>(message: String) -> Result<T, ValidationError> {
    Err(ValidationError::Schema(message))
}

/// Check every field of `fields` on `object`, reporting through the given
/// message builders.
fn check_fields(
    object: &Map<String, Value>,
    fields: &[(&str, Kind)],
    missing: impl Fn(&str) -> String,
    mistyped: impl Fn(&str, &Kind, &Value) -> String,
) -> Result<(), ValidationError> {
    for (key, kind) in fields {
        match object.get(*key) {
            None => return fail(missing(key)),
            Some(value) if !kind.matches(value) => return fail(mistyped(key, kind, value)),
            Some(_) => {}
        }
    }
    Ok(())
}

/// Validate a manifest document.
pub fn validate(manifest: &Value) -> Result<(), ValidationError> {
    let Some(root) = manifest.as_object() else {
        return fail(format!(
            "Invalid type for metadata json. Expected 'object', but got '{}'",
            type_name(manifest)
        ));
    };

    check_fields(
        root,
        &MANIFEST_FIELDS,
        |key| format!("Missing key in metadata json: '{}'", key),
        |_, kind, value| {
            format!(
                "Invalid type for key in metadata json. Expected '{}', but got '{}'",
                kind.name(),
                type_name(value)
            )
        },
    )?;

    let tools = root.get("tools").and_then(Value::as_array).map(Vec::as_slice).unwrap_or_default();
    let Some(tools_metadata) = root.get("toolMetadata").and_then(Value::as_object) else {
        return fail("Missing key in metadata json: 'toolMetadata'".to_string());
    };

    if tools.len() != tools_metadata.len() {
        return fail(format!(
            "Number of tools does not match number of keys in 'toolMetadata'. Expected {} but got {}.",
            tools.len(),
            tools_metadata.len()
        ));
    }

    for tool in tools {
        let Some(tool) = tool.as_str() else {
            return fail(format!(
                "Invalid type for tool in metadata json. Expected 'string', but got '{}'",
                type_name(tool)
            ));
        };
        let Some(descriptor) = tools_metadata.get(tool) else {
            return fail(format!("Missing toolsMetadata for tool: '{}'", tool));
        };
        validate_descriptor(tool, descriptor)?;
    }

    Ok(())
}

fn validate_descriptor(tool: &str, descriptor: &Value) -> Result<(), ValidationError> {
    let Some(descriptor) = descriptor.as_object() else {
        return fail(format!(
            "Invalid type for toolsMetadata of {}. Expected 'object', but got '{}'.",
            tool,
            type_name(descriptor)
        ));
    };

    for (key, kind) in DESCRIPTOR_FIELDS {
        let Some(value) = descriptor.get(key) else {
            return fail(format!("Missing key in toolsMetadata: '{}'", key));
        };
        if !kind.matches(value) {
            return fail(format!(
                "Invalid type for key in toolsMetadata. Expected '{}', but got '{}'.",
                kind.name(),
                type_name(value)
            ));
        }

        match (key, value.as_object()) {
            ("input", Some(input)) => validate_input(tool, input)?,
            ("output", Some(output)) => validate_output(tool, output)?,
            _ => {}
        }
    }
    Ok(())
}

fn validate_input(tool: &str, input: &Map<String, Value>) -> Result<(), ValidationError> {
    check_fields(
        input,
        &INPUT_FIELDS,
        |key| format!("Missing key for {} -> input: '{}'", tool, key),
        |key, kind, value| {
            format!(
                "Invalid type for '{}' in {} -> input. Expected '{}', but got '{}'.",
                key,
                tool,
                kind.name(),
                type_name(value)
            )
        },
    )
}

fn validate_output(tool: &str, output: &Map<String, Value>) -> Result<(), ValidationError> {
    check_fields(
        output,
        &OUTPUT_FIELDS,
        |key| format!("Missing key for {} -> output: '{}'", tool, key),
        |key, kind, value| {
            format!(
                "Invalid type for '{}' in {} -> output. Expected '{}', but got '{}'.",
                key,
                tool,
                kind.name(),
                type_name(value)
            )
        },
    )?;

    match output.get("schema").and_then(Value::as_object) {
        Some(schema) => validate_schema(tool, schema),
        None => Ok(()),
    }
}

fn validate_schema(tool: &str, schema: &Map<String, Value>) -> Result<(), ValidationError> {
    check_fields(
        schema,
        &SCHEMA_FIELDS,
        |key| format!("Missing key for {} -> output -> schema: '{}'", tool, key),
        |key, kind, value| {
            format!(
                "Invalid type for '{}' in {} -> output -> schema. Expected '{}', but got '{}'.",
                key,
                tool,
                kind.name(),
                type_name(value)
            )
        },
    )?;

    let (Some(properties), Some(required)) = (
        schema.get("properties").and_then(Value::as_object),
        schema.get("required").and_then(Value::as_array),
    ) else {
        return Ok(());
    };

    if properties.len() != required.len() {
        return fail(format!(
            "Number of properties data does not match number of keys in 'required'. Expected {} but got {}.",
            required.len(),
            properties.len()
        ));
    }

    let required_names = required.iter().filter_map(Value::as_str);
    let expected = PROPERTIES.iter().copied().chain(required_names);
    for property in expected {
        let Some(value) = properties.get(property) else {
            return fail(format!(
                "Missing key for {} -> output -> schema -> properties: '{}'",
                tool, property
            ));
        };
        let Some(data) = value.as_object() else {
            return fail(format!(
                "Invalid type for '{}' in {} -> output -> schema -> properties. Expected 'object', but got '{}'.",
                property,
                tool,
                type_name(value)
            ));
        };
        check_fields(
            data,
            &PROPERTY_FIELDS,
            |key| format!("Missing key in properties -> {}: '{}'", property, key),
            |_, kind, value| {
                format!(
                    "Invalid type for key in properties. Expected '{}', but got '{}'",
                    kind.name(),
                    type_name(value)
                )
            },
        )?;
    }
    Ok(())
}

/// Parse and validate manifest bytes.
pub fn validate_bytes(bytes: Vec<u8>) -> Result<ValidatedManifest, ValidationError> {
    let document: Value = serde_json::from_slice(&bytes).map_err(ValidationError::InvalidJson)?;
    validate(&document)?;
    let tools = document
        .get("tools")
        .and_then(Value::as_array)
        .map(Vec::len)
        .unwrap_or_default();
    Ok(ValidatedManifest { bytes, tools })
}

/// Read and validate the manifest file at `path`.
pub fn validate_file(path: &Path) -> Result<ValidatedManifest, ValidationError> {
    let bytes = std::fs::read(path).map_err(|_| ValidationError::FileNotFound(path.to_path_buf()))?;
    validate_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{Manifest, ToolDescriptor};
    use serde_json::json;

    fn manifest_value(tools: &[&str]) -> Value {
        let mut manifest = Manifest::default();
        for tool in tools {
            manifest.insert_tool(tool, ToolDescriptor::new(*tool, "desc"));
        }
        serde_json::from_slice(&manifest.to_json_bytes().unwrap()).unwrap()
    }

    fn message(value: &Value) -> String {
        validate(value).unwrap_err().to_string()
    }

    #[test]
    fn test_generated_manifest_is_valid() {
        assert!(validate(&manifest_value(&["echo", "shout"])).is_ok());
        assert!(validate(&manifest_value(&[])).is_ok());
    }

    #[test]
    fn test_missing_top_level_key() {
        let mut value = manifest_value(&["echo"]);
        value.as_object_mut().unwrap().remove("image");
        assert_eq!(message(&value), "Missing key in metadata json: 'image'");
    }

    #[test]
    fn test_wrong_top_level_type() {
        let mut value = manifest_value(&["echo"]);
        value["tools"] = json!("echo");
        assert_eq!(
            message(&value),
            "Invalid type for key in metadata json. Expected 'array', but got 'string'"
        );
    }

    #[test]
    fn test_cardinality_mismatch() {
        let mut value = manifest_value(&["echo"]);
        value["tools"] = json!(["echo", "shout"]);
        assert_eq!(
            message(&value),
            "Number of tools does not match number of keys in 'toolMetadata'. Expected 2 but got 1."
        );
    }

    #[test]
    fn test_missing_descriptor_names_the_tool() {
        let mut value = manifest_value(&["echo"]);
        value["tools"] = json!(["shout"]);
        assert_eq!(message(&value), "Missing toolsMetadata for tool: 'shout'");
    }

    #[test]
    fn test_nested_checks() {
        let mut value = manifest_value(&["echo"]);
        value["toolMetadata"]["echo"]["input"]["type"] = json!(1);
        assert_eq!(
            message(&value),
            "Invalid type for 'type' in echo -> input. Expected 'string', but got 'number'."
        );

        let mut value = manifest_value(&["echo"]);
        value["toolMetadata"]["echo"]["output"]["schema"]
            .as_object_mut()
            .unwrap()
            .remove("required");
        assert_eq!(message(&value), "Missing key for echo -> output -> schema: 'required'");

        let mut value = manifest_value(&["echo"]);
        value["toolMetadata"]["echo"]["output"]["schema"]["required"] = json!(["requestId", "result"]);
        assert_eq!(
            message(&value),
            "Number of properties data does not match number of keys in 'required'. Expected 2 but got 3."
        );

        let mut value = manifest_value(&["echo"]);
        value["toolMetadata"]["echo"]["output"]["schema"]["properties"]["prompt"]
            .as_object_mut()
            .unwrap()
            .remove("description");
        assert_eq!(message(&value), "Missing key in properties -> prompt: 'description'");
    }

    #[test]
    fn test_invalid_bytes() {
        let err = validate_bytes(b"{not json".to_vec()).unwrap_err();
        assert_eq!(err.to_string(), "Error: Metadata file contains invalid JSON.");
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = validate_file(&dir.path().join("metadata.json")).unwrap_err();
        assert!(matches!(err, ValidationError::FileNotFound(_)));
    }
}
