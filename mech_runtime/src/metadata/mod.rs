//! Tool manifest ("metadata")
//!
//! The manifest lists every tool the mech serves together with a descriptor
//! per tool. It is serialized with 4-space indentation and keys in declaration
//! order, so identical tool sets always produce identical bytes. Non-ASCII
//! text is written as `\uXXXX` escapes.

pub mod assemble;
pub mod validate;

use crate::error::ConfigurationError;
use crate::workspace::write_file;
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use serde_json::ser::{Formatter, PrettyFormatter};
use std::io;
use std::path::Path;

pub use assemble::{assemble, build_manifest, discover_tools, generate_metadata, ToolEntry};
pub use validate::{validate, validate_bytes, ValidatedManifest, ValidationError};

pub const MANIFEST_NAME: &str = "Autonolas Mech III";
pub const MANIFEST_DESCRIPTION: &str =
    "The mech executes AI tasks requested on-chain and delivers the results to the requester.";
pub const IO_FORMAT: &str = "ipfs-v0.1";
pub const MANIFEST_IMAGE: &str = "tbd";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub name: String,
    pub description: String,
    pub input_format: String,
    pub output_format: String,
    pub image: String,
    pub tools: Vec<String>,
    pub tool_metadata: ToolMetadata,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            name: MANIFEST_NAME.to_string(),
            description: MANIFEST_DESCRIPTION.to_string(),
            input_format: IO_FORMAT.to_string(),
            output_format: IO_FORMAT.to_string(),
            image: MANIFEST_IMAGE.to_string(),
            tools: Vec::new(),
            tool_metadata: ToolMetadata::default(),
        }
    }
}

impl Manifest {
    /// Add `tool` unless already listed. The first descriptor for a tool wins.
    pub fn insert_tool(&mut self, tool: &str, descriptor: ToolDescriptor) -> bool {
        if self.tool_metadata.contains(tool) {
            return false;
        }
        self.tools.push(tool.to_string());
        self.tool_metadata.0.push((tool.to_string(), descriptor));
        true
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut out = Vec::new();
        let formatter = AsciiFormatter::new(PrettyFormatter::with_indent(b"    "));
        let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
        self.serialize(&mut serializer)?;
        Ok(out)
    }

    pub fn write(&self, path: &Path) -> Result<(), ConfigurationError> {
        let bytes = self.to_json_bytes().map_err(|e| ConfigurationError::json(path, e))?;
        write_file(path, &bytes)
    }
}

/// Pretty printer that escapes every non-ASCII character, UTF-16 style.
struct AsciiFormatter<'a> {
    inner: PrettyFormatter<'a>,
}

impl<'a> AsciiFormatter<'a> {
    fn new(inner: PrettyFormatter<'a>) -> Self {
        Self { inner }
    }
}

impl Formatter for AsciiFormatter<'_> {
    fn begin_array<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.begin_array(writer)
    }

    fn end_array<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.end_array(writer)
    }

    fn begin_array_value<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        self.inner.begin_array_value(writer, first)
    }

    fn end_array_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.end_array_value(writer)
    }

    fn begin_object<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.begin_object(writer)
    }

    fn end_object<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.end_object(writer)
    }

    fn begin_object_key<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        self.inner.begin_object_key(writer, first)
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.begin_object_value(writer)
    }

    fn end_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.end_object_value(writer)
    }

    fn write_string_fragment<W: ?Sized + io::Write>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()> {
        let mut start = 0;
        for (index, ch) in fragment.char_indices() {
            if ch.is_ascii() {
                continue;
            }
            writer.write_all(&fragment.as_bytes()[start..index])?;
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units) {
                write!(writer, "\\u{:04x}", unit)?;
            }
            start = index + ch.len_utf8();
        }
        writer.write_all(&fragment.as_bytes()[start..])
    }
}

/// Tool id to descriptor, in insertion order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolMetadata(Vec<(String, ToolDescriptor)>);

impl ToolMetadata {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, tool: &str) -> bool {
        self.get(tool).is_some()
    }

    pub fn get(&self, tool: &str) -> Option<&ToolDescriptor> {
        self.0.iter().find(|(id, _)| id == tool).map(|(_, d)| d)
    }
}

impl Serialize for ToolMetadata {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (tool, descriptor) in &self.0 {
            map.serialize_entry(tool, descriptor)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input: ToolInput,
    pub output: ToolOutput,
}

impl ToolDescriptor {
    /// Descriptor with the fixed input and output schemas
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input: ToolInput::default(),
            output: ToolOutput::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolInput {
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
}

impl Default for ToolInput {
    fn default() -> Self {
        Self {
            kind: "text".to_string(),
            description: "The text to make a prediction on".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolOutput {
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    pub schema: OutputSchema,
}

impl Default for ToolOutput {
    fn default() -> Self {
        Self {
            kind: "object".to_string(),
            description: "A JSON object containing the prediction and confidence".to_string(),
            schema: OutputSchema::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputSchema {
    #[serde(rename = "type")]
    pub kind: String,
    pub properties: OutputProperties,
    pub required: Vec<String>,
}

impl Default for OutputSchema {
    fn default() -> Self {
        Self {
            kind: "object".to_string(),
            properties: OutputProperties::default(),
            required: vec!["requestId".to_string(), "result".to_string(), "prompt".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputProperties {
    pub request_id: PropertySpec,
    pub result: PropertySpec,
    pub prompt: PropertySpec,
}

impl Default for OutputProperties {
    fn default() -> Self {
        Self {
            request_id: PropertySpec::new("integer", "Unique identifier for the request"),
            result: PropertySpec {
                example: Some(
                    "{\n  \"p_yes\": 0.6,\n  \"p_no\": 0.4,\n  \"confidence\": 0.8,\n  \"info_utility\": 0.6\n}"
                        .to_string(),
                ),
                ..PropertySpec::new("string", "Result information in JSON format as a string")
            },
            prompt: PropertySpec::new("string", "The prompt used to make the prediction."),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertySpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub example: Option<String>,
}

impl PropertySpec {
    fn new(kind: &str, description: &str) -> Self {
        Self {
            kind: kind.to_string(),
            description: description.to_string(),
            example: None,
        }
    }
}
