//! Manifest assembly from the handler package registry
//!
//! Every directory named `customs` holds handler packages, one per child
//! directory. A package declares its tools in `component.yaml`; packages that
//! predate that convention are read statically from their `*.py` sources.
//! Nothing is executed. Traversal is sorted by file name so the same registry
//! always yields the same manifest.

use super::{Manifest, ToolDescriptor};
use crate::error::ConfigurationError;
use log::{debug, info, warn};
use regex::Regex;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use walkdir::WalkDir;

const CUSTOMS: &str = "customs";
const COMPONENT_YAML: &str = "component.yaml";
const INIT_PY: &str = "__init__.py";

/// Capability list names, in priority order
const TOOL_IDENTIFIERS: [&str; 2] = ["ALLOWED_TOOLS", "AVAILABLE_TOOLS"];

/// One discovered handler package
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolEntry {
    pub author: Option<String>,
    pub tool_name: Option<String>,
    pub description: Option<String>,
    pub allowed_tools: Vec<String>,
    pub package_dir: PathBuf,
}

#[derive(Debug, Default, Deserialize)]
struct ComponentDeclaration {
    author: Option<String>,
    name: Option<String>,
    description: Option<String>,
    allowed_tools: Option<Vec<String>>,
    available_tools: Option<Vec<String>>,
}

/// Scan `packages_dir` and build the manifest.
pub fn assemble(packages_dir: &Path) -> Result<Manifest, ConfigurationError> {
    if !packages_dir.is_dir() {
        return Err(ConfigurationError::MissingFile {
            what: "packages directory",
            path: packages_dir.to_path_buf(),
        });
    }
    Ok(build_manifest(&discover_tools(packages_dir)))
}

/// Assemble the manifest and write it to `metadata_path`.
pub fn generate_metadata(packages_dir: &Path, metadata_path: &Path) -> Result<Manifest, ConfigurationError> {
    let manifest = assemble(packages_dir)?;
    manifest.write(metadata_path)?;
    info!(
        "Metadata with {} tool(s) written to {}",
        manifest.tools.len(),
        metadata_path.display()
    );
    Ok(manifest)
}

/// Deduplicate tool ids in discovery order; the first package declaring an id
/// provides its descriptor.
pub fn build_manifest(entries: &[ToolEntry]) -> Manifest {
    let mut manifest = Manifest::default();
    for entry in entries {
        for tool in &entry.allowed_tools {
            let descriptor = ToolDescriptor::new(
                entry.tool_name.clone().unwrap_or_default(),
                entry.description.clone().unwrap_or_default(),
            );
            if !manifest.insert_tool(tool, descriptor) {
                debug!(
                    "Tool '{}' from {} already declared, keeping the first descriptor",
                    tool,
                    entry.package_dir.display()
                );
            }
        }
    }
    manifest
}

/// Packages exposing at least one tool, in sorted traversal order
pub fn discover_tools(packages_dir: &Path) -> Vec<ToolEntry> {
    let mut entries = Vec::new();
    let customs_dirs = WalkDir::new(packages_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Skipping unreadable registry entry: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_dir() && entry.file_name() == CUSTOMS);

    for customs in customs_dirs {
        let packages = match sorted_children(customs.path()) {
            Ok(children) => children.into_iter().filter(|p| p.is_dir()),
            Err(e) => {
                warn!("Skipping {}: {}", customs.path().display(), e);
                continue;
            }
        };
        for package in packages {
            match read_package(&package) {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => debug!("No tools declared in {}, skipping", package.display()),
                Err(reason) => warn!("Skipping package {}: {}", package.display(), reason),
            }
        }
    }
    entries
}

fn sorted_children(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut children = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    children.sort();
    Ok(children)
}

fn read_package(package: &Path) -> Result<Option<ToolEntry>, String> {
    let declaration_path = package.join(COMPONENT_YAML);
    let declaration = if declaration_path.is_file() {
        let text = fs::read_to_string(&declaration_path).map_err(|e| e.to_string())?;
        serde_yaml::from_str::<Option<ComponentDeclaration>>(&text)
            .map_err(|e| format!("malformed {}: {}", COMPONENT_YAML, e))?
            .unwrap_or_default()
    } else {
        ComponentDeclaration::default()
    };

    let declared = [&declaration.allowed_tools, &declaration.available_tools]
        .into_iter()
        .flatten()
        .find(|tools| !tools.is_empty())
        .cloned();

    let tools = match declared {
        Some(tools) => tools,
        None => scan_sources(package)?.unwrap_or_default(),
    };
    if tools.is_empty() {
        return Ok(None);
    }

    Ok(Some(ToolEntry {
        author: declaration.author,
        tool_name: declaration.name,
        description: declaration.description,
        allowed_tools: tools,
        package_dir: package.to_path_buf(),
    }))
}

/// First literal tool list found in the package's `*.py` files
fn scan_sources(package: &Path) -> Result<Option<Vec<String>>, String> {
    let sources = sorted_children(package).map_err(|e| e.to_string())?;
    for source in sources {
        let is_python = source.extension().map(|ext| ext == "py").unwrap_or(false);
        let is_init = source.file_name().map(|n| n == INIT_PY).unwrap_or(false);
        if !source.is_file() || !is_python || is_init {
            continue;
        }
        let text = fs::read_to_string(&source).map_err(|e| format!("{}: {}", source.display(), e))?;
        if let Some(tools) = extract_tool_list(&text) {
            return Ok(Some(tools));
        }
    }
    Ok(None)
}

fn assignment_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?m)^(ALLOWED_TOOLS|AVAILABLE_TOOLS)\s*(?::[^=\n]*)?=\s*\[([^\]]*)\]").ok())
        .as_ref()
}

fn literal_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r#""([^"\\]*)"|'([^'\\]*)'"#).ok())
        .as_ref()
}

/// Extract a top-level `ALLOWED_TOOLS = [...]` (or legacy `AVAILABLE_TOOLS`)
/// list made only of string literals.
pub(crate) fn extract_tool_list(source: &str) -> Option<Vec<String>> {
    let assignment = assignment_pattern()?;
    let literal = literal_pattern()?;
    for identifier in TOOL_IDENTIFIERS {
        for captures in assignment.captures_iter(source) {
            if &captures[1] != identifier {
                continue;
            }
            let body = &captures[2];
            let tools: Vec<String> = literal
                .captures_iter(body)
                .filter_map(|c| c.get(1).or_else(|| c.get(2)))
                .map(|m| m.as_str().to_string())
                .collect();
            let rest = literal.replace_all(body, "");
            let only_literals = rest.chars().all(|c| c.is_whitespace() || c == ',');
            if only_literals && !tools.is_empty() {
                return Some(tools);
            }
        }
    }
    None
}
