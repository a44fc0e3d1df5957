//! Environment snapshot file
//!
//! Line-oriented `KEY=value` file. Comments, blank lines and key order are
//! preserved across load and save.

pub mod derive;

use crate::error::ConfigurationError;
use crate::workspace::{read_to_string, write_file};
use std::borrow::Cow;
use std::path::Path;

pub use derive::derive_environment;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    Entry { key: String, value: String },
    Raw(String),
}

/// Ordered key-value pairs plus the text around them
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvSnapshot {
    lines: Vec<Line>,
}

impl EnvSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(text: &str) -> Self {
        let lines = text.lines().map(parse_line).collect();
        Self { lines }
    }

    /// Load from `path`; a missing file is an empty snapshot.
    pub fn load(path: &Path) -> Result<Self, ConfigurationError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Ok(Self::parse(&read_to_string(path)?))
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigurationError> {
        write_file(path, self.render().as_bytes())
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            match line {
                Line::Entry { key, value } => {
                    out.push_str(key);
                    out.push('=');
                    out.push_str(&quote(value));
                }
                Line::Raw(text) => out.push_str(text),
            }
            out.push('\n');
        }
        out
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    /// Value of `key`, trimmed, or `None` when absent or blank
    pub fn non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).map(str::trim).filter(|v| !v.is_empty())
    }

    /// Update the first occurrence of `key` or append it.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        for line in &mut self.lines {
            if let Line::Entry { key: k, value: v } = line {
                if k == key {
                    *v = value;
                    return;
                }
            }
        }
        self.push(key, value);
    }

    pub(crate) fn push(&mut self, key: &str, value: String) {
        self.lines.push(Line::Entry {
            key: key.to_string(),
            value,
        });
    }

    pub(crate) fn push_raw(&mut self, text: &str) {
        self.lines.push(Line::Raw(text.to_string()));
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.lines.iter().filter_map(|line| match line {
            Line::Entry { key, value } => Some((key.as_str(), value.as_str())),
            Line::Raw(_) => None,
        })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Template iteration: `Err(text)` for text lines, `Ok((key, value))` for entries
    pub(crate) fn template_lines(&self) -> impl Iterator<Item = std::result::Result<(&str, &str), &str>> {
        self.lines.iter().map(|line| match line {
            Line::Entry { key, value } => Ok((key.as_str(), value.as_str())),
            Line::Raw(text) => Err(text.as_str()),
        })
    }
}

fn parse_line(line: &str) -> Line {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Line::Raw(line.to_string());
    }
    let body = trimmed.strip_prefix("export ").unwrap_or(trimmed);
    match body.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Line::Entry {
            key: key.trim().to_string(),
            value: unquote(value.trim()).to_string(),
        },
        _ => Line::Raw(line.to_string()),
    }
}

/// Quote values a dotenv reader would otherwise trim or cut at `#`.
fn quote(value: &str) -> Cow<'_, str> {
    if !value.contains(|c: char| c.is_whitespace() || c == '#') {
        return Cow::Borrowed(value);
    }
    let mark = if value.contains('"') { '\'' } else { '"' };
    Cow::Owned(format!("{mark}{value}{mark}"))
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}
