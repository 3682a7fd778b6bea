use crate::agents::version_patcher::FileVersionEntry;
use crate::error::{MsiverError, Result};
use crate::utils::verbose;
use quick_xml::Reader;
use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::{BytesRef, BytesStart, Event};
use regex::{Captures, Regex};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

/// Item type read from MSBuild manifests unless told otherwise.
pub const DEFAULT_ITEM_TYPE: &str = "File";

/// Metadata name carrying the version on MSBuild items.
const VERSION_METADATA: &str = "Version";

static PROPERTY_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\(\s*([A-Za-z_][A-Za-z0-9_.\-]*)\s*\)").expect("property pattern is valid")
});

/// Builds the list of file version entries from command-line pairs and
/// manifest files.
pub struct EntryLoaderAgent {
    item_type: String,
    properties: HashMap<String, String>,
}

impl EntryLoaderAgent {
    pub fn new(item_type: impl Into<String>) -> Self {
        Self {
            item_type: item_type.into(),
            properties: HashMap::new(),
        }
    }

    /// Register global properties (`NAME=VALUE`) used when expanding `$(NAME)`.
    /// They take precedence over properties defined inside manifests.
    pub fn with_properties(mut self, pairs: &[String]) -> Result<Self> {
        for pair in pairs {
            let (name, value) = pair.split_once('=').ok_or_else(|| {
                MsiverError::InvalidInput(format!(
                    "Property '{}' must be written as NAME=VALUE",
                    pair
                ))
            })?;
            let name = name.trim();
            if name.is_empty() {
                return Err(MsiverError::InvalidInput(format!(
                    "Property '{}' has an empty name",
                    pair
                )));
            }
            self.properties.insert(name.to_string(), value.to_string());
        }
        Ok(self)
    }

    /// Parse `FILE=VERSION` pairs. `FILE=` yields an empty version and a bare
    /// `FILE` yields no version; both are later skipped with a warning.
    pub fn parse_pairs(&self, pairs: &[String]) -> Result<Vec<FileVersionEntry>> {
        pairs
            .iter()
            .map(|pair| {
                let entry = match pair.split_once('=') {
                    Some((file, version)) => FileVersionEntry::new(file.trim(), version.trim()),
                    None => FileVersionEntry::without_version(pair.trim()),
                };
                if entry.file_name.is_empty() {
                    return Err(MsiverError::InvalidInput(format!(
                        "'{}' does not name a file",
                        pair
                    )));
                }
                Ok(entry)
            })
            .collect()
    }

    /// Load entries from a manifest, choosing the format by extension.
    pub fn load_manifest<P: AsRef<Path>>(&self, path: P) -> Result<Vec<FileVersionEntry>> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            MsiverError::Manifest(format!("Failed to read '{}': {}", path.display(), e))
        })?;

        let is_toml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

        let entries = if is_toml {
            self.parse_toml(&content)
        } else {
            self.parse_msbuild(&content)
        }
        .map_err(|e| match e {
            MsiverError::Manifest(message) => {
                MsiverError::Manifest(format!("{}: {}", path.display(), message))
            }
            other => other,
        })?;

        if verbose() {
            eprintln!(
                "[VERBOSE] Loaded {} entries from {}",
                entries.len(),
                path.display()
            );
        }

        Ok(entries)
    }

    /// Parse a TOML manifest made of `[[file]]` tables.
    pub fn parse_toml(&self, content: &str) -> Result<Vec<FileVersionEntry>> {
        let manifest: TomlManifest = toml::from_str(content)
            .map_err(|e| MsiverError::Manifest(format!("Failed to parse TOML: {}", e)))?;

        manifest
            .file
            .into_iter()
            .map(|item| {
                if item.name.trim().is_empty() {
                    return Err(MsiverError::Manifest(
                        "[[file]] entry has an empty name".to_string(),
                    ));
                }
                Ok(FileVersionEntry {
                    file_name: item.name,
                    version: item.version.map(|v| self.expand(&v, &HashMap::new())),
                })
            })
            .collect()
    }

    /// Parse an MSBuild project fragment, reading items of the configured
    /// type from every `<ItemGroup>`.
    pub fn parse_msbuild(&self, content: &str) -> Result<Vec<FileVersionEntry>> {
        let mut reader = Reader::from_str(content);

        let mut file_properties: HashMap<String, String> = HashMap::new();
        let mut raw_items: Vec<RawItem> = Vec::new();
        let mut stack: Vec<String> = Vec::new();
        let mut text = String::new();

        loop {
            let event = reader
                .read_event()
                .map_err(|e| MsiverError::Manifest(format!("Malformed XML: {}", e)))?;

            match event {
                Event::Start(start) => {
                    let name = element_name(&start);
                    if self.is_item(&stack, &name) {
                        raw_items.push(read_item(&start)?);
                    }
                    stack.push(name);
                    text.clear();
                }
                Event::Empty(start) => {
                    let name = element_name(&start);
                    if self.is_item(&stack, &name) {
                        raw_items.push(read_item(&start)?);
                    }
                }
                Event::Text(content) => {
                    let decoded = content
                        .decode()
                        .map_err(|e| MsiverError::Manifest(format!("Bad text: {}", e)))?;
                    text.push_str(&decoded);
                }
                Event::GeneralRef(reference) => {
                    text.push_str(&resolve_reference(&reference)?);
                }
                Event::End(_) => {
                    let Some(name) = stack.pop() else {
                        continue;
                    };
                    let parent = stack.last().map(String::as_str);
                    let grandparent = stack.len().checked_sub(2).map(|i| stack[i].as_str());

                    if parent == Some("PropertyGroup") {
                        let value = self.expand(text.trim(), &file_properties);
                        file_properties.insert(name, value);
                    } else if name == VERSION_METADATA
                        && grandparent == Some("ItemGroup")
                        && parent == Some(self.item_type.as_str())
                    {
                        if let Some(item) = raw_items.last_mut() {
                            item.version = Some(text.trim().to_string());
                        }
                    }
                    text.clear();
                }
                Event::Eof => break,
                _ => {}
            }
        }

        let mut entries = Vec::new();
        for item in raw_items {
            let include = self.expand(&item.include, &file_properties);
            let version = item.version.map(|v| self.expand(&v, &file_properties));
            for file in include.split(';').map(str::trim).filter(|f| !f.is_empty()) {
                entries.push(FileVersionEntry {
                    file_name: file.to_string(),
                    version: version.clone(),
                });
            }
        }

        Ok(entries)
    }

    fn is_item(&self, stack: &[String], name: &str) -> bool {
        name == self.item_type && stack.last().map(String::as_str) == Some("ItemGroup")
    }

    /// Replace `$(NAME)` references. Global properties win over file ones;
    /// unknown names expand to nothing, as MSBuild does.
    fn expand(&self, value: &str, file_properties: &HashMap<String, String>) -> String {
        PROPERTY_REF
            .replace_all(value, |caps: &Captures| {
                let name = &caps[1];
                self.properties
                    .get(name)
                    .or_else(|| file_properties.get(name))
                    .cloned()
                    .unwrap_or_default()
            })
            .into_owned()
    }
}

#[derive(Debug, Deserialize)]
struct TomlManifest {
    #[serde(default)]
    file: Vec<TomlFileEntry>,
}

#[derive(Debug, Deserialize)]
struct TomlFileEntry {
    name: String,
    version: Option<String>,
}

struct RawItem {
    include: String,
    version: Option<String>,
}

fn element_name(start: &BytesStart) -> String {
    String::from_utf8_lossy(start.local_name().as_ref()).into_owned()
}

/// Resolve `&name;` and `&#N;`/`&#xN;` references met inside element text.
fn resolve_reference(reference: &BytesRef) -> Result<String> {
    let name = reference
        .decode()
        .map_err(|e| MsiverError::Manifest(format!("Bad entity reference: {}", e)))?;

    let resolved = match name.strip_prefix('#') {
        Some(code) => {
            let value = match code.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok(),
                None => code.parse::<u32>().ok(),
            };
            value.and_then(char::from_u32).map(String::from)
        }
        None => resolve_predefined_entity(&name).map(str::to_string),
    };

    resolved.ok_or_else(|| MsiverError::Manifest(format!("Unknown entity '&{};'", name)))
}

fn read_item(start: &BytesStart) -> Result<RawItem> {
    let mut include = None;
    let mut version = None;

    for attr in start.attributes() {
        let attr = attr.map_err(|e| MsiverError::Manifest(format!("Bad attribute: {}", e)))?;
        let value = attr
            .unescape_value()
            .map_err(|e| MsiverError::Manifest(format!("Bad attribute value: {}", e)))?
            .into_owned();
        match attr.key.local_name().as_ref() {
            b"Include" => include = Some(value),
            b"Version" => version = Some(value),
            _ => {}
        }
    }

    let include = include.ok_or_else(|| {
        MsiverError::Manifest(format!(
            "<{}> item is missing the Include attribute",
            element_name(start)
        ))
    })?;

    Ok(RawItem { include, version })
}
