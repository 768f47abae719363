//! Plugin descriptor types.
//!
//! A descriptor (`plugin.toml` or `plugin.json`) describes a plugin's
//! identity, category, entry point, dependencies and configuration schema.
//! Descriptors are the only contract between discovery and loading.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use synapse_component::ComponentKind;
use synapse_events::Payload;

use crate::error::{PluginError, PluginResult};
use crate::id::PluginId;
use crate::version::VersionConstraint;

/// Preferred descriptor file name.
pub const TOML_DESCRIPTOR: &str = "plugin.toml";
/// Alternate descriptor file name.
pub const JSON_DESCRIPTOR: &str = "plugin.json";

/// Category a plugin's component belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginCategory {
    /// Produces an input component.
    #[serde(alias = "sensor")]
    Input,
    /// Produces an output component.
    #[serde(alias = "actuator")]
    Output,
    /// Produces a component of any kind.
    #[default]
    #[serde(alias = "neuron")]
    Generic,
}

impl PluginCategory {
    /// Lowercase name, also the install subdirectory stem.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
            Self::Generic => "generic",
        }
    }

    /// Whether a component of `kind` fits this category.
    #[must_use]
    pub fn accepts(self, kind: ComponentKind) -> bool {
        match self {
            Self::Input => kind == ComponentKind::Input,
            Self::Output => kind == ComponentKind::Output,
            Self::Generic => true,
        }
    }
}

impl fmt::Display for PluginCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// On-disk format of a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DescriptorFormat {
    /// `plugin.toml`.
    #[default]
    Toml,
    /// `plugin.json`.
    Json,
}

impl DescriptorFormat {
    /// Format implied by a file name, if it is a descriptor file.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.file_name().and_then(|n| n.to_str()) {
            Some(TOML_DESCRIPTOR) => Some(Self::Toml),
            Some(JSON_DESCRIPTOR) => Some(Self::Json),
            _ => None,
        }
    }

    /// Descriptor file name for this format.
    #[must_use]
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Toml => TOML_DESCRIPTOR,
            Self::Json => JSON_DESCRIPTOR,
        }
    }
}

fn default_enabled() -> bool {
    true
}

/// Metadata describing an installable component package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    /// Unique plugin identifier.
    pub id: PluginId,
    /// Human-readable display name.
    pub name: String,
    /// Semantic version.
    pub version: Version,
    /// Optional description.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Optional author.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub author: String,
    /// Component category.
    #[serde(default, alias = "neuron_type")]
    pub category: PluginCategory,
    /// Key of the factory that builds the component.
    pub entry_point: String,
    /// Whether the plugin may be loaded.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Required plugins and their version constraints.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<PluginId, VersionConstraint>,
    /// Configuration schema. Entries shaped `{ "default": value }` provide
    /// defaults for missing configuration keys.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config_schema: BTreeMap<String, Value>,
    /// Descriptor file this was loaded from. `None` for built-ins.
    #[serde(skip)]
    pub path: Option<PathBuf>,
    /// Format of the descriptor file.
    #[serde(skip)]
    pub format: DescriptorFormat,
}

impl PluginDescriptor {
    /// Create a descriptor with no dependencies, enabled, and no file.
    #[must_use]
    pub fn new(
        id: PluginId,
        version: Version,
        category: PluginCategory,
        entry_point: impl Into<String>,
    ) -> Self {
        Self {
            name: id.to_string(),
            id,
            version,
            description: String::new(),
            author: String::new(),
            category,
            entry_point: entry_point.into(),
            enabled: true,
            dependencies: BTreeMap::new(),
            config_schema: BTreeMap::new(),
            path: None,
            format: DescriptorFormat::Toml,
        }
    }

    /// Add a dependency.
    #[must_use]
    pub fn with_dependency(mut self, id: PluginId, constraint: VersionConstraint) -> Self {
        self.dependencies.insert(id, constraint);
        self
    }

    /// Parse a descriptor from text.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::DescriptorParseError`] on malformed input,
    /// invalid ids, versions or constraints.
    pub fn parse(text: &str, format: DescriptorFormat) -> PluginResult<Self> {
        let mut descriptor: Self = match format {
            DescriptorFormat::Toml => toml::from_str(text).map_err(|e| parse_error(None, e))?,
            DescriptorFormat::Json => {
                serde_json::from_str(text).map_err(|e| parse_error(None, e))?
            },
        };
        descriptor.format = format;
        Ok(descriptor)
    }

    /// Load a descriptor file. The format follows the file name.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::DescriptorParseError`] if the file is not a
    /// descriptor, cannot be read or does not parse.
    pub fn load(path: &Path) -> PluginResult<Self> {
        let format = DescriptorFormat::from_path(path).ok_or_else(|| {
            parse_error(Some(path), "not a plugin.toml or plugin.json file")
        })?;
        let text = std::fs::read_to_string(path).map_err(|e| parse_error(Some(path), e))?;
        let mut descriptor =
            Self::parse(&text, format).map_err(|e| match e {
                PluginError::DescriptorParseError { message, .. } => {
                    parse_error(Some(path), message)
                },
                other => other,
            })?;
        descriptor.path = Some(path.to_path_buf());
        Ok(descriptor)
    }

    /// Render in the given format.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Serialize`] if serialization fails.
    pub fn render(&self, format: DescriptorFormat) -> PluginResult<String> {
        match format {
            DescriptorFormat::Toml => {
                toml::to_string_pretty(self).map_err(|e| PluginError::Serialize(e.to_string()))
            },
            DescriptorFormat::Json => serde_json::to_string_pretty(self)
                .map_err(|e| PluginError::Serialize(e.to_string())),
        }
    }

    /// Write the descriptor back to its file in its original format.
    /// Returns `false` for descriptors without a file.
    ///
    /// # Errors
    ///
    /// Returns an error if rendering or writing fails.
    pub fn save(&self) -> PluginResult<bool> {
        let Some(path) = &self.path else {
            return Ok(false);
        };
        std::fs::write(path, self.render(self.format)?)?;
        Ok(true)
    }

    /// Directory holding the descriptor file.
    #[must_use]
    pub fn directory(&self) -> Option<&Path> {
        self.path.as_deref().and_then(Path::parent)
    }

    /// Defaults declared by the configuration schema.
    #[must_use]
    pub fn default_config(&self) -> Payload {
        self.config_schema
            .iter()
            .filter_map(|(key, schema)| {
                schema
                    .get("default")
                    .map(|default| (key.clone(), default.clone()))
            })
            .collect()
    }

    /// Schema defaults overlaid with `overrides`.
    #[must_use]
    pub fn component_config(&self, overrides: Option<&Payload>) -> Payload {
        let mut config = self.default_config();
        if let Some(overrides) = overrides {
            for (key, value) in overrides {
                config.insert(key.clone(), value.clone());
            }
        }
        config
    }
}

fn parse_error(path: Option<&Path>, message: impl fmt::Display) -> PluginError {
    PluginError::DescriptorParseError {
        path: path.map(Path::to_path_buf).unwrap_or_default(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TOML_SAMPLE: &str = r#"
id = "subtitle-screen"
name = "Subtitle Screen"
version = "1.2.0"
author = "synapse"
category = "output"
entry_point = "subtitle"

[dependencies]
console-input = ">=0.1.0"

[config_schema.font_size]
type = "integer"
default = 24

[config_schema.color]
type = "string"
"#;

    #[test]
    fn test_parse_toml() {
        let d = PluginDescriptor::parse(TOML_SAMPLE, DescriptorFormat::Toml).unwrap();
        assert_eq!(d.id.as_str(), "subtitle-screen");
        assert_eq!(d.version, Version::new(1, 2, 0));
        assert_eq!(d.category, PluginCategory::Output);
        assert!(d.enabled);
        assert_eq!(
            d.dependencies[&PluginId::from_static("console-input")],
            VersionConstraint::AtLeast(Version::new(0, 1, 0))
        );
        assert_eq!(d.default_config().get("font_size"), Some(&json!(24)));
        assert!(d.default_config().get("color").is_none());
    }

    #[test]
    fn test_parse_json_with_legacy_category() {
        let text = r#"{
            "id": "danmaku",
            "name": "Danmaku",
            "version": "0.3.1",
            "neuron_type": "sensor",
            "entry_point": "danmaku",
            "enabled": false
        }"#;
        let d = PluginDescriptor::parse(text, DescriptorFormat::Json).unwrap();
        assert_eq!(d.category, PluginCategory::Input);
        assert!(!d.enabled);
        assert_eq!(d.format, DescriptorFormat::Json);
    }

    #[test]
    fn test_invalid_descriptors() {
        for text in [
            "id = \"Bad Id\"\nname = \"x\"\nversion = \"1.0.0\"\nentry_point = \"x\"",
            "id = \"x\"\nname = \"x\"\nversion = \"one\"\nentry_point = \"x\"",
            "id = \"x\"\nname = \"x\"\nversion = \"1.0.0\"\nentry_point = \"x\"\n[dependencies]\ny = \"^1\"",
            "name = \"missing id\"",
        ] {
            assert!(
                matches!(
                    PluginDescriptor::parse(text, DescriptorFormat::Toml),
                    Err(PluginError::DescriptorParseError { .. })
                ),
                "{text}"
            );
        }
    }

    #[test]
    fn test_component_config_overlays_defaults() {
        let d = PluginDescriptor::parse(TOML_SAMPLE, DescriptorFormat::Toml).unwrap();
        let mut overrides = Payload::new();
        overrides.insert("font_size".into(), json!(30));
        overrides.insert("color".into(), json!("white"));
        let config = d.component_config(Some(&overrides));
        assert_eq!(config["font_size"], json!(30));
        assert_eq!(config["color"], json!("white"));
    }

    #[test]
    fn test_save_keeps_format() {
        let dir = tempfile::tempdir().unwrap();
        for format in [DescriptorFormat::Toml, DescriptorFormat::Json] {
            let path = dir.path().join(format.file_name());
            let mut d = PluginDescriptor::parse(TOML_SAMPLE, DescriptorFormat::Toml).unwrap();
            std::fs::write(&path, d.render(format).unwrap()).unwrap();

            d = PluginDescriptor::load(&path).unwrap();
            d.enabled = false;
            assert!(d.save().unwrap());

            let reloaded = PluginDescriptor::load(&path).unwrap();
            assert!(!reloaded.enabled);
            assert_eq!(reloaded.format, format);
            assert_eq!(reloaded.dependencies, d.dependencies);
        }
    }

    #[test]
    fn test_category_accepts() {
        assert!(PluginCategory::Input.accepts(ComponentKind::Input));
        assert!(!PluginCategory::Input.accepts(ComponentKind::Connector));
        assert!(!PluginCategory::Output.accepts(ComponentKind::Input));
        for kind in ComponentKind::ALL {
            assert!(PluginCategory::Generic.accepts(kind));
        }
    }
}
