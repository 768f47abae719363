//! The resolved configuration and its display forms.

use std::path::PathBuf;

use crate::error::{ConfigError, ConfigResult};
use crate::merge::{ConfigLayer, FieldSources};
use crate::types::Config;

/// Output format for [`ResolvedConfig::render`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ShowFormat {
    /// TOML, loadable as a config file.
    #[default]
    Toml,
    /// Pretty-printed JSON.
    Json,
}

/// A validated configuration plus where each value came from.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// The final configuration.
    pub config: Config,
    /// Dotted field path to the layer that set it.
    pub field_sources: FieldSources,
    /// Config files that were merged, in order.
    pub loaded_files: Vec<PathBuf>,
}

impl ResolvedConfig {
    /// Which layer set `field` (a dotted path such as `plugins.auto_load`).
    #[must_use]
    pub fn source_of(&self, field: &str) -> Option<&ConfigLayer> {
        self.field_sources.get(field)
    }

    /// Fields set by something other than the embedded defaults, sorted.
    #[must_use]
    pub fn overridden_fields(&self) -> Vec<(&str, &ConfigLayer)> {
        let mut fields: Vec<_> = self
            .field_sources
            .iter()
            .filter(|(_, layer)| **layer != ConfigLayer::Defaults)
            .map(|(field, layer)| (field.as_str(), layer))
            .collect();
        fields.sort_by(|a, b| a.0.cmp(b.0));
        fields
    }

    /// Render the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::SerializeError`] if a value has no
    /// representation in the target format (e.g. a JSON `null` in TOML).
    pub fn render(&self, format: ShowFormat) -> ConfigResult<String> {
        match format {
            ShowFormat::Toml => toml::to_string_pretty(&self.config)
                .map_err(|e| ConfigError::SerializeError(e.to_string())),
            ShowFormat::Json => serde_json::to_string_pretty(&self.config)
                .map_err(|e| ConfigError::SerializeError(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved() -> ResolvedConfig {
        let mut config = Config::default();
        config.bus.queue_warn_depth = 7;
        let mut field_sources = FieldSources::new();
        field_sources.insert("bus.queue_warn_depth".into(), ConfigLayer::File("a.toml".into()));
        field_sources.insert("logging.level".into(), ConfigLayer::Defaults);
        ResolvedConfig {
            config,
            field_sources,
            loaded_files: vec![PathBuf::from("a.toml")],
        }
    }

    #[test]
    fn test_toml_render_reloads() {
        let text = resolved().render(ShowFormat::Toml).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.bus.queue_warn_depth, 7);
        assert_eq!(parsed, resolved().config);
    }

    #[test]
    fn test_json_render() {
        let text = resolved().render(ShowFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["bus"]["queue_warn_depth"], 7);
    }

    #[test]
    fn test_overridden_fields() {
        let r = resolved();
        let fields = r.overridden_fields();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].0, "bus.queue_warn_depth");
    }
}
