//! Plugin descriptor fixtures.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use semver::Version;
use synapse_component::{Component, ComponentKind};
use synapse_plugins::{FactoryRegistry, PluginCategory, PluginDescriptor, PluginId};
use tempfile::TempDir;

use crate::mocks::{Journal, RecordingComponent};

/// An in-memory descriptor.
///
/// # Panics
///
/// Panics if `id` or `version` is malformed.
#[must_use]
pub fn test_descriptor(
    id: &str,
    version: &str,
    category: PluginCategory,
    entry_point: &str,
) -> PluginDescriptor {
    PluginDescriptor::new(
        PluginId::new(id).expect("valid plugin id"),
        Version::parse(version).expect("valid semver"),
        category,
        entry_point,
    )
}

/// A temporary plugin directory populated with descriptor files.
#[derive(Debug)]
pub struct PluginTree {
    dir: TempDir,
}

impl PluginTree {
    /// Create an empty tree.
    ///
    /// # Panics
    ///
    /// Panics if the temporary directory cannot be created.
    #[must_use]
    pub fn new() -> Self {
        Self {
            dir: TempDir::with_prefix("synapse-plugins-").expect("Failed to create temp directory"),
        }
    }

    /// Root of the tree.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `<root>/<id>/plugin.toml` with `category = "generic"`.
    pub fn plugin(&self, id: &str, version: &str, entry_point: &str, deps: &[(&str, &str)]) -> PathBuf {
        self.plugin_with(id, version, entry_point, deps, "")
    }

    /// Like [`plugin`](Self::plugin), appending `extra` top-level TOML
    /// (e.g. `category = "input"` or `enabled = false`).
    ///
    /// # Panics
    ///
    /// Panics if the files cannot be written.
    pub fn plugin_with(
        &self,
        id: &str,
        version: &str,
        entry_point: &str,
        deps: &[(&str, &str)],
        extra: &str,
    ) -> PathBuf {
        let dir = self.dir.path().join(id);
        std::fs::create_dir_all(&dir).expect("Failed to create plugin directory");
        let mut text = format!(
            "id = \"{id}\"\nname = \"{id}\"\nversion = \"{version}\"\nentry_point = \"{entry_point}\"\n{extra}\n"
        );
        if !deps.is_empty() {
            text.push_str("[dependencies]\n");
            for (dep, constraint) in deps {
                let _ = writeln!(text, "{dep} = \"{constraint}\"");
            }
        }
        let path = dir.join("plugin.toml");
        std::fs::write(&path, text).expect("Failed to write plugin.toml");
        path
    }

    /// Write `<root>/<id>/plugin.json` from a JSON value.
    ///
    /// # Panics
    ///
    /// Panics if the files cannot be written.
    pub fn json_plugin(&self, id: &str, body: &serde_json::Value) -> PathBuf {
        let dir = self.dir.path().join(id);
        std::fs::create_dir_all(&dir).expect("Failed to create plugin directory");
        let path = dir.join("plugin.json");
        std::fs::write(&path, body.to_string()).expect("Failed to write plugin.json");
        path
    }

    /// Write arbitrary text to `<root>/<relative>`.
    ///
    /// # Panics
    ///
    /// Panics if the file cannot be written.
    pub fn raw(&self, relative: &str, text: &str) -> PathBuf {
        let path = self.dir.path().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directory");
        }
        std::fs::write(&path, text).expect("Failed to write file");
        path
    }
}

impl Default for PluginTree {
    fn default() -> Self {
        Self::new()
    }
}

/// Factories for the entry points `input`, `output` and `connector`, each
/// building a [`RecordingComponent`] named after the plugin id and writing
/// to `journal`.
#[must_use]
pub fn recording_factories(journal: &Journal) -> FactoryRegistry {
    let mut registry = FactoryRegistry::new();
    for (entry_point, kind) in [
        ("input", ComponentKind::Input),
        ("output", ComponentKind::Output),
        ("connector", ComponentKind::Connector),
    ] {
        let journal = journal.clone();
        registry.register(entry_point, move |d: &PluginDescriptor| {
            Ok(Box::new(
                RecordingComponent::new(d.id.as_str(), kind).with_journal(journal.clone()),
            ) as Box<dyn Component>)
        });
    }
    registry
}
