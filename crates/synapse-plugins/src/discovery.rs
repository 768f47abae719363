//! Descriptor discovery.
//!
//! Walks plugin directories recursively for `plugin.toml` / `plugin.json`
//! files. A directory holding both uses `plugin.toml`. Invalid descriptors
//! are logged and skipped; they never abort discovery.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::descriptor::{DescriptorFormat, PluginDescriptor, TOML_DESCRIPTOR};
use crate::id::PluginId;

/// Discover descriptors in every directory, in order.
///
/// The first descriptor seen for an id wins; later duplicates are ignored
/// with a warning. Missing directories are skipped.
#[must_use]
pub fn discover(dirs: &[PathBuf]) -> BTreeMap<PluginId, PluginDescriptor> {
    let mut found = BTreeMap::new();
    for dir in dirs {
        if !dir.is_dir() {
            debug!(path = %dir.display(), "Plugin directory does not exist");
            continue;
        }
        info!(path = %dir.display(), "Discovering plugins");
        for descriptor in scan_dir(dir) {
            merge(&mut found, descriptor);
        }
    }
    info!(count = found.len(), "Discovered plugin descriptors");
    found
}

/// Insert a descriptor unless its id is already known.
pub(crate) fn merge(
    found: &mut BTreeMap<PluginId, PluginDescriptor>,
    descriptor: PluginDescriptor,
) -> bool {
    if let Some(existing) = found.get(&descriptor.id) {
        warn!(
            plugin_id = %descriptor.id,
            kept = ?existing.path,
            ignored = ?descriptor.path,
            "Duplicate plugin id ignored"
        );
        return false;
    }
    found.insert(descriptor.id.clone(), descriptor);
    true
}

/// Load every valid descriptor below `dir`.
#[must_use]
pub fn scan_dir(dir: &Path) -> Vec<PluginDescriptor> {
    let mut descriptors = Vec::new();
    for entry in WalkDir::new(dir).follow_links(true).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "Failed to walk plugin directory");
                continue;
            },
        };
        let path = entry.path();
        let Some(format) = DescriptorFormat::from_path(path) else {
            continue;
        };
        if format == DescriptorFormat::Json
            && path.with_file_name(TOML_DESCRIPTOR).is_file()
        {
            debug!(path = %path.display(), "Skipping plugin.json shadowed by plugin.toml");
            continue;
        }
        match PluginDescriptor::load(path) {
            Ok(descriptor) => {
                debug!(
                    path = %path.display(),
                    plugin_id = %descriptor.id,
                    version = %descriptor.version,
                    "Loaded plugin descriptor"
                );
                descriptors.push(descriptor);
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping invalid plugin descriptor");
            },
        }
    }
    descriptors
}
