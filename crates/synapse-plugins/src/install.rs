//! Installing plugin directories into a plugin root.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};
use walkdir::WalkDir;

use crate::descriptor::{
    DescriptorFormat, JSON_DESCRIPTOR, PluginCategory, PluginDescriptor, TOML_DESCRIPTOR,
};
use crate::error::{PluginError, PluginResult};

/// Copies plugin directories into `<root>/{inputs,outputs,generic}/<id>`.
#[derive(Debug, Clone)]
pub struct Installer {
    root: PathBuf,
}

impl Installer {
    /// Create an installer targeting `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The plugin root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where a descriptor's plugin is installed.
    #[must_use]
    pub fn target_dir(&self, descriptor: &PluginDescriptor) -> PathBuf {
        let group = match descriptor.category {
            PluginCategory::Input => "inputs",
            PluginCategory::Output => "outputs",
            PluginCategory::Generic => "generic",
        };
        self.root.join(group).join(descriptor.id.as_str())
    }

    /// Install the plugin in `src`, which must hold a descriptor.
    ///
    /// An existing install is moved aside to `<id>_backup_<unix-ts>` first.
    ///
    /// # Errors
    ///
    /// Returns an error if `src` has no valid descriptor or copying fails.
    pub fn install_from_directory(&self, src: &Path) -> PluginResult<PluginDescriptor> {
        let descriptor = read_descriptor(src)?;
        let target = self.target_dir(&descriptor);

        if target.exists() {
            let stamp = chrono::Utc::now().timestamp();
            let mut backup = target.clone().into_os_string();
            backup.push(format!("_backup_{stamp}"));
            let backup = PathBuf::from(backup);
            fs::rename(&target, &backup)?;
            info!(
                plugin_id = %descriptor.id,
                backup = %backup.display(),
                "Moved existing plugin install aside"
            );
        }

        copy_tree(src, &target)?;
        let installed = read_descriptor(&target)?;
        info!(
            plugin_id = %installed.id,
            version = %installed.version,
            path = %target.display(),
            "Plugin installed"
        );
        Ok(installed)
    }

    /// Remove an installed plugin's directory. Returns `false` for built-ins
    /// and for plugins living outside this root.
    ///
    /// # Errors
    ///
    /// Returns an error if removal fails.
    pub fn uninstall(&self, descriptor: &PluginDescriptor) -> PluginResult<bool> {
        let Some(dir) = descriptor.directory() else {
            return Ok(false);
        };
        if !dir.starts_with(&self.root) || dir == self.root {
            warn!(
                plugin_id = %descriptor.id,
                path = %dir.display(),
                "Refusing to uninstall a plugin outside the plugin root"
            );
            return Ok(false);
        }
        fs::remove_dir_all(dir)?;
        info!(plugin_id = %descriptor.id, path = %dir.display(), "Plugin uninstalled");
        Ok(true)
    }
}

fn read_descriptor(dir: &Path) -> PluginResult<PluginDescriptor> {
    let toml = dir.join(TOML_DESCRIPTOR);
    if toml.is_file() {
        return PluginDescriptor::load(&toml);
    }
    let json = dir.join(JSON_DESCRIPTOR);
    if json.is_file() {
        return PluginDescriptor::load(&json);
    }
    Err(PluginError::DescriptorParseError {
        path: dir.to_path_buf(),
        message: format!(
            "no {} or {} in plugin directory",
            DescriptorFormat::Toml.file_name(),
            DescriptorFormat::Json.file_name()
        ),
    })
}

fn copy_tree(src: &Path, dst: &Path) -> PluginResult<()> {
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(|e| {
            PluginError::Io(e.into_io_error().unwrap_or_else(|| {
                std::io::Error::other("filesystem loop while copying plugin")
            }))
        })?;
        let Ok(relative) = entry.path().strip_prefix(src) else {
            continue;
        };
        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
