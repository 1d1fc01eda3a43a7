//! On-disk CNI configuration and plugin binaries

use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::conflist::ConfList;
use crate::error::Result;

/// Genie's own configuration file, never a delegate
pub const GENIE_CONF_FILE: &str = "00-genie.conf";
const GENIE_TYPE: &str = "genie";

#[derive(Debug, Clone)]
pub struct CniDir {
    net_dir: PathBuf,
    bin_dirs: Vec<PathBuf>,
}

impl CniDir {
    pub fn new(net_dir: impl Into<PathBuf>, bin_dirs: Vec<PathBuf>) -> Self {
        Self {
            net_dir: net_dir.into(),
            bin_dirs,
        }
    }

    pub fn net_dir(&self) -> &Path {
        &self.net_dir
    }

    pub fn bin_dirs(&self) -> &[PathBuf] {
        &self.bin_dirs
    }

    /// `.conf` / `.conflist` files in lexical order; a missing directory is empty
    pub fn config_files(&self) -> Result<Vec<PathBuf>> {
        let entries = match std::fs::read_dir(&self.net_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let is_conf = matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("conf") | Some("conflist")
            );
            if is_conf && path.is_file() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// First config file whose file name contains `plugin`
    pub fn find_plugin_config(&self, plugin: &str) -> Result<Option<PathBuf>> {
        Ok(self.config_files()?.into_iter().find(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n != GENIE_CONF_FILE && n.contains(plugin))
                .unwrap_or(false)
        }))
    }

    /// Network named `name`: `.conflist` files first, then `.conf`
    pub fn load_by_name(&self, name: &str) -> Result<Option<ConfList>> {
        let files = self.config_files()?;
        let (lists, confs): (Vec<_>, Vec<_>) = files
            .into_iter()
            .partition(|p| p.extension().and_then(|e| e.to_str()) == Some("conflist"));

        for path in lists.iter().chain(confs.iter()) {
            match ConfList::from_file(path) {
                Ok(list) if list.name == name => return Ok(Some(list)),
                Ok(_) => {}
                Err(e) => debug!(path = %path.display(), error = %e, "Skipping unreadable CNI config"),
            }
        }
        Ok(None)
    }

    /// The cluster default network: the first usable config that is not genie's own
    pub fn cluster_default(&self) -> Result<Option<ConfList>> {
        for path in self.config_files()? {
            if path.file_name().and_then(|n| n.to_str()) == Some(GENIE_CONF_FILE) {
                continue;
            }
            match ConfList::from_file(&path) {
                Ok(list) if list.primary_type() == GENIE_TYPE => continue,
                Ok(list) => return Ok(Some(list)),
                Err(e) => warn!(path = %path.display(), error = %e, "Ignoring invalid CNI config"),
            }
        }
        Ok(None)
    }

    pub fn find_binary(&self, plugin: &str) -> Option<PathBuf> {
        self.bin_dirs
            .iter()
            .map(|dir| dir.join(plugin))
            .find(|path| path.is_file())
    }

    /// Persist a synthesized single-plugin config with mode 0644
    pub fn write_conf(&self, file_name: &str, conf: &Value) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.net_dir)?;
        let path = self.net_dir.join(file_name);
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o644)
            .open(&path)?;
        file.write_all(&serde_json::to_vec_pretty(conf)?)?;
        // umask may have narrowed the create mode
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644))?;
        Ok(path)
    }
}
