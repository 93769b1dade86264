//! Namespace configuration.
//!
//! Configs are RON documents describing the descriptor table size and a set
//! of in-memory peers to mount:
//!
//! ```ron
//! (
//!     fd_capacity: 256,
//!     log_filter: Some("nsfd_kernel=debug"),
//!     mounts: [
//!         (path: "/svc", files: ["logger", "pkg/bin/tool"]),
//!         (path: "/data/cache", files: [], data: {"motd": "hello"}),
//!     ],
//! )
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backends::MemoryPeer;
use crate::error::NsError;
use crate::fdtable::MAX_FD;
use crate::namespace::Namespace;
use crate::resolver::IoContext;

/// Error type for config loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("namespace error: {0}")]
    Namespace(#[from] NsError),
}

/// An in-memory peer to seed and mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountSpec {
    /// Rooted mount path.
    pub path: String,
    /// Empty files to create, relative to the peer root.
    #[serde(default)]
    pub files: Vec<String>,
    /// Files with contents.
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

/// Top-level namespace config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceConfig {
    /// Descriptor table size.
    #[serde(default = "default_fd_capacity")]
    pub fd_capacity: usize,
    /// Peers to mount, in bind order.
    #[serde(default)]
    pub mounts: Vec<MountSpec>,
    /// Default tracing directive when `RUST_LOG` is unset.
    #[serde(default)]
    pub log_filter: Option<String>,
}

fn default_fd_capacity() -> usize {
    MAX_FD
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            fd_capacity: default_fd_capacity(),
            mounts: Vec::new(),
            log_filter: None,
        }
    }
}

impl NamespaceConfig {
    /// Parse and validate a RON document.
    pub fn from_ron_str(text: &str) -> Result<Self, ConfigError> {
        let config: NamespaceConfig = ron::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a RON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_ron_str(&text)?;
        tracing::debug!(
            path = %path.display(),
            mounts = config.mounts.len(),
            "loaded namespace config"
        );
        Ok(config)
    }

    /// Check bounds and mount paths.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fd_capacity == 0 || self.fd_capacity > MAX_FD {
            return Err(ConfigError::Invalid(format!(
                "fd_capacity {} outside 1..={MAX_FD}",
                self.fd_capacity
            )));
        }
        for mount in &self.mounts {
            if !mount.path.starts_with('/') {
                return Err(ConfigError::Invalid(format!(
                    "mount path {} is not rooted",
                    mount.path
                )));
            }
        }
        Ok(())
    }

    /// Build a namespace with every mount bound and wrap it in a context.
    pub fn build(&self) -> Result<IoContext, ConfigError> {
        self.validate()?;
        let ns = Namespace::new();
        for mount in &self.mounts {
            let peer = MemoryPeer::new(mount.path.clone());
            for file in &mount.files {
                peer.add_file(file, b"")?;
            }
            for (file, contents) in &mount.data {
                peer.add_file(file, contents.as_bytes())?;
            }
            ns.bind(&mount.path, Arc::new(peer))?;
        }
        Ok(IoContext::with_capacity(ns, self.fd_capacity)?)
    }
}
