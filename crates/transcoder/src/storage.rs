//! Storage provisioning for the input and output library roots.
//!
//! The batch only ever sees local directory paths. With the `cifs` backend
//! those are temporary mount points for the configured shares.

use crate::catalog::CatalogKind;
use crate::config::{LibraryLocation, StorageBackend, StorageConfig};
use async_trait::async_trait;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::{NamedTempFile, TempDir};
use thiserror::Error;
use tokio::process::Command;

/// Error type for storage provisioning
#[derive(Debug, Error)]
pub enum StorageError {
    /// A location was not configured for this catalog
    #[error("no {side} location configured for {kind}")]
    NotConfigured { kind: &'static str, side: &'static str },

    /// A local input root does not exist
    #[error("input directory does not exist: {0}")]
    MissingDirectory(PathBuf),

    /// mount/umount failed
    #[error("{action} of {target} failed: {reason}")]
    Mount {
        action: &'static str,
        target: String,
        reason: String,
    },

    /// Root was not provisioned by this provider
    #[error("{0} was not provisioned by this provider")]
    UnknownRoot(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Makes library roots available as local paths for the duration of a run.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    async fn provision_input(&self) -> Result<PathBuf, StorageError>;
    async fn provision_output(&self) -> Result<PathBuf, StorageError>;
    /// Tears down a root returned by one of the provision calls.
    async fn release(&self, root: &Path) -> Result<(), StorageError>;
}

fn location<'a>(
    location: &'a LibraryLocation,
    kind: CatalogKind,
    side: &'static str,
) -> Result<&'a str, StorageError> {
    let value = match side {
        "input" => location.input.as_deref(),
        _ => location.output.as_deref(),
    };
    value.filter(|v| !v.trim().is_empty()).ok_or(StorageError::NotConfigured {
        kind: kind.as_str(),
        side,
    })
}

/// Builds the provider for one catalog from configuration.
pub fn provider_for(
    cfg: &StorageConfig,
    kind: CatalogKind,
) -> Result<Box<dyn StorageProvider>, StorageError> {
    let loc = match kind {
        CatalogKind::Series => &cfg.series,
        CatalogKind::Movies => &cfg.movies,
    };
    let input = location(loc, kind, "input")?;
    let output = location(loc, kind, "output")?;

    match cfg.backend {
        StorageBackend::Local => Ok(Box::new(LocalStorage::new(input, output))),
        StorageBackend::Cifs => Ok(Box::new(CifsStorage::new(
            input,
            output,
            cfg.username.clone().unwrap_or_default(),
            cfg.password.clone().unwrap_or_default(),
        ))),
    }
}

/// Plain local directories.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    input: PathBuf,
    output: PathBuf,
}

impl LocalStorage {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
        }
    }
}

#[async_trait]
impl StorageProvider for LocalStorage {
    async fn provision_input(&self) -> Result<PathBuf, StorageError> {
        if !self.input.is_dir() {
            return Err(StorageError::MissingDirectory(self.input.clone()));
        }
        Ok(self.input.clone())
    }

    /// Creates the output root when it does not exist yet.
    async fn provision_output(&self) -> Result<PathBuf, StorageError> {
        tokio::fs::create_dir_all(&self.output).await?;
        Ok(self.output.clone())
    }

    async fn release(&self, _root: &Path) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Content of a mount.cifs credentials file.
pub fn credentials_content(username: &str, password: &str) -> String {
    format!("username={}\npassword={}\n", username, password)
}

/// Arguments for `mount` attaching `share` at `mount_point`.
pub fn mount_args(share: &str, mount_point: &Path, credentials: &Path, read_only: bool) -> Vec<OsString> {
    let mut options = OsString::from("credentials=");
    options.push(credentials);
    if read_only {
        options.push(",ro");
    }

    vec![
        OsString::from("-t"),
        OsString::from("cifs"),
        OsString::from(share),
        mount_point.as_os_str().to_owned(),
        OsString::from("-o"),
        options,
    ]
}

/// CIFS shares mounted into temporary directories.
///
/// Requires privileges to run `mount -t cifs`.
#[derive(Debug)]
pub struct CifsStorage {
    input_share: String,
    output_share: String,
    username: String,
    password: String,
    mounts: Mutex<HashMap<PathBuf, TempDir>>,
}

impl CifsStorage {
    pub fn new(
        input_share: impl Into<String>,
        output_share: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            input_share: input_share.into(),
            output_share: output_share.into(),
            username: username.into(),
            password: password.into(),
            mounts: Mutex::new(HashMap::new()),
        }
    }

    fn write_credentials(&self) -> Result<NamedTempFile, StorageError> {
        // NamedTempFile is created with 0600 permissions
        let mut file = NamedTempFile::new()?;
        file.write_all(credentials_content(&self.username, &self.password).as_bytes())?;
        file.flush()?;
        Ok(file)
    }

    async fn mount(&self, share: &str, read_only: bool) -> Result<PathBuf, StorageError> {
        let mount_point = TempDir::new()?;
        let credentials = self.write_credentials()?;

        info!("Mounting {} at {}", share, mount_point.path().display());
        let output = Command::new("mount")
            .args(mount_args(share, mount_point.path(), credentials.path(), read_only))
            .kill_on_drop(true)
            .output()
            .await?;
        drop(credentials);

        if !output.status.success() {
            return Err(StorageError::Mount {
                action: "mount",
                target: share.to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let root = mount_point.path().to_path_buf();
        self.mounts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(root.clone(), mount_point);
        Ok(root)
    }
}

#[async_trait]
impl StorageProvider for CifsStorage {
    async fn provision_input(&self) -> Result<PathBuf, StorageError> {
        self.mount(&self.input_share, true).await
    }

    async fn provision_output(&self) -> Result<PathBuf, StorageError> {
        self.mount(&self.output_share, false).await
    }

    /// Unmounts the share and removes the mount point.
    async fn release(&self, root: &Path) -> Result<(), StorageError> {
        let mount_point = self
            .mounts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(root)
            .ok_or_else(|| StorageError::UnknownRoot(root.to_path_buf()))?;

        debug!("Unmounting {}", root.display());
        let output = Command::new("umount").arg(root).kill_on_drop(true).output().await?;
        if !output.status.success() {
            let reason = String::from_utf8_lossy(&output.stderr).trim().to_string();
            // still mounted: removing the directory would fail or recurse into the share
            let _ = mount_point.into_path();
            warn!("Leaving mount point {} in place", root.display());
            return Err(StorageError::Mount {
                action: "umount",
                target: root.display().to_string(),
                reason,
            });
        }

        mount_point.close()?;
        Ok(())
    }
}
