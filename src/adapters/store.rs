//! Directory-backed blob store and calibration store.
//!
//! [`DirStore`] implements both [`ConfigPort`] and [`StoragePort`] over
//! a directory tree: one file per key at `<root>/<namespace>/<key>`.
//! Calibration curves are persisted per rig as postcard blobs in the
//! `calib` namespace, and can be exchanged as JSON documents.
//!
//! - Config validation: [`SystemConfig::validate`] runs before anything
//!   is persisted; invalid values are refused, never clamped.
//! - Writes go to a temporary file renamed over the key.

use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::app::ports::{ConfigError, ConfigPort, StorageError, StoragePort};
use crate::calibration::{CURVE_FORMAT_VERSION, CalibrationCurve};
use crate::config::SystemConfig;
use crate::error::Error;

const CONFIG_NAMESPACE: &str = "wellkeeper";
const CONFIG_KEY: &str = "syscfg";

/// Namespace holding one curve blob per rig.
pub const CURVE_NAMESPACE: &str = "calib";

/// Largest blob accepted on read.
const MAX_BLOB_SIZE: usize = 4000;

pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    /// Creates `root` if it does not exist.
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        info!("DirStore: {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File of `namespace::key`. Names that could escape the namespace
    /// directory are refused.
    fn path_for(&self, namespace: &str, key: &str) -> Result<PathBuf, StorageError> {
        if !is_plain_name(namespace) || !is_plain_name(key) {
            warn!("DirStore: refusing key '{namespace}::{key}'");
            return Err(StorageError::IoError);
        }
        Ok(self.root.join(namespace).join(key))
    }
}

fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && !name.starts_with('.') && !name.contains(['/', '\\'])
}

fn storage_error(e: &io::Error) -> StorageError {
    if e.kind() == ErrorKind::NotFound {
        StorageError::NotFound
    } else {
        StorageError::IoError
    }
}

impl ConfigPort for DirStore {
    fn load(&self) -> Result<SystemConfig, ConfigError> {
        let path = self
            .path_for(CONFIG_NAMESPACE, CONFIG_KEY)
            .map_err(|_| ConfigError::IoError)?;
        match fs::read(&path) {
            Ok(bytes) => {
                let cfg: SystemConfig = postcard::from_bytes(&bytes).map_err(|_| ConfigError::Corrupted)?;
                info!("DirStore: loaded config from {}", path.display());
                Ok(cfg)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("DirStore: no stored config, using defaults");
                Ok(SystemConfig::default())
            }
            Err(_) => Err(ConfigError::IoError),
        }
    }

    fn save(&self, config: &SystemConfig) -> Result<(), ConfigError> {
        config.validate().map_err(|e| match e {
            Error::Config(msg) => ConfigError::ValidationFailed(msg),
            _ => ConfigError::ValidationFailed("invalid configuration"),
        })?;
        let bytes = postcard::to_allocvec(config).map_err(|_| ConfigError::IoError)?;
        let path = self
            .path_for(CONFIG_NAMESPACE, CONFIG_KEY)
            .map_err(|_| ConfigError::IoError)?;
        write_atomic(&path, &bytes).map_err(|_| ConfigError::IoError)?;
        info!("DirStore: config saved");
        Ok(())
    }
}

impl StoragePort for DirStore {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        let data = fs::read(self.path_for(namespace, key)?).map_err(|e| storage_error(&e))?;
        if data.len() > buf.len() {
            return Err(StorageError::BufferTooSmall { needed: data.len() });
        }
        buf[..data.len()].copy_from_slice(&data);
        Ok(data.len())
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let path = self.path_for(namespace, key)?;
        write_atomic(&path, data).map_err(|e| storage_error(&e))
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path_for(namespace, key)?) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(StorageError::IoError),
            _ => Ok(()),
        }
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        self.path_for(namespace, key).is_ok_and(|p| p.is_file())
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, data)?;
    fs::rename(&tmp, path)
}

// ───────────────────────────────────────────────────────────────
// Calibration store
// ───────────────────────────────────────────────────────────────

/// Persist `curve` under its rig identifier.
pub fn save_curve(storage: &mut impl StoragePort, curve: &CalibrationCurve) -> Result<(), ConfigError> {
    let bytes = postcard::to_allocvec(curve).map_err(|_| ConfigError::IoError)?;
    storage
        .write(CURVE_NAMESPACE, &curve.rig_id, &bytes)
        .map_err(|_| ConfigError::IoError)?;
    info!("calibration store: saved curve for rig '{}' ({} B)", curve.rig_id, bytes.len());
    Ok(())
}

/// Load the curve of `rig_id`. Blobs from another format version are
/// reported as corrupted and must be re-fitted.
pub fn load_curve(storage: &impl StoragePort, rig_id: &str) -> Result<CalibrationCurve, ConfigError> {
    let mut buf = [0u8; MAX_BLOB_SIZE];
    let len = storage
        .read(CURVE_NAMESPACE, rig_id, &mut buf)
        .map_err(|e| match e {
            StorageError::NotFound => ConfigError::NotFound,
            StorageError::BufferTooSmall { .. } => ConfigError::Corrupted,
            StorageError::IoError => ConfigError::IoError,
        })?;
    let curve: CalibrationCurve = postcard::from_bytes(&buf[..len]).map_err(|_| ConfigError::Corrupted)?;
    check_version(&curve)?;
    Ok(curve)
}

/// Pretty JSON document of a curve.
pub fn curve_to_json(curve: &CalibrationCurve) -> Result<String, ConfigError> {
    serde_json::to_string_pretty(curve).map_err(|_| ConfigError::IoError)
}

pub fn curve_from_json(json: &str) -> Result<CalibrationCurve, ConfigError> {
    let curve: CalibrationCurve = serde_json::from_str(json).map_err(|_| ConfigError::Corrupted)?;
    check_version(&curve)?;
    Ok(curve)
}

fn check_version(curve: &CalibrationCurve) -> Result<(), ConfigError> {
    if curve.format_version != CURVE_FORMAT_VERSION {
        warn!(
            "calibration store: rig '{}' curve is format v{}, expected v{}",
            curve.rig_id, curve.format_version, CURVE_FORMAT_VERSION
        );
        return Err(ConfigError::Corrupted);
    }
    Ok(())
}
