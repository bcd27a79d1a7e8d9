//! Per-well append-only volume log.
//!
//! Writes one JSON line per feedback cycle to `<dir>/<well>_volume.log`.
//! Uploading the files is left to whatever watches the directory.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use log::warn;

use crate::app::events::AppEvent;
use crate::app::ports::EventSink;
use crate::control::VolumeLogRecord;
use crate::well::WellId;

pub struct VolumeLogSink {
    dir: PathBuf,
}

impl VolumeLogSink {
    /// Creates `dir` if it does not exist.
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Log file of `well`. Identifiers never contain path separators.
    pub fn path_for(&self, well: &WellId) -> PathBuf {
        self.dir.join(format!("{}_volume.log", well))
    }

    pub fn append(&self, record: &VolumeLogRecord) -> io::Result<()> {
        let mut line = serde_json::to_vec(record).map_err(io::Error::other)?;
        line.push(b'\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(&record.well))?;
        file.write_all(&line)
    }
}

impl EventSink for VolumeLogSink {
    fn emit(&self, event: &AppEvent) {
        if let AppEvent::VolumeLogged(record) = event {
            if let Err(e) = self.append(record) {
                warn!("volume log {}: append failed: {}", record.well, e);
            }
        }
    }
}
