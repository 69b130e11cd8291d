//! File-based control channel between a running daemon and the CLI.
//!
//! ```text
//! <catalog>/.daemon/
//!   ├── status.json   (rewritten by the daemon every status interval)
//!   └── stop          (created by `daemon stop`, removed on shutdown)
//! ```

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use log::debug;

use super::model::DaemonStatus;
use crate::constants::DAEMON_DIR;
use crate::errors::Result;

const STATUS_FILE: &str = "status.json";
const STOP_FILE: &str = "stop";

#[derive(Clone, Debug)]
pub struct DaemonControl {
    dir: PathBuf,
}

impl DaemonControl {
    /// Control directory under `catalog_root`.
    pub fn new(catalog_root: impl AsRef<Path>) -> Self {
        Self {
            dir: catalog_root.as_ref().join(DAEMON_DIR),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn status_path(&self) -> PathBuf {
        self.dir.join(STATUS_FILE)
    }

    pub fn stop_path(&self) -> PathBuf {
        self.dir.join(STOP_FILE)
    }

    /// Replace the status file. Readers never see a partial document.
    pub fn write_status(&self, status: &DaemonStatus) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let tmp = self.dir.join(format!("{}.tmp", STATUS_FILE));
        fs::write(&tmp, serde_json::to_vec_pretty(status)?)?;
        fs::rename(&tmp, self.status_path())?;
        debug!("Wrote daemon status to {}", self.status_path().display());
        Ok(())
    }

    /// Last published status, or `None` if no daemon has run here.
    pub fn read_status(&self) -> Result<Option<DaemonStatus>> {
        match fs::read(self.status_path()) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Ask a running daemon to stop.
    pub fn request_stop(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.stop_path(), Utc::now().to_rfc3339())?;
        Ok(())
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_path().exists()
    }

    pub fn clear_stop(&self) -> Result<()> {
        match fs::remove_file(self.stop_path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Poll for the stop marker every `poll`.
    pub async fn wait_for_stop(&self, poll: Duration) {
        while !self.stop_requested() {
            tokio::time::sleep(poll).await;
        }
    }
}
