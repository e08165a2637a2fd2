use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use smsgate_core::{ActivationRecord, ActivationRepository, StoreError};
use thiserror::Error;
use tracing::warn;

/// Upper bound on `activation_state.json`; larger files are rejected unread.
pub const MAX_STATE_FILE_BYTES: u64 = 64 * 1024;
pub const STATE_FILE_NAME: &str = "activation_state.json";

#[derive(Debug, Error)]
pub enum StateFileError {
    #[error("cannot stat state file: {0}")]
    Metadata(#[source] io::Error),
    #[error("state file too large: {size} bytes (max {max})")]
    TooLarge { size: u64, max: u64 },
    #[error("cannot read state file: {0}")]
    Read(#[source] io::Error),
    #[error("invalid state JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("cannot create state directory: {0}")]
    CreateDir(#[source] io::Error),
    #[error("cannot write staged record: {0}")]
    WriteTmp(#[source] io::Error),
    #[error("cannot move staged record into place: {0}")]
    Rename(#[source] io::Error),
}

pub fn parse_state_json(data: &str) -> Result<ActivationRecord, serde_json::Error> {
    serde_json::from_str::<ActivationRecord>(data)
}

/// Loads the record at `path`. A missing file is a fresh install and yields
/// the default (unactivated) record.
pub fn load_state_from_path(path: &Path) -> Result<ActivationRecord, StateFileError> {
    let meta = match fs::metadata(path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Ok(ActivationRecord::default());
        }
        Err(err) => return Err(StateFileError::Metadata(err)),
    };
    if meta.len() > MAX_STATE_FILE_BYTES {
        return Err(StateFileError::TooLarge {
            size: meta.len(),
            max: MAX_STATE_FILE_BYTES,
        });
    }

    let data = fs::read_to_string(path).map_err(StateFileError::Read)?;
    Ok(parse_state_json(&data)?)
}

/// Writes the record next to `path` and renames it over the old one, so a
/// reader sees either the previous record or the new one, never neither.
pub fn save_state_to_path(path: &Path, record: &ActivationRecord) -> Result<(), StateFileError> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(StateFileError::CreateDir)?;
    }

    let payload = serde_json::to_vec_pretty(record)?;
    let staged = path.with_extension("json.tmp");
    fs::write(&staged, payload).map_err(StateFileError::WriteTmp)?;

    // `rename` replaces an existing target on both Unix and Windows.
    if let Err(err) = fs::rename(&staged, path) {
        if let Err(cleanup) = fs::remove_file(&staged) {
            warn!("leaving staged state file behind: {}", cleanup);
        }
        return Err(StateFileError::Rename(err));
    }
    Ok(())
}

pub fn save_state_with_retry(path: &Path, record: &ActivationRecord) -> Result<(), StateFileError> {
    const MAX_ATTEMPTS: u32 = 3;
    const BACKOFF_BASE_MS: u64 = 50;

    let mut attempt = 1;
    loop {
        match save_state_to_path(path, record) {
            Ok(()) => return Ok(()),
            Err(err) if attempt >= MAX_ATTEMPTS => return Err(err),
            Err(err) => {
                warn!(attempt, "saving activation state failed: {}", err);
                let backoff_ms = BACKOFF_BASE_MS.saturating_mul(1_u64 << (attempt - 1));
                std::thread::sleep(Duration::from_millis(backoff_ms));
                attempt += 1;
            }
        }
    }
}

/// Activation record persisted as JSON in the state directory.
#[derive(Debug, Clone)]
pub struct FileRepository {
    path: PathBuf,
}

impl FileRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(STATE_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ActivationRepository for FileRepository {
    fn load(&self) -> Result<ActivationRecord, StoreError> {
        load_state_from_path(&self.path)
            .map_err(|err| StoreError::Load(format!("{}: {err}", self.path.display())))
    }

    fn save(&self, record: &ActivationRecord) -> Result<(), StoreError> {
        save_state_with_retry(&self.path, record)
            .map_err(|err| StoreError::Save(format!("{}: {err}", self.path.display())))
    }
}
