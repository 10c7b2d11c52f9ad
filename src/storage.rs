//! Persistent chat log
//!
//! The whole log lives in memory and is rewritten to a single JSON file on
//! every append. Writes go to a sibling temporary file first and are renamed
//! into place, so readers never see a half-written array.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use crate::error::AppError;
use crate::message::ChatEntry;

/// Storage capability used by the chat hub
pub trait ChatLog: Send {
    /// Current ordered entries
    fn all(&self) -> &[ChatEntry];

    /// Append one entry and persist the full sequence
    ///
    /// May block on file I/O; the hub calls it from the blocking pool.
    /// On `StorageWriteError` the entry is still kept in memory.
    fn append(&mut self, entry: ChatEntry) -> Result<(), AppError>;

    /// Flush pending state. Safe to call more than once.
    fn close(&mut self) -> Result<(), AppError>;
}

/// Chat log backed by one JSON array file
#[derive(Debug)]
pub struct JsonFileLog {
    path: PathBuf,
    entries: Vec<ChatEntry>,
    closed: bool,
}

impl JsonFileLog {
    /// Load the log from `path`
    ///
    /// A missing file is an empty log; the file appears with the first
    /// append. Any other read or parse failure is `StorageUnavailable`.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, AppError> {
        let path = path.into();
        let entries = read_entries(&path)?;
        info!("Loaded {} chat entries from {}", entries.len(), path.display());
        Ok(Self {
            path,
            entries,
            closed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> Result<(), AppError> {
        let write_error = |e: std::io::Error| AppError::StorageWriteError {
            path: self.path.clone(),
            reason: e.to_string(),
        };

        let mut json = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut json, formatter);
        self.entries
            .serialize(&mut serializer)
            .map_err(|e| AppError::StorageWriteError {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;

        let tmp_path = temp_path(&self.path);
        let mut file = fs::File::create(&tmp_path).map_err(write_error)?;
        file.write_all(&json).map_err(write_error)?;
        file.sync_all().map_err(write_error)?;
        fs::rename(&tmp_path, &self.path).map_err(write_error)?;
        Ok(())
    }
}

impl ChatLog for JsonFileLog {
    fn all(&self) -> &[ChatEntry] {
        &self.entries
    }

    fn append(&mut self, entry: ChatEntry) -> Result<(), AppError> {
        self.entries.push(entry);

        if self.closed {
            return Err(AppError::StorageWriteError {
                path: self.path.clone(),
                reason: "log is closed".to_string(),
            });
        }
        self.persist()
    }

    fn close(&mut self) -> Result<(), AppError> {
        if !self.closed {
            self.closed = true;
            debug!("Chat log {} closed", self.path.display());
        }
        Ok(())
    }
}

fn read_entries(path: &Path) -> Result<Vec<ChatEntry>, AppError> {
    let unavailable = |reason: String| AppError::StorageUnavailable {
        path: path.to_path_buf(),
        reason,
    };

    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(unavailable(e.to_string())),
    };

    serde_json::from_slice(&data).map_err(|e| unavailable(e.to_string()))
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
