use chrono::{DateTime, TimeDelta, Utc};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use ulid::Ulid;

use crate::types::{Program, ProgramDraft, ProgramPatch, ProgramStatus, default_bounties};

pub const DATA_FILE_NAME: &str = "programs.json";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Program not found: {0}")]
    NoSuchProgram(String),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NoSuchProgram(_))
    }
}

/// JSON-file backed collection of programs.
///
/// The whole collection lives in one pretty-printed array. Every mutation
/// reloads the file, edits the vector and rewrites the file while holding
/// `write_lock`, so concurrent writers are serialized instead of racing.
#[derive(Debug)]
pub struct ProgramStore {
    storage_path: PathBuf,
    write_lock: Mutex<()>,
}

impl ProgramStore {
    pub fn new(storage_path: impl Into<PathBuf>) -> Self {
        Self {
            storage_path: storage_path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Store backed by `<data_dir>/programs.json`.
    pub fn in_dir(data_dir: impl AsRef<Path>) -> Self {
        Self::new(data_dir.as_ref().join(DATA_FILE_NAME))
    }

    /// Build the store and make sure its backing file exists.
    pub fn open(storage_path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let store = Self::new(storage_path);
        store.initialize()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.storage_path
    }

    /// Create the data directory and an empty `[]` file if missing.
    /// An existing file is never touched.
    pub fn initialize(&self) -> Result<(), StorageError> {
        if let Some(parent) = self.storage_path.parent() {
            fs::create_dir_all(parent)?;
        }

        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.storage_path)
        {
            Ok(mut f) => {
                f.write_all(b"[]")?;
                f.sync_all()?;
                tracing::info!(path = %self.storage_path.display(), "created empty program store");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Every stored program in insertion order. Unreadable or malformed data
    /// is logged and reported as an empty collection.
    pub fn list(&self) -> Vec<Program> {
        self.load().unwrap_or_else(|err| {
            tracing::error!(
                path = %self.storage_path.display(),
                error = %err,
                "failed to read program store, returning empty list"
            );
            Vec::new()
        })
    }

    pub fn get(&self, id: &str) -> Result<Program, StorageError> {
        self.list()
            .into_iter()
            .find(|p| p.id == id)
            .ok_or_else(|| StorageError::NoSuchProgram(id.to_string()))
    }

    pub fn create(&self, draft: ProgramDraft) -> Result<Program, StorageError> {
        let _guard = self.lock();
        let mut programs = self.load()?;

        let program = Program {
            id: Ulid::new().to_string(),
            name: draft.name,
            description: draft.description,
            bounty_ranges: draft.bounty_ranges,
            markdown: draft.markdown,
            scope: draft.scope,
            status: ProgramStatus::Active,
            reports: 0,
            bounties: draft.bounties.unwrap_or_else(default_bounties),
            created_at: Utc::now(),
            last_updated: None,
        };
        programs.push(program.clone());
        self.save(&programs)?;

        tracing::info!(program_id = %program.id, name = %program.name, "program created");
        Ok(program)
    }

    pub fn update(&self, id: &str, patch: ProgramPatch) -> Result<Program, StorageError> {
        let _guard = self.lock();
        let mut programs = self.load()?;

        let updated = {
            let program = programs
                .iter_mut()
                .find(|p| p.id == id)
                .ok_or_else(|| StorageError::NoSuchProgram(id.to_string()))?;
            patch.apply_to(program);
            let previous = program.last_updated.unwrap_or(program.created_at);
            program.last_updated = Some(timestamp_after(previous));
            program.clone()
        };
        self.save(&programs)?;

        tracing::info!(program_id = %updated.id, status = %updated.status, "program updated");
        Ok(updated)
    }

    pub fn delete(&self, id: &str) -> Result<(), StorageError> {
        let _guard = self.lock();
        let mut programs = self.load()?;

        let before = programs.len();
        programs.retain(|p| p.id != id);
        if programs.len() == before {
            return Err(StorageError::NoSuchProgram(id.to_string()));
        }
        self.save(&programs)?;

        tracing::info!(program_id = %id, "program deleted");
        Ok(())
    }

    /// Strict read used by the write paths. A missing or zero-length file
    /// (bootstrap interrupted before `[]` landed) is an empty collection;
    /// anything else unreadable is an error so it is never overwritten.
    fn load(&self) -> Result<Vec<Program>, StorageError> {
        let mut file = match File::open(&self.storage_path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&contents)?)
    }

    /// Rewrite the whole collection through a temp file and an atomic rename.
    fn save(&self, programs: &[Program]) -> Result<(), StorageError> {
        if let Some(parent) = self.storage_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let temp = self.storage_path.with_extension("json.tmp");
        let mut f = File::create(&temp)?;
        let content = serde_json::to_string_pretty(programs)?;
        f.write_all(content.as_bytes())?;
        f.sync_all()?;
        fs::rename(temp, &self.storage_path)?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Current time, nudged forward so it always sorts after `previous`.
fn timestamp_after(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now();
    if now > previous {
        now
    } else {
        previous + TimeDelta::microseconds(1)
    }
}
