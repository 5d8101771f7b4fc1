#![forbid(unsafe_code)]

//! Append-only record of video ids whose acquisition fully completed.
//!
//! The on-disk format is one id per line, UTF-8, no header. Lines are only
//! ever appended; duplicates are harmless and collapse into a single set
//! entry on load.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("reading ledger {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("appending {id} to ledger {path}: {source}")]
    Append {
        id: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug)]
pub struct DedupLedger {
    path: PathBuf,
    // Guards both the set and the append so check-then-write is one step.
    ids: Mutex<HashSet<String>>,
}

impl DedupLedger {
    /// Loads every id recorded at `path`. A ledger that does not exist yet
    /// is a first run, not an error.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        let ids = read_ids(&path).map_err(|source| LedgerError::Read {
            path: path.clone(),
            source,
        })?;
        Ok(Self {
            path,
            ids: Mutex::new(ids),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.lock().contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Durably records `id`. Returns `Ok(false)` when it was already present.
    ///
    /// The in-memory set only learns about `id` once the append reached the
    /// file, so a failed write leaves it eligible for the next run.
    pub fn commit(&self, id: &str) -> Result<bool, LedgerError> {
        let mut ids = self.ids.lock();
        if ids.contains(id) {
            return Ok(false);
        }
        append_line(&self.path, id).map_err(|source| LedgerError::Append {
            id: id.to_owned(),
            path: self.path.clone(),
            source,
        })?;
        ids.insert(id.to_owned());
        Ok(true)
    }
}

fn read_ids(path: &Path) -> io::Result<HashSet<String>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(HashSet::new()),
        Err(err) => return Err(err),
    };

    let mut ids = HashSet::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        let id = line.trim();
        if !id.is_empty() {
            ids.insert(id.to_owned());
        }
    }
    Ok(ids)
}

fn append_line(path: &Path, id: &str) -> io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{id}")?;
    file.sync_data()
}
