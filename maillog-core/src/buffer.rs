//! Durable pending-event buffer.
//!
//! The buffer is a JSON array of [`Event`]s stored in a single file. Every
//! mutation rewrites the whole file using a `.tmp` + rename sequence, so a
//! reader never observes a half-written buffer and a crash loses at most the
//! mutation that was in flight.
//!
//! All operations take the same mutex. The in-memory copy is materialized from
//! disk on first access and only replaced after a persist succeeded, so it
//! always mirrors the last successful write.

use std::ffi::OsString;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{persist_err, BufferError};
use crate::types::Event;

/// File-backed, mutex-guarded store of events awaiting the next summary.
#[derive(Debug)]
pub struct EventBuffer {
    path: PathBuf,
    events: Mutex<Option<Vec<Event>>>,
}

impl EventBuffer {
    /// Open the buffer stored at `path`. Nothing is read until first access.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            events: Mutex::new(None),
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `event` and persist the resulting sequence.
    pub fn insert(&self, event: Event) -> Result<(), BufferError> {
        self.mutate(|events| events.push(event))
    }

    /// Snapshot of every buffered event, in insertion order.
    pub fn get_all(&self) -> Vec<Event> {
        let mut guard = self.lock();
        Self::materialize(&self.path, &mut guard).clone()
    }

    /// Number of buffered events.
    pub fn len(&self) -> usize {
        let mut guard = self.lock();
        Self::materialize(&self.path, &mut guard).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Persist an empty sequence.
    pub fn clear(&self) -> Result<(), BufferError> {
        self.mutate(Vec::clear)
    }

    /// Remove the oldest `count` events and persist the rest.
    ///
    /// Events are only ever appended, so after a snapshot of length `count`
    /// has been delivered, the first `count` events are exactly that snapshot
    /// and anything inserted afterwards survives. Returns how many events
    /// remain.
    pub fn drain(&self, count: usize) -> Result<usize, BufferError> {
        self.mutate(|events| {
            let count = count.min(events.len());
            events.drain(..count);
            events.len()
        })
    }

    fn lock(&self) -> MutexGuard<'_, Option<Vec<Event>>> {
        // A panic while holding the lock cannot leave the cache half-updated:
        // it is only ever replaced wholesale after a successful persist.
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mutate<R>(&self, apply: impl FnOnce(&mut Vec<Event>) -> R) -> Result<R, BufferError> {
        let mut guard = self.lock();
        let mut next = Self::materialize(&self.path, &mut guard).clone();
        let result = apply(&mut next);
        persist(&self.path, &next)?;
        *guard = Some(next);
        Ok(result)
    }

    fn materialize<'a>(path: &Path, slot: &'a mut Option<Vec<Event>>) -> &'a Vec<Event> {
        slot.get_or_insert_with(|| load(path))
    }
}

/// Read the persisted sequence, falling back to empty on any problem.
fn load(path: &Path) -> Vec<Event> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no event buffer on disk, starting empty");
            return Vec::new();
        }
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "event buffer unreadable, treating as empty",
            );
            return Vec::new();
        }
    };

    match serde_json::from_slice::<Vec<Event>>(&bytes) {
        Ok(events) => {
            tracing::info!(
                path = %path.display(),
                count = events.len(),
                "restored buffered events from disk",
            );
            events
        }
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "event buffer corrupt, treating as empty",
            );
            Vec::new()
        }
    }
}

/// Overwrite the buffer file with `events`.
///
/// Writes to `<path>.tmp`, syncs, then renames over `path`.
fn persist(path: &Path, events: &[Event]) -> Result<(), BufferError> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(|e| persist_err(dir, e))?;
    }

    let json = serde_json::to_vec(events)?;
    let tmp = tmp_path(path);

    let write = || -> std::io::Result<()> {
        let mut file = open_private(&tmp)?;
        file.write_all(&json)?;
        file.sync_all()
    };
    if let Err(err) = write() {
        let _ = fs::remove_file(&tmp);
        return Err(persist_err(&tmp, err));
    }

    if let Err(err) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(persist_err(path, err));
    }
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

#[cfg(unix)]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}
