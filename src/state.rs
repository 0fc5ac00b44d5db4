use crate::errors::{AppError, AppResult};
use crate::models::UserState;
use chrono::Utc;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Favorite/read overlay persisted as one JSON document keyed by annotation
/// id (as a string). Every mutation is a load-mutate-persist cycle over the
/// whole document; the mutex serializes those cycles so concurrent mutations
/// on different ids cannot lose each other's writes.
#[derive(Debug)]
pub struct UserStateStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl UserStateStore {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    /// State for one annotation; defaults when no entry exists.
    pub fn get(&self, annotation_id: i64) -> AppResult<UserState> {
        let _guard = self.lock()?;
        let states = self.load()?;
        Ok(states
            .get(&annotation_id.to_string())
            .copied()
            .unwrap_or_default())
    }

    /// The whole document, read once per view build.
    pub fn snapshot(&self) -> AppResult<BTreeMap<String, UserState>> {
        let _guard = self.lock()?;
        self.load()
    }

    /// Flips the favorite flag, creating the entry if absent, and returns
    /// the new value. Entries are never removed: un-favoriting persists the
    /// entry with the flag set to false.
    pub fn toggle_favorite(&self, annotation_id: i64) -> AppResult<bool> {
        let _guard = self.lock()?;
        let mut states = self.load()?;
        let entry = states.entry(annotation_id.to_string()).or_default();
        entry.favorite = !entry.favorite;
        let new_value = entry.favorite;
        self.persist(&states)?;
        tracing::debug!(annotation_id, favorite = new_value, "toggled favorite");
        Ok(new_value)
    }

    /// Sets last-read to the current time, creating the entry if absent,
    /// and returns the recorded timestamp.
    pub fn mark_read(&self, annotation_id: i64) -> AppResult<f64> {
        let _guard = self.lock()?;
        let mut states = self.load()?;
        let now = Utc::now().timestamp() as f64;
        states.entry(annotation_id.to_string()).or_default().last_read = Some(now);
        self.persist(&states)?;
        Ok(now)
    }

    fn lock(&self) -> AppResult<MutexGuard<'_, ()>> {
        self.lock
            .lock()
            .map_err(|_| AppError::Internal("state mutex poisoned".to_string()))
    }

    fn load(&self) -> AppResult<BTreeMap<String, UserState>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let bytes = fs::read(&self.path)
            .map_err(|error| AppError::StatePersistence(error.to_string()))?;
        serde_json::from_slice(&bytes)
            .map_err(|error| AppError::StatePersistence(error.to_string()))
    }

    fn persist(&self, states: &BTreeMap<String, UserState>) -> AppResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|error| AppError::StatePersistence(error.to_string()))?;
            }
        }
        let bytes = serde_json::to_vec_pretty(states)
            .map_err(|error| AppError::StatePersistence(error.to_string()))?;

        // Replace, never patch: a failed write must leave the previous
        // document intact, so write a sibling file and rename it over.
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, bytes)
            .map_err(|error| AppError::StatePersistence(error.to_string()))?;
        fs::rename(&tmp_path, &self.path)
            .map_err(|error| AppError::StatePersistence(error.to_string()))
    }
}
