use std::path::PathBuf;

/// Engine configuration resolved from environment variables. Paths are
/// threaded explicitly into the store constructors; nothing reads the
/// environment after startup.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Calibre metadata database, opened read-only.
    pub db_path: PathBuf,
    /// JSON document holding the per-annotation favorite/read overlay.
    pub state_path: PathBuf,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let db_path = std::env::var_os("BOOKS_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(default_db_path);
        let state_path = std::env::var_os("HIGHLIGHTS_STATE_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("state.json"));
        Self { db_path, state_path }
    }
}

fn default_db_path() -> PathBuf {
    let home = std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_default();
    home.join("R").join("books").join("metadata.db")
}
