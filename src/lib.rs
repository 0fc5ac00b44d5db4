mod config;
mod db;
mod engine;
mod errors;
mod filter;
mod models;
mod state;

pub use config::EngineConfig;
pub use db::{AnnotationStore, FetchOrder, FetchSpec, RowShape};
pub use engine::Engine;
pub use errors::{AppError, AppResult};
pub use filter::AnnotationFilters;
pub use models::{
    AnnotationRow, AnnotationView, BookGroup, BookSummary, FlashbackPick, Location, RecentBook,
    UserState,
};
pub use state::UserStateStore;

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// Logging bootstrap for binaries embedding the engine: JSON lines into a
/// daily-rolled file, level via RUST_LOG (default info).
pub fn init_tracing(log_dir: &Path) -> Result<(), String> {
    std::fs::create_dir_all(log_dir).map_err(|error| error.to_string())?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "highlights.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| error.to_string())
}
