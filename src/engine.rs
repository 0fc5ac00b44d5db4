use crate::config::EngineConfig;
use crate::db::{AnnotationStore, FetchOrder, FetchSpec};
use crate::errors::{AppError, AppResult};
use crate::filter::AnnotationFilters;
use crate::models::{
    AnnotationRow, AnnotationView, BookGroup, BookSummary, FlashbackPick, RecentBook, UserState,
};
use crate::state::UserStateStore;
use chrono::{DateTime, Duration, Months, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

/// How many annotations a random sample returns at most.
const SAMPLE_SIZE: usize = 3;
/// Cap on rows pulled as sample candidates, to keep the scan bounded.
const SAMPLE_SCAN_CAP: i64 = 1000;
/// Days either side of the flashback target date.
const FLASHBACK_WINDOW_DAYS: i64 = 10;

/// The query and state-overlay engine: reads annotations from the source
/// store, merges in the per-user overlay, and builds the derived views.
/// Callers hand in plain filter values and get plain records back.
pub struct Engine {
    store: AnnotationStore,
    state: UserStateStore,
    rng: Mutex<StdRng>,
}

impl Engine {
    pub fn new(store: AnnotationStore, state: UserStateStore) -> Self {
        Self {
            store,
            state,
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Deterministic random selection, for tests.
    pub fn with_seed(store: AnnotationStore, state: UserStateStore, seed: u64) -> Self {
        Self {
            store,
            state,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn from_config(config: &EngineConfig) -> AppResult<Self> {
        let store = AnnotationStore::open(&config.db_path)?;
        let state = UserStateStore::new(&config.state_path);
        Ok(Self::new(store, state))
    }

    /// An unordered sample of min(3, candidates) annotations, drawn without
    /// replacement after enrichment and filtering.
    pub fn random_annotations(&self, filters: &AnnotationFilters) -> AppResult<Vec<AnnotationView>> {
        let spec = FetchSpec {
            limit: Some(SAMPLE_SCAN_CAP),
            ..FetchSpec::all(FetchOrder::Random)
        };
        let candidates = self.enriched(&self.store.fetch_annotations(&spec)?, filters)?;

        let mut rng = self.rng()?;
        let amount = SAMPLE_SIZE.min(candidates.len());
        let picked = rand::seq::index::sample(&mut *rng, candidates.len(), amount);
        Ok(picked.iter().map(|index| candidates[index].clone()).collect())
    }

    /// Every annotation of one book, oldest first. A book with zero
    /// qualifying annotations is NotFound; a book whose annotations were
    /// all filtered away yields an empty group.
    pub fn book_annotations(
        &self,
        book_id: i64,
        filters: &AnnotationFilters,
    ) -> AppResult<BookGroup> {
        let spec = FetchSpec {
            book_id: Some(book_id),
            ..FetchSpec::all(FetchOrder::TimestampAsc)
        };
        let rows = self.store.fetch_annotations(&spec)?;
        let Some(first) = rows.first() else {
            return Err(AppError::NotFound(format!(
                "no annotations for book {book_id}"
            )));
        };
        let title = first.book_title.clone();
        let annotations = self.enriched(&rows, filters)?;
        Ok(BookGroup {
            book_id,
            title,
            annotations,
        })
    }

    /// Favorited annotations grouped per book, books in title order and
    /// annotations oldest first within each book.
    pub fn favorited_annotations(&self) -> AppResult<Vec<BookGroup>> {
        let rows = self
            .store
            .fetch_annotations(&FetchSpec::all(FetchOrder::TitleThenTimestamp))?;
        let favorites_only = AnnotationFilters {
            favorite: Some(true),
            read: None,
        };
        Ok(group_by_book(self.enriched(&rows, &favorites_only)?))
    }

    /// Every qualifying annotation, newest first with title as tiebreak.
    pub fn all_annotations(&self, filters: &AnnotationFilters) -> AppResult<Vec<AnnotationView>> {
        let rows = self
            .store
            .fetch_annotations(&FetchSpec::all(FetchOrder::TimestampDescTitleAsc))?;
        self.enriched(&rows, filters)
    }

    /// Annotations carrying a note, grouped per book in title order.
    pub fn annotations_with_notes(&self, filters: &AnnotationFilters) -> AppResult<Vec<BookGroup>> {
        let spec = FetchSpec {
            notes_only: true,
            ..FetchSpec::all(FetchOrder::TitleThenTimestamp)
        };
        let rows = self.store.fetch_annotations(&spec)?;
        Ok(group_by_book(self.enriched(&rows, filters)?))
    }

    pub fn recent_books(&self) -> AppResult<Vec<RecentBook>> {
        self.store.recent_books()
    }

    pub fn books_with_annotations(&self) -> AppResult<Vec<BookSummary>> {
        self.store.books_with_annotations()
    }

    /// One annotation from around this calendar date 1 to 3 years ago, or
    /// none if the picked year's window is empty.
    pub fn flashback(&self) -> AppResult<FlashbackPick> {
        let years_ago = {
            let mut rng = self.rng()?;
            rng.random_range(1..=3)
        };
        let (from, until) = flashback_window(Utc::now(), years_ago);
        let spec = FetchSpec {
            time_range: Some((from, until)),
            limit: Some(1),
            ..FetchSpec::all(FetchOrder::Random)
        };
        let rows = self.store.fetch_annotations(&spec)?;
        let annotation = self
            .enriched(&rows, &AnnotationFilters::default())?
            .into_iter()
            .next();
        tracing::debug!(years_ago, found = annotation.is_some(), "flashback pick");
        Ok(FlashbackPick {
            years_ago,
            annotation,
        })
    }

    pub fn toggle_favorite(&self, annotation_id: i64) -> AppResult<bool> {
        self.state.toggle_favorite(annotation_id)
    }

    pub fn mark_read(&self, annotation_id: i64) -> AppResult<f64> {
        self.state.mark_read(annotation_id)
    }

    /// Overlays one state snapshot onto the rows and applies the filter
    /// predicate, preserving row order.
    fn enriched(
        &self,
        rows: &[AnnotationRow],
        filters: &AnnotationFilters,
    ) -> AppResult<Vec<AnnotationView>> {
        let states = self.state.snapshot()?;
        Ok(rows
            .iter()
            .map(|row| enrich(row, &states))
            .filter(|view| filters.passes(view.favorite, view.is_read()))
            .collect())
    }

    fn rng(&self) -> AppResult<MutexGuard<'_, StdRng>> {
        self.rng
            .lock()
            .map_err(|_| AppError::Internal("rng mutex poisoned".to_string()))
    }
}

fn enrich(row: &AnnotationRow, states: &BTreeMap<String, UserState>) -> AnnotationView {
    let state = states
        .get(&row.id.to_string())
        .copied()
        .unwrap_or_default();
    AnnotationView::from_row(row, state)
}

fn group_by_book(views: Vec<AnnotationView>) -> Vec<BookGroup> {
    let mut order: Vec<i64> = Vec::new();
    let mut groups: BTreeMap<i64, BookGroup> = BTreeMap::new();
    for view in views {
        let group = groups.entry(view.book_id).or_insert_with(|| {
            order.push(view.book_id);
            BookGroup {
                book_id: view.book_id,
                title: view.book_title.clone(),
                annotations: Vec::new(),
            }
        });
        group.annotations.push(view);
    }
    order
        .into_iter()
        .filter_map(|book_id| groups.remove(&book_id))
        .collect()
}

/// Inclusive timestamp bounds of the ±10-day window around the same
/// calendar date `years_ago` years back. Month arithmetic clamps the day,
/// so a leap-day anchor still yields a valid window.
fn flashback_window(now: DateTime<Utc>, years_ago: i64) -> (f64, f64) {
    let target = now
        .checked_sub_months(Months::new(12 * years_ago as u32))
        .unwrap_or(now);
    let from = target - Duration::days(FLASHBACK_WINDOW_DAYS);
    let until = target + Duration::days(FLASHBACK_WINDOW_DAYS);
    (from.timestamp() as f64, until.timestamp() as f64)
}
