use calibre_highlights::{
    AnnotationFilters, AnnotationStore, AppError, Engine, EngineConfig, UserStateStore,
};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};

fn seed_library(dir: &Path) -> PathBuf {
    let path = dir.join("metadata.db");
    let conn = Connection::open(&path).expect("open fixture db");
    conn.execute_batch(
        "CREATE TABLE books (id INTEGER PRIMARY KEY, title TEXT NOT NULL);
         CREATE TABLE annotations (
           id INTEGER PRIMARY KEY,
           book INTEGER NOT NULL,
           timestamp REAL NOT NULL,
           annot_data TEXT NOT NULL
         );
         INSERT INTO books (id, title) VALUES
           (1, 'Anna Karenina'),
           (2, 'Bleak House');",
    )
    .expect("create schema");

    let rows = [
        (
            1,
            1,
            1_600_000_000.0,
            serde_json::json!({
                "highlighted_text": "All happy families are alike",
                "notes": "opening line",
                "spine_index": 0,
                "start_cfi": "/2/4/2:0",
                "toc_family_titles": ["Part One", "Chapter I"],
            }),
        ),
        (
            2,
            1,
            1_600_100_000.0,
            serde_json::json!({ "highlighted_text": "a later passage" }),
        ),
        (
            3,
            2,
            1_600_200_000.0,
            serde_json::json!({ "highlighted_text": "London. Michaelmas term" }),
        ),
        (
            4,
            2,
            1_600_300_000.0,
            serde_json::json!({ "highlighted_text": "" }),
        ),
    ];
    for (id, book, timestamp, annot_data) in rows {
        conn.execute(
            "INSERT INTO annotations (id, book, timestamp, annot_data) VALUES (?1, ?2, ?3, ?4)",
            params![id, book, timestamp, annot_data.to_string()],
        )
        .expect("insert annotation");
    }
    path
}

#[test]
fn engine_builds_views_over_a_seeded_library() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = seed_library(dir.path());
    let state_path = dir.path().join("state.json");

    let store = AnnotationStore::open(&db_path).expect("open store");
    let engine = Engine::with_seed(store, UserStateStore::new(&state_path), 11);

    // The empty highlight (id 4) is invisible everywhere.
    let all = engine
        .all_annotations(&AnnotationFilters::default())
        .expect("all annotations");
    assert_eq!(all.iter().map(|view| view.id).collect::<Vec<_>>(), vec![3, 2, 1]);

    // Location and deep link come through on the structured row.
    let opening = all.iter().find(|view| view.id == 1).expect("row 1");
    assert_eq!(opening.location, "Part One Chapter I");
    assert_eq!(
        opening.calibre_url.as_deref(),
        Some("calibre://view-book/books/1/EPUB?open_at=epubcfi(/2/2/4/2:0)")
    );
    assert_eq!(opening.note.as_deref(), Some("opening line"));

    // Overlay state feeds the favorites view and the filters.
    assert!(engine.toggle_favorite(3).expect("favorite 3"));
    engine.mark_read(1).expect("read 1");

    let favorites = engine.favorited_annotations().expect("favorites view");
    assert_eq!(favorites.len(), 1);
    assert_eq!(favorites[0].title, "Bleak House");
    assert_eq!(favorites[0].annotations[0].id, 3);

    let unread = engine
        .all_annotations(&AnnotationFilters {
            favorite: None,
            read: Some(false),
        })
        .expect("unread annotations");
    assert_eq!(unread.iter().map(|view| view.id).collect::<Vec<_>>(), vec![3, 2]);

    // Per-book view and its NotFound contract.
    let anna = engine
        .book_annotations(1, &AnnotationFilters::default())
        .expect("book 1");
    assert_eq!(anna.title, "Anna Karenina");
    assert_eq!(anna.annotations.len(), 2);
    assert!(matches!(
        engine.book_annotations(42, &AnnotationFilters::default()),
        Err(AppError::NotFound(_))
    ));

    // Notes view only surfaces the annotated passage.
    let noted = engine
        .annotations_with_notes(&AnnotationFilters::default())
        .expect("notes view");
    assert_eq!(noted.len(), 1);
    assert_eq!(noted[0].annotations[0].id, 1);

    // Aggregates over the same qualifying set.
    let recent = engine.recent_books().expect("recent books");
    assert_eq!(recent.iter().map(|book| book.id).collect::<Vec<_>>(), vec![2, 1]);
    let summaries = engine.books_with_annotations().expect("book summaries");
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0].annotation_count, 2);

    let sample = engine
        .random_annotations(&AnnotationFilters::default())
        .expect("random sample");
    assert_eq!(sample.len(), 3);
}

#[test]
fn engine_from_config_wires_both_stores() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = EngineConfig {
        db_path: seed_library(dir.path()),
        state_path: dir.path().join("state.json"),
    };

    let engine = Engine::from_config(&config).expect("engine from config");
    engine.toggle_favorite(2).expect("toggle");
    assert!(config.state_path.exists(), "state document is created lazily");

    // A second engine over the same paths sees the persisted overlay.
    let engine = Engine::from_config(&config).expect("second engine");
    let favorites = engine.favorited_annotations().expect("favorites");
    assert_eq!(favorites[0].annotations[0].id, 2);
}

#[test]
fn views_serialize_with_camel_case_keys() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = AnnotationStore::open(&seed_library(dir.path())).expect("open store");
    let engine = Engine::new(store, UserStateStore::new(&dir.path().join("state.json")));
    engine.mark_read(1).expect("mark read");

    let all = engine
        .all_annotations(&AnnotationFilters::default())
        .expect("all annotations");
    let read_row = all.iter().find(|view| view.id == 1).expect("row 1");
    let rendered = serde_json::to_value(read_row).expect("serialize view");
    assert!(rendered.get("bookTitle").is_some());
    assert!(rendered.get("lastRead").is_some());
    assert!(rendered.get("calibreUrl").is_some());
}
