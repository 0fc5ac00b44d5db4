use crate::errors::{AppError, AppResult};
use crate::models::{AnnotationRow, BookSummary, Location, RecentBook};
use rusqlite::{Connection, OpenFlags, Row};
use serde::Deserialize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Payload shape of the annotations table. Calibre generations differ:
/// early exports carry the highlight only in the flat `searchable_text`
/// column, current ones store the full `annot_data` JSON document with the
/// note and chapter locator alongside the highlighted text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowShape {
    FlatText,
    Structured,
}

impl RowShape {
    fn detect(conn: &Connection) -> AppResult<Self> {
        let has_annot_data: i64 = conn.query_row(
            "SELECT COUNT(*) FROM pragma_table_info('annotations') WHERE name = 'annot_data'",
            [],
            |row| row.get(0),
        )?;
        Ok(if has_annot_data > 0 {
            Self::Structured
        } else {
            Self::FlatText
        })
    }

    /// WHERE fragment excluding rows with an empty highlight. Applied to
    /// every query so unqualified rows never count against LIMIT or random
    /// selection.
    fn qualifier_sql(self) -> &'static str {
        match self {
            Self::FlatText => "a.searchable_text != ''",
            Self::Structured => {
                "json_extract(a.annot_data, '$.highlighted_text') IS NOT NULL
                 AND json_extract(a.annot_data, '$.highlighted_text') != ''"
            }
        }
    }

    fn payload_column(self) -> &'static str {
        match self {
            Self::FlatText => "a.searchable_text",
            Self::Structured => "a.annot_data",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOrder {
    Random,
    TimestampAsc,
    TimestampDescTitleAsc,
    TitleThenTimestamp,
}

impl FetchOrder {
    fn sql(self) -> &'static str {
        match self {
            Self::Random => "RANDOM()",
            Self::TimestampAsc => "a.timestamp ASC",
            Self::TimestampDescTitleAsc => "a.timestamp DESC, b.title ASC",
            Self::TitleThenTimestamp => "b.title ASC, a.timestamp ASC",
        }
    }
}

/// What to fetch and in which order; the caller-specified half of the
/// reader contract.
#[derive(Debug, Clone, Copy)]
pub struct FetchSpec {
    pub book_id: Option<i64>,
    pub notes_only: bool,
    pub time_range: Option<(f64, f64)>,
    pub order: FetchOrder,
    pub limit: Option<i64>,
}

impl FetchSpec {
    pub fn all(order: FetchOrder) -> Self {
        Self {
            book_id: None,
            notes_only: false,
            time_range: None,
            order,
            limit: None,
        }
    }
}

/// Read-only access to the annotation source. The engine never writes to
/// this database; any read failure surfaces as `StoreUnavailable` with no
/// partial results.
#[derive(Debug)]
pub struct AnnotationStore {
    conn: Mutex<Connection>,
    shape: RowShape,
}

impl AnnotationStore {
    pub fn open(path: &Path) -> AppResult<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags)?;
        let shape = RowShape::detect(&conn)?;
        tracing::debug!(path = %path.to_string_lossy(), ?shape, "opened annotation store");
        Ok(Self {
            conn: Mutex::new(conn),
            shape,
        })
    }

    pub fn shape(&self) -> RowShape {
        self.shape
    }

    pub fn fetch_annotations(&self, spec: &FetchSpec) -> AppResult<Vec<AnnotationRow>> {
        if spec.notes_only && self.shape == RowShape::FlatText {
            // Flat rows carry no note payload.
            return Ok(Vec::new());
        }

        let conn = self.lock()?;
        let mut query = format!(
            "SELECT a.id, a.book, b.title, {}, a.timestamp
             FROM annotations a
             JOIN books b ON a.book = b.id
             WHERE {}",
            self.shape.payload_column(),
            self.shape.qualifier_sql(),
        );
        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(book_id) = spec.book_id {
            query.push_str(" AND a.book = ?");
            params_vec.push(Box::new(book_id));
        }
        if spec.notes_only {
            query.push_str(
                " AND json_extract(a.annot_data, '$.notes') IS NOT NULL
                 AND json_extract(a.annot_data, '$.notes') != ''",
            );
        }
        if let Some((from, until)) = spec.time_range {
            query.push_str(" AND a.timestamp BETWEEN ? AND ?");
            params_vec.push(Box::new(from));
            params_vec.push(Box::new(until));
        }

        query.push_str(" ORDER BY ");
        query.push_str(spec.order.sql());

        if let Some(limit) = spec.limit {
            query.push_str(" LIMIT ?");
            params_vec.push(Box::new(limit));
        }

        let mut statement = conn.prepare(&query)?;
        let shape = self.shape;
        let rows = statement.query_map(
            rusqlite::params_from_iter(params_vec.iter().map(|param| param.as_ref())),
            move |row| parse_annotation_row(row, shape),
        )?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// Top 3 books ranked by the timestamp of their latest qualifying
    /// annotation, most recent first.
    pub fn recent_books(&self) -> AppResult<Vec<RecentBook>> {
        let conn = self.lock()?;
        let query = format!(
            "SELECT b.id, b.title, MAX(a.timestamp) AS latest_annotation
             FROM books b
             JOIN annotations a ON a.book = b.id
             WHERE {}
             GROUP BY b.id, b.title
             ORDER BY latest_annotation DESC
             LIMIT 3",
            self.shape.qualifier_sql(),
        );
        let mut statement = conn.prepare(&query)?;
        let rows = statement.query_map([], |row| {
            Ok(RecentBook {
                id: row.get(0)?,
                title: row.get(1)?,
                latest_annotation: row.get(2)?,
            })
        })?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// Every book with at least one qualifying annotation, with its count,
    /// ordered by title.
    pub fn books_with_annotations(&self) -> AppResult<Vec<BookSummary>> {
        let conn = self.lock()?;
        let query = format!(
            "SELECT b.id, b.title, COUNT(a.id) AS annotation_count
             FROM books b
             JOIN annotations a ON a.book = b.id
             WHERE {}
             GROUP BY b.id, b.title
             ORDER BY b.title",
            self.shape.qualifier_sql(),
        );
        let mut statement = conn.prepare(&query)?;
        let rows = statement.query_map([], |row| {
            Ok(BookSummary {
                id: row.get(0)?,
                title: row.get(1)?,
                annotation_count: row.get(2)?,
            })
        })?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    fn lock(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Internal("store mutex poisoned".to_string()))
    }
}

/// The annot_data document as Calibre's viewer writes it. Unknown fields
/// are ignored; absent ones read as defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AnnotData {
    highlighted_text: String,
    notes: Option<String>,
    spine_index: Option<i64>,
    start_cfi: Option<String>,
    toc_family_titles: Vec<String>,
}

fn parse_annotation_row(row: &Row<'_>, shape: RowShape) -> rusqlite::Result<AnnotationRow> {
    let id: i64 = row.get(0)?;
    let book_id: i64 = row.get(1)?;
    let book_title: String = row.get(2)?;
    let timestamp: f64 = row.get(4)?;

    match shape {
        RowShape::FlatText => Ok(AnnotationRow {
            id,
            book_id,
            book_title,
            text: row.get(3)?,
            note: None,
            location: Location::default(),
            timestamp,
        }),
        RowShape::Structured => {
            let raw: String = row.get(3)?;
            let data: AnnotData = serde_json::from_str(&raw).map_err(|error| {
                rusqlite::Error::FromSqlConversionFailure(
                    3,
                    rusqlite::types::Type::Text,
                    Box::new(error),
                )
            })?;
            Ok(AnnotationRow {
                id,
                book_id,
                book_title,
                text: data.highlighted_text,
                note: data.notes.filter(|note| !note.is_empty()),
                location: Location {
                    spine_index: data.spine_index,
                    start_cfi: data.start_cfi,
                    chapter_titles: data.toc_family_titles,
                },
                timestamp,
            })
        }
    }
}
