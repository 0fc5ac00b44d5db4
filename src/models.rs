use serde::{Deserialize, Serialize};

/// Chapter/position locator attached to a structured highlight. Flat-text
/// stores have no locator, which reads as the default (all fields unset).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub spine_index: Option<i64>,
    pub start_cfi: Option<String>,
    pub chapter_titles: Vec<String>,
}

impl Location {
    pub fn display(&self) -> String {
        self.chapter_titles.join(" ")
    }

    /// Deep link into the Calibre viewer. Calibre addresses spine items as
    /// epubcfi steps, hence the (index + 1) * 2.
    pub fn calibre_url(&self, book_id: i64) -> Option<String> {
        let spine_index = self.spine_index?;
        let start_cfi = self.start_cfi.as_deref()?;
        Some(format!(
            "calibre://view-book/books/{}/EPUB?open_at=epubcfi(/{}{})",
            book_id,
            (spine_index + 1) * 2,
            start_cfi
        ))
    }
}

/// One annotation as read from the source store, already joined to its book.
/// `text` is never empty: the store excludes empty highlights from every fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationRow {
    pub id: i64,
    pub book_id: i64,
    pub book_title: String,
    pub text: String,
    pub note: Option<String>,
    pub location: Location,
    pub timestamp: f64,
}

/// Per-annotation overlay tracked outside the read-only source. An
/// annotation with no persisted entry reads as the default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserState {
    pub favorite: bool,
    pub last_read: Option<f64>,
}

impl UserState {
    pub fn is_read(&self) -> bool {
        self.last_read.is_some()
    }
}

/// An annotation enriched with its user state, as handed to consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationView {
    pub id: i64,
    pub book_id: i64,
    pub book_title: String,
    pub text: String,
    pub note: Option<String>,
    pub location: String,
    pub calibre_url: Option<String>,
    pub timestamp: f64,
    pub favorite: bool,
    pub last_read: Option<f64>,
}

impl AnnotationView {
    pub fn from_row(row: &AnnotationRow, state: UserState) -> Self {
        Self {
            id: row.id,
            book_id: row.book_id,
            book_title: row.book_title.clone(),
            text: row.text.clone(),
            note: row.note.clone(),
            location: row.location.display(),
            calibre_url: row.location.calibre_url(row.book_id),
            timestamp: row.timestamp,
            favorite: state.favorite,
            last_read: state.last_read,
        }
    }

    pub fn is_read(&self) -> bool {
        self.last_read.is_some()
    }
}

/// Ordered grouping of annotations under one book. Group order follows the
/// order the rows were fetched in, so title-ordered fetches stay title-ordered.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookGroup {
    pub book_id: i64,
    pub title: String,
    pub annotations: Vec<AnnotationView>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentBook {
    pub id: i64,
    pub title: String,
    pub latest_annotation: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookSummary {
    pub id: i64,
    pub title: String,
    pub annotation_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlashbackPick {
    pub years_ago: i64,
    pub annotation: Option<AnnotationView>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_display_joins_chapter_titles_with_spaces() {
        let location = Location {
            spine_index: Some(4),
            start_cfi: Some("/2/4/2:10".to_string()),
            chapter_titles: vec!["Part II".to_string(), "Chapter 7".to_string()],
        };
        assert_eq!(location.display(), "Part II Chapter 7");
        assert_eq!(Location::default().display(), "");
    }

    #[test]
    fn calibre_url_requires_spine_and_cfi() {
        let location = Location {
            spine_index: Some(4),
            start_cfi: Some("/2/4/2:10".to_string()),
            chapter_titles: Vec::new(),
        };
        assert_eq!(
            location.calibre_url(55).as_deref(),
            Some("calibre://view-book/books/55/EPUB?open_at=epubcfi(/10/2/4/2:10)")
        );
        assert!(Location::default().calibre_url(55).is_none());
    }

    #[test]
    fn read_is_derived_from_last_read_presence() {
        assert!(!UserState::default().is_read());
        let state = UserState {
            favorite: false,
            last_read: Some(1_700_000_000.0),
        };
        assert!(state.is_read());
    }
}
