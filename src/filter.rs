use serde::{Deserialize, Serialize};

/// Optional favorite/read filter pair. Every filterable view routes through
/// `passes` so the filter semantics cannot diverge between views.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnnotationFilters {
    pub favorite: Option<bool>,
    pub read: Option<bool>,
}

impl AnnotationFilters {
    /// True iff the annotation's derived flags satisfy both filters. An
    /// unset filter excludes nothing; set filters combine with AND.
    pub fn passes(&self, favorite: bool, is_read: bool) -> bool {
        let favorite_ok = self.favorite.map_or(true, |wanted| favorite == wanted);
        let read_ok = self.read.map_or(true, |wanted| is_read == wanted);
        favorite_ok && read_ok
    }
}
