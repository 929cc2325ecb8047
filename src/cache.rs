use std::collections::HashMap;

/// In-memory map from normalized URL to the remote bookmark id.
///
/// Purely an optimization to avoid repeated full-list fetches. The remote
/// list stays authoritative: a miss here always falls back to the server.
/// No persistence, no eviction; the working set is one user's bookmarks.
#[derive(Debug, Default)]
pub struct BookmarkIdCache {
    entries: HashMap<String, String>,
}

impl BookmarkIdCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, normalized_url: &str) -> Option<&str> {
        self.entries.get(normalized_url).map(|id| id.as_str())
    }

    pub fn insert(&mut self, normalized_url: String, id: String) {
        self.entries.insert(normalized_url, id);
    }

    /// Invalidate an entry. Only called after a confirmed remote delete.
    pub fn remove(&mut self, normalized_url: &str) {
        self.entries.remove(normalized_url);
    }

    pub fn contains(&self, normalized_url: &str) -> bool {
        self.entries.contains_key(normalized_url)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
