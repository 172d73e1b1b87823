use std::collections::HashSet;

/// A tag query: an OR of ANDed tag groups. An empty query matches
/// every device.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TagQuery(pub Vec<Vec<String>>);

impl TagQuery {
    pub fn all() -> Self {
        TagQuery(Vec::new())
    }

    pub fn matches(&self, tags: &HashSet<String>) -> bool {
        if self.0.is_empty() {
            return true;
        }
        self.0
            .iter()
            .any(|group| group.iter().all(|tag| tags.contains(tag)))
    }
}
