use serde::{Deserialize, Serialize};

/// One (source, target) association from a mapping file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingEntry<K, V> {
    pub source: K,
    pub target: V,
}

/// Ordered, read-only association table. Duplicate sources are kept and the
/// first match wins on lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingTable<K, V> {
    entries: Vec<MappingEntry<K, V>>,
    skipped_rows: usize,
}

pub type UrlMapping = MappingTable<String, String>;
pub type UserMapping = MappingTable<String, String>;
pub type TermMapping = MappingTable<String, String>;

/// The flat tables consulted while rewriting embedded references
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingTables {
    pub urls: UrlMapping,
    pub users: UserMapping,
    pub terms: TermMapping,
}

impl<K, V> MappingTable<K, V> {
    pub fn new(entries: Vec<MappingEntry<K, V>>) -> Self {
        Self {
            entries,
            skipped_rows: 0,
        }
    }

    pub(crate) fn with_skipped_rows(mut self, skipped_rows: usize) -> Self {
        self.skipped_rows = skipped_rows;
        self
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rows dropped by the loader because they did not have exactly two fields
    pub fn skipped_rows(&self) -> usize {
        self.skipped_rows
    }

    pub fn entries(&self) -> &[MappingEntry<K, V>] {
        &self.entries
    }

    /// First entry whose source satisfies the predicate
    pub fn find(&self, mut predicate: impl FnMut(&K) -> bool) -> Option<&MappingEntry<K, V>> {
        self.entries.iter().find(|entry| predicate(&entry.source))
    }
}

impl<K: PartialEq, V> MappingTable<K, V> {
    pub fn lookup(&self, source: &K) -> Option<&V> {
        self.find(|key| key == source).map(|entry| &entry.target)
    }
}

impl<K, V> Default for MappingTable<K, V> {
    fn default() -> Self {
        Self::empty()
    }
}

impl MappingTable<String, String> {
    /// Case-insensitive exact lookup, used for logins and term labels
    pub fn lookup_ignore_case(&self, source: &str) -> Option<&str> {
        self.find(|key| key.eq_ignore_ascii_case(source))
            .map(|entry| entry.target.as_str())
    }

    /// Rewrite a URL using the first entry whose source is a case-insensitive
    /// prefix of it, ending on a path segment boundary. The unmatched tail is
    /// preserved, so `/sites/hr` rewrites `/sites/hr/a.aspx` but not
    /// `/sites/hrportal`.
    pub fn rewrite_url(&self, url: &str) -> Option<String> {
        let lowered = url.to_ascii_lowercase();
        self.entries.iter().find_map(|entry| {
            let key = &entry.source;
            if key.is_empty() || !lowered.starts_with(&key.to_ascii_lowercase()) {
                return None;
            }
            let rest = url.get(key.len()..)?;
            let on_boundary = key.ends_with('/')
                || rest.is_empty()
                || rest.starts_with(|c: char| matches!(c, '/' | '?' | '#'));
            on_boundary.then(|| format!("{}{}", entry.target, rest))
        })
    }
}
