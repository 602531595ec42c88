use serde::{Deserialize, Serialize};

/// Where to fetch a catalog archive and how to recognise it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogArchiveRef {
    pub url: String,
    /// Expected SHA-256 of the archive bytes, hex encoded.
    pub sha256: String,
    /// Expected size in bytes, when published.
    pub expected_size: Option<u64>,
}

impl CatalogArchiveRef {
    pub fn new(url: impl Into<String>, sha256: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            sha256: sha256.into(),
            expected_size: None,
        }
    }

    #[must_use]
    pub const fn with_expected_size(mut self, size: u64) -> Self {
        self.expected_size = Some(size);
        self
    }

    /// The content hash recorded in the completion marker (lowercase hex).
    pub fn content_hash(&self) -> String {
        self.sha256.trim().to_ascii_lowercase()
    }

    /// A filesystem-safe stem derived from the content hash.
    pub(crate) fn file_stem(&self) -> String {
        let stem: String = self
            .content_hash()
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .take(64)
            .collect();
        if stem.is_empty() {
            "catalog".to_string()
        } else {
            stem
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_is_normalized() {
        let archive = CatalogArchiveRef::new("https://example.org/c.zip", " ABCdef \n");
        assert_eq!(archive.content_hash(), "abcdef");
        assert_eq!(archive.file_stem(), "abcdef");
    }

    #[test]
    fn test_file_stem_strips_path_characters() {
        let archive = CatalogArchiveRef::new("u", "../..");
        assert_eq!(archive.file_stem(), "catalog");
        let archive = CatalogArchiveRef::new("u", "ab/../cd").with_expected_size(10);
        assert_eq!(archive.file_stem(), "abcd");
        assert_eq!(archive.expected_size, Some(10));
    }
}
