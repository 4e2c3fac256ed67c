//! Document scoping: which documents a client serves.

use serde::{Deserialize, Serialize};

/// One `{scheme, language}` pattern. An omitted field matches anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    scheme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    language: Option<String>,
}

impl DocumentFilter {
    /// Matches documents with both `scheme` and `language`.
    #[must_use]
    pub fn new(scheme: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            scheme: Some(scheme.into()),
            language: Some(language.into()),
        }
    }

    /// Matches any document with `scheme`.
    #[must_use]
    pub fn for_scheme(scheme: impl Into<String>) -> Self {
        Self {
            scheme: Some(scheme.into()),
            language: None,
        }
    }

    /// Matches any document in `language`.
    #[must_use]
    pub fn for_language(language: impl Into<String>) -> Self {
        Self {
            scheme: None,
            language: Some(language.into()),
        }
    }

    /// Scheme constraint, if any.
    #[must_use]
    pub fn scheme(&self) -> Option<&str> {
        self.scheme.as_deref()
    }

    /// Language constraint, if any.
    #[must_use]
    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    /// Whether `document` satisfies every constraint. Schemes compare
    /// case-insensitively, language identifiers exactly.
    #[must_use]
    pub fn matches(&self, document: &DocumentRef<'_>) -> bool {
        let scheme_ok = self
            .scheme
            .as_deref()
            .is_none_or(|scheme| scheme.eq_ignore_ascii_case(document.scheme));
        let language_ok = self
            .language
            .as_deref()
            .is_none_or(|language| language == document.language_id);
        scheme_ok && language_ok
    }
}

/// Ordered list of filters; a document matches if any filter does. An empty
/// selector matches nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentSelector {
    filters: Vec<DocumentFilter>,
}

impl DocumentSelector {
    /// A selector with `filters` in order.
    #[must_use]
    pub fn new(filters: Vec<DocumentFilter>) -> Self {
        Self { filters }
    }

    /// Appends a filter.
    #[must_use]
    pub fn with_filter(mut self, filter: DocumentFilter) -> Self {
        self.filters.push(filter);
        self
    }

    /// The filters in order.
    #[must_use]
    pub fn filters(&self) -> &[DocumentFilter] {
        &self.filters
    }

    /// Whether no filter is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Whether any filter matches `document`.
    #[must_use]
    pub fn matches(&self, document: &DocumentRef<'_>) -> bool {
        self.filters.iter().any(|filter| filter.matches(document))
    }
}

impl FromIterator<DocumentFilter> for DocumentSelector {
    fn from_iter<I: IntoIterator<Item = DocumentFilter>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// The parts of a document a selector looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentRef<'a> {
    scheme: &'a str,
    language_id: &'a str,
}

impl<'a> DocumentRef<'a> {
    /// Describes the document at `uri` in `language_id`.
    #[must_use]
    pub fn new(uri: &'a str, language_id: &'a str) -> Self {
        Self {
            scheme: scheme_of(uri),
            language_id,
        }
    }

    /// URI scheme, empty for relative references.
    #[must_use]
    pub fn scheme(&self) -> &'a str {
        self.scheme
    }

    /// Language identifier.
    #[must_use]
    pub fn language_id(&self) -> &'a str {
        self.language_id
    }
}

fn scheme_of(uri: &str) -> &str {
    match uri.split_once(':') {
        Some((scheme, _))
            if scheme.starts_with(|c: char| c.is_ascii_alphabetic())
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')) =>
        {
            scheme
        }
        _ => "",
    }
}
