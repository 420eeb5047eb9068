//! Paper model representing one arXiv feed entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A paper record parsed from one Atom `<entry>`.
///
/// Records are built once by the feed parser and handed out by value or
/// shared reference; nothing in the crate mutates a record after `build()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperRecord {
    /// Stable arXiv identifier including the version suffix (e.g. `2301.12345v2`)
    pub id: String,

    /// Paper title with whitespace collapsed
    pub title: String,

    /// Author names in feed order
    pub authors: Vec<String>,

    /// Affiliation per author, aligned with `authors`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub affiliations: Vec<Option<String>>,

    /// Abstract text
    pub summary: String,

    /// First version submission time
    pub published: Option<DateTime<Utc>>,

    /// Latest version time
    pub updated: Option<DateTime<Utc>>,

    /// Digital Object Identifier
    pub doi: Option<String>,

    /// Journal reference
    pub journal_ref: Option<String>,

    /// Direct PDF URL
    pub pdf_url: Option<String>,

    /// Abstract page URL
    pub abs_url: Option<String>,

    /// Author comment (page counts, conference notes, ...)
    pub comment: Option<String>,

    /// Primary arXiv category term
    pub primary_category: Option<String>,

    /// All category terms, primary first when present
    #[serde(default)]
    pub categories: Vec<String>,
}

impl PaperRecord {
    /// Create a record with the required fields only
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            authors: Vec::new(),
            affiliations: Vec::new(),
            summary: String::new(),
            published: None,
            updated: None,
            doi: None,
            journal_ref: None,
            pdf_url: None,
            abs_url: None,
            comment: None,
            primary_category: None,
            categories: Vec::new(),
        }
    }

    /// The identifier without its `vN` version suffix
    pub fn base_id(&self) -> &str {
        match self.id.rfind('v') {
            Some(pos)
                if pos + 1 < self.id.len()
                    && self.id[pos + 1..].bytes().all(|b| b.is_ascii_digit()) =>
            {
                &self.id[..pos]
            }
            _ => &self.id,
        }
    }

    /// Check if the record has a downloadable PDF
    pub fn has_pdf(&self) -> bool {
        self.pdf_url.is_some()
    }
}

/// Builder for constructing [`PaperRecord`] values
#[derive(Debug, Clone)]
pub struct PaperBuilder {
    paper: PaperRecord,
}

impl PaperBuilder {
    /// Create a new builder with required fields
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            paper: PaperRecord::new(id, title),
        }
    }

    /// Append an author
    pub fn author(mut self, name: impl Into<String>, affiliation: Option<String>) -> Self {
        self.paper.authors.push(name.into());
        self.paper.affiliations.push(affiliation);
        self
    }

    /// Set abstract
    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.paper.summary = summary.into();
        self
    }

    /// Set publication time
    pub fn published(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.paper.published = at;
        self
    }

    /// Set updated time
    pub fn updated(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.paper.updated = at;
        self
    }

    /// Set DOI
    pub fn doi(mut self, doi: Option<String>) -> Self {
        self.paper.doi = doi;
        self
    }

    /// Set journal reference
    pub fn journal_ref(mut self, journal_ref: Option<String>) -> Self {
        self.paper.journal_ref = journal_ref;
        self
    }

    /// Set PDF URL
    pub fn pdf_url(mut self, url: Option<String>) -> Self {
        self.paper.pdf_url = url;
        self
    }

    /// Set abstract page URL
    pub fn abs_url(mut self, url: Option<String>) -> Self {
        self.paper.abs_url = url;
        self
    }

    /// Set comment
    pub fn comment(mut self, comment: Option<String>) -> Self {
        self.paper.comment = comment;
        self
    }

    /// Set primary category
    pub fn primary_category(mut self, term: Option<String>) -> Self {
        self.paper.primary_category = term;
        self
    }

    /// Add a category term, ignoring repeats
    pub fn category(mut self, term: impl Into<String>) -> Self {
        let term = term.into();
        if !self.paper.categories.contains(&term) {
            self.paper.categories.push(term);
        }
        self
    }

    /// Build the record
    pub fn build(mut self) -> PaperRecord {
        if self.paper.affiliations.iter().all(Option::is_none) {
            self.paper.affiliations.clear();
        }
        if let Some(primary) = &self.paper.primary_category {
            if let Some(pos) = self.paper.categories.iter().position(|c| c == primary) {
                let term = self.paper.categories.remove(pos);
                self.paper.categories.insert(0, term);
            } else {
                self.paper.categories.insert(0, primary.clone());
            }
        }
        self.paper
    }
}
