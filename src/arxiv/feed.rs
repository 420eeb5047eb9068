//! Atom feed parsing for arXiv API pages.
//!
//! The parser walks the document with quick-xml's namespace-aware streaming
//! reader. quick-xml never expands entities declared in a DTD (only the five
//! predefined entities and character references are resolved), and any
//! `<!DOCTYPE>` is refused outright, so external-entity and entity-expansion
//! payloads cannot be smuggled in through upstream content.
//!
//! Entries are collected into [`RawEntry`] values first and then converted
//! with `PaperRecord::try_from`, which either yields a record or a
//! [`SkipReason`]. A bad entry is skipped and counted; only document-level
//! problems (malformed XML, missing pagination metadata) fail the page.

use chrono::{DateTime, Utc};
use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::NsReader;
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;
use tracing::{debug, warn};

use super::ArxivError;
use crate::models::{PaperBuilder, PaperRecord};
use crate::utils::RawPage;

const ATOM_NS: &[u8] = b"http://www.w3.org/2005/Atom";
const OPENSEARCH_NS: &[u8] = b"http://a9.com/-/spec/opensearch/1.1/";
const ARXIV_NS: &[u8] = b"http://arxiv.org/schemas/atom";

/// Why an entry was dropped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    MissingId,
    MissingTitle,
    /// The entry is an upstream error report rather than a paper
    UpstreamError(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::MissingId => write!(f, "entry has no identifier"),
            SkipReason::MissingTitle => write!(f, "entry has no title"),
            SkipReason::UpstreamError(msg) => write!(f, "upstream error entry: {}", msg),
        }
    }
}

/// Author as it appears in the feed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawAuthor {
    pub name: String,
    pub affiliation: Option<String>,
}

/// Link element attributes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawLink {
    pub href: String,
    pub rel: Option<String>,
    pub media_type: Option<String>,
    pub title: Option<String>,
}

/// Everything captured from one `<entry>`, before validation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEntry {
    pub id: Option<String>,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub published: Option<String>,
    pub updated: Option<String>,
    pub authors: Vec<RawAuthor>,
    pub links: Vec<RawLink>,
    pub doi: Option<String>,
    pub journal_ref: Option<String>,
    pub comment: Option<String>,
    pub primary_category: Option<String>,
    pub categories: Vec<String>,
}

impl TryFrom<RawEntry> for PaperRecord {
    type Error = SkipReason;

    fn try_from(raw: RawEntry) -> Result<Self, Self::Error> {
        let id_url = non_empty(raw.id).ok_or(SkipReason::MissingId)?;
        if id_url.contains("/api/errors") {
            let message = raw
                .summary
                .and_then(|s| non_empty(Some(s)))
                .unwrap_or_else(|| id_url.clone());
            return Err(SkipReason::UpstreamError(message));
        }
        let id = match id_url.find("/abs/") {
            Some(pos) => id_url[pos + 5..].to_string(),
            None => id_url.clone(),
        };
        if id.is_empty() {
            return Err(SkipReason::MissingId);
        }
        let title = non_empty(raw.title).ok_or(SkipReason::MissingTitle)?;

        let pdf_url = raw
            .links
            .iter()
            .find(|l| {
                l.media_type.as_deref() == Some("application/pdf")
                    || l.title.as_deref() == Some("pdf")
            })
            .map(|l| l.href.clone());
        let abs_url = raw
            .links
            .iter()
            .find(|l| l.rel.as_deref() == Some("alternate"))
            .map(|l| l.href.clone())
            .or_else(|| id_url.starts_with("http").then(|| id_url.clone()));

        let mut builder = PaperBuilder::new(id, title)
            .summary(raw.summary.map(|s| collapse(&s)).unwrap_or_default())
            .published(raw.published.as_deref().and_then(parse_timestamp))
            .updated(raw.updated.as_deref().and_then(parse_timestamp))
            .doi(checked_doi(raw.doi))
            .journal_ref(non_empty(raw.journal_ref))
            .comment(non_empty(raw.comment))
            .pdf_url(pdf_url)
            .abs_url(abs_url)
            .primary_category(non_empty(raw.primary_category));

        for author in raw.authors {
            let name = collapse(&author.name);
            if !name.is_empty() {
                builder = builder.author(name, non_empty(author.affiliation));
            }
        }
        for term in raw.categories {
            builder = builder.category(term);
        }
        Ok(builder.build())
    }
}

/// One parsed page
#[derive(Debug, Clone)]
pub struct ParsedPage {
    /// Records in feed order
    pub papers: Vec<PaperRecord>,
    /// `opensearch:totalResults`
    pub total_results: u64,
    /// `opensearch:startIndex`
    pub start_index: u64,
    /// `opensearch:itemsPerPage`, when present
    pub items_per_page: Option<u64>,
    /// Entries that were dropped, with the reason
    pub skipped: Vec<SkipReason>,
}

impl ParsedPage {
    /// Entries upstream actually returned, parseable or not
    pub fn entries_returned(&self) -> usize {
        self.papers.len() + self.skipped.len()
    }
}

/// Parse a timestamp into UTC; malformed input yields `None`
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    match DateTime::parse_from_rfc3339(value.trim()) {
        Ok(dt) => Some(dt.with_timezone(&Utc)),
        Err(e) => {
            debug!("Ignoring malformed timestamp {:?}: {}", value, e);
            None
        }
    }
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| collapse(&v)).filter(|v| !v.is_empty())
}

fn doi_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^10\.\d{4,9}/[-._;()/:a-zA-Z0-9]+$").ok())
        .as_ref()
}

/// Keep a DOI only when it looks like `10.NNNN/suffix`
fn checked_doi(value: Option<String>) -> Option<String> {
    let doi = non_empty(value)?;
    if doi_pattern().is_some_and(|re| re.is_match(&doi)) {
        Some(doi)
    } else {
        debug!("Ignoring malformed DOI {:?}", doi);
        None
    }
}

/// Resolve entity and character references one at a time.
///
/// A reference quick-xml cannot resolve (anything beyond the predefined
/// entities and character references) is kept verbatim without affecting
/// its neighbours.
fn unescape_lenient(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let end = tail[1..]
            .find(|c: char| c == ';' || c == '&' || c.is_whitespace())
            .map(|i| i + 1)
            .filter(|&i| tail[i..].starts_with(';'));
        match end {
            Some(end) => {
                let reference = &tail[..=end];
                match unescape(reference) {
                    Ok(resolved) => out.push_str(&resolved),
                    Err(_) => out.push_str(reference),
                }
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    Entry,
    Author,
    TotalResults,
    StartIndex,
    ItemsPerPage,
    Id,
    Title,
    Summary,
    Published,
    Updated,
    Name,
    Affiliation,
    Doi,
    JournalRef,
    Comment,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ns {
    Atom,
    OpenSearch,
    Arxiv,
    Other,
}

fn namespace(resolved: &ResolveResult) -> Ns {
    match resolved {
        ResolveResult::Bound(ns) if ns.as_ref() == ATOM_NS => Ns::Atom,
        ResolveResult::Bound(ns) if ns.as_ref() == OPENSEARCH_NS => Ns::OpenSearch,
        ResolveResult::Bound(ns) if ns.as_ref() == ARXIV_NS => Ns::Arxiv,
        _ => Ns::Other,
    }
}

fn classify(ns: Ns, local: &[u8], parent: Option<Tag>, in_entry: bool) -> Tag {
    match (ns, local) {
        (Ns::Atom, b"entry") => Tag::Entry,
        (Ns::OpenSearch, b"totalResults") if !in_entry => Tag::TotalResults,
        (Ns::OpenSearch, b"startIndex") if !in_entry => Tag::StartIndex,
        (Ns::OpenSearch, b"itemsPerPage") if !in_entry => Tag::ItemsPerPage,
        _ if !in_entry => Tag::Other,
        (Ns::Atom, b"author") if parent == Some(Tag::Entry) => Tag::Author,
        (Ns::Atom, b"name") if parent == Some(Tag::Author) => Tag::Name,
        (Ns::Arxiv, b"affiliation") if parent == Some(Tag::Author) => Tag::Affiliation,
        _ if parent != Some(Tag::Entry) => Tag::Other,
        (Ns::Atom, b"id") => Tag::Id,
        (Ns::Atom, b"title") => Tag::Title,
        (Ns::Atom, b"summary") => Tag::Summary,
        (Ns::Atom, b"published") => Tag::Published,
        (Ns::Atom, b"updated") => Tag::Updated,
        (Ns::Arxiv, b"doi") => Tag::Doi,
        (Ns::Arxiv, b"journal_ref") => Tag::JournalRef,
        (Ns::Arxiv, b"comment") => Tag::Comment,
        _ => Tag::Other,
    }
}

fn attr(e: &BytesStart, name: &str) -> Option<String> {
    e.try_get_attribute(name)
        .ok()
        .flatten()
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

/// Attributes of empty-or-not elements that carry data in attributes only
fn capture_attributes(ns: Ns, e: &BytesStart, entry: &mut RawEntry) {
    match (ns, e.local_name().as_ref()) {
        (Ns::Atom, b"link") => {
            if let Some(href) = attr(e, "href") {
                entry.links.push(RawLink {
                    href,
                    rel: attr(e, "rel"),
                    media_type: attr(e, "type"),
                    title: attr(e, "title"),
                });
            }
        }
        (Ns::Atom, b"category") => {
            if let Some(term) = attr(e, "term") {
                entry.categories.push(term);
            }
        }
        (Ns::Arxiv, b"primary_category") => {
            entry.primary_category = attr(e, "term");
        }
        _ => {}
    }
}

/// Parse the body of a page response
pub fn parse_page(raw: &RawPage) -> Result<ParsedPage, ArxivError> {
    parse_feed(&raw.body).map_err(|e| match e {
        ArxivError::Parse(msg) => ArxivError::Parse(format!("{} ({})", msg, raw.url)),
        other => other,
    })
}

/// Parse an Atom feed document
pub fn parse_feed(xml: &str) -> Result<ParsedPage, ArxivError> {
    let mut reader = NsReader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Tag> = Vec::new();
    let mut text = String::new();
    let mut entry: Option<RawEntry> = None;
    let mut saw_feed = false;

    let mut total_results: Option<u64> = None;
    let mut start_index: Option<u64> = None;
    let mut items_per_page: Option<u64> = None;
    let mut papers = Vec::new();
    let mut skipped = Vec::new();

    loop {
        let (resolved, event) = reader
            .read_resolved_event()
            .map_err(|e| ArxivError::Parse(format!("malformed XML: {}", e)))?;
        let ns = namespace(&resolved);

        match event {
            Event::DocType(_) => {
                return Err(ArxivError::Parse(
                    "document type declarations are not accepted".to_string(),
                ));
            }
            Event::Start(e) => {
                if stack.is_empty() {
                    if ns != Ns::Atom || e.local_name().as_ref() != b"feed" {
                        return Err(ArxivError::Parse(
                            "document root is not an Atom feed".to_string(),
                        ));
                    }
                    saw_feed = true;
                    stack.push(Tag::Other);
                    continue;
                }

                let tag = classify(ns, e.local_name().as_ref(), stack.last().copied(), entry.is_some());
                match tag {
                    Tag::Entry => entry = Some(RawEntry::default()),
                    Tag::Author => {
                        if let Some(entry) = entry.as_mut() {
                            entry.authors.push(RawAuthor::default());
                        }
                    }
                    _ => {
                        if let Some(entry) = entry.as_mut() {
                            capture_attributes(ns, &e, entry);
                        }
                    }
                }
                text.clear();
                stack.push(tag);
            }
            Event::Empty(e) => {
                if stack.is_empty() {
                    return Err(ArxivError::Parse(
                        "document root is not an Atom feed".to_string(),
                    ));
                }
                if let Some(entry) = entry.as_mut() {
                    capture_attributes(ns, &e, entry);
                }
            }
            Event::Text(t) => text.push_str(&unescape_lenient(&String::from_utf8_lossy(&t))),
            Event::CData(c) => text.push_str(&String::from_utf8_lossy(&c)),
            Event::End(_) => {
                let Some(tag) = stack.pop() else {
                    return Err(ArxivError::Parse("unbalanced end tag".to_string()));
                };
                let value = std::mem::take(&mut text);
                match tag {
                    Tag::Entry => {
                        if let Some(raw) = entry.take() {
                            match PaperRecord::try_from(raw) {
                                Ok(paper) => papers.push(paper),
                                Err(reason) => {
                                    warn!("Skipping feed entry {}: {}", papers.len() + skipped.len() + 1, reason);
                                    skipped.push(reason);
                                }
                            }
                        }
                    }
                    Tag::TotalResults => total_results = Some(parse_count("totalResults", &value)?),
                    Tag::StartIndex => start_index = Some(parse_count("startIndex", &value)?),
                    Tag::ItemsPerPage => items_per_page = Some(parse_count("itemsPerPage", &value)?),
                    _ => {
                        if let Some(entry) = entry.as_mut() {
                            assign_text(tag, value, entry);
                        }
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_feed {
        return Err(ArxivError::Parse("empty document".to_string()));
    }
    if !stack.is_empty() {
        return Err(ArxivError::Parse("document ended inside an element".to_string()));
    }

    let total_results = total_results
        .ok_or_else(|| ArxivError::Parse("feed is missing opensearch:totalResults".to_string()))?;
    let start_index = start_index
        .ok_or_else(|| ArxivError::Parse("feed is missing opensearch:startIndex".to_string()))?;

    debug!(
        "Parsed feed page: {} papers, {} skipped, total {}, start {}",
        papers.len(),
        skipped.len(),
        total_results,
        start_index
    );

    Ok(ParsedPage {
        papers,
        total_results,
        start_index,
        items_per_page,
        skipped,
    })
}

fn parse_count(name: &str, value: &str) -> Result<u64, ArxivError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| ArxivError::Parse(format!("opensearch:{} is not a count: {:?}", name, value)))
}

fn assign_text(tag: Tag, value: String, entry: &mut RawEntry) {
    match tag {
        Tag::Id => entry.id = Some(value),
        Tag::Title => entry.title = Some(value),
        Tag::Summary => entry.summary = Some(value),
        Tag::Published => entry.published = Some(value),
        Tag::Updated => entry.updated = Some(value),
        Tag::Doi => entry.doi = Some(value),
        Tag::JournalRef => entry.journal_ref = Some(value),
        Tag::Comment => entry.comment = Some(value),
        Tag::Name => {
            if let Some(author) = entry.authors.last_mut() {
                author.name = value;
            }
        }
        Tag::Affiliation => {
            if let Some(author) = entry.authors.last_mut() {
                author.affiliation = Some(value);
            }
        }
        _ => {}
    }
}
