//! Record types shared by the content client and the metadata enricher.

use serde::{Deserialize, Serialize};

/// Most subjects kept on an enriched record.
pub(crate) const SUBJECT_CAP: usize = 5;

/// A curated book entry from the current-read sheet.
///
/// A book is only retained when at least one of the identifying fields
/// (`isbn`, `work_id`, `title`) is non-empty; see [`Book::has_identifier`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Book {
    /// Stable id for page anchors, synthesised as `book<n>` when absent.
    #[serde(default)]
    pub id: String,
    /// ISBN-10 or ISBN-13, possibly hyphenated.
    #[serde(default)]
    pub isbn: String,
    /// Open Library work id, e.g. `OL45804W`.
    #[serde(default)]
    pub work_id: String,
    /// Title as curated on the sheet.
    #[serde(default)]
    pub title: String,
    /// Author as curated on the sheet.
    #[serde(default)]
    pub author: String,
    /// Hand-written summary used when no remote description is found.
    #[serde(default)]
    pub custom_summary: String,
    /// Curated tags; arrives as a `;`-delimited string on the wire.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Discussion prompts; arrives as a `|`-delimited string on the wire.
    #[serde(default)]
    pub discussion_prompts: Vec<String>,
}

impl Book {
    /// True when at least one identifying field is non-empty after
    /// trimming.
    #[must_use]
    pub fn has_identifier(&self) -> bool {
        !self.isbn.trim().is_empty()
            || !self.work_id.trim().is_empty()
            || !self.title.trim().is_empty()
    }
}

/// The normalized current-read payload.
///
/// Whatever shape the endpoint answered with (legacy flat book object
/// included), consumers always see this one.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CurrentRead {
    /// The current selection, or the candidates while voting is open.
    #[serde(default)]
    pub books: Vec<Book>,
    /// Whether a vote for the next read is in progress.
    #[serde(default)]
    pub voting_open: bool,
    /// Link to the voting form, empty when none.
    #[serde(default)]
    pub vote_form_url: String,
}

/// A previously read book from the past-reads sheet.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PastRead {
    /// Title of the read.
    #[serde(default)]
    pub title: String,
    /// Author of the read.
    #[serde(default)]
    pub author: String,
    /// Month the club read it, as written on the sheet.
    #[serde(default)]
    pub month: String,
    /// One-line blurb about how it went down.
    #[serde(default)]
    pub short_blurb: String,
}

/// An upcoming event from the events sheet.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event title.
    #[serde(default)]
    pub title: String,
    /// Date as written on the sheet.
    #[serde(default)]
    pub date: String,
    /// Start time as written on the sheet.
    #[serde(default)]
    pub time: String,
    /// Where the event happens.
    #[serde(default)]
    pub location: String,
    /// Free-text description.
    #[serde(default)]
    pub description: String,
    /// Optional Instagram embed for the event page.
    #[serde(default)]
    pub instagram_embed_url: String,
    /// Optional RSVP link.
    #[serde(default)]
    pub rsvp_url: String,
}

/// Bibliographic metadata for a book, merged from the remote source over
/// the curated fallback fields.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BookMetadata {
    /// Resolved title.
    pub title: String,
    /// Resolved author display names, in source order.
    pub authors: Vec<String>,
    /// Description, falling back to the curated summary.
    pub description: String,
    /// Cover image URL, empty when none could be derived.
    pub cover_url: String,
    /// Subjects, at most five.
    pub subjects: Vec<String>,
}

impl BookMetadata {
    /// The fallback record built purely from the curated book fields.
    #[must_use]
    pub fn from_book(book: &Book) -> Self {
        let mut subjects = book.tags.clone();
        subjects.truncate(SUBJECT_CAP);

        Self {
            title: book.title.clone(),
            authors: if book.author.is_empty() {
                Vec::new()
            } else {
                vec![book.author.clone()]
            },
            description: book.custom_summary.clone(),
            cover_url: String::new(),
            subjects,
        }
    }
}

/// Acknowledgement of a newsletter signup.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Signup {
    /// Whether the endpoint accepted the signup.
    pub ok: bool,
    /// Human-readable confirmation, when provided.
    #[serde(default)]
    pub message: Option<String>,
    /// Human-readable rejection reason, when provided.
    #[serde(default)]
    pub error: Option<String>,
}

impl Signup {
    /// The optimistic acknowledgement used when the endpoint's answer
    /// cannot be read.
    #[must_use]
    pub fn subscribed() -> Self {
        Self {
            ok: true,
            message: Some("Subscribed!".to_owned()),
            error: None,
        }
    }
}
