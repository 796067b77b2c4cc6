use std::marker::PhantomData;
use std::time::Duration;

use log::{info, trace, warn};
use rayon::prelude::*;
use serde::Deserialize;

use crate::{
    cache::{Cache, MemoryStore, Store},
    model::{Book, BookMetadata, SUBJECT_CAP},
    Error,
};

use super::Client;

const OPEN_LIBRARY_URL: &str = "https://openlibrary.org";
const COVERS_URL: &str = "https://covers.openlibrary.org/b";

/// How long an enriched metadata record stays valid.
pub(crate) const METADATA_TTL: Duration = Duration::from_secs(10 * 60);

/// Derives the cache key for a book's identifying fields.
fn cache_key(book: &Book) -> String {
    let id = [&book.isbn, &book.work_id, &book.title]
        .into_iter()
        .find(|field| !field.is_empty())
        .map_or("", String::as_str);

    format!("olcache_{}", id.split_whitespace().collect::<Vec<_>>().join("_"))
}

/// Enriches curated book records with Open Library metadata.
///
/// Results are cached per identifying key for ten minutes. Enrichment
/// never fails: every error path degrades to the caller-supplied
/// fallback fields.
pub struct Enricher<C = reqwest::blocking::Client, S = MemoryStore>
where
    C: Client,
    S: Store,
{
    cache: Cache<S>,
    _client: PhantomData<C>,
}

impl<C: Client, S: Store + Default> Default for Enricher<C, S> {
    fn default() -> Self {
        Self::new(S::default())
    }
}

impl<C: Client, S: Store> Enricher<C, S> {
    /// Creates an enricher caching results in `store`.
    pub fn new(store: S) -> Self {
        Self::with_ttl(store, METADATA_TTL)
    }

    /// Same as [`Enricher::new`] with an explicit cache TTL.
    pub fn with_ttl(store: S, ttl: Duration) -> Self {
        Self {
            cache: Cache::new(store, ttl),
            _client: PhantomData,
        }
    }

    /// Produces the metadata record for `book`.
    ///
    /// The fallback chain is tried in priority order on field presence:
    /// ISBN lookup, then work lookup, then title search; the first
    /// applicable strategy runs and its result is merged over the
    /// curated fallback fields in one step. A failed strategy is logged
    /// and leaves the fallback record untouched.
    pub fn enrich(&self, book: &Book) -> BookMetadata {
        let key = cache_key(book);
        if let Some(cached) = self.cache.get::<BookMetadata>(&key) {
            trace!("Using cached metadata for '{key}'");
            return cached;
        }

        let seed = BookMetadata::from_book(book);
        let result = match Strategy::select(book) {
            Some(strategy) => match strategy.run::<C>(book) {
                Ok(patch) => merge(seed, patch),
                Err(err) => {
                    warn!(
                        "{strategy:?} lookup failed for '{}', keeping curated data: {err}",
                        book.title
                    );
                    seed
                }
            },
            None => seed,
        };

        self.cache.set(&key, &result);
        result
    }
}

/// The ordered fallback chain for bibliographic enrichment.
#[derive(Clone, Copy, Debug, PartialEq)]
enum Strategy {
    /// Direct edition lookup by ISBN.
    Edition,
    /// Work lookup by Open Library work id.
    Work,
    /// Free-text title/author search.
    Search,
}

impl Strategy {
    const CHAIN: [Self; 3] = [Self::Edition, Self::Work, Self::Search];

    /// The first strategy in the chain the book carries fields for.
    fn select(book: &Book) -> Option<Self> {
        Self::CHAIN.into_iter().find(|strategy| strategy.applies(book))
    }

    fn applies(self, book: &Book) -> bool {
        match self {
            Self::Edition => !book.isbn.is_empty(),
            Self::Work => !book.work_id.is_empty(),
            Self::Search => !book.title.is_empty(),
        }
    }

    fn run<C: Client>(self, book: &Book) -> Result<Patch, Error> {
        match self {
            Self::Edition => by_edition::<C>(&book.isbn),
            Self::Work => by_work::<C>(&book.work_id),
            Self::Search => by_search::<C>(&book.title, &book.author),
        }
    }
}

/// Partial metadata produced by a single strategy.
///
/// Unset fields leave the curated fallback untouched; strategies only set
/// a field when the remote source had a real value for it.
#[derive(Debug, Default, PartialEq)]
struct Patch {
    title: Option<String>,
    authors: Option<Vec<String>>,
    description: Option<String>,
    cover_url: Option<String>,
    subjects: Option<Vec<String>>,
}

/// Merges a strategy patch over the fallback seed in one step.
///
/// Curated tags always win over remote subjects; everything else prefers
/// the remote value when one was found.
fn merge(mut seed: BookMetadata, patch: Patch) -> BookMetadata {
    if let Some(title) = patch.title {
        seed.title = title;
    }
    if let Some(authors) = patch.authors {
        seed.authors = authors;
    }
    if let Some(description) = patch.description {
        seed.description = description;
    }
    if let Some(cover_url) = patch.cover_url {
        seed.cover_url = cover_url;
    }
    if seed.subjects.is_empty() {
        if let Some(mut subjects) = patch.subjects {
            subjects.truncate(SUBJECT_CAP);
            seed.subjects = subjects;
        }
    }
    seed
}

/// Edition record returned by the ISBN resource.
#[derive(Deserialize)]
struct Edition {
    title: Option<String>,
    #[serde(default)]
    authors: Vec<AuthorRef>,
    #[serde(default)]
    works: Vec<KeyRef>,
    description: Option<Description>,
}

/// Work record returned by the works resource.
#[derive(Deserialize)]
struct Work {
    title: Option<String>,
    #[serde(default)]
    covers: Vec<i64>,
    #[serde(default)]
    authors: Vec<AuthorRef>,
    description: Option<Description>,
    #[serde(default)]
    subjects: Vec<String>,
}

/// Author references appear as `{"key": ..}` on editions and as
/// `{"author": {"key": ..}}` on works.
#[derive(Deserialize)]
struct AuthorRef {
    key: Option<String>,
    author: Option<KeyRef>,
}

impl AuthorRef {
    fn key(&self) -> Option<&str> {
        self.key
            .as_deref()
            .or_else(|| self.author.as_ref().map(|author| author.key.as_str()))
    }
}

#[derive(Deserialize)]
struct KeyRef {
    key: String,
}

#[derive(Deserialize)]
struct Author {
    name: Option<String>,
    personal_name: Option<String>,
}

/// An edition or work description: either a plain string or a typed
/// `{value}` object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Description {
    Plain(String),
    Typed { value: String },
}

#[derive(Deserialize)]
struct SearchResults {
    #[serde(default)]
    docs: Vec<SearchDoc>,
}

#[derive(Deserialize)]
struct SearchDoc {
    title: Option<String>,
    #[serde(default)]
    author_name: Vec<String>,
    #[serde(default)]
    isbn: Vec<String>,
    cover_i: Option<i64>,
    key: Option<String>,
    #[serde(default)]
    subject: Vec<String>,
}

/// Extracts the plain text of a description in any of its wire shapes.
fn description_text(description: Option<&Description>) -> String {
    match description {
        Some(Description::Plain(text) | Description::Typed { value: text }) => text.clone(),
        None => String::new(),
    }
}

fn some_text(text: String) -> Option<String> {
    (!text.is_empty()).then_some(text)
}

/// Direct cover-image URL for a cleaned ISBN; no lookup involved.
fn cover_url_for_isbn(isbn: &str) -> String {
    format!("{COVERS_URL}/isbn/{isbn}-L.jpg?default=false")
}

fn cover_url_for_id(cover_id: i64) -> String {
    format!("{COVERS_URL}/id/{cover_id}-L.jpg")
}

fn by_edition<C: Client>(isbn: &str) -> Result<Patch, Error> {
    let isbn: String = isbn
        .chars()
        .filter(|c| *c != '-' && !c.is_whitespace())
        .collect();
    info!("Looking up edition for ISBN '{isbn}'");

    let client = C::default();
    let edition: Edition = client.get_json(&format!("{OPEN_LIBRARY_URL}/isbn/{isbn}.json"))?;

    let Edition {
        title,
        authors,
        works,
        description,
    } = edition;
    let work_key = works.into_iter().next().map(|work| work.key);

    // Author names and the parent work are independent, resolve both at once.
    let (names, work) = rayon::join(
        || resolve_authors::<C>(&authors),
        || work_key.as_deref().and_then(fetch_work::<C>),
    );

    let mut patch = Patch {
        title,
        cover_url: Some(cover_url_for_isbn(&isbn)),
        ..Patch::default()
    };
    if !names.is_empty() {
        patch.authors = Some(names);
    }

    // The edition's own description wins; the work fills in description
    // and subjects otherwise.
    match some_text(description_text(description.as_ref())) {
        Some(text) => patch.description = Some(text),
        None => {
            if let Some(work) = work {
                patch.description = some_text(description_text(work.description.as_ref()));
                patch.subjects = (!work.subjects.is_empty()).then_some(work.subjects);
            }
        }
    }

    Ok(patch)
}

fn by_work<C: Client>(work_id: &str) -> Result<Patch, Error> {
    info!("Looking up work '{work_id}'");

    let client = C::default();
    let work: Work = client.get_json(&format!("{OPEN_LIBRARY_URL}/works/{work_id}.json"))?;

    let Work {
        title,
        covers,
        authors,
        description,
        subjects,
    } = work;

    let mut patch = Patch {
        title,
        cover_url: covers.first().map(|id| cover_url_for_id(*id)),
        ..Patch::default()
    };

    let names = resolve_authors::<C>(&authors);
    if !names.is_empty() {
        patch.authors = Some(names);
    }

    patch.description = some_text(description_text(description.as_ref()));
    patch.subjects = (!subjects.is_empty()).then_some(subjects);

    Ok(patch)
}

fn by_search<C: Client>(title: &str, author: &str) -> Result<Patch, Error> {
    info!("Searching for title '{title}'");

    let mut url = format!(
        "{OPEN_LIBRARY_URL}/search.json?title={}",
        urlencoding::encode(title)
    );
    if !author.is_empty() {
        url.push_str(&format!("&author={}", urlencoding::encode(author)));
    }
    url.push_str("&limit=1");

    let client = C::default();
    let results: SearchResults = client.get_json(&url)?;
    let doc = match results.docs.into_iter().next() {
        Some(doc) => doc,
        None => return Ok(Patch::default()),
    };

    let SearchDoc {
        title,
        author_name,
        isbn,
        cover_i,
        key,
        subject,
    } = doc;

    let mut patch = Patch {
        title,
        cover_url: isbn
            .first()
            .map(|isbn| cover_url_for_isbn(isbn))
            .or_else(|| cover_i.map(cover_url_for_id)),
        ..Patch::default()
    };
    if !author_name.is_empty() {
        patch.authors = Some(author_name);
    }

    // One extra lookup for the work description; title, authors and cover
    // are already in hand, so a failure here is ignored.
    patch.description = key
        .as_deref()
        .and_then(fetch_work::<C>)
        .and_then(|work| some_text(description_text(work.description.as_ref())));

    patch.subjects = (!subject.is_empty()).then_some(subject);

    Ok(patch)
}

/// Best-effort fetch of a work record, `None` on any failure.
fn fetch_work<C: Client>(key: &str) -> Option<Work> {
    let client = C::default();
    client
        .get_json(&format!("{OPEN_LIBRARY_URL}{key}.json"))
        .ok()
}

/// Resolves author references into display names, one fetch per author.
///
/// Lookups run concurrently; failed or nameless ones are dropped and the
/// input order is preserved.
fn resolve_authors<C: Client>(refs: &[AuthorRef]) -> Vec<String> {
    let names: Vec<Option<String>> = refs
        .par_iter()
        .map(|author| author.key().and_then(|key| fetch_author::<C>(key)))
        .collect();

    names.into_iter().flatten().collect()
}

fn fetch_author<C: Client>(key: &str) -> Option<String> {
    let client = C::default();
    let author: Author = client
        .get_json(&format!("{OPEN_LIBRARY_URL}{key}.json"))
        .ok()?;

    author
        .name
        .or(author.personal_name)
        .filter(|name| !name.is_empty())
}
