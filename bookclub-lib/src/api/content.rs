use std::marker::PhantomData;
use std::time::Duration;

use log::{info, trace};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{
    cache::{Cache, MemoryStore, Store},
    model::{Book, CurrentRead, Signup},
    Error, ErrorKind,
};

use super::Client;

/// How long a fetched content payload stays valid.
pub(crate) const CONTENT_TTL: Duration = Duration::from_secs(5 * 60);

/// Derives the cache key for a content resource.
fn cache_key(resource: &str) -> String {
    format!("api_{resource}")
}

/// Client for the spreadsheet-backed content endpoint.
///
/// The endpoint base URL is injected at construction and read responses
/// are cached in the given [`Store`] for five minutes. Reads propagate
/// transport, status and decode failures to the caller; there is no
/// retry.
pub struct ContentClient<C = reqwest::blocking::Client, S = MemoryStore>
where
    C: Client,
    S: Store,
{
    base_url: String,
    cache: Cache<S>,
    _client: PhantomData<C>,
}

impl<C: Client, S: Store> ContentClient<C, S> {
    /// Creates a client against `base_url`, caching reads in `store`.
    pub fn new<U: Into<String>>(base_url: U, store: S) -> Self {
        Self::with_ttl(base_url, store, CONTENT_TTL)
    }

    /// Same as [`ContentClient::new`] with an explicit cache TTL.
    pub fn with_ttl<U: Into<String>>(base_url: U, store: S, ttl: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            cache: Cache::new(store, ttl),
            _client: PhantomData,
        }
    }

    /// The normalized current-read data.
    ///
    /// # Errors
    ///
    /// An `Err` is returned when the request fails or the response body is
    /// not JSON.
    pub fn current(&self) -> Result<CurrentRead, Error> {
        self.fetch("current").map(|data| normalize_current(&data))
    }

    /// The list of past reads, decoded as-is.
    ///
    /// # Errors
    ///
    /// An `Err` is returned when the request fails or the response body
    /// does not decode as a list of past reads.
    pub fn past(&self) -> Result<Vec<crate::model::PastRead>, Error> {
        self.fetch("past").and_then(decode)
    }

    /// The list of upcoming events, decoded as-is.
    ///
    /// # Errors
    ///
    /// An `Err` is returned when the request fails or the response body
    /// does not decode as a list of events.
    pub fn events(&self) -> Result<Vec<crate::model::Event>, Error> {
        self.fetch("events").and_then(decode)
    }

    fn fetch(&self, resource: &str) -> Result<Value, Error> {
        let key = cache_key(resource);
        if let Some(data) = self.cache.get::<Value>(&key) {
            trace!("Using cached '{resource}' payload");
            return Ok(data);
        }

        info!("Fetching '{resource}' from the content endpoint");
        let url = format!("{}?path={resource}", self.base_url);
        let client = C::default();
        let data: Value = client.get_json(&url)?;

        self.cache.set(&key, &data);
        Ok(data)
    }

    /// Submits a newsletter signup.
    ///
    /// Delivery is best effort: the endpoint answers through a
    /// cross-origin redirect whose response is often unreadable even when
    /// the row was appended. An unreadable answer is reported as success,
    /// and a failed request is retried once fire-and-forget before
    /// reporting success. Only an explicit, readable failure payload from
    /// the endpoint is returned as a failure.
    pub fn subscribe(&self, email: &str, source_page: &str, honeypot: &str) -> Signup {
        let url = format!("{}?path=newsletter", self.base_url);
        let body = serde_json::json!({
            "email": email,
            "source_page": if source_page.is_empty() { "unknown" } else { source_page },
            "website": honeypot,
        })
        .to_string();

        let client = C::default();
        match client.post_text(&url, body.clone()) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|_| Signup::subscribed()),
            Err(err) => {
                info!("Newsletter POST failed ({err}), sending fire-and-forget fallback");
                client.post_and_forget(&url, body);
                Signup::subscribed()
            }
        }
    }
}

fn decode<T: DeserializeOwned>(data: Value) -> Result<T, Error> {
    serde_json::from_value(data).map_err(|e| Error::wrap(ErrorKind::Deserialize, e))
}

/// Normalizes a current-read payload so every consumer sees a stable
/// shape, whatever the sheet produced.
fn normalize_current(data: &Value) -> CurrentRead {
    let raw_books = match data.get("books") {
        Some(Value::Array(books)) => books.clone(),
        // Old flat format: the payload itself is the single book.
        _ if looks_like_book(data) => vec![data.clone()],
        _ => Vec::new(),
    };

    let mut books: Vec<Book> = raw_books.iter().filter_map(normalize_book).collect();
    for (i, book) in books.iter_mut().enumerate() {
        if book.id.is_empty() {
            book.id = format!("book{}", i + 1);
        }
    }

    CurrentRead {
        books,
        voting_open: is_voting_open(data.get("voting_open")),
        vote_form_url: str_field(data, "vote_form_url"),
    }
}

fn looks_like_book(data: &Value) -> bool {
    ["isbn", "work_id", "title"]
        .iter()
        .any(|field| !str_field(data, field).is_empty())
}

/// Coerces a raw book object, dropping it when no identifying field
/// survives trimming.
fn normalize_book(raw: &Value) -> Option<Book> {
    let book = Book {
        id: str_field(raw, "id"),
        isbn: str_field(raw, "isbn"),
        work_id: str_field(raw, "work_id"),
        title: str_field(raw, "title"),
        author: str_field(raw, "author"),
        custom_summary: str_field(raw, "custom_summary"),
        tags: list_field(raw, "tags", ';'),
        discussion_prompts: list_field(raw, "discussion_prompts", '|'),
    };

    book.has_identifier().then_some(book)
}

fn str_field(data: &Value, field: &str) -> String {
    data.get(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

/// Coerces a field that arrives as either a delimited string or an array
/// into a trimmed list without empty items.
fn list_field(data: &Value, field: &str, delimiter: char) -> Vec<String> {
    match data.get(field) {
        Some(Value::String(s)) => s
            .split(delimiter)
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(ToOwned::to_owned)
            .collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(ToOwned::to_owned)
            .collect(),
        _ => Vec::new(),
    }
}

fn is_voting_open(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::api::{assert_url, impl_text_producer, MockClient, NetworkErrorProducer, Producer};
    use crate::model::PastRead;

    type TestClient<P> = ContentClient<MockClient<P>>;

    fn client<P: Producer<String>>() -> ContentClient<MockClient<P>> {
        ContentClient::new("http://content.test", MemoryStore::default())
    }

    impl_text_producer! {
        FlatBookProducer => Ok(r#"{"title": "Dune", "author": "Frank Herbert"}"#.to_owned()),
        MixedBooksProducer => Ok(r#"{
            "books": [
                {"title": "Dune", "tags": "a; b ;c", "discussion_prompts": "p1|p2"},
                {"author": "nobody remembers the title"},
                {"id": "kept", "isbn": "978-0441172719"}
            ],
            "voting_open": "TRUE",
            "vote_form_url": "https://example.test/vote"
        }"#.to_owned()),
        EmptyObjectProducer => Ok("{}".to_owned()),
        PastProducer => Ok(r#"[
            {"title": "Dune Messiah", "author": "Frank Herbert", "month": "March", "short_blurb": "Divisive."},
            {"title": "Kindred"}
        ]"#.to_owned()),
        EventsProducer => Ok(r#"[{"title": "March meetup", "date": "2024-03-07", "location": "Library"}]"#.to_owned()),
        SignupOkProducer => Ok(r#"{"ok": true, "message": "Thanks!"}"#.to_owned()),
        SignupRejectedProducer => Ok(r#"{"ok": false, "error": "Bad email"}"#.to_owned()),
        RedirectHtmlProducer => Ok("<html>moved</html>".to_owned()),
    }

    #[test]
    fn current_url_format_is_correct() {
        let client = client::<EmptyObjectProducer>();

        client.current().expect("empty object is valid JSON");

        assert_url!("http://content.test?path=current");
    }

    #[test]
    fn flat_payload_is_wrapped_into_single_book() {
        let client = client::<FlatBookProducer>();

        let current = client.current().expect("payload is valid JSON");

        assert_eq!(1, current.books.len());
        assert_eq!("Dune", current.books[0].title);
        assert_eq!("Frank Herbert", current.books[0].author);
    }

    #[test]
    fn books_without_identifiers_are_dropped() {
        let client = client::<MixedBooksProducer>();

        let current = client.current().expect("payload is valid JSON");

        assert_eq!(2, current.books.len());
        assert!(current.books.iter().all(Book::has_identifier));
    }

    #[test]
    fn surviving_books_get_synthetic_ids() {
        let client = client::<MixedBooksProducer>();

        let current = client.current().expect("payload is valid JSON");

        assert_eq!("book1", current.books[0].id);
        // An id from the sheet is kept as-is.
        assert_eq!("kept", current.books[1].id);
    }

    #[test]
    fn delimited_strings_become_lists() {
        let client = client::<MixedBooksProducer>();

        let book = client.current().expect("payload is valid JSON").books[0].clone();

        assert_eq!(vec!["a".to_owned(), "b".to_owned(), "c".to_owned()], book.tags);
        assert_eq!(
            vec!["p1".to_owned(), "p2".to_owned()],
            book.discussion_prompts
        );
    }

    #[test]
    fn voting_open_accepts_sheet_booleans() {
        for (raw, expected) in [
            (r#"{"voting_open": true}"#, true),
            (r#"{"voting_open": "true"}"#, true),
            (r#"{"voting_open": "TRUE"}"#, true),
            (r#"{"voting_open": false}"#, false),
            (r#"{"voting_open": "false"}"#, false),
            ("{}", false),
        ] {
            let data: Value = serde_json::from_str(raw).unwrap();
            assert_eq!(
                expected,
                normalize_current(&data).voting_open,
                "payload: {raw}"
            );
        }
    }

    #[test]
    fn vote_form_url_defaults_to_empty() {
        let data: Value = serde_json::from_str("{}").unwrap();

        assert_eq!("", normalize_current(&data).vote_form_url);
    }

    thread_local! {
        static CALLS: Cell<usize> = Cell::new(0);
    }

    #[derive(Default)]
    struct CountingProducer;

    impl Producer<String> for CountingProducer {
        fn produce(_url: &str) -> Result<String, Error> {
            CALLS.with(|calls| calls.set(calls.get() + 1));
            Ok(r#"{"books": [{"title": "Dune"}]}"#.to_owned())
        }
    }

    #[test]
    fn reads_within_ttl_reuse_the_cached_payload() {
        let client: TestClient<CountingProducer> = client();

        let first = client.current().expect("payload is valid JSON");
        let second = client.current().expect("payload is valid JSON");

        assert_eq!(first, second);
        assert_eq!(1, CALLS.with(Cell::get), "second read should hit the cache");
    }

    #[test]
    fn stale_cache_entries_are_refetched() {
        let store = MemoryStore::default();
        // An entry stamped at the epoch is stale under any practical TTL.
        store.set(
            "api_past",
            r#"{"data": [{"title": "Old Cached Read"}], "ts": 0}"#.to_owned(),
        );
        let client: TestClient<PastProducer> =
            ContentClient::new("http://content.test", store);

        let reads = client.past().expect("payload is valid JSON");

        assert_eq!("Dune Messiah", reads[0].title);
    }

    #[test]
    fn past_reads_decode_with_missing_fields() {
        let client = client::<PastProducer>();

        let reads = client.past().expect("payload is valid JSON");

        assert_eq!(2, reads.len());
        assert_eq!(
            PastRead {
                title: "Kindred".to_owned(),
                ..PastRead::default()
            },
            reads[1]
        );
    }

    #[test]
    fn events_decode_with_missing_fields() {
        let client = client::<EventsProducer>();

        let events = client.events().expect("payload is valid JSON");

        assert_eq!(1, events.len());
        assert_eq!("March meetup", events[0].title);
        assert_eq!("", events[0].rsvp_url);
    }

    #[test]
    fn read_errors_propagate() {
        let client = client::<NetworkErrorProducer>();

        let err = client.events().expect_err("producer always fails");

        assert_eq!(ErrorKind::IO, err.kind());
    }

    #[test]
    fn newsletter_url_format_is_correct() {
        let client = client::<SignupOkProducer>();

        client.subscribe("a@b.test", "index", "");

        assert_url!("http://content.test?path=newsletter");
    }

    #[test]
    fn readable_acknowledgement_is_returned_verbatim() {
        let client = client::<SignupOkProducer>();

        let ack = client.subscribe("a@b.test", "index", "");

        assert!(ack.ok);
        assert_eq!(Some("Thanks!".to_owned()), ack.message);
    }

    #[test]
    fn readable_rejection_is_returned_as_failure() {
        let client = client::<SignupRejectedProducer>();

        let ack = client.subscribe("a@b.test", "index", "");

        assert!(!ack.ok);
        assert_eq!(Some("Bad email".to_owned()), ack.error);
    }

    #[test]
    fn unreadable_body_reports_optimistic_success() {
        let client = client::<RedirectHtmlProducer>();

        let ack = client.subscribe("a@b.test", "index", "");

        assert_eq!(Signup::subscribed(), ack);
    }

    #[test]
    fn failed_request_falls_back_to_fire_and_forget_success() {
        crate::api::FORGET_SINK.with(|sink| *sink.borrow_mut() = None);
        let client = client::<NetworkErrorProducer>();

        let ack = client.subscribe("a@b.test", "index", "");

        assert_eq!(Signup::subscribed(), ack);
        let fallback_url =
            crate::api::FORGET_SINK.with(|sink| sink.borrow().clone().unwrap_or_default());
        assert_eq!("http://content.test?path=newsletter", fallback_url);
    }
}
