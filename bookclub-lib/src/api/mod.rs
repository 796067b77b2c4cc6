use serde::de::DeserializeOwned;

pub(crate) mod content;
pub(crate) mod open_library;

/// The blocking HTTP surface used by the API clients.
///
/// Implementations are constructed per call via [`Default`], which keeps
/// the API functions generic and lets tests substitute a canned client.
pub trait Client
where
    Self: Default,
{
    /// GET `url` and deserialize the JSON response body.
    fn get_json<T>(&self, url: &str) -> Result<T, Error>
    where
        T: DeserializeOwned;

    /// POST `body` to `url` and return the raw response body text,
    /// whatever the response status was.
    fn post_text(&self, url: &str, body: String) -> Result<String, Error>;

    /// POST `body` to `url` without inspecting the outcome.
    fn post_and_forget(&self, url: &str, body: String);
}

impl Client for reqwest::blocking::Client {
    fn get_json<T>(&self, url: &str) -> Result<T, Error>
    where
        T: DeserializeOwned,
    {
        self.get(url)
            .send()
            .map_err(|e| Error::wrap(ErrorKind::IO, e))
            .and_then(|r| {
                r.error_for_status()
                    .map_err(|e| Error::wrap(ErrorKind::Status, e))
            })
            .and_then(|r| r.json().map_err(|e| Error::wrap(ErrorKind::Deserialize, e)))
    }

    fn post_text(&self, url: &str, body: String) -> Result<String, Error> {
        let resp = self
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(body)
            .send()
            .map_err(|e| Error::wrap(ErrorKind::IO, e))?;

        resp.text().map_err(|e| Error::wrap(ErrorKind::IO, e))
    }

    fn post_and_forget(&self, url: &str, body: String) {
        // Delivery cannot be verified either way, so the response is dropped.
        let _ = self
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(body)
            .send();
    }
}

#[cfg(test)]
pub(crate) use test::{
    assert_url, impl_text_producer, MockClient, NetworkErrorProducer, Producer, FORGET_SINK,
    URL_SINK,
};

use crate::{Error, ErrorKind};
