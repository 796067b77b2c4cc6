#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::perf,
    clippy::style,
    clippy::missing_safety_doc,
    clippy::missing_const_for_fn
)]
#![warn(missing_docs, rust_2018_idioms)]
#![allow(clippy::module_name_repetitions)]
#![doc = include_str!("../README.md")]

mod api;
pub mod cache;
mod error;
pub mod model;

pub use api::content::ContentClient;
pub use api::open_library::Enricher;
pub use api::Client;
pub use error::{Error, ErrorKind};
