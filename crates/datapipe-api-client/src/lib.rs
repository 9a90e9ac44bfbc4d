//! Client library for the indicator statistics API.
//!
//! The API answers `GET {base}/{indicator}?format=json&per_page=N&page=P`
//! with a two element JSON array: paging metadata, then the data rows.
//! [`ApiClient`] discovers the page count and fetches individual pages;
//! [`response`] turns a body into [`datapipe_core::RawRecord`]s and rejects
//! anything that does not have that shape.

pub mod error;
pub mod http;
pub mod response;

pub use error::ClientError;
pub use http::ApiClient;
pub use response::PageMeta;
