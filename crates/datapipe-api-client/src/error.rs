//! Error types for the API client.

use thiserror::Error;

/// Errors that can occur when talking to the statistics API.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport-level failure (connect, timeout, body read).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    /// Body was not valid JSON.
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Body was JSON but not the expected `[meta, rows]` shape.
    #[error("unexpected response shape: {0}")]
    Shape(String),

    /// Page-count discovery returned no pages.
    #[error("indicator {0} reported no pages")]
    NoPages(String),
}
