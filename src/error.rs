//! Error types for couchdb-stream.

use reqwest::StatusCode;
use thiserror::Error;

/// Error type for couchdb-stream operations.
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with an unexpected status code.
    #[error("Unexpected status {status}: {error}: {reason}")]
    Status {
        /// HTTP status of the response.
        status: StatusCode,
        /// CouchDB error identifier, e.g. `not_found`.
        error: String,
        /// Human readable reason supplied by CouchDB.
        reason: String,
    },

    /// A successful `HEAD` on a document carried no `ETag` header.
    #[error("Response carries no ETag header")]
    MissingEtag,

    /// Server URL could not be parsed.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// View was addressed with a design document name lacking the `_design/` prefix.
    #[error("Design doc name must start with _design/: {0}")]
    InvalidDesignDoc(String),

    /// Failed to encode a request or decode a whole response.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error during streaming.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A body line matched none of the row or boundary patterns.
    #[error("Unexpected line in row stream: {line:?}")]
    Framing {
        /// The offending line, lossily decoded.
        line: String,
    },

    /// The body ended before the rows array was closed.
    #[error("Row stream ended unexpectedly")]
    UnexpectedEof,

    /// A row line is not a valid row object.
    #[error("Failed to decode row: {0}")]
    RowDecode(#[source] serde_json::Error),

    /// `value` or `doc` was requested but the server did not send it.
    #[error("Row has no {0}")]
    MissingField(&'static str),

    /// `value` or `doc` could not be decoded into the requested type.
    #[error("Failed to decode row {field}: {source}")]
    Payload {
        /// Either `value` or `doc`.
        field: &'static str,
        /// Underlying decode failure.
        #[source]
        source: serde_json::Error,
    },
}

impl Error {
    /// Returns true if this is a [`Error::Status`] carrying the given status code.
    ///
    /// ```ignore
    /// if let Err(e) = client.create_db("events").await {
    ///     if !e.is_status(StatusCode::PRECONDITION_FAILED) {
    ///         return Err(e);
    ///     }
    /// }
    /// ```
    pub fn is_status(&self, code: StatusCode) -> bool {
        matches!(self, Error::Status { status, .. } if *status == code)
    }
}

/// Result type alias for couchdb-stream operations.
pub type Result<T> = std::result::Result<T, Error>;
