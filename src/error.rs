//! Error types for the docingest library.
//!
//! Three layers of failure, three types:
//!
//! * [`ValidationError`]: the submission was rejected client-side before
//!   anything was created in the registry or sent over the network.
//!
//! * [`TransportError`]: a single HTTP exchange with the ingestion service
//!   failed. Transport errors are *returned*, never panicked, so the workflow
//!   engine and the poller can pick their own retry policy.
//!
//! * [`IngestError`]: what a public entry point hands back to its caller.
//!   Wraps the two above plus session, configuration and I/O failures.
//!
//! A server-reported processing failure and a poller that gave up are not
//! errors of any call: they are terminal document states, surfaced as
//! [`crate::progress::Notification`] events.

use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors returned by the public docingest entry points.
#[derive(Debug, Error)]
pub enum IngestError {
    // ── Pre-submission ────────────────────────────────────────────────────
    /// Client-side validation rejected the input; nothing was submitted.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The session gate reported no authorized user.
    #[error("Not logged in: uploads require an authorized session.\nLog in first (--username/--password) or pass --token.")]
    Unauthorized,

    /// The workflow was shut down (logout or Ctrl-C); no new submissions.
    #[error("The upload session has been shut down")]
    ShutDown,

    // ── Network ───────────────────────────────────────────────────────────
    /// A request to the ingestion service failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The authentication collaborator failed.
    #[error(transparent)]
    Auth(#[from] AuthError),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not read a local file selected for upload.
    #[error("Failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Client-side rejection of a file or URL submission.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// MIME type is not on the configured allow-list.
    #[error("Unsupported file type '{mime_type}' for '{name}'. Supported: {allowed}")]
    UnsupportedMimeType {
        name: String,
        mime_type: String,
        allowed: String,
    },

    /// File exceeds the configured maximum size.
    #[error("'{name}' is {size_bytes} bytes; the maximum upload size is {max_bytes} bytes")]
    FileTooLarge {
        name: String,
        size_bytes: u64,
        max_bytes: u64,
    },

    /// File has no content.
    #[error("'{name}' is empty")]
    EmptyFile { name: String },

    /// File has no usable name.
    #[error("File name is missing")]
    MissingFileName,

    /// URL field was empty.
    #[error("URL is empty")]
    EmptyUrl,

    /// URL did not parse as an absolute URL.
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// URL parsed but its scheme cannot be fetched by the service.
    #[error("Unsupported URL scheme '{scheme}' in '{url}': use http or https")]
    UnsupportedScheme { url: String, scheme: String },
}

/// Failure of a single exchange with the ingestion service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Connection refused, reset, DNS failure, body stream error, …
    #[error("Network failure: {0}")]
    NetworkFailure(String),

    /// The service answered with a non-success HTTP status.
    #[error("Server rejected the request with HTTP {status}")]
    ServerRejected { status: u16 },

    /// The response body could not be decoded.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// No response within the configured deadline.
    #[error("Request timed out after {secs}s")]
    Timeout { secs: u64 },
}

impl TransportError {
    /// Whether repeating the same request could plausibly succeed.
    ///
    /// Network blips, timeouts, `429` and `5xx` are transient. Any other
    /// `4xx` (job vanished, session expired) and undecodable responses are
    /// permanent: retrying would only repeat the same answer.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::NetworkFailure(_) | TransportError::Timeout { .. } => true,
            TransportError::ServerRejected { status } => *status == 429 || *status >= 500,
            TransportError::MalformedResponse(_) => false,
        }
    }
}

/// Errors from the authentication collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Login was refused by the server.
    #[error("Login failed: {0}")]
    InvalidCredentials(String),

    /// The auth endpoint could not be reached or answered garbage.
    #[error(transparent)]
    Transport(#[from] TransportError),
}
