//! Configuration for the ingestion workflow.
//!
//! Every knob the workflow consumes lives in [`IngestConfig`], built via its
//! [`IngestConfigBuilder`] or loaded from `DOCINGEST_*` environment
//! variables with [`IngestConfig::from_env`]. Nothing in the workflow is
//! hard-coded: the API base URL, the MIME allow-list, the size limit and the
//! polling cadence are all injected from here.

use crate::error::IngestError;
use std::fmt;
use std::time::Duration;

/// MIME type of PDF documents.
pub const MIME_PDF: &str = "application/pdf";
/// MIME type of Word (OOXML) documents.
pub const MIME_DOCX: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Default upload size limit: 10 MiB.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Configuration for an ingestion session.
///
/// # Example
/// ```rust
/// use docingest::IngestConfig;
/// use std::time::Duration;
///
/// let config = IngestConfig::builder()
///     .api_base_url("https://ingest.example.com")
///     .poll_interval(Duration::from_secs(2))
///     .build()
///     .unwrap();
/// assert_eq!(config.max_file_size_bytes, 10 * 1024 * 1024);
/// ```
#[derive(Clone)]
pub struct IngestConfig {
    /// Base URL of the ingestion service, without trailing slash.
    /// Default: `http://localhost:8080`.
    pub api_base_url: String,

    /// Bearer token sent on every request. Default: none (cookie session).
    pub api_token: Option<String>,

    /// MIME types accepted for file uploads. Default: PDF and DOCX.
    pub allowed_mime_types: Vec<String>,

    /// Largest file accepted for upload, in bytes. Default: 10 MiB.
    ///
    /// Checked client-side before the record is created, so an oversized
    /// file never reaches the registry or the network.
    pub max_file_size_bytes: u64,

    /// Delay between upload completion and the first status query. Default: 3 s.
    ///
    /// Gives the backend time to enqueue the processing job.
    pub initial_poll_delay: Duration,

    /// Delay between a status response and the next query. Default: 5 s.
    pub poll_interval: Duration,

    /// Deadline for a single status request. Default: 15 s.
    pub poll_timeout: Duration,

    /// Consecutive transient poll failures tolerated before a document is
    /// marked `Unknown`. Default: 5. Set to 1 to give up on the first error.
    pub max_poll_failures: u32,

    /// Base delay of the exponential backoff between failed polls. Default: 1 s.
    ///
    /// Doubles after each consecutive failure and is capped at four poll
    /// intervals.
    pub poll_retry_backoff: Duration,

    /// Status requests allowed in flight at once across all documents. Default: 8.
    pub max_concurrent_polls: usize,

    /// Timeout for JSON requests (URL submission, auth). Default: 30 s.
    /// File uploads are not bounded by it.
    pub request_timeout: Duration,

    /// Size of the chunks a file body is streamed in. Default: 64 KiB.
    ///
    /// Each chunk handed to the HTTP stack produces one progress event.
    pub upload_chunk_size: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080".to_string(),
            api_token: None,
            allowed_mime_types: vec![MIME_PDF.to_string(), MIME_DOCX.to_string()],
            max_file_size_bytes: DEFAULT_MAX_FILE_SIZE,
            initial_poll_delay: Duration::from_secs(3),
            poll_interval: Duration::from_secs(5),
            poll_timeout: Duration::from_secs(15),
            max_poll_failures: 5,
            poll_retry_backoff: Duration::from_secs(1),
            max_concurrent_polls: 8,
            request_timeout: Duration::from_secs(30),
            upload_chunk_size: 64 * 1024,
        }
    }
}

impl fmt::Debug for IngestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestConfig")
            .field("api_base_url", &self.api_base_url)
            .field("api_token", &self.api_token.as_ref().map(|_| "<redacted>"))
            .field("allowed_mime_types", &self.allowed_mime_types)
            .field("max_file_size_bytes", &self.max_file_size_bytes)
            .field("initial_poll_delay", &self.initial_poll_delay)
            .field("poll_interval", &self.poll_interval)
            .field("poll_timeout", &self.poll_timeout)
            .field("max_poll_failures", &self.max_poll_failures)
            .field("poll_retry_backoff", &self.poll_retry_backoff)
            .field("max_concurrent_polls", &self.max_concurrent_polls)
            .field("request_timeout", &self.request_timeout)
            .field("upload_chunk_size", &self.upload_chunk_size)
            .finish()
    }
}

impl IngestConfig {
    /// Create a new builder for `IngestConfig`.
    pub fn builder() -> IngestConfigBuilder {
        IngestConfigBuilder {
            config: Self::default(),
        }
    }

    /// Start a builder from `DOCINGEST_*` environment variables.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `DOCINGEST_API_BASE_URL` | `api_base_url` |
    /// | `DOCINGEST_API_TOKEN` | `api_token` |
    /// | `DOCINGEST_MAX_FILE_SIZE` | `max_file_size_bytes` |
    /// | `DOCINGEST_INITIAL_POLL_DELAY_MS` | `initial_poll_delay` |
    /// | `DOCINGEST_POLL_INTERVAL_MS` | `poll_interval` |
    /// | `DOCINGEST_POLL_TIMEOUT_MS` | `poll_timeout` |
    /// | `DOCINGEST_MAX_POLL_FAILURES` | `max_poll_failures` |
    /// | `DOCINGEST_MAX_CONCURRENT_POLLS` | `max_concurrent_polls` |
    ///
    /// Unset variables keep their defaults; unparsable ones are an error.
    pub fn from_env() -> Result<IngestConfigBuilder, IngestError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<IngestConfigBuilder, IngestError> {
        let mut builder = Self::builder();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get("DOCINGEST_API_BASE_URL") {
            builder = builder.api_base_url(url);
        }
        if let Some(token) = get("DOCINGEST_API_TOKEN") {
            builder = builder.api_token(token);
        }
        if let Some(v) = get("DOCINGEST_MAX_FILE_SIZE") {
            builder = builder.max_file_size_bytes(parse_env("DOCINGEST_MAX_FILE_SIZE", &v)?);
        }
        if let Some(v) = get("DOCINGEST_INITIAL_POLL_DELAY_MS") {
            let ms = parse_env("DOCINGEST_INITIAL_POLL_DELAY_MS", &v)?;
            builder = builder.initial_poll_delay(Duration::from_millis(ms));
        }
        if let Some(v) = get("DOCINGEST_POLL_INTERVAL_MS") {
            let ms = parse_env("DOCINGEST_POLL_INTERVAL_MS", &v)?;
            builder = builder.poll_interval(Duration::from_millis(ms));
        }
        if let Some(v) = get("DOCINGEST_POLL_TIMEOUT_MS") {
            let ms = parse_env("DOCINGEST_POLL_TIMEOUT_MS", &v)?;
            builder = builder.poll_timeout(Duration::from_millis(ms));
        }
        if let Some(v) = get("DOCINGEST_MAX_POLL_FAILURES") {
            let n = parse_env("DOCINGEST_MAX_POLL_FAILURES", &v)?;
            builder = builder.max_poll_failures(narrow("DOCINGEST_MAX_POLL_FAILURES", &v, n)?);
        }
        if let Some(v) = get("DOCINGEST_MAX_CONCURRENT_POLLS") {
            let n = parse_env("DOCINGEST_MAX_CONCURRENT_POLLS", &v)?;
            builder = builder.max_concurrent_polls(narrow("DOCINGEST_MAX_CONCURRENT_POLLS", &v, n)?);
        }
        Ok(builder)
    }

    /// Join `path` onto the API base URL.
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.api_base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Human-readable list of accepted MIME types, for error messages.
    pub fn allowed_types_label(&self) -> String {
        self.allowed_mime_types
            .iter()
            .map(|m| match m.as_str() {
                MIME_PDF => "PDF".to_string(),
                MIME_DOCX => "DOCX".to_string(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn parse_env(key: &str, value: &str) -> Result<u64, IngestError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|e| IngestError::InvalidConfig(format!("{key}='{value}': {e}")))
}

/// Convert a parsed variable to the field's integer type without truncating.
fn narrow<T: TryFrom<u64>>(key: &str, value: &str, n: u64) -> Result<T, IngestError>
where
    T::Error: fmt::Display,
{
    T::try_from(n).map_err(|e| IngestError::InvalidConfig(format!("{key}='{value}': {e}")))
}

/// Builder for [`IngestConfig`].
#[derive(Debug)]
pub struct IngestConfigBuilder {
    config: IngestConfig,
}

impl IngestConfigBuilder {
    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.api_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn api_token(mut self, token: impl Into<String>) -> Self {
        self.config.api_token = Some(token.into());
        self
    }

    pub fn allowed_mime_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.allowed_mime_types = types.into_iter().map(Into::into).collect();
        self
    }

    pub fn max_file_size_bytes(mut self, bytes: u64) -> Self {
        self.config.max_file_size_bytes = bytes;
        self
    }

    pub fn initial_poll_delay(mut self, delay: Duration) -> Self {
        self.config.initial_poll_delay = delay;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.config.poll_timeout = timeout;
        self
    }

    pub fn max_poll_failures(mut self, n: u32) -> Self {
        self.config.max_poll_failures = n;
        self
    }

    pub fn poll_retry_backoff(mut self, backoff: Duration) -> Self {
        self.config.poll_retry_backoff = backoff;
        self
    }

    pub fn max_concurrent_polls(mut self, n: usize) -> Self {
        self.config.max_concurrent_polls = n;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn upload_chunk_size(mut self, bytes: usize) -> Self {
        self.config.upload_chunk_size = bytes.max(1);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<IngestConfig, IngestError> {
        let c = &self.config;
        match reqwest::Url::parse(&c.api_base_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => {
                return Err(IngestError::InvalidConfig(format!(
                    "API base URL must be http or https, got '{}'",
                    url.scheme()
                )))
            }
            Err(e) => {
                return Err(IngestError::InvalidConfig(format!(
                    "API base URL '{}' is not a valid absolute URL: {e}",
                    c.api_base_url
                )))
            }
        }
        if c.allowed_mime_types.is_empty() {
            return Err(IngestError::InvalidConfig(
                "At least one MIME type must be allowed".into(),
            ));
        }
        if c.max_file_size_bytes == 0 {
            return Err(IngestError::InvalidConfig(
                "Maximum file size must be > 0".into(),
            ));
        }
        if c.poll_interval.is_zero() {
            return Err(IngestError::InvalidConfig(
                "Poll interval must be > 0".into(),
            ));
        }
        if c.poll_timeout.is_zero() || c.request_timeout.is_zero() {
            return Err(IngestError::InvalidConfig("Timeouts must be > 0".into()));
        }
        if c.max_poll_failures == 0 {
            return Err(IngestError::InvalidConfig(
                "max_poll_failures must be ≥ 1".into(),
            ));
        }
        if c.max_concurrent_polls == 0 {
            return Err(IngestError::InvalidConfig(
                "max_concurrent_polls must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}
