//! reqwest implementation of [`Transport`].

use super::{Transport, UploadProgressSink};
use crate::config::IngestConfig;
use crate::error::{IngestError, TransportError};
use crate::model::{
    JobId, StatusReport, StatusResponse, UploadProgress, UploadReceipt, UploadResponse,
    UrlUploadRequest,
};
use crate::validate::FileUpload;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, Response, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// HTTP client for the ingestion API.
///
/// One `reqwest::Client` (and therefore one cookie jar) is shared by every
/// request; clone the client via [`HttpTransport::client`] to let the
/// authentication collaborator log in on the same session.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    config: IngestConfig,
}

impl HttpTransport {
    /// Build a client with a cookie store and, when configured, a bearer token.
    pub fn new(config: &IngestConfig) -> Result<Self, IngestError> {
        let mut headers = HeaderMap::new();
        if let Some(ref token) = config.api_token {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
                IngestError::InvalidConfig("API token contains invalid header characters".into())
            })?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .cookie_store(true)
            .default_headers(headers)
            .build()
            .map_err(|e| IngestError::Internal(format!("HTTP client: {e}")))?;

        Ok(Self::with_client(config, client))
    }

    /// Use a pre-built client (shared cookie jar, custom TLS, …).
    pub fn with_client(config: &IngestConfig, client: Client) -> Self {
        Self {
            client,
            config: config.clone(),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn status_url(&self, job: &JobId) -> Result<Url, TransportError> {
        let mut url = Url::parse(&self.config.endpoint("api/documents/status"))
            .map_err(|e| TransportError::NetworkFailure(format!("bad status URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| TransportError::NetworkFailure("API base URL cannot be a base".into()))?
            .push(&job.0);
        Ok(url)
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn submit_file(
        &self,
        upload: &FileUpload,
        sink: &dyn UploadProgressSink,
    ) -> Result<UploadReceipt, TransportError> {
        let total = upload.size_bytes();
        info!("Uploading '{}' ({} bytes)", upload.name, total);

        // The body stream runs inside hyper and must be 'static, so it reports
        // through a channel that is drained here while the request is in flight.
        let (tx, mut rx) = mpsc::unbounded_channel::<u64>();
        let chunks: Vec<Vec<u8>> = upload
            .bytes
            .chunks(self.config.upload_chunk_size.max(1))
            .map(<[u8]>::to_vec)
            .collect();
        let mut sent = 0u64;
        let body = futures::stream::iter(chunks).map(move |chunk| {
            sent += chunk.len() as u64;
            let _ = tx.send(sent);
            Ok::<_, std::io::Error>(chunk)
        });

        let part = Part::stream_with_length(Body::wrap_stream(body), total)
            .file_name(upload.name.clone())
            .mime_str(&upload.mime_type)
            .map_err(|e| {
                TransportError::NetworkFailure(format!(
                    "invalid content type '{}': {e}",
                    upload.mime_type
                ))
            })?;
        let form = Form::new().part("file", part);

        sink.on_progress(UploadProgress {
            bytes_sent: 0,
            bytes_total: total,
        });

        let request = self
            .client
            .post(self.config.endpoint("api/documents/upload"))
            .multipart(form)
            .send();
        tokio::pin!(request);

        let result = loop {
            tokio::select! {
                biased;
                Some(bytes_sent) = rx.recv() => sink.on_progress(UploadProgress {
                    bytes_sent,
                    bytes_total: total,
                }),
                res = &mut request => break res,
            }
        };
        while let Ok(bytes_sent) = rx.try_recv() {
            sink.on_progress(UploadProgress {
                bytes_sent,
                bytes_total: total,
            });
        }

        let response = result.map_err(|e| map_reqwest_error(e, None))?;
        let parsed: UploadResponse = decode(response).await?;
        debug!(
            "Upload accepted: document {} job {} (server name {:?})",
            parsed.document_id, parsed.processing_job_id, parsed.file_name
        );
        Ok(parsed.into())
    }

    async fn submit_url(&self, url: &str) -> Result<UploadReceipt, TransportError> {
        info!("Submitting URL {}", url);
        let response = self
            .client
            .post(self.config.endpoint("api/documents/upload-url"))
            .timeout(self.config.request_timeout)
            .json(&UrlUploadRequest { url })
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, Some(self.config.request_timeout)))?;
        let parsed: UploadResponse = decode(response).await?;
        Ok(parsed.into())
    }

    async fn fetch_status(&self, job: &JobId) -> Result<StatusReport, TransportError> {
        let url = self.status_url(job)?;
        let response = self
            .client
            .get(url)
            .timeout(self.config.poll_timeout)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, Some(self.config.poll_timeout)))?;
        let parsed: StatusResponse = decode(response).await?;
        Ok(parsed.into())
    }
}

/// Check the status code, read the whole body, decode JSON.
pub(crate) async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, TransportError> {
    let status = response.status();
    if !status.is_success() {
        return Err(TransportError::ServerRejected {
            status: status.as_u16(),
        });
    }
    let bytes = response
        .bytes()
        .await
        .map_err(|e| map_reqwest_error(e, None))?;
    serde_json::from_slice(&bytes).map_err(|e| TransportError::MalformedResponse(e.to_string()))
}

pub(crate) fn map_reqwest_error(err: reqwest::Error, timeout: Option<Duration>) -> TransportError {
    if err.is_timeout() {
        return TransportError::Timeout {
            secs: timeout.map_or(0, |t| t.as_secs()),
        };
    }
    if err.is_decode() {
        return TransportError::MalformedResponse(err.to_string());
    }
    TransportError::NetworkFailure(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_url_escapes_job_id() {
        let config = IngestConfig::builder()
            .api_base_url("http://localhost:9000/base")
            .build()
            .unwrap();
        let t = HttpTransport::new(&config).unwrap();
        let url = t.status_url(&JobId("job 1/2".into())).unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:9000/base/api/documents/status/job%201%2F2"
        );
    }

    #[test]
    fn rejects_token_with_newline() {
        let config = IngestConfig::builder()
            .api_token("abc\ndef")
            .build()
            .unwrap();
        assert!(matches!(
            HttpTransport::new(&config),
            Err(IngestError::InvalidConfig(_))
        ));
    }
}
