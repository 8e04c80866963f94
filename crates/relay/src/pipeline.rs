//! Fetch-then-upload relay.
//!
//! Streamed mode (the default) pumps the source body through a bounded
//! channel straight into the PUT body: the upload side waits for chunks, the
//! fetch side waits for the upload socket to drain. Buffered mode reads the
//! whole body first, up to `max_buffered_bytes`.

use std::{sync::Arc, time::Duration};

use {
    bunnydrop_config::BunnydropConfig,
    bytes::{Bytes, BytesMut},
    futures::StreamExt,
    reqwest::{
        StatusCode,
        header::{CONTENT_LENGTH, CONTENT_TYPE},
    },
    secrecy::{ExposeSecret, Secret},
    tokio::{sync::mpsc, task::JoinHandle},
    tokio_stream::wrappers::ReceiverStream,
    tracing::{debug, info, instrument},
    url::Url,
};

use crate::{
    error::{Error, Result, TransferError, describe},
    resolver::UploadRequest,
    retry::{AttemptFailure, RetryPolicy, is_retryable_status, is_retryable_transport},
};

/// Chunks in flight between the fetch and upload halves of a streamed relay.
const STREAM_CHANNEL_CAPACITY: usize = 16;

/// Longest slice of a destination error body echoed back in a failure detail.
const MAX_ERROR_BODY_CHARS: usize = 300;

const OCTET_STREAM: &str = "application/octet-stream";

/// Where uploads go and how they become public.
#[derive(Clone)]
pub struct DestinationConfig {
    storage_base: Url,
    storage_zone: String,
    api_key: Secret<String>,
    pull_zone_base: String,
}

impl DestinationConfig {
    /// `storage_base` and `pull_zone_base` are full base URLs
    /// (`https://storage.bunnycdn.com`, `https://cdn.example.com`).
    pub fn new(
        storage_base: &str,
        storage_zone: impl Into<String>,
        api_key: Secret<String>,
        pull_zone_base: &str,
    ) -> Result<Self> {
        let storage_base = Url::parse(storage_base)
            .map_err(|e| Error::invalid_destination(format!("storage base \"{storage_base}\": {e}")))?;
        if storage_base.cannot_be_a_base() || !matches!(storage_base.scheme(), "http" | "https") {
            return Err(Error::invalid_destination(format!(
                "storage base \"{storage_base}\" is not an http(s) URL"
            )));
        }
        let storage_zone = storage_zone.into().trim_matches('/').to_string();
        if storage_zone.is_empty() {
            return Err(Error::invalid_destination("storage zone is empty"));
        }
        let pull_zone_base = pull_zone_base.trim_end_matches('/').to_string();
        if pull_zone_base.is_empty() {
            return Err(Error::invalid_destination("pull zone is empty"));
        }

        Ok(Self {
            storage_base,
            storage_zone,
            api_key,
            pull_zone_base,
        })
    }

    /// Build from a validated [`BunnydropConfig`].
    pub fn from_config(config: &BunnydropConfig) -> Result<Self> {
        let api_key = config
            .storage
            .api_key
            .clone()
            .ok_or_else(|| Error::invalid_destination("storage api key is missing"))?;
        Self::new(
            &config.storage.base_url(),
            config.storage.zone.clone(),
            api_key,
            &config.pull_zone.base_url(),
        )
    }

    /// `{storage_base}/{storage_zone}/{filename}`, each segment percent-encoded.
    #[must_use]
    pub fn upload_url(&self, filename: &str) -> Url {
        let mut url = self.storage_base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(&self.storage_zone).push(filename);
        }
        url
    }

    /// `pull_zone_base + "/" + filename`, verbatim.
    #[must_use]
    pub fn public_url(&self, filename: &str) -> String {
        format!("{}/{}", self.pull_zone_base, filename)
    }
}

impl std::fmt::Debug for DestinationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DestinationConfig")
            .field("storage_base", &self.storage_base.as_str())
            .field("storage_zone", &self.storage_zone)
            .field("api_key", &"[REDACTED]")
            .field("pull_zone_base", &self.pull_zone_base)
            .finish()
    }
}

/// Timeouts, buffering and retry for every transfer.
#[derive(Debug, Clone)]
pub struct TransferSettings {
    pub fetch_timeout: Duration,
    pub upload_timeout: Duration,
    /// 0 selects streamed mode.
    pub max_buffered_bytes: u64,
    pub retry: RetryPolicy,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self::from(&BunnydropConfig::default())
    }
}

impl From<&BunnydropConfig> for TransferSettings {
    fn from(config: &BunnydropConfig) -> Self {
        Self {
            fetch_timeout: config.transfer.fetch_timeout(),
            upload_timeout: config.transfer.upload_timeout(),
            max_buffered_bytes: config.transfer.max_buffered_bytes,
            retry: RetryPolicy::from(&config.transfer.retry),
        }
    }
}

/// A finished relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uploaded {
    pub filename: String,
    pub public_url: String,
    /// Bytes sent to the destination.
    pub bytes: u64,
}

/// Stateless across requests; clone freely.
#[derive(Debug, Clone)]
pub struct RelayPipeline {
    client: reqwest::Client,
    destination: Arc<DestinationConfig>,
    settings: TransferSettings,
}

impl RelayPipeline {
    pub fn new(destination: DestinationConfig, settings: TransferSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("bunnydrop/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self::with_client(client, destination, settings))
    }

    #[must_use]
    pub fn with_client(
        client: reqwest::Client,
        destination: DestinationConfig,
        settings: TransferSettings,
    ) -> Self {
        Self {
            client,
            destination: Arc::new(destination),
            settings,
        }
    }

    #[must_use]
    pub fn destination(&self) -> &DestinationConfig {
        &self.destination
    }

    #[must_use]
    pub fn settings(&self) -> &TransferSettings {
        &self.settings
    }

    /// Fetch `request.source` and PUT it to the storage zone.
    ///
    /// Fetch failures never reach the upload stage. Transient failures are
    /// retried per [`RetryPolicy`]; the same filename uploaded twice simply
    /// overwrites (last write wins at the destination).
    #[instrument(skip_all, fields(filename = request.filename()))]
    pub async fn transfer(
        &self,
        request: &UploadRequest,
    ) -> std::result::Result<Uploaded, TransferError> {
        let this = self;
        let result = self
            .settings
            .retry
            .run(request.filename(), move || this.attempt(request))
            .await;

        match &result {
            Ok(done) => info!(
                bytes = done.bytes,
                public_url = %done.public_url,
                "relay complete"
            ),
            Err(e) => info!(stage = %e.stage(), detail = e.detail(), "relay failed"),
        }
        result
    }

    async fn attempt(&self, request: &UploadRequest) -> std::result::Result<Uploaded, AttemptFailure> {
        if self.settings.max_buffered_bytes == 0 {
            self.attempt_streamed(request).await
        } else {
            self.attempt_buffered(request).await
        }
    }

    async fn attempt_streamed(
        &self,
        request: &UploadRequest,
    ) -> std::result::Result<Uploaded, AttemptFailure> {
        let relay = async {
            let response = self.open_source(request).await?;
            let expected = response.content_length();
            debug!(expected_bytes = ?expected, "streaming source into upload");

            let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
            let mut pump = AbortOnDrop(tokio::spawn(pump_body(response, expected, tx)));

            let mut put = self.put(request.filename());
            if let Some(len) = expected {
                put = put.header(CONTENT_LENGTH, len);
            }
            let sent = put
                .body(reqwest::Body::wrap_stream(ReceiverStream::new(rx)))
                .send()
                .await;

            // A broken source explains a broken upload, so it wins.
            let pumped = (&mut pump.0).await.map_err(|e| {
                AttemptFailure::permanent(TransferError::fetch(format!("fetch task failed: {e}")))
            })?;
            let bytes = pumped?;
            let response = sent.map_err(upload_transport)?;
            self.finish_upload(request, response, bytes).await
        };

        tokio::time::timeout(self.settings.fetch_timeout, relay)
            .await
            .map_err(|_| AttemptFailure::permanent(TransferError::fetch("timeout")))?
    }

    async fn attempt_buffered(
        &self,
        request: &UploadRequest,
    ) -> std::result::Result<Uploaded, AttemptFailure> {
        let limit = self.settings.max_buffered_bytes;
        let fetch = async {
            let response = self.open_source(request).await?;
            let expected = response.content_length();
            if let Some(len) = expected
                && len > limit
            {
                return Err(too_large(len, limit));
            }

            let mut body = BytesMut::new();
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(fetch_transport)?;
                let total = (body.len() + chunk.len()) as u64;
                if total > limit {
                    return Err(too_large(total, limit));
                }
                body.extend_from_slice(&chunk);
            }
            check_complete(body.len() as u64, expected)?;
            Ok::<_, AttemptFailure>(body.freeze())
        };

        let data: Bytes = tokio::time::timeout(self.settings.fetch_timeout, fetch)
            .await
            .map_err(|_| AttemptFailure::permanent(TransferError::fetch("timeout")))??;
        let bytes = data.len() as u64;
        debug!(bytes, "source buffered, uploading");

        let response = self
            .put(request.filename())
            .timeout(self.settings.upload_timeout)
            .header(CONTENT_LENGTH, bytes)
            .body(data)
            .send()
            .await
            .map_err(upload_transport)?;
        self.finish_upload(request, response, bytes).await
    }

    async fn open_source(
        &self,
        request: &UploadRequest,
    ) -> std::result::Result<reqwest::Response, AttemptFailure> {
        let response = self
            .client
            .get(request.source().clone())
            .send()
            .await
            .map_err(fetch_transport)?;

        let status = response.status();
        if !status.is_success() {
            let error = TransferError::fetch(format!("HTTP {status}"));
            return Err(AttemptFailure {
                error,
                retryable: is_retryable_status(status),
            });
        }
        Ok(response)
    }

    fn put(&self, filename: &str) -> reqwest::RequestBuilder {
        self.client
            .put(self.destination.upload_url(filename))
            .header("AccessKey", self.destination.api_key.expose_secret())
            .header(CONTENT_TYPE, OCTET_STREAM)
    }

    async fn finish_upload(
        &self,
        request: &UploadRequest,
        response: reqwest::Response,
        bytes: u64,
    ) -> std::result::Result<Uploaded, AttemptFailure> {
        let status = response.status();
        if matches!(status, StatusCode::OK | StatusCode::CREATED) {
            return Ok(Uploaded {
                filename: request.filename().to_string(),
                public_url: self.destination.public_url(request.filename()),
                bytes,
            });
        }

        let body = response.text().await.unwrap_or_default();
        let body = body.trim();
        let detail = if body.is_empty() {
            format!("HTTP {status}")
        } else {
            let excerpt: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
            format!("HTTP {status}: {excerpt}")
        };
        Err(AttemptFailure {
            error: TransferError::upload(detail),
            retryable: is_retryable_status(status),
        })
    }
}

/// Producer half of a streamed relay. Returns the byte count forwarded.
async fn pump_body(
    response: reqwest::Response,
    expected: Option<u64>,
    tx: mpsc::Sender<std::io::Result<Bytes>>,
) -> std::result::Result<u64, AttemptFailure> {
    let mut received = 0u64;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => {
                received += bytes.len() as u64;
                if tx.send(Ok(bytes)).await.is_err() {
                    // Upload side finished early; its status tells the story.
                    return Ok(received);
                }
            },
            Err(e) => {
                let failure = fetch_transport(e);
                let _ = tx
                    .send(Err(std::io::Error::other(failure.error.detail().to_string())))
                    .await;
                return Err(failure);
            },
        }
    }

    if let Err(failure) = check_complete(received, expected) {
        let _ = tx
            .send(Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                failure.error.detail().to_string(),
            )))
            .await;
        return Err(failure);
    }
    Ok(received)
}

struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn check_complete(
    received: u64,
    expected: Option<u64>,
) -> std::result::Result<(), AttemptFailure> {
    match expected {
        Some(expected) if received < expected => Err(AttemptFailure::transient(
            TransferError::fetch(format!(
                "truncated body: received {received} of {expected} bytes"
            )),
        )),
        _ => Ok(()),
    }
}

fn too_large(size: u64, limit: u64) -> AttemptFailure {
    AttemptFailure::permanent(TransferError::fetch(format!(
        "source is larger than the {limit} byte buffer limit ({size} bytes so far)"
    )))
}

fn fetch_transport(err: reqwest::Error) -> AttemptFailure {
    classify_transport(err, TransferError::fetch)
}

fn upload_transport(err: reqwest::Error) -> AttemptFailure {
    classify_transport(err, TransferError::upload)
}

fn classify_transport(err: reqwest::Error, stage: fn(String) -> TransferError) -> AttemptFailure {
    let retryable = is_retryable_transport(&err);
    let detail = if err.is_timeout() {
        "timeout".to_string()
    } else {
        // Source URLs may embed credentials (bot file links do).
        describe(&err.without_url())
    };
    AttemptFailure {
        error: stage(detail),
        retryable,
    }
}
