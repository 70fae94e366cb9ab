//! HTTP implementation of the remote log.
//!
//! Talks to `cadence-server` (or anything exposing the same two routes):
//!
//! - `POST {base}/v1/collections/{collection}/records` appends one record and
//!   answers `{ id, createdAt }`.
//! - `GET` on the same path returns every record ordered by server time.
//!
//! Subscriptions poll the list and yield a snapshot only when it changed.
//! Transient poll failures back off and keep polling. Only auth and
//! missing-collection answers end a subscription.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use tracing::{debug, warn};
use url::Url;

use cadence_shared::{AppendReceipt, LogRecord, Message, MessageId, OutgoingMessage};

use crate::remote::{RemoteError, RemoteLog, SnapshotStream};

/// Longest wait between polls while the server is unreachable.
const MAX_POLL_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct HttpLog {
    client: Client,
    records_url: Url,
    token: Option<String>,
    poll_interval: Duration,
}

impl HttpLog {
    /// Build a client for `collection` on the server at `base_url`.
    ///
    /// `request_timeout` bounds every request, so an append can never hang.
    pub fn new(
        base_url: &str,
        collection: &str,
        token: Option<String>,
        request_timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Self, RemoteError> {
        let base = Url::parse(base_url)
            .map_err(|e| RemoteError::Rejected(format!("invalid remote url '{base_url}': {e}")))?;

        let mut records_url = base;
        records_url
            .path_segments_mut()
            .map_err(|_| RemoteError::Rejected(format!("remote url '{base_url}' cannot be a base")))?
            .pop_if_empty()
            .extend(["v1", "collections", collection, "records"]);

        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| RemoteError::Unavailable(format!("failed to build http client: {e}")))?;

        Ok(Self {
            client,
            records_url,
            token,
            poll_interval,
        })
    }

    pub fn records_url(&self) -> &Url {
        &self.records_url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn fetch(&self) -> Result<Vec<Message>, PollError> {
        let response = self
            .authorize(self.client.get(self.records_url.clone()))
            .send()
            .await
            .map_err(|e| PollError::transient(transport_error(e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PollError {
                fatal: ends_subscription(status),
                error: classify(status, body),
            });
        }

        let records: Vec<LogRecord> = response
            .json()
            .await
            .map_err(|e| PollError::transient(transport_error(e)))?;
        Ok(records.into_iter().map(LogRecord::into_message).collect())
    }
}

#[async_trait]
impl RemoteLog for HttpLog {
    async fn append(&self, message: &OutgoingMessage) -> Result<MessageId, RemoteError> {
        let response = self
            .authorize(self.client.post(self.records_url.clone()))
            .json(message)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify(status, body));
        }

        let receipt: AppendReceipt = response.json().await.map_err(transport_error)?;
        debug!(id = %receipt.id, "remote append acknowledged");
        Ok(receipt.id)
    }

    fn subscribe(&self) -> SnapshotStream {
        let log = self.clone();
        SnapshotStream::spawn(|tx| async move {
            let mut last: Option<Vec<Message>> = None;
            let mut failures = 0u32;

            loop {
                match log.fetch().await {
                    Ok(snapshot) => {
                        if failures > 0 {
                            debug!(failures, "snapshot polling recovered");
                        }
                        failures = 0;
                        if last.as_ref() != Some(&snapshot) {
                            last = Some(snapshot.clone());
                            if tx.send(Ok(snapshot)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(PollError { error, fatal: true }) => {
                        warn!(error = %error, "snapshot subscription failed");
                        let _ = tx.send(Err(error)).await;
                        break;
                    }
                    Err(PollError { error, .. }) => {
                        failures = failures.saturating_add(1);
                        debug!(error = %error, failures, "snapshot poll failed, backing off");
                    }
                }

                tokio::time::sleep(poll_delay(log.poll_interval, failures)).await;
            }
        })
    }
}

/// Wait before the next poll: the poll interval, doubled per consecutive
/// failure up to [`MAX_POLL_BACKOFF`].
fn poll_delay(interval: Duration, failures: u32) -> Duration {
    let factor = 1u32 << failures.min(16);
    interval
        .checked_mul(factor)
        .unwrap_or(MAX_POLL_BACKOFF)
        .min(MAX_POLL_BACKOFF.max(interval))
}

fn transport_error(e: reqwest::Error) -> RemoteError {
    RemoteError::Unavailable(e.to_string())
}

/// Map a non-success status to the error taxonomy.
///
/// Only payload problems are permanent. Auth failures, throttling and
/// server errors are worth retrying later.
fn classify(status: StatusCode, body: String) -> RemoteError {
    let reason = if body.is_empty() {
        status.to_string()
    } else {
        format!("{status}: {body}")
    };
    match status {
        StatusCode::BAD_REQUEST
        | StatusCode::PAYLOAD_TOO_LARGE
        | StatusCode::UNPROCESSABLE_ENTITY => RemoteError::Rejected(reason),
        _ => RemoteError::Unavailable(reason),
    }
}

/// Whether a failed poll should end the subscription right away.
fn ends_subscription(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND
    )
}

struct PollError {
    error: RemoteError,
    fatal: bool,
}

impl PollError {
    fn transient(error: RemoteError) -> Self {
        Self { error, fatal: false }
    }
}
