//! REST implementation of the remote store boundary.
//!
//! Speaks HTTP+JSON to the authoritative store: one resource per entity
//! key, revisions assigned server-side, and a polling subscription loop
//! with a `since` revision cursor. Mutating requests carry the
//! operation id in an `X-Operation-Id` header so server-side retry
//! deduplication works.

use crate::error::{RemoteError, RemoteResult};
use crate::store::{RemoteAck, RemoteSnapshot, RemoteStore, RemoteSubscription};
use async_trait::async_trait;
use harvest_types::{Entity, EntityKey, OperationId, Patch};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Header carrying the idempotency key for mutating requests.
const OPERATION_ID_HEADER: &str = "X-Operation-Id";

/// Configuration for [`RestRemoteStore`].
#[derive(Debug, Clone)]
pub struct RestConfig {
    /// Base URL of the store, e.g. `https://api.example.com/sync`.
    pub base_url: String,
    /// Bounded timeout for every request.
    pub request_timeout: Duration,
    /// How often subscription polling checks for changes.
    pub poll_interval: Duration,
}

impl RestConfig {
    /// Creates a config with default timeouts.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SnapshotBody {
    revision: u64,
    entity: Entity,
}

#[derive(Debug, Deserialize)]
struct AckBody {
    revision: u64,
    #[serde(default)]
    entity: Option<Entity>,
}

#[derive(Debug, Serialize)]
struct WriteBody<'a> {
    entity: &'a Entity,
}

/// HTTP+JSON remote store adapter.
pub struct RestRemoteStore {
    client: reqwest::Client,
    config: RestConfig,
}

impl RestRemoteStore {
    /// Creates an adapter for the given endpoint.
    pub fn new(config: RestConfig) -> RemoteResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| RemoteError::rejected(format!("http client: {e}")))?;
        Ok(Self { client, config })
    }

    fn record_url(&self, key: &EntityKey) -> String {
        format!(
            "{}/records/{}",
            self.config.base_url.trim_end_matches('/'),
            urlencoding::encode(key.as_str())
        )
    }

    async fn fetch(&self, key: &EntityKey, since: Option<u64>) -> RemoteResult<Option<RemoteSnapshot>> {
        let mut request = self.client.get(self.record_url(key));
        if let Some(since) = since {
            request = request.query(&[("since", since)]);
        }
        let response = request.send().await.map_err(classify)?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            StatusCode::NOT_MODIFIED => Ok(None),
            status if status.is_success() => {
                let body: SnapshotBody =
                    response.json().await.map_err(classify)?;
                Ok(Some(RemoteSnapshot {
                    key: key.clone(),
                    revision: body.revision,
                    entity: body.entity,
                }))
            }
            status => Err(classify_status(status, key)),
        }
    }

    async fn ack_from(&self, response: reqwest::Response, key: &EntityKey) -> RemoteResult<RemoteAck> {
        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, key));
        }
        let body: AckBody = response.json().await.map_err(classify)?;
        Ok(RemoteAck {
            revision: body.revision,
            entity: body.entity,
        })
    }
}

#[async_trait]
impl RemoteStore for RestRemoteStore {
    async fn read(&self, key: &EntityKey) -> RemoteResult<Option<RemoteSnapshot>> {
        self.fetch(key, None).await
    }

    async fn write(
        &self,
        key: &EntityKey,
        op_id: OperationId,
        entity: &Entity,
    ) -> RemoteResult<RemoteAck> {
        let response = self
            .client
            .put(self.record_url(key))
            .header(OPERATION_ID_HEADER, op_id.to_string())
            .json(&WriteBody { entity })
            .send()
            .await
            .map_err(classify)?;
        self.ack_from(response, key).await
    }

    async fn apply_patch(
        &self,
        key: &EntityKey,
        op_id: OperationId,
        patch: &Patch,
    ) -> RemoteResult<RemoteAck> {
        let response = self
            .client
            .patch(self.record_url(key))
            .header(OPERATION_ID_HEADER, op_id.to_string())
            .json(patch)
            .send()
            .await
            .map_err(classify)?;
        self.ack_from(response, key).await
    }

    async fn delete(&self, key: &EntityKey, op_id: OperationId) -> RemoteResult<RemoteAck> {
        let response = self
            .client
            .delete(self.record_url(key))
            .header(OPERATION_ID_HEADER, op_id.to_string())
            .send()
            .await
            .map_err(classify)?;
        self.ack_from(response, key).await
    }

    async fn subscribe(
        &self,
        key: &EntityKey,
        sender: mpsc::Sender<RemoteSnapshot>,
    ) -> RemoteResult<RemoteSubscription> {
        // Initial delivery, so the subscriber starts from the current
        // value rather than the next change.
        let mut cursor = match self.fetch(key, None).await {
            Ok(Some(snapshot)) => {
                let revision = snapshot.revision;
                let _ = sender.send(snapshot).await;
                Some(revision)
            }
            Ok(None) => None,
            Err(e) if e.is_transient() => {
                // Offline at subscribe time: the poll loop below will
                // deliver once connectivity returns.
                debug!(key = %key, error = %e, "subscribe: initial fetch deferred");
                None
            }
            Err(e) => return Err(e),
        };

        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
        let client = self.client.clone();
        let config = self.config.clone();
        let poll_key = key.clone();

        tokio::spawn(async move {
            let store = RestRemoteStore { client, config };
            // After any poll error the next success redelivers the
            // current value even if the revision did not move.
            let mut redeliver = false;
            loop {
                tokio::select! {
                    _ = &mut cancel_rx => break,
                    _ = tokio::time::sleep(store.config.poll_interval) => {}
                }

                let since = if redeliver { None } else { cursor };
                match store.fetch(&poll_key, since).await {
                    Ok(Some(snapshot)) => {
                        if redeliver || Some(snapshot.revision) != cursor {
                            cursor = Some(snapshot.revision);
                            redeliver = false;
                            if sender.send(snapshot).await.is_err() {
                                break;
                            }
                        }
                    }
                    Ok(None) => {
                        redeliver = false;
                    }
                    Err(e) if e.is_transient() => {
                        debug!(key = %poll_key, error = %e, "subscription poll failed, will redeliver");
                        redeliver = true;
                    }
                    Err(e) => {
                        warn!(key = %poll_key, error = %e, "subscription poll rejected, stopping");
                        break;
                    }
                }
            }
        });

        Ok(RemoteSubscription::new(move || {
            let _ = cancel_tx.send(());
        }))
    }
}

fn classify(error: reqwest::Error) -> RemoteError {
    if error.is_timeout() {
        RemoteError::Timeout
    } else if let Some(status) = error.status() {
        classify_code(status, error.to_string())
    } else {
        RemoteError::Transient(error.to_string())
    }
}

fn classify_status(status: StatusCode, key: &EntityKey) -> RemoteError {
    classify_code(status, format!("{status} for key {key}"))
}

fn classify_code(status: StatusCode, reason: String) -> RemoteError {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RemoteError::Transient(reason)
    } else {
        RemoteError::Rejected {
            status: Some(status.as_u16()),
            reason,
        }
    }
}
