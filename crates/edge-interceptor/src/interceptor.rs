use std::sync::Arc;
use std::time::Duration;

use origin_classifier::{OriginClassifier, ParentLocation, Verdict};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};

use crate::clients::{ClientDirectory, PostError};
use crate::pending::{PendingTable, Settlement};
use crate::protocol::{FetchMessage, FetchRequest, SerializedRequest, FETCH_RESPONSE};

/// How long a proxied fetch waits for its `FETCH_RESPONSE`.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const UNKNOWN_ERROR: &str = "Unknown error";

/// Why a proxied fetch was rejected.
///
/// Every variant raised after the request was registered carries its
/// `requestId`.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// No window client is controlled by the worker.
    #[error("No windows available")]
    NoActiveClient,

    /// The chosen window client closed before the request was posted.
    #[error("failed to dispatch request {request_id}: {source}")]
    ClientGone {
        request_id: String,
        #[source]
        source: PostError,
    },

    /// The host reported `success: false`.
    #[error("{message}")]
    Remote { request_id: String, message: String },

    #[error("proxied request {request_id} timed out after {}ms", .after.as_millis())]
    Timeout { request_id: String, after: Duration },

    /// The host's response could not be turned into a response object.
    #[error("malformed proxy response for {request_id}: {reason}")]
    MalformedResponse { request_id: String, reason: String },

    /// The pending request was dropped without an outcome.
    #[error("proxied request {request_id} was abandoned")]
    Abandoned { request_id: String },

    #[error("failed to serialize request: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl ProxyError {
    /// The `requestId` of the failed request, if it got far enough to have one.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::ClientGone { request_id, .. }
            | Self::Remote { request_id, .. }
            | Self::Timeout { request_id, .. }
            | Self::MalformedResponse { request_id, .. }
            | Self::Abandoned { request_id } => Some(request_id),
            Self::NoActiveClient | Self::Serialize(_) => None,
        }
    }
}

/// What the worker does with an intercepted fetch.
#[derive(Debug)]
pub enum Interception {
    /// Hand the untouched request to the default network stack.
    Passthrough(FetchRequest),
    /// The host performed the request; this is its reconstructed response.
    Proxied {
        request_id: String,
        response: http::Response<Vec<u8>>,
    },
}

/// Worker-side fetch interceptor.
///
/// Owns the pending-request table. `handle_fetch` is called for every fetch
/// event; `handle_message` is the worker's message handler and must receive
/// every message delivered to the worker.
pub struct EdgeInterceptor {
    classifier: OriginClassifier,
    parent: Arc<dyn ParentLocation>,
    clients: Arc<dyn ClientDirectory>,
    pending: Arc<PendingTable>,
    timeout: Duration,
}

impl EdgeInterceptor {
    pub fn new(
        classifier: OriginClassifier,
        parent: Arc<dyn ParentLocation>,
        clients: Arc<dyn ClientDirectory>,
    ) -> Self {
        Self {
            classifier,
            parent,
            clients,
            pending: Arc::new(PendingTable::new()),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Override the per-request response deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of proxied fetches still awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Intercept one fetch.
    ///
    /// Bypassed requests are returned untouched as
    /// [`Interception::Passthrough`]. Proxied requests resolve to
    /// [`Interception::Proxied`] or fail with a [`ProxyError`]; failures are
    /// never retried here.
    ///
    /// With no controlled window the future resolves to
    /// [`ProxyError::NoActiveClient`] on its first poll, without registering a
    /// pending request.
    pub async fn handle_fetch(&self, request: FetchRequest) -> Result<Interception, ProxyError> {
        let parent = self.parent.try_get_parent_origin();

        if let Verdict::Bypass(reason) = self.classifier.classify(&request.url, parent.as_ref()) {
            debug!(url = %request.url, ?reason, "request bypasses proxy");
            return Ok(Interception::Passthrough(request));
        }

        let (request_id, settlement) = self.dispatch(request)?;
        self.await_settlement(request_id, settlement).await
    }

    /// Serialize the request, register it and post it to the first window
    /// client. Runs without suspending.
    fn dispatch(
        &self,
        request: FetchRequest,
    ) -> Result<(String, oneshot::Receiver<Settlement>), ProxyError> {
        let Some(client) = self.clients.match_windows().into_iter().next() else {
            warn!(url = %request.url, "no window clients to relay through");
            return Err(ProxyError::NoActiveClient);
        };

        let serialized = SerializedRequest::from_fetch(request);
        let url = serialized.url.clone();
        let (request_id, rx) = self.pending.register(&url);

        let message = FetchMessage::Request {
            request_id: request_id.clone(),
            request: serialized,
        };
        let value = match serde_json::to_value(&message) {
            Ok(value) => value,
            Err(err) => {
                self.pending.discard(&request_id);
                return Err(err.into());
            }
        };

        self.arm_timer(&request_id);

        if let Err(source) = client.post_message(value) {
            warn!(%request_id, %url, err = %source, "window client closed before dispatch");
            self.pending.discard(&request_id);
            return Err(ProxyError::ClientGone { request_id, source });
        }

        info!(%request_id, %url, client = client.id(), "request proxied through host");
        Ok((request_id, rx))
    }

    /// Spawn the request's independent deadline. The timer keeps running if
    /// the caller stops waiting; a response aborts it.
    fn arm_timer(&self, request_id: &str) {
        let pending = Arc::clone(&self.pending);
        let timeout = self.timeout;
        let id = request_id.to_string();

        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if pending.settle(&id, Settlement::TimedOut) {
                warn!(request_id = %id, timeout_ms = timeout.as_millis() as u64, "proxied request timed out");
            }
        });

        self.pending.attach_timer(request_id, timer.abort_handle());
    }

    async fn await_settlement(
        &self,
        request_id: String,
        rx: oneshot::Receiver<Settlement>,
    ) -> Result<Interception, ProxyError> {
        match rx.await {
            Ok(Settlement::Delivered(data)) => match data.into_http() {
                Ok(response) => Ok(Interception::Proxied {
                    request_id,
                    response,
                }),
                Err(err) => Err(ProxyError::MalformedResponse {
                    request_id,
                    reason: err.to_string(),
                }),
            },
            Ok(Settlement::Failed(message)) => Err(ProxyError::Remote {
                request_id,
                message,
            }),
            Ok(Settlement::Malformed(reason)) => {
                Err(ProxyError::MalformedResponse { request_id, reason })
            }
            Ok(Settlement::TimedOut) => Err(ProxyError::Timeout {
                request_id,
                after: self.timeout,
            }),
            Err(_) => Err(ProxyError::Abandoned { request_id }),
        }
    }

    /// Worker message handler.
    ///
    /// Settles the pending request named by a `FETCH_RESPONSE` and returns
    /// `true`. A response whose payload does not parse still settles its
    /// request: as malformed when it claims `success: true`, as a remote
    /// failure otherwise. Other message types and responses for unknown or
    /// expired ids are ignored and return `false`.
    pub fn handle_message(&self, message: &Value) -> bool {
        if message.get("type").and_then(Value::as_str) != Some(FETCH_RESPONSE) {
            trace!("ignoring non-response message");
            return false;
        }
        let Some(request_id) = message.get("requestId").and_then(Value::as_str) else {
            trace!("ignoring response without requestId");
            return false;
        };

        let outcome = match FetchMessage::deserialize(message) {
            Ok(FetchMessage::Response {
                success: true,
                data: Some(data),
                ..
            }) => Settlement::Delivered(data),
            Ok(FetchMessage::Response {
                success: true,
                data: None,
                ..
            }) => Settlement::Malformed("successful response carried no data".to_string()),
            Ok(FetchMessage::Response { error, .. }) => {
                Settlement::Failed(error.unwrap_or_else(|| UNKNOWN_ERROR.to_string()))
            }
            Ok(FetchMessage::Request { .. }) => return false,
            Err(err) => {
                debug!(%request_id, %err, "response payload does not parse");
                if message.get("success").and_then(Value::as_bool) == Some(true) {
                    Settlement::Malformed(err.to_string())
                } else {
                    let error = message.get("error").and_then(Value::as_str);
                    Settlement::Failed(error.unwrap_or(UNKNOWN_ERROR).to_string())
                }
            }
        };

        let settled = self.pending.settle(request_id, outcome);
        if !settled {
            debug!(%request_id, "no pending request for response; ignoring");
        }
        settled
    }
}
