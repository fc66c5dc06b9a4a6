use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use edge_interceptor::{FetchMessage, ResponseData, SerializedRequest};
use origin_classifier::{rewrite_url, ServerEntry};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::TransportConfig;

/// The parent window's side of the tunnel.
#[async_trait]
pub trait Host: Send + Sync {
    /// Answer one message posted by the page. Returns `None` for anything
    /// that is not a well-formed `FETCH_REQUEST`.
    async fn answer(&self, message: Value) -> Option<FetchMessage>;
}

/// Host that performs tunneled requests with its own HTTP client, optionally
/// through a proxy.
pub struct HostTransport {
    client: reqwest::Client,
    servers: Vec<ServerEntry>,
}

impl HostTransport {
    pub fn new(config: &TransportConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs));

        if let Some(proxy_url) = &config.proxy_url {
            let proxy = reqwest::Proxy::all(proxy_url)
                .with_context(|| format!("invalid proxy url {proxy_url}"))?;
            builder = builder.proxy(proxy);
        }

        let client = builder.build().context("failed to build host http client")?;
        Ok(Self {
            client,
            servers: config.servers.clone(),
        })
    }

    async fn perform(&self, request: SerializedRequest) -> anyhow::Result<ResponseData> {
        let url = rewrite_url(&request.url, &self.servers);
        if url != request.url {
            debug!(from = %request.url, to = %url, "rewrote node alias");
        }

        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .with_context(|| format!("invalid method {}", request.method))?;

        let mut builder = self.client.request(method, &url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?;

        let status = response.status();
        let mut headers: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in response.headers() {
            let value = String::from_utf8_lossy(value.as_bytes());
            headers
                .entry(name.as_str().to_string())
                .and_modify(|joined| {
                    joined.push_str(", ");
                    joined.push_str(&value);
                })
                .or_insert_with(|| value.into_owned());
        }

        let body = response
            .bytes()
            .await
            .with_context(|| format!("failed to read body from {url}"))?
            .to_vec();

        Ok(ResponseData {
            body,
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
        })
    }
}

#[async_trait]
impl Host for HostTransport {
    async fn answer(&self, message: Value) -> Option<FetchMessage> {
        let FetchMessage::Request {
            request_id,
            request,
        } = FetchMessage::deserialize(&message).ok()?
        else {
            return None;
        };

        let reply = match self.perform(request).await {
            Ok(data) => {
                debug!(%request_id, status = data.status, "tunneled request completed");
                FetchMessage::success(request_id, data)
            }
            Err(err) => {
                warn!(%request_id, error = %format!("{err:#}"), "tunneled request failed");
                FetchMessage::failure(request_id, format!("{err:#}"))
            }
        };
        Some(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn transport() -> HostTransport {
        HostTransport::new(&TransportConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn non_request_messages_get_no_reply() {
        let host = transport();
        assert!(host.answer(json!({"type": "LOG", "text": "hi"})).await.is_none());
        assert!(host
            .answer(json!({"type": "FETCH_RESPONSE", "requestId": "r", "success": false}))
            .await
            .is_none());
        assert!(host
            .answer(json!({"type": "FETCH_REQUEST", "requestId": "r"}))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn invalid_method_is_reported_as_failure() {
        let host = transport();
        let reply = host
            .answer(json!({
                "type": "FETCH_REQUEST",
                "requestId": "req_1_aaaaaaaaa",
                "request": {
                    "url": "https://api.example.com/",
                    "method": "NOT A METHOD",
                    "headers": {},
                    "body": null
                }
            }))
            .await
            .unwrap();

        match reply {
            FetchMessage::Response {
                request_id,
                success,
                error,
                ..
            } => {
                assert_eq!(request_id, "req_1_aaaaaaaaa");
                assert!(!success);
                assert!(error.unwrap().contains("invalid method"));
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[test]
    fn invalid_proxy_url_is_rejected() {
        let config = TransportConfig {
            proxy_url: Some("::not a proxy::".to_string()),
            ..TransportConfig::default()
        };
        assert!(HostTransport::new(&config).is_err());
    }
}
