use std::collections::BTreeMap;

use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

/// `type` tag of a request travelling from the worker to the host.
pub const FETCH_REQUEST: &str = "FETCH_REQUEST";
/// `type` tag of a response travelling from the host back to the worker.
pub const FETCH_RESPONSE: &str = "FETCH_RESPONSE";

/// Message exchanged between the worker, the page relay and the host.
///
/// Messages travel as structured objects (here `serde_json::Value`), tagged by
/// `type` and correlated by `requestId`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FetchMessage {
    /// A fetch the host should perform on the worker's behalf.
    #[serde(rename = "FETCH_REQUEST", rename_all = "camelCase")]
    Request {
        request_id: String,
        request: SerializedRequest,
    },

    /// The host's answer to a previously sent request.
    #[serde(rename = "FETCH_RESPONSE", rename_all = "camelCase")]
    Response {
        request_id: String,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<ResponseData>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl FetchMessage {
    /// Build a successful `FETCH_RESPONSE`.
    pub fn success(request_id: impl Into<String>, data: ResponseData) -> Self {
        Self::Response {
            request_id: request_id.into(),
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Build a failed `FETCH_RESPONSE` carrying the host's error message.
    pub fn failure(request_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self::Response {
            request_id: request_id.into(),
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }

    pub fn request_id(&self) -> &str {
        match self {
            Self::Request { request_id, .. } | Self::Response { request_id, .. } => request_id,
        }
    }
}

/// A fetch as the worker intercepts it.
///
/// The target is a [`Url`] rather than an `http::Uri` so that non-network
/// schemes such as `data:` and `blob:` reach the classifier.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl FetchRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }
}

/// The parts of an intercepted request the host needs to replay it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedRequest {
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Raw body bytes; `null` for GET and HEAD.
    #[serde(default)]
    pub body: Option<Vec<u8>>,
}

impl SerializedRequest {
    /// Serialize an intercepted request, consuming its body.
    ///
    /// Repeated header names are joined with `", "`, the way a browser
    /// `Headers` iterator presents them. The body is dropped for GET and
    /// HEAD.
    pub fn from_fetch(request: FetchRequest) -> Self {
        let mut headers: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in &request.headers {
            let value = String::from_utf8_lossy(value.as_bytes());
            headers
                .entry(name.as_str().to_string())
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(&value);
                })
                .or_insert_with(|| value.into_owned());
        }

        let body = if request.method == Method::GET || request.method == Method::HEAD {
            None
        } else {
            Some(request.body)
        };

        Self {
            url: request.url.into(),
            method: request.method.as_str().to_string(),
            headers,
            body,
        }
    }
}

/// Payload of a successful `FETCH_RESPONSE`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseData {
    #[serde(default)]
    pub body: Vec<u8>,
    pub status: u16,
    #[serde(rename = "statusText", default)]
    pub status_text: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// Reason phrase reported by the host, attached to reconstructed responses
/// as an extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusText(pub String);

/// Why a [`ResponseData`] could not be turned into an `http::Response`.
#[derive(Debug, thiserror::Error)]
pub enum ResponseBuildError {
    #[error("invalid status code {0}")]
    Status(u16),
    #[error("invalid response header '{0}'")]
    Header(String),
}

impl ResponseData {
    /// Reconstruct an `http::Response` with the host's status, headers and
    /// raw body bytes.
    pub fn into_http(self) -> Result<http::Response<Vec<u8>>, ResponseBuildError> {
        let status =
            StatusCode::from_u16(self.status).map_err(|_| ResponseBuildError::Status(self.status))?;

        let mut response = http::Response::new(self.body);
        *response.status_mut() = status;

        for (name, value) in &self.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| ResponseBuildError::Header(name.clone()))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|_| ResponseBuildError::Header(name.clone()))?;
            response.headers_mut().append(header_name, header_value);
        }

        response.extensions_mut().insert(StatusText(self.status_text));
        Ok(response)
    }
}
