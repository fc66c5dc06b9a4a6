//! Worker-side half of the fetch tunnel.
//!
//! The [`EdgeInterceptor`] receives every fetch issued by the sandboxed page.
//! Requests the origin classifier marks as third-party are serialized into a
//! `FETCH_REQUEST` message, posted to the first controlled window client, and
//! parked in a pending-request table until the host answers with a matching
//! `FETCH_RESPONSE` or the request times out.
//!
//! # Architecture
//!
//! ```text
//! page fetch ──> EdgeInterceptor ──FETCH_REQUEST──> window client (relay) ──> host
//!                      ^                                                       |
//!                      └────────────FETCH_RESPONSE──── relay <─────────────────┘
//! ```
//!
//! Requests are correlated purely by `requestId`; there is no ordering
//! between concurrent requests.

pub mod clients;
pub mod interceptor;
mod pending;
pub mod protocol;
pub mod request_id;

// Re-export the primary public types at the crate root for convenience.
pub use clients::{ChannelClient, ClientDirectory, ClientList, PostError, WindowClient};
pub use interceptor::{EdgeInterceptor, Interception, ProxyError, DEFAULT_TIMEOUT};
pub use protocol::{
    FetchMessage, FetchRequest, ResponseBuildError, ResponseData, SerializedRequest, StatusText,
    FETCH_REQUEST, FETCH_RESPONSE,
};
