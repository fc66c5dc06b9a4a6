//! # page-relay
//!
//! The page is the only context that can talk to both the fetch worker (via
//! its controller) and the host (via the parent window). The [`Relay`]
//! registers the worker for the page's scope and shuttles protocol messages
//! between the two:
//!
//! ```text
//! worker ──FETCH_REQUEST──> Relay ──postMessage(*, "*")──> parent window
//! worker <──FETCH_RESPONSE── Relay <──────────────────── parent window
//! ```
//!
//! Messages are matched by their `type` tag only and forwarded verbatim.

mod registration;
mod relay;

pub use registration::{
    MessageTarget, ParentWindow, Registration, RegistrationError, WorkerContainer,
    DEFAULT_SCOPE, DEFAULT_SCRIPT_URL,
};
pub use relay::{Relay, RelayConfig, RelayOutcome};
