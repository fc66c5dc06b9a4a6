//! Append-only JSON-lines journal of what happened to each fetch leaving
//! the sandbox: bypassed, proxied through the host, or rejected.
//!
//! Entries are produced from any task through a cloneable [`JournalSink`]
//! and written by a single background task, one JSON object per line.
//!
//! ```rust,no_run
//! use fetch_journal::{JournalEntry, JournalEvent, JournalSink};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (journal, _handle) = JournalSink::start("journal.jsonl").await?;
//!
//! journal
//!     .record(
//!         JournalEntry::new(JournalEvent::FetchProxied, "edge-interceptor", serde_json::json!({"status": 200}))
//!             .with_request("req_1700000000000_k3j2h1g0f", "https://api.example.com/users/1"),
//!     )
//!     .await;
//! # Ok(())
//! # }
//! ```

pub mod entry;
pub mod sink;
pub mod writer;

pub use entry::{JournalEntry, JournalEvent};
pub use sink::JournalSink;
pub use writer::{JournalWriteError, JournalWriter};
