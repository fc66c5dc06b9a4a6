use serde::{Deserialize, Serialize};

/// One journal line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: uuid::Uuid,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub event: JournalEvent,
    /// Component that produced the entry (`edge-interceptor`, `page-relay`, ...).
    pub component: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub details: serde_json::Value,
}

impl JournalEntry {
    /// New entry with a fresh UUID v4 and the current UTC time.
    pub fn new(
        event: JournalEvent,
        component: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            event,
            component: component.into(),
            request_id: None,
            url: None,
            details,
        }
    }

    /// Attach the correlation id and target url of the fetch this entry is
    /// about.
    pub fn with_request(mut self, request_id: impl Into<String>, url: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self.url = Some(url.into());
        self
    }

    /// Attach only the target url (bypassed fetches have no request id).
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalEvent {
    ProcessStarted,
    ProcessStopped,
    WorkerRegistered,
    RegistrationFailed,
    FetchBypassed,
    FetchProxied,
    FetchRejected,
}
