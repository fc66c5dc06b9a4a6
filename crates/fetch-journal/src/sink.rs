use std::path::Path;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Duration;

use crate::entry::JournalEntry;
use crate::writer::{JournalWriteError, JournalWriter};

const CHANNEL_BUFFER: usize = 1024;

/// Idle time after which buffered lines are flushed.
const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Cloneable handle for submitting entries to the background journal task.
#[derive(Clone)]
pub struct JournalSink {
    tx: mpsc::Sender<JournalEntry>,
}

impl JournalSink {
    /// Open the journal at `path` and spawn its writer task.
    ///
    /// The task exits after a final flush once every `JournalSink` clone has
    /// been dropped. Write errors are logged and the entry is skipped.
    pub async fn start(
        path: impl AsRef<Path>,
    ) -> Result<(Self, JoinHandle<()>), JournalWriteError> {
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER);
        let writer = JournalWriter::open(path).await?;
        let handle = tokio::spawn(drain(writer, rx));
        Ok((Self { tx }, handle))
    }

    /// Queue an entry, waiting for buffer space if necessary.
    pub async fn record(&self, entry: JournalEntry) {
        if let Err(err) = self.tx.send(entry).await {
            tracing::warn!(event = ?err.0.event, "journal closed; entry dropped");
        }
    }
}

async fn drain(mut writer: JournalWriter, mut rx: mpsc::Receiver<JournalEntry>) {
    let mut dirty = false;

    loop {
        match tokio::time::timeout(FLUSH_INTERVAL, rx.recv()).await {
            Ok(Some(entry)) => match writer.append(&entry).await {
                Ok(()) => dirty = true,
                Err(err) => tracing::error!(%err, "failed to append journal entry"),
            },
            Ok(None) => {
                if dirty {
                    if let Err(err) = writer.flush().await {
                        tracing::error!(%err, "failed to flush journal on shutdown");
                    }
                }
                tracing::debug!("journal writer stopped");
                return;
            }
            Err(_) if dirty => match writer.flush().await {
                Ok(()) => dirty = false,
                Err(err) => tracing::error!(%err, "periodic journal flush failed"),
            },
            Err(_) => {}
        }
    }
}
