use std::path::Path;

use tokio::io::AsyncWriteExt;

use crate::entry::JournalEntry;

#[derive(Debug, thiserror::Error)]
pub enum JournalWriteError {
    #[error("failed to create journal directory: {0}")]
    CreateDir(std::io::Error),

    #[error("failed to open journal file: {0}")]
    Open(std::io::Error),

    #[error("failed to encode journal entry: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to append to journal: {0}")]
    Append(std::io::Error),

    #[error("failed to flush journal: {0}")]
    Flush(std::io::Error),
}

/// Appends [`JournalEntry`] values to a file, one JSON object per line.
pub struct JournalWriter {
    file: tokio::fs::File,
}

impl JournalWriter {
    /// Open `path` for appending, creating it and its parent directories if
    /// needed.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, JournalWriteError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(JournalWriteError::CreateDir)?;
        }

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(JournalWriteError::Open)?;

        Ok(Self { file })
    }

    pub async fn append(&mut self, entry: &JournalEntry) -> Result<(), JournalWriteError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        self.file
            .write_all(&line)
            .await
            .map_err(JournalWriteError::Append)
    }

    pub async fn flush(&mut self) -> Result<(), JournalWriteError> {
        self.file.flush().await.map_err(JournalWriteError::Flush)
    }
}
