//! JSON file backed table
//!
//! Rows are kept in memory and the whole table is rewritten atomically on
//! every mutation. The lock is only held for the duration of one store call.

use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::errors::AgentError;
use crate::filesys::file::File;

pub struct JsonTable<T> {
    file: File,
    rows: Mutex<Vec<T>>,
}

impl<T> JsonTable<T>
where
    T: Serialize + DeserializeOwned + Clone + Send,
{
    /// Open the table, loading existing rows when the file exists
    pub async fn open(file: File) -> Result<Self, AgentError> {
        let rows: Vec<T> = file.read_json_opt().await?.unwrap_or_default();
        debug!("Loaded {} rows from {:?}", rows.len(), file.path());
        Ok(Self {
            file,
            rows: Mutex::new(rows),
        })
    }

    /// Run a read-only closure over the rows
    pub async fn read<R>(&self, f: impl FnOnce(&[T]) -> R) -> R {
        let rows = self.rows.lock().await;
        f(&rows)
    }

    /// Run a mutating closure and persist the result.
    ///
    /// When the closure fails nothing is written and the in-memory rows are
    /// left untouched.
    pub async fn update<R>(
        &self,
        f: impl FnOnce(&mut Vec<T>) -> Result<R, AgentError>,
    ) -> Result<R, AgentError> {
        let mut rows = self.rows.lock().await;
        let mut staged = rows.clone();
        let out = f(&mut staged)?;
        self.file
            .write_json(&staged)
            .await
            .map_err(|e| AgentError::StorageError(format!("{:?}: {}", self.file.path(), e)))?;
        *rows = staged;
        Ok(out)
    }
}
