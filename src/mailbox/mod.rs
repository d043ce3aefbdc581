//! The mailbox seam: where raw messages come from and where rebuilt ones go.

pub mod dir;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::message::RawMessage;

pub use dir::DirMailbox;

/// How the original message is disposed of after a successful upload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeleteMode {
    /// Move to the trash, where the provider can still recover it.
    #[default]
    Trash,
    /// Remove permanently.
    Delete,
}

/// A message store that can be searched, read and rewritten.
///
/// Mutating methods take `&mut self`; a batch drives one mailbox
/// sequentially.
pub trait Mailbox {
    /// Name used to key per-account state such as the message cache.
    fn account_name(&self) -> &str;

    /// Ids of messages matching `query`. An empty query matches everything.
    fn search_message_ids(&self, query: &str) -> Result<Vec<String>>;

    /// Fetch one message. Fails with `NotFound` for unknown ids.
    fn fetch_raw_message(&self, id: &str) -> Result<RawMessage>;

    /// Store a new message and return its id.
    fn upload_message(
        &mut self,
        bytes: &[u8],
        labels: &[String],
        internal_date: Option<DateTime<Utc>>,
    ) -> Result<String>;

    /// Permanently remove a message.
    fn delete_message(&mut self, id: &str) -> Result<()>;

    /// Move a message to the trash.
    fn trash_message(&mut self, id: &str) -> Result<()>;

    /// Dispose of a message according to `mode`.
    fn remove_message(&mut self, id: &str, mode: DeleteMode) -> Result<()> {
        match mode {
            DeleteMode::Trash => self.trash_message(id),
            DeleteMode::Delete => self.delete_message(id),
        }
    }
}
