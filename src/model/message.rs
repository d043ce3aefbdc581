//! Whole-message types: what the mailbox hands us and what we hand back.

use chrono::{DateTime, Utc};

/// A message exactly as fetched from the mailbox.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RawMessage {
    /// Provider message id.
    pub id: String,

    /// Raw RFC 5322 bytes.
    #[serde(skip)]
    pub bytes: Vec<u8>,

    /// Provider-side receive timestamp, if the provider reports one.
    pub internal_date: Option<DateTime<Utc>>,

    /// Provider labels / folders.
    pub labels: Vec<String>,
}

impl RawMessage {
    pub fn new(id: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            bytes,
            internal_date: None,
            labels: Vec::new(),
        }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// What happened to one original leaf during a rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PartAction {
    Kept,
    Removed,
    ReplacedWithPlaceholder,
}

impl PartAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Kept => "kept",
            Self::Removed => "removed",
            Self::ReplacedWithPlaceholder => "replaced",
        }
    }
}

/// One row of a [`ChangeSummary`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ChangeEntry {
    /// IMAP-style section number (`1`, `2.1`, …).
    pub part_id: String,
    pub content_type: String,
    pub filename: Option<String>,
    /// Decoded payload size in bytes.
    pub original_size: u64,
    pub action: PartAction,
}

/// Per-leaf record of a rebuild, in depth-first original order.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ChangeSummary {
    pub entries: Vec<ChangeEntry>,
}

impl ChangeSummary {
    pub fn push(&mut self, entry: ChangeEntry) {
        self.entries.push(entry);
    }

    /// Entries whose payload is gone from the rebuilt message.
    pub fn stripped(&self) -> impl Iterator<Item = &ChangeEntry> {
        self.entries.iter().filter(|e| e.action != PartAction::Kept)
    }

    pub fn stripped_count(&self) -> usize {
        self.stripped().count()
    }

    /// Total decoded bytes removed.
    pub fn removed_bytes(&self) -> u64 {
        self.stripped().map(|e| e.original_size).sum()
    }

    pub fn has_changes(&self) -> bool {
        self.stripped_count() > 0
    }
}

/// The output of a rebuild, ready to be uploaded.
#[derive(Debug, Clone)]
pub struct RebuiltMessage {
    /// Serialized replacement message.
    pub bytes: Vec<u8>,
    pub summary: ChangeSummary,
    /// Timestamp to pass to the upload (not part of the byte stream).
    pub internal_date: Option<DateTime<Utc>>,
    /// Labels to pass to the upload.
    pub labels: Vec<String>,
    /// Names of top-level headers the metadata step had to restore.
    pub restored: Vec<String>,
}

impl RebuiltMessage {
    pub fn new(bytes: Vec<u8>, summary: ChangeSummary) -> Self {
        Self {
            bytes,
            summary,
            internal_date: None,
            labels: Vec::new(),
            restored: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(action: PartAction, size: u64) -> ChangeEntry {
        ChangeEntry {
            part_id: "1".into(),
            content_type: "application/pdf".into(),
            filename: None,
            original_size: size,
            action,
        }
    }

    #[test]
    fn test_summary_totals() {
        let mut summary = ChangeSummary::default();
        summary.push(entry(PartAction::Kept, 5));
        summary.push(entry(PartAction::Removed, 10));
        summary.push(entry(PartAction::ReplacedWithPlaceholder, 20));
        assert_eq!(summary.stripped_count(), 2);
        assert_eq!(summary.removed_bytes(), 30);
        assert!(summary.has_changes());
    }

    #[test]
    fn test_summary_without_changes() {
        let mut summary = ChangeSummary::default();
        summary.push(entry(PartAction::Kept, 5));
        assert!(!summary.has_changes());
        assert_eq!(summary.removed_bytes(), 0);
    }
}
