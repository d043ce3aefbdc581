//! A mailbox backed by a plain directory.
//!
//! Layout:
//!
//! ```text
//! <root>/<id>.eml       raw message
//! <root>/<id>.json      labels and internal date
//! <root>/.trash/        trashed messages, same layout
//! ```
//!
//! Ids of uploaded messages are the first 16 hex digits of the SHA-256 of
//! their bytes.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::Mailbox;
use crate::classify::Classifier;
use crate::error::{Result, StripError};
use crate::model::message::RawMessage;
use crate::parser::header::decode_encoded_words;
use crate::parser::mime::{parse_message, top_level_headers};

const TRASH_DIR: &str = ".trash";
const HAS_ATTACHMENT: &str = "has:attachment";

/// Sidecar metadata stored next to each message.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Sidecar {
    #[serde(default)]
    labels: Vec<String>,
    #[serde(default)]
    internal_date: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct DirMailbox {
    root: PathBuf,
    account: String,
    quota_bytes: Option<u64>,
    classifier: Classifier,
}

impl DirMailbox {
    /// Open an existing mailbox directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(StripError::InvalidPath(format!(
                "mailbox directory does not exist: {}",
                root.display()
            )));
        }
        let account = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "mailbox".to_string());
        Ok(Self {
            root,
            account,
            quota_bytes: None,
            classifier: Classifier::default(),
        })
    }

    /// Refuse uploads that would take the stored `.eml` total above `quota`.
    pub fn with_quota(mut self, quota: Option<u64>) -> Self {
        self.quota_bytes = quota;
        self
    }

    /// Classifier used by `has:attachment` searches.
    pub fn with_classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// All message ids, sorted.
    pub fn message_ids(&self) -> Result<Vec<String>> {
        let entries = std::fs::read_dir(&self.root).map_err(|e| StripError::io(&self.root, e))?;
        let mut ids = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| StripError::io(&self.root, e))?.path();
            if path.extension().is_some_and(|ext| ext == "eml") {
                if let Some(stem) = path.file_stem() {
                    ids.push(stem.to_string_lossy().into_owned());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Bytes used by stored messages (sidecars and trash excluded).
    pub fn used_bytes(&self) -> Result<u64> {
        let mut total = 0;
        for id in self.message_ids()? {
            let path = self.eml_path(&id)?;
            total += std::fs::metadata(&path)
                .map_err(|e| StripError::io(&path, e))?
                .len();
        }
        Ok(total)
    }

    fn eml_path(&self, id: &str) -> Result<PathBuf> {
        validate_id(id)?;
        Ok(self.root.join(format!("{id}.eml")))
    }

    fn sidecar_path(&self, id: &str) -> Result<PathBuf> {
        validate_id(id)?;
        Ok(self.root.join(format!("{id}.json")))
    }

    fn read_sidecar(&self, id: &str) -> Result<Sidecar> {
        let path = self.sidecar_path(id)?;
        if !path.exists() {
            return Ok(Sidecar::default());
        }
        let text = std::fs::read_to_string(&path).map_err(|e| StripError::io(&path, e))?;
        match serde_json::from_str(&text) {
            Ok(sidecar) => Ok(sidecar),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable sidecar");
                Ok(Sidecar::default())
            }
        }
    }

    fn matches(&self, id: &str, terms: &[String], want_attachment: bool) -> Result<bool> {
        let raw = self.fetch_raw_message(id)?;

        if !terms.is_empty() {
            let mut haystack = String::new();
            for header in top_level_headers(&raw.bytes).iter() {
                haystack.push_str(&header.name);
                haystack.push_str(": ");
                haystack.push_str(&decode_encoded_words(&header.value));
                haystack.push('\n');
            }
            let haystack = haystack.to_lowercase();
            if !terms.iter().all(|term| haystack.contains(term.as_str())) {
                return Ok(false);
            }
        }

        if want_attachment {
            match parse_message(&raw.bytes) {
                Ok(root) => return Ok(!self.classifier.classify(&root).attachments().is_empty()),
                Err(e) => {
                    warn!(id, error = %e, "Skipping unparseable message in attachment search");
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}

impl Mailbox for DirMailbox {
    fn account_name(&self) -> &str {
        &self.account
    }

    fn search_message_ids(&self, query: &str) -> Result<Vec<String>> {
        let mut want_attachment = false;
        let mut terms = Vec::new();
        for term in query.split_whitespace() {
            if term.eq_ignore_ascii_case(HAS_ATTACHMENT) {
                want_attachment = true;
            } else {
                terms.push(term.to_lowercase());
            }
        }

        let mut found = Vec::new();
        for id in self.message_ids()? {
            if self.matches(&id, &terms, want_attachment)? {
                found.push(id);
            }
        }
        debug!(query, results = found.len(), "Searched mailbox");
        Ok(found)
    }

    fn fetch_raw_message(&self, id: &str) -> Result<RawMessage> {
        let path = self.eml_path(id)?;
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StripError::NotFound(id.to_string()));
            }
            Err(e) => return Err(StripError::io(&path, e)),
        };
        let sidecar = self.read_sidecar(id)?;
        let mut raw = RawMessage::new(id, bytes);
        raw.labels = sidecar.labels;
        raw.internal_date = sidecar.internal_date;
        Ok(raw)
    }

    fn upload_message(
        &mut self,
        bytes: &[u8],
        labels: &[String],
        internal_date: Option<DateTime<Utc>>,
    ) -> Result<String> {
        if let Some(quota) = self.quota_bytes {
            let used = self.used_bytes()?;
            let needed = bytes.len() as u64;
            if used + needed > quota {
                return Err(StripError::QuotaExceeded {
                    needed,
                    available: quota.saturating_sub(used),
                });
            }
        }

        let id = content_id(bytes);
        let path = self.eml_path(&id)?;
        std::fs::write(&path, bytes).map_err(|e| StripError::io(&path, e))?;

        let sidecar = Sidecar {
            labels: labels.to_vec(),
            internal_date,
        };
        let json = serde_json::to_string_pretty(&sidecar)
            .map_err(|e| StripError::Transport(format!("cannot encode metadata: {e}")))?;
        let sidecar_path = self.sidecar_path(&id)?;
        std::fs::write(&sidecar_path, json).map_err(|e| StripError::io(&sidecar_path, e))?;

        info!(id = %id, size = bytes.len(), "Uploaded message");
        Ok(id)
    }

    fn delete_message(&mut self, id: &str) -> Result<()> {
        let path = self.eml_path(id)?;
        if !path.exists() {
            return Err(StripError::NotFound(id.to_string()));
        }
        std::fs::remove_file(&path).map_err(|e| StripError::io(&path, e))?;
        let sidecar = self.sidecar_path(id)?;
        if sidecar.exists() {
            std::fs::remove_file(&sidecar).map_err(|e| StripError::io(&sidecar, e))?;
        }
        info!(id, "Deleted message");
        Ok(())
    }

    fn trash_message(&mut self, id: &str) -> Result<()> {
        let path = self.eml_path(id)?;
        if !path.exists() {
            return Err(StripError::NotFound(id.to_string()));
        }
        let trash = self.root.join(TRASH_DIR);
        std::fs::create_dir_all(&trash).map_err(|e| StripError::io(&trash, e))?;

        let target = trash.join(format!("{id}.eml"));
        std::fs::rename(&path, &target).map_err(|e| StripError::io(&path, e))?;
        let sidecar = self.sidecar_path(id)?;
        if sidecar.exists() {
            let target = trash.join(format!("{id}.json"));
            std::fs::rename(&sidecar, &target).map_err(|e| StripError::io(&sidecar, e))?;
        }
        info!(id, "Moved message to trash");
        Ok(())
    }
}

/// First 16 hex digits of the SHA-256 of `bytes`.
fn content_id(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let hash = format!("{:x}", hasher.finalize());
    hash[..16].to_string()
}

/// Ids become file names, so anything that could escape the directory is
/// rejected.
fn validate_id(id: &str) -> Result<()> {
    let bad = id.is_empty()
        || id.starts_with('.')
        || id.contains(['/', '\\', '\0'])
        || id.chars().any(char::is_control);
    if bad {
        return Err(StripError::InvalidPath(format!("invalid message id: {id:?}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const PLAIN: &str = "From: alice@example.com\r\nSubject: Lunch plans\r\n\r\nNoon?\r\n";
    const WITH_PDF: &str = "From: bob@example.com\r\n\
Subject: =?UTF-8?Q?Invoice_M=C3=A4rz?=\r\n\
Content-Type: multipart/mixed; boundary=b\r\n\
\r\n\
--b\r\n\
Content-Type: text/plain\r\n\
\r\n\
see attached\r\n\
--b\r\n\
Content-Type: application/pdf\r\n\
Content-Disposition: attachment; filename=invoice.pdf\r\n\
\r\n\
%PDF\r\n\
--b--\r\n";

    fn mailbox() -> (tempfile::TempDir, DirMailbox) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.eml"), PLAIN).unwrap();
        std::fs::write(dir.path().join("b.eml"), WITH_PDF).unwrap();
        std::fs::write(
            dir.path().join("b.json"),
            r#"{"labels":["INBOX"],"internal_date":"2025-03-01T09:00:00Z"}"#,
        )
        .unwrap();
        let mailbox = DirMailbox::open(dir.path()).unwrap();
        (dir, mailbox)
    }

    #[test]
    fn test_search_terms_and_attachment_filter() {
        let (_dir, mailbox) = mailbox();
        assert_eq!(mailbox.search_message_ids("").unwrap(), vec!["a", "b"]);
        assert_eq!(mailbox.search_message_ids("lunch").unwrap(), vec!["a"]);
        assert_eq!(mailbox.search_message_ids("märz bob@").unwrap(), vec!["b"]);
        assert_eq!(mailbox.search_message_ids("has:attachment").unwrap(), vec!["b"]);
        assert!(mailbox.search_message_ids("lunch has:attachment").unwrap().is_empty());
    }

    #[test]
    fn test_fetch_reads_sidecar() {
        let (_dir, mailbox) = mailbox();
        let raw = mailbox.fetch_raw_message("b").unwrap();
        assert_eq!(raw.labels, vec!["INBOX"]);
        assert_eq!(
            raw.internal_date,
            Some(Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap())
        );
        let plain = mailbox.fetch_raw_message("a").unwrap();
        assert!(plain.labels.is_empty());
        assert!(matches!(
            mailbox.fetch_raw_message("zzz"),
            Err(StripError::NotFound(_))
        ));
    }

    #[test]
    fn test_upload_uses_content_hash_id() {
        let (_dir, mut mailbox) = mailbox();
        let id = mailbox
            .upload_message(PLAIN.as_bytes(), &["Work".into()], None)
            .unwrap();
        assert_eq!(id.len(), 16);
        assert_eq!(id, content_id(PLAIN.as_bytes()));
        let raw = mailbox.fetch_raw_message(&id).unwrap();
        assert_eq!(raw.bytes, PLAIN.as_bytes());
        assert_eq!(raw.labels, vec!["Work"]);
    }

    #[test]
    fn test_quota_is_enforced() {
        let (_dir, mailbox) = mailbox();
        let used = mailbox.used_bytes().unwrap();
        let mut mailbox = mailbox.with_quota(Some(used + 4));
        let err = mailbox.upload_message(b"12345", &[], None).unwrap_err();
        assert!(matches!(
            err,
            StripError::QuotaExceeded { needed: 5, available: 4 }
        ));
    }

    #[test]
    fn test_trash_and_delete() {
        let (dir, mut mailbox) = mailbox();
        mailbox.trash_message("b").unwrap();
        assert!(dir.path().join(".trash/b.eml").exists());
        assert!(dir.path().join(".trash/b.json").exists());
        assert_eq!(mailbox.message_ids().unwrap(), vec!["a"]);

        mailbox.delete_message("a").unwrap();
        assert!(mailbox.message_ids().unwrap().is_empty());
        assert!(matches!(mailbox.delete_message("a"), Err(StripError::NotFound(_))));
    }

    #[test]
    fn test_ids_cannot_escape_directory() {
        let (_dir, mailbox) = mailbox();
        for id in ["../etc/passwd", ".trash", "", "a/b"] {
            assert!(matches!(
                mailbox.fetch_raw_message(id),
                Err(StripError::InvalidPath(_))
            ));
        }
    }
}
