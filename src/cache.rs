//! Local copies of fetched messages.
//!
//! Every message the remove path fetches is written here before anything is
//! changed in the mailbox, so the original survives even if the account side
//! goes wrong. Read-only commands use the cache to avoid refetching.
//!
//! Layout: `<cache_dir>/<account>/<id>.eml`, both path components sanitized.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Result, StripError};
use crate::extract::sanitize_filename_part;
use crate::model::message::RawMessage;
use crate::parser::header::parse_date;
use crate::parser::mime::top_level_headers;

#[derive(Debug, Clone)]
pub struct MessageCache {
    dir: PathBuf,
}

impl MessageCache {
    pub fn new(cache_dir: &Path, account: &str) -> Self {
        Self {
            dir: cache_dir.join(sanitize_filename_part(account, 100)),
        }
    }

    /// Directory holding this account's messages.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.eml", sanitize_filename_part(id, 150)))
    }

    /// The cached copy of `id`, if there is one.
    ///
    /// Labels are not cached; the internal date is taken from the `Date`
    /// header.
    pub fn load_cached(&self, id: &str) -> Result<Option<RawMessage>> {
        let path = self.path_for(id);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StripError::io(&path, e)),
        };
        debug!(id, path = %path.display(), "Cache hit");
        let mut raw = RawMessage::new(id, bytes);
        raw.internal_date = top_level_headers(&raw.bytes)
            .get("date")
            .and_then(parse_date);
        Ok(Some(raw))
    }

    /// Write (or overwrite) the cached copy of `id`.
    pub fn store_cached(&self, id: &str, raw: &RawMessage) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir).map_err(|e| StripError::io(&self.dir, e))?;
        let path = self.path_for(id);
        let tmp = path.with_extension("eml.tmp");
        std::fs::write(&tmp, &raw.bytes).map_err(|e| StripError::io(&tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| StripError::io(&path, e))?;
        debug!(id, path = %path.display(), size = raw.bytes.len(), "Cached message");
        Ok(path)
    }
}
