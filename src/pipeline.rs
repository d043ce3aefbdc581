//! Batch processing: fetch, back up, classify, rebuild, upload, remove.
//!
//! Every failure is scoped to one message and becomes a `Failed` entry in
//! the batch report; the batch always runs to the end. The original is only
//! removed after the mailbox accepted its replacement.

use tracing::{info, warn};

use crate::cache::MessageCache;
use crate::classify::{ClassifiedPart, Classifier};
use crate::error::Result;
use crate::mailbox::{DeleteMode, Mailbox};
use crate::metadata::apply_original_metadata;
use crate::model::message::{ChangeEntry, ChangeSummary, PartAction, RawMessage};
use crate::parser::mime::{parse_with_depth, MAX_DEPTH};
use crate::rebuild::{PlaceholderPolicy, Rebuilder};
use crate::report::{interesting_headers, BatchReport, MessageReport, MessageStatus, RunMode};

/// Settings for one run.
#[derive(Debug, Clone)]
pub struct Options {
    pub mode: RunMode,
    pub policy: PlaceholderPolicy,
    /// Size-threshold rule limit; `None` means any size.
    pub min_attachment_size: Option<u64>,
    pub max_depth: usize,
    pub delete_mode: DeleteMode,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            mode: RunMode::DryRun,
            policy: PlaceholderPolicy::TextStub,
            min_attachment_size: None,
            max_depth: MAX_DEPTH,
            delete_mode: DeleteMode::Trash,
        }
    }
}

pub struct Pipeline<'c> {
    options: Options,
    classifier: Classifier,
    cache: Option<&'c MessageCache>,
}

impl<'c> Pipeline<'c> {
    pub fn new(options: Options) -> Self {
        let classifier = Classifier::new(options.min_attachment_size);
        Self {
            options,
            classifier,
            cache: None,
        }
    }

    /// Back up fetched messages to `cache` and serve read-only lookups from it.
    pub fn with_cache(mut self, cache: &'c MessageCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Fetch a message for a read-only command, preferring the cache.
    pub fn load_message<M: Mailbox + ?Sized>(&self, mailbox: &M, id: &str) -> Result<RawMessage> {
        if let Some(cache) = self.cache {
            if let Some(raw) = cache.load_cached(id)? {
                return Ok(raw);
            }
        }
        let raw = mailbox.fetch_raw_message(id)?;
        if let Some(cache) = self.cache {
            if let Err(e) = cache.store_cached(id, &raw) {
                warn!(id, error = %e, "Could not cache message");
            }
        }
        Ok(raw)
    }

    /// Report the attachments of each message without changing anything.
    pub fn list_attachments<M: Mailbox + ?Sized>(
        &self,
        mailbox: &M,
        ids: &[String],
        progress: &dyn Fn(usize, usize),
    ) -> BatchReport {
        let mut batch = BatchReport::new(RunMode::DryRun);
        for (i, id) in ids.iter().enumerate() {
            progress(i, ids.len());
            let mut report = MessageReport::new(id.as_str(), MessageStatus::Listed);
            if let Err(e) = self.list_one(mailbox, id, &mut report) {
                warn!(id = %id, error = %e, "Could not list attachments");
                report.status = MessageStatus::Failed {
                    reason: e.to_string(),
                };
            }
            batch.push(report);
        }
        progress(ids.len(), ids.len());
        batch
    }

    fn list_one<M: Mailbox + ?Sized>(
        &self,
        mailbox: &M,
        id: &str,
        report: &mut MessageReport,
    ) -> Result<()> {
        let raw = self.load_message(mailbox, id)?;
        report.original_size = raw.size();
        let root = parse_with_depth(&raw.bytes, self.options.max_depth)?;
        report.headers = interesting_headers(&root);
        let classified = self.classifier.classify(&root);
        report.summary = planned_summary(&classified, self.options.policy);
        if !report.summary.has_changes() {
            report.status = MessageStatus::NoAttachments;
        }
        Ok(())
    }

    /// Strip attachments from every message in `ids`.
    pub fn remove_attachments<M: Mailbox + ?Sized>(
        &self,
        mailbox: &mut M,
        ids: &[String],
        progress: &dyn Fn(usize, usize),
    ) -> BatchReport {
        let mut batch = BatchReport::new(self.options.mode);
        for (i, id) in ids.iter().enumerate() {
            progress(i, ids.len());
            batch.push(self.process_message(mailbox, id));
        }
        progress(ids.len(), ids.len());
        info!(
            messages = batch.messages.len(),
            applied = batch.applied_count(),
            failed = batch.failed_count(),
            "Batch finished"
        );
        batch
    }

    /// Run one message through the whole pipeline.
    pub fn process_message<M: Mailbox + ?Sized>(&self, mailbox: &mut M, id: &str) -> MessageReport {
        let mut report = MessageReport::new(id, MessageStatus::NoAttachments);
        match self.try_process(mailbox, id, &mut report) {
            Ok(status) => report.status = status,
            Err(e) => {
                warn!(id, error = %e, kind = e.kind(), "Message failed");
                report.status = MessageStatus::Failed {
                    reason: e.to_string(),
                };
            }
        }
        report
    }

    fn try_process<M: Mailbox + ?Sized>(
        &self,
        mailbox: &mut M,
        id: &str,
        report: &mut MessageReport,
    ) -> Result<MessageStatus> {
        // Always fetch fresh: the cache may hold a copy that was already rewritten.
        let original = mailbox.fetch_raw_message(id)?;
        report.original_size = original.size();

        if let Some(cache) = self.cache {
            match cache.store_cached(id, &original) {
                Ok(_) => {}
                Err(e) if self.options.mode.is_dry_run() => {
                    warn!(id, error = %e, "Could not cache message");
                }
                Err(e) => return Err(e),
            }
        }

        let root = parse_with_depth(&original.bytes, self.options.max_depth)?;
        report.headers = interesting_headers(&root);
        let classified = self.classifier.classify(&root);
        if classified.attachments().is_empty() {
            return Ok(MessageStatus::NoAttachments);
        }

        let rebuilt = Rebuilder::new(self.options.policy).rebuild(&root, &classified)?;
        let rebuilt = apply_original_metadata(rebuilt, &original)?;
        report.summary = rebuilt.summary.clone();
        report.new_size = Some(rebuilt.bytes.len() as u64);
        report.restored = rebuilt.restored.clone();

        if self.options.mode.is_dry_run() {
            return Ok(MessageStatus::DryRun);
        }

        let new_id = mailbox.upload_message(&rebuilt.bytes, &rebuilt.labels, rebuilt.internal_date)?;
        if let Err(e) = mailbox.remove_message(id, self.options.delete_mode) {
            warn!(id, new_id = %new_id, error = %e, "Replacement uploaded but original not removed");
            return Ok(MessageStatus::Failed {
                reason: format!(
                    "replacement uploaded as {new_id} but the original could not be removed: {e}"
                ),
            });
        }
        info!(
            id,
            new_id = %new_id,
            removed = rebuilt.summary.stripped_count(),
            "Replaced message"
        );
        Ok(MessageStatus::Applied { new_id })
    }
}

/// What a rebuild with `policy` would do to each leaf.
pub fn planned_summary(classified: &ClassifiedPart<'_>, policy: PlaceholderPolicy) -> ChangeSummary {
    let mut summary = ChangeSummary::default();
    for leaf in classified.leaves() {
        let action = match (leaf.is_attachment, policy) {
            (false, _) => PartAction::Kept,
            (true, PlaceholderPolicy::Omit) => PartAction::Removed,
            (true, PlaceholderPolicy::TextStub) => PartAction::ReplacedWithPlaceholder,
        };
        summary.push(ChangeEntry {
            part_id: leaf.part_id.clone(),
            content_type: leaf.part.content_type.clone(),
            filename: leaf.filename.clone(),
            original_size: leaf.decoded_size,
            action,
        });
    }
    summary
}

/// Split a comma-separated id list, dropping blanks.
pub fn parse_id_list(ids: &str) -> Vec<String> {
    ids.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}
