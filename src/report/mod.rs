//! Human- and machine-readable reports of what a run did (or would do).

pub mod csv;

use humansize::{format_size, BINARY};
use serde::Serialize;

use crate::model::message::{ChangeSummary, PartAction};
use crate::model::part::MimePart;
use crate::parser::header::decode_encoded_words;

/// Whether mailbox mutations are allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    /// Compute and report only. Nothing is uploaded or deleted.
    #[default]
    DryRun,
    Apply,
}

impl RunMode {
    pub fn from_flag(make_changes: bool) -> Self {
        if make_changes {
            Self::Apply
        } else {
            Self::DryRun
        }
    }

    pub fn is_dry_run(self) -> bool {
        self == Self::DryRun
    }
}

/// Per-part lines plus totals.
pub fn summarize(summary: &ChangeSummary) -> String {
    let mut out = String::new();
    for entry in &summary.entries {
        out.push_str(&format!(
            "  {:<8} {:<9} {:<32} {:<28} {:>10}\n",
            entry.part_id,
            entry.action.as_str(),
            truncate(&entry.content_type, 32),
            truncate(entry.filename.as_deref().unwrap_or("-"), 28),
            format_size(entry.original_size, BINARY),
        ));
    }
    let kept = summary
        .entries
        .iter()
        .filter(|e| e.action == PartAction::Kept)
        .count();
    out.push_str(&format!(
        "  {} part(s): {} kept, {} stripped ({})\n",
        summary.entries.len(),
        kept,
        summary.stripped_count(),
        format_size(summary.removed_bytes(), BINARY),
    ));
    out
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut t: String = s.chars().take(max.saturating_sub(1)).collect();
        t.push('…');
        t
    }
}

/// The top-level headers used to identify a message to a person.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InterestingHeaders {
    pub subject: Option<String>,
    pub delivered_to: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub cc: Option<String>,
    pub date: Option<String>,
}

impl InterestingHeaders {
    /// Present fields as `(label, value)` pairs in display order.
    pub fn fields(&self) -> Vec<(&'static str, &str)> {
        [
            ("Subject", &self.subject),
            ("Delivered-To", &self.delivered_to),
            ("From", &self.from),
            ("To", &self.to),
            ("Cc", &self.cc),
            ("Date", &self.date),
        ]
        .into_iter()
        .filter_map(|(label, value)| value.as_deref().map(|v| (label, v)))
        .collect()
    }
}

/// Decoded Subject, Delivered-To, From, To, Cc and Date of a message.
pub fn interesting_headers(root: &MimePart) -> InterestingHeaders {
    let get = |name: &str| root.headers.get(name).map(decode_encoded_words);
    InterestingHeaders {
        subject: get("subject"),
        delivered_to: get("delivered-to"),
        from: get("from"),
        to: get("to"),
        cc: get("cc"),
        date: get("date"),
    }
}

/// Outcome for one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum MessageStatus {
    NoAttachments,
    DryRun,
    Applied { new_id: String },
    Listed,
    Failed { reason: String },
}

impl MessageStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::NoAttachments => "no attachments",
            Self::DryRun => "dry run",
            Self::Applied { .. } => "applied",
            Self::Listed => "listed",
            Self::Failed { .. } => "FAILED",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageReport {
    pub id: String,
    pub headers: InterestingHeaders,
    pub status: MessageStatus,
    pub summary: ChangeSummary,
    pub original_size: u64,
    /// Size of the rebuilt message, when one was produced.
    pub new_size: Option<u64>,
    /// Top-level headers the metadata step had to restore.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub restored: Vec<String>,
}

impl MessageReport {
    pub fn new(id: impl Into<String>, status: MessageStatus) -> Self {
        Self {
            id: id.into(),
            headers: InterestingHeaders::default(),
            status,
            summary: ChangeSummary::default(),
            original_size: 0,
            new_size: None,
            restored: Vec::new(),
        }
    }

    pub fn failed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(
            id,
            MessageStatus::Failed {
                reason: reason.into(),
            },
        )
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, MessageStatus::Failed { .. })
    }
}

/// All message reports of one run, in processing order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub mode: RunMode,
    pub messages: Vec<MessageReport>,
}

impl BatchReport {
    pub fn new(mode: RunMode) -> Self {
        Self {
            mode,
            messages: Vec::new(),
        }
    }

    pub fn push(&mut self, report: MessageReport) {
        self.messages.push(report);
    }

    pub fn failed_count(&self) -> usize {
        self.messages.iter().filter(|m| m.is_failed()).count()
    }

    pub fn applied_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| matches!(m.status, MessageStatus::Applied { .. }))
            .count()
    }

    /// Decoded attachment bytes removed (or that would be removed).
    pub fn removed_bytes(&self) -> u64 {
        self.messages.iter().map(|m| m.summary.removed_bytes()).sum()
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        if self.mode.is_dry_run() {
            out.push_str("  Dry run: no changes were made. Pass --make-changes to apply.\n");
        }
        for report in &self.messages {
            out.push('\n');
            out.push_str(&format!("  [{}] {}\n", report.id, report.status.label()));
            for (label, value) in report.headers.fields() {
                out.push_str(&format!("  {:<13} {}\n", format!("{label}:"), value));
            }
            match &report.status {
                MessageStatus::Applied { new_id } => {
                    out.push_str(&format!("  {:<13} {new_id}\n", "New id:"));
                }
                MessageStatus::Failed { reason } => {
                    out.push_str(&format!("  {:<13} {reason}\n", "Reason:"));
                }
                _ => {}
            }
            if !report.summary.entries.is_empty() {
                out.push_str(&summarize(&report.summary));
            }
            if let Some(new_size) = report.new_size {
                out.push_str(&format!(
                    "  Size: {} -> {}\n",
                    format_size(report.original_size, BINARY),
                    format_size(new_size, BINARY)
                ));
            }
            if !report.restored.is_empty() {
                out.push_str(&format!("  Restored headers: {}\n", report.restored.join(", ")));
            }
        }
        out.push_str(&format!(
            "\n  {} message(s), {} applied, {} failed, {} of attachments\n",
            self.messages.len(),
            self.applied_count(),
            self.failed_count(),
            format_size(self.removed_bytes(), BINARY),
        ));
        out
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "mode": self.mode,
            "message_count": self.messages.len(),
            "applied": self.applied_count(),
            "failed": self.failed_count(),
            "removed_bytes": self.removed_bytes(),
            "messages": self.messages,
        })
    }
}
