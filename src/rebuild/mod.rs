//! Message rebuilding: produce a copy of a classified tree with the
//! attachment leaves removed or replaced, then serialize it.
//!
//! Structure is preserved on purpose. A container left with a single child
//! stays a container; a container left with no children turns into a
//! plain-text placeholder instead of an empty multipart. Every container
//! touched by a removal gets a fresh boundary.

pub mod boundary;
pub mod serialize;

use chrono::{DateTime, SecondsFormat, Utc};
use humansize::{format_size, BINARY};
use rand::Rng;
use tracing::{debug, info};

use crate::classify::ClassifiedPart;
use crate::error::{Result, StripError};
use crate::model::message::{ChangeEntry, ChangeSummary, PartAction, RebuiltMessage};
use crate::model::part::{HeaderMap, LineEnding, MimePart};
use crate::parser::{header, mime};

/// Top-level header recording that attachments were stripped.
pub const REMOVAL_MARKER_HEADER: &str = "X-Attachments-Removed";

/// What to put where an attachment used to be.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PlaceholderPolicy {
    /// Drop the part entirely.
    #[serde(rename = "omit")]
    Omit,
    /// Replace it with a short `text/plain` note.
    #[default]
    #[serde(rename = "stub")]
    TextStub,
}

impl std::str::FromStr for PlaceholderPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "omit" => Ok(Self::Omit),
            "stub" | "text-stub" => Ok(Self::TextStub),
            other => Err(format!("unknown placeholder policy '{other}' (use stub or omit)")),
        }
    }
}

impl std::fmt::Display for PlaceholderPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Omit => "omit",
            Self::TextStub => "stub",
        })
    }
}

/// Rebuilds classified messages. Stateless apart from its settings; the
/// boundary RNG is drawn fresh for every call.
#[derive(Debug, Clone)]
pub struct Rebuilder {
    policy: PlaceholderPolicy,
    removed_at: DateTime<Utc>,
}

impl Rebuilder {
    pub fn new(policy: PlaceholderPolicy) -> Self {
        Self {
            policy,
            removed_at: Utc::now(),
        }
    }

    /// Use a fixed removal timestamp in placeholders and the marker header.
    pub fn removed_at(mut self, at: DateTime<Utc>) -> Self {
        self.removed_at = at;
        self
    }

    /// Rebuild `root` according to `classified` and serialize the result.
    ///
    /// Fails with [`StripError::UnrebuildableMessage`] when nothing would be
    /// left to send.
    pub fn rebuild(&self, root: &MimePart, classified: &ClassifiedPart<'_>) -> Result<RebuiltMessage> {
        let mut rng = rand::thread_rng();
        let mut summary = ChangeSummary::default();

        let rebuilt = self.rebuild_node(root, classified, true, &mut summary, &mut rng);
        let Some((mut new_root, touched)) = rebuilt else {
            return Err(StripError::UnrebuildableMessage(
                "the whole message is an attachment; use the stub placeholder to keep it".into(),
            ));
        };
        if new_root.leaf_count() == 0 {
            return Err(StripError::UnrebuildableMessage(
                "no parts would remain after removal".into(),
            ));
        }

        if touched {
            new_root.headers.set(
                REMOVAL_MARKER_HEADER,
                format!(
                    "{} part(s), {} bytes; {}",
                    summary.stripped_count(),
                    summary.removed_bytes(),
                    self.removed_at.to_rfc2822()
                ),
            );
            info!(
                removed = summary.stripped_count(),
                bytes = summary.removed_bytes(),
                policy = %self.policy,
                "Rebuilt message without attachments"
            );
        }

        let bytes = serialize::serialize(&new_root);
        if touched {
            let max_depth = container_depth(&new_root) + 1;
            if let Err(e) = mime::parse_with_depth(&bytes, max_depth) {
                return Err(StripError::UnrebuildableMessage(format!(
                    "rebuilt message does not parse: {e}"
                )));
            }
        }
        Ok(RebuiltMessage::new(bytes, summary))
    }

    /// Returns the rebuilt node and whether anything below it changed, or
    /// `None` when the node is dropped.
    fn rebuild_node<R: Rng>(
        &self,
        part: &MimePart,
        classified: &ClassifiedPart<'_>,
        is_root: bool,
        summary: &mut ChangeSummary,
        rng: &mut R,
    ) -> Option<(MimePart, bool)> {
        if part.is_leaf() {
            return self.rebuild_leaf(part, classified, is_root, summary);
        }

        let first_entry = summary.entries.len();
        let mut children = Vec::with_capacity(part.children.len());
        let mut touched = false;
        for (child, child_class) in part.children.iter().zip(&classified.children) {
            match self.rebuild_node(child, child_class, false, summary, rng) {
                Some((node, changed)) => {
                    touched |= changed;
                    children.push(node);
                }
                None => touched = true,
            }
        }

        if !touched {
            return Some((part.clone(), false));
        }

        if children.is_empty() {
            debug!(part_id = %classified.part_id, "Container emptied, replacing with placeholder");
            let removed = &summary.entries[first_entry..];
            let body = self.emptied_container_text(removed, part.line_ending);
            return Some((placeholder_leaf(&part.headers, body, part.line_ending), true));
        }

        let mut rebuilt = part.clone();
        rebuilt.children = children;

        let serialized: Vec<Vec<u8>> = rebuilt.children.iter().map(serialize::serialize).collect();
        let mut contents: Vec<&[u8]> = serialized.iter().map(Vec::as_slice).collect();
        if let Some(preamble) = &rebuilt.preamble {
            contents.push(preamble);
        }
        contents.push(&rebuilt.epilogue);
        let new_boundary = boundary::fresh_boundary(rng, &contents);

        let content_type = rebuilt.headers.get("content-type").unwrap_or_default();
        let content_type = header::replace_param(content_type, "boundary", &new_boundary);
        rebuilt.headers.set("Content-Type", content_type);
        rebuilt.headers.remove("Content-Length");
        rebuilt.boundary = Some(new_boundary);
        Some((rebuilt, true))
    }

    fn rebuild_leaf(
        &self,
        part: &MimePart,
        classified: &ClassifiedPart<'_>,
        is_root: bool,
        summary: &mut ChangeSummary,
    ) -> Option<(MimePart, bool)> {
        let mut entry = ChangeEntry {
            part_id: classified.part_id.clone(),
            content_type: part.content_type.clone(),
            filename: classified.filename.clone(),
            original_size: classified.decoded_size,
            action: PartAction::Kept,
        };

        if !classified.is_attachment {
            summary.push(entry);
            return Some((part.clone(), false));
        }

        debug!(
            part_id = %entry.part_id,
            reason = classified.reason.as_str(),
            policy = %self.policy,
            "Stripping attachment"
        );

        match self.policy {
            PlaceholderPolicy::Omit => {
                entry.action = PartAction::Removed;
                summary.push(entry);
                None
            }
            PlaceholderPolicy::TextStub => {
                let body = self.stub_text(&entry, part.line_ending);
                let base = if is_root {
                    part.headers.clone()
                } else {
                    HeaderMap::new()
                };
                entry.action = PartAction::ReplacedWithPlaceholder;
                summary.push(entry);
                Some((placeholder_leaf(&base, body, part.line_ending), true))
            }
        }
    }

    fn stub_text(&self, entry: &ChangeEntry, line_ending: LineEnding) -> String {
        let eol = line_ending_str(line_ending);
        let name = entry.filename.as_deref().unwrap_or("unnamed attachment");
        format!(
            "[Attachment removed: {name}]{eol}\
Type: {}{eol}\
Size: {} bytes ({}){eol}\
Removed: {}{eol}",
            entry.content_type,
            entry.original_size,
            format_size(entry.original_size, BINARY),
            self.removed_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        )
    }

    fn emptied_container_text(&self, removed: &[ChangeEntry], line_ending: LineEnding) -> String {
        let eol = line_ending_str(line_ending);
        let mut text = format!(
            "[Attachments removed on {}]{eol}",
            self.removed_at.to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        for entry in removed.iter().filter(|e| e.action != PartAction::Kept) {
            text.push_str(&format!(
                "- {} ({}, {} bytes){eol}",
                entry.filename.as_deref().unwrap_or("unnamed attachment"),
                entry.content_type,
                entry.original_size
            ));
        }
        text
    }
}

/// Rebuild with a one-off [`Rebuilder`].
pub fn rebuild(
    root: &MimePart,
    classified: &ClassifiedPart<'_>,
    policy: PlaceholderPolicy,
) -> Result<RebuiltMessage> {
    Rebuilder::new(policy).rebuild(root, classified)
}

/// A `text/plain` leaf carrying `body`, keeping every non-content header of
/// `base` (top-level headers stay on the root this way).
fn placeholder_leaf(base: &HeaderMap, body: String, line_ending: LineEnding) -> MimePart {
    let mut headers = base.clone();
    for name in [
        "Content-Disposition",
        "Content-Length",
        "Content-ID",
        "Content-Description",
    ] {
        headers.remove(name);
    }
    let (charset, encoding) = if body.is_ascii() {
        ("us-ascii", "7bit")
    } else {
        ("utf-8", "8bit")
    };
    headers.set("Content-Type", format!("text/plain; charset={charset}"));
    headers.set("Content-Transfer-Encoding", encoding);
    headers.append("Content-Disposition", "inline");
    MimePart::leaf(headers, body.into_bytes(), line_ending)
}

/// Number of multipart levels on the deepest path.
fn container_depth(part: &MimePart) -> usize {
    if part.is_leaf() {
        return 0;
    }
    1 + part.children.iter().map(container_depth).max().unwrap_or(0)
}

fn line_ending_str(line_ending: LineEnding) -> &'static str {
    match line_ending {
        LineEnding::CrLf => "\r\n",
        LineEnding::Lf => "\n",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify;
    use crate::parser::mime::parse_message;
    use chrono::TimeZone;

    const MIXED: &str = "From: a@example.com\r\n\
Subject: Report\r\n\
Message-ID: <m1@example.com>\r\n\
Content-Type: multipart/mixed; boundary=\"orig\"\r\n\
\r\n\
--orig\r\n\
Content-Type: text/plain\r\n\
\r\n\
Hello\r\n\
--orig\r\n\
Content-Type: application/pdf; name=\"report.pdf\"\r\n\
Content-Disposition: attachment; filename=\"report.pdf\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
JVBERi0xLjQK\r\n\
--orig--\r\n";

    fn fixed() -> Rebuilder {
        Rebuilder::new(PlaceholderPolicy::TextStub)
            .removed_at(Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap())
    }

    #[test]
    fn test_text_stub_replaces_attachment() {
        let root = parse_message(MIXED.as_bytes()).unwrap();
        let classified = classify(&root);
        let rebuilt = fixed().rebuild(&root, &classified).unwrap();

        let actions: Vec<PartAction> = rebuilt.summary.entries.iter().map(|e| e.action).collect();
        assert_eq!(actions, vec![PartAction::Kept, PartAction::ReplacedWithPlaceholder]);
        assert_eq!(rebuilt.summary.entries[1].original_size, 9);

        let reparsed = parse_message(&rebuilt.bytes).unwrap();
        assert_eq!(reparsed.children.len(), 2);
        let stub = &reparsed.children[1];
        assert_eq!(stub.content_type, "text/plain");
        let text = String::from_utf8(stub.body.clone()).unwrap();
        assert!(text.contains("report.pdf"));
        assert!(text.contains("9 bytes"));
        assert!(text.contains("2026-01-02T03:04:05Z"));
        assert_ne!(reparsed.boundary.as_deref(), Some("orig"));
        assert!(reparsed.headers.contains(REMOVAL_MARKER_HEADER));
    }

    #[test]
    fn test_omit_keeps_single_child_container() {
        let root = parse_message(MIXED.as_bytes()).unwrap();
        let classified = classify(&root);
        let rebuilt = rebuild(&root, &classified, PlaceholderPolicy::Omit).unwrap();
        let reparsed = parse_message(&rebuilt.bytes).unwrap();
        assert!(reparsed.is_multipart());
        assert_eq!(reparsed.children.len(), 1);
        assert_eq!(reparsed.children[0].body, b"Hello");
        assert_eq!(rebuilt.summary.entries[1].action, PartAction::Removed);
    }

    #[test]
    fn test_untouched_message_is_reserialized_verbatim() {
        let raw = "Subject: plain\r\nContent-Type: multipart/alternative; boundary=a\r\n\r\n\
--a\r\nContent-Type: text/plain\r\n\r\nhi\r\n--a\r\nContent-Type: text/html\r\n\r\n<p>hi</p>\r\n--a--\r\n";
        let root = parse_message(raw.as_bytes()).unwrap();
        let rebuilt = rebuild(&root, &classify(&root), PlaceholderPolicy::TextStub).unwrap();
        assert_eq!(rebuilt.bytes, raw.as_bytes());
        assert!(!rebuilt.summary.has_changes());
    }

    #[test]
    fn test_emptied_container_becomes_placeholder() {
        let raw = "Subject: only attachment\r\nContent-Type: multipart/mixed; boundary=b\r\n\r\n\
--b\r\nContent-Type: application/zip\r\nContent-Disposition: attachment; filename=a.zip\r\n\r\nPK\r\n--b--\r\n";
        let root = parse_message(raw.as_bytes()).unwrap();
        let rebuilt = rebuild(&root, &classify(&root), PlaceholderPolicy::Omit).unwrap();
        let reparsed = parse_message(&rebuilt.bytes).unwrap();
        assert!(reparsed.is_leaf());
        assert_eq!(reparsed.content_type, "text/plain");
        assert!(!reparsed.body.is_empty());
        assert!(String::from_utf8_lossy(&reparsed.body).contains("a.zip"));
        assert_eq!(reparsed.headers.get("subject"), Some("only attachment"));
    }

    #[test]
    fn test_nested_emptied_container_becomes_placeholder() {
        let raw = "Subject: nested\r\nContent-Type: multipart/mixed; boundary=outer\r\n\r\n\
--outer\r\nContent-Type: text/plain\r\n\r\nSee below\r\n\
--outer\r\nContent-Type: multipart/mixed; boundary=inner\r\n\r\n\
--inner\r\nContent-Type: application/zip\r\nContent-Disposition: attachment; filename=a.zip\r\n\r\nPK\r\n\
--inner--\r\n\
--outer--\r\n";
        let root = parse_message(raw.as_bytes()).unwrap();
        let rebuilt = rebuild(&root, &classify(&root), PlaceholderPolicy::Omit).unwrap();

        let actions: Vec<PartAction> = rebuilt.summary.entries.iter().map(|e| e.action).collect();
        assert_eq!(actions, vec![PartAction::Kept, PartAction::Removed]);

        let reparsed = parse_message(&rebuilt.bytes).unwrap();
        assert_eq!(reparsed.children.len(), 2);
        assert_eq!(reparsed.children[0].body, b"See below");
        let placeholder = &reparsed.children[1];
        assert!(placeholder.is_leaf());
        assert_eq!(placeholder.content_type, "text/plain");
        assert!(String::from_utf8_lossy(&placeholder.body).contains("a.zip"));
        assert!(classify(&reparsed).attachments().is_empty());
    }

    #[test]
    fn test_touched_container_drops_content_length() {
        let raw = MIXED.replacen("Subject: Report\r\n", "Subject: Report\r\nContent-Length: 999\r\n", 1);
        let root = parse_message(raw.as_bytes()).unwrap();
        assert_eq!(root.headers.get("content-length"), Some("999"));

        let rebuilt = rebuild(&root, &classify(&root), PlaceholderPolicy::Omit).unwrap();
        let reparsed = parse_message(&rebuilt.bytes).unwrap();
        assert_eq!(reparsed.headers.get("content-length"), None);
        assert_eq!(reparsed.headers.get("subject"), Some("Report"));
    }

    #[test]
    fn test_rfc2231_boundary_is_replaced() {
        let raw = MIXED.replacen("boundary=\"orig\"", "boundary*=us-ascii''orig", 1);
        let root = parse_message(raw.as_bytes()).unwrap();
        assert_eq!(root.boundary.as_deref(), Some("orig"));

        let rebuilt = fixed().rebuild(&root, &classify(&root)).unwrap();
        let content_type = top_level_content_type(&rebuilt.bytes);
        assert!(!content_type.contains("boundary*"), "{content_type}");

        let reparsed = parse_message(&rebuilt.bytes).unwrap();
        assert_eq!(reparsed.children.len(), 2);
        assert_ne!(reparsed.boundary.as_deref(), Some("orig"));
        assert_eq!(reparsed.children[0].body, b"Hello");
    }

    fn top_level_content_type(bytes: &[u8]) -> String {
        crate::parser::mime::top_level_headers(bytes)
            .get("content-type")
            .unwrap()
            .to_string()
    }

    #[test]
    fn test_root_attachment_with_omit_is_unrebuildable() {
        let raw = "Subject: pdf\r\nContent-Type: application/pdf\r\n\
Content-Disposition: attachment; filename=x.pdf\r\n\r\n%PDF";
        let root = parse_message(raw.as_bytes()).unwrap();
        let err = rebuild(&root, &classify(&root), PlaceholderPolicy::Omit).unwrap_err();
        assert!(matches!(err, StripError::UnrebuildableMessage(_)));
    }

    #[test]
    fn test_root_attachment_with_stub_keeps_top_level_headers() {
        let raw = "Subject: pdf\r\nMessage-ID: <x@y>\r\nContent-Type: application/pdf\r\n\
Content-Disposition: attachment; filename=x.pdf\r\n\r\n%PDF";
        let root = parse_message(raw.as_bytes()).unwrap();
        let rebuilt = rebuild(&root, &classify(&root), PlaceholderPolicy::TextStub).unwrap();
        let reparsed = parse_message(&rebuilt.bytes).unwrap();
        assert_eq!(reparsed.content_type, "text/plain");
        assert_eq!(reparsed.headers.get("message-id"), Some("<x@y>"));
        assert_eq!(reparsed.headers.get_all("content-disposition").count(), 1);
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("omit".parse::<PlaceholderPolicy>(), Ok(PlaceholderPolicy::Omit));
        assert_eq!("STUB".parse::<PlaceholderPolicy>(), Ok(PlaceholderPolicy::TextStub));
        assert!("delete".parse::<PlaceholderPolicy>().is_err());
    }
}
