//! Carry the original message's identity over to its rebuilt replacement.
//!
//! The rebuilt bytes normally keep every top-level header already; this step
//! verifies the ones threading and search depend on, restores any that went
//! missing or changed, and copies the out-of-band metadata (labels, internal
//! date) the upload needs.

use tracing::{debug, warn};

use crate::error::{Result, StripError};
use crate::model::message::{RawMessage, RebuiltMessage};
use crate::model::part::{Header, HeaderMap};
use crate::parser::header::{parse_date, parse_header_block};
use crate::parser::mime::{detect_line_ending, split_header_block, top_level_headers};
use crate::rebuild::serialize::write_header;

/// Top-level headers that must survive a rebuild unchanged.
pub const PRESERVED_HEADERS: &[&str] = &[
    "Message-ID",
    "Date",
    "Subject",
    "From",
    "To",
    "References",
    "In-Reply-To",
];

/// Copy labels and internal date from `original` and restore any preserved
/// header the rebuild lost or altered.
///
/// When the mailbox did not report an internal date, the original `Date`
/// header is used instead.
pub fn apply_original_metadata(
    mut rebuilt: RebuiltMessage,
    original: &RawMessage,
) -> Result<RebuiltMessage> {
    let original_headers = top_level_headers(&original.bytes);

    rebuilt.labels = original.labels.clone();
    rebuilt.internal_date = original
        .internal_date
        .or_else(|| original_headers.get("date").and_then(parse_date));

    let (header_bytes, body) = split_header_block(&rebuilt.bytes);
    let mut headers = parse_header_block(header_bytes);
    if headers.is_empty() {
        return Err(StripError::MalformedMessage(
            "rebuilt message has no header block".into(),
        ));
    }

    let mut restored = Vec::new();
    for &name in PRESERVED_HEADERS {
        let wanted: Vec<&Header> = original_headers.get_all(name).collect();
        let present: Vec<&Header> = headers.get_all(name).collect();
        let same = wanted.len() == present.len()
            && wanted.iter().zip(&present).all(|(a, b)| a.value == b.value);
        if same {
            continue;
        }
        warn!(header = name, id = %original.id, "Restoring header altered by rebuild");
        restore(&mut headers, name, &wanted);
        restored.push(name.to_string());
    }

    if !restored.is_empty() {
        let eol = detect_line_ending(&rebuilt.bytes).as_bytes();
        let mut bytes = Vec::with_capacity(rebuilt.bytes.len() + 256);
        for header in headers.iter() {
            write_header(header, eol, &mut bytes);
        }
        bytes.extend_from_slice(eol);
        bytes.extend_from_slice(body);
        rebuilt.bytes = bytes;
    }

    debug!(
        id = %original.id,
        labels = rebuilt.labels.len(),
        restored = restored.len(),
        "Applied original metadata"
    );
    rebuilt.restored = restored;
    Ok(rebuilt)
}

/// Replace every `name` header with `originals`, at the position of the
/// first existing one (or at the end).
fn restore(headers: &mut HeaderMap, name: &str, originals: &[&Header]) {
    let at = headers.position(name).unwrap_or(headers.len());
    headers.remove(name);
    for (offset, header) in originals.iter().enumerate() {
        headers.insert(at + offset, (*header).clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::message::ChangeSummary;
    use crate::parser::mime::parse_message;
    use chrono::{TimeZone, Utc};

    const ORIGINAL: &str = "Message-ID: <abc@example.com>\r\n\
Date: Tue, 1 Jul 2025 10:00:00 +0000\r\n\
Subject: Quarterly\r\n\
 report\r\n\
From: alice@example.com\r\n\
To: bob@example.com\r\n\
Content-Type: text/plain\r\n\
\r\n\
body\r\n";

    fn original() -> RawMessage {
        let mut raw = RawMessage::new("m1", ORIGINAL.as_bytes().to_vec());
        raw.labels = vec!["INBOX".into(), "Work".into()];
        raw
    }

    #[test]
    fn test_intact_headers_leave_bytes_alone() {
        let rebuilt = RebuiltMessage::new(ORIGINAL.as_bytes().to_vec(), ChangeSummary::default());
        let out = apply_original_metadata(rebuilt, &original()).unwrap();
        assert_eq!(out.bytes, ORIGINAL.as_bytes());
        assert!(out.restored.is_empty());
        assert_eq!(out.labels, vec!["INBOX", "Work"]);
    }

    #[test]
    fn test_internal_date_falls_back_to_date_header() {
        let rebuilt = RebuiltMessage::new(ORIGINAL.as_bytes().to_vec(), ChangeSummary::default());
        let out = apply_original_metadata(rebuilt, &original()).unwrap();
        assert_eq!(
            out.internal_date,
            Some(Utc.with_ymd_and_hms(2025, 7, 1, 10, 0, 0).unwrap())
        );

        let mut with_date = original();
        let reported = Utc.with_ymd_and_hms(2025, 7, 2, 8, 30, 0).unwrap();
        with_date.internal_date = Some(reported);
        let rebuilt = RebuiltMessage::new(ORIGINAL.as_bytes().to_vec(), ChangeSummary::default());
        let out = apply_original_metadata(rebuilt, &with_date).unwrap();
        assert_eq!(out.internal_date, Some(reported));
    }

    #[test]
    fn test_missing_and_altered_headers_are_restored() {
        let damaged = "Message-ID: <other@example.com>\r\n\
Date: Tue, 1 Jul 2025 10:00:00 +0000\r\n\
From: alice@example.com\r\n\
To: bob@example.com\r\n\
Content-Type: text/plain\r\n\
\r\n\
body\r\n";
        let rebuilt = RebuiltMessage::new(damaged.as_bytes().to_vec(), ChangeSummary::default());
        let out = apply_original_metadata(rebuilt, &original()).unwrap();
        assert_eq!(out.restored, vec!["Message-ID", "Subject"]);

        let reparsed = parse_message(&out.bytes).unwrap();
        assert_eq!(reparsed.headers.get("message-id"), Some("<abc@example.com>"));
        assert_eq!(reparsed.headers.get("subject"), Some("Quarterly report"));
        assert_eq!(reparsed.body, b"body\r\n");
        // Restored headers keep their original folding.
        assert!(String::from_utf8_lossy(&out.bytes).contains("Subject: Quarterly\r\n report\r\n"));
    }
}
