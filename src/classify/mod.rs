//! Part classification: label every leaf of a [`MimePart`] tree as content or
//! attachment.
//!
//! The classifier holds only its rule list, so one instance can be shared
//! across any number of messages (and threads) without one message's result
//! influencing another's.

pub mod rules;

use tracing::debug;

use crate::model::part::MimePart;

pub use rules::{LeafFacts, RemovalReason, Rule};

/// A [`MimePart`] annotated with its classification. Borrows the part; the
/// original tree is never modified.
#[derive(Debug, Clone)]
pub struct ClassifiedPart<'a> {
    pub part: &'a MimePart,
    /// IMAP-style section number: `1`, `2`, `2.1`, …
    pub part_id: String,
    pub is_attachment: bool,
    pub reason: RemovalReason,
    /// Decoded payload size (0 for containers).
    pub decoded_size: u64,
    pub filename: Option<String>,
    pub children: Vec<ClassifiedPart<'a>>,
    /// Containers only: some leaf below is an attachment.
    pub has_attachment_descendant: bool,
}

impl<'a> ClassifiedPart<'a> {
    /// All classified leaves in depth-first order.
    pub fn leaves(&self) -> Vec<&ClassifiedPart<'a>> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'s>(&'s self, out: &mut Vec<&'s ClassifiedPart<'a>>) {
        if self.part.is_leaf() {
            out.push(self);
        } else {
            for child in &self.children {
                child.collect_leaves(out);
            }
        }
    }

    /// Attachment leaves in depth-first order.
    pub fn attachments(&self) -> Vec<&ClassifiedPart<'a>> {
        self.leaves()
            .into_iter()
            .filter(|leaf| leaf.is_attachment)
            .collect()
    }
}

/// Ordered set of attachment rules.
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Vec<Rule>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Classifier {
    /// The standard rule set. `min_size` is the size-threshold rule's limit;
    /// `None` means any non-body part qualifies regardless of size.
    pub fn new(min_size: Option<u64>) -> Self {
        Self {
            rules: Rule::defaults(min_size),
        }
    }

    /// Classify a whole tree.
    pub fn classify<'a>(&self, root: &'a MimePart) -> ClassifiedPart<'a> {
        self.classify_node(root, if root.is_leaf() { "1".into() } else { String::new() })
    }

    fn classify_node<'a>(&self, part: &'a MimePart, part_id: String) -> ClassifiedPart<'a> {
        if part.is_multipart() {
            let children: Vec<ClassifiedPart<'a>> = part
                .children
                .iter()
                .enumerate()
                .map(|(i, child)| {
                    let id = if part_id.is_empty() {
                        format!("{}", i + 1)
                    } else {
                        format!("{part_id}.{}", i + 1)
                    };
                    self.classify_node(child, id)
                })
                .collect();
            let has_attachment_descendant = children
                .iter()
                .any(|c| c.is_attachment || c.has_attachment_descendant);
            return ClassifiedPart {
                part,
                part_id,
                is_attachment: false,
                reason: RemovalReason::None,
                decoded_size: 0,
                filename: None,
                children,
                has_attachment_descendant,
            };
        }

        let facts = LeafFacts::of(part);
        let reason = self
            .rules
            .iter()
            .find(|rule| rule.matches(&facts))
            .map_or(RemovalReason::None, |rule| rule.reason());

        debug!(
            part_id = %part_id,
            content_type = %part.content_type,
            size = facts.decoded_size,
            reason = reason.as_str(),
            "Classified leaf"
        );

        ClassifiedPart {
            part,
            part_id,
            is_attachment: reason != RemovalReason::None,
            reason,
            decoded_size: facts.decoded_size,
            filename: facts.filename,
            children: Vec::new(),
            has_attachment_descendant: false,
        }
    }
}

/// Classify with the default rule set.
pub fn classify(root: &MimePart) -> ClassifiedPart<'_> {
    Classifier::default().classify(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::mime::parse_message;

    const NESTED: &str = "Subject: nested\r\n\
Content-Type: multipart/mixed; boundary=outer\r\n\
\r\n\
--outer\r\n\
Content-Type: multipart/alternative; boundary=inner\r\n\
\r\n\
--inner\r\n\
Content-Type: text/plain\r\n\
\r\n\
plain\r\n\
--inner\r\n\
Content-Type: text/html\r\n\
\r\n\
<p>html</p>\r\n\
--inner--\r\n\
--outer\r\n\
Content-Type: image/png; name=\"logo.png\"\r\n\
Content-Disposition: inline\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
iVBORw0KGgo=\r\n\
--outer\r\n\
Content-Type: application/zip\r\n\
Content-Disposition: attachment; filename=\"a.zip\"\r\n\
\r\n\
PK\r\n\
--outer--\r\n";

    #[test]
    fn test_classify_nested_tree() {
        let root = parse_message(NESTED.as_bytes()).unwrap();
        let classified = classify(&root);
        assert!(classified.has_attachment_descendant);
        assert!(!classified.is_attachment);

        let leaves = classified.leaves();
        let ids: Vec<&str> = leaves.iter().map(|l| l.part_id.as_str()).collect();
        assert_eq!(ids, vec!["1.1", "1.2", "2", "3"]);

        let reasons: Vec<RemovalReason> = leaves.iter().map(|l| l.reason).collect();
        assert_eq!(
            reasons,
            vec![
                RemovalReason::None,
                RemovalReason::None,
                RemovalReason::InferredFilename,
                RemovalReason::ExplicitDisposition,
            ]
        );
        assert_eq!(leaves[2].decoded_size, 8);
        assert_eq!(leaves[3].filename.as_deref(), Some("a.zip"));
        assert!(!classified.children[0].has_attachment_descendant);
    }

    #[test]
    fn test_single_leaf_message_is_part_one() {
        let root = parse_message(b"Subject: x\r\n\r\nhello").unwrap();
        let classified = classify(&root);
        assert_eq!(classified.part_id, "1");
        assert!(!classified.is_attachment);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let root = parse_message(NESTED.as_bytes()).unwrap();
        let classifier = Classifier::new(Some(1024));
        let a: Vec<RemovalReason> = classifier.classify(&root).leaves().iter().map(|l| l.reason).collect();
        let b: Vec<RemovalReason> = classifier.classify(&root).leaves().iter().map(|l| l.reason).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_threshold_spares_small_unnamed_parts() {
        let raw = "Subject: t\r\nContent-Type: multipart/mixed; boundary=b\r\n\r\n\
--b\r\nContent-Type: text/plain\r\n\r\nhi\r\n\
--b\r\nContent-Type: text/calendar\r\n\r\nBEGIN:VCALENDAR\r\n--b--\r\n";
        let root = parse_message(raw.as_bytes()).unwrap();
        assert_eq!(Classifier::new(Some(1024)).classify(&root).attachments().len(), 0);
        assert_eq!(Classifier::new(None).classify(&root).attachments().len(), 1);
    }
}
