//! Attachment detection rules.
//!
//! Each rule is an independent predicate over one leaf. The classifier
//! evaluates them in a fixed order and the first match decides.

use crate::model::part::{Disposition, MimePart};

/// Why a leaf was classified as an attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RemovalReason {
    /// `Content-Disposition: attachment`.
    ExplicitDisposition,
    /// Named non-body part without an attachment disposition.
    InferredFilename,
    /// Non-body part whose decoded size exceeds the threshold.
    SizeThreshold,
    /// Not an attachment.
    None,
}

impl RemovalReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ExplicitDisposition => "explicit-disposition",
            Self::InferredFilename => "inferred-filename",
            Self::SizeThreshold => "size-threshold",
            Self::None => "none",
        }
    }
}

/// The facts a rule looks at, computed once per leaf.
#[derive(Debug, Clone)]
pub struct LeafFacts<'a> {
    pub part: &'a MimePart,
    pub filename: Option<String>,
    pub decoded_size: u64,
}

impl<'a> LeafFacts<'a> {
    pub fn of(part: &'a MimePart) -> Self {
        Self {
            part,
            filename: part.filename(),
            decoded_size: part.decoded_size(),
        }
    }
}

/// One attachment heuristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    ExplicitDisposition,
    InferredFilename,
    /// `None` matches any size.
    SizeThreshold(Option<u64>),
}

impl Rule {
    /// The default rule set in precedence order.
    pub fn defaults(min_size: Option<u64>) -> Vec<Rule> {
        vec![
            Rule::ExplicitDisposition,
            Rule::InferredFilename,
            Rule::SizeThreshold(min_size),
        ]
    }

    pub fn reason(self) -> RemovalReason {
        match self {
            Rule::ExplicitDisposition => RemovalReason::ExplicitDisposition,
            Rule::InferredFilename => RemovalReason::InferredFilename,
            Rule::SizeThreshold(_) => RemovalReason::SizeThreshold,
        }
    }

    pub fn matches(self, facts: &LeafFacts<'_>) -> bool {
        let part = facts.part;
        match self {
            Rule::ExplicitDisposition => part.disposition == Disposition::Attachment,
            Rule::InferredFilename => {
                part.disposition != Disposition::Attachment
                    && facts.filename.is_some()
                    && !part.is_body_text()
            }
            Rule::SizeThreshold(threshold) => {
                !part.is_body_text()
                    && threshold.map_or(true, |limit| facts.decoded_size > limit)
            }
        }
    }
}
