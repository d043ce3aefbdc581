//! The MIME part tree produced by the parser and consumed by the rebuilder.
//!
//! Parents own their children outright; the tree is finite and acyclic, so
//! every walk over it is a plain recursive descent.

use crate::error::Result;
use crate::parser::{header, transfer};

/// Line ending style detected on parse and reused when serializing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LineEnding {
    #[default]
    CrLf,
    Lf,
}

impl LineEnding {
    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            Self::CrLf => b"\r\n",
            Self::Lf => b"\n",
        }
    }
}

/// A single header field.
///
/// `value` is the unfolded logical value. When the header was read from a
/// message, the physical lines (with their original folding) are kept so an
/// unmodified header is written back byte for byte.
#[derive(Debug, Clone)]
pub struct Header {
    /// Field name with its original casing.
    pub name: String,
    /// Unfolded value with surrounding whitespace trimmed.
    pub value: String,
    raw_lines: Option<Vec<Vec<u8>>>,
}

impl Header {
    /// A new header with no original representation.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            raw_lines: None,
        }
    }

    pub(crate) fn with_raw(name: String, value: String, raw_lines: Vec<Vec<u8>>) -> Self {
        Self {
            name,
            value,
            raw_lines: Some(raw_lines),
        }
    }

    /// Physical lines as read from the message, without line endings.
    pub fn raw_lines(&self) -> Option<&[Vec<u8>]> {
        self.raw_lines.as_deref()
    }

    /// Case-insensitive name comparison.
    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

impl PartialEq for Header {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.value == other.value
    }
}

impl Eq for Header {}

/// Ordered header bag. Duplicates, casing and order are preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    entries: Vec<Header>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, header: Header) {
        self.entries.push(header);
    }

    /// Append a header without a raw representation.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push(Header::new(name, value));
    }

    /// First value for `name` (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|h| h.is(name))
            .map(|h| h.value.as_str())
    }

    /// Every header named `name`, in order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Header> + 'a {
        self.entries.iter().filter(move |h| h.is(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|h| h.is(name))
    }

    /// Index of the first header named `name`.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|h| h.is(name))
    }

    /// Replace the first `name` header in place and drop any duplicates.
    /// Appends when the header is absent.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.position(name) {
            Some(idx) => {
                let existing_name = self.entries[idx].name.clone();
                self.entries[idx] = Header::new(existing_name, value);
                let mut seen = 0usize;
                self.entries.retain(|h| {
                    if h.is(name) {
                        seen += 1;
                        seen == 1
                    } else {
                        true
                    }
                });
            }
            None => self.append(name, value),
        }
    }

    /// Insert a header at `index`, clamped to the end of the map.
    pub fn insert(&mut self, index: usize, header: Header) {
        let index = index.min(self.entries.len());
        self.entries.insert(index, header);
    }

    /// Remove every header named `name`. Returns how many were removed.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|h| !h.is(name));
        before - self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Value of the `Content-Disposition` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Disposition {
    Inline,
    Attachment,
    Unspecified,
}

impl Disposition {
    /// Interpret a raw `Content-Disposition` value. Unknown types count as
    /// attachments (RFC 2183 §2.8).
    pub fn from_header(value: Option<&str>) -> Self {
        let Some(value) = value else {
            return Self::Unspecified;
        };
        let kind = header::parse_structured(value).value;
        match kind.as_str() {
            "inline" => Self::Inline,
            "" => Self::Unspecified,
            _ => Self::Attachment,
        }
    }
}

/// `Content-Transfer-Encoding` of a leaf body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TransferEncoding {
    SevenBit,
    EightBit,
    Binary,
    Base64,
    QuotedPrintable,
}

impl TransferEncoding {
    /// Interpret a raw header value; absent or unknown means `7bit`.
    pub fn from_header(value: Option<&str>) -> Self {
        let Some(value) = value else {
            return Self::SevenBit;
        };
        match value.trim().to_ascii_lowercase().as_str() {
            "7bit" | "" => Self::SevenBit,
            "8bit" => Self::EightBit,
            "binary" => Self::Binary,
            "base64" => Self::Base64,
            "quoted-printable" => Self::QuotedPrintable,
            other => {
                tracing::warn!(encoding = other, "Unknown transfer encoding, treating as 7bit");
                Self::SevenBit
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SevenBit => "7bit",
            Self::EightBit => "8bit",
            Self::Binary => "binary",
            Self::Base64 => "base64",
            Self::QuotedPrintable => "quoted-printable",
        }
    }
}

/// One node of a parsed message.
///
/// A node is either a leaf (`children` empty, payload in `body`) or a
/// multipart container (`children` non-empty or `boundary` set, `body` empty).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MimePart {
    /// Lower-case `type/subtype`. Defaults to `text/plain`.
    pub content_type: String,
    pub disposition: Disposition,
    pub headers: HeaderMap,
    pub encoding: TransferEncoding,
    /// Raw payload, still in `encoding`.
    pub body: Vec<u8>,
    pub children: Vec<MimePart>,
    /// Delimiter token; only set on multipart containers.
    pub boundary: Option<String>,
    /// Text before the first delimiter. `None` when the body opens with it.
    pub preamble: Option<Vec<u8>>,
    /// Text after the closing delimiter line.
    pub epilogue: Vec<u8>,
    pub line_ending: LineEnding,
}

impl MimePart {
    /// A fresh leaf with the given headers and payload.
    pub fn leaf(headers: HeaderMap, body: Vec<u8>, line_ending: LineEnding) -> Self {
        let content_type = headers
            .get("content-type")
            .map(content_type_of)
            .unwrap_or_else(|| "text/plain".to_string());
        Self {
            content_type,
            disposition: Disposition::from_header(headers.get("content-disposition")),
            encoding: TransferEncoding::from_header(headers.get("content-transfer-encoding")),
            headers,
            body,
            children: Vec::new(),
            boundary: None,
            preamble: None,
            epilogue: Vec::new(),
            line_ending,
        }
    }

    pub fn is_multipart(&self) -> bool {
        self.boundary.is_some()
    }

    pub fn is_leaf(&self) -> bool {
        !self.is_multipart()
    }

    /// `text/plain` or `text/html`: the parts that carry the readable body.
    pub fn is_body_text(&self) -> bool {
        matches!(self.content_type.as_str(), "text/plain" | "text/html")
    }

    /// Parsed `Content-Type` parameters.
    pub fn content_type_params(&self) -> header::StructuredValue {
        self.headers
            .get("content-type")
            .map(header::parse_structured)
            .unwrap_or_default()
    }

    /// Parsed `Content-Disposition` parameters.
    pub fn disposition_params(&self) -> header::StructuredValue {
        self.headers
            .get("content-disposition")
            .map(header::parse_structured)
            .unwrap_or_default()
    }

    /// File name from `Content-Disposition: filename` or, failing that,
    /// `Content-Type: name`. Encoded-words are decoded.
    pub fn filename(&self) -> Option<String> {
        let disposition = self.disposition_params();
        let content_type = self.content_type_params();
        disposition
            .param("filename")
            .or_else(|| content_type.param("name"))
            .map(|name| header::decode_encoded_words(name).trim().to_string())
            .filter(|name| !name.is_empty())
    }

    /// Decode the body according to its transfer encoding.
    pub fn decoded_body(&self) -> Result<Vec<u8>> {
        transfer::decode(self.encoding, &self.body)
    }

    /// Size of the decoded payload in bytes.
    ///
    /// Corrupt payloads fall back to an estimate from the encoded length
    /// rather than failing the whole message.
    pub fn decoded_size(&self) -> u64 {
        match self.decoded_body() {
            Ok(bytes) => bytes.len() as u64,
            Err(e) => {
                tracing::warn!(error = %e, "Could not decode body, estimating size");
                transfer::estimate_decoded_len(self.encoding, &self.body)
            }
        }
    }

    /// All leaves in depth-first order.
    pub fn leaves(&self) -> Vec<&MimePart> {
        let mut out = Vec::new();
        collect_leaves(self, &mut out);
        out
    }

    pub fn leaf_count(&self) -> usize {
        if self.is_leaf() {
            1
        } else {
            self.children.iter().map(MimePart::leaf_count).sum()
        }
    }
}

fn collect_leaves<'a>(part: &'a MimePart, out: &mut Vec<&'a MimePart>) {
    if part.is_leaf() {
        out.push(part);
    } else {
        for child in &part.children {
            collect_leaves(child, out);
        }
    }
}

/// Lower-case media type from a `Content-Type` value, `text/plain` when
/// the value is not a valid `type/subtype`.
pub fn content_type_of(value: &str) -> String {
    let main = header::parse_structured(value).value;
    if main.contains('/') {
        main
    } else {
        "text/plain".to_string()
    }
}
