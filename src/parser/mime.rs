//! MIME message parsing: raw bytes → [`MimePart`] tree.
//!
//! A hand-written recursive descent over the RFC 2046 multipart framing. Unlike
//! a general MIME library this keeps everything needed to write an untouched
//! part back out unchanged (raw header lines, preamble, epilogue, line ending).

use tracing::{debug, warn};

use crate::error::{Result, StripError};
use crate::model::part::{content_type_of, HeaderMap, LineEnding, MimePart};
use crate::parser::header::{self, parse_header_block};

/// Maximum multipart nesting depth (to refuse pathological or adversarial input).
pub const MAX_DEPTH: usize = 10;

/// Parse a complete raw message with the default nesting limit.
pub fn parse_message(raw: &[u8]) -> Result<MimePart> {
    parse_with_depth(raw, MAX_DEPTH)
}

/// Parse a complete raw message, failing when multiparts nest deeper than
/// `max_depth`.
pub fn parse_with_depth(raw: &[u8], max_depth: usize) -> Result<MimePart> {
    let data = skip_from_line(raw);
    if data.is_empty() {
        return Err(StripError::MalformedMessage("empty message".into()));
    }
    let line_ending = detect_line_ending(data);
    let (header_bytes, body) = split_header_block(data);
    let headers = parse_header_block(header_bytes);
    if headers.is_empty() {
        return Err(StripError::MalformedMessage(
            "message has no header block".into(),
        ));
    }
    build_part(headers, body, line_ending, 0, max_depth)
}

/// Parse one body part of a multipart: its own header block plus body.
fn parse_part(data: &[u8], line_ending: LineEnding, depth: usize, max_depth: usize) -> Result<MimePart> {
    let (header_bytes, body) = split_header_block(data);
    let headers = parse_header_block(header_bytes);
    if headers.is_empty() && body.is_empty() && !header_bytes.is_empty() {
        // No blank line and nothing header-like: the whole part is body text.
        return build_part(HeaderMap::new(), data, line_ending, depth, max_depth);
    }
    build_part(headers, body, line_ending, depth, max_depth)
}

fn build_part(
    headers: HeaderMap,
    body: &[u8],
    line_ending: LineEnding,
    depth: usize,
    max_depth: usize,
) -> Result<MimePart> {
    let content_type = headers
        .get("content-type")
        .map(content_type_of)
        .unwrap_or_else(|| "text/plain".to_string());

    if !content_type.starts_with("multipart/") {
        return Ok(MimePart::leaf(headers, body.to_vec(), line_ending));
    }

    if depth >= max_depth {
        return Err(StripError::MalformedMessage(format!(
            "multipart nesting deeper than {max_depth} levels"
        )));
    }

    let params = headers
        .get("content-type")
        .map(header::parse_structured)
        .unwrap_or_default();
    let boundary = params
        .param("boundary")
        .filter(|b| !b.is_empty())
        .ok_or_else(|| {
            StripError::MalformedMessage(format!("{content_type} part has no boundary parameter"))
        })?
        .to_string();

    let sections = split_multipart(body, &boundary)?;
    debug!(
        content_type = %content_type,
        parts = sections.parts.len(),
        depth,
        "Parsed multipart container"
    );

    let children = sections
        .parts
        .iter()
        .map(|bytes| parse_part(bytes, line_ending, depth + 1, max_depth))
        .collect::<Result<Vec<_>>>()?;

    let mut part = MimePart::leaf(headers, Vec::new(), line_ending);
    part.children = children;
    part.boundary = Some(boundary);
    part.preamble = sections.preamble.map(<[u8]>::to_vec);
    part.epilogue = sections.epilogue.to_vec();
    Ok(part)
}

/// The pieces of a multipart body.
struct Sections<'a> {
    preamble: Option<&'a [u8]>,
    parts: Vec<&'a [u8]>,
    epilogue: &'a [u8],
}

/// Split a multipart body at its delimiter lines.
///
/// The line break that precedes a delimiter belongs to the delimiter
/// (RFC 2046 §5.1.1), so it is not part of the preceding body part.
fn split_multipart<'a>(body: &'a [u8], boundary: &str) -> Result<Sections<'a>> {
    let delimiter = format!("--{boundary}");
    let close = format!("--{boundary}--");

    let mut first: Option<usize> = None;
    let mut part_start: Option<usize> = None;
    let mut parts = Vec::new();
    let mut epilogue: Option<&[u8]> = None;

    for line in Lines::new(body) {
        let content = trim_trailing_ws(&body[line.start..line.end]);
        let is_close = content == close.as_bytes();
        if !is_close && content != delimiter.as_bytes() {
            continue;
        }
        if first.is_none() {
            first = Some(line.start);
        }
        if let Some(start) = part_start {
            parts.push(&body[start..strip_eol_before(body, line.start, start)]);
        }
        if is_close {
            epilogue = Some(&body[line.next..]);
            part_start = None;
            break;
        }
        part_start = Some(line.next);
    }

    let Some(first) = first else {
        return Err(StripError::MalformedMessage(format!(
            "boundary {boundary:?} never found in body"
        )));
    };

    if epilogue.is_none() {
        warn!(boundary, "Missing closing multipart delimiter, using rest of body");
        if let Some(start) = part_start {
            parts.push(&body[start..]);
        }
    }

    let preamble = (first > 0).then(|| &body[..strip_eol_before(body, first, 0)]);

    Ok(Sections {
        preamble,
        parts,
        epilogue: epilogue.unwrap_or_default(),
    })
}

/// A physical line: `start..end` is the content, `next` the start of the
/// following line (after the line break).
struct Line {
    start: usize,
    end: usize,
    next: usize,
}

struct Lines<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Lines<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }
}

impl Iterator for Lines<'_> {
    type Item = Line;

    fn next(&mut self) -> Option<Line> {
        if self.pos >= self.data.len() {
            return None;
        }
        let start = self.pos;
        let (end, next) = match self.data[start..].iter().position(|&b| b == b'\n') {
            Some(offset) => {
                let nl = start + offset;
                let end = if nl > start && self.data[nl - 1] == b'\r' {
                    nl - 1
                } else {
                    nl
                };
                (end, nl + 1)
            }
            None => (self.data.len(), self.data.len()),
        };
        self.pos = next;
        Some(Line { start, end, next })
    }
}

/// Position of the line break ending just before `pos`, never below `floor`.
fn strip_eol_before(data: &[u8], pos: usize, floor: usize) -> usize {
    if pos >= floor + 2 && &data[pos - 2..pos] == b"\r\n" {
        pos - 2
    } else if pos > floor && data[pos - 1] == b'\n' {
        pos - 1
    } else {
        pos
    }
}

fn trim_trailing_ws(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|&b| b != b' ' && b != b'\t')
        .map_or(0, |p| p + 1);
    &bytes[..end]
}

/// Parse only the top-level header block of a raw message.
pub fn top_level_headers(raw: &[u8]) -> HeaderMap {
    let (header_bytes, _) = split_header_block(skip_from_line(raw));
    parse_header_block(header_bytes)
}

/// Split a part into its header block (including the final header line's
/// break) and body (after the blank line).
///
/// A part that starts with a blank line has no headers. A part with no blank
/// line at all is all headers.
pub fn split_header_block(data: &[u8]) -> (&[u8], &[u8]) {
    if let Some(rest) = data.strip_prefix(b"\r\n") {
        return (&[], rest);
    }
    if let Some(rest) = data.strip_prefix(b"\n") {
        return (&[], rest);
    }
    for i in 0..data.len() {
        if data[i] != b'\n' {
            continue;
        }
        let after = &data[i + 1..];
        if after.starts_with(b"\r\n") {
            return (&data[..=i], &data[i + 3..]);
        }
        if after.starts_with(b"\n") {
            return (&data[..=i], &data[i + 2..]);
        }
    }
    (data, &[])
}

/// `\r\n` unless the first line ends with a bare `\n`.
pub(crate) fn detect_line_ending(data: &[u8]) -> LineEnding {
    match data.iter().position(|&b| b == b'\n') {
        Some(pos) if pos > 0 && data[pos - 1] == b'\r' => LineEnding::CrLf,
        Some(_) => LineEnding::Lf,
        None => LineEnding::CrLf,
    }
}

/// Skip a UTF-8 BOM and an mbox `From ` separator line, which show up in
/// messages exported from local archives.
fn skip_from_line(data: &[u8]) -> &[u8] {
    let data = data.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(data);
    if data.starts_with(b"From ") {
        if let Some(pos) = data.iter().position(|&b| b == b'\n') {
            return &data[pos + 1..];
        }
    }
    data
}
