//! Write a [`MimePart`] tree back to transport-ready bytes.

use crate::model::part::{Header, MimePart};

/// Soft limit for header lines we fold ourselves (RFC 5322 §2.1.1).
const FOLD_WIDTH: usize = 78;

/// Serialize a whole tree.
pub fn serialize(part: &MimePart) -> Vec<u8> {
    let mut out = Vec::with_capacity(estimated_size(part));
    write_part(part, &mut out);
    out
}

/// Append one part (headers, blank line, body or children) to `out`.
pub fn write_part(part: &MimePart, out: &mut Vec<u8>) {
    let eol = part.line_ending.as_bytes();

    for header in part.headers.iter() {
        write_header(header, eol, out);
    }
    out.extend_from_slice(eol);

    let Some(boundary) = part.boundary.as_deref() else {
        out.extend_from_slice(&part.body);
        return;
    };

    if let Some(preamble) = &part.preamble {
        out.extend_from_slice(preamble);
        out.extend_from_slice(eol);
    }
    for child in &part.children {
        out.extend_from_slice(b"--");
        out.extend_from_slice(boundary.as_bytes());
        out.extend_from_slice(eol);
        write_part(child, out);
        out.extend_from_slice(eol);
    }
    out.extend_from_slice(b"--");
    out.extend_from_slice(boundary.as_bytes());
    out.extend_from_slice(b"--");
    out.extend_from_slice(eol);
    out.extend_from_slice(&part.epilogue);
}

/// Write a header using its original lines when available, otherwise folded.
pub fn write_header(header: &Header, eol: &[u8], out: &mut Vec<u8>) {
    if let Some(lines) = header.raw_lines() {
        for line in lines {
            out.extend_from_slice(line);
            out.extend_from_slice(eol);
        }
        return;
    }
    let line = format!("{}: {}", header.name, header.value);
    fold_into(&line, eol, out);
    out.extend_from_slice(eol);
}

/// Fold at spaces so physical lines stay near [`FOLD_WIDTH`]. Unfolding
/// (removing the inserted line breaks) restores `line` exactly.
fn fold_into(line: &str, eol: &[u8], out: &mut Vec<u8>) {
    let mut width = 0usize;
    for (i, word) in line.split(' ').enumerate() {
        if i > 0 {
            if width + 1 + word.len() > FOLD_WIDTH && width > 0 && !word.is_empty() {
                out.extend_from_slice(eol);
                width = 0;
            }
            out.push(b' ');
            width += 1;
        }
        out.extend_from_slice(word.as_bytes());
        width += word.len();
    }
}

fn estimated_size(part: &MimePart) -> usize {
    let headers: usize = part
        .headers
        .iter()
        .map(|h| h.name.len() + h.value.len() + 4)
        .sum();
    let children: usize = part.children.iter().map(estimated_size).sum();
    headers + part.body.len() + children + 64
}
