//! RFC 5322 header handling: block parsing and unfolding, structured values
//! with RFC 2231 parameters, RFC 2047 encoded-words, and date parsing.

use base64::Engine;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use tracing::{debug, warn};

use crate::model::part::{Header, HeaderMap};

/// Parse a header block (everything before the blank line) into a
/// [`HeaderMap`].
///
/// Continuation lines are unfolded by removing the line break only, so the
/// leading whitespace of the continuation stays in the value. The physical
/// lines are kept on each [`Header`] for byte-exact re-emission.
pub fn parse_header_block(bytes: &[u8]) -> HeaderMap {
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
    let mut headers = HeaderMap::new();
    let mut current: Option<(String, Vec<u8>, Vec<Vec<u8>>)> = None;

    for line in bytes.split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            continue;
        }
        if line[0] == b' ' || line[0] == b'\t' {
            if let Some((_, value, raw)) = current.as_mut() {
                value.extend_from_slice(line);
                raw.push(line.to_vec());
            } else {
                debug!("Continuation line without a header, skipped");
            }
            continue;
        }
        match split_field(line) {
            Some((name, value)) => {
                if let Some(done) = current.take() {
                    headers.push(finish_header(done));
                }
                current = Some((name, value.to_vec(), vec![line.to_vec()]));
            }
            None => debug!("Line is not a header field, skipped"),
        }
    }
    if let Some(done) = current.take() {
        headers.push(finish_header(done));
    }
    headers
}

/// Split `Name: value` into its name and raw value bytes.
fn split_field(line: &[u8]) -> Option<(String, &[u8])> {
    let colon = line.iter().position(|&b| b == b':')?;
    let name = &line[..colon];
    let name = trim_ascii_end(name);
    if name.is_empty() || !name.iter().all(|&b| b.is_ascii_graphic()) {
        return None;
    }
    Some((String::from_utf8_lossy(name).into_owned(), &line[colon + 1..]))
}

fn finish_header((name, value, raw): (String, Vec<u8>, Vec<Vec<u8>>)) -> Header {
    let value = decode_header_bytes(&value).trim().to_string();
    Header::with_raw(name, value, raw)
}

fn trim_ascii_end(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(0, |p| p + 1);
    &bytes[..end]
}

/// Decode raw header bytes to a string.
///
/// Tries UTF-8 first, then falls back to Windows-1252 (which accepts every byte).
pub fn decode_header_bytes(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            decoded.into_owned()
        }
    }
}

/// A structured header value such as `Content-Type` or
/// `Content-Disposition`: a main token plus `name=value` parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StructuredValue {
    /// Main token, lower-cased (`text/plain`, `attachment`, …).
    pub value: String,
    /// Parameters with lower-cased names and unquoted, RFC 2231-decoded values.
    pub params: Vec<(String, String)>,
}

impl StructuredValue {
    /// Parameter value by name (case-insensitive).
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Parse a structured header value.
///
/// Handles quoted strings with backslash escapes, RFC 2231 extended values
/// (`filename*=utf-8''na%C3%AFve.txt`) and continuations (`name*0`, `name*1*`).
pub fn parse_structured(raw: &str) -> StructuredValue {
    let segments = split_params(raw);
    let mut iter = segments.into_iter();
    let value = iter
        .next()
        .map(|(start, end)| raw[start..end].trim().to_ascii_lowercase())
        .unwrap_or_default();

    let mut plain: Vec<(String, String)> = Vec::new();
    // name -> (section index, is percent-encoded, raw text)
    let mut extended: Vec<(String, Vec<(u32, bool, String)>)> = Vec::new();

    for (start, end) in iter {
        let segment = raw[start..end].trim();
        let Some(eq) = segment.find('=') else {
            continue;
        };
        let key = segment[..eq].trim().to_ascii_lowercase();
        let val = unquote(segment[eq + 1..].trim());
        if key.is_empty() {
            continue;
        }

        match key.split_once('*') {
            None => plain.push((key, val)),
            Some((base, rest)) => {
                let (section, encoded) = match rest {
                    "" => (0, true),
                    _ => {
                        let encoded = rest.ends_with('*');
                        let digits = rest.trim_end_matches('*');
                        match digits.parse::<u32>() {
                            Ok(n) => (n, encoded),
                            Err(_) => continue,
                        }
                    }
                };
                let base = base.to_string();
                match extended.iter_mut().find(|(name, _)| *name == base) {
                    Some((_, sections)) => sections.push((section, encoded, val)),
                    None => extended.push((base, vec![(section, encoded, val)])),
                }
            }
        }
    }

    for (name, mut sections) in extended {
        sections.sort_by_key(|(n, _, _)| *n);
        let value = join_rfc2231_sections(&sections);
        match plain.iter_mut().find(|(k, _)| *k == name) {
            Some(existing) => existing.1 = value,
            None => plain.push((name, value)),
        }
    }

    StructuredValue {
        value,
        params: plain,
    }
}

/// Byte ranges of `;`-separated segments, ignoring separators inside quotes.
fn split_params(raw: &str) -> Vec<(usize, usize)> {
    let mut segments = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut escaped = false;

    for (i, ch) in raw.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            ';' if !in_quotes => {
                segments.push((start, i));
                start = i + 1;
            }
            _ => {}
        }
    }
    segments.push((start, raw.len()));
    segments
}

/// Strip surrounding double quotes and resolve backslash escapes.
fn unquote(s: &str) -> String {
    let Some(inner) = s.strip_prefix('"') else {
        return s.to_string();
    };
    let inner = inner.strip_suffix('"').unwrap_or(inner);
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(ch);
        }
    }
    out
}

fn join_rfc2231_sections(sections: &[(u32, bool, String)]) -> String {
    let mut charset: Option<String> = None;
    let mut bytes = Vec::new();
    for (i, (_, encoded, text)) in sections.iter().enumerate() {
        if !*encoded {
            bytes.extend_from_slice(text.as_bytes());
            continue;
        }
        let mut text = text.as_str();
        if i == 0 {
            // charset'language'value
            let mut pieces = text.splitn(3, '\'');
            if let (Some(cs), Some(_lang), Some(rest)) = (pieces.next(), pieces.next(), pieces.next())
            {
                if !cs.is_empty() {
                    charset = Some(cs.to_string());
                }
                text = rest;
            }
        }
        bytes.extend(percent_decode(text));
    }
    match charset {
        Some(cs) => decode_charset(&cs, &bytes),
        None => String::from_utf8_lossy(&bytes).into_owned(),
    }
}

fn percent_decode(input: &str) -> Vec<u8> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Some(byte) = hex_byte(bytes[i + 1], bytes[i + 2]) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}

pub(crate) fn hex_byte(hi: u8, lo: u8) -> Option<u8> {
    let hi = (hi as char).to_digit(16)?;
    let lo = (lo as char).to_digit(16)?;
    Some((hi * 16 + lo) as u8)
}

/// Replace the value of parameter `name` inside a structured header value,
/// leaving the main token and every other parameter untouched. The new
/// value is always quoted. Appends the parameter when absent.
///
/// RFC 2231 forms of the parameter (`name*`, `name*0`, `name*1*`, ...) are
/// dropped so that the plain value written here is the only one left.
pub fn replace_param(raw: &str, name: &str, new_value: &str) -> String {
    let replacement = format!("{name}=\"{}\"", escape_quoted(new_value));
    let segments = split_params(raw);
    let mut out = String::with_capacity(raw.len() + new_value.len());
    let mut replaced = false;

    for (idx, &(start, end)) in segments.iter().enumerate() {
        let segment = &raw[start..end];
        let key = segment
            .split('=')
            .next()
            .map(|k| k.trim())
            .unwrap_or_default();
        let is_target = idx > 0 && param_base(key).eq_ignore_ascii_case(name);
        if is_target && replaced {
            continue;
        }
        if idx > 0 {
            out.push(';');
        }
        if is_target {
            let lead = &segment[..segment.len() - segment.trim_start().len()];
            out.push_str(if lead.is_empty() { " " } else { lead });
            out.push_str(&replacement);
            replaced = true;
        } else {
            out.push_str(segment);
        }
    }

    if !replaced {
        let trimmed = out.trim_end().trim_end_matches(';').to_string();
        out = format!("{trimmed}; {replacement}");
    }
    out
}

/// Parameter name without its RFC 2231 section and encoding marks:
/// `boundary*0*` becomes `boundary`. Keys with a malformed suffix are
/// returned unchanged.
fn param_base(key: &str) -> &str {
    match key.split_once('*') {
        Some((base, rest)) if rest.trim_end_matches('*').chars().all(|c| c.is_ascii_digit()) => base,
        _ => key,
    }
}

fn escape_quoted(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Decode RFC 2047 encoded-words in a header value.
///
/// Example: `"=?UTF-8?B?SG9sYQ==?= =?UTF-8?B?IG11bmRv?="` → `"Hola mundo"`
///
/// If decoding fails for any token, the original text is preserved.
pub fn decode_encoded_words(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut remaining = input;
    let mut last_was_encoded = false;

    while let Some(start) = remaining.find("=?") {
        let before = &remaining[..start];
        // Whitespace between two adjacent encoded words is dropped (RFC 2047 §6.2)
        if !last_was_encoded || !before.trim().is_empty() {
            result.push_str(before);
        }

        let after_start = &remaining[start + 2..];
        match try_decode_one_word(after_start) {
            Some((text, consumed)) => {
                result.push_str(&text);
                remaining = &after_start[consumed..];
                last_was_encoded = true;
            }
            None => {
                result.push_str("=?");
                remaining = after_start;
                last_was_encoded = false;
            }
        }
    }

    result.push_str(remaining);
    result
}

/// Decode `charset?encoding?text?=`; returns the text and the bytes consumed.
fn try_decode_one_word(s: &str) -> Option<(String, usize)> {
    let (charset, rest) = s.split_once('?')?;
    let (encoding, rest) = rest.split_once('?')?;
    let end = rest.find("?=")?;
    let encoded_text = &rest[..end];
    let consumed = charset.len() + 1 + encoding.len() + 1 + end + 2;

    // RFC 2231 allows a language suffix: UTF-8*en
    let charset = charset.split('*').next().unwrap_or(charset);

    let bytes = match encoding.to_ascii_uppercase().as_str() {
        "B" => base64::engine::general_purpose::STANDARD
            .decode(encoded_text.trim_end_matches('='))
            .or_else(|_| {
                base64::engine::general_purpose::STANDARD_NO_PAD
                    .decode(encoded_text.trim_end_matches('='))
            })
            .ok()?,
        "Q" => decode_q_encoding(encoded_text),
        _ => return None,
    };

    Some((decode_charset(charset, &bytes), consumed))
}

/// Decode Q-encoding (RFC 2047): underscores → spaces, `=XX` → byte.
fn decode_q_encoding(input: &str) -> Vec<u8> {
    let bytes = input.as_bytes();
    let mut result = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'_' => {
                result.push(b' ');
                i += 1;
            }
            b'=' if i + 2 < bytes.len() => {
                match hex_byte(bytes[i + 1], bytes[i + 2]) {
                    Some(byte) => {
                        result.push(byte);
                        i += 3;
                    }
                    None => {
                        result.push(b'=');
                        i += 1;
                    }
                }
            }
            b => {
                result.push(b);
                i += 1;
            }
        }
    }
    result
}

/// Decode bytes using a named charset.
pub fn decode_charset(charset: &str, bytes: &[u8]) -> String {
    match charset.to_ascii_lowercase().as_str() {
        "utf-8" | "utf8" | "us-ascii" => String::from_utf8_lossy(bytes).into_owned(),
        _ => match encoding_rs::Encoding::for_label(charset.as_bytes()) {
            Some(encoding) => {
                let (decoded, _, _) = encoding.decode(bytes);
                decoded.into_owned()
            }
            None => {
                warn!(charset, "Unknown charset, falling back to UTF-8 lossy");
                String::from_utf8_lossy(bytes).into_owned()
            }
        },
    }
}

/// Parse an email date string in various common formats.
///
/// Supports RFC 2822, ISO 8601, IMAP `INTERNALDATE` and a few broken
/// real-world variants.
pub fn parse_date(date_str: &str) -> Option<DateTime<Utc>> {
    let trimmed = date_str.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    let no_dow = strip_day_of_week(trimmed);
    let candidates = [
        no_dow.clone(),
        normalize_imap_date(&no_dow),
        replace_named_tz(&no_dow),
    ];

    const FORMATS: [&str; 7] = [
        "%d %b %Y %H:%M:%S %z",
        "%d %b %Y %H:%M:%S",
        "%b %d %H:%M:%S %Y",
        "%Y-%m-%d %H:%M:%S %z",
        "%Y-%m-%d %H:%M:%S",
        "%d/%m/%Y %H:%M:%S",
        "%m/%d/%Y %H:%M:%S",
    ];

    for candidate in &candidates {
        for fmt in FORMATS {
            if let Ok(dt) = DateTime::parse_from_str(candidate, fmt) {
                return Some(dt.with_timezone(&Utc));
            }
            if let Ok(ndt) = NaiveDateTime::parse_from_str(candidate, fmt) {
                return Some(Utc.from_utc_datetime(&ndt));
            }
        }
    }

    if let Some(dt) = mail_parser_date(trimmed) {
        return Some(dt);
    }

    warn!(date = trimmed, "Could not parse date");
    None
}

/// Last resort: let `mail-parser` try, wrapping the value in a stub message.
fn mail_parser_date(input: &str) -> Option<DateTime<Utc>> {
    let stub = format!("Date: {input}\n\n");
    let parsed = mail_parser::MessageParser::default().parse(stub.as_bytes())?;
    let rfc3339 = parsed.date()?.to_rfc3339();
    DateTime::parse_from_rfc3339(&rfc3339)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// `"16-JUL-2025 03:01:03"` → `"16 Jul 2025 03:01:03"`.
fn normalize_imap_date(s: &str) -> String {
    const MONTHS: [&str; 12] = [
        "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
    ];
    let mut parts = s.splitn(3, '-');
    let (Some(day), Some(month), Some(rest)) = (parts.next(), parts.next(), parts.next()) else {
        return s.to_string();
    };
    match MONTHS.iter().find(|m| m.eq_ignore_ascii_case(month)) {
        Some(month) if day.chars().all(|c| c.is_ascii_digit()) => {
            format!("{day} {month} {rest}")
        }
        _ => s.to_string(),
    }
}

fn strip_day_of_week(s: &str) -> String {
    const DAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];
    for day in DAYS {
        if let Some(rest) = s.strip_prefix(day) {
            if rest.starts_with(',') || rest.starts_with(' ') {
                return rest.trim_start_matches(',').trim().to_string();
            }
        }
    }
    s.to_string()
}

fn replace_named_tz(s: &str) -> String {
    const ZONES: [(&str, &str); 13] = [
        ("CEST", "+0200"),
        ("EST", "-0500"),
        ("EDT", "-0400"),
        ("CST", "-0600"),
        ("CDT", "-0500"),
        ("MST", "-0700"),
        ("MDT", "-0600"),
        ("PST", "-0800"),
        ("PDT", "-0700"),
        ("GMT", "+0000"),
        ("UTC", "+0000"),
        ("CET", "+0100"),
        ("JST", "+0900"),
    ];
    for (name, offset) in ZONES {
        if let Some(head) = s.strip_suffix(name) {
            return format!("{head}{offset}");
        }
    }
    s.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header_block_unfolds() {
        let block = b"Subject: This is a long\r\n subject line\r\nFrom: user@example.com\r\n";
        let headers = parse_header_block(block);
        assert_eq!(headers.len(), 2);
        assert_eq!(headers.get("subject"), Some("This is a long subject line"));
        let raw = headers.iter().next().and_then(|h| h.raw_lines()).unwrap();
        assert_eq!(raw.len(), 2);
    }

    #[test]
    fn test_parse_header_block_keeps_tab_continuation() {
        let block = b"References: <a@b>\n\t<c@d>\n";
        let headers = parse_header_block(block);
        assert_eq!(headers.get("references"), Some("<a@b>\t<c@d>"));
    }

    #[test]
    fn test_parse_header_block_skips_garbage() {
        let block = b"not a header\nX-Ok: yes\n";
        let headers = parse_header_block(block);
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("x-ok"), Some("yes"));
    }

    #[test]
    fn test_parse_header_block_latin1_fallback() {
        let block = b"Subject: caf\xe9\n";
        let headers = parse_header_block(block);
        assert_eq!(headers.get("subject"), Some("café"));
    }

    #[test]
    fn test_parse_structured_quoted_params() {
        let v = parse_structured("multipart/mixed; boundary=\"a;b\\\"c\"; charset=UTF-8");
        assert_eq!(v.value, "multipart/mixed");
        assert_eq!(v.param("boundary"), Some("a;b\"c"));
        assert_eq!(v.param("CHARSET"), Some("UTF-8"));
    }

    #[test]
    fn test_parse_structured_rfc2231_extended() {
        let v = parse_structured("attachment; filename*=utf-8''na%C3%AFve%20file.txt");
        assert_eq!(v.value, "attachment");
        assert_eq!(v.param("filename"), Some("naïve file.txt"));
    }

    #[test]
    fn test_parse_structured_rfc2231_continuation() {
        let v = parse_structured(
            "attachment; filename*0=\"very_long_\"; filename*1=\"name.pdf\"; filename=\"short.pdf\"",
        );
        assert_eq!(v.param("filename"), Some("very_long_name.pdf"));
    }

    #[test]
    fn test_replace_param_keeps_other_params() {
        let out = replace_param(
            "multipart/mixed; charset=utf-8;\tboundary=\"old\"",
            "boundary",
            "new",
        );
        assert_eq!(out, "multipart/mixed; charset=utf-8;\tboundary=\"new\"");
    }

    #[test]
    fn test_replace_param_appends_when_missing() {
        let out = replace_param("multipart/mixed", "boundary", "b1");
        assert_eq!(out, "multipart/mixed; boundary=\"b1\"");
    }

    #[test]
    fn test_replace_param_drops_rfc2231_forms() {
        let out = replace_param("multipart/mixed; boundary*=us-ascii''orig", "boundary", "new");
        assert_eq!(out, "multipart/mixed; boundary=\"new\"");
        assert_eq!(parse_structured(&out).param("boundary"), Some("new"));

        let out = replace_param(
            "multipart/mixed; boundary*0=\"or\"; format=flowed; boundary*1*=ig",
            "boundary",
            "new",
        );
        assert_eq!(out, "multipart/mixed; boundary=\"new\"; format=flowed");
        assert_eq!(parse_structured(&out).param("boundary"), Some("new"));
    }

    #[test]
    fn test_replace_param_leaves_similar_names() {
        let out = replace_param("multipart/mixed; boundary-x=1; boundary=old", "boundary", "new");
        assert_eq!(out, "multipart/mixed; boundary-x=1; boundary=\"new\"");
    }

    #[test]
    fn test_decode_base64_encoded_word() {
        assert_eq!(decode_encoded_words("=?UTF-8?B?SG9sYSBtdW5kbw==?="), "Hola mundo");
    }

    #[test]
    fn test_decode_q_encoded_word() {
        assert_eq!(decode_encoded_words("=?ISO-8859-1?Q?caf=E9?="), "café");
    }

    #[test]
    fn test_decode_multiple_encoded_words() {
        let input = "=?UTF-8?B?SG9sYQ==?= =?UTF-8?B?IG11bmRv?=";
        assert_eq!(decode_encoded_words(input), "Hola mundo");
    }

    #[test]
    fn test_decode_mixed_plain_and_encoded() {
        let input = "Re: =?UTF-8?B?SG9sYQ==?= there";
        assert_eq!(decode_encoded_words(input), "Re: Hola there");
    }

    #[test]
    fn test_decode_windows1252_encoded_word() {
        assert_eq!(decode_encoded_words("=?Windows-1252?Q?M=FCller?="), "Müller");
    }

    #[test]
    fn test_parse_date_rfc2822() {
        let dt = parse_date("Thu, 04 Jan 2024 10:00:00 +0000").unwrap();
        assert_eq!(dt.format("%Y-%m-%d").to_string(), "2024-01-04");
    }

    #[test]
    fn test_parse_date_named_tz() {
        let dt = parse_date("Thu, 04 Jan 2024 10:00:00 EST").unwrap();
        assert_eq!(dt.format("%H").to_string(), "15");
    }

    #[test]
    fn test_parse_date_imap_style() {
        let dt = parse_date("16-JUL-2025 03:01:03").expect("IMAP date");
        assert_eq!(dt.format("%Y-%m-%d").to_string(), "2025-07-16");
    }

    #[test]
    fn test_parse_date_iso8601() {
        assert!(parse_date("2024-01-04T10:00:00Z").is_some());
    }

    #[test]
    fn test_parse_date_empty() {
        assert!(parse_date("   ").is_none());
    }
}
