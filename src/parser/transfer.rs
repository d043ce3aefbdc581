//! Content-Transfer-Encoding decoding (RFC 2045 §6).

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;

use crate::error::{Result, StripError};
use crate::model::part::TransferEncoding;

/// Base64 engine tolerant of the padding and trailing-bit sloppiness found in
/// real mail. Whitespace is stripped before decoding.
const MIME_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Decode a raw body according to `encoding`.
pub fn decode(encoding: TransferEncoding, body: &[u8]) -> Result<Vec<u8>> {
    match encoding {
        TransferEncoding::Base64 => {
            let compact: Vec<u8> = body
                .iter()
                .copied()
                .filter(|b| !b.is_ascii_whitespace())
                .collect();
            MIME_BASE64
                .decode(&compact)
                .map_err(|e| StripError::Decode(format!("base64: {e}")))
        }
        TransferEncoding::QuotedPrintable => Ok(decode_quoted_printable(body)),
        TransferEncoding::SevenBit | TransferEncoding::EightBit | TransferEncoding::Binary => {
            Ok(body.to_vec())
        }
    }
}

/// Approximate decoded size without decoding, used when the payload is corrupt.
pub fn estimate_decoded_len(encoding: TransferEncoding, body: &[u8]) -> u64 {
    match encoding {
        TransferEncoding::Base64 => {
            let significant = body.iter().filter(|b| !b.is_ascii_whitespace()).count() as u64;
            significant * 3 / 4
        }
        _ => body.len() as u64,
    }
}

/// Quoted-printable decoding: `=XX` escapes and `=` soft line breaks.
/// Malformed escapes are passed through literally.
fn decode_quoted_printable(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len());
    let mut i = 0;
    while i < body.len() {
        if body[i] != b'=' {
            out.push(body[i]);
            i += 1;
            continue;
        }
        // Soft line break: "=" followed by optional whitespace and a newline
        let mut j = i + 1;
        while j < body.len() && (body[j] == b' ' || body[j] == b'\t') {
            j += 1;
        }
        if body[j..].starts_with(b"\r\n") {
            i = j + 2;
            continue;
        }
        if body[j..].starts_with(b"\n") {
            i = j + 1;
            continue;
        }
        if j == body.len() {
            i = j;
            continue;
        }
        if i + 2 < body.len() {
            if let Some(byte) = super::header::hex_byte(body[i + 1], body[i + 2]) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(b'=');
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_base64_with_line_breaks() {
        let body = b"SGVsbG8g\r\nV29ybGQ=\r\n";
        let decoded = decode(TransferEncoding::Base64, body).unwrap();
        assert_eq!(decoded, b"Hello World");
    }

    #[test]
    fn test_decode_base64_missing_padding() {
        let decoded = decode(TransferEncoding::Base64, b"SGk").unwrap();
        assert_eq!(decoded, b"Hi");
    }

    #[test]
    fn test_decode_base64_garbage_is_error() {
        assert!(decode(TransferEncoding::Base64, b"@@@@").is_err());
    }

    #[test]
    fn test_estimate_base64() {
        assert_eq!(estimate_decoded_len(TransferEncoding::Base64, b"AAAA\r\nAAAA"), 6);
    }

    #[test]
    fn test_decode_quoted_printable() {
        let body = b"caf=C3=A9 soft=\r\nbreak and = literal";
        let decoded = decode(TransferEncoding::QuotedPrintable, body).unwrap();
        assert_eq!(decoded, "café softbreak and = literal".as_bytes());
    }

    #[test]
    fn test_decode_7bit_passthrough() {
        let decoded = decode(TransferEncoding::SevenBit, b"plain").unwrap();
        assert_eq!(decoded, b"plain");
    }
}
