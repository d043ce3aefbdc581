//! CSV rendering of search results (`find --csv`).
//!
//! Output is UTF-8 with BOM for Excel compatibility.

use super::InterestingHeaders;

/// One row per message: Id, Date, From, To, Cc, Delivered_To, Subject.
pub fn headers_csv(rows: &[(String, InterestingHeaders)]) -> String {
    let mut out = String::from("\u{feff}Id,Date,From,To,Cc,Delivered_To,Subject\n");
    for (id, headers) in rows {
        let fields = [
            id.as_str(),
            headers.date.as_deref().unwrap_or(""),
            headers.from.as_deref().unwrap_or(""),
            headers.to.as_deref().unwrap_or(""),
            headers.cc.as_deref().unwrap_or(""),
            headers.delivered_to.as_deref().unwrap_or(""),
            headers.subject.as_deref().unwrap_or(""),
        ];
        let row: Vec<String> = fields.iter().map(|f| csv_escape(f)).collect();
        out.push_str(&row.join(","));
        out.push('\n');
    }
    out
}

/// Escape a value for CSV (RFC 4180).
///
/// Wraps in double quotes if the value contains commas, quotes, or newlines.
fn csv_escape(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_escape_simple() {
        assert_eq!(csv_escape("hello"), "hello");
    }

    #[test]
    fn test_csv_escape_comma_and_quotes() {
        assert_eq!(csv_escape("Doe, \"J\""), "\"Doe, \"\"J\"\"\"");
    }

    #[test]
    fn test_headers_csv_rows() {
        let headers = InterestingHeaders {
            subject: Some("Hi, there".into()),
            from: Some("a@example.com".into()),
            ..Default::default()
        };
        let csv = headers_csv(&[("m1".into(), headers)]);
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("\u{feff}Id,Date,From,To,Cc,Delivered_To,Subject"));
        assert_eq!(lines.next(), Some("m1,,a@example.com,,,,\"Hi, there\""));
    }
}
