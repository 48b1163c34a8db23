//! RFC 5322 header block parsing: folding, encoded-words (RFC 2047), and date parsing.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use tracing::{debug, warn};

/// Longest slice of an offending line quoted back in a defect message.
const DEFECT_SNIPPET_CHARS: usize = 60;

/// Header fields in encounter order, plus anomalies found while reading them.
#[derive(Debug, Default)]
pub struct HeaderBlock {
    /// `(lowercase_name, decoded_value)` pairs; repeats are kept.
    pub fields: Vec<(String, String)>,
    /// Decode anomalies, in line order.
    pub defects: Vec<String>,
}

/// Parse a raw header block.
///
/// Lines that are neither `name: value` nor a continuation are recorded as
/// defects and skipped. Values have their RFC 2047 encoded-words resolved.
pub fn parse_header_block(raw_headers: &[u8]) -> HeaderBlock {
    let mut block = HeaderBlock::default();

    let (text, was_utf8) = decode_header_bytes(raw_headers);
    if !was_utf8 {
        block
            .defects
            .push("header block is not valid UTF-8; decoded as windows-1252".to_string());
    }

    for (name, value) in unfold_headers(&text, &mut block.defects) {
        let value = decode_encoded_words(&value);
        block.fields.push((name, value));
    }

    debug!(
        fields = block.fields.len(),
        defects = block.defects.len(),
        "Parsed header block"
    );
    block
}

/// Decode raw header bytes to a string.
///
/// Tries UTF-8 first, then falls back to Windows-1252 (which accepts every
/// byte). The flag reports whether the input was valid UTF-8.
fn decode_header_bytes(bytes: &[u8]) -> (String, bool) {
    match std::str::from_utf8(bytes) {
        Ok(s) => (s.to_string(), true),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            (decoded.into_owned(), false)
        }
    }
}

/// Unfold headers: join continuation lines (starting with space or tab) with the previous header.
///
/// Returns a list of `(lowercase_name, raw_value)` pairs.
fn unfold_headers(text: &str, defects: &mut Vec<String>) -> Vec<(String, String)> {
    let mut result: Vec<(String, String)> = Vec::new();

    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;
        if line.trim().is_empty() {
            continue;
        }

        if line.starts_with(' ') || line.starts_with('\t') {
            match result.last_mut() {
                Some(last) => {
                    last.1.push(' ');
                    last.1.push_str(line.trim());
                }
                None => defects.push(format!(
                    "continuation line {line_no} has no preceding header: {}",
                    snippet(line)
                )),
            }
            continue;
        }

        match line.split_once(':') {
            Some((name, value)) if is_field_name(name.trim_end()) => {
                result.push((name.trim_end().to_lowercase(), value.trim().to_string()));
            }
            _ => defects.push(format!(
                "malformed header line {line_no}: {}",
                snippet(line)
            )),
        }
    }

    result
}

/// RFC 5322 field names are printable ASCII except the colon, with no spaces.
fn is_field_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| (33..=126).contains(&b) && b != b':')
}

fn snippet(line: &str) -> String {
    let mut s: String = line.trim().chars().take(DEFECT_SNIPPET_CHARS).collect();
    if line.trim().chars().count() > DEFECT_SNIPPET_CHARS {
        s.push('…');
    }
    s
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

    let bytes = match encoding.to_ascii_uppercase().as_str() {
        "B" => decode_b_encoding(encoded_text)?,
        "Q" => decode_q_encoding(encoded_text),
        _ => return None,
    };

    // RFC 2231 language suffix: "utf-8*en"
    let charset = charset.split('*').next().unwrap_or(charset);
    Some((decode_charset(charset, &bytes), consumed))
}

/// Base64 ("B") encoding. Whitespace is ignored; invalid symbols reject the word.
fn decode_b_encoding(input: &str) -> Option<Vec<u8>> {
    fn sextet(c: u8) -> Option<u32> {
        match c {
            b'A'..=b'Z' => Some(u32::from(c - b'A')),
            b'a'..=b'z' => Some(u32::from(c - b'a') + 26),
            b'0'..=b'9' => Some(u32::from(c - b'0') + 52),
            b'+' => Some(62),
            b'/' => Some(63),
            _ => None,
        }
    }

    let mut out = Vec::with_capacity(input.len() * 3 / 4);
    let mut acc: u32 = 0;
    let mut bits = 0;
    for c in input.bytes() {
        if c == b'=' {
            break;
        }
        if c.is_ascii_whitespace() {
            continue;
        }
        acc = (acc << 6) | sextet(c)?;
        bits += 6;
        if bits >= 8 {
            bits -= 8;
            out.push((acc >> bits) as u8);
            acc &= (1 << bits) - 1;
        }
    }
    Some(out)
}

/// Decode Q-encoding (RFC 2047): underscores → spaces, `=XX` → byte.
fn decode_q_encoding(input: &str) -> Vec<u8> {
    let mut result = Vec::with_capacity(input.len());
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'_' => {
                result.push(b' ');
                i += 1;
            }
            b'=' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or("");
                match u8::from_str_radix(hex, 16) {
                    Ok(byte) => {
                        result.push(byte);
                        i += 3;
                    }
                    Err(_) => {
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

/// Decode bytes using a named charset, replacing invalid sequences.
pub fn decode_charset(charset: &str, bytes: &[u8]) -> String {
    match encoding_rs::Encoding::for_label(charset.trim().as_bytes()) {
        Some(encoding) => {
            let (decoded, _, _) = encoding.decode(bytes);
            decoded.into_owned()
        }
        None => {
            warn!(charset, "Unknown charset, falling back to UTF-8 lossy");
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

/// Canonical ISO-8601 form of a `Date` header value, in UTC with a `Z` suffix.
pub fn canonical_date(value: &str) -> Option<String> {
    parse_date(value).map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
}

/// Parse an email date string in various common formats.
///
/// Supports RFC 2822, ISO 8601, and many broken real-world variants.
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

    // Drop a trailing comment such as "(UTC)" and the day of week
    let no_comment = match trimmed.find(" (") {
        Some(pos) => trimmed[..pos].trim(),
        None => trimmed,
    };
    let no_dow = strip_day_of_week(no_comment);
    let candidates = [no_dow.clone(), replace_named_tz(&no_dow)];

    let formats = [
        "%d %b %Y %H:%M:%S %z",
        "%d %b %Y %H:%M %z",
        "%d %b %Y %H:%M:%S",
        "%b %d %H:%M:%S %Y",
        "%Y-%m-%dT%H:%M:%S%z",
        "%Y-%m-%d %H:%M:%S %z",
        "%Y-%m-%d %H:%M:%S",
        "%d-%b-%Y %H:%M:%S %z",
        "%d-%b-%Y %H:%M:%S",
    ];

    for candidate in &candidates {
        for fmt in &formats {
            if let Ok(dt) = DateTime::parse_from_str(candidate, fmt) {
                return Some(dt.with_timezone(&Utc));
            }
            if let Ok(ndt) = NaiveDateTime::parse_from_str(candidate, fmt) {
                return Some(Utc.from_utc_datetime(&ndt));
            }
        }
    }

    debug!(date = trimmed, "Could not parse date");
    None
}

/// Strip leading day-of-week prefix (e.g. "Thu, " or "Thu ").
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

/// Replace well-known timezone abbreviations with numeric offsets.
fn replace_named_tz(s: &str) -> String {
    const TZS: [(&str, &str); 13] = [
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
        ("CEST", "+0200"),
        ("CET", "+0100"),
        ("JST", "+0900"),
    ];
    for (name, offset) in TZS {
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
    fn test_decode_base64_encoded_word() {
        assert_eq!(decode_encoded_words("=?UTF-8?B?SG9sYSBtdW5kbw==?="), "Hola mundo");
    }

    #[test]
    fn test_decode_q_encoded_word() {
        assert_eq!(decode_encoded_words("=?ISO-8859-1?Q?caf=E9?="), "café");
    }

    #[test]
    fn test_decode_adjacent_encoded_words() {
        let input = "=?UTF-8?B?SG9sYQ==?= =?UTF-8?B?IG11bmRv?=";
        assert_eq!(decode_encoded_words(input), "Hola mundo");
    }

    #[test]
    fn test_decode_invalid_encoded_word_is_preserved() {
        assert_eq!(decode_encoded_words("=?UTF-8?X?abc?="), "=?UTF-8?X?abc?=");
        assert_eq!(decode_encoded_words("=?UTF-8?B?@@@?="), "=?UTF-8?B?@@@?=");
    }

    #[test]
    fn test_decode_windows1252_encoded_word() {
        assert_eq!(decode_encoded_words("=?Windows-1252?Q?M=FCller?="), "Müller");
    }

    #[test]
    fn test_unfold_and_repeat() {
        let block = parse_header_block(
            b"Subject: This is a long\n\tsubject line\nReceived: a\nReceived: b\n",
        );
        assert!(block.defects.is_empty());
        assert_eq!(block.fields.len(), 3);
        assert_eq!(
            block.fields[0],
            ("subject".to_string(), "This is a long subject line".to_string())
        );
        assert_eq!(block.fields[1].1, "a");
        assert_eq!(block.fields[2].1, "b");
    }

    #[test]
    fn test_malformed_lines_become_defects() {
        let block = parse_header_block(b"  orphan\nFrom: a@b.com\nnot a header\nBad Name: x\n");
        assert_eq!(block.fields, vec![("from".to_string(), "a@b.com".to_string())]);
        assert_eq!(block.defects.len(), 3);
        assert!(block.defects[0].starts_with("continuation line 1"));
        assert!(block.defects[1].starts_with("malformed header line 3"));
        assert!(block.defects[2].starts_with("malformed header line 4"));
    }

    #[test]
    fn test_non_utf8_header_block() {
        let block = parse_header_block(b"Subject: caf\xe9\n");
        assert_eq!(block.fields[0].1, "café");
        assert_eq!(block.defects.len(), 1);
        assert!(block.defects[0].contains("windows-1252"));
    }

    #[test]
    fn test_canonical_date_rfc2822() {
        assert_eq!(
            canonical_date("Thu, 02 Oct 2025 10:00:00 +0000").as_deref(),
            Some("2025-10-02T10:00:00Z")
        );
        assert_eq!(
            canonical_date("Thu, 02 Oct 2025 12:00:00 +0200").as_deref(),
            Some("2025-10-02T10:00:00Z")
        );
    }

    #[test]
    fn test_parse_date_variants() {
        assert!(parse_date("04 Jan 2024 10:00:00 +0000").is_some());
        assert!(parse_date("Thu, 04 Jan 2024 10:00:00 EST").is_some());
        assert!(parse_date("Thu, 4 Jan 2024 10:00:00 +0000 (UTC)").is_some());
        assert!(parse_date("2024-01-04T10:00:00Z").is_some());
        assert!(parse_date("16-Jul-2025 03:01:03").is_some());
        assert!(parse_date("yesterday at noon").is_none());
        assert!(parse_date("").is_none());
    }
}
