//! Framing of a single RFC 5322 message (`.eml` / `.arf`): header block vs body.

/// Strip a UTF-8 BOM and a leading mbox `From ` separator line, if present.
///
/// Messages exported from mbox archives often keep the separator; it is not a
/// header and would otherwise be reported as a malformed header line.
pub fn strip_envelope(data: &[u8]) -> &[u8] {
    let data = data.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(data);

    if data.starts_with(b"From ") {
        if let Some(pos) = data.iter().position(|&b| b == b'\n') {
            return &data[pos + 1..];
        }
    }
    data
}

/// Split a message into its header block and body.
///
/// The body starts after the first blank line. A message that begins with a
/// blank line has no header block; a message with no blank line is all headers.
pub fn split_message(data: &[u8]) -> (&[u8], &[u8]) {
    if let Some(body) = data
        .strip_prefix(b"\r\n")
        .or_else(|| data.strip_prefix(b"\n"))
    {
        return (&[], body);
    }

    match find_header_end(data) {
        Some((end, separator_len)) => (&data[..end], &data[end + separator_len..]),
        None => (data, &[]),
    }
}

/// Find the offset of the blank line ending the headers and the separator length.
fn find_header_end(data: &[u8]) -> Option<(usize, usize)> {
    for i in 0..data.len().saturating_sub(1) {
        if data[i] == b'\n' && data[i + 1] == b'\n' {
            return Some((i, 2));
        }
        if data[i..].starts_with(b"\r\n\r\n") {
            return Some((i, 4));
        }
    }
    None
}
