//! Mailbox parsing for address headers (RFC 5322 §3.4).

/// One mailbox from an address header.
///
/// # Examples
/// - `"Juan García <juan@ejemplo.com>"` → `display_name = "Juan García"`, `address = "juan@ejemplo.com"`
/// - `"user@example.com"` → `display_name = ""`, `address = "user@example.com"`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mailbox {
    /// Human-readable display name (may be empty).
    pub display_name: String,
    /// The bare address (`user@domain`), or the raw text when no address is recognizable.
    pub address: String,
}

impl Mailbox {
    /// Parse a single mailbox.
    ///
    /// Supported formats:
    /// - `"user@domain.com"`
    /// - `"<user@domain.com>"`
    /// - `"Display Name <user@domain.com>"`
    /// - `"\"Display, Name\" <user@domain.com>"`
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();

        if let (Some(open), Some(close)) = (trimmed.rfind('<'), trimmed.rfind('>')) {
            if close > open {
                return Self {
                    display_name: strip_quotes(&trimmed[..open]),
                    address: trimmed[open + 1..close].trim().to_string(),
                };
            }
        }

        Self {
            display_name: String::new(),
            address: trimmed.to_string(),
        }
    }

    /// Parse a comma-separated list, honoring quoted commas and group syntax.
    ///
    /// `"Team: a@x.com, b@y.com;"` yields the two members; an empty group such
    /// as `undisclosed-recipients:;` yields nothing.
    pub fn parse_list(raw: &str) -> Vec<Self> {
        let mut results = Vec::new();
        let mut current = String::new();
        let mut in_quotes = false;
        let mut in_angle = false;

        let mut flush = |segment: &mut String| {
            let mailbox = Self::parse(segment);
            if !mailbox.address.is_empty() {
                results.push(mailbox);
            }
            segment.clear();
        };

        for ch in raw.chars() {
            match ch {
                '"' => {
                    in_quotes = !in_quotes;
                    current.push(ch);
                }
                '<' if !in_quotes => {
                    in_angle = true;
                    current.push(ch);
                }
                '>' if !in_quotes => {
                    in_angle = false;
                    current.push(ch);
                }
                // Group display name: drop everything before the colon.
                ':' if !in_quotes && !in_angle => current.clear(),
                ',' | ';' if !in_quotes && !in_angle => flush(&mut current),
                _ => current.push(ch),
            }
        }
        flush(&mut current);

        results
    }
}

/// Reduce an address header value to its bare addresses joined with `", "`.
///
/// Values with no recognizable mailbox are returned trimmed, so nothing the
/// sender wrote is silently dropped.
pub fn bare_addresses(raw: &str) -> String {
    let mailboxes = Mailbox::parse_list(raw);
    if mailboxes.is_empty() {
        return raw.trim().to_string();
    }
    mailboxes
        .iter()
        .map(|m| m.address.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Strip surrounding double-quotes and trim whitespace.
fn strip_quotes(s: &str) -> String {
    let trimmed = s.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        trimmed[1..trimmed.len() - 1].trim().to_string()
    } else {
        trimmed.to_string()
    }
}
