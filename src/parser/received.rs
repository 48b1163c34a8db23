//! Source-IP extraction from trace headers.

use std::net::IpAddr;

/// Headers that name the submitting client directly.
const CLIENT_IP_HEADERS: [&str; 2] = ["x-originating-ip", "x-sender-ip"];

/// IP addresses found in `Received` headers (encounter order), then in
/// `X-Originating-IP` / `X-Sender-IP`. Each address appears once.
pub fn source_ips(fields: &[(String, String)]) -> Vec<String> {
    let mut ips: Vec<String> = Vec::new();

    let from_received = fields
        .iter()
        .filter(|(name, _)| name == "received")
        .flat_map(|(_, value)| extract_ips(value));
    let from_client_headers = CLIENT_IP_HEADERS.iter().flat_map(move |header| {
        fields
            .iter()
            .filter(move |(name, _)| name == header)
            .flat_map(|(_, value)| extract_ips(value))
    });

    for ip in from_received.chain(from_client_headers) {
        let ip = ip.to_string();
        if !ips.contains(&ip) {
            ips.push(ip);
        }
    }
    ips
}

/// Every IPv4/IPv6 literal in a header value, in order.
fn extract_ips(value: &str) -> Vec<IpAddr> {
    // "[IPv6:2001:db8::1]" would otherwise leave "6:2001:db8::1", itself a valid address
    let value = value.replace("IPv6:", " ").replace("ipv6:", " ");

    value
        .split(|c: char| !(c.is_ascii_hexdigit() || c == '.' || c == ':'))
        .map(|token| token.trim_matches(|c| c == '.' || c == ':'))
        .filter(|token| token.contains('.') || token.contains("::") || token.matches(':').count() >= 2)
        .filter_map(|token| token.parse::<IpAddr>().ok())
        .collect()
}
