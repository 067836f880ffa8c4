//! HTTP request sniffing: recognise a request line by its method prefix
//! and pull the Host header value out of the same segment.

/// Four-byte method prefixes that mark a payload as an HTTP request.
const METHOD_PREFIXES: [&[u8; 4]; 7] = [
    b"GET ", b"POST", b"PUT ", b"HEAD", b"DELE", b"PATC", b"OPTI",
];

pub fn is_http_request(payload: &[u8]) -> bool {
    match payload.get(..4) {
        Some(prefix) => METHOD_PREFIXES.iter().any(|m| &prefix == m),
        None => false,
    }
}

/// Extract the Host header value from an HTTP request payload.
///
/// The header name is matched case-insensitively anywhere in the segment;
/// the value runs to the first CR or LF, with a trailing `:port` stripped.
pub fn extract_host(payload: &[u8]) -> Option<String> {
    if !is_http_request(payload) {
        return None;
    }

    let needle = b"host:";
    let mut i = 0;
    while i + needle.len() < payload.len() {
        let window = &payload[i..i + needle.len()];
        if window.eq_ignore_ascii_case(needle) {
            let mut start = i + needle.len();
            while start < payload.len() && (payload[start] == b' ' || payload[start] == b'\t') {
                start += 1;
            }
            let mut end = start;
            while end < payload.len() && payload[end] != b'\r' && payload[end] != b'\n' {
                end += 1;
            }
            if end > start {
                let value = std::str::from_utf8(&payload[start..end]).ok()?;
                let host = match value.find(':') {
                    Some(colon) => &value[..colon],
                    None => value,
                };
                if host.is_empty() {
                    return None;
                }
                return Some(host.to_string());
            }
            return None;
        }
        i += 1;
    }

    None
}
