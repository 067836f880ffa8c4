//! DNS query sniffing: recognise a query header and decode the first
//! question name from its label sequence.

const DNS_HEADER_LEN: usize = 12;
const MAX_LABEL_LEN: u8 = 63;

/// Whether the payload is a DNS query: QR bit clear and at least one
/// question.
pub fn is_dns_query(payload: &[u8]) -> bool {
    if payload.len() < DNS_HEADER_LEN {
        return false;
    }
    if payload[2] & 0x80 != 0 {
        return false; // response
    }
    u16::from_be_bytes([payload[4], payload[5]]) != 0
}

/// Decode the query name starting at the question section.
///
/// Labels are length-prefixed and joined with '.'; the walk stops at the
/// zero label, the end of the buffer, or a compression pointer (top bits
/// set), returning whatever was accumulated.
pub fn extract_query(payload: &[u8]) -> Option<String> {
    if !is_dns_query(payload) {
        return None;
    }

    let mut name = Vec::new();
    let mut offset = DNS_HEADER_LEN;

    while offset < payload.len() {
        let label_len = payload[offset];
        if label_len == 0 || label_len > MAX_LABEL_LEN {
            break;
        }
        offset += 1;
        let end = offset + label_len as usize;
        if end > payload.len() {
            break;
        }
        if !name.is_empty() {
            name.push(b'.');
        }
        name.extend_from_slice(&payload[offset..end]);
        offset = end;
    }

    if name.is_empty() {
        return None;
    }
    String::from_utf8(name).ok()
}


#[cfg(test)]
mod tests {
    use super::testutil::dns_query;
    use super::*;

    #[test]
    fn extracts_query_name() {
        let pkt = dns_query(0x1234, "tiktok.com");
        assert!(is_dns_query(&pkt));
        assert_eq!(extract_query(&pkt).as_deref(), Some("tiktok.com"));
    }

    #[test]
    fn multi_label_names_join_with_dots() {
        let pkt = dns_query(1, "www.api.example.co.uk");
        assert_eq!(extract_query(&pkt).as_deref(), Some("www.api.example.co.uk"));
    }

    #[test]
    fn responses_are_no_match() {
        let mut pkt = dns_query(7, "example.com");
        pkt[2] |= 0x80; // QR bit
        assert!(extract_query(&pkt).is_none());
    }

    #[test]
    fn zero_question_count_is_no_match() {
        let mut pkt = dns_query(7, "example.com");
        pkt[4] = 0;
        pkt[5] = 0;
        assert!(extract_query(&pkt).is_none());
    }

    #[test]
    fn short_payload_is_no_match() {
        assert!(extract_query(&[0u8; 11]).is_none());
    }

    #[test]
    fn compression_pointer_stops_the_walk() {
        let mut pkt = dns_query(7, "cdn");
        // Replace the terminating zero label with a compression pointer.
        let zero_pos = DNS_HEADER_LEN + 4; // 1 length byte + "cdn"
        assert_eq!(pkt[zero_pos], 0);
        pkt[zero_pos] = 0xc0;
        pkt.insert(zero_pos + 1, 0x0c);
        assert_eq!(extract_query(&pkt).as_deref(), Some("cdn"));
    }

    #[test]
    fn label_running_past_buffer_is_truncated() {
        let mut pkt = dns_query(7, "abc");
        let len = pkt.len();
        pkt.truncate(len - 6); // cut into the label bytes
        // Either a shorter prefix or nothing, never an out-of-bounds read.
        if let Some(name) = extract_query(&pkt) {
            assert!("abc".starts_with(&name));
        }
    }
}
