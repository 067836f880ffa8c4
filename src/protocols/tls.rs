//! TLS ClientHello parsing: just enough of the handshake layout to pull
//! the SNI hostname out of the first cleartext record.

const CONTENT_TYPE_HANDSHAKE: u8 = 0x16;
const HANDSHAKE_CLIENT_HELLO: u8 = 0x01;
const EXTENSION_SERVER_NAME: u16 = 0x0000;
const SNI_TYPE_HOSTNAME: u8 = 0x00;

const RECORD_HEADER_LEN: usize = 5;
const HANDSHAKE_HEADER_LEN: usize = 4;
const CLIENT_VERSION_LEN: usize = 2;
const RANDOM_LEN: usize = 32;

fn read_u16(payload: &[u8], offset: usize) -> Option<u16> {
    let hi = *payload.get(offset)?;
    let lo = *payload.get(offset + 1)?;
    Some(u16::from_be_bytes([hi, lo]))
}

/// Whether the payload starts a TLS ClientHello: handshake record, a
/// plausible record version, a record length that fits, and handshake type
/// 0x01.
pub fn is_client_hello(payload: &[u8]) -> bool {
    if payload.len() < RECORD_HEADER_LEN + HANDSHAKE_HEADER_LEN {
        return false;
    }
    if payload[0] != CONTENT_TYPE_HANDSHAKE {
        return false;
    }
    let version = u16::from_be_bytes([payload[1], payload[2]]);
    if !(0x0300..=0x0304).contains(&version) {
        return false;
    }
    let record_len = u16::from_be_bytes([payload[3], payload[4]]) as usize;
    if record_len > payload.len() - RECORD_HEADER_LEN {
        return false;
    }
    payload[RECORD_HEADER_LEN] == HANDSHAKE_CLIENT_HELLO
}

/// Extract the SNI hostname from a ClientHello payload.
///
/// Every bound is checked against the slice; any violation or unexpected
/// structure yields `None` rather than a partial read. A ClientHello whose
/// extensions run past the captured segment is still walked up to the
/// slice end, so an SNI that fits within the capture is found.
pub fn extract_sni(payload: &[u8]) -> Option<String> {
    if !is_client_hello(payload) {
        return None;
    }

    let mut offset = RECORD_HEADER_LEN + HANDSHAKE_HEADER_LEN;
    offset += CLIENT_VERSION_LEN + RANDOM_LEN;

    // Session id, u8 length prefix.
    let session_id_len = *payload.get(offset)? as usize;
    offset += 1 + session_id_len;

    // Cipher suites, u16 length prefix.
    let cipher_len = read_u16(payload, offset)? as usize;
    offset += 2 + cipher_len;

    // Compression methods, u8 length prefix.
    let compression_len = *payload.get(offset)? as usize;
    offset += 1 + compression_len;

    // Extensions block.
    let extensions_len = read_u16(payload, offset)? as usize;
    offset += 2;
    let extensions_end = (offset + extensions_len).min(payload.len());

    while offset + 4 <= extensions_end {
        let ext_type = read_u16(payload, offset)?;
        let ext_len = read_u16(payload, offset + 2)? as usize;
        offset += 4;
        if offset + ext_len > extensions_end {
            return None;
        }

        if ext_type == EXTENSION_SERVER_NAME {
            if ext_len < 5 {
                return None;
            }
            let list_len = read_u16(payload, offset)? as usize;
            if list_len < 3 {
                return None;
            }
            let name_type = *payload.get(offset + 2)?;
            let name_len = read_u16(payload, offset + 3)? as usize;
            if name_type != SNI_TYPE_HOSTNAME || name_len > ext_len - 5 {
                return None;
            }
            let start = offset + 5;
            let name = payload.get(start..start + name_len)?;
            let name = std::str::from_utf8(name).ok()?;
            if name.is_empty() {
                return None;
            }
            return Some(name.to_string());
        }

        offset += ext_len;
    }

    None
}


#[cfg(test)]
mod tests {
    use super::testutil::client_hello;
    use super::*;

    #[test]
    fn extracts_sni_from_constructed_hello() {
        let payload = client_hello("www.youtube.com");
        assert!(is_client_hello(&payload));
        assert_eq!(extract_sni(&payload).as_deref(), Some("www.youtube.com"));
    }

    #[test]
    fn rejects_non_handshake_records() {
        let mut payload = client_hello("example.com");
        payload[0] = 0x17; // application data
        assert!(extract_sni(&payload).is_none());
    }

    #[test]
    fn rejects_bad_versions() {
        let mut payload = client_hello("example.com");
        payload[1] = 0x02;
        assert!(!is_client_hello(&payload));
        payload[1] = 0x03;
        payload[2] = 0x05;
        assert!(!is_client_hello(&payload));
    }

    #[test]
    fn rejects_server_hello() {
        let mut payload = client_hello("example.com");
        payload[5] = 0x02;
        assert!(extract_sni(&payload).is_none());
    }

    #[test]
    fn short_payloads_never_match() {
        let payload = client_hello("example.com");
        for cut in 0..9 {
            assert!(extract_sni(&payload[..cut]).is_none());
        }
    }

    #[test]
    fn truncated_at_hostname_boundary_does_not_overread() {
        let payload = client_hello("www.example.com");
        // Cut one byte off the hostname; the walk must bail out cleanly.
        for cut in 1..=20 {
            let truncated = &payload[..payload.len() - cut];
            let got = extract_sni(truncated);
            if let Some(name) = got {
                // Only acceptable if the record length still covered it.
                assert!("www.example.com".starts_with(&name));
            }
        }
    }

    #[test]
    fn missing_sni_extension_is_no_match() {
        let mut payload = client_hello("x");
        // The SNI extension type sits right after the 8-byte padding
        // extension: record(5) + handshake(4) + version(2) + random(32)
        // + session(1) + ciphers(4) + compression(2) + ext_len(2) + 8.
        let pos = 60;
        assert_eq!(&payload[pos..pos + 2], &[0x00, 0x00]);
        payload[pos + 1] = 0xff;
        assert!(extract_sni(&payload).is_none());
    }

    #[test]
    fn empty_hostname_is_no_match() {
        let payload = client_hello("");
        assert!(extract_sni(&payload).is_none());
    }
}
