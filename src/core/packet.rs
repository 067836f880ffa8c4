//! Frame decoding.
//!
//! A pure pass over raw link-layer bytes: Ethernet, then IPv4, then TCP or
//! UDP, yielding the five-tuple and the application payload range. Anything
//! else (non-IPv4, other transports, violated length fields) decodes to
//! `None` and is counted and skipped by the reader.

use pnet::packet::ethernet::{EtherTypes, EthernetPacket};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::tcp::TcpPacket;
use pnet::packet::udp::UdpPacket;

use crate::core::types::{FiveTuple, PROTO_TCP, PROTO_UDP};

const ETH_HEADER_LEN: usize = 14;
const MIN_IPV4_HEADER_LEN: usize = 20;
const MIN_TCP_HEADER_LEN: usize = 20;
const UDP_HEADER_LEN: usize = 8;

/// TCP flag bits as they appear in the low byte of the flags field.
pub mod tcp_flags {
    pub const FIN: u8 = 0x01;
    pub const SYN: u8 = 0x02;
    pub const RST: u8 = 0x04;
    pub const ACK: u8 = 0x10;
}

/// Result of decoding one frame: the flow key, the TCP flag byte (zero for
/// UDP) and the payload slice bounds within the original frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedFrame {
    pub tuple: FiveTuple,
    pub tcp_flags: u8,
    pub payload_offset: usize,
    pub payload_length: usize,
}

/// Decode an Ethernet/IPv4/{TCP,UDP} frame.
///
/// IPs are taken exactly as laid out on the wire, first octet in the low
/// byte, so the hash and the rule set see the same 32-bit values end to
/// end.
pub fn decode(frame: &[u8]) -> Option<DecodedFrame> {
    let eth = EthernetPacket::new(frame)?;
    if eth.get_ethertype() != EtherTypes::Ipv4 {
        return None;
    }

    let ip_slice = frame.get(ETH_HEADER_LEN..)?;
    let ipv4 = Ipv4Packet::new(ip_slice)?;
    if ipv4.get_version() != 4 {
        return None;
    }
    let ip_header_len = ipv4.get_header_length() as usize * 4;
    if ip_header_len < MIN_IPV4_HEADER_LEN || ip_slice.len() < ip_header_len {
        return None;
    }

    let src_ip = u32::from_le_bytes(ipv4.get_source().octets());
    let dst_ip = u32::from_le_bytes(ipv4.get_destination().octets());

    let transport_slice = frame.get(ETH_HEADER_LEN + ip_header_len..)?;
    let proto = ipv4.get_next_level_protocol();

    let (src_port, dst_port, protocol, tcp_flags, transport_len) = match proto {
        IpNextHeaderProtocols::Tcp => {
            let tcp = TcpPacket::new(transport_slice)?;
            let header_len = tcp.get_data_offset() as usize * 4;
            if header_len < MIN_TCP_HEADER_LEN || transport_slice.len() < header_len {
                return None;
            }
            let flags = (tcp.get_flags() & 0xff) as u8;
            (
                tcp.get_source(),
                tcp.get_destination(),
                PROTO_TCP,
                flags,
                header_len,
            )
        }
        IpNextHeaderProtocols::Udp => {
            let udp = UdpPacket::new(transport_slice)?;
            (
                udp.get_source(),
                udp.get_destination(),
                PROTO_UDP,
                0,
                UDP_HEADER_LEN,
            )
        }
        _ => return None,
    };

    let payload_offset = ETH_HEADER_LEN + ip_header_len + transport_len;
    let payload_length = frame.len().saturating_sub(payload_offset);

    Some(DecodedFrame {
        tuple: FiveTuple {
            src_ip,
            dst_ip,
            src_port,
            dst_port,
            protocol,
        },
        tcp_flags,
        payload_offset,
        payload_length,
    })
}

/// One frame packaged for the queue hops: owned bytes plus decoded
/// metadata. Moved between components; the payload view is resolved
/// lazily against the owned buffer.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub id: u64,
    pub ts_sec: u32,
    pub ts_usec: u32,
    pub tuple: FiveTuple,
    pub tcp_flags: u8,
    pub data: Vec<u8>,
    pub payload_offset: usize,
    pub payload_length: usize,
}

impl WorkItem {
    pub fn new(id: u64, ts_sec: u32, ts_usec: u32, data: Vec<u8>, decoded: DecodedFrame) -> Self {
        Self {
            id,
            ts_sec,
            ts_usec,
            tuple: decoded.tuple,
            tcp_flags: decoded.tcp_flags,
            data,
            payload_offset: decoded.payload_offset,
            payload_length: decoded.payload_length,
        }
    }

    /// The application payload, empty when the frame carried none.
    pub fn payload(&self) -> &[u8] {
        let end = self.payload_offset + self.payload_length;
        self.data.get(self.payload_offset..end).unwrap_or(&[])
    }

    pub fn is_tcp(&self) -> bool {
        self.tuple.protocol == PROTO_TCP
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    //! Frame builders shared by the decoder and worker tests.

    pub fn eth_header(ethertype: u16) -> Vec<u8> {
        let mut out = vec![0x02, 0, 0, 0, 0, 1, 0x02, 0, 0, 0, 0, 2];
        out.extend_from_slice(&ethertype.to_be_bytes());
        out
    }

    pub fn ipv4_header(src: [u8; 4], dst: [u8; 4], protocol: u8, total_len: u16) -> Vec<u8> {
        let mut h = vec![0u8; 20];
        h[0] = 0x45; // version 4, IHL 5
        h[2..4].copy_from_slice(&total_len.to_be_bytes());
        h[8] = 64; // TTL
        h[9] = protocol;
        h[12..16].copy_from_slice(&src);
        h[16..20].copy_from_slice(&dst);
        h
    }

    pub fn tcp_header(src_port: u16, dst_port: u16, flags: u8) -> Vec<u8> {
        let mut h = vec![0u8; 20];
        h[0..2].copy_from_slice(&src_port.to_be_bytes());
        h[2..4].copy_from_slice(&dst_port.to_be_bytes());
        h[12] = 5 << 4; // data offset 5 words
        h[13] = flags;
        h[14..16].copy_from_slice(&1024u16.to_be_bytes());
        h
    }

    pub fn udp_header(src_port: u16, dst_port: u16, payload_len: u16) -> Vec<u8> {
        let mut h = vec![0u8; 8];
        h[0..2].copy_from_slice(&src_port.to_be_bytes());
        h[2..4].copy_from_slice(&dst_port.to_be_bytes());
        h[4..6].copy_from_slice(&(8 + payload_len).to_be_bytes());
        h
    }

    pub fn tcp_frame(
        src: [u8; 4],
        dst: [u8; 4],
        src_port: u16,
        dst_port: u16,
        flags: u8,
        payload: &[u8],
    ) -> Vec<u8> {
        let total = 20 + 20 + payload.len();
        let mut frame = eth_header(0x0800);
        frame.extend(ipv4_header(src, dst, 6, total as u16));
        frame.extend(tcp_header(src_port, dst_port, flags));
        frame.extend_from_slice(payload);
        frame
    }

    pub fn udp_frame(
        src: [u8; 4],
        dst: [u8; 4],
        src_port: u16,
        dst_port: u16,
        payload: &[u8],
    ) -> Vec<u8> {
        let total = 20 + 8 + payload.len();
        let mut frame = eth_header(0x0800);
        frame.extend(ipv4_header(src, dst, 17, total as u16));
        frame.extend(udp_header(src_port, dst_port, payload.len() as u16));
        frame.extend_from_slice(payload);
        frame
    }
}
