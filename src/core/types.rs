//! Core pipeline types: five-tuple flow keys, the dispatch hash, and
//! application identity tags.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use aho_corasick::AhoCorasick;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

pub const PROTO_TCP: u8 = 6;
pub const PROTO_UDP: u8 = 17;

/// Directional flow key. IPs are the four wire octets assembled
/// least-significant-octet first, the layout the rest of the pipeline
/// (hash, rule set, display) shares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FiveTuple {
    pub src_ip: u32,
    pub dst_ip: u32,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: u8,
}

impl FiveTuple {
    /// The opposite direction of the same session. Kept for completeness;
    /// the hot path indexes each direction as its own flow.
    pub fn reverse(&self) -> Self {
        Self {
            src_ip: self.dst_ip,
            dst_ip: self.src_ip,
            src_port: self.dst_port,
            dst_port: self.src_port,
            protocol: self.protocol,
        }
    }
}

impl fmt::Display for FiveTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let proto = match self.protocol {
            PROTO_TCP => "TCP",
            PROTO_UDP => "UDP",
            _ => "?",
        };
        write!(
            f,
            "{}:{} -> {}:{} ({})",
            format_ip(self.src_ip),
            self.src_port,
            format_ip(self.dst_ip),
            self.dst_port,
            proto
        )
    }
}

/// Deterministic 64-bit hash of a five-tuple.
///
/// Both dispatch tiers (reader -> LB, LB -> FP) and nothing else depend on
/// this function. It must produce the same value for the same tuple in every
/// run, so the forwarded set of a capture is reproducible; a keyed hasher
/// does not give that guarantee.
pub fn flow_hash(tuple: &FiveTuple) -> u64 {
    let mut h: u64 = 0;
    let fields = [
        tuple.src_ip as u64,
        tuple.dst_ip as u64,
        tuple.src_port as u64,
        tuple.dst_port as u64,
        tuple.protocol as u64,
    ];
    for v in fields {
        h ^= v
            .wrapping_add(0x9e37_79b9)
            .wrapping_add(h << 6)
            .wrapping_add(h >> 2);
    }
    h
}

/// Parse a dotted-quad address into the pipeline's wire-order u32.
pub fn parse_ip(s: &str) -> Option<u32> {
    let addr = Ipv4Addr::from_str(s).ok()?;
    Some(u32::from_le_bytes(addr.octets()))
}

/// Render a wire-order u32 back to dotted-quad.
pub fn format_ip(ip: u32) -> String {
    let o = ip.to_le_bytes();
    format!("{}.{}.{}.{}", o[0], o[1], o[2], o[3])
}

/// Application identity of a flow, as extracted from SNI / Host / DNS or
/// guessed from the destination port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppTag {
    Unknown,
    Http,
    Https,
    Dns,
    Tls,
    Quic,
    Google,
    Facebook,
    YouTube,
    Twitter,
    Instagram,
    Netflix,
    Amazon,
    Microsoft,
    Apple,
    WhatsApp,
    Telegram,
    TikTok,
    Spotify,
    Zoom,
    Discord,
    GitHub,
    Cloudflare,
}

impl AppTag {
    pub fn name(&self) -> &'static str {
        match self {
            AppTag::Unknown => "Unknown",
            AppTag::Http => "HTTP",
            AppTag::Https => "HTTPS",
            AppTag::Dns => "DNS",
            AppTag::Tls => "TLS",
            AppTag::Quic => "QUIC",
            AppTag::Google => "Google",
            AppTag::Facebook => "Facebook",
            AppTag::YouTube => "YouTube",
            AppTag::Twitter => "Twitter",
            AppTag::Instagram => "Instagram",
            AppTag::Netflix => "Netflix",
            AppTag::Amazon => "Amazon",
            AppTag::Microsoft => "Microsoft",
            AppTag::Apple => "Apple",
            AppTag::WhatsApp => "WhatsApp",
            AppTag::Telegram => "Telegram",
            AppTag::TikTok => "TikTok",
            AppTag::Spotify => "Spotify",
            AppTag::Zoom => "Zoom",
            AppTag::Discord => "Discord",
            AppTag::GitHub => "GitHub",
            AppTag::Cloudflare => "Cloudflare",
        }
    }

    pub const ALL: [AppTag; 23] = [
        AppTag::Unknown,
        AppTag::Http,
        AppTag::Https,
        AppTag::Dns,
        AppTag::Tls,
        AppTag::Quic,
        AppTag::Google,
        AppTag::Facebook,
        AppTag::YouTube,
        AppTag::Twitter,
        AppTag::Instagram,
        AppTag::Netflix,
        AppTag::Amazon,
        AppTag::Microsoft,
        AppTag::Apple,
        AppTag::WhatsApp,
        AppTag::Telegram,
        AppTag::TikTok,
        AppTag::Spotify,
        AppTag::Zoom,
        AppTag::Discord,
        AppTag::GitHub,
        AppTag::Cloudflare,
    ];
}

impl fmt::Display for AppTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AppTag {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AppTag::ALL
            .iter()
            .copied()
            .find(|tag| tag.name().eq_ignore_ascii_case(s))
            .ok_or(())
    }
}

/// Substring patterns mapping a hostname to an application tag, in match
/// priority order. YouTube, Instagram and WhatsApp come before the generic
/// Google/Facebook groups: "yt3.ggpht.com" carries a Google-owned CDN
/// substring and must still classify as YouTube.
const APP_PATTERNS: &[(&str, AppTag)] = &[
    ("youtube", AppTag::YouTube),
    ("ytimg", AppTag::YouTube),
    ("youtu.be", AppTag::YouTube),
    ("yt3.ggpht", AppTag::YouTube),
    ("instagram", AppTag::Instagram),
    ("cdninstagram", AppTag::Instagram),
    ("whatsapp", AppTag::WhatsApp),
    ("wa.me", AppTag::WhatsApp),
    ("google", AppTag::Google),
    ("gstatic", AppTag::Google),
    ("googleapis", AppTag::Google),
    ("ggpht", AppTag::Google),
    ("gvt1", AppTag::Google),
    ("facebook", AppTag::Facebook),
    ("fbcdn", AppTag::Facebook),
    ("fb.com", AppTag::Facebook),
    ("fbsbx", AppTag::Facebook),
    ("meta.com", AppTag::Facebook),
    ("twitter", AppTag::Twitter),
    ("twimg", AppTag::Twitter),
    ("x.com", AppTag::Twitter),
    ("t.co", AppTag::Twitter),
    ("netflix", AppTag::Netflix),
    ("nflxvideo", AppTag::Netflix),
    ("nflximg", AppTag::Netflix),
    ("amazon", AppTag::Amazon),
    ("amazonaws", AppTag::Amazon),
    ("cloudfront", AppTag::Amazon),
    ("aws", AppTag::Amazon),
    ("microsoft", AppTag::Microsoft),
    ("msn.com", AppTag::Microsoft),
    ("office", AppTag::Microsoft),
    ("azure", AppTag::Microsoft),
    ("live.com", AppTag::Microsoft),
    ("outlook", AppTag::Microsoft),
    ("bing", AppTag::Microsoft),
    ("apple", AppTag::Apple),
    ("icloud", AppTag::Apple),
    ("mzstatic", AppTag::Apple),
    ("itunes", AppTag::Apple),
    ("telegram", AppTag::Telegram),
    ("t.me", AppTag::Telegram),
    ("tiktok", AppTag::TikTok),
    ("tiktokcdn", AppTag::TikTok),
    ("musical.ly", AppTag::TikTok),
    ("bytedance", AppTag::TikTok),
    ("spotify", AppTag::Spotify),
    ("scdn.co", AppTag::Spotify),
    ("zoom", AppTag::Zoom),
    ("discord", AppTag::Discord),
    ("discordapp", AppTag::Discord),
    ("github", AppTag::GitHub),
    ("githubusercontent", AppTag::GitHub),
    ("cloudflare", AppTag::Cloudflare),
    ("cf-", AppTag::Cloudflare),
];

static APP_MATCHER: Lazy<AhoCorasick> = Lazy::new(|| {
    AhoCorasick::new(APP_PATTERNS.iter().map(|(p, _)| p))
        .expect("application pattern table is valid")
});

/// Map a server name (SNI, Host header, DNS query) to an application tag.
///
/// The first pattern in table order wins, not the leftmost match in the
/// name. A name that matches nothing is still a live TLS/HTTP session, so
/// it resolves to the generic HTTPS tag; only an empty name is Unknown.
pub fn map_name_to_app(name: &str) -> AppTag {
    if name.is_empty() {
        return AppTag::Unknown;
    }
    let lower = name.to_ascii_lowercase();
    APP_MATCHER
        .find_overlapping_iter(&lower)
        .map(|m| m.pattern().as_usize())
        .min()
        .map(|idx| APP_PATTERNS[idx].1)
        .unwrap_or(AppTag::Https)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuple() -> FiveTuple {
        FiveTuple {
            src_ip: parse_ip("192.168.1.10").unwrap(),
            dst_ip: parse_ip("93.184.216.34").unwrap(),
            src_port: 51000,
            dst_port: 443,
            protocol: PROTO_TCP,
        }
    }

    #[test]
    fn ip_round_trip() {
        let ip = parse_ip("10.0.0.138").unwrap();
        assert_eq!(format_ip(ip), "10.0.0.138");
        // First octet lands in the low byte, per the wire-order convention.
        assert_eq!(ip & 0xff, 10);
    }

    #[test]
    fn parse_ip_rejects_garbage() {
        assert!(parse_ip("not-an-ip").is_none());
        assert!(parse_ip("1.2.3.4.5").is_none());
        assert!(parse_ip("300.1.1.1").is_none());
    }

    #[test]
    fn hash_is_stable_and_directional() {
        let t = tuple();
        let copy = t;
        assert_eq!(flow_hash(&t), flow_hash(&copy));
        assert_ne!(flow_hash(&t), flow_hash(&t.reverse()));
        let mut other = t;
        other.dst_port = 80;
        assert_ne!(flow_hash(&t), flow_hash(&other));
    }

    #[test]
    fn reverse_swaps_endpoints() {
        let t = tuple();
        let r = t.reverse();
        assert_eq!(r.src_ip, t.dst_ip);
        assert_eq!(r.dst_port, t.src_port);
        assert_eq!(r.reverse(), t);
    }

    #[test]
    fn mapper_prefers_specific_patterns() {
        // Contains both "youtube"-family and "ggpht" (Google) substrings.
        assert_eq!(map_name_to_app("yt3.ggpht.com"), AppTag::YouTube);
        assert_eq!(map_name_to_app("www.youtube.com"), AppTag::YouTube);
        assert_eq!(map_name_to_app("edge.cdninstagram.com"), AppTag::Instagram);
        assert_eq!(map_name_to_app("mmx-ds.cdn.whatsapp.net"), AppTag::WhatsApp);
        assert_eq!(map_name_to_app("www.google.com"), AppTag::Google);
        assert_eq!(map_name_to_app("static.xx.fbcdn.net"), AppTag::Facebook);
    }

    #[test]
    fn mapper_fallbacks() {
        assert_eq!(map_name_to_app(""), AppTag::Unknown);
        assert_eq!(map_name_to_app("example.org"), AppTag::Https);
        assert_eq!(map_name_to_app("API.GITHUB.COM"), AppTag::GitHub);
    }

    #[test]
    fn app_tag_from_str() {
        assert_eq!("YouTube".parse::<AppTag>(), Ok(AppTag::YouTube));
        assert_eq!("https".parse::<AppTag>(), Ok(AppTag::Https));
        assert!("NoSuchApp".parse::<AppTag>().is_err());
    }
}
