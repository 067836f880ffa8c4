//! Protocol sniffers.
//!
//! Each sniffer is a pure function over a payload slice: it either
//! recognises its protocol and returns the carried server name, or returns
//! `None`. Out-of-range reads are impossible by construction; malformed
//! input is simply "no match". Which sniffer runs for which flow is the
//! fast path's decision (port and payload-length gates live there).

pub mod dns;
pub mod http;
pub mod tls;
