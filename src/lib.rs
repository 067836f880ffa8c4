//! Flowsieve: an offline deep-packet-inspection pipeline.
//!
//! The engine streams a pcap capture through a two-tier hash dispatch —
//! reader to L dispatchers to L*W fast-path workers to one writer —
//! classifying every directed flow from the first cleartext bytes of its
//! session (TLS ClientHello SNI, HTTP Host header, DNS query name) and
//! forwarding or dropping each frame per a blocking rule set. The output
//! is a capture file carrying the input's global header verbatim and the
//! forwarded subset of its records.

pub mod capture;
pub mod config;
pub mod core;
pub mod protocols;
pub mod rules;
pub mod utils;

pub use crate::config::SieveConfig;
pub use crate::core::{Engine, EngineReport};
pub use crate::rules::RuleSet;
