//! Capture file handling.
//!
//! The pipeline is offline: input and output are both legacy pcap files.
//! The codec in [`pcap`] is written so the same reader loop could sit
//! behind a live source with a different `RawFrame` producer.

pub mod pcap;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("cannot open {0}: {1}")]
    Open(String, #[source] std::io::Error),

    #[error("capture shorter than the 24-byte global header")]
    ShortGlobalHeader,

    #[error("unknown capture magic 0x{0:08x}")]
    BadMagic(u32),

    #[error("record incl_len {incl_len} exceeds snaplen {snaplen} or 65535")]
    OverlongRecord { incl_len: u32, snaplen: u32 },

    #[error("record body truncated (expected {0} bytes)")]
    TruncatedRecord(u32),

    #[error("capture I/O error: {0}")]
    Io(#[from] std::io::Error),
}
