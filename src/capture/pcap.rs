//! Legacy pcap file codec.
//!
//! Both ends of the pipeline speak the classic 24-byte-header capture
//! format: the reader validates the magic, tracks byte order and streams
//! records; the writer replays the input's global header verbatim and
//! appends forwarded frames under a single lock.

use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;

use parking_lot::Mutex;
use tracing::info;

use crate::capture::CaptureError;

pub const PCAP_MAGIC_NATIVE: u32 = 0xa1b2_c3d4;
pub const PCAP_MAGIC_SWAPPED: u32 = 0xd4c3_b2a1;

pub const GLOBAL_HEADER_LEN: usize = 24;
pub const RECORD_HEADER_LEN: usize = 16;

/// Hard ceiling on a record's captured length, independent of snaplen.
pub const MAX_FRAME_LEN: u32 = 65_535;

/// Link-layer type for Ethernet, the only framing the pipeline decodes.
pub const LINKTYPE_ETHERNET: u32 = 1;

/// Decoded global header fields, already byte-swapped to host values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcapGlobalHeader {
    pub magic: u32,
    pub version_major: u16,
    pub version_minor: u16,
    pub thiszone: i32,
    pub sigfigs: u32,
    pub snaplen: u32,
    pub network: u32,
}

impl PcapGlobalHeader {
    /// Parse the 24 on-disk bytes. Returns the header plus whether record
    /// fields need byte-swapping, or an error on an unknown magic.
    pub fn parse(raw: &[u8; GLOBAL_HEADER_LEN]) -> Result<(Self, bool), CaptureError> {
        let magic = u32::from_ne_bytes([raw[0], raw[1], raw[2], raw[3]]);
        let swapped = match magic {
            PCAP_MAGIC_NATIVE => false,
            PCAP_MAGIC_SWAPPED => true,
            other => return Err(CaptureError::BadMagic(other)),
        };

        let u16_at = |off: usize| {
            let v = u16::from_ne_bytes([raw[off], raw[off + 1]]);
            if swapped {
                v.swap_bytes()
            } else {
                v
            }
        };
        let u32_at = |off: usize| {
            let v = u32::from_ne_bytes([raw[off], raw[off + 1], raw[off + 2], raw[off + 3]]);
            if swapped {
                v.swap_bytes()
            } else {
                v
            }
        };

        let header = PcapGlobalHeader {
            magic: PCAP_MAGIC_NATIVE,
            version_major: u16_at(4),
            version_minor: u16_at(6),
            thiszone: u32_at(8) as i32,
            sigfigs: u32_at(12),
            snaplen: u32_at(16),
            network: u32_at(20),
        };
        Ok((header, swapped))
    }

    /// Encode to on-disk layout, optionally byte-swapped. The inverse of
    /// [`PcapGlobalHeader::parse`].
    pub fn encode(&self, swapped: bool) -> [u8; GLOBAL_HEADER_LEN] {
        let swap16 = |v: u16| if swapped { v.swap_bytes() } else { v };
        let swap32 = |v: u32| if swapped { v.swap_bytes() } else { v };

        let mut out = [0u8; GLOBAL_HEADER_LEN];
        let magic = if swapped {
            PCAP_MAGIC_NATIVE.swap_bytes()
        } else {
            PCAP_MAGIC_NATIVE
        };
        out[0..4].copy_from_slice(&magic.to_ne_bytes());
        out[4..6].copy_from_slice(&swap16(self.version_major).to_ne_bytes());
        out[6..8].copy_from_slice(&swap16(self.version_minor).to_ne_bytes());
        out[8..12].copy_from_slice(&swap32(self.thiszone as u32).to_ne_bytes());
        out[12..16].copy_from_slice(&swap32(self.sigfigs).to_ne_bytes());
        out[16..20].copy_from_slice(&swap32(self.snaplen).to_ne_bytes());
        out[20..24].copy_from_slice(&swap32(self.network).to_ne_bytes());
        out
    }
}

/// One record as stored in the capture: timestamps plus the raw link-layer
/// bytes.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub ts_sec: u32,
    pub ts_usec: u32,
    pub orig_len: u32,
    pub data: Vec<u8>,
}

/// Streaming reader over a capture file.
pub struct PcapReader {
    inner: BufReader<File>,
    header: PcapGlobalHeader,
    raw_header: [u8; GLOBAL_HEADER_LEN],
    swapped: bool,
}

impl PcapReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CaptureError> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| CaptureError::Open(path.display().to_string(), e))?;
        let mut inner = BufReader::new(file);

        let mut raw_header = [0u8; GLOBAL_HEADER_LEN];
        inner
            .read_exact(&mut raw_header)
            .map_err(|_| CaptureError::ShortGlobalHeader)?;
        let (header, swapped) = PcapGlobalHeader::parse(&raw_header)?;

        info!(
            "opened capture {} (v{}.{}, snaplen {}, linktype {}{})",
            path.display(),
            header.version_major,
            header.version_minor,
            header.snaplen,
            header.network,
            if swapped { ", byte-swapped" } else { "" }
        );

        Ok(Self {
            inner,
            header,
            raw_header,
            swapped,
        })
    }

    pub fn header(&self) -> &PcapGlobalHeader {
        &self.header
    }

    /// The 24 header bytes exactly as stored on disk, for verbatim replay
    /// into the output.
    pub fn raw_header(&self) -> &[u8; GLOBAL_HEADER_LEN] {
        &self.raw_header
    }

    pub fn is_swapped(&self) -> bool {
        self.swapped
    }

    /// Read the next record. `Ok(None)` at clean end-of-stream; an error for
    /// a record whose captured length exceeds the snaplen or the 64 KiB
    /// ceiling, or for a truncated body.
    pub fn read_next(&mut self) -> Result<Option<RawFrame>, CaptureError> {
        let mut rec = [0u8; RECORD_HEADER_LEN];
        match self.inner.read_exact(&mut rec) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(CaptureError::Io(e)),
        }

        let field = |off: usize| {
            let v = u32::from_ne_bytes([rec[off], rec[off + 1], rec[off + 2], rec[off + 3]]);
            if self.swapped {
                v.swap_bytes()
            } else {
                v
            }
        };
        let ts_sec = field(0);
        let ts_usec = field(4);
        let incl_len = field(8);
        let orig_len = field(12);

        if incl_len > self.header.snaplen || incl_len > MAX_FRAME_LEN {
            return Err(CaptureError::OverlongRecord {
                incl_len,
                snaplen: self.header.snaplen,
            });
        }

        let mut data = vec![0u8; incl_len as usize];
        self.inner
            .read_exact(&mut data)
            .map_err(|_| CaptureError::TruncatedRecord(incl_len))?;

        Ok(Some(RawFrame {
            ts_sec,
            ts_usec,
            orig_len,
            data,
        }))
    }
}

/// Capture writer shared by whoever holds a reference. A record (header
/// plus body) is written inside one critical section, so concurrent
/// forwards never interleave on disk.
pub struct PcapWriter {
    sink: Mutex<BufWriter<File>>,
    swapped: bool,
}

impl PcapWriter {
    /// Create the output file and write the input's global header bytes
    /// verbatim. Record headers follow the same byte order as that header.
    pub fn create<P: AsRef<Path>>(
        path: P,
        raw_header: &[u8; GLOBAL_HEADER_LEN],
        swapped: bool,
    ) -> Result<Self, CaptureError> {
        let path = path.as_ref();
        let file = File::create(path)
            .map_err(|e| CaptureError::Open(path.display().to_string(), e))?;
        let mut sink = BufWriter::new(file);
        sink.write_all(raw_header).map_err(CaptureError::Io)?;
        Ok(Self {
            sink: Mutex::new(sink),
            swapped,
        })
    }

    /// Append one record: a fresh 16-byte header carrying the frame's
    /// capture timestamp, with incl_len = orig_len = data length.
    pub fn write_frame(&self, ts_sec: u32, ts_usec: u32, data: &[u8]) -> Result<(), CaptureError> {
        let len = data.len() as u32;
        let field = |v: u32| {
            if self.swapped {
                v.swap_bytes().to_ne_bytes()
            } else {
                v.to_ne_bytes()
            }
        };

        let mut rec = [0u8; RECORD_HEADER_LEN];
        rec[0..4].copy_from_slice(&field(ts_sec));
        rec[4..8].copy_from_slice(&field(ts_usec));
        rec[8..12].copy_from_slice(&field(len));
        rec[12..16].copy_from_slice(&field(len));

        let mut sink = self.sink.lock();
        sink.write_all(&rec).map_err(CaptureError::Io)?;
        sink.write_all(data).map_err(CaptureError::Io)?;
        Ok(())
    }

    pub fn flush(&self) -> Result<(), CaptureError> {
        self.sink.lock().flush().map_err(CaptureError::Io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use tempfile::NamedTempFile;

    fn sample_header() -> PcapGlobalHeader {
        PcapGlobalHeader {
            magic: PCAP_MAGIC_NATIVE,
            version_major: 2,
            version_minor: 4,
            thiszone: 0,
            sigfigs: 0,
            snaplen: 65_535,
            network: LINKTYPE_ETHERNET,
        }
    }

    fn write_capture(header: &PcapGlobalHeader, swapped: bool, frames: &[(u32, u32, &[u8])]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&header.encode(swapped)).unwrap();
        for (ts_sec, ts_usec, data) in frames {
            let field = |v: u32| {
                if swapped {
                    v.swap_bytes().to_ne_bytes()
                } else {
                    v.to_ne_bytes()
                }
            };
            file.write_all(&field(*ts_sec)).unwrap();
            file.write_all(&field(*ts_usec)).unwrap();
            file.write_all(&field(data.len() as u32)).unwrap();
            file.write_all(&field(data.len() as u32)).unwrap();
            file.write_all(data).unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[test]
    fn global_header_round_trips_both_byte_orders() {
        let header = sample_header();
        for swapped in [false, true] {
            let bytes = header.encode(swapped);
            let (parsed, parsed_swapped) = PcapGlobalHeader::parse(&bytes).unwrap();
            assert_eq!(parsed, header);
            assert_eq!(parsed_swapped, swapped);
            assert_eq!(parsed.encode(swapped), bytes);
        }
    }

    #[test]
    fn unknown_magic_is_rejected() {
        let mut bytes = sample_header().encode(false);
        bytes[0] = 0xde;
        bytes[1] = 0xad;
        assert!(matches!(
            PcapGlobalHeader::parse(&bytes),
            Err(CaptureError::BadMagic(_))
        ));
    }

    #[test]
    fn reads_frames_in_order() {
        let file = write_capture(
            &sample_header(),
            false,
            &[(10, 1, b"first"), (11, 2, b"second!")],
        );
        let mut reader = PcapReader::open(file.path()).unwrap();
        let a = reader.read_next().unwrap().unwrap();
        assert_eq!((a.ts_sec, a.ts_usec), (10, 1));
        assert_eq!(a.data, b"first");
        let b = reader.read_next().unwrap().unwrap();
        assert_eq!(b.data, b"second!");
        assert!(reader.read_next().unwrap().is_none());
    }

    #[test]
    fn swapped_capture_reads_identically() {
        let file = write_capture(&sample_header(), true, &[(99, 7, b"payload")]);
        let mut reader = PcapReader::open(file.path()).unwrap();
        assert!(reader.is_swapped());
        assert_eq!(reader.header().snaplen, 65_535);
        let frame = reader.read_next().unwrap().unwrap();
        assert_eq!((frame.ts_sec, frame.ts_usec), (99, 7));
        assert_eq!(frame.data, b"payload");
    }

    #[test]
    fn incl_len_above_snaplen_is_rejected() {
        let mut header = sample_header();
        header.snaplen = 4;
        let file = write_capture(&header, false, &[(0, 0, b"toolong")]);
        let mut reader = PcapReader::open(file.path()).unwrap();
        assert!(matches!(
            reader.read_next(),
            Err(CaptureError::OverlongRecord { .. })
        ));
    }

    #[test]
    fn incl_len_equal_to_max_snaplen_is_accepted() {
        let header = sample_header();
        let body = vec![0xabu8; MAX_FRAME_LEN as usize];
        let file = write_capture(&header, false, &[(1, 1, &body)]);
        let mut reader = PcapReader::open(file.path()).unwrap();
        let frame = reader.read_next().unwrap().unwrap();
        assert_eq!(frame.data.len(), MAX_FRAME_LEN as usize);
    }

    #[test]
    fn writer_replays_header_verbatim_and_appends_records() {
        let input = write_capture(&sample_header(), true, &[]);
        let reader = PcapReader::open(input.path()).unwrap();
        let raw = *reader.raw_header();

        let out = NamedTempFile::new().unwrap();
        let writer = PcapWriter::create(out.path(), &raw, reader.is_swapped()).unwrap();
        writer.write_frame(123, 456, b"abcdef").unwrap();
        writer.flush().unwrap();

        let mut rt = PcapReader::open(out.path()).unwrap();
        assert_eq!(rt.raw_header(), &raw);
        let frame = rt.read_next().unwrap().unwrap();
        assert_eq!((frame.ts_sec, frame.ts_usec), (123, 456));
        assert_eq!(frame.orig_len, 6);
        assert_eq!(frame.data, b"abcdef");
    }
}
