//! Classic libpcap capture file reader. Yields timestamped link-layer frames
//! in file order; the analyzer never sees the file format.

use crate::error::CaptureError;
use bytes::{Buf, Bytes};
use flowspect_binary::{BinaryError, BinaryReader};
use log::warn;
use std::fs;
use std::path::Path;

const MAGIC_MICROS: u32 = 0xa1b2_c3d4;
const MAGIC_NANOS: u32 = 0xa1b2_3c4d;
const LINKTYPE_ETHERNET: u32 = 1;

/// A single capture record: seconds since the epoch and the captured frame.
#[derive(Debug, Clone)]
pub struct Record {
    pub ts: f64,
    pub frame: Bytes,
}

/// Reader over a classic pcap file held in memory. Offline analysis of
/// bounded traces, so the whole file is loaded up front.
pub struct Capture {
    buf: Bytes,
    swapped: bool,
    nanos: bool,
}

impl Capture {
    /// Opens a capture file and validates its global header. This is the only
    /// fatal failure point of a run.
    pub fn open(path: &Path) -> Result<Self, CaptureError> {
        let data = fs::read(path)?;
        Self::from_bytes(Bytes::from(data))
    }

    pub fn from_bytes(mut buf: Bytes) -> Result<Self, CaptureError> {
        let magic = buf.read_u32_be()?;
        let (swapped, nanos) = match magic {
            MAGIC_MICROS => (false, false),
            MAGIC_NANOS => (false, true),
            m if m.swap_bytes() == MAGIC_MICROS => (true, false),
            m if m.swap_bytes() == MAGIC_NANOS => (true, true),
            other => return Err(CaptureError::BadMagic(other)),
        };

        // version major/minor, thiszone, sigfigs, snaplen
        buf.skip(16)?;
        let linktype = read_u32(&mut buf, swapped)?;
        if linktype != LINKTYPE_ETHERNET {
            return Err(CaptureError::UnsupportedLinkType(linktype));
        }

        Ok(Self { buf, swapped, nanos })
    }

    /// Returns the next record, or `None` at end of file. A truncated final
    /// record ends the iteration with a warning rather than failing the run.
    pub fn next_record(&mut self) -> Option<Record> {
        if !self.buf.has_remaining() {
            return None;
        }
        match self.read_record() {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("capture ends with a truncated record: {e}");
                self.buf = Bytes::new();
                None
            }
        }
    }

    fn read_record(&mut self) -> Result<Record, BinaryError> {
        let ts_sec = read_u32(&mut self.buf, self.swapped)?;
        let ts_frac = read_u32(&mut self.buf, self.swapped)?;
        let incl_len = read_u32(&mut self.buf, self.swapped)?;
        let _orig_len = read_u32(&mut self.buf, self.swapped)?;

        let frame = self.buf.read_bytes(incl_len as usize)?;
        let frac = if self.nanos {
            f64::from(ts_frac) / 1e9
        } else {
            f64::from(ts_frac) / 1e6
        };
        Ok(Record { ts: f64::from(ts_sec) + frac, frame })
    }
}

impl Iterator for Capture {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        self.next_record()
    }
}

fn read_u32(buf: &mut Bytes, swapped: bool) -> Result<u32, BinaryError> {
    if swapped { buf.read_u32_le() } else { buf.read_u32_be() }
}
