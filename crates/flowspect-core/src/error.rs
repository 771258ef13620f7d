use flowspect_binary::BinaryError;
use std::io;
use thiserror::Error;

/// Errors raised while opening or walking a capture file. Only these are
/// fatal to a run; everything past the global header degrades to warnings.
#[derive(Error, Debug)]
pub enum CaptureError {
    /// The capture file could not be read at all.
    #[error("Capture I/O error: {0}")]
    Io(#[from] io::Error),

    /// The file does not start with a known pcap magic number.
    #[error("Not a pcap file (magic {0:#010x})")]
    BadMagic(u32),

    /// The global header is present but the link type is not Ethernet.
    #[error("Unsupported link type: {0}")]
    UnsupportedLinkType(u32),

    /// The global header itself is truncated or unreadable.
    #[error("Malformed capture header: {0}")]
    Header(#[from] BinaryError),
}

/// Errors raised while decoding a single frame. These are reported and the
/// frame is dropped; the analysis continues with the next record.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// The frame ends before the header it claims to carry.
    #[error("Truncated frame: {0}")]
    Truncated(#[from] BinaryError),

    /// A header field carries a value the decoder cannot work with.
    #[error("Malformed header: {0}")]
    Malformed(String),
}
