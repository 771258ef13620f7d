//! # Flowspect Binary Utilities
//!
//! Reading and writing helpers on top of the `bytes` crate, used for parsing
//! capture files and protocol headers without panicking on short input.
//!
//! Network headers are big-endian; pcap file headers follow the byte order of
//! the machine that wrote the file, so both orders are provided.

pub mod error;
pub mod traits;

pub use error::BinaryError;
pub use traits::{BinaryReader, BinaryWriter};
