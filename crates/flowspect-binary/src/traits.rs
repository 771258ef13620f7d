use crate::error::{BinaryError, Result};
use bytes::{Buf, BufMut, Bytes};

/// Checks if the buffer has enough remaining bytes and returns an error if not.
macro_rules! check_remaining {
    ($buf:expr, $len:expr) => {
        let needed = $len;
        let remaining = $buf.remaining();
        if remaining < needed {
            return Err(BinaryError::UnexpectedEof { needed, remaining });
        }
    };
}

/// Extension trait for `bytes::Buf` providing checked reads of the types used
/// in capture and protocol headers.
pub trait BinaryReader: Buf {
    /// Reads a single `u8` byte.
    #[inline]
    fn read_u8(&mut self) -> Result<u8> {
        check_remaining!(self, 1);
        Ok(self.get_u8())
    }

    /// Reads an `i8` byte.
    #[inline]
    fn read_i8(&mut self) -> Result<i8> {
        check_remaining!(self, 1);
        Ok(self.get_i8())
    }

    // --- Big Endian (network order) ---

    /// Reads a `u16` in big-endian format.
    #[inline]
    fn read_u16_be(&mut self) -> Result<u16> {
        check_remaining!(self, 2);
        Ok(self.get_u16())
    }

    /// Reads a `u32` in big-endian format.
    #[inline]
    fn read_u32_be(&mut self) -> Result<u32> {
        check_remaining!(self, 4);
        Ok(self.get_u32())
    }

    /// Reads a `u64` in big-endian format.
    #[inline]
    fn read_u64_be(&mut self) -> Result<u64> {
        check_remaining!(self, 8);
        Ok(self.get_u64())
    }

    // --- Little Endian (pcap headers from little-endian writers) ---

    /// Reads a `u16` in little-endian format.
    #[inline]
    fn read_u16_le(&mut self) -> Result<u16> {
        check_remaining!(self, 2);
        Ok(self.get_u16_le())
    }

    /// Reads a `u32` in little-endian format.
    #[inline]
    fn read_u32_le(&mut self) -> Result<u32> {
        check_remaining!(self, 4);
        Ok(self.get_u32_le())
    }

    // --- Slices ---

    /// Reads a byte slice with a fixed length.
    /// Returns a `Bytes` slice which avoids copying when possible.
    #[inline]
    fn read_bytes(&mut self, len: usize) -> Result<Bytes> {
        check_remaining!(self, len);
        Ok(self.copy_to_bytes(len))
    }

    /// Advances past `len` bytes, erroring if the buffer is too short.
    #[inline]
    fn skip(&mut self, len: usize) -> Result<()> {
        check_remaining!(self, len);
        self.advance(len);
        Ok(())
    }

    /// Reads the remaining bytes in the buffer.
    #[inline]
    fn read_remaining_bytes(&mut self) -> Bytes {
        self.copy_to_bytes(self.remaining())
    }
}

// Implement the trait for all types that implement `Buf`.
impl<T: Buf> BinaryReader for T {}

/// Extension trait for `bytes::BufMut` providing the matching writes. Mostly
/// exercised by test fixtures that assemble frames and capture files.
pub trait BinaryWriter: BufMut {
    /// Writes a single `u8` byte.
    #[inline]
    fn write_u8(&mut self, value: u8) -> Result<()> {
        self.put_u8(value);
        Ok(())
    }

    /// Writes a `u16` in big-endian format.
    #[inline]
    fn write_u16_be(&mut self, value: u16) -> Result<()> {
        self.put_u16(value);
        Ok(())
    }

    /// Writes a `u32` in big-endian format.
    #[inline]
    fn write_u32_be(&mut self, value: u32) -> Result<()> {
        self.put_u32(value);
        Ok(())
    }

    /// Writes a `u64` in big-endian format.
    #[inline]
    fn write_u64_be(&mut self, value: u64) -> Result<()> {
        self.put_u64(value);
        Ok(())
    }

    /// Writes a `u16` in little-endian format.
    #[inline]
    fn write_u16_le(&mut self, value: u16) -> Result<()> {
        self.put_u16_le(value);
        Ok(())
    }

    /// Writes a `u32` in little-endian format.
    #[inline]
    fn write_u32_le(&mut self, value: u32) -> Result<()> {
        self.put_u32_le(value);
        Ok(())
    }

    /// Writes a raw byte slice (without length prefix).
    #[inline]
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.put_slice(bytes);
        Ok(())
    }
}

// Implement the trait for all types that implement `BufMut`.
impl<T: BufMut> BinaryWriter for T {}
