//! ## Byte and bit utilities
//!
//! Endian reads over byte slices with bounds checking, the two checksums the
//! container formats care about, and a bit-level cursor over a packed track
//! buffer.  Everything here is pure; the codec kernels and the format
//! plugins are the only callers.

use bit_vec::BitVec;
use crate::{Error,Result};

/// Read a little-endian u16 at `off`, `FormatTruncated` if short.
pub fn u16_le(buf: &[u8],off: usize) -> Result<u16> {
    match buf.get(off..off+2) {
        Some(s) => Ok(u16::from_le_bytes([s[0],s[1]])),
        None => Err(Error::FormatTruncated)
    }
}

/// Read a big-endian u16 at `off`, `FormatTruncated` if short.
pub fn u16_be(buf: &[u8],off: usize) -> Result<u16> {
    match buf.get(off..off+2) {
        Some(s) => Ok(u16::from_be_bytes([s[0],s[1]])),
        None => Err(Error::FormatTruncated)
    }
}

/// Read a little-endian u32 at `off`, `FormatTruncated` if short.
pub fn u32_le(buf: &[u8],off: usize) -> Result<u32> {
    match buf.get(off..off+4) {
        Some(s) => Ok(u32::from_le_bytes([s[0],s[1],s[2],s[3]])),
        None => Err(Error::FormatTruncated)
    }
}

/// Read a big-endian u32 at `off`, `FormatTruncated` if short.
pub fn u32_be(buf: &[u8],off: usize) -> Result<u32> {
    match buf.get(off..off+4) {
        Some(s) => Ok(u32::from_be_bytes([s[0],s[1],s[2],s[3]])),
        None => Err(Error::FormatTruncated)
    }
}

/// Bounds-checked slice, `FormatTruncated` if the range runs off the end.
pub fn slice(buf: &[u8],off: usize,len: usize) -> Result<&[u8]> {
    buf.get(off..off+len).ok_or(Error::FormatTruncated)
}

/// CRC-16/CCITT: poly 0x1021, no reflection, xorout 0.  The caller picks the
/// seed; MFM/FM address and data fields use 0xFFFF and include the sync
/// marks, so a field followed by its own CRC folds to zero.
pub fn crc16_ccitt(seed: u16,dat: &[u8]) -> u16 {
    let mut crc = seed;
    for byte in dat {
        crc ^= (*byte as u16) << 8;
        for _bit in 0..8 {
            crc = match crc & 0x8000 {
                0 => crc << 1,
                _ => (crc << 1) ^ 0x1021
            };
        }
    }
    crc
}

/// CRC-32 as used by ZIP containers: reflected 0xEDB88320, init and final
/// xor 0xFFFFFFFF.
pub fn crc32(dat: &[u8]) -> u32 {
    let mut h = crc32fast::Hasher::new();
    h.update(dat);
    h.finalize()
}

/// Cursor over a packed bit stream, MSB first within each source byte.  The
/// stream is treated as circular, matching one disk revolution; padding bits
/// beyond `bit_count` are truncated away and never served.
pub struct BitReader {
    stream: BitVec,
    ptr: usize,
}

impl BitReader {
    /// `bit_count` may be less than `buf.len()*8` to mask out padding.
    pub fn new(buf: &[u8],bit_count: usize) -> Self {
        let mut stream = BitVec::from_bytes(buf);
        stream.truncate(bit_count);
        Self { stream, ptr: 0 }
    }
    pub fn bit_count(&self) -> usize {
        self.stream.len()
    }
    pub fn pos(&self) -> usize {
        self.ptr
    }
    pub fn set_pos(&mut self,bit: usize) {
        if self.stream.len() > 0 {
            self.ptr = bit % self.stream.len();
        }
    }
    /// next bit with wraparound
    pub fn next(&mut self) -> u8 {
        let ans = self.stream[self.ptr] as u8;
        self.ptr += 1;
        if self.ptr >= self.stream.len() {
            self.ptr = 0;
        }
        ans
    }
    /// read `n` bits MSB first into a usize, n <= 32
    pub fn get(&mut self,n: usize) -> usize {
        let mut ans = 0;
        for _i in 0..n {
            ans = (ans << 1) | self.next() as usize;
        }
        ans
    }
}

/// Bit-level writer that appends MSB first into a growing stream.
pub struct BitWriter {
    stream: BitVec,
}

impl BitWriter {
    pub fn new() -> Self {
        Self { stream: BitVec::new() }
    }
    pub fn bit_len(&self) -> usize {
        self.stream.len()
    }
    pub fn push(&mut self,bit: u8) {
        self.stream.push(bit != 0);
    }
    /// append the low `n` bits of `val`, MSB first
    pub fn put(&mut self,val: usize,n: usize) {
        for i in (0..n).rev() {
            self.stream.push((val >> i) & 1 != 0);
        }
    }
    /// consume the writer, returning (packed bytes, bit count);
    /// the last byte is zero padded
    pub fn finish(self) -> (Vec<u8>,usize) {
        let count = self.stream.len();
        (self.stream.to_bytes(),count)
    }
}

impl Default for BitWriter {
    fn default() -> Self {
        Self::new()
    }
}
