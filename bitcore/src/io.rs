//! L0: low-level byte codec shared by the object model and pack codec.
//! Grounded byte-for-byte on the teacher crate's `io.rs`: git's varint
//! encodings (type-size encoding, negative-offset encoding, delta
//! copy-bitmap encoding) and the inline digest-while-streaming readers and
//! writers used throughout the pack/index code.

use std::io::{prelude::*, BufReader};

use crc32fast::Hasher as Crc32;
use sha1::{Digest, Sha1};

use crate::error::BitResult;
use crate::hash::Oid;

pub trait ReadExt: Read {
    fn read_u8(&mut self) -> BitResult<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn read_u16(&mut self) -> BitResult<u16> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }

    fn read_u32(&mut self) -> BitResult<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }

    fn read_u64(&mut self) -> BitResult<u64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(u64::from_be_bytes(buf))
    }

    fn read_oid(&mut self) -> BitResult<Oid> {
        let mut buf = [0u8; 20];
        self.read_exact(&mut buf)?;
        Ok(Oid::new(buf))
    }

    /// Git's "negative offset" varint used by `ofs_delta` records: each byte
    /// contributes 7 bits, most-significant-byte first, and every
    /// continuation byte after the first adds an implicit `+1` (this is
    /// what makes the encoding canonical — otherwise leading zero groups
    /// would be ambiguous).
    fn read_offset(&mut self) -> BitResult<u64> {
        let mut byte = self.read_u8()?;
        let mut value = (byte & 0x7f) as u64;
        while byte & 0x80 != 0 {
            byte = self.read_u8()?;
            value += 1;
            value = (value << 7) | (byte & 0x7f) as u64;
        }
        Ok(value)
    }

    /// Git's "size encoding": the first byte reserves `init_shift` high bits
    /// (beyond bit 0..3) for an embedded type tag read separately by the
    /// caller; remaining bits plus any continuation bytes (7 bits each,
    /// little-endian group order) form the value.
    fn read_le_varint_with_shift(&mut self, init_shift: u32) -> BitResult<(u64, u8)> {
        let first = self.read_u8()?;
        let mut value = (first & ((1 << init_shift) - 1)) as u64;
        let mut shift = init_shift;
        let mut byte = first;
        while byte & 0x80 != 0 {
            byte = self.read_u8()?;
            value |= ((byte & 0x7f) as u64) << shift;
            shift += 7;
        }
        Ok((value, first))
    }

    fn read_le_varint(&mut self) -> BitResult<u64> {
        Ok(self.read_le_varint_with_shift(7)?.0)
    }

    /// Delta copy-instruction bitmap decoding: `header`'s low 7 bits select
    /// which of up to 7 little-endian bytes follow, packed into a `u64`.
    fn read_le_packed(&mut self, header: u8) -> BitResult<u64> {
        let mut value: u64 = 0;
        for i in 0..7 {
            if header & (1 << i) != 0 {
                value |= (self.read_u8()? as u64) << (8 * i);
            }
        }
        Ok(value)
    }

    fn read_to_vec(&mut self) -> BitResult<Vec<u8>> {
        let mut buf = vec![];
        self.read_to_end(&mut buf)?;
        Ok(buf)
    }

    fn read_to_string_lossy(&mut self) -> BitResult<String> {
        let bytes = self.read_to_vec()?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl<R: Read + ?Sized> ReadExt for R {}

pub trait BufReadExt: BufRead {
    fn is_at_eof(&mut self) -> BitResult<bool> {
        Ok(self.fill_buf()?.is_empty())
    }

    /// Reads an ASCII decimal number up to (not including) `delim`.
    fn read_ascii_num(&mut self, delim: u8) -> BitResult<u64> {
        let mut buf = vec![];
        self.read_until(delim, &mut buf)?;
        if buf.last() == Some(&delim) {
            buf.pop();
        }
        let s = std::str::from_utf8(&buf)
            .map_err(|_| anyhow!("non-utf8 bytes where a decimal number was expected"))?;
        Ok(s.parse()?)
    }

    /// Reads an ASCII string up to (not including) `delim`.
    fn read_ascii_str(&mut self, delim: u8) -> BitResult<String> {
        let mut buf = vec![];
        self.read_until(delim, &mut buf)?;
        if buf.last() == Some(&delim) {
            buf.pop();
        }
        Ok(String::from_utf8(buf)?)
    }

    fn read_null_terminated(&mut self) -> BitResult<Vec<u8>> {
        let mut buf = vec![];
        self.read_until(0, &mut buf)?;
        if buf.last() == Some(&0) {
            buf.pop();
        }
        Ok(buf)
    }
}

impl<R: BufRead + ?Sized> BufReadExt for R {}

pub trait WriteExt: Write {
    fn write_u8(&mut self, v: u8) -> BitResult<()> {
        self.write_all(&[v])?;
        Ok(())
    }

    fn write_u16(&mut self, v: u16) -> BitResult<()> {
        self.write_all(&v.to_be_bytes())?;
        Ok(())
    }

    fn write_u32(&mut self, v: u32) -> BitResult<()> {
        self.write_all(&v.to_be_bytes())?;
        Ok(())
    }

    fn write_u64(&mut self, v: u64) -> BitResult<()> {
        self.write_all(&v.to_be_bytes())?;
        Ok(())
    }

    fn write_oid(&mut self, oid: &Oid) -> BitResult<()> {
        self.write_all(oid.as_bytes())?;
        Ok(())
    }

    /// Inverse of [`ReadExt::read_le_varint_with_shift`].
    fn write_le_varint_with_shift(&mut self, value: u64, tag: u8, init_shift: u32) -> BitResult<()> {
        let mask = (1u64 << init_shift) - 1;
        let mut rest = value >> init_shift;
        let mut first = tag | (value & mask) as u8;
        if rest != 0 {
            first |= 0x80;
        }
        self.write_u8(first)?;
        while rest != 0 {
            let mut byte = (rest & 0x7f) as u8;
            rest >>= 7;
            if rest != 0 {
                byte |= 0x80;
            }
            self.write_u8(byte)?;
        }
        Ok(())
    }

    fn write_le_varint(&mut self, value: u64) -> BitResult<()> {
        self.write_le_varint_with_shift(value, 0, 0)
    }

    /// Inverse of [`ReadExt::read_offset`].
    fn write_offset(&mut self, mut value: u64) -> BitResult<()> {
        let mut bytes = vec![(value & 0x7f) as u8];
        while value > 0x7f {
            value = (value >> 7) - 1;
            bytes.push(0x80 | (value & 0x7f) as u8);
        }
        bytes.reverse();
        self.write_all(&bytes)?;
        Ok(())
    }

    /// Inverse of [`ReadExt::read_le_packed`]: emits the header byte and the
    /// minimal set of little-endian bytes needed to represent `value`.
    fn write_le_packed(&mut self, value: u64) -> BitResult<u8> {
        let mut header = 0u8;
        let mut bytes = vec![];
        for i in 0..7 {
            let byte = (value >> (8 * i)) & 0xff;
            if byte != 0 {
                header |= 1 << i;
                bytes.push(byte as u8);
            }
        }
        self.write_all(&bytes)?;
        Ok(header)
    }
}

impl<W: Write + ?Sized> WriteExt for W {}

/// Wraps a reader, feeding every byte read through a SHA-1 digest as it
/// passes through — used to compute a pack's trailing checksum and a pack
/// index's self-checksum without buffering the whole stream twice.
pub struct HashReader<'a, R> {
    inner: &'a mut R,
    hasher: Sha1,
}

impl<'a, R: Read> HashReader<'a, R> {
    pub fn new(inner: &'a mut R) -> Self {
        Self { inner, hasher: Sha1::new() }
    }

    pub fn finalize_oid(self) -> Oid {
        Oid::new(self.hasher.finalize().into())
    }
}

impl<R: Read> Read for HashReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}

pub struct HashWriter<'a, W> {
    inner: &'a mut W,
    hasher: Sha1,
}

impl<'a, W: Write> HashWriter<'a, W> {
    pub fn new(inner: &'a mut W) -> Self {
        Self { inner, hasher: Sha1::new() }
    }

    pub fn finalize_oid(self) -> Oid {
        Oid::new(self.hasher.finalize().into())
    }
}

impl<W: Write> Write for HashWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// As [`HashReader`] but accumulating a CRC32 instead of a SHA-1, used while
/// decoding a pack record to recompute its index CRC without a second pass.
pub struct Crc32Reader<'a, R> {
    inner: &'a mut R,
    crc: Crc32,
}

impl<'a, R: Read> Crc32Reader<'a, R> {
    pub fn new(inner: &'a mut R) -> Self {
        Self { inner, crc: Crc32::new() }
    }

    pub fn finalize(self) -> u32 {
        self.crc.finalize()
    }
}

impl<R: Read> Read for Crc32Reader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.crc.update(&buf[..n]);
        Ok(n)
    }
}

pub fn buffered(reader: impl Read) -> BufReader<impl Read> {
    BufReader::new(reader)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn offset_varint_round_trips() {
        for &v in &[0u64, 1, 127, 128, 129, 16383, 16384, 1 << 40] {
            let mut buf = vec![];
            buf.write_offset(v).unwrap();
            let mut cursor = Cursor::new(buf);
            assert_eq!(cursor.read_offset().unwrap(), v, "round trip failed for {}", v);
        }
    }

    #[test]
    fn size_varint_round_trips_with_shift() {
        for &v in &[0u64, 1, 15, 16, 4095, 4096, 1 << 30] {
            let mut buf = vec![];
            buf.write_le_varint_with_shift(v, 0b011 << 4, 3).unwrap();
            let mut cursor = Cursor::new(buf);
            let (decoded, first) = cursor.read_le_varint_with_shift(3).unwrap();
            assert_eq!(decoded, v);
            assert_eq!((first >> 4) & 0b111, 0b011);
        }
    }

    #[test]
    fn packed_copy_bitmap_round_trips() {
        let value = 0x12_34_56_78u64;
        let mut buf = vec![];
        let header = buf.write_le_packed(value).unwrap();
        let mut cursor = Cursor::new(buf);
        assert_eq!(cursor.read_le_packed(header).unwrap(), value);
    }

    #[test]
    fn hash_reader_matches_one_shot_sha1() {
        let data = b"the quick brown fox";
        let mut cursor = Cursor::new(&data[..]);
        let mut hr = HashReader::new(&mut cursor);
        let mut out = vec![];
        hr.read_to_end(&mut out).unwrap();
        assert_eq!(hr.finalize_oid(), crate::hash::sha1(data));
    }
}
