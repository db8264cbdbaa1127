//! pkt-line framing (spec §4.9): a 4-hex-digit length prefix, counting
//! itself, followed by the payload; `0000` is a flush, `0001` a delimiter,
//! `0002` a response-end, and every other value is `4..=65524` bytes of
//! text or binary payload. Grounded on the *shape* of the teacher crate's
//! `protocol.rs` (`BitProtocolRead`/`BitProtocolWrite` over
//! `tokio::io::Async{Read,Write}`); made synchronous over `std::io::Read`/
//! `Write` per spec §5's "pure format and algorithm code remains
//! synchronous" and DESIGN.md's wire divergence note.

use std::io::prelude::*;

use crate::error::{BitError, BitResult};

/// Total record length (4-digit hex prefix + payload) git allows.
pub const MAX_PKT_LINE_LEN: usize = 65524;
pub const MAX_PKT_LINE_PAYLOAD: usize = MAX_PKT_LINE_LEN - 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PktLine {
    Flush,
    Delim,
    ResponseEnd,
    Data(Vec<u8>),
}

impl PktLine {
    pub fn data(bytes: impl Into<Vec<u8>>) -> Self {
        Self::Data(bytes.into())
    }

    pub fn text(line: impl AsRef<str>) -> Self {
        let mut bytes = line.as_ref().as_bytes().to_vec();
        if !bytes.ends_with(b"\n") {
            bytes.push(b'\n');
        }
        Self::Data(bytes)
    }

    pub fn as_data(&self) -> Option<&[u8]> {
        match self {
            Self::Data(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn is_flush(&self) -> bool {
        matches!(self, Self::Flush)
    }
}

/// Encodes one pkt-line to its wire bytes.
pub fn encode(line: &PktLine) -> BitResult<Vec<u8>> {
    match line {
        PktLine::Flush => Ok(b"0000".to_vec()),
        PktLine::Delim => Ok(b"0001".to_vec()),
        PktLine::ResponseEnd => Ok(b"0002".to_vec()),
        PktLine::Data(payload) => {
            if payload.len() > MAX_PKT_LINE_PAYLOAD {
                return Err(BitError::PktLine(format!(
                    "payload of {} bytes exceeds the {} byte maximum",
                    payload.len(),
                    MAX_PKT_LINE_PAYLOAD
                ))
                .into());
            }
            let total = payload.len() + 4;
            let mut out = format!("{:04x}", total).into_bytes();
            out.extend_from_slice(payload);
            Ok(out)
        }
    }
}

/// Decodes exactly one pkt-line off the front of `reader`.
pub fn decode(reader: &mut impl BufRead) -> BitResult<PktLine> {
    let mut prefix = [0u8; 4];
    reader.read_exact(&mut prefix)?;
    let prefix_str = std::str::from_utf8(&prefix)
        .map_err(|_| BitError::PktLine("length prefix is not ASCII hex".to_owned()))?;
    let total = u32::from_str_radix(prefix_str, 16)
        .map_err(|_| BitError::PktLine(format!("invalid length prefix `{}`", prefix_str)))?
        as usize;

    match total {
        0 => Ok(PktLine::Flush),
        1 => Ok(PktLine::Delim),
        2 => Ok(PktLine::ResponseEnd),
        3 => Err(BitError::PktLine("length prefix `0003` is reserved".to_owned()).into()),
        _ => {
            if total > MAX_PKT_LINE_LEN {
                return Err(BitError::PktLine(format!(
                    "pkt-line length {} exceeds the {} byte maximum",
                    total, MAX_PKT_LINE_LEN
                ))
                .into());
            }
            let mut payload = vec![0u8; total - 4];
            reader.read_exact(&mut payload)?;
            Ok(PktLine::Data(payload))
        }
    }
}

/// Buffers whole pkt-lines off a reader, one [`decode`] call at a time.
pub struct PktLineReader<R> {
    inner: R,
}

impl<R: BufRead> PktLineReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn read_line(&mut self) -> BitResult<PktLine> {
        decode(&mut self.inner)
    }

    /// Reads data lines until a flush, returning their raw payloads.
    pub fn read_until_flush(&mut self) -> BitResult<Vec<Vec<u8>>> {
        let mut lines = vec![];
        loop {
            match self.read_line()? {
                PktLine::Flush => return Ok(lines),
                PktLine::Data(bytes) => lines.push(bytes),
                other => return Err(BitError::PktLine(format!("expected data or flush, found {:?}", other)).into()),
            }
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

pub struct PktLineWriter<W> {
    inner: W,
}

impl<W: Write> PktLineWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn write_line(&mut self, line: &PktLine) -> BitResult<()> {
        self.inner.write_all(&encode(line)?)?;
        Ok(())
    }

    pub fn write_data(&mut self, payload: impl Into<Vec<u8>>) -> BitResult<()> {
        self.write_line(&PktLine::Data(payload.into()))
    }

    pub fn write_text(&mut self, line: impl AsRef<str>) -> BitResult<()> {
        self.write_line(&PktLine::text(line))
    }

    pub fn write_flush(&mut self) -> BitResult<()> {
        self.write_line(&PktLine::Flush)
    }

    pub fn write_delim(&mut self) -> BitResult<()> {
        self.write_line(&PktLine::Delim)
    }

    pub fn flush(&mut self) -> BitResult<()> {
        self.inner.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    /// Borrows the underlying writer, for wrapping it in a second framer
    /// (e.g. a [`super::SidebandWriter`]) without giving up ownership of
    /// this one.
    pub fn inner_mut(&mut self) -> &mut W {
        &mut self.inner
    }
}
