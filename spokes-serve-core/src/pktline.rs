//! pkt-line framing for the v0/v1 smart transport.
//!
//! A pkt-line is a 4-hex-digit length followed by `length - 4` payload
//! bytes. A length of `0` is a flush packet, `4` is a heartbeat. Payloads
//! may end with `\n`; callers must not assume so.

use std::io::{Read, Write};

use bstr::BStr;

/// Maximum number of payload bytes a single pkt-line may carry.
pub const MAX_PAYLOAD: usize = 65516;

/// Size of the hex length header.
pub const HEADER_SIZE: usize = 4;

/// Largest acceptable value of the length header.
const MAX_PACKET: usize = HEADER_SIZE + MAX_PAYLOAD;

/// Errors produced while reading or writing pkt-lines.
#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    /// The 4-byte header was not valid hex, or named a length below the
    /// header size that is neither flush nor heartbeat.
    #[error("illformed pkt-line length {0:?}")]
    MalformedLength(String),
    /// The header named a length larger than any packet can be.
    #[error("invalid pkt-line length: {0}")]
    InvalidLength(usize),
    /// A payload handed to the writer exceeds [`MAX_PAYLOAD`].
    #[error("pkt-line payload of {0} bytes exceeds the maximum of {MAX_PAYLOAD}")]
    PayloadTooLarge(usize),
    /// EOF arrived in the middle of a packet.
    #[error("unexpected EOF while reading a pkt-line")]
    UnexpectedEof,
    #[error("pkt-line io: {0}")]
    Io(#[from] std::io::Error),
}

/// One framed unit read off the wire.
#[derive(Debug, PartialEq, Eq)]
pub enum Packet<'a> {
    /// A data packet. The slice aliases the reader's internal buffer and is
    /// valid until the next read.
    Data(&'a [u8]),
    /// The `0000` flush packet.
    Flush,
    /// The `0004` heartbeat packet.
    Heartbeat,
}

/// Reads pkt-lines from a byte stream.
///
/// The first data packet that contains a NUL byte is split there: the bytes
/// after the NUL become the peer's capability list (available through
/// [`capability_bytes`](Self::capability_bytes)) and the payload is truncated
/// at the NUL. Later packets are never split.
#[derive(Debug, Default)]
pub struct PacketReader {
    buf: Vec<u8>,
    capability_bytes: Option<Vec<u8>>,
}

impl PacketReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the next packet. Returns `Ok(None)` on a clean EOF at a packet
    /// boundary; EOF anywhere inside a packet is [`PacketError::UnexpectedEof`].
    pub fn read<'a>(&'a mut self, input: &mut dyn Read) -> Result<Option<Packet<'a>>, PacketError> {
        let mut header = [0u8; HEADER_SIZE];
        if !read_header(input, &mut header)? {
            return Ok(None);
        }

        let text = std::str::from_utf8(&header)
            .map_err(|_| PacketError::MalformedLength(String::from_utf8_lossy(&header).into_owned()))?;
        let length = usize::from_str_radix(text, 16)
            .map_err(|_| PacketError::MalformedLength(text.to_owned()))?;

        match length {
            0 => return Ok(Some(Packet::Flush)),
            4 => return Ok(Some(Packet::Heartbeat)),
            1..=3 => return Err(PacketError::MalformedLength(text.to_owned())),
            n if n > MAX_PACKET => return Err(PacketError::InvalidLength(n)),
            _ => {}
        }

        self.buf.resize(length - HEADER_SIZE, 0);
        input.read_exact(&mut self.buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                PacketError::UnexpectedEof
            } else {
                PacketError::Io(e)
            }
        })?;

        let mut end = self.buf.len();
        if self.capability_bytes.is_none() {
            if let Some(nul) = self.buf.iter().position(|&b| b == 0) {
                self.capability_bytes = Some(self.buf[nul + 1..].to_vec());
                end = nul;
            }
        }

        Ok(Some(Packet::Data(&self.buf[..end])))
    }

    /// The capability segment split off the first NUL-carrying packet, if
    /// one has been seen yet.
    pub fn capability_bytes(&self) -> Option<&[u8]> {
        self.capability_bytes.as_deref()
    }
}

/// Read the length header, distinguishing clean EOF (no bytes at all) from a
/// truncated header.
fn read_header(input: &mut dyn Read, header: &mut [u8; HEADER_SIZE]) -> Result<bool, PacketError> {
    let mut filled = 0;
    while filled < HEADER_SIZE {
        let n = input.read(&mut header[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(PacketError::UnexpectedEof);
        }
        filled += n;
    }
    Ok(true)
}

/// Writes pkt-lines to a byte stream.
pub struct PacketWriter<W> {
    inner: W,
}

impl<W: Write> PacketWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Access the wrapped writer, e.g. to emit raw bytes between packets.
    pub fn inner_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    /// Frame `data` as one pkt-line.
    ///
    /// Empty payloads are skipped entirely; per the pkt-line format,
    /// implementations SHOULD NOT send an empty pkt-line (`0004`).
    pub fn write_packet(&mut self, data: &[u8]) -> Result<(), PacketError> {
        if data.is_empty() {
            return Ok(());
        }
        if data.len() > MAX_PAYLOAD {
            return Err(PacketError::PayloadTooLarge(data.len()));
        }
        write!(self.inner, "{:04x}", HEADER_SIZE + data.len())?;
        self.inner.write_all(data)?;
        Ok(())
    }

    /// Emit the `0000` flush packet.
    pub fn write_flush(&mut self) -> Result<(), PacketError> {
        self.inner.write_all(b"0000")?;
        Ok(())
    }

    /// Frame `chunk` as a side-band packet on `band`.
    pub fn write_band(&mut self, band: crate::sideband::Band, chunk: &[u8]) -> Result<(), PacketError> {
        let mut payload = Vec::with_capacity(chunk.len() + 1);
        payload.push(band as u8);
        payload.extend_from_slice(chunk);
        self.write_packet(&payload)
    }

    pub fn flush(&mut self) -> Result<(), PacketError> {
        self.inner.flush()?;
        Ok(())
    }
}

impl<W> std::fmt::Debug for PacketWriter<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PacketWriter")
    }
}

/// Render a payload for diagnostics without assuming UTF-8.
pub fn display_payload(payload: &[u8]) -> &BStr {
    payload.into()
}
