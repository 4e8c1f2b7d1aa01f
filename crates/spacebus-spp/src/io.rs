//! Packet I/O over byte-stream links.
//!
//! Space Packets are self-delimiting: the primary header carries the length
//! of the rest of the packet, so no extra framing is needed.

use std::io::{ErrorKind, Read, Write};

use bytes::{Bytes, BytesMut};

use crate::error::{Result, SppError};
use crate::primary::{PrimaryHeader, PRIMARY_HEADER_SIZE};

/// Reads whole packets from any `Read` stream.
pub struct PacketReader<T> {
    inner: T,
}

impl<T: Read> PacketReader<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    /// Read the next packet (blocking).
    ///
    /// Returns `Err(SppError::ConnectionClosed)` on end-of-stream between
    /// packets; end-of-stream inside a packet is `Truncated`.
    pub fn read_packet(&mut self) -> Result<Bytes> {
        let mut header = [0u8; PRIMARY_HEADER_SIZE];
        let got = read_full(&mut self.inner, &mut header)?;
        if got == 0 {
            return Err(SppError::ConnectionClosed);
        }
        if got < PRIMARY_HEADER_SIZE {
            return Err(SppError::Truncated {
                needed: PRIMARY_HEADER_SIZE,
                available: got,
            });
        }

        let primary = PrimaryHeader::decode(&header)?;
        let total = primary.packet_length();
        let mut packet = BytesMut::zeroed(total);
        packet[..PRIMARY_HEADER_SIZE].copy_from_slice(&header);
        let got = read_full(&mut self.inner, &mut packet[PRIMARY_HEADER_SIZE..])?;
        if got < total - PRIMARY_HEADER_SIZE {
            return Err(SppError::Truncated {
                needed: total,
                available: PRIMARY_HEADER_SIZE + got,
            });
        }
        Ok(packet.freeze())
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

/// Fill `buf` unless end-of-stream comes first; returns bytes read.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(SppError::Io(err)),
        }
    }
    Ok(filled)
}

/// Writes whole packets to any `Write` stream.
pub struct PacketWriter<T> {
    inner: T,
}

impl<T: Write> PacketWriter<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    pub fn write_packet(&mut self, packet: &[u8]) -> Result<()> {
        let mut offset = 0;
        while offset < packet.len() {
            match self.inner.write(&packet[offset..]) {
                Ok(0) => return Err(SppError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(SppError::Io(err)),
            }
        }
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(SppError::Io(err)),
            }
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}
