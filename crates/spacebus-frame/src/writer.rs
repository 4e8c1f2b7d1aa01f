use std::io::{ErrorKind, IoSlice, Write};

use spacebus_link::LinkStream;
use tracing::trace;

use crate::codec::{Frame, FrameConfig, FrameHeader};
use crate::error::{FrameError, Result};
use crate::reader::link_to_frame_error;

/// Puts one encoded message per frame onto a byte stream.
///
/// The prefix and the payload go out through vectored writes, so the
/// payload is never copied into a staging buffer.
pub struct FrameWriter<T> {
    inner: T,
    config: FrameConfig,
    frames: u64,
}

impl<T: Write> FrameWriter<T> {
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            config,
            frames: 0,
        }
    }

    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.send(&frame.payload)
    }

    /// Frame `payload`, write it whole and flush.
    pub fn send(&mut self, payload: &[u8]) -> Result<()> {
        let header = FrameHeader::for_payload(payload.len(), self.config.max_payload_size)?;
        let prefix = header.to_bytes();

        let total = prefix.len() + payload.len();
        let mut written = 0;
        while written < total {
            let result = match written.checked_sub(prefix.len()) {
                None => self.inner.write_vectored(&[
                    IoSlice::new(&prefix[written..]),
                    IoSlice::new(payload),
                ]),
                Some(offset) => self.inner.write(&payload[offset..]),
            };
            match result {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => written += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
        self.flush()?;

        self.frames += 1;
        trace!(payload_len = payload.len(), frame = self.frames, "frame written");
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Frames written so far.
    pub fn frames_written(&self) -> u64 {
        self.frames
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl FrameWriter<LinkStream> {
    /// Writer over a link, with the link's write timeout taken from `config`.
    pub fn with_config_link(inner: LinkStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_write_timeout(config.write_timeout)
            .map_err(link_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}
