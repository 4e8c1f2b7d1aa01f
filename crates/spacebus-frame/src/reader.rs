use std::io::{BufReader, ErrorKind, Read};

use bytes::{Bytes, BytesMut};
use spacebus_link::{LinkError, LinkStream};
use tracing::trace;

use crate::codec::{Frame, FrameConfig, FrameHeader, HEADER_SIZE};
use crate::error::{FrameError, Result};

const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Pulls one encoded message per frame off a byte stream.
///
/// The prefix is read first and checked against `max_payload_size`, so an
/// oversized or out-of-sync frame is refused before its payload is read.
pub struct FrameReader<T> {
    inner: BufReader<T>,
    config: FrameConfig,
    frames: u64,
}

impl<T: Read> FrameReader<T> {
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner: BufReader::with_capacity(READ_BUFFER_SIZE, inner),
            config,
            frames: 0,
        }
    }

    /// Block until the next whole frame is in.
    ///
    /// End of stream between frames is [`FrameError::ConnectionClosed`];
    /// inside a frame it is [`FrameError::Truncated`].
    pub fn read_frame(&mut self) -> Result<Frame> {
        let mut prefix = [0u8; HEADER_SIZE];
        match self.fill(&mut prefix)? {
            0 => return Err(FrameError::ConnectionClosed),
            HEADER_SIZE => {}
            received => {
                return Err(FrameError::Truncated {
                    expected: HEADER_SIZE,
                    received,
                })
            }
        }
        let header = FrameHeader::parse(&prefix)?.ok_or(FrameError::Truncated {
            expected: HEADER_SIZE,
            received: prefix.len(),
        })?;
        let payload_len = header.check(self.config.max_payload_size)?;

        let payload = if payload_len == 0 {
            Bytes::new()
        } else {
            let mut payload = BytesMut::zeroed(payload_len);
            let received = self.fill(&mut payload)?;
            if received < payload_len {
                return Err(FrameError::Truncated {
                    expected: HEADER_SIZE + payload_len,
                    received: HEADER_SIZE + received,
                });
            }
            payload.freeze()
        };

        self.frames += 1;
        trace!(payload_len, frame = self.frames, "frame read");
        Ok(Frame::new(payload))
    }

    /// Frames read so far.
    pub fn frames_read(&self) -> u64 {
        self.frames
    }

    pub fn get_ref(&self) -> &T {
        self.inner.get_ref()
    }

    /// Bytes already buffered past the last frame are lost.
    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    fn fill(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
        Ok(filled)
    }
}

impl FrameReader<LinkStream> {
    /// Reader over a link, with the link's read timeout taken from `config`.
    pub fn with_config_link(inner: LinkStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(link_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

pub(crate) fn link_to_frame_error(err: LinkError) -> FrameError {
    match err {
        LinkError::Io(io) | LinkError::Accept(io) => FrameError::Io(io),
        LinkError::Bind { source, .. } | LinkError::Connect { source, .. } => FrameError::Io(source),
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}
