//! Length-prefixed message framing for spacebus stream links.
//!
//! Stream links (`maltcp`) carry one encoded message per frame:
//! - A 2-byte magic number ("SB") for stream synchronization
//! - A 4-byte little-endian payload length
//!
//! A frame that ends early is reported as truncated, never handed out.

pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

pub use codec::{
    decode_frame, encode_frame, Frame, FrameConfig, FrameHeader, DEFAULT_MAX_PAYLOAD, HEADER_SIZE,
    MAGIC,
};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;
