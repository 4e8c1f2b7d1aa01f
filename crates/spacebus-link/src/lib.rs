//! Physical link abstraction for spacebus.
//!
//! Provides a unified byte-stream type over the links the transport can
//! run on:
//! - TCP streams (ground segment, simulators, SPP-over-TCP bridges)
//! - Unix socket pairs (in-process loopback, tests)
//!
//! This is the lowest layer of spacebus. Framing, packet codecs and the
//! transport core all build on the [`LinkStream`] type provided here.

pub mod error;
pub mod stream;
pub mod tcp;

pub use error::{LinkError, Result};
pub use stream::LinkStream;
pub use tcp::{TcpLink, DEFAULT_CONNECT_TIMEOUT};
