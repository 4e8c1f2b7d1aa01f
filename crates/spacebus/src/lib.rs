//! Message transport over TCP streams and CCSDS Space Packets.
//!
//! spacebus moves addressed, transaction-tagged messages between named
//! endpoints. Messages travel either as length-prefixed frames over TCP
//! (`maltcp`) or as segmented Space Packets (`malspp`).
//!
//! # Crate Structure
//!
//! - [`link`] - Physical stream links (TCP, Unix socket pairs)
//! - [`frame`] - Length-prefixed framing for stream links
//! - [`message`] - Message header, body, URIs and element codec
//! - [`spp`] - Space Packet header codec, segmentation and reassembly (behind `spp` feature)
//! - [`transport`] - Endpoints, routing, channels and dispatch (behind `transport` feature)

/// Re-export link types.
pub mod link {
    pub use spacebus_link::*;
}

/// Re-export frame types.
pub mod frame {
    pub use spacebus_frame::*;
}

/// Re-export message model types.
pub mod message {
    pub use spacebus_message::*;
}

/// Re-export Space Packet types (requires `spp` feature).
#[cfg(feature = "spp")]
pub mod spp {
    pub use spacebus_spp::*;
}

/// Re-export transport types (requires `transport` feature).
#[cfg(feature = "transport")]
pub mod transport {
    pub use spacebus_transport::*;
}
