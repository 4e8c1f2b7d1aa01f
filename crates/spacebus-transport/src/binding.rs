//! Seam between the link-independent transport core and a wire protocol.

use bytes::Bytes;
use spacebus_link::LinkStream;
use spacebus_message::{Message, Uri};

use crate::config::Protocol;
use crate::error::Result;

/// Writes encoded wire units (frames or packets) to one connection.
pub trait UnitWriter: Send {
    fn write_unit(&mut self, unit: &[u8]) -> Result<()>;
}

/// Reads whole messages from one connection.
pub trait MessageSource: Send {
    /// Block until the next complete message.
    ///
    /// `TransportError::Decoding` means the connection can no longer be
    /// trusted; other errors mean it is closed or broken.
    fn next_message(&mut self) -> Result<Message>;
}

/// Addressing and codec rules of one link protocol.
pub trait Binding: Send + Sync + 'static {
    fn protocol(&self) -> Protocol;

    /// Root address of this transport, e.g. `maltcp://127.0.0.1:4000`.
    fn own_root(&self) -> &str;

    /// Root address a message for `uri` travels to.
    fn root_of(&self, uri: &Uri) -> Result<String>;

    /// Key under which the endpoint for `uri` is registered locally.
    fn routing_key(&self, uri: &Uri) -> Result<String>;

    /// Pick a routing name for a new endpoint.
    fn routing_name(&self, local_name: &str, taken: &dyn Fn(&str) -> bool) -> Result<String>;

    /// Full URI of a local endpoint.
    fn endpoint_uri(&self, routing_name: &str) -> Result<Uri>;

    /// Link address to dial for `root`.
    fn link_address(&self, root: &str) -> Result<String>;

    /// Encode `message` into wire units ready for one connection.
    fn encode(&self, message: &Message) -> Result<Vec<Bytes>>;

    /// Split a connected stream into its sending and receiving halves.
    fn open_stream(&self, stream: LinkStream) -> Result<(Box<dyn UnitWriter>, Box<dyn MessageSource>)>;
}
