//! Message transport for spacebus.
//!
//! A [`Transport`] owns a link listener, a registry of named endpoints, one
//! channel per remote root and a worker pool that delivers incoming messages
//! in order per transaction. Two bindings decide how messages look on the
//! wire: `maltcp` (length-prefixed frames over TCP) and `malspp` (CCSDS
//! Space Packets over a stream link).

pub mod binding;
pub mod catalog;
pub mod channel;
pub mod config;
pub mod dispatcher;
pub mod endpoint;
pub mod error;
pub mod malspp;
pub mod maltcp;
pub mod pool;
pub mod registry;
pub mod transport;

pub use binding::{Binding, MessageSource, UnitWriter};
pub use catalog::ContractCatalog;
pub use channel::{Channel, ChannelManager, Connection, Connector};
pub use config::{Protocol, SppConfig, TransportConfig};
pub use dispatcher::{error_reply, wants_error_reply, Dispatcher, MessageHandler};
pub use endpoint::{Endpoint, EndpointOwner, MessageReceiver};
pub use error::{Result, TransportError};
pub use malspp::SppBinding;
pub use maltcp::{StreamBinding, StreamMessageCodec};
pub use pool::{PoolConfig, WorkerPool};
pub use registry::{EndpointRegistry, EndpointState};
pub use transport::{Transport, TransportStats};
