//! Outgoing channels keyed by destination root address.
//!
//! A channel holds up to `pool_width` connections to one destination and
//! hands them out round-robin. A send failure terminates the whole channel
//! so the next send dials again. Inbound connections join the channel of
//! the peer's root address, which lets replies ride the connection the
//! request arrived on.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use spacebus_link::LinkStream;
use spacebus_message::MessageHeader;
use tracing::{debug, warn};

use crate::binding::UnitWriter;
use crate::error::{Result, TransportError};

/// One physical connection usable for sending.
pub struct Connection {
    id: u64,
    peer: String,
    writer: Mutex<Box<dyn UnitWriter>>,
    stream: Option<LinkStream>,
    closed: AtomicBool,
}

impl Connection {
    /// `stream`, when given, is shut down on [`close`](Self::close) so the
    /// reader side of the connection wakes up too.
    pub fn new(
        id: u64,
        peer: impl Into<String>,
        writer: Box<dyn UnitWriter>,
        stream: Option<LinkStream>,
    ) -> Self {
        Self {
            id,
            peer: peer.into(),
            writer: Mutex::new(writer),
            stream,
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Write all units of one message back to back.
    pub fn send_units(&self, units: &[Bytes]) -> Result<()> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let mut writer = self.writer.lock();
        for unit in units {
            writer.write_unit(unit)?;
        }
        Ok(())
    }

    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(stream) = &self.stream {
            if let Err(err) = stream.shutdown() {
                debug!(connection = self.id, error = %err, "shutdown after close failed");
            }
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Dials new connections for a root address.
pub trait Connector: Send + Sync {
    fn connect(&self, root: &str) -> Result<Arc<Connection>>;
}

/// Connections to one destination root.
#[derive(Debug)]
pub struct Channel {
    root: String,
    senders: Mutex<Vec<Arc<Connection>>>,
    next: AtomicUsize,
    dead: AtomicBool,
}

impl Channel {
    fn new(root: &str) -> Self {
        Self {
            root: root.to_string(),
            senders: Mutex::new(Vec::new()),
            next: AtomicUsize::new(0),
            dead: AtomicBool::new(false),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.senders.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Acquire)
    }

    fn pick(&self) -> Option<Arc<Connection>> {
        if self.is_dead() {
            return None;
        }
        let senders = self.senders.lock();
        if senders.is_empty() {
            return None;
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed) % senders.len();
        Some(Arc::clone(&senders[index]))
    }

    fn kill(&self) {
        self.dead.store(true, Ordering::Release);
        for connection in self.senders.lock().drain(..) {
            connection.close();
        }
    }
}

/// Registry of outgoing channels.
pub struct ChannelManager {
    channels: Mutex<HashMap<String, Arc<Channel>>>,
    connector: Arc<dyn Connector>,
    pool_width: usize,
}

impl ChannelManager {
    pub fn new(connector: Arc<dyn Connector>, pool_width: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            connector,
            pool_width: pool_width.max(1),
        }
    }

    /// Channel for `root`, dialing until it holds `pool_width` connections.
    ///
    /// Dials happen without any lock held. Fails only when the channel ends
    /// up with no connection at all.
    pub fn get_or_create_channel(&self, root: &str) -> Result<Arc<Channel>> {
        loop {
            let channel = Arc::clone(
                self.channels
                    .lock()
                    .entry(root.to_string())
                    .or_insert_with(|| Arc::new(Channel::new(root))),
            );

            let missing = {
                let mut senders = channel.senders.lock();
                if channel.is_dead() {
                    continue;
                }
                senders.retain(|connection| !connection.is_closed());
                self.pool_width.saturating_sub(senders.len())
            };
            if missing == 0 {
                return Ok(channel);
            }

            let mut dialed = Vec::with_capacity(missing);
            let mut failure = None;
            for _ in 0..missing {
                match self.connector.connect(root) {
                    Ok(connection) => dialed.push(connection),
                    Err(err) => {
                        failure = Some(err);
                        break;
                    }
                }
            }

            let mut senders = channel.senders.lock();
            if channel.is_dead() {
                drop(senders);
                dialed.iter().for_each(|connection| connection.close());
                continue;
            }
            senders.retain(|connection| !connection.is_closed());
            for connection in dialed {
                if senders.len() < self.pool_width {
                    debug!(%root, connection = connection.id(), "channel connection added");
                    senders.push(connection);
                } else {
                    connection.close();
                }
            }
            if senders.is_empty() {
                drop(senders);
                self.remove_if_current(&channel);
                return Err(failure.unwrap_or(TransportError::Closed));
            }
            drop(senders);
            if let Some(err) = failure {
                warn!(%root, error = %err, "could not top up channel");
            }
            return Ok(channel);
        }
    }

    /// Send one message's units over `channel`.
    ///
    /// On failure the channel is terminated and the error carries the
    /// destination and the header of the message that failed.
    pub fn send(&self, channel: &Arc<Channel>, units: &[Bytes], header: &MessageHeader) -> Result<()> {
        let result = match channel.pick() {
            Some(connection) => connection.send_units(units),
            None => Err(TransportError::Closed),
        };
        result.map_err(|err| {
            warn!(
                root = %channel.root(),
                transaction_id = header.transaction_id,
                error = %err,
                "send failed, terminating channel"
            );
            self.terminate(channel);
            TransportError::Transmit {
                destination: channel.root().to_string(),
                header: Box::new(header.clone()),
                source: Box::new(err),
            }
        })
    }

    /// Close every connection of `channel` and forget it.
    pub fn terminate(&self, channel: &Arc<Channel>) {
        self.remove_if_current(channel);
        channel.kill();
        debug!(root = %channel.root(), "channel terminated");
    }

    /// Add an inbound connection to the channel of the peer's root.
    pub fn register_inbound(&self, root: &str, connection: Arc<Connection>) {
        let channel = Arc::clone(
            self.channels
                .lock()
                .entry(root.to_string())
                .or_insert_with(|| Arc::new(Channel::new(root))),
        );
        let mut senders = channel.senders.lock();
        if channel.is_dead() || senders.iter().any(|c| c.id() == connection.id()) {
            return;
        }
        debug!(%root, connection = connection.id(), "inbound connection registered");
        senders.push(connection);
    }

    /// Drop a broken connection from every channel.
    pub fn discard_connection(&self, id: u64) {
        let channels: Vec<Arc<Channel>> = self.channels.lock().values().cloned().collect();
        for channel in channels {
            let mut senders = channel.senders.lock();
            let before = senders.len();
            senders.retain(|c| c.id() != id);
            if before != senders.len() && senders.is_empty() {
                channel.dead.store(true, Ordering::Release);
                drop(senders);
                debug!(root = %channel.root(), "channel lost its last connection");
                self.remove_if_current(&channel);
            }
        }
    }

    pub fn get(&self, root: &str) -> Option<Arc<Channel>> {
        self.channels.lock().get(root).cloned()
    }

    pub fn roots(&self) -> Vec<String> {
        let mut roots: Vec<String> = self.channels.lock().keys().cloned().collect();
        roots.sort();
        roots
    }

    /// Terminate every channel.
    pub fn close_all(&self) {
        let channels: Vec<Arc<Channel>> = self.channels.lock().drain().map(|(_, c)| c).collect();
        for channel in channels {
            channel.kill();
        }
    }

    fn remove_if_current(&self, channel: &Arc<Channel>) {
        let mut channels = self.channels.lock();
        if channels
            .get(channel.root())
            .is_some_and(|current| Arc::ptr_eq(current, channel))
        {
            channels.remove(channel.root());
        }
    }
}
