use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use spacebus_link::{LinkError, LinkStream, TcpLink};
use spacebus_message::{ElementCodec, Message, MessageHeader, OperationId, QosProperties, Uri};
use tracing::{debug, info, trace, warn};

use crate::binding::{Binding, MessageSource};
use crate::catalog::ContractCatalog;
use crate::channel::{ChannelManager, Connection, Connector};
use crate::config::{Protocol, TransportConfig};
use crate::dispatcher::{error_reply, wants_error_reply, Dispatcher, MessageHandler};
use crate::endpoint::{Endpoint, EndpointOwner};
use crate::error::{Result, TransportError};
use crate::malspp::SppBinding;
use crate::maltcp::StreamBinding;
use crate::pool::{PoolConfig, WorkerPool};
use crate::registry::{EndpointRegistry, EndpointState};

/// Point-in-time counters for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransportStats {
    pub root: String,
    pub endpoints: usize,
    pub connections: usize,
    pub accepted: u64,
    pub dialed: u64,
    pub in_process: u64,
    pub channels: Vec<String>,
    pub active_transactions: usize,
}

/// A running transport: link listener, endpoints, channels and dispatcher.
///
/// Dropping the transport closes it.
pub struct Transport {
    inner: Arc<Inner>,
}

struct Inner {
    config: TransportConfig,
    binding: Arc<dyn Binding>,
    registry: EndpointRegistry,
    channels: ChannelManager,
    dispatcher: Dispatcher,
    pool: WorkerPool,
    catalog: ContractCatalog,
    link: Arc<TcpLink>,
    accept_thread: Mutex<Option<JoinHandle<()>>>,
    connections: Mutex<HashMap<u64, Arc<Connection>>>,
    next_connection: AtomicU64,
    next_transaction: AtomicU64,
    accepted: AtomicU64,
    dialed: AtomicU64,
    in_process: AtomicU64,
    closed: AtomicBool,
    this: Weak<Inner>,
}

impl Transport {
    /// Bind the link listener and start accepting connections.
    pub fn open(config: TransportConfig, elements: Arc<dyn ElementCodec>) -> Result<Self> {
        config.validate()?;
        let link = Arc::new(TcpLink::bind(&config.listen)?);
        let binding: Arc<dyn Binding> = match config.protocol {
            Protocol::Maltcp => Arc::new(StreamBinding::new(link.local_addr(), elements, &config)),
            Protocol::Malspp => Arc::new(SppBinding::new(&config, elements)?),
        };
        let pool = WorkerPool::new(PoolConfig {
            max: config.workers_max,
            min: config.workers_min,
            idle_timeout: config.worker_idle_timeout(),
        });

        let inner = Arc::new_cyclic(|this: &Weak<Inner>| {
            let handler: Weak<dyn MessageHandler> = this.clone();
            let connector: Arc<dyn Connector> = Arc::new(Dialer(this.clone()));
            Inner {
                channels: ChannelManager::new(connector, config.pool_width),
                dispatcher: Dispatcher::new(pool.clone(), handler),
                config,
                binding,
                registry: EndpointRegistry::new(),
                pool,
                catalog: ContractCatalog::new(),
                link: Arc::clone(&link),
                accept_thread: Mutex::new(None),
                connections: Mutex::new(HashMap::new()),
                next_connection: AtomicU64::new(0),
                next_transaction: AtomicU64::new(1),
                accepted: AtomicU64::new(0),
                dialed: AtomicU64::new(0),
                in_process: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                this: this.clone(),
            }
        });

        let weak = Arc::downgrade(&inner);
        let handle = thread::Builder::new()
            .name("spacebus-accept".into())
            .spawn(move || accept_loop(&link, &weak))
            .map_err(LinkError::from)?;
        *inner.accept_thread.lock() = Some(handle);

        info!(
            protocol = %inner.binding.protocol(),
            root = %inner.binding.own_root(),
            listen = %inner.link.local_addr(),
            "transport open"
        );
        Ok(Self { inner })
    }

    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    pub fn protocol(&self) -> Protocol {
        self.inner.binding.protocol()
    }

    /// Root address endpoints of this transport are reached at.
    pub fn root(&self) -> &str {
        self.inner.binding.own_root()
    }

    /// Address the link listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.link.local_addr()
    }

    /// Endpoint registered as `local_name`, created if needed.
    ///
    /// An empty name gets a random one.
    pub fn create_endpoint(&self, local_name: &str, qos: QosProperties) -> Result<Endpoint> {
        self.inner.ensure_open()?;
        let local_name = if local_name.is_empty() {
            self.inner.generate_name()
        } else {
            local_name.to_string()
        };

        let binding = &self.inner.binding;
        let (state, created) = self.inner.registry.get_or_create(&local_name, |taken| {
            let routing_name = binding.routing_name(&local_name, taken)?;
            let uri = binding.endpoint_uri(&routing_name)?;
            Ok(EndpointState::new(local_name.clone(), routing_name, uri, qos))
        })?;
        if created {
            info!(endpoint = %state.uri(), local_name = %state.local_name(), "endpoint created");
        }
        Ok(self.inner.endpoint(state))
    }

    /// Look up an endpoint by local name, routing name or URI.
    pub fn get_endpoint(&self, name_or_uri: &str) -> Option<Endpoint> {
        let state = match Uri::parse(name_or_uri) {
            Ok(uri) => {
                if self.inner.binding.root_of(&uri).ok()? != self.inner.binding.own_root() {
                    return None;
                }
                let key = self.inner.binding.routing_key(&uri).ok()?;
                self.inner.registry.by_routing(&key)
            }
            Err(_) => self
                .inner
                .registry
                .by_local(name_or_uri)
                .or_else(|| self.inner.registry.by_routing(name_or_uri)),
        }?;
        Some(self.inner.endpoint(state))
    }

    /// Unregister and close an endpoint; `false` if it did not exist.
    pub fn delete_endpoint(&self, local_name: &str) -> bool {
        self.inner.delete_endpoint(local_name)
    }

    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.inner
            .registry
            .list()
            .into_iter()
            .map(|state| self.inner.endpoint(state))
            .collect()
    }

    /// Route `message` to its destination.
    pub fn send(&self, message: Message) -> Result<()> {
        self.inner.send(message)
    }

    pub fn next_transaction_id(&self) -> u64 {
        self.inner.next_transaction.fetch_add(1, Ordering::Relaxed)
    }

    /// Declare a served operation. Once any is declared, incoming messages
    /// for undeclared ones are refused.
    pub fn register_contract(&self, operation: OperationId) -> bool {
        self.inner.catalog.register(operation)
    }

    /// Adopt an already-connected stream.
    ///
    /// With `peer_root` the stream also serves sends to that root; otherwise
    /// it joins the peer's channel once the first message arrives on it.
    pub fn connect_stream(&self, stream: LinkStream, peer_root: Option<&str>) -> Result<()> {
        let connection = self.inner.adopt(stream)?;
        if let Some(root) = peer_root {
            self.inner.channels.register_inbound(root, connection);
        }
        Ok(())
    }

    pub fn stats(&self) -> TransportStats {
        let inner = &self.inner;
        TransportStats {
            root: inner.binding.own_root().to_string(),
            endpoints: inner.registry.len(),
            connections: inner.connections.lock().len(),
            accepted: inner.accepted.load(Ordering::Relaxed),
            dialed: inner.dialed.load(Ordering::Relaxed),
            in_process: inner.in_process.load(Ordering::Relaxed),
            channels: inner.channels.roots(),
            active_transactions: inner.dispatcher.active_transactions(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Close endpoints, drain the worker pool, terminate channels and stop
    /// accepting. Later calls do nothing.
    pub fn close(&self) -> Result<()> {
        self.inner.close();
        Ok(())
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.inner.close();
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("root", &self.root())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Inner {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }

    fn endpoint(&self, state: Arc<EndpointState>) -> Endpoint {
        let owner: Weak<dyn EndpointOwner> = self.this.clone();
        Endpoint::new(state, owner, self.config.listener_capacity)
    }

    fn generate_name(&self) -> String {
        loop {
            let name = format!("ep-{:08x}", rand::random::<u32>());
            if !self.registry.contains_local(&name) {
                return name;
            }
        }
    }

    fn send(&self, message: Message) -> Result<()> {
        self.ensure_open()?;
        message.header.validate_stage()?;
        let root = self.binding.root_of(&message.header.uri_to)?;

        if self.config.fastpath && root == self.binding.own_root() {
            let key = self.binding.routing_key(&message.header.uri_to)?;
            if self.registry.contains_routing(&key) {
                trace!(
                    transaction_id = message.header.transaction_id,
                    uri_to = %message.header.uri_to,
                    "in-process delivery"
                );
                self.in_process.fetch_add(1, Ordering::Relaxed);
                return self.receive(message);
            }
        }

        let units = self.binding.encode(&message)?;
        self.log_units(&root, &message.header, &units);
        let channel = self
            .channels
            .get_or_create_channel(&root)
            .map_err(|err| TransportError::Transmit {
                destination: root.clone(),
                header: Box::new(message.header.clone()),
                source: Box::new(err),
            })?;
        self.channels.send(&channel, &units, &message.header)
    }

    fn log_units(&self, root: &str, header: &MessageHeader, units: &[Bytes]) {
        let transaction_id = header.transaction_id;
        if self.config.debug_full_payload {
            for (index, unit) in units.iter().enumerate() {
                debug!(%root, transaction_id, index, unit = %hex::encode(unit), "sending unit");
            }
        } else {
            let bytes: usize = units.iter().map(Bytes::len).sum();
            debug!(%root, transaction_id, units = units.len(), bytes, "sending message");
        }
    }

    /// Entry point for every decoded or in-process message.
    fn receive(&self, message: Message) -> Result<()> {
        let header = &message.header;
        if let Err(err) = self.catalog.check(header.operation_id()) {
            warn!(
                transaction_id = header.transaction_id,
                operation = %header.operation_id(),
                "message for unsupported contract"
            );
            if wants_error_reply(header) {
                let reply = error_reply(header, err.error_number(), err.to_string());
                if let Err(send_err) = self.send(reply) {
                    warn!(error = %send_err, "error reply could not be sent");
                }
            }
            return Err(err);
        }
        self.dispatcher.dispatch(message)
    }

    /// Wrap a connected stream and start its reception thread.
    fn adopt(&self, stream: LinkStream) -> Result<Arc<Connection>> {
        self.ensure_open()?;
        let id = self.next_connection.fetch_add(1, Ordering::Relaxed) + 1;
        let peer = stream.peer_label();
        let control = stream.try_clone()?;
        let (writer, source) = self.binding.open_stream(stream)?;
        let connection = Arc::new(Connection::new(id, peer, writer, Some(control)));
        self.connections.lock().insert(id, Arc::clone(&connection));

        let weak = self.this.clone();
        let reader = Arc::clone(&connection);
        let spawned = thread::Builder::new()
            .name(format!("spacebus-rx-{id}"))
            .spawn(move || reception_loop(&weak, &reader, source));
        if let Err(err) = spawned {
            self.connections.lock().remove(&id);
            connection.close();
            return Err(LinkError::from(err).into());
        }
        if self.is_closed() {
            connection.close();
        }
        debug!(connection = id, peer = %connection.peer(), "connection adopted");
        Ok(connection)
    }

    fn delete_endpoint(&self, local_name: &str) -> bool {
        match self.registry.remove(local_name) {
            Some(state) => {
                state.set_active(false);
                state.set_listener(None);
                info!(endpoint = %state.uri(), "endpoint deleted");
                true
            }
            None => false,
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(root = %self.binding.own_root(), "closing transport");

        for state in self.registry.drain() {
            state.set_active(false);
            state.set_listener(None);
        }
        self.pool.shutdown();
        self.channels.close_all();
        let connections: Vec<Arc<Connection>> =
            self.connections.lock().drain().map(|(_, c)| c).collect();
        for connection in connections {
            connection.close();
        }

        self.link.wake();
        if let Some(handle) = self.accept_thread.lock().take() {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                warn!("accept thread panicked");
            }
        }
    }
}

impl MessageHandler for Inner {
    fn route_and_deliver(&self, message: Message) -> Result<()> {
        let key = self.binding.routing_key(&message.header.uri_to)?;
        let endpoint = self
            .registry
            .by_routing(&key)
            .ok_or_else(|| TransportError::EndpointNotFound(message.header.uri_to.to_string()))?;
        endpoint.deliver(message, self.config.delivery_timeout())
    }

    fn send_error_reply(&self, reply: Message) -> Result<()> {
        self.send(reply)
    }
}

impl EndpointOwner for Inner {
    fn send(&self, message: Message) -> Result<()> {
        Inner::send(self, message)
    }

    fn delete_endpoint(&self, local_name: &str) -> bool {
        Inner::delete_endpoint(self, local_name)
    }
}

/// Dials outgoing connections on behalf of the channel manager.
struct Dialer(Weak<Inner>);

impl Connector for Dialer {
    fn connect(&self, root: &str) -> Result<Arc<Connection>> {
        let inner = self.0.upgrade().ok_or(TransportError::Closed)?;
        inner.ensure_open()?;
        let address = inner.binding.link_address(root)?;
        let stream = TcpLink::connect_timeout(&address, inner.config.connect_timeout())?;
        inner.dialed.fetch_add(1, Ordering::Relaxed);
        debug!(%root, %address, "dialed destination");
        inner.adopt(stream)
    }
}

fn accept_loop(link: &TcpLink, transport: &Weak<Inner>) {
    loop {
        let accepted = link.accept();
        let Some(inner) = transport.upgrade() else {
            return;
        };
        if inner.is_closed() {
            return;
        }
        match accepted {
            Ok(stream) => {
                inner.accepted.fetch_add(1, Ordering::Relaxed);
                if let Err(err) = inner.adopt(stream) {
                    warn!(error = %err, "could not adopt accepted connection");
                }
            }
            Err(err) => {
                warn!(error = %err, "accept failed");
                drop(inner);
                thread::sleep(Duration::from_millis(50));
            }
        }
    }
}

fn reception_loop(transport: &Weak<Inner>, connection: &Arc<Connection>, mut source: Box<dyn MessageSource>) {
    let mut registered = false;
    loop {
        let received = source.next_message();
        let Some(inner) = transport.upgrade() else {
            break;
        };
        match received {
            Ok(message) => {
                if !registered {
                    match inner.binding.root_of(&message.header.uri_from) {
                        Ok(root) => {
                            inner.channels.register_inbound(&root, Arc::clone(connection));
                            registered = true;
                        }
                        Err(err) => debug!(error = %err, "sender root not routable"),
                    }
                }
                if let Err(err) = inner.receive(message) {
                    debug!(connection = connection.id(), error = %err, "incoming message not dispatched");
                }
            }
            Err(err) if err.is_decoding() => {
                warn!(connection = connection.id(), error = %err, "closing connection after decoding error");
                break;
            }
            Err(err) => {
                if !inner.is_closed() && !connection.is_closed() {
                    debug!(connection = connection.id(), error = %err, "connection ended");
                }
                break;
            }
        }
    }

    connection.close();
    if let Some(inner) = transport.upgrade() {
        inner.channels.discard_connection(connection.id());
        inner.connections.lock().remove(&connection.id());
    }
}
