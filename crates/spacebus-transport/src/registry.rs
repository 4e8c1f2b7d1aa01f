//! Local endpoints, indexed by local name and by routing name.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{SendTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use spacebus_message::{errors, Message, QosProperties, Uri};
use tracing::warn;

use crate::error::{Result, TransportError};

/// Shared state of one endpoint.
#[derive(Debug)]
pub struct EndpointState {
    local_name: String,
    routing_name: String,
    uri: Uri,
    qos: QosProperties,
    active: AtomicBool,
    listener: Mutex<Option<Sender<Message>>>,
}

impl EndpointState {
    pub fn new(local_name: String, routing_name: String, uri: Uri, qos: QosProperties) -> Self {
        Self {
            local_name,
            routing_name,
            uri,
            qos,
            active: AtomicBool::new(true),
            listener: Mutex::new(None),
        }
    }

    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    pub fn routing_name(&self) -> &str {
        &self.routing_name
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn qos(&self) -> &QosProperties {
        &self.qos
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    pub fn has_listener(&self) -> bool {
        self.listener.lock().is_some()
    }

    /// Install `sender` as the only listener, replacing any previous one.
    pub fn set_listener(&self, sender: Option<Sender<Message>>) {
        *self.listener.lock() = sender;
    }

    /// Hand `message` to the listener.
    ///
    /// Inactive or listener-less endpoints drop the message with a warning
    /// and report success. A listener queue that stays full for `timeout`
    /// is a delivery failure.
    pub fn deliver(&self, message: Message, timeout: Duration) -> Result<()> {
        let transaction_id = message.header.transaction_id;
        if !self.is_active() {
            warn!(endpoint = %self.uri, transaction_id, "endpoint inactive, message dropped");
            return Ok(());
        }
        let Some(sender) = self.listener.lock().clone() else {
            warn!(endpoint = %self.uri, transaction_id, "no listener, message dropped");
            return Ok(());
        };

        match sender.send_timeout(message, timeout) {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(TransportError::Delivery {
                endpoint: self.uri.to_string(),
                reason: format!("listener queue full for {timeout:?}"),
                number: errors::DELIVERY_TIMEDOUT,
            }),
            Err(SendTimeoutError::Disconnected(_)) => {
                let mut listener = self.listener.lock();
                if listener.as_ref().is_some_and(|current| current.same_channel(&sender)) {
                    *listener = None;
                }
                warn!(endpoint = %self.uri, transaction_id, "listener gone, message dropped");
                Ok(())
            }
        }
    }
}

#[derive(Default)]
struct Maps {
    by_local: HashMap<String, Arc<EndpointState>>,
    by_routing: HashMap<String, Arc<EndpointState>>,
}

#[derive(Default)]
pub struct EndpointRegistry {
    maps: RwLock<Maps>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Existing endpoint for `local_name`, or one built by `create`.
    ///
    /// `create` receives a predicate telling which routing names are taken.
    /// The boolean is `true` when a new endpoint was registered.
    pub fn get_or_create<F>(&self, local_name: &str, create: F) -> Result<(Arc<EndpointState>, bool)>
    where
        F: FnOnce(&dyn Fn(&str) -> bool) -> Result<EndpointState>,
    {
        let mut maps = self.maps.write();
        if let Some(existing) = maps.by_local.get(local_name) {
            return Ok((Arc::clone(existing), false));
        }

        let state = {
            let by_routing = &maps.by_routing;
            let taken = |name: &str| by_routing.contains_key(name);
            create(&taken)?
        };
        if maps.by_routing.contains_key(state.routing_name()) {
            return Err(TransportError::Config(format!(
                "routing name {} already registered",
                state.routing_name()
            )));
        }

        let state = Arc::new(state);
        maps.by_local
            .insert(state.local_name().to_string(), Arc::clone(&state));
        maps.by_routing
            .insert(state.routing_name().to_string(), Arc::clone(&state));
        Ok((state, true))
    }

    pub fn by_local(&self, local_name: &str) -> Option<Arc<EndpointState>> {
        self.maps.read().by_local.get(local_name).cloned()
    }

    pub fn by_routing(&self, routing_name: &str) -> Option<Arc<EndpointState>> {
        self.maps.read().by_routing.get(routing_name).cloned()
    }

    pub fn contains_local(&self, local_name: &str) -> bool {
        self.maps.read().by_local.contains_key(local_name)
    }

    pub fn contains_routing(&self, routing_name: &str) -> bool {
        self.maps.read().by_routing.contains_key(routing_name)
    }

    pub fn remove(&self, local_name: &str) -> Option<Arc<EndpointState>> {
        let mut maps = self.maps.write();
        let state = maps.by_local.remove(local_name)?;
        maps.by_routing.remove(state.routing_name());
        Some(state)
    }

    /// Unregister everything.
    pub fn drain(&self) -> Vec<Arc<EndpointState>> {
        let mut maps = self.maps.write();
        maps.by_routing.clear();
        maps.by_local.drain().map(|(_, state)| state).collect()
    }

    pub fn list(&self) -> Vec<Arc<EndpointState>> {
        let mut list: Vec<_> = self.maps.read().by_local.values().cloned().collect();
        list.sort_by(|a, b| a.local_name().cmp(b.local_name()));
        list
    }

    pub fn len(&self) -> usize {
        self.maps.read().by_local.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
