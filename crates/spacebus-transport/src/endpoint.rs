use std::sync::{Arc, Weak};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver};
use spacebus_message::{
    InteractionType, Message, MessageBody, MessageHeader, OperationId, QosLevel, QosProperties,
    SessionType, Uri,
};

use crate::error::{Result, TransportError};
use crate::registry::EndpointState;

/// QoS property keys an endpoint reads header defaults from.
pub mod qos {
    pub const PRIORITY: &str = "priority";
    pub const QOS_LEVEL: &str = "qos_level";
    pub const SESSION: &str = "session";
    pub const SESSION_NAME: &str = "session_name";
    pub const NETWORK_ZONE: &str = "network_zone";
    /// Comma separated.
    pub const DOMAIN: &str = "domain";
}

/// What an endpoint needs from the transport that created it.
pub trait EndpointOwner: Send + Sync {
    fn send(&self, message: Message) -> Result<()>;
    fn delete_endpoint(&self, local_name: &str) -> bool;
}

/// Application handle to a registered endpoint.
///
/// Clones refer to the same endpoint. Once the transport is closed every
/// send fails with [`TransportError::Closed`].
#[derive(Clone)]
pub struct Endpoint {
    state: Arc<EndpointState>,
    owner: Weak<dyn EndpointOwner>,
    listener_capacity: usize,
}

impl Endpoint {
    pub(crate) fn new(
        state: Arc<EndpointState>,
        owner: Weak<dyn EndpointOwner>,
        listener_capacity: usize,
    ) -> Self {
        Self {
            state,
            owner,
            listener_capacity,
        }
    }

    pub fn local_name(&self) -> &str {
        self.state.local_name()
    }

    pub fn routing_name(&self) -> &str {
        self.state.routing_name()
    }

    pub fn uri(&self) -> &Uri {
        self.state.uri()
    }

    pub fn qos(&self) -> &QosProperties {
        self.state.qos()
    }

    /// Build a message from this endpoint with header defaults taken from
    /// the endpoint's QoS properties.
    pub fn create_message(
        &self,
        to: &Uri,
        operation: OperationId,
        interaction_type: InteractionType,
        interaction_stage: u8,
        transaction_id: u64,
        body: MessageBody,
    ) -> Result<Message> {
        let mut header = MessageHeader::new(
            self.uri().clone(),
            to.clone(),
            interaction_type,
            interaction_stage,
            transaction_id,
            operation,
        );
        header.validate_stage()?;
        apply_qos(&mut header, self.qos())?;
        Ok(Message::new(header, body).with_qos(self.qos().clone()))
    }

    /// Reply to `request` from this endpoint at `interaction_stage`.
    pub fn create_reply(&self, request: &Message, interaction_stage: u8, body: MessageBody) -> Result<Message> {
        let mut header = request.header.reply(interaction_stage, false);
        header.uri_from = self.uri().clone();
        header.validate_stage()?;
        Ok(Message::new(header, body).with_qos(self.qos().clone()))
    }

    pub fn send(&self, message: Message) -> Result<()> {
        self.owner()?.send(message)
    }

    /// Start receiving messages through a queue sized by the transport's
    /// `listener_capacity`.
    ///
    /// Replaces the previous listener; its receiver sees the end of the
    /// stream once drained.
    pub fn listen(&self) -> MessageReceiver {
        self.listen_with_capacity(self.listener_capacity)
    }

    /// Like [`listen`](Self::listen) with an explicit queue depth.
    pub fn listen_with_capacity(&self, capacity: usize) -> MessageReceiver {
        let (sender, receiver) = bounded(capacity.max(1));
        self.state.set_listener(Some(sender));
        MessageReceiver { receiver }
    }

    pub fn stop_listening(&self) {
        self.state.set_listener(None);
    }

    pub fn activate(&self) {
        self.state.set_active(true);
    }

    /// Messages arriving while inactive are dropped.
    pub fn deactivate(&self) {
        self.state.set_active(false);
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// Unregister from the transport and stop delivery.
    pub fn close(&self) -> Result<()> {
        self.state.set_active(false);
        self.state.set_listener(None);
        self.owner()?.delete_endpoint(self.local_name());
        Ok(())
    }

    fn owner(&self) -> Result<Arc<dyn EndpointOwner>> {
        self.owner.upgrade().ok_or(TransportError::Closed)
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("local_name", &self.local_name())
            .field("uri", &self.uri().as_str())
            .field("active", &self.is_active())
            .finish()
    }
}

fn apply_qos(header: &mut MessageHeader, qos: &QosProperties) -> Result<()> {
    let bad = |key: &str, value: &str| TransportError::Config(format!("qos {key}: invalid value {value:?}"));
    if let Some(value) = qos.get(qos::PRIORITY) {
        header.priority = value.trim().parse().map_err(|_| bad(qos::PRIORITY, value))?;
    }
    if let Some(value) = qos.get(qos::QOS_LEVEL) {
        header.qos_level = QosLevel::parse(value.trim()).ok_or_else(|| bad(qos::QOS_LEVEL, value))?;
    }
    if let Some(value) = qos.get(qos::SESSION) {
        header.session = SessionType::parse(value.trim()).ok_or_else(|| bad(qos::SESSION, value))?;
        header.session_name = header.session.name().to_string();
    }
    if let Some(value) = qos.get(qos::SESSION_NAME) {
        header.session_name = value.clone();
    }
    if let Some(value) = qos.get(qos::NETWORK_ZONE) {
        header.network_zone = value.clone();
    }
    if let Some(value) = qos.get(qos::DOMAIN) {
        header.domain = value
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect();
    }
    Ok(())
}

/// Receiving side of an endpoint listener.
#[derive(Debug)]
pub struct MessageReceiver {
    receiver: Receiver<Message>,
}

impl MessageReceiver {
    /// Block for the next message; `None` once the listener was replaced,
    /// stopped or the endpoint closed.
    pub fn recv(&self) -> Option<Message> {
        self.receiver.recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<Message> {
        self.receiver.recv_timeout(timeout).ok()
    }

    pub fn try_recv(&self) -> Option<Message> {
        self.receiver.try_recv().ok()
    }

    /// Messages the queue holds before delivery starts waiting.
    pub fn capacity(&self) -> usize {
        self.receiver.capacity().unwrap_or(usize::MAX)
    }

    pub fn iter(&self) -> impl Iterator<Item = Message> + '_ {
        self.receiver.iter()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use spacebus_message::stage;

    use super::*;

    #[derive(Default)]
    struct Owner {
        sent: Mutex<Vec<Message>>,
        deleted: Mutex<Vec<String>>,
    }

    impl EndpointOwner for Owner {
        fn send(&self, message: Message) -> Result<()> {
            self.sent.lock().push(message);
            Ok(())
        }

        fn delete_endpoint(&self, local_name: &str) -> bool {
            self.deleted.lock().push(local_name.to_string());
            true
        }
    }

    fn endpoint(owner: &Arc<Owner>, qos: QosProperties) -> Endpoint {
        let state = EndpointState::new(
            "svc".into(),
            "svc".into(),
            Uri::parse("maltcp://127.0.0.1:9/svc").expect("uri should parse"),
            qos,
        );
        let weak: Weak<dyn EndpointOwner> = Arc::downgrade(owner) as Weak<dyn EndpointOwner>;
        Endpoint::new(Arc::new(state), weak, 3)
    }

    fn to() -> Uri {
        Uri::parse("maltcp://127.0.0.1:10/peer").expect("uri should parse")
    }

    #[test]
    fn qos_properties_fill_header_defaults() {
        let owner = Arc::new(Owner::default());
        let qos: QosProperties = [
            (qos::PRIORITY, "7"),
            (qos::SESSION, "REPLAY"),
            (qos::NETWORK_ZONE, "ground"),
            (qos::DOMAIN, "esa, mission ,"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let ep = endpoint(&owner, qos);

        let message = ep
            .create_message(
                &to(),
                OperationId::new(1, 2, 3, 1),
                InteractionType::Submit,
                stage::SUBMIT,
                11,
                MessageBody::empty(),
            )
            .expect("message should build");
        assert_eq!(message.header.priority, 7);
        assert_eq!(message.header.session, SessionType::Replay);
        assert_eq!(message.header.session_name, "REPLAY");
        assert_eq!(message.header.network_zone, "ground");
        assert_eq!(message.header.domain, vec!["esa".to_string(), "mission".to_string()]);
        assert_eq!(message.header.uri_from.as_str(), "maltcp://127.0.0.1:9/svc");
    }

    #[test]
    fn invalid_stage_or_qos_rejected() {
        let owner = Arc::new(Owner::default());
        let ep = endpoint(&owner, QosProperties::new());
        assert!(ep
            .create_message(
                &to(),
                OperationId::new(1, 2, 3, 1),
                InteractionType::Submit,
                3,
                1,
                MessageBody::empty(),
            )
            .is_err());

        let qos: QosProperties = [(qos::PRIORITY.to_string(), "high".to_string())].into();
        let ep = endpoint(&owner, qos);
        assert!(matches!(
            ep.create_message(
                &to(),
                OperationId::new(1, 2, 3, 1),
                InteractionType::Send,
                stage::SEND,
                1,
                MessageBody::empty(),
            ),
            Err(TransportError::Config(_))
        ));
    }

    #[test]
    fn send_and_close_go_through_owner() {
        let owner = Arc::new(Owner::default());
        let ep = endpoint(&owner, QosProperties::new());
        let message = ep
            .create_message(
                &to(),
                OperationId::new(1, 2, 3, 1),
                InteractionType::Send,
                stage::SEND,
                1,
                MessageBody::empty(),
            )
            .expect("message should build");
        ep.send(message).expect("send should reach owner");
        ep.close().expect("close should reach owner");
        assert_eq!(owner.sent.lock().len(), 1);
        assert_eq!(owner.deleted.lock().as_slice(), ["svc".to_string()]);
        assert!(!ep.is_active());
    }

    #[test]
    fn dropped_owner_means_closed() {
        let owner = Arc::new(Owner::default());
        let ep = endpoint(&owner, QosProperties::new());
        let message = ep
            .create_message(
                &to(),
                OperationId::new(1, 2, 3, 1),
                InteractionType::Send,
                stage::SEND,
                1,
                MessageBody::empty(),
            )
            .expect("message should build");
        drop(owner);
        assert!(matches!(ep.send(message), Err(TransportError::Closed)));
    }

    #[test]
    fn new_listener_replaces_old_one() {
        let owner = Arc::new(Owner::default());
        let ep = endpoint(&owner, QosProperties::new());
        let first = ep.listen_with_capacity(4);
        let second = ep.listen_with_capacity(4);
        assert!(first.recv_timeout(Duration::from_millis(10)).is_none());
        ep.stop_listening();
        assert!(second.recv().is_none());
    }

    #[test]
    fn listen_uses_transport_capacity() {
        let owner = Arc::new(Owner::default());
        let ep = endpoint(&owner, QosProperties::new());
        assert_eq!(ep.listen().capacity(), 3);
        assert_eq!(ep.listen_with_capacity(0).capacity(), 1);
    }

    #[test]
    fn create_reply_swaps_addresses() {
        let owner = Arc::new(Owner::default());
        let ep = endpoint(&owner, QosProperties::new());
        let header = MessageHeader::new(
            to(),
            ep.uri().clone(),
            InteractionType::Request,
            stage::REQUEST,
            77,
            OperationId::new(1, 2, 3, 1),
        );
        let request = Message::new(header, MessageBody::empty());
        let reply = ep
            .create_reply(&request, stage::REQUEST_RESPONSE, MessageBody::empty())
            .expect("reply should build");
        assert_eq!(reply.header.uri_to, to());
        assert_eq!(reply.header.uri_from, *ep.uri());
        assert_eq!(reply.header.transaction_id, 77);
        assert!(!reply.header.is_error_message);
    }
}
