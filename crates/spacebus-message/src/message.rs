use std::collections::HashMap;

use crate::body::{BodyKind, BodyPart, MessageBody};
use crate::element::Element;
use crate::header::MessageHeader;

/// Quality-of-service properties attached to an endpoint or message.
pub type QosProperties = HashMap<String, String>;

/// Header, body and QoS properties of one logical message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: MessageHeader,
    pub body: MessageBody,
    pub qos: QosProperties,
}

impl Message {
    pub fn new(header: MessageHeader, body: MessageBody) -> Self {
        Self {
            header,
            body,
            qos: QosProperties::new(),
        }
    }

    pub fn with_qos(mut self, qos: QosProperties) -> Self {
        self.qos = qos;
        self
    }

    /// Body kind implied by the header.
    pub fn expected_body_kind(&self) -> BodyKind {
        BodyKind::select(
            self.header.interaction_type,
            self.header.interaction_stage,
            self.header.is_error_message,
        )
    }

    /// Error message answering this one at the next stage.
    pub fn error_reply(&self, number: u32, info: Option<String>) -> Message {
        let header = self
            .header
            .reply(self.header.interaction_stage.saturating_add(1), true);
        let extra = info
            .map(|text| BodyPart::Decoded(Element::String(text)))
            .unwrap_or_default();
        Message::new(header, MessageBody::Error { number, extra })
    }
}
