use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;

use crate::error::{MessageError, Result};
use crate::uri::Uri;

/// Interaction stage numbers, grouped by interaction type.
pub mod stage {
    pub const SEND: u8 = 0;

    pub const SUBMIT: u8 = 1;
    pub const SUBMIT_ACK: u8 = 2;

    pub const REQUEST: u8 = 1;
    pub const REQUEST_RESPONSE: u8 = 2;

    pub const INVOKE: u8 = 1;
    pub const INVOKE_ACK: u8 = 2;
    pub const INVOKE_RESPONSE: u8 = 3;

    pub const PROGRESS: u8 = 1;
    pub const PROGRESS_ACK: u8 = 2;
    pub const PROGRESS_UPDATE: u8 = 3;
    pub const PROGRESS_RESPONSE: u8 = 4;

    pub const PUBSUB_REGISTER: u8 = 1;
    pub const PUBSUB_REGISTER_ACK: u8 = 2;
    pub const PUBSUB_PUBLISH_REGISTER: u8 = 3;
    pub const PUBSUB_PUBLISH_REGISTER_ACK: u8 = 4;
    pub const PUBSUB_PUBLISH: u8 = 5;
    pub const PUBSUB_NOTIFY: u8 = 6;
    pub const PUBSUB_DEREGISTER: u8 = 7;
    pub const PUBSUB_DEREGISTER_ACK: u8 = 8;
    pub const PUBSUB_PUBLISH_DEREGISTER: u8 = 9;
    pub const PUBSUB_PUBLISH_DEREGISTER_ACK: u8 = 10;
}

/// Request/response pattern a message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum InteractionType {
    Send = 1,
    Submit = 2,
    Request = 3,
    Invoke = 4,
    Progress = 5,
    PubSub = 6,
}

impl InteractionType {
    pub const ALL: [InteractionType; 6] = [
        Self::Send,
        Self::Submit,
        Self::Request,
        Self::Invoke,
        Self::Progress,
        Self::PubSub,
    ];

    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Self::Send),
            2 => Ok(Self::Submit),
            3 => Ok(Self::Request),
            4 => Ok(Self::Invoke),
            5 => Ok(Self::Progress),
            6 => Ok(Self::PubSub),
            other => Err(MessageError::UnknownInteractionType(other)),
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Lowest and highest valid stage numbers.
    pub fn stage_range(self) -> (u8, u8) {
        match self {
            Self::Send => (0, 0),
            Self::Submit | Self::Request => (1, 2),
            Self::Invoke => (1, 3),
            Self::Progress => (1, 4),
            Self::PubSub => (1, 10),
        }
    }

    pub fn is_valid_stage(self, stage: u8) -> bool {
        let (low, high) = self.stage_range();
        (low..=high).contains(&stage)
    }

    /// Whether a failure at this stage is answered with an error reply.
    ///
    /// Stages that are themselves replies never are, otherwise two failing
    /// peers would bounce error messages forever.
    pub fn expects_reply(self, stage_number: u8) -> bool {
        match self {
            Self::Send => false,
            Self::Submit | Self::Request | Self::Invoke | Self::Progress => stage_number == 1,
            Self::PubSub => matches!(
                stage_number,
                stage::PUBSUB_REGISTER
                    | stage::PUBSUB_PUBLISH_REGISTER
                    | stage::PUBSUB_DEREGISTER
                    | stage::PUBSUB_PUBLISH_DEREGISTER
            ),
        }
    }

    /// Whether this stage is sent by the consumer side of the interaction.
    pub fn is_initiating(self, stage_number: u8) -> bool {
        match self {
            Self::Send => true,
            Self::PubSub => matches!(
                stage_number,
                stage::PUBSUB_REGISTER
                    | stage::PUBSUB_PUBLISH_REGISTER
                    | stage::PUBSUB_PUBLISH
                    | stage::PUBSUB_DEREGISTER
                    | stage::PUBSUB_PUBLISH_DEREGISTER
            ),
            _ => stage_number == 1,
        }
    }

    fn sdu_base(self) -> u8 {
        match self {
            Self::Send | Self::Submit => 0,
            Self::Request => 2,
            Self::Invoke => 4,
            Self::Progress => 7,
            Self::PubSub => 11,
        }
    }

    /// Packet-binding code for a type/stage pair.
    pub fn sdu_type(self, stage_number: u8) -> Result<u8> {
        if !self.is_valid_stage(stage_number) {
            return Err(MessageError::InvalidStage {
                interaction_type: self,
                stage: stage_number,
            });
        }
        Ok(self.sdu_base() + stage_number)
    }

    /// Inverse of [`InteractionType::sdu_type`].
    pub fn from_sdu_type(sdu: u8) -> Result<(Self, u8)> {
        let interaction_type = match sdu {
            0 => Self::Send,
            1..=2 => Self::Submit,
            3..=4 => Self::Request,
            5..=7 => Self::Invoke,
            8..=11 => Self::Progress,
            12..=21 => Self::PubSub,
            other => return Err(MessageError::UnknownSduType(other)),
        };
        Ok((interaction_type, sdu - interaction_type.sdu_base()))
    }
}

/// Delivery guarantee requested for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum QosLevel {
    #[default]
    BestEffort = 0,
    Assured = 1,
    Queued = 2,
    Timely = 3,
}

impl QosLevel {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::BestEffort),
            1 => Ok(Self::Assured),
            2 => Ok(Self::Queued),
            3 => Ok(Self::Timely),
            other => Err(MessageError::UnknownQosLevel(other)),
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "BESTEFFORT" => Some(Self::BestEffort),
            "ASSURED" => Some(Self::Assured),
            "QUEUED" => Some(Self::Queued),
            "TIMELY" => Some(Self::Timely),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum SessionType {
    #[default]
    Live = 0,
    Simulation = 1,
    Replay = 2,
}

impl SessionType {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Live),
            1 => Ok(Self::Simulation),
            2 => Ok(Self::Replay),
            other => Err(MessageError::UnknownSessionType(other)),
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Live => "LIVE",
            Self::Simulation => "SIMULATION",
            Self::Replay => "REPLAY",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "LIVE" => Some(Self::Live),
            "SIMULATION" => Some(Self::Simulation),
            "REPLAY" => Some(Self::Replay),
            _ => None,
        }
    }
}

/// Milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self(millis)
    }

    pub fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    pub fn as_millis(self) -> u64 {
        self.0
    }
}

/// Identifies the remote operation contract a message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct OperationId {
    pub area: u16,
    pub service: u16,
    pub operation: u16,
    pub area_version: u8,
}

impl OperationId {
    pub const fn new(area: u16, service: u16, operation: u16, area_version: u8) -> Self {
        Self {
            area,
            service,
            operation,
            area_version,
        }
    }
}

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{}.{} v{}",
            self.area, self.service, self.operation, self.area_version
        )
    }
}

/// Addressing and interaction metadata of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    pub uri_from: Uri,
    pub uri_to: Uri,
    pub authentication_id: Bytes,
    pub timestamp: Timestamp,
    pub qos_level: QosLevel,
    pub priority: u32,
    pub domain: Vec<String>,
    pub network_zone: String,
    pub session: SessionType,
    pub session_name: String,
    pub interaction_type: InteractionType,
    pub interaction_stage: u8,
    pub transaction_id: u64,
    pub service_area: u16,
    pub service: u16,
    pub operation: u16,
    pub area_version: u8,
    pub is_error_message: bool,
}

impl MessageHeader {
    /// Header with every optional field at its default.
    pub fn new(
        uri_from: Uri,
        uri_to: Uri,
        interaction_type: InteractionType,
        interaction_stage: u8,
        transaction_id: u64,
        operation: OperationId,
    ) -> Self {
        Self {
            uri_from,
            uri_to,
            authentication_id: Bytes::new(),
            timestamp: Timestamp::now(),
            qos_level: QosLevel::default(),
            priority: 0,
            domain: Vec::new(),
            network_zone: String::new(),
            session: SessionType::Live,
            session_name: SessionType::Live.name().to_string(),
            interaction_type,
            interaction_stage,
            transaction_id,
            service_area: operation.area,
            service: operation.service,
            operation: operation.operation,
            area_version: operation.area_version,
            is_error_message: false,
        }
    }

    pub fn operation_id(&self) -> OperationId {
        OperationId::new(
            self.service_area,
            self.service,
            self.operation,
            self.area_version,
        )
    }

    pub fn validate_stage(&self) -> Result<()> {
        if self.interaction_type.is_valid_stage(self.interaction_stage) {
            Ok(())
        } else {
            Err(MessageError::InvalidStage {
                interaction_type: self.interaction_type,
                stage: self.interaction_stage,
            })
        }
    }

    /// Header for a message travelling back to the sender of this one.
    ///
    /// Addresses are swapped; transaction, contract and session fields are
    /// kept; the timestamp is refreshed.
    pub fn reply(&self, interaction_stage: u8, is_error_message: bool) -> Self {
        Self {
            uri_from: self.uri_to.clone(),
            uri_to: self.uri_from.clone(),
            timestamp: Timestamp::now(),
            interaction_stage,
            is_error_message,
            ..self.clone()
        }
    }
}
