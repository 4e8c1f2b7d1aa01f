//! Stream binding: one framed message per wire unit.
//!
//! The frame payload is the full header, field by field through the element
//! codec, followed by the body.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use spacebus_frame::{FrameConfig, FrameError, FrameReader, FrameWriter};
use spacebus_link::LinkStream;
use spacebus_message::{
    decode_body, encode_body, BodyKind, Element, ElementCodec, ElementKind, InteractionType,
    Message, MessageHeader, QosLevel, SessionType, Uri,
};
use tracing::debug;

use crate::binding::{Binding, MessageSource, UnitWriter};
use crate::config::{Protocol, TransportConfig};
use crate::error::{Result, TransportError};

pub const PROTOCOL: &str = "maltcp";

/// Write every header field in wire order.
pub fn encode_header(
    header: &MessageHeader,
    codec: &dyn ElementCodec,
    dst: &mut BytesMut,
) -> spacebus_message::Result<()> {
    let fields = [
        Element::String(header.uri_from.to_string()),
        Element::String(header.uri_to.to_string()),
        Element::Blob(header.authentication_id.clone()),
        Element::Time(header.timestamp),
        Element::UOctet(header.qos_level.as_u8()),
        Element::UInteger(header.priority),
        Element::IdentifierList(header.domain.clone()),
        Element::Identifier(header.network_zone.clone()),
        Element::UOctet(header.session.as_u8()),
        Element::Identifier(header.session_name.clone()),
        Element::UOctet(header.interaction_type.as_u8()),
        Element::UOctet(header.interaction_stage),
        Element::ULong(header.transaction_id),
        Element::UShort(header.service_area),
        Element::UShort(header.service),
        Element::UShort(header.operation),
        Element::UOctet(header.area_version),
        Element::Boolean(header.is_error_message),
    ];
    for field in &fields {
        codec.encode(field, dst)?;
    }
    Ok(())
}

pub fn decode_header(
    codec: &dyn ElementCodec,
    src: &mut Bytes,
) -> spacebus_message::Result<MessageHeader> {
    let mut next = |kind| codec.decode(kind, src);

    let uri_from = Uri::parse(&next(ElementKind::String)?.into_string()?)?;
    let uri_to = Uri::parse(&next(ElementKind::String)?.into_string()?)?;
    let authentication_id = next(ElementKind::Blob)?.into_blob()?;
    let timestamp = next(ElementKind::Time)?.into_time()?;
    let qos_level = QosLevel::from_u8(next(ElementKind::UOctet)?.into_u8()?)?;
    let priority = next(ElementKind::UInteger)?.into_u32()?;
    let domain = next(ElementKind::IdentifierList)?.into_identifier_list()?;
    let network_zone = next(ElementKind::Identifier)?.into_string()?;
    let session = SessionType::from_u8(next(ElementKind::UOctet)?.into_u8()?)?;
    let session_name = next(ElementKind::Identifier)?.into_string()?;
    let interaction_type = InteractionType::from_u8(next(ElementKind::UOctet)?.into_u8()?)?;
    let interaction_stage = next(ElementKind::UOctet)?.into_u8()?;
    let transaction_id = next(ElementKind::ULong)?.into_u64()?;
    let service_area = next(ElementKind::UShort)?.into_u16()?;
    let service = next(ElementKind::UShort)?.into_u16()?;
    let operation = next(ElementKind::UShort)?.into_u16()?;
    let area_version = next(ElementKind::UOctet)?.into_u8()?;
    let is_error_message = next(ElementKind::Boolean)?.into_bool()?;

    let header = MessageHeader {
        uri_from,
        uri_to,
        authentication_id,
        timestamp,
        qos_level,
        priority,
        domain,
        network_zone,
        session,
        session_name,
        interaction_type,
        interaction_stage,
        transaction_id,
        service_area,
        service,
        operation,
        area_version,
        is_error_message,
    };
    header.validate_stage()?;
    Ok(header)
}

/// Header plus body codec shared by the binding and its readers.
#[derive(Debug, Clone)]
pub struct StreamMessageCodec {
    elements: Arc<dyn ElementCodec>,
    wrap: bool,
}

impl StreamMessageCodec {
    pub fn new(elements: Arc<dyn ElementCodec>, wrap: bool) -> Self {
        Self { elements, wrap }
    }

    pub fn encode(&self, message: &Message) -> Result<Bytes> {
        let mut payload = BytesMut::new();
        encode_header(&message.header, self.elements.as_ref(), &mut payload)?;
        encode_body(&message.body, self.wrap, self.elements.as_ref(), &mut payload)?;
        Ok(payload.freeze())
    }

    pub fn decode(&self, mut payload: Bytes) -> Result<Message> {
        let header = decode_header(self.elements.as_ref(), &mut payload)
            .map_err(|err| TransportError::Decoding(format!("header: {err}")))?;
        let kind = BodyKind::select(
            header.interaction_type,
            header.interaction_stage,
            header.is_error_message,
        );
        let body = decode_body(kind, self.wrap, self.elements.as_ref(), payload)
            .map_err(|err| TransportError::Decoding(format!("body: {err}")))?;
        Ok(Message::new(header, body))
    }
}

/// `maltcp://host:port/<routing name>` addressing over framed streams.
pub struct StreamBinding {
    root: String,
    codec: StreamMessageCodec,
    frames: FrameConfig,
    full_payload: bool,
}

impl StreamBinding {
    /// `local` is the bound listener address; an unspecified IP is
    /// advertised as loopback.
    pub fn new(local: SocketAddr, elements: Arc<dyn ElementCodec>, config: &TransportConfig) -> Self {
        let mut advertised = local;
        if advertised.ip().is_unspecified() {
            advertised.set_ip(std::net::Ipv4Addr::LOCALHOST.into());
        }
        Self {
            root: format!("{PROTOCOL}://{advertised}"),
            codec: StreamMessageCodec::new(elements, config.body_wrap),
            frames: FrameConfig::default(),
            full_payload: config.debug_full_payload,
        }
    }

    pub fn codec(&self) -> &StreamMessageCodec {
        &self.codec
    }
}

impl Binding for StreamBinding {
    fn protocol(&self) -> Protocol {
        Protocol::Maltcp
    }

    fn own_root(&self) -> &str {
        &self.root
    }

    fn root_of(&self, uri: &Uri) -> Result<String> {
        if uri.protocol() != PROTOCOL {
            return Err(TransportError::Addressing(format!(
                "{uri} is not a {PROTOCOL} address"
            )));
        }
        Ok(uri.root_address().to_string())
    }

    fn routing_key(&self, uri: &Uri) -> Result<String> {
        Ok(uri.routing_name().to_string())
    }

    fn routing_name(&self, local_name: &str, taken: &dyn Fn(&str) -> bool) -> Result<String> {
        if taken(local_name) {
            return Err(TransportError::Config(format!(
                "routing name {local_name} already registered"
            )));
        }
        Ok(local_name.to_string())
    }

    fn endpoint_uri(&self, routing_name: &str) -> Result<Uri> {
        Ok(Uri::parse(&format!("{}/{routing_name}", self.root))?)
    }

    fn link_address(&self, root: &str) -> Result<String> {
        let uri = Uri::parse(root)?;
        self.root_of(&uri)?;
        Ok(uri.authority().to_string())
    }

    fn encode(&self, message: &Message) -> Result<Vec<Bytes>> {
        Ok(vec![self.codec.encode(message)?])
    }

    fn open_stream(&self, stream: LinkStream) -> Result<(Box<dyn UnitWriter>, Box<dyn MessageSource>)> {
        let reader = FrameReader::with_config_link(stream.try_clone()?, self.frames.clone())?;
        let writer = FrameWriter::with_config_link(stream, self.frames.clone())?;
        let source = FrameSource {
            reader,
            codec: self.codec.clone(),
            full_payload: self.full_payload,
        };
        Ok((Box::new(writer), Box::new(source)))
    }
}

impl UnitWriter for FrameWriter<LinkStream> {
    fn write_unit(&mut self, unit: &[u8]) -> Result<()> {
        Ok(self.send(unit)?)
    }
}

struct FrameSource {
    reader: FrameReader<LinkStream>,
    codec: StreamMessageCodec,
    full_payload: bool,
}

impl MessageSource for FrameSource {
    fn next_message(&mut self) -> Result<Message> {
        let frame = self.reader.read_frame().map_err(|err| match err {
            FrameError::InvalidMagic { .. } | FrameError::PayloadTooLarge { .. } => {
                TransportError::Decoding(err.to_string())
            }
            other => TransportError::Frame(other),
        })?;
        if self.full_payload {
            debug!(payload = %hex::encode(&frame.payload), "frame received");
        } else {
            debug!(bytes = frame.payload.len(), "frame received");
        }
        self.codec.decode(frame.payload)
    }
}

#[cfg(test)]
mod tests {
    use spacebus_message::{
        errors, stage, BinaryElementCodec, BodyPart, MessageBody, OperationId, Timestamp,
    };

    use super::*;

    fn header() -> MessageHeader {
        let mut header = MessageHeader::new(
            Uri::parse("maltcp://127.0.0.1:4000/consumer").expect("uri should parse"),
            Uri::parse("maltcp://127.0.0.1:5000/provider").expect("uri should parse"),
            InteractionType::Invoke,
            stage::INVOKE_ACK,
            0x0102_0304_0506_0708,
            OperationId::new(10, 11, 12, 3),
        );
        header.authentication_id = Bytes::from_static(&[1, 2, 3]);
        header.timestamp = Timestamp::from_millis(1_700_000_000_000);
        header.qos_level = QosLevel::Timely;
        header.priority = 99;
        header.domain = vec!["esa".into(), "mission".into()];
        header.network_zone = "ground".into();
        header.session = SessionType::Simulation;
        header.session_name = "sim-1".into();
        header.is_error_message = true;
        header
    }

    fn codec(wrap: bool) -> StreamMessageCodec {
        StreamMessageCodec::new(Arc::new(BinaryElementCodec), wrap)
    }

    #[test]
    fn header_fields_survive_the_stream_codec() {
        let header = header();
        let mut buf = BytesMut::new();
        encode_header(&header, &BinaryElementCodec, &mut buf).expect("header should encode");
        let mut bytes = buf.freeze();
        let decoded = decode_header(&BinaryElementCodec, &mut bytes).expect("header should decode");
        assert_eq!(decoded, header);
        assert!(bytes.is_empty());
    }

    #[test]
    fn error_body_decodes_number_in_both_modes() {
        for wrap in [true, false] {
            let message = Message::new(header(), MessageBody::error(errors::BAD_ENCODING, BodyPart::Absent));
            let codec = codec(wrap);
            let decoded = codec
                .decode(codec.encode(&message).expect("message should encode"))
                .expect("message should decode");
            assert!(matches!(
                decoded.body,
                MessageBody::Error { number: errors::BAD_ENCODING, .. }
            ));
        }
    }

    #[test]
    fn truncated_payload_is_decoding_error() {
        let message = Message::new(header(), MessageBody::empty());
        let codec = codec(true);
        let payload = codec.encode(&message).expect("message should encode");
        let err = codec
            .decode(payload.slice(..payload.len() / 2))
            .expect_err("half a header should fail");
        assert!(err.is_decoding());
    }

    #[test]
    fn addressing_rules() {
        let binding = StreamBinding::new(
            "0.0.0.0:4567".parse().expect("addr should parse"),
            Arc::new(BinaryElementCodec),
            &TransportConfig::default(),
        );
        assert_eq!(binding.own_root(), "maltcp://127.0.0.1:4567");

        let uri = binding.endpoint_uri("svc").expect("uri should build");
        assert_eq!(uri.as_str(), "maltcp://127.0.0.1:4567/svc");
        assert_eq!(binding.routing_key(&uri).expect("key"), "svc");
        assert_eq!(binding.root_of(&uri).expect("root"), "maltcp://127.0.0.1:4567");
        assert_eq!(
            binding.link_address("maltcp://10.0.0.1:99").expect("address"),
            "10.0.0.1:99"
        );
        assert!(binding
            .root_of(&Uri::parse("malspp://247/1").expect("uri should parse"))
            .is_err());
        assert!(binding.routing_name("svc", &|name| name == "svc").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn stream_pair_carries_messages() {
        let (left, right) = LinkStream::pair().expect("pair should open");
        let binding = StreamBinding::new(
            "127.0.0.1:1".parse().expect("addr should parse"),
            Arc::new(BinaryElementCodec),
            &TransportConfig::default(),
        );
        let (mut writer, _left_source) = binding.open_stream(left).expect("left should open");
        let (_right_writer, mut source) = binding.open_stream(right).expect("right should open");

        let message = Message::new(header(), MessageBody::empty());
        for unit in binding.encode(&message).expect("message should encode") {
            writer.write_unit(&unit).expect("unit should write");
        }
        let received = source.next_message().expect("message should arrive");
        assert_eq!(received.header, message.header);
    }
}
