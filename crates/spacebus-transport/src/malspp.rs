//! Space Packet binding.
//!
//! Endpoints live at `malspp://<qualifier>/<apid>/<sub id>`; every endpoint
//! of one transport shares its qualifier and APID and gets its own sub id.
//! Messages are split into packets under one shared sequence counter and
//! reassembled per connection.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use spacebus_link::LinkStream;
use spacebus_message::{ElementCodec, Message, Uri};
use spacebus_spp::{
    PacketReader, PacketWriter, Reassembler, SequenceCounter, SppAddress, SppError,
    SppHeaderCodec, SppMessageCodec, PROTOCOL,
};
use tracing::{debug, warn};

use crate::binding::{Binding, MessageSource, UnitWriter};
use crate::config::{Protocol, SppConfig, TransportConfig};
use crate::error::{Result, TransportError};

pub struct SppBinding {
    address: SppAddress,
    root: String,
    codec: SppMessageCodec,
    sequence: Mutex<SequenceCounter>,
    config: SppConfig,
    full_payload: bool,
}

impl SppBinding {
    pub fn new(config: &TransportConfig, elements: Arc<dyn ElementCodec>) -> Result<Self> {
        let spp = &config.spp;
        let header = SppHeaderCodec::new(spp.qualifier, spp.include, elements);
        let codec = SppMessageCodec::new(header, config.body_wrap, spp.max_packet_size)
            .map_err(spp_error)?;
        let address = SppAddress::new(spp.qualifier, spp.apid, None);
        let root = address.to_uri().map_err(spp_error)?.to_string();
        Ok(Self {
            address,
            root,
            codec,
            sequence: Mutex::new(SequenceCounter::new()),
            config: spp.clone(),
            full_payload: config.debug_full_payload,
        })
    }

    pub fn address(&self) -> SppAddress {
        self.address
    }

    fn parse(&self, uri: &Uri) -> Result<SppAddress> {
        SppAddress::from_uri(uri).map_err(|err| TransportError::Addressing(err.to_string()))
    }
}

fn spp_error(err: SppError) -> TransportError {
    match err {
        SppError::InvalidConfig(message) => TransportError::Config(message),
        SppError::InvalidAddress { uri, reason } => {
            TransportError::Addressing(format!("{uri}: {reason}"))
        }
        other => TransportError::Spp(other),
    }
}

fn routing_key(address: SppAddress) -> String {
    match address.sub_id {
        Some(sub) => format!("{}/{}/{sub}", address.qualifier, address.apid),
        None => format!("{}/{}", address.qualifier, address.apid),
    }
}

impl Binding for SppBinding {
    fn protocol(&self) -> Protocol {
        Protocol::Malspp
    }

    fn own_root(&self) -> &str {
        &self.root
    }

    fn root_of(&self, uri: &Uri) -> Result<String> {
        let root = self.parse(uri)?.root();
        Ok(root.to_uri().map_err(spp_error)?.to_string())
    }

    fn routing_key(&self, uri: &Uri) -> Result<String> {
        Ok(routing_key(self.parse(uri)?))
    }

    fn routing_name(&self, _local_name: &str, taken: &dyn Fn(&str) -> bool) -> Result<String> {
        (0..=u8::MAX)
            .map(|sub| routing_key(SppAddress { sub_id: Some(sub), ..self.address }))
            .find(|name| !taken(name))
            .ok_or_else(|| {
                TransportError::Config(format!("no free sub-identifier under {}", self.root))
            })
    }

    fn endpoint_uri(&self, routing_name: &str) -> Result<Uri> {
        Ok(Uri::parse(&format!("{PROTOCOL}://{routing_name}"))?)
    }

    fn link_address(&self, root: &str) -> Result<String> {
        let address = self.parse(&Uri::parse(root)?)?;
        Ok(self
            .config
            .link_for(address.qualifier, address.apid)
            .to_string())
    }

    fn encode(&self, message: &Message) -> Result<Vec<Bytes>> {
        let mut sequence = self.sequence.lock();
        self.codec
            .encode(message, &mut sequence)
            .map_err(spp_error)
    }

    fn open_stream(&self, stream: LinkStream) -> Result<(Box<dyn UnitWriter>, Box<dyn MessageSource>)> {
        let source = PacketSource {
            reader: PacketReader::new(stream.try_clone()?),
            reassembler: self.codec.new_reassembler(),
            codec: self.codec.clone(),
            timeout: self.config.reassembly_timeout(),
            last_sweep: Instant::now(),
            full_payload: self.full_payload,
        };
        Ok((Box::new(PacketWriter::new(stream)), Box::new(source)))
    }
}

impl UnitWriter for PacketWriter<LinkStream> {
    fn write_unit(&mut self, unit: &[u8]) -> Result<()> {
        Ok(self.write_packet(unit)?)
    }
}

struct PacketSource {
    reader: PacketReader<LinkStream>,
    reassembler: Reassembler<SppHeaderCodec>,
    codec: SppMessageCodec,
    timeout: Duration,
    last_sweep: Instant,
    full_payload: bool,
}

impl PacketSource {
    fn sweep(&mut self) {
        if self.last_sweep.elapsed() < self.timeout {
            return;
        }
        let evicted = self.reassembler.evict_older_than(self.timeout);
        if evicted > 0 {
            warn!(evicted, "dropped stale partial messages");
        }
        self.last_sweep = Instant::now();
    }
}

impl MessageSource for PacketSource {
    fn next_message(&mut self) -> Result<Message> {
        loop {
            if let Some(assembled) = self.reassembler.poll_ready() {
                match self.codec.decode(&assembled) {
                    Ok(message) => return Ok(message),
                    Err(err) => {
                        warn!(error = %err, bytes = assembled.len(), "discarding undecodable message");
                        continue;
                    }
                }
            }

            let packet = self.reader.read_packet().map_err(|err| match err {
                SppError::Truncated { .. } | SppError::InvalidHeader(_) => {
                    TransportError::Decoding(err.to_string())
                }
                other => TransportError::Spp(other),
            })?;
            if self.full_payload {
                debug!(packet = %hex::encode(&packet), "packet received");
            } else {
                debug!(bytes = packet.len(), "packet received");
            }
            self.reassembler
                .add_segment(packet)
                .map_err(|err| TransportError::Decoding(err.to_string()))?;
            self.sweep();
        }
    }
}

#[cfg(test)]
mod tests {
    use spacebus_message::{
        stage, BinaryElementCodec, BodyPart, Element, ElementKind, InteractionType, MessageBody,
        MessageHeader, OperationId,
    };

    use super::*;

    fn config(max_packet_size: usize) -> TransportConfig {
        let mut config = TransportConfig::default().with_protocol(Protocol::Malspp);
        config.spp.apid = 12;
        config.spp.max_packet_size = max_packet_size;
        config.spp = config.spp.with_route(247, 30, "10.1.1.1:5000");
        config
    }

    fn binding(max_packet_size: usize) -> SppBinding {
        SppBinding::new(&config(max_packet_size), Arc::new(BinaryElementCodec))
            .expect("binding should build")
    }

    fn message(blob: Bytes) -> Message {
        let header = MessageHeader::new(
            Uri::parse("malspp://247/12/0").expect("uri should parse"),
            Uri::parse("malspp://247/30/4").expect("uri should parse"),
            InteractionType::Submit,
            stage::SUBMIT,
            31,
            OperationId::new(3, 4, 5, 1),
        );
        Message::new(header, MessageBody::Plain(vec![Element::Blob(blob).into()]))
    }

    #[test]
    fn addressing_rules() {
        let binding = binding(1024);
        assert_eq!(binding.own_root(), "malspp://247/12");

        let uri = Uri::parse("malspp://247/30/4").expect("uri should parse");
        assert_eq!(binding.root_of(&uri).expect("root"), "malspp://247/30");
        assert_eq!(binding.routing_key(&uri).expect("key"), "247/30/4");
        assert_eq!(
            binding.link_address("malspp://247/30").expect("route"),
            "10.1.1.1:5000"
        );
        assert_eq!(
            binding.link_address("malspp://247/31").expect("default link"),
            "127.0.0.1:4096"
        );
        assert!(matches!(
            binding.root_of(&Uri::parse("maltcp://127.0.0.1:1/x").expect("uri should parse")),
            Err(TransportError::Addressing(_))
        ));
    }

    #[test]
    fn routing_names_take_the_first_free_sub_id() {
        let binding = binding(1024);
        let name = binding
            .routing_name("svc", &|name| name == "247/12/0" || name == "247/12/1")
            .expect("a sub id should be free");
        assert_eq!(name, "247/12/2");
        assert_eq!(
            binding.endpoint_uri(&name).expect("uri").as_str(),
            "malspp://247/12/2"
        );
        assert!(binding.routing_name("svc", &|_| true).is_err());
    }

    #[test]
    fn packet_limit_too_small_is_config_error() {
        let binding = binding(24);
        let err = binding
            .encode(&message(Bytes::from_static(b"payload")))
            .expect_err("header alone fills the packet");
        assert!(matches!(err, TransportError::Config(_)), "{err}");
    }

    #[test]
    fn sequence_counter_advances_across_messages() {
        let binding = binding(128);
        let first = binding
            .encode(&message(Bytes::from(vec![1u8; 300])))
            .expect("message should encode");
        let second = binding
            .encode(&message(Bytes::from_static(b"x")))
            .expect("message should encode");
        let count = |packet: &Bytes| {
            spacebus_spp::primary::read_sequence(packet)
                .expect("packet should carry a sequence word")
                .1
        };
        assert!(first.len() > 1);
        assert_eq!(count(&second[0]), first.len() as u16);
    }

    #[cfg(unix)]
    #[test]
    fn segmented_message_crosses_a_stream() {
        let binding = binding(128);
        let (left, right) = LinkStream::pair().expect("pair should open");
        let (mut writer, _left) = binding.open_stream(left).expect("left should open");
        let (_right_writer, mut source) = binding.open_stream(right).expect("right should open");

        let blob = Bytes::from((0..2_000u32).map(|i| i as u8).collect::<Vec<_>>());
        let original = message(blob.clone());
        let packets = binding.encode(&original).expect("message should encode");
        assert!(packets.len() > 10);
        for packet in &packets {
            writer.write_unit(packet).expect("packet should write");
        }

        let received = source.next_message().expect("message should reassemble");
        assert_eq!(received.header, original.header);
        let MessageBody::Plain(parts) = received.body else {
            panic!("expected plain body");
        };
        assert!(matches!(parts[0], BodyPart::Encoded(_)));
        assert_eq!(
            parts[0]
                .decode(ElementKind::Blob, &BinaryElementCodec)
                .expect("blob should decode"),
            Some(Element::Blob(blob))
        );
    }
}
