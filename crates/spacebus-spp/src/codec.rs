use bytes::{Bytes, BytesMut};
use spacebus_message::{decode_body, encode_body, BodyKind, Message};

use crate::counter::{SegmentCounter, SequenceCounter};
use crate::error::{Result, SppError};
use crate::header::SppHeaderCodec;
use crate::primary::MAX_PACKET_SIZE;
use crate::reassembler::Reassembler;
use crate::segmenter::split;

/// Turns whole messages into packets and reassembled packets back into messages.
#[derive(Debug, Clone)]
pub struct SppMessageCodec {
    header: SppHeaderCodec,
    wrap: bool,
    max_packet_size: usize,
}

impl SppMessageCodec {
    pub fn new(header: SppHeaderCodec, wrap: bool, max_packet_size: usize) -> Result<Self> {
        if max_packet_size > MAX_PACKET_SIZE {
            return Err(SppError::InvalidConfig(format!(
                "max packet size {max_packet_size} exceeds {MAX_PACKET_SIZE}"
            )));
        }
        Ok(Self {
            header,
            wrap,
            max_packet_size,
        })
    }

    pub fn header_codec(&self) -> &SppHeaderCodec {
        &self.header
    }

    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    /// Encode and split `message`.
    ///
    /// The caller's exclusive borrow of `sequence` keeps the packets of one
    /// message on consecutive sequence counts.
    pub fn encode(&self, message: &Message, sequence: &mut SequenceCounter) -> Result<Vec<Bytes>> {
        let parts = self.header.encode(&message.header)?;
        let mut body = BytesMut::new();
        encode_body(
            &message.body,
            self.wrap,
            self.header.elements().as_ref(),
            &mut body,
        )?;
        split(
            self.max_packet_size,
            &parts.part1,
            &parts.part2,
            &body,
            sequence,
            &mut SegmentCounter::new(),
        )
    }

    /// Decode a message handed out by [`Reassembler::poll_ready`].
    pub fn decode(&self, assembled: &Bytes) -> Result<Message> {
        let decoded = self.header.decode(assembled)?;
        let kind = BodyKind::select(
            decoded.header.interaction_type,
            decoded.header.interaction_stage,
            decoded.header.is_error_message,
        );
        let body = decode_body(
            kind,
            self.wrap,
            self.header.elements().as_ref(),
            assembled.slice(decoded.payload_offset..),
        )?;
        Ok(Message::new(decoded.header, body))
    }

    pub fn new_reassembler(&self) -> Reassembler<SppHeaderCodec> {
        Reassembler::new(self.header.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use spacebus_message::{
        stage, BinaryElementCodec, BodyPart, Element, InteractionType, MessageBody, MessageHeader,
        OperationId, Uri,
    };

    use super::*;
    use crate::header::FieldSelection;

    fn codec(wrap: bool, limit: usize) -> SppMessageCodec {
        let header = SppHeaderCodec::new(247, FieldSelection::all(), Arc::new(BinaryElementCodec));
        SppMessageCodec::new(header, wrap, limit).unwrap()
    }

    fn message(body: MessageBody) -> Message {
        let header = MessageHeader::new(
            Uri::parse("malspp://100/20/1").unwrap(),
            Uri::parse("malspp://247/30/2").unwrap(),
            InteractionType::Request,
            stage::REQUEST,
            0xDEAD_BEEF,
            OperationId::new(5, 6, 7, 2),
        );
        Message::new(header, body)
    }

    #[test]
    fn large_message_survives_segmentation() {
        let codec = codec(true, 200);
        let blob = bytes::Bytes::from(vec![0x42u8; 5_000]);
        let original = message(MessageBody::Plain(vec![Element::Blob(blob.clone()).into()]));

        let packets = codec.encode(&original, &mut SequenceCounter::new()).unwrap();
        assert!(packets.len() > 1);

        let mut reassembler = codec.new_reassembler();
        for packet in packets.into_iter().rev() {
            reassembler.add_segment(packet).unwrap();
        }
        let decoded = codec.decode(&reassembler.poll_ready().unwrap()).unwrap();

        assert_eq!(decoded.header, original.header);
        let MessageBody::Plain(parts) = decoded.body else {
            panic!("expected plain body");
        };
        assert_eq!(
            parts[0].decode(spacebus_message::ElementKind::Blob, &BinaryElementCodec).unwrap(),
            Some(Element::Blob(blob))
        );
    }

    #[test]
    fn error_reply_decodes_number() {
        let codec = codec(false, 1024);
        let request = message(MessageBody::empty());
        let reply = request.error_reply(spacebus_message::errors::INTERNAL, None);

        let packets = codec.encode(&reply, &mut SequenceCounter::new()).unwrap();
        assert_eq!(packets.len(), 1);
        let decoded = codec.decode(&packets[0]).unwrap();
        assert_eq!(decoded.header, reply.header);
        assert_eq!(
            decoded.body,
            MessageBody::Error {
                number: spacebus_message::errors::INTERNAL,
                extra: BodyPart::Encoded(Bytes::from_static(&[0])),
            }
        );
    }

    #[test]
    fn oversized_limit_rejected() {
        let header = SppHeaderCodec::new(1, FieldSelection::all(), Arc::new(BinaryElementCodec));
        assert!(SppMessageCodec::new(header, true, MAX_PACKET_SIZE + 1).is_err());
    }
}
