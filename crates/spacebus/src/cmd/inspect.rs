use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use spacebus_message::BinaryElementCodec;
use spacebus_spp::{DecodedPacket, FieldSelection, PacketType, SppHeaderCodec};

use crate::cmd::InspectArgs;
use crate::exit::{spp_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_fields, OutputFormat};

#[derive(Debug, Serialize)]
pub struct PacketReport {
    pub packet_type: &'static str,
    pub apid: u16,
    pub sequence_flags: String,
    pub sequence_count: u16,
    pub packet_length: usize,
    pub uri_from: String,
    pub uri_to: String,
    pub interaction_type: String,
    pub interaction_stage: u8,
    pub area: u16,
    pub service: u16,
    pub operation: u16,
    pub area_version: u8,
    pub transaction_id: u64,
    pub is_error: bool,
    pub qos_level: String,
    pub session: String,
    pub session_name: String,
    pub priority: u32,
    pub timestamp: u64,
    pub network_zone: String,
    pub domain: Vec<String>,
    pub presence_flags: String,
    pub segment_index: Option<u32>,
    pub payload_bytes: usize,
}

pub fn run(args: InspectArgs, format: OutputFormat) -> CliResult<i32> {
    let packet = parse_hex(&args.hex)?;
    let report = inspect(args.qualifier, packet)?;
    let fields = [
        ("packet_type", report.packet_type.to_string()),
        ("apid", report.apid.to_string()),
        ("sequence_flags", report.sequence_flags.clone()),
        ("sequence_count", report.sequence_count.to_string()),
        ("packet_length", report.packet_length.to_string()),
        ("uri_from", report.uri_from.clone()),
        ("uri_to", report.uri_to.clone()),
        ("interaction_type", report.interaction_type.clone()),
        ("interaction_stage", report.interaction_stage.to_string()),
        (
            "operation",
            format!(
                "{}.{}.{}.{}",
                report.area, report.service, report.operation, report.area_version
            ),
        ),
        ("transaction_id", report.transaction_id.to_string()),
        ("is_error", report.is_error.to_string()),
        ("qos_level", report.qos_level.clone()),
        ("session", report.session.clone()),
        ("session_name", report.session_name.clone()),
        ("priority", report.priority.to_string()),
        ("timestamp", report.timestamp.to_string()),
        ("network_zone", report.network_zone.clone()),
        ("domain", report.domain.join(".")),
        ("presence_flags", report.presence_flags.clone()),
        (
            "segment_index",
            report
                .segment_index
                .map(|index| index.to_string())
                .unwrap_or_else(|| "-".to_string()),
        ),
        ("payload_bytes", report.payload_bytes.to_string()),
    ];
    print_fields(&report, &fields, format);
    Ok(SUCCESS)
}

fn parse_hex(input: &str) -> CliResult<Bytes> {
    let cleaned: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    let cleaned = cleaned
        .strip_prefix("0x")
        .or_else(|| cleaned.strip_prefix("0X"))
        .unwrap_or(&cleaned);
    hex::decode(cleaned)
        .map(Bytes::from)
        .map_err(|err| CliError::new(USAGE, format!("packet is not valid hex: {err}")))
}

pub fn inspect(qualifier: u16, packet: Bytes) -> CliResult<PacketReport> {
    let codec = SppHeaderCodec::new(qualifier, FieldSelection::all(), Arc::new(BinaryElementCodec));
    let DecodedPacket {
        primary,
        header,
        flags,
        segment_index,
        payload_offset,
        ..
    } = codec
        .decode(&packet)
        .map_err(|err| spp_error("packet did not decode", err))?;

    Ok(PacketReport {
        packet_type: match primary.packet_type {
            PacketType::Telecommand => "telecommand",
            PacketType::Telemetry => "telemetry",
        },
        apid: primary.apid,
        sequence_flags: format!("{:?}", primary.sequence_flags).to_lowercase(),
        sequence_count: primary.sequence_count,
        packet_length: primary.packet_length(),
        uri_from: header.uri_from.to_string(),
        uri_to: header.uri_to.to_string(),
        interaction_type: format!("{:?}", header.interaction_type),
        interaction_stage: header.interaction_stage,
        area: header.service_area,
        service: header.service,
        operation: header.operation,
        area_version: header.area_version,
        transaction_id: header.transaction_id,
        is_error: header.is_error_message,
        qos_level: format!("{:?}", header.qos_level),
        session: header.session.name().to_string(),
        session_name: header.session_name,
        priority: header.priority,
        timestamp: header.timestamp.as_millis(),
        network_zone: header.network_zone,
        domain: header.domain,
        presence_flags: format!("{:08b}", flags.0),
        segment_index,
        payload_bytes: packet.len().saturating_sub(payload_offset),
    })
}

#[cfg(test)]
mod tests {
    use spacebus_message::{
        stage, InteractionType, Message, MessageBody, MessageHeader, OperationId, Uri,
    };
    use spacebus_spp::{SequenceCounter, SppMessageCodec};

    use super::*;

    fn packet() -> Bytes {
        let codec = SppHeaderCodec::new(247, FieldSelection::all(), Arc::new(BinaryElementCodec));
        let codec = SppMessageCodec::new(codec, true, 1024).expect("codec should build");
        let mut header = MessageHeader::new(
            Uri::parse("malspp://247/5/2").expect("uri should parse"),
            Uri::parse("malspp://247/9/1").expect("uri should parse"),
            InteractionType::Request,
            stage::REQUEST,
            4242,
            OperationId::new(10, 20, 30, 4),
        );
        header.network_zone = "ground".into();
        let packets = codec
            .encode(
                &Message::new(header, MessageBody::empty()),
                &mut SequenceCounter::starting_at(17),
            )
            .expect("message should encode");
        packets[0].clone()
    }

    #[test]
    fn decodes_fields_of_an_encoded_packet() {
        let report = inspect(247, packet()).expect("packet should decode");
        assert_eq!(report.packet_type, "telecommand");
        assert_eq!(report.apid, 9);
        assert_eq!(report.sequence_flags, "standalone");
        assert_eq!(report.sequence_count, 17);
        assert_eq!(report.uri_from, "malspp://247/5/2");
        assert_eq!(report.uri_to, "malspp://247/9/1");
        assert_eq!(report.transaction_id, 4242);
        assert_eq!((report.area, report.service, report.operation, report.area_version), (10, 20, 30, 4));
        assert_eq!(report.network_zone, "ground");
        assert_eq!(report.segment_index, None);
    }

    #[test]
    fn hex_input_tolerates_spacing_and_prefix() {
        assert_eq!(
            parse_hex("0x0a 0B\n0c").expect("hex should parse").as_ref(),
            &[0x0a, 0x0b, 0x0c]
        );
        assert_eq!(parse_hex("xyz").expect_err("not hex").code, USAGE);
    }

    #[test]
    fn truncated_packet_is_data_invalid() {
        let err = inspect(247, Bytes::from_static(&[0x18, 0x01, 0xc0])).expect_err("too short");
        assert_eq!(err.code, crate::exit::DATA_INVALID);
    }
}
