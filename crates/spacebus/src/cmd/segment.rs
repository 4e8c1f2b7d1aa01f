use std::fs;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use spacebus_message::{
    stage, BinaryElementCodec, Element, ElementKind, InteractionType, Message, MessageBody,
    MessageHeader, OperationId,
};
use spacebus_spp::{
    FieldSelection, PrimaryHeader, SequenceCounter, SequenceFlags, SppAddress, SppHeaderCodec,
    SppMessageCodec,
};

use crate::cmd::SegmentArgs;
use crate::exit::{io_error, spp_error, CliError, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{print_json, print_table, OutputFormat};

#[derive(Debug, Serialize)]
pub struct SegmentReport {
    pub file: String,
    pub bytes: usize,
    pub limit: usize,
    pub packets: usize,
    pub reassembled: bool,
    pub segments: Vec<SegmentRow>,
}

#[derive(Debug, Serialize)]
pub struct SegmentRow {
    pub index: usize,
    pub flags: &'static str,
    pub sequence_count: u16,
    pub length: usize,
}

pub fn run(args: SegmentArgs, format: OutputFormat) -> CliResult<i32> {
    let data = fs::read(&args.file)
        .map_err(|err| io_error(&format!("failed reading {}", args.file.display()), err))?;
    let report = segment(&args, Bytes::from(data))?;
    tracing::debug!(packets = report.packets, limit = report.limit, "file segmented");

    match format {
        OutputFormat::Json => print_json(&report),
        OutputFormat::Table => print_table(
            &["INDEX", "FLAGS", "SEQUENCE", "LENGTH"],
            report
                .segments
                .iter()
                .map(|row| {
                    vec![
                        row.index.to_string(),
                        row.flags.to_string(),
                        row.sequence_count.to_string(),
                        row.length.to_string(),
                    ]
                })
                .collect(),
        ),
        OutputFormat::Pretty | OutputFormat::Raw => {
            println!(
                "packets={} bytes={} limit={} reassembled={}",
                report.packets, report.bytes, report.limit, report.reassembled
            );
            let markers: Vec<&str> = report.segments.iter().map(|row| row.flags).collect();
            println!("{}", markers.join(" "));
        }
    }
    Ok(SUCCESS)
}

/// Split `data` the way the transport would, then glue it back together.
pub fn segment(args: &SegmentArgs, data: Bytes) -> CliResult<SegmentReport> {
    let elements = Arc::new(BinaryElementCodec);
    let header_codec = SppHeaderCodec::new(args.qualifier, FieldSelection::all(), elements);
    let codec = SppMessageCodec::new(header_codec, !args.inline, args.limit)
        .map_err(|err| spp_error("invalid packet limit", err))?;

    let from = SppAddress::new(args.qualifier, args.apid, Some(0))
        .to_uri()
        .map_err(|err| spp_error("invalid address", err))?;
    let to = SppAddress::new(args.qualifier, args.apid, Some(1))
        .to_uri()
        .map_err(|err| spp_error("invalid address", err))?;
    let header = MessageHeader::new(
        from,
        to,
        InteractionType::Send,
        stage::SEND,
        1,
        OperationId::new(1, 1, 1, 1),
    );
    let message = Message::new(header, MessageBody::Plain(vec![Element::Blob(data.clone()).into()]));

    let packets = codec
        .encode(&message, &mut SequenceCounter::new())
        .map_err(|err| spp_error("segmentation failed", err))?;

    let mut segments = Vec::with_capacity(packets.len());
    for (index, packet) in packets.iter().enumerate() {
        let primary =
            PrimaryHeader::decode(packet).map_err(|err| spp_error("bad packet", err))?;
        segments.push(SegmentRow {
            index,
            flags: flag_name(primary.sequence_flags),
            sequence_count: primary.sequence_count,
            length: packet.len(),
        });
    }

    let mut reassembler = codec.new_reassembler();
    for packet in &packets {
        reassembler
            .add_segment(packet.clone())
            .map_err(|err| spp_error("reassembly failed", err))?;
    }
    let assembled = reassembler
        .poll_ready()
        .ok_or_else(|| CliError::new(DATA_INVALID, "packets did not reassemble"))?;
    let decoded = codec
        .decode(&assembled)
        .map_err(|err| spp_error("reassembled message did not decode", err))?;
    let reassembled = matches!(
        decoded.body,
        MessageBody::Plain(ref parts)
            if parts.first().and_then(|part| {
                part.decode(ElementKind::Blob, &BinaryElementCodec).ok().flatten()
            }) == Some(Element::Blob(data.clone()))
    );

    Ok(SegmentReport {
        file: args.file.display().to_string(),
        bytes: data.len(),
        limit: args.limit,
        packets: packets.len(),
        reassembled,
        segments,
    })
}

fn flag_name(flags: SequenceFlags) -> &'static str {
    match flags {
        SequenceFlags::Standalone => "standalone",
        SequenceFlags::First => "first",
        SequenceFlags::Continuation => "continuation",
        SequenceFlags::Last => "last",
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn args(limit: usize) -> SegmentArgs {
        SegmentArgs {
            file: PathBuf::from("blob.bin"),
            limit,
            qualifier: 247,
            apid: 3,
            inline: false,
        }
    }

    #[test]
    fn small_file_fits_one_packet() {
        let report = segment(&args(1024), Bytes::from_static(b"hello")).expect("segment should run");
        assert_eq!(report.packets, 1);
        assert_eq!(report.segments[0].flags, "standalone");
        assert!(report.reassembled);
    }

    #[test]
    fn large_file_is_marked_first_continuation_last() {
        let data = Bytes::from(vec![0x5a; 1_000]);
        let report = segment(&args(200), data).expect("segment should run");
        assert!(report.packets > 2);
        assert_eq!(report.segments[0].flags, "first");
        assert_eq!(report.segments[1].flags, "continuation");
        assert_eq!(report.segments[report.packets - 1].flags, "last");
        assert!(report.segments.iter().all(|row| row.length <= 200));
        assert_eq!(report.segments[1].sequence_count, 1);
        assert!(report.reassembled);
    }

    #[test]
    fn limit_without_room_is_usage_error() {
        let err = segment(&args(30), Bytes::from_static(b"x")).expect_err("limit is too small");
        assert_eq!(err.code, crate::exit::USAGE);
    }
}
