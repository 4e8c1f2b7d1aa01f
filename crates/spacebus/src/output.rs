use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use spacebus_message::{errors, BinaryElementCodec, BodyPart, Element, ElementKind, Message};

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

pub fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn print_table(header: &[&str], rows: Vec<Vec<String>>) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header.to_vec());
    for row in rows {
        table.add_row(row);
    }
    println!("{table}");
}

/// Print name/value pairs; `value` is what JSON output serializes.
pub fn print_fields<T: Serialize>(value: &T, fields: &[(&str, String)], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(value),
        OutputFormat::Table => print_table(
            &["FIELD", "VALUE"],
            fields
                .iter()
                .map(|(name, value)| vec![name.to_string(), value.clone()])
                .collect(),
        ),
        OutputFormat::Pretty | OutputFormat::Raw => {
            let line: Vec<String> = fields
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect();
            println!("{}", line.join(" "));
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

#[derive(Serialize)]
struct MessageOutput<'a> {
    uri_from: &'a str,
    uri_to: &'a str,
    transaction_id: u64,
    interaction_type: String,
    interaction_stage: u8,
    is_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    body: Vec<String>,
    timestamp: u64,
}

pub fn print_message(message: &Message, format: OutputFormat) {
    let header = &message.header;
    let body: Vec<String> = message
        .body
        .clone()
        .into_parts()
        .iter()
        .map(part_preview)
        .collect();

    match format {
        OutputFormat::Json => print_json(&MessageOutput {
            uri_from: header.uri_from.as_str(),
            uri_to: header.uri_to.as_str(),
            transaction_id: header.transaction_id,
            interaction_type: format!("{:?}", header.interaction_type),
            interaction_stage: header.interaction_stage,
            is_error: header.is_error_message,
            error: error_label(message),
            body,
            timestamp: header.timestamp.as_millis(),
        }),
        OutputFormat::Table => print_table(
            &["FROM", "TXN", "TYPE", "STAGE", "BODY"],
            vec![vec![
                header.uri_from.to_string(),
                header.transaction_id.to_string(),
                error_label(message).unwrap_or_else(|| format!("{:?}", header.interaction_type)),
                header.interaction_stage.to_string(),
                body.join(", "),
            ]],
        ),
        OutputFormat::Pretty => println!(
            "from={} txn={} type={:?} stage={} error={} body=[{}]",
            header.uri_from,
            header.transaction_id,
            header.interaction_type,
            header.interaction_stage,
            header.is_error_message,
            body.join(", ")
        ),
        OutputFormat::Raw => {
            for part in message.body.clone().into_parts() {
                if let Some(bytes) = part_bytes(&part) {
                    print_raw(&bytes);
                }
            }
        }
    }
}

fn error_label(message: &Message) -> Option<String> {
    match &message.body {
        spacebus_message::MessageBody::Error { number, .. } if message.header.is_error_message => {
            Some(
                errors::error_name(*number)
                    .map(str::to_string)
                    .unwrap_or_else(|| number.to_string()),
            )
        }
        _ => None,
    }
}

/// Best-effort text for one body part: strings as-is, blobs as UTF-8 when
/// they are, everything else as a size.
pub fn part_preview(part: &BodyPart) -> String {
    match decoded(part) {
        Some(Element::String(text)) => text,
        Some(Element::Blob(blob)) => bytes_preview(&blob),
        Some(other) => format!("{other:?}"),
        None => match part {
            BodyPart::Absent => "<absent>".to_string(),
            BodyPart::Encoded(bytes) => format!("<encoded {} bytes>", bytes.len()),
            BodyPart::Decoded(element) => format!("{element:?}"),
        },
    }
}

fn part_bytes(part: &BodyPart) -> Option<Vec<u8>> {
    match decoded(part)? {
        Element::String(text) => Some(text.into_bytes()),
        Element::Blob(blob) => Some(blob.to_vec()),
        _ => None,
    }
}

fn decoded(part: &BodyPart) -> Option<Element> {
    if let BodyPart::Decoded(element) = part {
        return Some(element.clone());
    }
    [ElementKind::String, ElementKind::Blob]
        .into_iter()
        .find_map(|kind| part.decode(kind, &BinaryElementCodec).ok().flatten())
}

fn bytes_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

#[cfg(test)]
mod tests {
    use bytes::{Bytes, BytesMut};
    use spacebus_message::ElementCodec;

    use super::*;

    fn encoded(element: Element) -> BodyPart {
        let mut buf = BytesMut::new();
        BinaryElementCodec
            .encode(&element, &mut buf)
            .expect("element should encode");
        BodyPart::Encoded(buf.freeze())
    }

    #[test]
    fn previews_encoded_strings_and_blobs() {
        assert_eq!(part_preview(&encoded(Element::String("hello".into()))), "hello");
        assert_eq!(
            part_preview(&encoded(Element::Blob(Bytes::from_static(&[0xff, 0xfe])))),
            "<binary 2 bytes>"
        );
        assert_eq!(part_preview(&BodyPart::Absent), "<absent>");
    }

    #[test]
    fn raw_bytes_come_from_strings() {
        assert_eq!(
            part_bytes(&BodyPart::Decoded(Element::String("abc".into()))),
            Some(b"abc".to_vec())
        );
        assert_eq!(part_bytes(&BodyPart::Decoded(Element::UInteger(3))), None);
    }
}
