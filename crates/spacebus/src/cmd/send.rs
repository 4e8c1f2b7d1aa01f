use std::fs;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use spacebus_message::{
    errors, stage, BinaryElementCodec, Element, InteractionType, Message, MessageBody,
    OperationId, QosProperties, Uri,
};
use spacebus_spp::SppAddress;
use spacebus_transport::{Protocol, Transport, TransportConfig};

use crate::cmd::SendArgs;
use crate::exit::{
    io_error, transport_error, CliError, CliResult, SUCCESS, TIMEOUT, TRANSPORT_ERROR, USAGE,
};
use crate::output::{print_message, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let wait_timeout = parse_duration(&args.wait_timeout)?;
    let to = Uri::parse(&args.uri)
        .map_err(|err| CliError::new(USAGE, format!("invalid destination: {err}")))?;
    let operation = parse_operation(&args.operation)?;
    let config = config_for(&args, &to)?;

    let transport = Transport::open(config, Arc::new(BinaryElementCodec))
        .map_err(|err| transport_error("open failed", err))?;
    let endpoint = transport
        .create_endpoint("", QosProperties::new())
        .map_err(|err| transport_error("endpoint setup failed", err))?;
    let replies = args.wait.then(|| endpoint.listen_with_capacity(1));

    let body = MessageBody::Plain(vec![resolve_payload(&args)?.into()]);
    let submit = endpoint
        .create_message(
            &to,
            operation,
            InteractionType::Submit,
            stage::SUBMIT,
            transport.next_transaction_id(),
            body,
        )
        .map_err(|err| transport_error("message setup failed", err))?;
    let transaction_id = submit.header.transaction_id;
    endpoint
        .send(submit)
        .map_err(|err| transport_error("send failed", err))?;
    tracing::debug!(transaction_id, uri_to = %to, "submit sent");

    let code = match replies {
        Some(replies) => {
            let reply = replies.recv_timeout(wait_timeout).ok_or_else(|| {
                CliError::new(
                    TIMEOUT,
                    format!("no acknowledgement within {}ms", wait_timeout.as_millis()),
                )
            })?;
            print_message(&reply, format);
            reply_code(&reply)
        }
        None => SUCCESS,
    };

    transport
        .close()
        .map_err(|err| transport_error("close failed", err))?;
    Ok(code)
}

fn config_for(args: &SendArgs, to: &Uri) -> CliResult<TransportConfig> {
    let protocol: Protocol = to
        .protocol()
        .parse()
        .map_err(|err| transport_error("unsupported destination", err))?;
    let mut config = TransportConfig::default()
        .with_protocol(protocol)
        .with_listen(args.listen.clone());

    if protocol == Protocol::Malspp {
        config.spp.apid = args.apid;
        if let Some(link) = &args.link {
            let destination = SppAddress::from_uri(to)
                .map_err(|err| CliError::new(USAGE, format!("invalid destination: {err}")))?;
            config.spp = config
                .spp
                .with_route(destination.qualifier, destination.apid, link.clone());
        }
    }
    Ok(config)
}

fn reply_code(reply: &Message) -> i32 {
    match reply.body {
        MessageBody::Error { number, .. } if reply.header.is_error_message => {
            let name = errors::error_name(number).unwrap_or("UNKNOWN");
            eprintln!("error: destination answered {name} ({number})");
            TRANSPORT_ERROR
        }
        _ => SUCCESS,
    }
}

fn resolve_payload(args: &SendArgs) -> CliResult<Element> {
    if let Some(data) = &args.data {
        return Ok(Element::String(data.clone()));
    }
    if let Some(path) = &args.file {
        return fs::read(path)
            .map(|bytes| Element::Blob(Bytes::from(bytes)))
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err));
    }
    Ok(Element::String(String::new()))
}

fn parse_operation(input: &str) -> CliResult<OperationId> {
    let invalid = || CliError::new(USAGE, format!("invalid operation {input:?}, expected A.S.O.V"));
    let parts: Vec<&str> = input.trim().split('.').collect();
    let [area, service, operation, version] = parts.as_slice() else {
        return Err(invalid());
    };
    Ok(OperationId::new(
        area.parse().map_err(|_| invalid())?,
        service.parse().map_err(|_| invalid())?,
        operation.parse().map_err(|_| invalid())?,
        version.parse().map_err(|_| invalid())?,
    ))
}

fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

#[cfg(test)]
mod tests {
    use spacebus_message::{BodyPart, MessageHeader};

    use super::*;

    fn args(uri: &str) -> SendArgs {
        SendArgs {
            uri: uri.to_string(),
            data: Some("hello".into()),
            file: None,
            wait: false,
            wait_timeout: "5s".into(),
            listen: "127.0.0.1:0".into(),
            link: Some("10.0.0.2:4096".into()),
            apid: 7,
            operation: "1.1.1.1".into(),
        }
    }

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").expect("2s"), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").expect("150ms"), Duration::from_millis(150));
        assert_eq!(parse_duration("3").expect("3"), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
    }

    #[test]
    fn operation_is_four_dotted_numbers() {
        assert_eq!(
            parse_operation("4.2.9.1").expect("operation should parse"),
            OperationId::new(4, 2, 9, 1)
        );
        assert_eq!(parse_operation("4.2.9").expect_err("three parts").code, USAGE);
        assert_eq!(parse_operation("4.x.9.1").expect_err("not a number").code, USAGE);
    }

    #[test]
    fn space_packet_destination_gets_a_route() {
        let uri = Uri::parse("malspp://247/12/3").expect("uri should parse");
        let config = config_for(&args(uri.as_str()), &uri).expect("config should build");
        assert_eq!(config.protocol, Protocol::Malspp);
        assert_eq!(config.spp.apid, 7);
        assert_eq!(config.spp.link_for(247, 12), "10.0.0.2:4096");
    }

    #[test]
    fn unknown_scheme_is_rejected() {
        let uri = Uri::parse("http://example/x").expect("uri should parse");
        assert!(config_for(&args(uri.as_str()), &uri).is_err());
    }

    #[test]
    fn error_reply_maps_to_transport_error_code() {
        let header = MessageHeader::new(
            Uri::parse("maltcp://127.0.0.1:1/a").expect("uri should parse"),
            Uri::parse("maltcp://127.0.0.1:2/b").expect("uri should parse"),
            InteractionType::Submit,
            stage::SUBMIT,
            1,
            OperationId::new(1, 1, 1, 1),
        );
        let request = Message::new(header, MessageBody::empty());
        let error = request.error_reply(errors::DESTINATION_UNKNOWN, None);
        assert_eq!(reply_code(&error), TRANSPORT_ERROR);

        let ack = Message::new(
            request.header.reply(stage::SUBMIT_ACK, false),
            MessageBody::Plain(vec![BodyPart::Absent]),
        );
        assert_eq!(reply_code(&ack), SUCCESS);
    }
}
