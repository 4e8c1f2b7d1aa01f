use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use spacebus_message::{stage, BinaryElementCodec, InteractionType, Message, QosProperties};
use spacebus_transport::{Endpoint, Protocol, Transport, TransportConfig};

use crate::cmd::EchoArgs;
use crate::exit::{transport_error, CliError, CliResult, SUCCESS};
use crate::output::{print_json, print_message, OutputFormat};

const POLL: Duration = Duration::from_millis(200);

#[derive(Serialize)]
struct Ready<'a> {
    event: &'static str,
    uri: &'a str,
    listen: String,
}

pub fn run(args: EchoArgs, format: OutputFormat) -> CliResult<i32> {
    let protocol = Protocol::from(args.protocol);
    let mut config = TransportConfig::default()
        .with_protocol(protocol)
        .with_listen(args.listen.clone());
    config.spp.apid = args.apid;

    let transport = Transport::open(config, Arc::new(BinaryElementCodec))
        .map_err(|err| transport_error("open failed", err))?;
    let endpoint = transport
        .create_endpoint(&args.name, QosProperties::new())
        .map_err(|err| transport_error("endpoint setup failed", err))?;
    let inbox = endpoint.listen();

    let ready = Ready {
        event: "ready",
        uri: endpoint.uri().as_str(),
        listen: transport.local_addr().to_string(),
    };
    match format {
        OutputFormat::Json => print_json(&ready),
        _ => println!("echo endpoint {} listening on {}", ready.uri, ready.listen),
    }
    tracing::info!(uri = %endpoint.uri(), "echo endpoint ready");

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut echoed = 0usize;
    while running.load(Ordering::SeqCst) {
        if args.count.is_some_and(|count| echoed >= count) {
            break;
        }
        let Some(message) = inbox.recv_timeout(POLL) else {
            continue;
        };
        print_message(&message, format);
        match echo(&endpoint, &message) {
            Ok(true) => echoed += 1,
            Ok(false) => {}
            Err(err) => tracing::warn!(error = %err, "echo failed"),
        }
    }

    transport
        .close()
        .map_err(|err| transport_error("close failed", err))?;
    Ok(SUCCESS)
}

/// Answer `message` with its own body. Returns whether anything was sent.
fn echo(endpoint: &Endpoint, message: &Message) -> spacebus_transport::Result<bool> {
    let Some(reply) = answer(endpoint, message)? else {
        tracing::debug!(
            interaction_type = ?message.header.interaction_type,
            interaction_stage = message.header.interaction_stage,
            "not echoing"
        );
        return Ok(false);
    };
    tracing::info!(
        transaction_id = message.header.transaction_id,
        uri_to = %reply.header.uri_to,
        "echoing message"
    );
    endpoint.send(reply)?;
    Ok(true)
}

fn answer(endpoint: &Endpoint, message: &Message) -> spacebus_transport::Result<Option<Message>> {
    let header = &message.header;
    if header.is_error_message {
        return Ok(None);
    }
    let body = message.body.clone();
    let reply = match (header.interaction_type, header.interaction_stage) {
        (InteractionType::Send, stage::SEND) => endpoint.create_message(
            &header.uri_from,
            header.operation_id(),
            InteractionType::Send,
            stage::SEND,
            header.transaction_id,
            body,
        )?,
        (InteractionType::Submit, stage::SUBMIT) => {
            endpoint.create_reply(message, stage::SUBMIT_ACK, body)?
        }
        (InteractionType::Request, stage::REQUEST) => {
            endpoint.create_reply(message, stage::REQUEST_RESPONSE, body)?
        }
        _ => return Ok(None),
    };
    Ok(Some(reply))
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| {
        CliError::new(
            crate::exit::INTERNAL,
            format!("signal handler setup failed: {err}"),
        )
    })
}

#[cfg(test)]
mod tests {
    use spacebus_message::{Element, MessageBody, MessageHeader, OperationId, Uri};

    use super::*;

    fn incoming(interaction_type: InteractionType, interaction_stage: u8) -> Message {
        let header = MessageHeader::new(
            Uri::parse("maltcp://127.0.0.1:9000/client").expect("uri should parse"),
            Uri::parse("maltcp://127.0.0.1:9001/echo").expect("uri should parse"),
            interaction_type,
            interaction_stage,
            12,
            OperationId::new(1, 1, 1, 1),
        );
        Message::new(header, MessageBody::Plain(vec![Element::String("hi".into()).into()]))
    }

    fn endpoint(transport: &Transport) -> Endpoint {
        transport
            .create_endpoint("echo", QosProperties::new())
            .expect("endpoint should be created")
    }

    fn transport() -> Transport {
        Transport::open(TransportConfig::default(), Arc::new(BinaryElementCodec))
            .expect("transport should open")
    }

    #[test]
    fn request_is_answered_with_the_same_body() {
        let transport = transport();
        let endpoint = endpoint(&transport);
        let request = incoming(InteractionType::Request, stage::REQUEST);
        let reply = answer(&endpoint, &request)
            .expect("answer should build")
            .expect("request should be answered");
        assert_eq!(reply.header.interaction_stage, stage::REQUEST_RESPONSE);
        assert_eq!(reply.header.uri_to, request.header.uri_from);
        assert_eq!(reply.body, request.body);
    }

    #[test]
    fn send_is_echoed_as_a_new_send() {
        let transport = transport();
        let endpoint = endpoint(&transport);
        let send = incoming(InteractionType::Send, stage::SEND);
        let reply = answer(&endpoint, &send)
            .expect("answer should build")
            .expect("send should be echoed");
        assert_eq!(reply.header.interaction_type, InteractionType::Send);
        assert_eq!(reply.header.uri_to, send.header.uri_from);
    }

    #[test]
    fn acknowledgements_and_errors_are_not_echoed() {
        let transport = transport();
        let endpoint = endpoint(&transport);
        let ack = incoming(InteractionType::Submit, stage::SUBMIT_ACK);
        assert!(answer(&endpoint, &ack).expect("answer should run").is_none());

        let mut error = incoming(InteractionType::Request, stage::REQUEST);
        error.header.is_error_message = true;
        assert!(answer(&endpoint, &error).expect("answer should run").is_none());
    }
}
