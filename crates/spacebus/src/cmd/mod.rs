use clap::{Args, Subcommand, ValueEnum};
use std::path::PathBuf;

use spacebus_transport::Protocol;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod echo;
pub mod inspect;
pub mod segment;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Split a file into Space Packets and report the segmentation.
    Segment(SegmentArgs),
    /// Decode the header of one Space Packet given in hex.
    Inspect(InspectArgs),
    /// Run an endpoint that answers every message with its own body.
    Echo(EchoArgs),
    /// Send a SUBMIT to an endpoint URI.
    Send(SendArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Segment(args) => segment::run(args, format),
        Command::Inspect(args) => inspect::run(args, format),
        Command::Echo(args) => echo::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum ProtocolArg {
    Maltcp,
    Malspp,
}

impl From<ProtocolArg> for Protocol {
    fn from(value: ProtocolArg) -> Self {
        match value {
            ProtocolArg::Maltcp => Protocol::Maltcp,
            ProtocolArg::Malspp => Protocol::Malspp,
        }
    }
}

#[derive(Args, Debug)]
pub struct SegmentArgs {
    /// File to carry as the message body.
    pub file: PathBuf,
    /// Maximum packet size in bytes, headers included.
    #[arg(long, default_value = "1024")]
    pub limit: usize,
    /// APID qualifier of both synthetic endpoints.
    #[arg(long, default_value = "247")]
    pub qualifier: u16,
    /// Destination APID.
    #[arg(long, default_value = "1")]
    pub apid: u16,
    /// Write body elements back to back instead of length-prefixed.
    #[arg(long)]
    pub inline: bool,
}

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Packet bytes in hex; whitespace and a leading 0x are ignored.
    pub hex: String,
    /// APID qualifier of the link the packet came from.
    #[arg(long, default_value = "247")]
    pub qualifier: u16,
}

#[derive(Args, Debug)]
pub struct EchoArgs {
    /// Link address to listen on.
    pub listen: String,
    /// Local name of the echo endpoint.
    #[arg(long, default_value = "echo")]
    pub name: String,
    /// Wire protocol.
    #[arg(long, value_enum, default_value = "maltcp")]
    pub protocol: ProtocolArg,
    /// Own APID when running over Space Packets.
    #[arg(long, default_value = "1")]
    pub apid: u16,
    /// Exit after echoing N messages.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Destination endpoint URI.
    pub uri: String,
    /// String payload.
    #[arg(long, conflicts_with = "file")]
    pub data: Option<String>,
    /// Read a blob payload from file.
    #[arg(long, conflicts_with = "data")]
    pub file: Option<PathBuf>,
    /// Wait for the acknowledgement and print it.
    #[arg(long)]
    pub wait: bool,
    /// Maximum time to wait when --wait is set (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub wait_timeout: String,
    /// Local link address replies come back to.
    #[arg(long, default_value = "127.0.0.1:0")]
    pub listen: String,
    /// Link address of the destination APID (malspp URIs only).
    #[arg(long)]
    pub link: Option<String>,
    /// Own APID (malspp URIs only).
    #[arg(long, default_value = "1")]
    pub apid: u16,
    /// Interaction area, service, operation and version as A.S.O.V.
    #[arg(long, default_value = "1.1.1.1")]
    pub operation: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
