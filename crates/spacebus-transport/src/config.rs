//! Transport configuration.
//!
//! Built with [`TransportConfig::default`], a struct literal, serde, or from
//! a flat `spacebus.*` property map via [`TransportConfig::from_properties`].

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use spacebus_spp::{FieldSelection, MAX_PACKET_SIZE, PRIMARY_HEADER_SIZE};
use tracing::debug;

use crate::error::{Result, TransportError};

const PREFIX: &str = "spacebus.";
const ROUTE_PREFIX: &str = "spacebus.spp.route.";

/// Link protocol a transport speaks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Framed messages over a byte stream.
    #[default]
    Maltcp,
    /// CCSDS Space Packets.
    Malspp,
}

impl Protocol {
    pub fn scheme(self) -> &'static str {
        match self {
            Self::Maltcp => "maltcp",
            Self::Malspp => spacebus_spp::PROTOCOL,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

impl FromStr for Protocol {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "maltcp" => Ok(Self::Maltcp),
            "malspp" => Ok(Self::Malspp),
            other => Err(TransportError::Config(format!("unknown protocol: {other}"))),
        }
    }
}

/// Space Packet binding settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SppConfig {
    /// Whole-packet size limit, primary header included.
    pub max_packet_size: usize,
    /// Qualifier of this transport's APID; also the link qualifier.
    pub qualifier: u16,
    pub apid: u16,
    /// Link address used for every destination without a route.
    pub link: String,
    /// `"<qualifier>/<apid>"` to link address overrides.
    pub routes: HashMap<String, String>,
    pub include: FieldSelection,
    pub reassembly_timeout_ms: u64,
}

impl Default for SppConfig {
    fn default() -> Self {
        Self {
            max_packet_size: MAX_PACKET_SIZE,
            qualifier: 247,
            apid: 1,
            link: "127.0.0.1:4096".to_string(),
            routes: HashMap::new(),
            include: FieldSelection::all(),
            reassembly_timeout_ms: 30_000,
        }
    }
}

impl SppConfig {
    pub fn reassembly_timeout(&self) -> Duration {
        Duration::from_millis(self.reassembly_timeout_ms)
    }

    /// Link address for the packet root `qualifier/apid`.
    pub fn link_for(&self, qualifier: u16, apid: u16) -> &str {
        self.routes
            .get(&format!("{qualifier}/{apid}"))
            .map(String::as_str)
            .unwrap_or(&self.link)
    }

    pub fn with_route(mut self, qualifier: u16, apid: u16, address: impl Into<String>) -> Self {
        self.routes
            .insert(format!("{qualifier}/{apid}"), address.into());
        self
    }
}

/// Settings for one transport instance.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub protocol: Protocol,
    /// Address the link listener binds.
    pub listen: String,
    /// Length-prefix each body part instead of writing elements inline.
    pub body_wrap: bool,
    /// Deliver messages for local endpoints without touching the wire.
    pub fastpath: bool,
    pub workers_max: usize,
    pub workers_min: usize,
    pub worker_idle_timeout_ms: u64,
    /// Connections kept per destination root.
    pub pool_width: usize,
    /// Upper bound on one outgoing dial.
    pub connect_timeout_ms: u64,
    /// How long delivery waits on a full listener queue.
    pub delivery_timeout_ms: u64,
    /// Queue depth of [`Endpoint::listen`](crate::Endpoint::listen).
    pub listener_capacity: usize,
    /// Log every wire unit in hex.
    pub debug_full_payload: bool,
    pub spp: SppConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            protocol: Protocol::Maltcp,
            listen: "127.0.0.1:0".to_string(),
            body_wrap: true,
            fastpath: true,
            workers_max: 8,
            workers_min: 1,
            worker_idle_timeout_ms: 30_000,
            pool_width: 1,
            connect_timeout_ms: 5_000,
            delivery_timeout_ms: 10_000,
            listener_capacity: 256,
            debug_full_payload: false,
            spp: SppConfig::default(),
        }
    }
}

impl TransportConfig {
    /// Build a configuration from `spacebus.*` properties.
    ///
    /// Unknown keys are ignored; values that do not parse are errors.
    pub fn from_properties(properties: &HashMap<String, String>) -> Result<Self> {
        let mut config = Self::default();
        let mut keys: Vec<&String> = properties.keys().collect();
        keys.sort();

        for key in keys {
            let value = properties[key].trim();
            if let Some(route) = key.strip_prefix(ROUTE_PREFIX) {
                config
                    .spp
                    .routes
                    .insert(route.to_string(), value.to_string());
                continue;
            }
            let Some(name) = key.strip_prefix(PREFIX) else {
                debug!(%key, "ignoring non-spacebus property");
                continue;
            };
            match name {
                "protocol" => config.protocol = value.parse()?,
                "listen" => config.listen = value.to_string(),
                "body.wrap" => config.body_wrap = parse(key, value)?,
                "fastpath" => config.fastpath = parse(key, value)?,
                "workers.max" => config.workers_max = parse(key, value)?,
                "workers.min" => config.workers_min = parse(key, value)?,
                "workers.idle_timeout_ms" => config.worker_idle_timeout_ms = parse(key, value)?,
                "channel.pool_width" => config.pool_width = parse(key, value)?,
                "connect.timeout_ms" => config.connect_timeout_ms = parse(key, value)?,
                "delivery.timeout_ms" => config.delivery_timeout_ms = parse(key, value)?,
                "listener.capacity" => config.listener_capacity = parse(key, value)?,
                "debug.full_payload" => config.debug_full_payload = parse(key, value)?,
                "spp.max_packet_size" => config.spp.max_packet_size = parse(key, value)?,
                "spp.qualifier" => config.spp.qualifier = parse(key, value)?,
                "spp.apid" => config.spp.apid = parse(key, value)?,
                "spp.link" => config.spp.link = value.to_string(),
                "spp.reassembly_timeout_ms" => config.spp.reassembly_timeout_ms = parse(key, value)?,
                "spp.include.priority" => config.spp.include.priority = parse(key, value)?,
                "spp.include.timestamp" => config.spp.include.timestamp = parse(key, value)?,
                "spp.include.network_zone" => config.spp.include.network_zone = parse(key, value)?,
                "spp.include.session_name" => config.spp.include.session_name = parse(key, value)?,
                "spp.include.domain" => config.spp.include.domain = parse(key, value)?,
                "spp.include.authentication_id" => {
                    config.spp.include.authentication_id = parse(key, value)?
                }
                _ => debug!(%key, "ignoring unknown property"),
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the transport cannot run with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| Err(TransportError::Config(message));
        if self.listen.is_empty() {
            return invalid("listen address is empty".into());
        }
        if self.workers_max == 0 {
            return invalid("workers.max must be at least 1".into());
        }
        if self.workers_min > self.workers_max {
            return invalid(format!(
                "workers.min {} exceeds workers.max {}",
                self.workers_min, self.workers_max
            ));
        }
        if self.pool_width == 0 {
            return invalid("channel.pool_width must be at least 1".into());
        }
        if self.connect_timeout_ms == 0 {
            return invalid("connect.timeout_ms must be at least 1".into());
        }
        if self.listener_capacity == 0 {
            return invalid("listener.capacity must be at least 1".into());
        }
        if self.protocol == Protocol::Malspp {
            let size = self.spp.max_packet_size;
            if size <= PRIMARY_HEADER_SIZE || size > MAX_PACKET_SIZE {
                return invalid(format!(
                    "spp.max_packet_size {size} outside {}..={MAX_PACKET_SIZE}",
                    PRIMARY_HEADER_SIZE + 1
                ));
            }
            if self.spp.apid > spacebus_spp::primary::MAX_APID {
                return invalid(format!("spp.apid {} is not an 11-bit number", self.spp.apid));
            }
            for route in self.spp.routes.keys() {
                if parse_root_key(route).is_none() {
                    return invalid(format!("route key {route} is not <qualifier>/<apid>"));
                }
            }
        }
        Ok(())
    }

    pub fn worker_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_idle_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_listen(mut self, listen: impl Into<String>) -> Self {
        self.listen = listen.into();
        self
    }

    pub fn with_fastpath(mut self, fastpath: bool) -> Self {
        self.fastpath = fastpath;
        self
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| TransportError::Config(format!("{key}: cannot parse {value:?}")))
}

fn parse_root_key(key: &str) -> Option<(u16, u16)> {
    let (qualifier, apid) = key.split_once('/')?;
    Some((qualifier.parse().ok()?, apid.parse().ok()?))
}
