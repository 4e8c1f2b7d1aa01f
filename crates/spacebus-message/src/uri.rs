use std::fmt;
use std::str::FromStr;

use crate::error::{MessageError, Result};

const SCHEME_DELIMITER: &str = "://";
const SERVICE_DELIMITER: char = '/';

/// Wire address of an endpoint: `protocol "://" authority [ "/" routing_name ]`.
///
/// The root address (`protocol://authority`) identifies the destination
/// process; the routing name selects the endpoint inside it.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uri {
    value: String,
    protocol_end: usize,
    root_end: usize,
}

impl Uri {
    pub fn parse(value: &str) -> Result<Self> {
        let invalid = |reason| MessageError::InvalidUri {
            uri: value.to_string(),
            reason,
        };

        let protocol_end = value
            .find(SCHEME_DELIMITER)
            .ok_or_else(|| invalid("missing \"://\""))?;
        if protocol_end == 0 {
            return Err(invalid("empty protocol"));
        }

        let authority_start = protocol_end + SCHEME_DELIMITER.len();
        let root_end = value[authority_start..]
            .find(SERVICE_DELIMITER)
            .map(|i| authority_start + i)
            .unwrap_or(value.len());
        if root_end == authority_start {
            return Err(invalid("empty transport address"));
        }

        Ok(Self {
            value: value.to_string(),
            protocol_end,
            root_end,
        })
    }

    /// Build `protocol://authority/routing_name`.
    pub fn from_parts(protocol: &str, authority: &str, routing_name: &str) -> Result<Self> {
        if routing_name.is_empty() {
            Self::parse(&format!("{protocol}{SCHEME_DELIMITER}{authority}"))
        } else {
            Self::parse(&format!(
                "{protocol}{SCHEME_DELIMITER}{authority}{SERVICE_DELIMITER}{routing_name}"
            ))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn protocol(&self) -> &str {
        &self.value[..self.protocol_end]
    }

    /// Transport address between `://` and the first `/`.
    pub fn authority(&self) -> &str {
        &self.value[self.protocol_end + SCHEME_DELIMITER.len()..self.root_end]
    }

    pub fn root_address(&self) -> &str {
        &self.value[..self.root_end]
    }

    /// Everything after the service delimiter; empty for a bare root.
    pub fn routing_name(&self) -> &str {
        self.value
            .get(self.root_end + 1..)
            .unwrap_or_default()
    }

    pub fn is_root(&self) -> bool {
        self.routing_name().is_empty()
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl fmt::Debug for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uri({})", self.value)
    }
}

impl FromStr for Uri {
    type Err = MessageError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl AsRef<str> for Uri {
    fn as_ref(&self) -> &str {
        &self.value
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn splits_stream_address() {
        let uri = Uri::parse("maltcp://127.0.0.1:1024/Monitor-abc").unwrap();
        assert_eq!(uri.protocol(), "maltcp");
        assert_eq!(uri.authority(), "127.0.0.1:1024");
        assert_eq!(uri.root_address(), "maltcp://127.0.0.1:1024");
        assert_eq!(uri.routing_name(), "Monitor-abc");
        assert!(!uri.is_root());
    }

    #[test]
    fn packet_address_keeps_nested_path() {
        let uri = Uri::parse("malspp://247/12/3").unwrap();
        assert_eq!(uri.root_address(), "malspp://247");
        assert_eq!(uri.routing_name(), "12/3");
    }

    #[test]
    fn bare_root_has_empty_routing_name() {
        let uri = Uri::parse("maltcp://host:1").unwrap();
        assert!(uri.is_root());
        assert_eq!(uri.routing_name(), "");
        assert_eq!(uri.root_address(), uri.as_str());
    }

    #[test]
    fn rejects_malformed_addresses() {
        assert!(Uri::parse("no-scheme").is_err());
        assert!(Uri::parse("://host/x").is_err());
        assert!(Uri::parse("maltcp:///x").is_err());
        assert!(Uri::parse("").is_err());
    }

    #[test]
    fn from_parts_matches_parse() {
        let built = Uri::from_parts("maltcp", "h:9", "svc").unwrap();
        assert_eq!(built, Uri::parse("maltcp://h:9/svc").unwrap());
        let root = Uri::from_parts("maltcp", "h:9", "").unwrap();
        assert!(root.is_root());
    }

    proptest! {
        #[test]
        fn parts_survive_parsing(
            protocol in "[a-z]{1,8}",
            authority in "[a-z0-9.:]{1,20}",
            routing in "[A-Za-z0-9/_-]{0,24}",
        ) {
            let uri = Uri::from_parts(&protocol, &authority, &routing)
                .expect("generated parts should form a uri");
            prop_assert_eq!(uri.protocol(), protocol.as_str());
            prop_assert_eq!(uri.authority(), authority.as_str());
            prop_assert_eq!(uri.routing_name(), routing.as_str());
            prop_assert_eq!(uri.is_root(), routing.is_empty());
            prop_assert!(uri.as_str().starts_with(uri.root_address()));
        }
    }
}
