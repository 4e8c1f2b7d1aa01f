use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{LinkError, Result};
use crate::stream::LinkStream;

/// Dial timeout used by [`TcpLink::connect`].
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// TCP link listener.
///
/// Provides bind/accept/connect over TCP. Accepted and connected streams
/// have `TCP_NODELAY` set: transport units are small and latency bound.
pub struct TcpLink {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpLink {
    /// Bind and listen on `address` (`host:port`, port 0 picks a free port).
    pub fn bind(address: &str) -> Result<Self> {
        let addr = resolve(address)?;
        let listener = TcpListener::bind(addr).map_err(|e| LinkError::Bind {
            address: address.to_string(),
            source: e,
        })?;
        let local_addr = listener.local_addr().map_err(|e| LinkError::Bind {
            address: address.to_string(),
            source: e,
        })?;

        info!(%local_addr, "listening on tcp link");

        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Accept an incoming connection (blocking).
    pub fn accept(&self) -> Result<LinkStream> {
        let (stream, peer) = self.listener.accept().map_err(LinkError::Accept)?;
        stream.set_nodelay(true)?;
        debug!(%peer, "accepted connection");
        Ok(LinkStream::from_tcp(stream))
    }

    /// Connect to a listening TCP link, giving up after
    /// [`DEFAULT_CONNECT_TIMEOUT`].
    pub fn connect(address: &str) -> Result<LinkStream> {
        Self::connect_timeout(address, DEFAULT_CONNECT_TIMEOUT)
    }

    /// Connect to a listening TCP link, giving up after `timeout`.
    pub fn connect_timeout(address: &str, timeout: Duration) -> Result<LinkStream> {
        let addr = resolve(address)?;
        let stream = TcpStream::connect_timeout(&addr, timeout).map_err(|e| LinkError::Connect {
            address: address.to_string(),
            source: e,
        })?;
        stream.set_nodelay(true)?;
        debug!(%addr, timeout_ms = timeout.as_millis() as u64, "connected to tcp link");
        Ok(LinkStream::from_tcp(stream))
    }

    /// The address this link is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Unblock a thread parked in [`TcpLink::accept`].
    ///
    /// Opens and immediately drops a connection to ourselves; the accept loop
    /// is expected to check its own shutdown flag after every accept.
    pub fn wake(&self) {
        let mut target = self.local_addr;
        if target.ip().is_unspecified() {
            target.set_ip(std::net::Ipv4Addr::LOCALHOST.into());
        }
        if let Err(err) = TcpStream::connect(target) {
            debug!(%target, error = %err, "wake connection failed");
        }
    }

    /// Transport name for diagnostics.
    pub fn link_name(&self) -> &'static str {
        "tcp"
    }
}

fn resolve(address: &str) -> Result<SocketAddr> {
    let mut addrs = address
        .to_socket_addrs()
        .map_err(|e| LinkError::InvalidAddress {
            address: address.to_string(),
            reason: e.to_string(),
        })?;
    addrs.next().ok_or_else(|| LinkError::InvalidAddress {
        address: address.to_string(),
        reason: "address resolved to nothing".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    #[test]
    fn test_bind_accept_connect() {
        let link = TcpLink::bind("127.0.0.1:0").unwrap();
        let addr = link.local_addr().to_string();

        let handle = std::thread::spawn(move || {
            let mut client = TcpLink::connect(&addr).unwrap();
            client.write_all(b"hello").unwrap();
        });

        let mut server = link.accept().unwrap();
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        handle.join().unwrap();
    }

    #[test]
    fn test_invalid_address_rejected() {
        let result = TcpLink::bind("not an address");
        assert!(matches!(result, Err(LinkError::InvalidAddress { .. })));
    }

    #[test]
    fn test_connect_refused() {
        // Bind then drop to get a port nobody listens on.
        let port = TcpLink::bind("127.0.0.1:0").unwrap().local_addr().port();
        let result = TcpLink::connect(&format!("127.0.0.1:{port}"));
        assert!(matches!(result, Err(LinkError::Connect { .. })));
    }

    #[test]
    fn test_connect_timeout_bounds_unreachable_dial() {
        // TEST-NET-1 is unroutable.
        let started = std::time::Instant::now();
        let result = TcpLink::connect_timeout("192.0.2.1:9", Duration::from_millis(200));
        assert!(matches!(result, Err(LinkError::Connect { .. })));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn test_wake_unblocks_accept() {
        let link = std::sync::Arc::new(TcpLink::bind("0.0.0.0:0").unwrap());
        let acceptor = {
            let link = std::sync::Arc::clone(&link);
            std::thread::spawn(move || link.accept().is_ok())
        };

        link.wake();
        assert!(acceptor.join().unwrap());
    }
}
