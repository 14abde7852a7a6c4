//! Endpoint address parsing and resolution.
//!
//! Endpoints are written `proto://rest`: `tcp://host:port` for stream
//! transports and `inproc://name` for in-process pipes. TCP hosts are
//! resolved once, at bind or connect time; the resolved form is
//! immutable afterwards.

use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};

use crate::error::{KeelsonError, KeelsonResult};

/// A parsed, resolved endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// TCP endpoint with a resolved socket address.
    Tcp(SocketAddr),
    /// In-process endpoint, identified by name.
    Inproc(String),
}

impl Endpoint {
    /// Parse and resolve an endpoint string.
    ///
    /// Hostnames are resolved synchronously; with `ipv4_only` set,
    /// IPv6 results are skipped.
    ///
    /// # Examples
    ///
    /// ```
    /// use keelson_core::endpoint::Endpoint;
    ///
    /// let tcp = Endpoint::resolve("tcp://127.0.0.1:5555", false).unwrap();
    /// assert_eq!(tcp.to_string(), "tcp://127.0.0.1:5555");
    ///
    /// let inproc = Endpoint::resolve("inproc://workers", false).unwrap();
    /// assert_eq!(inproc.to_string(), "inproc://workers");
    /// ```
    pub fn resolve(endpoint: &str, ipv4_only: bool) -> KeelsonResult<Self> {
        let (proto, rest) = endpoint
            .split_once("://")
            .ok_or_else(|| KeelsonError::InvalidEndpoint(endpoint.to_string()))?;
        match proto {
            "tcp" => {
                if rest.is_empty() {
                    return Err(KeelsonError::InvalidEndpoint(endpoint.to_string()));
                }
                let mut addrs = rest
                    .to_socket_addrs()
                    .map_err(|_| KeelsonError::InvalidEndpoint(endpoint.to_string()))?;
                let addr = if ipv4_only {
                    addrs.find(SocketAddr::is_ipv4)
                } else {
                    addrs.next()
                };
                addr.map(Endpoint::Tcp)
                    .ok_or_else(|| KeelsonError::InvalidEndpoint(endpoint.to_string()))
            }
            "inproc" => {
                if rest.is_empty() {
                    return Err(KeelsonError::InvalidEndpoint(endpoint.to_string()));
                }
                Ok(Endpoint::Inproc(rest.to_string()))
            }
            _ => Err(KeelsonError::InvalidEndpoint(endpoint.to_string())),
        }
    }

    /// The socket address of a TCP endpoint.
    #[must_use]
    pub fn tcp_addr(&self) -> Option<SocketAddr> {
        match self {
            Endpoint::Tcp(addr) => Some(*addr),
            Endpoint::Inproc(_) => None,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(addr) => write!(f, "tcp://{addr}"),
            Endpoint::Inproc(name) => write!(f, "inproc://{name}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tcp_literal() {
        let ep = Endpoint::resolve("tcp://127.0.0.1:5555", false).unwrap();
        assert_eq!(
            ep.tcp_addr().unwrap(),
            "127.0.0.1:5555".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn parses_ipv6_literal() {
        let ep = Endpoint::resolve("tcp://[::1]:7000", false).unwrap();
        assert!(ep.tcp_addr().unwrap().is_ipv6());
    }

    #[test]
    fn ipv4_only_skips_ipv6() {
        assert!(matches!(
            Endpoint::resolve("tcp://[::1]:7000", true),
            Err(KeelsonError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn parses_inproc() {
        let ep = Endpoint::resolve("inproc://pipeline", false).unwrap();
        assert_eq!(ep, Endpoint::Inproc("pipeline".to_string()));
        assert_eq!(ep.to_string(), "inproc://pipeline");
    }

    #[test]
    fn rejects_malformed() {
        assert!(Endpoint::resolve("tcp:127.0.0.1:5555", false).is_err());
        assert!(Endpoint::resolve("udp://127.0.0.1:5555", false).is_err());
        assert!(Endpoint::resolve("inproc://", false).is_err());
        assert!(Endpoint::resolve("tcp://", false).is_err());
    }
}
