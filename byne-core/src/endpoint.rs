//! Endpoint URIs (`tcp://host:port`) and the fixed primary/backup pair.

use std::fmt;
use std::str::FromStr;

const SCHEME: &str = "tcp://";
const WILDCARD: &str = "*";

/// A parsed `tcp://host:port` endpoint. Host `*` means all interfaces (bind only).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_wildcard(&self) -> bool {
        self.host == WILDCARD
    }

    /// Address suitable for connecting (host names are resolved by the caller's resolver).
    pub fn connect_addr(&self) -> Result<String, EndpointError> {
        if self.is_wildcard() {
            return Err(EndpointError::WildcardConnect(self.to_string()));
        }
        Ok(self.join(&self.host))
    }

    /// Address suitable for binding; `*` becomes `0.0.0.0`.
    pub fn bind_addr(&self) -> String {
        if self.is_wildcard() {
            self.join("0.0.0.0")
        } else {
            self.join(&self.host)
        }
    }

    fn join(&self, host: &str) -> String {
        if host.contains(':') {
            format!("[{}]:{}", host, self.port)
        } else {
            format!("{}:{}", host, self.port)
        }
    }
}

impl FromStr for Endpoint {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix(SCHEME)
            .ok_or_else(|| EndpointError::Scheme(s.to_string()))?;
        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| EndpointError::MissingPort(s.to_string()))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(EndpointError::MissingHost(s.to_string()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| EndpointError::InvalidPort(s.to_string()))?;
        Ok(Endpoint {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", SCHEME, self.join(&self.host))
    }
}

/// Invalid endpoint configuration. Fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EndpointError {
    #[error("unsupported endpoint {0:?}: expected tcp://host:port")]
    Scheme(String),
    #[error("endpoint {0:?} has no port")]
    MissingPort(String),
    #[error("endpoint {0:?} has no host")]
    MissingHost(String),
    #[error("endpoint {0:?} has an invalid port")]
    InvalidPort(String),
    #[error("cannot connect to wildcard endpoint {0}")]
    WildcardConnect(String),
}

/// Primary and backup server endpoints. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSet {
    primary: Endpoint,
    backup: Endpoint,
}

impl EndpointSet {
    pub fn new(primary: Endpoint, backup: Endpoint) -> Result<Self, EndpointError> {
        for e in [&primary, &backup] {
            e.connect_addr()?;
        }
        Ok(Self { primary, backup })
    }

    pub fn primary(&self) -> &Endpoint {
        &self.primary
    }

    pub fn backup(&self) -> &Endpoint {
        &self.backup
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_host_and_port() {
        let e: Endpoint = "tcp://localhost:5555".parse().unwrap();
        assert_eq!(e.host(), "localhost");
        assert_eq!(e.port(), 5555);
        assert_eq!(e.connect_addr().unwrap(), "localhost:5555");
        assert_eq!(e.to_string(), "tcp://localhost:5555");
    }

    #[test]
    fn wildcard_binds_all_interfaces() {
        let e: Endpoint = "tcp://*:5556".parse().unwrap();
        assert!(e.is_wildcard());
        assert_eq!(e.bind_addr(), "0.0.0.0:5556");
        assert!(matches!(
            e.connect_addr(),
            Err(EndpointError::WildcardConnect(_))
        ));
    }

    #[test]
    fn ipv6_host() {
        let e: Endpoint = "tcp://[::1]:7000".parse().unwrap();
        assert_eq!(e.host(), "::1");
        assert_eq!(e.connect_addr().unwrap(), "[::1]:7000");
    }

    #[test]
    fn rejects_malformed() {
        assert!(matches!(
            "ipc:///tmp/sock".parse::<Endpoint>(),
            Err(EndpointError::Scheme(_))
        ));
        assert!(matches!(
            "tcp://localhost".parse::<Endpoint>(),
            Err(EndpointError::MissingPort(_))
        ));
        assert!(matches!(
            "tcp://:80".parse::<Endpoint>(),
            Err(EndpointError::MissingHost(_))
        ));
        assert!(matches!(
            "tcp://host:99999".parse::<Endpoint>(),
            Err(EndpointError::InvalidPort(_))
        ));
    }

    #[test]
    fn endpoint_set_rejects_wildcards() {
        let p: Endpoint = "tcp://localhost:1".parse().unwrap();
        let b: Endpoint = "tcp://*:2".parse().unwrap();
        assert!(EndpointSet::new(p.clone(), b).is_err());
        let b: Endpoint = "tcp://127.0.0.1:2".parse().unwrap();
        let set = EndpointSet::new(p.clone(), b.clone()).unwrap();
        assert_eq!(set.primary(), &p);
        assert_eq!(set.backup(), &b);
    }
}
