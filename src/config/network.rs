//! Network value types: IPv4 CIDR blocks and control-plane endpoints

use crate::error::Error;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// IPv4 CIDR block such as `10.217.0.0/16`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cidr {
    addr: Ipv4Addr,
    prefix: u8,
}

impl Cidr {
    fn mask(prefix: u8) -> u32 {
        if prefix == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(prefix))
        }
    }

    fn network(&self, prefix: u8) -> u32 {
        u32::from(self.addr) & Self::mask(prefix)
    }

    /// True when the two blocks share at least one address
    pub fn overlaps(&self, other: &Cidr) -> bool {
        let prefix = self.prefix.min(other.prefix);
        self.network(prefix) == other.network(prefix)
    }
}

impl FromStr for Cidr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| Error::validation(format!("'{}' is not a CIDR (expected a.b.c.d/n)", s)))?;
        let addr: Ipv4Addr = addr
            .parse()
            .map_err(|_| Error::validation(format!("'{}' has an invalid IPv4 address", s)))?;
        let prefix: u8 = prefix
            .parse()
            .ok()
            .filter(|p| *p <= 32)
            .ok_or_else(|| Error::validation(format!("'{}' has an invalid prefix length", s)))?;
        Ok(Cidr { addr, prefix })
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

/// Control-plane endpoint in `host[:port]` form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    port: Option<u16>,
}

impl Endpoint {
    /// `host:port`, falling back to `default_port` when the endpoint carries none
    pub fn address(&self, default_port: u16) -> String {
        format!("{}:{}", self.host, self.port.unwrap_or(default_port))
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::validation("control-plane endpoint cannot be empty"));
        }
        if s.contains("://") || s.contains(char::is_whitespace) || s.contains('/') {
            return Err(Error::validation(format!(
                "control-plane endpoint '{}' must be host[:port] without a scheme or path",
                s
            )));
        }

        let (host, port) = match s.rsplit_once(':') {
            Some((host, port)) => {
                let port: u16 = port.parse().ok().filter(|p| *p != 0).ok_or_else(|| {
                    Error::validation(format!("control-plane endpoint '{}' has an invalid port", s))
                })?;
                (host, Some(port))
            }
            None => (s, None),
        };

        if host.is_empty() || host.contains(':') {
            return Err(Error::validation(format!(
                "control-plane endpoint '{}' has an invalid host",
                s
            )));
        }

        Ok(Endpoint {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}:{}", self.host, port),
            None => write!(f, "{}", self.host),
        }
    }
}
