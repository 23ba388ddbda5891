use crate::CaseInsensitiveString;
use getset::{CopyGetters, Getters};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddrParseError {
    #[error("address '{0}' is missing a port")]
    MissingPort(String),

    #[error("address '{0}' has an empty host")]
    EmptyHost(String),

    #[error("address '{0}' has an invalid host")]
    InvalidHost(String),

    #[error("invalid port '{port}' in address '{addr}'")]
    InvalidPort { addr: String, port: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Port(u16);

impl Port {
    pub fn new(port: u16) -> Self {
        Self(port)
    }

    pub fn value(self) -> u16 {
        self.0
    }
}

impl From<Port> for u16 {
    fn from(port: Port) -> u16 {
        port.0
    }
}

impl Display for Port {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A host name or address, compared without regard to case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Hostname(CaseInsensitiveString);

impl Hostname {
    pub fn new<S: AsRef<str>>(s: S) -> Self {
        Self(CaseInsensitiveString::new(s))
    }
}

impl From<&str> for Hostname {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl AsRef<str> for Hostname {
    fn as_ref(&self) -> &str {
        self.0.as_ref()
    }
}

impl Display for Hostname {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A `host:port` pair. Parsing accepts `host:port` and `[v6-addr]:port`
/// forms, rejects empty hosts, bare IPv6 hosts, and ports outside 1..=65535.
#[derive(Debug, Clone, PartialEq, Eq, Getters, CopyGetters, Serialize, Deserialize)]
pub struct HostPort {
    #[getset(get = "pub")]
    host: Hostname,

    #[getset(get_copy = "pub")]
    port: Port,
}

impl HostPort {
    pub fn new(host: Hostname, port: Port) -> Self {
        Self { host, port }
    }
}

impl Display for HostPort {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.host.as_ref().contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for HostPort {
    type Err = AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let (host, rest) = rest
                .split_once(']')
                .ok_or_else(|| AddrParseError::InvalidHost(s.to_string()))?;
            let port = rest
                .strip_prefix(':')
                .ok_or_else(|| AddrParseError::MissingPort(s.to_string()))?;
            (host, port)
        } else {
            let (host, port) = s
                .rsplit_once(':')
                .ok_or_else(|| AddrParseError::MissingPort(s.to_string()))?;
            if host.contains(':') {
                // An unbracketed IPv6 address is ambiguous.
                return Err(AddrParseError::InvalidHost(s.to_string()));
            }
            (host, port)
        };

        if host.is_empty() {
            return Err(AddrParseError::EmptyHost(s.to_string()));
        }

        let port = match port.parse::<u16>() {
            Ok(p) if p != 0 => Port::new(p),
            _ => {
                return Err(AddrParseError::InvalidPort {
                    addr: s.to_string(),
                    port: port.to_string(),
                });
            }
        };

        Ok(Self::new(Hostname::new(host), port))
    }
}
