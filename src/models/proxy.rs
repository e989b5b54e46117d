use serde::{Deserialize, Serialize};
use std::fmt;

/// An HTTP egress proxy candidate. Liveness is never assumed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Proxy {
    pub host: String,
    pub port: u16,
}

impl Proxy {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }

    /// Parses `host:port`, tolerating surrounding whitespace.
    pub fn parse(line: &str) -> Option<Self> {
        let (host, port) = line.trim().rsplit_once(':')?;
        let host = host.trim();
        if host.is_empty() {
            return None;
        }
        let port = port.trim().parse().ok()?;
        Some(Self::new(host, port))
    }

    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyStatus {
    pub enabled: bool,
    pub fallback_to_direct: bool,
    pub refresh_interval_secs: u64,
    pub total: usize,
    pub cursor: usize,
    pub sample: Vec<Proxy>,
}
