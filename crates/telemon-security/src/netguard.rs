//! Source-subnet allow-list.

use ipnet::IpNet;
use std::net::IpAddr;

#[derive(Debug, thiserror::Error)]
#[error("invalid trusted subnet '{value}': {source}")]
pub struct SubnetParseError {
    value: String,
    #[source]
    source: ipnet::AddrParseError,
}

/// Returns whether `source` may talk to the server.
///
/// No subnet means unrestricted. With a subnet, the source must parse as an
/// IP address inside it; missing or unparsable addresses are denied.
///
/// # Examples
///
/// ```
/// use telemon_security::netguard::allow;
///
/// let subnet = "10.0.0.0/8".parse().unwrap();
/// assert!(allow(Some("10.1.2.3"), Some(&subnet)));
/// assert!(!allow(Some("192.168.0.1"), Some(&subnet)));
/// assert!(!allow(None, Some(&subnet)));
/// assert!(allow(None, None));
/// ```
pub fn allow(source: Option<&str>, subnet: Option<&IpNet>) -> bool {
    let Some(subnet) = subnet else {
        return true;
    };
    match source.map(str::trim).and_then(|s| s.parse::<IpAddr>().ok()) {
        Some(ip) => subnet.contains(&ip),
        None => false,
    }
}

#[derive(Debug, Clone, Default)]
pub struct NetworkGuard {
    subnet: Option<IpNet>,
}

impl NetworkGuard {
    pub fn new(subnet: Option<IpNet>) -> Self {
        Self { subnet }
    }

    /// Parses a CIDR string. `None` or an empty string leaves the guard open.
    pub fn parse(subnet: Option<&str>) -> Result<Self, SubnetParseError> {
        let subnet = match subnet.map(str::trim).filter(|s| !s.is_empty()) {
            Some(value) => Some(value.parse::<IpNet>().map_err(|source| SubnetParseError {
                value: value.to_string(),
                source,
            })?),
            None => None,
        };
        Ok(Self { subnet })
    }

    pub fn subnet(&self) -> Option<&IpNet> {
        self.subnet.as_ref()
    }

    pub fn allow(&self, source: Option<&str>) -> bool {
        allow(source, self.subnet.as_ref())
    }
}
