use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use std::{fmt, net::IpAddr};

/// Matches an address by prefix containment.
///
/// Exact addresses are represented as host networks (`/32` or `/128`).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct NetworkMatch {
    pub net: IpNet,
}

// === impl NetworkMatch ===

impl NetworkMatch {
    #[inline]
    pub fn contains(&self, addr: IpAddr) -> bool {
        self.net.contains(&addr)
    }
}

impl std::str::FromStr for NetworkMatch {
    type Err = ipnet::AddrParseError;

    /// Parses either a CIDR block or a bare address.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(addr) = s.parse::<IpAddr>() {
            return Ok(addr.into());
        }
        s.parse::<IpNet>().map(|net| Self { net: net.trunc() })
    }
}

impl fmt::Display for NetworkMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.net.fmt(f)
    }
}

impl From<IpAddr> for NetworkMatch {
    fn from(net: IpAddr) -> Self {
        IpNet::from(net).into()
    }
}

impl From<IpNet> for NetworkMatch {
    fn from(net: IpNet) -> Self {
        Self { net }
    }
}

impl From<Ipv4Net> for NetworkMatch {
    fn from(net: Ipv4Net) -> Self {
        IpNet::from(net).into()
    }
}

impl From<Ipv6Net> for NetworkMatch {
    fn from(net: Ipv6Net) -> Self {
        IpNet::from(net).into()
    }
}
