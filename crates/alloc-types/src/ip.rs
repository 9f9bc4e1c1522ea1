//! IP prefix type with containment and subnetting helpers.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// Address family of a prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

impl AddressFamily {
    /// Returns the address width in bits.
    pub const fn max_len(&self) -> u8 {
        match self {
            AddressFamily::Ipv4 => 32,
            AddressFamily::Ipv6 => 128,
        }
    }

    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => AddressFamily::Ipv4,
            IpAddr::V6(_) => AddressFamily::Ipv6,
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressFamily::Ipv4 => f.write_str("ipv4"),
            AddressFamily::Ipv6 => f.write_str("ipv6"),
        }
    }
}

/// An IP prefix in CIDR notation (e.g., 10.0.0.0/24 or 2001:db8::/32).
///
/// The address is kept as given, host bits included, so `10.0.0.1/24`
/// round-trips unchanged. Use [`IpPrefix::network`] for the masked form.
///
/// Prefixes order by family, then address, then length, so a covering
/// prefix always sorts before the more specific prefixes it contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IpPrefix {
    addr: IpAddr,
    prefix_len: u8,
}

impl IpPrefix {
    /// Creates a new IP prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if the prefix length exceeds the address width.
    pub fn new(addr: IpAddr, prefix_len: u8) -> Result<Self, ParseError> {
        let max_len = AddressFamily::of(&addr).max_len();
        if prefix_len > max_len {
            return Err(ParseError::InvalidIpPrefix(format!(
                "prefix length {} exceeds maximum {} for {}",
                prefix_len, max_len, addr
            )));
        }
        Ok(IpPrefix { addr, prefix_len })
    }

    /// Host-length prefix (/32 or /128) for a single address.
    pub fn host(addr: IpAddr) -> Self {
        let prefix_len = AddressFamily::of(&addr).max_len();
        IpPrefix { addr, prefix_len }
    }

    /// Returns the address as given (host bits included).
    pub const fn addr(&self) -> IpAddr {
        self.addr
    }

    /// Returns the prefix length in bits.
    pub const fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    pub fn family(&self) -> AddressFamily {
        AddressFamily::of(&self.addr)
    }

    /// Returns true if this is a host prefix (/32 for IPv4, /128 for IPv6).
    pub fn is_address_prefix(&self) -> bool {
        self.prefix_len == self.family().max_len()
    }

    /// Returns the masked network prefix.
    pub fn network(&self) -> IpPrefix {
        let masked = to_bits(&self.addr) & self.mask();
        IpPrefix {
            addr: from_bits(self.family(), masked),
            prefix_len: self.prefix_len,
        }
    }

    /// Returns the host prefix of this prefix's address.
    pub fn address_prefix(&self) -> IpPrefix {
        IpPrefix::host(self.addr)
    }

    /// Returns true if `other` lies inside this prefix (equal prefixes included).
    pub fn contains(&self, other: &IpPrefix) -> bool {
        if self.family() != other.family() || other.prefix_len < self.prefix_len {
            return false;
        }
        let mask = self.mask();
        to_bits(&self.addr) & mask == to_bits(&other.addr) & mask
    }

    /// Returns true if `addr` lies inside this prefix.
    pub fn contains_addr(&self, addr: &IpAddr) -> bool {
        self.contains(&IpPrefix::host(*addr))
    }

    /// Returns the `index`-th subnet of length `new_len` inside this prefix.
    ///
    /// Returns `None` when `new_len` is shorter than this prefix, longer than
    /// the address width, or `index` is past the last subnet.
    pub fn subnet(&self, new_len: u8, index: u128) -> Option<IpPrefix> {
        let max_len = self.family().max_len();
        if new_len < self.prefix_len || new_len > max_len {
            return None;
        }
        let extra_bits = u32::from(new_len - self.prefix_len);
        if extra_bits < 128 && index >= (1u128 << extra_bits) {
            return None;
        }
        let host_bits = u32::from(max_len - new_len);
        let offset = if host_bits >= 128 { 0 } else { index << host_bits };
        let base = to_bits(&self.network().addr);
        Some(IpPrefix {
            addr: from_bits(self.family(), base | offset),
            prefix_len: new_len,
        })
    }

    fn mask(&self) -> u128 {
        let max_len = u32::from(self.family().max_len());
        let len = u32::from(self.prefix_len);
        let full = if max_len == 128 {
            u128::MAX
        } else {
            (1u128 << max_len) - 1
        };
        full & !full.checked_shr(len).unwrap_or(0)
    }
}

fn to_bits(addr: &IpAddr) -> u128 {
    match addr {
        IpAddr::V4(v4) => u128::from(u32::from(*v4)),
        IpAddr::V6(v6) => u128::from(*v6),
    }
}

fn from_bits(family: AddressFamily, bits: u128) -> IpAddr {
    match family {
        // Truncation keeps the low 32 bits, which is all an IPv4 value carries.
        AddressFamily::Ipv4 => IpAddr::V4(Ipv4Addr::from(bits as u32)),
        AddressFamily::Ipv6 => IpAddr::V6(Ipv6Addr::from(bits)),
    }
}

impl Ord for IpPrefix {
    fn cmp(&self, other: &Self) -> Ordering {
        self.family()
            .cmp(&other.family())
            .then_with(|| to_bits(&self.addr).cmp(&to_bits(&other.addr)))
            .then_with(|| self.prefix_len.cmp(&other.prefix_len))
    }
}

impl PartialOrd for IpPrefix {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for IpPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix_len)
    }
}

impl FromStr for IpPrefix {
    type Err = ParseError;

    /// Parses `addr/len`; a bare address parses as its host prefix.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.rsplit_once('/') {
            Some((addr_str, len_str)) => {
                let addr: IpAddr = addr_str
                    .parse()
                    .map_err(|_| ParseError::InvalidIpAddress(addr_str.to_string()))?;
                let prefix_len: u8 = len_str
                    .parse()
                    .map_err(|_| ParseError::InvalidIpPrefix(s.to_string()))?;
                IpPrefix::new(addr, prefix_len)
            }
            None => s
                .parse::<IpAddr>()
                .map(IpPrefix::host)
                .map_err(|_| ParseError::InvalidIpPrefix(s.to_string())),
        }
    }
}

impl TryFrom<String> for IpPrefix {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<IpPrefix> for String {
    fn from(prefix: IpPrefix) -> String {
        prefix.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn p(s: &str) -> IpPrefix {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_keeps_host_bits() {
        let prefix = p("10.0.0.1/24");
        assert_eq!(prefix.to_string(), "10.0.0.1/24");
        assert_eq!(prefix.network().to_string(), "10.0.0.0/24");
        assert_eq!(prefix.address_prefix().to_string(), "10.0.0.1/32");
    }

    #[test]
    fn test_bare_address_is_host_prefix() {
        assert_eq!(p("10.0.0.7"), p("10.0.0.7/32"));
        assert_eq!(p("2001:db8::1"), p("2001:db8::1/128"));
        assert!(p("2001:db8::1").is_address_prefix());
    }

    #[test]
    fn test_invalid_prefix() {
        assert!("10.0.0.0/33".parse::<IpPrefix>().is_err());
        assert!("2001:db8::/129".parse::<IpPrefix>().is_err());
        assert!("10.0.0/8".parse::<IpPrefix>().is_err());
        assert!("not-a-prefix".parse::<IpPrefix>().is_err());
    }

    #[test]
    fn test_contains() {
        let aggregate = p("10.0.0.0/16");
        assert!(aggregate.contains(&p("10.0.1.0/24")));
        assert!(aggregate.contains(&p("10.0.1.5/32")));
        assert!(aggregate.contains(&aggregate));
        assert!(!aggregate.contains(&p("10.1.0.0/24")));
        assert!(!aggregate.contains(&p("10.0.0.0/8")));
        assert!(!aggregate.contains(&p("2001:db8::/64")));
        assert!(p("0.0.0.0/0").contains(&p("192.168.1.1/32")));
    }

    #[test]
    fn test_contains_v6() {
        let aggregate = p("2001:db8::/32");
        assert!(aggregate.contains(&p("2001:db8:1::/48")));
        assert!(!aggregate.contains(&p("2001:db9::/48")));
    }

    #[test]
    fn test_subnet() {
        let aggregate = p("10.0.0.0/16");
        assert_eq!(aggregate.subnet(24, 0), Some(p("10.0.0.0/24")));
        assert_eq!(aggregate.subnet(24, 3), Some(p("10.0.3.0/24")));
        assert_eq!(aggregate.subnet(24, 255), Some(p("10.0.255.0/24")));
        assert_eq!(aggregate.subnet(24, 256), None);
        assert_eq!(aggregate.subnet(8, 0), None);
        assert_eq!(p("2001:db8::/32").subnet(64, 1), Some(p("2001:db8:0:1::/64")));
    }

    #[test]
    fn test_ordering_parent_first() {
        let mut prefixes = vec![p("10.0.1.0/24"), p("10.0.0.0/16"), p("10.0.0.0/24")];
        prefixes.sort();
        assert_eq!(
            prefixes,
            vec![p("10.0.0.0/16"), p("10.0.0.0/24"), p("10.0.1.0/24")]
        );
        assert!(p("10.0.0.0/8") < p("::/0"));
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&p("10.0.0.0/24")).unwrap();
        assert_eq!(json, "\"10.0.0.0/24\"");
        let back: IpPrefix = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p("10.0.0.0/24"));
    }
}
