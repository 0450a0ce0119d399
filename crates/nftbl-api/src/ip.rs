// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Addresses and address-match specifications.

use crate::family::Family;
use core::fmt;
use core::fmt::Display;
use core::net::IpAddr;
use core::net::Ipv4Addr;
use core::net::Ipv6Addr;
use core::str::FromStr;
use ipnetwork::IpNetwork;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum AddrError {
    #[error("malformed address: {0}")]
    Malformed(String),

    #[error("bad prefix length {prefix} for {addr}")]
    BadPrefix { addr: IpAddr, prefix: u8 },
}

/// A single address, optionally carrying a CIDR prefix length.
///
/// `"192.0.2.1"` parses to a host address; `"192.0.2.0/24"` parses to a
/// prefixed one. The prefix only matters when the address is expanded
/// into its canonical range representation.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize,
)]
pub struct HostAddr {
    pub addr: IpAddr,
    pub prefix: Option<u8>,
}

impl HostAddr {
    pub fn new(addr: IpAddr) -> Self {
        Self { addr, prefix: None }
    }

    pub fn cidr(addr: IpAddr, prefix: u8) -> Result<Self, AddrError> {
        let max = match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        if prefix > max {
            return Err(AddrError::BadPrefix { addr, prefix });
        }
        Ok(Self { addr, prefix: Some(prefix) })
    }

    pub fn is_ipv6(&self) -> bool {
        self.addr.is_ipv6()
    }

    pub fn family(&self) -> Family {
        match self.addr {
            IpAddr::V4(_) => Family::Ipv4,
            IpAddr::V6(_) => Family::Ipv6,
        }
    }

    /// The kernel key encoding of the address itself: 4 big-endian bytes
    /// for IPv4, 16 for IPv6.
    pub fn key_bytes(&self) -> Vec<u8> {
        match self.addr {
            IpAddr::V4(a) => a.octets().to_vec(),
            IpAddr::V6(a) => a.octets().to_vec(),
        }
    }

    /// First address covered: the network address when a prefix is
    /// present, the address itself otherwise.
    pub fn first(&self) -> IpAddr {
        match (self.addr, self.prefix) {
            (addr, None) => addr,
            (IpAddr::V4(a), Some(p)) => {
                IpAddr::V4(Ipv4Addr::from(u32::from(a) & v4_mask(p)))
            }
            (IpAddr::V6(a), Some(p)) => {
                IpAddr::V6(Ipv6Addr::from(u128::from(a) & v6_mask(p)))
            }
        }
    }

    /// Last address covered by the (possibly degenerate) block.
    pub fn last(&self) -> IpAddr {
        match (self.addr, self.prefix) {
            (addr, None) => addr,
            (IpAddr::V4(a), Some(p)) => {
                IpAddr::V4(Ipv4Addr::from(u32::from(a) | !v4_mask(p)))
            }
            (IpAddr::V6(a), Some(p)) => {
                IpAddr::V6(Ipv6Addr::from(u128::from(a) | !v6_mask(p)))
            }
        }
    }

    /// Key encoding of the address one past [`HostAddr::last`], the
    /// exclusive upper bound used to close an interval element. Wraps to
    /// the zero address at the top of the address space, which the
    /// kernel's interval representation reads as "open-ended".
    pub fn interval_end_bytes(&self) -> Vec<u8> {
        match self.last() {
            IpAddr::V4(a) => {
                u32::from(a).wrapping_add(1).to_be_bytes().to_vec()
            }
            IpAddr::V6(a) => {
                u128::from(a).wrapping_add(1).to_be_bytes().to_vec()
            }
        }
    }
}

fn v4_mask(prefix: u8) -> u32 {
    if prefix == 0 { 0 } else { u32::MAX << (32 - u32::from(prefix)) }
}

fn v6_mask(prefix: u8) -> u128 {
    if prefix == 0 { 0 } else { u128::MAX << (128 - u32::from(prefix)) }
}

impl From<IpAddr> for HostAddr {
    fn from(addr: IpAddr) -> Self {
        Self::new(addr)
    }
}

impl FromStr for HostAddr {
    type Err = AddrError;

    /// Parse `"203.0.113.9"`, `"203.0.113.0/24"`, `"2001:db8::/64"`, ...
    fn from_str(val: &str) -> Result<Self, Self::Err> {
        if val.contains('/') {
            let net = val
                .parse::<IpNetwork>()
                .map_err(|_| AddrError::Malformed(val.to_string()))?;
            Self::cidr(net.ip(), net.prefix())
        } else {
            let addr = val
                .parse::<IpAddr>()
                .map_err(|_| AddrError::Malformed(val.to_string()))?;
            Ok(Self::new(addr))
        }
    }
}

impl Display for HostAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.prefix {
            Some(p) => write!(f, "{}/{}", self.addr, p),
            None => write!(f, "{}", self.addr),
        }
    }
}

/// An address-match specification: an explicit ordered list of
/// addresses, an inclusive `[lo, hi]` range, or (unusually) both. The
/// compiler handles the two forms independently and concatenates their
/// results.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct AddrSpec {
    pub list: Vec<HostAddr>,
    pub range: Option<[HostAddr; 2]>,
}

impl AddrSpec {
    pub fn list(addrs: Vec<HostAddr>) -> Self {
        Self { list: addrs, range: None }
    }

    pub fn range(lo: HostAddr, hi: HostAddr) -> Self {
        Self { list: Vec::new(), range: Some([lo, hi]) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plain_and_cidr() {
        let plain: HostAddr = "192.0.2.7".parse().unwrap();
        assert_eq!(plain.prefix, None);
        assert_eq!(plain.key_bytes(), vec![192, 0, 2, 7]);

        let cidr: HostAddr = "192.0.2.64/26".parse().unwrap();
        assert_eq!(cidr.prefix, Some(26));
        assert_eq!(cidr.first(), "192.0.2.64".parse::<IpAddr>().unwrap());
        assert_eq!(cidr.last(), "192.0.2.127".parse::<IpAddr>().unwrap());

        assert!("192.0.2.64/33".parse::<HostAddr>().is_err());
        assert!("not-an-addr".parse::<HostAddr>().is_err());
    }

    #[test]
    fn degenerate_range_is_one_address_wide() {
        let a: HostAddr = "10.1.2.3".parse().unwrap();
        assert_eq!(a.first(), a.addr);
        assert_eq!(a.last(), a.addr);
        assert_eq!(a.interval_end_bytes(), vec![10, 1, 2, 4]);
    }

    #[test]
    fn v6_block_bounds() {
        let a: HostAddr = "2001:db8::/32".parse().unwrap();
        assert_eq!(a.first(), "2001:db8::".parse::<IpAddr>().unwrap());
        assert_eq!(
            a.last(),
            "2001:db8:ffff:ffff:ffff:ffff:ffff:ffff"
                .parse::<IpAddr>()
                .unwrap()
        );
        assert_eq!(
            a.interval_end_bytes(),
            "2001:db9::".parse::<HostAddr>().unwrap().key_bytes()
        );
    }

    #[test]
    fn interval_end_wraps_at_top_of_space() {
        let top: HostAddr = "255.255.255.255".parse().unwrap();
        assert_eq!(top.interval_end_bytes(), vec![0, 0, 0, 0]);
    }
}
