// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Table families.

use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

/// The protocol family a table belongs to, mirroring the kernel's
/// NFPROTO namespace. Every table in the registry is keyed by
/// `(Family, name)`.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub enum Family {
    Inet,
    Ipv4,
    Arp,
    NetDev,
    Bridge,
    Ipv6,
}

impl Family {
    /// The raw NFPROTO constant the kernel uses for this family.
    pub fn raw(self) -> u8 {
        match self {
            Self::Inet => 1,
            Self::Ipv4 => 2,
            Self::Arp => 3,
            Self::NetDev => 5,
            Self::Bridge => 7,
            Self::Ipv6 => 10,
        }
    }
}

impl Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Inet => write!(f, "inet"),
            Self::Ipv4 => write!(f, "ip"),
            Self::Arp => write!(f, "arp"),
            Self::NetDev => write!(f, "netdev"),
            Self::Bridge => write!(f, "bridge"),
            Self::Ipv6 => write!(f, "ip6"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_values_match_nfproto() {
        assert_eq!(Family::Ipv4.raw(), 2);
        assert_eq!(Family::Ipv6.raw(), 10);
        assert_eq!(Family::Inet.raw(), 1);
        assert_eq!(Family::Bridge.raw(), 7);
    }
}
