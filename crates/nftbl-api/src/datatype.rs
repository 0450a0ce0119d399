// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Set key/value datatypes.
//!
//! The kernel identifies every set key and value type by a small numeric
//! tag (the "magic"). Composite (concatenated) keys pack the component
//! tags into consecutive fixed-width bit fields and require every
//! component encoding to land on a 4-byte boundary; the widths and tags
//! here must match the kernel exactly or set lookups silently miss.

use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;
use std::borrow::Cow;

/// Width, in bits, of one component's tag inside a concatenated type tag.
pub const SET_CONCAT_TYPE_BITS: u32 = 6;

/// A set key or value datatype: a display name, the byte width of its
/// encoding, and the kernel's numeric tag for it.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SetDatatype {
    name: Cow<'static, str>,
    bytes: u32,
    magic: u32,
}

impl SetDatatype {
    /// The explicit invalid-type sentinel.
    pub const INVALID: Self = Self::well_known("invalid", 0, 0);
    pub const VERDICT: Self = Self::well_known("verdict", 0, 1);
    pub const INTEGER: Self = Self::well_known("integer", 4, 4);
    pub const IPV4_ADDR: Self = Self::well_known("ipv4_addr", 4, 7);
    pub const IPV6_ADDR: Self = Self::well_known("ipv6_addr", 16, 8);
    pub const ETHER_ADDR: Self = Self::well_known("ether_addr", 6, 9);
    pub const INET_PROTO: Self = Self::well_known("inet_proto", 1, 12);
    pub const INET_SERVICE: Self = Self::well_known("inet_service", 2, 13);
    pub const MARK: Self = Self::well_known("mark", 4, 19);

    const fn well_known(name: &'static str, bytes: u32, magic: u32) -> Self {
        Self { name: Cow::Borrowed(name), bytes, magic }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The unpadded byte width of one value of this type.
    pub fn bytes(&self) -> u32 {
        self.bytes
    }

    pub fn magic(&self) -> u32 {
        self.magic
    }

    /// The byte width after rounding up to the kernel's 4-byte attribute
    /// alignment, with a floor of 4.
    pub fn aligned_bytes(&self) -> u32 {
        if self.bytes <= 4 { 4 } else { self.bytes.next_multiple_of(4) }
    }

    /// True for the address types usable as interval-set keys.
    pub fn is_address(&self) -> bool {
        *self == Self::IPV4_ADDR || *self == Self::IPV6_ADDR
    }

    /// Derive the composite datatype for a concatenated key built from
    /// `types`, in declared order.
    ///
    /// Zero components yield [`SetDatatype::INVALID`]. One component is
    /// returned unchanged apart from its width being rounded up to the
    /// 4-byte boundary. Two or more produce a synthesized
    /// `concat_<n1>_<n2>...` name, a tag packing each component tag into
    /// consecutive [`SET_CONCAT_TYPE_BITS`]-wide fields, and a width
    /// equal to the sum of the individually rounded component widths.
    pub fn concat(types: &[SetDatatype]) -> SetDatatype {
        match types {
            [] => Self::INVALID,

            [single] => SetDatatype {
                name: single.name.clone(),
                bytes: single.aligned_bytes(),
                magic: single.magic,
            },

            many => {
                let mut name = String::from("concat");
                let mut magic = 0u32;
                let mut bytes = 0u32;

                for ty in many {
                    name.push('_');
                    name.push_str(&ty.name);
                    magic = magic << SET_CONCAT_TYPE_BITS | ty.magic;
                    bytes += ty.aligned_bytes();
                }

                SetDatatype { name: Cow::Owned(name), bytes, magic }
            }
        }
    }
}

impl Display for SetDatatype {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}
