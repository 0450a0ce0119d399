// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Wire-level vocabulary shared by the nftbl engine and its consumers.
//!
//! Everything here describes the kernel's view of the world: table
//! families, set datatypes and their fixed "magic" tags, addresses and
//! address specifications, and verdicts. None of it talks to the kernel
//! itself; that is the engine's job.

#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

pub mod datatype;
pub mod family;
pub mod ip;
pub mod verdict;

pub use datatype::SET_CONCAT_TYPE_BITS;
pub use datatype::SetDatatype;
pub use family::Family;
pub use ip::AddrError;
pub use ip::AddrSpec;
pub use ip::HostAddr;
pub use verdict::Verdict;
