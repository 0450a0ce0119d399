// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! nftbl: rule compilation and kernel table-state synchronization.
//!
//! Callers describe packet-filtering intent declaratively; the engine
//! keeps an in-memory mirror of the kernel's table/chain/set hierarchy,
//! compiles declarative rule specifications into ordered sequences of
//! low-level match primitives (plus any lookup sets they need), and
//! reconciles the mirror with the kernel on demand.
//!
//! The kernel transport itself is behind the [`engine::conn::Conn`]
//! trait; [`mock`] provides an in-memory implementation for tests.

#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

pub mod engine;
pub mod mock;

pub use nftbl_api as api;
