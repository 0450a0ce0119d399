// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The nftbl engine: table/chain/set stores and the rule compiler.

pub mod chain;
pub mod conn;
pub mod expr;
pub mod l3;
pub mod rule;
pub mod set;
pub mod table;

use conn::ConnError;
use nftbl_api::AddrError;
use nftbl_api::Family;
use thiserror::Error;

/// Engine-level failures. Not-found and validation conditions are
/// surfaced before any kernel call; transport failures pass through
/// unchanged (see [`conn::Conn`]).
#[derive(Debug, Error)]
pub enum Error {
    #[error("table {name} of family {family} does not exist")]
    TableNotFound { family: Family, name: String },

    #[error("chain {0} does not exist")]
    ChainNotFound(String),

    #[error("set {0} does not exist")]
    SetNotFound(String),

    #[error("unsupported table family {0}")]
    UnsupportedFamily(Family),

    #[error("cannot mix ipv4 and ipv6 addresses in the same element")]
    MixedAddrFamily,

    #[error("element action cannot be empty")]
    MissingAction,

    #[error("number of keys cannot be 0")]
    EmptyConcatKey,

    #[error("number of values ({vals}) does not match number of keys ({keys})")]
    KeyValueMismatch { keys: usize, vals: usize },

    #[error("key type {key_type} requires a matching value, got {got}")]
    BadElementValue { key_type: String, got: String },

    #[error("unsupported key element type {0}")]
    UnsupportedKeyType(String),

    #[error(transparent)]
    Addr(#[from] AddrError),

    #[error(transparent)]
    Conn(#[from] ConnError),

    #[error("dump serialization failed: {0}")]
    Dump(#[from] serde_json::Error),
}

pub type Result<T> = core::result::Result<T, Error>;
