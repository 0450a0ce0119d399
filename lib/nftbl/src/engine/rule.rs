// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Declarative rule specifications.
//!
//! A [`Rule`] is immutable input to the compiler: the compiler reads it,
//! never mutates it, and turns it into the ordered primitive expressions
//! of a [`RuleEntry`].

use super::expr::Expr;
use super::table::Table;
use nftbl_api::AddrSpec;
use nftbl_api::Verdict;
use serde::Deserialize;
use serde::Serialize;

/// The L3 portion of a rule: every field optional, every populated field
/// compiled in the fixed order version, protocol, source, destination.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct L3Spec {
    /// IP version to match (the header's version nibble).
    pub version: Option<u8>,
    /// L4 protocol number carried in the IP header.
    pub protocol: Option<u8>,
    pub src: Option<AddrSpec>,
    pub dst: Option<AddrSpec>,
}

/// A declarative rule. The exclusion flag applies uniformly to every L3
/// predicate present: each equality-flavored primitive becomes its
/// inequality flavor.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Rule {
    pub l3: Option<L3Spec>,
    pub exclude: bool,
    /// Terminal action; optional while a rule is being assembled.
    pub action: Option<Verdict>,
}

/// A compiled rule bound to its table and chain: what
/// [`super::conn::Conn::add_rule`] accepts.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RuleEntry {
    pub table: Table,
    pub chain: String,
    pub exprs: Vec<Expr>,
}
