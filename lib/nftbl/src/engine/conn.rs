// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The kernel-communication seam.
//!
//! The stores never speak netlink themselves; they enqueue mutations on
//! a [`Conn`] and ask it to flush. Anything implementing this trait can
//! stand in for the kernel, which is exactly what [`crate::mock`] does.

use super::chain::Chain;
use super::rule::RuleEntry;
use super::set::Set;
use super::set::SetElement;
use super::table::Table;
use thiserror::Error;

/// Transport-level failures. `AlreadyExists` and `NotFound` are
/// distinguished because callers change behavior on them: table
/// `create_imm` downgrades `AlreadyExists` to success, and set lookups
/// map `NotFound` to the engine's not-found condition.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum ConnError {
    #[error("object already exists")]
    AlreadyExists,

    #[error("object not found")]
    NotFound,

    #[error("transport failure: {0}")]
    Transport(String),
}

/// A connection to the packet-filter subsystem.
///
/// The `add_*`/`del_*`/`set_*_elements` methods only enqueue work;
/// nothing reaches the kernel until [`Conn::flush`]. `flush` is assumed
/// to apply everything enqueued since the previous flush atomically
/// (all-or-nothing); that atomicity is this collaborator's contract, not
/// the engine's. The `list_*`/`get_*` methods are live, synchronous
/// queries answering with the kernel's current authoritative state.
pub trait Conn: Send + Sync {
    fn add_table(&self, table: &Table);
    fn del_table(&self, table: &Table);
    fn list_tables(&self) -> Result<Vec<Table>, ConnError>;

    fn add_chain(&self, chain: &Chain);
    fn del_chain(&self, chain: &Chain);
    fn list_chains(&self) -> Result<Vec<Chain>, ConnError>;

    fn add_set(
        &self,
        table: &Table,
        set: &Set,
        elements: &[SetElement],
    ) -> Result<(), ConnError>;
    fn del_set(&self, table: &Table, set: &Set);
    fn get_sets(&self, table: &Table) -> Result<Vec<Set>, ConnError>;
    fn get_set_by_name(
        &self,
        table: &Table,
        name: &str,
    ) -> Result<Set, ConnError>;
    fn get_set_elements(
        &self,
        table: &Table,
        set: &Set,
    ) -> Result<Vec<SetElement>, ConnError>;
    fn set_add_elements(
        &self,
        table: &Table,
        set: &Set,
        elements: &[SetElement],
    ) -> Result<(), ConnError>;
    fn set_del_elements(
        &self,
        table: &Table,
        set: &Set,
        elements: &[SetElement],
    ) -> Result<(), ConnError>;

    fn add_rule(&self, rule: &RuleEntry);
    fn del_rule(&self, rule: &RuleEntry);

    /// Atomically apply all operations enqueued since the last flush.
    fn flush(&self) -> Result<(), ConnError>;
}
