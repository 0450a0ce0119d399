// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! An in-memory [`Conn`] standing in for the kernel.
//!
//! Mutations queue up until [`Conn::flush`], which validates the whole
//! batch against a staged copy of the emulated kernel state and commits
//! only if every operation applies cleanly. Queries always answer from
//! committed state, so anything enqueued but unflushed is invisible to
//! them, just like the real subsystem.

use crate::engine::chain::Chain;
use crate::engine::conn::Conn;
use crate::engine::conn::ConnError;
use crate::engine::rule::RuleEntry;
use crate::engine::set::Set;
use crate::engine::set::SetElement;
use crate::engine::table::Table;
use nftbl_api::Family;
use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Clone, Debug)]
enum Op {
    AddTable(Table),
    DelTable(Table),
    AddChain(Chain),
    DelChain(Chain),
    AddSet(Table, Set, Vec<SetElement>),
    DelSet(Table, Set),
    AddElements(Table, String, Vec<SetElement>),
    DelElements(Table, String, Vec<SetElement>),
    AddRule(RuleEntry),
    DelRule(RuleEntry),
}

/// Tables of distinct families may share a name, so sets and elements
/// are filed under the owning table's full identity.
type TableKey = (Family, String);

fn table_key(table: &Table) -> TableKey {
    (table.family, table.name.clone())
}

/// The committed (post-flush) state of the emulated kernel.
#[derive(Clone, Debug, Default)]
struct Kernel {
    tables: Vec<Table>,
    chains: Vec<Chain>,
    sets: BTreeMap<TableKey, Vec<Set>>,
    elements: BTreeMap<(TableKey, String), Vec<SetElement>>,
    rules: Vec<RuleEntry>,
}

impl Kernel {
    fn has_table(&self, table: &Table) -> bool {
        self.tables.iter().any(|t| t == table)
    }

    fn has_set(&self, table: &Table, name: &str) -> bool {
        self.sets
            .get(&table_key(table))
            .is_some_and(|sets| sets.iter().any(|s| s.name == name))
    }

    fn apply(&mut self, op: &Op) -> Result<(), ConnError> {
        match op {
            Op::AddTable(t) => {
                if self.has_table(t) {
                    return Err(ConnError::AlreadyExists);
                }
                self.tables.push(t.clone());
            }
            Op::DelTable(t) => {
                if !self.has_table(t) {
                    return Err(ConnError::NotFound);
                }
                let key = table_key(t);
                self.tables.retain(|have| have != t);
                self.chains.retain(|c| c.table != *t);
                self.sets.remove(&key);
                self.elements.retain(|(table, _), _| *table != key);
                self.rules.retain(|r| r.table != *t);
            }
            Op::AddChain(c) => {
                if !self.has_table(&c.table) {
                    return Err(ConnError::NotFound);
                }
                let dup = self
                    .chains
                    .iter()
                    .any(|have| have.name == c.name && have.table == c.table);
                if dup {
                    return Err(ConnError::AlreadyExists);
                }
                self.chains.push(c.clone());
            }
            Op::DelChain(c) => {
                let before = self.chains.len();
                self.chains
                    .retain(|have| !(have.name == c.name && have.table == c.table));
                if self.chains.len() == before {
                    return Err(ConnError::NotFound);
                }
                self.rules.retain(|r| {
                    !(r.table == c.table && r.chain == c.name)
                });
            }
            Op::AddSet(t, s, elements) => {
                if !self.has_table(t) {
                    return Err(ConnError::NotFound);
                }
                if self.has_set(t, &s.name) {
                    return Err(ConnError::AlreadyExists);
                }
                let key = table_key(t);
                self.sets.entry(key.clone()).or_default().push(s.clone());
                self.elements.insert((key, s.name.clone()), elements.clone());
            }
            Op::DelSet(t, s) => {
                if !self.has_set(t, &s.name) {
                    return Err(ConnError::NotFound);
                }
                let key = table_key(t);
                if let Some(sets) = self.sets.get_mut(&key) {
                    sets.retain(|have| have.name != s.name);
                    if sets.is_empty() {
                        self.sets.remove(&key);
                    }
                }
                self.elements.remove(&(key, s.name.clone()));
            }
            Op::AddElements(t, set, elements) => {
                let slot = self
                    .elements
                    .get_mut(&(table_key(t), set.clone()))
                    .ok_or(ConnError::NotFound)?;
                slot.extend_from_slice(elements);
            }
            Op::DelElements(t, set, elements) => {
                let slot = self
                    .elements
                    .get_mut(&(table_key(t), set.clone()))
                    .ok_or(ConnError::NotFound)?;
                slot.retain(|have| {
                    !elements.iter().any(|e| e.key == have.key)
                });
            }
            Op::AddRule(r) => {
                let chain_known = self.chains.iter().any(|c| {
                    c.name == r.chain && c.table == r.table
                });
                if !chain_known {
                    return Err(ConnError::NotFound);
                }
                self.rules.push(r.clone());
            }
            Op::DelRule(r) => {
                let before = self.rules.len();
                self.rules.retain(|have| have != r);
                if self.rules.len() == before {
                    return Err(ConnError::NotFound);
                }
            }
        }
        Ok(())
    }
}

#[derive(Default)]
struct MockState {
    pending: Vec<Op>,
    kernel: Kernel,
}

/// The mock connection. Cheap to construct and safe to share behind an
/// `Arc` across the stores under test.
#[derive(Default)]
pub struct MockConn {
    state: Mutex<MockState>,
}

impl MockConn {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a table as already committed, as if another process had
    /// programmed it before this connection opened.
    pub fn preload_table(&self, table: Table) {
        self.state.lock().unwrap().kernel.tables.push(table);
    }

    /// Seed a committed chain.
    pub fn preload_chain(&self, chain: Chain) {
        self.state.lock().unwrap().kernel.chains.push(chain);
    }

    /// Seed a committed set with no elements under the given table.
    pub fn preload_set(&self, table: &Table, set: Set) {
        let mut state = self.state.lock().unwrap();
        let key = (table_key(table), set.name.clone());
        state.kernel.sets.entry(table_key(table)).or_default().push(set);
        state.kernel.elements.entry(key).or_default();
    }

    /// The committed elements of a set, empty when the set is unknown.
    pub fn kernel_set_elements(
        &self,
        table: &Table,
        set: &str,
    ) -> Vec<SetElement> {
        self.state
            .lock()
            .unwrap()
            .kernel
            .elements
            .get(&(table_key(table), set.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    /// The committed rules, in programming order.
    pub fn kernel_rules(&self) -> Vec<RuleEntry> {
        self.state.lock().unwrap().kernel.rules.clone()
    }

    /// How many operations are queued and not yet flushed.
    pub fn pending_ops(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }

    fn enqueue(&self, op: Op) {
        self.state.lock().unwrap().pending.push(op);
    }
}

impl Conn for MockConn {
    fn add_table(&self, table: &Table) {
        self.enqueue(Op::AddTable(table.clone()));
    }

    fn del_table(&self, table: &Table) {
        self.enqueue(Op::DelTable(table.clone()));
    }

    fn list_tables(&self) -> Result<Vec<Table>, ConnError> {
        Ok(self.state.lock().unwrap().kernel.tables.clone())
    }

    fn add_chain(&self, chain: &Chain) {
        self.enqueue(Op::AddChain(chain.clone()));
    }

    fn del_chain(&self, chain: &Chain) {
        self.enqueue(Op::DelChain(chain.clone()));
    }

    fn list_chains(&self) -> Result<Vec<Chain>, ConnError> {
        Ok(self.state.lock().unwrap().kernel.chains.clone())
    }

    fn add_set(
        &self,
        table: &Table,
        set: &Set,
        elements: &[SetElement],
    ) -> Result<(), ConnError> {
        self.enqueue(Op::AddSet(
            table.clone(),
            set.clone(),
            elements.to_vec(),
        ));
        Ok(())
    }

    fn del_set(&self, table: &Table, set: &Set) {
        self.enqueue(Op::DelSet(table.clone(), set.clone()));
    }

    fn get_sets(&self, table: &Table) -> Result<Vec<Set>, ConnError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .kernel
            .sets
            .get(&table_key(table))
            .cloned()
            .unwrap_or_default())
    }

    fn get_set_by_name(
        &self,
        table: &Table,
        name: &str,
    ) -> Result<Set, ConnError> {
        self.get_sets(table)?
            .into_iter()
            .find(|s| s.name == name)
            .ok_or(ConnError::NotFound)
    }

    fn get_set_elements(
        &self,
        table: &Table,
        set: &Set,
    ) -> Result<Vec<SetElement>, ConnError> {
        let state = self.state.lock().unwrap();
        state
            .kernel
            .elements
            .get(&(table_key(table), set.name.clone()))
            .cloned()
            .ok_or(ConnError::NotFound)
    }

    fn set_add_elements(
        &self,
        table: &Table,
        set: &Set,
        elements: &[SetElement],
    ) -> Result<(), ConnError> {
        self.enqueue(Op::AddElements(
            table.clone(),
            set.name.clone(),
            elements.to_vec(),
        ));
        Ok(())
    }

    fn set_del_elements(
        &self,
        table: &Table,
        set: &Set,
        elements: &[SetElement],
    ) -> Result<(), ConnError> {
        self.enqueue(Op::DelElements(
            table.clone(),
            set.name.clone(),
            elements.to_vec(),
        ));
        Ok(())
    }

    fn add_rule(&self, rule: &RuleEntry) {
        self.enqueue(Op::AddRule(rule.clone()));
    }

    fn del_rule(&self, rule: &RuleEntry) {
        self.enqueue(Op::DelRule(rule.clone()));
    }

    /// Stage the whole queue against a copy of committed state; commit
    /// only when every operation applies. The queue is consumed either
    /// way, so a failed batch leaves the kernel exactly as it was.
    fn flush(&self) -> Result<(), ConnError> {
        let mut state = self.state.lock().unwrap();
        let pending = std::mem::take(&mut state.pending);
        let mut staged = state.kernel.clone();
        for op in &pending {
            staged.apply(op)?;
        }
        state.kernel = staged;
        Ok(())
    }
}
