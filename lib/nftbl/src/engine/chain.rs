// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Chains and the per-table chain store.
//!
//! Rule attachment is compiled elsewhere; this store only mirrors chain
//! existence and base-chain attributes, with the same locking and
//! reconciliation policy as the set store.

use super::Error;
use super::Result;
use super::conn::Conn;
use super::table::Table;
use serde::Deserialize;
use serde::Serialize;
use slog::Logger;
use slog::debug;
use slog::info;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize,
)]
pub enum ChainType {
    Filter,
    Nat,
    Route,
}

#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize,
)]
pub enum Hook {
    Prerouting,
    Input,
    Forward,
    Output,
    Postrouting,
    Ingress,
}

#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize,
)]
pub enum Policy {
    Accept,
    Drop,
}

/// Attributes that make a chain a base chain (attached to a packet-path
/// hook). A chain without them is a regular chain reached by jump/goto.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize,
)]
pub struct BaseChainSpec {
    pub chain_type: ChainType,
    pub hook: Hook,
    pub priority: i32,
    pub policy: Option<Policy>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Chain {
    pub name: String,
    pub table: Table,
    pub base: Option<BaseChainSpec>,
}

/// The chain store for one table.
pub struct ChainStore {
    conn: Arc<dyn Conn>,
    table: Table,
    log: Logger,
    chains: Mutex<BTreeMap<String, Chain>>,
}

impl ChainStore {
    pub(crate) fn new(conn: Arc<dyn Conn>, table: Table, log: Logger) -> Self {
        Self { conn, table, log, chains: Mutex::new(BTreeMap::new()) }
    }

    /// Register a chain locally and enqueue its creation. Idempotent for
    /// the local mirror; the kernel add is enqueued regardless.
    pub fn create(
        &self,
        name: &str,
        base: Option<BaseChainSpec>,
    ) -> Result<()> {
        let chain = {
            let mut chains = self.chains.lock().unwrap();
            chains
                .entry(name.to_string())
                .or_insert_with(|| Chain {
                    name: name.to_string(),
                    table: self.table.clone(),
                    base,
                })
                .clone()
        };
        self.conn.add_chain(&chain);
        debug!(self.log, "chain enqueued"; "chain" => name);
        Ok(())
    }

    /// [`ChainStore::create`] plus an immediate flush; a flush failure
    /// that only says the chain already exists is success.
    pub fn create_imm(
        &self,
        name: &str,
        base: Option<BaseChainSpec>,
    ) -> Result<()> {
        self.create(name, base)?;
        match self.conn.flush() {
            Err(super::conn::ConnError::AlreadyExists) => Ok(()),
            other => Ok(other?),
        }
    }

    /// Drop the local entry, then delete from the kernel only if the
    /// chain is still reported to exist there.
    pub fn delete(&self, name: &str) -> Result<()> {
        let removed = self.chains.lock().unwrap().remove(name);
        if self.kernel_has(name) {
            let chain = removed.unwrap_or_else(|| Chain {
                name: name.to_string(),
                table: self.table.clone(),
                base: None,
            });
            self.conn.del_chain(&chain);
            debug!(self.log, "chain delete enqueued"; "chain" => name);
        }
        Ok(())
    }

    pub fn delete_imm(&self, name: &str) -> Result<()> {
        self.delete(name)?;
        Ok(self.conn.flush()?)
    }

    /// The mirrored descriptor of a chain.
    pub fn chain(&self, name: &str) -> Result<Chain> {
        self.chains
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::ChainNotFound(name.to_string()))
    }

    /// Local hit short-circuits; a miss falls back to the kernel list.
    pub fn exist(&self, name: &str) -> bool {
        if self.chains.lock().unwrap().contains_key(name) {
            return true;
        }
        self.kernel_has(name)
    }

    /// Chain names of this table as the kernel currently reports them.
    pub fn get(&self) -> Result<Vec<String>> {
        Ok(self
            .conn
            .list_chains()?
            .into_iter()
            .filter(|c| c.table == self.table)
            .map(|c| c.name)
            .collect())
    }

    /// Absorb kernel-reported chains missing locally. Additive only.
    pub fn sync(&self) -> Result<()> {
        let kernel = self.conn.list_chains()?;
        let mut chains = self.chains.lock().unwrap();
        for chain in kernel {
            if chain.table == self.table && !chains.contains_key(&chain.name)
            {
                info!(self.log, "absorbed chain from kernel";
                    "chain" => %chain.name);
                chains.insert(chain.name.clone(), chain);
            }
        }
        Ok(())
    }

    /// JSON records for every mirrored chain, concatenated. Diagnostics,
    /// not a persistence format.
    pub fn dump(&self) -> Result<Vec<u8>> {
        let chains = self.chains.lock().unwrap();
        let mut data = Vec::new();
        for chain in chains.values() {
            data.extend(serde_json::to_vec(chain).map_err(Error::Dump)?);
        }
        Ok(data)
    }

    fn kernel_has(&self, name: &str) -> bool {
        match self.conn.list_chains() {
            Ok(chains) => chains
                .iter()
                .any(|c| c.table == self.table && c.name == name),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockConn;
    use nftbl_api::Family;
    use slog::Discard;
    use slog::o;

    fn store() -> (Arc<MockConn>, ChainStore) {
        let conn = Arc::new(MockConn::new());
        let table = Table { name: "filter".to_string(), family: Family::Ipv4 };
        conn.preload_table(table.clone());
        let log = Logger::root(Discard, o!());
        (conn.clone(), ChainStore::new(conn, table, log))
    }

    fn base_input() -> BaseChainSpec {
        BaseChainSpec {
            chain_type: ChainType::Filter,
            hook: Hook::Input,
            priority: 0,
            policy: Some(Policy::Accept),
        }
    }

    #[test]
    fn create_imm_then_exist() {
        let (_conn, store) = store();
        store.create_imm("input", Some(base_input())).unwrap();
        assert!(store.exist("input"));
        assert_eq!(store.get().unwrap(), vec!["input"]);

        // A second add reports already-exists from the kernel, which
        // create_imm treats as success.
        store.create_imm("input", Some(base_input())).unwrap();
    }

    #[test]
    fn delete_prunes_local_and_kernel() {
        let (_conn, store) = store();
        store.create_imm("forward", None).unwrap();
        store.delete_imm("forward").unwrap();
        assert!(!store.exist("forward"));
        assert!(store.get().unwrap().is_empty());
        assert!(matches!(
            store.chain("forward"),
            Err(Error::ChainNotFound(_))
        ));
    }

    #[test]
    fn sync_is_additive_only() {
        let (conn, store) = store();
        store.create("pending", None).unwrap();

        let table = Table { name: "filter".to_string(), family: Family::Ipv4 };
        conn.preload_chain(Chain {
            name: "external".to_string(),
            table,
            base: None,
        });

        store.sync().unwrap();
        assert!(store.exist("external"));
        // Still mirrored even though the kernel never saw it.
        assert!(store.chains.lock().unwrap().contains_key("pending"));
    }

    #[test]
    fn dump_emits_json_records() {
        let (_conn, store) = store();
        store.create_imm("input", Some(base_input())).unwrap();
        let data = store.dump().unwrap();
        let text = String::from_utf8(data).unwrap();
        assert!(text.contains("\"input\""));
    }
}
