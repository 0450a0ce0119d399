// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The table store: the two-level family/name registry.
//!
//! One mutex guards the whole registry. Each registered table owns a
//! [`ChainStore`] and a [`SetStore`] by explicit composition; callers
//! reach them through the accessors here, never through the registry
//! map itself.

use super::Error;
use super::Result;
use super::chain::ChainStore;
use super::conn::Conn;
use super::conn::ConnError;
use super::set::SetStore;
use nftbl_api::Family;
use serde::Deserialize;
use serde::Serialize;
use slog::Logger;
use slog::debug;
use slog::info;
use slog::o;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

/// A table descriptor: the identity the kernel and the connection both
/// key on.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct Table {
    pub name: String,
    pub family: Family,
}

/// One registered table: its descriptor plus the chain and set stores
/// scoped to it.
struct TableRecord {
    table: Table,
    chains: Arc<ChainStore>,
    sets: Arc<SetStore>,
}

type Registry = BTreeMap<Family, BTreeMap<String, TableRecord>>;

/// The root handle over the table registry and the kernel connection.
pub struct NfTables {
    conn: Arc<dyn Conn>,
    log: Logger,
    tables: Mutex<Registry>,
}

impl NfTables {
    pub fn new(conn: Arc<dyn Conn>, log: Logger) -> Self {
        Self { conn, log, tables: Mutex::new(BTreeMap::new()) }
    }

    /// Register a table and enqueue its creation. Idempotent for the
    /// registry: an existing record is left untouched, but the kernel
    /// add is enqueued either way.
    pub fn create(&self, name: &str, family: Family) -> Result<()> {
        let table = {
            let mut tables = self.tables.lock().unwrap();
            self.ensure_record(&mut tables, name, family)
        };
        self.conn.add_table(&table);
        debug!(self.log, "table enqueued";
            "table" => name, "family" => %family);
        Ok(())
    }

    /// [`NfTables::create`] plus an immediate flush. A flush failure
    /// saying the table already exists on the kernel is downgraded to
    /// success, making creation idempotent under races.
    pub fn create_imm(&self, name: &str, family: Family) -> Result<()> {
        self.create(name, family)?;
        match self.conn.flush() {
            Err(ConnError::AlreadyExists) => Ok(()),
            other => Ok(other?),
        }
    }

    /// Remove the local record first; enqueue the kernel delete only if
    /// the table is still reported to exist. An emptied family bucket is
    /// pruned from the registry.
    pub fn delete(&self, name: &str, family: Family) -> Result<()> {
        {
            let mut tables = self.tables.lock().unwrap();
            if let Some(bucket) = tables.get_mut(&family) {
                bucket.remove(name);
                if bucket.is_empty() {
                    tables.remove(&family);
                }
            }
        }
        // The local entry is gone, so existence now means the kernel
        // still has the object.
        if self.kernel_has(name, family) {
            let table =
                Table { name: name.to_string(), family };
            self.conn.del_table(&table);
            debug!(self.log, "table delete enqueued";
                "table" => name, "family" => %family);
        }
        Ok(())
    }

    pub fn delete_imm(&self, name: &str, family: Family) -> Result<()> {
        self.delete(name, family)?;
        Ok(self.conn.flush()?)
    }

    /// Local-store hit short-circuits to true; a miss falls back to
    /// listing the kernel's tables, reconciling objects the kernel has
    /// but this process never mirrored.
    pub fn exist(&self, name: &str, family: Family) -> bool {
        {
            let tables = self.tables.lock().unwrap();
            if tables.get(&family).is_some_and(|b| b.contains_key(name)) {
                return true;
            }
        }
        self.kernel_has(name, family)
    }

    /// Table names of `family` as the kernel currently reports them. A
    /// live query, not a mirror read.
    pub fn get(&self, family: Family) -> Result<Vec<String>> {
        let _tables = self.tables.lock().unwrap();
        self.kernel_names(family)
    }

    /// Absorb kernel-reported tables of `family` missing from the local
    /// mirror, recursing into chain and set sync for each absorbed
    /// table. Additive only: local records the kernel no longer reports
    /// are kept; stale entries are the caller's to delete explicitly.
    pub fn sync(&self, family: Family) -> Result<()> {
        let kernel = self.conn.list_tables()?;
        for table in kernel.into_iter().filter(|t| t.family == family) {
            let absorbed = {
                let mut tables = self.tables.lock().unwrap();
                let known = tables
                    .get(&family)
                    .is_some_and(|b| b.contains_key(&table.name));
                if known {
                    None
                } else {
                    self.ensure_record(&mut tables, &table.name, family);
                    let record = &tables[&family][&table.name];
                    Some((record.chains.clone(), record.sets.clone()))
                }
            };
            if let Some((chains, sets)) = absorbed {
                info!(self.log, "absorbed table from kernel";
                    "table" => %table.name, "family" => %family);
                chains.sync()?;
                sets.sync()?;
            }
        }
        Ok(())
    }

    /// JSON records for every tracked table and its chains,
    /// concatenated. Diagnostics, not a persistence format.
    pub fn dump(&self) -> Result<Vec<u8>> {
        let tables = self.tables.lock().unwrap();
        let mut data = Vec::new();
        for bucket in tables.values() {
            for record in bucket.values() {
                data.extend(
                    serde_json::to_vec(&record.table).map_err(Error::Dump)?,
                );
                data.extend(record.chains.dump()?);
            }
        }
        Ok(data)
    }

    /// The descriptor of a registered table.
    pub fn table(&self, name: &str, family: Family) -> Result<Table> {
        self.with_record(name, family, |r| r.table.clone())
    }

    /// The chain store scoped to a registered table.
    pub fn chains(
        &self,
        name: &str,
        family: Family,
    ) -> Result<Arc<ChainStore>> {
        self.with_record(name, family, |r| r.chains.clone())
    }

    /// The set store scoped to a registered table.
    pub fn sets(&self, name: &str, family: Family) -> Result<Arc<SetStore>> {
        self.with_record(name, family, |r| r.sets.clone())
    }

    /// Families with at least one registered table. The registry never
    /// keeps an empty family bucket, so this is exactly the outer keys.
    pub fn families(&self) -> Vec<Family> {
        self.tables.lock().unwrap().keys().copied().collect()
    }

    fn with_record<T>(
        &self,
        name: &str,
        family: Family,
        f: impl FnOnce(&TableRecord) -> T,
    ) -> Result<T> {
        let tables = self.tables.lock().unwrap();
        tables
            .get(&family)
            .and_then(|b| b.get(name))
            .map(f)
            .ok_or_else(|| Error::TableNotFound {
                family,
                name: name.to_string(),
            })
    }

    /// Ensure a record exists for `(family, name)`, constructing its
    /// chain and set stores on first sight, and return its descriptor.
    fn ensure_record(
        &self,
        tables: &mut Registry,
        name: &str,
        family: Family,
    ) -> Table {
        let bucket = tables.entry(family).or_default();
        if !bucket.contains_key(name) {
            let table = Table { name: name.to_string(), family };
            let log = self.log.new(o!(
                "table" => name.to_string(),
                "family" => family.to_string(),
            ));
            bucket.insert(
                name.to_string(),
                TableRecord {
                    table: table.clone(),
                    chains: Arc::new(ChainStore::new(
                        self.conn.clone(),
                        table.clone(),
                        log.clone(),
                    )),
                    sets: Arc::new(SetStore::new(
                        self.conn.clone(),
                        table.clone(),
                        log,
                    )),
                },
            );
        }
        bucket[name].table.clone()
    }

    fn kernel_has(&self, name: &str, family: Family) -> bool {
        self.kernel_names(family)
            .map(|names| names.iter().any(|n| n == name))
            .unwrap_or(false)
    }

    fn kernel_names(&self, family: Family) -> Result<Vec<String>> {
        Ok(self
            .conn
            .list_tables()?
            .into_iter()
            .filter(|t| t.family == family)
            .map(|t| t.name)
            .collect())
    }
}
