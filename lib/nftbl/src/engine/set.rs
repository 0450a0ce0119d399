// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Sets, set elements, and the per-table set store.
//!
//! Element keys use the kernel's fixed attribute encoding: every
//! component of a composite key is padded to a 4-byte boundary before
//! concatenation and the concatenated key is padded again. A misaligned
//! key is not an error anywhere; it simply never matches at lookup time,
//! so the encoding helpers here are the only place keys are built.

use super::Error;
use super::Result;
use super::conn::Conn;
use super::table::Table;
use core::net::IpAddr;
use core::time::Duration;
use nftbl_api::Family;
use nftbl_api::HostAddr;
use nftbl_api::SetDatatype;
use nftbl_api::Verdict;
use rand::Rng;
use serde::Deserialize;
use serde::Serialize;
use slog::Logger;
use slog::debug;
use slog::info;
use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Display;
use std::sync::Arc;
use std::sync::Mutex;

/// A set descriptor as the kernel sees it, scoped to one table by the
/// store that owns it.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Set {
    pub name: String,
    /// Kernel-assigned numeric id, drawn pseudo-randomly at creation.
    /// Not guaranteed unique; a collision surfaces as a flush failure.
    pub id: u32,
    pub anonymous: bool,
    pub constant: bool,
    /// Set if and only if the elements represent contiguous ranges.
    pub interval: bool,
    pub is_map: bool,
    pub timeout: Option<Duration>,
    pub key_type: SetDatatype,
    pub data_type: Option<SetDatatype>,
}

/// Caller-supplied attributes for [`SetStore::create_set`].
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SetAttributes {
    pub name: String,
    pub constant: bool,
    pub is_map: bool,
    pub interval: bool,
    pub timeout: Option<Duration>,
    pub key_type: SetDatatype,
    pub data_type: Option<SetDatatype>,
}

impl Default for SetAttributes {
    fn default() -> Self {
        Self {
            name: String::new(),
            constant: false,
            is_map: false,
            interval: false,
            timeout: None,
            key_type: SetDatatype::INVALID,
            data_type: None,
        }
    }
}

/// The value side of a set element. Exactly one payload kind is ever
/// present: raw bytes for a map, a verdict for a verdict map.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum ElementPayload {
    Bytes(Vec<u8>),
    Verdict(Verdict),
}

/// One element of a set or map.
#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct SetElement {
    pub key: Vec<u8>,
    /// Marks the exclusive upper bound of an interval.
    pub interval_end: bool,
    pub payload: Option<ElementPayload>,
}

impl SetElement {
    pub fn from_key(key: Vec<u8>) -> Self {
        Self { key, interval_end: false, payload: None }
    }
}

/// The value attached to a single-address element by [`make_element`]:
/// at most one of an address, a service port, or a verdict.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ElementData {
    Addr(HostAddr),
    Port(u16),
    Action(Verdict),
}

/// One component value of a concatenated key, tagged by kind. The
/// declared [`SetDatatype`] of the matching key position decides which
/// kind is acceptable.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ElementValue {
    Integer(u32),
    Mark(u32),
    Addr(IpAddr),
    EtherAddr([u8; 6]),
    InetProto(u8),
    InetService(u16),
}

impl Display for ElementValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Integer(_) => write!(f, "integer"),
            Self::Mark(_) => write!(f, "mark"),
            Self::Addr(IpAddr::V4(_)) => write!(f, "ipv4 address"),
            Self::Addr(IpAddr::V6(_)) => write!(f, "ipv6 address"),
            Self::EtherAddr(_) => write!(f, "ether address"),
            Self::InetProto(_) => write!(f, "inet proto"),
            Self::InetService(_) => write!(f, "inet service"),
        }
    }
}

/// Round a component encoding up to the kernel's 4-byte alignment.
fn pad4(mut bytes: Vec<u8>) -> Vec<u8> {
    let aligned = bytes.len().next_multiple_of(4);
    bytes.resize(aligned, 0);
    bytes
}

/// Encode one component value per its declared datatype, padded to a
/// 4-byte boundary. A value of the wrong kind for the datatype is the
/// descriptive validation failure, never a silent re-encode.
fn encode_value(key_type: &SetDatatype, val: &ElementValue) -> Result<Vec<u8>> {
    let mismatch = || Error::BadElementValue {
        key_type: key_type.name().to_string(),
        got: val.to_string(),
    };

    let bytes = if *key_type == SetDatatype::INTEGER {
        match val {
            ElementValue::Integer(v) => v.to_be_bytes().to_vec(),
            _ => return Err(mismatch()),
        }
    } else if *key_type == SetDatatype::MARK {
        match val {
            ElementValue::Mark(v) => v.to_be_bytes().to_vec(),
            _ => return Err(mismatch()),
        }
    } else if *key_type == SetDatatype::IPV4_ADDR {
        match val {
            ElementValue::Addr(IpAddr::V4(a)) => a.octets().to_vec(),
            _ => return Err(mismatch()),
        }
    } else if *key_type == SetDatatype::IPV6_ADDR {
        match val {
            ElementValue::Addr(IpAddr::V6(a)) => a.octets().to_vec(),
            _ => return Err(mismatch()),
        }
    } else if *key_type == SetDatatype::ETHER_ADDR {
        match val {
            ElementValue::EtherAddr(a) => a.to_vec(),
            _ => return Err(mismatch()),
        }
    } else if *key_type == SetDatatype::INET_PROTO {
        match val {
            ElementValue::InetProto(p) => vec![*p],
            _ => return Err(mismatch()),
        }
    } else if *key_type == SetDatatype::INET_SERVICE {
        match val {
            ElementValue::InetService(p) => p.to_be_bytes().to_vec(),
            _ => return Err(mismatch()),
        }
    } else {
        return Err(Error::UnsupportedKeyType(key_type.name().to_string()));
    };

    Ok(pad4(bytes))
}

/// Build the element(s) for a single address key with an optional
/// attached value.
///
/// The address is first expanded into its canonical range
/// representation: a `[first, last+1)` pair of elements, the upper bound
/// carried as an `interval_end` marker. A bare address becomes the
/// degenerate one-address range. The value, if any, attaches to the
/// opening element; an address-typed value of the other family is
/// rejected.
pub fn make_element(
    key: &HostAddr,
    data: Option<&ElementData>,
) -> Result<Vec<SetElement>> {
    let first = HostAddr::new(key.first());
    let mut elements = vec![
        SetElement::from_key(first.key_bytes()),
        SetElement {
            key: key.interval_end_bytes(),
            interval_end: true,
            payload: None,
        },
    ];

    match data {
        None => {}
        Some(ElementData::Addr(val)) => {
            if val.is_ipv6() != key.is_ipv6() {
                return Err(Error::MixedAddrFamily);
            }
            elements[0].payload = Some(ElementPayload::Bytes(val.key_bytes()));
        }
        Some(ElementData::Port(port)) => {
            elements[0].payload =
                Some(ElementPayload::Bytes(port.to_be_bytes().to_vec()));
        }
        Some(ElementData::Action(verdict)) => {
            elements[0].payload =
                Some(ElementPayload::Verdict(verdict.clone()));
        }
    }

    Ok(elements)
}

/// Build a composite-key element from ordered (datatype, value)
/// components plus a mandatory action.
///
/// Each component is encoded per its datatype and independently padded
/// to 4 bytes; the concatenated key is then itself padded by allocating
/// the aligned length and copying the unaligned bytes into its prefix.
pub fn make_concat_element(
    keys: &[SetDatatype],
    vals: &[ElementValue],
    action: Option<&Verdict>,
) -> Result<SetElement> {
    let Some(action) = action else {
        return Err(Error::MissingAction);
    };
    if keys.is_empty() {
        return Err(Error::EmptyConcatKey);
    }
    if keys.len() != vals.len() {
        return Err(Error::KeyValueMismatch {
            keys: keys.len(),
            vals: vals.len(),
        });
    }

    let mut unaligned = Vec::new();
    for (key_type, val) in keys.iter().zip(vals) {
        unaligned.extend_from_slice(&encode_value(key_type, val)?);
    }

    let mut key = vec![0u8; unaligned.len().next_multiple_of(4)];
    key[..unaligned.len()].copy_from_slice(&unaligned);

    Ok(SetElement {
        key,
        interval_end: false,
        payload: Some(ElementPayload::Verdict(action.clone())),
    })
}

/// The set store for one table: the name-keyed local mirror plus the
/// connection used to keep the kernel in step with it.
pub struct SetStore {
    conn: Arc<dyn Conn>,
    table: Table,
    log: Logger,
    sets: Mutex<BTreeMap<String, Set>>,
}

impl SetStore {
    pub(crate) fn new(conn: Arc<dyn Conn>, table: Table, log: Logger) -> Self {
        Self { conn, table, log, sets: Mutex::new(BTreeMap::new()) }
    }

    /// Create a set from `attrs` and its initial `elements`, program it
    /// immediately, and register it locally.
    ///
    /// Interval sets keyed by an address type get the family's
    /// zero-address sentinel prepended as an `interval_end` element so
    /// the kernel's interval representation closes the first open
    /// interval correctly. The numeric id is drawn from `1..=0xffff`; a
    /// collision with a concurrently created set is reported by the
    /// kernel at flush time and not retried here.
    pub fn create_set(
        &self,
        attrs: &SetAttributes,
        elements: &[SetElement],
    ) -> Result<Set> {
        let mut initial = Vec::with_capacity(elements.len() + 1);
        if attrs.interval && attrs.key_type.is_address() {
            initial.push(SetElement {
                key: self.zero_addr_key(),
                interval_end: true,
                payload: None,
            });
        }
        initial.extend_from_slice(elements);

        let set = Set {
            name: attrs.name.clone(),
            id: rand::rng().random_range(1..=0xffff),
            anonymous: false,
            constant: attrs.constant,
            interval: attrs.interval,
            is_map: attrs.is_map,
            timeout: attrs.timeout,
            key_type: attrs.key_type.clone(),
            data_type: attrs.data_type.clone(),
        };

        self.conn.add_set(&self.table, &set, &initial)?;
        self.conn.flush()?;

        debug!(self.log, "set created";
            "set" => %set.name, "id" => set.id, "elements" => initial.len());
        self.sets.lock().unwrap().insert(set.name.clone(), set.clone());

        Ok(set)
    }

    /// Remove the named set. Already-deleted (unknown locally or on the
    /// kernel) is success, not an error.
    pub fn del_set(&self, name: &str) -> Result<()> {
        if !self.exist(name) {
            return Ok(());
        }
        // Exist above guarantees the local entry.
        let set = self.local(name).ok_or_else(|| not_found(name))?;
        self.conn.del_set(&self.table, &set);
        self.conn.flush()?;
        self.sets.lock().unwrap().remove(name);
        debug!(self.log, "set deleted"; "set" => name);
        Ok(())
    }

    /// True only when the set is known locally *and* the kernel confirms
    /// it for this table.
    pub fn exist(&self, name: &str) -> bool {
        if !self.sets.lock().unwrap().contains_key(name) {
            return false;
        }
        self.conn.get_set_by_name(&self.table, name).is_ok()
    }

    pub fn get_set_by_name(&self, name: &str) -> Result<Set> {
        if self.local(name).is_none() {
            return Err(not_found(name));
        }
        match self.conn.get_set_by_name(&self.table, name) {
            Ok(set) => Ok(set),
            Err(super::conn::ConnError::NotFound) => Err(not_found(name)),
            Err(e) => Err(e.into()),
        }
    }

    /// All sets currently programmed on the kernel for this table. A
    /// live query, not a mirror read.
    pub fn get_sets(&self) -> Result<Vec<Set>> {
        Ok(self.conn.get_sets(&self.table)?)
    }

    pub fn get_set_elements(&self, name: &str) -> Result<Vec<SetElement>> {
        let set = self.known(name)?;
        Ok(self.conn.get_set_elements(&self.table, &set)?)
    }

    pub fn set_add_elements(
        &self,
        name: &str,
        elements: &[SetElement],
    ) -> Result<()> {
        let set = self.known(name)?;
        self.conn.set_add_elements(&self.table, &set, elements)?;
        self.conn.flush()?;
        Ok(())
    }

    pub fn set_del_elements(
        &self,
        name: &str,
        elements: &[SetElement],
    ) -> Result<()> {
        let set = self.known(name)?;
        self.conn.set_del_elements(&self.table, &set, elements)?;
        self.conn.flush()?;
        Ok(())
    }

    /// Absorb kernel-reported sets missing from the local mirror.
    /// Additive only: local entries absent from the kernel are kept.
    pub fn sync(&self) -> Result<()> {
        let kernel = self.conn.get_sets(&self.table)?;
        let mut sets = self.sets.lock().unwrap();
        for set in kernel {
            if !sets.contains_key(&set.name) {
                info!(self.log, "absorbed set from kernel"; "set" => %set.name);
                sets.insert(set.name.clone(), set);
            }
        }
        Ok(())
    }

    /// Names currently mirrored locally, in order.
    pub fn names(&self) -> Vec<String> {
        self.sets.lock().unwrap().keys().cloned().collect()
    }

    fn local(&self, name: &str) -> Option<Set> {
        self.sets.lock().unwrap().get(name).cloned()
    }

    /// Local knowledge plus kernel confirmation, or the not-found error.
    fn known(&self, name: &str) -> Result<Set> {
        let set = self.local(name).ok_or_else(|| not_found(name))?;
        if self.conn.get_set_by_name(&self.table, name).is_err() {
            return Err(not_found(name));
        }
        Ok(set)
    }

    fn zero_addr_key(&self) -> Vec<u8> {
        match self.table.family {
            Family::Ipv4 => vec![0u8; 4],
            _ => vec![0u8; 16],
        }
    }
}

fn not_found(name: &str) -> Error {
    Error::SetNotFound(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockConn;
    use nftbl_api::Family;
    use slog::Discard;
    use slog::o;

    fn filter(family: Family) -> Table {
        Table { name: "filter".to_string(), family }
    }

    fn store(family: Family) -> (Arc<MockConn>, SetStore) {
        let conn = Arc::new(MockConn::new());
        let table = filter(family);
        conn.preload_table(table.clone());
        let log = Logger::root(Discard, o!());
        (conn.clone(), SetStore::new(conn, table, log))
    }

    fn v4_attrs(name: &str) -> SetAttributes {
        SetAttributes {
            name: name.to_string(),
            key_type: SetDatatype::IPV4_ADDR,
            ..Default::default()
        }
    }

    #[test]
    fn make_element_attaches_one_payload() {
        let key: HostAddr = "192.0.2.1".parse().unwrap();

        let plain = make_element(&key, None).unwrap();
        assert_eq!(plain.len(), 2);
        assert_eq!(plain[0].key, vec![192, 0, 2, 1]);
        assert!(!plain[0].interval_end);
        assert_eq!(plain[1].key, vec![192, 0, 2, 2]);
        assert!(plain[1].interval_end);

        let port = make_element(&key, Some(&ElementData::Port(8080))).unwrap();
        assert_eq!(
            port[0].payload,
            Some(ElementPayload::Bytes(vec![0x1f, 0x90]))
        );

        let verdict =
            make_element(&key, Some(&ElementData::Action(Verdict::Drop)))
                .unwrap();
        assert_eq!(
            verdict[0].payload,
            Some(ElementPayload::Verdict(Verdict::Drop))
        );
    }

    #[test]
    fn make_element_rejects_mixed_families() {
        let key: HostAddr = "192.0.2.1".parse().unwrap();
        let val: HostAddr = "2001:db8::1".parse().unwrap();
        let err =
            make_element(&key, Some(&ElementData::Addr(val))).unwrap_err();
        assert!(matches!(err, Error::MixedAddrFamily));
    }

    #[test]
    fn make_element_expands_cidr_key() {
        let key: HostAddr = "198.51.100.0/24".parse().unwrap();
        let elements = make_element(&key, None).unwrap();
        assert_eq!(elements[0].key, vec![198, 51, 100, 0]);
        assert_eq!(elements[1].key, vec![198, 51, 101, 0]);
        assert!(elements[1].interval_end);
    }

    #[test]
    fn concat_element_validation() {
        let keys = [SetDatatype::IPV4_ADDR, SetDatatype::INET_SERVICE];
        let vals = [
            ElementValue::Addr("192.0.2.1".parse().unwrap()),
            ElementValue::InetService(443),
        ];

        let err = make_concat_element(&keys, &vals, None).unwrap_err();
        assert!(matches!(err, Error::MissingAction));

        let err =
            make_concat_element(&[], &[], Some(&Verdict::Accept)).unwrap_err();
        assert!(matches!(err, Error::EmptyConcatKey));

        let err =
            make_concat_element(&keys, &vals[..1], Some(&Verdict::Accept))
                .unwrap_err();
        assert!(matches!(
            err,
            Error::KeyValueMismatch { keys: 2, vals: 1 }
        ));

        let wrong = [
            ElementValue::InetService(443),
            ElementValue::Addr("192.0.2.1".parse().unwrap()),
        ];
        let err = make_concat_element(&keys, &wrong, Some(&Verdict::Accept))
            .unwrap_err();
        assert!(matches!(err, Error::BadElementValue { .. }));
    }

    #[test]
    fn concat_key_length_matches_datatype_arithmetic() {
        let keys = [
            SetDatatype::IPV4_ADDR,
            SetDatatype::INET_PROTO,
            SetDatatype::INET_SERVICE,
        ];
        let vals = [
            ElementValue::Addr("10.0.0.1".parse().unwrap()),
            ElementValue::InetProto(6),
            ElementValue::InetService(8080),
        ];
        let element =
            make_concat_element(&keys, &vals, Some(&Verdict::Accept)).unwrap();

        // Each component independently rounds to 4; the recomputed total
        // from the datatypes must equal the encoded key length.
        let expected = SetDatatype::concat(&keys).bytes() as usize;
        assert_eq!(element.key.len(), expected);
        assert_eq!(element.key.len(), 12);

        // Proto byte sits at the start of its own padded slot.
        assert_eq!(&element.key[0..4], &[10, 0, 0, 1]);
        assert_eq!(&element.key[4..8], &[6, 0, 0, 0]);
        assert_eq!(&element.key[8..12], &[0x1f, 0x90, 0, 0]);
    }

    #[test]
    fn create_set_prepends_interval_sentinel() {
        let (conn, store) = store(Family::Ipv4);
        let attrs = SetAttributes {
            interval: true,
            ..v4_attrs("blocked")
        };
        let elements = make_element(
            &"203.0.113.0/24".parse::<HostAddr>().unwrap(),
            None,
        )
        .unwrap();

        let set = store.create_set(&attrs, &elements).unwrap();
        assert!(set.interval);
        assert!((1..=0xffff).contains(&set.id));

        let programmed =
            conn.kernel_set_elements(&filter(Family::Ipv4), "blocked");
        assert_eq!(programmed.len(), 3);
        assert_eq!(programmed[0].key, vec![0, 0, 0, 0]);
        assert!(programmed[0].interval_end);
        assert_eq!(programmed[1].key, vec![203, 0, 113, 0]);
    }

    #[test]
    fn no_sentinel_for_discrete_sets() {
        let (conn, store) = store(Family::Ipv4);
        let elements =
            vec![SetElement::from_key(vec![192, 0, 2, 1])];
        store.create_set(&v4_attrs("hosts"), &elements).unwrap();
        assert_eq!(
            conn.kernel_set_elements(&filter(Family::Ipv4), "hosts").len(),
            1
        );
    }

    #[test]
    fn del_set_is_noop_for_unknown() {
        let (_conn, store) = store(Family::Ipv4);
        store.del_set("nope").unwrap();
        assert!(!store.exist("nope"));
    }

    #[test]
    fn element_mutation_requires_local_knowledge() {
        let (_conn, store) = store(Family::Ipv4);
        let err = store
            .set_add_elements(
                "ghost",
                &[SetElement::from_key(vec![1, 2, 3, 4])],
            )
            .unwrap_err();
        assert!(matches!(err, Error::SetNotFound(_)));

        store.create_set(&v4_attrs("hosts"), &[]).unwrap();
        store
            .set_add_elements(
                "hosts",
                &[SetElement::from_key(vec![192, 0, 2, 9])],
            )
            .unwrap();
        assert_eq!(store.get_set_elements("hosts").unwrap().len(), 1);

        store
            .set_del_elements(
                "hosts",
                &[SetElement::from_key(vec![192, 0, 2, 9])],
            )
            .unwrap();
        assert!(store.get_set_elements("hosts").unwrap().is_empty());
    }

    #[test]
    fn sync_absorbs_only_missing_sets() {
        let (conn, store) = store(Family::Ipv4);
        store.create_set(&v4_attrs("mine"), &[]).unwrap();

        let foreign = Set {
            name: "foreign".to_string(),
            id: 7,
            anonymous: false,
            constant: false,
            interval: false,
            is_map: false,
            timeout: None,
            key_type: SetDatatype::IPV4_ADDR,
            data_type: None,
        };
        conn.preload_set(&filter(Family::Ipv4), foreign);

        store.sync().unwrap();
        assert_eq!(store.names(), vec!["foreign", "mine"]);
    }
}
