// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The L3 predicate compiler.
//!
//! Populated fields of a rule's [`L3Spec`] are compiled in a fixed
//! order: version, protocol, source, destination. The order is load-
//! bearing: every comparison reads the register the immediately
//! preceding payload load filled.

use super::Error;
use super::Result;
use super::expr::CmpOp;
use super::expr::Expr;
use super::expr::PayloadBase;
use super::expr::REG_1;
use super::rule::Rule;
use super::set::Set;
use super::set::SetElement;
use nftbl_api::AddrSpec;
use nftbl_api::Family;
use nftbl_api::HostAddr;
use nftbl_api::SetDatatype;
use rand::Rng;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;

/// Which end of the IP header an address predicate matches.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum AddrRole {
    Src,
    Dst,
}

impl AddrRole {
    /// Byte offset of this address within the network header. Fixed by
    /// the protocol layout, never configurable.
    fn offset(self, family: Family) -> u32 {
        match (family, self) {
            (Family::Ipv4, Self::Src) => 12,
            (Family::Ipv4, Self::Dst) => 16,
            (_, Self::Src) => 8,
            (_, Self::Dst) => 24,
        }
    }
}

/// A lookup set a compiled rule depends on. The caller programs the set
/// before (or in the same flush as) the rule referencing it.
#[derive(Clone, Debug)]
pub struct SetRef {
    pub set: Set,
    pub elements: Vec<SetElement>,
}

/// Compile the L3 portion of `rule` for `family`, returning the ordered
/// expressions and any lookup sets they reference. A rule without an L3
/// spec compiles to nothing.
pub fn compile_l3(
    family: Family,
    rule: &Rule,
) -> Result<(Vec<Expr>, Vec<SetRef>)> {
    let Some(l3) = &rule.l3 else {
        return Ok((Vec::new(), Vec::new()));
    };
    if !matches!(family, Family::Ipv4 | Family::Ipv6) {
        return Err(Error::UnsupportedFamily(family));
    }

    let mut exprs = Vec::new();
    let mut sets = Vec::new();

    if let Some(version) = l3.version {
        exprs.extend(version_exprs(version, rule.exclude));
    }
    if let Some(protocol) = l3.protocol {
        exprs.extend(protocol_exprs(family, protocol, rule.exclude));
    }
    if let Some(src) = &l3.src {
        compile_addr(
            family,
            AddrRole::Src,
            src,
            rule.exclude,
            &mut exprs,
            &mut sets,
        )?;
    }
    if let Some(dst) = &l3.dst {
        compile_addr(
            family,
            AddrRole::Dst,
            dst,
            rule.exclude,
            &mut exprs,
            &mut sets,
        )?;
    }

    Ok((exprs, sets))
}

/// Match the version nibble: load header byte 0, mask the high nibble,
/// compare against `version << 4`.
fn version_exprs(version: u8, exclude: bool) -> [Expr; 3] {
    [
        Expr::Payload {
            base: PayloadBase::NetworkHeader,
            offset: 0,
            len: 1,
            dreg: REG_1,
        },
        Expr::Bitwise {
            sreg: REG_1,
            dreg: REG_1,
            len: 1,
            mask: vec![0xf0],
            xor: vec![0x00],
        },
        Expr::Cmp {
            op: cmp_flavor(exclude),
            sreg: REG_1,
            data: vec![version << 4],
        },
    ]
}

/// Match the L4 protocol: the protocol byte for IPv4, the next-header
/// byte for IPv6.
fn protocol_exprs(family: Family, protocol: u8, exclude: bool) -> [Expr; 2] {
    let offset = match family {
        Family::Ipv4 => 9,
        _ => 6,
    };
    [
        Expr::Payload {
            base: PayloadBase::NetworkHeader,
            offset,
            len: 1,
            dreg: REG_1,
        },
        Expr::Cmp {
            op: cmp_flavor(exclude),
            sreg: REG_1,
            data: vec![protocol],
        },
    ]
}

/// Compile one address spec. A list becomes a generated lookup set and
/// a load + lookup pair; a range becomes a load + inline range compare.
/// Both forms are emitted when the spec carries both.
fn compile_addr(
    family: Family,
    role: AddrRole,
    spec: &AddrSpec,
    exclude: bool,
    exprs: &mut Vec<Expr>,
    sets: &mut Vec<SetRef>,
) -> Result<()> {
    let key_type = match family {
        Family::Ipv4 => SetDatatype::IPV4_ADDR,
        _ => SetDatatype::IPV6_ADDR,
    };
    let load = Expr::Payload {
        base: PayloadBase::NetworkHeader,
        offset: role.offset(family),
        len: key_type.bytes(),
        dreg: REG_1,
    };

    if !spec.list.is_empty() {
        let elements = list_elements(family, &spec.list)?;
        let set = Set {
            name: gen_set_name(),
            id: rand::rng().random_range(1..=0xffff),
            anonymous: false,
            constant: true,
            interval: false,
            is_map: false,
            timeout: None,
            key_type: key_type.clone(),
            data_type: None,
        };
        exprs.push(load.clone());
        exprs.push(Expr::Lookup {
            sreg: REG_1,
            set_name: set.name.clone(),
            set_id: set.id,
            invert: exclude,
        });
        sets.push(SetRef { set, elements });
    }

    if let Some([lo, hi]) = &spec.range {
        if lo.family() != family || hi.family() != family {
            return Err(Error::MixedAddrFamily);
        }
        exprs.push(load);
        exprs.push(Expr::Range {
            op: cmp_flavor(exclude),
            sreg: REG_1,
            from: lo.key_bytes(),
            to: hi.key_bytes(),
        });
    }

    Ok(())
}

/// Keys for a list-shaped spec: each address encoded by its base
/// address. Prefixed entries contribute the network address only; a
/// caller wanting whole-block matching uses a range or an interval set.
fn list_elements(
    family: Family,
    list: &[HostAddr],
) -> Result<Vec<SetElement>> {
    list.iter()
        .map(|addr| {
            if addr.family() != family {
                return Err(Error::MixedAddrFamily);
            }
            Ok(SetElement::from_key(addr.key_bytes()))
        })
        .collect()
}

fn cmp_flavor(exclude: bool) -> CmpOp {
    if exclude { CmpOp::Neq } else { CmpOp::Eq }
}

/// Generated lookup sets get process-unique names; the kernel-facing
/// identity is the random numeric id drawn alongside.
fn gen_set_name() -> String {
    static NEXT: AtomicU32 = AtomicU32::new(0);
    format!("set{}", NEXT.fetch_add(1, Ordering::Relaxed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::rule::L3Spec;
    use nftbl_api::Verdict;

    fn src_list_rule(addrs: &[&str]) -> Rule {
        let list = addrs
            .iter()
            .map(|a| a.parse::<HostAddr>().unwrap())
            .collect();
        Rule {
            l3: Some(L3Spec {
                src: Some(AddrSpec::list(list)),
                ..Default::default()
            }),
            exclude: false,
            action: Some(Verdict::Drop),
        }
    }

    #[test]
    fn empty_rule_compiles_to_nothing() {
        let (exprs, sets) =
            compile_l3(Family::Ipv4, &Rule::default()).unwrap();
        assert!(exprs.is_empty());
        assert!(sets.is_empty());
    }

    #[test]
    fn rejects_non_ip_families() {
        let rule = src_list_rule(&["192.0.2.1"]);
        for family in [Family::Inet, Family::Arp, Family::Bridge] {
            let err = compile_l3(family, &rule).unwrap_err();
            assert!(matches!(err, Error::UnsupportedFamily(_)));
        }
    }

    #[test]
    fn source_list_produces_lookup_set() {
        let rule = src_list_rule(&["192.0.2.0", "192.0.3.0"]);
        let (exprs, sets) = compile_l3(Family::Ipv4, &rule).unwrap();

        assert_eq!(sets.len(), 1);
        let set = &sets[0].set;
        assert!(set.constant);
        assert!(!set.anonymous);
        assert_eq!(set.key_type, SetDatatype::IPV4_ADDR);
        assert_eq!(
            sets[0]
                .elements
                .iter()
                .map(|e| e.key.clone())
                .collect::<Vec<_>>(),
            vec![vec![192, 0, 2, 0], vec![192, 0, 3, 0]],
        );

        assert_eq!(exprs.len(), 2);
        assert_eq!(
            exprs[0],
            Expr::Payload {
                base: PayloadBase::NetworkHeader,
                offset: 12,
                len: 4,
                dreg: REG_1,
            }
        );
        match &exprs[1] {
            Expr::Lookup { sreg, set_name, set_id, invert } => {
                assert_eq!(*sreg, REG_1);
                assert_eq!(set_name, &set.name);
                assert_eq!(*set_id, set.id);
                assert!(!invert);
            }
            other => panic!("expected lookup, got {other}"),
        }
    }

    #[test]
    fn address_offsets_are_fixed_per_family_and_role() {
        let spec = |src: bool, addr: &str| {
            let a = AddrSpec::list(vec![addr.parse().unwrap()]);
            Rule {
                l3: Some(L3Spec {
                    src: src.then(|| a.clone()),
                    dst: (!src).then_some(a),
                    ..Default::default()
                }),
                ..Default::default()
            }
        };

        let offset_of = |family, rule: &Rule| {
            let (exprs, _) = compile_l3(family, rule).unwrap();
            match exprs[0] {
                Expr::Payload { offset, len, .. } => (offset, len),
                ref other => panic!("expected payload, got {other}"),
            }
        };

        assert_eq!(offset_of(Family::Ipv4, &spec(true, "192.0.2.1")), (12, 4));
        assert_eq!(offset_of(Family::Ipv4, &spec(false, "192.0.2.1")), (16, 4));
        assert_eq!(offset_of(Family::Ipv6, &spec(true, "2001:db8::1")), (8, 16));
        assert_eq!(
            offset_of(Family::Ipv6, &spec(false, "2001:db8::1")),
            (24, 16)
        );
    }

    #[test]
    fn range_compiles_inline_without_a_set() {
        let rule = Rule {
            l3: Some(L3Spec {
                dst: Some(AddrSpec::range(
                    "10.0.0.1".parse().unwrap(),
                    "10.0.0.9".parse().unwrap(),
                )),
                ..Default::default()
            }),
            ..Default::default()
        };
        let (exprs, sets) = compile_l3(Family::Ipv4, &rule).unwrap();
        assert!(sets.is_empty());
        assert_eq!(
            exprs[1],
            Expr::Range {
                op: CmpOp::Eq,
                sreg: REG_1,
                from: vec![10, 0, 0, 1],
                to: vec![10, 0, 0, 9],
            }
        );
    }

    #[test]
    fn exclusion_flips_every_flavor() {
        let rule = Rule {
            l3: Some(L3Spec {
                version: Some(4),
                protocol: Some(6),
                src: Some(AddrSpec::list(vec!["192.0.2.1".parse().unwrap()])),
                dst: Some(AddrSpec::range(
                    "10.0.0.1".parse().unwrap(),
                    "10.0.0.9".parse().unwrap(),
                )),
            }),
            exclude: true,
            action: Some(Verdict::Drop),
        };
        let (exprs, _) = compile_l3(Family::Ipv4, &rule).unwrap();
        let inverted: Vec<_> =
            exprs.iter().filter(|e| e.is_inverted()).collect();
        // Version cmp, protocol cmp, lookup, range.
        assert_eq!(inverted.len(), 4);
    }

    #[test]
    fn field_order_is_version_protocol_src_dst() {
        let rule = Rule {
            l3: Some(L3Spec {
                version: Some(4),
                protocol: Some(17),
                src: Some(AddrSpec::list(vec!["192.0.2.1".parse().unwrap()])),
                dst: Some(AddrSpec::list(vec!["192.0.2.2".parse().unwrap()])),
            }),
            ..Default::default()
        };
        let (exprs, sets) = compile_l3(Family::Ipv4, &rule).unwrap();
        assert_eq!(sets.len(), 2);

        // Version: load byte 0, mask 0xf0, compare 0x40.
        assert!(matches!(
            exprs[0],
            Expr::Payload { offset: 0, len: 1, .. }
        ));
        assert!(matches!(exprs[1], Expr::Bitwise { .. }));
        assert_eq!(
            exprs[2],
            Expr::Cmp { op: CmpOp::Eq, sreg: REG_1, data: vec![0x40] }
        );
        // Protocol: load byte 9, compare 17.
        assert!(matches!(
            exprs[3],
            Expr::Payload { offset: 9, len: 1, .. }
        ));
        assert_eq!(
            exprs[4],
            Expr::Cmp { op: CmpOp::Eq, sreg: REG_1, data: vec![17] }
        );
        // Source then destination, each load + lookup.
        assert!(matches!(
            exprs[5],
            Expr::Payload { offset: 12, len: 4, .. }
        ));
        assert!(matches!(exprs[6], Expr::Lookup { .. }));
        assert!(matches!(
            exprs[7],
            Expr::Payload { offset: 16, len: 4, .. }
        ));
        assert!(matches!(exprs[8], Expr::Lookup { .. }));
        assert_eq!(exprs.len(), 9);
    }

    #[test]
    fn ipv6_protocol_uses_next_header_offset() {
        let rule = Rule {
            l3: Some(L3Spec {
                protocol: Some(58),
                ..Default::default()
            }),
            ..Default::default()
        };
        let (exprs, _) = compile_l3(Family::Ipv6, &rule).unwrap();
        assert!(matches!(
            exprs[0],
            Expr::Payload { offset: 6, len: 1, .. }
        ));
    }

    #[test]
    fn list_rejects_wrong_family_addresses() {
        let rule = src_list_rule(&["2001:db8::1"]);
        let err = compile_l3(Family::Ipv4, &rule).unwrap_err();
        assert!(matches!(err, Error::MixedAddrFamily));
    }
}
