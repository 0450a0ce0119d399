// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Primitive match expressions.
//!
//! The kernel evaluates a rule as a sequence of expressions over a small
//! register file: loads (`Payload`) deposit header bytes into a
//! register, and consumers (`Cmp`, `Lookup`, `Range`, `Bitwise`) read
//! it. Order inside a rule therefore matters; the compiler emits a load
//! immediately before each consumer that needs it.

use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

/// The general-purpose register the compiler stages header bytes in.
pub const REG_1: u32 = 1;

#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize,
)]
pub enum PayloadBase {
    LinkHeader,
    NetworkHeader,
    TransportHeader,
}

#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize,
)]
pub enum CmpOp {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Eq => write!(f, "=="),
            Self::Neq => write!(f, "!="),
            Self::Lt => write!(f, "<"),
            Self::Lte => write!(f, "<="),
            Self::Gt => write!(f, ">"),
            Self::Gte => write!(f, ">="),
        }
    }
}

/// One primitive expression in a compiled rule.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum Expr {
    /// Load `len` bytes at `offset` within `base` into `dreg`.
    Payload { base: PayloadBase, offset: u32, len: u32, dreg: u32 },

    /// `dreg = (sreg & mask) ^ xor` over `len` bytes.
    Bitwise { sreg: u32, dreg: u32, len: u32, mask: Vec<u8>, xor: Vec<u8> },

    /// Compare `sreg` against immediate `data`.
    Cmp { op: CmpOp, sreg: u32, data: Vec<u8> },

    /// Match `sreg` against the named lookup set; `invert` flips the
    /// result for exclusion rules.
    Lookup { sreg: u32, set_name: String, set_id: u32, invert: bool },

    /// Inclusive range comparison of `sreg` against `[from, to]`.
    Range { op: CmpOp, sreg: u32, from: Vec<u8>, to: Vec<u8> },
}

impl Expr {
    /// True for the inequality-flavored forms an exclusion rule emits.
    pub fn is_inverted(&self) -> bool {
        match self {
            Self::Cmp { op, .. } | Self::Range { op, .. } => {
                *op == CmpOp::Neq
            }
            Self::Lookup { invert, .. } => *invert,
            _ => false,
        }
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Payload { base, offset, len, dreg } => {
                write!(f, "reg{} = {:?}[{}..{}]", dreg, base, offset, offset + len)
            }
            Self::Bitwise { sreg, dreg, mask, .. } => {
                write!(f, "reg{} = reg{} & {:02x?}", dreg, sreg, mask)
            }
            Self::Cmp { op, sreg, data } => {
                write!(f, "reg{} {} {:02x?}", sreg, op, data)
            }
            Self::Lookup { sreg, set_name, invert, .. } => {
                let neg = if *invert { "not " } else { "" };
                write!(f, "reg{} {}in @{}", sreg, neg, set_name)
            }
            Self::Range { op, sreg, from, to } => {
                write!(f, "reg{} {} {:02x?}..={:02x?}", sreg, op, from, to)
            }
        }
    }
}
