// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Verdicts: terminal and chain-transfer actions.

use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

/// A verdict attached to a rule or to a verdict-map element. Exactly one
/// kind is ever set; chain-transfer kinds carry their target chain.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum Verdict {
    Accept,
    Drop,
    Queue,
    Continue,
    Return,
    Jump(String),
    Goto(String),
}

impl Verdict {
    /// The raw code the kernel encodes this verdict as. Chain-transfer
    /// verdicts additionally carry the chain name out of band.
    pub fn raw_code(&self) -> i32 {
        match self {
            Self::Drop => 0,
            Self::Accept => 1,
            Self::Queue => 2,
            Self::Continue => -1,
            Self::Jump(_) => -3,
            Self::Goto(_) => -4,
            Self::Return => -5,
        }
    }

    /// Target chain for `Jump`/`Goto`, if any.
    pub fn chain(&self) -> Option<&str> {
        match self {
            Self::Jump(chain) | Self::Goto(chain) => Some(chain),
            _ => None,
        }
    }
}

impl Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Accept => write!(f, "accept"),
            Self::Drop => write!(f, "drop"),
            Self::Queue => write!(f, "queue"),
            Self::Continue => write!(f, "continue"),
            Self::Return => write!(f, "return"),
            Self::Jump(chain) => write!(f, "jump {}", chain),
            Self::Goto(chain) => write!(f, "goto {}", chain),
        }
    }
}
