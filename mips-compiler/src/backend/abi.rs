//! Register file layout and calling-convention constants.
//!
//! The machine has 32 general-purpose registers. A handful are claimed by
//! the calling convention; the rest form the allocation pool handed out by
//! the tracker.

use std::fmt;

/// A register index in `0..32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct Reg(u8);

impl Reg {
    pub const COUNT: usize = 32;

    /// Hard-wired zero. Writes are discarded.
    pub const ZERO: Reg = Reg(0);
    /// Scratch register used by multi-instruction expansions (XOR).
    pub const AT: Reg = Reg(1);
    /// Function return value.
    pub const V0: Reg = Reg(2);
    pub const V1: Reg = Reg(3);
    /// First of the four argument registers.
    pub const A0: Reg = Reg(4);
    pub const A3: Reg = Reg(7);
    pub const RESERVED: Reg = Reg(28);
    /// Stack pointer. The stack grows towards lower addresses.
    pub const SP: Reg = Reg(29);
    /// Fault code written by overflowing arithmetic and division by zero.
    pub const STATUS: Reg = Reg(30);
    /// Return address written by `jal`.
    pub const RA: Reg = Reg(31);

    /// Registers handed out by the allocator, in preference order.
    pub const POOL_FIRST: u8 = 8;
    pub const POOL_LAST: u8 = 27;

    /// Number of arguments passed in registers.
    pub const ARG_REGS: usize = 4;

    pub fn new(index: u8) -> Option<Reg> {
        if (index as usize) < Self::COUNT {
            Some(Reg(index))
        } else {
            None
        }
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn arg(i: usize) -> Option<Reg> {
        if i < Self::ARG_REGS {
            Some(Reg(4 + i as u8))
        } else {
            None
        }
    }

    pub fn is_pool(self) -> bool {
        (Self::POOL_FIRST..=Self::POOL_LAST).contains(&self.0)
    }

    pub fn pool() -> impl DoubleEndedIterator<Item = Reg> {
        (Self::POOL_FIRST..=Self::POOL_LAST).map(Reg)
    }

    /// Parse `$8`, `$sp`, `$ra`, ... as written in assembly text.
    pub fn parse(text: &str) -> Option<Reg> {
        let name = text.strip_prefix('$')?;
        match name {
            "zero" => Some(Reg::ZERO),
            "at" => Some(Reg::AT),
            "v0" => Some(Reg::V0),
            "v1" => Some(Reg::V1),
            "a0" => Some(Reg(4)),
            "a1" => Some(Reg(5)),
            "a2" => Some(Reg(6)),
            "a3" => Some(Reg(7)),
            "sp" => Some(Reg::SP),
            "ra" => Some(Reg::RA),
            "rstatus" => Some(Reg::STATUS),
            _ => name.parse::<u8>().ok().and_then(Reg::new),
        }
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.0)
    }
}
