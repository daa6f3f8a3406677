//! Cached blocks.

use std::fmt;

use mjit_isa::Sentinel;

/// Dense block number. Encoded into the sentinel written over the block's
/// first guest opcode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub(crate) u32);

impl BlockId {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Sentinel opcode for this block.
    #[must_use]
    pub const fn sentinel(self) -> Option<Sentinel> {
        Sentinel::new(self.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of a block.
///
/// `Allocated -> (Preloaded ->) Finalized -> Invalid`. A block that is
/// abandoned before it ever runs (failed compile, stale preload) ends up
/// `Destroyed` instead. Ids are never handed out twice before a clear.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlockState {
    Allocated,
    /// Compiled ahead of time; no sentinel yet.
    Preloaded,
    /// Live, with its sentinel in guest memory.
    Finalized,
    /// Guest code under the block changed.
    Invalid,
    Destroyed,
}

impl BlockState {
    /// Whether the block still describes guest code.
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Preloaded | Self::Finalized)
    }
}

/// One exit of a block with a constant target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockExitLink {
    /// Guest address the exit jumps to.
    pub target: u32,
    /// Whether the exit currently jumps straight into another block.
    pub linked: bool,
}

/// Execution counters, only updated when profiling is on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockCounters {
    pub runs: u64,
    pub cycles: u64,
}

/// Size and exits of compiled code handed to the cache.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockShape {
    /// Guest bytes covered.
    pub size: u32,
    /// Guest instructions covered.
    pub instrs: u32,
    /// Constant exit targets, in the order the target's patch sites use.
    pub exits: Vec<u32>,
    /// Host bytes (or IR bytes) generated.
    pub code_bytes: usize,
}

/// A translated block.
#[derive(Clone, Debug)]
pub struct Block<T> {
    pub id: BlockId,
    /// Guest address of the first instruction.
    pub start: u32,
    /// Guest bytes covered, including a trailing delay slot.
    pub size: u32,
    pub instrs: u32,
    /// Generated code. `None` until finalized and again once invalid.
    pub target: Option<T>,
    pub code_bytes: usize,
    /// xxh3 of the original guest opcodes.
    pub hash: u64,
    /// Opcode the sentinel replaced.
    pub original_opcode: u32,
    pub exits: Vec<BlockExitLink>,
    pub state: BlockState,
    pub counters: BlockCounters,
}

impl<T> Block<T> {
    pub(crate) const fn new(id: BlockId, start: u32) -> Self {
        Self {
            id,
            start,
            size: 0,
            instrs: 0,
            target: None,
            code_bytes: 0,
            hash: 0,
            original_opcode: 0,
            exits: Vec::new(),
            state: BlockState::Allocated,
            counters: BlockCounters { runs: 0, cycles: 0 },
        }
    }

    /// Guest address one past the last covered byte.
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.start as u64 + self.size as u64
    }

    /// Whether `[addr, addr + len)` overlaps this block.
    #[must_use]
    pub const fn overlaps(&self, addr: u32, len: u32) -> bool {
        let lo = addr as u64;
        let hi = lo + len as u64;
        len != 0 && lo < self.end() && (self.start as u64) < hi
    }

    #[must_use]
    pub const fn contains(&self, addr: u32) -> bool {
        self.overlaps(addr, 1)
    }

    /// Host code bytes per guest byte.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn bloat(&self) -> Option<f64> {
        (self.code_bytes != 0 && self.size != 0).then(|| self.code_bytes as f64 / f64::from(self.size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlap_is_half_open() {
        let mut b: Block<()> = Block::new(BlockId(0), 0x100);
        b.size = 0x10;
        assert!(b.overlaps(0x10F, 1));
        assert!(!b.overlaps(0x110, 4));
        assert!(b.overlaps(0xF0, 0x11));
        assert!(!b.overlaps(0xF0, 0x10));
        assert!(!b.overlaps(0x100, 0));
    }

    #[test]
    fn test_overlap_at_top_of_address_space() {
        let mut b: Block<()> = Block::new(BlockId(0), 0xFFFF_FFF8);
        b.size = 8;
        assert!(b.overlaps(0xFFFF_FFFC, 4));
        assert!(b.contains(0xFFFF_FFFF));
    }

    #[test]
    fn test_bloat() {
        let mut b: Block<()> = Block::new(BlockId(3), 0);
        assert_eq!(b.bloat(), None);
        b.size = 8;
        b.code_bytes = 40;
        assert_eq!(b.bloat(), Some(5.0));
        assert_eq!(BlockId(3).to_string(), "#3");
        assert_eq!(BlockId(3).sentinel().map(Sentinel::encode), Some(0x6800_0003));
    }
}
