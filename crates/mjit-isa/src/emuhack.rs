//! Sentinel opcodes.
//!
//! A finalized block replaces its first guest opcode with a sentinel that
//! carries the block id. The primary opcode `0x1A` is unused by the guest,
//! so a sentinel can never be confused with a real instruction.

/// Tag in the top byte of every sentinel.
pub const SENTINEL_TAG: u32 = 0x6800_0000;
/// Mask selecting the tag byte.
pub const SENTINEL_TAG_MASK: u32 = 0xFF00_0000;
/// Largest encodable block id plus one.
pub const MAX_SENTINEL_ID: u32 = 1 << 24;

/// A decoded sentinel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Sentinel {
    id: u32,
}

impl Sentinel {
    /// Sentinel for block `id`, or `None` if the id does not fit.
    #[must_use]
    pub const fn new(id: u32) -> Option<Self> {
        if id < MAX_SENTINEL_ID {
            Some(Self { id })
        } else {
            None
        }
    }

    /// Block id carried by this sentinel.
    #[must_use]
    pub const fn id(self) -> u32 {
        self.id
    }

    /// Opcode word to write into guest memory.
    #[must_use]
    pub const fn encode(self) -> u32 {
        SENTINEL_TAG | self.id
    }

    /// Parse an opcode word.
    #[must_use]
    pub const fn decode(op: u32) -> Option<Self> {
        if Self::is_sentinel(op) {
            Some(Self {
                id: op & !SENTINEL_TAG_MASK,
            })
        } else {
            None
        }
    }

    #[must_use]
    pub const fn is_sentinel(op: u32) -> bool {
        op & SENTINEL_TAG_MASK == SENTINEL_TAG
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_codec() {
        let s = Sentinel::new(0x12_3456).expect("fits");
        assert_eq!(s.encode(), 0x6812_3456);
        assert_eq!(Sentinel::decode(0x6812_3456), Some(s));
        assert_eq!(Sentinel::decode(0x2401_0005), None);
    }

    #[test]
    fn test_sentinel_id_bound() {
        assert!(Sentinel::new(MAX_SENTINEL_ID - 1).is_some());
        assert!(Sentinel::new(MAX_SENTINEL_ID).is_none());
    }

    #[test]
    fn test_sentinel_never_collides_with_primary_0x1a_neighbors() {
        // Primary opcodes 0x1B (0x6C..) and 0x19 (0x64..) are not sentinels.
        assert!(!Sentinel::is_sentinel(0x6C00_0000));
        assert!(!Sentinel::is_sentinel(0x6400_0000));
        // Primary 0x1A with nonzero bits 24-25 is not a sentinel either.
        assert!(!Sentinel::is_sentinel(0x6900_0000));
    }
}
