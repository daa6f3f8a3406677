//! Cache statistics and block introspection.

use std::fmt;

use crate::block::{BlockCounters, BlockId, BlockState};

/// Snapshot of the cache.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CacheStats {
    /// Ids handed out since the last clear.
    pub allocated: usize,
    pub finalized: usize,
    pub preloaded: usize,
    pub invalid: usize,
    /// Blocks invalidated over the cache's lifetime.
    pub invalidations: u64,
    /// Generated bytes per guest byte.
    pub min_bloat: f64,
    pub max_bloat: f64,
    pub avg_bloat: f64,
    pub min_bloat_block: Option<u32>,
    pub max_bloat_block: Option<u32>,
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "blocks: {} allocated, {} live, {} preloaded, {} invalid ({} invalidations)",
            self.allocated, self.finalized, self.preloaded, self.invalid, self.invalidations
        )?;
        write!(
            f,
            "bloat: min {:.2}, avg {:.2}, max {:.2}",
            self.min_bloat, self.avg_bloat, self.max_bloat
        )?;
        if let (Some(lo), Some(hi)) = (self.min_bloat_block, self.max_bloat_block) {
            write!(f, " (min at {lo:#010x}, max at {hi:#010x})")?;
        }
        Ok(())
    }
}

/// Everything known about one block, for display.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockDebugInfo {
    pub id: BlockId,
    pub start: u32,
    pub size: u32,
    pub instrs: u32,
    pub state: BlockState,
    pub counters: BlockCounters,
    /// One line per guest instruction.
    pub guest: Vec<String>,
    /// Generated code, one line per instruction.
    pub target: Vec<String>,
}

impl fmt::Display for BlockDebugInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "block {} at {:#010x}: {} bytes, {} instrs, {:?}, {} runs",
            self.id, self.start, self.size, self.instrs, self.state, self.counters.runs
        )?;
        for line in &self.guest {
            writeln!(f, "  {line}")?;
        }
        if !self.target.is_empty() {
            writeln!(f, "  --")?;
            for line in &self.target {
                writeln!(f, "  {line}")?;
            }
        }
        Ok(())
    }
}
