//! The block cache.
//!
//! Blocks are found two ways: through the sentinel written over their first
//! guest opcode (a dense id, checked by the dispatcher on every fetch), and
//! through a page index keyed by `addr >> CODE_PAGE_SHIFT` that invalidation
//! walks to find every block overlapping a written range.

use mjit_isa::{DecodeError, InstructionSource, Sentinel, disasm};
use mjit_state::{CODE_PAGE_SHIFT, GuestMemory};
use rustc_hash::FxHashMap;
use tracing::{debug, info, trace, warn};
use xxhash_rust::xxh3::Xxh3;

use crate::block::{Block, BlockCounters, BlockExitLink, BlockId, BlockShape, BlockState};
use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::link::BlockLinker;
use crate::stats::{BlockDebugInfo, CacheStats};

/// Translated blocks, indexed by id, start address and code page.
#[derive(Debug)]
pub struct BlockCache<T> {
    config: CacheConfig,
    blocks: Vec<Block<T>>,
    /// Code page -> blocks touching it.
    pages: FxHashMap<u32, Vec<BlockId>>,
    /// Start address -> finalized block.
    starts: FxHashMap<u32, BlockId>,
    /// Start address -> preloaded block awaiting first use.
    preloaded: FxHashMap<u32, BlockId>,
    /// Exit target -> `(block, exit index)` aimed at it.
    links_to: FxHashMap<u32, Vec<(BlockId, usize)>>,
    invalidations: u64,
}

impl<T> BlockCache<T> {
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            blocks: Vec::new(),
            pages: FxHashMap::default(),
            starts: FxHashMap::default(),
            preloaded: FxHashMap::default(),
            links_to: FxHashMap::default(),
            invalidations: 0,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Ids handed out since the last clear.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.blocks.len() >= self.config.block_limit() as usize
    }

    #[must_use]
    pub fn block(&self, id: BlockId) -> Option<&Block<T>> {
        self.blocks.get(id.index())
    }

    /// Blocks that still describe guest code.
    pub fn blocks(&self) -> impl Iterator<Item = &Block<T>> {
        self.blocks.iter().filter(|b| b.state.is_live())
    }

    fn get(&self, id: BlockId) -> Result<&Block<T>, CacheError> {
        self.blocks.get(id.index()).ok_or(CacheError::UnknownBlock(id))
    }

    fn get_mut(&mut self, id: BlockId) -> Result<&mut Block<T>, CacheError> {
        self.blocks.get_mut(id.index()).ok_or(CacheError::UnknownBlock(id))
    }

    fn expect_state(&self, id: BlockId, expected: BlockState) -> Result<&Block<T>, CacheError> {
        let block = self.get(id)?;
        if block.state == expected {
            Ok(block)
        } else {
            Err(CacheError::BadState {
                id,
                state: block.state,
                expected,
            })
        }
    }

    /// Reserve an id for a block starting at `start`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Full`] once every id has been used.
    pub fn allocate(&mut self, start: u32) -> Result<BlockId, CacheError> {
        let max = self.config.block_limit();
        if self.is_full() {
            return Err(CacheError::Full { max });
        }
        let id = BlockId(u32::try_from(self.blocks.len()).map_err(|_| CacheError::Full { max })?);
        self.blocks.push(Block::new(id, start));
        Ok(id)
    }

    /// Give up on an allocated block that never got code.
    pub fn abandon(&mut self, id: BlockId) {
        if let Some(block) = self.blocks.get_mut(id.index()) {
            if block.state == BlockState::Allocated {
                block.state = BlockState::Destroyed;
            }
        }
    }

    /// Install compiled code for `id` and write its sentinel.
    ///
    /// # Errors
    ///
    /// Fails if `id` is not freshly allocated, its start cannot be written,
    /// or linking fails.
    pub fn finalize(
        &mut self,
        id: BlockId,
        target: T,
        shape: BlockShape,
        mem: &mut GuestMemory,
        linker: &mut dyn BlockLinker<T>,
    ) -> Result<(), CacheError> {
        let start = self.expect_state(id, BlockState::Allocated)?.start;
        let original = self.resolved_opcode(mem, start)?;
        let hash = self.guest_hash(mem, start, shape.size)?;
        self.install(id, target, shape, original, hash);
        self.write_sentinel(id, mem)?;
        self.link_block(id, linker)?;
        Ok(())
    }

    /// Install code compiled ahead of time. The block is hashed and indexed
    /// but guest memory is left alone until [`BlockCache::upgrade_preloaded`].
    ///
    /// # Errors
    ///
    /// Fails if `id` is not freshly allocated or its range cannot be read.
    pub fn finalize_preload(
        &mut self,
        id: BlockId,
        target: T,
        shape: BlockShape,
        mem: &GuestMemory,
    ) -> Result<(), CacheError> {
        let start = self.expect_state(id, BlockState::Allocated)?.start;
        let original = self.resolved_opcode(mem, start)?;
        let hash = self.guest_hash(mem, start, shape.size)?;
        self.install(id, target, shape, original, hash);
        self.get_mut(id)?.state = BlockState::Preloaded;
        if let Some(old) = self.preloaded.insert(start, id) {
            self.discard(old);
        }
        Ok(())
    }

    fn install(&mut self, id: BlockId, target: T, shape: BlockShape, original: u32, hash: u64) {
        let block = &mut self.blocks[id.index()];
        block.size = shape.size.max(4);
        block.instrs = shape.instrs;
        block.code_bytes = shape.code_bytes;
        block.target = Some(target);
        block.hash = hash;
        block.original_opcode = original;
        block.exits = shape
            .exits
            .into_iter()
            .map(|target| BlockExitLink { target, linked: false })
            .collect();
        self.index_pages(id);
    }

    fn write_sentinel(&mut self, id: BlockId, mem: &mut GuestMemory) -> Result<(), CacheError> {
        let sentinel = id.sentinel().ok_or(CacheError::Full {
            max: self.config.block_limit(),
        })?;
        let block = self.get_mut(id)?;
        let (start, size) = (block.start, block.size);
        mem.write_opcode(start, sentinel.encode())?;
        mem.mark_code(start, size);
        block.state = BlockState::Finalized;
        if let Some(old) = self.starts.insert(start, id) {
            if old != id {
                warn!(start = format_args!("{start:#010x}"), %old, %id, "replaced live block at same start");
            }
        }
        debug!(
            %id,
            start = format_args!("{start:#010x}"),
            size,
            "finalized block"
        );
        Ok(())
    }

    /// Preloaded block at `addr` whose guest code is unchanged. A preload
    /// whose code changed is discarded.
    pub fn find_preload_block(&mut self, addr: u32, mem: &GuestMemory) -> Option<BlockId> {
        let id = *self.preloaded.get(&addr)?;
        let block = &self.blocks[id.index()];
        if block.state != BlockState::Preloaded {
            self.preloaded.remove(&addr);
            return None;
        }
        match self.guest_hash(mem, block.start, block.size) {
            Ok(hash) if hash == block.hash => Some(id),
            _ => {
                trace!(%id, addr = format_args!("{addr:#010x}"), "stale preload");
                self.discard(id);
                None
            }
        }
    }

    /// Turn a preloaded block into a live one.
    ///
    /// # Errors
    ///
    /// Fails if `id` is not preloaded or linking fails.
    pub fn upgrade_preloaded(
        &mut self,
        id: BlockId,
        mem: &mut GuestMemory,
        linker: &mut dyn BlockLinker<T>,
    ) -> Result<(), CacheError> {
        let start = self.expect_state(id, BlockState::Preloaded)?.start;
        let original = self.resolved_opcode(mem, start)?;
        self.preloaded.remove(&start);
        self.get_mut(id)?.original_opcode = original;
        self.write_sentinel(id, mem)?;
        self.link_block(id, linker)
    }

    fn discard(&mut self, id: BlockId) {
        let Some(block) = self.blocks.get_mut(id.index()) else {
            return;
        };
        if block.state != BlockState::Preloaded {
            return;
        }
        block.state = BlockState::Destroyed;
        block.target = None;
        let start = block.start;
        if self.preloaded.get(&start) == Some(&id) {
            self.preloaded.remove(&start);
        }
        self.unindex_pages(id);
    }

    /// Block at `addr`, if memory there holds its sentinel.
    #[must_use]
    pub fn lookup(&self, mem: &GuestMemory, addr: u32) -> Option<BlockId> {
        let op = mem.read_opcode(addr).ok()?;
        let id = self.block_for_sentinel(op)?;
        (self.blocks[id.index()].start == addr).then_some(id)
    }

    /// Live block named by a sentinel opcode.
    #[must_use]
    pub fn block_for_sentinel(&self, op: u32) -> Option<BlockId> {
        let sentinel = Sentinel::decode(op)?;
        let block = self.blocks.get(sentinel.id() as usize)?;
        (block.state == BlockState::Finalized).then_some(block.id)
    }

    /// Guest opcode at `addr` with any live sentinel undone.
    #[must_use]
    pub fn original_opcode(&self, mem: &GuestMemory, addr: u32) -> Option<u32> {
        let op = mem.read_opcode(addr).ok()?;
        Some(self.resolve(addr, op))
    }

    fn resolve(&self, addr: u32, op: u32) -> u32 {
        match self.block_for_sentinel(op) {
            Some(id) if self.blocks[id.index()].start == addr => self.blocks[id.index()].original_opcode,
            _ => op,
        }
    }

    fn resolved_opcode(&self, mem: &GuestMemory, addr: u32) -> Result<u32, CacheError> {
        let op = mem.read_opcode(addr)?;
        Ok(self.resolve(addr, op))
    }

    /// xxh3 of the guest words in `[start, start + size)` as the guest
    /// wrote them, with live sentinels replaced by their original opcodes.
    fn guest_hash(&self, mem: &GuestMemory, start: u32, size: u32) -> Result<u64, CacheError> {
        let bytes = mem.read_bytes(start, size as usize)?;
        let mut hasher = Xxh3::new();
        for (i, word) in bytes.chunks(4).enumerate() {
            if let Ok(raw) = <[u8; 4]>::try_from(word) {
                let addr = start.wrapping_add(4 * i as u32);
                hasher.update(&self.resolve(addr, u32::from_le_bytes(raw)).to_le_bytes());
            } else {
                hasher.update(word);
            }
        }
        Ok(hasher.digest())
    }

    fn page_span(start: u32, size: u32) -> std::ops::RangeInclusive<u32> {
        let last = (u64::from(start) + u64::from(size.max(1)) - 1).min(u64::from(u32::MAX)) as u32;
        (start >> CODE_PAGE_SHIFT)..=(last >> CODE_PAGE_SHIFT)
    }

    fn index_pages(&mut self, id: BlockId) {
        let block = &self.blocks[id.index()];
        for page in Self::page_span(block.start, block.size) {
            self.pages.entry(page).or_default().push(id);
        }
    }

    fn unindex_pages(&mut self, id: BlockId) {
        let block = &self.blocks[id.index()];
        for page in Self::page_span(block.start, block.size) {
            if let Some(ids) = self.pages.get_mut(&page) {
                ids.retain(|&other| other != id);
                if ids.is_empty() {
                    self.pages.remove(&page);
                }
            }
        }
    }

    /// Live blocks overlapping `[addr, addr + len)`, in id order.
    #[must_use]
    pub fn overlapping(&self, addr: u32, len: u32) -> Vec<BlockId> {
        if len == 0 {
            return Vec::new();
        }
        let span = Self::page_span(addr, len);
        let page_count = (span.end() - span.start()) as usize + 1;
        let mut ids: Vec<BlockId> = if page_count > self.pages.len() {
            self.blocks().map(|b| b.id).collect()
        } else {
            span.filter_map(|page| self.pages.get(&page)).flatten().copied().collect()
        };
        ids.retain(|id| {
            let block = &self.blocks[id.index()];
            block.state.is_live() && block.overlaps(addr, len)
        });
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Invalidate every block overlapping `[addr, addr + len)`, which was
    /// just written.
    ///
    /// A start word left partly sentinel by a narrow write gets the block's
    /// original bytes back around the written ones.
    ///
    /// Returns how many blocks were invalidated.
    ///
    /// # Errors
    ///
    /// Fails if a sentinel cannot be restored or an exit cannot be unlinked.
    pub fn invalidate_range(
        &mut self,
        addr: u32,
        len: u32,
        mem: &mut GuestMemory,
        linker: &mut dyn BlockLinker<T>,
    ) -> Result<usize, CacheError> {
        let hits = self.overlapping(addr, len);
        for &id in &hits {
            self.invalidate_block(id, mem, linker, Some((addr, len)))?;
        }
        if !hits.is_empty() {
            debug!(
                addr = format_args!("{addr:#010x}"),
                len,
                blocks = hits.len(),
                "invalidated range"
            );
        }
        Ok(hits.len())
    }

    /// Invalidate every block whose guest code no longer matches its hash.
    ///
    /// # Errors
    ///
    /// Fails if a sentinel cannot be restored or an exit cannot be unlinked.
    pub fn invalidate_changed_blocks(
        &mut self,
        mem: &mut GuestMemory,
        linker: &mut dyn BlockLinker<T>,
    ) -> Result<usize, CacheError> {
        let changed: Vec<BlockId> = self
            .blocks()
            .filter(|b| !self.guest_hash(mem, b.start, b.size).is_ok_and(|hash| hash == b.hash))
            .map(|b| b.id)
            .collect();
        for &id in &changed {
            trace!(%id, "guest code changed");
            self.invalidate_block(id, mem, linker, None)?;
        }
        if !changed.is_empty() {
            debug!(blocks = changed.len(), "invalidated changed blocks");
        }
        Ok(changed.len())
    }

    /// `written` is the range just stored to, if any. Bytes of the start word
    /// inside it are kept, the rest revert from the sentinel to `original`.
    fn invalidate_block(
        &mut self,
        id: BlockId,
        mem: &mut GuestMemory,
        linker: &mut dyn BlockLinker<T>,
        written: Option<(u32, u32)>,
    ) -> Result<(), CacheError> {
        let block = self.get(id)?;
        let (start, state, original) = (block.start, block.state, block.original_opcode);
        match state {
            BlockState::Finalized => {
                let current = mem.read_opcode(start).ok();
                let restored = match (current, id.sentinel().map(Sentinel::encode)) {
                    (Some(op), Some(sentinel)) if op == sentinel => Some(original),
                    (Some(op), Some(sentinel)) => {
                        written.and_then(|range| merge_written(start, op, sentinel, original, range))
                    }
                    _ => None,
                };
                if let Some(op) = restored.filter(|&op| Some(op) != current) {
                    trace!(%id, opcode = format_args!("{op:#010x}"), "restored start word");
                    mem.write_opcode(start, op)?;
                }
                if self.starts.get(&start) == Some(&id) {
                    self.starts.remove(&start);
                }
            }
            BlockState::Preloaded => {
                if self.preloaded.get(&start) == Some(&id) {
                    self.preloaded.remove(&start);
                }
            }
            BlockState::Allocated | BlockState::Invalid | BlockState::Destroyed => return Ok(()),
        }
        let block = &mut self.blocks[id.index()];
        block.state = BlockState::Invalid;
        block.target = None;
        self.unlink_incoming(start, linker)?;
        self.forget_outgoing(id);
        self.unindex_pages(id);
        self.invalidations += 1;
        Ok(())
    }

    fn link_block(&mut self, id: BlockId, linker: &mut dyn BlockLinker<T>) -> Result<(), CacheError> {
        if !self.config.enable_linking || !linker.can_link() {
            return Ok(());
        }
        let block = self.get(id)?;
        let start = block.start;
        let targets: Vec<u32> = block.exits.iter().map(|e| e.target).collect();
        for (exit, target) in targets.into_iter().enumerate() {
            self.links_to.entry(target).or_default().push((id, exit));
        }
        self.link_exits(id, linker)?;
        if let Some(sources) = self.links_to.get(&start).cloned() {
            let mut seen = Vec::with_capacity(sources.len());
            for (source, _) in sources {
                if source != id && !seen.contains(&source) {
                    seen.push(source);
                    self.link_exits(source, linker)?;
                }
            }
        }
        Ok(())
    }

    /// Link every unlinked exit of `id` whose target has a live block.
    fn link_exits(&mut self, id: BlockId, linker: &mut dyn BlockLinker<T>) -> Result<(), CacheError> {
        if self.get(id)?.state != BlockState::Finalized {
            return Ok(());
        }
        for exit in 0..self.blocks[id.index()].exits.len() {
            let link = self.blocks[id.index()].exits[exit];
            if link.linked {
                continue;
            }
            let Some(&dest) = self.starts.get(&link.target) else {
                continue;
            };
            let (Some(source_code), Some(dest_code)) = (
                self.blocks[id.index()].target.as_ref(),
                self.blocks[dest.index()].target.as_ref(),
            ) else {
                continue;
            };
            linker.link_exit(source_code, exit, dest_code)?;
            self.blocks[id.index()].exits[exit].linked = true;
            trace!(from = %id, to = %dest, exit, "linked exit");
        }
        Ok(())
    }

    /// Send every linked exit aimed at `addr` back through the dispatcher.
    fn unlink_incoming(&mut self, addr: u32, linker: &mut dyn BlockLinker<T>) -> Result<(), CacheError> {
        let Some(sources) = self.links_to.get(&addr).cloned() else {
            return Ok(());
        };
        for (source, exit) in sources {
            let Block { exits, target, state, .. } = &mut self.blocks[source.index()];
            if *state != BlockState::Finalized {
                continue;
            }
            let (Some(link), Some(code)) = (exits.get_mut(exit), target.as_ref()) else {
                continue;
            };
            if link.linked {
                linker.unlink_exit(code, exit)?;
                link.linked = false;
                trace!(from = %source, exit, "unlinked exit");
            }
        }
        Ok(())
    }

    fn forget_outgoing(&mut self, id: BlockId) {
        let targets: Vec<u32> = self.blocks[id.index()].exits.iter().map(|e| e.target).collect();
        for target in targets {
            if let Some(sources) = self.links_to.get_mut(&target) {
                sources.retain(|&(source, _)| source != id);
                if sources.is_empty() {
                    self.links_to.remove(&target);
                }
            }
        }
    }

    /// Exits aimed at `addr`.
    #[must_use]
    pub fn links_to(&self, addr: u32) -> &[(BlockId, usize)] {
        self.links_to.get(&addr).map_or(&[], Vec::as_slice)
    }

    /// Drop every block, restoring original opcodes, and start ids from zero.
    ///
    /// # Errors
    ///
    /// Fails if an original opcode cannot be written back. The cache is
    /// emptied regardless.
    pub fn clear(&mut self, mem: &mut GuestMemory) -> Result<(), CacheError> {
        let live = self.blocks().count();
        let mut restore = Ok(());
        for block in &self.blocks {
            if block.state != BlockState::Finalized {
                continue;
            }
            let sentinel = block.id.sentinel().map(Sentinel::encode);
            if mem.read_opcode(block.start).ok() == sentinel {
                if let Err(e) = mem.write_opcode(block.start, block.original_opcode) {
                    warn!(id = %block.id, error = %e, "could not restore original opcode");
                    restore = restore.and(Err(e));
                }
            }
        }
        mem.clear_code_pages();
        self.blocks.clear();
        self.pages.clear();
        self.starts.clear();
        self.preloaded.clear();
        self.links_to.clear();
        info!(blocks = live, "cleared block cache");
        restore.map_err(CacheError::from)
    }

    /// Put original opcodes back for a memory snapshot. Returns what
    /// [`BlockCache::restore_sentinels`] needs to undo it.
    pub fn save_and_clear_sentinels(&self, mem: &mut GuestMemory) -> Vec<u32> {
        self.blocks
            .iter()
            .map(|block| {
                let Some(sentinel) = block.id.sentinel().map(Sentinel::encode) else {
                    return 0;
                };
                let holds = mem.read_opcode(block.start).ok() == Some(sentinel);
                if block.state == BlockState::Finalized
                    && holds
                    && mem.write_opcode(block.start, block.original_opcode).is_ok()
                {
                    sentinel
                } else {
                    0
                }
            })
            .collect()
    }

    /// Undo [`BlockCache::save_and_clear_sentinels`]. A sentinel only goes
    /// back where memory still holds the block's original opcode.
    ///
    /// # Errors
    ///
    /// Fails if `saved` does not match the current block count.
    pub fn restore_sentinels(&self, mem: &mut GuestMemory, saved: &[u32]) -> Result<(), CacheError> {
        if saved.len() != self.blocks.len() {
            return Err(CacheError::SentinelCount {
                expected: self.blocks.len(),
                got: saved.len(),
            });
        }
        for (block, &sentinel) in self.blocks.iter().zip(saved) {
            if sentinel == 0 || block.state != BlockState::Finalized {
                continue;
            }
            if mem.read_opcode(block.start).ok() == Some(block.original_opcode) {
                mem.write_opcode(block.start, sentinel)?;
            }
        }
        Ok(())
    }

    /// Count one execution of `id`.
    pub fn record_run(&mut self, id: BlockId, cycles: u64) {
        if let Some(block) = self.blocks.get_mut(id.index()) {
            block.counters.runs += 1;
            block.counters.cycles += cycles;
        }
    }

    #[must_use]
    pub fn counters(&self, id: BlockId) -> Option<BlockCounters> {
        self.block(id).map(|b| b.counters)
    }

    /// Block counts and code bloat.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats {
            allocated: self.blocks.len(),
            invalidations: self.invalidations,
            ..CacheStats::default()
        };
        let mut total = 0.0;
        let mut measured = 0usize;
        for block in &self.blocks {
            match block.state {
                BlockState::Finalized => stats.finalized += 1,
                BlockState::Preloaded => stats.preloaded += 1,
                BlockState::Invalid => stats.invalid += 1,
                BlockState::Allocated | BlockState::Destroyed => {}
            }
            let Some(bloat) = block.bloat() else {
                continue;
            };
            if measured == 0 || bloat < stats.min_bloat {
                stats.min_bloat = bloat;
                stats.min_bloat_block = Some(block.start);
            }
            if measured == 0 || bloat > stats.max_bloat {
                stats.max_bloat = bloat;
                stats.max_bloat_block = Some(block.start);
            }
            total += bloat;
            measured += 1;
        }
        if measured != 0 {
            #[allow(clippy::cast_precision_loss)]
            let avg = total / measured as f64;
            stats.avg_bloat = avg;
        }
        stats
    }

    /// Guest disassembly of `id`; `describe` renders its generated code.
    #[must_use]
    pub fn debug_info(
        &self,
        id: BlockId,
        mem: &GuestMemory,
        describe: impl FnOnce(&T) -> Vec<String>,
    ) -> Option<BlockDebugInfo> {
        let block = self.block(id)?;
        let guest = (0..block.size / 4)
            .map(|i| {
                let addr = block.start.wrapping_add(4 * i);
                match self.original_opcode(mem, addr) {
                    Some(op) => format!("{addr:08x}: {}", disasm(op, addr)),
                    None => format!("{addr:08x}: <unmapped>"),
                }
            })
            .collect();
        Some(BlockDebugInfo {
            id,
            start: block.start,
            size: block.size,
            instrs: block.instrs,
            state: block.state,
            counters: block.counters,
            guest,
            target: block.target.as_ref().map(describe).unwrap_or_default(),
        })
    }
}

/// Start word after a store to `[addr, addr + len)` hit a sentinel: stored
/// bytes from `current`, the rest from `original`. `None` if a byte outside
/// the store no longer matches the sentinel.
fn merge_written(start: u32, current: u32, sentinel: u32, original: u32, (addr, len): (u32, u32)) -> Option<u32> {
    let (current, sentinel, original) = (current.to_le_bytes(), sentinel.to_le_bytes(), original.to_le_bytes());
    let mut merged = [0u8; 4];
    for (i, (byte, offset)) in merged.iter_mut().zip([0u32, 1, 2, 3]).enumerate() {
        *byte = if start.wrapping_add(offset).wrapping_sub(addr) < len {
            current[i]
        } else if current[i] == sentinel[i] {
            original[i]
        } else {
            return None;
        };
    }
    Some(u32::from_le_bytes(merged))
}

impl<T> InstructionSource for BlockCache<T> {
    fn fetch(&self, mem: &GuestMemory, addr: u32) -> Result<u32, DecodeError> {
        let op = mem.read_opcode(addr).map_err(|_| DecodeError::Fetch(addr))?;
        if !Sentinel::is_sentinel(op) {
            return Ok(op);
        }
        let resolved = self.resolve(addr, op);
        if resolved == op {
            Err(DecodeError::StaleSentinel { addr, op })
        } else {
            Ok(resolved)
        }
    }
}
