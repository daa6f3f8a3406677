//! The recompiler context and its run loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use mjit_cache::{BlockCache, BlockCounters, BlockDebugInfo, BlockId, BlockLinker, BlockState, CacheError, CacheStats};
use mjit_emit::BlockExit;
use mjit_ir::IrBlock;
use mjit_isa::IrFrontend;
use mjit_state::{GuestMemory, GuestState, HostRoundingGuard, RoundingMode};
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use tracing::{debug, info, trace};

use crate::code::{CompiledCode, Engine};
use crate::config::JitConfig;
use crate::error::{Error, GuestFault, Result, RunExit};
use crate::metrics;
use crate::syscall::{SyscallAction, SyscallContext, SyscallHandler};

/// Asks a running [`Jit`] to return at the next block boundary. Cloneable
/// and usable from any thread.
#[derive(Clone, Debug, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Phase {
    Idle,
    Compiling,
    Executing,
}

/// Summary of one translated block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockInfo {
    pub id: BlockId,
    pub start: u32,
    pub size: u32,
    pub instrs: u32,
    pub state: BlockState,
    pub counters: BlockCounters,
    pub code_bytes: usize,
    pub native: bool,
}

impl BlockInfo {
    fn new(block: &mjit_cache::Block<CompiledCode>) -> Self {
        Self {
            id: block.id,
            start: block.start,
            size: block.size,
            instrs: block.instrs,
            state: block.state,
            counters: block.counters,
            code_bytes: block.code_bytes,
            native: block.target.as_ref().is_some_and(CompiledCode::is_native),
        }
    }
}

/// Recompiler context: guest state and memory, the block cache and the
/// backend. Every compile and run call takes `&mut self`; the only
/// cross-thread entry point is [`StopHandle`].
pub struct Jit {
    pub(crate) config: JitConfig,
    pub(crate) state: GuestState,
    /// Boxed because `state` points into it.
    pub(crate) mem: Box<GuestMemory>,
    frontend: IrFrontend,
    pub(crate) engine: Engine,
    pub(crate) cache: BlockCache<CompiledCode>,
    breakpoints: FxHashSet<u32>,
    resume_pc: Option<u32>,
    stop: StopHandle,
    phase: Phase,
    /// Host writes reported by the memory write hook, applied between blocks.
    pub(crate) pending: Arc<Mutex<Vec<(u32, u32)>>>,
    clear_pending: bool,
    syscalls: Option<Box<dyn SyscallHandler>>,
}

impl Jit {
    /// Map guest memory and build the configured backend. PC starts at the
    /// memory base.
    ///
    /// # Errors
    ///
    /// Fails if guest memory or the code space cannot be mapped, or the
    /// backend does not run on this host.
    pub fn new(config: JitConfig) -> Result<Self> {
        let mut mem = Box::new(GuestMemory::new(config.memory_base, config.memory_size)?);
        let pending = Arc::new(Mutex::new(Vec::new()));
        let queue = Arc::clone(&pending);
        mem.set_write_hook(move |addr, len| queue.lock().push((addr, len)));

        let mut state = GuestState::new();
        mem.attach(&mut state);
        state.pc = config.memory_base;

        let engine = Engine::new(config.backend, &config.emit, mem.covers_full_space())?;
        info!(
            backend = config.backend.name(),
            base = format_args!("{:#010x}", config.memory_base),
            size = config.memory_size,
            "created jit"
        );
        Ok(Self {
            frontend: IrFrontend::new(config.frontend.clone()),
            cache: BlockCache::new(config.cache),
            config,
            state,
            mem,
            engine,
            breakpoints: FxHashSet::default(),
            resume_pc: None,
            stop: StopHandle::default(),
            phase: Phase::Idle,
            pending,
            clear_pending: false,
            syscalls: None,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &JitConfig {
        &self.config
    }

    #[must_use]
    pub const fn state(&self) -> &GuestState {
        &self.state
    }

    pub const fn state_mut(&mut self) -> &mut GuestState {
        &mut self.state
    }

    #[must_use]
    pub fn memory(&self) -> &GuestMemory {
        &self.mem
    }

    /// Direct memory access. Writes through [`GuestMemory::write_bytes`]
    /// are picked up before the next block; prefer [`Jit::write_memory`].
    pub fn memory_mut(&mut self) -> &mut GuestMemory {
        &mut self.mem
    }

    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn set_syscall_handler(&mut self, handler: impl SyscallHandler + 'static) {
        self.syscalls = Some(Box::new(handler));
    }

    /// Write guest memory and invalidate translated code under it.
    ///
    /// # Errors
    ///
    /// Fails if the range is outside guest memory or invalidation fails.
    pub fn write_memory(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        self.mem.write_bytes(addr, data)?;
        if self.phase == Phase::Idle {
            self.apply_pending()?;
        }
        Ok(())
    }

    /// Translated block starting at `addr`, compiling it if needed. A full
    /// cache or code space is cleared once and the compile retried.
    ///
    /// # Errors
    ///
    /// Fails if `addr` cannot hold code or compilation fails after a clear.
    pub fn compile_at(&mut self, addr: u32) -> Result<BlockId> {
        if let Some(id) = self.cache.lookup(&self.mem, addr) {
            return Ok(id);
        }
        match self.compile_new(addr) {
            Err(e) if e.is_full() => {
                info!(addr = format_args!("{addr:#010x}"), "ran out of block numbers, clearing cache");
                self.clear_now()?;
                self.compile_new(addr)
            }
            other => other,
        }
    }

    fn compile_new(&mut self, addr: u32) -> Result<BlockId> {
        if let Some(id) = self.cache.find_preload_block(addr, &self.mem) {
            self.cache.upgrade_preloaded(id, &mut self.mem, &mut self.engine)?;
            debug!(%id, addr = format_args!("{addr:#010x}"), "upgraded preloaded block");
            return Ok(id);
        }
        let block = self.lift(addr)?;
        self.translate(&block, false)
    }

    fn lift(&self, addr: u32) -> Result<IrBlock> {
        Ok(self.frontend.compile_block(&self.cache, &self.mem, addr)?)
    }

    fn translate(&mut self, block: &IrBlock, preload: bool) -> Result<BlockId> {
        let prev = std::mem::replace(&mut self.phase, Phase::Compiling);
        let result = self.translate_inner(block, preload);
        self.phase = prev;
        result
    }

    fn translate_inner(&mut self, block: &IrBlock, preload: bool) -> Result<BlockId> {
        let id = self.cache.allocate(block.start)?;
        let (code, shape) = match self.engine.compile(block) {
            Ok(compiled) => compiled,
            Err(e) => {
                self.cache.abandon(id);
                return Err(e.into());
            }
        };
        let code_bytes = shape.code_bytes;
        if preload {
            self.cache.finalize_preload(id, code, shape, &self.mem)?;
        } else {
            self.cache.finalize(id, code, shape, &mut self.mem, &mut self.engine)?;
        }
        metrics::record_compile(code_bytes, preload);
        debug!(
            %id,
            start = format_args!("{:#010x}", block.start),
            guest = block.guest_instrs,
            ir = block.len(),
            code_bytes,
            preload,
            "compiled block"
        );
        Ok(id)
    }

    /// Compile the blocks of the function in `[start, end)` ahead of time,
    /// following constant exits and fallthroughs inside the range. Preloaded
    /// blocks leave guest memory untouched until they first run.
    ///
    /// Returns how many blocks were compiled.
    ///
    /// # Errors
    ///
    /// Fails if the backend fails for a reason other than running out of space.
    pub fn preload_function(&mut self, start: u32, end: u32) -> Result<usize> {
        let mut work = vec![start];
        let mut seen = FxHashSet::default();
        let mut compiled = 0;
        while let Some(addr) = work.pop() {
            if addr < start || addr >= end || !seen.insert(addr) || !self.mem.is_valid_code_addr(addr) {
                continue;
            }
            if self.cache.lookup(&self.mem, addr).is_some() || self.cache.find_preload_block(addr, &self.mem).is_some() {
                continue;
            }
            let block = match self.lift(addr) {
                Ok(block) => block,
                Err(e) => {
                    trace!(addr = format_args!("{addr:#010x}"), error = %e, "preload stopped");
                    continue;
                }
            };
            match self.translate(&block, true) {
                Ok(_) => compiled += 1,
                Err(e) if e.is_full() => {
                    info!(compiled, "cache full, preload stopped");
                    break;
                }
                Err(e) => return Err(e),
            }
            work.extend(block.const_exits().map(|(_, target)| target));
            work.push(block.end());
        }
        debug!(
            start = format_args!("{start:#010x}"),
            end = format_args!("{end:#010x}"),
            compiled,
            "preloaded function"
        );
        Ok(compiled)
    }

    /// Run one block once, ignoring the cycle budget and breakpoints.
    ///
    /// # Errors
    ///
    /// Fails if `id` is not a live block, or pending invalidation fails.
    pub fn run_block(&mut self, id: BlockId) -> Result<BlockExit> {
        self.apply_pending()?;
        self.execute(id)
    }

    fn execute(&mut self, id: BlockId) -> Result<BlockExit> {
        let block = self.cache.block(id).ok_or(CacheError::UnknownBlock(id))?;
        if !block.state.is_live() {
            return Err(CacheError::BadState {
                id,
                state: block.state,
                expected: BlockState::Finalized,
            }
            .into());
        }
        let Some(code) = block.target.as_ref() else {
            return Err(Error::NotCompiled(id));
        };
        let instrs = block.instrs;

        self.phase = Phase::Executing;
        let exit = match code {
            CompiledCode::Ir(insts) => mjit_emit::run_block(insts, &mut self.state, &mut self.mem),
            #[cfg(all(target_arch = "x86_64", unix))]
            CompiledCode::Native { block, .. } => {
                let Some(backend) = self.engine.native() else {
                    self.phase = Phase::Idle;
                    return Err(Error::NotCompiled(id));
                };
                self.state.clear_exit();
                self.state.stop = 0;
                // SAFETY: the block was compiled by this backend since its
                // last clear (clears drop every block), and `state` is
                // attached to the boxed memory, which outlives the call.
                unsafe { backend.run(block, &mut self.state) };
                native_exit(&self.state)
            }
        };
        self.phase = Phase::Idle;

        if self.config.profile {
            self.cache.record_run(id, u64::from(instrs));
        }
        Ok(exit)
    }

    /// Run guest code for `cycles` downcount units.
    ///
    /// # Errors
    ///
    /// Fails on compile or invalidation errors. Guest problems are reported
    /// as [`RunExit::Fault`].
    pub fn run(&mut self, cycles: i32) -> Result<RunExit> {
        self.state.downcount = cycles;
        let rounding = HostRoundingGuard::new(RoundingMode::from_fcr31(self.state.fcr31()));
        let result = self.run_loop(&rounding);
        drop(rounding);

        let used = u64::try_from(i64::from(cycles) - i64::from(self.state.downcount)).unwrap_or(0);
        if let Ok(exit) = &result {
            metrics::record_run(exit, used, self.engine.code_used());
            debug!(?exit, cycles = used, pc = format_args!("{:#010x}", self.state.pc), "run finished");
        }
        result
    }

    fn run_loop(&mut self, rounding: &HostRoundingGuard) -> Result<RunExit> {
        let mut from_block = self.state.pc;
        loop {
            self.apply_pending()?;
            if self.stop.take() {
                return Ok(RunExit::Stopped);
            }
            if self.state.downcount < 0 {
                return Ok(RunExit::OutOfCycles);
            }

            let pc = self.state.pc;
            let resume = self.resume_pc.take();
            if self.breakpoints.contains(&pc) && resume != Some(pc) {
                self.resume_pc = Some(pc);
                return Ok(RunExit::Breakpoint(pc));
            }
            if !self.mem.is_valid_code_addr(pc) {
                return Ok(RunExit::Fault(GuestFault::InvalidJump { pc, from_block }));
            }

            let id = self.compile_at(pc)?;
            match self.execute(id)? {
                BlockExit::Jump => {}
                BlockExit::Syscall(code) => {
                    if let Some(exit) = self.dispatch_syscall(code, rounding) {
                        return Ok(exit);
                    }
                }
                BlockExit::Break(code) => {
                    return Ok(RunExit::Fault(GuestFault::Break { pc: self.state.pc, code }));
                }
                BlockExit::Fault(err) => return Ok(RunExit::Fault(err.into())),
            }
            from_block = pc;
        }
    }

    fn dispatch_syscall(&mut self, code: u32, rounding: &HostRoundingGuard) -> Option<RunExit> {
        let Some(mut handler) = self.syscalls.take() else {
            return Some(RunExit::Syscall(code));
        };
        let mut invalidations = Vec::new();
        rounding.suspend();
        self.phase = Phase::Executing;
        let action = {
            let mut ctx = SyscallContext::new(&mut self.state, &mut self.mem, &mut invalidations);
            handler.syscall(&mut ctx, code)
        };
        self.phase = Phase::Idle;
        rounding.resume(RoundingMode::from_fcr31(self.state.fcr31()));
        self.syscalls = Some(handler);
        if !invalidations.is_empty() {
            self.pending.lock().extend(invalidations);
        }
        trace!(code = format_args!("{code:#x}"), ?action, "syscall");
        match action {
            SyscallAction::Continue => None,
            SyscallAction::Stop => Some(RunExit::Stopped),
        }
    }

    /// Apply dirty-code ranges from guest stores, queued host writes and a
    /// deferred clear, then re-arm linked block entries. Each range is
    /// invalidated on its own.
    fn apply_pending(&mut self) -> Result<()> {
        let dirty = self.mem.take_dirty_code(&mut self.state);
        let queued = std::mem::take(&mut *self.pending.lock());
        for (addr, len) in dirty.into_iter().chain(queued) {
            self.invalidate_now(addr, len)?;
        }
        if self.clear_pending {
            self.clear_pending = false;
            self.clear_now()?;
        }
        self.state.stop = 0;
        Ok(())
    }

    /// Invalidate translated code overlapping `[addr, addr + len)`. A range
    /// covering all of guest memory only drops blocks whose code changed.
    /// Returns how many blocks were invalidated.
    ///
    /// # Errors
    ///
    /// Fails if an original opcode cannot be restored or an exit cannot be
    /// unlinked.
    pub fn invalidate_range(&mut self, addr: u32, len: u32) -> Result<usize> {
        if self.phase != Phase::Idle {
            debug!(addr = format_args!("{addr:#010x}"), len, phase = ?self.phase, "deferring invalidation");
            self.pending.lock().push((addr, len));
            return Ok(0);
        }
        self.invalidate_now(addr, len)
    }

    fn invalidate_now(&mut self, addr: u32, len: u32) -> Result<usize> {
        let lo = u64::from(addr);
        let hi = lo + u64::from(len);
        let base = u64::from(self.mem.base());
        let count = if lo <= base && hi >= base + self.mem.size() as u64 {
            self.cache.invalidate_changed_blocks(&mut self.mem, &mut self.engine)?
        } else {
            self.cache.invalidate_range(addr, len, &mut self.mem, &mut self.engine)?
        };
        metrics::record_invalidations(count);
        Ok(count)
    }

    /// Drop every block and all generated code.
    ///
    /// # Errors
    ///
    /// Fails if an original opcode cannot be written back. Blocks and code
    /// are dropped either way.
    pub fn clear_all(&mut self) -> Result<()> {
        if self.phase != Phase::Idle {
            debug!(phase = ?self.phase, "deferring cache clear");
            self.clear_pending = true;
            return Ok(());
        }
        self.clear_now()
    }

    pub(crate) fn clear_now(&mut self) -> Result<()> {
        let restored = self.cache.clear(&mut self.mem);
        self.engine.clear();
        metrics::record_clear(self.engine.code_used());
        restored.map_err(Into::into)
    }

    /// Stop at `addr` whenever a block would start there. While any
    /// breakpoint is set, native blocks are not linked.
    ///
    /// # Errors
    ///
    /// Fails if clearing the linked blocks fails.
    pub fn add_breakpoint(&mut self, addr: u32) -> Result<()> {
        if self.breakpoints.insert(addr) && self.breakpoints.len() == 1 && self.engine.can_link() {
            debug!("breakpoint set, unlinking native blocks");
            self.engine.set_linking(false);
            self.clear_all()?;
        }
        Ok(())
    }

    pub fn remove_breakpoint(&mut self, addr: u32) -> bool {
        let removed = self.breakpoints.remove(&addr);
        if self.breakpoints.is_empty() {
            self.engine.set_linking(true);
        }
        removed
    }

    pub fn clear_breakpoints(&mut self) {
        self.breakpoints.clear();
        self.engine.set_linking(true);
    }

    /// Live block starting at `addr`.
    #[must_use]
    pub fn block_at(&self, addr: u32) -> Option<BlockId> {
        self.cache.lookup(&self.mem, addr)
    }

    /// Live and preloaded blocks.
    pub fn blocks(&self) -> impl Iterator<Item = BlockInfo> + '_ {
        self.cache.blocks().map(BlockInfo::new)
    }

    #[must_use]
    pub fn block_info(&self, id: BlockId) -> Option<BlockInfo> {
        self.cache.block(id).map(BlockInfo::new)
    }

    /// Guest and IR disassembly of the block starting at, or else covering,
    /// `addr`.
    #[must_use]
    pub fn block_debug_info(&self, addr: u32) -> Option<BlockDebugInfo> {
        let id = self
            .cache
            .lookup(&self.mem, addr)
            .or_else(|| self.cache.blocks().find(|b| b.contains(addr)).map(|b| b.id))?;
        self.cache.debug_info(id, &self.mem, CompiledCode::describe)
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Bytes of generated code in the code space.
    #[must_use]
    pub fn code_used(&self) -> usize {
        self.engine.code_used()
    }
}

#[cfg(all(target_arch = "x86_64", unix))]
fn native_exit(state: &GuestState) -> BlockExit {
    use mjit_state::ExitReason;

    match state.exit_reason() {
        ExitReason::None => BlockExit::Jump,
        ExitReason::Syscall => BlockExit::Syscall(state.exit_arg),
        ExitReason::Break => BlockExit::Break(state.exit_arg),
        ExitReason::Fault => BlockExit::Fault(mjit_isa::interp::fault_for(state.pc, state.exit_arg)),
    }
}
