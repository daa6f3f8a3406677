//! Register cache.
//!
//! Tracks, for one register class, where each guest register's current
//! value lives while a block is being compiled: in guest state, as a known
//! immediate, or in a host register. Host registers live in a fixed slot
//! arena indexed by host register number; bindings map guest registers to
//! slots. Both views only change through the methods below.
//!
//! The cache never emits machine code itself. It asks a [`CacheEmitter`]
//! for the loads and stores it needs, which keeps it testable without an
//! assembler.

use mjit_ir::reg::{IRREG_HI, IRREG_LO, IRREG_ZERO, class_of};
use mjit_ir::{IrInst, IrReg, RegClass, RegUsage, next_usage};
use tracing::error;

use crate::error::RegCacheError;

/// Host registers per class (x86-64 has 16 GPRs and 16 XMM registers).
pub const HOST_REG_COUNT: usize = 16;

/// Where a guest register's current value lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Location {
    /// In guest state.
    Mem,
    /// A known constant not yet materialized.
    Imm(u32),
    /// In a host register.
    Reg(u8),
    /// In a host register, with a known constant value.
    RegImm(u8, u32),
    /// In a host register as `membase + value`.
    RegAsPtr(u8),
}

impl Location {
    #[must_use]
    pub const fn host(self) -> Option<u8> {
        match self {
            Self::Reg(h) | Self::RegImm(h, _) | Self::RegAsPtr(h) => Some(h),
            Self::Mem | Self::Imm(_) => None,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Binding {
    loc: Location,
    spill_lock: bool,
    is_static: bool,
}

impl Binding {
    const EMPTY: Self = Self {
        loc: Location::Mem,
        spill_lock: false,
        is_static: false,
    };
}

#[derive(Clone, Copy, Debug, Default)]
struct HostSlot {
    guest: Option<IrReg>,
    dirty: bool,
    pointerified: bool,
    /// Holds LO in the low half and HI in the high half.
    pair64: bool,
}

/// Code the cache needs from a backend.
pub trait CacheEmitter {
    /// Load guest register `reg` from state into `host`.
    fn load_reg(&mut self, class: RegClass, host: u8, reg: IrReg);
    /// Store `host` to guest register `reg` in state.
    fn store_reg(&mut self, class: RegClass, host: u8, reg: IrReg);
    /// Put a constant in a GPR.
    fn load_imm(&mut self, host: u8, value: u32);
    /// Store a constant directly to guest state.
    fn store_imm(&mut self, reg: IrReg, value: u32);
    /// Load HI:LO into one 64-bit GPR.
    fn load_pair(&mut self, host: u8);
    /// Store a 64-bit GPR to HI:LO.
    fn store_pair(&mut self, host: u8);
    /// `host = membase + zero_extend(host)`.
    fn add_membase(&mut self, host: u8);
    /// Inverse of [`CacheEmitter::add_membase`].
    fn sub_membase(&mut self, host: u8);
}

/// Register cache for one register class.
#[derive(Debug)]
pub struct RegCache {
    class: RegClass,
    slots: [HostSlot; HOST_REG_COUNT],
    bindings: Vec<Binding>,
    order: Vec<u8>,
    statics: Vec<IrReg>,
    window: usize,
    pointerify: bool,
    insts: Vec<IrInst>,
    ir_index: usize,
}

impl RegCache {
    /// Create a cache allocating from `order` (host register numbers).
    ///
    /// Statics are taken from the front of `order`, in order.
    #[must_use]
    pub fn new(class: RegClass, order: Vec<u8>, statics: Vec<IrReg>, window: usize) -> Self {
        let statics = statics
            .into_iter()
            .filter(|&r| r != IRREG_ZERO && class_of(r) == Some(class))
            .take(order.len())
            .collect();
        Self {
            class,
            slots: [HostSlot::default(); HOST_REG_COUNT],
            bindings: vec![Binding::EMPTY; class.count()],
            order: order.into_iter().filter(|&h| usize::from(h) < HOST_REG_COUNT).collect(),
            statics,
            window,
            pointerify: false,
            insts: Vec::new(),
            ir_index: 0,
        }
    }

    /// Allow [`RegCache::pointerify`].
    #[must_use]
    pub const fn with_pointerify(mut self, enabled: bool) -> Self {
        self.pointerify = enabled;
        self
    }

    #[must_use]
    pub const fn class(&self) -> RegClass {
        self.class
    }

    #[must_use]
    pub fn statics(&self) -> &[IrReg] {
        &self.statics
    }

    /// Reset for a new block and bind the statics.
    ///
    /// # Errors
    ///
    /// Fails only if there are more statics than host registers.
    pub fn start_block(&mut self, emit: &mut impl CacheEmitter, insts: &[IrInst]) -> Result<(), RegCacheError> {
        self.slots = [HostSlot::default(); HOST_REG_COUNT];
        self.bindings.fill(Binding::EMPTY);
        if self.class == RegClass::Gpr {
            self.bindings[0].loc = Location::Imm(0);
        }
        self.insts.clear();
        self.insts.extend_from_slice(insts);
        self.ir_index = 0;

        for reg in self.statics.clone() {
            let host = self.alloc(emit)?;
            emit.load_reg(self.class, host, reg);
            self.bind(reg, host, Location::Reg(host), false);
            let i = self.index(reg)?;
            self.bindings[i].is_static = true;
        }
        Ok(())
    }

    /// Index of the IR instruction being compiled, for lookahead.
    pub const fn set_ir_index(&mut self, index: usize) {
        self.ir_index = index;
    }

    /// Current location of `reg`.
    #[must_use]
    pub fn location(&self, reg: IrReg) -> Location {
        self.index(reg).map_or(Location::Mem, |i| self.bindings[i].loc)
    }

    #[must_use]
    pub fn is_imm(&self, reg: IrReg) -> bool {
        matches!(self.location(reg), Location::Imm(_) | Location::RegImm(..))
    }

    /// Known constant value of `reg` (0 if not [`RegCache::is_imm`]).
    #[must_use]
    pub fn imm(&self, reg: IrReg) -> u32 {
        match self.location(reg) {
            Location::Imm(v) | Location::RegImm(_, v) => v,
            _ => 0,
        }
    }

    /// Whether the host copy of `reg` differs from guest state.
    #[must_use]
    pub fn is_dirty(&self, reg: IrReg) -> bool {
        match self.location(reg) {
            Location::Mem => false,
            Location::Imm(_) => reg != IRREG_ZERO,
            loc => loc.host().is_some_and(|h| self.slots[usize::from(h)].dirty),
        }
    }

    /// Whether any binding still needs a writeback.
    #[must_use]
    pub fn has_dirty(&self) -> bool {
        (0..self.bindings.len()).any(|i| self.is_dirty(self.reg_at(i)))
    }

    /// Keep `regs` in their host registers until [`RegCache::release_spill_locks`].
    pub fn spill_lock(&mut self, regs: &[IrReg]) {
        for &reg in regs {
            if let Ok(i) = self.index(reg) {
                self.bindings[i].spill_lock = true;
            }
        }
    }

    pub fn release_spill_locks(&mut self) {
        for b in &mut self.bindings {
            b.spill_lock = false;
        }
    }

    /// Host register holding `reg`'s value, loading it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`RegCacheError::Exhausted`] if no register can be freed.
    pub fn map_in(&mut self, emit: &mut impl CacheEmitter, reg: IrReg) -> Result<u8, RegCacheError> {
        let i = self.index(reg)?;
        self.split_pair(emit, reg);
        match self.bindings[i].loc {
            Location::Reg(h) | Location::RegImm(h, _) => Ok(h),
            Location::RegAsPtr(h) => {
                self.unpointerify(emit, reg);
                Ok(h)
            }
            Location::Imm(v) => {
                let host = self.alloc(emit)?;
                emit.load_imm(host, v);
                self.bind(reg, host, Location::RegImm(host, v), reg != IRREG_ZERO);
                Ok(host)
            }
            Location::Mem => {
                let host = self.alloc(emit)?;
                emit.load_reg(self.class, host, reg);
                self.bind(reg, host, Location::Reg(host), false);
                Ok(host)
            }
        }
    }

    /// Host register that will receive a new value for `reg`. The old value
    /// is not loaded.
    ///
    /// # Errors
    ///
    /// Returns [`RegCacheError::Exhausted`] if no register can be freed.
    pub fn map_out(&mut self, emit: &mut impl CacheEmitter, reg: IrReg) -> Result<u8, RegCacheError> {
        let i = self.index(reg)?;
        self.split_pair(emit, reg);
        let host = match self.bindings[i].loc.host() {
            Some(h) => h,
            None => self.alloc(emit)?,
        };
        self.bind(reg, host, Location::Reg(host), true);
        Ok(host)
    }

    /// Host register for a read-modify-write of `reg`.
    ///
    /// # Errors
    ///
    /// Returns [`RegCacheError::Exhausted`] if no register can be freed.
    pub fn map_in_out(&mut self, emit: &mut impl CacheEmitter, reg: IrReg) -> Result<u8, RegCacheError> {
        let host = self.map_in(emit, reg)?;
        self.bind(reg, host, Location::Reg(host), true);
        Ok(host)
    }

    /// Lock and map `src` for reading and `dest` for writing.
    ///
    /// # Errors
    ///
    /// Returns [`RegCacheError::Exhausted`] if no register can be freed.
    pub fn map_dirty_in(
        &mut self,
        emit: &mut impl CacheEmitter,
        dest: IrReg,
        src: IrReg,
    ) -> Result<(u8, u8), RegCacheError> {
        self.spill_lock(&[dest, src]);
        let s = self.map_in(emit, src)?;
        let d = if dest == src {
            self.map_in_out(emit, dest)?
        } else {
            self.map_out(emit, dest)?
        };
        Ok((d, s))
    }

    /// Lock and map two sources for reading and `dest` for writing.
    ///
    /// # Errors
    ///
    /// Returns [`RegCacheError::Exhausted`] if no register can be freed.
    pub fn map_dirty_in_in(
        &mut self,
        emit: &mut impl CacheEmitter,
        dest: IrReg,
        src1: IrReg,
        src2: IrReg,
    ) -> Result<(u8, u8, u8), RegCacheError> {
        self.spill_lock(&[dest, src1, src2]);
        let s1 = self.map_in(emit, src1)?;
        let s2 = self.map_in(emit, src2)?;
        let d = if dest == src1 || dest == src2 {
            self.map_in_out(emit, dest)?
        } else {
            self.map_out(emit, dest)?
        };
        Ok((d, s1, s2))
    }

    /// Bind LO/HI to one 64-bit host register and mark it dirty.
    ///
    /// With `load`, the current HI:LO value is loaded first.
    ///
    /// # Errors
    ///
    /// Returns [`RegCacheError::Exhausted`] if no register can be freed.
    pub fn map_pair64(&mut self, emit: &mut impl CacheEmitter, load: bool) -> Result<u8, RegCacheError> {
        if self.class != RegClass::Gpr {
            return Err(RegCacheError::WrongClass(IRREG_LO));
        }
        if let Some(h) = self.bindings[usize::from(IRREG_LO)].loc.host() {
            let slot = &mut self.slots[usize::from(h)];
            if slot.pair64 {
                slot.dirty = true;
                return Ok(h);
            }
        }
        if load {
            self.flush(emit, IRREG_LO);
            self.flush(emit, IRREG_HI);
        } else {
            self.discard(IRREG_LO);
            self.discard(IRREG_HI);
        }
        self.spill_lock(&[IRREG_LO, IRREG_HI]);
        let host = self.alloc(emit)?;
        if load {
            emit.load_pair(host);
        }
        self.slots[usize::from(host)] = HostSlot {
            guest: Some(IRREG_LO),
            dirty: true,
            pointerified: false,
            pair64: true,
        };
        self.bindings[usize::from(IRREG_LO)].loc = Location::Reg(host);
        self.bindings[usize::from(IRREG_HI)].loc = Location::Reg(host);
        Ok(host)
    }

    /// Record a known constant without touching a host register.
    ///
    /// # Errors
    ///
    /// Rejects a nonzero value for `r0`.
    pub fn set_imm(&mut self, emit: &mut impl CacheEmitter, reg: IrReg, value: u32) -> Result<(), RegCacheError> {
        let i = self.index(reg)?;
        if reg == IRREG_ZERO {
            return if value == 0 {
                Ok(())
            } else {
                Err(RegCacheError::ZeroImm(value))
            };
        }
        self.split_pair(emit, reg);
        if self.bindings[i].is_static {
            if let Some(host) = self.bindings[i].loc.host() {
                emit.load_imm(host, value);
                self.bind(reg, host, Location::RegImm(host, value), true);
                return Ok(());
            }
        }
        self.discard(reg);
        self.bindings[i].loc = Location::Imm(value);
        Ok(())
    }

    /// Write `reg` back to guest state and release its host register.
    /// Statics are written back but stay bound.
    pub fn flush(&mut self, emit: &mut impl CacheEmitter, reg: IrReg) {
        let Ok(i) = self.index(reg) else {
            return;
        };
        match self.bindings[i].loc {
            Location::Mem => {}
            Location::Imm(v) => {
                if reg != IRREG_ZERO {
                    emit.store_imm(reg, v);
                    self.bindings[i].loc = Location::Mem;
                }
            }
            Location::Reg(h) | Location::RegImm(h, _) | Location::RegAsPtr(h) => {
                let slot = self.slots[usize::from(h)];
                if slot.pair64 {
                    if slot.dirty {
                        emit.store_pair(h);
                    }
                    self.free_slot(h);
                    return;
                }
                if slot.pointerified {
                    emit.sub_membase(h);
                }
                if slot.dirty && reg != IRREG_ZERO {
                    emit.store_reg(self.class, h, reg);
                }
                if self.bindings[i].is_static {
                    let s = &mut self.slots[usize::from(h)];
                    s.dirty = false;
                    s.pointerified = false;
                    if let Location::RegAsPtr(_) = self.bindings[i].loc {
                        self.bindings[i].loc = Location::Reg(h);
                    }
                } else {
                    self.free_slot(h);
                }
            }
        }
    }

    /// Write back every dirty register. Only statics stay bound.
    pub fn flush_all(&mut self, emit: &mut impl CacheEmitter) {
        for i in 0..self.bindings.len() {
            self.flush(emit, self.reg_at(i));
        }
    }

    /// Forget `reg`'s cached value without writing it back.
    pub fn discard(&mut self, reg: IrReg) {
        let Ok(i) = self.index(reg) else {
            return;
        };
        if reg == IRREG_ZERO {
            return;
        }
        match self.bindings[i].loc.host() {
            Some(h) if self.bindings[i].is_static => {
                let s = &mut self.slots[usize::from(h)];
                s.dirty = false;
                s.pointerified = false;
                self.bindings[i].loc = Location::Reg(h);
            }
            Some(h) => self.free_slot(h),
            None => self.bindings[i].loc = Location::Mem,
        }
    }

    /// Reload statics from guest state after code that may have changed it.
    /// Call after [`RegCache::flush_all`].
    pub fn reload_statics(&mut self, emit: &mut impl CacheEmitter) {
        for reg in self.statics.clone() {
            if let Some(h) = self.location(reg).host() {
                emit.load_reg(self.class, h, reg);
                self.bind(reg, h, Location::Reg(h), false);
            }
        }
    }

    /// Host register holding `membase + reg`.
    ///
    /// # Errors
    ///
    /// Fails if pointerification is disabled or no register can be freed.
    pub fn pointerify(&mut self, emit: &mut impl CacheEmitter, reg: IrReg) -> Result<u8, RegCacheError> {
        if !self.pointerify || self.class != RegClass::Gpr {
            return Err(RegCacheError::PointerifyDisabled);
        }
        if let Location::RegAsPtr(h) = self.location(reg) {
            return Ok(h);
        }
        let host = self.map_in(emit, reg)?;
        let i = self.index(reg)?;
        let slot = &mut self.slots[usize::from(host)];
        if !slot.pointerified {
            emit.add_membase(host);
            slot.pointerified = true;
            self.bindings[i].loc = Location::RegAsPtr(host);
        }
        Ok(host)
    }

    /// Turn a pointerified register back into a plain value.
    pub fn unpointerify(&mut self, emit: &mut impl CacheEmitter, reg: IrReg) {
        let Ok(i) = self.index(reg) else {
            return;
        };
        if let Location::RegAsPtr(h) = self.bindings[i].loc {
            emit.sub_membase(h);
            self.slots[usize::from(h)].pointerified = false;
            self.bindings[i].loc = Location::Reg(h);
        }
    }

    fn index(&self, reg: IrReg) -> Result<usize, RegCacheError> {
        if class_of(reg) == Some(self.class) {
            Ok(usize::from(reg - self.class.base()))
        } else {
            Err(RegCacheError::WrongClass(reg))
        }
    }

    fn reg_at(&self, index: usize) -> IrReg {
        self.class.base() + index as u8
    }

    fn bind(&mut self, reg: IrReg, host: u8, loc: Location, dirty: bool) {
        let i = usize::from(reg - self.class.base());
        let slot = &mut self.slots[usize::from(host)];
        slot.guest = Some(reg);
        slot.dirty |= dirty;
        if !matches!(loc, Location::RegAsPtr(_)) {
            slot.pointerified = false;
        }
        self.bindings[i].loc = loc;
    }

    fn free_slot(&mut self, host: u8) {
        let slot = std::mem::take(&mut self.slots[usize::from(host)]);
        if let Some(reg) = slot.guest {
            let i = usize::from(reg - self.class.base());
            self.bindings[i].loc = if self.class == RegClass::Gpr && reg == IRREG_ZERO {
                Location::Imm(0)
            } else {
                Location::Mem
            };
            if slot.pair64 {
                self.bindings[usize::from(IRREG_HI)].loc = Location::Mem;
            }
        }
    }

    /// Break a LO/HI pair before one half is used on its own.
    fn split_pair(&mut self, emit: &mut impl CacheEmitter, reg: IrReg) {
        if self.class != RegClass::Gpr || (reg != IRREG_LO && reg != IRREG_HI) {
            return;
        }
        if let Some(h) = self.bindings[usize::from(reg)].loc.host() {
            if self.slots[usize::from(h)].pair64 {
                self.flush(emit, IRREG_LO);
            }
        }
    }

    fn owners(&self, host: u8) -> Vec<IrReg> {
        let slot = self.slots[usize::from(host)];
        match slot.guest {
            Some(reg) if slot.pair64 => vec![reg, IRREG_HI],
            Some(reg) => vec![reg],
            None => Vec::new(),
        }
    }

    fn is_locked(&self, host: u8) -> bool {
        self.owners(host).iter().any(|&r| {
            let b = self.bindings[usize::from(r - self.class.base())];
            b.spill_lock || b.is_static
        })
    }

    fn usage(&self, host: u8) -> RegUsage {
        let mut result = RegUsage::Clobbered;
        for reg in self.owners(host) {
            match next_usage(&self.insts, self.ir_index, reg, self.window) {
                RegUsage::Clobbered => {}
                RegUsage::Unused if result == RegUsage::Clobbered => result = RegUsage::Unused,
                RegUsage::Unused => {}
                other => return other,
            }
        }
        result
    }

    fn alloc(&mut self, emit: &mut impl CacheEmitter) -> Result<u8, RegCacheError> {
        let free = self
            .order
            .iter()
            .copied()
            .find(|&h| self.slots[usize::from(h)].guest.is_none());
        if let Some(h) = free {
            return Ok(h);
        }

        let mut unused = None;
        for idx in 0..self.order.len() {
            let h = self.order[idx];
            if self.is_locked(h) {
                continue;
            }
            match self.usage(h) {
                RegUsage::Clobbered => {
                    self.free_slot(h);
                    return Ok(h);
                }
                RegUsage::Unused if unused.is_none() => unused = Some(h),
                _ => {}
            }
        }
        if let Some(h) = unused {
            self.spill(emit, h);
            return Ok(h);
        }

        let victim = self.order.iter().copied().find(|&h| !self.is_locked(h));
        if let Some(h) = victim {
            self.spill(emit, h);
            return Ok(h);
        }

        error!(
            class = self.class.name(),
            ir_index = self.ir_index,
            "out of spillable registers"
        );
        Err(RegCacheError::Exhausted {
            class: self.class.name(),
            ir_index: self.ir_index,
        })
    }

    fn spill(&mut self, emit: &mut impl CacheEmitter, host: u8) {
        if let Some(reg) = self.slots[usize::from(host)].guest {
            self.flush(emit, reg);
        }
    }
}

#[cfg(test)]
mod tests {
    use mjit_ir::IrOp;
    use mjit_ir::reg::{IRREG_SP, fpr};

    use super::*;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    enum Emitted {
        Load(u8, IrReg),
        Store(u8, IrReg),
        LoadImm(u8, u32),
        StoreImm(IrReg, u32),
        LoadPair(u8),
        StorePair(u8),
        AddBase(u8),
        SubBase(u8),
    }

    #[derive(Default)]
    struct Recorder {
        log: Vec<Emitted>,
    }

    impl CacheEmitter for Recorder {
        fn load_reg(&mut self, _: RegClass, host: u8, reg: IrReg) {
            self.log.push(Emitted::Load(host, reg));
        }
        fn store_reg(&mut self, _: RegClass, host: u8, reg: IrReg) {
            self.log.push(Emitted::Store(host, reg));
        }
        fn load_imm(&mut self, host: u8, value: u32) {
            self.log.push(Emitted::LoadImm(host, value));
        }
        fn store_imm(&mut self, reg: IrReg, value: u32) {
            self.log.push(Emitted::StoreImm(reg, value));
        }
        fn load_pair(&mut self, host: u8) {
            self.log.push(Emitted::LoadPair(host));
        }
        fn store_pair(&mut self, host: u8) {
            self.log.push(Emitted::StorePair(host));
        }
        fn add_membase(&mut self, host: u8) {
            self.log.push(Emitted::AddBase(host));
        }
        fn sub_membase(&mut self, host: u8) {
            self.log.push(Emitted::SubBase(host));
        }
    }

    fn exit_block() -> Vec<IrInst> {
        vec![IrInst::with_const(IrOp::ExitToConst, 0, 0, 0)]
    }

    fn cache(order: Vec<u8>, statics: Vec<IrReg>) -> (RegCache, Recorder) {
        let mut cache = RegCache::new(RegClass::Gpr, order, statics, 30);
        let mut rec = Recorder::default();
        cache.start_block(&mut rec, &exit_block()).expect("statics fit");
        (cache, rec)
    }

    #[test]
    fn test_map_in_reuses_binding() {
        let (mut c, mut rec) = cache(vec![10, 11], vec![]);
        let h = c.map_in(&mut rec, 5).expect("free register");
        assert_eq!(c.map_in(&mut rec, 5), Ok(h));
        assert_eq!(rec.log, vec![Emitted::Load(10, 5)]);
        assert!(!c.is_dirty(5));
    }

    #[test]
    fn test_imm_materialized_on_first_read() {
        let (mut c, mut rec) = cache(vec![10], vec![]);
        c.set_imm(&mut rec, 3, 42).expect("not r0");
        assert!(rec.log.is_empty());
        assert!(c.is_imm(3));
        assert_eq!(c.map_in(&mut rec, 3), Ok(10));
        assert_eq!(c.location(3), Location::RegImm(10, 42));
        c.flush_all(&mut rec);
        assert_eq!(rec.log, vec![Emitted::LoadImm(10, 42), Emitted::Store(10, 3)]);
        assert_eq!(c.location(3), Location::Mem);
    }

    #[test]
    fn test_imm_flushed_without_register() {
        let (mut c, mut rec) = cache(vec![10], vec![]);
        c.set_imm(&mut rec, 7, 9).expect("not r0");
        c.flush(&mut rec, 7);
        assert_eq!(rec.log, vec![Emitted::StoreImm(7, 9)]);
    }

    #[test]
    fn test_zero_imm_rejected() {
        let (mut c, mut rec) = cache(vec![10], vec![]);
        assert_eq!(c.set_imm(&mut rec, 0, 1), Err(RegCacheError::ZeroImm(1)));
        assert_eq!(c.set_imm(&mut rec, 0, 0), Ok(()));
        assert!(c.is_imm(0));
    }

    #[test]
    fn test_flush_all_leaves_nothing_dirty() {
        let (mut c, mut rec) = cache(vec![10, 11, 12], vec![IRREG_SP]);
        c.map_out(&mut rec, 4).expect("free register");
        c.set_imm(&mut rec, 6, 1).expect("not r0");
        let sp = c.map_in_out(&mut rec, IRREG_SP).expect("static");
        assert!(c.has_dirty());
        c.flush_all(&mut rec);
        assert!(!c.has_dirty());
        assert_eq!(c.location(IRREG_SP), Location::Reg(sp));
        assert_eq!(c.location(4), Location::Mem);
        assert!(rec.log.contains(&Emitted::Store(sp, IRREG_SP)));
    }

    #[test]
    fn test_static_bound_at_start_and_imm_loaded_eagerly() {
        let (mut c, mut rec) = cache(vec![10, 11], vec![IRREG_SP]);
        assert_eq!(rec.log, vec![Emitted::Load(10, IRREG_SP)]);
        c.set_imm(&mut rec, IRREG_SP, 0x100).expect("not r0");
        assert_eq!(c.location(IRREG_SP), Location::RegImm(10, 0x100));
        assert_eq!(rec.log.last(), Some(&Emitted::LoadImm(10, 0x100)));
    }

    #[test]
    fn test_clobbered_victim_discarded_without_writeback() {
        let insts = vec![
            IrInst::new(IrOp::Mov, 1, 2, 0),
            IrInst::new(IrOp::Mov, 3, 4, 0),
            IrInst::new(IrOp::Mov, 1, 3, 0),
            IrInst::with_const(IrOp::ExitToConst, 0, 0, 0),
        ];
        let mut c = RegCache::new(RegClass::Gpr, vec![10, 11], vec![], 30);
        let mut rec = Recorder::default();
        c.start_block(&mut rec, &insts).expect("no statics");

        c.set_ir_index(0);
        c.map_dirty_in(&mut rec, 1, 2).expect("two free");
        c.release_spill_locks();

        c.set_ir_index(1);
        c.map_dirty_in(&mut rec, 3, 4).expect("victims available");
        c.release_spill_locks();

        assert!(!rec.log.iter().any(|e| matches!(e, Emitted::Store(_, 1))));
        assert_eq!(c.location(1), Location::Mem);
        assert!(c.location(3).host().is_some());
        assert!(c.location(4).host().is_some());
    }

    #[test]
    fn test_unused_victim_flushed() {
        let insts = vec![
            IrInst::new(IrOp::Mov, 1, 2, 0),
            IrInst::new(IrOp::Mov, 3, 1, 0),
            IrInst::with_const(IrOp::ExitToConst, 0, 0, 0),
        ];
        let mut c = RegCache::new(RegClass::Gpr, vec![10, 11], vec![], 30);
        let mut rec = Recorder::default();
        c.start_block(&mut rec, &insts).expect("no statics");
        c.map_dirty_in(&mut rec, 1, 2).expect("two free");
        c.release_spill_locks();
        c.set_ir_index(1);
        // r1 is read here; r2 is unused and gets the spill.
        c.map_dirty_in(&mut rec, 3, 1).expect("victim available");
        assert_eq!(c.location(2), Location::Mem);
        assert!(c.location(1).host().is_some());
    }

    #[test]
    fn test_exhaustion_reported() {
        let (mut c, mut rec) = cache(vec![10], vec![]);
        c.spill_lock(&[1, 2]);
        c.map_in(&mut rec, 1).expect("one free");
        assert!(matches!(
            c.map_in(&mut rec, 2),
            Err(RegCacheError::Exhausted { class: "gpr", .. })
        ));
    }

    #[test]
    fn test_pair64_split_on_single_use() {
        let (mut c, mut rec) = cache(vec![10, 11], vec![]);
        let h = c.map_pair64(&mut rec, true).expect("free register");
        assert_eq!(c.location(IRREG_HI), Location::Reg(h));
        let lo = c.map_in(&mut rec, IRREG_LO).expect("free register");
        assert_eq!(
            rec.log,
            vec![Emitted::LoadPair(h), Emitted::StorePair(h), Emitted::Load(lo, IRREG_LO)]
        );
        assert_eq!(c.location(IRREG_HI), Location::Mem);
    }

    #[test]
    fn test_pointerify_round_trip() {
        let mut c = RegCache::new(RegClass::Gpr, vec![10], vec![], 30).with_pointerify(true);
        let mut rec = Recorder::default();
        c.start_block(&mut rec, &exit_block()).expect("no statics");
        let h = c.pointerify(&mut rec, 5).expect("enabled");
        assert_eq!(c.location(5), Location::RegAsPtr(h));
        assert_eq!(c.pointerify(&mut rec, 5), Ok(h));
        c.map_in(&mut rec, 5).expect("bound");
        assert_eq!(rec.log, vec![Emitted::Load(h, 5), Emitted::AddBase(h), Emitted::SubBase(h)]);

        let (mut plain, mut rec) = cache(vec![10], vec![]);
        assert_eq!(plain.pointerify(&mut rec, 5), Err(RegCacheError::PointerifyDisabled));
    }

    #[test]
    fn test_fpr_class() {
        let mut c = RegCache::new(RegClass::Fpr, vec![2, 3], vec![], 30);
        let mut rec = Recorder::default();
        c.start_block(&mut rec, &exit_block()).expect("no statics");
        assert_eq!(c.map_out(&mut rec, fpr(4)), Ok(2));
        assert!(c.map_in(&mut rec, 4).is_err());
        c.flush_all(&mut rec);
        assert_eq!(rec.log, vec![Emitted::Store(2, fpr(4))]);
    }
}
