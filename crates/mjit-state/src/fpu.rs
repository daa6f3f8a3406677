//! FPU rounding mode handling.
//!
//! FCR31 bits 0-1 select the guest rounding mode. While guest code runs the
//! host rounding mode follows it, so plain host float arithmetic rounds the
//! way the guest expects.

/// Guest rounding mode (FCR31 & 3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RoundingMode {
    #[default]
    Nearest,
    Zero,
    PosInf,
    NegInf,
}

impl RoundingMode {
    /// Rounding mode selected by an FCR31 value.
    #[must_use]
    pub const fn from_fcr31(fcr31: u32) -> Self {
        match fcr31 & 3 {
            0 => Self::Nearest,
            1 => Self::Zero,
            2 => Self::PosInf,
            _ => Self::NegInf,
        }
    }

    /// MXCSR rounding-control field (bits 13-14) for this mode.
    #[must_use]
    pub const fn mxcsr_bits(self) -> u32 {
        match self {
            Self::Nearest => 0b00 << 13,
            Self::NegInf => 0b01 << 13,
            Self::PosInf => 0b10 << 13,
            Self::Zero => 0b11 << 13,
        }
    }
}

const MXCSR_RC_MASK: u32 = 0b11 << 13;

/// Current host rounding-control state.
#[must_use]
#[allow(deprecated)]
pub fn host_rounding_bits() -> u32 {
    #[cfg(target_arch = "x86_64")]
    {
        // SAFETY: reading MXCSR has no side effects.
        unsafe {
            std::arch::x86_64::_mm_getcsr()
        }
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        0
    }
}

/// Switch the host rounding mode. Returns the previous control word.
#[allow(deprecated)]
pub fn apply_host_rounding(mode: RoundingMode) -> u32 {
    let prev = host_rounding_bits();
    #[cfg(target_arch = "x86_64")]
    {
        let next = (prev & !MXCSR_RC_MASK) | mode.mxcsr_bits();
        // SAFETY: only the rounding-control field changes.
        unsafe {
            std::arch::x86_64::_mm_setcsr(next);
        }
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        let _ = (mode, MXCSR_RC_MASK);
    }
    prev
}

#[allow(deprecated)]
fn restore_host_rounding(saved: u32) {
    #[cfg(target_arch = "x86_64")]
    {
        let cur = host_rounding_bits();
        // SAFETY: restores a value previously read from MXCSR.
        unsafe {
            std::arch::x86_64::_mm_setcsr((cur & !MXCSR_RC_MASK) | (saved & MXCSR_RC_MASK));
        }
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        let _ = saved;
    }
}

/// Applies a guest rounding mode for its lifetime.
#[derive(Debug)]
pub struct HostRoundingGuard {
    saved: u32,
}

impl HostRoundingGuard {
    /// Switch to `mode` until the guard is dropped.
    #[must_use]
    pub fn new(mode: RoundingMode) -> Self {
        Self {
            saved: apply_host_rounding(mode),
        }
    }

    /// Temporarily restore the host default, e.g. around a syscall.
    pub fn suspend(&self) {
        restore_host_rounding(self.saved);
    }

    /// Re-apply a guest mode after [`HostRoundingGuard::suspend`] or an FCR31 change.
    pub fn resume(&self, mode: RoundingMode) {
        let _ = apply_host_rounding(mode);
    }
}

impl Drop for HostRoundingGuard {
    fn drop(&mut self) {
        restore_host_rounding(self.saved);
    }
}

/// Convert to a 32-bit integer under `mode`, saturating NaN and infinities.
///
/// NaN and positive overflow give `i32::MAX`; negative overflow gives
/// `i32::MIN`.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn round_to_i32(value: f32, mode: RoundingMode) -> i32 {
    if value.is_nan() {
        return i32::MAX;
    }
    let rounded = match mode {
        RoundingMode::Nearest => value.round_ties_even(),
        RoundingMode::Zero => value.trunc(),
        RoundingMode::PosInf => value.ceil(),
        RoundingMode::NegInf => value.floor(),
    };
    if rounded >= 2_147_483_648.0 {
        i32::MAX
    } else if rounded < -2_147_483_648.0 {
        i32::MIN
    } else {
        rounded as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_from_fcr31() {
        assert_eq!(RoundingMode::from_fcr31(0x0100_0000), RoundingMode::Nearest);
        assert_eq!(RoundingMode::from_fcr31(1), RoundingMode::Zero);
        assert_eq!(RoundingMode::from_fcr31(2), RoundingMode::PosInf);
        assert_eq!(RoundingMode::from_fcr31(3), RoundingMode::NegInf);
    }

    #[test]
    fn test_round_to_i32_modes() {
        assert_eq!(round_to_i32(2.5, RoundingMode::Nearest), 2);
        assert_eq!(round_to_i32(3.5, RoundingMode::Nearest), 4);
        assert_eq!(round_to_i32(-2.7, RoundingMode::Zero), -2);
        assert_eq!(round_to_i32(2.1, RoundingMode::PosInf), 3);
        assert_eq!(round_to_i32(-2.1, RoundingMode::NegInf), -3);
    }

    #[test]
    fn test_round_to_i32_saturates() {
        assert_eq!(round_to_i32(f32::NAN, RoundingMode::Nearest), i32::MAX);
        assert_eq!(round_to_i32(f32::INFINITY, RoundingMode::Zero), i32::MAX);
        assert_eq!(round_to_i32(f32::NEG_INFINITY, RoundingMode::Zero), i32::MIN);
        assert_eq!(round_to_i32(3.0e9, RoundingMode::Nearest), i32::MAX);
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn test_host_rounding_guard_restores() {
        let before = host_rounding_bits() & MXCSR_RC_MASK;
        {
            let guard = HostRoundingGuard::new(RoundingMode::Zero);
            assert_eq!(host_rounding_bits() & MXCSR_RC_MASK, RoundingMode::Zero.mxcsr_bits());
            guard.suspend();
            assert_eq!(host_rounding_bits() & MXCSR_RC_MASK, before);
            guard.resume(RoundingMode::NegInf);
            assert_eq!(host_rounding_bits() & MXCSR_RC_MASK, RoundingMode::NegInf.mxcsr_bits());
        }
        assert_eq!(host_rounding_bits() & MXCSR_RC_MASK, before);
    }
}
