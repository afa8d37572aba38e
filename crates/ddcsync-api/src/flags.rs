// ── Per-call option flags ──
//
// ddcutil-service accepts a `u32` flags word on every read and write.
// Two session options map onto it; callers pass a base word (usually 0).

use bitflags::bitflags;

bitflags! {
    /// Option bits attached to read/write calls.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CallFlags: u32 {
        /// Return raw (uncalibrated) values.
        const RAW_VALUES = 1 << 1;
        /// Skip verification of written values.
        const NO_VERIFY = 1 << 2;
    }
}

impl CallFlags {
    /// Combine a caller-supplied base word with the two session options.
    ///
    /// The result is always `base | raw | verify`; bits already present in
    /// `base` are never cleared.
    pub fn compose(base: u32, raw_values: bool, skip_verify: bool) -> Self {
        let mut flags = Self::from_bits_retain(base);
        if raw_values {
            flags |= Self::RAW_VALUES;
        }
        if skip_verify {
            flags |= Self::NO_VERIFY;
        }
        flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_options_yield_six() {
        assert_eq!(CallFlags::compose(0, true, true).bits(), 6);
    }

    #[test]
    fn single_options_map_to_their_bit() {
        assert_eq!(CallFlags::compose(0, true, false).bits(), 2);
        assert_eq!(CallFlags::compose(0, false, true).bits(), 4);
        assert_eq!(CallFlags::compose(0, false, false).bits(), 0);
    }

    #[test]
    fn composition_is_order_independent() {
        let mut a = CallFlags::empty();
        a.insert(CallFlags::RAW_VALUES);
        a.insert(CallFlags::NO_VERIFY);

        let mut b = CallFlags::empty();
        b.insert(CallFlags::NO_VERIFY);
        b.insert(CallFlags::RAW_VALUES);

        assert_eq!(a, b);
        assert_eq!(a, CallFlags::compose(0, true, true));
    }

    #[test]
    fn toggling_one_option_restores_the_other() {
        let with_verify = CallFlags::compose(0, false, true);
        let both = CallFlags::compose(0, true, true);
        let back = CallFlags::compose(0, false, true);
        assert_eq!(both.bits(), 6);
        assert_eq!(back, with_verify);
        assert_eq!(back.bits(), 4);
    }

    #[test]
    fn base_bits_are_preserved() {
        let flags = CallFlags::compose(0x100, true, false);
        assert_eq!(flags.bits(), 0x102);
    }
}
