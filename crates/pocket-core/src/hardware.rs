#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
/// Hardware flavor being emulated.
///
/// Peripherals branch on this for wave-channel addressing, register reset
/// behavior and wave RAM readability windows.
pub enum Style {
    #[default]
    Dmg,
    Cgb,
    Gba,
}

impl Style {
    #[inline]
    /// Returns whether a global APU power-off also clears the length
    /// registers. On DMG the length counters survive NR52 bit 7 going low.
    pub const fn clears_length_on_power_off(self) -> bool {
        !matches!(self, Style::Dmg)
    }

    #[inline]
    /// Returns whether wave RAM is only briefly readable after the channel
    /// fetches a byte.
    pub const fn has_wave_read_window(self) -> bool {
        matches!(self, Style::Dmg)
    }

    #[inline]
    /// Returns whether wave RAM is addressed as two switchable 16-byte banks.
    pub const fn has_banked_wave_ram(self) -> bool {
        matches!(self, Style::Gba)
    }
}

#[derive(Clone, Copy, Debug)]
/// Optional hardware quirks that differ between board revisions.
pub struct Quirks {
    /// Re-triggering channel 3 while it is fetching a byte corrupts the
    /// start of wave RAM.
    pub wave_corruption: bool,
}

impl Quirks {
    pub const fn for_style(style: Style) -> Self {
        Self {
            wave_corruption: matches!(style, Style::Dmg),
        }
    }
}
