//! Channel and interrupt flag sets

use bitflags::bitflags;

bitflags! {
    /// A bitfield of possible channels.
    #[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct Channels: u32 {
        /// Channel 0
        const CH0 = 1 << 0;
        /// Channel 1
        const CH1 = 1 << 1;
        /// Channel 2
        const CH2 = 1 << 2;
        /// Channel 3
        const CH3 = 1 << 3;
        /// Channel 4
        const CH4 = 1 << 4;
        /// Channel 5
        const CH5 = 1 << 5;
        /// Channel 6
        const CH6 = 1 << 6;
        /// Channel 7
        const CH7 = 1 << 7;
        /// Channel 8
        const CH8 = 1 << 8;
        /// Channel 9
        const CH9 = 1 << 9;
        /// Channel 10
        const CH10 = 1 << 10;
        /// Channel 11
        const CH11 = 1 << 11;
    }
}

impl Channels {
    /// The set holding only channel `id`. Empty if `id` is not a channel.
    pub const fn channel(id: u8) -> Self {
        if id >= 32 {
            return Self::empty();
        }
        Self::from_bits_truncate(1 << id)
    }

    /// The set of channels `0..count`.
    pub const fn first(count: usize) -> Self {
        if count >= 32 {
            return Self::all();
        }
        Self::from_bits_truncate((1 << count) - 1)
    }

    /// Iterate over the IDs of the channels in the set, lowest first.
    pub fn ids(self) -> impl Iterator<Item = u8> {
        let bits = self.bits();
        (0..32u8).filter(move |id| bits & (1 << id) != 0)
    }
}

bitflags! {
    /// A bitfield to represent channel interrupt flags.
    #[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct Interrupts: u8 {
        /// Transfer error
        const TERR = 1 << 0;
        /// Transfer complete
        const TCMPL = 1 << 1;
        /// Channel suspend
        const SUSP = 1 << 2;
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Channels {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "Channels({=u32:#x})", self.bits())
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Interrupts {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "Interrupts({=u8:#x})", self.bits())
    }
}
