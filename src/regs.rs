//! DMAC register block
//!
//! The driver never touches the peripheral directly. Every access goes through
//! the [`Registers`] trait, which names the shared controller registers
//! ([`Reg`]) and the banked per-channel registers ([`ChannelReg`]).
//! [`MmioRegisters`] implements it for the SAM D21/D11 memory map.

use core::ptr;

use crate::dma::descriptor::TransferDescriptor;

/// Shared controller registers.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Reg {
    /// Control
    Ctrl,
    /// CRC control
    CrcCtrl,
    /// CRC data input
    CrcDataIn,
    /// CRC checksum
    CrcChksum,
    /// CRC status
    CrcStatus,
    /// Debug control
    DbgCtrl,
    /// Quality of service control
    QosCtrl,
    /// Software trigger control
    SwTrigCtrl,
    /// Priority control 0
    PriCtrl0,
    /// Interrupt pending (lowest pending channel summary)
    IntPend,
    /// Interrupt status
    IntStatus,
    /// Busy channels
    BusyCh,
    /// Pending channels
    PendCh,
    /// Active channel and levels
    Active,
}

impl Reg {
    const fn offset(self) -> usize {
        match self {
            Reg::Ctrl => 0x00,
            Reg::CrcCtrl => 0x02,
            Reg::CrcDataIn => 0x04,
            Reg::CrcChksum => 0x08,
            Reg::CrcStatus => 0x0C,
            Reg::DbgCtrl => 0x0D,
            Reg::QosCtrl => 0x0E,
            Reg::SwTrigCtrl => 0x10,
            Reg::PriCtrl0 => 0x14,
            Reg::IntPend => 0x20,
            Reg::IntStatus => 0x24,
            Reg::BusyCh => 0x28,
            Reg::PendCh => 0x2C,
            Reg::Active => 0x30,
        }
    }

    const fn width(self) -> Width {
        match self {
            Reg::Ctrl | Reg::CrcCtrl | Reg::IntPend => Width::Half,
            Reg::CrcStatus | Reg::DbgCtrl | Reg::QosCtrl => Width::Byte,
            _ => Width::Word,
        }
    }
}

/// Per-channel registers, banked behind the channel ID register.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChannelReg {
    /// Channel control A
    CtrlA,
    /// Channel control B
    CtrlB,
    /// Channel interrupt enable clear
    IntEnClr,
    /// Channel interrupt enable set
    IntEnSet,
    /// Channel interrupt flag status and clear
    IntFlag,
    /// Channel status
    Status,
}

impl ChannelReg {
    const fn offset(self) -> usize {
        match self {
            ChannelReg::CtrlA => 0x40,
            ChannelReg::CtrlB => 0x44,
            ChannelReg::IntEnClr => 0x4C,
            ChannelReg::IntEnSet => 0x4D,
            ChannelReg::IntFlag => 0x4E,
            ChannelReg::Status => 0x4F,
        }
    }

    const fn width(self) -> Width {
        match self {
            ChannelReg::CtrlB => Width::Word,
            _ => Width::Byte,
        }
    }
}

#[derive(Copy, Clone)]
enum Width {
    Byte,
    Half,
    Word,
}

/// Typed access to a DMAC register block.
///
/// Values are widened to `u32`; implementations truncate on write to the
/// register's real width. Write-one-to-clear and write-one-to-set registers
/// keep their hardware semantics, so callers write masks, not images.
pub trait Registers {
    /// Read a shared register.
    fn read(&self, reg: Reg) -> u32;

    /// Write a shared register.
    fn write(&self, reg: Reg, value: u32);

    /// Read a register of channel `id`.
    fn read_channel(&self, id: u8, reg: ChannelReg) -> u32;

    /// Write a register of channel `id`.
    fn write_channel(&self, id: u8, reg: ChannelReg, value: u32);

    /// Point the base and write-back address registers at descriptor memory.
    fn set_descriptor_memory(&self, base: *mut TransferDescriptor, writeback: *mut TransferDescriptor);

    /// Read-modify-write a shared register.
    fn modify(&self, reg: Reg, f: impl FnOnce(u32) -> u32) {
        let value = self.read(reg);
        self.write(reg, f(value));
    }

    /// Read-modify-write a register of channel `id`.
    ///
    /// Implementations with banked channel registers override this so the
    /// whole sequence happens under one channel selection.
    fn modify_channel(&self, id: u8, reg: ChannelReg, f: impl FnOnce(u32) -> u32) {
        let value = self.read_channel(id, reg);
        self.write_channel(id, reg, f(value));
    }
}

impl<T: Registers + ?Sized> Registers for &T {
    fn read(&self, reg: Reg) -> u32 {
        (**self).read(reg)
    }

    fn write(&self, reg: Reg, value: u32) {
        (**self).write(reg, value)
    }

    fn read_channel(&self, id: u8, reg: ChannelReg) -> u32 {
        (**self).read_channel(id, reg)
    }

    fn write_channel(&self, id: u8, reg: ChannelReg, value: u32) {
        (**self).write_channel(id, reg, value)
    }

    fn set_descriptor_memory(&self, base: *mut TransferDescriptor, writeback: *mut TransferDescriptor) {
        (**self).set_descriptor_memory(base, writeback)
    }

    fn modify(&self, reg: Reg, f: impl FnOnce(u32) -> u32) {
        (**self).modify(reg, f)
    }

    fn modify_channel(&self, id: u8, reg: ChannelReg, f: impl FnOnce(u32) -> u32) {
        (**self).modify_channel(id, reg, f)
    }
}

/// Register bit fields.
#[allow(missing_docs)]
pub mod bits {
    /// CTRL
    pub mod ctrl {
        pub const SWRST: u32 = 1 << 0;
        pub const DMAENABLE: u32 = 1 << 1;
        pub const CRCENABLE: u32 = 1 << 2;
        pub const LVLEN_SHIFT: u32 = 8;
    }

    /// CRCCTRL
    pub mod crcctrl {
        pub const CRCBEATSIZE_SHIFT: u32 = 0;
        pub const CRCBEATSIZE_MASK: u32 = 0x3;
        pub const CRCPOLY_SHIFT: u32 = 2;
        pub const CRCPOLY_MASK: u32 = 0x3;
        pub const CRCSRC_SHIFT: u32 = 8;
        pub const CRCSRC_MASK: u32 = 0x3F;
        /// CRCSRC value selecting the I/O interface.
        pub const CRCSRC_IO: u32 = 0x01;
        /// CRCSRC value of channel 0; channel `n` is `CRCSRC_CHANNEL0 + n`.
        pub const CRCSRC_CHANNEL0: u32 = 0x20;
    }

    /// CRCSTATUS
    pub mod crcstatus {
        pub const CRCBUSY: u32 = 1 << 0;
        pub const CRCZERO: u32 = 1 << 1;
    }

    /// DBGCTRL
    pub mod dbgctrl {
        pub const DBGRUN: u32 = 1 << 0;
    }

    /// QOSCTRL
    pub mod qosctrl {
        pub const WRBQOS_SHIFT: u32 = 0;
        pub const FQOS_SHIFT: u32 = 2;
        pub const DQOS_SHIFT: u32 = 4;
        pub const QOS_MASK: u32 = 0x3;
    }

    /// PRICTRL0
    pub mod prictrl0 {
        /// Round-robin enable of level `n` is bit `RRLVLEN0 + 8 * n`.
        pub const RRLVLEN0: u32 = 7;
    }

    /// INTPEND
    pub mod intpend {
        pub const ID_MASK: u32 = 0xF;
        pub const FLAGS_SHIFT: u32 = 8;
        pub const FERR: u32 = 1 << 13;
        pub const BUSY: u32 = 1 << 14;
        pub const PEND: u32 = 1 << 15;
    }

    /// ACTIVE
    pub mod active {
        pub const LVLEX_MASK: u32 = 0xF;
        pub const ID_SHIFT: u32 = 8;
        pub const ID_MASK: u32 = 0x1F;
        pub const ABUSY: u32 = 1 << 15;
        pub const BTCNT_SHIFT: u32 = 16;
    }

    /// CHCTRLA
    pub mod chctrla {
        pub const SWRST: u32 = 1 << 0;
        pub const ENABLE: u32 = 1 << 1;
        pub const RUNSTDBY: u32 = 1 << 6;
    }

    /// CHCTRLB
    pub mod chctrlb {
        pub const LVL_SHIFT: u32 = 5;
        pub const LVL_MASK: u32 = 0x3;
        pub const TRIGSRC_SHIFT: u32 = 8;
        pub const TRIGSRC_MASK: u32 = 0x3F;
        pub const TRIGACT_SHIFT: u32 = 22;
        pub const TRIGACT_MASK: u32 = 0x3;
        pub const CMD_SHIFT: u32 = 24;
        pub const CMD_MASK: u32 = 0x3;
        pub const CMD_NOACT: u32 = 0;
        pub const CMD_SUSPEND: u32 = 1;
        pub const CMD_RESUME: u32 = 2;
    }

    /// CHSTATUS
    pub mod chstatus {
        pub const PEND: u32 = 1 << 0;
        pub const BUSY: u32 = 1 << 1;
        pub const FERR: u32 = 1 << 2;
        pub const CRCERR: u32 = 1 << 3;
    }
}

/// Memory-mapped DMAC register block.
///
/// Channel registers are banked: the channel ID register selects which
/// channel the `0x40..0x50` window shows. Every channel access therefore
/// runs inside a critical section.
pub struct MmioRegisters {
    base: *mut u8,
}

// SAFETY: all accesses are volatile, and channel bank selection happens inside a critical section.
unsafe impl Send for MmioRegisters {}
// SAFETY: see above
unsafe impl Sync for MmioRegisters {}

impl MmioRegisters {
    /// DMAC base address on SAM D21 and SAM D11.
    pub const DMAC_BASE: usize = 0x4100_4800;

    const CHID: usize = 0x3F;
    const BASEADDR: usize = 0x34;
    const WRBADDR: usize = 0x38;

    /// Get the DMAC register block of the device.
    ///
    /// # Safety
    ///
    /// There must be no other live handle on the DMAC registers.
    pub unsafe fn steal() -> Self {
        Self {
            base: Self::DMAC_BASE as *mut u8,
        }
    }

    /// Use a register block located at `base`.
    ///
    /// # Safety
    ///
    /// `base` must point to a DMAC register block (or memory laid out like
    /// one) that stays valid for as long as the returned value is used, and
    /// nothing else may access it concurrently.
    pub const unsafe fn from_ptr(base: *mut u8) -> Self {
        Self { base }
    }

    /// Address of the register block.
    pub fn as_ptr(&self) -> *mut u8 {
        self.base
    }

    fn read_raw(&self, offset: usize, width: Width) -> u32 {
        // SAFETY: `base` points to a register block per the constructor contract
        unsafe {
            let addr = self.base.add(offset);
            match width {
                Width::Byte => ptr::read_volatile(addr) as u32,
                Width::Half => ptr::read_volatile(addr as *const u16) as u32,
                Width::Word => ptr::read_volatile(addr as *const u32),
            }
        }
    }

    fn write_raw(&self, offset: usize, width: Width, value: u32) {
        // SAFETY: `base` points to a register block per the constructor contract
        unsafe {
            let addr = self.base.add(offset);
            match width {
                Width::Byte => ptr::write_volatile(addr, value as u8),
                Width::Half => ptr::write_volatile(addr as *mut u16, value as u16),
                Width::Word => ptr::write_volatile(addr as *mut u32, value),
            }
        }
    }

    fn select(&self, id: u8) {
        self.write_raw(Self::CHID, Width::Byte, u32::from(id));
    }
}

impl Registers for MmioRegisters {
    fn read(&self, reg: Reg) -> u32 {
        self.read_raw(reg.offset(), reg.width())
    }

    fn write(&self, reg: Reg, value: u32) {
        self.write_raw(reg.offset(), reg.width(), value)
    }

    fn modify(&self, reg: Reg, f: impl FnOnce(u32) -> u32) {
        critical_section::with(|_| {
            let value = self.read_raw(reg.offset(), reg.width());
            self.write_raw(reg.offset(), reg.width(), f(value))
        })
    }

    fn read_channel(&self, id: u8, reg: ChannelReg) -> u32 {
        critical_section::with(|_| {
            self.select(id);
            self.read_raw(reg.offset(), reg.width())
        })
    }

    fn write_channel(&self, id: u8, reg: ChannelReg, value: u32) {
        critical_section::with(|_| {
            self.select(id);
            self.write_raw(reg.offset(), reg.width(), value)
        })
    }

    fn modify_channel(&self, id: u8, reg: ChannelReg, f: impl FnOnce(u32) -> u32) {
        critical_section::with(|_| {
            self.select(id);
            let value = self.read_raw(reg.offset(), reg.width());
            self.write_raw(reg.offset(), reg.width(), f(value))
        })
    }

    fn set_descriptor_memory(&self, base: *mut TransferDescriptor, writeback: *mut TransferDescriptor) {
        // The DMAC sits on a 32-bit bus; descriptor memory lives in SRAM.
        self.write_raw(Self::BASEADDR, Width::Word, base as usize as u32);
        self.write_raw(Self::WRBADDR, Width::Word, writeback as usize as u32);
    }
}
