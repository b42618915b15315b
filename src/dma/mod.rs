//! DMA
//!
//! [`Dmac`] owns the controller registers and the descriptor memory, and
//! hands out [`Channel`]s. A channel stays checked out until it is given back
//! with [`Dmac::return_channel`].

pub mod channel;
pub mod descriptor;
pub mod flags;
pub mod storage;
pub mod transfer;

#[cfg(test)]
pub(crate) mod sim;

use core::cell::Cell;
use core::marker::PhantomData;
use core::ptr::NonNull;

use critical_section::Mutex;

pub use self::channel::{Channel, Status, TransactionError, WaitResult};
pub use self::descriptor::{BeatSize, BlockAction, EventOutput, StepSelection, StepSize, TransferDescriptor};
pub use self::flags::{Channels, Interrupts};
pub use self::storage::{DmaStorage, Storage, UnsafeStorage};
pub use self::transfer::{Direction, Priority, QoS, TransferOptions, TriggerAction, TriggerSource};
use crate::regs::bits::{active, crcctrl, crcstatus, ctrl, dbgctrl, intpend, prictrl0, qosctrl};
use crate::regs::{ChannelReg, Reg, Registers};

#[cfg(all(feature = "samd11", feature = "samd21"))]
compile_error!("You may not enable both `samd11` and `samd21` features.");

cfg_if::cfg_if! {
    if #[cfg(feature = "samd11")] {
        /// Number of channels of the selected chip.
        pub const CHANMAX: usize = 6;
    } else {
        /// Number of channels of the selected chip.
        pub const CHANMAX: usize = 12;
    }
}

/// DMA errors
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// Configuration requested is not supported
    UnsupportedConfiguration,
    /// The channel is enabled and may be fetching its descriptor
    Busy,
}

/// DMA controller configuration
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub struct Config {
    /// Keep the DMAC running while the CPU is halted by a debugger
    pub run_while_debug: bool,

    /// Enabled priority levels, indexed by level
    pub priority_levels: [bool; 4],

    /// Round-robin scheduling per priority level, indexed by level.
    /// Levels without it use static scheduling.
    pub round_robin: [bool; 4],

    /// Data transfer quality of service
    pub data_transfer_qos: QoS,

    /// Descriptor fetch quality of service
    pub fetch_qos: QoS,

    /// Write-back quality of service
    pub write_back_qos: QoS,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            run_while_debug: false,
            priority_levels: [true; 4],
            round_robin: [false; 4],
            data_transfer_qos: QoS::Medium,
            fetch_qos: QoS::Medium,
            write_back_qos: QoS::Medium,
        }
    }
}

/// Input of the CRC engine.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CrcSource {
    /// No input
    #[default]
    Disabled,
    /// Data written with [`Dmac::crc_feed`]
    Io,
    /// Beats moved by the given channel
    Channel(u8),
}

/// CRC polynomial.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum CrcPolynomial {
    /// CRC-16 (CRC-CCITT)
    #[default]
    Crc16 = 0,
    /// CRC32 (IEEE 802.3)
    Crc32 = 1,
}

/// CRC engine configuration
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CrcConfig {
    /// Input
    pub source: CrcSource,
    /// Polynomial
    pub polynomial: CrcPolynomial,
    /// Width of one input beat
    pub beat_size: BeatSize,
}

/// DMA controller.
///
/// Borrows its descriptor storage for `'d`. Channel handles borrow the
/// controller, so it can only be torn down with [`Dmac::free`] once all of
/// them are gone.
pub struct Dmac<'d, R: Registers> {
    regs: R,
    base: NonNull<TransferDescriptor>,
    writeback: NonNull<TransferDescriptor>,
    channel_count: u8,
    taken: Mutex<Cell<Channels>>,
    _storage: PhantomData<&'d mut TransferDescriptor>,
}

// SAFETY: the descriptor pointers come from an exclusively borrowed storage
unsafe impl<R: Registers + Send> Send for Dmac<'_, R> {}
// SAFETY: checkout bookkeeping is guarded by a critical section; shared use
// only hands out `&R`.
unsafe impl<R: Registers + Sync> Sync for Dmac<'_, R> {}

impl<'d, R: Registers> Dmac<'d, R> {
    /// Initialize the DMAC with the default [`Config`].
    pub fn init<S: DmaStorage>(regs: R, storage: &'d mut S) -> Self {
        Self::new(regs, storage, Config::default())
    }

    /// Initialize the DMAC.
    ///
    /// Disables the controller, points it at `storage`, resets every channel
    /// the storage covers, applies `config` and enables the controller.
    pub fn new<S: DmaStorage>(regs: R, storage: &'d mut S, config: Config) -> Self {
        let channel_count = storage.channel_count().min(CHANMAX) as u8;

        // SAFETY: `DmaStorage` guarantees valid, non-null descriptor arrays
        let (base, writeback) = unsafe {
            (
                NonNull::new_unchecked(storage.baseaddr()),
                NonNull::new_unchecked(storage.wbaddr()),
            )
        };

        let dmac = Self {
            regs,
            base,
            writeback,
            channel_count,
            taken: Mutex::new(Cell::new(Channels::empty())),
            _storage: PhantomData,
        };

        dmac.disable();
        dmac.regs.set_descriptor_memory(base.as_ptr(), writeback.as_ptr());
        for id in 0..channel_count {
            dmac.channel(id).reset();
        }
        dmac.apply_config(&config);
        dmac.enable();

        info!("DMAC enabled with {} channels", channel_count);
        dmac
    }

    /// Disable the controller and give back the register handle.
    pub fn free(self) -> R {
        self.disable();
        debug!("DMAC released");
        self.regs
    }

    /// Number of channels backed by descriptor storage.
    pub fn channel_count(&self) -> u8 {
        self.channel_count
    }

    /// Enable the DMA controller and the CRC module.
    pub fn enable(&self) {
        self.regs.modify(Reg::Ctrl, |v| v | ctrl::DMAENABLE | ctrl::CRCENABLE);
    }

    /// Disable the DMA controller and the CRC module. Ongoing transfers are
    /// aborted.
    pub fn disable(&self) {
        self.regs.modify(Reg::Ctrl, |v| v & !(ctrl::DMAENABLE | ctrl::CRCENABLE));
    }

    /// Returns `true` if the controller is enabled.
    pub fn is_enabled(&self) -> bool {
        self.regs.read(Reg::Ctrl) & ctrl::DMAENABLE != 0
    }

    /// Keep the controller running while the CPU is halted by a debugger.
    pub fn set_run_while_debug(&self, run: bool) {
        self.regs.write(Reg::DbgCtrl, if run { dbgctrl::DBGRUN } else { 0 });
    }

    /// Returns `true` if the controller keeps running while debugging.
    pub fn run_while_debug(&self) -> bool {
        self.regs.read(Reg::DbgCtrl) & dbgctrl::DBGRUN != 0
    }

    /// Take channel `id` for exclusive use.
    ///
    /// Returns `None` if the channel is already taken or `id` is not backed
    /// by the storage.
    pub fn take_channel(&self, id: u8) -> Option<Channel<'_, R>> {
        if id >= self.channel_count {
            return None;
        }

        let taken = critical_section::with(|cs| {
            let taken = self.taken.borrow(cs);
            let set = taken.get();
            if set.contains(Channels::channel(id)) {
                return false;
            }
            taken.set(set | Channels::channel(id));
            true
        });

        if !taken {
            return None;
        }
        trace!("DMA channel {} taken", id);
        Some(self.channel(id))
    }

    /// Return a channel taken with [`take_channel`](Self::take_channel).
    ///
    /// The channel is disabled and reset before it becomes available again.
    /// A handle taken from a different controller is handed back untouched
    /// in `Err`.
    pub fn return_channel<'c>(&self, mut channel: Channel<'c, R>) -> Result<(), Channel<'c, R>> {
        if !channel.is_from(&self.regs, self.base) {
            warn!("DMA channel {} does not belong to this controller", channel.id());
            return Err(channel);
        }
        let id = channel.id();
        channel.reset();
        critical_section::with(|cs| {
            let taken = self.taken.borrow(cs);
            taken.set(taken.get() - Channels::channel(id));
        });
        debug!("DMA channel {} returned", id);
        Ok(())
    }

    /// Enable a priority level.
    pub fn enable_priority_level(&self, level: Priority) {
        self.regs.modify(Reg::Ctrl, |v| v | Self::level_enable_bit(level));
    }

    /// Disable a priority level. Channels at that level are no longer served.
    pub fn disable_priority_level(&self, level: Priority) {
        self.regs.modify(Reg::Ctrl, |v| v & !Self::level_enable_bit(level));
    }

    /// Returns `true` if the priority level is enabled.
    pub fn priority_level_enabled(&self, level: Priority) -> bool {
        self.regs.read(Reg::Ctrl) & Self::level_enable_bit(level) != 0
    }

    /// Set the data transfer quality of service.
    pub fn set_data_transfer_qos(&self, qos: QoS) {
        self.set_qos(qosctrl::DQOS_SHIFT, qos);
    }

    /// Get the data transfer quality of service.
    pub fn data_transfer_qos(&self) -> QoS {
        self.qos(qosctrl::DQOS_SHIFT)
    }

    /// Set the descriptor fetch quality of service.
    pub fn set_fetch_qos(&self, qos: QoS) {
        self.set_qos(qosctrl::FQOS_SHIFT, qos);
    }

    /// Get the descriptor fetch quality of service.
    pub fn fetch_qos(&self) -> QoS {
        self.qos(qosctrl::FQOS_SHIFT)
    }

    /// Set the write-back quality of service.
    pub fn set_write_back_qos(&self, qos: QoS) {
        self.set_qos(qosctrl::WRBQOS_SHIFT, qos);
    }

    /// Get the write-back quality of service.
    pub fn write_back_qos(&self) -> QoS {
        self.qos(qosctrl::WRBQOS_SHIFT)
    }

    /// Use round-robin (`true`) or static (`false`) scheduling between the
    /// channels of a priority level.
    pub fn set_priority_level_scheduling(&self, level: Priority, round_robin: bool) {
        let bit = Self::round_robin_bit(level);
        self.regs.modify(Reg::PriCtrl0, |v| if round_robin { v | bit } else { v & !bit });
    }

    /// Returns `true` if the priority level uses round-robin scheduling.
    pub fn priority_level_scheduling(&self, level: Priority) -> bool {
        self.regs.read(Reg::PriCtrl0) & Self::round_robin_bit(level) != 0
    }

    /// Channels with an enabled interrupt flag set.
    pub fn channel_interrupt_status(&self) -> Channels {
        self.channels_in(Reg::IntStatus)
    }

    /// Channels with a transfer pending.
    pub fn pending_channels(&self) -> Channels {
        self.channels_in(Reg::PendCh)
    }

    /// Channels with a transfer in progress.
    pub fn busy_channels(&self) -> Channels {
        self.channels_in(Reg::BusyCh)
    }

    /// ID of the channel the controller is currently serving.
    ///
    /// Only meaningful while [`active_block_transfer_count`] is `Some`.
    ///
    /// [`active_block_transfer_count`]: Self::active_block_transfer_count
    pub fn active_channel(&self) -> u8 {
        ((self.regs.read(Reg::Active) >> active::ID_SHIFT) & active::ID_MASK) as u8
    }

    /// Remaining beats of the active channel's block, or `None` if no
    /// channel is active.
    pub fn active_block_transfer_count(&self) -> Option<u16> {
        let value = self.regs.read(Reg::Active);
        if value & active::ABUSY == 0 {
            return None;
        }
        Some((value >> active::BTCNT_SHIFT) as u16)
    }

    /// Returns `true` if a channel at `level` has a request waiting.
    pub fn priority_level_has_request(&self, level: Priority) -> bool {
        self.regs.read(Reg::Active) & active::LVLEX_MASK & (1 << level as u32) != 0
    }

    /// Software trigger channel `id`. Does nothing for IDs outside the
    /// storage.
    pub fn trigger_channel(&self, id: u8) {
        if id < self.channel_count {
            self.regs.write(Reg::SwTrigCtrl, 1 << id);
        }
    }

    /// Status of channel `id`, whether taken or not.
    pub fn channel_status(&self, id: u8) -> Option<Status> {
        if id >= self.channel_count {
            return None;
        }
        Some(self.channel(id).status())
    }

    /// Interrupt flags of channel `id`, whether taken or not.
    pub fn channel_pending_interrupts(&self, id: u8) -> Option<Interrupts> {
        if id >= self.channel_count {
            return None;
        }
        let flags = self.regs.read_channel(id, ChannelReg::IntFlag);
        Some(Interrupts::from_bits_truncate(flags as u8))
    }

    /// Acknowledge interrupt flags of channel `id`. Flags in `flags` are
    /// cleared; the others are left alone.
    pub fn set_channel_pending_interrupts(&self, id: u8, flags: Interrupts) {
        if id < self.channel_count {
            self.regs.write_channel(id, ChannelReg::IntFlag, u32::from(flags.bits()));
        }
    }

    /// ID and interrupt flags of the lowest channel with a pending interrupt.
    pub fn lowest_pending_channel_interrupts(&self) -> Option<(u8, Interrupts)> {
        let pend = self.lowest_pending()?;
        let flags = Interrupts::from_bits_truncate((pend >> intpend::FLAGS_SHIFT) as u8);
        Some(((pend & intpend::ID_MASK) as u8, flags))
    }

    /// ID and status of the lowest channel with a pending interrupt.
    pub fn lowest_pending_channel_status(&self) -> Option<(u8, Status)> {
        let pend = self.lowest_pending()?;
        let status = Status::from_bits(
            pend & intpend::PEND != 0,
            pend & intpend::BUSY != 0,
            pend & intpend::FERR != 0,
        );
        Some(((pend & intpend::ID_MASK) as u8, status))
    }

    /// Acknowledge pending channel interrupts, lowest channel first, and
    /// pass each channel's flags to `handler`. Returns the channels served.
    ///
    /// Meant to be called from the DMAC interrupt handler.
    pub fn handle_interrupts(&self, mut handler: impl FnMut(u8, Interrupts)) -> Channels {
        let mut served = Channels::empty();
        for _ in 0..self.channel_count {
            let Some((id, flags)) = self.lowest_pending_channel_interrupts() else {
                break;
            };
            if flags.contains(Interrupts::TERR) {
                error!("DMA error interrupt on channel {}!", id);
            }
            self.set_channel_pending_interrupts(id, flags);
            served |= Channels::channel(id);
            handler(id, flags);
        }
        served
    }

    /// Configure the CRC engine.
    ///
    /// The engine is paused while its configuration changes. The whole
    /// sequence runs in one critical section.
    pub fn configure_crc(&self, config: CrcConfig) -> Result<(), Error> {
        let source = match config.source {
            CrcSource::Disabled => 0,
            CrcSource::Io => crcctrl::CRCSRC_IO,
            CrcSource::Channel(id) if id < self.channel_count => crcctrl::CRCSRC_CHANNEL0 + u32::from(id),
            CrcSource::Channel(_) => return Err(Error::UnsupportedConfiguration),
        };
        let value = (source << crcctrl::CRCSRC_SHIFT)
            | ((config.polynomial as u32) << crcctrl::CRCPOLY_SHIFT)
            | ((config.beat_size as u32) << crcctrl::CRCBEATSIZE_SHIFT);

        critical_section::with(|_| {
            let enabled = self.regs.read(Reg::Ctrl) & ctrl::CRCENABLE;
            self.regs.modify(Reg::Ctrl, |v| v & !ctrl::CRCENABLE);
            self.regs.write(Reg::CrcCtrl, value);
            self.regs.modify(Reg::Ctrl, |v| v | enabled);
        });
        Ok(())
    }

    /// Current CRC checksum.
    pub fn crc_checksum(&self) -> u32 {
        self.regs.read(Reg::CrcChksum)
    }

    /// Seed the CRC checksum.
    pub fn set_crc_checksum(&self, seed: u32) {
        self.regs.write(Reg::CrcChksum, seed);
    }

    /// Feed one beat to the CRC engine when its source is [`CrcSource::Io`].
    pub fn crc_feed(&self, data: u32) {
        self.regs.write(Reg::CrcDataIn, data);
    }

    /// Returns `true` if the CRC checksum is zero.
    pub fn crc_is_zero(&self) -> bool {
        self.regs.read(Reg::CrcStatus) & crcstatus::CRCZERO != 0
    }

    /// Returns `true` while the CRC engine is processing input.
    pub fn crc_is_busy(&self) -> bool {
        self.regs.read(Reg::CrcStatus) & crcstatus::CRCBUSY != 0
    }

    fn apply_config(&self, config: &Config) {
        self.set_run_while_debug(config.run_while_debug);
        for level in Priority::ALL {
            if config.priority_levels[level as usize] {
                self.enable_priority_level(level);
            } else {
                self.disable_priority_level(level);
            }
            self.set_priority_level_scheduling(level, config.round_robin[level as usize]);
        }
        self.set_data_transfer_qos(config.data_transfer_qos);
        self.set_fetch_qos(config.fetch_qos);
        self.set_write_back_qos(config.write_back_qos);
    }

    // Channel view without checkout; callers keep `id` below `channel_count`.
    fn channel(&self, id: u8) -> Channel<'_, R> {
        let index = usize::from(id);
        // SAFETY: `id` is inside the storage, so both slots exist
        let (base, writeback) = unsafe {
            (
                NonNull::new_unchecked(self.base.as_ptr().add(index)),
                NonNull::new_unchecked(self.writeback.as_ptr().add(index)),
            )
        };
        Channel::new(id, &self.regs, base, writeback)
    }

    fn channels_in(&self, reg: Reg) -> Channels {
        Channels::from_bits_truncate(self.regs.read(reg)) & Channels::first(usize::from(self.channel_count))
    }

    fn lowest_pending(&self) -> Option<u32> {
        if self.channel_interrupt_status().is_empty() {
            return None;
        }
        Some(self.regs.read(Reg::IntPend))
    }

    fn set_qos(&self, shift: u32, qos: QoS) {
        self.regs.modify(Reg::QosCtrl, |v| {
            (v & !(qosctrl::QOS_MASK << shift)) | ((qos as u32) << shift)
        });
    }

    fn qos(&self, shift: u32) -> QoS {
        QoS::from_bits(self.regs.read(Reg::QosCtrl) >> shift)
    }

    fn level_enable_bit(level: Priority) -> u32 {
        1 << (ctrl::LVLEN_SHIFT + level as u32)
    }

    fn round_robin_bit(level: Priority) -> u32 {
        1 << (prictrl0::RRLVLEN0 + 8 * level as u32)
    }
}
