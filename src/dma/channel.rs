//! DMA channel

use core::ptr::{self, NonNull};
use core::sync::atomic::{compiler_fence, Ordering};

use super::descriptor::{BlockAction, EventOutput, StepSize, TransferDescriptor};
use super::flags::Interrupts;
use super::transfer::{Direction, Priority, TransferOptions, TriggerAction, TriggerSource};
use super::Error;
use crate::regs::bits::{chctrla, chctrlb, chstatus};
use crate::regs::{ChannelReg, Reg, Registers};

/// Error type for the kinds of errors that can occur during a transaction.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransactionError {
    /// An invalid descriptor was fetched from memory.
    InvalidDescriptor,
    /// A bus error was detected during a beat transfer.
    TransferError,
    /// The CRC module detected data corruption.
    CRCError,
}

/// The return value of [`Channel::poll_status`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WaitResult {
    /// The transaction has ended or been aborted.
    Done,
    /// The transaction is suspended.
    Suspended,
    /// The transaction is still ongoing.
    Ongoing,
}

/// The status of a channel, as reported by its status register.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Status {
    /// No transfer pending or running.
    Idle,
    /// A transfer request is waiting for arbitration.
    Pending,
    /// The channel has started a transfer.
    Busy,
    /// The last descriptor fetch failed. Cleared by a channel reset.
    FetchError,
}

impl Status {
    pub(crate) fn from_bits(pend: bool, busy: bool, ferr: bool) -> Self {
        if ferr {
            Status::FetchError
        } else if busy {
            Status::Busy
        } else if pend {
            Status::Pending
        } else {
            Status::Idle
        }
    }
}

/// DMA channel.
///
/// Obtained from [`Dmac::take_channel`](super::Dmac::take_channel); gives
/// exclusive use of one hardware channel and its base descriptor until it is
/// handed back with [`Dmac::return_channel`](super::Dmac::return_channel).
pub struct Channel<'a, R: Registers> {
    id: u8,
    regs: &'a R,
    base: NonNull<TransferDescriptor>,
    writeback: NonNull<TransferDescriptor>,
}

// SAFETY: the descriptor slots are owned exclusively by this handle; register
// access is shared through `&R`, which needs `R: Sync` to cross threads.
unsafe impl<R: Registers + Sync> Send for Channel<'_, R> {}

impl<R: Registers> core::fmt::Debug for Channel<'_, R> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Channel").field("id", &self.id).finish()
    }
}

impl<'a, R: Registers> Channel<'a, R> {
    pub(crate) fn new(
        id: u8,
        regs: &'a R,
        base: NonNull<TransferDescriptor>,
        writeback: NonNull<TransferDescriptor>,
    ) -> Self {
        Self {
            id,
            regs,
            base,
            writeback,
        }
    }

    /// Return the channel ID.
    pub fn id(&self) -> u8 {
        self.id
    }

    /// Set the trigger action for the channel.
    ///
    /// Takes effect from the next trigger if a transfer is running.
    pub fn set_trigger_action(&mut self, action: TriggerAction) {
        self.modify_ctrlb(chctrlb::TRIGACT_SHIFT, chctrlb::TRIGACT_MASK, action as u32);
    }

    /// Get the trigger action for the channel.
    pub fn trigger_action(&self) -> TriggerAction {
        TriggerAction::from_bits(self.ctrlb_field(chctrlb::TRIGACT_SHIFT, chctrlb::TRIGACT_MASK))
    }

    /// Set the source trigger for the channel.
    ///
    /// Takes effect from the next trigger if a transfer is running.
    pub fn set_source(&mut self, source: TriggerSource) {
        self.modify_ctrlb(chctrlb::TRIGSRC_SHIFT, chctrlb::TRIGSRC_MASK, u32::from(source.number()));
    }

    /// Get the trigger source for the channel.
    pub fn source(&self) -> TriggerSource {
        let raw = self.ctrlb_field(chctrlb::TRIGSRC_SHIFT, chctrlb::TRIGSRC_MASK) as u8;
        TriggerSource::new(raw).unwrap_or_default()
    }

    /// Set the priority level of the channel.
    ///
    /// Takes effect from the next arbitration if a transfer is running.
    pub fn set_priority(&mut self, level: Priority) {
        self.modify_ctrlb(chctrlb::LVL_SHIFT, chctrlb::LVL_MASK, level as u32);
    }

    /// Get channel priority level.
    pub fn priority(&self) -> Priority {
        Priority::from_bits(self.ctrlb_field(chctrlb::LVL_SHIFT, chctrlb::LVL_MASK))
    }

    /// Keep the channel running while the device is in standby.
    pub fn set_run_in_standby(&mut self, run: bool) {
        self.regs.modify_channel(self.id, ChannelReg::CtrlA, |v| {
            if run {
                v | chctrla::RUNSTDBY
            } else {
                v & !chctrla::RUNSTDBY
            }
        });
    }

    /// Return whether the channel keeps running in standby.
    pub fn run_in_standby(&self) -> bool {
        self.regs.read_channel(self.id, ChannelReg::CtrlA) & chctrla::RUNSTDBY != 0
    }

    /// Get a mutable reference to the first descriptor for the channel.
    ///
    /// This is the descriptor the DMAC fetches when the channel starts a
    /// transaction; further blocks hang off it through
    /// [`TransferDescriptor::link_descriptor`].
    pub fn first_descriptor(&mut self) -> &mut TransferDescriptor {
        // SAFETY: the slot belongs to this channel alone for the lifetime of the handle
        unsafe { self.base.as_mut() }
    }

    /// Get the channel's interrupt flags.
    pub fn interrupt_flags(&self) -> Interrupts {
        Interrupts::from_bits_truncate(self.regs.read_channel(self.id, ChannelReg::IntFlag) as u8)
    }

    /// Reset the channel's interrupt flags.
    pub fn clear_interrupt_flags(&mut self) {
        self.regs.write_channel(self.id, ChannelReg::IntFlag, u32::from(Interrupts::all().bits()));
    }

    /// Enable interrupts for the channel. Any interrupts that are not in
    /// `interrupts` are disabled.
    pub fn enable_interrupts(&mut self, interrupts: Interrupts) {
        let disabled = Interrupts::all() - interrupts;
        self.regs.write_channel(self.id, ChannelReg::IntEnClr, u32::from(disabled.bits()));
        self.regs.write_channel(self.id, ChannelReg::IntEnSet, u32::from(interrupts.bits()));
    }

    /// Get the set of enabled channel interrupts.
    pub fn enabled_interrupts(&self) -> Interrupts {
        Interrupts::from_bits_truncate(self.regs.read_channel(self.id, ChannelReg::IntEnSet) as u8)
    }

    /// Read descriptor from the write-back address of this channel.
    ///
    /// The DMAC updates the write-back slot while the channel runs, so this
    /// is a snapshot of its progress, including the remaining beat count.
    pub fn writeback_descriptor(&self) -> TransferDescriptor {
        // SAFETY: the slot is valid storage memory; the hardware may write it concurrently
        unsafe { ptr::read_volatile(self.writeback.as_ptr()) }
    }

    /// Enable the DMA channel.
    pub fn enable(&mut self) {
        // Descriptor writes must land before the DMAC can fetch them
        compiler_fence(Ordering::SeqCst);
        self.regs.modify_channel(self.id, ChannelReg::CtrlA, |v| v | chctrla::ENABLE);
    }

    /// Disable the channel. This aborts any ongoing transaction.
    ///
    /// Always allowed, and idempotent.
    pub fn disable(&mut self) {
        self.regs.modify_channel(self.id, ChannelReg::CtrlA, |v| v & !chctrla::ENABLE);
    }

    /// Return whether the channel is enabled or not.
    pub fn is_enabled(&self) -> bool {
        self.regs.read_channel(self.id, ChannelReg::CtrlA) & chctrla::ENABLE != 0
    }

    /// Reset the DMA channel. This will set all channel registers to their
    /// reset values and disable the channel.
    pub fn reset(&mut self) {
        self.disable();
        self.regs.write_channel(self.id, ChannelReg::CtrlA, chctrla::SWRST);
        trace!("DMA channel {} reset", self.id);
    }

    /// Manually trigger the channel.
    pub fn trigger(&mut self) {
        self.regs.write(Reg::SwTrigCtrl, 1 << self.id);
    }

    /// Suspend the ongoing transaction. Returns `true` if the command was
    /// accepted.
    ///
    /// The command is refused when the channel is disabled or an earlier
    /// command has not been executed yet.
    pub fn suspend(&mut self) -> bool {
        if !self.is_enabled() || self.command_pending() {
            return false;
        }
        self.command(chctrlb::CMD_SUSPEND);
        true
    }

    /// Resume the ongoing transaction. Returns `true` if the command was
    /// accepted.
    ///
    /// The command is refused while the channel is disabled, has a transfer
    /// pending or running, or an earlier command has not been executed yet.
    /// The suspend flag need not be set, since an interrupt handler may
    /// already have acknowledged it. Accepting the command clears the flag.
    pub fn resume(&mut self) -> bool {
        let running = self.status_bits() & (chstatus::PEND | chstatus::BUSY) != 0;
        if !self.is_enabled() || running || self.command_pending() {
            return false;
        }
        self.regs.write_channel(self.id, ChannelReg::IntFlag, u32::from(Interrupts::SUSP.bits()));
        self.command(chctrlb::CMD_RESUME);
        true
    }

    /// Returns `true` if a transfer is pending on the channel.
    ///
    /// A point-in-time read; the hardware may move on right after it.
    pub fn is_pending(&self) -> bool {
        self.status_bits() & chstatus::PEND != 0
    }

    /// Returns `true` if the channel has started a transfer.
    ///
    /// A point-in-time read; the hardware may move on right after it.
    pub fn is_busy(&self) -> bool {
        self.status_bits() & chstatus::BUSY != 0
    }

    /// Channel status register, decoded.
    pub fn status(&self) -> Status {
        let bits = self.status_bits();
        Status::from_bits(
            bits & chstatus::PEND != 0,
            bits & chstatus::BUSY != 0,
            bits & chstatus::FERR != 0,
        )
    }

    /// Poll the channel to determine the status of the transaction.
    ///
    /// Never blocks. Errors stay reported until the channel is reset (fetch
    /// and CRC errors) or its interrupt flags are cleared (transfer errors).
    /// A suspension is reported while the suspend flag is set; once the flag
    /// is acknowledged a suspended channel reads as `Ongoing` until resumed
    /// or disabled.
    pub fn poll_status(&self) -> Result<WaitResult, TransactionError> {
        let status = self.status_bits();
        let flags = self.interrupt_flags();

        let result = if status & chstatus::FERR != 0 {
            Err(TransactionError::InvalidDescriptor)
        } else if status & chstatus::CRCERR != 0 {
            Err(TransactionError::CRCError)
        } else if flags.contains(Interrupts::TERR) {
            Err(TransactionError::TransferError)
        } else if !self.is_enabled() {
            Ok(WaitResult::Done)
        } else if flags.contains(Interrupts::SUSP) {
            Ok(WaitResult::Suspended)
        } else {
            Ok(WaitResult::Ongoing)
        };

        if let Err(e) = result {
            warn!("DMA channel {} transaction error: {:?}", self.id, e);
        }
        result
    }

    /// Non-blocking wait for the end of the transaction, for use with
    /// `nb::block!`.
    pub fn try_wait(&self) -> nb::Result<(), TransactionError> {
        match self.poll_status() {
            Ok(WaitResult::Done) => Ok(()),
            Ok(WaitResult::Ongoing | WaitResult::Suspended) => Err(nb::Error::WouldBlock),
            Err(e) => Err(nb::Error::Other(e)),
        }
    }

    /// Prepare the channel for a single-block transfer of `count` beats.
    ///
    /// Programs the trigger, priority and interrupt configuration, and
    /// replaces the first descriptor with a valid, unlinked one. Addresses on
    /// the memory side increment after every beat; the peripheral side stays
    /// fixed. A `count` of 0 moves 65536 beats. The channel is left disabled,
    /// so [`enable`](Self::enable) (and [`trigger`](Self::trigger) for
    /// software triggers) start it.
    ///
    /// # Safety
    ///
    /// `src` must be readable and `dst` writable for the whole transfer, and
    /// stay so until the transaction is done or aborted.
    pub unsafe fn configure_transfer<S, D>(
        &mut self,
        dir: Direction,
        src: *const S,
        dst: *mut D,
        count: u16,
        options: TransferOptions,
    ) -> Result<(), Error> {
        if self.is_enabled() {
            return Err(Error::Busy);
        }

        let width = options.beat_size.bytes();
        if src as usize % width != 0 || dst as usize % width != 0 {
            return Err(Error::UnsupportedConfiguration);
        }

        let beats = if count == 0 { 1 << 16 } else { usize::from(count) };
        let src_inc = dir != Direction::PeripheralToMemory;
        let dst_inc = dir != Direction::MemoryToPeripheral;

        // NOTE: the DMAC expects the block end address when the address increments
        let desc = self.first_descriptor();
        *desc = TransferDescriptor::new();
        desc.set_beat_size(options.beat_size);
        desc.set_step_size(StepSize::X1);
        desc.set_src_addr_increment(src_inc);
        desc.set_dst_addr_increment(dst_inc);
        if src_inc {
            desc.set_src_addr((src as *const u8).wrapping_add(beats * width));
        } else {
            desc.set_src_addr(src);
        }
        if dst_inc {
            desc.set_dst_addr((dst as *mut u8).wrapping_add(beats * width));
        } else {
            desc.set_dst_addr(dst);
        }
        desc.set_block_transfer_count(count);
        desc.set_block_action(options.block_action);
        desc.set_event_output(EventOutput::Disable);
        desc.set_valid();

        self.set_source(options.trigger_source);
        self.set_trigger_action(options.trigger_action);
        self.set_priority(options.priority);

        let mut interrupts = Interrupts::TERR | Interrupts::TCMPL;
        if matches!(options.block_action, BlockAction::Suspend | BlockAction::Both) {
            interrupts |= Interrupts::SUSP;
        }
        self.clear_interrupt_flags();
        self.enable_interrupts(interrupts);

        debug!("DMA channel {} configured for {} beats", self.id, beats);
        Ok(())
    }

    // Same register block and a slot inside the storage starting at `base`.
    pub(crate) fn is_from(&self, regs: &R, base: NonNull<TransferDescriptor>) -> bool {
        ptr::eq(self.regs, regs) && self.base.as_ptr() == base.as_ptr().wrapping_add(usize::from(self.id))
    }

    fn status_bits(&self) -> u32 {
        self.regs.read_channel(self.id, ChannelReg::Status)
    }

    fn ctrlb_field(&self, shift: u32, mask: u32) -> u32 {
        (self.regs.read_channel(self.id, ChannelReg::CtrlB) >> shift) & mask
    }

    // Writing CHCTRLB back must not replay a command, so CMD goes out as NOACT.
    fn modify_ctrlb(&mut self, shift: u32, mask: u32, value: u32) {
        let cmd = chctrlb::CMD_MASK << chctrlb::CMD_SHIFT;
        self.regs.modify_channel(self.id, ChannelReg::CtrlB, |v| {
            (v & !cmd & !(mask << shift)) | ((value & mask) << shift)
        });
    }

    fn command_pending(&self) -> bool {
        self.ctrlb_field(chctrlb::CMD_SHIFT, chctrlb::CMD_MASK) != chctrlb::CMD_NOACT
    }

    fn command(&mut self, cmd: u32) {
        let field = chctrlb::CMD_MASK << chctrlb::CMD_SHIFT;
        self.regs.modify_channel(self.id, ChannelReg::CtrlB, |v| {
            (v & !field) | (cmd << chctrlb::CMD_SHIFT)
        });
    }
}
