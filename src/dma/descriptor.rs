//! DMA transfer descriptor

use core::ptr::NonNull;

const VALID: u16 = 1 << 0;
const EVOSEL_SHIFT: u16 = 1;
const BLOCKACT_SHIFT: u16 = 3;
const BEATSIZE_SHIFT: u16 = 8;
const SRCINC: u16 = 1 << 10;
const DSTINC: u16 = 1 << 11;
const STEPSEL: u16 = 1 << 12;
const STEPSIZE_SHIFT: u16 = 13;

const FIELD2_MASK: u16 = 0x3;
const FIELD3_MASK: u16 = 0x7;

/// The raw descriptor memory structure used by the DMA system.
///
/// The hardware fetches one of these for every block of a transaction, so the
/// layout is fixed: 16 bytes, 128-bit aligned.
///
/// Addresses are stored as the 32-bit values the DMAC sees. When an address
/// increments after every beat, the hardware expects it to point one past the
/// end of the block, see [`Channel::configure_transfer`](super::channel::Channel::configure_transfer).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[repr(C, align(16))]
pub struct TransferDescriptor {
    btctrl: u16,
    btcnt: u16,
    srcaddr: u32,
    dstaddr: u32,
    descaddr: u32,
}

impl TransferDescriptor {
    /// Create a new empty descriptor. It is invalid and not linked.
    pub const fn new() -> Self {
        Self {
            btctrl: 0,
            btcnt: 0,
            srcaddr: 0,
            dstaddr: 0,
            descaddr: 0,
        }
    }

    /// Get the type-erased source address.
    pub fn src_addr(&self) -> *const () {
        self.srcaddr as usize as *const ()
    }

    /// Set the source address of the descriptor.
    ///
    /// # Safety
    ///
    /// The DMAC reads from `addr` whenever this descriptor executes. The memory
    /// must stay valid, and readable with the configured beat size, for as
    /// long as the descriptor can be fetched.
    pub unsafe fn set_src_addr<T>(&mut self, addr: *const T) {
        self.srcaddr = addr as usize as u32;
    }

    /// Get the type-erased destination address.
    pub fn dst_addr(&self) -> *mut () {
        self.dstaddr as usize as *mut ()
    }

    /// Set the destination address of the descriptor.
    ///
    /// # Safety
    ///
    /// The DMAC writes to `addr` whenever this descriptor executes. The memory
    /// must stay valid and not be otherwise accessed for as long as the
    /// descriptor can be fetched.
    pub unsafe fn set_dst_addr<T>(&mut self, addr: *mut T) {
        self.dstaddr = addr as usize as u32;
    }

    /// Get address for the next linked descriptor. Null when unlinked.
    pub fn next_desc_addr(&self) -> *const TransferDescriptor {
        self.descaddr as usize as *const TransferDescriptor
    }

    /// Mark the descriptor as valid.
    pub fn set_valid(&mut self) {
        self.btctrl |= VALID;
    }

    /// Mark the descriptor as invalid. The DMAC raises a fetch error if it
    /// reaches an invalid descriptor.
    pub fn set_invalid(&mut self) {
        self.btctrl &= !VALID;
    }

    /// Return the value of the valid bit.
    pub fn is_valid(&self) -> bool {
        self.btctrl & VALID != 0
    }

    /// Set the number of beats in the block. 0 selects the maximum, 65536.
    pub fn set_block_transfer_count(&mut self, count: u16) {
        self.btcnt = count;
    }

    /// Get the configured block transfer count.
    pub fn block_transfer_count(&self) -> u16 {
        self.btcnt
    }

    /// Get the size of a single beat.
    pub fn beat_size(&self) -> BeatSize {
        BeatSize::from_field(self.field(BEATSIZE_SHIFT, FIELD2_MASK))
    }

    /// Set the size of a single beat.
    pub fn set_beat_size(&mut self, size: BeatSize) {
        self.set_field(BEATSIZE_SHIFT, FIELD2_MASK, size as u16);
    }

    /// Get the step size of the descriptor.
    pub fn step_size(&self) -> StepSize {
        StepSize::from_field(self.field(STEPSIZE_SHIFT, FIELD3_MASK))
    }

    /// Set the step size for the descriptor.
    pub fn set_step_size(&mut self, size: StepSize) {
        self.set_field(STEPSIZE_SHIFT, FIELD3_MASK, size as u16);
    }

    /// Get which address is incremented with the descriptor's step size.
    pub fn step_selection(&self) -> StepSelection {
        if self.btctrl & STEPSEL != 0 {
            StepSelection::Source
        } else {
            StepSelection::Destination
        }
    }

    /// Set which address is incremented with the descriptor's step size.
    pub fn set_step_selection(&mut self, selection: StepSelection) {
        self.set_flag(STEPSEL, selection == StepSelection::Source);
    }

    /// Get whether the destination address is incremented after each beat.
    pub fn dst_addr_increment(&self) -> bool {
        self.btctrl & DSTINC != 0
    }

    /// Set whether the destination address is incremented after each beat.
    pub fn set_dst_addr_increment(&mut self, increment: bool) {
        self.set_flag(DSTINC, increment);
    }

    /// Get whether the source address is incremented after each beat.
    pub fn src_addr_increment(&self) -> bool {
        self.btctrl & SRCINC != 0
    }

    /// Set whether the source address is incremented after each beat.
    pub fn set_src_addr_increment(&mut self, increment: bool) {
        self.set_flag(SRCINC, increment);
    }

    /// Get the action taken after this block transfer completes.
    pub fn block_action(&self) -> BlockAction {
        BlockAction::from_field(self.field(BLOCKACT_SHIFT, FIELD2_MASK))
    }

    /// Set the action taken after this block transfer completes.
    pub fn set_block_action(&mut self, action: BlockAction) {
        self.set_field(BLOCKACT_SHIFT, FIELD2_MASK, action as u16);
    }

    /// Get when the descriptor outputs an event.
    pub fn event_output(&self) -> EventOutput {
        EventOutput::from_field(self.field(EVOSEL_SHIFT, FIELD2_MASK))
    }

    /// Set when the descriptor outputs an event.
    pub fn set_event_output(&mut self, output: EventOutput) {
        self.set_field(EVOSEL_SHIFT, FIELD2_MASK, output as u16);
    }

    /// Link a transfer descriptor to execute after this one.
    ///
    /// The valid bit of either descriptor is left untouched.
    ///
    /// # Safety
    ///
    /// `next` must point to a descriptor that stays valid, at the same
    /// address, for as long as this descriptor can be fetched. The chain it
    /// starts must terminate.
    pub unsafe fn link_descriptor(&mut self, next: *const TransferDescriptor) {
        self.descaddr = next as usize as u32;
    }

    /// Unlink the next transfer descriptor, returning its address if one was
    /// linked.
    pub fn unlink_descriptor(&mut self) -> Option<NonNull<TransferDescriptor>> {
        let previous = self.next_desc_addr() as *mut TransferDescriptor;
        self.descaddr = 0;
        NonNull::new(previous)
    }

    fn field(&self, shift: u16, mask: u16) -> u16 {
        (self.btctrl >> shift) & mask
    }

    fn set_field(&mut self, shift: u16, mask: u16, value: u16) {
        self.btctrl = (self.btctrl & !(mask << shift)) | ((value & mask) << shift);
    }

    fn set_flag(&mut self, flag: u16, set: bool) {
        if set {
            self.btctrl |= flag;
        } else {
            self.btctrl &= !flag;
        }
    }
}

/// Size of a DMA beat transfer memory access.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum BeatSize {
    /// 8 bits
    #[default]
    Byte = 0,
    /// 16 bits
    HWord = 1,
    /// 32 bits
    Word = 2,
}

impl BeatSize {
    /// Number of bytes moved by one beat.
    pub const fn bytes(self) -> usize {
        match self {
            BeatSize::Byte => 1,
            BeatSize::HWord => 2,
            BeatSize::Word => 4,
        }
    }

    // 0x3 is reserved and never written by this driver
    fn from_field(value: u16) -> Self {
        match value {
            0 => BeatSize::Byte,
            1 => BeatSize::HWord,
            _ => BeatSize::Word,
        }
    }
}

/// Size of the address advancement step, in beats.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum StepSize {
    /// Next address = address + 1 beat
    #[default]
    X1 = 0,
    /// 2 beats
    X2 = 1,
    /// 4 beats
    X4 = 2,
    /// 8 beats
    X8 = 3,
    /// 16 beats
    X16 = 4,
    /// 32 beats
    X32 = 5,
    /// 64 beats
    X64 = 6,
    /// 128 beats
    X128 = 7,
}

impl StepSize {
    /// Step multiplier.
    pub const fn factor(self) -> usize {
        1 << self as u16
    }

    fn from_field(value: u16) -> Self {
        match value {
            0 => StepSize::X1,
            1 => StepSize::X2,
            2 => StepSize::X4,
            3 => StepSize::X8,
            4 => StepSize::X16,
            5 => StepSize::X32,
            6 => StepSize::X64,
            _ => StepSize::X128,
        }
    }
}

/// Which address the step size applies to.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StepSelection {
    /// Step size applies to the destination address
    #[default]
    Destination,
    /// Step size applies to the source address
    Source,
}

/// Define what happens when a block transfer completes.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum BlockAction {
    /// Channel will be disabled if this is the last block transfer.
    #[default]
    NoAct = 0,
    /// Block interrupt will be generated, plus the action of `NoAct`.
    Int = 1,
    /// Channel will be suspended.
    Suspend = 2,
    /// Channel will be suspended and block interrupt will be generated.
    Both = 3,
}

impl BlockAction {
    fn from_field(value: u16) -> Self {
        match value {
            0 => BlockAction::NoAct,
            1 => BlockAction::Int,
            2 => BlockAction::Suspend,
            _ => BlockAction::Both,
        }
    }
}

/// When event system events should be output.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum EventOutput {
    /// Event generation disabled
    #[default]
    Disable = 0,
    /// Event strobe when the block transfer completes
    Block = 1,
    /// Event strobe when each beat transfer completes
    Beat = 3,
}

impl EventOutput {
    // 0x2 is reserved
    fn from_field(value: u16) -> Self {
        match value {
            1 => EventOutput::Block,
            3 => EventOutput::Beat,
            _ => EventOutput::Disable,
        }
    }
}
