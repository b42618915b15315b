//! DMA channel configuration types

use super::descriptor::{BeatSize, BlockAction};

/// Priority level of a channel.
///
/// Level 3 is served first when several levels have pending requests.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Priority {
    /// Priority level 0 (lowest)
    #[default]
    Level0 = 0,
    /// Priority level 1
    Level1 = 1,
    /// Priority level 2
    Level2 = 2,
    /// Priority level 3 (highest)
    Level3 = 3,
}

impl Priority {
    /// All priority levels, lowest first.
    pub const ALL: [Priority; 4] = [Priority::Level0, Priority::Level1, Priority::Level2, Priority::Level3];

    pub(crate) fn from_bits(bits: u32) -> Self {
        match bits & 0x3 {
            0 => Priority::Level0,
            1 => Priority::Level1,
            2 => Priority::Level2,
            _ => Priority::Level3,
        }
    }
}

/// Quality of Service guarantee for the DMA system.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum QoS {
    /// Background (no sensitive operation)
    Disable = 0,
    /// Sensitive bandwidth
    Low = 1,
    /// Sensitive latency
    #[default]
    Medium = 2,
    /// Critical latency
    Critical = 3,
}

impl QoS {
    pub(crate) fn from_bits(bits: u32) -> Self {
        match bits & 0x3 {
            0 => QoS::Disable,
            1 => QoS::Low,
            2 => QoS::Medium,
            _ => QoS::Critical,
        }
    }
}

/// What action occurs when a trigger is received.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum TriggerAction {
    /// Trigger starts a block transfer.
    #[default]
    Block = 0,
    /// Trigger starts a beat transfer.
    Beat = 2,
    /// Trigger starts a transaction transfer.
    Transaction = 3,
}

impl TriggerAction {
    pub(crate) fn from_bits(bits: u32) -> Self {
        match bits & 0x3 {
            2 => TriggerAction::Beat,
            3 => TriggerAction::Transaction,
            // 0x1 is reserved
            _ => TriggerAction::Block,
        }
    }
}

/// Trigger source for a channel.
///
/// The peripheral trigger numbering is device specific and comes from the
/// datasheet's "DMAC trigger sources" table. Only software triggers are
/// accepted by a channel using [`TriggerSource::DISABLE`].
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TriggerSource(u8);

impl TriggerSource {
    /// No peripheral trigger, software triggers only.
    pub const DISABLE: TriggerSource = TriggerSource(0);

    /// Largest trigger source number the channel register can hold.
    pub const MAX: u8 = 0x3F;

    /// Trigger source with the raw number `source`, or `None` if it does
    /// not fit the trigger source field.
    pub const fn new(source: u8) -> Option<Self> {
        if source <= Self::MAX {
            Some(TriggerSource(source))
        } else {
            None
        }
    }

    /// Raw trigger source number.
    pub const fn number(self) -> u8 {
        self.0
    }
}

/// DMA transfer direction
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    /// Memory-to-memory
    MemoryToMemory,
    /// Memory-to-peripheral
    MemoryToPeripheral,
    /// Peripheral-to-memory
    PeripheralToMemory,
}

/// DMA transfer options
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub struct TransferOptions {
    /// Transfer data width
    pub beat_size: BeatSize,

    /// Transfer priority level
    pub priority: Priority,

    /// Peripheral trigger
    pub trigger_source: TriggerSource,

    /// What a trigger starts
    pub trigger_action: TriggerAction,

    /// Action once the block completes
    pub block_action: BlockAction,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            beat_size: BeatSize::Byte,
            priority: Priority::Level0,
            trigger_source: TriggerSource::DISABLE,
            trigger_action: TriggerAction::Transaction,
            block_action: BlockAction::Int,
        }
    }
}

impl TransferOptions {
    /// Options with the given beat size and defaults otherwise.
    pub fn new(beat_size: BeatSize) -> Self {
        Self {
            beat_size,
            ..Default::default()
        }
    }

    /// Set the priority level.
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the peripheral trigger and the action it starts.
    pub fn trigger(mut self, source: TriggerSource, action: TriggerAction) -> Self {
        self.trigger_source = source;
        self.trigger_action = action;
        self
    }

    /// Set the action taken once the block completes.
    pub fn block_action(mut self, action: BlockAction) -> Self {
        self.block_action = action;
        self
    }
}
