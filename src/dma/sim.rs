//! Software model of the DMAC for host tests.
//!
//! Implements [`Registers`] with the hardware's register semantics and moves
//! channels through their states one [`SimDmac::step`] at a time. Only the
//! first descriptor of a channel is executed and no data is copied; the
//! model tracks control state, status and the write-back slot.

use core::cell::Cell;
use core::ptr;

use super::descriptor::{BlockAction, TransferDescriptor};
use super::flags::Interrupts;
use super::CHANMAX;
use crate::regs::bits::{active, chctrla, chctrlb, chstatus, crcctrl, crcstatus, ctrl, intpend};
use crate::regs::{ChannelReg, Reg, Registers};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Resume {
    None,
    // suspended mid-transaction, PEND/BUSY bits to restore
    Continue(u32),
    // suspended by the block action
    AfterBlock,
}

#[derive(Debug)]
struct SimChannel {
    ctrla: Cell<u32>,
    ctrlb: Cell<u32>,
    inten: Cell<u32>,
    intflag: Cell<u32>,
    status: Cell<u32>,
    resume: Cell<Resume>,
    tail: Cell<bool>,
}

impl SimChannel {
    const fn new() -> Self {
        Self {
            ctrla: Cell::new(0),
            ctrlb: Cell::new(0),
            inten: Cell::new(0),
            intflag: Cell::new(0),
            status: Cell::new(0),
            resume: Cell::new(Resume::None),
            tail: Cell::new(false),
        }
    }

    fn reset(&self) {
        self.ctrla.set(0);
        self.ctrlb.set(0);
        self.inten.set(0);
        self.intflag.set(0);
        self.status.set(0);
        self.resume.set(Resume::None);
        self.tail.set(false);
    }

    fn enabled(&self) -> bool {
        self.ctrla.get() & chctrla::ENABLE != 0
    }

    fn level(&self) -> u32 {
        (self.ctrlb.get() >> chctrlb::LVL_SHIFT) & chctrlb::LVL_MASK
    }

    fn flag(&self, flags: Interrupts) {
        self.intflag.set(self.intflag.get() | u32::from(flags.bits()));
    }

    fn stop(&self) {
        self.ctrla.set(self.ctrla.get() & !chctrla::ENABLE);
        self.status.set(self.status.get() & !(chstatus::PEND | chstatus::BUSY));
        self.resume.set(Resume::None);
        self.tail.set(false);
    }
}

/// Software DMAC.
#[derive(Debug)]
pub(crate) struct SimDmac {
    ctrl: Cell<u32>,
    crcctrl: Cell<u32>,
    crcchksum: Cell<u32>,
    dbgctrl: Cell<u32>,
    qosctrl: Cell<u32>,
    prictrl0: Cell<u32>,
    channels: [SimChannel; CHANMAX],
    active: Cell<Option<u8>>,
    base: Cell<*mut TransferDescriptor>,
    writeback: Cell<*mut TransferDescriptor>,
}

impl SimDmac {
    pub(crate) fn new() -> Self {
        Self {
            ctrl: Cell::new(0),
            crcctrl: Cell::new(0),
            crcchksum: Cell::new(0),
            dbgctrl: Cell::new(0),
            qosctrl: Cell::new(0x2A),
            prictrl0: Cell::new(0),
            channels: [const { SimChannel::new() }; CHANMAX],
            active: Cell::new(None),
            base: Cell::new(ptr::null_mut()),
            writeback: Cell::new(ptr::null_mut()),
        }
    }

    /// Advance the hardware by one arbitration or completion.
    pub(crate) fn step(&self) {
        if self.ctrl.get() & ctrl::DMAENABLE == 0 {
            return;
        }
        match self.active.get() {
            Some(id) => {
                self.active.set(None);
                self.complete(id);
            }
            None => {
                if let Some(id) = self.arbitrate() {
                    self.fetch(id);
                }
            }
        }
    }

    pub(crate) fn run(&self, steps: usize) {
        for _ in 0..steps {
            self.step();
        }
    }

    /// Abort channel `id` with a bus error.
    pub(crate) fn inject_transfer_error(&self, id: u8) {
        let ch = &self.channels[usize::from(id)];
        self.release(id);
        ch.stop();
        ch.flag(Interrupts::TERR);
    }

    /// Abort channel `id` with a CRC mismatch.
    pub(crate) fn inject_crc_error(&self, id: u8) {
        self.inject_transfer_error(id);
        let ch = &self.channels[usize::from(id)];
        ch.status.set(ch.status.get() | chstatus::CRCERR);
    }

    fn channel(&self, id: u8) -> Option<&SimChannel> {
        self.channels.get(usize::from(id))
    }

    fn release(&self, id: u8) {
        if self.active.get() == Some(id) {
            self.active.set(None);
        }
    }

    fn level_enabled(&self, level: u32) -> bool {
        self.ctrl.get() & (1 << (ctrl::LVLEN_SHIFT + level)) != 0
    }

    // Highest enabled level first, lowest channel ID within a level.
    fn arbitrate(&self) -> Option<u8> {
        (0..4u32).rev().filter(|&level| self.level_enabled(level)).find_map(|level| {
            self.channels
                .iter()
                .position(|ch| ch.level() == level && ch.status.get() & chstatus::PEND != 0)
                .map(|id| id as u8)
        })
    }

    fn fetch(&self, id: u8) {
        let ch = &self.channels[usize::from(id)];
        ch.status.set(ch.status.get() & !chstatus::PEND);

        let base = self.base.get();
        if base.is_null() {
            return;
        }
        // SAFETY: the controller points the model at storage covering every channel it hands out
        let desc = unsafe { ptr::read_volatile(base.add(usize::from(id))) };
        if !desc.is_valid() {
            ch.status.set(ch.status.get() | chstatus::FERR);
            ch.flag(Interrupts::TERR);
            ch.stop();
            return;
        }

        ch.status.set(ch.status.get() | chstatus::BUSY);
        self.active.set(Some(id));
        self.store_writeback(id, desc);
    }

    fn complete(&self, id: u8) {
        let ch = &self.channels[usize::from(id)];
        ch.status.set(ch.status.get() & !chstatus::BUSY);
        if ch.tail.get() {
            ch.stop();
            return;
        }

        let Some(mut wb) = self.load_writeback(id) else {
            ch.stop();
            return;
        };
        wb.set_block_transfer_count(0);
        self.store_writeback(id, wb);

        match wb.block_action() {
            BlockAction::NoAct => ch.stop(),
            BlockAction::Int => {
                ch.flag(Interrupts::TCMPL);
                ch.stop();
            }
            BlockAction::Suspend => {
                ch.flag(Interrupts::SUSP);
                ch.resume.set(Resume::AfterBlock);
            }
            BlockAction::Both => {
                ch.flag(Interrupts::TCMPL | Interrupts::SUSP);
                ch.resume.set(Resume::AfterBlock);
            }
        }
    }

    fn load_writeback(&self, id: u8) -> Option<TransferDescriptor> {
        let wb = self.writeback.get();
        if wb.is_null() {
            return None;
        }
        // SAFETY: see `fetch`
        Some(unsafe { ptr::read_volatile(wb.add(usize::from(id))) })
    }

    fn store_writeback(&self, id: u8, desc: TransferDescriptor) {
        let wb = self.writeback.get();
        if !wb.is_null() {
            // SAFETY: see `fetch`
            unsafe { ptr::write_volatile(wb.add(usize::from(id)), desc) }
        }
    }

    fn interrupting(&self) -> impl Iterator<Item = (u8, &SimChannel)> {
        self.channels
            .iter()
            .enumerate()
            .filter(|(_, ch)| ch.intflag.get() & ch.inten.get() != 0)
            .map(|(id, ch)| (id as u8, ch))
    }

    fn channel_mask(&self, f: impl Fn(&SimChannel) -> bool) -> u32 {
        self.channels
            .iter()
            .enumerate()
            .filter(|(_, ch)| f(ch))
            .fold(0, |mask, (id, _)| mask | 1 << id)
    }

    fn read_intpend(&self) -> u32 {
        let Some((id, ch)) = self.interrupting().next() else {
            return 0;
        };
        let status = ch.status.get();
        let mut value = u32::from(id) | (ch.intflag.get() << intpend::FLAGS_SHIFT);
        if status & chstatus::FERR != 0 {
            value |= intpend::FERR;
        }
        if status & chstatus::BUSY != 0 {
            value |= intpend::BUSY;
        }
        if status & chstatus::PEND != 0 {
            value |= intpend::PEND;
        }
        value
    }

    fn read_active(&self) -> u32 {
        let mut value = 0;
        for ch in &self.channels {
            if ch.status.get() & chstatus::PEND != 0 && self.level_enabled(ch.level()) {
                value |= 1 << ch.level();
            }
        }
        if let Some(id) = self.active.get() {
            value |= u32::from(id) << active::ID_SHIFT;
            value |= active::ABUSY;
            let btcnt = self.load_writeback(id).map_or(0, |d| d.block_transfer_count());
            value |= u32::from(btcnt) << active::BTCNT_SHIFT;
        }
        value
    }

    fn write_ctrl(&self, value: u32) {
        if value & ctrl::SWRST != 0 {
            self.ctrl.set(0);
            self.crcctrl.set(0);
            self.crcchksum.set(0);
            self.dbgctrl.set(0);
            self.qosctrl.set(0x2A);
            self.prictrl0.set(0);
            self.active.set(None);
            for ch in &self.channels {
                ch.reset();
            }
            return;
        }
        let was_enabled = self.ctrl.get() & ctrl::DMAENABLE != 0;
        self.ctrl.set(value & 0x0F07);
        if was_enabled && value & ctrl::DMAENABLE == 0 {
            self.active.set(None);
            for ch in &self.channels {
                ch.stop();
            }
        }
    }

    fn software_trigger(&self, mask: u32) {
        if self.ctrl.get() & ctrl::DMAENABLE == 0 {
            return;
        }
        for (id, ch) in self.channels.iter().enumerate() {
            let idle = ch.status.get() & (chstatus::PEND | chstatus::BUSY) == 0;
            if mask & (1 << id) != 0 && ch.enabled() && idle && ch.resume.get() == Resume::None {
                ch.status.set(ch.status.get() | chstatus::PEND);
            }
        }
    }

    fn feed_crc(&self, data: u32) {
        let crcctrl = self.crcctrl.get();
        let source = (crcctrl >> crcctrl::CRCSRC_SHIFT) & crcctrl::CRCSRC_MASK;
        if self.ctrl.get() & ctrl::CRCENABLE == 0 || source != crcctrl::CRCSRC_IO {
            return;
        }
        let beats = match (crcctrl >> crcctrl::CRCBEATSIZE_SHIFT) & crcctrl::CRCBEATSIZE_MASK {
            0 => 1,
            1 => 2,
            _ => 4,
        };
        let crc32 = (crcctrl >> crcctrl::CRCPOLY_SHIFT) & crcctrl::CRCPOLY_MASK == 1;

        let mut crc = self.crcchksum.get();
        for byte in data.to_le_bytes().into_iter().take(beats) {
            crc = if crc32 { crc32_byte(crc, byte) } else { crc16_byte(crc, byte) };
        }
        self.crcchksum.set(crc);
    }

    fn write_channel_ctrla(&self, id: u8, ch: &SimChannel, value: u32) {
        if value & chctrla::SWRST != 0 {
            self.release(id);
            ch.reset();
            return;
        }
        ch.ctrla.set(value & (chctrla::ENABLE | chctrla::RUNSTDBY));
        if value & chctrla::ENABLE == 0 {
            self.release(id);
            ch.stop();
        }
    }

    fn write_channel_ctrlb(&self, id: u8, ch: &SimChannel, value: u32) {
        let cmd = (value >> chctrlb::CMD_SHIFT) & chctrlb::CMD_MASK;
        ch.ctrlb.set(value & !(chctrlb::CMD_MASK << chctrlb::CMD_SHIFT));
        if !ch.enabled() {
            return;
        }

        match cmd {
            chctrlb::CMD_SUSPEND if ch.resume.get() == Resume::None => {
                let running = ch.status.get() & (chstatus::PEND | chstatus::BUSY);
                ch.status.set(ch.status.get() & !running);
                self.release(id);
                ch.resume.set(Resume::Continue(running));
                ch.flag(Interrupts::SUSP);
            }
            chctrlb::CMD_RESUME => match ch.resume.replace(Resume::None) {
                Resume::Continue(running) => self.restart(id, ch, running),
                Resume::AfterBlock => {
                    ch.tail.set(true);
                    self.restart(id, ch, chstatus::BUSY);
                }
                Resume::None => {}
            },
            _ => {}
        }
    }

    fn restart(&self, id: u8, ch: &SimChannel, running: u32) {
        if running & chstatus::BUSY != 0 && self.active.get().is_none() {
            self.active.set(Some(id));
            ch.status.set(ch.status.get() | chstatus::BUSY);
        } else if running != 0 {
            ch.status.set(ch.status.get() | chstatus::PEND);
        }
    }
}

impl Registers for SimDmac {
    fn read(&self, reg: Reg) -> u32 {
        match reg {
            Reg::Ctrl => self.ctrl.get(),
            Reg::CrcCtrl => self.crcctrl.get(),
            Reg::CrcDataIn | Reg::SwTrigCtrl => 0,
            Reg::CrcChksum => self.crcchksum.get(),
            Reg::CrcStatus => {
                if self.crcchksum.get() == 0 {
                    crcstatus::CRCZERO
                } else {
                    0
                }
            }
            Reg::DbgCtrl => self.dbgctrl.get(),
            Reg::QosCtrl => self.qosctrl.get(),
            Reg::PriCtrl0 => self.prictrl0.get(),
            Reg::IntPend => self.read_intpend(),
            Reg::IntStatus => self.interrupting().fold(0, |mask, (id, _)| mask | 1 << id),
            Reg::BusyCh => self.channel_mask(|ch| ch.status.get() & chstatus::BUSY != 0),
            Reg::PendCh => self.channel_mask(|ch| ch.status.get() & chstatus::PEND != 0),
            Reg::Active => self.read_active(),
        }
    }

    fn write(&self, reg: Reg, value: u32) {
        match reg {
            Reg::Ctrl => self.write_ctrl(value),
            Reg::CrcCtrl => self.crcctrl.set(value & 0x3F0F),
            Reg::CrcDataIn => self.feed_crc(value),
            Reg::CrcChksum => self.crcchksum.set(value),
            Reg::DbgCtrl => self.dbgctrl.set(value & 0x1),
            Reg::QosCtrl => self.qosctrl.set(value & 0x3F),
            Reg::PriCtrl0 => self.prictrl0.set(value),
            Reg::SwTrigCtrl => self.software_trigger(value),
            Reg::IntPend => {
                let id = (value & intpend::ID_MASK) as u8;
                if let Some(ch) = self.channel(id) {
                    ch.intflag.set(ch.intflag.get() & !((value >> intpend::FLAGS_SHIFT) & 0x7));
                }
            }
            Reg::CrcStatus | Reg::IntStatus | Reg::BusyCh | Reg::PendCh | Reg::Active => {}
        }
    }

    fn read_channel(&self, id: u8, reg: ChannelReg) -> u32 {
        let Some(ch) = self.channel(id) else {
            return 0;
        };
        match reg {
            ChannelReg::CtrlA => ch.ctrla.get(),
            ChannelReg::CtrlB => ch.ctrlb.get(),
            ChannelReg::IntEnClr | ChannelReg::IntEnSet => ch.inten.get(),
            ChannelReg::IntFlag => ch.intflag.get(),
            ChannelReg::Status => ch.status.get(),
        }
    }

    fn write_channel(&self, id: u8, reg: ChannelReg, value: u32) {
        let Some(ch) = self.channel(id) else {
            return;
        };
        match reg {
            ChannelReg::CtrlA => self.write_channel_ctrla(id, ch, value),
            ChannelReg::CtrlB => self.write_channel_ctrlb(id, ch, value),
            ChannelReg::IntEnClr => ch.inten.set(ch.inten.get() & !value),
            ChannelReg::IntEnSet => ch.inten.set((ch.inten.get() | value) & 0x7),
            ChannelReg::IntFlag => ch.intflag.set(ch.intflag.get() & !value),
            ChannelReg::Status => {}
        }
    }

    fn set_descriptor_memory(&self, base: *mut TransferDescriptor, writeback: *mut TransferDescriptor) {
        self.base.set(base);
        self.writeback.set(writeback);
    }
}

fn crc16_byte(crc: u32, byte: u8) -> u32 {
    let mut crc = (crc ^ (u32::from(byte) << 8)) & 0xFFFF;
    for _ in 0..8 {
        crc = if crc & 0x8000 != 0 { (crc << 1) ^ 0x1021 } else { crc << 1 };
        crc &= 0xFFFF;
    }
    crc
}

fn crc32_byte(crc: u32, byte: u8) -> u32 {
    let mut crc = crc ^ u32::from(byte);
    for _ in 0..8 {
        crc = if crc & 1 != 0 { (crc >> 1) ^ 0xEDB8_8320 } else { crc >> 1 };
    }
    crc
}
