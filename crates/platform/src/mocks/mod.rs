//! Mock implementations for testing
//!
//! Every mock appends to one shared [`EventLog`], so a test can assert the
//! global order of hardware interactions across peripherals (for example that
//! the XSPI clock-domain reset happens before the pins go inert).
//!
//! [`MockXspi`] models enough of the controller to exercise the real driver
//! code: EN/ABORT/FMODE in CR, the IR/AR command trigger, TCF/CTCF and
//! TEF/CTEF, a BUSY flag tests can force or hold across an abort, and dropped
//! writes while the clock is gated or the block is held in reset.

#![cfg(any(test, feature = "std"))]

use std::cell::RefCell;
use std::rc::Rc;

use embedded_hal::delay::DelayNs;

use crate::gpio::{GpioPort, PinDeinit, PinMask, PinMux};
use crate::mpu::MpuRegisters;
use crate::rcc::ResetAndClockControl;
use crate::system::{CacheControl, SystemControl};
use crate::xspi::bits::{
    CCR_ADMODE_MASK, CR_ABORT, CR_EN, CR_FMODE_MASK, CR_FMODE_SHIFT, FCR_CTCF, FCR_CTEF,
    FMODE_MEMORY_MAPPED, SR_BUSY, SR_TCF, SR_TEF,
};
use crate::xspi::{XspiInstance, XspiReg, XspiRegisters};

/// One observable hardware interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HwEvent {
    /// CR.EN went from 0 to 1.
    XspiEnabled(XspiInstance),
    /// CR.EN went from 1 to 0.
    XspiDisabled(XspiInstance),
    /// CR.ABORT written.
    XspiAborted(XspiInstance),
    /// FMODE switched to memory-mapped.
    XspiMemoryMapped(XspiInstance),
    /// An indirect command went out on the bus.
    XspiCommand {
        /// Controller.
        instance: XspiInstance,
        /// IR value.
        instruction: u32,
        /// CCR value.
        ccr: u32,
        /// AR value when the command has an address phase.
        address: Option<u32>,
    },
    /// Controller clock ungated.
    XspiClockEnabled(XspiInstance),
    /// Controller clock gated.
    XspiClockDisabled(XspiInstance),
    /// Controller held in reset.
    XspiResetAsserted(XspiInstance),
    /// Controller released from reset.
    XspiResetReleased(XspiInstance),
    /// GPIO port clock ungated.
    PortClockEnabled(GpioPort),
    /// Pins handed to an alternate function.
    PinsAlternate {
        /// Port.
        port: GpioPort,
        /// Pins.
        pins: PinMask,
        /// Alternate function number.
        af: u8,
    },
    /// Pins returned to analog mode.
    PinsDeinit {
        /// Port.
        port: GpioPort,
        /// Pins.
        pins: PinMask,
    },
    /// Busy-wait.
    Delay {
        /// Requested duration.
        ns: u32,
    },
    /// PRIMASK set.
    InterruptsDisabled,
    /// System reset requested.
    SystemReset,
    /// I-cache enabled.
    ICacheEnabled,
    /// D-cache enabled.
    DCacheEnabled,
    /// MPU_CTRL cleared.
    MpuDisabled,
    /// RBAR/RLAR pair written.
    MpuRegion {
        /// RNR.
        slot: u8,
        /// RBAR.
        rbar: u32,
        /// RLAR.
        rlar: u32,
    },
    /// MAIR byte written.
    MpuAttribute {
        /// AttrIndx.
        index: u8,
        /// MAIR encoding.
        encoding: u8,
    },
    /// MPU_CTRL written.
    MpuEnabled {
        /// MPU_CTRL value.
        ctrl: u32,
    },
}

/// Shared, ordered record of hardware interactions.
pub type EventLog = Rc<RefCell<Vec<HwEvent>>>;

/// Create an empty event log.
pub fn new_event_log() -> EventLog {
    Rc::new(RefCell::new(Vec::new()))
}

fn record(log: &EventLog, event: HwEvent) {
    log.borrow_mut().push(event);
}

// ─── XSPI ────────────────────────────────────────────────────────────────────

struct XspiState {
    regs: [u32; XspiReg::ALL.len()],
    clocked: bool,
    held_in_reset: bool,
    busy: bool,
    busy_reads: u32,
    fail_next: bool,
}

impl XspiState {
    fn get(&self, reg: XspiReg) -> u32 {
        self.regs.get(reg as usize).copied().unwrap_or(0)
    }

    fn set(&mut self, reg: XspiReg, value: u32) {
        if let Some(slot) = self.regs.get_mut(reg as usize) {
            *slot = value;
        }
    }

    fn accepts_commands(&self) -> bool {
        let cr = self.get(XspiReg::Cr);
        cr & CR_EN != 0 && cr & CR_FMODE_MASK == 0
    }
}

/// Register file of one XSPI controller.
///
/// Clones share state, so a test can keep a handle for inspection while the
/// driver owns another.
#[derive(Clone)]
pub struct MockXspi {
    instance: XspiInstance,
    state: Rc<RefCell<XspiState>>,
    log: EventLog,
}

impl MockXspi {
    /// Controller with every register at its reset value and the clock on.
    pub fn new(instance: XspiInstance, log: EventLog) -> Self {
        Self {
            instance,
            state: Rc::new(RefCell::new(XspiState {
                regs: [0; XspiReg::ALL.len()],
                clocked: true,
                held_in_reset: false,
                busy: false,
                busy_reads: 0,
                fail_next: false,
            })),
            log,
        }
    }

    /// Controller instance.
    pub fn instance(&self) -> XspiInstance {
        self.instance
    }

    /// Read a register without side effects.
    pub fn peek(&self, reg: XspiReg) -> u32 {
        self.state.borrow().get(reg)
    }

    /// Write a register without side effects or logging.
    pub fn poke(&self, reg: XspiReg, value: u32) {
        self.state.borrow_mut().set(reg, value);
    }

    /// Force SR.BUSY. Cleared again by an abort.
    pub fn set_busy(&self, busy: bool) {
        self.state.borrow_mut().busy = busy;
    }

    /// Report SR.BUSY for the next `reads` status reads. Unlike [`set_busy`],
    /// this survives an abort, like a transfer that is still draining.
    ///
    /// [`set_busy`]: Self::set_busy
    pub fn hold_busy_for_reads(&self, reads: u32) {
        self.state.borrow_mut().busy_reads = reads;
    }

    /// Status reads left before a [`hold_busy_for_reads`] window ends.
    ///
    /// [`hold_busy_for_reads`]: Self::hold_busy_for_reads
    pub fn pending_busy_reads(&self) -> u32 {
        self.state.borrow().busy_reads
    }

    /// End the next command with SR.TEF instead of SR.TCF.
    pub fn fail_next_transfer(&self) {
        self.state.borrow_mut().fail_next = true;
    }

    /// Snapshot of the shared event log.
    pub fn events(&self) -> Vec<HwEvent> {
        self.log.borrow().clone()
    }

    /// True when every register holds its reset value.
    pub fn is_at_reset_values(&self) -> bool {
        self.state.borrow().regs.iter().all(|&r| r == 0)
    }

    /// True while the controller clock is ungated.
    pub fn is_clocked(&self) -> bool {
        self.state.borrow().clocked
    }

    /// True while the controller is held in reset.
    pub fn is_held_in_reset(&self) -> bool {
        self.state.borrow().held_in_reset
    }

    fn write_cr(&self, state: &mut XspiState, value: u32) {
        let old = state.get(XspiReg::Cr);
        let mut new = value;
        if new & CR_ABORT != 0 {
            record(&self.log, HwEvent::XspiAborted(self.instance));
            new &= !CR_ABORT;
            state.busy = false;
        }
        if old & CR_EN == 0 && new & CR_EN != 0 {
            record(&self.log, HwEvent::XspiEnabled(self.instance));
        }
        if old & CR_EN != 0 && new & CR_EN == 0 {
            record(&self.log, HwEvent::XspiDisabled(self.instance));
        }
        let mapped = |cr: u32| (cr & CR_FMODE_MASK) >> CR_FMODE_SHIFT == FMODE_MEMORY_MAPPED;
        if new & CR_EN != 0 && mapped(new) && !mapped(old) {
            record(&self.log, HwEvent::XspiMemoryMapped(self.instance));
        }
        state.set(XspiReg::Cr, new);
    }

    fn fire_command(&self, state: &mut XspiState, address: Option<u32>) {
        record(
            &self.log,
            HwEvent::XspiCommand {
                instance: self.instance,
                instruction: state.get(XspiReg::Ir),
                ccr: state.get(XspiReg::Ccr),
                address,
            },
        );
        let flag = if state.fail_next { SR_TEF } else { SR_TCF };
        state.fail_next = false;
        let sr = state.get(XspiReg::Sr);
        state.set(XspiReg::Sr, sr | flag);
    }
}

impl XspiRegisters for MockXspi {
    fn read(&self, reg: XspiReg) -> u32 {
        let mut state = self.state.borrow_mut();
        match reg {
            XspiReg::Sr if state.busy_reads > 0 => {
                state.busy_reads = state.busy_reads.saturating_sub(1);
                state.get(reg) | SR_BUSY
            }
            XspiReg::Sr if state.busy => state.get(reg) | SR_BUSY,
            _ => state.get(reg),
        }
    }

    fn write(&mut self, reg: XspiReg, value: u32) {
        let mut state = self.state.borrow_mut();
        if !state.clocked || state.held_in_reset {
            return;
        }
        match reg {
            XspiReg::Cr => self.write_cr(&mut *state, value),
            XspiReg::Sr => {}
            XspiReg::Fcr => {
                let mut clear = 0;
                if value & FCR_CTCF != 0 {
                    clear |= SR_TCF;
                }
                if value & FCR_CTEF != 0 {
                    clear |= SR_TEF;
                }
                let sr = state.get(XspiReg::Sr);
                state.set(XspiReg::Sr, sr & !clear);
            }
            XspiReg::Ir => {
                state.set(reg, value);
                if state.accepts_commands() && state.get(XspiReg::Ccr) & CCR_ADMODE_MASK == 0 {
                    self.fire_command(&mut *state, None);
                }
            }
            XspiReg::Ar => {
                state.set(reg, value);
                if state.accepts_commands() && state.get(XspiReg::Ccr) & CCR_ADMODE_MASK != 0 {
                    self.fire_command(&mut *state, Some(value));
                }
            }
            _ => state.set(reg, value),
        }
    }
}

// ─── RCC ─────────────────────────────────────────────────────────────────────

/// Reset and clock control wired to the mock controllers.
pub struct MockRcc {
    log: EventLog,
    controllers: Vec<MockXspi>,
    port_clocks: Vec<GpioPort>,
}

impl MockRcc {
    /// RCC with no controllers attached.
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            controllers: Vec::new(),
            port_clocks: Vec::new(),
        }
    }

    /// Route clock and reset control for `xspi`'s instance to it.
    pub fn attach(&mut self, xspi: &MockXspi) {
        self.controllers.push(xspi.clone());
    }

    /// True if `port`'s clock was ever enabled.
    pub fn port_clock_enabled(&self, port: GpioPort) -> bool {
        self.port_clocks.contains(&port)
    }

    fn with_controller(&self, instance: XspiInstance, f: impl FnOnce(&mut XspiState)) {
        if let Some(xspi) = self.controllers.iter().find(|x| x.instance == instance) {
            f(&mut *xspi.state.borrow_mut());
        }
    }
}

impl ResetAndClockControl for MockRcc {
    fn enable_xspi_clock(&mut self, instance: XspiInstance) {
        record(&self.log, HwEvent::XspiClockEnabled(instance));
        self.with_controller(instance, |s| s.clocked = true);
    }

    fn disable_xspi_clock(&mut self, instance: XspiInstance) {
        record(&self.log, HwEvent::XspiClockDisabled(instance));
        self.with_controller(instance, |s| s.clocked = false);
    }

    fn enable_port_clock(&mut self, port: GpioPort) {
        record(&self.log, HwEvent::PortClockEnabled(port));
        if !self.port_clocks.contains(&port) {
            self.port_clocks.push(port);
        }
    }

    fn assert_xspi_reset(&mut self, instance: XspiInstance) {
        record(&self.log, HwEvent::XspiResetAsserted(instance));
        self.with_controller(instance, |s| {
            s.regs = [0; XspiReg::ALL.len()];
            s.busy = false;
            s.busy_reads = 0;
            s.held_in_reset = true;
        });
    }

    fn release_xspi_reset(&mut self, instance: XspiInstance) {
        record(&self.log, HwEvent::XspiResetReleased(instance));
        self.with_controller(instance, |s| s.held_in_reset = false);
    }
}

// ─── GPIO ────────────────────────────────────────────────────────────────────

/// Records pin ownership changes.
pub struct MockPins {
    log: EventLog,
    inert: Vec<(GpioPort, PinMask)>,
    alternate: Vec<(GpioPort, PinMask, u8)>,
}

impl MockPins {
    /// No pins de-initialized yet.
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            inert: Vec::new(),
            alternate: Vec::new(),
        }
    }

    /// Pins of `port` currently routed to alternate function `af`.
    pub fn alternate_pins(&self, port: GpioPort, af: u8) -> PinMask {
        let inert = self.inert_pins(port).bits();
        let bits = self
            .alternate
            .iter()
            .filter(|(p, _, a)| *p == port && *a == af)
            .fold(0u16, |acc, (_, pins, _)| acc | pins.bits());
        PinMask::from_bits(bits & !inert)
    }

    /// Every pin of `port` that has been de-initialized.
    pub fn inert_pins(&self, port: GpioPort) -> PinMask {
        let bits = self
            .inert
            .iter()
            .filter(|(p, _)| *p == port)
            .fold(0u16, |acc, (_, pins)| acc | pins.bits());
        PinMask::from_bits(bits)
    }
}

impl PinDeinit for MockPins {
    fn deinit_pins(&mut self, port: GpioPort, pins: PinMask) {
        record(&self.log, HwEvent::PinsDeinit { port, pins });
        self.inert.push((port, pins));
    }
}

impl PinMux for MockPins {
    fn set_alternate(&mut self, port: GpioPort, pins: PinMask, af: u8) {
        record(&self.log, HwEvent::PinsAlternate { port, pins, af });
        for (p, inert) in &mut self.inert {
            if *p == port {
                *inert = PinMask::from_bits(inert.bits() & !pins.bits());
            }
        }
        self.inert.retain(|(_, inert)| !inert.is_empty());
        self.alternate.push((port, pins, af));
    }
}

// ─── Delay ───────────────────────────────────────────────────────────────────

/// Delay that records the requested duration instead of waiting.
pub struct MockDelay {
    log: EventLog,
}

impl MockDelay {
    /// Delay logging to `log`.
    pub fn new(log: EventLog) -> Self {
        Self { log }
    }
}

impl DelayNs for MockDelay {
    fn delay_ns(&mut self, ns: u32) {
        record(&self.log, HwEvent::Delay { ns });
    }
}

// ─── Core ────────────────────────────────────────────────────────────────────

/// Interrupt masking, reset request and caches.
pub struct MockSystem {
    log: EventLog,
}

impl MockSystem {
    /// System logging to `log`.
    pub fn new(log: EventLog) -> Self {
        Self { log }
    }
}

impl SystemControl for MockSystem {
    fn disable_interrupts(&mut self) {
        record(&self.log, HwEvent::InterruptsDisabled);
    }

    /// Logs the request, then panics: a host test cannot reset the machine.
    #[allow(clippy::panic)]
    fn system_reset(&mut self) -> ! {
        record(&self.log, HwEvent::SystemReset);
        panic!("system reset requested");
    }
}

impl CacheControl for MockSystem {
    fn enable_icache(&mut self) {
        record(&self.log, HwEvent::ICacheEnabled);
    }

    fn enable_dcache(&mut self) {
        record(&self.log, HwEvent::DCacheEnabled);
    }
}

/// MPU register file with sixteen region slots and eight attribute slots.
pub struct MockMpu {
    log: EventLog,
    regions: [(u32, u32); 16],
    attributes: [u8; 8],
    ctrl: u32,
}

impl MockMpu {
    /// MPU in its reset state: disabled, every region cleared.
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            regions: [(0, 0); 16],
            attributes: [0; 8],
            ctrl: 0,
        }
    }

    /// Current MPU_CTRL value.
    pub fn ctrl(&self) -> u32 {
        self.ctrl
    }
}

impl MpuRegisters for MockMpu {
    fn disable(&mut self) {
        record(&self.log, HwEvent::MpuDisabled);
        self.ctrl = 0;
    }

    fn write_region(&mut self, slot: u8, rbar: u32, rlar: u32) {
        record(&self.log, HwEvent::MpuRegion { slot, rbar, rlar });
        if let Some(entry) = self.regions.get_mut(usize::from(slot)) {
            *entry = (rbar, rlar);
        }
    }

    fn write_attribute(&mut self, index: u8, encoding: u8) {
        record(&self.log, HwEvent::MpuAttribute { index, encoding });
        if let Some(entry) = self.attributes.get_mut(usize::from(index)) {
            *entry = encoding;
        }
    }

    fn enable(&mut self, ctrl: u32) {
        record(&self.log, HwEvent::MpuEnabled { ctrl });
        self.ctrl = ctrl;
    }

    fn read_region(&self, slot: u8) -> (u32, u32) {
        self.regions.get(usize::from(slot)).copied().unwrap_or((0, 0))
    }

    fn read_attribute(&self, index: u8) -> u8 {
        self.attributes.get(usize::from(index)).copied().unwrap_or(0)
    }
}

// ─── Board ───────────────────────────────────────────────────────────────────

/// Every mock peripheral of the boot stage on one shared log.
///
/// The RCC is wired to both XSPI controllers, so clock gating and resets act
/// on their register files.
pub struct MockBoard {
    /// Shared event log.
    pub log: EventLog,
    /// XSPI1 register file.
    pub psram: MockXspi,
    /// XSPI2 register file.
    pub flash: MockXspi,
    /// RCC.
    pub rcc: MockRcc,
    /// GPIO de-initialization.
    pub pins: MockPins,
    /// Busy-wait.
    pub delay: MockDelay,
    /// Core system control and caches.
    pub system: MockSystem,
    /// MPU.
    pub mpu: MockMpu,
}

impl MockBoard {
    /// Fresh board: controllers clocked at reset values, MPU disabled.
    pub fn new() -> Self {
        let log = new_event_log();
        let psram = MockXspi::new(XspiInstance::Xspi1, log.clone());
        let flash = MockXspi::new(XspiInstance::Xspi2, log.clone());
        let mut rcc = MockRcc::new(log.clone());
        rcc.attach(&psram);
        rcc.attach(&flash);
        Self {
            pins: MockPins::new(log.clone()),
            delay: MockDelay::new(log.clone()),
            system: MockSystem::new(log.clone()),
            mpu: MockMpu::new(log.clone()),
            psram,
            flash,
            rcc,
            log,
        }
    }

    /// Snapshot of the event log.
    pub fn events(&self) -> Vec<HwEvent> {
        self.log.borrow().clone()
    }

    /// Forget everything logged so far.
    pub fn clear_events(&self) {
        self.log.borrow_mut().clear();
    }
}

impl Default for MockBoard {
    fn default() -> Self {
        Self::new()
    }
}
