//! PSRAM bus teardown typestate machine.
//!
//! Returns the PSRAM and its XSPI controller to a fully de-asserted state so
//! that a warm reset re-enters the boot ROM with nothing driving the bus:
//!
//! ```text
//! [Start] --enable_clocks()--> [Clocked] --enable_controller()--> [Enabled]
//!   --enter_indirect_mode()--> [Indirect] --reset_psram()--> [PsramReset]
//!   --disable_controller()--> [Disabled] --reset_clock_domain()--> [DomainReset]
//!   --deinit_pins()--> [PinsInert] --gate_clock()--> [ClockGated]
//! ```
//!
//! ## Why this order:
//! - The controller drops register writes while its clock is gated, so the
//!   clocks come first even if an earlier shutdown already gated them.
//! - EN is set again because a previous shutdown may have cleared it; without
//!   it the reset command is never sent.
//! - The boot ROM hangs on warm reset if XSPI1 is left memory-mapped, hence
//!   the explicit abort before anything else talks to the PSRAM.
//! - The RCC force-reset returns every controller register to its reset
//!   value. Pins go inert only afterwards so the controller never drives a
//!   floating bus, and the clock is gated last.
//!
//! None of the steps can fail observably. The PSRAM reset is the only step
//! with a result; it is kept in the sequencer for the caller to inspect.

use core::marker::PhantomData;

use embedded_hal::delay::DelayNs;

use crate::board::BusWiring;
use crate::gpio::PinDeinit;
use crate::psram::{self, PsramState};
use crate::rcc::ResetAndClockControl;
use crate::system::SystemControl;
use crate::xspi::XspiPort;

/// Step names in execution order, for logs and ordering tests.
pub const SHUTDOWN_STEPS: &[&str] = &[
    "enable_clocks",
    "enable_controller",
    "enter_indirect_mode",
    "reset_psram",
    "disable_controller",
    "reset_clock_domain",
    "deinit_pins",
    "gate_clock",
];

// ── State types (zero-sized) ──────────────────────────────────────────────────

/// Nothing done yet; controller state unknown.
pub struct Start;
/// Controller and pin-bank clocks running.
pub struct Clocked;
/// CR.EN set.
pub struct Enabled;
/// Any memory-mapped session aborted; indirect write mode selected.
pub struct Indirect;
/// Global reset sent and tRST elapsed (or the attempt recorded as failed).
pub struct PsramReset;
/// CR.EN cleared.
pub struct Disabled;
/// Clock domain pulsed through reset; registers at reset values.
pub struct DomainReset;
/// Bus pins analog, no pull, no alternate function.
pub struct PinsInert;
/// Controller clock gated. Terminal state.
pub struct ClockGated;

// ── Sequencer ────────────────────────────────────────────────────────────────

/// Typestate machine for the PSRAM bus teardown.
///
/// Each method performs one step on the hardware passed to it and returns
/// the sequencer in the next state. Skipping or reordering steps is a compile
/// error.
pub struct ShutdownSequencer<State> {
    psram: PsramState,
    _state: PhantomData<State>,
}

impl<State> ShutdownSequencer<State> {
    fn advance<Next>(self) -> ShutdownSequencer<Next> {
        ShutdownSequencer {
            psram: self.psram,
            _state: PhantomData,
        }
    }

    /// What is known about the PSRAM at this point of the teardown.
    pub fn psram_state(&self) -> PsramState {
        self.psram
    }
}

impl ShutdownSequencer<Start> {
    /// Create a sequencer. The PSRAM is assumed to hold arbitrary state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            psram: PsramState::PoweredUnknown,
            _state: PhantomData,
        }
    }

    /// Ungate the controller clock and every pin-bank clock the bus uses.
    #[must_use]
    pub fn enable_clocks<P, C>(
        self,
        port: &P,
        rcc: &mut C,
        wiring: &BusWiring,
    ) -> ShutdownSequencer<Clocked>
    where
        P: XspiPort + ?Sized,
        C: ResetAndClockControl + ?Sized,
    {
        rcc.enable_xspi_clock(port.instance());
        for bank in wiring.banks {
            rcc.enable_port_clock(bank.port);
        }
        self.advance()
    }
}

impl Default for ShutdownSequencer<Start> {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSequencer<Clocked> {
    /// Set CR.EN, undoing a previous shutdown's disable.
    #[must_use]
    pub fn enable_controller<P: XspiPort + ?Sized>(self, port: &mut P) -> ShutdownSequencer<Enabled> {
        port.enable();
        self.advance()
    }
}

impl ShutdownSequencer<Enabled> {
    /// Abort any memory-mapped session and select indirect write mode.
    #[must_use]
    pub fn enter_indirect_mode<P: XspiPort + ?Sized>(
        self,
        port: &mut P,
    ) -> ShutdownSequencer<Indirect> {
        port.enter_indirect_mode();
        self.advance()
    }
}

impl ShutdownSequencer<Indirect> {
    /// Run the PSRAM global reset protocol.
    ///
    /// A rejected reset is recorded as [`PsramState::PoweredUnknown`] and the
    /// teardown carries on: the remaining steps still quiesce the bus.
    #[must_use]
    pub fn reset_psram<P, D>(mut self, port: &mut P, delay: &mut D) -> ShutdownSequencer<PsramReset>
    where
        P: XspiPort + ?Sized,
        D: DelayNs + ?Sized,
    {
        self.psram = match psram::global_reset(port, delay) {
            Ok(state) => state,
            Err(_e) => {
                #[cfg(feature = "defmt")]
                defmt::warn!("PSRAM reset rejected during shutdown: {}", _e);
                PsramState::PoweredUnknown
            }
        };
        self.advance()
    }
}

impl ShutdownSequencer<PsramReset> {
    /// Clear CR.EN.
    #[must_use]
    pub fn disable_controller<P: XspiPort + ?Sized>(
        self,
        port: &mut P,
    ) -> ShutdownSequencer<Disabled> {
        port.disable();
        self.advance()
    }
}

impl ShutdownSequencer<Disabled> {
    /// Pulse the controller's clock domain through reset.
    #[must_use]
    pub fn reset_clock_domain<P, C>(self, port: &P, rcc: &mut C) -> ShutdownSequencer<DomainReset>
    where
        P: XspiPort + ?Sized,
        C: ResetAndClockControl + ?Sized,
    {
        rcc.assert_xspi_reset(port.instance());
        rcc.release_xspi_reset(port.instance());
        self.advance()
    }
}

impl ShutdownSequencer<DomainReset> {
    /// Return every bus pin to analog, no pull, no alternate function.
    #[must_use]
    pub fn deinit_pins<G: PinDeinit + ?Sized>(
        self,
        pins: &mut G,
        wiring: &BusWiring,
    ) -> ShutdownSequencer<PinsInert> {
        for bank in wiring.banks {
            pins.deinit_pins(bank.port, bank.pins);
        }
        self.advance()
    }
}

impl ShutdownSequencer<PinsInert> {
    /// Gate the controller clock. Pin-bank clocks stay on; other peripherals
    /// may share those ports.
    #[must_use]
    pub fn gate_clock<P, C>(self, port: &P, rcc: &mut C) -> ShutdownSequencer<ClockGated>
    where
        P: XspiPort + ?Sized,
        C: ResetAndClockControl + ?Sized,
    {
        rcc.disable_xspi_clock(port.instance());
        self.advance()
    }
}

/// Run the full teardown of one PSRAM bus.
///
/// Works from any controller state, including a bus that was already shut
/// down. Returns what is known about the PSRAM afterwards.
pub fn shutdown<P, C, G, D>(
    port: &mut P,
    rcc: &mut C,
    pins: &mut G,
    delay: &mut D,
    wiring: &BusWiring,
) -> PsramState
where
    P: XspiPort + ?Sized,
    C: ResetAndClockControl + ?Sized,
    G: PinDeinit + ?Sized,
    D: DelayNs + ?Sized,
{
    #[cfg(feature = "defmt")]
    defmt::debug!("{}: shutdown ({} steps)", port.instance().name(), SHUTDOWN_STEPS.len());

    let done = ShutdownSequencer::new()
        .enable_clocks(port, rcc, wiring)
        .enable_controller(port)
        .enter_indirect_mode(port)
        .reset_psram(port, delay)
        .disable_controller(port)
        .reset_clock_domain(port, rcc)
        .deinit_pins(pins, wiring)
        .gate_clock(port, rcc);

    #[cfg(feature = "defmt")]
    defmt::debug!("{}: shutdown complete, PSRAM {}", port.instance().name(), done.psram_state());
    done.psram_state()
}

/// Mask interrupts, tear the bus down, then request a system reset.
pub fn shutdown_and_reset<P, C, G, D, S>(
    port: &mut P,
    rcc: &mut C,
    pins: &mut G,
    delay: &mut D,
    wiring: &BusWiring,
    system: &mut S,
) -> !
where
    P: XspiPort + ?Sized,
    C: ResetAndClockControl + ?Sized,
    G: PinDeinit + ?Sized,
    D: DelayNs + ?Sized,
    S: SystemControl + ?Sized,
{
    system.disable_interrupts();
    let _state = shutdown(port, rcc, pins, delay, wiring);
    #[cfg(feature = "defmt")]
    defmt::debug!("{}: PSRAM {} before system reset", port.instance().name(), _state);
    system.system_reset()
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::arithmetic_side_effects
)]
mod tests {
    use super::*;
    use crate::board::BoardProfile;
    use crate::gpio::GpioPort;
    use crate::mocks::{HwEvent, MockBoard};
    use crate::xspi::{ControllerMode, ExternalMemoryController, RawXspi, XspiInstance, XspiReg};

    #[test]
    fn step_table_has_eight_steps_in_order() {
        assert_eq!(SHUTDOWN_STEPS.len(), 8);
        assert_eq!(SHUTDOWN_STEPS.first(), Some(&"enable_clocks"));
        assert_eq!(SHUTDOWN_STEPS.last(), Some(&"gate_clock"));
        let reset = SHUTDOWN_STEPS.iter().position(|s| *s == "reset_psram").unwrap();
        let disable = SHUTDOWN_STEPS
            .iter()
            .position(|s| *s == "disable_controller")
            .unwrap();
        assert!(reset < disable);
    }

    #[test]
    fn shutdown_from_memory_mapped_mode_leaves_bus_inert() {
        let profile = BoardProfile::discovery();
        let mut board = MockBoard::new();
        let mut ctrl = ExternalMemoryController::init(
            XspiInstance::Xspi1,
            board.psram.clone(),
            &profile.psram.init,
        )
        .unwrap();
        ctrl.enable_memory_mapped(&profile.psram.mapped_read, &profile.psram.mapped_write)
            .unwrap();
        board.clear_events();

        let state = shutdown(
            &mut ctrl,
            &mut board.rcc,
            &mut board.pins,
            &mut board.delay,
            &profile.psram.wiring,
        );

        assert_eq!(state, PsramState::ResetStable);
        assert_eq!(ctrl.mode(), ControllerMode::Disabled);
        assert!(board.psram.is_at_reset_values());
        assert!(!board.psram.is_clocked());
        assert_eq!(
            board.pins.inert_pins(GpioPort::P).bits(),
            0xFFFF,
            "all sixteen data lines"
        );
        assert_eq!(board.pins.inert_pins(GpioPort::O).bits(), 0b1_1101);
    }

    #[test]
    fn shutdown_events_follow_step_order() {
        let profile = BoardProfile::custom();
        let mut board = MockBoard::new();
        let mut raw = RawXspi::new(XspiInstance::Xspi1, board.psram.clone());

        shutdown(
            &mut raw,
            &mut board.rcc,
            &mut board.pins,
            &mut board.delay,
            &profile.psram.wiring,
        );

        let events = board.events();
        let pos = |wanted: &HwEvent| {
            events
                .iter()
                .position(|e| e == wanted)
                .unwrap_or_else(|| panic!("missing {wanted:?} in {events:?}"))
        };
        let clock_on = pos(&HwEvent::XspiClockEnabled(XspiInstance::Xspi1));
        let port_o = pos(&HwEvent::PortClockEnabled(GpioPort::O));
        let port_p = pos(&HwEvent::PortClockEnabled(GpioPort::P));
        let enable = pos(&HwEvent::XspiEnabled(XspiInstance::Xspi1));
        let abort = pos(&HwEvent::XspiAborted(XspiInstance::Xspi1));
        let reset_cmd = events
            .iter()
            .position(|e| matches!(e, HwEvent::XspiCommand { instruction: 0xFF, .. }))
            .unwrap();
        let settle = events
            .iter()
            .position(|e| matches!(e, HwEvent::Delay { ns } if *ns >= 2_000))
            .unwrap();
        let disable = pos(&HwEvent::XspiDisabled(XspiInstance::Xspi1));
        let assert_rst = pos(&HwEvent::XspiResetAsserted(XspiInstance::Xspi1));
        let release_rst = pos(&HwEvent::XspiResetReleased(XspiInstance::Xspi1));
        let pins_p = events
            .iter()
            .position(|e| matches!(e, HwEvent::PinsDeinit { port: GpioPort::P, .. }))
            .unwrap();
        let pins_o = events
            .iter()
            .position(|e| matches!(e, HwEvent::PinsDeinit { port: GpioPort::O, .. }))
            .unwrap();
        let clock_off = pos(&HwEvent::XspiClockDisabled(XspiInstance::Xspi1));

        assert!(clock_on < enable && port_o < enable && port_p < enable);
        assert!(enable < abort);
        assert!(abort < reset_cmd);
        assert!(reset_cmd < settle);
        assert!(settle < disable);
        assert!(disable < assert_rst);
        assert!(assert_rst < release_rst);
        assert!(release_rst < pins_p && release_rst < pins_o);
        assert!(pins_p < clock_off && pins_o < clock_off);
        assert_eq!(clock_off, events.len() - 1, "clock gating is the last step");
    }

    #[test]
    fn shutdown_of_already_shut_down_bus_reaches_same_end_state() {
        let profile = BoardProfile::discovery();
        let mut board = MockBoard::new();
        let mut raw = RawXspi::new(XspiInstance::Xspi1, board.psram.clone());

        for _ in 0..2 {
            let state = shutdown(
                &mut raw,
                &mut board.rcc,
                &mut board.pins,
                &mut board.delay,
                &profile.psram.wiring,
            );
            assert_eq!(state, PsramState::ResetStable);
            assert!(board.psram.is_at_reset_values());
            assert!(!board.psram.is_clocked());
        }

        let resets = board
            .events()
            .iter()
            .filter(|e| matches!(e, HwEvent::XspiCommand { instruction: 0xFF, .. }))
            .count();
        assert_eq!(resets, 2, "the second shutdown re-clocks and re-enables the bus");
    }

    #[test]
    fn register_state_is_reset_even_after_custom_configuration() {
        let profile = BoardProfile::custom();
        let mut board = MockBoard::new();
        let mut ctrl = ExternalMemoryController::init(
            XspiInstance::Xspi1,
            board.psram.clone(),
            &profile.psram.init,
        )
        .unwrap();
        assert_ne!(board.psram.peek(XspiReg::Dcr1), 0);

        shutdown(
            &mut ctrl,
            &mut board.rcc,
            &mut board.pins,
            &mut board.delay,
            &profile.psram.wiring,
        );
        assert_eq!(board.psram.peek(XspiReg::Dcr1), 0);
        assert_eq!(board.psram.peek(XspiReg::Cr), 0);
    }

    #[test]
    #[should_panic(expected = "system reset requested")]
    fn shutdown_and_reset_masks_interrupts_first_and_resets_last() {
        let profile = BoardProfile::discovery();
        let mut board = MockBoard::new();
        let log = board.log.clone();
        let mut raw = RawXspi::new(XspiInstance::Xspi1, board.psram.clone());

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            shutdown_and_reset(
                &mut raw,
                &mut board.rcc,
                &mut board.pins,
                &mut board.delay,
                &profile.psram.wiring,
                &mut board.system,
            )
        }));

        let events = log.borrow().clone();
        assert_eq!(events.first(), Some(&HwEvent::InterruptsDisabled));
        assert_eq!(events.last(), Some(&HwEvent::SystemReset));
        if let Err(payload) = result {
            std::panic::resume_unwind(payload);
        }
    }

    #[test]
    #[should_panic(expected = "system reset requested")]
    fn failed_psram_reset_still_ends_in_system_reset() {
        let profile = BoardProfile::discovery();
        let mut board = MockBoard::new();
        let log = board.log.clone();
        let mut raw = RawXspi::new(XspiInstance::Xspi1, board.psram.clone());
        board.psram.fail_next_transfer();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            shutdown_and_reset(
                &mut raw,
                &mut board.rcc,
                &mut board.pins,
                &mut board.delay,
                &profile.psram.wiring,
                &mut board.system,
            )
        }));

        let events = log.borrow().clone();
        let gated = events
            .iter()
            .position(|e| *e == HwEvent::XspiClockDisabled(XspiInstance::Xspi1))
            .unwrap();
        let reset = events.iter().position(|e| *e == HwEvent::SystemReset).unwrap();
        assert!(gated < reset, "teardown completes before the reset request");
        assert!(!events.iter().any(|e| matches!(e, HwEvent::Delay { .. })));
        if let Err(payload) = result {
            std::panic::resume_unwind(payload);
        }
    }

    #[test]
    fn failed_psram_reset_is_reported_as_unknown_state() {
        let profile = BoardProfile::discovery();
        let mut board = MockBoard::new();
        let mut raw = RawXspi::new(XspiInstance::Xspi1, board.psram.clone());
        board.psram.fail_next_transfer();

        let state = shutdown(
            &mut raw,
            &mut board.rcc,
            &mut board.pins,
            &mut board.delay,
            &profile.psram.wiring,
        );

        assert_eq!(state, PsramState::PoweredUnknown);
        assert!(!board.psram.is_clocked());
        assert!(board.psram.is_at_reset_values());
    }

    #[test]
    fn manual_sequencing_exposes_intermediate_psram_state() {
        let profile = BoardProfile::discovery();
        let mut board = MockBoard::new();
        let mut raw = RawXspi::new(XspiInstance::Xspi1, board.psram.clone());
        let wiring = &profile.psram.wiring;

        let seq = ShutdownSequencer::new();
        assert_eq!(seq.psram_state(), PsramState::PoweredUnknown);
        let seq = seq
            .enable_clocks(&raw, &mut board.rcc, wiring)
            .enable_controller(&mut raw)
            .enter_indirect_mode(&mut raw)
            .reset_psram(&mut raw, &mut board.delay);
        assert_eq!(seq.psram_state(), PsramState::ResetStable);
        let done = seq
            .disable_controller(&mut raw)
            .reset_clock_domain(&raw, &mut board.rcc)
            .deinit_pins(&mut board.pins, wiring)
            .gate_clock(&raw, &mut board.rcc);
        assert_eq!(done.psram_state(), PsramState::ResetStable);
    }
}
