//! AP Memory PSRAM global reset.
//!
//! The APS256XXN family resets its mode registers and internal state on a
//! single opcode, `0xFF`, sent on eight lines with no address, dummy or data
//! phase. The device is unusable for at least tRST = 2 µs afterwards.
//!
//! The protocol is written against [`XspiPort`] so the same code runs from the
//! bus driver at boot and from the raw register path during shutdown.

use embedded_hal::delay::DelayNs;

use crate::xspi::{ControllerMode, PhaseMode, XspiCommand, XspiError, XspiPort};

/// Global reset opcode.
pub const GLOBAL_RESET_OPCODE: u8 = 0xFF;

/// Minimum settle time after a global reset, in nanoseconds.
pub const RESET_SETTLE_NS: u32 = 2_000;

/// The global reset command: opcode only, eight lines, single rate.
pub const GLOBAL_RESET_COMMAND: XspiCommand =
    XspiCommand::instruction_only(GLOBAL_RESET_OPCODE, PhaseMode::Octal);

/// What is known about the PSRAM's internal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PsramState {
    /// Powered with unknown register contents (cold boot or warm reset).
    PoweredUnknown,
    /// Reset accepted and tRST elapsed; mode registers hold their defaults.
    ResetStable,
}

/// Force indirect mode, send the global reset and wait out tRST.
///
/// Any in-flight transfer or memory-mapped session is aborted first, so this
/// is safe to call from any enabled mode and any number of times in a row.
/// Memory contents are not preserved.
///
/// # Errors
///
/// - [`XspiError::NotIndirect`] if the controller is disabled. Nothing is sent
///   and no delay is spent in that case.
/// - [`XspiError::TransferError`] if the controller flags the command. The
///   settle wait is skipped.
pub fn global_reset<P, D>(port: &mut P, delay: &mut D) -> Result<PsramState, XspiError>
where
    P: XspiPort + ?Sized,
    D: DelayNs + ?Sized,
{
    port.enter_indirect_mode();
    if port.mode() != ControllerMode::Indirect {
        return Err(XspiError::NotIndirect);
    }

    port.issue_command(&GLOBAL_RESET_COMMAND)?;
    delay.delay_ns(RESET_SETTLE_NS);

    #[cfg(feature = "defmt")]
    defmt::debug!("{}: PSRAM global reset done", port.instance().name());
    Ok(PsramState::ResetStable)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::board::BoardProfile;
    use crate::mocks::{new_event_log, HwEvent, MockDelay, MockXspi};
    use crate::xspi::{ExternalMemoryController, RawXspi, XspiInstance, XspiPort};
    use embedded_hal_mock::eh1::delay::NoopDelay;

    #[test]
    fn reset_command_is_opcode_only_on_eight_lines() {
        assert_eq!(GLOBAL_RESET_COMMAND.instruction, 0xFF);
        assert_eq!(GLOBAL_RESET_COMMAND.ccr(), 4);
        assert_eq!(GLOBAL_RESET_COMMAND.dummy_cycles, 0);
    }

    #[test]
    fn reset_sends_ff_then_waits_at_least_two_microseconds() {
        let log = new_event_log();
        let regs = MockXspi::new(XspiInstance::Xspi1, log.clone());
        let mut ctrl = ExternalMemoryController::init(
            XspiInstance::Xspi1,
            regs,
            &BoardProfile::discovery().psram.init,
        )
        .unwrap();
        let mut delay = MockDelay::new(log.clone());

        let state = global_reset(&mut ctrl, &mut delay).unwrap();
        assert_eq!(state, PsramState::ResetStable);

        let events = log.borrow();
        let abort = events
            .iter()
            .position(|e| matches!(e, HwEvent::XspiAborted(XspiInstance::Xspi1)))
            .unwrap();
        let cmd = events
            .iter()
            .position(|e| matches!(e, HwEvent::XspiCommand { instruction: 0xFF, .. }))
            .unwrap();
        let wait = events
            .iter()
            .position(|e| matches!(e, HwEvent::Delay { ns } if *ns >= 2_000))
            .unwrap();
        assert!(abort < cmd, "indirect mode is forced before the command");
        assert!(cmd < wait, "settle wait must follow the command");
    }

    #[test]
    fn reset_from_memory_mapped_mode_returns_to_indirect() {
        let profile = BoardProfile::discovery();
        let regs = MockXspi::new(XspiInstance::Xspi1, new_event_log());
        let mut ctrl =
            ExternalMemoryController::init(XspiInstance::Xspi1, regs, &profile.psram.init)
                .unwrap();
        ctrl.enable_memory_mapped(&profile.psram.mapped_read, &profile.psram.mapped_write)
            .unwrap();

        global_reset(&mut ctrl, &mut NoopDelay::new()).unwrap();
        assert_eq!(ctrl.mode(), ControllerMode::Indirect);
    }

    #[test]
    fn successive_resets_leave_the_controller_idle_in_indirect_mode() {
        let profile = BoardProfile::custom();
        let log = new_event_log();
        let regs = MockXspi::new(XspiInstance::Xspi1, log.clone());
        let mut ctrl =
            ExternalMemoryController::init(XspiInstance::Xspi1, regs, &profile.psram.init)
                .unwrap();
        for _ in 0..3 {
            assert_eq!(
                global_reset(&mut ctrl, &mut NoopDelay::new()),
                Ok(PsramState::ResetStable)
            );
            assert_eq!(ctrl.mode(), ControllerMode::Indirect);
            assert!(!ctrl.is_busy());
        }
        let resets = log
            .borrow()
            .iter()
            .filter(|e| matches!(e, HwEvent::XspiCommand { instruction: 0xFF, .. }))
            .count();
        assert_eq!(resets, 3);
    }

    #[test]
    fn reset_on_disabled_port_sends_nothing() {
        let log = new_event_log();
        let regs = MockXspi::new(XspiInstance::Xspi1, log.clone());
        let mut raw = RawXspi::new(XspiInstance::Xspi1, regs);
        let mut delay = MockDelay::new(log.clone());
        assert_eq!(
            global_reset(&mut raw, &mut delay),
            Err(XspiError::NotIndirect)
        );
        assert!(!log
            .borrow()
            .iter()
            .any(|e| matches!(e, HwEvent::XspiCommand { .. } | HwEvent::Delay { .. })));
    }

    #[test]
    fn failed_reset_command_skips_the_settle_wait() {
        let log = new_event_log();
        let regs = MockXspi::new(XspiInstance::Xspi1, log.clone());
        let mut ctrl = ExternalMemoryController::init(
            XspiInstance::Xspi1,
            regs.clone(),
            &BoardProfile::discovery().psram.init,
        )
        .unwrap();
        let mut delay = MockDelay::new(log.clone());

        regs.fail_next_transfer();
        assert_eq!(
            global_reset(&mut ctrl, &mut delay),
            Err(XspiError::TransferError)
        );
        assert!(!log.borrow().iter().any(|e| matches!(e, HwEvent::Delay { .. })));
        assert_eq!(ctrl.mode(), ControllerMode::Indirect);

        assert_eq!(global_reset(&mut ctrl, &mut delay), Ok(PsramState::ResetStable));
    }

    #[test]
    fn reset_through_raw_port() {
        let regs = MockXspi::new(XspiInstance::Xspi1, new_event_log());
        let mut raw = RawXspi::new(XspiInstance::Xspi1, regs.clone());
        raw.enable();
        assert_eq!(
            global_reset(&mut raw, &mut NoopDelay::new()),
            Ok(PsramState::ResetStable)
        );
        assert_eq!(raw.mode(), ControllerMode::Indirect);
    }
}
