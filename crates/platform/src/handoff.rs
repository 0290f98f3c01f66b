//! Boot-stage hand-off.
//!
//! Runs immediately before the jump into the application. The application
//! expects the PSRAM bus in indirect mode with the device freshly reset, so
//! the hook leaves memory-mapped mode, resets the PSRAM and returns the
//! address the boot stage jumps to. The controller stays enabled and clocked.

use embedded_hal::delay::DelayNs;

use crate::psram;
use crate::xspi::{XspiError, XspiPort};

/// Where the application image lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HandoffConfig {
    /// Load address of the application image.
    pub destination: u32,
    /// Size of the image header preceding the vector table.
    pub header_offset: u32,
}

impl HandoffConfig {
    /// Application image in AXISRAM1 behind a 1 KB signing header.
    pub const APPLICATION: Self = Self {
        destination: 0x3400_0000,
        header_offset: 0x400,
    };

    /// Address of the application's vector table.
    #[must_use]
    pub const fn vector_table_address(&self) -> u32 {
        self.destination.wrapping_add(self.header_offset)
    }
}

/// One-shot hand-off hook. [`BootHandoffHook::run`] consumes it.
#[derive(Debug)]
pub struct BootHandoffHook {
    config: HandoffConfig,
}

impl BootHandoffHook {
    /// Create the hook for `config`.
    #[must_use]
    pub const fn new(config: HandoffConfig) -> Self {
        Self { config }
    }

    /// Put the PSRAM bus back in indirect mode, reset the PSRAM and return the
    /// application's vector table address.
    ///
    /// # Errors
    ///
    /// [`XspiError::NotIndirect`] if the PSRAM controller is disabled, or
    /// [`XspiError::TransferError`] if the reset command fails.
    pub fn run<P, D>(self, psram_port: &mut P, delay: &mut D) -> Result<u32, XspiError>
    where
        P: XspiPort + ?Sized,
        D: DelayNs + ?Sized,
    {
        psram_port.enter_indirect_mode();
        psram::global_reset(psram_port, delay)?;
        let target = self.config.vector_table_address();
        #[cfg(feature = "defmt")]
        defmt::info!("hand-off to {=u32:#x}", target);
        Ok(target)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::board::BoardProfile;
    use crate::mocks::{new_event_log, HwEvent, MockDelay, MockXspi};
    use crate::xspi::{ControllerMode, ExternalMemoryController, XspiInstance, XspiReg};
    use embedded_hal_mock::eh1::delay::NoopDelay;

    fn mapped_psram() -> (ExternalMemoryController<MockXspi>, MockXspi) {
        let profile = BoardProfile::discovery();
        let regs = MockXspi::new(XspiInstance::Xspi1, new_event_log());
        let mut ctrl =
            ExternalMemoryController::init(XspiInstance::Xspi1, regs.clone(), &profile.psram.init)
                .unwrap();
        ctrl.enable_memory_mapped(&profile.psram.mapped_read, &profile.psram.mapped_write)
            .unwrap();
        (ctrl, regs)
    }

    #[test]
    fn vector_table_sits_after_header() {
        assert_eq!(HandoffConfig::APPLICATION.vector_table_address(), 0x3400_0400);
        let wrapped = HandoffConfig {
            destination: u32::MAX,
            header_offset: 2,
        };
        assert_eq!(wrapped.vector_table_address(), 1);
    }

    #[test]
    fn handoff_from_memory_mapped_leaves_indirect_mode() {
        let (mut ctrl, regs) = mapped_psram();
        let target = BootHandoffHook::new(HandoffConfig::APPLICATION)
            .run(&mut ctrl, &mut NoopDelay::new())
            .unwrap();

        assert_eq!(target, 0x3400_0400);
        assert_eq!(ctrl.mode(), ControllerMode::Indirect);
        assert!(!ctrl.is_busy());
        assert_ne!(regs.peek(XspiReg::Cr) & crate::xspi::bits::CR_EN, 0, "still enabled");
    }

    #[test]
    fn handoff_resets_psram_before_returning() {
        let log = new_event_log();
        let profile = BoardProfile::custom();
        let regs = MockXspi::new(XspiInstance::Xspi1, log.clone());
        let mut ctrl =
            ExternalMemoryController::init(XspiInstance::Xspi1, regs, &profile.psram.init)
                .unwrap();
        let mut delay = MockDelay::new(log.clone());

        BootHandoffHook::new(profile.handoff)
            .run(&mut ctrl, &mut delay)
            .unwrap();

        let events = log.borrow();
        assert!(events
            .iter()
            .any(|e| matches!(e, HwEvent::XspiCommand { instruction: 0xFF, .. })));
        assert!(matches!(events.last(), Some(HwEvent::Delay { ns }) if *ns >= 2_000));
    }

    #[test]
    fn handoff_on_disabled_controller_fails() {
        let (mut ctrl, _regs) = mapped_psram();
        ctrl.disable();
        assert_eq!(
            BootHandoffHook::new(HandoffConfig::APPLICATION).run(&mut ctrl, &mut NoopDelay::new()),
            Err(XspiError::NotIndirect)
        );
    }
}
