//! Boot-stage external memory bring-up.
//!
//! Initialization order (must be respected):
//!   1. Install and lock the MPU region table (caches still off)
//!   2. Enable I-cache
//!   3. Enable D-cache (attributes for the external windows are now in place)
//!   4. Bring up XSPI2 and map the NOR flash
//!   5. Bring up XSPI1, reset the PSRAM, map it
//!   6. Run the hand-off hook and return the application vector table
//!
//! Everything here is written against the capability traits in `platform`,
//! so the whole flow runs on the host against [`platform::mocks`]. The MMIO
//! implementations live in [`crate::hw`].

use embedded_hal::delay::DelayNs;
use platform::board::BusProfile;
use platform::gpio::XSPI_ALTERNATE_FUNCTION;
use platform::mpu::{MpuError, RegionConfigurator};
use platform::psram;
use platform::xspi::{XspiError, XspiRegisters};
use platform::{
    BoardProfile, BoardVariant, BootHandoffHook, CacheControl, ExternalMemoryController,
    MpuRegisters, PinMux, ResetAndClockControl,
};

/// Ordered list of boot steps, for logs and ordering tests.
///
/// # Correctness Invariants
///
/// - The region table is installed BEFORE either cache is enabled. Otherwise
///   the D-cache would allocate lines for the NPU buffer window under the
///   default memory map.
/// - XSPI clocks and pin muxing come before controller init; register writes
///   to an unclocked controller are dropped.
/// - The PSRAM reset runs in indirect mode, before memory-mapped mode.
/// - The hand-off leaves XSPI1 in indirect mode with a freshly reset PSRAM.
pub const BOOT_SEQUENCE_STEPS: &[&str] = &[
    "1. MPU: install board region table, enable with PRIVDEFENA, lock",
    "2. I-cache: enable",
    "3. D-cache: enable after the region attributes are in place",
    "4. XSPI2: ungate clocks, route NOR pins to AF9, configure controller",
    "5. XSPI2: enter memory-mapped mode for the NOR flash",
    "6. XSPI1: ungate clocks, route PSRAM pins to AF9, configure controller",
    "7. PSRAM: global reset (0xFF) and tRST settle",
    "8. XSPI1: enter memory-mapped mode for the PSRAM",
    "9. Hand-off: leave memory-mapped mode, reset PSRAM, return vector table",
];

/// Fatal boot-stage error. Any of these ends in [`crate::halt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror_no_std::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BootError {
    /// An XSPI controller rejected an operation.
    #[error("external memory controller: {0}")]
    Xspi(XspiError),
    /// The region table was rejected.
    #[error("memory protection: {0}")]
    Mpu(MpuError),
}

impl From<XspiError> for BootError {
    fn from(e: XspiError) -> Self {
        Self::Xspi(e)
    }
}

impl From<MpuError> for BootError {
    fn from(e: MpuError) -> Self {
        Self::Mpu(e)
    }
}

/// Board this image was built for: `board-dk` selects the STM32N6570-DK,
/// otherwise the custom board.
#[must_use]
pub const fn selected_variant() -> BoardVariant {
    if cfg!(feature = "board-dk") {
        BoardVariant::Discovery
    } else {
        BoardVariant::Custom
    }
}

/// Profile for [`selected_variant`].
#[must_use]
pub const fn selected_board() -> BoardProfile {
    BoardProfile::for_variant(selected_variant())
}

/// Core and board resources the boot flow borrows for its whole duration.
pub struct BootResources<'a, C: ?Sized, G: ?Sized, M: ?Sized, K: ?Sized, D: ?Sized> {
    /// Clock gating and peripheral resets.
    pub rcc: &'a mut C,
    /// Pin multiplexing.
    pub pins: &'a mut G,
    /// Memory protection unit.
    pub mpu: &'a mut M,
    /// L1 caches.
    pub caches: &'a mut K,
    /// Busy-wait.
    pub delay: &'a mut D,
}

/// Ungate a bus's controller and pin banks, route its pins to the XSPI I/O
/// manager, then configure the controller. Leaves it enabled in indirect mode.
pub fn bring_up_bus<R, C, G>(
    bus: &BusProfile,
    regs: R,
    rcc: &mut C,
    pins: &mut G,
) -> Result<ExternalMemoryController<R>, XspiError>
where
    R: XspiRegisters,
    C: ResetAndClockControl + ?Sized,
    G: PinMux + ?Sized,
{
    rcc.enable_xspi_clock(bus.instance);
    for bank in bus.wiring.banks {
        rcc.enable_port_clock(bank.port);
        pins.set_alternate(bank.port, bank.pins, XSPI_ALTERNATE_FUNCTION);
    }
    #[cfg(feature = "defmt")]
    defmt::debug!(
        "{}: {=u32} pins on AF9",
        bus.instance.name(),
        bus.wiring.pin_count()
    );
    ExternalMemoryController::init(bus.instance, regs, &bus.init)
}

/// Run the boot stage up to the jump and return the address of the
/// application's vector table.
///
/// `psram_regs` and `flash_regs` are the XSPI1 and XSPI2 register blocks.
/// Both controllers are left configured: XSPI2 memory-mapped, XSPI1 in
/// indirect mode with the PSRAM freshly reset.
///
/// # Errors
///
/// The first [`BootError`] raised. Steps after the failing one do not run.
pub fn run_boot_stage<P, F, C, G, M, K, D>(
    profile: &BoardProfile,
    psram_regs: P,
    flash_regs: F,
    res: BootResources<'_, C, G, M, K, D>,
) -> Result<u32, BootError>
where
    P: XspiRegisters,
    F: XspiRegisters,
    C: ResetAndClockControl + ?Sized,
    G: PinMux + ?Sized,
    M: MpuRegisters + ?Sized,
    K: CacheControl + ?Sized,
    D: DelayNs + ?Sized,
{
    #[cfg(feature = "defmt")]
    defmt::info!(
        "boot: {} board, {=usize} steps",
        profile.variant,
        BOOT_SEQUENCE_STEPS.len()
    );

    let table = profile.region_table()?;
    RegionConfigurator::new().install(res.mpu, &table)?;
    res.caches.enable_icache();
    res.caches.enable_dcache();

    let mut flash = bring_up_bus(&profile.flash, flash_regs, res.rcc, res.pins)?;
    flash.enable_memory_mapped(&profile.flash.mapped_read, &profile.flash.mapped_write)?;
    #[cfg(feature = "defmt")]
    defmt::info!(
        "boot: NOR flash mapped at {=u32:#x}..={=u32:#x}",
        profile.flash.mapped_base,
        profile.flash.mapped_limit()
    );

    let mut psram = bring_up_bus(&profile.psram, psram_regs, res.rcc, res.pins)?;
    psram::global_reset(&mut psram, res.delay)?;
    psram.enable_memory_mapped(&profile.psram.mapped_read, &profile.psram.mapped_write)?;
    #[cfg(feature = "defmt")]
    defmt::info!(
        "boot: PSRAM mapped at {=u32:#x}..={=u32:#x}",
        profile.psram.mapped_base,
        profile.psram.mapped_limit()
    );

    let target = BootHandoffHook::new(profile.handoff).run(&mut psram, res.delay)?;
    Ok(target)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use platform::gpio::GpioPort;
    use platform::mocks::{HwEvent, MockBoard};
    use platform::xspi::{ControllerMode, XspiInstance};
    use platform::XspiPort;

    #[test]
    fn steps_put_mpu_before_caches() {
        let mpu = BOOT_SEQUENCE_STEPS
            .iter()
            .position(|s| s.contains("MPU"))
            .unwrap();
        let dcache = BOOT_SEQUENCE_STEPS
            .iter()
            .position(|s| s.contains("D-cache"))
            .unwrap();
        assert!(mpu < dcache);
    }

    #[test]
    fn steps_reset_psram_before_mapping_it() {
        let reset = BOOT_SEQUENCE_STEPS
            .iter()
            .position(|s| s.starts_with("7. PSRAM"))
            .unwrap();
        let mapped = BOOT_SEQUENCE_STEPS
            .iter()
            .position(|s| s.contains("memory-mapped mode for the PSRAM"))
            .unwrap();
        assert!(reset < mapped);
        assert!(BOOT_SEQUENCE_STEPS.last().unwrap().contains("Hand-off"));
    }

    #[test]
    fn default_build_targets_custom_board() {
        if cfg!(feature = "board-dk") {
            assert_eq!(selected_variant(), BoardVariant::Discovery);
        } else {
            assert_eq!(selected_variant(), BoardVariant::Custom);
        }
        assert_eq!(selected_board().variant, selected_variant());
    }

    #[test]
    fn every_clock_the_bring_up_enables_is_documented() {
        use platform::clock_config::EXTERNAL_MEMORY_CLOCK_REQUIREMENTS;
        let documented =
            |name: &str| EXTERNAL_MEMORY_CLOCK_REQUIREMENTS.iter().any(|r| r.peripheral == name);
        for profile in [BoardProfile::discovery(), BoardProfile::custom()] {
            for bus in [profile.psram, profile.flash] {
                assert!(documented(bus.instance.name()));
                for bank in bus.wiring.banks {
                    assert!(documented(&format!("GPIO{:?}", bank.port)));
                }
            }
        }
    }

    #[test]
    fn boot_errors_wrap_their_source() {
        assert_eq!(
            BootError::from(XspiError::Busy),
            BootError::Xspi(XspiError::Busy)
        );
        assert_eq!(
            BootError::from(MpuError::AlreadyLocked),
            BootError::Mpu(MpuError::AlreadyLocked)
        );
    }

    #[test]
    fn bring_up_routes_pins_before_controller_init() {
        let profile = BoardProfile::discovery();
        let mut board = MockBoard::new();
        board.rcc.disable_xspi_clock(XspiInstance::Xspi2);
        board.clear_events();

        let flash =
            bring_up_bus(&profile.flash, board.flash.clone(), &mut board.rcc, &mut board.pins)
                .unwrap();

        assert_eq!(flash.mode(), ControllerMode::Indirect);
        assert!(board.flash.is_clocked());
        assert!(board.rcc.port_clock_enabled(GpioPort::N));
        assert_eq!(
            board.pins.alternate_pins(GpioPort::N, XSPI_ALTERNATE_FUNCTION),
            profile.flash.wiring.banks[0].pins
        );

        let events = board.events();
        let muxed = events
            .iter()
            .position(|e| matches!(e, HwEvent::PinsAlternate { .. }))
            .unwrap();
        let enabled = events
            .iter()
            .position(|e| matches!(e, HwEvent::XspiEnabled(XspiInstance::Xspi2)))
            .unwrap();
        assert_eq!(events[0], HwEvent::XspiClockEnabled(XspiInstance::Xspi2));
        assert!(muxed < enabled);
    }
}
