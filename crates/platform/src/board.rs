//! Board profiles: every board-dependent constant of the boot stage.
//!
//! Two boards share this firmware. They differ in external memory sizes,
//! which moves the XSPI device-size fields and the MPU region limits:
//!
//! | Board     | PSRAM (XSPI1) | NOR flash (XSPI2) |
//! |-----------|---------------|-------------------|
//! | Discovery | 32 MB         | 128 MB            |
//! | Custom    | 64 MB         | 32 MB             |
//!
//! The profile is selected once at start-up and passed by reference. No code
//! outside this module branches on the board.

use crate::clock_config::MAX_CPU_CLOCK_HZ;
use crate::gpio::{GpioPort, PinBank, PinMask};
use crate::handoff::HandoffConfig;
use crate::mpu::{
    AccessPermission, AttributeClass, InstructionAccess, MpuError, RegionSpec, RegionTable,
    Shareability,
};
use crate::xspi::{
    ChipSelect, ClockMode, FieldSize, MemoryType, PhaseMode, WrapSize, XspiCommand,
    XspiInitConfig, XspiInstance,
};

/// Which board the firmware runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BoardVariant {
    /// STM32N6570-DK discovery kit.
    Discovery,
    /// Production board.
    Custom,
}

/// GPIO banks a bus uses, in de-initialization order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusWiring {
    /// Pin banks.
    pub banks: &'static [PinBank],
}

impl BusWiring {
    /// Total number of pins across all banks.
    #[must_use]
    pub fn pin_count(&self) -> u32 {
        self.banks.iter().map(|bank| bank.pins.len()).sum()
    }
}

/// XSPI1 to AP Memory PSRAM: D0..D15 on port P; NCS1, CLK, DQS0 and DQS1 on
/// port O.
pub const PSRAM_WIRING: BusWiring = BusWiring {
    banks: &[
        PinBank {
            port: GpioPort::P,
            pins: PinMask::ALL,
        },
        PinBank {
            port: GpioPort::O,
            pins: PinMask::from_pins(&[0, 2, 3, 4]),
        },
    ],
};

/// XSPI2 to octal NOR flash: NCS1, CLK, DQS and D0..D7 on port N.
pub const FLASH_WIRING: BusWiring = BusWiring {
    banks: &[PinBank {
        port: GpioPort::N,
        pins: PinMask::from_pins(&[0, 1, 2, 3, 4, 5, 6, 8, 9, 10, 11]),
    }],
};

/// PSRAM memory-mapped window.
pub const PSRAM_WINDOW_BASE: u32 = 0x9000_0000;
/// NOR flash memory-mapped window.
pub const FLASH_WINDOW_BASE: u32 = 0x7000_0000;
/// AXISRAM5, shared with the NPU.
pub const NPU_BUFFER_BASE: u32 = 0x342E_0000;
/// Last byte of the NPU buffer area (448 KB).
pub const NPU_BUFFER_LIMIT: u32 = 0x3434_FFFF;

/// PSRAM linear burst read: octal opcode, 32-bit octal DTR address, data on
/// sixteen lines DTR, 6 latency cycles, DQS sampling.
pub const PSRAM_READ: XspiCommand = XspiCommand::instruction_only(0x00, PhaseMode::Octal)
    .with_address(PhaseMode::Octal, FieldSize::Bits32, true)
    .with_data(PhaseMode::Sixteen, true)
    .with_dummy_cycles(6)
    .with_dqs();

/// PSRAM linear burst write. Same phases as the read.
pub const PSRAM_WRITE: XspiCommand = XspiCommand::instruction_only(0x80, PhaseMode::Octal)
    .with_address(PhaseMode::Octal, FieldSize::Bits32, true)
    .with_data(PhaseMode::Sixteen, true)
    .with_dummy_cycles(6)
    .with_dqs();

/// NOR octal DTR read (`8READ`, 16-bit opcode `0xEE11`), 20 dummy cycles.
pub const FLASH_READ: XspiCommand = XspiCommand::instruction_only(0x00, PhaseMode::Octal)
    .with_wide_instruction(0xEE11, FieldSize::Bits16, true)
    .with_address(PhaseMode::Octal, FieldSize::Bits32, true)
    .with_data(PhaseMode::Octal, true)
    .with_dummy_cycles(20)
    .with_dqs();

/// NOR octal DTR page program (16-bit opcode `0x12ED`).
pub const FLASH_WRITE: XspiCommand = XspiCommand::instruction_only(0x00, PhaseMode::Octal)
    .with_wide_instruction(0x12ED, FieldSize::Bits16, true)
    .with_address(PhaseMode::Octal, FieldSize::Bits32, true)
    .with_data(PhaseMode::Octal, true)
    .with_dummy_cycles(20)
    .with_dqs();

const fn psram_init(device_size_bytes: u32) -> XspiInitConfig {
    XspiInitConfig {
        fifo_threshold: 4,
        memory_type: MemoryType::ApMemory16,
        device_size_bytes,
        cs_high_time_cycles: 5,
        free_running_clock: false,
        clock_mode: ClockMode::Mode0,
        wrap_size: WrapSize::NotSupported,
        clock_prescaler: 0,
        sample_shifting: false,
        delay_hold_quarter_cycle: false,
        // tCEM: the PSRAM must see CS high at least every 4 µs
        chip_select_boundary: Some(16 * 1024),
        max_transfer: 0,
        refresh: 0,
        chip_select: ChipSelect::Ncs1,
    }
}

const fn flash_init(device_size_bytes: u32) -> XspiInitConfig {
    XspiInitConfig {
        fifo_threshold: 4,
        memory_type: MemoryType::Macronix,
        device_size_bytes,
        cs_high_time_cycles: 1,
        free_running_clock: false,
        clock_mode: ClockMode::Mode0,
        wrap_size: WrapSize::NotSupported,
        clock_prescaler: 0,
        sample_shifting: false,
        delay_hold_quarter_cycle: true,
        chip_select_boundary: None,
        max_transfer: 0,
        refresh: 0,
        chip_select: ChipSelect::Ncs1,
    }
}

/// Everything needed to bring up, map and tear down one XSPI bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusProfile {
    /// Controller.
    pub instance: XspiInstance,
    /// Controller configuration.
    pub init: XspiInitConfig,
    /// Pins the bus uses.
    pub wiring: BusWiring,
    /// Memory-mapped read template.
    pub mapped_read: XspiCommand,
    /// Memory-mapped write template.
    pub mapped_write: XspiCommand,
    /// Start of the memory-mapped window.
    pub mapped_base: u32,
}

impl BusProfile {
    /// Last byte of the memory-mapped window.
    #[must_use]
    pub const fn mapped_limit(&self) -> u32 {
        self.mapped_base
            .wrapping_add(self.init.device_size_bytes)
            .wrapping_sub(1)
    }
}

/// Board-dependent boot configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardProfile {
    /// Board this profile describes.
    pub variant: BoardVariant,
    /// Highest CPU clock the board runs at. Spin delays are sized for it.
    pub max_cpu_hz: u32,
    /// PSRAM bus (XSPI1).
    pub psram: BusProfile,
    /// NOR flash bus (XSPI2).
    pub flash: BusProfile,
    /// MPU regions in slot order: flash window, PSRAM window, NPU buffers.
    pub regions: [RegionSpec; 3],
    /// Where the application image lives.
    pub handoff: HandoffConfig,
}

impl BoardProfile {
    const fn build(variant: BoardVariant, psram_bytes: u32, flash_bytes: u32) -> Self {
        let psram = BusProfile {
            instance: XspiInstance::Xspi1,
            init: psram_init(psram_bytes),
            wiring: PSRAM_WIRING,
            mapped_read: PSRAM_READ,
            mapped_write: PSRAM_WRITE,
            mapped_base: PSRAM_WINDOW_BASE,
        };
        let flash = BusProfile {
            instance: XspiInstance::Xspi2,
            init: flash_init(flash_bytes),
            wiring: FLASH_WIRING,
            mapped_read: FLASH_READ,
            mapped_write: FLASH_WRITE,
            mapped_base: FLASH_WINDOW_BASE,
        };
        Self {
            variant,
            max_cpu_hz: MAX_CPU_CLOCK_HZ,
            psram,
            flash,
            regions: [
                RegionSpec {
                    base: flash.mapped_base,
                    limit: flash.mapped_limit(),
                    class: AttributeClass::CacheableWriteBack,
                    access: AccessPermission::AllReadWrite,
                    execute: InstructionAccess::Allowed,
                    shareability: Shareability::NonShareable,
                },
                RegionSpec {
                    base: psram.mapped_base,
                    limit: psram.mapped_limit(),
                    class: AttributeClass::CacheableWriteThrough,
                    access: AccessPermission::PrivilegedReadWrite,
                    execute: InstructionAccess::Allowed,
                    shareability: Shareability::NonShareable,
                },
                RegionSpec {
                    base: NPU_BUFFER_BASE,
                    limit: NPU_BUFFER_LIMIT,
                    class: AttributeClass::DeviceNonCacheable,
                    access: AccessPermission::AllReadWrite,
                    execute: InstructionAccess::Denied,
                    shareability: Shareability::OuterShareable,
                },
            ],
            handoff: HandoffConfig::APPLICATION,
        }
    }

    /// STM32N6570-DK.
    #[must_use]
    pub const fn discovery() -> Self {
        Self::build(BoardVariant::Discovery, 32 * 1024 * 1024, 128 * 1024 * 1024)
    }

    /// Production board.
    #[must_use]
    pub const fn custom() -> Self {
        Self::build(BoardVariant::Custom, 64 * 1024 * 1024, 32 * 1024 * 1024)
    }

    /// Profile for `variant`.
    #[must_use]
    pub const fn for_variant(variant: BoardVariant) -> Self {
        match variant {
            BoardVariant::Discovery => Self::discovery(),
            BoardVariant::Custom => Self::custom(),
        }
    }

    /// Validated MPU table for this board.
    ///
    /// # Errors
    ///
    /// Any [`MpuError`] from [`RegionTable::new`].
    pub fn region_table(&self) -> Result<RegionTable, MpuError> {
        RegionTable::new(&self.regions)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn region_limits_follow_memory_sizes() {
        let dk = BoardProfile::discovery();
        assert_eq!(dk.regions[0].limit, 0x77FF_FFFF);
        assert_eq!(dk.regions[1].limit, 0x91FF_FFFF);

        let custom = BoardProfile::custom();
        assert_eq!(custom.regions[0].limit, 0x71FF_FFFF);
        assert_eq!(custom.regions[1].limit, 0x93FF_FFFF);
    }

    #[test]
    fn both_boards_have_valid_region_tables() {
        for variant in [BoardVariant::Discovery, BoardVariant::Custom] {
            let profile = BoardProfile::for_variant(variant);
            assert_eq!(profile.variant, variant);
            let table = profile.region_table().unwrap();
            assert_eq!(table.regions().len(), 3);
        }
    }

    #[test]
    fn bus_configs_pass_validation() {
        for profile in [BoardProfile::discovery(), BoardProfile::custom()] {
            profile.psram.init.validate().unwrap();
            profile.flash.init.validate().unwrap();
            profile.psram.mapped_read.validate().unwrap();
            profile.psram.mapped_write.validate().unwrap();
            profile.flash.mapped_read.validate().unwrap();
            profile.flash.mapped_write.validate().unwrap();
        }
    }

    #[test]
    fn psram_wiring_covers_twenty_pins() {
        assert_eq!(PSRAM_WIRING.pin_count(), 20);
        assert_eq!(PSRAM_WIRING.banks[0].port, GpioPort::P);
        assert_eq!(PSRAM_WIRING.banks[1].pins.bits(), 0b1_1101);
    }

    #[test]
    fn only_flash_delays_output_by_a_quarter_cycle() {
        let profile = BoardProfile::discovery();
        assert!(profile.flash.init.delay_hold_quarter_cycle);
        assert!(!profile.psram.init.delay_hold_quarter_cycle);
    }

    #[test]
    fn handoff_target_is_application_header() {
        let profile = BoardProfile::custom();
        assert_eq!(profile.handoff.vector_table_address(), 0x3400_0400);
    }
}
