//! Clock facts the boot stage depends on.
//!
//! Encodes which clocks the external memory buses need before their
//! controllers are touched, and converts wall-clock waits into CPU cycles for
//! the busy-wait delay.
//!
//! # Background
//!
//! The boot stage runs before any timer is configured, so every delay is a
//! calibrated spin. The spin length is derived from the fastest CPU clock the
//! part can run at: a spin sized for 800 MHz is at least as long in wall-clock
//! time at any slower clock.
//!
//! # Sources
//!
//! - STM32N6 datasheet DS14791: Cortex-M55 up to 800 MHz
//! - RM0486 §14 (RCC clock tree), §18.4 (XSPI kernel clock)
//! - APS256XXN-OBx datasheet §8.5: tRST ≥ 2 µs after global reset

/// Highest CPU clock supported by the part, in Hz.
pub const MAX_CPU_CLOCK_HZ: u32 = 800_000_000;

/// Margin added on top of computed spin lengths, in percent.
pub const SPIN_MARGIN_PERCENT: u32 = 25;

/// Convert nanoseconds to CPU cycles at `cpu_hz` (ceiling division).
///
/// Formula: `cycles = ceil(ns * cpu_hz / 1_000_000_000)`.
/// Uses 64-bit integer arithmetic; saturates at `u32::MAX`.
#[must_use]
#[allow(clippy::arithmetic_side_effects)] // u32 * u32 fits u64; divisor is a non-zero constant
#[allow(clippy::cast_possible_truncation)] // clamped to u32::MAX before the cast
pub const fn ns_to_cycles(ns: u32, cpu_hz: u32) -> u32 {
    let numer = ns as u64 * cpu_hz as u64;
    let cycles = (numer + 999_999_999) / 1_000_000_000;
    if cycles > u32::MAX as u64 {
        u32::MAX
    } else {
        cycles as u32
    }
}

/// Cycles to spin for a wait of at least `ns` nanoseconds at any clock up to
/// [`MAX_CPU_CLOCK_HZ`], including [`SPIN_MARGIN_PERCENT`].
#[must_use]
#[allow(clippy::arithmetic_side_effects)] // each term is bounded by base * 25 / 100
pub const fn spin_cycles_for(ns: u32) -> u32 {
    let base = ns_to_cycles(ns, MAX_CPU_CLOCK_HZ);
    let margin = base / 100 * SPIN_MARGIN_PERCENT
        + (base % 100 * SPIN_MARGIN_PERCENT).div_ceil(100);
    base.saturating_add(margin)
}

/// Clock sources feeding the boot-stage peripherals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClockSource {
    /// AHB5 bus clock. XSPI register access and kernel clock in the boot
    /// configuration.
    Ahb5,
    /// AHB4 bus clock. GPIO port register access.
    Ahb4,
}

/// A peripheral and its mandatory clock-source dependency.
///
/// These are static documentation records. They do **not** configure the
/// hardware; the RCC writes are done through
/// [`ResetAndClockControl`](crate::rcc::ResetAndClockControl).
pub struct ClockRequirement {
    /// Short identifier for the peripheral (e.g. `"XSPI1"`, `"GPIOP"`).
    pub peripheral: &'static str,
    /// The clock source that must be active before this peripheral is touched.
    pub required_source: ClockSource,
    /// Why this requirement exists.
    pub note: &'static str,
}

/// Clock requirements of the external memory paths.
pub const EXTERNAL_MEMORY_CLOCK_REQUIREMENTS: &[ClockRequirement] = &[
    ClockRequirement {
        peripheral: "XSPI1",
        required_source: ClockSource::Ahb5,
        note: "PSRAM controller; register writes are dropped while the clock is gated, \
               so the shutdown path ungates it before touching CR; RM0486 §14.5",
    },
    ClockRequirement {
        peripheral: "XSPI2",
        required_source: ClockSource::Ahb5,
        note: "NOR flash controller holding the application image; RM0486 §14.5",
    },
    ClockRequirement {
        peripheral: "GPION",
        required_source: ClockSource::Ahb4,
        note: "XSPI2 NOR flash pins; muxed to AF9 before the controller is configured",
    },
    ClockRequirement {
        peripheral: "GPIOO",
        required_source: ClockSource::Ahb4,
        note: "XSPI1 clock, chip select and DQS pins; must be clocked to return \
               them to analog mode",
    },
    ClockRequirement {
        peripheral: "GPIOP",
        required_source: ClockSource::Ahb4,
        note: "XSPI1 data lines D0..D15",
    },
];

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::expect_used, clippy::arithmetic_side_effects)]
mod tests {
    use super::*;

    #[test]
    fn ns_to_cycles_rounds_up() {
        assert_eq!(ns_to_cycles(2000, 800_000_000), 1600);
        assert_eq!(ns_to_cycles(1, 800_000_000), 1);
        assert_eq!(ns_to_cycles(1, 1_000_000), 1);
        assert_eq!(ns_to_cycles(0, 800_000_000), 0);
    }

    #[test]
    fn ns_to_cycles_saturates() {
        assert_eq!(ns_to_cycles(u32::MAX, u32::MAX), u32::MAX);
    }

    /// 2 µs is 1600 cycles at 800 MHz; the margin adds a quarter on top.
    #[test]
    fn psram_settle_spin_includes_the_margin() {
        let base = ns_to_cycles(2_000, MAX_CPU_CLOCK_HZ);
        assert_eq!(base, 1_600);
        assert_eq!(SPIN_MARGIN_PERCENT, 25);
        assert_eq!(spin_cycles_for(2_000), base * (100 + SPIN_MARGIN_PERCENT) / 100);
        assert_eq!(spin_cycles_for(2_000), 2_000);
    }

    #[test]
    fn spin_margin_rounds_up_on_small_values() {
        assert_eq!(spin_cycles_for(1), 2);
        assert_eq!(spin_cycles_for(0), 0);
    }

    #[test]
    fn xspi1_and_its_ports_have_requirements() {
        for name in ["XSPI1", "GPIOO", "GPIOP"] {
            let req = EXTERNAL_MEMORY_CLOCK_REQUIREMENTS
                .iter()
                .find(|r| r.peripheral == name)
                .expect("every XSPI1 dependency must be listed");
            assert!(!req.note.is_empty());
        }
    }

    #[test]
    fn xspi_controllers_require_ahb5() {
        let count = EXTERNAL_MEMORY_CLOCK_REQUIREMENTS
            .iter()
            .filter(|r| r.peripheral.starts_with("XSPI"))
            .filter(|r| r.required_source == ClockSource::Ahb5)
            .count();
        assert_eq!(count, 2);
    }
}
