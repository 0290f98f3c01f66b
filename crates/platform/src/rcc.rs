//! Reset and clock control capabilities used by the external memory paths.
//!
//! The STM32N6 RCC exposes atomic set/clear aliases for every enable and
//! reset register (`ENSR` at +0x800, `ENCR` at +0x1000), so the hardware
//! implementation in fsbl never needs a read-modify-write.

use crate::gpio::GpioPort;
use crate::xspi::XspiInstance;

/// Clock gating and peripheral reset for the XSPI controllers and the GPIO
/// ports they use.
pub trait ResetAndClockControl {
    /// Ungate the controller's bus and kernel clock.
    fn enable_xspi_clock(&mut self, instance: XspiInstance);

    /// Gate the controller's clock.
    fn disable_xspi_clock(&mut self, instance: XspiInstance);

    /// Ungate a GPIO port's clock.
    fn enable_port_clock(&mut self, port: GpioPort);

    /// Hold the controller in reset. Every register returns to its reset value.
    fn assert_xspi_reset(&mut self, instance: XspiInstance);

    /// Release the controller from reset.
    fn release_xspi_reset(&mut self, instance: XspiInstance);
}

/// RCC register map (RM0486 §14.10).
pub mod regs {
    use super::{GpioPort, XspiInstance};

    /// RCC secure base address.
    pub const RCC_BASE: usize = 0x5602_8000;

    /// AHB4 reset register (GPIO ports).
    pub const AHB4RSTR: usize = 0x21C;
    /// AHB5 reset register (XSPI).
    pub const AHB5RSTR: usize = 0x220;
    /// AHB4 enable register (GPIO ports).
    pub const AHB4ENR: usize = 0x25C;
    /// AHB5 enable register (XSPI).
    pub const AHB5ENR: usize = 0x260;

    /// Offset of the atomic set alias from its base register.
    pub const SET_ALIAS: usize = 0x800;
    /// Offset of the atomic clear alias from its base register.
    pub const CLEAR_ALIAS: usize = 0x1000;

    /// AHB5ENR / AHB5RSTR bit for an XSPI controller.
    #[must_use]
    pub const fn xspi_bit(instance: XspiInstance) -> u32 {
        match instance {
            XspiInstance::Xspi1 => 1 << 5,
            XspiInstance::Xspi2 => 1 << 12,
        }
    }

    /// AHB5ENR bit for the XSPI I/O manager. Both controllers reach their
    /// ports through it, so it is only ever set.
    pub const XSPIM_BIT: u32 = 1 << 13;

    /// AHB4ENR bit for a GPIO port.
    #[must_use]
    pub const fn port_bit(port: GpioPort) -> u32 {
        1 << port.index()
    }
}

#[cfg(test)]
mod tests {
    use super::regs::*;
    use super::*;

    #[test]
    fn xspi_bits_are_distinct() {
        assert_eq!(xspi_bit(XspiInstance::Xspi1), 0x20);
        assert_eq!(xspi_bit(XspiInstance::Xspi2), 0x1000);
        assert_eq!(xspi_bit(XspiInstance::Xspi1) & XSPIM_BIT, 0);
        assert_eq!(xspi_bit(XspiInstance::Xspi2) & XSPIM_BIT, 0);
    }

    #[test]
    fn xspi1_port_bits() {
        assert_eq!(port_bit(GpioPort::O), 1 << 14);
        assert_eq!(port_bit(GpioPort::P), 1 << 15);
    }
}
