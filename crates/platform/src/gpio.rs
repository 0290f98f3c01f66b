//! GPIO banks and pin de-initialization.
//!
//! Two directions are covered. At bring-up every XSPI pin is handed to the
//! XSPI I/O manager (alternate function 9, very high speed). At shutdown the
//! same pins are returned to their inert reset state:
//!
//! | Register | Inert value per pin |
//! |----------|---------------------|
//! | MODER    | `0b11` analog       |
//! | OTYPER   | `0` push-pull       |
//! | OSPEEDR  | `0b00` low speed    |
//! | PUPDR    | `0b00` no pull      |
//! | AFRL/H   | `0x0` AF0           |
//!
//! The register helpers are pure so the bit math is tested on the host; the
//! MMIO writes live in the fsbl crate.

/// GPIO port present on the STM32N6 package.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GpioPort {
    /// Port A.
    A,
    /// Port B.
    B,
    /// Port C.
    C,
    /// Port D.
    D,
    /// Port E.
    E,
    /// Port F.
    F,
    /// Port G.
    G,
    /// Port H.
    H,
    /// Port N (XSPI2 flash).
    N,
    /// Port O (XSPI1 control lines).
    O,
    /// Port P (XSPI1 data lines).
    P,
    /// Port Q.
    Q,
}

impl GpioPort {
    /// Port index as used by the RCC enable bits and the register map.
    #[must_use]
    pub const fn index(self) -> u32 {
        match self {
            Self::A => 0,
            Self::B => 1,
            Self::C => 2,
            Self::D => 3,
            Self::E => 4,
            Self::F => 5,
            Self::G => 6,
            Self::H => 7,
            Self::N => 13,
            Self::O => 14,
            Self::P => 15,
            Self::Q => 16,
        }
    }

    /// Secure-alias base address of the port register block.
    #[must_use]
    #[allow(clippy::arithmetic_side_effects)] // index ≤ 16, product ≤ 0x4000
    pub const fn base_address(self) -> usize {
        regs::GPIO_BASE + (self.index() as usize) * regs::PORT_STRIDE
    }
}

/// Set of pins within one port, bit `n` = pin `n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PinMask(u16);

impl PinMask {
    /// No pins.
    pub const EMPTY: Self = Self(0);
    /// All sixteen pins.
    pub const ALL: Self = Self(0xFFFF);

    /// Mask from raw bits.
    #[must_use]
    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    /// Mask from a list of pin numbers. Numbers above 15 are ignored.
    #[must_use]
    #[allow(clippy::indexing_slicing, clippy::arithmetic_side_effects)] // i < pins.len()
    pub const fn from_pins(pins: &[u8]) -> Self {
        let mut bits = 0u16;
        let mut i = 0;
        while i < pins.len() {
            let pin = pins[i];
            if pin < 16 {
                bits |= 1 << pin;
            }
            i += 1;
        }
        Self(bits)
    }

    /// Raw bits.
    #[must_use]
    pub const fn bits(self) -> u16 {
        self.0
    }

    /// True if `pin` is in the set.
    #[must_use]
    pub const fn contains(self, pin: u8) -> bool {
        pin < 16 && self.0 & (1 << pin) != 0
    }

    /// Number of pins in the set.
    #[must_use]
    pub const fn len(self) -> u32 {
        self.0.count_ones()
    }

    /// True if no pin is set.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterate pin numbers in ascending order.
    pub fn iter(self) -> impl Iterator<Item = u8> {
        (0u8..16).filter(move |&pin| self.contains(pin))
    }
}

/// Pins of one port that belong to a bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PinBank {
    /// Port.
    pub port: GpioPort,
    /// Pins used on that port.
    pub pins: PinMask,
}

/// Return pins to their inert reset state.
pub trait PinDeinit {
    /// Put every pin in `pins` on `port` into analog mode with no pull and no
    /// alternate function.
    fn deinit_pins(&mut self, port: GpioPort, pins: PinMask);
}

/// Alternate function routing a pin to the XSPI I/O manager.
pub const XSPI_ALTERNATE_FUNCTION: u8 = 9;

/// Hand pins to a peripheral.
pub trait PinMux {
    /// Put every pin in `pins` on `port` into alternate-function mode `af`,
    /// push-pull, very high speed, no pull.
    fn set_alternate(&mut self, port: GpioPort, pins: PinMask, af: u8);
}

/// Register offsets and field helpers for the pin configuration writes.
pub mod regs {
    use super::PinMask;

    /// GPIOA secure base address.
    pub const GPIO_BASE: usize = 0x5602_0000;
    /// Distance between consecutive port register blocks.
    pub const PORT_STRIDE: usize = 0x400;

    /// Mode register.
    pub const MODER: usize = 0x00;
    /// Output type register.
    pub const OTYPER: usize = 0x04;
    /// Output speed register.
    pub const OSPEEDR: usize = 0x08;
    /// Pull-up/pull-down register.
    pub const PUPDR: usize = 0x0C;
    /// Alternate function low register (pins 0..=7).
    pub const AFRL: usize = 0x20;
    /// Alternate function high register (pins 8..=15).
    pub const AFRH: usize = 0x24;

    /// Mask covering the 2-bit field of every pin in `pins`
    /// (MODER, OSPEEDR, PUPDR layout).
    #[must_use]
    #[allow(clippy::arithmetic_side_effects)] // pin < 16
    pub const fn two_bit_fields(pins: PinMask) -> u32 {
        let mut mask = 0u32;
        let mut pin = 0u32;
        while pin < 16 {
            if pins.bits() & (1 << pin) != 0 {
                mask |= 0b11 << (pin * 2);
            }
            pin += 1;
        }
        mask
    }

    /// Masks covering the 4-bit AF field of every pin in `pins`,
    /// as `(afrl, afrh)`.
    #[must_use]
    #[allow(clippy::arithmetic_side_effects)] // pin < 16
    pub const fn af_fields(pins: PinMask) -> (u32, u32) {
        let mut low = 0u32;
        let mut high = 0u32;
        let mut pin = 0u32;
        while pin < 16 {
            if pins.bits() & (1 << pin) != 0 {
                if pin < 8 {
                    low |= 0xF << (pin * 4);
                } else {
                    high |= 0xF << ((pin - 8) * 4);
                }
            }
            pin += 1;
        }
        (low, high)
    }

    /// New MODER value with `pins` set to analog.
    #[must_use]
    pub const fn moder_analog(moder: u32, pins: PinMask) -> u32 {
        moder | two_bit_fields(pins)
    }

    /// New value for a 2-bit-per-pin register with `pins` cleared.
    #[must_use]
    pub const fn clear_two_bit_fields(value: u32, pins: PinMask) -> u32 {
        value & !two_bit_fields(pins)
    }

    /// New MODER value with `pins` set to alternate function.
    #[must_use]
    pub const fn moder_alternate(moder: u32, pins: PinMask) -> u32 {
        let fields = two_bit_fields(pins);
        (moder & !fields) | (fields & 0xAAAA_AAAA)
    }

    /// New OSPEEDR value with `pins` set to very high speed.
    #[must_use]
    pub const fn ospeedr_very_high(ospeedr: u32, pins: PinMask) -> u32 {
        ospeedr | two_bit_fields(pins)
    }

    /// New `(afrl, afrh)` values with `af` in the field of every pin in `pins`.
    #[must_use]
    #[allow(clippy::arithmetic_side_effects)] // af is masked to 4 bits; masks are disjoint
    pub const fn afr_with(afrl: u32, afrh: u32, pins: PinMask, af: u8) -> (u32, u32) {
        let (low_mask, high_mask) = af_fields(pins);
        let nibbles = (af as u32 & 0xF) * 0x1111_1111;
        (
            (afrl & !low_mask) | (nibbles & low_mask),
            (afrh & !high_mask) | (nibbles & high_mask),
        )
    }

    /// New OTYPER value with `pins` set to push-pull.
    #[must_use]
    pub const fn otyper_push_pull(otyper: u32, pins: PinMask) -> u32 {
        otyper & !(pins.bits() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_indices_match_rcc_bit_positions() {
        assert_eq!(GpioPort::A.index(), 0);
        assert_eq!(GpioPort::H.index(), 7);
        assert_eq!(GpioPort::O.index(), 14);
        assert_eq!(GpioPort::P.index(), 15);
    }

    #[test]
    fn port_base_addresses() {
        assert_eq!(GpioPort::A.base_address(), 0x5602_0000);
        assert_eq!(GpioPort::O.base_address(), 0x5602_3800);
        assert_eq!(GpioPort::P.base_address(), 0x5602_3C00);
    }

    #[test]
    fn pin_mask_from_list() {
        let mask = PinMask::from_pins(&[0, 2, 3, 4]);
        assert_eq!(mask.bits(), 0b1_1101);
        assert_eq!(mask.len(), 4);
        assert!(mask.contains(2));
        assert!(!mask.contains(1));
        assert!(!mask.contains(16));
        assert_eq!(mask.iter().collect::<heapless::Vec<u8, 16>>().as_slice(), &[0, 2, 3, 4]);
    }

    #[test]
    fn pin_mask_ignores_out_of_range_pins() {
        assert_eq!(PinMask::from_pins(&[3, 16, 200]).bits(), 1 << 3);
        assert!(PinMask::EMPTY.is_empty());
        assert_eq!(PinMask::ALL.len(), 16);
    }

    #[test]
    fn analog_mode_sets_both_mode_bits() {
        let pins = PinMask::from_pins(&[0, 15]);
        assert_eq!(regs::two_bit_fields(pins), 0xC000_0003);
        assert_eq!(regs::moder_analog(0, pins), 0xC000_0003);
        // Pins outside the mask keep their mode.
        assert_eq!(regs::moder_analog(0b10 << 2, pins), 0xC000_000B);
    }

    #[test]
    fn pulls_cleared_only_for_selected_pins() {
        let pins = PinMask::from_pins(&[1]);
        assert_eq!(regs::clear_two_bit_fields(0xFFFF_FFFF, pins), 0xFFFF_FFF3);
    }

    #[test]
    fn alternate_function_fields_split_across_registers() {
        let (low, high) = regs::af_fields(PinMask::from_pins(&[0, 7, 8, 15]));
        assert_eq!(low, 0xF000_000F);
        assert_eq!(high, 0xF000_000F);
    }

    #[test]
    fn alternate_mode_replaces_previous_mode() {
        let pins = PinMask::from_pins(&[0, 1]);
        // pin 0 analog, pin 1 output, pin 2 analog and untouched
        assert_eq!(regs::moder_alternate(0b11_01_11, pins), 0b11_10_10);
        assert_eq!(regs::ospeedr_very_high(0, pins), 0b1111);
    }

    #[test]
    fn xspi_alternate_function_written_to_both_halves() {
        let pins = PinMask::from_pins(&[2, 9]);
        let (low, high) = regs::afr_with(0xFFFF_FFFF, 0, pins, XSPI_ALTERNATE_FUNCTION);
        assert_eq!(low, 0xFFFF_F9FF);
        assert_eq!(high, 0x0000_0090);
    }

    #[test]
    fn output_type_cleared_to_push_pull() {
        assert_eq!(regs::otyper_push_pull(0xFFFF, PinMask::from_pins(&[0, 1])), 0xFFFC);
    }
}
