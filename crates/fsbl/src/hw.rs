//! MMIO implementations of the platform capability traits.
//!
//! Only compiled with `--features hardware`. Every type here is a zero-sized
//! or address-sized handle onto a fixed register block; creating one is
//! `unsafe` because two handles onto the same block would race.
//!
//! Register writes are volatile and therefore stay in program order. The MPU
//! path adds DSB/ISB so the new attributes apply before the caches are turned
//! on.

#![allow(unsafe_code)]

use core::ptr;

use cortex_m::asm;
use cortex_m::peripheral::{CPUID, SCB};
use embedded_hal::delay::DelayNs;
use platform::clock_config::spin_cycles_for;
use platform::gpio::{regs as gpio, GpioPort, PinDeinit, PinMask, PinMux};
use platform::mpu::MpuRegisters;
use platform::rcc::{regs as rcc, ResetAndClockControl};
use platform::system::{CacheControl, SystemControl};
use platform::xspi::{XspiInstance, XspiReg, XspiRegisters};
use platform::{psram_shutdown, RawXspi};

use crate::boot::selected_board;

fn reg32(base: usize, offset: usize) -> *mut u32 {
    base.wrapping_add(offset) as *mut u32
}

fn modify32(addr: *mut u32, f: impl FnOnce(u32) -> u32) {
    // SAFETY: callers pass addresses inside a peripheral block they own.
    unsafe { ptr::write_volatile(addr, f(ptr::read_volatile(addr))) }
}

// ── XSPI ─────────────────────────────────────────────────────────────────────

/// One XSPI controller's register block.
pub struct MmioXspi {
    base: usize,
}

impl MmioXspi {
    /// Handle onto `instance`'s registers.
    ///
    /// # Safety
    ///
    /// At most one handle per instance may exist at a time.
    #[must_use]
    pub const unsafe fn new(instance: XspiInstance) -> Self {
        Self {
            base: instance.base_address(),
        }
    }
}

impl XspiRegisters for MmioXspi {
    fn read(&self, reg: XspiReg) -> u32 {
        // SAFETY: offset is one of the documented XSPI registers.
        unsafe { ptr::read_volatile(reg32(self.base, reg.offset())) }
    }

    fn write(&mut self, reg: XspiReg, value: u32) {
        // SAFETY: as above; `&mut self` serializes writers.
        unsafe { ptr::write_volatile(reg32(self.base, reg.offset()), value) }
    }
}

// ── RCC ──────────────────────────────────────────────────────────────────────

/// RCC enable and reset registers, written through the set/clear aliases.
pub struct Rcc {
    _private: (),
}

impl Rcc {
    /// # Safety
    ///
    /// Other RCC users must only touch the alias registers as well.
    #[must_use]
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }

    fn set(reg: usize, bits: u32) {
        let alias = reg.wrapping_add(rcc::SET_ALIAS);
        // SAFETY: write-1-to-set alias; bits outside `bits` are unaffected.
        unsafe { ptr::write_volatile(reg32(rcc::RCC_BASE, alias), bits) }
        // Read back so the enable has reached the peripheral before it is used.
        // SAFETY: plain read of the base register.
        let _ = unsafe { ptr::read_volatile(reg32(rcc::RCC_BASE, reg)) };
    }

    fn clear(reg: usize, bits: u32) {
        let alias = reg.wrapping_add(rcc::CLEAR_ALIAS);
        // SAFETY: write-1-to-clear alias.
        unsafe { ptr::write_volatile(reg32(rcc::RCC_BASE, alias), bits) }
        // SAFETY: plain read of the base register.
        let _ = unsafe { ptr::read_volatile(reg32(rcc::RCC_BASE, reg)) };
    }
}

impl ResetAndClockControl for Rcc {
    fn enable_xspi_clock(&mut self, instance: XspiInstance) {
        Self::set(rcc::AHB5ENR, rcc::xspi_bit(instance) | rcc::XSPIM_BIT);
    }

    fn disable_xspi_clock(&mut self, instance: XspiInstance) {
        Self::clear(rcc::AHB5ENR, rcc::xspi_bit(instance));
    }

    fn enable_port_clock(&mut self, port: GpioPort) {
        Self::set(rcc::AHB4ENR, rcc::port_bit(port));
    }

    fn assert_xspi_reset(&mut self, instance: XspiInstance) {
        Self::set(rcc::AHB5RSTR, rcc::xspi_bit(instance));
    }

    fn release_xspi_reset(&mut self, instance: XspiInstance) {
        Self::clear(rcc::AHB5RSTR, rcc::xspi_bit(instance));
    }
}

// ── GPIO ─────────────────────────────────────────────────────────────────────

/// All GPIO port register blocks.
pub struct GpioBanks {
    _private: (),
}

impl GpioBanks {
    /// # Safety
    ///
    /// No other code may configure the pins this handle is used on.
    #[must_use]
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl PinMux for GpioBanks {
    fn set_alternate(&mut self, port: GpioPort, pins: PinMask, af: u8) {
        let base = port.base_address();
        // AF and speed are in place before MODER hands the pin over.
        let afrl = reg32(base, gpio::AFRL);
        let afrh = reg32(base, gpio::AFRH);
        // SAFETY: both AFR registers belong to `port`.
        let (low, high) = unsafe {
            gpio::afr_with(ptr::read_volatile(afrl), ptr::read_volatile(afrh), pins, af)
        };
        // SAFETY: as above.
        unsafe {
            ptr::write_volatile(afrl, low);
            ptr::write_volatile(afrh, high);
        }
        modify32(reg32(base, gpio::OTYPER), |v| gpio::otyper_push_pull(v, pins));
        modify32(reg32(base, gpio::OSPEEDR), |v| gpio::ospeedr_very_high(v, pins));
        modify32(reg32(base, gpio::PUPDR), |v| gpio::clear_two_bit_fields(v, pins));
        modify32(reg32(base, gpio::MODER), |v| gpio::moder_alternate(v, pins));
    }
}

impl PinDeinit for GpioBanks {
    fn deinit_pins(&mut self, port: GpioPort, pins: PinMask) {
        let base = port.base_address();
        modify32(reg32(base, gpio::MODER), |v| gpio::moder_analog(v, pins));
        modify32(reg32(base, gpio::OTYPER), |v| gpio::otyper_push_pull(v, pins));
        modify32(reg32(base, gpio::OSPEEDR), |v| gpio::clear_two_bit_fields(v, pins));
        modify32(reg32(base, gpio::PUPDR), |v| gpio::clear_two_bit_fields(v, pins));
        let (low, high) = gpio::af_fields(pins);
        modify32(reg32(base, gpio::AFRL), |v| v & !low);
        modify32(reg32(base, gpio::AFRH), |v| v & !high);
    }
}

// ── MPU ──────────────────────────────────────────────────────────────────────

const MPU_CTRL: usize = 0xE000_ED94;
const MPU_RNR: usize = 0xE000_ED98;
const MPU_RBAR: usize = 0xE000_ED9C;
const MPU_RLAR: usize = 0xE000_EDA0;
const MPU_MAIR0: usize = 0xE000_EDC0;
const MPU_MAIR1: usize = 0xE000_EDC4;

/// ARMv8-M MPU of the running core.
pub struct CortexMpu {
    _private: (),
}

impl CortexMpu {
    /// # Safety
    ///
    /// Must run privileged, and nothing else may reprogram the MPU.
    #[must_use]
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }

    fn mair(index: u8) -> (*mut u32, u32) {
        let reg = if index < 4 { MPU_MAIR0 } else { MPU_MAIR1 };
        let shift = u32::from(index & 0b11).wrapping_mul(8);
        (reg as *mut u32, shift)
    }
}

impl MpuRegisters for CortexMpu {
    fn disable(&mut self) {
        asm::dmb();
        // SAFETY: MPU_CTRL is a core register; privileged boot context.
        unsafe { ptr::write_volatile(MPU_CTRL as *mut u32, 0) }
        asm::dsb();
        asm::isb();
    }

    fn write_region(&mut self, slot: u8, rbar: u32, rlar: u32) {
        // SAFETY: RNR selects the slot RBAR/RLAR act on.
        unsafe {
            ptr::write_volatile(MPU_RNR as *mut u32, u32::from(slot));
            ptr::write_volatile(MPU_RBAR as *mut u32, rbar);
            ptr::write_volatile(MPU_RLAR as *mut u32, rlar);
        }
    }

    fn write_attribute(&mut self, index: u8, encoding: u8) {
        let (reg, shift) = Self::mair(index);
        modify32(reg, |v| {
            (v & !0xFF_u32.wrapping_shl(shift)) | u32::from(encoding).wrapping_shl(shift)
        });
    }

    fn enable(&mut self, ctrl: u32) {
        // SAFETY: MPU_CTRL; the table is fully written at this point.
        unsafe { ptr::write_volatile(MPU_CTRL as *mut u32, ctrl) }
        asm::dsb();
        asm::isb();
    }

    fn read_region(&self, slot: u8) -> (u32, u32) {
        // SAFETY: see `write_region`; `&self` still needs RNR to select.
        unsafe {
            ptr::write_volatile(MPU_RNR as *mut u32, u32::from(slot));
            (
                ptr::read_volatile(MPU_RBAR as *const u32),
                ptr::read_volatile(MPU_RLAR as *const u32),
            )
        }
    }

    fn read_attribute(&self, index: u8) -> u8 {
        let (reg, shift) = Self::mair(index);
        // SAFETY: plain read of MAIR0/1.
        let value = unsafe { ptr::read_volatile(reg) };
        value.wrapping_shr(shift) as u8
    }
}

// ── Core ─────────────────────────────────────────────────────────────────────

/// Busy-wait sized for the fastest supported CPU clock.
pub struct SpinDelay;

impl DelayNs for SpinDelay {
    fn delay_ns(&mut self, ns: u32) {
        asm::delay(spin_cycles_for(ns));
    }
}

/// PRIMASK, reset request and L1 caches.
pub struct CortexSystem {
    scb: SCB,
    cpuid: CPUID,
}

impl CortexSystem {
    /// Take over the SCB. CPUID is needed to size the D-cache.
    #[must_use]
    pub fn new(scb: SCB, cpuid: CPUID) -> Self {
        Self { scb, cpuid }
    }
}

impl SystemControl for CortexSystem {
    fn disable_interrupts(&mut self) {
        cortex_m::interrupt::disable();
    }

    fn system_reset(&mut self) -> ! {
        SCB::sys_reset()
    }
}

impl CacheControl for CortexSystem {
    fn enable_icache(&mut self) {
        self.scb.enable_icache();
    }

    fn enable_dcache(&mut self) {
        self.scb.enable_dcache(&mut self.cpuid);
    }
}

/// Tear the PSRAM bus down and reset the system.
///
/// Entry point for application code that is about to request a warm reset:
/// the boot ROM hangs if XSPI1 is still memory-mapped when it runs.
pub fn psram_shutdown_and_reset() -> ! {
    // SAFETY: interrupts are masked first thing, and the sequence owns the
    // PSRAM controller, its pins and the RCC bits for the rest of execution.
    let (mut port, mut rcc, mut pins, cp) = unsafe {
        (
            RawXspi::new(XspiInstance::Xspi1, MmioXspi::new(XspiInstance::Xspi1)),
            Rcc::new(),
            GpioBanks::new(),
            cortex_m::Peripherals::steal(),
        )
    };
    let mut system = CortexSystem::new(cp.SCB, cp.CPUID);
    let wiring = selected_board().psram.wiring;
    psram_shutdown::shutdown_and_reset(
        &mut port,
        &mut rcc,
        &mut pins,
        &mut SpinDelay,
        &wiring,
        &mut system,
    )
}
