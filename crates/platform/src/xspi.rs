//! XSPI external memory controller for STM32N6.
//!
//! Two views of the same peripheral live here:
//!
//! - [`RawXspi`]: bit-level access for code that must run without any driver
//!   context (the PSRAM shutdown path called from an application that never
//!   built a driver). Its mode is always read back from the hardware.
//! - [`ExternalMemoryController`]: the bus driver created during bring-up. It
//!   keeps a software model of the controller mode and the in-flight transfer,
//!   and refuses operations that the model says are illegal.
//!
//! Both implement [`XspiPort`], the capability the PSRAM reset protocol and
//! the hand-off hook are written against.
//!
//! # Controller modes
//!
//! ```text
//!               init()              enable_memory_mapped()
//! [Disabled] ----------> [Indirect] ----------------------> [MemoryMapped]
//!     ^                   ^    |                                   |
//!     |   disable()       |    |       enter_indirect_mode()       |
//!     +-------------------+----+<----------------------------------+
//! ```
//!
//! Commands may only be issued in `Indirect` mode with no transfer in flight.
//!
//! # Command trigger
//!
//! In indirect write mode the transfer starts on the last configuration write:
//! the IR write when there is no address phase, otherwise the AR write. CCR,
//! TCR and DLR are therefore always programmed before the trigger.
//!
//! # References
//!
//! - RM0486 (STM32N6) §18 "Extended-SPI interface (XSPI)"
//! - AN5050 "Getting started with Octo-SPI, Hexadeca-SPI and XSPI interfaces"

/// XSPI controller instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum XspiInstance {
    /// XSPI1: 16-bit AP Memory PSRAM on ports O and P.
    Xspi1,
    /// XSPI2: octal NOR flash (boot and application image).
    Xspi2,
}

impl XspiInstance {
    /// Secure-alias base address of the controller register block.
    #[must_use]
    pub const fn base_address(self) -> usize {
        match self {
            Self::Xspi1 => 0x5802_5000,
            Self::Xspi2 => 0x5802_A000,
        }
    }

    /// Short peripheral name for logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Xspi1 => "XSPI1",
            Self::Xspi2 => "XSPI2",
        }
    }
}

/// XSPI registers touched by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum XspiReg {
    /// Control register.
    Cr,
    /// Device configuration register 1.
    Dcr1,
    /// Device configuration register 2.
    Dcr2,
    /// Device configuration register 3.
    Dcr3,
    /// Device configuration register 4.
    Dcr4,
    /// Status register.
    Sr,
    /// Flag clear register.
    Fcr,
    /// Data length register.
    Dlr,
    /// Address register.
    Ar,
    /// Communication configuration register.
    Ccr,
    /// Timing configuration register.
    Tcr,
    /// Instruction register.
    Ir,
    /// Write communication configuration register (memory-mapped writes).
    Wccr,
    /// Write timing configuration register.
    Wtcr,
    /// Write instruction register.
    Wir,
}

impl XspiReg {
    /// Every register in offset order.
    pub const ALL: [Self; 15] = [
        Self::Cr,
        Self::Dcr1,
        Self::Dcr2,
        Self::Dcr3,
        Self::Dcr4,
        Self::Sr,
        Self::Fcr,
        Self::Dlr,
        Self::Ar,
        Self::Ccr,
        Self::Tcr,
        Self::Ir,
        Self::Wccr,
        Self::Wtcr,
        Self::Wir,
    ];

    /// Byte offset from the controller base address.
    #[must_use]
    pub const fn offset(self) -> usize {
        match self {
            Self::Cr => 0x000,
            Self::Dcr1 => 0x008,
            Self::Dcr2 => 0x00C,
            Self::Dcr3 => 0x010,
            Self::Dcr4 => 0x014,
            Self::Sr => 0x020,
            Self::Fcr => 0x024,
            Self::Dlr => 0x040,
            Self::Ar => 0x048,
            Self::Ccr => 0x100,
            Self::Tcr => 0x108,
            Self::Ir => 0x110,
            Self::Wccr => 0x180,
            Self::Wtcr => 0x188,
            Self::Wir => 0x190,
        }
    }
}

/// Register bit fields (RM0486 §18.8).
pub mod bits {
    /// CR: controller enable.
    pub const CR_EN: u32 = 1 << 0;
    /// CR: abort request. Self-clears once the abort has completed.
    pub const CR_ABORT: u32 = 1 << 1;
    /// CR: FIFO threshold level, `threshold - 1`.
    pub const CR_FTHRES_SHIFT: u32 = 8;
    /// CR: FIFO threshold field mask.
    pub const CR_FTHRES_MASK: u32 = 0x3F << CR_FTHRES_SHIFT;
    /// CR: chip-select selection (0 = nCS1).
    pub const CR_CSSEL: u32 = 1 << 24;
    /// CR: functional mode field shift.
    pub const CR_FMODE_SHIFT: u32 = 28;
    /// CR: functional mode field mask.
    pub const CR_FMODE_MASK: u32 = 0b11 << CR_FMODE_SHIFT;
    /// FMODE: indirect write.
    pub const FMODE_INDIRECT_WRITE: u32 = 0b00;
    /// FMODE: memory-mapped.
    pub const FMODE_MEMORY_MAPPED: u32 = 0b11;

    /// DCR1: clock mode 3.
    pub const DCR1_CKMODE: u32 = 1 << 0;
    /// DCR1: free-running clock.
    pub const DCR1_FRCK: u32 = 1 << 1;
    /// DCR1: chip-select high time, `cycles - 1`.
    pub const DCR1_CSHT_SHIFT: u32 = 8;
    /// DCR1: device size, `log2(bytes) - 1`.
    pub const DCR1_DEVSIZE_SHIFT: u32 = 16;
    /// DCR1: memory type.
    pub const DCR1_MTYP_SHIFT: u32 = 24;

    /// DCR2: clock prescaler.
    pub const DCR2_PRESCALER_SHIFT: u32 = 0;
    /// DCR2: wrap size.
    pub const DCR2_WRAPSIZE_SHIFT: u32 = 16;

    /// DCR3: maximum transfer.
    pub const DCR3_MAXTRAN_SHIFT: u32 = 0;
    /// DCR3: chip-select boundary, `log2(bytes)`; 0 disables.
    pub const DCR3_CSBOUND_SHIFT: u32 = 16;

    /// SR: transfer error flag.
    pub const SR_TEF: u32 = 1 << 0;
    /// SR: transfer complete flag.
    pub const SR_TCF: u32 = 1 << 1;
    /// SR: busy.
    pub const SR_BUSY: u32 = 1 << 5;

    /// FCR: clear transfer error flag.
    pub const FCR_CTEF: u32 = 1 << 0;
    /// FCR: clear transfer complete flag.
    pub const FCR_CTCF: u32 = 1 << 1;

    /// CCR: instruction mode.
    pub const CCR_IMODE_SHIFT: u32 = 0;
    /// CCR: instruction double transfer rate.
    pub const CCR_IDTR: u32 = 1 << 3;
    /// CCR: instruction size.
    pub const CCR_ISIZE_SHIFT: u32 = 4;
    /// CCR: address mode.
    pub const CCR_ADMODE_SHIFT: u32 = 8;
    /// CCR: address mode field mask.
    pub const CCR_ADMODE_MASK: u32 = 0b111 << CCR_ADMODE_SHIFT;
    /// CCR: address double transfer rate.
    pub const CCR_ADDTR: u32 = 1 << 11;
    /// CCR: address size.
    pub const CCR_ADSIZE_SHIFT: u32 = 12;
    /// CCR: data mode.
    pub const CCR_DMODE_SHIFT: u32 = 24;
    /// CCR: data double transfer rate.
    pub const CCR_DDTR: u32 = 1 << 27;
    /// CCR: DQS enable.
    pub const CCR_DQSE: u32 = 1 << 29;

    /// TCR: dummy cycles field mask.
    pub const TCR_DCYC_MASK: u32 = 0x1F;
    /// TCR: delay hold quarter cycle.
    pub const TCR_DHQC: u32 = 1 << 28;
    /// TCR: sample shift by half a cycle.
    pub const TCR_SSHIFT: u32 = 1 << 30;
}

use bits::*;

/// XSPI driver error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror_no_std::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum XspiError {
    /// The controller is not in indirect mode (disabled or memory-mapped).
    #[error("controller is not in indirect mode")]
    NotIndirect,
    /// A transfer is still in flight.
    #[error("a transfer is still in progress")]
    Busy,
    /// The controller flagged a transfer error (SR.TEF) instead of completion.
    #[error("transfer error")]
    TransferError,
    /// An initialization parameter is out of range.
    #[error("invalid controller configuration: {0}")]
    InvalidConfig(&'static str),
    /// A command descriptor cannot be encoded or is not allowed here.
    #[error("invalid command: {0}")]
    InvalidCommand(&'static str),
}

/// Controller functional mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ControllerMode {
    /// EN cleared; the controller ignores commands and bus accesses.
    Disabled,
    /// Register-driven command mode.
    Indirect,
    /// The external device is visible in the CPU address map.
    MemoryMapped,
}

/// Bus width of one command phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PhaseMode {
    /// Phase skipped.
    None,
    /// One line.
    Single,
    /// Two lines.
    Dual,
    /// Four lines.
    Quad,
    /// Eight lines.
    Octal,
    /// Sixteen lines. Data phase only.
    Sixteen,
}

impl PhaseMode {
    /// Field encoding shared by IMODE, ADMODE and DMODE.
    #[must_use]
    pub const fn bits(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Single => 1,
            Self::Dual => 2,
            Self::Quad => 3,
            Self::Octal => 4,
            Self::Sixteen => 5,
        }
    }

    /// Decode a 3-bit mode field. Reserved encodings return `None`.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            0 => Some(Self::None),
            1 => Some(Self::Single),
            2 => Some(Self::Dual),
            3 => Some(Self::Quad),
            4 => Some(Self::Octal),
            5 => Some(Self::Sixteen),
            _ => None,
        }
    }
}

/// Width of the instruction or address phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FieldSize {
    /// 8 bits.
    Bits8,
    /// 16 bits.
    Bits16,
    /// 24 bits.
    Bits24,
    /// 32 bits.
    Bits32,
}

impl FieldSize {
    /// ISIZE / ADSIZE encoding.
    #[must_use]
    pub const fn bits(self) -> u32 {
        match self {
            Self::Bits8 => 0,
            Self::Bits16 => 1,
            Self::Bits24 => 2,
            Self::Bits32 => 3,
        }
    }

    /// Largest value that fits in this many bits.
    #[must_use]
    pub const fn max_value(self) -> u32 {
        match self {
            Self::Bits8 => 0xFF,
            Self::Bits16 => 0xFFFF,
            Self::Bits24 => 0x00FF_FFFF,
            Self::Bits32 => u32::MAX,
        }
    }
}

/// One XSPI command: instruction, optional address, dummy cycles and data
/// phase description.
///
/// Built with the `const` builder methods so board tables can hold commands
/// as constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct XspiCommand {
    /// Opcode.
    pub instruction: u32,
    /// Instruction bus width.
    pub instruction_mode: PhaseMode,
    /// Instruction width.
    pub instruction_size: FieldSize,
    /// Instruction sent on both clock edges.
    pub instruction_dtr: bool,
    /// Address bus width; `PhaseMode::None` skips the phase.
    pub address_mode: PhaseMode,
    /// Address width.
    pub address_size: FieldSize,
    /// Address sent on both clock edges.
    pub address_dtr: bool,
    /// Address value (indirect commands only).
    pub address: u32,
    /// Data bus width; `PhaseMode::None` skips the phase.
    pub data_mode: PhaseMode,
    /// Data transferred on both clock edges.
    pub data_dtr: bool,
    /// Dummy cycles between address and data (0..=31).
    pub dummy_cycles: u8,
    /// Use the DQS strobe to sample read data.
    pub dqs: bool,
}

impl XspiCommand {
    /// Instruction-only command with an 8-bit opcode.
    #[must_use]
    pub const fn instruction_only(opcode: u8, mode: PhaseMode) -> Self {
        Self {
            instruction: opcode as u32,
            instruction_mode: mode,
            instruction_size: FieldSize::Bits8,
            instruction_dtr: false,
            address_mode: PhaseMode::None,
            address_size: FieldSize::Bits8,
            address_dtr: false,
            address: 0,
            data_mode: PhaseMode::None,
            data_dtr: false,
            dummy_cycles: 0,
            dqs: false,
        }
    }

    /// Replace the instruction with a wider opcode (e.g. `0xEE11` on octal NOR).
    #[must_use]
    pub const fn with_wide_instruction(mut self, opcode: u32, size: FieldSize, dtr: bool) -> Self {
        self.instruction = opcode;
        self.instruction_size = size;
        self.instruction_dtr = dtr;
        self
    }

    /// Add an address phase.
    #[must_use]
    pub const fn with_address(mut self, mode: PhaseMode, size: FieldSize, dtr: bool) -> Self {
        self.address_mode = mode;
        self.address_size = size;
        self.address_dtr = dtr;
        self
    }

    /// Add a data phase.
    #[must_use]
    pub const fn with_data(mut self, mode: PhaseMode, dtr: bool) -> Self {
        self.data_mode = mode;
        self.data_dtr = dtr;
        self
    }

    /// Set the dummy cycle count.
    #[must_use]
    pub const fn with_dummy_cycles(mut self, cycles: u8) -> Self {
        self.dummy_cycles = cycles;
        self
    }

    /// Enable DQS sampling.
    #[must_use]
    pub const fn with_dqs(mut self) -> Self {
        self.dqs = true;
        self
    }

    /// Check that the command can be encoded in CCR/TCR/IR.
    ///
    /// # Errors
    ///
    /// [`XspiError::InvalidCommand`] naming the offending field.
    pub fn validate(&self) -> Result<(), XspiError> {
        if self.instruction_mode == PhaseMode::None {
            return Err(XspiError::InvalidCommand("instruction phase is required"));
        }
        if self.instruction_mode == PhaseMode::Sixteen || self.address_mode == PhaseMode::Sixteen {
            return Err(XspiError::InvalidCommand(
                "sixteen lines is only valid for the data phase",
            ));
        }
        if self.instruction > self.instruction_size.max_value() {
            return Err(XspiError::InvalidCommand("opcode wider than instruction size"));
        }
        if self.address_mode != PhaseMode::None && self.address > self.address_size.max_value() {
            return Err(XspiError::InvalidCommand("address wider than address size"));
        }
        if u32::from(self.dummy_cycles) > TCR_DCYC_MASK {
            return Err(XspiError::InvalidCommand("more than 31 dummy cycles"));
        }
        Ok(())
    }

    /// CCR (or WCCR) encoding.
    #[must_use]
    pub const fn ccr(&self) -> u32 {
        let mut ccr = (self.instruction_mode.bits() << CCR_IMODE_SHIFT)
            | (self.instruction_size.bits() << CCR_ISIZE_SHIFT)
            | (self.address_mode.bits() << CCR_ADMODE_SHIFT)
            | (self.address_size.bits() << CCR_ADSIZE_SHIFT)
            | (self.data_mode.bits() << CCR_DMODE_SHIFT);
        if self.instruction_dtr {
            ccr |= CCR_IDTR;
        }
        if self.address_dtr {
            ccr |= CCR_ADDTR;
        }
        if self.data_dtr {
            ccr |= CCR_DDTR;
        }
        if self.dqs {
            ccr |= CCR_DQSE;
        }
        ccr
    }

    /// True when the command carries an address phase.
    #[must_use]
    pub const fn has_address(&self) -> bool {
        !matches!(self.address_mode, PhaseMode::None)
    }

    /// True when the command carries a data phase.
    #[must_use]
    pub const fn has_data(&self) -> bool {
        !matches!(self.data_mode, PhaseMode::None)
    }
}

/// External memory type (DCR1.MTYP).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MemoryType {
    /// Macronix mode: D1/D0 byte order in octal DTR (NOR flash).
    Macronix,
    /// AP Memory 16-bit PSRAM.
    ApMemory16,
}

impl MemoryType {
    /// MTYP field value.
    #[must_use]
    pub const fn bits(self) -> u32 {
        match self {
            Self::Macronix => 1,
            Self::ApMemory16 => 6,
        }
    }
}

/// Idle clock level (DCR1.CKMODE).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClockMode {
    /// CLK low while nCS is high.
    Mode0,
    /// CLK high while nCS is high.
    Mode3,
}

/// Wrap burst size supported by the device (DCR2.WRAPSIZE).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WrapSize {
    /// Wrapped reads not supported.
    NotSupported,
    /// 16-byte wrap.
    Bytes16,
    /// 32-byte wrap.
    Bytes32,
    /// 64-byte wrap.
    Bytes64,
    /// 128-byte wrap.
    Bytes128,
}

impl WrapSize {
    /// WRAPSIZE field value.
    #[must_use]
    pub const fn bits(self) -> u32 {
        match self {
            Self::NotSupported => 0,
            Self::Bytes16 => 2,
            Self::Bytes32 => 3,
            Self::Bytes64 => 4,
            Self::Bytes128 => 5,
        }
    }
}

/// Chip-select line used by this controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChipSelect {
    /// nCS1.
    Ncs1,
    /// nCS2.
    Ncs2,
}

/// Controller initialization parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct XspiInitConfig {
    /// FIFO threshold in bytes (1..=64).
    pub fifo_threshold: u8,
    /// Device protocol variant.
    pub memory_type: MemoryType,
    /// Device capacity in bytes; power of two.
    pub device_size_bytes: u32,
    /// Minimum chip-select high time between commands, in cycles (1..=64).
    pub cs_high_time_cycles: u8,
    /// Keep CLK running while idle.
    pub free_running_clock: bool,
    /// Idle clock level.
    pub clock_mode: ClockMode,
    /// Wrap burst support.
    pub wrap_size: WrapSize,
    /// Kernel clock divider minus one.
    pub clock_prescaler: u8,
    /// Shift sampling by half a cycle.
    pub sample_shifting: bool,
    /// Delay output data by a quarter cycle (DTR only).
    pub delay_hold_quarter_cycle: bool,
    /// Split bursts that cross this many bytes; `None` disables.
    pub chip_select_boundary: Option<u32>,
    /// Maximum transfer length before releasing the bus (0 disables).
    pub max_transfer: u8,
    /// Refresh interval in cycles (0 disables).
    pub refresh: u32,
    /// Chip-select line.
    pub chip_select: ChipSelect,
}

impl XspiInitConfig {
    /// Check every parameter against its register field range.
    ///
    /// # Errors
    ///
    /// [`XspiError::InvalidConfig`] naming the offending field.
    pub fn validate(&self) -> Result<(), XspiError> {
        if !(1..=64).contains(&self.fifo_threshold) {
            return Err(XspiError::InvalidConfig("fifo threshold must be 1..=64"));
        }
        if !self.device_size_bytes.is_power_of_two() || self.device_size_bytes < 2 {
            return Err(XspiError::InvalidConfig(
                "device size must be a power of two of at least 2 bytes",
            ));
        }
        if !(1..=64).contains(&self.cs_high_time_cycles) {
            return Err(XspiError::InvalidConfig("chip-select high time must be 1..=64"));
        }
        if let Some(boundary) = self.chip_select_boundary {
            if !boundary.is_power_of_two() || boundary < 2 {
                return Err(XspiError::InvalidConfig(
                    "chip-select boundary must be a power of two of at least 2 bytes",
                ));
            }
        }
        Ok(())
    }

    /// CR value with EN cleared and FMODE = indirect write.
    #[must_use]
    pub fn cr(&self) -> u32 {
        let mut cr = u32::from(self.fifo_threshold.saturating_sub(1)) << CR_FTHRES_SHIFT;
        if self.chip_select == ChipSelect::Ncs2 {
            cr |= CR_CSSEL;
        }
        cr
    }

    /// DCR1 value.
    #[must_use]
    pub fn dcr1(&self) -> u32 {
        let devsize = self.device_size_bytes.trailing_zeros().saturating_sub(1);
        let csht = u32::from(self.cs_high_time_cycles.saturating_sub(1));
        let mut dcr1 = (self.memory_type.bits() << DCR1_MTYP_SHIFT)
            | (devsize << DCR1_DEVSIZE_SHIFT)
            | (csht << DCR1_CSHT_SHIFT);
        if self.free_running_clock {
            dcr1 |= DCR1_FRCK;
        }
        if self.clock_mode == ClockMode::Mode3 {
            dcr1 |= DCR1_CKMODE;
        }
        dcr1
    }

    /// DCR2 value.
    #[must_use]
    pub fn dcr2(&self) -> u32 {
        (self.wrap_size.bits() << DCR2_WRAPSIZE_SHIFT)
            | (u32::from(self.clock_prescaler) << DCR2_PRESCALER_SHIFT)
    }

    /// DCR3 value.
    #[must_use]
    pub fn dcr3(&self) -> u32 {
        let csbound = self
            .chip_select_boundary
            .map_or(0, u32::trailing_zeros);
        (csbound << DCR3_CSBOUND_SHIFT) | (u32::from(self.max_transfer) << DCR3_MAXTRAN_SHIFT)
    }

    /// DCR4 value.
    #[must_use]
    pub fn dcr4(&self) -> u32 {
        self.refresh
    }

    /// TCR timing bits (dummy cycles are set per command).
    #[must_use]
    pub fn tcr(&self) -> u32 {
        let mut tcr = 0;
        if self.sample_shifting {
            tcr |= TCR_SSHIFT;
        }
        if self.delay_hold_quarter_cycle {
            tcr |= TCR_DHQC;
        }
        tcr
    }
}

/// Raw register access to one controller register block.
///
/// Implemented by the MMIO block on hardware and by
/// [`MockXspi`](crate::mocks::MockXspi) in tests.
pub trait XspiRegisters {
    /// Read a register.
    fn read(&self, reg: XspiReg) -> u32;

    /// Write a register.
    fn write(&mut self, reg: XspiReg, value: u32);

    /// Read-modify-write a register.
    fn modify<F: FnOnce(u32) -> u32>(&mut self, reg: XspiReg, f: F) {
        let value = self.read(reg);
        self.write(reg, f(value));
    }
}

impl<T: XspiRegisters + ?Sized> XspiRegisters for &mut T {
    fn read(&self, reg: XspiReg) -> u32 {
        (**self).read(reg)
    }

    fn write(&mut self, reg: XspiReg, value: u32) {
        (**self).write(reg, value);
    }
}

/// Controller operations shared by the raw register path and the bus driver.
pub trait XspiPort {
    /// Which controller this is.
    fn instance(&self) -> XspiInstance;

    /// Current functional mode.
    fn mode(&self) -> ControllerMode;

    /// True while a transfer is in flight.
    fn is_busy(&self) -> bool;

    /// Set EN.
    fn enable(&mut self);

    /// Clear EN.
    fn disable(&mut self);

    /// Abort any in-flight transfer and select indirect write mode.
    ///
    /// Legal from any mode. Waits for the abort to self-clear and for BUSY to
    /// drop. If the controller is disabled it stays disabled.
    fn enter_indirect_mode(&mut self);

    /// Issue one command without a data phase and wait for completion.
    ///
    /// # Errors
    ///
    /// - [`XspiError::NotIndirect`] unless the controller is in indirect mode
    /// - [`XspiError::Busy`] if a transfer is in flight; nothing is written
    /// - [`XspiError::InvalidCommand`] if the descriptor cannot be encoded or
    ///   carries a data phase
    /// - [`XspiError::TransferError`] if the controller reports SR.TEF
    fn issue_command(&mut self, command: &XspiCommand) -> Result<(), XspiError>;
}

/// Register-level controller access without a software mode model.
pub struct RawXspi<R> {
    instance: XspiInstance,
    regs: R,
}

impl<R: XspiRegisters> RawXspi<R> {
    /// Wrap a register block.
    pub const fn new(instance: XspiInstance, regs: R) -> Self {
        Self { instance, regs }
    }

    /// Borrow the register block.
    pub fn registers(&self) -> &R {
        &self.regs
    }

    /// Mode as encoded by CR.EN and CR.FMODE.
    pub fn hardware_mode(&self) -> ControllerMode {
        let cr = self.regs.read(XspiReg::Cr);
        if cr & CR_EN == 0 {
            ControllerMode::Disabled
        } else if (cr & CR_FMODE_MASK) >> CR_FMODE_SHIFT == FMODE_MEMORY_MAPPED {
            ControllerMode::MemoryMapped
        } else {
            ControllerMode::Indirect
        }
    }

    fn wait_while_busy(&self) {
        while self.regs.read(XspiReg::Sr) & SR_BUSY != 0 {
            core::hint::spin_loop();
        }
    }

    /// Program the command registers; the final write starts the transfer.
    fn start_command(&mut self, command: &XspiCommand) {
        self.regs.write(XspiReg::Ccr, command.ccr());
        let dcyc = u32::from(command.dummy_cycles) & TCR_DCYC_MASK;
        self.regs.modify(XspiReg::Tcr, |tcr| (tcr & !TCR_DCYC_MASK) | dcyc);
        self.regs.write(XspiReg::Dlr, 0);
        self.regs.write(XspiReg::Ir, command.instruction);
        if command.has_address() {
            self.regs.write(XspiReg::Ar, command.address);
        }
    }

    /// Spin until TCF or TEF, then clear whichever flag ended the wait.
    fn wait_transfer_complete(&mut self) -> Result<(), XspiError> {
        let sr = loop {
            let sr = self.regs.read(XspiReg::Sr);
            if sr & (SR_TCF | SR_TEF) != 0 {
                break sr;
            }
            core::hint::spin_loop();
        };
        if sr & SR_TEF != 0 {
            self.regs.write(XspiReg::Fcr, FCR_CTEF | FCR_CTCF);
            #[cfg(feature = "defmt")]
            defmt::warn!("{}: transfer error, sr={=u32:#x}", self.instance.name(), sr);
            return Err(XspiError::TransferError);
        }
        self.regs.write(XspiReg::Fcr, FCR_CTCF);
        Ok(())
    }

    /// Write every configuration register with EN cleared, then enable.
    fn apply_init(&mut self, config: &XspiInitConfig) {
        self.wait_while_busy();
        self.regs.modify(XspiReg::Cr, |cr| cr & !CR_EN);
        self.regs.write(XspiReg::Dcr1, config.dcr1());
        self.regs.write(XspiReg::Dcr2, config.dcr2());
        self.regs.write(XspiReg::Dcr3, config.dcr3());
        self.regs.write(XspiReg::Dcr4, config.dcr4());
        self.regs.write(XspiReg::Tcr, config.tcr());
        self.regs.write(XspiReg::Cr, config.cr());
        self.wait_while_busy();
        self.regs.modify(XspiReg::Cr, |cr| cr | CR_EN);
    }

    fn configure_memory_mapped(&mut self, read: &XspiCommand, write: &XspiCommand) {
        self.wait_while_busy();
        self.regs.write(XspiReg::Ccr, read.ccr());
        let read_dcyc = u32::from(read.dummy_cycles) & TCR_DCYC_MASK;
        self.regs.modify(XspiReg::Tcr, |tcr| (tcr & !TCR_DCYC_MASK) | read_dcyc);
        self.regs.write(XspiReg::Ir, read.instruction);
        self.regs.write(XspiReg::Wccr, write.ccr());
        self.regs.write(XspiReg::Wtcr, u32::from(write.dummy_cycles) & TCR_DCYC_MASK);
        self.regs.write(XspiReg::Wir, write.instruction);
        self.regs.modify(XspiReg::Cr, |cr| {
            (cr & !CR_FMODE_MASK) | (FMODE_MEMORY_MAPPED << CR_FMODE_SHIFT)
        });
    }
}

fn validate_control_command(command: &XspiCommand) -> Result<(), XspiError> {
    command.validate()?;
    if command.has_data() {
        return Err(XspiError::InvalidCommand(
            "data phases are only used through memory-mapped mode",
        ));
    }
    Ok(())
}

fn validate_mapped_command(command: &XspiCommand) -> Result<(), XspiError> {
    command.validate()?;
    if !command.has_address() || !command.has_data() {
        return Err(XspiError::InvalidCommand(
            "memory-mapped commands need address and data phases",
        ));
    }
    Ok(())
}

impl<R: XspiRegisters> XspiPort for RawXspi<R> {
    fn instance(&self) -> XspiInstance {
        self.instance
    }

    fn mode(&self) -> ControllerMode {
        self.hardware_mode()
    }

    fn is_busy(&self) -> bool {
        self.regs.read(XspiReg::Sr) & SR_BUSY != 0
    }

    fn enable(&mut self) {
        self.regs.modify(XspiReg::Cr, |cr| cr | CR_EN);
    }

    fn disable(&mut self) {
        self.regs.modify(XspiReg::Cr, |cr| cr & !CR_EN);
    }

    fn enter_indirect_mode(&mut self) {
        self.regs.modify(XspiReg::Cr, |cr| cr | CR_ABORT);
        while self.regs.read(XspiReg::Cr) & CR_ABORT != 0 {
            core::hint::spin_loop();
        }
        self.regs.modify(XspiReg::Cr, |cr| {
            (cr & !CR_FMODE_MASK) | (FMODE_INDIRECT_WRITE << CR_FMODE_SHIFT)
        });
        self.wait_while_busy();
    }

    fn issue_command(&mut self, command: &XspiCommand) -> Result<(), XspiError> {
        validate_control_command(command)?;
        if self.hardware_mode() != ControllerMode::Indirect {
            return Err(XspiError::NotIndirect);
        }
        if self.is_busy() {
            return Err(XspiError::Busy);
        }
        self.start_command(command);
        self.wait_transfer_complete()
    }
}

/// Bus driver for one XSPI controller.
///
/// Tracks the controller mode and the in-flight transfer in software and
/// rejects operations the model does not allow. Every transition resynchronises
/// the model from the hardware so it cannot drift.
pub struct ExternalMemoryController<R> {
    raw: RawXspi<R>,
    mode: ControllerMode,
    busy: bool,
}

impl<R: XspiRegisters> ExternalMemoryController<R> {
    /// Configure the controller and leave it enabled in indirect mode.
    ///
    /// # Errors
    ///
    /// [`XspiError::InvalidConfig`] if `config` fails validation. No register
    /// is written in that case.
    pub fn init(
        instance: XspiInstance,
        regs: R,
        config: &XspiInitConfig,
    ) -> Result<Self, XspiError> {
        config.validate()?;
        let mut raw = RawXspi::new(instance, regs);
        raw.apply_init(config);
        let mode = raw.hardware_mode();
        #[cfg(feature = "defmt")]
        defmt::debug!(
            "{}: init dcr1={=u32:#x} dcr3={=u32:#x}",
            instance.name(),
            config.dcr1(),
            config.dcr3()
        );
        Ok(Self {
            raw,
            mode,
            busy: false,
        })
    }

    /// Take over a controller configured by earlier code, adopting its
    /// current hardware mode.
    pub fn attach(instance: XspiInstance, regs: R) -> Self {
        let raw = RawXspi::new(instance, regs);
        let mode = raw.hardware_mode();
        Self {
            raw,
            mode,
            busy: false,
        }
    }

    /// Switch from indirect to memory-mapped mode with the given read and
    /// write command templates.
    ///
    /// # Errors
    ///
    /// - [`XspiError::NotIndirect`] unless the controller is in indirect mode
    /// - [`XspiError::Busy`] if a transfer is in flight
    /// - [`XspiError::InvalidCommand`] if either template lacks an address or
    ///   data phase
    pub fn enable_memory_mapped(
        &mut self,
        read: &XspiCommand,
        write: &XspiCommand,
    ) -> Result<(), XspiError> {
        validate_mapped_command(read)?;
        validate_mapped_command(write)?;
        if self.mode != ControllerMode::Indirect {
            return Err(XspiError::NotIndirect);
        }
        if self.is_busy() {
            return Err(XspiError::Busy);
        }
        self.raw.configure_memory_mapped(read, write);
        self.mode = self.raw.hardware_mode();
        #[cfg(feature = "defmt")]
        defmt::debug!("{}: memory-mapped", self.raw.instance.name());
        Ok(())
    }

    /// Leave memory-mapped mode. Same as [`XspiPort::enter_indirect_mode`].
    pub fn disable_memory_mapped(&mut self) {
        self.enter_indirect_mode();
    }

}

impl<R: XspiRegisters> XspiPort for ExternalMemoryController<R> {
    fn instance(&self) -> XspiInstance {
        self.raw.instance
    }

    fn mode(&self) -> ControllerMode {
        self.mode
    }

    fn is_busy(&self) -> bool {
        self.busy || self.raw.is_busy()
    }

    fn enable(&mut self) {
        self.raw.enable();
        self.mode = self.raw.hardware_mode();
    }

    fn disable(&mut self) {
        self.raw.disable();
        self.mode = ControllerMode::Disabled;
    }

    fn enter_indirect_mode(&mut self) {
        self.raw.enter_indirect_mode();
        self.busy = false;
        self.mode = self.raw.hardware_mode();
    }

    fn issue_command(&mut self, command: &XspiCommand) -> Result<(), XspiError> {
        validate_control_command(command)?;
        if self.mode != ControllerMode::Indirect {
            return Err(XspiError::NotIndirect);
        }
        if self.is_busy() {
            return Err(XspiError::Busy);
        }
        self.busy = true;
        self.raw.start_command(command);
        let result = self.raw.wait_transfer_complete();
        self.busy = false;
        result
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
