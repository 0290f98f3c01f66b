//! MPU (Memory Protection Unit) configuration for STM32N6 / Cortex-M55
//!
//! # Purpose
//!
//! The boot stage enables the Cortex-M55 I-cache and D-cache right after the
//! MPU is programmed. Three memories need a policy that differs from the
//! default memory map:
//!
//!   (a) general working memory, cached write-back for speed;
//!   (b) the PSRAM window, a DMA target, cached **write-through** so DMA
//!       engines never read a line that only exists dirty in the D-cache;
//!   (c) AXISRAM5, shared with the NPU, mapped as **Device** memory so the
//!       NPU sees every CPU write without a cache flush handshake.
//!
//! Everything else falls back to the architectural default map for privileged
//! code (`MPU_CTRL.PRIVDEFENA`).
//!
//! # References
//!
//! - ARMv8-M Architecture Reference Manual DDI0553 §B10 (Protected Memory System Architecture)
//! - Arm Cortex-M55 TRM 101051 §5 (MPU, 32-byte granularity)
//! - ST AN4838: Introduction to MPU Management on STM32 MCUs
//!
//! # ARMv8-M Region Encoding
//!
//! Unlike the ARMv7-M RASR size field, ARMv8-M regions are described by an
//! inclusive base/limit pair with 32-byte granularity:
//!
//! | Register | Bits     | Field                                   |
//! |----------|----------|-----------------------------------------|
//! | RBAR     | [31:5]   | BASE (address bits 31:5)                |
//! | RBAR     | [4:3]    | SH: 00 non-shareable, 10 outer, 11 inner|
//! | RBAR     | [2:1]    | AP: 00 privileged RW, 01 RW any         |
//! | RBAR     | [0]      | XN: execute never                       |
//! | RLAR     | [31:5]   | LIMIT (address bits 31:5, low bits = 1) |
//! | RLAR     | [4]      | PXN: privileged execute never (v8.1-M)  |
//! | RLAR     | [3:1]    | AttrIndx into MAIR0/MAIR1               |
//! | RLAR     | [0]      | EN                                      |
//!
//! # Memory Attribute Encodings (MAIR)
//!
//! | Class                     | MAIR byte | Meaning                                   |
//! |---------------------------|-----------|-------------------------------------------|
//! | `CacheableWriteBack`      | `0x77`    | Normal, inner/outer WB transient, RW-alloc|
//! | `CacheableWriteThrough`   | `0x33`    | Normal, inner/outer WT transient, RW-alloc|
//! | `DeviceNonCacheable`      | `0x00`    | Device-nGnRnE                             |

/// MPU configuration error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror_no_std::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MpuError {
    /// Base address is not 32-byte aligned.
    #[error("region base {0:#010x} is not 32-byte aligned")]
    BaseMisaligned(u32),
    /// Limit address does not end a 32-byte granule (`limit & 0x1F != 0x1F`).
    #[error("region limit {0:#010x} does not end a 32-byte granule")]
    LimitMisaligned(u32),
    /// Limit address is below the base address.
    #[error("region limit is below its base")]
    LimitBelowBase,
    /// Device memory must never be executable (speculative instruction fetch
    /// from Device memory is architecturally UNPREDICTABLE).
    #[error("device memory region allows instruction fetch")]
    ExecutableDeviceMemory,
    /// Two regions in one table intersect.
    #[error("regions {first} and {second} overlap")]
    Overlap {
        /// Slot of the earlier region.
        first: u8,
        /// Slot of the later region.
        second: u8,
    },
    /// More regions than the table can hold.
    #[error("region table is full")]
    TooManyRegions,
    /// The region table was already installed in this boot stage.
    #[error("region table already installed")]
    AlreadyLocked,
    /// A read-back attribute index holds an encoding this crate never writes.
    #[error("attribute index {0} holds an unknown encoding")]
    UnknownAttribute(u8),
}

/// Cache and ordering policy of a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AttributeClass {
    /// General working memory.
    CacheableWriteBack,
    /// PSRAM subject to DMA. Write-through keeps memory current on every
    /// store, so a DMA read never misses data held dirty in the D-cache.
    CacheableWriteThrough,
    /// Buffers shared with a second bus master (NPU). Bypasses the cache.
    DeviceNonCacheable,
}

/// Static mapping from attribute class to MAIR slot and encoding.
///
/// Every class owns a fixed AttrIndx so that a read-back RLAR identifies
/// the class without consulting the table that wrote it.
pub struct MemoryAttributeTable;

impl MemoryAttributeTable {
    /// Every class, in AttrIndx order.
    pub const CLASSES: [AttributeClass; 3] = [
        AttributeClass::CacheableWriteBack,
        AttributeClass::CacheableWriteThrough,
        AttributeClass::DeviceNonCacheable,
    ];

    /// AttrIndx assigned to `class`.
    #[must_use]
    pub const fn index(class: AttributeClass) -> u8 {
        match class {
            AttributeClass::CacheableWriteBack => 0,
            AttributeClass::CacheableWriteThrough => 1,
            AttributeClass::DeviceNonCacheable => 2,
        }
    }

    /// MAIR byte for `class`.
    #[must_use]
    pub const fn encoding(class: AttributeClass) -> u8 {
        match class {
            AttributeClass::CacheableWriteBack => 0x77,
            AttributeClass::CacheableWriteThrough => 0x33,
            AttributeClass::DeviceNonCacheable => 0x00,
        }
    }

    /// Class whose MAIR byte is `encoding`, if any.
    #[must_use]
    pub fn decode(encoding: u8) -> Option<AttributeClass> {
        Self::CLASSES
            .into_iter()
            .find(|&class| Self::encoding(class) == encoding)
    }
}

/// Data access permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AccessPermission {
    /// Read/write from privileged and unprivileged code.
    AllReadWrite,
    /// Read/write from privileged code only.
    PrivilegedReadWrite,
}

impl AccessPermission {
    const fn ap_bits(self) -> u32 {
        match self {
            Self::PrivilegedReadWrite => 0b00,
            Self::AllReadWrite => 0b01,
        }
    }
}

/// Instruction fetch policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InstructionAccess {
    /// Code may execute from the region.
    Allowed,
    /// XN and PXN both set.
    Denied,
}

/// Shareability domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Shareability {
    /// Not shared.
    NonShareable,
    /// Outer shareable.
    OuterShareable,
    /// Inner shareable.
    InnerShareable,
}

impl Shareability {
    const fn sh_bits(self) -> u32 {
        match self {
            Self::NonShareable => 0b00,
            Self::OuterShareable => 0b10,
            Self::InnerShareable => 0b11,
        }
    }

    const fn from_bits(bits: u32) -> Self {
        match bits & 0b11 {
            0b10 => Self::OuterShareable,
            0b11 => Self::InnerShareable,
            _ => Self::NonShareable,
        }
    }
}

/// Unvalidated region description, as written in board data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RegionSpec {
    /// First byte of the region.
    pub base: u32,
    /// Last byte of the region (inclusive).
    pub limit: u32,
    /// Cache policy.
    pub class: AttributeClass,
    /// Data access permission.
    pub access: AccessPermission,
    /// Instruction fetch policy.
    pub execute: InstructionAccess,
    /// Shareability.
    pub shareability: Shareability,
}

/// RBAR.XN.
pub const RBAR_XN: u32 = 1 << 0;
/// RLAR.EN.
pub const RLAR_EN: u32 = 1 << 0;
/// RLAR.PXN.
pub const RLAR_PXN: u32 = 1 << 4;
/// MPU_CTRL.ENABLE.
pub const CTRL_ENABLE: u32 = 1 << 0;
/// MPU_CTRL.PRIVDEFENA: privileged accesses to unmapped memory use the
/// default memory map.
pub const CTRL_PRIVDEFENA: u32 = 1 << 2;
/// Address bits kept by RBAR/RLAR.
const ADDRESS_MASK: u32 = !0x1F;

/// A validated MPU region.
///
/// Construction via [`MemoryRegion::new`] enforces 32-byte granularity,
/// `base <= limit` and non-executable Device memory, so an invalid region
/// can never reach the hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MemoryRegion {
    spec: RegionSpec,
}

impl MemoryRegion {
    /// Validate a region description.
    ///
    /// # Errors
    ///
    /// - [`MpuError::BaseMisaligned`] if `base` is not 32-byte aligned
    /// - [`MpuError::LimitMisaligned`] if `limit` does not end a granule
    /// - [`MpuError::LimitBelowBase`] if `limit < base`
    /// - [`MpuError::ExecutableDeviceMemory`] for executable Device memory
    pub fn new(spec: RegionSpec) -> Result<Self, MpuError> {
        if spec.base & !ADDRESS_MASK != 0 {
            return Err(MpuError::BaseMisaligned(spec.base));
        }
        if spec.limit & !ADDRESS_MASK != !ADDRESS_MASK {
            return Err(MpuError::LimitMisaligned(spec.limit));
        }
        if spec.limit < spec.base {
            return Err(MpuError::LimitBelowBase);
        }
        if spec.class == AttributeClass::DeviceNonCacheable
            && spec.execute != InstructionAccess::Denied
        {
            return Err(MpuError::ExecutableDeviceMemory);
        }
        Ok(Self { spec })
    }

    /// The validated description.
    #[must_use]
    pub fn spec(&self) -> &RegionSpec {
        &self.spec
    }

    /// First byte.
    #[must_use]
    pub fn base(&self) -> u32 {
        self.spec.base
    }

    /// Last byte (inclusive).
    #[must_use]
    pub fn limit(&self) -> u32 {
        self.spec.limit
    }

    /// Cache policy.
    #[must_use]
    pub fn class(&self) -> AttributeClass {
        self.spec.class
    }

    /// Size in bytes. Saturates for a region covering the whole 4 GB map.
    #[must_use]
    pub fn size(&self) -> u32 {
        self.spec.limit.wrapping_sub(self.spec.base).saturating_add(1)
    }

    /// Check whether this region shares at least one byte with `other`.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.spec.base <= other.spec.limit && other.spec.base <= self.spec.limit
    }

    /// RBAR encoding.
    #[must_use]
    pub fn rbar(&self) -> u32 {
        let mut rbar = (self.spec.base & ADDRESS_MASK)
            | (self.spec.shareability.sh_bits() << 3)
            | (self.spec.access.ap_bits() << 1);
        if self.spec.execute == InstructionAccess::Denied {
            rbar |= RBAR_XN;
        }
        rbar
    }

    /// RLAR encoding, region enabled.
    #[must_use]
    pub fn rlar(&self) -> u32 {
        let mut rlar = (self.spec.limit & ADDRESS_MASK)
            | (u32::from(MemoryAttributeTable::index(self.spec.class)) << 1)
            | RLAR_EN;
        if self.spec.execute == InstructionAccess::Denied {
            rlar |= RLAR_PXN;
        }
        rlar
    }

    /// Rebuild a region from its RBAR/RLAR pair and the MAIR byte at its
    /// AttrIndx.
    ///
    /// # Errors
    ///
    /// [`MpuError::UnknownAttribute`] if the MAIR byte is not one of
    /// [`MemoryAttributeTable::CLASSES`], or any [`MemoryRegion::new`] error.
    #[allow(clippy::cast_possible_truncation)] // AttrIndx is a 3-bit field
    pub fn decode(rbar: u32, rlar: u32, attribute: u8) -> Result<Self, MpuError> {
        let index = ((rlar >> 1) & 0b111) as u8;
        let class =
            MemoryAttributeTable::decode(attribute).ok_or(MpuError::UnknownAttribute(index))?;
        let access = if (rbar >> 1) & 0b11 == 0b01 {
            AccessPermission::AllReadWrite
        } else {
            AccessPermission::PrivilegedReadWrite
        };
        let execute = if rbar & RBAR_XN != 0 {
            InstructionAccess::Denied
        } else {
            InstructionAccess::Allowed
        };
        Self::new(RegionSpec {
            base: rbar & ADDRESS_MASK,
            limit: (rlar & ADDRESS_MASK) | !ADDRESS_MASK,
            class,
            access,
            execute,
            shareability: Shareability::from_bits(rbar >> 3),
        })
    }
}

/// Number of MPU regions this crate will program.
pub const MAX_REGIONS: usize = 8;

/// An ordered, non-overlapping set of regions. Slot `n` holds region `n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionTable {
    regions: heapless::Vec<MemoryRegion, MAX_REGIONS>,
}

impl RegionTable {
    /// Validate every region and reject intersecting pairs.
    ///
    /// # Errors
    ///
    /// - any [`MemoryRegion::new`] error for the first invalid region
    /// - [`MpuError::Overlap`] naming the first intersecting pair
    /// - [`MpuError::TooManyRegions`] above [`MAX_REGIONS`]
    pub fn new(specs: &[RegionSpec]) -> Result<Self, MpuError> {
        let mut regions = heapless::Vec::new();
        for spec in specs {
            let region = MemoryRegion::new(*spec)?;
            regions
                .push(region)
                .map_err(|_| MpuError::TooManyRegions)?;
        }
        let table = Self { regions };
        table.check_overlaps()?;
        Ok(table)
    }

    #[allow(clippy::cast_possible_truncation)] // slots < MAX_REGIONS
    fn check_overlaps(&self) -> Result<(), MpuError> {
        for (i, a) in self.regions.iter().enumerate() {
            for (j, b) in self.regions.iter().enumerate().skip(i.saturating_add(1)) {
                if a.overlaps(b) {
                    return Err(MpuError::Overlap {
                        first: i as u8,
                        second: j as u8,
                    });
                }
            }
        }
        Ok(())
    }

    /// Regions in slot order.
    #[must_use]
    pub fn regions(&self) -> &[MemoryRegion] {
        &self.regions
    }

    /// Attribute classes used by the table, each once, in AttrIndx order.
    pub fn classes(&self) -> impl Iterator<Item = AttributeClass> + '_ {
        MemoryAttributeTable::CLASSES
            .into_iter()
            .filter(move |class| self.regions.iter().any(|r| r.class() == *class))
    }

    /// Read `count` slots back from the MPU.
    ///
    /// # Errors
    ///
    /// Any [`MemoryRegion::decode`] error, or [`MpuError::Overlap`] if the
    /// hardware holds intersecting regions.
    pub fn decode<M: MpuRegisters + ?Sized>(mpu: &M, count: u8) -> Result<Self, MpuError> {
        let mut regions = heapless::Vec::new();
        for slot in 0..count {
            let (rbar, rlar) = mpu.read_region(slot);
            if rlar & RLAR_EN == 0 {
                continue;
            }
            #[allow(clippy::cast_possible_truncation)] // AttrIndx is a 3-bit field
            let index = ((rlar >> 1) & 0b111) as u8;
            let region = MemoryRegion::decode(rbar, rlar, mpu.read_attribute(index))?;
            regions
                .push(region)
                .map_err(|_| MpuError::TooManyRegions)?;
        }
        let table = Self { regions };
        table.check_overlaps()?;
        Ok(table)
    }
}

/// Register-level MPU access.
///
/// The hardware implementation in fsbl adds the DSB/ISB barriers around
/// `disable` and `enable`.
pub trait MpuRegisters {
    /// Clear MPU_CTRL.ENABLE.
    fn disable(&mut self);

    /// Select `slot` and write its RBAR/RLAR pair.
    fn write_region(&mut self, slot: u8, rbar: u32, rlar: u32);

    /// Write one MAIR attribute byte, leaving the other slots untouched.
    fn write_attribute(&mut self, index: u8, encoding: u8);

    /// Write MPU_CTRL.
    fn enable(&mut self, ctrl: u32);

    /// Select `slot` and read its RBAR/RLAR pair.
    fn read_region(&self, slot: u8) -> (u32, u32);

    /// Read one MAIR attribute byte.
    fn read_attribute(&self, index: u8) -> u8;
}

/// Installs a region table exactly once per boot stage.
#[derive(Debug, Default)]
pub struct RegionConfigurator {
    locked: bool,
}

impl RegionConfigurator {
    /// A configurator that has not installed anything yet.
    #[must_use]
    pub const fn new() -> Self {
        Self { locked: false }
    }

    /// True once a table has been installed.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Program `table` into the MPU with interrupts masked.
    ///
    /// Order: disable, regions in slot order, each used attribute class once,
    /// enable with `PRIVDEFENA`.
    ///
    /// # Errors
    ///
    /// [`MpuError::AlreadyLocked`] on any call after the first successful one.
    /// The MPU is not touched in that case.
    #[allow(clippy::cast_possible_truncation)] // slots < MAX_REGIONS
    pub fn install<M: MpuRegisters + ?Sized>(
        &mut self,
        mpu: &mut M,
        table: &RegionTable,
    ) -> Result<(), MpuError> {
        if self.locked {
            return Err(MpuError::AlreadyLocked);
        }
        critical_section::with(|_| {
            mpu.disable();
            for (slot, region) in table.regions().iter().enumerate() {
                mpu.write_region(slot as u8, region.rbar(), region.rlar());
            }
            for class in table.classes() {
                mpu.write_attribute(
                    MemoryAttributeTable::index(class),
                    MemoryAttributeTable::encoding(class),
                );
            }
            mpu.enable(CTRL_ENABLE | CTRL_PRIVDEFENA);
        });
        self.locked = true;
        #[cfg(feature = "defmt")]
        defmt::debug!("MPU: {} regions installed and locked", table.regions().len());
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]
mod tests {
    use super::*;

    fn wb(base: u32, limit: u32) -> RegionSpec {
        RegionSpec {
            base,
            limit,
            class: AttributeClass::CacheableWriteBack,
            access: AccessPermission::AllReadWrite,
            execute: InstructionAccess::Allowed,
            shareability: Shareability::NonShareable,
        }
    }

    fn npu_buffers() -> RegionSpec {
        RegionSpec {
            base: 0x342E_0000,
            limit: 0x3434_FFFF,
            class: AttributeClass::DeviceNonCacheable,
            access: AccessPermission::AllReadWrite,
            execute: InstructionAccess::Denied,
            shareability: Shareability::OuterShareable,
        }
    }

    #[test]
    fn attribute_encodings() {
        assert_eq!(MemoryAttributeTable::encoding(AttributeClass::CacheableWriteBack), 0x77);
        assert_eq!(MemoryAttributeTable::encoding(AttributeClass::CacheableWriteThrough), 0x33);
        assert_eq!(MemoryAttributeTable::encoding(AttributeClass::DeviceNonCacheable), 0x00);
        assert_eq!(MemoryAttributeTable::decode(0x33), Some(AttributeClass::CacheableWriteThrough));
        assert_eq!(MemoryAttributeTable::decode(0x44), None);
    }

    #[test]
    fn attribute_indices_are_distinct() {
        let mut seen = [false; 8];
        for class in MemoryAttributeTable::CLASSES {
            let idx = usize::from(MemoryAttributeTable::index(class));
            assert!(!seen[idx]);
            seen[idx] = true;
        }
    }

    #[test]
    fn test_region_rejects_misaligned_base() {
        assert_eq!(
            MemoryRegion::new(wb(0x7000_0010, 0x7000_FFFF)),
            Err(MpuError::BaseMisaligned(0x7000_0010))
        );
    }

    #[test]
    fn test_region_rejects_misaligned_limit() {
        assert_eq!(
            MemoryRegion::new(wb(0x7000_0000, 0x7000_FFF0)),
            Err(MpuError::LimitMisaligned(0x7000_FFF0))
        );
    }

    #[test]
    fn test_region_rejects_limit_below_base() {
        assert_eq!(
            MemoryRegion::new(wb(0x7001_0000, 0x7000_FFFF)),
            Err(MpuError::LimitBelowBase)
        );
    }

    #[test]
    fn test_single_granule_region_is_valid() {
        let region = MemoryRegion::new(wb(0x7000_0000, 0x7000_001F)).unwrap();
        assert_eq!(region.size(), 32);
    }

    #[test]
    fn test_executable_device_memory_is_rejected() {
        let mut spec = npu_buffers();
        spec.execute = InstructionAccess::Allowed;
        assert_eq!(MemoryRegion::new(spec), Err(MpuError::ExecutableDeviceMemory));
    }

    #[test]
    fn test_npu_region_encoding() {
        let region = MemoryRegion::new(npu_buffers()).unwrap();
        // base | SH=10 | AP=01 | XN
        assert_eq!(region.rbar(), 0x342E_0000 | (0b10 << 3) | (0b01 << 1) | 1);
        // limit | PXN | AttrIndx=2 | EN
        assert_eq!(region.rlar(), 0x3434_FFE0 | (1 << 4) | (2 << 1) | 1);
        assert_eq!(region.size(), 448 * 1024);
    }

    #[test]
    fn test_psram_region_encoding() {
        let region = MemoryRegion::new(RegionSpec {
            base: 0x9000_0000,
            limit: 0x91FF_FFFF,
            class: AttributeClass::CacheableWriteThrough,
            access: AccessPermission::PrivilegedReadWrite,
            execute: InstructionAccess::Allowed,
            shareability: Shareability::NonShareable,
        })
        .unwrap();
        assert_eq!(region.rbar(), 0x9000_0000);
        assert_eq!(region.rlar(), 0x91FF_FFE0 | (1 << 1) | 1);
    }

    #[test]
    fn test_decode_inverts_encoding() {
        let region = MemoryRegion::new(npu_buffers()).unwrap();
        let back = MemoryRegion::decode(region.rbar(), region.rlar(), 0x00).unwrap();
        assert_eq!(back, region);
    }

    #[test]
    fn test_decode_unknown_attribute() {
        let region = MemoryRegion::new(npu_buffers()).unwrap();
        assert_eq!(
            MemoryRegion::decode(region.rbar(), region.rlar(), 0xFF),
            Err(MpuError::UnknownAttribute(2))
        );
    }

    #[test]
    fn test_overlap_detection() {
        let a = MemoryRegion::new(wb(0x7000_0000, 0x7000_FFFF)).unwrap();
        let b = MemoryRegion::new(wb(0x7000_FFE0, 0x7001_FFFF)).unwrap();
        let c = MemoryRegion::new(wb(0x7001_0000, 0x7001_FFFF)).unwrap();
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c), "adjacent regions do not overlap");
    }

    #[test]
    fn test_table_rejects_overlapping_regions() {
        let result = RegionTable::new(&[
            wb(0x7000_0000, 0x7000_FFFF),
            npu_buffers(),
            wb(0x7000_8000, 0x7001_FFFF),
        ]);
        assert_eq!(result, Err(MpuError::Overlap { first: 0, second: 2 }));
    }

    #[test]
    fn test_table_capacity() {
        let specs: heapless::Vec<RegionSpec, 9> = (0..9u32)
            .map(|i| wb(0x7000_0000 + i * 0x100, 0x7000_00FF + i * 0x100))
            .collect();
        assert_eq!(RegionTable::new(&specs), Err(MpuError::TooManyRegions));
    }

    #[test]
    fn test_classes_listed_once_in_index_order() {
        let table = RegionTable::new(&[
            npu_buffers(),
            wb(0x7000_0000, 0x7000_FFFF),
            wb(0x7100_0000, 0x7100_FFFF),
        ])
        .unwrap();
        let classes: heapless::Vec<AttributeClass, 3> = table.classes().collect();
        assert_eq!(
            classes.as_slice(),
            &[AttributeClass::CacheableWriteBack, AttributeClass::DeviceNonCacheable]
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod install_tests {
    use super::*;
    use crate::board::BoardProfile;
    use crate::mocks::{new_event_log, HwEvent, MockMpu};

    #[test]
    fn test_install_order_disable_regions_attributes_enable() {
        let log = new_event_log();
        let mut mpu = MockMpu::new(log.clone());
        let table = BoardProfile::discovery().region_table().unwrap();
        let mut configurator = RegionConfigurator::new();

        configurator.install(&mut mpu, &table).unwrap();

        let events = log.borrow();
        assert_eq!(events.first(), Some(&HwEvent::MpuDisabled));
        assert_eq!(
            events.last(),
            Some(&HwEvent::MpuEnabled {
                ctrl: CTRL_ENABLE | CTRL_PRIVDEFENA
            })
        );
        let slots: heapless::Vec<u8, 8> = events
            .iter()
            .filter_map(|e| match e {
                HwEvent::MpuRegion { slot, .. } => Some(*slot),
                _ => None,
            })
            .collect();
        assert_eq!(slots.as_slice(), &[0, 1, 2]);
        let attrs: heapless::Vec<(u8, u8), 8> = events
            .iter()
            .filter_map(|e| match e {
                HwEvent::MpuAttribute { index, encoding } => Some((*index, *encoding)),
                _ => None,
            })
            .collect();
        assert_eq!(attrs.as_slice(), &[(0, 0x77), (1, 0x33), (2, 0x00)]);
        let last_region = events
            .iter()
            .rposition(|e| matches!(e, HwEvent::MpuRegion { .. }))
            .unwrap();
        let first_attr = events
            .iter()
            .position(|e| matches!(e, HwEvent::MpuAttribute { .. }))
            .unwrap();
        assert!(last_region < first_attr);
    }

    #[test]
    fn test_second_install_is_rejected_without_touching_mpu() {
        let log = new_event_log();
        let mut mpu = MockMpu::new(log.clone());
        let table = BoardProfile::custom().region_table().unwrap();
        let mut configurator = RegionConfigurator::new();

        configurator.install(&mut mpu, &table).unwrap();
        assert!(configurator.is_locked());
        let writes = log.borrow().len();

        assert_eq!(
            configurator.install(&mut mpu, &table),
            Err(MpuError::AlreadyLocked)
        );
        assert_eq!(log.borrow().len(), writes);
    }

    #[test]
    fn test_readback_yields_three_distinct_classes() {
        let mut mpu = MockMpu::new(new_event_log());
        let table = BoardProfile::discovery().region_table().unwrap();
        RegionConfigurator::new().install(&mut mpu, &table).unwrap();

        let back = RegionTable::decode(&mpu, 8).unwrap();
        assert_eq!(back, table);
        let classes: heapless::Vec<AttributeClass, 3> =
            back.regions().iter().map(MemoryRegion::class).collect();
        assert_eq!(
            classes.as_slice(),
            &[
                AttributeClass::CacheableWriteBack,
                AttributeClass::CacheableWriteThrough,
                AttributeClass::DeviceNonCacheable
            ]
        );
    }
}
