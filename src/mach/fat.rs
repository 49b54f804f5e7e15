//! Fat (universal) envelope layouts: a fat header followed by per-slice
//! architecture records, 32- or 64-bit wide.

use std::fmt;

use scroll::{Endian, Pread, Pwrite, SizeWith};

use crate::error::Result;
use crate::mach::cputype::{cpu_type_to_str, CpuSubtype, CpuType};

pub const FAT_MAGIC: u32 = 0xcafe_babe;
pub const FAT_CIGAM: u32 = 0xbeba_feca;
pub const FAT_MAGIC_64: u32 = 0xcafe_babf;
pub const FAT_CIGAM_64: u32 = 0xbfba_feca;

pub fn is_fat_magic(magic: u32) -> bool {
    matches!(magic, FAT_MAGIC | FAT_CIGAM | FAT_MAGIC_64 | FAT_CIGAM_64)
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pread, Pwrite, SizeWith)]
pub struct FatHeader {
    pub magic: u32,
    pub nfat_arch: u32,
}

pub const SIZEOF_FAT_HEADER: usize = 8;

#[repr(C)]
#[derive(Clone, Copy, Default, Pread, Pwrite, SizeWith)]
/// A 32-bit fat architecture record
pub struct FatArch {
    pub cputype: CpuType,
    pub cpusubtype: CpuSubtype,
    /// file offset of the slice
    pub offset: u32,
    /// size of the slice in bytes
    pub size: u32,
    /// alignment as a power of 2
    pub align: u32,
}

pub const SIZEOF_FAT_ARCH: usize = 20;

#[repr(C)]
#[derive(Clone, Copy, Default, Pread, Pwrite, SizeWith)]
/// A 64-bit fat architecture record
pub struct FatArch64 {
    pub cputype: CpuType,
    pub cpusubtype: CpuSubtype,
    pub offset: u64,
    pub size: u64,
    pub align: u32,
    pub reserved: u32,
}

pub const SIZEOF_FAT_ARCH_64: usize = 32;

impl fmt::Debug for FatArch {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {} offset: {} size: {} align: {}",
            cpu_type_to_str(self.cputype),
            self.cpusubtype,
            self.offset,
            self.size,
            self.align
        )
    }
}

impl fmt::Debug for FatArch64 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {} offset: {} size: {} align: {}",
            cpu_type_to_str(self.cputype),
            self.cpusubtype,
            self.offset,
            self.size,
            self.align
        )
    }
}

/// What the fat handler needs from an architecture record, independent of the
/// record's width.
pub trait RawFatArch: Copy {
    const SIZEOF: usize;

    fn parse(bytes: &[u8], offset: usize, le: Endian) -> Result<Self>;

    fn cputype(&self) -> CpuType;
    fn cpusubtype(&self) -> CpuSubtype;
    fn offset(&self) -> u64;
    fn size(&self) -> u64;
}

impl RawFatArch for FatArch {
    const SIZEOF: usize = SIZEOF_FAT_ARCH;

    fn parse(bytes: &[u8], offset: usize, le: Endian) -> Result<FatArch> {
        Ok(bytes.pread_with(offset, le)?)
    }

    fn cputype(&self) -> CpuType {
        self.cputype
    }

    fn cpusubtype(&self) -> CpuSubtype {
        self.cpusubtype
    }

    fn offset(&self) -> u64 {
        u64::from(self.offset)
    }

    fn size(&self) -> u64 {
        u64::from(self.size)
    }
}

impl RawFatArch for FatArch64 {
    const SIZEOF: usize = SIZEOF_FAT_ARCH_64;

    fn parse(bytes: &[u8], offset: usize, le: Endian) -> Result<FatArch64> {
        Ok(bytes.pread_with(offset, le)?)
    }

    fn cputype(&self) -> CpuType {
        self.cputype
    }

    fn cpusubtype(&self) -> CpuSubtype {
        self.cpusubtype
    }

    fn offset(&self) -> u64 {
        self.offset
    }

    fn size(&self) -> u64 {
        self.size
    }
}

#[test]
fn sizes_match_the_on_disk_layouts() {
    use std::mem;
    assert_eq!(mem::size_of::<FatHeader>(), SIZEOF_FAT_HEADER);
    assert_eq!(mem::size_of::<FatArch>(), SIZEOF_FAT_ARCH);
    assert_eq!(mem::size_of::<FatArch64>(), SIZEOF_FAT_ARCH_64);
}

#[test]
fn swapped_magics_round_trip() {
    assert_eq!(FAT_MAGIC.swap_bytes(), FAT_CIGAM);
    assert_eq!(FAT_MAGIC_64.swap_bytes(), FAT_CIGAM_64);
}
