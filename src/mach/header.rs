//! A header contains minimal architecture information, the binary kind, the number of load commands, as well as an endianness hint

use std::fmt;

use plain::Plain;
use scroll::{Endian, Pread, Pwrite, SizeWith};

use crate::container::{Container, Ctx};
use crate::error::{Error, Result};
use crate::mach::cputype::{cpu_type_to_str, CpuSubtype, CpuType};

// Constants for the flags field of the mach_header
/// the object file has no undefined references
pub const MH_NOUNDEFS: u32 = 0x1;
/// the object file is the output of an incremental link against a base file and can't be
/// link edited again
pub const MH_INCRLINK: u32 = 0x2;
/// the object file is input for the dynamic linker and can't be staticly link edited again
pub const MH_DYLDLINK: u32 = 0x4;
/// the object file's undefined references are bound by the dynamic linker when loaded.
pub const MH_BINDATLOAD: u32 = 0x8;
/// the file has its dynamic undefined references prebound.
pub const MH_PREBOUND: u32 = 0x10;
/// the file has its read-only and read-write segments split
pub const MH_SPLIT_SEGS: u32 = 0x20;
/// the shared library init routine is to be run lazily via catching memory faults to its writeable
/// segments (obsolete)
pub const MH_LAZY_INIT: u32 = 0x40;
/// the image is using two-level name space bindings
pub const MH_TWOLEVEL: u32 = 0x80;
/// the executable is forcing all images to use flat name space bindings
pub const MH_FORCE_FLAT: u32 = 0x100;
/// this umbrella guarantees no multiple defintions of symbols in its sub-images so the
/// two-level namespace hints can always be used.
pub const MH_NOMULTIDEFS: u32 = 0x200;
/// do not have dyld notify the prebinding agent about this executable
pub const MH_NOFIXPREBINDING: u32 = 0x400;
/// the binary is not prebound but can have its prebinding redone. only used when MH_PREBOUND is not set.
pub const MH_PREBINDABLE: u32 = 0x800;
/// indicates that this binary binds to all two-level namespace modules of its dependent libraries.
/// Only used when MH_PREBINDABLE and MH_TWOLEVEL are both set.
pub const MH_ALLMODSBOUND: u32 = 0x1000;
/// safe to divide up the sections into sub-sections via symbols for dead code stripping
pub const MH_SUBSECTIONS_VIA_SYMBOLS: u32 = 0x2000;
/// the binary has been canonicalized via the unprebind operation
pub const MH_CANONICAL: u32 = 0x4000;
/// the final linked image contains external weak symbols
pub const MH_WEAK_DEFINES: u32 = 0x8000;
/// the final linked image uses weak symbols
pub const MH_BINDS_TO_WEAK: u32 = 0x10000;
/// When this bit is set, all stacks in the task will be given stack execution privilege.
/// Only used in MH_EXECUTE filetypes.
pub const MH_ALLOW_STACK_EXECUTION: u32 = 0x20000;
/// When this bit is set, the binary declares it is safe for use in processes with uid zero
pub const MH_ROOT_SAFE: u32 = 0x40000;
/// When this bit is set, the binary declares it is safe for use in processes when issetugid() is true
pub const MH_SETUID_SAFE: u32 = 0x80000;
/// When this bit is set on a dylib,  the static linker does not need to examine dependent dylibs to
/// see if any are re-exported
pub const MH_NO_REEXPORTED_DYLIBS: u32 = 0x100000;
/// When this bit is set, the OS will load the main executable at a random address.
/// Only used in MH_EXECUTE filetypes.
pub const MH_PIE: u32 = 0x200000;
/// Only for use on dylibs.  When linking against a dylib that has this bit set, the static linker
/// will automatically not create a LC_LOAD_DYLIB load command to the dylib if no symbols are being
/// referenced from the dylib.
pub const MH_DEAD_STRIPPABLE_DYLIB: u32 = 0x400000;
/// Contains a section of type S_THREAD_LOCAL_VARIABLES
pub const MH_HAS_TLV_DESCRIPTORS: u32 = 0x800000;
/// When this bit is set, the OS will run the main executable with a non-executable heap even on
/// platforms (e.g. i386) that don't require it. Only used in MH_EXECUTE filetypes.
pub const MH_NO_HEAP_EXECUTION: u32 = 0x1000000;
/// The code was linked for use in an application extension.
pub const MH_APP_EXTENSION_SAFE: u32 = 0x2000000;

#[inline(always)]
pub fn flag_to_str(flag: u32) -> &'static str {
    match flag {
        MH_NOUNDEFS => "MH_NOUNDEFS",
        MH_INCRLINK => "MH_INCRLINK",
        MH_DYLDLINK => "MH_DYLDLINK",
        MH_BINDATLOAD => "MH_BINDATLOAD",
        MH_PREBOUND => "MH_PREBOUND",
        MH_SPLIT_SEGS => "MH_SPLIT_SEGS",
        MH_LAZY_INIT => "MH_LAZY_INIT",
        MH_TWOLEVEL => "MH_TWOLEVEL",
        MH_FORCE_FLAT => "MH_FORCE_FLAT",
        MH_NOMULTIDEFS => "MH_NOMULTIDEFS",
        MH_NOFIXPREBINDING => "MH_NOFIXPREBINDING",
        MH_PREBINDABLE => "MH_PREBINDABLE",
        MH_ALLMODSBOUND => "MH_ALLMODSBOUND",
        MH_SUBSECTIONS_VIA_SYMBOLS => "MH_SUBSECTIONS_VIA_SYMBOLS",
        MH_CANONICAL => "MH_CANONICAL",
        MH_WEAK_DEFINES => "MH_WEAK_DEFINES",
        MH_BINDS_TO_WEAK => "MH_BINDS_TO_WEAK",
        MH_ALLOW_STACK_EXECUTION => "MH_ALLOW_STACK_EXECUTION",
        MH_ROOT_SAFE => "MH_ROOT_SAFE",
        MH_SETUID_SAFE => "MH_SETUID_SAFE",
        MH_NO_REEXPORTED_DYLIBS => "MH_NO_REEXPORTED_DYLIBS",
        MH_PIE => "MH_PIE",
        MH_DEAD_STRIPPABLE_DYLIB => "MH_DEAD_STRIPPABLE_DYLIB",
        MH_HAS_TLV_DESCRIPTORS => "MH_HAS_TLV_DESCRIPTORS",
        MH_NO_HEAP_EXECUTION => "MH_NO_HEAP_EXECUTION",
        MH_APP_EXTENSION_SAFE => "MH_APP_EXTENSION_SAFE",
        _ => "UNKNOWN FLAG",
    }
}

/// Mach Header magic constant
pub const MH_MAGIC: u32 = 0xfeed_face;
pub const MH_CIGAM: u32 = 0xcefa_edfe;
/// Mach Header magic constant for 64-bit
pub const MH_MAGIC_64: u32 = 0xfeed_facf;
pub const MH_CIGAM_64: u32 = 0xcffa_edfe;

// Constants for the filetype field of the mach_header
/// relocatable object file
pub const MH_OBJECT: u32 = 0x1;
/// demand paged executable file
pub const MH_EXECUTE: u32 = 0x2;
/// fixed VM shared library file
pub const MH_FVMLIB: u32 = 0x3;
/// core file
pub const MH_CORE: u32 = 0x4;
/// preloaded executable file
pub const MH_PRELOAD: u32 = 0x5;
/// dynamically bound shared library
pub const MH_DYLIB: u32 = 0x6;
/// dynamic link editor
pub const MH_DYLINKER: u32 = 0x7;
/// dynamically bound bundle file
pub const MH_BUNDLE: u32 = 0x8;
/// shared library stub for static linking only, no section contents
pub const MH_DYLIB_STUB: u32 = 0x9;
/// companion file with only debug sections
pub const MH_DSYM: u32 = 0xa;
/// x86_64 kexts
pub const MH_KEXT_BUNDLE: u32 = 0xb;

pub fn filetype_to_str(filetype: u32) -> &'static str {
    match filetype {
        MH_OBJECT => "OBJECT",
        MH_EXECUTE => "EXECUTE",
        MH_FVMLIB => "FVMLIB",
        MH_CORE => "CORE",
        MH_PRELOAD => "PRELOAD",
        MH_DYLIB => "DYLIB",
        MH_DYLINKER => "DYLINKER",
        MH_BUNDLE => "BUNDLE",
        MH_DYLIB_STUB => "DYLIB_STUB",
        MH_DSYM => "DSYM",
        MH_KEXT_BUNDLE => "KEXT_BUNDLE",
        _ => "UNKNOWN FILETYPE",
    }
}

#[repr(C)]
#[derive(Clone, Copy, Default, Pread, Pwrite, SizeWith)]
/// A 32-bit Mach-o header
pub struct Header32 {
    /// mach magic number identifier
    pub magic: u32,
    /// cpu specifier
    pub cputype: CpuType,
    /// machine specifier
    pub cpusubtype: CpuSubtype,
    /// type of file
    pub filetype: u32,
    /// number of load commands
    pub ncmds: u32,
    /// the size of all the load commands
    pub sizeofcmds: u32,
    /// flags
    pub flags: u32,
}

pub const SIZEOF_HEADER_32: usize = 28;

unsafe impl Plain for Header32 {}

impl fmt::Debug for Header32 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "0x{:x} {} {} {} {} {} 0x{:x}",
            self.magic,
            cpu_type_to_str(self.cputype),
            self.cpusubtype,
            filetype_to_str(self.filetype),
            self.ncmds,
            self.sizeofcmds,
            self.flags,
        )
    }
}

#[repr(C)]
#[derive(Clone, Copy, Default, Pread, Pwrite, SizeWith)]
/// A 64-bit Mach-o header
pub struct Header64 {
    pub magic: u32,
    pub cputype: CpuType,
    pub cpusubtype: CpuSubtype,
    /// type of file
    pub filetype: u32,
    /// number of load commands
    pub ncmds: u32,
    /// the size of all the load commands
    pub sizeofcmds: u32,
    /// flags
    pub flags: u32,
    pub reserved: u32,
}

pub const SIZEOF_HEADER_64: usize = 32;

unsafe impl Plain for Header64 {}

impl fmt::Debug for Header64 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "0x{:x} {} {} {} {} {} 0x{:x} 0x{:x}",
            self.magic,
            cpu_type_to_str(self.cputype),
            self.cpusubtype,
            filetype_to_str(self.filetype),
            self.ncmds,
            self.sizeofcmds,
            self.flags,
            self.reserved
        )
    }
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
/// Generic sized header
pub struct Header {
    pub magic: u32,
    pub cputype: CpuType,
    pub cpusubtype: CpuSubtype,
    /// type of file
    pub filetype: u32,
    /// number of load commands
    pub ncmds: u32,
    /// the size of all the load commands
    pub sizeofcmds: u32,
    /// flags
    pub flags: u32,
    pub reserved: u32,
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "0x{:x} {} {} {} {} {} 0x{:x} 0x{:x}",
            self.magic,
            cpu_type_to_str(self.cputype),
            self.cpusubtype,
            filetype_to_str(self.filetype),
            self.ncmds,
            self.sizeofcmds,
            self.flags,
            self.reserved
        )
    }
}

impl From<Header32> for Header {
    fn from(header: Header32) -> Self {
        Header {
            magic: header.magic,
            cputype: header.cputype,
            cpusubtype: header.cpusubtype,
            filetype: header.filetype,
            ncmds: header.ncmds,
            sizeofcmds: header.sizeofcmds,
            flags: header.flags,
            reserved: 0,
        }
    }
}

impl From<Header64> for Header {
    fn from(header: Header64) -> Self {
        Header {
            magic: header.magic,
            cputype: header.cputype,
            cpusubtype: header.cpusubtype,
            filetype: header.filetype,
            ncmds: header.ncmds,
            sizeofcmds: header.sizeofcmds,
            flags: header.flags,
            reserved: header.reserved,
        }
    }
}

/// Whether `magic` names a thin Mach-O of either width, either byte order.
pub fn is_thin_magic(magic: u32) -> bool {
    matches!(magic, MH_MAGIC | MH_CIGAM | MH_MAGIC_64 | MH_CIGAM_64)
}

impl Header {
    #[inline]
    pub fn is_64(&self) -> bool {
        self.magic == MH_MAGIC_64 || self.magic == MH_CIGAM_64
    }

    /// Whether the magic was stored in the opposite byte order, read against
    /// the little-endian convention.
    #[inline]
    pub fn is_swapped(&self) -> bool {
        self.magic == MH_CIGAM || self.magic == MH_CIGAM_64
    }

    #[inline]
    pub fn endianness(&self) -> Endian {
        if self.is_swapped() {
            Endian::Big
        } else {
            Endian::Little
        }
    }

    #[inline]
    pub fn container(&self) -> Container {
        if self.is_64() {
            Container::Big
        } else {
            Container::Little
        }
    }

    pub fn size(&self) -> usize {
        if self.is_64() {
            SIZEOF_HEADER_64
        } else {
            SIZEOF_HEADER_32
        }
    }

    pub fn ctx(&self) -> Ctx {
        Ctx::new(self.container(), self.endianness())
    }

    /// Parses a header at `offset`, deriving width and byte order from the
    /// magic stored there.
    pub fn parse(bytes: &[u8], offset: usize) -> Result<Header> {
        let magic: u32 = bytes.pread_with(offset, Endian::Little)?;
        if !is_thin_magic(magic) {
            return Err(Error::NotAMacho);
        }

        let le = if magic == MH_CIGAM || magic == MH_CIGAM_64 {
            Endian::Big
        } else {
            Endian::Little
        };

        if magic == MH_MAGIC_64 || magic == MH_CIGAM_64 {
            let header: Header64 = bytes.pread_with(offset, le)?;
            Ok(Header::from(header))
        } else {
            let header: Header32 = bytes.pread_with(offset, le)?;
            Ok(Header::from(header))
        }
    }
}

#[test]
fn sizes_match_the_on_disk_layouts() {
    use std::mem;
    assert_eq!(mem::size_of::<Header32>(), SIZEOF_HEADER_32);
    assert_eq!(mem::size_of::<Header64>(), SIZEOF_HEADER_64);
}

#[test]
fn parse_derives_width_and_order_from_magic() {
    let mut bytes = [0u8; SIZEOF_HEADER_64];
    bytes[..4].copy_from_slice(&MH_MAGIC_64.to_le_bytes());
    bytes[16..20].copy_from_slice(&2u32.to_le_bytes());

    let header = Header::parse(&bytes, 0).unwrap();
    assert!(header.is_64());
    assert!(!header.is_swapped());
    assert_eq!(header.ncmds, 2);
    assert!(header.ctx().is_big());
    assert_eq!(header.ctx().le, Endian::Little);

    let mut swapped = [0u8; SIZEOF_HEADER_32];
    swapped[..4].copy_from_slice(&MH_MAGIC.to_be_bytes());
    swapped[16..20].copy_from_slice(&3u32.to_be_bytes());

    let header = Header::parse(&swapped, 0).unwrap();
    assert!(!header.is_64());
    assert!(header.is_swapped());
    assert_eq!(header.ncmds, 3);
}

#[test]
fn junk_magic_is_not_a_macho() {
    let bytes = [0u8; SIZEOF_HEADER_64];
    assert!(matches!(Header::parse(&bytes, 0), Err(Error::NotAMacho)));
}
