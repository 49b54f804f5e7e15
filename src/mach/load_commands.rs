//! Load-command constants and the on-disk layouts of every command the
//! parser consumes bit-exactly.

use std::fmt;

use scroll::{Pread, Pwrite, SizeWith};

/// Commands dyld must understand even when unknown to it.
pub const LC_REQ_DYLD: u32 = 0x8000_0000;

pub const LC_SEGMENT: u32 = 0x1;
pub const LC_SYMTAB: u32 = 0x2;
pub const LC_DYSYMTAB: u32 = 0xb;
pub const LC_ID_DYLIB: u32 = 0xd;
pub const LC_SUB_FRAMEWORK: u32 = 0x12;
pub const LC_SUB_CLIENT: u32 = 0x14;
pub const LC_SEGMENT_64: u32 = 0x19;
pub const LC_UUID: u32 = 0x1b;
pub const LC_REEXPORT_DYLIB: u32 = 0x1f | LC_REQ_DYLD;
pub const LC_VERSION_MIN_MACOSX: u32 = 0x24;
pub const LC_VERSION_MIN_IPHONEOS: u32 = 0x25;
pub const LC_VERSION_MIN_TVOS: u32 = 0x2f;
pub const LC_VERSION_MIN_WATCHOS: u32 = 0x30;
pub const LC_BUILD_VERSION: u32 = 0x32;

pub fn cmd_to_str(cmd: u32) -> &'static str {
    match cmd {
        LC_SEGMENT => "LC_SEGMENT",
        LC_SYMTAB => "LC_SYMTAB",
        LC_DYSYMTAB => "LC_DYSYMTAB",
        LC_ID_DYLIB => "LC_ID_DYLIB",
        LC_SUB_FRAMEWORK => "LC_SUB_FRAMEWORK",
        LC_SUB_CLIENT => "LC_SUB_CLIENT",
        LC_SEGMENT_64 => "LC_SEGMENT_64",
        LC_UUID => "LC_UUID",
        LC_REEXPORT_DYLIB => "LC_REEXPORT_DYLIB",
        LC_VERSION_MIN_MACOSX => "LC_VERSION_MIN_MACOSX",
        LC_VERSION_MIN_IPHONEOS => "LC_VERSION_MIN_IPHONEOS",
        LC_VERSION_MIN_TVOS => "LC_VERSION_MIN_TVOS",
        LC_VERSION_MIN_WATCHOS => "LC_VERSION_MIN_WATCHOS",
        LC_BUILD_VERSION => "LC_BUILD_VERSION",
        _ => "LC_UNKNOWN",
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pread, Pwrite, SizeWith)]
/// The fixed prefix every load-command starts with
pub struct LoadCommand {
    pub cmd: u32,
    pub cmdsize: u32,
}

pub const SIZEOF_LOAD_COMMAND: usize = 8;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pread, Pwrite, SizeWith)]
pub struct Dylib {
    /// offset of the install-name string, from the start of the command
    pub name_offset: u32,
    pub timestamp: u32,
    pub current_version: u32,
    pub compatibility_version: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pread, Pwrite, SizeWith)]
/// LC_ID_DYLIB, LC_REEXPORT_DYLIB and friends; the name string trails the
/// fixed part inside `cmdsize`
pub struct DylibCommand {
    pub cmd: u32,
    pub cmdsize: u32,
    pub dylib: Dylib,
}

pub const SIZEOF_DYLIB_COMMAND: usize = 24;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pread, Pwrite, SizeWith)]
pub struct SubFrameworkCommand {
    pub cmd: u32,
    pub cmdsize: u32,
    /// offset of the umbrella string, from the start of the command
    pub umbrella_offset: u32,
}

pub const SIZEOF_SUB_FRAMEWORK_COMMAND: usize = 12;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pread, Pwrite, SizeWith)]
pub struct SubClientCommand {
    pub cmd: u32,
    pub cmdsize: u32,
    /// offset of the client string, from the start of the command
    pub client_offset: u32,
}

pub const SIZEOF_SUB_CLIENT_COMMAND: usize = 12;

#[repr(C)]
#[derive(Clone, Copy, Default, Pread, Pwrite, SizeWith)]
pub struct UuidCommand {
    pub cmd: u32,
    pub cmdsize: u32,
    pub uuid: [u8; 16],
}

pub const SIZEOF_UUID_COMMAND: usize = 24;

impl fmt::Debug for UuidCommand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "LC_UUID {:02x?}", self.uuid)
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pread, Pwrite, SizeWith)]
/// LC_VERSION_MIN_MACOSX, _IPHONEOS, _TVOS and _WATCHOS share this layout
pub struct VersionMinCommand {
    pub cmd: u32,
    pub cmdsize: u32,
    pub version: u32,
    pub sdk: u32,
}

pub const SIZEOF_VERSION_MIN_COMMAND: usize = 16;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pread, Pwrite, SizeWith)]
/// An array of build-tool versions may trail this, so cmdsize is a lower
/// bound rather than exact
pub struct BuildVersionCommand {
    pub cmd: u32,
    pub cmdsize: u32,
    pub platform: u32,
    pub minos: u32,
    pub sdk: u32,
    pub ntools: u32,
}

pub const SIZEOF_BUILD_VERSION_COMMAND: usize = 24;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pread, Pwrite, SizeWith)]
pub struct SymtabCommand {
    pub cmd: u32,
    pub cmdsize: u32,
    pub symoff: u32,
    pub nsyms: u32,
    pub stroff: u32,
    pub strsize: u32,
}

pub const SIZEOF_SYMTAB_COMMAND: usize = 24;

#[repr(C)]
#[derive(Clone, Copy, Pread, Pwrite, SizeWith)]
pub struct SegmentCommand32 {
    pub cmd: u32,
    pub cmdsize: u32,
    pub segname: [u8; 16],
    pub vmaddr: u32,
    pub vmsize: u32,
    pub fileoff: u32,
    pub filesize: u32,
    pub maxprot: i32,
    pub initprot: i32,
    pub nsects: u32,
    pub flags: u32,
}

pub const SIZEOF_SEGMENT_COMMAND_32: usize = 56;

#[repr(C)]
#[derive(Clone, Copy, Pread, Pwrite, SizeWith)]
pub struct SegmentCommand64 {
    pub cmd: u32,
    pub cmdsize: u32,
    pub segname: [u8; 16],
    pub vmaddr: u64,
    pub vmsize: u64,
    pub fileoff: u64,
    pub filesize: u64,
    pub maxprot: i32,
    pub initprot: i32,
    pub nsects: u32,
    pub flags: u32,
}

pub const SIZEOF_SEGMENT_COMMAND_64: usize = 72;

#[repr(C)]
#[derive(Clone, Copy, Pread, Pwrite, SizeWith)]
pub struct Section32 {
    pub sectname: [u8; 16],
    pub segname: [u8; 16],
    pub addr: u32,
    pub size: u32,
    pub offset: u32,
    pub align: u32,
    pub reloff: u32,
    pub nreloc: u32,
    pub flags: u32,
    pub reserved1: u32,
    pub reserved2: u32,
}

pub const SIZEOF_SECTION_32: usize = 68;

#[repr(C)]
#[derive(Clone, Copy, Pread, Pwrite, SizeWith)]
pub struct Section64 {
    pub sectname: [u8; 16],
    pub segname: [u8; 16],
    pub addr: u64,
    pub size: u64,
    pub offset: u32,
    pub align: u32,
    pub reloff: u32,
    pub nreloc: u32,
    pub flags: u32,
    pub reserved1: u32,
    pub reserved2: u32,
    pub reserved3: u32,
}

pub const SIZEOF_SECTION_64: usize = 80;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pread, Pwrite, SizeWith)]
/// The 8-byte record in `__image_info`/`__objc_imageinfo` sections
pub struct ObjcImageInfo {
    pub version: u32,
    pub flags: u32,
}

pub const SIZEOF_OBJC_IMAGE_INFO: usize = 8;

pub const OBJC_IMAGE_SUPPORTS_GC: u32 = 1 << 1;
pub const OBJC_IMAGE_REQUIRES_GC: u32 = 1 << 2;
pub const OBJC_IMAGE_IS_FOR_SIMULATOR: u32 = 1 << 5;
pub const OBJC_IMAGE_SWIFT_VERSION_MASK: u32 = 0xff00;
pub const OBJC_IMAGE_SWIFT_VERSION_SHIFT: u32 = 8;

#[test]
fn sizes_match_the_on_disk_layouts() {
    use std::mem;
    assert_eq!(mem::size_of::<LoadCommand>(), SIZEOF_LOAD_COMMAND);
    assert_eq!(mem::size_of::<DylibCommand>(), SIZEOF_DYLIB_COMMAND);
    assert_eq!(
        mem::size_of::<SubFrameworkCommand>(),
        SIZEOF_SUB_FRAMEWORK_COMMAND
    );
    assert_eq!(mem::size_of::<SubClientCommand>(), SIZEOF_SUB_CLIENT_COMMAND);
    assert_eq!(mem::size_of::<UuidCommand>(), SIZEOF_UUID_COMMAND);
    assert_eq!(
        mem::size_of::<VersionMinCommand>(),
        SIZEOF_VERSION_MIN_COMMAND
    );
    assert_eq!(
        mem::size_of::<BuildVersionCommand>(),
        SIZEOF_BUILD_VERSION_COMMAND
    );
    assert_eq!(mem::size_of::<SymtabCommand>(), SIZEOF_SYMTAB_COMMAND);
    assert_eq!(
        mem::size_of::<SegmentCommand32>(),
        SIZEOF_SEGMENT_COMMAND_32
    );
    assert_eq!(
        mem::size_of::<SegmentCommand64>(),
        SIZEOF_SEGMENT_COMMAND_64
    );
    assert_eq!(mem::size_of::<Section32>(), SIZEOF_SECTION_32);
    assert_eq!(mem::size_of::<Section64>(), SIZEOF_SECTION_64);
    assert_eq!(mem::size_of::<ObjcImageInfo>(), SIZEOF_OBJC_IMAGE_INFO);
}
