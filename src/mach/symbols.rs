//! `nlist` symbol-table entries and the `n_type`/`n_desc` masks the
//! classifier consults.

use scroll::{Pread, Pwrite, SizeWith};

/// If any of these bits are set, the entry is a debugging symbol.
pub const N_STAB: u8 = 0xe0;
/// Private external symbol.
pub const N_PEXT: u8 = 0x10;
/// Mask for the type bits.
pub const N_TYPE: u8 = 0x0e;
/// External symbol.
pub const N_EXT: u8 = 0x01;

pub const N_UNDF: u8 = 0x0;
pub const N_ABS: u8 = 0x2;
pub const N_SECT: u8 = 0xe;
pub const N_PBUD: u8 = 0xc;
pub const N_INDR: u8 = 0xa;

// n_desc bits.
pub const N_WEAK_REF: u16 = 0x0040;
pub const N_WEAK_DEF: u16 = 0x0080;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pread, Pwrite, SizeWith)]
pub struct Nlist32 {
    /// index into the string table
    pub n_strx: u32,
    pub n_type: u8,
    pub n_sect: u8,
    pub n_desc: u16,
    pub n_value: u32,
}

pub const SIZEOF_NLIST_32: usize = 12;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pread, Pwrite, SizeWith)]
pub struct Nlist64 {
    /// index into the string table
    pub n_strx: u32,
    pub n_type: u8,
    pub n_sect: u8,
    pub n_desc: u16,
    pub n_value: u64,
}

pub const SIZEOF_NLIST_64: usize = 16;

/// Width-generic view of an entry.
#[derive(Clone, Copy, Debug, Default)]
pub struct Nlist {
    pub n_strx: u32,
    pub n_type: u8,
    pub n_sect: u8,
    pub n_desc: u16,
    pub n_value: u64,
}

impl Nlist {
    pub fn is_stab(&self) -> bool {
        self.n_type & N_STAB != 0
    }

    pub fn is_external(&self) -> bool {
        self.n_type & N_EXT != 0
    }

    pub fn is_private_external(&self) -> bool {
        self.n_type & N_PEXT != 0
    }

    pub fn type_bits(&self) -> u8 {
        self.n_type & N_TYPE
    }

    pub fn is_weak_definition(&self) -> bool {
        self.n_desc & N_WEAK_DEF != 0
    }
}

impl From<Nlist32> for Nlist {
    fn from(nlist: Nlist32) -> Nlist {
        Nlist {
            n_strx: nlist.n_strx,
            n_type: nlist.n_type,
            n_sect: nlist.n_sect,
            n_desc: nlist.n_desc,
            n_value: u64::from(nlist.n_value),
        }
    }
}

impl From<Nlist64> for Nlist {
    fn from(nlist: Nlist64) -> Nlist {
        Nlist {
            n_strx: nlist.n_strx,
            n_type: nlist.n_type,
            n_sect: nlist.n_sect,
            n_desc: nlist.n_desc,
            n_value: nlist.n_value,
        }
    }
}

#[test]
fn sizes_match_the_on_disk_layouts() {
    use std::mem;
    assert_eq!(mem::size_of::<Nlist32>(), SIZEOF_NLIST_32);
    assert_eq!(mem::size_of::<Nlist64>(), SIZEOF_NLIST_64);
}

#[test]
fn type_bit_helpers() {
    let nlist = Nlist {
        n_type: N_SECT | N_EXT,
        n_desc: N_WEAK_DEF,
        ..Default::default()
    };
    assert!(!nlist.is_stab());
    assert!(nlist.is_external());
    assert_eq!(nlist.type_bits(), N_SECT);
    assert!(nlist.is_weak_definition());

    let stab = Nlist { n_type: 0x24, ..Default::default() };
    assert!(stab.is_stab());
}
