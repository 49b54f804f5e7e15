//! Mach-O envelope recognition and the on-disk layouts shared by the
//! parsers.

use scroll::{Endian, Pread};

use crate::error::Result;

pub mod cputype;
pub mod fat;
pub mod header;
pub mod load_commands;
pub mod symbols;

/// The 16-byte prefix shared by dyld shared cache files.
pub const DYLD_CACHE_MAGIC_PREFIX: &[u8; 7] = b"dyld_v1";

/// Reads the 32-bit magic at `offset` against the little-endian convention.
pub fn peek(bytes: &[u8], offset: usize) -> Result<u32> {
    Ok(bytes.pread_with::<u32>(offset, Endian::Little)?)
}

/// What the magic says the envelope is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Envelope {
    Thin,
    Fat,
    NotAMacho,
}

pub fn recognize(magic: u32) -> Envelope {
    if header::is_thin_magic(magic) {
        Envelope::Thin
    } else if fat::is_fat_magic(magic) {
        Envelope::Fat
    } else {
        Envelope::NotAMacho
    }
}

#[test]
fn recognizes_magics() {
    assert_eq!(recognize(header::MH_MAGIC_64), Envelope::Thin);
    assert_eq!(recognize(header::MH_CIGAM), Envelope::Thin);
    assert_eq!(recognize(fat::FAT_MAGIC), Envelope::Fat);
    assert_eq!(recognize(fat::FAT_CIGAM_64), Envelope::Fat);
    assert_eq!(recognize(0xdead_beef), Envelope::NotAMacho);
}
