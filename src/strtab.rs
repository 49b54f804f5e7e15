//! A byte-offset based string table, as referenced by `nlist` entries.
//! Strings are NUL-delimited; an index must land strictly inside the table.

use std::fmt;
use std::str;

pub struct Strtab<'a> {
    bytes: &'a [u8],
}

impl<'a> Strtab<'a> {
    /// Construct a new strtab with `bytes` as the backing string table.
    pub fn new(bytes: &'a [u8]) -> Strtab<'a> {
        Strtab { bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The string starting at byte `offset`, ended by a NUL or by the end of
    /// the table. `None` when the offset is out of bounds or the bytes are
    /// not valid UTF-8; the caller decides whether that skips the entry or
    /// fails the table.
    pub fn get(&self, offset: usize) -> Option<&'a str> {
        if offset >= self.bytes.len() {
            return None;
        }

        let rest = &self.bytes[offset..];
        let end = rest.iter().position(|&byte| byte == 0).unwrap_or(rest.len());

        str::from_utf8(&rest[..end]).ok()
    }
}

impl<'a> fmt::Debug for Strtab<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Strtab({} bytes)", self.bytes.len())
    }
}

impl<'a> Default for Strtab<'a> {
    fn default() -> Strtab<'a> {
        Strtab { bytes: &[] }
    }
}

#[test]
fn gets_nul_terminated_strings() {
    let strtab = Strtab::new(b"\0_foo\0_bar\0");
    assert_eq!(strtab.get(0), Some(""));
    assert_eq!(strtab.get(1), Some("_foo"));
    assert_eq!(strtab.get(6), Some("_bar"));
}

#[test]
fn unterminated_tail_reads_to_table_end() {
    let strtab = Strtab::new(b"_foo\0_bar");
    assert_eq!(strtab.get(5), Some("_bar"));
}

#[test]
fn out_of_bounds_offset_is_none() {
    let strtab = Strtab::new(b"_foo\0");
    assert_eq!(strtab.get(5), None);
    assert_eq!(strtab.get(600), None);
}

#[test]
fn mid_string_offset_reads_suffix() {
    let strtab = Strtab::new(b"_foobar\0");
    assert_eq!(strtab.get(4), Some("bar"));
}

#[test]
fn invalid_utf8_is_none() {
    let strtab = Strtab::new(b"_f\xff\xfe\0");
    assert_eq!(strtab.get(0), None);
}
