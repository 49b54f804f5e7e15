//! Entry points and option sets for parsing Mach-O inputs into a
//! [`CreateInfo`](crate::tbd::CreateInfo).

use std::borrow::Cow;

pub mod load_commands;
pub mod macho;
pub mod shared_cache;
pub mod symbols;

pub use macho::{list_archs, parse_from_file, parse_from_map};
pub use shared_cache::{CacheOptions, SharedCache};

/// Whole-file extraction switches: which fields the caller wants at all.
/// An ignored field is neither extracted nor checked for conflicts.
#[derive(Clone, Copy, Debug, Default)]
pub struct ParseFlags {
    pub ignore_platform: bool,
    pub ignore_current_version: bool,
    pub ignore_compatibility_version: bool,
    pub ignore_install_name: bool,
    pub ignore_reexports: bool,
    pub ignore_clients: bool,
    pub ignore_parent_umbrella: bool,
    pub ignore_symbols: bool,
    pub ignore_uuid: bool,
    pub ignore_objc_constraint: bool,
    pub ignore_swift_version: bool,
    /// Don't fail an input that produced no exports (or whose symbol table
    /// is missing or partially unreadable).
    pub ignore_missing_exports: bool,
    /// Collect undefined imports into `CreateInfo::undefineds`.
    pub parse_undefineds: bool,
    /// Include private-external-only symbols in the exports.
    pub allow_private_symbols: bool,
}

/// How strictly the parser treats the bytes, independent of which fields are
/// wanted.
#[derive(Clone, Copy, Debug, Default)]
pub struct ParserOptions {
    /// Tolerate zero-length or out-of-bounds strings by skipping the
    /// containing command.
    pub ignore_invalid_fields: bool,
    /// Keep the first value of a field and ignore later mismatches.
    pub ignore_conflicting_fields: bool,
    /// Fat only: skip a slice that is not a valid Mach-O instead of failing
    /// the whole file.
    pub skip_invalid_architectures: bool,
    /// Section (and symbol-table) offsets are absolute within the enclosing
    /// file rather than slice-relative; set for shared-cache images.
    pub sect_off_absolute: bool,
    /// Own every string even when parsing from a map.
    pub copy_strings: bool,
    /// Stop after the load-command walk, leaving the symbol table unread.
    pub dont_parse_symbol_table: bool,
}

/// How a parsed string becomes an aggregate string: owned always (file
/// parsing, where the source buffer is transient), or borrowed from the map
/// unless the caller asked for copies.
pub(crate) trait StoreStr<'c, 'a> {
    fn store(&self, string: &'c str) -> Cow<'a, str>;
}

pub(crate) struct OwnedStore;

impl<'c, 'a> StoreStr<'c, 'a> for OwnedStore {
    fn store(&self, string: &'c str) -> Cow<'a, str> {
        Cow::Owned(string.to_owned())
    }
}

pub(crate) struct MapStore {
    pub copy: bool,
}

impl<'a> StoreStr<'a, 'a> for MapStore {
    fn store(&self, string: &'a str) -> Cow<'a, str> {
        if self.copy {
            Cow::Owned(string.to_owned())
        } else {
            Cow::Borrowed(string)
        }
    }
}
