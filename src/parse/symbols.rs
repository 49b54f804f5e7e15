//! Classifies `nlist` entries into export (and optionally undefined-import)
//! records.

use log::debug;
use scroll::{Endian, Pread};

use crate::error::{Error, Result};
use crate::mach::symbols::{
    Nlist, Nlist32, Nlist64, N_SECT, N_UNDF, N_WEAK_REF, SIZEOF_NLIST_32, SIZEOF_NLIST_64,
};
use crate::parse::{ParseFlags, StoreStr};
use crate::strtab::Strtab;
use crate::tbd::{CreateInfo, ExportType};

/// Prefix rules, first match wins. Returns the record kind and the stored
/// string (the suffix for Objective-C names, the full name otherwise).
fn classify(name: &str, weak: bool) -> (ExportType, &str) {
    if let Some(suffix) = name.strip_prefix(".objc_class_name_") {
        return (ExportType::ObjcClass, suffix);
    }
    if let Some(suffix) = name.strip_prefix("_OBJC_CLASS_$_") {
        return (ExportType::ObjcClass, suffix);
    }
    if let Some(suffix) = name.strip_prefix("_OBJC_METACLASS_$_") {
        return (ExportType::ObjcClass, suffix);
    }
    if let Some(suffix) = name.strip_prefix("_OBJC_IVAR_$_") {
        return (ExportType::ObjcIvar, suffix);
    }
    if name.starts_with("_$ld$") {
        return (ExportType::WeakSymbol, name);
    }
    if weak && name.starts_with('_') {
        return (ExportType::WeakSymbol, name);
    }

    (ExportType::Symbol, name)
}

/// Classifies `nsyms` entries from `nlists` against `strtab` into `info`.
///
/// In lenient mode a bad string index, empty name or non-UTF-8 name skips
/// the entry; otherwise it fails the table.
#[allow(clippy::too_many_arguments)]
pub(crate) fn parse_symbols<'a, 'c, S: StoreStr<'c, 'a>>(
    info: &mut CreateInfo<'a>,
    arch_index: usize,
    is_64: bool,
    le: Endian,
    nsyms: u32,
    nlists: &'c [u8],
    strtab: Strtab<'c>,
    store: &S,
    flags: ParseFlags,
    lenient: bool,
) -> Result<()> {
    let stride = if is_64 { SIZEOF_NLIST_64 } else { SIZEOF_NLIST_32 };

    for index in 0..nsyms as usize {
        let offset = index * stride;
        let nlist: Nlist = if is_64 {
            Nlist::from(nlists.pread_with::<Nlist64>(offset, le)?)
        } else {
            Nlist::from(nlists.pread_with::<Nlist32>(offset, le)?)
        };

        if nlist.is_stab() {
            continue;
        }

        let type_bits = nlist.type_bits();
        let is_undefined = type_bits == N_UNDF;

        if type_bits == N_SECT {
            if !nlist.is_external()
                && !(flags.allow_private_symbols && nlist.is_private_external())
            {
                continue;
            }
        } else if !(is_undefined && flags.parse_undefineds && nlist.is_external()) {
            continue;
        }

        let name = match strtab.get(nlist.n_strx as usize) {
            Some(name) if !name.is_empty() => name,
            _ => {
                if lenient {
                    debug!("skipping symbol {index} with an unusable string index");
                    continue;
                }
                return Err(Error::InvalidSymbolTable);
            }
        };

        let weak = if is_undefined {
            nlist.n_desc & N_WEAK_REF != 0
        } else {
            nlist.is_weak_definition()
        };

        let (kind, stored) = classify(name, weak);
        if stored.is_empty() {
            if lenient {
                debug!("skipping symbol {index} with an empty classified name");
                continue;
            }
            return Err(Error::InvalidSymbolTable);
        }

        if is_undefined {
            info.add_undefined(arch_index, kind, store.store(stored));
        } else {
            info.add_export(arch_index, kind, store.store(stored));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::classify;
    use crate::tbd::ExportType;

    #[test]
    fn objc_names_store_the_suffix() {
        assert_eq!(
            classify(".objc_class_name_Foo", false),
            (ExportType::ObjcClass, "Foo")
        );
        assert_eq!(
            classify("_OBJC_CLASS_$_Foo", false),
            (ExportType::ObjcClass, "Foo")
        );
        assert_eq!(
            classify("_OBJC_METACLASS_$_Foo", false),
            (ExportType::ObjcClass, "Foo")
        );
        assert_eq!(
            classify("_OBJC_IVAR_$_Foo._bar", false),
            (ExportType::ObjcIvar, "Foo._bar")
        );
    }

    #[test]
    fn linker_directives_are_weak_and_full() {
        assert_eq!(
            classify("_$ld$hide$os10.9$_foo", false),
            (ExportType::WeakSymbol, "_$ld$hide$os10.9$_foo")
        );
    }

    #[test]
    fn weak_flag_requires_underscore_prefix() {
        assert_eq!(classify("_foo", true), (ExportType::WeakSymbol, "_foo"));
        assert_eq!(classify("foo", true), (ExportType::Symbol, "foo"));
        assert_eq!(classify("_foo", false), (ExportType::Symbol, "_foo"));
    }
}
