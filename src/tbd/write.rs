//! Serializes a parsed aggregate as a `!tapi-tbd-v2` document.

use std::borrow::Cow;
use std::io::{self, Write};

use crate::mach::cputype::ArchSet;
use crate::tbd::{CreateInfo, ExportInfo, ExportType};

const KEY_WIDTH: usize = 17;
const GROUP_KEY_WIDTH: usize = 23;

fn quoted<'s>(string: &'s str, needs_quotes: bool) -> Cow<'s, str> {
    if needs_quotes {
        Cow::Owned(format!("'{string}'"))
    } else {
        Cow::Borrowed(string)
    }
}

fn write_kv<W: Write + ?Sized>(w: &mut W, key: &str, width: usize, value: &str) -> io::Result<()> {
    if key.len() < width {
        writeln!(w, "{key:<width$}{value}")
    } else {
        writeln!(w, "{key} {value}")
    }
}

fn write_list<W: Write + ?Sized>(
    w: &mut W,
    key: &str,
    width: usize,
    items: &[Cow<'_, str>],
) -> io::Result<()> {
    write_kv(w, key, width, &format!("[ {} ]", items.join(", ")))
}

fn export_group<'i>(exports: &'i [ExportInfo<'_>], kind: ExportType) -> Vec<Cow<'i, str>> {
    exports
        .iter()
        .filter(|export| export.kind == kind)
        .map(|export| quoted(export.string.as_ref(), export.needs_quotes))
        .collect()
}

fn write_export_run<W: Write + ?Sized>(
    w: &mut W,
    archs: ArchSet,
    run: &[ExportInfo<'_>],
) -> io::Result<()> {
    let names: Vec<Cow<'_, str>> = archs.names().map(Cow::Borrowed).collect();
    write_list(w, "  - archs:", GROUP_KEY_WIDTH, &names)?;

    let groups = [
        ("    allowable-clients:", ExportType::Client),
        ("    re-exports:", ExportType::Reexport),
        ("    symbols:", ExportType::Symbol),
        ("    objc-classes:", ExportType::ObjcClass),
        ("    objc-ivars:", ExportType::ObjcIvar),
        ("    weak-def-symbols:", ExportType::WeakSymbol),
    ];

    for (key, kind) in groups {
        let items = export_group(run, kind);
        if !items.is_empty() {
            write_list(w, key, GROUP_KEY_WIDTH, &items)?;
        }
    }

    Ok(())
}

/// Writes `info` as a TBD v2 document. Exports must already be in their
/// final order ([`CreateInfo::sort_exports`]); the parser leaves them that
/// way.
pub fn write_tbd<W: Write + ?Sized>(w: &mut W, info: &CreateInfo<'_>) -> io::Result<()> {
    writeln!(w, "--- !tapi-tbd-v2")?;

    let archs: Vec<Cow<'_, str>> = info.archs.names().map(Cow::Borrowed).collect();
    write_list(w, "archs:", KEY_WIDTH, &archs)?;

    if !info.uuids.is_empty() {
        let mut uuids = info.uuids.clone();
        uuids.sort_by_key(|uuid| uuid.arch_index);

        let rendered: Vec<Cow<'_, str>> = uuids
            .iter()
            .map(|uuid| Cow::Owned(format!("'{}: {}'", uuid.arch().name, uuid)))
            .collect();
        write_list(w, "uuids:", KEY_WIDTH, &rendered)?;
    }

    if let Some(platform) = info.platform {
        write_kv(w, "platform:", KEY_WIDTH, platform.name())?;
    }

    if !info.flags.is_empty() {
        let mut flags = Vec::new();
        if info.flags.flat_namespace {
            flags.push(Cow::Borrowed("flat_namespace"));
        }
        if info.flags.not_app_extension_safe {
            flags.push(Cow::Borrowed("not_app_extension_safe"));
        }
        write_list(w, "flags:", KEY_WIDTH, &flags)?;
    }

    if let Some(install_name) = &info.install_name {
        let name = quoted(install_name.as_ref(), info.install_name_needs_quotes);
        write_kv(w, "install-name:", KEY_WIDTH, &name)?;
    }

    if !info.current_version.is_zero() {
        write_kv(w, "current-version:", KEY_WIDTH, &info.current_version.to_string())?;
    }

    if !info.compatibility_version.is_zero() {
        write_kv(
            w,
            "compatibility-version:",
            KEY_WIDTH,
            &info.compatibility_version.to_string(),
        )?;
    }

    if info.swift_version != 0 {
        write_kv(w, "swift-version:", KEY_WIDTH, &info.swift_version.to_string())?;
    }

    if let Some(constraint) = info.objc_constraint {
        write_kv(w, "objc-constraint:", KEY_WIDTH, constraint.name())?;
    }

    if let Some(umbrella) = &info.parent_umbrella {
        let umbrella = quoted(umbrella.as_ref(), info.parent_umbrella_needs_quotes);
        write_kv(w, "parent-umbrella:", KEY_WIDTH, &umbrella)?;
    }

    if !info.exports.is_empty() {
        writeln!(w, "exports:")?;

        // The final sort groups records by arch set; each run becomes one
        // export stanza.
        let mut begin = 0;
        while begin < info.exports.len() {
            let archs = info.exports[begin].archs;
            let mut end = begin + 1;
            while end < info.exports.len() && info.exports[end].archs == archs {
                end += 1;
            }

            write_export_run(w, archs, &info.exports[begin..end])?;
            begin = end;
        }
    }

    writeln!(w, "...")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::write_tbd;
    use crate::tbd::{CreateInfo, ExportType, PackedVersion, Platform, UuidInfo};
    use std::borrow::Cow;

    fn render(info: &CreateInfo<'_>) -> String {
        let mut out = Vec::new();
        write_tbd(&mut out, info).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn renders_a_single_arch_document() {
        let mut info = CreateInfo::new();
        info.archs.insert(48);
        info.platform = Some(Platform::MacOs);
        info.install_name = Some(Cow::Borrowed("/usr/lib/libfoo.dylib"));
        info.current_version = PackedVersion::new(1, 2, 3);
        info.compatibility_version = PackedVersion::new(1, 0, 0);
        info.uuids.push(UuidInfo { arch_index: 48, uuid: [0; 16] });
        info.add_export(48, ExportType::Symbol, Cow::Borrowed("_bar"));
        info.add_export(48, ExportType::Symbol, Cow::Borrowed("_foo"));
        info.add_export(48, ExportType::ObjcClass, Cow::Borrowed("Foo"));
        info.sort_exports();

        let expected = "\
--- !tapi-tbd-v2
archs:           [ x86_64 ]
uuids:           [ 'x86_64: 00000000-0000-0000-0000-000000000000' ]
platform:        macosx
install-name:    /usr/lib/libfoo.dylib
current-version: 1.2.3
compatibility-version: 1
exports:
  - archs:             [ x86_64 ]
    symbols:           [ _bar, _foo ]
    objc-classes:      [ Foo ]
...
";
        assert_eq!(render(&info), expected);
    }

    #[test]
    fn groups_exports_by_arch_set() {
        let mut info = CreateInfo::new();
        info.archs.insert(6);
        info.archs.insert(48);
        info.add_export(6, ExportType::Symbol, Cow::Borrowed("_both"));
        info.add_export(48, ExportType::Symbol, Cow::Borrowed("_both"));
        info.add_export(48, ExportType::Symbol, Cow::Borrowed("_only64"));
        info.sort_exports();

        let text = render(&info);
        let stanzas = text.matches("  - archs:").count();
        assert_eq!(stanzas, 2);
        assert!(text.contains("[ _both ]"));
        assert!(text.contains("[ _only64 ]"));
    }

    #[test]
    fn quoted_strings_are_quoted() {
        let mut info = CreateInfo::new();
        info.archs.insert(48);
        info.install_name = Some(Cow::Borrowed("/Spaced Path/lib.dylib "));
        info.install_name_needs_quotes = true;

        let text = render(&info);
        assert!(text.contains("install-name:    '/Spaced Path/lib.dylib '"));
    }
}
