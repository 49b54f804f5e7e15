//! The aggregate a parse fills in: identity, platform, uuids, Objective-C
//! metadata and the export list, merged across every slice of one input.

use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;

use crate::mach::cputype::{arch_info, ArchInfo, ArchSet};
use crate::sorted::{self, Probe};

pub mod write;
pub mod yaml;

/// Platforms a library can target. Raw values match the load-command
/// encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Platform {
    MacOs,
    Ios,
    Tvos,
    Watchos,
    BridgeOs,
}

impl Platform {
    pub fn from_raw(raw: u32) -> Option<Platform> {
        match raw {
            1 => Some(Platform::MacOs),
            2 => Some(Platform::Ios),
            3 => Some(Platform::Tvos),
            4 => Some(Platform::Watchos),
            5 => Some(Platform::BridgeOs),
            _ => None,
        }
    }

    pub fn raw(self) -> u32 {
        match self {
            Platform::MacOs => 1,
            Platform::Ios => 2,
            Platform::Tvos => 3,
            Platform::Watchos => 4,
            Platform::BridgeOs => 5,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Platform::MacOs => "macosx",
            Platform::Ios => "ios",
            Platform::Tvos => "tvos",
            Platform::Watchos => "watchos",
            Platform::BridgeOs => "bridgeos",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Decoded from the `objc_image_info` flags.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjcConstraint {
    RetainRelease,
    RetainReleaseOrGc,
    RetainReleaseForSimulator,
    Gc,
}

impl ObjcConstraint {
    pub fn name(self) -> &'static str {
        match self {
            ObjcConstraint::RetainRelease => "retain_release",
            ObjcConstraint::RetainReleaseOrGc => "retain_release_or_gc",
            ObjcConstraint::RetainReleaseForSimulator => "retain_release_for_simulator",
            ObjcConstraint::Gc => "gc",
        }
    }
}

impl fmt::Display for ObjcConstraint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A dylib version packed as X.Y.Z in 16.8.8 bits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct PackedVersion(pub u32);

impl PackedVersion {
    pub fn new(major: u16, minor: u8, patch: u8) -> PackedVersion {
        PackedVersion((u32::from(major) << 16) | (u32::from(minor) << 8) | u32::from(patch))
    }

    pub fn major(self) -> u16 {
        (self.0 >> 16) as u16
    }

    pub fn minor(self) -> u8 {
        ((self.0 >> 8) & 0xff) as u8
    }

    pub fn patch(self) -> u8 {
        (self.0 & 0xff) as u8
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for PackedVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.patch() != 0 {
            write!(f, "{}.{}.{}", self.major(), self.minor(), self.patch())
        } else if self.minor() != 0 {
            write!(f, "{}.{}", self.major(), self.minor())
        } else {
            write!(f, "{}", self.major())
        }
    }
}

/// Export-record kinds; the declaration order is the order the writer groups
/// them in.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum ExportType {
    Client,
    Reexport,
    Symbol,
    ObjcClass,
    ObjcIvar,
    WeakSymbol,
}

/// One exported (or re-exported, or client) name, with the slices it
/// appeared in. Identity is `(kind, string)`.
#[derive(Clone, Debug)]
pub struct ExportInfo<'a> {
    pub archs: ArchSet,
    pub archs_count: u32,
    pub kind: ExportType,
    pub string: Cow<'a, str>,
    pub needs_quotes: bool,
}

impl<'a> ExportInfo<'a> {
    /// Identity order, used while merging slices.
    pub fn cmp_ignore_archs(&self, other: &ExportInfo) -> Ordering {
        self.kind
            .cmp(&other.kind)
            .then_with(|| self.string.as_ref().cmp(other.string.as_ref()))
    }

    /// Final order: groups records sharing an arch set so the writer can
    /// emit one group per run.
    pub fn cmp_full(&self, other: &ExportInfo) -> Ordering {
        self.archs
            .cmp(&other.archs)
            .then_with(|| self.cmp_ignore_archs(other))
    }
}

/// One slice's uuid. Content must be unique across the whole input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UuidInfo {
    pub arch_index: usize,
    pub uuid: [u8; 16],
}

impl UuidInfo {
    pub fn arch(&self) -> &'static ArchInfo {
        arch_info(self.arch_index)
    }
}

impl fmt::Display for UuidInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let u = &self.uuid;
        write!(
            f,
            "{:02X}{:02X}{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-\
             {:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
            u[0], u[1], u[2], u[3], u[4], u[5], u[6], u[7], u[8], u[9], u[10], u[11], u[12],
            u[13], u[14], u[15]
        )
    }
}

/// Header-level flags carried into the stub.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TbdFlags {
    pub flat_namespace: bool,
    pub not_app_extension_safe: bool,
}

impl TbdFlags {
    pub fn is_empty(&self) -> bool {
        !self.flat_namespace && !self.not_app_extension_safe
    }
}

/// Everything extracted from one input, filled in slice by slice.
///
/// Strings borrow from the parsed memory map where the parse mode allows it
/// and own their bytes otherwise; `'a` is the map's lifetime.
#[derive(Clone, Debug, Default)]
pub struct CreateInfo<'a> {
    pub archs: ArchSet,
    pub platform: Option<Platform>,
    pub install_name: Option<Cow<'a, str>>,
    pub install_name_needs_quotes: bool,
    pub parent_umbrella: Option<Cow<'a, str>>,
    pub parent_umbrella_needs_quotes: bool,
    pub current_version: PackedVersion,
    pub compatibility_version: PackedVersion,
    pub flags: TbdFlags,
    pub objc_constraint: Option<ObjcConstraint>,
    pub swift_version: u32,
    /// Kept sorted by `(kind, string)` while parsing; re-sorted by
    /// [`ExportInfo::cmp_full`] once the whole input is done.
    pub exports: Vec<ExportInfo<'a>>,
    /// Undefined imports, only populated when the caller asks for them.
    pub undefineds: Vec<ExportInfo<'a>>,
    pub uuids: Vec<UuidInfo>,
}

fn add_to<'a>(list: &mut Vec<ExportInfo<'a>>, arch_index: usize, kind: ExportType, string: Cow<'a, str>) {
    let probe = sorted::probe_by(list, |existing| {
        existing
            .kind
            .cmp(&kind)
            .then_with(|| existing.string.as_ref().cmp(string.as_ref()))
    });

    match probe {
        Probe::Found(index) => {
            let existing = &mut list[index];
            if !existing.archs.contains(arch_index) {
                existing.archs.insert(arch_index);
                existing.archs_count += 1;
            }
        }
        Probe::Vacant(slot) => {
            let needs_quotes = yaml::needs_quotes(&string);
            let mut archs = ArchSet::empty();
            archs.insert(arch_index);

            sorted::commit(
                list,
                slot,
                ExportInfo { archs, archs_count: 1, kind, string, needs_quotes },
            );
        }
    }
}

impl<'a> CreateInfo<'a> {
    pub fn new() -> CreateInfo<'a> {
        CreateInfo::default()
    }

    /// Records an export for the slice at `arch_index`, merging into an
    /// existing record with the same `(kind, string)`.
    pub fn add_export(&mut self, arch_index: usize, kind: ExportType, string: Cow<'a, str>) {
        add_to(&mut self.exports, arch_index, kind, string);
    }

    pub fn add_undefined(&mut self, arch_index: usize, kind: ExportType, string: Cow<'a, str>) {
        add_to(&mut self.undefineds, arch_index, kind, string);
    }

    /// Linear scan; uuid identity is the 16-byte content.
    pub fn find_uuid(&self, uuid: &[u8; 16]) -> Option<&UuidInfo> {
        self.uuids.iter().find(|info| &info.uuid == uuid)
    }

    /// The final total order over exports, independent of slice iteration
    /// order.
    pub fn sort_exports(&mut self) {
        self.exports.sort_by(|a, b| a.cmp_full(b));
        self.undefineds.sort_by(|a, b| a.cmp_full(b));
    }
}

#[test]
fn packed_version_renders_like_tapi() {
    assert_eq!(PackedVersion::new(1, 0, 0).to_string(), "1");
    assert_eq!(PackedVersion::new(1, 2, 0).to_string(), "1.2");
    assert_eq!(PackedVersion::new(1, 2, 3).to_string(), "1.2.3");
    assert_eq!(PackedVersion::new(1281, 0, 1).to_string(), "1281.0.1");
}

#[test]
fn platform_raw_round_trips() {
    for raw in 1..=5 {
        assert_eq!(Platform::from_raw(raw).unwrap().raw(), raw);
    }
    assert_eq!(Platform::from_raw(0), None);
    assert_eq!(Platform::from_raw(6), None);
}

#[test]
fn exports_merge_on_identity() {
    let mut info = CreateInfo::new();
    info.add_export(48, ExportType::Symbol, Cow::Borrowed("_foo"));
    info.add_export(6, ExportType::Symbol, Cow::Borrowed("_foo"));
    info.add_export(48, ExportType::Symbol, Cow::Borrowed("_foo"));
    info.add_export(48, ExportType::WeakSymbol, Cow::Borrowed("_foo"));

    assert_eq!(info.exports.len(), 2);
    let symbol = &info.exports[0];
    assert_eq!(symbol.kind, ExportType::Symbol);
    assert_eq!(symbol.archs_count, 2);
    assert!(symbol.archs.contains(6));
    assert!(symbol.archs.contains(48));
}

#[test]
fn exports_stay_sorted_by_identity() {
    let mut info = CreateInfo::new();
    info.add_export(48, ExportType::Symbol, Cow::Borrowed("_zeta"));
    info.add_export(48, ExportType::Symbol, Cow::Borrowed("_alpha"));
    info.add_export(48, ExportType::Client, Cow::Borrowed("zsh"));
    info.add_export(48, ExportType::ObjcClass, Cow::Borrowed("Foo"));

    for pair in info.exports.windows(2) {
        assert_eq!(pair[0].cmp_ignore_archs(&pair[1]), Ordering::Less);
    }
}

#[test]
fn uuid_lookup_is_by_content() {
    let mut info = CreateInfo::new();
    info.uuids.push(UuidInfo { arch_index: 48, uuid: [1; 16] });

    assert!(info.find_uuid(&[1; 16]).is_some());
    assert!(info.find_uuid(&[2; 16]).is_none());
}

#[test]
fn uuid_renders_canonically() {
    let info = UuidInfo { arch_index: 48, uuid: [0xab; 16] };
    assert_eq!(
        info.to_string(),
        "ABABABAB-ABAB-ABAB-ABAB-ABABABABABAB"
    );
}
