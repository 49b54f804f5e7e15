//! CPU type/subtype constants, the fixed architecture table, and the
//! arch-set bitmask built from table indices.

pub type CpuType = i32;
pub type CpuSubtype = i32;

pub const CPU_ARCH_ABI64: CpuType = 0x0100_0000;
pub const CPU_ARCH_ABI64_32: CpuType = 0x0200_0000;

pub const CPU_TYPE_ANY: CpuType = -1;
pub const CPU_TYPE_MC680X0: CpuType = 6;
pub const CPU_TYPE_X86: CpuType = 7;
pub const CPU_TYPE_HPPA: CpuType = 11;
pub const CPU_TYPE_ARM: CpuType = 12;
pub const CPU_TYPE_MC88000: CpuType = 13;
pub const CPU_TYPE_SPARC: CpuType = 14;
pub const CPU_TYPE_I860: CpuType = 15;
pub const CPU_TYPE_POWERPC: CpuType = 18;
pub const CPU_TYPE_VEO: CpuType = 255;
pub const CPU_TYPE_X86_64: CpuType = CPU_TYPE_X86 | CPU_ARCH_ABI64;
pub const CPU_TYPE_ARM64: CpuType = CPU_TYPE_ARM | CPU_ARCH_ABI64;
pub const CPU_TYPE_POWERPC64: CpuType = CPU_TYPE_POWERPC | CPU_ARCH_ABI64;
pub const CPU_TYPE_ARM64_32: CpuType = CPU_TYPE_ARM | CPU_ARCH_ABI64_32;

pub const CPU_SUBTYPE_MULTIPLE: CpuSubtype = -1;
pub const CPU_SUBTYPE_LITTLE_ENDIAN: CpuSubtype = 0;
pub const CPU_SUBTYPE_BIG_ENDIAN: CpuSubtype = 1;

pub const CPU_SUBTYPE_MC680X0_ALL: CpuSubtype = 1;
pub const CPU_SUBTYPE_MC68040: CpuSubtype = 2;
pub const CPU_SUBTYPE_MC68030_ONLY: CpuSubtype = 3;

pub const CPU_SUBTYPE_I386_ALL: CpuSubtype = 3;
pub const CPU_SUBTYPE_486: CpuSubtype = 4;
pub const CPU_SUBTYPE_486SX: CpuSubtype = 4 + (8 << 4);
pub const CPU_SUBTYPE_PENT: CpuSubtype = 5;
pub const CPU_SUBTYPE_PENTPRO: CpuSubtype = 6 + (1 << 4);
pub const CPU_SUBTYPE_PENTII_M3: CpuSubtype = 6 + (3 << 4);
pub const CPU_SUBTYPE_PENTII_M5: CpuSubtype = 6 + (5 << 4);
pub const CPU_SUBTYPE_PENTIUM_4: CpuSubtype = 10;

pub const CPU_SUBTYPE_HPPA_ALL: CpuSubtype = 0;
pub const CPU_SUBTYPE_HPPA_7100LC: CpuSubtype = 1;

pub const CPU_SUBTYPE_ARM_ALL: CpuSubtype = 0;
pub const CPU_SUBTYPE_ARM_V4T: CpuSubtype = 5;
pub const CPU_SUBTYPE_ARM_V6: CpuSubtype = 6;
pub const CPU_SUBTYPE_ARM_V5TEJ: CpuSubtype = 7;
pub const CPU_SUBTYPE_ARM_XSCALE: CpuSubtype = 8;
pub const CPU_SUBTYPE_ARM_V7: CpuSubtype = 9;
pub const CPU_SUBTYPE_ARM_V7F: CpuSubtype = 10;
pub const CPU_SUBTYPE_ARM_V7S: CpuSubtype = 11;
pub const CPU_SUBTYPE_ARM_V7K: CpuSubtype = 12;
pub const CPU_SUBTYPE_ARM_V8: CpuSubtype = 13;
pub const CPU_SUBTYPE_ARM_V6M: CpuSubtype = 14;
pub const CPU_SUBTYPE_ARM_V7M: CpuSubtype = 15;
pub const CPU_SUBTYPE_ARM_V7EM: CpuSubtype = 16;

pub const CPU_SUBTYPE_MC88000_ALL: CpuSubtype = 0;
pub const CPU_SUBTYPE_SPARC_ALL: CpuSubtype = 0;
pub const CPU_SUBTYPE_I860_ALL: CpuSubtype = 0;

pub const CPU_SUBTYPE_POWERPC_ALL: CpuSubtype = 0;
pub const CPU_SUBTYPE_POWERPC_601: CpuSubtype = 1;
pub const CPU_SUBTYPE_POWERPC_602: CpuSubtype = 2;
pub const CPU_SUBTYPE_POWERPC_603: CpuSubtype = 3;
pub const CPU_SUBTYPE_POWERPC_603E: CpuSubtype = 4;
pub const CPU_SUBTYPE_POWERPC_603EV: CpuSubtype = 5;
pub const CPU_SUBTYPE_POWERPC_604: CpuSubtype = 6;
pub const CPU_SUBTYPE_POWERPC_604E: CpuSubtype = 7;
pub const CPU_SUBTYPE_POWERPC_750: CpuSubtype = 9;
pub const CPU_SUBTYPE_POWERPC_7400: CpuSubtype = 10;
pub const CPU_SUBTYPE_POWERPC_7450: CpuSubtype = 11;
pub const CPU_SUBTYPE_POWERPC_970: CpuSubtype = 100;

pub const CPU_SUBTYPE_VEO_1: CpuSubtype = 1;
pub const CPU_SUBTYPE_VEO_2: CpuSubtype = 2;
pub const CPU_SUBTYPE_VEO_ALL: CpuSubtype = CPU_SUBTYPE_VEO_2;

pub const CPU_SUBTYPE_X86_64_ALL: CpuSubtype = 3;
pub const CPU_SUBTYPE_X86_64_H: CpuSubtype = 8;

pub const CPU_SUBTYPE_ARM64_ALL: CpuSubtype = 0;
pub const CPU_SUBTYPE_ARM64_V8: CpuSubtype = 1;
pub const CPU_SUBTYPE_ARM64E: CpuSubtype = 2;

pub const CPU_SUBTYPE_ARM64_32_ALL: CpuSubtype = 0;

pub fn cpu_type_to_str(cputype: CpuType) -> &'static str {
    match cputype {
        CPU_TYPE_ANY => "ANY",
        CPU_TYPE_MC680X0 => "MC680x0",
        CPU_TYPE_X86 => "X86",
        CPU_TYPE_HPPA => "HPPA",
        CPU_TYPE_ARM => "ARM",
        CPU_TYPE_MC88000 => "MC88000",
        CPU_TYPE_SPARC => "SPARC",
        CPU_TYPE_I860 => "I860",
        CPU_TYPE_POWERPC => "POWERPC",
        CPU_TYPE_VEO => "VEO",
        CPU_TYPE_X86_64 => "X86_64",
        CPU_TYPE_ARM64 => "ARM64",
        CPU_TYPE_POWERPC64 => "POWERPC64",
        CPU_TYPE_ARM64_32 => "ARM64_32",
        _ => "UNKNOWN CPUTYPE",
    }
}

/// One entry of the architecture table.
#[derive(Debug, PartialEq, Eq)]
pub struct ArchInfo {
    pub cputype: CpuType,
    pub cpusubtype: CpuSubtype,
    pub name: &'static str,
}

const fn arch(cputype: CpuType, cpusubtype: CpuSubtype, name: &'static str) -> ArchInfo {
    ArchInfo { cputype, cpusubtype, name }
}

pub const ARCH_INFO_COUNT: usize = 56;

// An arch-table index is also a bit position in a 64-bit ArchSet.
const _: () = assert!(ARCH_INFO_COUNT <= 64);

/// The master architecture table.
///
/// The order is ABI: an entry's index doubles as its bit position in an
/// [`ArchSet`], so entries must never be reordered and the table must not
/// grow past 64 entries.
pub static ARCH_INFOS: [ArchInfo; ARCH_INFO_COUNT] = [
    arch(CPU_TYPE_ANY, CPU_SUBTYPE_MULTIPLE, "any"),
    arch(CPU_TYPE_ANY, CPU_SUBTYPE_LITTLE_ENDIAN, "little"),
    arch(CPU_TYPE_ANY, CPU_SUBTYPE_BIG_ENDIAN, "big"),
    // 3..=5
    arch(CPU_TYPE_MC680X0, CPU_SUBTYPE_MC680X0_ALL, "m68k"),
    arch(CPU_TYPE_MC680X0, CPU_SUBTYPE_MC68040, "m68040"),
    arch(CPU_TYPE_MC680X0, CPU_SUBTYPE_MC68030_ONLY, "m68030"),
    // 6..=14
    arch(CPU_TYPE_X86, CPU_SUBTYPE_I386_ALL, "i386"),
    arch(CPU_TYPE_X86, CPU_SUBTYPE_486, "i486"),
    arch(CPU_TYPE_X86, CPU_SUBTYPE_486SX, "i486SX"),
    arch(CPU_TYPE_X86, CPU_SUBTYPE_PENT, "pentium"),
    arch(CPU_TYPE_X86, CPU_SUBTYPE_PENTPRO, "pentpro"),
    arch(CPU_TYPE_X86, CPU_SUBTYPE_PENTII_M3, "pentIIm3"),
    arch(CPU_TYPE_X86, CPU_SUBTYPE_PENTII_M5, "pentIIm5"),
    arch(CPU_TYPE_X86, CPU_SUBTYPE_PENTIUM_4, "pentium4"),
    arch(CPU_TYPE_X86, CPU_SUBTYPE_X86_64_H, "x86_64h"),
    // 15..=16
    arch(CPU_TYPE_HPPA, CPU_SUBTYPE_HPPA_ALL, "hppa"),
    arch(CPU_TYPE_HPPA, CPU_SUBTYPE_HPPA_7100LC, "hppa7100LC"),
    // 17..=29
    arch(CPU_TYPE_ARM, CPU_SUBTYPE_ARM_ALL, "arm"),
    arch(CPU_TYPE_ARM, CPU_SUBTYPE_ARM_V4T, "armv4t"),
    arch(CPU_TYPE_ARM, CPU_SUBTYPE_ARM_V6, "armv6"),
    arch(CPU_TYPE_ARM, CPU_SUBTYPE_ARM_V5TEJ, "armv5"),
    arch(CPU_TYPE_ARM, CPU_SUBTYPE_ARM_XSCALE, "xscale"),
    arch(CPU_TYPE_ARM, CPU_SUBTYPE_ARM_V7, "armv7"),
    arch(CPU_TYPE_ARM, CPU_SUBTYPE_ARM_V7F, "armv7f"),
    arch(CPU_TYPE_ARM, CPU_SUBTYPE_ARM_V7S, "armv7s"),
    arch(CPU_TYPE_ARM, CPU_SUBTYPE_ARM_V7K, "armv7k"),
    arch(CPU_TYPE_ARM, CPU_SUBTYPE_ARM_V6M, "armv6"),
    arch(CPU_TYPE_ARM, CPU_SUBTYPE_ARM_V7M, "armv7m"),
    arch(CPU_TYPE_ARM, CPU_SUBTYPE_ARM_V7EM, "armv7em"),
    arch(CPU_TYPE_ARM, CPU_SUBTYPE_ARM_V8, "armv8"),
    // 30
    arch(CPU_TYPE_MC88000, CPU_SUBTYPE_MC88000_ALL, "m88k"),
    // 31
    arch(CPU_TYPE_SPARC, CPU_SUBTYPE_SPARC_ALL, "sparc"),
    // 32
    arch(CPU_TYPE_I860, CPU_SUBTYPE_I860_ALL, "i860"),
    // 33..=44
    arch(CPU_TYPE_POWERPC, CPU_SUBTYPE_POWERPC_ALL, "ppc"),
    arch(CPU_TYPE_POWERPC, CPU_SUBTYPE_POWERPC_601, "ppc601"),
    arch(CPU_TYPE_POWERPC, CPU_SUBTYPE_POWERPC_602, "ppc602"),
    arch(CPU_TYPE_POWERPC, CPU_SUBTYPE_POWERPC_603, "ppc603"),
    arch(CPU_TYPE_POWERPC, CPU_SUBTYPE_POWERPC_603E, "ppc603e"),
    arch(CPU_TYPE_POWERPC, CPU_SUBTYPE_POWERPC_603EV, "ppc603ev"),
    arch(CPU_TYPE_POWERPC, CPU_SUBTYPE_POWERPC_604, "ppc604"),
    arch(CPU_TYPE_POWERPC, CPU_SUBTYPE_POWERPC_604E, "ppc604e"),
    arch(CPU_TYPE_POWERPC, CPU_SUBTYPE_POWERPC_750, "ppc750"),
    arch(CPU_TYPE_POWERPC, CPU_SUBTYPE_POWERPC_7400, "ppc7400"),
    arch(CPU_TYPE_POWERPC, CPU_SUBTYPE_POWERPC_7450, "ppc7450"),
    arch(CPU_TYPE_POWERPC, CPU_SUBTYPE_POWERPC_970, "ppc970"),
    // 45..=47
    arch(CPU_TYPE_VEO, CPU_SUBTYPE_VEO_ALL, "veo"),
    arch(CPU_TYPE_VEO, CPU_SUBTYPE_VEO_1, "veo1"),
    arch(CPU_TYPE_VEO, CPU_SUBTYPE_VEO_2, "veo2"),
    // 48..=49
    arch(CPU_TYPE_X86_64, CPU_SUBTYPE_X86_64_ALL, "x86_64"),
    arch(CPU_TYPE_X86_64, CPU_SUBTYPE_X86_64_H, "x86_64h"),
    // 50..=52
    arch(CPU_TYPE_ARM64, CPU_SUBTYPE_ARM64_ALL, "arm64"),
    arch(CPU_TYPE_ARM64, CPU_SUBTYPE_ARM64_V8, "arm64"),
    arch(CPU_TYPE_ARM64, CPU_SUBTYPE_ARM64E, "arm64e"),
    // 53..=54
    arch(CPU_TYPE_POWERPC64, CPU_SUBTYPE_POWERPC_ALL, "ppc64"),
    arch(CPU_TYPE_POWERPC64, CPU_SUBTYPE_POWERPC_970, "ppc970-64"),
    // 55
    arch(CPU_TYPE_ARM64_32, CPU_SUBTYPE_ARM64_32_ALL, "arm64_32"),
];

/// Secondary index: the contiguous `ARCH_INFOS` slice for one cputype.
struct CputypeBlock {
    cputype: CpuType,
    front: usize,
    back: usize,
}

const fn block(cputype: CpuType, front: usize, back: usize) -> CputypeBlock {
    CputypeBlock { cputype, front, back }
}

// Ordered by cputype for the binary search below.
static CPUTYPE_BLOCKS: [CputypeBlock; 14] = [
    block(CPU_TYPE_ANY, 0, 2),
    block(CPU_TYPE_MC680X0, 3, 5),
    block(CPU_TYPE_X86, 6, 14),
    block(CPU_TYPE_HPPA, 15, 16),
    block(CPU_TYPE_ARM, 17, 29),
    block(CPU_TYPE_MC88000, 30, 30),
    block(CPU_TYPE_SPARC, 31, 31),
    block(CPU_TYPE_I860, 32, 32),
    block(CPU_TYPE_POWERPC, 33, 44),
    block(CPU_TYPE_VEO, 45, 47),
    block(CPU_TYPE_X86_64, 48, 49),
    block(CPU_TYPE_ARM64, 50, 52),
    block(CPU_TYPE_POWERPC64, 53, 54),
    block(CPU_TYPE_ARM64_32, 55, 55),
];

/// Finds the table index for a `(cputype, cpusubtype)` pair.
///
/// The cputype level is a binary search over the contiguous blocks; the
/// subtype level scans the block (the x86 block is not subtype-sorted, so a
/// second binary search could miss entries).
pub fn arch_index_for_cputype(cputype: CpuType, cpusubtype: CpuSubtype) -> Option<usize> {
    let block = CPUTYPE_BLOCKS
        .binary_search_by(|block| block.cputype.cmp(&cputype))
        .ok()?;
    let block = &CPUTYPE_BLOCKS[block];

    ARCH_INFOS[block.front..=block.back]
        .iter()
        .position(|info| info.cpusubtype == cpusubtype)
        .map(|position| block.front + position)
}

pub fn arch_info_for_cputype(cputype: CpuType, cpusubtype: CpuSubtype) -> Option<&'static ArchInfo> {
    arch_index_for_cputype(cputype, cpusubtype).map(|index| &ARCH_INFOS[index])
}

/// First table entry carrying `name`.
pub fn arch_index_for_name(name: &str) -> Option<usize> {
    ARCH_INFOS.iter().position(|info| info.name == name)
}

pub fn arch_info(index: usize) -> &'static ArchInfo {
    &ARCH_INFOS[index]
}

/// The set of architecture-table indices seen so far, one bit per index.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArchSet(u64);

impl ArchSet {
    pub const fn empty() -> ArchSet {
        ArchSet(0)
    }

    pub const fn from_bits(bits: u64) -> ArchSet {
        ArchSet(bits)
    }

    pub fn bits(self) -> u64 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, index: usize) -> bool {
        self.0 & (1u64 << index) != 0
    }

    pub fn insert(&mut self, index: usize) {
        self.0 |= 1u64 << index;
    }

    pub fn count(self) -> u32 {
        self.0.count_ones()
    }

    pub fn is_subset_of(self, other: ArchSet) -> bool {
        self.0 & !other.0 == 0
    }

    /// Set bits as arch-table indices, ascending.
    pub fn indices(self) -> impl Iterator<Item = usize> {
        let bits = self.0;
        (0..64usize).filter(move |index| bits & (1u64 << index) != 0)
    }

    /// Arch names for the set bits, ascending by index.
    pub fn names(self) -> impl Iterator<Item = &'static str> {
        self.indices().map(|index| ARCH_INFOS[index].name)
    }
}

#[test]
fn table_indices_are_abi() {
    assert_eq!(ARCH_INFOS[6].name, "i386");
    assert_eq!(ARCH_INFOS[48].name, "x86_64");
    assert_eq!(ARCH_INFOS[50].name, "arm64");
    assert_eq!(ARCH_INFOS[55].name, "arm64_32");
}

#[test]
fn blocks_cover_the_table_contiguously() {
    let mut next = 0;
    for block in &CPUTYPE_BLOCKS {
        assert_eq!(block.front, next);
        assert!(block.back >= block.front);
        for info in &ARCH_INFOS[block.front..=block.back] {
            assert_eq!(info.cputype, block.cputype);
        }
        next = block.back + 1;
    }
    assert_eq!(next, ARCH_INFOS.len());
}

#[test]
fn blocks_are_sorted_by_cputype() {
    for pair in CPUTYPE_BLOCKS.windows(2) {
        assert!(pair[0].cputype < pair[1].cputype);
    }
}

#[test]
fn lookup_finds_common_archs() {
    assert_eq!(
        arch_index_for_cputype(CPU_TYPE_X86_64, CPU_SUBTYPE_X86_64_ALL),
        Some(48)
    );
    assert_eq!(
        arch_index_for_cputype(CPU_TYPE_X86, CPU_SUBTYPE_I386_ALL),
        Some(6)
    );
    assert_eq!(
        arch_index_for_cputype(CPU_TYPE_ARM64, CPU_SUBTYPE_ARM64E),
        Some(52)
    );
    assert_eq!(
        arch_index_for_cputype(CPU_TYPE_X86, CPU_SUBTYPE_X86_64_H),
        Some(14)
    );
}

#[test]
fn lookup_misses_unknown_pairs() {
    assert_eq!(arch_index_for_cputype(CPU_TYPE_X86_64, 77), None);
    assert_eq!(arch_index_for_cputype(1234, 0), None);
}

#[test]
fn lookup_by_name() {
    assert_eq!(arch_index_for_name("x86_64"), Some(48));
    assert_eq!(arch_index_for_name("hyperion"), None);
}

#[test]
fn arch_set_tracks_indices() {
    let mut set = ArchSet::empty();
    assert!(set.is_empty());

    set.insert(6);
    set.insert(48);
    assert!(set.contains(6));
    assert!(!set.contains(7));
    assert_eq!(set.count(), 2);
    assert_eq!(set.indices().collect::<Vec<_>>(), vec![6, 48]);
    assert_eq!(set.names().collect::<Vec<_>>(), vec!["i386", "x86_64"]);
    assert!(set.is_subset_of(ArchSet::from_bits(set.bits() | 1)));
    assert!(!ArchSet::from_bits(1).is_subset_of(set));
}
