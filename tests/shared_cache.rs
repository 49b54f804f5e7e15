//! Shared-cache scenarios over synthetic cache files; these go through a
//! real temp file because the parser maps its input.

mod common;

use std::io::{Read, Write};

use common::{Sym, ThinBuilder, CPU_SUBTYPE_X86_64, CPU_TYPE_X86_64};
use tbdgen::parse::{CacheOptions, ParseFlags, ParserOptions, SharedCache};
use tbdgen::tbd::CreateInfo;
use tbdgen::Error;

const MAGIC_X86_64: &[u8; 16] = b"dyld_v1  x86_64\0";

const MAPPING_ADDRESS: u64 = 0x7fff_0000_0000;
const HEADER_SIZE: usize = 104;
const MAPPINGS_AT: usize = 104;
const IMAGES_AT: usize = 136;
const PATH_AT: usize = 168;
const MACHO_AT: usize = 256;

const IMAGE_PATH: &str = "/usr/lib/libcache.dylib";

fn le32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn le64(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn cache_header(
    mapping_offset: u32,
    mapping_count: u32,
    images_offset: u32,
    images_count: u32,
    local_offset: u64,
    local_size: u64,
) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(MAGIC_X86_64);
    le32(&mut out, mapping_offset);
    le32(&mut out, mapping_count);
    le32(&mut out, images_offset);
    le32(&mut out, images_count);
    le64(&mut out, MAPPING_ADDRESS); // dyld_base_address
    le64(&mut out, 0); // code signature
    le64(&mut out, 0);
    le64(&mut out, 0); // slide info
    le64(&mut out, 0);
    le64(&mut out, local_offset);
    le64(&mut out, local_size);
    out.extend_from_slice(&[0u8; 16]); // uuid
    assert_eq!(out.len(), HEADER_SIZE);
    out
}

/// One mapping, one image, the image's path, and a thin x86_64 dylib at
/// `MACHO_AT` whose symtab offsets are cache-absolute.
fn build_cache(local: Option<(u64, u64, Vec<u8>)>, image_pad: u32) -> Vec<u8> {
    let macho = ThinBuilder::new_64(CPU_TYPE_X86_64, CPU_SUBTYPE_X86_64)
        .id_dylib(IMAGE_PATH, 0x0001_0000, 0x0001_0000)
        .version_min_macos()
        .uuid([3; 16])
        .symtab_base(MACHO_AT as u64)
        .symtab(&[Sym::exported("_cached")])
        .build();

    let (local_offset, local_size, local_bytes) = match local {
        Some((offset, size, bytes)) => (offset, size, bytes),
        None => (0, 0, Vec::new()),
    };

    let mut out = cache_header(
        MAPPINGS_AT as u32,
        1,
        IMAGES_AT as u32,
        1,
        local_offset,
        local_size,
    );

    // The single mapping covers the image bytes.
    le64(&mut out, MAPPING_ADDRESS);
    le64(&mut out, macho.len() as u64);
    le64(&mut out, MACHO_AT as u64); // file offset
    le32(&mut out, 5); // max_prot
    le32(&mut out, 5); // init_prot
    assert_eq!(out.len(), IMAGES_AT);

    // The single image.
    le64(&mut out, MAPPING_ADDRESS);
    le64(&mut out, 0); // mod_time
    le64(&mut out, 0); // inode
    le32(&mut out, PATH_AT as u32);
    le32(&mut out, image_pad);
    assert_eq!(out.len(), PATH_AT);

    out.extend_from_slice(IMAGE_PATH.as_bytes());
    out.push(0);

    out.resize(MACHO_AT, 0);
    out.extend_from_slice(&macho);

    if !local_bytes.is_empty() {
        out.resize(local_offset as usize, 0);
        out.extend_from_slice(&local_bytes);
    }

    out
}

fn open_cache(bytes: &[u8]) -> (std::fs::File, [u8; 16]) {
    let mut tmp = tempfile::NamedTempFile::new().unwrap();
    tmp.write_all(bytes).unwrap();
    tmp.flush().unwrap();

    let file = tmp.into_file();

    let mut magic = [0u8; 16];
    {
        let mut reader = &file;
        use std::io::Seek;
        reader.seek(std::io::SeekFrom::Start(0)).unwrap();
        reader.read_exact(&mut magic).unwrap();
    }

    (file, magic)
}

#[test]
fn parses_a_resident_image() {
    let bytes = build_cache(None, 0);
    let (file, magic) = open_cache(&bytes);

    let cache = SharedCache::parse_from_file(&file, &magic, CacheOptions::default()).unwrap();
    assert_eq!(cache.arch().name, "x86_64");
    assert_eq!(cache.images_count(), 1);
    assert_eq!(cache.image_path(0).unwrap(), IMAGE_PATH);

    let mut info = CreateInfo::new();
    cache
        .parse_image(&mut info, 0, ParseFlags::default(), ParserOptions::default())
        .unwrap();

    assert_eq!(info.install_name.as_deref(), Some(IMAGE_PATH));
    assert!(info.archs.contains(48));
    assert_eq!(info.uuids.len(), 1);

    let names: Vec<&str> = info.exports.iter().map(|e| e.string.as_ref()).collect();
    assert_eq!(names, vec!["_cached"]);
}

#[test]
fn mapping_offset_past_eof_is_invalid() {
    let bytes = cache_header(4096, 1, IMAGES_AT as u32, 1, 0, 0);
    let (file, magic) = open_cache(&bytes);

    let result = SharedCache::parse_from_file(&file, &magic, CacheOptions::default());
    assert!(matches!(result, Err(Error::InvalidMappings)));
}

#[test]
fn overlapping_header_arrays_are_invalid() {
    let mut bytes = cache_header(MAPPINGS_AT as u32, 1, MAPPINGS_AT as u32, 1, 0, 0);
    bytes.resize(512, 0);
    let (file, magic) = open_cache(&bytes);

    let result = SharedCache::parse_from_file(&file, &magic, CacheOptions::default());
    assert!(matches!(result, Err(Error::OverlappingRanges)));
}

#[test]
fn unknown_magic_is_not_a_cache() {
    let bytes = build_cache(None, 0);
    let (file, _) = open_cache(&bytes);

    let result =
        SharedCache::parse_from_file(&file, b"dyld_v9  x86_64\0", CacheOptions::default());
    assert!(matches!(result, Err(Error::NotACache)));
}

#[test]
fn image_path_offsets_can_be_verified() {
    let macho_only = build_cache(None, 0);

    // Corrupt the image's path offset so it points into the header.
    let mut bytes = macho_only;
    bytes[IMAGES_AT + 24..IMAGES_AT + 28].copy_from_slice(&16u32.to_le_bytes());

    let (file, magic) = open_cache(&bytes);
    let options = CacheOptions { verify_image_path_offsets: true, ..CacheOptions::default() };
    let result = SharedCache::parse_from_file(&file, &magic, options);
    assert!(matches!(result, Err(Error::InvalidImages)));
}

#[test]
fn image_pads_can_be_zeroed_in_the_private_map() {
    let bytes = build_cache(None, 0xdead_beef);
    let (file, magic) = open_cache(&bytes);

    let options = CacheOptions { zero_image_pads: true, ..CacheOptions::default() };
    let cache = SharedCache::parse_from_file(&file, &magic, options).unwrap();
    assert_eq!(cache.image(0).unwrap().pad, 0);
}

#[test]
fn bad_local_symbols_region_is_ignored() {
    // Region claims to live far past the end of the file.
    let macho = build_cache(None, 0);
    let size = macho.len() as u64;

    let mut bytes = macho;
    bytes[72..80].copy_from_slice(&(size + 4096).to_le_bytes());
    bytes[80..88].copy_from_slice(&1024u64.to_le_bytes());

    let (file, magic) = open_cache(&bytes);
    let cache = SharedCache::parse_from_file(&file, &magic, CacheOptions::default()).unwrap();

    let mut info = CreateInfo::new();
    cache
        .parse_image(&mut info, 0, ParseFlags::default(), ParserOptions::default())
        .unwrap();
    assert_eq!(info.exports.len(), 1);
}

#[test]
fn local_symbols_supplement_an_image() {
    // A local-symbols region with one entry for the image at MACHO_AT,
    // naming one extra exported symbol.
    let base = build_cache(None, 0);
    let local_offset = ((base.len() as u64) + 7) & !7;

    let mut region = Vec::new();
    le32(&mut region, 24); // nlist_offset
    le32(&mut region, 1); // nlist_count
    le32(&mut region, 40); // strings_offset
    le32(&mut region, 6); // strings_size
    le32(&mut region, 48); // entries_offset
    le32(&mut region, 1); // entries_count

    // One 64-bit nlist: external, defined in a section.
    le32(&mut region, 1); // n_strx
    region.push(0x0f); // n_type: N_SECT | N_EXT
    region.push(1); // n_sect
    region.extend_from_slice(&0u16.to_le_bytes()); // n_desc
    le64(&mut region, 0x2000); // n_value
    assert_eq!(region.len(), 40);

    region.extend_from_slice(b"\0_loc\0");
    region.resize(48, 0);

    // The entry for the image.
    le32(&mut region, MACHO_AT as u32); // dylib_offset
    le32(&mut region, 0); // nlist_start_index
    le32(&mut region, 1); // nlist_count
    assert_eq!(region.len(), 60);

    let bytes = build_cache(Some((local_offset, 60, region)), 0);
    let (file, magic) = open_cache(&bytes);
    let cache = SharedCache::parse_from_file(&file, &magic, CacheOptions::default()).unwrap();

    let mut info = CreateInfo::new();
    cache
        .parse_image(&mut info, 0, ParseFlags::default(), ParserOptions::default())
        .unwrap();

    let names: Vec<&str> = info.exports.iter().map(|e| e.string.as_ref()).collect();
    assert_eq!(names, vec!["_cached", "_loc"]);
}
