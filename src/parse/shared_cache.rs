//! Dyld shared cache parsing: header and mapping validation, the private
//! memory map, per-image Mach-O extraction and the local-symbols sub-table.

use std::fs::File;
use std::io::Read;
use std::str;

use log::warn;
use memmap2::{MmapMut, MmapOptions};
use plain::Plain;
use scroll::{Endian, Pread, SizeWith};

use crate::error::{Error, Result};
use crate::mach::cputype::{arch_info, ArchInfo};
use crate::mach::header::Header;
use crate::parse::macho::{finish, parse_thin_from_map};
use crate::parse::symbols::parse_symbols;
use crate::parse::{MapStore, ParseFlags, ParserOptions};
use crate::range::Range;
use crate::strtab::Strtab;
use crate::tbd::CreateInfo;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pread, SizeWith)]
pub struct DyldCacheHeader {
    pub magic: [u8; 16],
    pub mapping_offset: u32,
    pub mapping_count: u32,
    pub images_offset: u32,
    pub images_count: u32,
    pub dyld_base_address: u64,
    pub code_signature_offset: u64,
    pub code_signature_size: u64,
    pub slide_info_offset: u64,
    pub slide_info_size: u64,
    pub local_symbols_offset: u64,
    pub local_symbols_size: u64,
    pub uuid: [u8; 16],
}

pub const SIZEOF_DYLD_CACHE_HEADER: usize = 104;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pread, SizeWith)]
pub struct DyldCacheMappingInfo {
    pub address: u64,
    pub size: u64,
    pub file_offset: u64,
    pub max_prot: u32,
    pub init_prot: u32,
}

pub const SIZEOF_DYLD_CACHE_MAPPING_INFO: usize = 32;

unsafe impl Plain for DyldCacheMappingInfo {}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pread, SizeWith)]
pub struct DyldCacheImageInfo {
    pub address: u64,
    pub mod_time: u64,
    pub inode: u64,
    pub path_file_offset: u32,
    pub pad: u32,
}

pub const SIZEOF_DYLD_CACHE_IMAGE_INFO: usize = 32;

unsafe impl Plain for DyldCacheImageInfo {}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pread, SizeWith)]
pub struct DyldCacheLocalSymbolsInfo {
    pub nlist_offset: u32,
    pub nlist_count: u32,
    pub strings_offset: u32,
    pub strings_size: u32,
    pub entries_offset: u32,
    pub entries_count: u32,
}

pub const SIZEOF_DYLD_CACHE_LOCAL_SYMBOLS_INFO: usize = 24;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pread, SizeWith)]
pub struct DyldCacheLocalSymbolsEntry {
    pub dylib_offset: u32,
    pub nlist_start_index: u32,
    pub nlist_count: u32,
}

pub const SIZEOF_DYLD_CACHE_LOCAL_SYMBOLS_ENTRY: usize = 12;

unsafe impl Plain for DyldCacheLocalSymbolsEntry {}

/// The cache magic is 16 bytes naming the architecture; each literal pins
/// one arch-table index (and hence one arch-set bit).
pub fn arch_index_for_cache_magic(magic: &[u8; 16]) -> Option<usize> {
    match magic {
        b"dyld_v1    i386\0" => Some(6),
        b"dyld_v1  x86_64\0" => Some(48),
        b"dyld_v1 x86_64h\0" => Some(49),
        b"dyld_v1   armv5\0" => Some(20),
        b"dyld_v1   armv6\0" => Some(19),
        b"dyld_v1   armv7\0" => Some(22),
        b"dyld_v1  armv7f\0" => Some(23),
        b"dyld_v1  armv7k\0" => Some(25),
        b"dyld_v1  armv7m\0" => Some(27),
        b"dyld_v1  armv7s\0" => Some(24),
        b"dyld_v1   arm64\0" => Some(50),
        b"dyld_v1  arm64e\0" => Some(52),
        b"dyld_v1arm64_32\0" => Some(55),
        _ => None,
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct CacheOptions {
    /// Require every image's path offset to land in the free region after
    /// the header arrays.
    pub verify_image_path_offsets: bool,
    /// Clear the per-image reserved pad words in the (private) map.
    pub zero_image_pads: bool,
}

struct LocalSymbols {
    region: Range,
    info: DyldCacheLocalSymbolsInfo,
}

/// A validated, privately-mapped shared cache.
///
/// The map is copy-on-write; pad zeroing never touches the file. Aggregates
/// parsed from it may borrow strings, so they cannot outlive the cache.
pub struct SharedCache {
    map: MmapMut,
    size: u64,
    arch_index: usize,
    mappings: Vec<DyldCacheMappingInfo>,
    images_offset: u64,
    images_count: u32,
    available: Range,
    local_symbols: Option<LocalSymbols>,
}

impl SharedCache {
    /// Validates and maps a cache. The 16-byte magic has already been read;
    /// the file cursor sits at byte 16.
    pub fn parse_from_file(
        file: &File,
        magic: &[u8; 16],
        options: CacheOptions,
    ) -> Result<SharedCache> {
        let arch_index = arch_index_for_cache_magic(magic).ok_or(Error::NotACache)?;

        // Validate the header before paying for the map.
        let mut rest = [0u8; SIZEOF_DYLD_CACHE_HEADER - 16];
        let mut reader = file;
        reader.read_exact(&mut rest).map_err(|err| {
            if err.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::NotACache
            } else {
                Error::Read(err)
            }
        })?;

        let mut header_bytes = [0u8; SIZEOF_DYLD_CACHE_HEADER];
        header_bytes[..16].copy_from_slice(magic);
        header_bytes[16..].copy_from_slice(&rest);
        let header: DyldCacheHeader = header_bytes[..].pread_with(0, Endian::Little)?;

        let size = file.metadata().map_err(Error::Stat)?.len();
        let past_header = Range::new(SIZEOF_DYLD_CACHE_HEADER as u64, size);

        if !past_header.contains_location(u64::from(header.mapping_offset)) {
            return Err(Error::InvalidMappings);
        }
        if !past_header.contains_location(u64::from(header.images_offset)) {
            return Err(Error::InvalidImages);
        }

        let mappings_size = (SIZEOF_DYLD_CACHE_MAPPING_INFO as u64)
            .checked_mul(u64::from(header.mapping_count))
            .ok_or(Error::InvalidMappings)?;
        let mappings_end = u64::from(header.mapping_offset)
            .checked_add(mappings_size)
            .ok_or(Error::InvalidMappings)?;

        let images_size = (SIZEOF_DYLD_CACHE_IMAGE_INFO as u64)
            .checked_mul(u64::from(header.images_count))
            .ok_or(Error::InvalidImages)?;
        let images_end = u64::from(header.images_offset)
            .checked_add(images_size)
            .ok_or(Error::InvalidImages)?;

        if !past_header.contains_end(mappings_end) {
            return Err(Error::InvalidMappings);
        }
        if !past_header.contains_end(images_end) {
            return Err(Error::InvalidImages);
        }

        mappings_size
            .checked_add(images_size)
            .ok_or(Error::InvalidImages)?;

        let mappings_range = Range::new(u64::from(header.mapping_offset), mappings_end);
        let images_range = Range::new(u64::from(header.images_offset), images_end);
        if mappings_range.overlaps(images_range) {
            return Err(Error::OverlappingRanges);
        }

        // Private copy-on-write map: pad zeroing may write, the file stays
        // intact.
        let mut map = unsafe { MmapOptions::new().map_copy(file) }.map_err(Error::Mmap)?;

        let full_cache_range = Range::new(0, size);
        let mapping_bytes = &map[mappings_range.begin as usize..mappings_range.end as usize];
        let mappings: Vec<DyldCacheMappingInfo> =
            plain::slice_from_bytes_len(mapping_bytes, header.mapping_count as usize)
                .map_err(|_| Error::InvalidMappings)?
                .to_vec();

        for (index, mapping) in mappings.iter().enumerate() {
            let file_end = mapping
                .file_offset
                .checked_add(mapping.size)
                .ok_or(Error::OverlappingMappings)?;

            let file_range = Range::new(mapping.file_offset, file_end);
            if !full_cache_range.contains_range(file_range) {
                return Err(Error::InvalidMappings);
            }

            for earlier in &mappings[..index] {
                let earlier_range =
                    Range::new(earlier.file_offset, earlier.file_offset + earlier.size);
                if file_range.overlaps(earlier_range) {
                    return Err(Error::OverlappingMappings);
                }
            }
        }

        // Image paths and image headers may only live past both arrays.
        let available = Range::new(mappings_end.max(images_end), size);

        if options.verify_image_path_offsets || options.zero_image_pads {
            for index in 0..header.images_count as usize {
                let image_offset =
                    images_range.begin as usize + index * SIZEOF_DYLD_CACHE_IMAGE_INFO;

                if options.verify_image_path_offsets {
                    let path_offset: u32 =
                        map[..].pread_with(image_offset + 24, Endian::Little)?;
                    if !available.contains_location(u64::from(path_offset)) {
                        return Err(Error::InvalidImages);
                    }
                }

                if options.zero_image_pads {
                    map[image_offset + 28..image_offset + 32].fill(0);
                }
            }
        }

        let local_symbols = Self::locate_local_symbols(&map, &header, size);

        Ok(SharedCache {
            map,
            size,
            arch_index,
            mappings,
            images_offset: images_range.begin,
            images_count: header.images_count,
            available,
            local_symbols,
        })
    }

    /// The local-symbols sub-region, when the header carries one that fits
    /// the file. A bad region is dropped with a warning rather than failing
    /// the cache; its exact layout has varied across dyld versions.
    fn locate_local_symbols(
        map: &MmapMut,
        header: &DyldCacheHeader,
        size: u64,
    ) -> Option<LocalSymbols> {
        if header.local_symbols_offset == 0 || header.local_symbols_size == 0 {
            return None;
        }

        let end = header
            .local_symbols_offset
            .checked_add(header.local_symbols_size)?;

        let region = Range::new(header.local_symbols_offset, end);
        if !Range::new(0, size).contains_range(region)
            || region.size() < SIZEOF_DYLD_CACHE_LOCAL_SYMBOLS_INFO as u64
        {
            warn!("shared cache local-symbols region is out of bounds, ignoring it");
            return None;
        }

        let info: DyldCacheLocalSymbolsInfo = map[..]
            .pread_with(region.begin as usize, Endian::Little)
            .ok()?;

        Some(LocalSymbols { region, info })
    }

    pub fn arch(&self) -> &'static ArchInfo {
        arch_info(self.arch_index)
    }

    pub fn arch_index(&self) -> usize {
        self.arch_index
    }

    pub fn images_count(&self) -> u32 {
        self.images_count
    }

    pub fn image(&self, index: u32) -> Result<DyldCacheImageInfo> {
        if index >= self.images_count {
            return Err(Error::InvalidImages);
        }

        let offset = self.images_offset as usize + index as usize * SIZEOF_DYLD_CACHE_IMAGE_INFO;
        Ok(self.map[..].pread_with(offset, Endian::Little)?)
    }

    /// The image's install path, read out of the mapped file.
    pub fn image_path(&self, index: u32) -> Result<&str> {
        let image = self.image(index)?;

        let begin = image.path_file_offset as usize;
        let bytes = self.map.get(begin..).ok_or(Error::InvalidImages)?;
        let end = bytes
            .iter()
            .position(|&byte| byte == 0)
            .ok_or(Error::InvalidImages)?;

        str::from_utf8(&bytes[..end]).map_err(|_| Error::InvalidImages)
    }

    /// Resolves an image's address through the mapping table to its file
    /// offset.
    fn image_file_offset(&self, image: &DyldCacheImageInfo) -> Option<u64> {
        for mapping in &self.mappings {
            let addresses = Range::new(mapping.address, mapping.address.checked_add(mapping.size)?);
            if addresses.contains_location(image.address) {
                let offset = mapping.file_offset + (image.address - mapping.address);
                if offset < self.size {
                    return Some(offset);
                }
                return None;
            }
        }
        None
    }

    /// Parses one resident image into `info`. Section and symbol-table
    /// offsets inside cache images are cache-file absolute, so the
    /// sect-off-absolute discipline is forced on.
    pub fn parse_image<'a>(
        &'a self,
        info: &mut CreateInfo<'a>,
        index: u32,
        flags: ParseFlags,
        options: ParserOptions,
    ) -> Result<()> {
        let image = self.image(index)?;
        let image_offset = self.image_file_offset(&image).ok_or(Error::InvalidImages)?;

        let mut options = options;
        options.sect_off_absolute = true;

        parse_thin_from_map(info, &self.map[..], image_offset, self.available, flags, options)?;
        self.parse_image_local_symbols(info, image_offset, flags, options)?;

        finish(info, flags)
    }

    /// Supplements an image's exports from the cache's local-symbols
    /// sub-table, when one exists and carries an entry for the image.
    fn parse_image_local_symbols<'a>(
        &'a self,
        info: &mut CreateInfo<'a>,
        image_offset: u64,
        flags: ParseFlags,
        options: ParserOptions,
    ) -> Result<()> {
        let local = match &self.local_symbols {
            Some(local) => local,
            None => return Ok(()),
        };

        // Index layouts vary across dyld versions; any out-of-bounds field
        // skips the lookup when missing exports are tolerated.
        let lenient = flags.ignore_missing_exports;
        let fail = |err: Error| -> Result<()> {
            if lenient {
                warn!("skipping shared cache local-symbols: {err}");
                Ok(())
            } else {
                Err(err)
            }
        };

        let entries_size = (SIZEOF_DYLD_CACHE_LOCAL_SYMBOLS_ENTRY as u64)
            .checked_mul(u64::from(local.info.entries_count));
        let entries_begin =
            local.region.begin.checked_add(u64::from(local.info.entries_offset));

        let entries_range = match (entries_begin, entries_size) {
            (Some(begin), Some(size)) => match begin.checked_add(size) {
                Some(end) => Range::new(begin, end),
                None => return fail(Error::InvalidSymbolTable),
            },
            _ => return fail(Error::InvalidSymbolTable),
        };

        if !local.region.contains_range(entries_range) {
            return fail(Error::InvalidSymbolTable);
        }

        let entry_bytes = &self.map[entries_range.begin as usize..entries_range.end as usize];
        let entries: &[DyldCacheLocalSymbolsEntry] =
            match plain::slice_from_bytes_len(entry_bytes, local.info.entries_count as usize) {
                Ok(entries) => entries,
                Err(_) => return fail(Error::InvalidSymbolTable),
            };

        let entry = match entries
            .iter()
            .find(|entry| u64::from(entry.dylib_offset) == image_offset)
        {
            Some(entry) => entry,
            None => return Ok(()),
        };

        if entry.nlist_count == 0 {
            return Ok(());
        }

        // The image's own header decides entry width and byte order.
        let header = Header::parse(&self.map[image_offset as usize..], 0)?;
        let stride = if header.is_64() { 16u64 } else { 12u64 };

        let start = entry.nlist_start_index;
        let count = entry.nlist_count;
        match start.checked_add(count) {
            Some(end_index) if end_index <= local.info.nlist_count => {}
            _ => return fail(Error::InvalidSymbolTable),
        }

        let nlist_begin = local
            .region
            .begin
            .checked_add(u64::from(local.info.nlist_offset))
            .and_then(|base| base.checked_add(stride.checked_mul(u64::from(start))?));
        let nlist_end =
            nlist_begin.and_then(|begin| begin.checked_add(stride * u64::from(count)));

        let nlist_range = match (nlist_begin, nlist_end) {
            (Some(begin), Some(end)) => Range::new(begin, end),
            _ => return fail(Error::InvalidSymbolTable),
        };

        let strings_begin = local
            .region
            .begin
            .checked_add(u64::from(local.info.strings_offset));
        let strings_end =
            strings_begin.and_then(|begin| begin.checked_add(u64::from(local.info.strings_size)));

        let strings_range = match (strings_begin, strings_end) {
            (Some(begin), Some(end)) => Range::new(begin, end),
            _ => return fail(Error::InvalidSymbolTable),
        };

        if !local.region.contains_range(nlist_range)
            || !local.region.contains_range(strings_range)
        {
            return fail(Error::InvalidSymbolTable);
        }

        let nlists = &self.map[nlist_range.begin as usize..nlist_range.end as usize];
        let strings = &self.map[strings_range.begin as usize..strings_range.end as usize];

        parse_symbols(
            info,
            self.arch_index,
            header.is_64(),
            header.endianness(),
            count,
            nlists,
            Strtab::new(strings),
            &MapStore { copy: options.copy_strings },
            flags,
            true,
        )
    }
}

#[test]
fn cache_magics_pin_arch_indices() {
    assert_eq!(arch_index_for_cache_magic(b"dyld_v1  x86_64\0"), Some(48));
    assert_eq!(arch_index_for_cache_magic(b"dyld_v1    i386\0"), Some(6));
    assert_eq!(arch_index_for_cache_magic(b"dyld_v1   arm64\0"), Some(50));
    assert_eq!(arch_index_for_cache_magic(b"dyld_v1arm64_32\0"), Some(55));
    assert_eq!(arch_index_for_cache_magic(b"dyld_v2  x86_64\0"), None);
    assert_eq!(arch_index_for_cache_magic(&[0; 16]), None);
}

#[test]
fn layout_sizes_match() {
    use std::mem;
    assert_eq!(mem::size_of::<DyldCacheHeader>(), SIZEOF_DYLD_CACHE_HEADER);
    assert_eq!(
        mem::size_of::<DyldCacheMappingInfo>(),
        SIZEOF_DYLD_CACHE_MAPPING_INFO
    );
    assert_eq!(
        mem::size_of::<DyldCacheImageInfo>(),
        SIZEOF_DYLD_CACHE_IMAGE_INFO
    );
    assert_eq!(
        mem::size_of::<DyldCacheLocalSymbolsInfo>(),
        SIZEOF_DYLD_CACHE_LOCAL_SYMBOLS_INFO
    );
    assert_eq!(
        mem::size_of::<DyldCacheLocalSymbolsEntry>(),
        SIZEOF_DYLD_CACHE_LOCAL_SYMBOLS_ENTRY
    );
}
