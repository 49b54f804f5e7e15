//! Envelope dispatch and the fat/thin handlers, over a descriptor or a
//! memory-mapped view.

use std::io::{Cursor, Read, Seek, SeekFrom};

use log::warn;
use scroll::{Endian, Pread};

use crate::error::{Error, Result};
use crate::mach::cputype::arch_index_for_cputype;
use crate::mach::fat::{
    FatArch, FatArch64, RawFatArch, FAT_CIGAM, FAT_CIGAM_64, FAT_MAGIC_64, SIZEOF_FAT_HEADER,
};
use crate::mach::header::{
    is_thin_magic, Header, MH_APP_EXTENSION_SAFE, MH_CIGAM, MH_CIGAM_64, MH_TWOLEVEL,
    SIZEOF_HEADER_32, SIZEOF_HEADER_64,
};
use crate::mach::load_commands::{SymtabCommand, LC_SYMTAB};
use crate::mach::symbols::{SIZEOF_NLIST_32, SIZEOF_NLIST_64};
use crate::mach::{self, Envelope};
use crate::parse::load_commands::{
    parse_load_commands, validate_command_area, ImageInfoSource, SliceCtx,
};
use crate::parse::symbols::parse_symbols;
use crate::parse::{MapStore, OwnedStore, ParseFlags, ParserOptions};
use crate::range::Range;
use crate::strtab::Strtab;
use crate::tbd::CreateInfo;

/// Reads at `pos` without disturbing the stream position for the caller.
pub(crate) fn read_exact_at<R: Read + Seek>(fd: &mut R, pos: u64, buf: &mut [u8]) -> Result<()> {
    let original = fd.stream_position().map_err(Error::Seek)?;
    fd.seek(SeekFrom::Start(pos)).map_err(Error::Seek)?;

    let result = fd.read_exact(buf).map_err(Error::Read);

    fd.seek(SeekFrom::Start(original)).map_err(Error::Seek)?;
    result
}

/// The remaining size of the input, position preserved.
fn stream_size<R: Seek>(fd: &mut R) -> Result<u64> {
    let position = fd.stream_position().map_err(Error::Stat)?;
    let size = fd.seek(SeekFrom::End(0)).map_err(Error::Stat)?;
    fd.seek(SeekFrom::Start(position)).map_err(Error::Stat)?;
    Ok(size)
}

/// Header reads cut short mean the envelope lied, not that I/O failed.
fn read_envelope_exact<R: Read>(fd: &mut R, buf: &mut [u8]) -> Result<()> {
    fd.read_exact(buf).map_err(|err| {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::NotAMacho
        } else {
            Error::Read(err)
        }
    })
}

/// A thin header whose magic has already been consumed; `rest` holds the
/// remaining 24 bytes.
fn thin_header(magic: u32, rest: &[u8], le: Endian) -> Result<Header> {
    Ok(Header {
        magic,
        cputype: rest.pread_with(0, le)?,
        cpusubtype: rest.pread_with(4, le)?,
        filetype: rest.pread_with(8, le)?,
        ncmds: rest.pread_with(12, le)?,
        sizeofcmds: rest.pread_with(16, le)?,
        flags: rest.pread_with(20, le)?,
        reserved: 0,
    })
}

fn check_header_flags(info: &mut CreateInfo, header_flags: u32) -> Result<()> {
    if info.flags.is_empty() {
        info.flags.flat_namespace = header_flags & MH_TWOLEVEL == 0;
        info.flags.not_app_extension_safe = header_flags & MH_APP_EXTENSION_SAFE == 0;
        return Ok(());
    }

    if info.flags.flat_namespace && header_flags & MH_TWOLEVEL != 0 {
        return Err(Error::ConflictingFlags);
    }

    if info.flags.not_app_extension_safe && header_flags & MH_APP_EXTENSION_SAFE != 0 {
        return Err(Error::ConflictingFlags);
    }

    Ok(())
}

/// Claims the slice's architecture bit, failing on unknown cputype pairs and
/// on a second slice for the same entry.
fn claim_arch_bit(info: &mut CreateInfo, header: &Header) -> Result<usize> {
    let arch_index = arch_index_for_cputype(header.cputype, header.cpusubtype)
        .ok_or(Error::UnsupportedCputype)?;

    if info.archs.contains(arch_index) {
        return Err(Error::MultipleArchsForCputype);
    }
    info.archs.insert(arch_index);

    Ok(arch_index)
}

struct FileImageInfoSource<'r, R> {
    fd: &'r mut R,
    slice_begin: u64,
}

impl<R: Read + Seek> ImageInfoSource for FileImageInfoSource<'_, R> {
    fn read_in_slice(&mut self, offset: u64) -> Result<[u8; 8]> {
        let absolute = self
            .slice_begin
            .checked_add(offset)
            .ok_or(Error::InvalidSection)?;
        self.read_absolute(absolute)
    }

    fn read_absolute(&mut self, offset: u64) -> Result<[u8; 8]> {
        let mut buf = [0u8; 8];
        read_exact_at(self.fd, offset, &mut buf)?;
        Ok(buf)
    }
}

struct MapImageInfoSource<'m> {
    map: &'m [u8],
    slice_begin: u64,
}

impl ImageInfoSource for MapImageInfoSource<'_> {
    fn read_in_slice(&mut self, offset: u64) -> Result<[u8; 8]> {
        let absolute = self
            .slice_begin
            .checked_add(offset)
            .ok_or(Error::InvalidSection)?;
        self.read_absolute(absolute)
    }

    fn read_absolute(&mut self, offset: u64) -> Result<[u8; 8]> {
        let begin = usize::try_from(offset).map_err(|_| Error::InvalidSection)?;
        let end = begin.checked_add(8).ok_or(Error::InvalidSection)?;

        let bytes = self.map.get(begin..end).ok_or(Error::InvalidSection)?;
        bytes.try_into().map_err(|_| Error::InvalidSection)
    }
}

/// Validated locations of one slice's symbol and string tables, as absolute
/// ranges of the enclosing resource.
struct SymtabLocation {
    sym_range: Range,
    str_range: Range,
}

fn locate_symtab(
    ctx: &SliceCtx,
    symtab: &SymtabCommand,
    bounds: Range,
    absolute: bool,
) -> Result<SymtabLocation> {
    let stride = if ctx.is_64 { SIZEOF_NLIST_64 } else { SIZEOF_NLIST_32 } as u64;
    let table_size = stride
        .checked_mul(u64::from(symtab.nsyms))
        .ok_or(Error::InvalidSymbolTable)?;

    let base = if absolute { 0 } else { ctx.full_range.begin };

    let sym_begin = base
        .checked_add(u64::from(symtab.symoff))
        .ok_or(Error::InvalidSymbolTable)?;
    let sym_end = sym_begin
        .checked_add(table_size)
        .ok_or(Error::InvalidSymbolTable)?;

    let str_begin = base
        .checked_add(u64::from(symtab.stroff))
        .ok_or(Error::InvalidSymbolTable)?;
    let str_end = str_begin
        .checked_add(u64::from(symtab.strsize))
        .ok_or(Error::InvalidSymbolTable)?;

    let sym_range = Range::new(sym_begin, sym_end);
    let str_range = Range::new(str_begin, str_end);

    if !bounds.contains_range(sym_range) || !bounds.contains_range(str_range) {
        return Err(Error::InvalidSymbolTable);
    }

    Ok(SymtabLocation { sym_range, str_range })
}

fn parse_symbols_from_file<R: Read + Seek>(
    info: &mut CreateInfo<'_>,
    fd: &mut R,
    ctx: &SliceCtx,
    symtab: &SymtabCommand,
    flags: ParseFlags,
    options: ParserOptions,
) -> Result<()> {
    if symtab.nsyms == 0 {
        return Ok(());
    }

    let location = locate_symtab(ctx, symtab, ctx.full_range, false)?;

    let mut nlist_bytes = vec![0u8; location.sym_range.size() as usize];
    read_exact_at(fd, location.sym_range.begin, &mut nlist_bytes)?;

    let mut str_bytes = vec![0u8; location.str_range.size() as usize];
    read_exact_at(fd, location.str_range.begin, &mut str_bytes)?;

    parse_symbols(
        info,
        ctx.arch_index,
        ctx.is_64,
        ctx.le,
        symtab.nsyms,
        &nlist_bytes,
        Strtab::new(&str_bytes),
        &OwnedStore,
        flags,
        options.ignore_invalid_fields,
    )
}

fn parse_symbols_from_map<'a>(
    info: &mut CreateInfo<'a>,
    map: &'a [u8],
    ctx: &SliceCtx,
    symtab: &SymtabCommand,
    sym_bounds: Range,
    flags: ParseFlags,
    options: ParserOptions,
) -> Result<()> {
    if symtab.nsyms == 0 {
        return Ok(());
    }

    let location = match locate_symtab(ctx, symtab, sym_bounds, options.sect_off_absolute) {
        Ok(location) => location,
        Err(err) => {
            // Shared-cache images routinely carry stripped or relocated
            // symbol tables; with the option set that is not fatal.
            if flags.ignore_missing_exports {
                warn!("skipping unreadable symbol-table: {err}");
                return Ok(());
            }
            return Err(err);
        }
    };

    let nlists = &map[location.sym_range.begin as usize..location.sym_range.end as usize];
    let strings = &map[location.str_range.begin as usize..location.str_range.end as usize];

    parse_symbols(
        info,
        ctx.arch_index,
        ctx.is_64,
        ctx.le,
        symtab.nsyms,
        nlists,
        Strtab::new(strings),
        &MapStore { copy: options.copy_strings },
        flags,
        options.ignore_invalid_fields,
    )
}

/// Thin handler, descriptor mode. The stream is positioned just past the
/// 28-byte header prefix.
fn parse_thin_from_file<R: Read + Seek>(
    info: &mut CreateInfo<'_>,
    fd: &mut R,
    header: &Header,
    start: u64,
    size: u64,
    flags: ParseFlags,
    options: ParserOptions,
) -> Result<()> {
    if header.is_64() {
        if size < SIZEOF_HEADER_64 as u64 {
            return Err(Error::SizeTooSmall);
        }

        // The 64-bit header only adds a trailing reserved word.
        fd.seek(SeekFrom::Current(4)).map_err(Error::Seek)?;
    } else if !is_thin_magic(header.magic) {
        return Err(Error::NotAMacho);
    }

    check_header_flags(info, header.flags)?;
    let arch_index = claim_arch_bit(info, header)?;

    let header_ctx = header.ctx();
    let header_size = header.size() as u64;
    let ctx = SliceCtx {
        arch_index,
        is_64: header_ctx.is_big(),
        le: header_ctx.le,
        full_range: Range::new(start, start + size),
        available_range: Range::new(start + header_size, start + size),
        ncmds: header.ncmds,
        sizeofcmds: header.sizeofcmds,
    };

    validate_command_area(&ctx)?;

    let mut cmds = vec![0u8; ctx.sizeofcmds as usize];
    fd.read_exact(&mut cmds).map_err(Error::Read)?;

    let symtab = {
        let mut sections = FileImageInfoSource { fd: &mut *fd, slice_begin: start };
        parse_load_commands(info, &ctx, &cmds, &OwnedStore, &mut sections, flags, options)?
    };

    if symtab.cmd == LC_SYMTAB && !options.dont_parse_symbol_table {
        parse_symbols_from_file(info, fd, &ctx, &symtab, flags, options)?;
    }

    Ok(())
}

/// Thin handler, map mode. The slice starts at `macho_offset` and runs to
/// the end of the map; `sym_bounds` is where its symbol tables may live.
pub(crate) fn parse_thin_from_map<'a>(
    info: &mut CreateInfo<'a>,
    map: &'a [u8],
    macho_offset: u64,
    sym_bounds: Range,
    flags: ParseFlags,
    options: ParserOptions,
) -> Result<()> {
    let macho = map
        .get(macho_offset as usize..)
        .ok_or(Error::SizeTooSmall)?;

    if macho.len() < SIZEOF_HEADER_32 {
        return Err(Error::SizeTooSmall);
    }

    let header = Header::parse(macho, 0)?;
    if header.is_64() && macho.len() < SIZEOF_HEADER_64 {
        return Err(Error::SizeTooSmall);
    }

    check_header_flags(info, header.flags)?;
    let arch_index = claim_arch_bit(info, &header)?;

    let header_ctx = header.ctx();
    let size = macho.len() as u64;
    let header_size = header.size() as u64;
    let ctx = SliceCtx {
        arch_index,
        is_64: header_ctx.is_big(),
        le: header_ctx.le,
        full_range: Range::new(macho_offset, macho_offset + size),
        available_range: Range::new(macho_offset + header_size, macho_offset + size),
        ncmds: header.ncmds,
        sizeofcmds: header.sizeofcmds,
    };

    validate_command_area(&ctx)?;

    let cmds = &macho[header.size()..header.size() + ctx.sizeofcmds as usize];

    let symtab = {
        let mut sections = MapImageInfoSource { map, slice_begin: macho_offset };
        parse_load_commands(
            info,
            &ctx,
            cmds,
            &MapStore { copy: options.copy_strings },
            &mut sections,
            flags,
            options,
        )?
    };

    if symtab.cmd == LC_SYMTAB && !options.dont_parse_symbol_table {
        parse_symbols_from_map(info, map, &ctx, &symtab, sym_bounds, flags, options)?;
    }

    Ok(())
}

/// Fat handler over `A`-typed architecture records. Validates every record
/// before any slice is parsed.
fn handle_fat<R: Read + Seek, A: RawFatArch>(
    info: &mut CreateInfo<'_>,
    fd: &mut R,
    le: Endian,
    nfat_arch: u32,
    start: u64,
    size: u64,
    flags: ParseFlags,
    options: ParserOptions,
) -> Result<()> {
    let archs_size = (A::SIZEOF as u64)
        .checked_mul(u64::from(nfat_arch))
        .ok_or(Error::TooManyArchitectures)?;

    let total_headers_size = (SIZEOF_FAT_HEADER as u64)
        .checked_add(archs_size)
        .ok_or(Error::TooManyArchitectures)?;

    // The arch records must fit strictly inside the envelope.
    if total_headers_size >= size {
        return Err(Error::TooManyArchitectures);
    }

    fd.seek(SeekFrom::Start(start + SIZEOF_FAT_HEADER as u64))
        .map_err(Error::Seek)?;

    let mut record_bytes = vec![0u8; archs_size as usize];
    fd.read_exact(&mut record_bytes).map_err(Error::Read)?;

    let mut archs: Vec<A> = Vec::with_capacity(nfat_arch as usize);
    for index in 0..nfat_arch as usize {
        let arch = A::parse(&record_bytes, index * A::SIZEOF, le)?;

        let offset = arch.offset();
        let arch_size = arch.size();

        // The slice must live past the fat header and arch records.
        if offset < total_headers_size {
            return Err(Error::InvalidArchitecture);
        }

        // And must at least hold a mach header.
        if arch_size < SIZEOF_HEADER_32 as u64 {
            return Err(Error::SizeTooSmall);
        }

        let end = offset.checked_add(arch_size).ok_or(Error::InvalidArchitecture)?;
        if offset >= size || end > size {
            return Err(Error::InvalidArchitecture);
        }

        // The slice must also be addressable within the enclosing resource.
        start.checked_add(offset).ok_or(Error::InvalidArchitecture)?;
        start.checked_add(end).ok_or(Error::InvalidArchitecture)?;

        let range = Range::new(offset, end);
        for previous in &archs {
            let previous_range = Range::new(previous.offset(), previous.offset() + previous.size());
            if range.overlaps(previous_range) {
                return Err(Error::OverlappingArchitectures);
            }
        }

        archs.push(arch);
    }

    let mut parsed_one_arch = false;
    for arch in &archs {
        let slice_start = start + arch.offset();
        fd.seek(SeekFrom::Start(slice_start)).map_err(Error::Seek)?;

        let mut header_bytes = [0u8; SIZEOF_HEADER_32];
        fd.read_exact(&mut header_bytes).map_err(Error::Read)?;

        let slice_magic: u32 = header_bytes[..].pread_with(0, Endian::Little)?;
        if !is_thin_magic(slice_magic) {
            if options.skip_invalid_architectures {
                warn!("skipping fat slice with unrecognized magic 0x{slice_magic:x}");
                continue;
            }
            return Err(Error::InvalidArchitecture);
        }

        let slice_le = if slice_magic == MH_CIGAM || slice_magic == MH_CIGAM_64 {
            Endian::Big
        } else {
            Endian::Little
        };
        let header = thin_header(slice_magic, &header_bytes[4..], slice_le)?;

        // The slice's own header must agree with the fat record.
        if header.cputype != arch.cputype() || header.cpusubtype != arch.cpusubtype() {
            if options.skip_invalid_architectures {
                warn!("skipping fat slice whose cputype disagrees with its record");
                continue;
            }
            return Err(Error::InvalidArchitecture);
        }

        let snapshot = if options.skip_invalid_architectures {
            Some(info.clone())
        } else {
            None
        };

        match parse_thin_from_file(info, fd, &header, slice_start, arch.size(), flags, options) {
            Ok(()) => parsed_one_arch = true,
            Err(err) => match snapshot {
                Some(snapshot) => {
                    warn!("skipping architecture slice: {err}");
                    *info = snapshot;
                }
                None => return Err(err),
            },
        }
    }

    if !parsed_one_arch {
        return Err(Error::NoValidArchitectures);
    }

    Ok(())
}

pub(crate) fn finish(info: &mut CreateInfo<'_>, flags: ParseFlags) -> Result<()> {
    if !flags.ignore_missing_exports && info.exports.is_empty() {
        return Err(Error::NoExports);
    }

    info.sort_exports();
    Ok(())
}

/// Parses a whole Mach-O input from a descriptor. The 32-bit magic has
/// already been read; the stream is positioned at byte 4.
///
/// Strings recorded this way are always owned, so any aggregate lifetime
/// fits.
pub fn parse_from_file<R: Read + Seek>(
    info: &mut CreateInfo<'_>,
    fd: &mut R,
    magic: u32,
    flags: ParseFlags,
    options: ParserOptions,
) -> Result<()> {
    match mach::recognize(magic) {
        Envelope::Fat => {
            let mut nfat_bytes = [0u8; 4];
            read_envelope_exact(fd, &mut nfat_bytes)?;

            let swapped = magic == FAT_CIGAM || magic == FAT_CIGAM_64;
            let le = if swapped { Endian::Big } else { Endian::Little };

            let nfat_arch: u32 = nfat_bytes[..].pread_with(0, le)?;
            if nfat_arch == 0 {
                return Err(Error::NoArchitectures);
            }

            let size = stream_size(fd)?;
            if magic == FAT_MAGIC_64 || magic == FAT_CIGAM_64 {
                handle_fat::<R, FatArch64>(info, fd, le, nfat_arch, 0, size, flags, options)?;
            } else {
                handle_fat::<R, FatArch>(info, fd, le, nfat_arch, 0, size, flags, options)?;
            }
        }

        Envelope::Thin => {
            let mut rest = [0u8; SIZEOF_HEADER_32 - 4];
            read_envelope_exact(fd, &mut rest)?;

            let le = if magic == MH_CIGAM || magic == MH_CIGAM_64 {
                Endian::Big
            } else {
                Endian::Little
            };
            let header = thin_header(magic, &rest, le)?;

            let size = stream_size(fd)?;
            parse_thin_from_file(info, fd, &header, 0, size, flags, options)?;
        }

        Envelope::NotAMacho => return Err(Error::NotAMacho),
    }

    finish(info, flags)
}

/// Parses a whole Mach-O input from a memory-mapped view. Thin inputs may
/// borrow their strings from the map; fat inputs are routed through the
/// descriptor path over a cursor and own their strings.
pub fn parse_from_map<'a>(
    info: &mut CreateInfo<'a>,
    map: &'a [u8],
    flags: ParseFlags,
    options: ParserOptions,
) -> Result<()> {
    if map.len() < 4 {
        return Err(Error::NotAMacho);
    }

    let magic = mach::peek(map, 0)?;
    match mach::recognize(magic) {
        Envelope::Thin => {
            let bounds = Range::new(0, map.len() as u64);
            parse_thin_from_map(info, map, 0, bounds, flags, options)?;
            finish(info, flags)
        }

        Envelope::Fat => {
            let mut cursor = Cursor::new(map);
            cursor.set_position(4);
            parse_from_file(info, &mut cursor, magic, flags, options)
        }

        Envelope::NotAMacho => Err(Error::NotAMacho),
    }
}

/// The architecture names of an envelope, without parsing slice contents.
/// Unknown `(cputype, cpusubtype)` pairs come back as `None`.
pub fn list_archs<R: Read + Seek>(fd: &mut R, magic: u32) -> Result<Vec<Option<&'static str>>> {
    use crate::mach::cputype::arch_info_for_cputype;

    fn record_names<R: Read + Seek, A: RawFatArch>(
        fd: &mut R,
        le: Endian,
        nfat_arch: u32,
    ) -> Result<Vec<Option<&'static str>>> {
        let archs_size = (A::SIZEOF as u64)
            .checked_mul(u64::from(nfat_arch))
            .ok_or(Error::TooManyArchitectures)?;

        let mut bytes = vec![0u8; archs_size as usize];
        fd.read_exact(&mut bytes).map_err(Error::Read)?;

        let mut names = Vec::with_capacity(nfat_arch as usize);
        for index in 0..nfat_arch as usize {
            let arch = A::parse(&bytes, index * A::SIZEOF, le)?;
            names.push(
                arch_info_for_cputype(arch.cputype(), arch.cpusubtype()).map(|info| info.name),
            );
        }
        Ok(names)
    }

    match mach::recognize(magic) {
        Envelope::Fat => {
            let mut nfat_bytes = [0u8; 4];
            read_envelope_exact(fd, &mut nfat_bytes)?;

            let swapped = magic == FAT_CIGAM || magic == FAT_CIGAM_64;
            let le = if swapped { Endian::Big } else { Endian::Little };

            let nfat_arch: u32 = nfat_bytes[..].pread_with(0, le)?;
            if nfat_arch == 0 {
                return Err(Error::NoArchitectures);
            }

            if magic == FAT_MAGIC_64 || magic == FAT_CIGAM_64 {
                record_names::<R, FatArch64>(fd, le, nfat_arch)
            } else {
                record_names::<R, FatArch>(fd, le, nfat_arch)
            }
        }

        Envelope::Thin => {
            let mut rest = [0u8; 8];
            read_envelope_exact(fd, &mut rest)?;

            let le = if magic == MH_CIGAM || magic == MH_CIGAM_64 {
                Endian::Big
            } else {
                Endian::Little
            };

            let cputype = rest[..].pread_with(0, le)?;
            let cpusubtype = rest[..].pread_with(4, le)?;
            Ok(vec![
                arch_info_for_cputype(cputype, cpusubtype).map(|info| info.name)
            ])
        }

        Envelope::NotAMacho => Err(Error::NotAMacho),
    }
}
