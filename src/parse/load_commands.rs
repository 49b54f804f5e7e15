//! Walks a slice's load-command stream, extracting identity, platform,
//! uuid, re-exports, clients, umbrella, the symtab location and the
//! Objective-C image info.

use std::str;

use log::debug;
use scroll::{Endian, Pread};

use crate::error::{Error, Result};
use crate::mach::load_commands::{
    BuildVersionCommand, DylibCommand, LoadCommand, Section32, Section64, SegmentCommand32,
    SegmentCommand64, SubClientCommand, SubFrameworkCommand, SymtabCommand, UuidCommand,
    LC_BUILD_VERSION, LC_ID_DYLIB, LC_REEXPORT_DYLIB, LC_SEGMENT, LC_SEGMENT_64, LC_SUB_CLIENT,
    LC_SUB_FRAMEWORK, LC_SYMTAB, LC_UUID, LC_VERSION_MIN_IPHONEOS, LC_VERSION_MIN_MACOSX,
    LC_VERSION_MIN_TVOS, LC_VERSION_MIN_WATCHOS, OBJC_IMAGE_IS_FOR_SIMULATOR,
    OBJC_IMAGE_REQUIRES_GC, OBJC_IMAGE_SUPPORTS_GC, OBJC_IMAGE_SWIFT_VERSION_MASK,
    OBJC_IMAGE_SWIFT_VERSION_SHIFT, SIZEOF_BUILD_VERSION_COMMAND, SIZEOF_DYLIB_COMMAND,
    SIZEOF_LOAD_COMMAND, SIZEOF_OBJC_IMAGE_INFO, SIZEOF_SECTION_32, SIZEOF_SECTION_64,
    SIZEOF_SEGMENT_COMMAND_32, SIZEOF_SEGMENT_COMMAND_64, SIZEOF_SUB_CLIENT_COMMAND,
    SIZEOF_SUB_FRAMEWORK_COMMAND, SIZEOF_SYMTAB_COMMAND, SIZEOF_UUID_COMMAND,
    SIZEOF_VERSION_MIN_COMMAND,
};
use crate::parse::{ParseFlags, ParserOptions, StoreStr};
use crate::range::Range;
use crate::tbd::{yaml, CreateInfo, ExportType, ObjcConstraint, PackedVersion, Platform, UuidInfo};

/// Per-slice state every handler needs.
pub(crate) struct SliceCtx {
    pub arch_index: usize,
    pub is_64: bool,
    pub le: Endian,
    /// The slice inside the enclosing file.
    pub full_range: Range,
    /// The slice minus its headers.
    pub available_range: Range,
    pub ncmds: u32,
    pub sizeofcmds: u32,
}

impl SliceCtx {
    fn header_size(&self) -> u64 {
        self.available_range.begin - self.full_range.begin
    }
}

/// Where the 8-byte `objc_image_info` records come from: positional reads on
/// a descriptor, or slices of a map.
pub(crate) trait ImageInfoSource {
    /// Offset relative to the slice.
    fn read_in_slice(&mut self, offset: u64) -> Result<[u8; 8]>;
    /// Offset absolute within the enclosing file.
    fn read_absolute(&mut self, offset: u64) -> Result<[u8; 8]>;
}

/// Preconditions on the command area; run before the area is read.
pub(crate) fn validate_command_area(ctx: &SliceCtx) -> Result<()> {
    if ctx.sizeofcmds < SIZEOF_LOAD_COMMAND as u32 {
        return Err(Error::LoadCommandsAreaTooSmall);
    }

    let minimum_size = (SIZEOF_LOAD_COMMAND as u32)
        .checked_mul(ctx.ncmds)
        .ok_or(Error::TooManyLoadCommands)?;

    if ctx.sizeofcmds < minimum_size {
        return Err(Error::TooManyLoadCommands);
    }

    if u64::from(ctx.sizeofcmds) > ctx.available_range.size() {
        return Err(Error::TooManyLoadCommands);
    }

    Ok(())
}

fn name_matches(name: &[u8; 16], wanted: &[u8]) -> bool {
    name[..wanted.len()] == *wanted && name[wanted.len()..].iter().all(|&byte| byte == 0)
}

fn segment_has_image_info_sect(name: &[u8; 16]) -> bool {
    name_matches(name, b"__DATA")
        || name_matches(name, b"__DATA_DIRTY")
        || name_matches(name, b"__DATA_CONST")
        || name_matches(name, b"__OBJC")
}

fn is_image_info_section(name: &[u8; 16]) -> bool {
    name_matches(name, b"__image_info") || name_matches(name, b"__objc_imageinfo")
}

/// The trailing string of a load-command: it must start past the fixed part,
/// inside the command, and be non-empty after NUL termination.
fn trailing_str(cmd_bytes: &[u8], offset: u32, fixed_size: usize) -> Option<&str> {
    let offset = offset as usize;
    if offset < fixed_size || offset >= cmd_bytes.len() {
        return None;
    }

    let rest = &cmd_bytes[offset..];
    let end = rest.iter().position(|&byte| byte == 0).unwrap_or(rest.len());
    let string = str::from_utf8(&rest[..end]).ok()?;

    if string.is_empty() {
        None
    } else {
        Some(string)
    }
}

fn set_platform(info: &mut CreateInfo, platform: Platform, options: ParserOptions) -> Result<()> {
    match info.platform {
        Some(existing) => {
            if existing != platform && !options.ignore_conflicting_fields {
                return Err(Error::ConflictingPlatform);
            }
        }
        None => info.platform = Some(platform),
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn parse_image_info_section(
    info: &mut CreateInfo,
    existing_swift_version: &mut u32,
    ctx: &SliceCtx,
    sections: &mut dyn ImageInfoSource,
    sect_offset: u32,
    sect_size: u64,
    options: ParserOptions,
) -> Result<()> {
    if sect_size != SIZEOF_OBJC_IMAGE_INFO as u64 {
        return Err(Error::InvalidSection);
    }

    let bytes = if options.sect_off_absolute {
        sections.read_absolute(u64::from(sect_offset))?
    } else {
        let relative = Range::new(ctx.header_size(), ctx.full_range.size());
        let sect_range = Range::new(u64::from(sect_offset), u64::from(sect_offset) + sect_size);

        if !relative.contains_range(sect_range) {
            return Err(Error::InvalidSection);
        }

        sections.read_in_slice(u64::from(sect_offset))?
    };

    let flags: u32 = (&bytes[..]).pread_with(4, ctx.le)?;

    let constraint = if flags & OBJC_IMAGE_REQUIRES_GC != 0 {
        ObjcConstraint::Gc
    } else if flags & OBJC_IMAGE_SUPPORTS_GC != 0 {
        ObjcConstraint::RetainReleaseOrGc
    } else if flags & OBJC_IMAGE_IS_FOR_SIMULATOR != 0 {
        ObjcConstraint::RetainReleaseForSimulator
    } else {
        ObjcConstraint::RetainRelease
    };

    match info.objc_constraint {
        Some(existing) => {
            if existing != constraint && !options.ignore_conflicting_fields {
                return Err(Error::ConflictingObjcConstraint);
            }
        }
        None => info.objc_constraint = Some(constraint),
    }

    let image_swift_version = (flags & OBJC_IMAGE_SWIFT_VERSION_MASK) >> OBJC_IMAGE_SWIFT_VERSION_SHIFT;
    if *existing_swift_version != 0 {
        if *existing_swift_version != image_swift_version && !options.ignore_conflicting_fields {
            return Err(Error::ConflictingSwiftVersion);
        }
    } else {
        *existing_swift_version = image_swift_version;
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn parse_segment(
    info: &mut CreateInfo,
    ctx: &SliceCtx,
    cmd_bytes: &[u8],
    sections: &mut dyn ImageInfoSource,
    flags: ParseFlags,
    options: ParserOptions,
) -> Result<()> {
    if flags.ignore_objc_constraint && flags.ignore_swift_version {
        return Ok(());
    }

    let (fixed_size, sect_stride) = if ctx.is_64 {
        (SIZEOF_SEGMENT_COMMAND_64, SIZEOF_SECTION_64)
    } else {
        (SIZEOF_SEGMENT_COMMAND_32, SIZEOF_SECTION_32)
    };

    if cmd_bytes.len() < fixed_size {
        return Err(Error::InvalidLoadCommand);
    }

    let (segname, nsects) = if ctx.is_64 {
        let segment: SegmentCommand64 = cmd_bytes.pread_with(0, ctx.le)?;
        (segment.segname, segment.nsects)
    } else {
        let segment: SegmentCommand32 = cmd_bytes.pread_with(0, ctx.le)?;
        (segment.segname, segment.nsects)
    };

    if !segment_has_image_info_sect(&segname) || nsects == 0 {
        return Ok(());
    }

    let sections_size = (sect_stride as u64)
        .checked_mul(u64::from(nsects))
        .ok_or(Error::TooManySections)?;

    if sections_size > (cmd_bytes.len() - fixed_size) as u64 {
        return Err(Error::TooManySections);
    }

    let mut swift_version = 0u32;
    for index in 0..nsects as usize {
        let sect_offset = fixed_size + index * sect_stride;

        let (sectname, offset, size) = if ctx.is_64 {
            let section: Section64 = cmd_bytes.pread_with(sect_offset, ctx.le)?;
            (section.sectname, section.offset, section.size)
        } else {
            let section: Section32 = cmd_bytes.pread_with(sect_offset, ctx.le)?;
            (section.sectname, section.offset, u64::from(section.size))
        };

        if !is_image_info_section(&sectname) {
            continue;
        }

        parse_image_info_section(info, &mut swift_version, ctx, sections, offset, size, options)?;
    }

    if info.swift_version != 0 {
        if info.swift_version != swift_version && !options.ignore_conflicting_fields {
            return Err(Error::ConflictingSwiftVersion);
        }
    } else {
        info.swift_version = swift_version;
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn parse_id_dylib<'a, 'c, S: StoreStr<'c, 'a>>(
    info: &mut CreateInfo<'a>,
    cmd_bytes: &'c [u8],
    le: Endian,
    store: &S,
    flags: ParseFlags,
    options: ParserOptions,
    found_identification: &mut bool,
) -> Result<()> {
    if flags.ignore_current_version
        && flags.ignore_compatibility_version
        && flags.ignore_install_name
    {
        *found_identification = true;
        return Ok(());
    }

    if cmd_bytes.len() < SIZEOF_DYLIB_COMMAND {
        return Err(Error::InvalidLoadCommand);
    }

    let command: DylibCommand = cmd_bytes.pread_with(0, le)?;

    let name = match trailing_str(cmd_bytes, command.dylib.name_offset, SIZEOF_DYLIB_COMMAND) {
        Some(name) => name,
        None => {
            if options.ignore_invalid_fields {
                debug!("skipping LC_ID_DYLIB with an invalid install-name");
                *found_identification = true;
                return Ok(());
            }
            return Err(Error::InvalidInstallName);
        }
    };

    let current_version = PackedVersion(command.dylib.current_version);
    let compatibility_version = PackedVersion(command.dylib.compatibility_version);

    if info.install_name.is_some() {
        if options.ignore_conflicting_fields {
            *found_identification = true;
            return Ok(());
        }

        if !flags.ignore_current_version && info.current_version != current_version {
            return Err(Error::ConflictingIdentification);
        }

        if !flags.ignore_compatibility_version
            && info.compatibility_version != compatibility_version
        {
            return Err(Error::ConflictingIdentification);
        }

        if info.install_name.as_deref() != Some(name) {
            return Err(Error::ConflictingIdentification);
        }
    } else {
        if !flags.ignore_current_version {
            info.current_version = current_version;
        }

        if !flags.ignore_compatibility_version {
            info.compatibility_version = compatibility_version;
        }

        if !flags.ignore_install_name {
            info.install_name_needs_quotes = yaml::needs_quotes(name);
            info.install_name = Some(store.store(name));
        }
    }

    *found_identification = true;
    Ok(())
}

fn parse_sub_framework<'a, 'c, S: StoreStr<'c, 'a>>(
    info: &mut CreateInfo<'a>,
    cmd_bytes: &'c [u8],
    le: Endian,
    store: &S,
    options: ParserOptions,
) -> Result<()> {
    if cmd_bytes.len() < SIZEOF_SUB_FRAMEWORK_COMMAND {
        return Err(Error::InvalidLoadCommand);
    }

    let command: SubFrameworkCommand = cmd_bytes.pread_with(0, le)?;

    let umbrella =
        match trailing_str(cmd_bytes, command.umbrella_offset, SIZEOF_SUB_FRAMEWORK_COMMAND) {
            Some(umbrella) => umbrella,
            None => {
                if options.ignore_invalid_fields {
                    debug!("skipping LC_SUB_FRAMEWORK with an invalid umbrella");
                    return Ok(());
                }
                return Err(Error::InvalidParentUmbrella);
            }
        };

    match &info.parent_umbrella {
        Some(existing) => {
            if options.ignore_conflicting_fields {
                return Ok(());
            }

            if existing.as_ref() != umbrella {
                return Err(Error::ConflictingParentUmbrella);
            }
        }
        None => {
            info.parent_umbrella_needs_quotes = yaml::needs_quotes(umbrella);
            info.parent_umbrella = Some(store.store(umbrella));
        }
    }

    Ok(())
}

/// Walks the command stream of one slice and fills in `info`. Returns the
/// symtab command, zeroed when the slice has none.
///
/// `cmds` is exactly the command area ([`validate_command_area`] has already
/// approved its dimensions).
pub(crate) fn parse_load_commands<'a, 'c, S: StoreStr<'c, 'a>>(
    info: &mut CreateInfo<'a>,
    ctx: &SliceCtx,
    cmds: &'c [u8],
    store: &S,
    sections: &mut dyn ImageInfoSource,
    flags: ParseFlags,
    options: ParserOptions,
) -> Result<SymtabCommand> {
    debug_assert_eq!(cmds.len(), ctx.sizeofcmds as usize);

    let le = ctx.le;

    let mut found_identification = false;
    let mut found_uuid = false;
    let mut uuid = [0u8; 16];
    let mut symtab = SymtabCommand::default();

    let mut offset = 0usize;
    let mut size_left = ctx.sizeofcmds;

    for _ in 0..ctx.ncmds {
        // The last command may consume size_left exactly, so the space check
        // lives at the top of the loop.
        if size_left < SIZEOF_LOAD_COMMAND as u32 {
            return Err(Error::InvalidLoadCommand);
        }

        let load_cmd: LoadCommand = cmds.pread_with(offset, le)?;
        if load_cmd.cmdsize < SIZEOF_LOAD_COMMAND as u32 || load_cmd.cmdsize > size_left {
            return Err(Error::InvalidLoadCommand);
        }
        size_left -= load_cmd.cmdsize;

        let cmd_bytes = &cmds[offset..offset + load_cmd.cmdsize as usize];

        match load_cmd.cmd {
            LC_SEGMENT => {
                if !ctx.is_64 {
                    parse_segment(info, ctx, cmd_bytes, sections, flags, options)?;
                }
            }

            LC_SEGMENT_64 => {
                if ctx.is_64 {
                    parse_segment(info, ctx, cmd_bytes, sections, flags, options)?;
                }
            }

            LC_ID_DYLIB => {
                parse_id_dylib(
                    info,
                    cmd_bytes,
                    le,
                    store,
                    flags,
                    options,
                    &mut found_identification,
                )?;
            }

            LC_REEXPORT_DYLIB => {
                if !flags.ignore_reexports {
                    if cmd_bytes.len() < SIZEOF_DYLIB_COMMAND {
                        return Err(Error::InvalidLoadCommand);
                    }

                    let command: DylibCommand = cmd_bytes.pread_with(0, le)?;
                    match trailing_str(cmd_bytes, command.dylib.name_offset, SIZEOF_DYLIB_COMMAND)
                    {
                        Some(reexport) => {
                            info.add_export(
                                ctx.arch_index,
                                ExportType::Reexport,
                                store.store(reexport),
                            );
                        }
                        None => {
                            if !options.ignore_invalid_fields {
                                return Err(Error::InvalidReexport);
                            }
                            debug!("skipping LC_REEXPORT_DYLIB with an invalid name");
                        }
                    }
                }
            }

            LC_SUB_CLIENT => {
                if !flags.ignore_clients {
                    if cmd_bytes.len() < SIZEOF_SUB_CLIENT_COMMAND {
                        return Err(Error::InvalidLoadCommand);
                    }

                    let command: SubClientCommand = cmd_bytes.pread_with(0, le)?;
                    match trailing_str(cmd_bytes, command.client_offset, SIZEOF_SUB_CLIENT_COMMAND)
                    {
                        Some(client) => {
                            info.add_export(
                                ctx.arch_index,
                                ExportType::Client,
                                store.store(client),
                            );
                        }
                        None => {
                            if !options.ignore_invalid_fields {
                                return Err(Error::InvalidClient);
                            }
                            debug!("skipping LC_SUB_CLIENT with an invalid client-string");
                        }
                    }
                }
            }

            LC_SUB_FRAMEWORK => {
                if !flags.ignore_parent_umbrella {
                    parse_sub_framework(info, cmd_bytes, le, store, options)?;
                }
            }

            LC_UUID => {
                if !flags.ignore_uuid {
                    if cmd_bytes.len() != SIZEOF_UUID_COMMAND {
                        return Err(Error::InvalidUuid);
                    }

                    let command: UuidCommand = cmd_bytes.pread_with(0, le)?;
                    if found_uuid {
                        if uuid != command.uuid && !options.ignore_conflicting_fields {
                            return Err(Error::ConflictingUuid);
                        }
                    } else {
                        uuid = command.uuid;
                        found_uuid = true;
                    }
                }
            }

            LC_SYMTAB => {
                if !flags.ignore_symbols || flags.parse_undefineds {
                    if cmd_bytes.len() != SIZEOF_SYMTAB_COMMAND {
                        return Err(Error::InvalidSymbolTable);
                    }

                    if symtab.cmd == LC_SYMTAB {
                        debug!("ignoring a second LC_SYMTAB");
                    } else {
                        symtab = cmd_bytes.pread_with(0, le)?;
                    }
                }
            }

            LC_BUILD_VERSION => {
                if !flags.ignore_platform {
                    if cmd_bytes.len() < SIZEOF_BUILD_VERSION_COMMAND {
                        return Err(Error::InvalidLoadCommand);
                    }

                    let command: BuildVersionCommand = cmd_bytes.pread_with(0, le)?;
                    match Platform::from_raw(command.platform) {
                        Some(platform) => set_platform(info, platform, options)?,
                        None => {
                            if !options.ignore_invalid_fields {
                                return Err(Error::InvalidPlatform);
                            }
                            debug!("skipping LC_BUILD_VERSION with platform {}", command.platform);
                        }
                    }
                }
            }

            LC_VERSION_MIN_MACOSX | LC_VERSION_MIN_IPHONEOS | LC_VERSION_MIN_TVOS
            | LC_VERSION_MIN_WATCHOS => {
                if !flags.ignore_platform {
                    if cmd_bytes.len() != SIZEOF_VERSION_MIN_COMMAND {
                        return Err(Error::InvalidLoadCommand);
                    }

                    let platform = match load_cmd.cmd {
                        LC_VERSION_MIN_MACOSX => Platform::MacOs,
                        LC_VERSION_MIN_IPHONEOS => Platform::Ios,
                        LC_VERSION_MIN_TVOS => Platform::Tvos,
                        _ => Platform::Watchos,
                    };
                    set_platform(info, platform, options)?;
                }
            }

            // Everything else, known or unknown, is skipped.
            _ => {}
        }

        offset += load_cmd.cmdsize as usize;
    }

    if !found_identification {
        return Err(Error::NoIdentification);
    }

    if !flags.ignore_platform && info.platform.is_none() {
        return Err(Error::NoPlatform);
    }

    if !flags.ignore_uuid && !found_uuid {
        return Err(Error::NoUuid);
    }

    if found_uuid {
        if info.find_uuid(&uuid).is_some() {
            return Err(Error::ConflictingUuid);
        }
        info.uuids.push(UuidInfo { arch_index: ctx.arch_index, uuid });
    }

    if symtab.cmd != LC_SYMTAB {
        let symbols_wanted = !flags.ignore_symbols || flags.parse_undefineds;
        if symbols_wanted && !flags.ignore_missing_exports {
            return Err(Error::NoSymbolTable);
        }
    }

    Ok(symtab)
}

#[cfg(test)]
mod tests {
    use super::{is_image_info_section, name_matches, segment_has_image_info_sect, trailing_str};

    fn name16(name: &[u8]) -> [u8; 16] {
        let mut padded = [0u8; 16];
        padded[..name.len()].copy_from_slice(name);
        padded
    }

    #[test]
    fn segment_names_match_exactly() {
        assert!(segment_has_image_info_sect(&name16(b"__DATA")));
        assert!(segment_has_image_info_sect(&name16(b"__DATA_DIRTY")));
        assert!(segment_has_image_info_sect(&name16(b"__DATA_CONST")));
        assert!(segment_has_image_info_sect(&name16(b"__OBJC")));
        assert!(!segment_has_image_info_sect(&name16(b"__DATA_X")));
        assert!(!segment_has_image_info_sect(&name16(b"__TEXT")));
    }

    #[test]
    fn section_names_match_exactly() {
        assert!(is_image_info_section(&name16(b"__image_info")));
        assert!(is_image_info_section(&name16(b"__objc_imageinfo")));
        assert!(!is_image_info_section(&name16(b"__objc_const")));
    }

    #[test]
    fn full_width_names_need_no_nul() {
        // 16 bytes exactly, no padding left over.
        assert!(name_matches(&name16(b"__objc_imageinfo"), b"__objc_imageinfo"));
    }

    #[test]
    fn trailing_strings_are_bounded() {
        let mut cmd = vec![0u8; 24];
        cmd.extend_from_slice(b"/usr/lib/libfoo.dylib\0pad");

        assert_eq!(trailing_str(&cmd, 24, 24), Some("/usr/lib/libfoo.dylib"));
        // Offsets inside the fixed structure are invalid.
        assert_eq!(trailing_str(&cmd, 4, 24), None);
        // Offsets at or past the end are invalid.
        assert_eq!(trailing_str(&cmd, cmd.len() as u32, 24), None);
        // Empty strings are invalid.
        let empty = [0u8; 32];
        assert_eq!(trailing_str(&empty, 24, 24), None);
    }

    #[test]
    fn unterminated_trailing_string_reads_to_command_end() {
        let mut cmd = vec![0u8; 12];
        cmd.extend_from_slice(b"Umbrella");
        assert_eq!(trailing_str(&cmd, 12, 12), Some("Umbrella"));
    }
}
