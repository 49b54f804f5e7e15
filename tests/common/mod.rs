//! Builders for synthetic Mach-O images, used by the integration tests.

use tbdgen::mach::fat::{FAT_MAGIC, FAT_MAGIC_64, SIZEOF_FAT_ARCH};
use tbdgen::mach::header::{MH_MAGIC, MH_MAGIC_64, MH_TWOLEVEL, SIZEOF_HEADER_32, SIZEOF_HEADER_64};
use tbdgen::mach::load_commands::{
    LC_BUILD_VERSION, LC_ID_DYLIB, LC_REEXPORT_DYLIB, LC_SEGMENT, LC_SEGMENT_64, LC_SUB_CLIENT,
    LC_SUB_FRAMEWORK, LC_SYMTAB, LC_UUID, LC_VERSION_MIN_MACOSX, SIZEOF_DYLIB_COMMAND,
    SIZEOF_SECTION_32, SIZEOF_SECTION_64, SIZEOF_SEGMENT_COMMAND_32, SIZEOF_SEGMENT_COMMAND_64,
    SIZEOF_SUB_CLIENT_COMMAND, SIZEOF_SUB_FRAMEWORK_COMMAND, SIZEOF_SYMTAB_COMMAND,
    SIZEOF_UUID_COMMAND, SIZEOF_VERSION_MIN_COMMAND,
};
use tbdgen::mach::symbols::{N_EXT, N_SECT};

pub const CPU_TYPE_I386: i32 = 7;
pub const CPU_SUBTYPE_I386: i32 = 3;
pub const CPU_TYPE_X86_64: i32 = 7 | 0x0100_0000;
pub const CPU_SUBTYPE_X86_64: i32 = 3;

/// One symbol for the builder's symtab: name, n_type, n_desc.
#[derive(Clone)]
pub struct Sym {
    pub name: String,
    pub n_type: u8,
    pub n_desc: u16,
}

impl Sym {
    pub fn exported(name: &str) -> Sym {
        Sym { name: name.to_owned(), n_type: N_SECT | N_EXT, n_desc: 0 }
    }
}

/// Builds one thin Mach-O slice byte-by-byte, either width, either byte
/// order.
pub struct ThinBuilder {
    is_64: bool,
    be: bool,
    cputype: i32,
    cpusubtype: i32,
    header_flags: u32,
    cmds: Vec<Vec<u8>>,
    syms: Option<Vec<Sym>>,
    /// Image-info flags for a `__DATA,__objc_imageinfo` section.
    objc_flags: Option<u32>,
    /// Added to symoff/stroff and section offsets, for images whose offsets
    /// are absolute within an enclosing file.
    symtab_base: u64,
}

impl ThinBuilder {
    pub fn new_64(cputype: i32, cpusubtype: i32) -> ThinBuilder {
        ThinBuilder {
            is_64: true,
            be: false,
            cputype,
            cpusubtype,
            header_flags: MH_TWOLEVEL,
            cmds: Vec::new(),
            syms: None,
            objc_flags: None,
            symtab_base: 0,
        }
    }

    pub fn new_32(cputype: i32, cpusubtype: i32) -> ThinBuilder {
        ThinBuilder { is_64: false, ..ThinBuilder::new_64(cputype, cpusubtype) }
    }

    pub fn big_endian(mut self) -> ThinBuilder {
        self.be = true;
        self
    }

    pub fn header_flags(mut self, flags: u32) -> ThinBuilder {
        self.header_flags = flags;
        self
    }

    pub fn symtab_base(mut self, base: u64) -> ThinBuilder {
        self.symtab_base = base;
        self
    }

    fn u16(&self, out: &mut Vec<u8>, value: u16) {
        if self.be {
            out.extend_from_slice(&value.to_be_bytes());
        } else {
            out.extend_from_slice(&value.to_le_bytes());
        }
    }

    fn u32(&self, out: &mut Vec<u8>, value: u32) {
        if self.be {
            out.extend_from_slice(&value.to_be_bytes());
        } else {
            out.extend_from_slice(&value.to_le_bytes());
        }
    }

    fn u64(&self, out: &mut Vec<u8>, value: u64) {
        if self.be {
            out.extend_from_slice(&value.to_be_bytes());
        } else {
            out.extend_from_slice(&value.to_le_bytes());
        }
    }

    /// A dylib-style command with one trailing string at `name_offset`.
    fn string_command(&self, cmd: u32, fixed: usize, name_offset: u32, string: &str) -> Vec<u8> {
        let string_bytes = string.len() + 1;
        let cmdsize = ((fixed + string_bytes + 7) & !7) as u32;

        let mut out = Vec::new();
        self.u32(&mut out, cmd);
        self.u32(&mut out, cmdsize);
        self.u32(&mut out, name_offset);

        // Pad the rest of the fixed part (timestamp and versions for dylib
        // commands, nothing for sub-framework/client).
        while out.len() < fixed {
            out.push(0);
        }

        out.extend_from_slice(string.as_bytes());
        out.push(0);
        while out.len() < cmdsize as usize {
            out.push(0);
        }
        out
    }

    pub fn id_dylib(mut self, name: &str, current: u32, compat: u32) -> ThinBuilder {
        let string_bytes = name.len() + 1;
        let cmdsize = ((SIZEOF_DYLIB_COMMAND + string_bytes + 7) & !7) as u32;

        let mut out = Vec::new();
        self.u32(&mut out, LC_ID_DYLIB);
        self.u32(&mut out, cmdsize);
        self.u32(&mut out, SIZEOF_DYLIB_COMMAND as u32); // name offset
        self.u32(&mut out, 0); // timestamp
        self.u32(&mut out, current);
        self.u32(&mut out, compat);
        out.extend_from_slice(name.as_bytes());
        out.push(0);
        while out.len() < cmdsize as usize {
            out.push(0);
        }

        self.cmds.push(out);
        self
    }

    /// An LC_ID_DYLIB whose name offset is raw, for malformed inputs.
    pub fn id_dylib_with_name_offset(mut self, name_offset: u32, name: &str) -> ThinBuilder {
        let cmd = self.string_command(LC_ID_DYLIB, SIZEOF_DYLIB_COMMAND, name_offset, name);
        self.cmds.push(cmd);
        self
    }

    pub fn reexport_dylib(mut self, name: &str) -> ThinBuilder {
        let cmd = self.string_command(
            LC_REEXPORT_DYLIB,
            SIZEOF_DYLIB_COMMAND,
            SIZEOF_DYLIB_COMMAND as u32,
            name,
        );
        self.cmds.push(cmd);
        self
    }

    pub fn sub_client(mut self, client: &str) -> ThinBuilder {
        let cmd = self.string_command(
            LC_SUB_CLIENT,
            SIZEOF_SUB_CLIENT_COMMAND,
            SIZEOF_SUB_CLIENT_COMMAND as u32,
            client,
        );
        self.cmds.push(cmd);
        self
    }

    pub fn sub_framework(mut self, umbrella: &str) -> ThinBuilder {
        let cmd = self.string_command(
            LC_SUB_FRAMEWORK,
            SIZEOF_SUB_FRAMEWORK_COMMAND,
            SIZEOF_SUB_FRAMEWORK_COMMAND as u32,
            umbrella,
        );
        self.cmds.push(cmd);
        self
    }

    pub fn uuid(mut self, uuid: [u8; 16]) -> ThinBuilder {
        let mut out = Vec::new();
        self.u32(&mut out, LC_UUID);
        self.u32(&mut out, SIZEOF_UUID_COMMAND as u32);
        out.extend_from_slice(&uuid);

        self.cmds.push(out);
        self
    }

    pub fn version_min_macos(mut self) -> ThinBuilder {
        let mut out = Vec::new();
        self.u32(&mut out, LC_VERSION_MIN_MACOSX);
        self.u32(&mut out, SIZEOF_VERSION_MIN_COMMAND as u32);
        self.u32(&mut out, 0x000a_0900); // 10.9
        self.u32(&mut out, 0x000a_0900);

        self.cmds.push(out);
        self
    }

    pub fn build_version(mut self, platform: u32) -> ThinBuilder {
        let mut out = Vec::new();
        self.u32(&mut out, LC_BUILD_VERSION);
        self.u32(&mut out, 24);
        self.u32(&mut out, platform);
        self.u32(&mut out, 0x000a_0f00);
        self.u32(&mut out, 0x000a_0f00);
        self.u32(&mut out, 0); // ntools

        self.cmds.push(out);
        self
    }

    pub fn symtab(mut self, syms: &[Sym]) -> ThinBuilder {
        self.syms = Some(syms.to_vec());
        self
    }

    pub fn objc_image_info(mut self, flags: u32) -> ThinBuilder {
        self.objc_flags = Some(flags);
        self
    }

    fn objc_segment(&self, record_offset: u32) -> Vec<u8> {
        let (cmd, fixed, sect) = if self.is_64 {
            (LC_SEGMENT_64, SIZEOF_SEGMENT_COMMAND_64, SIZEOF_SECTION_64)
        } else {
            (LC_SEGMENT, SIZEOF_SEGMENT_COMMAND_32, SIZEOF_SECTION_32)
        };

        let mut segname = [0u8; 16];
        segname[..6].copy_from_slice(b"__DATA");
        let mut sectname = [0u8; 16];
        sectname[..16].copy_from_slice(b"__objc_imageinfo");

        let mut out = Vec::new();
        self.u32(&mut out, cmd);
        self.u32(&mut out, (fixed + sect) as u32);
        out.extend_from_slice(&segname);
        if self.is_64 {
            self.u64(&mut out, 0x1000); // vmaddr
            self.u64(&mut out, 0x1000); // vmsize
            self.u64(&mut out, 0); // fileoff
            self.u64(&mut out, 0); // filesize
        } else {
            self.u32(&mut out, 0x1000);
            self.u32(&mut out, 0x1000);
            self.u32(&mut out, 0);
            self.u32(&mut out, 0);
        }
        self.u32(&mut out, 3); // maxprot
        self.u32(&mut out, 3); // initprot
        self.u32(&mut out, 1); // nsects
        self.u32(&mut out, 0); // flags

        out.extend_from_slice(&sectname);
        out.extend_from_slice(&segname);
        if self.is_64 {
            self.u64(&mut out, 0x1100); // addr
            self.u64(&mut out, 8); // size
        } else {
            self.u32(&mut out, 0x1100);
            self.u32(&mut out, 8);
        }
        self.u32(&mut out, record_offset);
        self.u32(&mut out, 3); // align
        self.u32(&mut out, 0); // reloff
        self.u32(&mut out, 0); // nreloc
        self.u32(&mut out, 0); // flags
        self.u32(&mut out, 0); // reserved1
        self.u32(&mut out, 0); // reserved2
        if self.is_64 {
            self.u32(&mut out, 0); // reserved3
        }

        assert_eq!(out.len(), fixed + sect);
        out
    }

    fn header_size(&self) -> usize {
        if self.is_64 {
            SIZEOF_HEADER_64
        } else {
            SIZEOF_HEADER_32
        }
    }

    pub fn build(self) -> Vec<u8> {
        let mut ncmds = self.cmds.len() as u32;
        let mut sizeofcmds: usize = self.cmds.iter().map(Vec::len).sum();

        if self.objc_flags.is_some() {
            ncmds += 1;
            sizeofcmds += if self.is_64 {
                SIZEOF_SEGMENT_COMMAND_64 + SIZEOF_SECTION_64
            } else {
                SIZEOF_SEGMENT_COMMAND_32 + SIZEOF_SECTION_32
            };
        }
        if self.syms.is_some() {
            ncmds += 1;
            sizeofcmds += SIZEOF_SYMTAB_COMMAND;
        }

        // The objc record, then the symbol and string tables, sit directly
        // after the commands.
        let mut tables_begin = self.header_size() + sizeofcmds;

        let mut objc_cmd = Vec::new();
        let mut objc_record = Vec::new();
        if let Some(flags) = self.objc_flags {
            objc_cmd = self.objc_segment((self.symtab_base + tables_begin as u64) as u32);
            self.u32(&mut objc_record, 0); // version
            self.u32(&mut objc_record, flags);
            tables_begin += 8;
        }

        let mut symtab_cmd = Vec::new();
        let mut tables = Vec::new();
        if let Some(syms) = &self.syms {
            let stride = if self.is_64 { 16 } else { 12 };
            let symoff = tables_begin;
            let stroff = symoff + syms.len() * stride;

            let mut strtab: Vec<u8> = vec![0];
            let mut nlists = Vec::new();
            for sym in syms {
                let n_strx = strtab.len() as u32;
                strtab.extend_from_slice(sym.name.as_bytes());
                strtab.push(0);

                self.u32(&mut nlists, n_strx);
                nlists.push(sym.n_type);
                nlists.push(1); // n_sect
                self.u16(&mut nlists, sym.n_desc);
                if self.is_64 {
                    self.u64(&mut nlists, 0x1000);
                } else {
                    self.u32(&mut nlists, 0x1000);
                }
            }

            self.u32(&mut symtab_cmd, LC_SYMTAB);
            self.u32(&mut symtab_cmd, SIZEOF_SYMTAB_COMMAND as u32);
            self.u32(&mut symtab_cmd, (self.symtab_base + symoff as u64) as u32);
            self.u32(&mut symtab_cmd, syms.len() as u32);
            self.u32(&mut symtab_cmd, (self.symtab_base + stroff as u64) as u32);
            self.u32(&mut symtab_cmd, strtab.len() as u32);

            tables.extend_from_slice(&nlists);
            tables.extend_from_slice(&strtab);
        }

        let mut out = Vec::new();
        let magic = if self.is_64 { MH_MAGIC_64 } else { MH_MAGIC };
        self.u32(&mut out, magic);
        self.u32(&mut out, self.cputype as u32);
        self.u32(&mut out, self.cpusubtype as u32);
        self.u32(&mut out, 0x6); // MH_DYLIB
        self.u32(&mut out, ncmds);
        self.u32(&mut out, sizeofcmds as u32);
        self.u32(&mut out, self.header_flags);
        if self.is_64 {
            self.u32(&mut out, 0); // reserved
        }

        for cmd in &self.cmds {
            out.extend_from_slice(cmd);
        }
        out.extend_from_slice(&objc_cmd);
        out.extend_from_slice(&symtab_cmd);
        out.extend_from_slice(&objc_record);
        out.extend_from_slice(&tables);
        out
    }
}

/// A fat-32 envelope, stored big-endian as real universal files are. Slices
/// are placed back to back after the records.
pub fn fat32(slices: &[(i32, i32, Vec<u8>)]) -> Vec<u8> {
    let records_end = 8 + slices.len() * SIZEOF_FAT_ARCH;

    let mut out = Vec::new();
    out.extend_from_slice(&FAT_MAGIC.to_be_bytes());
    out.extend_from_slice(&(slices.len() as u32).to_be_bytes());

    let mut offset = records_end;
    for (cputype, cpusubtype, slice) in slices {
        out.extend_from_slice(&(*cputype as u32).to_be_bytes());
        out.extend_from_slice(&(*cpusubtype as u32).to_be_bytes());
        out.extend_from_slice(&(offset as u32).to_be_bytes());
        out.extend_from_slice(&(slice.len() as u32).to_be_bytes());
        out.extend_from_slice(&0u32.to_be_bytes()); // align
        offset += slice.len();
    }

    for (_, _, slice) in slices {
        out.extend_from_slice(slice);
    }
    out
}

/// A fat-32 envelope with caller-chosen record offsets/sizes, for malformed
/// layouts. The payload is still appended so the file has real bytes.
pub fn fat32_with_records(records: &[(i32, i32, u32, u32)], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&FAT_MAGIC.to_be_bytes());
    out.extend_from_slice(&(records.len() as u32).to_be_bytes());

    for (cputype, cpusubtype, offset, size) in records {
        out.extend_from_slice(&(*cputype as u32).to_be_bytes());
        out.extend_from_slice(&(*cpusubtype as u32).to_be_bytes());
        out.extend_from_slice(&offset.to_be_bytes());
        out.extend_from_slice(&size.to_be_bytes());
        out.extend_from_slice(&0u32.to_be_bytes());
    }

    out.extend_from_slice(payload);
    out
}

/// A fat-64 envelope with caller-chosen record offsets/sizes.
pub fn fat64_with_records(records: &[(i32, i32, u64, u64)], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&FAT_MAGIC_64.to_be_bytes());
    out.extend_from_slice(&(records.len() as u32).to_be_bytes());

    for (cputype, cpusubtype, offset, size) in records {
        out.extend_from_slice(&(*cputype as u32).to_be_bytes());
        out.extend_from_slice(&(*cpusubtype as u32).to_be_bytes());
        out.extend_from_slice(&offset.to_be_bytes());
        out.extend_from_slice(&size.to_be_bytes());
        out.extend_from_slice(&0u32.to_be_bytes()); // align
        out.extend_from_slice(&0u32.to_be_bytes()); // reserved
    }

    out.extend_from_slice(payload);
    out
}

/// Runs the descriptor-mode parser over in-memory bytes, the way the CLI
/// would: magic first, stream left at byte 4.
pub fn parse_bytes(
    bytes: &[u8],
    flags: tbdgen::parse::ParseFlags,
    options: tbdgen::parse::ParserOptions,
) -> tbdgen::Result<tbdgen::tbd::CreateInfo<'static>> {
    use scroll::Pread;
    use std::io::Cursor;

    let magic: u32 = bytes
        .pread_with(0, scroll::Endian::Little)
        .map_err(tbdgen::Error::from)?;

    let mut cursor = Cursor::new(bytes);
    cursor.set_position(4);

    let mut info = tbdgen::tbd::CreateInfo::new();
    tbdgen::parse::parse_from_file(&mut info, &mut cursor, magic, flags, options)?;
    Ok(info)
}
