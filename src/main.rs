//! Command-line front end: converts Mach-O libraries (and dyld shared cache
//! images) into .tbd text stubs.

use std::fs::{self, File};
use std::io::{self, Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use log::{debug, warn};
use walkdir::WalkDir;

use tbdgen::error::Error;
use tbdgen::mach::DYLD_CACHE_MAGIC_PREFIX;
use tbdgen::parse::{
    list_archs, parse_from_file, CacheOptions, ParseFlags, ParserOptions, SharedCache,
};
use tbdgen::tbd::write::write_tbd;
use tbdgen::tbd::CreateInfo;

#[derive(Parser)]
#[command(
    name = "tbdgen",
    version,
    about = "Convert mach-o libraries and dyld shared caches to .tbd text stubs"
)]
struct Args {
    /// Mach-O files, shared caches, or (with --recurse) directories.
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Output file, or output directory when recursing or reading a shared
    /// cache. Defaults to stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Recurse into directories, converting every Mach-O library found.
    #[arg(short, long)]
    recurse: bool,

    /// Print each input's architectures instead of producing stubs.
    #[arg(long)]
    list_archs: bool,

    /// Skip fat slices that are not valid Mach-Os instead of failing the
    /// whole file.
    #[arg(long)]
    skip_invalid_architectures: bool,

    /// Keep the first value of a field slices disagree on.
    #[arg(long)]
    ignore_conflicting_fields: bool,

    /// Don't fail inputs that export no symbols.
    #[arg(long)]
    ignore_missing_exports: bool,

    /// Don't require or extract a platform.
    #[arg(long)]
    ignore_platform: bool,

    /// Don't require or extract uuids.
    #[arg(long)]
    ignore_uuid: bool,

    /// Don't extract the symbol table.
    #[arg(long)]
    ignore_symbols: bool,
}

impl Args {
    fn parse_flags(&self) -> ParseFlags {
        ParseFlags {
            ignore_missing_exports: self.ignore_missing_exports,
            ignore_platform: self.ignore_platform,
            ignore_uuid: self.ignore_uuid,
            ignore_symbols: self.ignore_symbols,
            ..ParseFlags::default()
        }
    }

    fn parser_options(&self) -> ParserOptions {
        ParserOptions {
            // Front-end parses are lenient about per-command anomalies, as
            // real system libraries carry plenty of them.
            ignore_invalid_fields: true,
            ignore_conflicting_fields: self.ignore_conflicting_fields,
            skip_invalid_architectures: self.skip_invalid_architectures,
            ..ParserOptions::default()
        }
    }
}

fn write_output(output: Option<&Path>, render: impl FnOnce(&mut dyn Write) -> io::Result<()>) -> io::Result<()> {
    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            let mut file = File::create(path)?;
            render(&mut file)
        }
        None => {
            let stdout = io::stdout();
            let mut lock = stdout.lock();
            render(&mut lock)
        }
    }
}

/// Output path for one input when recursing: mirror the input's path under
/// the output directory, with `.tbd` appended.
fn recursed_output_path(output_dir: &Path, root: &Path, input: &Path) -> PathBuf {
    let relative = input.strip_prefix(root).unwrap_or(input);
    let mut path = output_dir.join(relative);

    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".tbd");
    path.set_file_name(name);
    path
}

fn handle_shared_cache(
    file: &File,
    magic: &[u8; 16],
    path: &Path,
    output: Option<&Path>,
    flags: ParseFlags,
    options: ParserOptions,
) -> Result<(), Error> {
    let cache = SharedCache::parse_from_file(
        file,
        magic,
        CacheOptions { verify_image_path_offsets: true, zero_image_pads: false },
    )?;

    let mut converted = 0u32;
    for index in 0..cache.images_count() {
        let image_path = match cache.image_path(index) {
            Ok(image_path) => image_path.to_owned(),
            Err(err) => {
                warn!("{}: image {index} has an unreadable path: {err}", path.display());
                continue;
            }
        };

        let mut info = CreateInfo::new();
        if let Err(err) = cache.parse_image(&mut info, index, flags, options) {
            debug!("{}: skipping image {image_path}: {err}", path.display());
            continue;
        }

        let image_output = output.map(|dir| {
            let relative = image_path.trim_start_matches('/');
            dir.join(format!("{relative}.tbd"))
        });

        if let Err(err) = write_output(image_output.as_deref(), |w| write_tbd(w, &info)) {
            warn!("{}: failed to write stub for {image_path}: {err}", path.display());
            continue;
        }

        converted += 1;
    }

    if converted == 0 {
        warn!("{}: no images could be converted", path.display());
    }

    Ok(())
}

/// Converts one file. `explicit` marks paths the user named directly, where
/// a non-Mach-O is an error worth reporting rather than silently skipping.
fn handle_file(
    path: &Path,
    output: Option<&Path>,
    args: &Args,
    explicit: bool,
) -> Result<bool, Error> {
    let mut file = File::open(path).map_err(Error::Read)?;

    let mut magic16 = [0u8; 16];
    let read = {
        let mut filled = 0;
        loop {
            match file.read(&mut magic16[filled..]).map_err(Error::Read)? {
                0 => break filled,
                n => filled += n,
            }
            if filled == magic16.len() {
                break filled;
            }
        }
    };

    if read >= DYLD_CACHE_MAGIC_PREFIX.len() && magic16.starts_with(DYLD_CACHE_MAGIC_PREFIX) {
        if read < magic16.len() {
            return Err(Error::NotACache);
        }
        handle_shared_cache(
            &file,
            &magic16,
            path,
            output,
            args.parse_flags(),
            args.parser_options(),
        )?;
        return Ok(true);
    }

    if read < 4 {
        if explicit {
            return Err(Error::NotAMacho);
        }
        return Ok(false);
    }

    let magic = u32::from_le_bytes([magic16[0], magic16[1], magic16[2], magic16[3]]);
    file.seek(io::SeekFrom::Start(4)).map_err(Error::Seek)?;

    if args.list_archs {
        let archs = match list_archs(&mut file, magic) {
            Ok(archs) => archs,
            Err(Error::NotAMacho) if !explicit => return Ok(false),
            Err(err) => return Err(err),
        };

        println!("{}:", path.display());
        for (index, arch) in archs.iter().enumerate() {
            match arch {
                Some(name) => println!("\t{}. {name}", index + 1),
                None => println!("\t{}. (unsupported architecture)", index + 1),
            }
        }
        return Ok(true);
    }

    let mut info = CreateInfo::new();
    match parse_from_file(
        &mut info,
        &mut file,
        magic,
        args.parse_flags(),
        args.parser_options(),
    ) {
        Ok(()) => {}
        Err(Error::NotAMacho) if !explicit => return Ok(false),
        Err(err) => return Err(err),
    }

    if let Err(err) = write_output(output, |w| write_tbd(w, &info)) {
        // A failed write doesn't taint the other inputs.
        eprintln!("{}: failed to write output: {err}", path.display());
    }
    Ok(true)
}

fn run(args: &Args) -> bool {
    let mut all_ok = true;

    for path in &args.paths {
        if args.recurse && path.is_dir() {
            let mut converted = 0u32;
            for entry in WalkDir::new(path).into_iter().filter_map(|entry| entry.ok()) {
                if !entry.file_type().is_file() {
                    continue;
                }

                let input = entry.path();
                let output = args
                    .output
                    .as_deref()
                    .map(|dir| recursed_output_path(dir, path, input));

                match handle_file(input, output.as_deref(), args, false) {
                    Ok(true) => converted += 1,
                    Ok(false) => {}
                    Err(err) => {
                        eprintln!("{}: {err}", input.display());
                        all_ok = false;
                    }
                }
            }

            if converted == 0 {
                eprintln!("{}: no mach-o libraries found", path.display());
            }
            continue;
        }

        if let Err(err) = handle_file(path, args.output.as_deref(), args, true) {
            eprintln!("{}: {err}", path.display());
            all_ok = false;
        }
    }

    all_ok
}

fn main() -> ExitCode {
    env_logger::init();

    let args = Args::parse();
    if run(&args) {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
