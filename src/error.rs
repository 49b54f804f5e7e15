//! Parse failures are values returned up the call chain; nothing here unwinds.

use std::error;
use std::fmt;
use std::io;

#[derive(Debug)]
pub enum Error {
    /// The magic matched none of the recognized envelopes, or the envelope
    /// header was cut short.
    NotAMacho,
    /// The 16-byte magic is not a known dyld shared cache magic.
    NotACache,
    Read(io::Error),
    Seek(io::Error),
    /// Querying the input's size failed.
    Stat(io::Error),
    Mmap(io::Error),
    /// A slice is too small to hold a Mach-O header.
    SizeTooSmall,
    TooManyArchitectures,
    /// A fat envelope declared zero architectures.
    NoArchitectures,
    /// No slice of a fat envelope parsed successfully.
    NoValidArchitectures,
    InvalidArchitecture,
    OverlappingArchitectures,
    InvalidLoadCommand,
    TooManyLoadCommands,
    LoadCommandsAreaTooSmall,
    TooManySections,
    InvalidSection,
    InvalidInstallName,
    InvalidReexport,
    InvalidClient,
    InvalidParentUmbrella,
    InvalidPlatform,
    InvalidSymbolTable,
    InvalidUuid,
    InvalidImages,
    InvalidMappings,
    OverlappingMappings,
    /// The mapping-info and image-info arrays of a shared cache overlap.
    OverlappingRanges,
    /// `(cputype, cpusubtype)` is not in the architecture table.
    UnsupportedCputype,
    /// Two slices mapped to the same architecture-table entry.
    MultipleArchsForCputype,
    ConflictingPlatform,
    /// Install name or version differs between slices.
    ConflictingIdentification,
    ConflictingParentUmbrella,
    ConflictingUuid,
    ConflictingObjcConstraint,
    ConflictingSwiftVersion,
    ConflictingFlags,
    NoIdentification,
    NoPlatform,
    NoSymbolTable,
    NoUuid,
    NoExports,
    Scroll(scroll::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::NotAMacho => write!(f, "file is not a mach-o"),
            Error::NotACache => write!(f, "file is not a dyld shared cache"),
            Error::Read(err) => write!(f, "failed to read from file: {err}"),
            Error::Seek(err) => write!(f, "failed to seek in file: {err}"),
            Error::Stat(err) => write!(f, "failed to query file size: {err}"),
            Error::Mmap(err) => write!(f, "failed to map file: {err}"),
            Error::SizeTooSmall => write!(f, "file is too small to be a valid mach-o"),
            Error::TooManyArchitectures => write!(f, "file has too many architectures"),
            Error::NoArchitectures => write!(f, "file has no architectures"),
            Error::NoValidArchitectures => write!(f, "file has no valid architectures"),
            Error::InvalidArchitecture => write!(f, "file has an invalid architecture"),
            Error::OverlappingArchitectures => write!(f, "file has overlapping architectures"),
            Error::InvalidLoadCommand => write!(f, "mach-o has an invalid load-command"),
            Error::TooManyLoadCommands => write!(f, "mach-o has too many load-commands"),
            Error::LoadCommandsAreaTooSmall => {
                write!(f, "mach-o load-commands area is too small")
            }
            Error::TooManySections => write!(f, "mach-o segment has too many sections"),
            Error::InvalidSection => write!(f, "mach-o has an invalid section"),
            Error::InvalidInstallName => write!(f, "mach-o has an invalid install-name"),
            Error::InvalidReexport => write!(f, "mach-o has an invalid re-export"),
            Error::InvalidClient => write!(f, "mach-o has an invalid client-string"),
            Error::InvalidParentUmbrella => write!(f, "mach-o has an invalid parent-umbrella"),
            Error::InvalidPlatform => write!(f, "mach-o has an invalid platform"),
            Error::InvalidSymbolTable => write!(f, "mach-o has an invalid symbol-table"),
            Error::InvalidUuid => write!(f, "mach-o has an invalid uuid"),
            Error::InvalidImages => write!(f, "shared cache has an invalid image-infos array"),
            Error::InvalidMappings => {
                write!(f, "shared cache has an invalid mapping-infos array")
            }
            Error::OverlappingMappings => write!(f, "shared cache has overlapping mappings"),
            Error::OverlappingRanges => {
                write!(f, "shared cache mapping and image arrays overlap")
            }
            Error::UnsupportedCputype => write!(f, "mach-o has an unsupported cputype"),
            Error::MultipleArchsForCputype => {
                write!(f, "file has multiple architectures for one cputype")
            }
            Error::ConflictingPlatform => write!(f, "slices disagree on the platform"),
            Error::ConflictingIdentification => {
                write!(f, "slices disagree on the install-name or versions")
            }
            Error::ConflictingParentUmbrella => {
                write!(f, "slices disagree on the parent-umbrella")
            }
            Error::ConflictingUuid => write!(f, "file carries a duplicate uuid"),
            Error::ConflictingObjcConstraint => {
                write!(f, "slices disagree on the objc-constraint")
            }
            Error::ConflictingSwiftVersion => {
                write!(f, "slices disagree on the swift-version")
            }
            Error::ConflictingFlags => write!(f, "slices disagree on the header flags"),
            Error::NoIdentification => write!(f, "mach-o has no LC_ID_DYLIB load-command"),
            Error::NoPlatform => write!(f, "mach-o provides no platform"),
            Error::NoSymbolTable => write!(f, "mach-o has no symbol-table"),
            Error::NoUuid => write!(f, "mach-o provides no uuid"),
            Error::NoExports => write!(f, "mach-o exports no symbols"),
            Error::Scroll(err) => write!(f, "malformed field: {err}"),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Read(err) | Error::Seek(err) | Error::Stat(err) | Error::Mmap(err) => {
                Some(err)
            }
            Error::Scroll(err) => Some(err),
            _ => None,
        }
    }
}

impl From<scroll::Error> for Error {
    fn from(err: scroll::Error) -> Error {
        Error::Scroll(err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
