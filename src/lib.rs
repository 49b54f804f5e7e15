//! Extracts the public ABI surface of Mach-O libraries — install name,
//! versions, platform, uuids, Objective-C metadata, re-exports, allowed
//! clients and exported symbols — into text stubs (.tbd) a linker can
//! consume in place of the binary.
//!
//! Inputs may be thin Mach-Os, universal (fat) envelopes of either record
//! width and byte order, or dyld shared caches whose resident images are
//! parsed in place.
//!
//! ```no_run
//! use std::fs::File;
//! use std::io::Read;
//!
//! use tbdgen::parse::{parse_from_file, ParseFlags, ParserOptions};
//! use tbdgen::tbd::{write::write_tbd, CreateInfo};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut file = File::open("/usr/lib/libSystem.B.dylib")?;
//! let mut magic = [0u8; 4];
//! file.read_exact(&mut magic)?;
//!
//! let mut info = CreateInfo::new();
//! parse_from_file(
//!     &mut info,
//!     &mut file,
//!     u32::from_le_bytes(magic),
//!     ParseFlags::default(),
//!     ParserOptions::default(),
//! )?;
//!
//! write_tbd(&mut std::io::stdout(), &info)?;
//! # Ok(())
//! # }
//! ```

pub mod container;
pub mod error;
pub mod mach;
pub mod parse;
pub mod range;
pub mod sorted;
pub mod strtab;
pub mod tbd;

pub use crate::error::{Error, Result};
