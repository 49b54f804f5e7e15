//! Word-size and endianness context, derived once per slice from the magic.

use scroll::Endian;

/// The slice's pointer width.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Container {
    Little,
    Big,
}

impl Container {
    pub fn is_big(self) -> bool {
        self == Container::Big
    }
}

/// Everything a field read needs to know about the slice it came from.
///
/// All multi-byte reads go through `le` exactly once, at the point of read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ctx {
    pub container: Container,
    pub le: Endian,
}

impl Ctx {
    pub fn new(container: Container, le: Endian) -> Ctx {
        Ctx { container, le }
    }

    pub fn is_big(&self) -> bool {
        self.container.is_big()
    }
}

impl Default for Ctx {
    fn default() -> Ctx {
        Ctx::new(Container::Big, Endian::Little)
    }
}
