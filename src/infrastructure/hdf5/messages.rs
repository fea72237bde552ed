//! Decoders for the header messages the reader understands

use super::cursor::{pad8, Cursor};
use super::error::Hdf5Error;
use super::superblock::Superblock;

/// Element type of an attribute or dataset
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Datatype {
    Integer {
        size: usize,
        signed: bool,
        big_endian: bool,
    },
    Float {
        size: usize,
        big_endian: bool,
    },
    FixedString {
        size: usize,
        space_padded: bool,
    },
    VarLenString,
    Other {
        class: u8,
        size: usize,
    },
}

impl Datatype {
    pub fn parse(body: &[u8]) -> Result<Self, Hdf5Error> {
        let mut cursor = Cursor::new(body);
        let class_and_version = cursor.u8()?;
        let bits = cursor.take(3)?;
        let bits = u32::from(bits[0]) | u32::from(bits[1]) << 8 | u32::from(bits[2]) << 16;
        let size = cursor.u32()? as usize;
        let class = class_and_version & 0x0F;

        Ok(match class {
            0 => Self::Integer {
                size,
                signed: bits & 0x08 != 0,
                big_endian: bits & 0x01 != 0,
            },
            1 => Self::Float {
                size,
                big_endian: bits & 0x01 != 0,
            },
            3 => Self::FixedString {
                size,
                space_padded: bits & 0x0F == 2,
            },
            9 if bits & 0x0F == 1 => Self::VarLenString,
            other => Self::Other { class: other, size },
        })
    }

    /// Stored size of one element in bytes
    pub fn element_size(&self, superblock: &Superblock) -> usize {
        match self {
            Self::Integer { size, .. }
            | Self::Float { size, .. }
            | Self::FixedString { size, .. }
            | Self::Other { size, .. } => *size,
            // sequence length + global heap collection address + object index
            Self::VarLenString => 4 + superblock.offset_size + 4,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Integer { size, signed, .. } => {
                format!("{}{}", if *signed { "int" } else { "uint" }, size * 8)
            }
            Self::Float { size, .. } => format!("float{}", size * 8),
            Self::FixedString { size, .. } => format!("string[{}]", size),
            Self::VarLenString => "vlen string".to_string(),
            Self::Other { class, size } => format!("class {} ({} bytes)", class, size),
        }
    }
}

/// Shape of an attribute or dataset; empty dims means scalar
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataspace {
    pub dims: Vec<u64>,
    pub null: bool,
}

impl Dataspace {
    pub fn parse(body: &[u8], superblock: &Superblock) -> Result<Self, Hdf5Error> {
        let mut cursor = Cursor::new(body);
        let version = cursor.u8()?;
        let rank = cursor.u8()? as usize;
        let _flags = cursor.u8()?;

        let null = match version {
            1 => {
                cursor.skip(5)?;
                false
            }
            2 => cursor.u8()? == 2,
            other => {
                return Err(Hdf5Error::unsupported(format!(
                    "dataspace version {}",
                    other
                )))
            }
        };

        let dims = (0..rank)
            .map(|_| cursor.uint(superblock.length_size))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { dims, null })
    }

    pub fn element_count(&self) -> Result<usize, Hdf5Error> {
        if self.null {
            return Ok(0);
        }

        self.dims.iter().try_fold(1usize, |acc, dim| {
            usize::try_from(*dim)
                .ok()
                .and_then(|dim| acc.checked_mul(dim))
                .ok_or_else(|| Hdf5Error::malformed("dataspace", "element count overflow"))
        })
    }

    pub fn shape(&self) -> Vec<usize> {
        self.dims.iter().map(|d| *d as usize).collect()
    }
}

/// Where a dataset's raw data lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layout {
    Compact(Vec<u8>),
    Contiguous { address: u64 },
    Chunked,
    Virtual,
}

impl Layout {
    pub fn parse(body: &[u8], superblock: &Superblock) -> Result<Self, Hdf5Error> {
        let mut cursor = Cursor::new(body);
        let version = cursor.u8()?;

        match version {
            1 | 2 => {
                let rank = cursor.u8()? as usize;
                let class = cursor.u8()?;
                cursor.skip(5)?;

                match class {
                    0 => {
                        cursor.skip(rank * 4)?;
                        let size = cursor.u32()? as usize;
                        Ok(Self::Compact(cursor.take(size)?.to_vec()))
                    }
                    1 => Ok(Self::Contiguous {
                        address: cursor.uint(superblock.offset_size)?,
                    }),
                    2 => Ok(Self::Chunked),
                    other => Err(Hdf5Error::malformed(
                        "data layout",
                        format!("unknown layout class {}", other),
                    )),
                }
            }
            3 | 4 => match cursor.u8()? {
                0 => {
                    let size = cursor.u16()? as usize;
                    Ok(Self::Compact(cursor.take(size)?.to_vec()))
                }
                1 => Ok(Self::Contiguous {
                    address: cursor.uint(superblock.offset_size)?,
                }),
                2 => Ok(Self::Chunked),
                3 => Ok(Self::Virtual),
                other => Err(Hdf5Error::malformed(
                    "data layout",
                    format!("unknown layout class {}", other),
                )),
            },
            other => Err(Hdf5Error::unsupported(format!(
                "data layout version {}",
                other
            ))),
        }
    }
}

/// Attribute message with its raw (undecoded) value bytes
#[derive(Debug, Clone)]
pub struct AttributeMessage {
    pub name: String,
    pub datatype: Datatype,
    pub dataspace: Dataspace,
    pub raw: Vec<u8>,
}

impl AttributeMessage {
    pub fn parse(body: &[u8], superblock: &Superblock) -> Result<Self, Hdf5Error> {
        let mut cursor = Cursor::new(body);
        let version = cursor.u8()?;
        let flags = cursor.u8()?;
        let name_size = cursor.u16()? as usize;
        let datatype_size = cursor.u16()? as usize;
        let dataspace_size = cursor.u16()? as usize;

        if version >= 2 && flags & 0x03 != 0 {
            return Err(Hdf5Error::unsupported("attributes with shared datatype or dataspace"));
        }

        // Version 1 pads each field to eight bytes
        let padded = |n: usize| if version == 1 { pad8(n) } else { n };

        match version {
            1 | 2 => {}
            3 => {
                let _name_encoding = cursor.u8()?;
            }
            other => {
                return Err(Hdf5Error::unsupported(format!(
                    "attribute message version {}",
                    other
                )))
            }
        }

        let name = cursor.take(padded(name_size))?;
        let name = trim_nul(&name[..name_size.min(name.len())]);
        let datatype = Datatype::parse(cursor.take(padded(datatype_size))?)?;
        let dataspace = Dataspace::parse(cursor.take(padded(dataspace_size))?, superblock)?;

        let needed = dataspace
            .element_count()?
            .checked_mul(datatype.element_size(superblock))
            .ok_or_else(|| Hdf5Error::malformed("attribute", "value size overflow"))?;
        let raw = cursor.take(needed)?.to_vec();

        Ok(Self {
            name,
            datatype,
            dataspace,
            raw,
        })
    }
}

/// Hard link stored directly in a group's object header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkMessage {
    pub name: String,
    /// `None` for soft and external links
    pub address: Option<u64>,
}

impl LinkMessage {
    pub fn parse(body: &[u8], superblock: &Superblock) -> Result<Self, Hdf5Error> {
        let mut cursor = Cursor::new(body);
        let version = cursor.u8()?;

        if version != 1 {
            return Err(Hdf5Error::unsupported(format!("link message version {}", version)));
        }

        let flags = cursor.u8()?;
        let link_type = if flags & 0x08 != 0 { cursor.u8()? } else { 0 };

        if flags & 0x04 != 0 {
            cursor.skip(8)?;
        }

        if flags & 0x10 != 0 {
            let _charset = cursor.u8()?;
        }

        let name_length = cursor.uint(1 << (flags & 0x03))? as usize;
        let name = String::from_utf8_lossy(cursor.take(name_length)?).into_owned();

        let address = if link_type == 0 {
            Some(cursor.uint(superblock.offset_size)?)
        } else {
            None
        };

        Ok(Self { name, address })
    }
}

/// Old-style group storage: v1 B-tree plus local heap for names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolTableMessage {
    pub btree_address: u64,
    pub heap_address: u64,
}

impl SymbolTableMessage {
    pub fn parse(body: &[u8], superblock: &Superblock) -> Result<Self, Hdf5Error> {
        let mut cursor = Cursor::new(body);
        Ok(Self {
            btree_address: cursor.uint(superblock.offset_size)?,
            heap_address: cursor.uint(superblock.offset_size)?,
        })
    }
}

/// Address of the fractal heap used for dense link or attribute storage.
///
/// Link info and attribute info messages share this prefix layout; they only
/// differ in the width of the optional maximum creation index.
pub fn dense_storage_heap(
    body: &[u8],
    superblock: &Superblock,
    creation_index_size: usize,
) -> Result<Option<u64>, Hdf5Error> {
    let mut cursor = Cursor::new(body);
    let _version = cursor.u8()?;
    let flags = cursor.u8()?;

    if flags & 0x01 != 0 {
        cursor.skip(creation_index_size)?;
    }

    let heap = cursor.uint(superblock.offset_size)?;
    Ok((!superblock.is_undefined(heap)).then_some(heap))
}

pub(crate) fn trim_nul(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}
