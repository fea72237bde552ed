//! Superblock discovery and decoding

use super::cursor::Cursor;
use super::error::Hdf5Error;

pub(crate) const SIGNATURE: &[u8; 8] = b"\x89HDF\r\n\x1a\n";

/// File-wide addressing parameters and the location of the root group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Superblock {
    pub version: u8,
    pub offset_size: usize,
    pub length_size: usize,
    /// Absolute position every stored address is relative to
    pub base_address: u64,
    /// Address of the root group's object header (relative to base)
    pub root_object_header: u64,
}

impl Superblock {
    /// Locate and decode the superblock.
    ///
    /// The signature may sit behind a user block at 0, 512, 1024, 2048, ...
    pub fn find(data: &[u8]) -> Result<Self, Hdf5Error> {
        let mut position = 0usize;

        while position + SIGNATURE.len() <= data.len() {
            if &data[position..position + SIGNATURE.len()] == SIGNATURE {
                return Self::parse(data, position);
            }

            position = if position == 0 { 512 } else { position * 2 };
        }

        Err(Hdf5Error::NotHdf5)
    }

    fn parse(data: &[u8], position: usize) -> Result<Self, Hdf5Error> {
        let mut cursor = Cursor::at(data, position as u64)?;
        cursor.skip(SIGNATURE.len())?;
        let version = cursor.u8()?;

        match version {
            0 | 1 => {
                // free-space version, root symbol table entry version, reserved,
                // shared header message version
                cursor.skip(4)?;
                let offset_size = validate_width("offset size", cursor.u8()?)?;
                let length_size = validate_width("length size", cursor.u8()?)?;
                // reserved, group leaf/internal node K, consistency flags
                cursor.skip(1 + 2 + 2 + 4)?;

                if version == 1 {
                    // indexed storage internal node K + reserved
                    cursor.skip(4)?;
                }

                let base_address = cursor.uint(offset_size)?;
                let _free_space = cursor.uint(offset_size)?;
                let _end_of_file = cursor.uint(offset_size)?;
                let _driver_info = cursor.uint(offset_size)?;

                // Root group symbol table entry
                let _link_name_offset = cursor.uint(offset_size)?;
                let root_object_header = cursor.uint(offset_size)?;

                Ok(Self {
                    version,
                    offset_size,
                    length_size,
                    base_address,
                    root_object_header,
                })
            }
            2 | 3 => {
                let offset_size = validate_width("offset size", cursor.u8()?)?;
                let length_size = validate_width("length size", cursor.u8()?)?;
                let _flags = cursor.u8()?;
                let base_address = cursor.uint(offset_size)?;
                let _extension = cursor.uint(offset_size)?;
                let _end_of_file = cursor.uint(offset_size)?;
                let root_object_header = cursor.uint(offset_size)?;

                Ok(Self {
                    version,
                    offset_size,
                    length_size,
                    base_address,
                    root_object_header,
                })
            }
            other => Err(Hdf5Error::unsupported(format!(
                "superblock version {}",
                other
            ))),
        }
    }

    /// Absolute file position of a stored address
    pub fn resolve(&self, address: u64) -> u64 {
        self.base_address.wrapping_add(address)
    }

    /// Whether `address` is the all-ones "undefined address" marker
    pub fn is_undefined(&self, address: u64) -> bool {
        let bits = self.offset_size * 8;

        if bits >= 64 {
            address == u64::MAX
        } else {
            address == (1u64 << bits) - 1
        }
    }
}

fn validate_width(what: &'static str, width: u8) -> Result<usize, Hdf5Error> {
    match width {
        2 | 4 | 8 => Ok(width as usize),
        other => Err(Hdf5Error::malformed(
            what,
            format!("{} bytes is not supported", other),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v0_superblock(root: u64) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(SIGNATURE);
        data.extend_from_slice(&[0, 0, 0, 0, 0, 8, 8, 0]);
        data.extend_from_slice(&4u16.to_le_bytes());
        data.extend_from_slice(&16u16.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&0u64.to_le_bytes());
        data.extend_from_slice(&u64::MAX.to_le_bytes());
        data.extend_from_slice(&1024u64.to_le_bytes());
        data.extend_from_slice(&u64::MAX.to_le_bytes());
        data.extend_from_slice(&0u64.to_le_bytes());
        data.extend_from_slice(&root.to_le_bytes());
        data.extend_from_slice(&[0u8; 24]);
        data
    }

    #[test]
    fn test_parse_version_zero() {
        let superblock = Superblock::find(&v0_superblock(96)).unwrap();

        assert_eq!(superblock.version, 0);
        assert_eq!(superblock.offset_size, 8);
        assert_eq!(superblock.length_size, 8);
        assert_eq!(superblock.base_address, 0);
        assert_eq!(superblock.root_object_header, 96);
    }

    #[test]
    fn test_find_after_user_block() {
        let mut data = vec![0u8; 512];
        data.extend(v0_superblock(96));

        let superblock = Superblock::find(&data).unwrap();
        assert_eq!(superblock.root_object_header, 96);
    }

    #[test]
    fn test_not_hdf5() {
        let err = Superblock::find(b"definitely not a model file").unwrap_err();
        assert!(matches!(err, Hdf5Error::NotHdf5));
    }

    #[test]
    fn test_undefined_address() {
        let superblock = Superblock::find(&v0_superblock(96)).unwrap();
        assert!(superblock.is_undefined(u64::MAX));
        assert!(!superblock.is_undefined(0));
    }
}
