//! Little-endian byte cursor over an in-memory HDF5 image

use super::error::Hdf5Error;

/// Sequential reader over a byte slice with bounds-checked primitives.
///
/// All multi-byte integers in HDF5 metadata are little-endian. Addresses and
/// lengths use the widths declared in the superblock, so they are read with
/// [`Cursor::uint`].
#[derive(Debug, Clone)]
pub(crate) struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Cursor positioned at an absolute offset of `data`
    pub fn at(data: &'a [u8], pos: u64) -> Result<Self, Hdf5Error> {
        let pos = usize::try_from(pos).map_err(|_| Hdf5Error::Truncated {
            offset: pos,
            needed: 0,
        })?;

        if pos > data.len() {
            return Err(Hdf5Error::Truncated {
                offset: pos as u64,
                needed: 0,
            });
        }

        Ok(Self { data, pos })
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], Hdf5Error> {
        let end = self.pos.checked_add(n).filter(|end| *end <= self.data.len());

        match end {
            Some(end) => {
                let slice = &self.data[self.pos..end];
                self.pos = end;
                Ok(slice)
            }
            None => Err(Hdf5Error::Truncated {
                offset: self.pos as u64,
                needed: n,
            }),
        }
    }

    pub fn skip(&mut self, n: usize) -> Result<(), Hdf5Error> {
        self.take(n).map(|_| ())
    }

    pub fn expect_signature(&mut self, signature: &'static [u8]) -> Result<(), Hdf5Error> {
        let offset = self.pos as u64;
        let found = self.take(signature.len())?;

        if found != signature {
            return Err(Hdf5Error::BadSignature {
                offset,
                expected: String::from_utf8_lossy(signature).into_owned(),
            });
        }

        Ok(())
    }

    pub fn u8(&mut self) -> Result<u8, Hdf5Error> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16, Hdf5Error> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub fn u32(&mut self) -> Result<u32, Hdf5Error> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Unsigned little-endian integer of 1..=8 bytes
    pub fn uint(&mut self, width: usize) -> Result<u64, Hdf5Error> {
        if width == 0 || width > 8 {
            return Err(Hdf5Error::malformed(
                "integer width",
                format!("{} bytes is outside 1..=8", width),
            ));
        }

        let bytes = self.take(width)?;
        let mut buf = [0u8; 8];
        buf[..width].copy_from_slice(bytes);
        Ok(u64::from_le_bytes(buf))
    }

    /// Null-terminated string starting at the cursor
    pub fn c_string(&mut self) -> Result<String, Hdf5Error> {
        let rest = &self.data[self.pos.min(self.data.len())..];

        match rest.iter().position(|b| *b == 0) {
            Some(len) => {
                let value = String::from_utf8_lossy(&rest[..len]).into_owned();
                self.pos += len + 1;
                Ok(value)
            }
            None => Err(Hdf5Error::Truncated {
                offset: self.pos as u64,
                needed: rest.len() + 1,
            }),
        }
    }
}

/// Round `n` up to the next multiple of eight
pub(crate) fn pad8(n: usize) -> usize {
    (n + 7) & !7
}
