//! Object header decoding (versions 1 and 2) with continuation blocks

use std::collections::VecDeque;

use super::cursor::Cursor;
use super::error::Hdf5Error;
use super::superblock::Superblock;

pub(crate) const MSG_NIL: u16 = 0x0000;
pub(crate) const MSG_DATASPACE: u16 = 0x0001;
pub(crate) const MSG_LINK_INFO: u16 = 0x0002;
pub(crate) const MSG_DATATYPE: u16 = 0x0003;
pub(crate) const MSG_LINK: u16 = 0x0006;
pub(crate) const MSG_DATA_LAYOUT: u16 = 0x0008;
pub(crate) const MSG_FILTER_PIPELINE: u16 = 0x000B;
pub(crate) const MSG_ATTRIBUTE: u16 = 0x000C;
pub(crate) const MSG_CONTINUATION: u16 = 0x0010;
pub(crate) const MSG_SYMBOL_TABLE: u16 = 0x0011;
pub(crate) const MSG_ATTRIBUTE_INFO: u16 = 0x0015;

const MESSAGE_FLAG_SHARED: u8 = 0x02;
const MAX_CONTINUATIONS: usize = 4096;

/// One header message, copied out of the file image
#[derive(Debug, Clone)]
pub(crate) struct HeaderMessage {
    pub kind: u16,
    pub flags: u8,
    pub data: Vec<u8>,
}

impl HeaderMessage {
    pub fn is_shared(&self) -> bool {
        self.flags & MESSAGE_FLAG_SHARED != 0
    }
}

/// All messages of one object, in file order
#[derive(Debug, Clone)]
pub(crate) struct ObjectHeader {
    pub address: u64,
    pub messages: Vec<HeaderMessage>,
}

impl ObjectHeader {
    pub fn read(data: &[u8], superblock: &Superblock, address: u64) -> Result<Self, Hdf5Error> {
        let position = superblock.resolve(address);
        let cursor = Cursor::at(data, position)?;
        let peek = cursor.clone().take(4)?;

        let messages = if peek == b"OHDR" {
            read_v2(data, superblock, position)?
        } else {
            read_v1(data, superblock, position)?
        };

        Ok(Self { address, messages })
    }

    pub fn messages_of(&self, kind: u16) -> impl Iterator<Item = &HeaderMessage> {
        self.messages.iter().filter(move |m| m.kind == kind)
    }

    pub fn first(&self, kind: u16) -> Option<&HeaderMessage> {
        self.messages_of(kind).next()
    }

    pub fn has(&self, kind: u16) -> bool {
        self.first(kind).is_some()
    }
}

fn read_v1(
    data: &[u8],
    superblock: &Superblock,
    position: u64,
) -> Result<Vec<HeaderMessage>, Hdf5Error> {
    let mut cursor = Cursor::at(data, position)?;
    let version = cursor.u8()?;

    if version != 1 {
        return Err(Hdf5Error::unsupported(format!(
            "object header version {} at offset {}",
            version, position
        )));
    }

    cursor.skip(1)?;
    let total = cursor.u16()? as usize;
    let _reference_count = cursor.u32()?;
    let header_size = cursor.u32()? as u64;
    // Header prefix is 12 bytes, padded to 16 before the first message
    cursor.skip(4)?;

    let mut blocks = VecDeque::from([(cursor.position() as u64, header_size)]);
    let mut messages = Vec::with_capacity(total);
    let mut continuations = 0usize;

    while let Some((start, length)) = blocks.pop_front() {
        let block = slice(data, start, length)?;
        let mut cursor = Cursor::new(block);

        while cursor.remaining() >= 8 && messages.len() < total {
            let kind = cursor.u16()?;
            let size = cursor.u16()? as usize;
            let flags = cursor.u8()?;
            cursor.skip(3)?;
            let body = cursor.take(size)?;

            if kind == MSG_CONTINUATION {
                continuations += 1;
                check_continuations(continuations)?;
                blocks.push_back(continuation_target(body, superblock)?);
            }

            // Continuation messages count toward the total in version 1
            messages.push(HeaderMessage {
                kind,
                flags,
                data: body.to_vec(),
            });
        }
    }

    messages.retain(|m| m.kind != MSG_CONTINUATION && m.kind != MSG_NIL);
    Ok(messages)
}

fn read_v2(
    data: &[u8],
    superblock: &Superblock,
    position: u64,
) -> Result<Vec<HeaderMessage>, Hdf5Error> {
    let mut cursor = Cursor::at(data, position)?;
    cursor.expect_signature(b"OHDR")?;
    let version = cursor.u8()?;

    if version != 2 {
        return Err(Hdf5Error::unsupported(format!(
            "object header version {} at offset {}",
            version, position
        )));
    }

    let flags = cursor.u8()?;

    if flags & 0x20 != 0 {
        // access, modification, change and birth times
        cursor.skip(16)?;
    }

    if flags & 0x10 != 0 {
        // max compact / min dense attribute counts
        cursor.skip(4)?;
    }

    let chunk_size = cursor.uint(1 << (flags & 0x03))?;
    let tracks_creation_order = flags & 0x04 != 0;

    let mut blocks = VecDeque::from([(cursor.position() as u64, chunk_size)]);
    let mut messages = Vec::new();
    let mut continuations = 0usize;
    let message_prefix = if tracks_creation_order { 6 } else { 4 };

    while let Some((start, length)) = blocks.pop_front() {
        let block = slice(data, start, length)?;
        let mut cursor = Cursor::new(block);

        while cursor.remaining() >= message_prefix {
            let kind = cursor.u8()? as u16;
            let size = cursor.u16()? as usize;
            let message_flags = cursor.u8()?;

            if tracks_creation_order {
                cursor.skip(2)?;
            }

            let body = cursor.take(size)?;

            match kind {
                MSG_NIL => {}
                MSG_CONTINUATION => {
                    continuations += 1;
                    check_continuations(continuations)?;
                    let (address, length) = continuation_target(body, superblock)?;
                    // OCHK signature up front, checksum at the end
                    let mut chunk = Cursor::at(data, address)?;
                    chunk.expect_signature(b"OCHK")?;
                    blocks.push_back((address + 4, length.saturating_sub(8)));
                }
                _ => messages.push(HeaderMessage {
                    kind,
                    flags: message_flags,
                    data: body.to_vec(),
                }),
            }
        }
    }

    Ok(messages)
}

fn continuation_target(body: &[u8], superblock: &Superblock) -> Result<(u64, u64), Hdf5Error> {
    let mut cursor = Cursor::new(body);
    let offset = cursor.uint(superblock.offset_size)?;
    let length = cursor.uint(superblock.length_size)?;
    Ok((superblock.resolve(offset), length))
}

fn check_continuations(count: usize) -> Result<(), Hdf5Error> {
    if count > MAX_CONTINUATIONS {
        return Err(Hdf5Error::malformed(
            "object header",
            "too many continuation blocks",
        ));
    }
    Ok(())
}

fn slice(data: &[u8], start: u64, length: u64) -> Result<&[u8], Hdf5Error> {
    let mut cursor = Cursor::at(data, start)?;
    let length = usize::try_from(length)
        .map_err(|_| Hdf5Error::malformed("object header", "block length overflow"))?;
    cursor.take(length)
}
