//! Navigable view over an HDF5 file image: groups, datasets, attributes

use std::path::Path;

use super::cursor::{pad8, Cursor};
use super::error::Hdf5Error;
use super::messages::{
    dense_storage_heap, trim_nul, AttributeMessage, Dataspace, Datatype, Layout, LinkMessage,
    SymbolTableMessage,
};
use super::object_header::{
    ObjectHeader, MSG_ATTRIBUTE, MSG_ATTRIBUTE_INFO, MSG_DATASPACE, MSG_DATATYPE,
    MSG_DATA_LAYOUT, MSG_FILTER_PIPELINE, MSG_LINK, MSG_LINK_INFO, MSG_SYMBOL_TABLE,
};
use super::superblock::Superblock;

const MAX_BTREE_DEPTH: usize = 64;

/// An HDF5 file loaded fully into memory
#[derive(Debug)]
pub struct Hdf5File {
    data: Vec<u8>,
    superblock: Superblock,
}

impl Hdf5File {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Hdf5Error> {
        let data = std::fs::read(path)?;
        Self::from_bytes(data)
    }

    pub fn from_bytes(data: Vec<u8>) -> Result<Self, Hdf5Error> {
        let superblock = Superblock::find(&data)?;
        Ok(Self { data, superblock })
    }

    pub fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    pub fn root(&self) -> Result<Group<'_>, Hdf5Error> {
        let header = self.object_header(self.superblock.root_object_header)?;
        Group::from_header(self, "/".to_string(), header)
    }

    fn object_header(&self, address: u64) -> Result<ObjectHeader, Hdf5Error> {
        ObjectHeader::read(&self.data, &self.superblock, address)
    }

    fn cursor_at(&self, address: u64) -> Result<Cursor<'_>, Hdf5Error> {
        Cursor::at(&self.data, self.superblock.resolve(address))
    }

    /// Raw bytes of a global heap object (variable-length data)
    fn global_heap_object(&self, collection: u64, index: u32) -> Result<&[u8], Hdf5Error> {
        let length_size = self.superblock.length_size;
        let mut cursor = self.cursor_at(collection)?;
        let start = cursor.position();
        cursor.expect_signature(b"GCOL")?;
        cursor.skip(4)?;
        let collection_size = cursor.uint(length_size)? as usize;
        let end = start.saturating_add(collection_size);
        let object_header = 2 + 2 + 4 + length_size;

        while cursor.position() + object_header <= end {
            let object_index = cursor.u16()?;

            if object_index == 0 {
                break;
            }

            cursor.skip(2 + 4)?;
            let size = cursor.uint(length_size)? as usize;
            let body = cursor.take(size)?;

            if u32::from(object_index) == index {
                return Ok(body);
            }

            cursor.skip(pad8(size) - size)?;
        }

        Err(Hdf5Error::malformed(
            "global heap",
            format!("object {} not found in collection at {}", index, collection),
        ))
    }
}

/// A group and the messages of its object header
#[derive(Debug, Clone)]
pub struct Group<'f> {
    file: &'f Hdf5File,
    path: String,
    header: ObjectHeader,
}

impl<'f> Group<'f> {
    fn from_header(file: &'f Hdf5File, path: String, header: ObjectHeader) -> Result<Self, Hdf5Error> {
        if header.has(MSG_DATA_LAYOUT) {
            return Err(Hdf5Error::WrongKind {
                path,
                expected: "group",
            });
        }

        Ok(Self { file, path, header })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Names and object header addresses of the group's hard links
    pub fn members(&self) -> Result<Vec<(String, u64)>, Hdf5Error> {
        let superblock = &self.file.superblock;

        if let Some(message) = self.header.first(MSG_SYMBOL_TABLE) {
            let table = SymbolTableMessage::parse(&message.data, superblock)?;
            let mut members = Vec::new();
            self.collect_btree(table, table.btree_address, 0, &mut members)?;
            return Ok(members);
        }

        if let Some(message) = self.header.first(MSG_LINK_INFO) {
            if dense_storage_heap(&message.data, superblock, 8)?.is_some() {
                return Err(Hdf5Error::unsupported(format!(
                    "dense link storage in group '{}'",
                    self.path
                )));
            }
        }

        let mut members = Vec::new();

        for message in self.header.messages_of(MSG_LINK) {
            let link = LinkMessage::parse(&message.data, superblock)?;

            if let Some(address) = link.address {
                members.push((link.name, address));
            }
        }

        Ok(members)
    }

    pub fn member_names(&self) -> Result<Vec<String>, Hdf5Error> {
        Ok(self.members()?.into_iter().map(|(name, _)| name).collect())
    }

    /// Child group at a slash-separated path relative to this group
    pub fn group(&self, path: &str) -> Result<Group<'f>, Hdf5Error> {
        let (full_path, header) = self.resolve(path)?;
        Group::from_header(self.file, full_path, header)
    }

    /// Dataset at a slash-separated path relative to this group
    pub fn dataset(&self, path: &str) -> Result<Dataset<'f>, Hdf5Error> {
        let (full_path, header) = self.resolve(path)?;
        Dataset::from_header(self.file, full_path, &header)
    }

    pub fn attribute(&self, name: &str) -> Result<Option<Attribute<'f>>, Hdf5Error> {
        let superblock = &self.file.superblock;

        for message in self.header.messages_of(MSG_ATTRIBUTE) {
            let attribute = AttributeMessage::parse(&message.data, superblock)?;

            if attribute.name == name {
                return Ok(Some(Attribute {
                    file: self.file,
                    message: attribute,
                }));
            }
        }

        if let Some(message) = self.header.first(MSG_ATTRIBUTE_INFO) {
            if dense_storage_heap(&message.data, superblock, 2)?.is_some() {
                return Err(Hdf5Error::unsupported(format!(
                    "dense attribute storage on '{}'",
                    self.path
                )));
            }
        }

        Ok(None)
    }

    fn resolve(&self, path: &str) -> Result<(String, ObjectHeader), Hdf5Error> {
        let mut current = self.clone();
        let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();

        let Some((last, parents)) = components.split_last() else {
            return Ok((self.path.clone(), self.header.clone()));
        };

        for component in parents {
            current = current.child_group(component)?;
        }

        let address = current.member_address(last)?;
        let header = self.file.object_header(address)?;
        Ok((join(&current.path, last), header))
    }

    fn child_group(&self, name: &str) -> Result<Group<'f>, Hdf5Error> {
        let address = self.member_address(name)?;
        let header = self.file.object_header(address)?;
        Group::from_header(self.file, join(&self.path, name), header)
    }

    fn member_address(&self, name: &str) -> Result<u64, Hdf5Error> {
        self.members()?
            .into_iter()
            .find(|(member, _)| member == name)
            .map(|(_, address)| address)
            .ok_or_else(|| Hdf5Error::not_found(join(&self.path, name)))
    }

    fn collect_btree(
        &self,
        table: SymbolTableMessage,
        node_address: u64,
        depth: usize,
        members: &mut Vec<(String, u64)>,
    ) -> Result<(), Hdf5Error> {
        if depth > MAX_BTREE_DEPTH {
            return Err(Hdf5Error::malformed("group B-tree", "tree is too deep"));
        }

        let superblock = &self.file.superblock;
        let mut cursor = self.file.cursor_at(node_address)?;
        cursor.expect_signature(b"TREE")?;
        let node_type = cursor.u8()?;

        if node_type != 0 {
            return Err(Hdf5Error::malformed(
                "group B-tree",
                format!("expected group node, found type {}", node_type),
            ));
        }

        let level = cursor.u8()?;
        let entries = cursor.u16()? as usize;
        cursor.skip(2 * superblock.offset_size)?;

        for _ in 0..entries {
            let _key = cursor.uint(superblock.length_size)?;
            let child = cursor.uint(superblock.offset_size)?;

            if level > 0 {
                self.collect_btree(table, child, depth + 1, members)?;
            } else {
                self.collect_symbol_node(table, child, members)?;
            }
        }

        Ok(())
    }

    fn collect_symbol_node(
        &self,
        table: SymbolTableMessage,
        address: u64,
        members: &mut Vec<(String, u64)>,
    ) -> Result<(), Hdf5Error> {
        let superblock = &self.file.superblock;
        let mut cursor = self.file.cursor_at(address)?;
        cursor.expect_signature(b"SNOD")?;
        cursor.skip(2)?;
        let count = cursor.u16()? as usize;

        for _ in 0..count {
            let name_offset = cursor.uint(superblock.offset_size)?;
            let header_address = cursor.uint(superblock.offset_size)?;
            // cache type, reserved, scratch pad
            cursor.skip(4 + 4 + 16)?;

            members.push((self.heap_name(table.heap_address, name_offset)?, header_address));
        }

        Ok(())
    }

    fn heap_name(&self, heap_address: u64, offset: u64) -> Result<String, Hdf5Error> {
        let superblock = &self.file.superblock;
        let mut cursor = self.file.cursor_at(heap_address)?;
        cursor.expect_signature(b"HEAP")?;
        cursor.skip(4)?;
        let _segment_size = cursor.uint(superblock.length_size)?;
        let _free_list = cursor.uint(superblock.length_size)?;
        let segment = cursor.uint(superblock.offset_size)?;

        let mut name = self.file.cursor_at(segment.wrapping_add(offset))?;
        name.c_string()
    }
}

/// A dataset's metadata; values are decoded on demand
#[derive(Debug, Clone)]
pub struct Dataset<'f> {
    file: &'f Hdf5File,
    path: String,
    datatype: Datatype,
    dataspace: Dataspace,
    layout: Layout,
}

impl<'f> Dataset<'f> {
    fn from_header(file: &'f Hdf5File, path: String, header: &ObjectHeader) -> Result<Self, Hdf5Error> {
        let superblock = &file.superblock;

        let Some(layout) = header.first(MSG_DATA_LAYOUT) else {
            return Err(Hdf5Error::WrongKind {
                path,
                expected: "dataset",
            });
        };

        let datatype = header
            .first(MSG_DATATYPE)
            .ok_or_else(|| Hdf5Error::malformed("dataset", format!("'{}' has no datatype", path)))?;
        let dataspace = header
            .first(MSG_DATASPACE)
            .ok_or_else(|| Hdf5Error::malformed("dataset", format!("'{}' has no dataspace", path)))?;

        if datatype.is_shared() || dataspace.is_shared() {
            return Err(Hdf5Error::unsupported(format!(
                "shared datatype or dataspace on '{}'",
                path
            )));
        }

        if header.has(MSG_FILTER_PIPELINE) {
            return Err(Hdf5Error::unsupported(format!(
                "filtered (compressed) dataset '{}'",
                path
            )));
        }

        Ok(Self {
            file,
            datatype: Datatype::parse(&datatype.data)?,
            dataspace: Dataspace::parse(&dataspace.data, superblock)?,
            layout: Layout::parse(&layout.data, superblock)?,
            path,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn shape(&self) -> Vec<usize> {
        self.dataspace.shape()
    }

    pub fn datatype(&self) -> &Datatype {
        &self.datatype
    }

    /// Decode every element as `f32`, row-major
    pub fn read_f32(&self) -> Result<Vec<f32>, Hdf5Error> {
        let count = self.dataspace.element_count()?;
        let raw = self.raw_bytes(count)?;
        decode_numeric(&self.datatype, &raw, count).map_err(|e| match e {
            Hdf5Error::Unsupported { feature } => {
                Hdf5Error::unsupported(format!("{} in dataset '{}'", feature, self.path))
            }
            other => other,
        })
    }

    fn raw_bytes(&self, count: usize) -> Result<Vec<u8>, Hdf5Error> {
        let superblock = &self.file.superblock;
        let element_size = self.datatype.element_size(superblock);
        if element_size == 0 {
            return Err(Hdf5Error::malformed(
                "dataset",
                format!("'{}' has a zero-sized element type", self.path),
            ));
        }

        let needed = count
            .checked_mul(element_size)
            .ok_or_else(|| Hdf5Error::malformed("dataset", "size overflow"))?;

        // No layout can hold more than the whole file
        if needed > self.file.data.len() {
            return Err(Hdf5Error::malformed(
                "dataset",
                format!(
                    "'{}' declares {} bytes but the file holds {}",
                    self.path,
                    needed,
                    self.file.data.len()
                ),
            ));
        }

        match &self.layout {
            Layout::Compact(bytes) => {
                if bytes.len() < needed {
                    return Err(Hdf5Error::malformed(
                        "dataset",
                        format!("compact data of '{}' is shorter than its shape", self.path),
                    ));
                }
                Ok(bytes[..needed].to_vec())
            }
            Layout::Contiguous { address } if superblock.is_undefined(*address) => {
                // Storage never allocated: the fill value is zero
                Ok(vec![0u8; needed])
            }
            Layout::Contiguous { address } => {
                let mut cursor = self.file.cursor_at(*address)?;
                Ok(cursor.take(needed)?.to_vec())
            }
            Layout::Chunked => Err(Hdf5Error::unsupported(format!(
                "chunked storage in dataset '{}'",
                self.path
            ))),
            Layout::Virtual => Err(Hdf5Error::unsupported(format!(
                "virtual dataset '{}'",
                self.path
            ))),
        }
    }
}

/// A decoded attribute message bound to its file (for global heap lookups)
#[derive(Debug, Clone)]
pub struct Attribute<'f> {
    file: &'f Hdf5File,
    message: AttributeMessage,
}

impl Attribute<'_> {
    pub fn name(&self) -> &str {
        &self.message.name
    }

    pub fn shape(&self) -> Vec<usize> {
        self.message.dataspace.shape()
    }

    /// All elements as strings (fixed-length or variable-length)
    pub fn read_strings(&self) -> Result<Vec<String>, Hdf5Error> {
        let count = self.message.dataspace.element_count()?;
        let raw = &self.message.raw;

        // Empty lists are often stored with a numeric type
        if count == 0 {
            return Ok(Vec::new());
        }

        match &self.message.datatype {
            Datatype::FixedString { size, space_padded } => {
                if *size == 0 {
                    return Err(Hdf5Error::malformed(
                        "attribute",
                        format!("'{}' has a zero-sized string type", self.message.name),
                    ));
                }

                Ok(raw
                    .chunks(*size)
                    .take(count)
                    .map(|chunk| {
                        let value = trim_nul(chunk);
                        if *space_padded {
                            value.trim_end_matches(' ').to_string()
                        } else {
                            value
                        }
                    })
                    .collect())
            }
            Datatype::VarLenString => {
                let superblock = &self.file.superblock;
                let element = self.message.datatype.element_size(superblock);
                let mut values = Vec::with_capacity(count.min(raw.len() / element));

                for chunk in raw.chunks(element).take(count) {
                    let mut cursor = Cursor::new(chunk);
                    let length = cursor.u32()? as usize;
                    let collection = cursor.uint(superblock.offset_size)?;
                    let index = cursor.u32()?;

                    if length == 0 || superblock.is_undefined(collection) {
                        values.push(String::new());
                        continue;
                    }

                    let bytes = self.file.global_heap_object(collection, index)?;
                    let bytes = &bytes[..length.min(bytes.len())];
                    values.push(String::from_utf8_lossy(bytes).into_owned());
                }

                Ok(values)
            }
            other => Err(Hdf5Error::WrongKind {
                path: format!("attribute '{}' ({})", self.message.name, other.describe()),
                expected: "string",
            }),
        }
    }

    /// First (or only) element as a string
    pub fn read_string(&self) -> Result<String, Hdf5Error> {
        self.read_strings()?
            .into_iter()
            .next()
            .ok_or_else(|| Hdf5Error::malformed("attribute", format!("'{}' is empty", self.name())))
    }
}

fn decode_numeric(datatype: &Datatype, raw: &[u8], count: usize) -> Result<Vec<f32>, Hdf5Error> {
    // Capacity follows the bytes actually present, never the declared shape
    let element_size = match *datatype {
        Datatype::Integer { size, .. } | Datatype::Float { size, .. } => size,
        _ => 0,
    };
    let mut values = Vec::with_capacity(match element_size {
        0 => 0,
        size => count.min(raw.len() / size),
    });

    match *datatype {
        Datatype::Float { size: 4, big_endian } => {
            for chunk in raw.chunks_exact(4) {
                let bytes = [chunk[0], chunk[1], chunk[2], chunk[3]];
                values.push(if big_endian {
                    f32::from_be_bytes(bytes)
                } else {
                    f32::from_le_bytes(bytes)
                });
            }
        }
        Datatype::Float { size: 8, big_endian } => {
            for chunk in raw.chunks_exact(8) {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(chunk);
                let value = if big_endian {
                    f64::from_be_bytes(bytes)
                } else {
                    f64::from_le_bytes(bytes)
                };
                values.push(value as f32);
            }
        }
        Datatype::Integer {
            size,
            signed,
            big_endian,
        } if matches!(size, 1 | 2 | 4 | 8) => {
            for chunk in raw.chunks_exact(size) {
                let mut bytes = [0u8; 8];

                if big_endian {
                    for (i, b) in chunk.iter().rev().enumerate() {
                        bytes[i] = *b;
                    }
                } else {
                    bytes[..size].copy_from_slice(chunk);
                }

                let unsigned = u64::from_le_bytes(bytes);
                let value = if signed {
                    let shift = 64 - size * 8;
                    ((unsigned << shift) as i64 >> shift) as f32
                } else {
                    unsigned as f32
                };
                values.push(value);
            }
        }
        ref other => {
            return Err(Hdf5Error::unsupported(format!(
                "{} element type",
                other.describe()
            )))
        }
    }

    Ok(values)
}

fn join(parent: &str, name: &str) -> String {
    if parent.ends_with('/') {
        format!("{}{}", parent, name)
    } else {
        format!("{}/{}", parent, name)
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixture::{AttrValue, GroupSpec, GroupStyle};
    use super::*;

    fn sample(style: GroupStyle) -> Hdf5File {
        let data = GroupSpec::new()
            .with_style(style)
            .string_attr("keras_version", "2.15.0")
            .attr(
                "model_config",
                AttrValue::VarLenString("{\"class_name\": \"Sequential\"}".to_string()),
            )
            .group(
                "model_weights",
                GroupSpec::new()
                    .with_style(style)
                    .strings_attr("layer_names", &["dense", "dropout"])
                    .group(
                        "dense",
                        GroupSpec::new()
                            .with_style(style)
                            .strings_attr("weight_names", &["dense/kernel:0", "dense/bias:0"])
                            .dataset_at("dense/kernel:0", &[2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0])
                            .dataset_at("dense/bias:0", &[3], vec![0.5, -0.5, 0.0]),
                    )
                    .group("dropout", GroupSpec::new().with_style(style)),
            )
            .build();

        Hdf5File::from_bytes(data).unwrap()
    }

    #[test]
    fn test_reads_symbol_table_groups() {
        let file = sample(GroupStyle::SymbolTable);
        let root = file.root().unwrap();

        assert_eq!(root.member_names().unwrap(), vec!["model_weights"]);

        let weights = root.group("model_weights").unwrap();
        assert_eq!(weights.path(), "/model_weights");
        assert_eq!(weights.member_names().unwrap(), vec!["dense", "dropout"]);
        assert!(weights.group("dropout").unwrap().member_names().unwrap().is_empty());
    }

    #[test]
    fn test_reads_link_message_groups() {
        let file = sample(GroupStyle::LinkMessages);
        let weights = file.root().unwrap().group("model_weights").unwrap();

        assert_eq!(weights.member_names().unwrap(), vec!["dense", "dropout"]);

        let names = weights
            .attribute("layer_names")
            .unwrap()
            .unwrap()
            .read_strings()
            .unwrap();
        assert_eq!(names, vec!["dense", "dropout"]);
    }

    #[test]
    fn test_reads_string_attributes() {
        let file = sample(GroupStyle::SymbolTable);
        let root = file.root().unwrap();

        let version = root.attribute("keras_version").unwrap().unwrap();
        assert_eq!(version.read_string().unwrap(), "2.15.0");
        assert!(version.shape().is_empty());

        let config = root.attribute("model_config").unwrap().unwrap();
        assert_eq!(config.read_string().unwrap(), "{\"class_name\": \"Sequential\"}");

        assert!(root.attribute("missing").unwrap().is_none());
    }

    #[test]
    fn test_reads_nested_dataset() {
        for style in [GroupStyle::SymbolTable, GroupStyle::LinkMessages] {
            let file = sample(style);
            let layer = file.root().unwrap().group("model_weights/dense").unwrap();
            let kernel = layer.dataset("dense/kernel:0").unwrap();

            assert_eq!(kernel.path(), "/model_weights/dense/dense/kernel:0");
            assert_eq!(kernel.shape(), vec![2, 3]);
            assert_eq!(kernel.read_f32().unwrap(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
            assert_eq!(
                layer.dataset("dense/bias:0").unwrap().read_f32().unwrap(),
                vec![0.5, -0.5, 0.0]
            );
        }
    }

    #[test]
    fn test_kind_and_missing_errors() {
        let file = sample(GroupStyle::SymbolTable);
        let root = file.root().unwrap();

        assert!(matches!(
            root.dataset("model_weights").unwrap_err(),
            Hdf5Error::WrongKind { .. }
        ));
        assert!(matches!(
            root.group("model_weights/dense/dense/kernel:0").unwrap_err(),
            Hdf5Error::WrongKind { .. }
        ));
        assert!(matches!(
            root.group("model_weights/conv").unwrap_err(),
            Hdf5Error::NotFound { path } if path == "/model_weights/conv"
        ));
    }

    #[test]
    fn test_truncated_file_fails_cleanly() {
        let mut data = GroupSpec::new().group("g", GroupSpec::new()).build();
        data.truncate(120);

        let result = Hdf5File::from_bytes(data).and_then(|f| f.root().map(|_| ()));
        assert!(result.is_err());
    }

    #[test]
    fn test_unallocated_dataset_reads_zero_fill() {
        let data = GroupSpec::new()
            .unallocated_dataset_at("weights/kernel:0", &[2, 3])
            .build();
        let file = Hdf5File::from_bytes(data).unwrap();
        let dataset = file.root().unwrap().dataset("weights/kernel:0").unwrap();

        assert_eq!(dataset.shape(), vec![2, 3]);
        assert_eq!(dataset.read_f32().unwrap(), vec![0.0; 6]);
    }

    #[test]
    fn test_unallocated_dataset_larger_than_file_is_malformed() {
        let data = GroupSpec::new()
            .unallocated_dataset_at("weights/kernel:0", &[1 << 20, 1 << 20])
            .build();
        let file = Hdf5File::from_bytes(data).unwrap();
        let dataset = file.root().unwrap().dataset("weights/kernel:0").unwrap();

        let err = dataset.read_f32().unwrap_err();
        assert!(
            matches!(err, Hdf5Error::Malformed { what: "dataset", .. }),
            "unexpected error: {err:?}"
        );
    }

    #[test]
    fn test_decode_capacity_follows_raw_bytes() {
        let raw = 2.0f32.to_le_bytes();
        let datatype = Datatype::Float {
            size: 4,
            big_endian: false,
        };

        let values = decode_numeric(&datatype, &raw, usize::MAX).unwrap();
        assert_eq!(values, vec![2.0]);
    }

    #[test]
    fn test_decode_signed_integers() {
        let raw = [0xFF, 0xFF, 0x02, 0x00];
        let datatype = Datatype::Integer {
            size: 2,
            signed: true,
            big_endian: false,
        };

        assert_eq!(decode_numeric(&datatype, &raw, 2).unwrap(), vec![-1.0, 2.0]);
    }

    #[test]
    fn test_decode_big_endian_float() {
        let raw = 1.5f32.to_be_bytes();
        let datatype = Datatype::Float {
            size: 4,
            big_endian: true,
        };

        assert_eq!(decode_numeric(&datatype, &raw, 1).unwrap(), vec![1.5]);
    }

    #[test]
    fn test_decode_rejects_strings() {
        let datatype = Datatype::FixedString {
            size: 4,
            space_padded: false,
        };

        assert!(decode_numeric(&datatype, b"abcd", 1).is_err());
    }

    #[test]
    fn test_join() {
        assert_eq!(join("/", "model_weights"), "/model_weights");
        assert_eq!(join("/model_weights", "dense"), "/model_weights/dense");
    }
}
