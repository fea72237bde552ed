//! Minimal HDF5 writer used to build test files in memory.
//!
//! Emits a version 0 superblock with 8-byte offsets and lengths. Groups are
//! written either the old way (symbol table, B-tree, local heap, version 1
//! object header) or the new way (link messages in a version 2 header).

use super::superblock::SIGNATURE;

const UNDEFINED: u64 = u64::MAX;
const SUPERBLOCK_SIZE: usize = 96;
const ROOT_ADDRESS_OFFSET: usize = 64;
const END_OF_FILE_OFFSET: usize = 40;
/// Little-endian IEEE 754 single precision
const FLOAT32: [u8; 20] = [
    0x11, 0x20, 0x1F, 0x00, 4, 0, 0, 0, 0, 0, 32, 0, 23, 8, 0, 23, 127, 0, 0, 0,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GroupStyle {
    SymbolTable,
    LinkMessages,
}

#[derive(Debug, Clone)]
pub(crate) enum AttrValue {
    FixedStrings(Vec<String>),
    FixedString(String),
    VarLenStrings(Vec<String>),
    VarLenString(String),
}

#[derive(Debug, Clone)]
pub(crate) enum Node {
    Group(GroupSpec),
    Dataset { shape: Vec<usize>, values: Vec<f32> },
    /// Contiguous dataset whose storage was never allocated
    Unallocated { shape: Vec<usize> },
}

#[derive(Debug, Clone)]
pub(crate) struct GroupSpec {
    style: GroupStyle,
    attributes: Vec<(String, AttrValue)>,
    members: Vec<(String, Node)>,
}

impl Default for GroupSpec {
    fn default() -> Self {
        Self::new()
    }
}

impl GroupSpec {
    pub fn new() -> Self {
        Self {
            style: GroupStyle::SymbolTable,
            attributes: Vec::new(),
            members: Vec::new(),
        }
    }

    pub fn with_style(mut self, style: GroupStyle) -> Self {
        self.style = style;
        self
    }

    pub fn attr(mut self, name: &str, value: AttrValue) -> Self {
        self.attributes.push((name.to_string(), value));
        self
    }

    pub fn string_attr(self, name: &str, value: &str) -> Self {
        self.attr(name, AttrValue::FixedString(value.to_string()))
    }

    pub fn strings_attr(self, name: &str, values: &[&str]) -> Self {
        self.attr(
            name,
            AttrValue::FixedStrings(values.iter().map(|v| v.to_string()).collect()),
        )
    }

    pub fn group(mut self, name: &str, group: GroupSpec) -> Self {
        self.members.push((name.to_string(), Node::Group(group)));
        self
    }

    pub fn dataset(mut self, name: &str, shape: &[usize], values: Vec<f32>) -> Self {
        assert_eq!(shape.iter().product::<usize>(), values.len());
        self.members.push((
            name.to_string(),
            Node::Dataset {
                shape: shape.to_vec(),
                values,
            },
        ));
        self
    }

    /// Dataset at a slash-separated path, creating intermediate groups
    pub fn dataset_at(self, path: &str, shape: &[usize], values: Vec<f32>) -> Self {
        assert_eq!(shape.iter().product::<usize>(), values.len());
        self.node_at(
            path,
            Node::Dataset {
                shape: shape.to_vec(),
                values,
            },
        )
    }

    /// Dataset with an undefined storage address. The shape is written as
    /// given and no data follows it.
    pub fn unallocated_dataset_at(self, path: &str, shape: &[usize]) -> Self {
        self.node_at(
            path,
            Node::Unallocated {
                shape: shape.to_vec(),
            },
        )
    }

    fn node_at(mut self, path: &str, node: Node) -> Self {
        match path.split_once('/') {
            None => {
                self.members.push((path.to_string(), node));
                self
            }
            Some((head, rest)) => {
                let existing = self.members.iter_mut().find_map(|(name, member)| match member {
                    Node::Group(group) if name.as_str() == head => Some(group),
                    _ => None,
                });

                match existing {
                    Some(group) => {
                        let updated = group.clone().node_at(rest, node);
                        *group = updated;
                        self
                    }
                    None => {
                        let style = self.style;
                        self.group(head, GroupSpec::new().with_style(style).node_at(rest, node))
                    }
                }
            }
        }
    }

    /// Serialize as the root group of a new file
    pub fn build(&self) -> Vec<u8> {
        let mut writer = Writer {
            buf: vec![0u8; SUPERBLOCK_SIZE],
        };
        let root = writer.write_group(self);
        writer.write_superblock(root);
        writer.buf
    }
}

struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn alloc(&mut self, bytes: &[u8]) -> u64 {
        let address = self.buf.len() as u64;
        self.buf.extend_from_slice(bytes);
        pad(&mut self.buf);
        address
    }

    fn write_superblock(&mut self, root: u64) {
        let mut sb = Vec::with_capacity(SUPERBLOCK_SIZE);
        sb.extend_from_slice(SIGNATURE);
        sb.extend_from_slice(&[0, 0, 0, 0, 0, 8, 8, 0]);
        sb.extend_from_slice(&4u16.to_le_bytes());
        sb.extend_from_slice(&16u16.to_le_bytes());
        sb.extend_from_slice(&0u32.to_le_bytes());
        sb.extend_from_slice(&0u64.to_le_bytes());
        sb.extend_from_slice(&UNDEFINED.to_le_bytes());
        sb.extend_from_slice(&0u64.to_le_bytes());
        sb.extend_from_slice(&UNDEFINED.to_le_bytes());
        sb.extend_from_slice(&0u64.to_le_bytes());
        sb.extend_from_slice(&root.to_le_bytes());
        sb.extend_from_slice(&[0u8; 24]);
        assert_eq!(sb.len(), SUPERBLOCK_SIZE);

        self.buf[..SUPERBLOCK_SIZE].copy_from_slice(&sb);
        let eof = (self.buf.len() as u64).to_le_bytes();
        self.buf[END_OF_FILE_OFFSET..END_OF_FILE_OFFSET + 8].copy_from_slice(&eof);
        debug_assert_eq!(
            &self.buf[ROOT_ADDRESS_OFFSET..ROOT_ADDRESS_OFFSET + 8],
            &root.to_le_bytes()
        );
    }

    fn write_node(&mut self, node: &Node) -> u64 {
        match node {
            Node::Group(group) => self.write_group(group),
            Node::Dataset { shape, values } => self.write_dataset(shape, values),
            Node::Unallocated { shape } => self.write_unallocated(shape),
        }
    }

    fn write_group(&mut self, group: &GroupSpec) -> u64 {
        let children: Vec<(String, u64)> = group
            .members
            .iter()
            .map(|(name, node)| (name.clone(), self.write_node(node)))
            .collect();

        match group.style {
            GroupStyle::SymbolTable => {
                let mut messages = vec![(0x11u16, self.symbol_table(&children))];
                for (name, value) in &group.attributes {
                    let message = self.attribute(name, value, 1);
                    messages.push((0x0C, message));
                }
                self.v1_header(&messages)
            }
            GroupStyle::LinkMessages => {
                let mut link_info = vec![0u8, 0u8];
                link_info.extend_from_slice(&UNDEFINED.to_le_bytes());
                link_info.extend_from_slice(&UNDEFINED.to_le_bytes());

                let mut messages = vec![(0x02u16, link_info)];
                for (name, address) in &children {
                    let mut link = vec![1u8, 0u8, name.len() as u8];
                    link.extend_from_slice(name.as_bytes());
                    link.extend_from_slice(&address.to_le_bytes());
                    messages.push((0x06, link));
                }
                for (name, value) in &group.attributes {
                    let message = self.attribute(name, value, 3);
                    messages.push((0x0C, message));
                }
                self.v2_header(&messages)
            }
        }
    }

    fn symbol_table(&mut self, children: &[(String, u64)]) -> Vec<u8> {
        let mut heap_data = vec![0u8; 8];
        let mut offsets = Vec::with_capacity(children.len());

        for (name, _) in children {
            offsets.push(heap_data.len() as u64);
            heap_data.extend_from_slice(name.as_bytes());
            heap_data.push(0);
            pad(&mut heap_data);
        }

        let segment = self.alloc(&heap_data);

        let mut heap = b"HEAP".to_vec();
        heap.extend_from_slice(&[0, 0, 0, 0]);
        heap.extend_from_slice(&(heap_data.len() as u64).to_le_bytes());
        heap.extend_from_slice(&UNDEFINED.to_le_bytes());
        heap.extend_from_slice(&segment.to_le_bytes());
        let heap_address = self.alloc(&heap);

        let mut tree = b"TREE".to_vec();
        tree.extend_from_slice(&[0, 0]);

        if children.is_empty() {
            tree.extend_from_slice(&0u16.to_le_bytes());
            tree.extend_from_slice(&UNDEFINED.to_le_bytes());
            tree.extend_from_slice(&UNDEFINED.to_le_bytes());
            tree.extend_from_slice(&0u64.to_le_bytes());
        } else {
            let mut node = b"SNOD".to_vec();
            node.extend_from_slice(&[1, 0]);
            node.extend_from_slice(&(children.len() as u16).to_le_bytes());
            for ((_, address), offset) in children.iter().zip(&offsets) {
                node.extend_from_slice(&offset.to_le_bytes());
                node.extend_from_slice(&address.to_le_bytes());
                node.extend_from_slice(&[0u8; 4 + 4 + 16]);
            }
            let node_address = self.alloc(&node);

            tree.extend_from_slice(&1u16.to_le_bytes());
            tree.extend_from_slice(&UNDEFINED.to_le_bytes());
            tree.extend_from_slice(&UNDEFINED.to_le_bytes());
            tree.extend_from_slice(&0u64.to_le_bytes());
            tree.extend_from_slice(&node_address.to_le_bytes());
            tree.extend_from_slice(&offsets[offsets.len() - 1].to_le_bytes());
        }

        let btree_address = self.alloc(&tree);

        let mut message = btree_address.to_le_bytes().to_vec();
        message.extend_from_slice(&heap_address.to_le_bytes());
        message
    }

    fn write_dataset(&mut self, shape: &[usize], values: &[f32]) -> u64 {
        let raw: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        let address = self.alloc(&raw);

        let datatype = FLOAT32.to_vec();

        let mut layout = vec![3u8, 1u8];
        layout.extend_from_slice(&address.to_le_bytes());
        layout.extend_from_slice(&(raw.len() as u64).to_le_bytes());

        self.v1_header(&[
            (0x01, dataspace(1, shape)),
            (0x03, datatype),
            (0x08, layout),
        ])
    }

    fn write_unallocated(&mut self, shape: &[usize]) -> u64 {
        let size = shape.iter().fold(4u64, |acc, dim| acc.saturating_mul(*dim as u64));

        let mut layout = vec![3u8, 1u8];
        layout.extend_from_slice(&UNDEFINED.to_le_bytes());
        layout.extend_from_slice(&size.to_le_bytes());

        self.v1_header(&[
            (0x01, dataspace(1, shape)),
            (0x03, FLOAT32.to_vec()),
            (0x08, layout),
        ])
    }

    fn attribute(&mut self, name: &str, value: &AttrValue, version: u8) -> Vec<u8> {
        let (datatype, dims, raw) = match value {
            AttrValue::FixedString(s) => {
                let (datatype, raw) = fixed_strings(std::slice::from_ref(s));
                (datatype, Vec::new(), raw)
            }
            AttrValue::FixedStrings(values) => {
                let (datatype, raw) = fixed_strings(values);
                (datatype, vec![values.len()], raw)
            }
            AttrValue::VarLenString(s) => {
                let raw = self.var_len_strings(std::slice::from_ref(s));
                (var_len_datatype(), Vec::new(), raw)
            }
            AttrValue::VarLenStrings(values) => {
                let raw = self.var_len_strings(values);
                (var_len_datatype(), vec![values.len()], raw)
            }
        };

        let dataspace_version = if version == 1 { 1 } else { 2 };
        let dataspace = dataspace(dataspace_version, &dims);

        let mut name_bytes = name.as_bytes().to_vec();
        name_bytes.push(0);

        let mut message = vec![version, 0];
        message.extend_from_slice(&(name_bytes.len() as u16).to_le_bytes());
        message.extend_from_slice(&(datatype.len() as u16).to_le_bytes());
        message.extend_from_slice(&(dataspace.len() as u16).to_le_bytes());

        if version == 3 {
            message.push(0);
        }

        for field in [&name_bytes, &datatype, &dataspace] {
            message.extend_from_slice(field);
            if version == 1 {
                pad(&mut message);
            }
        }

        message.extend_from_slice(&raw);
        message
    }

    /// Writes one global heap collection and returns the element references
    fn var_len_strings(&mut self, values: &[String]) -> Vec<u8> {
        let mut objects = Vec::new();

        for (i, value) in values.iter().enumerate() {
            objects.extend_from_slice(&((i + 1) as u16).to_le_bytes());
            objects.extend_from_slice(&1u16.to_le_bytes());
            objects.extend_from_slice(&0u32.to_le_bytes());
            objects.extend_from_slice(&(value.len() as u64).to_le_bytes());
            objects.extend_from_slice(value.as_bytes());
            pad(&mut objects);
        }

        let collection_size = 16 + objects.len() + 16;
        let mut collection = b"GCOL".to_vec();
        collection.extend_from_slice(&[1, 0, 0, 0]);
        collection.extend_from_slice(&(collection_size as u64).to_le_bytes());
        collection.extend_from_slice(&objects);
        // free space object
        collection.extend_from_slice(&0u16.to_le_bytes());
        collection.extend_from_slice(&[0u8; 6]);
        collection.extend_from_slice(&16u64.to_le_bytes());

        let address = self.alloc(&collection);

        let mut raw = Vec::with_capacity(values.len() * 16);
        for (i, value) in values.iter().enumerate() {
            raw.extend_from_slice(&(value.len() as u32).to_le_bytes());
            raw.extend_from_slice(&address.to_le_bytes());
            raw.extend_from_slice(&((i + 1) as u32).to_le_bytes());
        }
        raw
    }

    fn v1_header(&mut self, messages: &[(u16, Vec<u8>)]) -> u64 {
        let mut body = Vec::new();

        for (kind, data) in messages {
            let mut data = data.clone();
            pad(&mut data);
            body.extend_from_slice(&kind.to_le_bytes());
            body.extend_from_slice(&(data.len() as u16).to_le_bytes());
            body.extend_from_slice(&[0, 0, 0, 0]);
            body.extend_from_slice(&data);
        }

        let mut header = vec![1u8, 0u8];
        header.extend_from_slice(&(messages.len() as u16).to_le_bytes());
        header.extend_from_slice(&1u32.to_le_bytes());
        header.extend_from_slice(&(body.len() as u32).to_le_bytes());
        header.extend_from_slice(&[0u8; 4]);
        header.extend_from_slice(&body);
        self.alloc(&header)
    }

    fn v2_header(&mut self, messages: &[(u16, Vec<u8>)]) -> u64 {
        let mut body = Vec::new();

        for (kind, data) in messages {
            body.push(*kind as u8);
            body.extend_from_slice(&(data.len() as u16).to_le_bytes());
            body.push(0);
            body.extend_from_slice(data);
        }

        let mut header = b"OHDR".to_vec();
        header.extend_from_slice(&[2, 0x02]);
        header.extend_from_slice(&(body.len() as u32).to_le_bytes());
        header.extend_from_slice(&body);
        // checksum, not verified by the reader
        header.extend_from_slice(&[0u8; 4]);
        self.alloc(&header)
    }
}

fn fixed_strings(values: &[String]) -> (Vec<u8>, Vec<u8>) {
    let size = values.iter().map(|v| v.len()).max().unwrap_or(0).max(1);

    let mut datatype = vec![0x13, 0x01, 0, 0];
    datatype.extend_from_slice(&(size as u32).to_le_bytes());

    let mut raw = Vec::with_capacity(size * values.len());
    for value in values {
        raw.extend_from_slice(value.as_bytes());
        raw.resize(raw.len() + size - value.len(), 0);
    }

    (datatype, raw)
}

fn var_len_datatype() -> Vec<u8> {
    let mut datatype = vec![0x19, 0x01, 0x00, 0x00];
    datatype.extend_from_slice(&16u32.to_le_bytes());
    // base type: unsigned 8-bit integer
    datatype.extend_from_slice(&[0x10, 0, 0, 0]);
    datatype.extend_from_slice(&1u32.to_le_bytes());
    datatype.extend_from_slice(&0u16.to_le_bytes());
    datatype.extend_from_slice(&8u16.to_le_bytes());
    datatype
}

fn dataspace(version: u8, dims: &[usize]) -> Vec<u8> {
    let mut message = if version == 1 {
        vec![1, dims.len() as u8, 0, 0, 0, 0, 0, 0]
    } else {
        let kind = if dims.is_empty() { 0 } else { 1 };
        vec![2, dims.len() as u8, 0, kind]
    };

    for dim in dims {
        message.extend_from_slice(&(*dim as u64).to_le_bytes());
    }
    message
}

fn pad(buf: &mut Vec<u8>) {
    let padded = (buf.len() + 7) & !7;
    buf.resize(padded, 0);
}
