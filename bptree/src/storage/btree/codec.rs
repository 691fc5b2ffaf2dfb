//! Wire encoding of tree nodes.
//!
//! All integers are big-endian.
//!
//! ```text
//! tag:   u8   0 = leaf, 1 = interior
//! count: i32  number of entries
//! leaf entry:     key_len: u32, key, value_len: u32, value
//! interior entry: key_len: u32, key, hash_len: u32, child hash (32 bytes)
//! ```
//!
//! An interior node's encoding embeds its children's content hashes, so a
//! node can only be encoded once all of its children have been hashed.

use std::cmp::Ordering;

use crate::bytes::{bytes_to_int32, int32_to_bytes};
use crate::config::TreeConfig;
use crate::storage::btree::interior::{Child, InteriorEntry, InteriorNode};
use crate::storage::btree::leaf::LeafNode;
use crate::storage::btree::node::{
    Comparator, HASH_SIZE, Hash, Node, NodeState, NodeType, Record, TreeNode,
};

/// Size of the tag and count prefix.
const HEADER_SIZE: usize = 1 + 4;

/// Largest entry count the signed 32-bit count field can carry.
pub const MAX_ENTRY_COUNT: usize = 0x7FFF_FFFF;

/// Largest key or value the unsigned 32-bit length prefix can carry.
pub const MAX_LENGTH: usize = 0xFFFF_FFFF;

/// Errors from decoding stored node bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// A length field points past the end of the buffer.
    Truncated { needed: usize, remaining: usize },
    /// Bytes left over after the last entry.
    TrailingBytes(usize),
    /// Unknown node kind tag.
    InvalidNodeType(u8),
    /// Entry count is negative, or zero for an interior node.
    InvalidCount(i32),
    /// Entry count exceeds the configured fan-out.
    CapacityExceeded { count: usize, max: usize },
    /// A key does not have the declared key length.
    KeyLength { expected: usize, actual: usize },
    /// A child hash is not `HASH_SIZE` bytes.
    HashLength(usize),
    /// Entry `index` is not ordered after its predecessor.
    OutOfOrder { index: usize },
    /// The node is valid but of the wrong kind for where it was found.
    UnexpectedNodeType { expected: NodeType, actual: NodeType },
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Truncated { needed, remaining } => {
                write!(f, "truncated node: needed {needed} bytes, {remaining} remaining")
            }
            Self::TrailingBytes(n) => write!(f, "{n} trailing bytes after node"),
            Self::InvalidNodeType(tag) => write!(f, "invalid node type tag: {tag}"),
            Self::InvalidCount(count) => write!(f, "invalid entry count: {count}"),
            Self::CapacityExceeded { count, max } => {
                write!(f, "entry count {count} exceeds fan-out {max}")
            }
            Self::KeyLength { expected, actual } => {
                write!(f, "key length {actual}, expected {expected}")
            }
            Self::HashLength(len) => {
                write!(f, "child hash length {len}, expected {HASH_SIZE}")
            }
            Self::OutOfOrder { index } => write!(f, "entry {index} is out of order"),
            Self::UnexpectedNodeType { expected, actual } => {
                write!(f, "expected {expected:?} node, found {actual:?}")
            }
        }
    }
}

impl std::error::Error for CodecError {}

/// Encode a leaf.
#[must_use]
pub fn encode_leaf(leaf: &LeafNode) -> Vec<u8> {
    let records = leaf.records();
    let size = records
        .iter()
        .map(|r| 8 + r.key.len() + r.value.len())
        .sum::<usize>();

    let mut buf = Vec::with_capacity(HEADER_SIZE + size);
    buf.push(NodeType::Leaf as u8);
    buf.extend_from_slice(&count_prefix(records.len()));
    for record in records {
        put_bytes(&mut buf, &record.key);
        put_bytes(&mut buf, &record.value);
    }
    buf
}

/// Encode an interior node. `child_hashes[i]` is the content hash of the
/// child of entry `i`.
#[must_use]
pub fn encode_interior(node: &InteriorNode, child_hashes: &[Hash]) -> Vec<u8> {
    let entries = node.entries();
    assert_eq!(
        entries.len(),
        child_hashes.len(),
        "one hash is needed per interior entry"
    );

    let size = entries
        .iter()
        .map(|e| 8 + e.key.len() + HASH_SIZE)
        .sum::<usize>();

    let mut buf = Vec::with_capacity(HEADER_SIZE + size);
    buf.push(NodeType::Interior as u8);
    buf.extend_from_slice(&count_prefix(entries.len()));
    for (entry, hash) in entries.iter().zip(child_hashes) {
        put_bytes(&mut buf, &entry.key);
        put_bytes(&mut buf, hash);
    }
    buf
}

/// Entry count field. Fan-outs are validated against [`MAX_ENTRY_COUNT`], so
/// a count that does not fit is a broken invariant.
fn count_prefix(count: usize) -> [u8; 4] {
    match i32::try_from(count) {
        Ok(count) => int32_to_bytes(count),
        Err(_) => panic!("entry count {count} does not fit the count field"),
    }
}

/// Length field of a key or value. Keys are checked against the configured
/// length and values against [`MAX_LENGTH`] before they enter the tree.
fn length_prefix(len: usize) -> [u8; 4] {
    match u32::try_from(len) {
        Ok(len) => len.to_be_bytes(),
        Err(_) => panic!("length {len} does not fit the length prefix"),
    }
}

fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&length_prefix(bytes.len()));
    buf.extend_from_slice(bytes);
}

/// Decode stored bytes into a node.
///
/// The node comes back clean with no cached hash, no parent and, for
/// interior nodes, every child as [`Child::Stored`]. The caller attaches the
/// cache state and links it into the tree.
pub fn decode(data: &[u8], config: &TreeConfig, cmp: Comparator) -> Result<Node, CodecError> {
    let mut reader = Reader::new(data);

    let tag = reader.u8()?;
    let node_type = NodeType::try_from(tag).map_err(CodecError::InvalidNodeType)?;
    let raw_count = reader.i32()?;

    let (max, min) = match node_type {
        NodeType::Leaf => (config.max_leaf_records, 0),
        NodeType::Interior => (config.max_interior_entries, 1),
    };
    let count = usize::try_from(raw_count)
        .ok()
        .filter(|&count| count >= min)
        .ok_or(CodecError::InvalidCount(raw_count))?;
    if count > max {
        return Err(CodecError::CapacityExceeded { count, max });
    }

    let node = match node_type {
        NodeType::Leaf => {
            let mut records: Vec<Record> = Vec::with_capacity(count);
            for index in 0..count {
                let key = reader.key(config.key_length)?;
                if records
                    .last()
                    .is_some_and(|prev| cmp(&prev.key, key) != Ordering::Less)
                {
                    return Err(CodecError::OutOfOrder { index });
                }
                let value = reader.bytes()?;
                records.push(Record {
                    key: key.to_vec(),
                    value: value.to_vec(),
                });
            }
            Node::Leaf(LeafNode::from_records(
                records,
                config.max_leaf_records,
                NodeState::default(),
            ))
        }
        NodeType::Interior => {
            let mut entries: Vec<InteriorEntry> = Vec::with_capacity(count + 1);
            for index in 0..count {
                let key = reader.key(config.key_length)?;
                // The last key is the node's upper bound, not a routing key.
                let routed = index + 1 < count;
                if routed
                    && entries
                        .last()
                        .is_some_and(|prev| cmp(&prev.key, key) != Ordering::Less)
                {
                    return Err(CodecError::OutOfOrder { index });
                }
                let hash_bytes = reader.bytes()?;
                let hash: Hash = hash_bytes
                    .try_into()
                    .map_err(|_| CodecError::HashLength(hash_bytes.len()))?;
                entries.push(InteriorEntry {
                    key: key.to_vec(),
                    child: Child::Stored(hash),
                });
            }
            Node::Interior(InteriorNode::from_entries(
                entries,
                config.max_interior_entries,
                NodeState::default(),
            ))
        }
    };

    reader.finish()?;
    debug_assert_eq!(node.count(), count);
    Ok(node)
}

/// Bounds-checked cursor over encoded bytes.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    const fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    const fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if n > self.remaining() {
            return Err(CodecError::Truncated {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        let raw = self.take(4)?;
        Ok(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn i32(&mut self) -> Result<i32, CodecError> {
        let raw = self.take(4)?;
        bytes_to_int32(raw).ok_or(CodecError::Truncated {
            needed: 4,
            remaining: raw.len(),
        })
    }

    /// A `u32` length prefix followed by that many bytes.
    fn bytes(&mut self) -> Result<&'a [u8], CodecError> {
        // A length beyond the address space can never be satisfied.
        let len = usize::try_from(self.u32()?).unwrap_or(usize::MAX);
        self.take(len)
    }

    fn key(&mut self, key_length: usize) -> Result<&'a [u8], CodecError> {
        let key = self.bytes()?;
        if key.len() != key_length {
            return Err(CodecError::KeyLength {
                expected: key_length,
                actual: key.len(),
            });
        }
        Ok(key)
    }

    fn finish(self) -> Result<(), CodecError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(CodecError::TrailingBytes(n)),
        }
    }
}
