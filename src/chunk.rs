//! Chunk-level binary records: IDs, packed offset/length pairs, compression
//! block entries and per-chunk metadata.
//!
//! All of these are fixed-size and bit-packed; the accessors are the only
//! sanctioned way to touch the packed bytes.

use std::fmt;
use std::io::{self, Read, Write};

pub const CHUNK_ID_SIZE: usize = 12;
pub const OFFSET_AND_LENGTH_SIZE: usize = 10;
pub const COMPRESSED_BLOCK_ENTRY_SIZE: usize = 12;
pub const CHUNK_HASH_SIZE: usize = 20;

/// Largest value a 40-bit packed offset or length can hold.
pub const MAX_PACKED_VALUE: u64 = (1 << 40) - 1;

// ── Chunk type ───────────────────────────────────────────────────────────────

/// Content category embedded in the last byte of a [`ChunkId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ChunkType {
    Invalid = 0,
    PackageData = 1,
    BulkData = 2,
    OptionalBulkData = 3,
    MemoryMappedBulkData = 4,
    ScriptObjects = 5,
    ContainerHeader = 6,
}

impl ChunkType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => ChunkType::PackageData,
            2 => ChunkType::BulkData,
            3 => ChunkType::OptionalBulkData,
            4 => ChunkType::MemoryMappedBulkData,
            5 => ChunkType::ScriptObjects,
            6 => ChunkType::ContainerHeader,
            _ => ChunkType::Invalid,
        }
    }
}

impl fmt::Display for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChunkType::Invalid => "Invalid",
            ChunkType::PackageData => "PackageData",
            ChunkType::BulkData => "BulkData",
            ChunkType::OptionalBulkData => "OptionalBulkData",
            ChunkType::MemoryMappedBulkData => "MemoryMappedBulkData",
            ChunkType::ScriptObjects => "ScriptObjects",
            ChunkType::ContainerHeader => "ContainerHeader",
        };
        f.write_str(name)
    }
}

// ── Chunk ID ─────────────────────────────────────────────────────────────────

/// Opaque 12-byte chunk identifier: 8-byte id, 2-byte index, one reserved
/// byte and a trailing type tag. Compared and hashed as raw bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkId([u8; CHUNK_ID_SIZE]);

impl ChunkId {
    pub fn new(raw_id: u64, index: u16, chunk_type: ChunkType) -> Self {
        let mut bytes = [0u8; CHUNK_ID_SIZE];
        bytes[0..8].copy_from_slice(&raw_id.to_le_bytes());
        bytes[8..10].copy_from_slice(&index.to_le_bytes());
        bytes[11] = chunk_type as u8;
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; CHUNK_ID_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; CHUNK_ID_SIZE] {
        &self.0
    }

    pub fn raw_id(&self) -> u64 {
        u64::from_le_bytes(self.0[0..8].try_into().unwrap())
    }

    pub fn index(&self) -> u16 {
        u16::from_le_bytes(self.0[8..10].try_into().unwrap())
    }

    pub fn chunk_type(&self) -> ChunkType {
        ChunkType::from_u8(self.0[11])
    }

    pub fn is_valid(&self) -> bool {
        self.0 != [0u8; CHUNK_ID_SIZE]
    }

    pub fn write_to<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(&self.0)
    }

    pub fn read_from<R: Read>(mut reader: R) -> io::Result<Self> {
        let mut bytes = [0u8; CHUNK_ID_SIZE];
        reader.read_exact(&mut bytes)?;
        Ok(Self(bytes))
    }
}

impl fmt::Debug for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkId({})", hex::encode(self.0))
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

// ── Offset and length ────────────────────────────────────────────────────────

/// Packed (offset, length) pair into the virtual chunk-data space.
/// Both values are 5-byte big-endian, so the cap is 2^40 - 1.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct OffsetAndLength([u8; OFFSET_AND_LENGTH_SIZE]);

impl OffsetAndLength {
    pub fn new(offset: u64, length: u64) -> Self {
        let mut value = Self([0u8; OFFSET_AND_LENGTH_SIZE]);
        value.set_offset(offset);
        value.set_length(length);
        value
    }

    pub fn offset(&self) -> u64 {
        read_be40(&self.0[0..5])
    }

    pub fn length(&self) -> u64 {
        read_be40(&self.0[5..10])
    }

    pub fn set_offset(&mut self, offset: u64) {
        debug_assert!(offset <= MAX_PACKED_VALUE);
        write_be40(&mut self.0[0..5], offset);
    }

    pub fn set_length(&mut self, length: u64) {
        debug_assert!(length <= MAX_PACKED_VALUE);
        write_be40(&mut self.0[5..10], length);
    }

    pub fn write_to<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(&self.0)
    }

    pub fn read_from<R: Read>(mut reader: R) -> io::Result<Self> {
        let mut bytes = [0u8; OFFSET_AND_LENGTH_SIZE];
        reader.read_exact(&mut bytes)?;
        Ok(Self(bytes))
    }
}

impl fmt::Debug for OffsetAndLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OffsetAndLength {{ offset: {}, length: {} }}",
            self.offset(),
            self.length()
        )
    }
}

fn read_be40(bytes: &[u8]) -> u64 {
    (u64::from(bytes[0]) << 32)
        | (u64::from(bytes[1]) << 24)
        | (u64::from(bytes[2]) << 16)
        | (u64::from(bytes[3]) << 8)
        | u64::from(bytes[4])
}

fn write_be40(bytes: &mut [u8], value: u64) {
    bytes[0] = (value >> 32) as u8;
    bytes[1] = (value >> 24) as u8;
    bytes[2] = (value >> 16) as u8;
    bytes[3] = (value >> 8) as u8;
    bytes[4] = value as u8;
}

// ── Compression block entry ──────────────────────────────────────────────────

/// One compression block in the TOC block table, bit-packed into 12 bytes:
/// 40-bit physical offset, 24-bit compressed size, 24-bit uncompressed size,
/// 8-bit index into the compression-method name table.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct CompressedBlockEntry([u8; COMPRESSED_BLOCK_ENTRY_SIZE]);

impl CompressedBlockEntry {
    pub fn new(offset: u64, compressed_size: u32, uncompressed_size: u32, method_index: u8) -> Self {
        let mut entry = Self([0u8; COMPRESSED_BLOCK_ENTRY_SIZE]);
        entry.set_offset(offset);
        entry.set_compressed_size(compressed_size);
        entry.set_uncompressed_size(uncompressed_size);
        entry.set_compression_method_index(method_index);
        entry
    }

    /// Physical offset into the partitioned `.ucas` space.
    pub fn offset(&self) -> u64 {
        u64::from(self.0[0])
            | (u64::from(self.0[1]) << 8)
            | (u64::from(self.0[2]) << 16)
            | (u64::from(self.0[3]) << 24)
            | (u64::from(self.0[4]) << 32)
    }

    pub fn compressed_size(&self) -> u32 {
        u32::from(self.0[5]) | (u32::from(self.0[6]) << 8) | (u32::from(self.0[7]) << 16)
    }

    pub fn uncompressed_size(&self) -> u32 {
        u32::from(self.0[8]) | (u32::from(self.0[9]) << 8) | (u32::from(self.0[10]) << 16)
    }

    pub fn compression_method_index(&self) -> u8 {
        self.0[11]
    }

    pub fn set_offset(&mut self, offset: u64) {
        debug_assert!(offset <= MAX_PACKED_VALUE);
        self.0[0] = offset as u8;
        self.0[1] = (offset >> 8) as u8;
        self.0[2] = (offset >> 16) as u8;
        self.0[3] = (offset >> 24) as u8;
        self.0[4] = (offset >> 32) as u8;
    }

    pub fn set_compressed_size(&mut self, size: u32) {
        debug_assert!(size < 1 << 24);
        self.0[5] = size as u8;
        self.0[6] = (size >> 8) as u8;
        self.0[7] = (size >> 16) as u8;
    }

    pub fn set_uncompressed_size(&mut self, size: u32) {
        debug_assert!(size < 1 << 24);
        self.0[8] = size as u8;
        self.0[9] = (size >> 8) as u8;
        self.0[10] = (size >> 16) as u8;
    }

    pub fn set_compression_method_index(&mut self, index: u8) {
        self.0[11] = index;
    }

    pub fn write_to<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(&self.0)
    }

    pub fn read_from<R: Read>(mut reader: R) -> io::Result<Self> {
        let mut bytes = [0u8; COMPRESSED_BLOCK_ENTRY_SIZE];
        reader.read_exact(&mut bytes)?;
        Ok(Self(bytes))
    }
}

impl fmt::Debug for CompressedBlockEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CompressedBlockEntry {{ offset: {}, compressed: {}, uncompressed: {}, method: {} }}",
            self.offset(),
            self.compressed_size(),
            self.uncompressed_size(),
            self.compression_method_index()
        )
    }
}

// ── Chunk hash ───────────────────────────────────────────────────────────────

/// 160-bit content hash of a chunk's uncompressed bytes (truncated BLAKE3).
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct ChunkHash([u8; CHUNK_HASH_SIZE]);

impl ChunkHash {
    pub fn from_blake3(data: &[u8]) -> Self {
        let full = blake3::hash(data);
        let mut bytes = [0u8; CHUNK_HASH_SIZE];
        bytes.copy_from_slice(&full.as_bytes()[..CHUNK_HASH_SIZE]);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; CHUNK_HASH_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; CHUNK_HASH_SIZE] {
        &self.0
    }
}

impl fmt::Debug for ChunkHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkHash({})", hex::encode(self.0))
    }
}

impl fmt::Display for ChunkHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

// ── Chunk meta ───────────────────────────────────────────────────────────────

/// Per-chunk meta flags stored alongside the content hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChunkMetaFlags(u8);

impl ChunkMetaFlags {
    pub const NONE: ChunkMetaFlags = ChunkMetaFlags(0);
    pub const COMPRESSED: ChunkMetaFlags = ChunkMetaFlags(1 << 0);
    pub const MEMORY_MAPPED: ChunkMetaFlags = ChunkMetaFlags(1 << 1);

    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: ChunkMetaFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: ChunkMetaFlags) {
        self.0 |= other.0;
    }
}

/// Optional per-chunk metadata record (content hash + flags).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChunkMeta {
    pub chunk_hash: ChunkHash,
    pub flags: ChunkMetaFlags,
}

impl ChunkMeta {
    pub const SERIALIZED_SIZE: usize = CHUNK_HASH_SIZE + 1;
    /// Pre-short-hash layout: 32 inline hash bytes + flags.
    pub const LEGACY_SERIALIZED_SIZE: usize = 32 + 1;

    pub fn write_to<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(self.chunk_hash.as_bytes())?;
        writer.write_all(&[self.flags.bits()])
    }

    pub fn read_from<R: Read>(mut reader: R) -> io::Result<Self> {
        let mut hash = [0u8; CHUNK_HASH_SIZE];
        reader.read_exact(&mut hash)?;
        let mut flags = [0u8; 1];
        reader.read_exact(&mut flags)?;
        Ok(Self {
            chunk_hash: ChunkHash::from_bytes(hash),
            flags: ChunkMetaFlags::from_bits(flags[0]),
        })
    }

    /// Upconvert one record from the legacy 33-byte layout: the old 32-byte
    /// hash is truncated to the current 20-byte short hash.
    pub fn read_legacy_from<R: Read>(mut reader: R) -> io::Result<Self> {
        let mut old_hash = [0u8; 32];
        reader.read_exact(&mut old_hash)?;
        let mut flags = [0u8; 1];
        reader.read_exact(&mut flags)?;
        let mut hash = [0u8; CHUNK_HASH_SIZE];
        hash.copy_from_slice(&old_hash[..CHUNK_HASH_SIZE]);
        Ok(Self {
            chunk_hash: ChunkHash::from_bytes(hash),
            flags: ChunkMetaFlags::from_bits(flags[0]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn chunk_id_fields() {
        let id = ChunkId::new(0x0123_4567_89AB_CDEF, 42, ChunkType::BulkData);
        assert_eq!(id.raw_id(), 0x0123_4567_89AB_CDEF);
        assert_eq!(id.index(), 42);
        assert_eq!(id.chunk_type(), ChunkType::BulkData);
        assert!(id.is_valid());
        assert!(!ChunkId::from_bytes([0u8; CHUNK_ID_SIZE]).is_valid());
    }

    #[test]
    fn chunk_id_serialization_is_stable() {
        let id = ChunkId::new(7, 1, ChunkType::PackageData);
        let mut buf = Vec::new();
        id.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), CHUNK_ID_SIZE);
        assert_eq!(ChunkId::read_from(&buf[..]).unwrap(), id);
    }

    #[test]
    fn legacy_meta_upconverts_by_truncation() {
        let mut legacy = Vec::new();
        legacy.extend_from_slice(&(0u8..32).collect::<Vec<_>>());
        legacy.push(ChunkMetaFlags::COMPRESSED.bits());

        let meta = ChunkMeta::read_legacy_from(&legacy[..]).unwrap();
        assert_eq!(&meta.chunk_hash.as_bytes()[..], &legacy[..20]);
        assert!(meta.flags.contains(ChunkMetaFlags::COMPRESSED));
    }

    proptest! {
        #[test]
        fn offset_and_length_roundtrip(offset in 0u64..=MAX_PACKED_VALUE,
                                       length in 0u64..=MAX_PACKED_VALUE) {
            let ol = OffsetAndLength::new(offset, length);
            prop_assert_eq!(ol.offset(), offset);
            prop_assert_eq!(ol.length(), length);

            let mut buf = Vec::new();
            ol.write_to(&mut buf).unwrap();
            let parsed = OffsetAndLength::read_from(&buf[..]).unwrap();
            prop_assert_eq!(parsed.offset(), offset);
            prop_assert_eq!(parsed.length(), length);
        }

        #[test]
        fn block_entry_roundtrip(offset in 0u64..=MAX_PACKED_VALUE,
                                 compressed in 0u32..(1 << 24),
                                 uncompressed in 0u32..(1 << 24),
                                 method in 0u8..=255) {
            let entry = CompressedBlockEntry::new(offset, compressed, uncompressed, method);
            prop_assert_eq!(entry.offset(), offset);
            prop_assert_eq!(entry.compressed_size(), compressed);
            prop_assert_eq!(entry.uncompressed_size(), uncompressed);
            prop_assert_eq!(entry.compression_method_index(), method);

            let mut buf = Vec::new();
            entry.write_to(&mut buf).unwrap();
            let parsed = CompressedBlockEntry::read_from(&buf[..]).unwrap();
            prop_assert_eq!(parsed, entry);
        }
    }
}
