//! Container identity and the fixed-size TOC header.
//!
//! The header is exactly [`TOC_HEADER_SIZE`] bytes on disk, little-endian,
//! and self-describing: it declares its own size and the size of the
//! compression-block entries so a reader can reject a TOC built against a
//! different struct layout before touching anything else.

use std::fmt;
use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use uuid::Uuid;

use crate::chunk::COMPRESSED_BLOCK_ENTRY_SIZE;
use crate::error::{Error, Result};

pub const TOC_MAGIC: &[u8; 16] = b"-==--==--==--==-";
pub const TOC_HEADER_SIZE: usize = 144;

// ── Container identity ───────────────────────────────────────────────────────

/// Opaque 64-bit identifier for a whole container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ContainerId(u64);

impl ContainerId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

// ── Container flags ──────────────────────────────────────────────────────────

/// Bit set describing which optional container features are present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContainerFlags(u8);

impl ContainerFlags {
    pub const NONE: ContainerFlags = ContainerFlags(0);
    pub const COMPRESSED: ContainerFlags = ContainerFlags(1 << 0);
    pub const ENCRYPTED: ContainerFlags = ContainerFlags(1 << 1);
    pub const SIGNED: ContainerFlags = ContainerFlags(1 << 2);
    pub const INDEXED: ContainerFlags = ContainerFlags(1 << 3);

    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: ContainerFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: ContainerFlags) {
        self.0 |= other.0;
    }

    pub fn union(self, other: ContainerFlags) -> Self {
        Self(self.0 | other.0)
    }
}

// ── On-disk versions ─────────────────────────────────────────────────────────

/// TOC format versions. The on-disk layout is version-aware; the in-memory
/// [`crate::toc::TocResource`] is not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum TocVersion {
    /// First version with the optional directory index section.
    DirectoryIndex = 2,
    /// Added partition count/size; older TOCs imply a single unbounded partition.
    PartitionSize = 3,
    /// Added the perfect-hash seed table.
    PerfectHash = 4,
    /// Added the overflow list for chunks the seeds cannot place.
    PerfectHashWithOverflow = 5,
    /// Chunk meta hash shrank from 32 inline bytes to the 20-byte short hash.
    ReplaceChunkHashWithShortHash = 6,
}

impl TocVersion {
    pub const MIN_SUPPORTED: TocVersion = TocVersion::DirectoryIndex;
    pub const LATEST: TocVersion = TocVersion::ReplaceChunkHashWithShortHash;
}

// ── TOC header ───────────────────────────────────────────────────────────────

/// The fixed-size header at the start of every `.utoc` file.
#[derive(Debug, Clone, Default)]
pub struct TocHeader {
    pub version: u8,
    pub toc_entry_count: u32,
    pub toc_compressed_block_entry_count: u32,
    pub compression_method_name_count: u32,
    pub compression_method_name_length: u32,
    pub compression_block_size: u32,
    pub directory_index_size: u32,
    pub partition_count: u32,
    pub container_id: ContainerId,
    pub encryption_key_guid: Uuid,
    pub container_flags: ContainerFlags,
    pub toc_chunk_perfect_hash_seeds_count: u32,
    pub partition_size: u64,
    pub toc_chunks_without_perfect_hash_count: u32,
}

impl TocHeader {
    pub fn write_to<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(TOC_MAGIC)?;
        writer.write_u8(self.version)?;
        writer.write_u8(0)?;
        writer.write_u16::<LittleEndian>(0)?;
        writer.write_u32::<LittleEndian>(TOC_HEADER_SIZE as u32)?;
        writer.write_u32::<LittleEndian>(self.toc_entry_count)?;
        writer.write_u32::<LittleEndian>(self.toc_compressed_block_entry_count)?;
        writer.write_u32::<LittleEndian>(COMPRESSED_BLOCK_ENTRY_SIZE as u32)?;
        writer.write_u32::<LittleEndian>(self.compression_method_name_count)?;
        writer.write_u32::<LittleEndian>(self.compression_method_name_length)?;
        writer.write_u32::<LittleEndian>(self.compression_block_size)?;
        writer.write_u32::<LittleEndian>(self.directory_index_size)?;
        writer.write_u32::<LittleEndian>(self.partition_count)?;
        writer.write_u64::<LittleEndian>(self.container_id.value())?;
        writer.write_all(self.encryption_key_guid.as_bytes())?;
        writer.write_u8(self.container_flags.bits())?;
        writer.write_u8(0)?;
        writer.write_u16::<LittleEndian>(0)?;
        writer.write_u32::<LittleEndian>(self.toc_chunk_perfect_hash_seeds_count)?;
        writer.write_u64::<LittleEndian>(self.partition_size)?;
        writer.write_u32::<LittleEndian>(self.toc_chunks_without_perfect_hash_count)?;
        writer.write_u32::<LittleEndian>(0)?;
        for _ in 0..5 {
            writer.write_u64::<LittleEndian>(0)?;
        }
        Ok(())
    }

    /// Serialize to the exact on-disk byte image. This is also the input to
    /// container signing.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(TOC_HEADER_SIZE);
        self.write_to(&mut buf).expect("writing to a Vec cannot fail");
        debug_assert_eq!(buf.len(), TOC_HEADER_SIZE);
        buf
    }

    /// Parse and validate a header from its on-disk byte image.
    ///
    /// Magic, declared struct sizes and the supported version window are all
    /// checked here; each mismatch is a distinct `CorruptToc` error.
    pub fn read_from<R: Read>(mut reader: R) -> Result<Self> {
        let corrupt = |msg: &str| Error::CorruptToc(msg.to_string());
        let io_err = |e: io::Error| Error::CorruptToc(format!("truncated TOC header: {e}"));

        let mut magic = [0u8; 16];
        reader.read_exact(&mut magic).map_err(io_err)?;
        if &magic != TOC_MAGIC {
            return Err(corrupt("TOC header magic mismatch"));
        }

        let version = reader.read_u8().map_err(io_err)?;
        let _reserved0 = reader.read_u8().map_err(io_err)?;
        let _reserved1 = reader.read_u16::<LittleEndian>().map_err(io_err)?;

        let toc_header_size = reader.read_u32::<LittleEndian>().map_err(io_err)?;
        if toc_header_size != TOC_HEADER_SIZE as u32 {
            return Err(corrupt("TOC header size mismatch"));
        }

        let toc_entry_count = reader.read_u32::<LittleEndian>().map_err(io_err)?;
        let toc_compressed_block_entry_count = reader.read_u32::<LittleEndian>().map_err(io_err)?;
        let block_entry_size = reader.read_u32::<LittleEndian>().map_err(io_err)?;
        if block_entry_size != COMPRESSED_BLOCK_ENTRY_SIZE as u32 {
            return Err(corrupt("TOC compressed block entry size mismatch"));
        }

        let compression_method_name_count = reader.read_u32::<LittleEndian>().map_err(io_err)?;
        let compression_method_name_length = reader.read_u32::<LittleEndian>().map_err(io_err)?;
        let compression_block_size = reader.read_u32::<LittleEndian>().map_err(io_err)?;
        let directory_index_size = reader.read_u32::<LittleEndian>().map_err(io_err)?;
        let partition_count = reader.read_u32::<LittleEndian>().map_err(io_err)?;
        let container_id = ContainerId::new(reader.read_u64::<LittleEndian>().map_err(io_err)?);

        let mut guid = [0u8; 16];
        reader.read_exact(&mut guid).map_err(io_err)?;
        let encryption_key_guid = Uuid::from_bytes(guid);

        let container_flags = ContainerFlags::from_bits(reader.read_u8().map_err(io_err)?);
        let _reserved3 = reader.read_u8().map_err(io_err)?;
        let _reserved4 = reader.read_u16::<LittleEndian>().map_err(io_err)?;

        let toc_chunk_perfect_hash_seeds_count = reader.read_u32::<LittleEndian>().map_err(io_err)?;
        let partition_size = reader.read_u64::<LittleEndian>().map_err(io_err)?;
        let toc_chunks_without_perfect_hash_count =
            reader.read_u32::<LittleEndian>().map_err(io_err)?;
        let _reserved7 = reader.read_u32::<LittleEndian>().map_err(io_err)?;
        for _ in 0..5 {
            let _reserved8 = reader.read_u64::<LittleEndian>().map_err(io_err)?;
        }

        if version < TocVersion::MIN_SUPPORTED as u8 {
            return Err(corrupt("outdated TOC header version"));
        }
        if version > TocVersion::LATEST as u8 {
            return Err(corrupt("too new TOC header version"));
        }

        Ok(Self {
            version,
            toc_entry_count,
            toc_compressed_block_entry_count,
            compression_method_name_count,
            compression_method_name_length,
            compression_block_size,
            directory_index_size,
            partition_count,
            container_id,
            encryption_key_guid,
            container_flags,
            toc_chunk_perfect_hash_seeds_count,
            partition_size,
            toc_chunks_without_perfect_hash_count,
        })
    }
}
