//! Container writer.
//!
//! [`ContainerWriter`] accepts chunks one at a time, splits them into
//! compression-block-sized pieces, compresses each piece (keeping the raw
//! bytes whenever compression does not shrink it), pads the on-disk bytes to
//! the AES block size, optionally encrypts them, and stripes the blocks
//! across size-capped `.ucas` partitions.  `finalize` builds the
//! perfect-hash tables (permuting the chunk arrays into slot order), the
//! directory index, and the `.utoc` file.
//!
//! Chunk data is laid out in a virtual uncompressed space where every chunk
//! starts on a compression-block boundary, so a block never spans two
//! chunks and block index `offset / block_size` holds for every chunk.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::info;
use uuid::Uuid;

use crate::chunk::{
    ChunkHash, ChunkId, ChunkMeta, ChunkMetaFlags, CompressedBlockEntry, OffsetAndLength,
    MAX_PACKED_VALUE,
};
use crate::codec::{get_codec, is_method_none, DEFAULT_COMPRESSION_LEVEL, METHOD_NONE};
use crate::crypto::{align_to_aes, encrypt_in_place, AesKey};
use crate::directory::{build_directory_index_buffer, DirectoryIndex, DirectoryIndexEntry};
use crate::error::{Error, Result};
use crate::header::{ContainerFlags, ContainerId};
use crate::reader::{partition_file_path, toc_file_path};
use crate::signing::{sha1_digest, Sha1Digest, SigningKeyPair};
use crate::toc::{build_perfect_hash, ContainerWriteSettings, TocResource};

/// Default uncompressed compression-block size: 64 KiB.
pub const DEFAULT_COMPRESSION_BLOCK_SIZE: u32 = 64 * 1024;

// ── Settings ─────────────────────────────────────────────────────────────────

/// Configuration for [`ContainerWriter::create`].
#[derive(Debug, Clone, Default)]
pub struct ContainerSettings {
    pub container_id: ContainerId,
    pub container_flags: ContainerFlags,
    pub encryption_key_guid: Uuid,
    pub encryption_key: Option<AesKey>,
    pub signing_key: Option<SigningKeyPair>,
    pub compression_block_size: u32,
    pub compression_level: i32,
    /// Cap on each `.ucas` partition; 0 means a single unbounded partition.
    pub max_partition_size: u64,
}

impl ContainerSettings {
    pub fn new() -> Self {
        Self {
            compression_block_size: DEFAULT_COMPRESSION_BLOCK_SIZE,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            ..Self::default()
        }
    }
}

/// Counters returned by [`ContainerWriter::finalize`].
#[derive(Debug, Clone)]
pub struct ContainerSummary {
    pub toc_size: u64,
    pub chunk_count: u32,
    pub compressed_block_count: u32,
    pub partition_count: u32,
}

// ── Writer ───────────────────────────────────────────────────────────────────

struct PendingEntry {
    id: ChunkId,
    name: Option<String>,
    offset_length: OffsetAndLength,
    meta: ChunkMeta,
}

pub struct ContainerWriter {
    base_path: PathBuf,
    settings: ContainerSettings,
    partition_cap: u64,
    partitions: Vec<BufWriter<File>>,
    entries: Vec<PendingEntry>,
    seen_ids: HashSet<ChunkId>,
    compression_blocks: Vec<CompressedBlockEntry>,
    block_hashes: Vec<Sha1Digest>,
    /// Index 0 is the "None" sentinel, matching the TOC convention.
    compression_methods: Vec<String>,
    method_indices: HashMap<String, u8>,
    /// Cursor in the virtual uncompressed chunk-data space.
    uncompressed_cursor: u64,
    /// Cursor in the physical partitioned `.ucas` space.
    physical_cursor: u64,
}

impl ContainerWriter {
    pub fn create<P: AsRef<Path>>(base: P, settings: ContainerSettings) -> Result<Self> {
        if settings.compression_block_size == 0
            || u64::from(settings.compression_block_size) > (1 << 24) - 1
        {
            return Err(Error::InvalidParameter(
                "compression block size must be between 1 byte and 16 MiB - 1".into(),
            ));
        }
        if settings.container_flags.contains(ContainerFlags::ENCRYPTED)
            && settings.encryption_key.is_none()
        {
            return Err(Error::InvalidParameter(
                "container is flagged Encrypted but no encryption key was given".into(),
            ));
        }
        if settings.container_flags.contains(ContainerFlags::SIGNED)
            && settings.signing_key.is_none()
        {
            return Err(Error::InvalidParameter(
                "container is flagged Signed but no signing key was given".into(),
            ));
        }
        if settings.max_partition_size != 0
            && settings.max_partition_size < align_to_aes(u64::from(settings.compression_block_size))
        {
            return Err(Error::InvalidParameter(
                "max partition size is smaller than one compression block".into(),
            ));
        }

        let partition_cap = if settings.max_partition_size == 0 {
            u64::MAX
        } else {
            settings.max_partition_size
        };

        let base_path = base.as_ref().to_owned();
        let mut writer = Self {
            base_path,
            settings,
            partition_cap,
            partitions: Vec::new(),
            entries: Vec::new(),
            seen_ids: HashSet::new(),
            compression_blocks: Vec::new(),
            block_hashes: Vec::new(),
            compression_methods: vec![METHOD_NONE.to_string()],
            method_indices: HashMap::new(),
            uncompressed_cursor: 0,
            physical_cursor: 0,
        };
        writer.open_partition(0)?;
        Ok(writer)
    }

    fn open_partition(&mut self, partition_index: u32) -> Result<()> {
        debug_assert_eq!(self.partitions.len(), partition_index as usize);
        let path = partition_file_path(&self.base_path, partition_index);
        let file = File::create(&path).map_err(|e| Error::file_open(&path, &e))?;
        self.partitions.push(BufWriter::new(file));
        Ok(())
    }

    fn method_index(&mut self, method: &str) -> Result<u8> {
        if let Some(&index) = self.method_indices.get(method) {
            return Ok(index);
        }
        if self.compression_methods.len() > u8::MAX as usize {
            return Err(Error::InvalidParameter(
                "too many distinct compression methods (max 255)".into(),
            ));
        }
        let index = self.compression_methods.len() as u8;
        self.compression_methods.push(method.to_string());
        self.method_indices.insert(method.to_string(), index);
        Ok(index)
    }

    /// Append one chunk.  `name` feeds the directory index of an `Indexed`
    /// container; `method` names the compression codec ("None" stores the
    /// chunk verbatim).
    pub fn append(
        &mut self,
        id: ChunkId,
        name: Option<&str>,
        data: &[u8],
        method: &str,
    ) -> Result<()> {
        if !self.seen_ids.insert(id) {
            return Err(Error::InvalidParameter(format!("duplicate chunk id {id}")));
        }
        if data.len() as u64 > MAX_PACKED_VALUE {
            return Err(Error::InvalidParameter("chunk exceeds 2^40 - 1 bytes".into()));
        }
        if !is_method_none(method) {
            // Resolve up front so an unknown method fails before any bytes land.
            get_codec(method).map_err(|e| Error::InvalidParameter(e.to_string()))?;
        }

        let block_size = self.settings.compression_block_size as usize;
        let chunk_offset = self.uncompressed_cursor;
        let mut any_compressed = false;

        for piece in data.chunks(block_size) {
            let compressed = if is_method_none(method) {
                None
            } else {
                let codec = get_codec(method).map_err(|e| Error::Write(e.to_string()))?;
                let candidate = codec
                    .compress(piece, self.settings.compression_level)
                    .map_err(|e| Error::Write(format!("compression failed: {e}")))?;
                // Incompressible pieces are stored verbatim under method 0.
                (candidate.len() < piece.len()).then_some(candidate)
            };

            let (stored, method_idx) = match compressed {
                Some(bytes) => {
                    any_compressed = true;
                    (bytes, self.method_index(method)?)
                }
                None => (piece.to_vec(), 0u8),
            };

            self.write_block(&stored, piece.len() as u32, method_idx)?;
        }

        let mut flags = ChunkMetaFlags::NONE;
        if any_compressed {
            flags.insert(ChunkMetaFlags::COMPRESSED);
        }
        self.entries.push(PendingEntry {
            id,
            name: name.map(str::to_owned),
            offset_length: OffsetAndLength::new(chunk_offset, data.len() as u64),
            meta: ChunkMeta {
                chunk_hash: ChunkHash::from_blake3(data),
                flags,
            },
        });

        self.uncompressed_cursor =
            align_up(chunk_offset + data.len() as u64, u64::from(self.settings.compression_block_size));
        Ok(())
    }

    fn write_block(&mut self, stored: &[u8], uncompressed_size: u32, method_idx: u8) -> Result<()> {
        let aligned_size = align_to_aes(stored.len() as u64);

        // A block never straddles a partition boundary; skip to the next
        // partition when the current one cannot take the whole block.
        let used_in_partition = self.physical_cursor % self.partition_cap;
        if used_in_partition + aligned_size > self.partition_cap && used_in_partition != 0 {
            let next_partition = self.physical_cursor / self.partition_cap + 1;
            self.physical_cursor = next_partition * self.partition_cap;
        }
        if self.physical_cursor + aligned_size - 1 > MAX_PACKED_VALUE {
            return Err(Error::Write("container exceeds the 2^40 byte offset space".into()));
        }

        let partition_index = (self.physical_cursor / self.partition_cap) as usize;
        while self.partitions.len() <= partition_index {
            self.open_partition(self.partitions.len() as u32)?;
        }

        let mut on_disk = stored.to_vec();
        on_disk.resize(aligned_size as usize, 0);
        if let Some(key) = &self.settings.encryption_key {
            if self
                .settings
                .container_flags
                .contains(ContainerFlags::ENCRYPTED)
            {
                encrypt_in_place(key, &mut on_disk)
                    .map_err(|e| Error::Write(format!("encryption failed: {e}")))?;
            }
        }

        if self
            .settings
            .container_flags
            .contains(ContainerFlags::SIGNED)
        {
            self.block_hashes.push(sha1_digest(&on_disk));
        }

        self.compression_blocks.push(CompressedBlockEntry::new(
            self.physical_cursor,
            stored.len() as u32,
            uncompressed_size,
            method_idx,
        ));

        self.partitions[partition_index]
            .write_all(&on_disk)
            .map_err(|e| Error::Write(format!("failed writing chunk data: {e}")))?;
        self.physical_cursor += aligned_size;
        Ok(())
    }

    /// Flush all partitions, build the perfect-hash tables and directory
    /// index, and write the TOC.  Consumes the writer.
    pub fn finalize(mut self) -> Result<ContainerSummary> {
        for partition in &mut self.partitions {
            partition
                .flush()
                .map_err(|e| Error::Write(format!("failed flushing partition: {e}")))?;
            partition
                .get_ref()
                .sync_all()
                .map_err(|e| Error::Write(format!("failed syncing partition: {e}")))?;
        }

        let input_ids: Vec<ChunkId> = self.entries.iter().map(|entry| entry.id).collect();
        let tables = build_perfect_hash(&input_ids);

        // Permute the parallel chunk arrays into perfect-hash slot order.
        let count = self.entries.len();
        let mut chunk_ids = vec![ChunkId::from_bytes([0u8; 12]); count];
        let mut chunk_offset_lengths = vec![OffsetAndLength::default(); count];
        let mut chunk_metas = vec![ChunkMeta::default(); count];
        let mut named_entries: Vec<DirectoryIndexEntry> = Vec::new();
        for (input_index, entry) in self.entries.iter().enumerate() {
            let slot = tables.permutation[input_index] as usize;
            chunk_ids[slot] = entry.id;
            chunk_offset_lengths[slot] = entry.offset_length;
            chunk_metas[slot] = entry.meta;
            if let Some(name) = &entry.name {
                named_entries.push(DirectoryIndexEntry {
                    name: name.clone(),
                    toc_entry_index: slot as u32,
                });
            }
        }

        let mut directory_index_buffer = Vec::new();
        if self
            .settings
            .container_flags
            .contains(ContainerFlags::INDEXED)
            && !named_entries.is_empty()
        {
            named_entries.sort_by(|a, b| a.name.cmp(&b.name));
            directory_index_buffer = build_directory_index_buffer(
                &DirectoryIndex {
                    entries: named_entries,
                },
                self.settings
                    .encryption_key
                    .as_ref()
                    .filter(|_| {
                        self.settings
                            .container_flags
                            .contains(ContainerFlags::ENCRYPTED)
                    }),
            )?;
        }

        let mut resource = TocResource {
            chunk_ids,
            chunk_offset_lengths,
            chunk_perfect_hash_seeds: tables.seeds,
            chunk_indices_without_perfect_hash: tables.indices_without_perfect_hash,
            compression_blocks: std::mem::take(&mut self.compression_blocks),
            compression_methods: std::mem::take(&mut self.compression_methods),
            chunk_block_signatures: std::mem::take(&mut self.block_hashes),
            directory_index_buffer,
            chunk_metas,
            ..TocResource::default()
        };

        let toc_path = toc_file_path(&self.base_path);
        let toc_size = TocResource::write(
            &toc_path,
            &mut resource,
            self.settings.compression_block_size,
            self.settings.max_partition_size,
            &ContainerWriteSettings {
                container_id: self.settings.container_id,
                encryption_key_guid: self.settings.encryption_key_guid,
                container_flags: self.settings.container_flags,
                signing_key: self.settings.signing_key.as_ref(),
            },
        )?;

        let summary = ContainerSummary {
            toc_size,
            chunk_count: resource.header.toc_entry_count,
            compressed_block_count: resource.header.toc_compressed_block_entry_count,
            partition_count: resource.header.partition_count,
        };
        info!(
            "wrote container '{}': {} chunks, {} blocks, {} partitions, TOC {} bytes",
            self.base_path.display(),
            summary.chunk_count,
            summary.compressed_block_count,
            summary.partition_count,
            summary.toc_size,
        );
        Ok(summary)
    }
}

fn align_up(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}
