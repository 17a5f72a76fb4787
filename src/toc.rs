//! TOC resource: serialization and deserialization of the `.utoc` file.
//!
//! # Reader
//! [`TocResource::read`] validates the header, then reads the remainder of
//! the file as one contiguous span sized from the read options and walks it
//! section by section.  The on-disk walk is version-aware; the in-memory
//! resource is not: older layouts (missing partition fields, missing
//! perfect-hash tables, 32-byte chunk hashes) are normalized while reading.
//!
//! # Writer
//! [`TocResource::write`] emits the sections in fixed order: header, chunk
//! IDs, offset/length pairs, perfect-hash tables, compression blocks, method
//! names, optional signature block, optional directory index, chunk metas.
//! A partially written TOC is deleted on any mid-write failure.
//!
//! # Chunk lookup
//! The seeded FNV-1a perfect hash places every chunk at its TOC slot, with a
//! linear overflow list for chunks the seeds cannot place.  Lookup of an
//! unknown ID is "not found", never a wrong entry.

use std::fs::File;
use std::io::{Read, Seek, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, error};
use uuid::Uuid;

use crate::chunk::{
    ChunkHash, ChunkId, ChunkMeta, ChunkMetaFlags, ChunkType, CompressedBlockEntry,
    OffsetAndLength, CHUNK_ID_SIZE, COMPRESSED_BLOCK_ENTRY_SIZE, OFFSET_AND_LENGTH_SIZE,
};
use crate::codec::{is_method_none, METHOD_NONE};
use crate::error::{Error, Result};
use crate::header::{ContainerFlags, ContainerId, TocHeader, TocVersion, TOC_HEADER_SIZE};
use crate::signing::{
    create_container_signature, validate_container_signature, Sha1Digest, SigningKeyPair,
    VerifyKey, SHA1_DIGEST_SIZE,
};

/// Fixed width of one ANSI compression-method name on disk.
pub const COMPRESSION_METHOD_NAME_LEN: usize = 32;

// ── Read options ─────────────────────────────────────────────────────────────

/// Which optional trailing TOC sections to load.
#[derive(Debug, Clone, Copy, Default)]
pub struct TocReadOptions {
    pub with_directory_index: bool,
    pub with_toc_meta: bool,
}

impl TocReadOptions {
    pub fn all() -> Self {
        Self {
            with_directory_index: true,
            with_toc_meta: true,
        }
    }

    pub fn minimal() -> Self {
        Self::default()
    }
}

// ── Write settings ───────────────────────────────────────────────────────────

/// Container-level settings baked into the TOC header at write time.
pub struct ContainerWriteSettings<'a> {
    pub container_id: ContainerId,
    pub encryption_key_guid: Uuid,
    pub container_flags: ContainerFlags,
    pub signing_key: Option<&'a SigningKeyPair>,
}

// ── TOC resource ─────────────────────────────────────────────────────────────

/// Fully deserialized `.utoc` contents.  Immutable after construction; the
/// reader engine shares it freely across threads without locking.
#[derive(Debug, Default)]
pub struct TocResource {
    pub header: TocHeader,
    /// Raw on-disk header image, kept for signature validation.
    pub header_bytes: Vec<u8>,
    pub chunk_ids: Vec<ChunkId>,
    pub chunk_offset_lengths: Vec<OffsetAndLength>,
    pub chunk_perfect_hash_seeds: Vec<i32>,
    pub chunk_indices_without_perfect_hash: Vec<u32>,
    pub compression_blocks: Vec<CompressedBlockEntry>,
    /// Index 0 is always the "None" sentinel; on-disk names start at index 1.
    pub compression_methods: Vec<String>,
    pub chunk_block_signatures: Vec<Sha1Digest>,
    pub toc_signature: Vec<u8>,
    pub block_signature: Vec<u8>,
    pub directory_index_buffer: Vec<u8>,
    pub chunk_metas: Vec<ChunkMeta>,
}

// ── Perfect hash ─────────────────────────────────────────────────────────────

/// Seeded FNV-1a over the 12 chunk-id bytes.  Seed 0 selects the standard
/// FNV offset basis; negative seeds never reach this function (they encode a
/// direct slot instead).
pub fn hash_chunk_id_with_seed(seed: i32, id: &ChunkId) -> u64 {
    let mut hash: u64 = if seed != 0 {
        seed as u64
    } else {
        0xcbf2_9ce4_8422_2325
    };
    for &byte in id.as_bytes() {
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3) ^ u64::from(byte);
    }
    hash
}

/// Output of [`build_perfect_hash`]: the seed table, the overflow list
/// (post-permutation indices) and the permutation mapping input order to
/// TOC slot.
#[derive(Debug, Default)]
pub struct PerfectHashTables {
    pub seeds: Vec<i32>,
    pub indices_without_perfect_hash: Vec<u32>,
    /// `permutation[input_index] == toc_slot`
    pub permutation: Vec<u32>,
}

const MAX_SEED_ATTEMPTS: i32 = 100_000;

/// Build the perfect-hash tables for a set of chunk IDs.
///
/// Buckets are processed largest-first.  Multi-entry buckets search for a
/// seed that maps every member to a distinct free slot; single-entry buckets
/// take any free slot via the negative-seed direct encoding; buckets that
/// exhaust the seed budget fall back to the linear overflow list.
pub fn build_perfect_hash(chunk_ids: &[ChunkId]) -> PerfectHashTables {
    let count = chunk_ids.len();
    if count == 0 {
        return PerfectHashTables::default();
    }
    assert!(count <= i32::MAX as usize, "chunk count exceeds seed encoding");

    let mut buckets: Vec<Vec<u32>> = vec![Vec::new(); count];
    for (index, id) in chunk_ids.iter().enumerate() {
        let bucket = (hash_chunk_id_with_seed(0, id) % count as u64) as usize;
        buckets[bucket].push(index as u32);
    }

    let mut bucket_order: Vec<usize> = (0..count).filter(|&b| !buckets[b].is_empty()).collect();
    bucket_order.sort_by_key(|&b| std::cmp::Reverse(buckets[b].len()));

    let mut seeds = vec![0i32; count];
    let mut slot_taken = vec![false; count];
    let mut permutation = vec![u32::MAX; count];
    let mut overflow_members: Vec<u32> = Vec::new();
    let mut free_cursor = 0usize;

    let mut scratch: Vec<usize> = Vec::new();
    for &bucket in &bucket_order {
        let members = &buckets[bucket];

        if members.len() == 1 {
            while slot_taken[free_cursor] {
                free_cursor += 1;
            }
            let slot = free_cursor;
            slot_taken[slot] = true;
            permutation[members[0] as usize] = slot as u32;
            seeds[bucket] = -(slot as i32) - 1;
            continue;
        }

        let mut placed = false;
        'seed_search: for seed in 1..=MAX_SEED_ATTEMPTS {
            scratch.clear();
            for &member in members {
                let slot = (hash_chunk_id_with_seed(seed, &chunk_ids[member as usize])
                    % count as u64) as usize;
                if slot_taken[slot] || scratch.contains(&slot) {
                    continue 'seed_search;
                }
                scratch.push(slot);
            }
            for (&member, &slot) in members.iter().zip(scratch.iter()) {
                slot_taken[slot] = true;
                permutation[member as usize] = slot as u32;
            }
            seeds[bucket] = seed;
            placed = true;
            break;
        }
        if !placed {
            overflow_members.extend_from_slice(members);
        }
    }

    // Chunks the seeds could not place take the remaining free slots and are
    // found through the overflow list at lookup time.
    let mut indices_without_perfect_hash = Vec::with_capacity(overflow_members.len());
    for member in overflow_members {
        while slot_taken[free_cursor] {
            free_cursor += 1;
        }
        let slot = free_cursor;
        slot_taken[slot] = true;
        permutation[member as usize] = slot as u32;
        indices_without_perfect_hash.push(slot as u32);
    }

    debug_assert!(permutation.iter().all(|&slot| slot != u32::MAX));

    PerfectHashTables {
        seeds,
        indices_without_perfect_hash,
        permutation,
    }
}

// ── Chunk info projection ────────────────────────────────────────────────────

/// Inspection record for one TOC entry.  A pure projection over loaded TOC
/// state; no I/O.
#[derive(Debug, Clone)]
pub struct ChunkInfo {
    pub id: ChunkId,
    pub chunk_type: ChunkType,
    pub chunk_hash: ChunkHash,
    pub file_name: String,
    pub has_valid_file_name: bool,
    pub is_compressed: bool,
    pub is_memory_mapped: bool,
    /// The container compresses, but this entry is stored uncompressed.
    pub force_uncompressed: bool,
    pub offset: u64,
    pub size: u64,
    pub offset_on_disk: u64,
    pub num_compressed_blocks: u32,
    pub compressed_size: u64,
    pub partition_index: u32,
}

fn align_up(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

impl TocResource {
    /// Perfect-hash chunk lookup with overflow fallback; linear scan for
    /// pre-perfect-hash containers.  Unknown IDs return `None`.
    pub fn entry_index(&self, id: &ChunkId) -> Option<u32> {
        let count = self.chunk_ids.len();
        if count == 0 {
            return None;
        }

        let seed_count = self.chunk_perfect_hash_seeds.len();
        if seed_count != 0 {
            let seed_index = (hash_chunk_id_with_seed(0, id) % seed_count as u64) as usize;
            let seed = self.chunk_perfect_hash_seeds[seed_index];
            if seed != 0 {
                let slot = if seed < 0 {
                    let direct = (-(i64::from(seed)) - 1) as u64;
                    if direct >= count as u64 {
                        return self.find_in_overflow(id);
                    }
                    direct as usize
                } else {
                    (hash_chunk_id_with_seed(seed, id) % count as u64) as usize
                };
                if self.chunk_ids[slot] == *id {
                    return Some(slot as u32);
                }
            }
            return self.find_in_overflow(id);
        }

        self.chunk_ids.iter().position(|c| c == id).map(|i| i as u32)
    }

    fn find_in_overflow(&self, id: &ChunkId) -> Option<u32> {
        self.chunk_indices_without_perfect_hash
            .iter()
            .copied()
            .find(|&index| self.chunk_ids[index as usize] == *id)
    }

    pub fn offset_and_length(&self, id: &ChunkId) -> Option<OffsetAndLength> {
        self.entry_index(id)
            .map(|index| self.chunk_offset_lengths[index as usize])
    }

    /// Block indices covering the byte range `[offset, offset + size)` of the
    /// virtual chunk-data space.  `size` must be non-zero.
    pub fn block_range(&self, offset: u64, size: u64) -> (usize, usize) {
        let block_size = u64::from(self.header.compression_block_size);
        let first = (offset / block_size) as usize;
        let last = ((align_up(offset + size, block_size) - 1) / block_size) as usize;
        (first, last)
    }

    /// Build the inspection record for one TOC entry index.
    pub fn chunk_info(&self, index: u32) -> Result<ChunkInfo> {
        let i = index as usize;
        if i >= self.chunk_ids.len() {
            return Err(Error::InvalidParameter(format!(
                "invalid TOC entry index {index}"
            )));
        }

        let meta = self.chunk_metas.get(i).copied().unwrap_or_default();
        let offset_length = &self.chunk_offset_lengths[i];
        let container_compressed = self
            .header
            .container_flags
            .contains(ContainerFlags::COMPRESSED);

        let id = self.chunk_ids[i];
        let is_compressed = meta.flags.contains(ChunkMetaFlags::COMPRESSED);
        let offset = offset_length.offset();
        let size = offset_length.length();

        let mut info = ChunkInfo {
            id,
            chunk_type: id.chunk_type(),
            chunk_hash: meta.chunk_hash,
            file_name: format!("<{}>", id.chunk_type()),
            has_valid_file_name: false,
            is_compressed,
            is_memory_mapped: meta.flags.contains(ChunkMetaFlags::MEMORY_MAPPED),
            force_uncompressed: container_compressed && !is_compressed,
            offset,
            size,
            offset_on_disk: 0,
            num_compressed_blocks: 0,
            compressed_size: 0,
            partition_index: 0,
        };

        if size == 0 {
            return Ok(info);
        }

        let (first_block, last_block) = self.block_range(offset, size);
        info.num_compressed_blocks = (last_block - first_block + 1) as u32;
        info.offset_on_disk = self.compression_blocks[first_block].offset();
        info.partition_index =
            (self.compression_blocks[first_block].offset() / self.header.partition_size) as u32;
        for block in &self.compression_blocks[first_block..=last_block] {
            info.compressed_size += u64::from(block.compressed_size());
        }
        Ok(info)
    }

    // ── Deserialization ──────────────────────────────────────────────────────

    /// Read a `.utoc` file.  `enforce` carries the public key when signature
    /// checking is on; in that case a container that is not signed, or whose
    /// signatures do not validate, is a hard failure.
    pub fn read(
        toc_path: &Path,
        options: TocReadOptions,
        enforce: Option<&VerifyKey>,
    ) -> Result<TocResource> {
        let mut file =
            File::open(toc_path).map_err(|e| Error::file_open(toc_path, &e))?;
        let file_size = file
            .metadata()
            .map_err(|e| Error::file_open(toc_path, &e))?
            .len();

        let mut header_bytes = vec![0u8; TOC_HEADER_SIZE];
        file.read_exact(&mut header_bytes)
            .map_err(|e| Error::CorruptToc(format!("failed to read TOC header: {e}")))?;
        let mut header = TocHeader::read_from(&header_bytes[..])?;

        let entry_count = header.toc_entry_count as u64;
        let block_count = header.toc_compressed_block_entry_count as u64;

        let meta_entry_size =
            if header.version >= TocVersion::ReplaceChunkHashWithShortHash as u8 {
                ChunkMeta::SERIALIZED_SIZE as u64
            } else {
                ChunkMeta::LEGACY_SERIALIZED_SIZE as u64
            };

        let total_toc_size = file_size
            .checked_sub(TOC_HEADER_SIZE as u64)
            .ok_or_else(|| Error::CorruptToc("TOC file shorter than its header".into()))?;
        let toc_meta_size = entry_count * meta_entry_size;
        let directory_index_size = u64::from(header.directory_index_size);
        let default_toc_size = total_toc_size
            .checked_sub(directory_index_size + toc_meta_size)
            .ok_or_else(|| Error::CorruptToc("TOC sections exceed file size".into()))?;

        // Meta data sits at the very end of the TOC file, after the
        // directory index, so requesting it implies reading everything.
        let toc_size = if options.with_toc_meta {
            total_toc_size
        } else if options.with_directory_index {
            default_toc_size + directory_index_size
        } else {
            default_toc_size
        };

        let mut buffer = vec![0u8; toc_size as usize];
        file.read_exact(&mut buffer)
            .map_err(|e| Error::CorruptToc(format!("failed to read TOC data: {e}")))?;
        drop(file);

        let mut resource = TocResource {
            header_bytes,
            ..TocResource::default()
        };
        let mut cursor = SectionCursor::new(&buffer);

        // Chunk IDs
        let ids = cursor.take(entry_count as usize * CHUNK_ID_SIZE)?;
        resource.chunk_ids = ids
            .chunks_exact(CHUNK_ID_SIZE)
            .map(|raw| ChunkId::from_bytes(raw.try_into().unwrap()))
            .collect();

        // Chunk offsets
        let offsets = cursor.take(entry_count as usize * OFFSET_AND_LENGTH_SIZE)?;
        resource.chunk_offset_lengths = offsets
            .chunks_exact(OFFSET_AND_LENGTH_SIZE)
            .map(|mut raw| OffsetAndLength::read_from(&mut raw).unwrap())
            .collect();

        // Chunk perfect hash map
        let mut perfect_hash_seeds_count = 0usize;
        let mut chunks_without_perfect_hash_count = 0usize;
        if header.version >= TocVersion::PerfectHashWithOverflow as u8 {
            perfect_hash_seeds_count = header.toc_chunk_perfect_hash_seeds_count as usize;
            chunks_without_perfect_hash_count =
                header.toc_chunks_without_perfect_hash_count as usize;
        } else if header.version >= TocVersion::PerfectHash as u8 {
            perfect_hash_seeds_count = header.toc_chunk_perfect_hash_seeds_count as usize;
        }
        if perfect_hash_seeds_count > 0 {
            let mut raw = cursor.take(perfect_hash_seeds_count * 4)?;
            resource.chunk_perfect_hash_seeds = (0..perfect_hash_seeds_count)
                .map(|_| raw.read_i32::<LittleEndian>().unwrap())
                .collect();
        }
        if chunks_without_perfect_hash_count > 0 {
            let mut raw = cursor.take(chunks_without_perfect_hash_count * 4)?;
            resource.chunk_indices_without_perfect_hash = (0..chunks_without_perfect_hash_count)
                .map(|_| raw.read_u32::<LittleEndian>().unwrap())
                .collect();
        }

        // Compression blocks
        let blocks = cursor.take(block_count as usize * COMPRESSED_BLOCK_ENTRY_SIZE)?;
        resource.compression_blocks = blocks
            .chunks_exact(COMPRESSED_BLOCK_ENTRY_SIZE)
            .map(|mut raw| CompressedBlockEntry::read_from(&mut raw).unwrap())
            .collect();

        // Compression methods; index 0 is the implicit None sentinel.
        let name_length = header.compression_method_name_length as usize;
        resource.compression_methods = Vec::with_capacity(
            header.compression_method_name_count as usize + 1,
        );
        resource.compression_methods.push(METHOD_NONE.to_string());
        for _ in 0..header.compression_method_name_count {
            let raw = cursor.take(name_length)?;
            let end = raw.iter().position(|&b| b == 0).unwrap_or(name_length);
            let name = std::str::from_utf8(&raw[..end])
                .ok()
                .filter(|name| name.is_ascii())
                .ok_or_else(|| Error::CorruptToc("non-ASCII compression method name".into()))?;
            resource.compression_methods.push(name.to_string());
        }

        // Chunk block signatures
        let is_signed = header.container_flags.contains(ContainerFlags::SIGNED);
        if enforce.is_some() || is_signed {
            if !is_signed {
                return Err(Error::Signature(
                    "signature checking is enabled but the container is not signed".into(),
                ));
            }

            let mut size_raw = cursor.take(4)?;
            let signature_size = size_raw.read_i32::<LittleEndian>().unwrap();
            if signature_size <= 0 {
                return Err(Error::CorruptToc("invalid signature size".into()));
            }
            let signature_size = signature_size as usize;
            resource.toc_signature = cursor.take(signature_size)?.to_vec();
            resource.block_signature = cursor.take(signature_size)?.to_vec();

            let hashes = cursor.take(block_count as usize * SHA1_DIGEST_SIZE)?;
            resource.chunk_block_signatures = hashes
                .chunks_exact(SHA1_DIGEST_SIZE)
                .map(|raw| Sha1Digest(raw.try_into().unwrap()))
                .collect();

            if let Some(key) = enforce {
                validate_container_signature(
                    key,
                    &resource.header_bytes,
                    &resource.chunk_block_signatures,
                    &resource.toc_signature,
                    &resource.block_signature,
                )?;
                debug!("validated container signature for '{}'", toc_path.display());
            }
        }

        // Directory index
        if (options.with_directory_index || options.with_toc_meta)
            && header.directory_index_size > 0
        {
            let raw = cursor.take(header.directory_index_size as usize)?;
            if options.with_directory_index
                && header.container_flags.contains(ContainerFlags::INDEXED)
            {
                resource.directory_index_buffer = raw.to_vec();
            }
        }

        // Meta
        if options.with_toc_meta {
            resource.chunk_metas = Vec::with_capacity(entry_count as usize);
            if header.version >= TocVersion::ReplaceChunkHashWithShortHash as u8 {
                for _ in 0..entry_count {
                    let mut raw = cursor.take(ChunkMeta::SERIALIZED_SIZE)?;
                    resource.chunk_metas.push(ChunkMeta::read_from(&mut raw).unwrap());
                }
            } else {
                for _ in 0..entry_count {
                    let mut raw = cursor.take(ChunkMeta::LEGACY_SERIALIZED_SIZE)?;
                    resource
                        .chunk_metas
                        .push(ChunkMeta::read_legacy_from(&mut raw).unwrap());
                }
            }
        }

        if header.version < TocVersion::PartitionSize as u8 {
            header.partition_count = 1;
            header.partition_size = u64::MAX;
        }
        resource.header = header;

        Ok(resource)
    }

    // ── Serialization ────────────────────────────────────────────────────────

    /// Write a `.utoc` file from finalized tables and return the number of
    /// bytes written.  A failed write deletes the partial file.
    pub fn write(
        toc_path: &Path,
        resource: &mut TocResource,
        compression_block_size: u32,
        max_partition_size: u64,
        settings: &ContainerWriteSettings<'_>,
    ) -> Result<u64> {
        if resource.chunk_ids.len() != resource.chunk_offset_lengths.len() {
            return Err(Error::InvalidParameter(
                "number of TOC chunk IDs doesn't match the number of offsets".into(),
            ));
        }
        if resource.chunk_ids.len() != resource.chunk_metas.len() {
            return Err(Error::InvalidParameter(
                "number of TOC chunk IDs doesn't match the number of chunk metas".into(),
            ));
        }

        let mut has_explicit_none = false;
        for (index, name) in resource.compression_methods.iter().enumerate() {
            if is_method_none(name) {
                if index != 0 {
                    return Err(Error::InvalidParameter(
                        "compression method None must be the first method".into(),
                    ));
                }
                has_explicit_none = true;
            } else if !name.is_ascii() || name.len() >= COMPRESSION_METHOD_NAME_LEN {
                return Err(Error::InvalidParameter(format!(
                    "compression method name '{name}' is not a short ASCII string"
                )));
            }
        }

        let method_name_count =
            resource.compression_methods.len() - usize::from(has_explicit_none);

        let mut header = TocHeader {
            version: TocVersion::LATEST as u8,
            toc_entry_count: resource.chunk_ids.len() as u32,
            toc_compressed_block_entry_count: resource.compression_blocks.len() as u32,
            compression_method_name_count: method_name_count as u32,
            compression_method_name_length: COMPRESSION_METHOD_NAME_LEN as u32,
            compression_block_size,
            directory_index_size: resource.directory_index_buffer.len() as u32,
            partition_count: 0,
            container_id: settings.container_id,
            encryption_key_guid: settings.encryption_key_guid,
            container_flags: settings.container_flags,
            toc_chunk_perfect_hash_seeds_count: resource.chunk_perfect_hash_seeds.len() as u32,
            partition_size: 0,
            toc_chunks_without_perfect_hash_count: resource
                .chunk_indices_without_perfect_hash
                .len() as u32,
        };

        if header.toc_entry_count == 0 {
            header.partition_count = 0;
            header.partition_size = u64::MAX;
        } else if max_partition_size != 0 {
            match resource.compression_blocks.last() {
                Some(last_block) => {
                    let last_block_end =
                        last_block.offset() + u64::from(last_block.compressed_size()) - 1;
                    header.partition_count = (last_block_end / max_partition_size + 1) as u32;
                    header.partition_size = max_partition_size;
                }
                None => {
                    header.partition_count = 1;
                    header.partition_size = u64::MAX;
                }
            }
        } else {
            header.partition_count = 1;
            header.partition_size = u64::MAX;
        }

        resource.header_bytes = header.to_bytes();

        // Sign before touching the filesystem so signature failures leave no
        // partial file behind.
        if settings.container_flags.contains(ContainerFlags::SIGNED) {
            let signing_key = settings.signing_key.ok_or_else(|| {
                Error::Signature("container is flagged Signed but no signing key was given".into())
            })?;
            if resource.chunk_block_signatures.len() != resource.compression_blocks.len() {
                return Err(Error::InvalidParameter(
                    "per-block signature hash count doesn't match the block count".into(),
                ));
            }
            let (toc_signature, block_signature) = create_container_signature(
                signing_key,
                &resource.header_bytes,
                &resource.chunk_block_signatures,
            )?;
            resource.toc_signature = toc_signature;
            resource.block_signature = block_signature;
        }

        let mut file =
            File::create(toc_path).map_err(|e| Error::file_open(toc_path, &e))?;

        let write_result = Self::write_sections(&mut file, resource, &header);
        match write_result {
            Ok(bytes_written) => {
                resource.header = header;
                Ok(bytes_written)
            }
            Err(e) => {
                error!("TOC write to '{}' failed: {e}", toc_path.display());
                drop(file);
                let _ = std::fs::remove_file(toc_path);
                Err(Error::Write(format!(
                    "failed writing TOC '{}': {e}",
                    toc_path.display()
                )))
            }
        }
    }

    fn write_sections(
        file: &mut File,
        resource: &TocResource,
        header: &TocHeader,
    ) -> std::io::Result<u64> {
        let mut writer = std::io::BufWriter::new(file);

        writer.write_all(&resource.header_bytes)?;

        for id in &resource.chunk_ids {
            id.write_to(&mut writer)?;
        }
        for offset_length in &resource.chunk_offset_lengths {
            offset_length.write_to(&mut writer)?;
        }
        for seed in &resource.chunk_perfect_hash_seeds {
            writer.write_i32::<LittleEndian>(*seed)?;
        }
        for index in &resource.chunk_indices_without_perfect_hash {
            writer.write_u32::<LittleEndian>(*index)?;
        }
        for block in &resource.compression_blocks {
            block.write_to(&mut writer)?;
        }

        let mut name_buffer = [0u8; COMPRESSION_METHOD_NAME_LEN];
        for name in &resource.compression_methods {
            if is_method_none(name) {
                continue;
            }
            name_buffer.fill(0);
            name_buffer[..name.len()].copy_from_slice(name.as_bytes());
            writer.write_all(&name_buffer)?;
        }

        if header.container_flags.contains(ContainerFlags::SIGNED) {
            writer.write_i32::<LittleEndian>(resource.toc_signature.len() as i32)?;
            writer.write_all(&resource.toc_signature)?;
            writer.write_all(&resource.block_signature)?;
            for hash in &resource.chunk_block_signatures {
                writer.write_all(hash.as_bytes())?;
            }
        }

        if header.container_flags.contains(ContainerFlags::INDEXED) {
            writer.write_all(&resource.directory_index_buffer)?;
        }

        for meta in &resource.chunk_metas {
            meta.write_to(&mut writer)?;
        }

        writer.flush()?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        file.stream_position()
    }
}

// ── Buffer walking ───────────────────────────────────────────────────────────

struct SectionCursor<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> SectionCursor<'a> {
    fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, position: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .position
            .checked_add(len)
            .filter(|&end| end <= self.buffer.len())
            .ok_or_else(|| Error::CorruptToc("unexpected end of TOC data".into()))?;
        let slice = &self.buffer[self.position..end];
        self.position = end;
        Ok(slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_ids(count: usize) -> Vec<ChunkId> {
        (0..count)
            .map(|i| ChunkId::new(0x9000 + i as u64 * 7919, i as u16, ChunkType::PackageData))
            .collect()
    }

    #[test]
    fn hash_with_seed_is_deterministic() {
        let id = ChunkId::new(123, 0, ChunkType::BulkData);
        assert_eq!(hash_chunk_id_with_seed(0, &id), hash_chunk_id_with_seed(0, &id));
        assert_ne!(
            hash_chunk_id_with_seed(1, &id),
            hash_chunk_id_with_seed(2, &id)
        );
    }

    #[test]
    fn perfect_hash_places_every_chunk() {
        let input_ids = make_ids(300);
        let tables = build_perfect_hash(&input_ids);
        assert_eq!(tables.seeds.len(), input_ids.len());
        assert_eq!(tables.permutation.len(), input_ids.len());

        // The permutation must be a bijection onto 0..count.
        let mut seen = vec![false; input_ids.len()];
        for &slot in &tables.permutation {
            assert!(!seen[slot as usize], "slot {slot} assigned twice");
            seen[slot as usize] = true;
        }

        // Build the permuted resource and resolve every id through it.
        let mut resource = TocResource {
            chunk_ids: vec![ChunkId::new(0, 0, ChunkType::Invalid); input_ids.len()],
            chunk_offset_lengths: vec![OffsetAndLength::default(); input_ids.len()],
            chunk_perfect_hash_seeds: tables.seeds.clone(),
            chunk_indices_without_perfect_hash: tables.indices_without_perfect_hash.clone(),
            ..TocResource::default()
        };
        for (input_index, id) in input_ids.iter().enumerate() {
            let slot = tables.permutation[input_index] as usize;
            resource.chunk_ids[slot] = *id;
            resource.chunk_offset_lengths[slot] =
                OffsetAndLength::new(input_index as u64 * 65536, 100);
        }

        for (input_index, id) in input_ids.iter().enumerate() {
            let slot = tables.permutation[input_index];
            assert_eq!(resource.entry_index(id), Some(slot), "lookup failed for {id}");
            assert_eq!(
                resource.offset_and_length(id).unwrap().offset(),
                input_index as u64 * 65536
            );
        }

        // An id never inserted resolves to not-found.
        let stranger = ChunkId::new(0xFFFF_FFFF, 9999, ChunkType::ScriptObjects);
        assert_eq!(resource.entry_index(&stranger), None);
    }

    #[test]
    fn perfect_hash_empty_set() {
        let tables = build_perfect_hash(&[]);
        assert!(tables.seeds.is_empty());
        assert!(tables.permutation.is_empty());
    }

    #[test]
    fn linear_lookup_without_seed_table() {
        let ids = make_ids(5);
        let resource = TocResource {
            chunk_ids: ids.clone(),
            chunk_offset_lengths: (0..5)
                .map(|i| OffsetAndLength::new(i * 65536, 10))
                .collect(),
            ..TocResource::default()
        };
        for (index, id) in ids.iter().enumerate() {
            assert_eq!(resource.entry_index(id), Some(index as u32));
        }
        assert_eq!(
            resource.entry_index(&ChunkId::new(1, 1, ChunkType::BulkData)),
            None
        );
    }

    #[test]
    fn block_range_resolution() {
        let resource = TocResource {
            header: TocHeader {
                compression_block_size: 65536,
                ..TocHeader::default()
            },
            ..TocResource::default()
        };

        // A chunk spanning [65536, 262144) covers blocks 1..=3.
        assert_eq!(resource.block_range(65536, 196608), (1, 3));
        // A sub-range entirely inside block 2.
        assert_eq!(resource.block_range(131072 + 100, 200), (2, 2));
        // A range ending exactly on a block boundary stays in its block.
        assert_eq!(resource.block_range(0, 65536), (0, 0));
        assert_eq!(resource.block_range(0, 65537), (0, 1));
    }
}
