//! Container reader engine.
//!
//! # File handles
//! Plain buffered readers don't survive a lot of concurrent jobs throwing
//! seeks at them, so each partition gets a small pool of independently
//! locked OS file handles, selected round-robin by an atomic counter.
//! Reads are block-sized and roughly uniform, which keeps one handle from
//! backing up behind a single huge request.  The pool bounds effective
//! parallelism; past roughly a dozen handles per file the OS cache stops
//! scaling anyway.
//!
//! # Read paths
//! - [`StoreReader::read`] resolves a chunk sub-range to its covering
//!   compression blocks and pipelines two physical buffers: while block `N`
//!   is decrypted and decompressed, block `N+1`'s read is already in flight
//!   on a worker thread.
//! - [`StoreReader::read_async`] runs the same resolution as a task graph:
//!   coalesced physical reads fan out into per-block decode tasks joined by
//!   a work-stealing scope, with the result delivered through a channel the
//!   caller waits on.
//! - [`StoreReader::read_compressed`] returns raw (optionally decrypted,
//!   never decompressed) block bytes plus per-block descriptors, for callers
//!   that re-ship compressed data.
//!
//! The in-memory TOC is immutable after open and shared freely across
//! concurrent reads; the handle pools are the only locked state.  There is
//! no cancellation: a started read runs to completion or failure.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver};
use log::{debug, error};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::chunk::{ChunkId, CompressedBlockEntry, OffsetAndLength};
use crate::codec::{decompress_into, get_codec};
use crate::crypto::{align_to_aes, decrypt_in_place, AesKey};
use crate::directory::DirectoryIndexReader;
use crate::error::{Error, Result};
use crate::header::{ContainerFlags, ContainerId};
use crate::signing::VerifyKey;
use crate::toc::{ChunkInfo, TocReadOptions, TocResource};

/// Open OS file handles kept per partition file.
pub const HANDLES_PER_PARTITION: usize = 12;

// ── Container file naming ────────────────────────────────────────────────────

fn append_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut os = base.as_os_str().to_owned();
    os.push(suffix);
    PathBuf::from(os)
}

/// `<base>.utoc`
pub fn toc_file_path(base: &Path) -> PathBuf {
    append_suffix(base, ".utoc")
}

/// `<base>.ucas` for partition 0, `<base>_s<N>.ucas` for N >= 1.
pub fn partition_file_path(base: &Path, partition_index: u32) -> PathBuf {
    if partition_index == 0 {
        append_suffix(base, ".ucas")
    } else {
        append_suffix(base, &format!("_s{partition_index}.ucas"))
    }
}

// ── Handle pool ──────────────────────────────────────────────────────────────

struct HandlePool {
    handles: Vec<Mutex<File>>,
    next_handle: AtomicU32,
}

impl HandlePool {
    fn open(path: &Path) -> Result<Self> {
        let mut handles = Vec::with_capacity(HANDLES_PER_PARTITION);
        for _ in 0..HANDLES_PER_PARTITION {
            let file = File::open(path).map_err(|e| Error::file_open(path, &e))?;
            handles.push(Mutex::new(file));
        }
        Ok(Self {
            handles,
            next_handle: AtomicU32::new(0),
        })
    }

    /// Seek + read on the next handle in round-robin order.  Each handle is
    /// touched by one request at a time; its lock covers the whole
    /// seek-and-read so interleaved requests cannot tear positions.
    fn read_exact_at(&self, offset: u64, buffer: &mut [u8]) -> io::Result<()> {
        let index =
            self.next_handle.fetch_add(1, Ordering::Relaxed) as usize % self.handles.len();
        let mut handle = self.handles[index].lock();
        handle.seek(SeekFrom::Start(offset))?;
        handle.read_exact(buffer)
    }
}

// ── TOC reader wrapper ───────────────────────────────────────────────────────

/// Loaded TOC plus the in-memory chunk map, resolved decryption key and
/// directory-index filenames.
pub struct TocReader {
    toc: TocResource,
    chunk_id_to_index: HashMap<ChunkId, u32>,
    decryption_key: Option<AesKey>,
    index_to_file_name: HashMap<u32, String>,
    directory_index: Option<DirectoryIndexReader>,
}

impl TocReader {
    pub fn read(
        toc_path: &Path,
        options: TocReadOptions,
        decryption_keys: &HashMap<Uuid, AesKey>,
        verify_key: Option<&VerifyKey>,
    ) -> Result<Self> {
        let toc = TocResource::read(toc_path, options, verify_key)?;

        let mut chunk_id_to_index = HashMap::with_capacity(toc.chunk_ids.len());
        for (index, id) in toc.chunk_ids.iter().enumerate() {
            chunk_id_to_index.insert(*id, index as u32);
        }

        let mut decryption_key = None;
        if toc.header.container_flags.contains(ContainerFlags::ENCRYPTED) {
            match decryption_keys.get(&toc.header.encryption_key_guid) {
                Some(key) => decryption_key = Some(key.clone()),
                None => {
                    return Err(Error::FileOpen {
                        path: toc_path.to_owned(),
                        reason: format!(
                            "missing decryption key {}",
                            toc.header.encryption_key_guid
                        ),
                    })
                }
            }
        }

        let mut index_to_file_name = HashMap::new();
        let mut directory_index = None;
        if options.with_directory_index
            && toc.header.container_flags.contains(ContainerFlags::INDEXED)
            && !toc.directory_index_buffer.is_empty()
        {
            let reader =
                DirectoryIndexReader::new(&toc.directory_index_buffer, decryption_key.as_ref())?;
            reader.iterate(|name, toc_entry_index| {
                index_to_file_name.insert(toc_entry_index, name.to_string());
                true
            });
            directory_index = Some(reader);
        }

        Ok(Self {
            toc,
            chunk_id_to_index,
            decryption_key,
            index_to_file_name,
            directory_index,
        })
    }

    pub fn toc(&self) -> &TocResource {
        &self.toc
    }

    pub fn entry_index(&self, id: &ChunkId) -> Option<u32> {
        self.chunk_id_to_index.get(id).copied()
    }

    pub fn offset_and_length(&self, id: &ChunkId) -> Option<OffsetAndLength> {
        self.entry_index(id)
            .map(|index| self.toc.chunk_offset_lengths[index as usize])
    }

    pub fn decryption_key(&self) -> Option<&AesKey> {
        self.decryption_key.as_ref()
    }

    pub fn directory_index(&self) -> Option<&DirectoryIndexReader> {
        self.directory_index.as_ref()
    }

    /// Chunk-info projection with the directory-index filename when one
    /// exists, else a `<ChunkType>` placeholder.
    pub fn chunk_info(&self, index: u32) -> Result<ChunkInfo> {
        let mut info = self.toc.chunk_info(index)?;
        if let Some(name) = self.index_to_file_name.get(&index) {
            info.file_name = name.clone();
            info.has_valid_file_name = true;
        }
        Ok(info)
    }
}

// ── Read options ─────────────────────────────────────────────────────────────

/// Sub-range of a chunk to read.  The default reads the whole chunk; sizes
/// past the end of the chunk are clamped.
#[derive(Debug, Clone, Copy)]
pub struct ReadOptions {
    pub offset: u64,
    pub size: u64,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            offset: 0,
            size: u64::MAX,
        }
    }
}

impl ReadOptions {
    pub fn range(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }
}

/// Options for [`StoreReader::open`].  Supplying a `verify_key` turns
/// signature enforcement on.
#[derive(Default)]
pub struct OpenOptions {
    pub decryption_keys: HashMap<Uuid, AesKey>,
    pub verify_key: Option<VerifyKey>,
}

// ── Compressed read results ──────────────────────────────────────────────────

/// Descriptor of one raw block inside a [`CompressedReadResult`] buffer.
#[derive(Debug, Clone)]
pub struct CompressedBlockInfo {
    pub compression_method: String,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    /// Offset of this block's bytes within the result buffer.
    pub offset_in_buffer: u64,
    /// Compressed size rounded up to the AES block size; consumers must
    /// skip the alignment pad.
    pub aligned_size: u32,
}

#[derive(Debug, Default)]
pub struct CompressedReadResult {
    pub buffer: Vec<u8>,
    pub blocks: Vec<CompressedBlockInfo>,
    /// Where the requested range starts inside the first block, once
    /// decompressed.
    pub uncompressed_offset: u64,
    pub uncompressed_size: u64,
    pub total_compressed_size: u64,
}

// ── Async read handle ────────────────────────────────────────────────────────

/// Handle to an in-flight asynchronous chunk read.  `wait` joins the task
/// graph and yields the assembled buffer or the first error.
pub struct ChunkReadTask {
    receiver: Receiver<Result<Vec<u8>>>,
}

impl ChunkReadTask {
    fn ready(result: Result<Vec<u8>>) -> Self {
        let (sender, receiver) = bounded(1);
        let _ = sender.send(result);
        Self { receiver }
    }

    pub fn wait(self) -> Result<Vec<u8>> {
        self.receiver
            .recv()
            .unwrap_or_else(|_| Err(Error::Read("async read task disappeared".into())))
    }
}

// ── Internal read plumbing ───────────────────────────────────────────────────

#[derive(Clone, Copy)]
struct ResolvedRange {
    resolved_offset: u64,
    resolved_size: u64,
}

fn resolve_range(offset_length: &OffsetAndLength, options: &ReadOptions) -> ResolvedRange {
    let requested_offset = options.offset;
    let resolved_offset = offset_length.offset() + requested_offset;
    let resolved_size = if requested_offset <= offset_length.length() {
        options.size.min(offset_length.length() - requested_offset)
    } else {
        0
    };
    ResolvedRange {
        resolved_offset,
        resolved_size,
    }
}

/// Per-block slice bookkeeping for one resolved read.
struct BlockPlan {
    block_index: usize,
    /// Aligned length of this block's bytes in the compressed buffer.
    comp_len: usize,
    /// Bytes this block contributes to the output.
    dest_len: usize,
    /// Skip into the block's uncompressed bytes (first block only).
    offset_in_block: u64,
}

fn plan_blocks(
    toc: &TocResource,
    first_block: usize,
    last_block: usize,
    range: &ResolvedRange,
) -> Vec<BlockPlan> {
    let block_size = u64::from(toc.header.compression_block_size);
    let mut plans = Vec::with_capacity(last_block - first_block + 1);
    let mut offset_in_block = range.resolved_offset % block_size;
    let mut remaining = range.resolved_size;

    for block_index in first_block..=last_block {
        let block = &toc.compression_blocks[block_index];
        let comp_len = align_to_aes(u64::from(block.compressed_size())) as usize;
        let dest_len = remaining
            .min(u64::from(block.uncompressed_size()).saturating_sub(offset_in_block))
            as usize;
        plans.push(BlockPlan {
            block_index,
            comp_len,
            dest_len,
            offset_in_block,
        });
        remaining -= dest_len as u64;
        offset_in_block = 0;
    }
    plans
}

/// Split `buffer` into consecutive disjoint mutable parts of the given
/// lengths, so independent decode tasks can write without locking.
fn split_by_lengths<'a>(
    mut buffer: &'a mut [u8],
    lengths: impl Iterator<Item = usize>,
) -> Vec<&'a mut [u8]> {
    let mut parts = Vec::new();
    for length in lengths {
        let (head, tail) = buffer.split_at_mut(length);
        parts.push(head);
        buffer = tail;
    }
    parts
}

/// A coalesced physical read: consecutive blocks in one partition collapse
/// into a single seek + read.
struct PhysicalSegment {
    partition_index: usize,
    partition_offset: u64,
    length: usize,
}

struct ReaderShared {
    toc_reader: TocReader,
    partitions: Vec<HandlePool>,
    base_path: PathBuf,
}

impl ReaderShared {
    fn is_encrypted(&self) -> bool {
        self.toc_reader
            .toc()
            .header
            .container_flags
            .contains(ContainerFlags::ENCRYPTED)
    }

    /// Read one block's aligned on-disk bytes.
    fn read_block_raw(&self, block_index: usize) -> io::Result<Vec<u8>> {
        let toc = self.toc_reader.toc();
        let block = &toc.compression_blocks[block_index];
        let raw_size = align_to_aes(u64::from(block.compressed_size())) as usize;
        let partition_size = toc.header.partition_size;
        let partition_index = (block.offset() / partition_size) as usize;
        let partition_offset = block.offset() % partition_size;

        let pool = self.partitions.get(partition_index).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("partition index {partition_index} out of range"),
            )
        })?;
        let mut buffer = vec![0u8; raw_size];
        pool.read_exact_at(partition_offset, &mut buffer)?;
        Ok(buffer)
    }

    /// Decrypt and decode one block's raw bytes into its output slice.
    /// `dest` is sized to exactly the bytes this block contributes.
    fn decode_block(
        &self,
        block_index: usize,
        raw: &mut [u8],
        offset_in_block: u64,
        dest: &mut [u8],
    ) -> Result<()> {
        let toc = self.toc_reader.toc();
        let block = &toc.compression_blocks[block_index];

        if self.is_encrypted() {
            let key = self.toc_reader.decryption_key().ok_or_else(|| {
                Error::Read("container is encrypted but no key was resolved".into())
            })?;
            decrypt_in_place(key, raw)
                .map_err(|e| Error::Read(format!("block {block_index}: {e}")))?;
        }

        let uncompressed_size = block.uncompressed_size() as usize;
        let method_index = block.compression_method_index() as usize;
        let compressed = &raw[..block.compressed_size() as usize];
        let start = offset_in_block as usize;

        if method_index == 0 {
            // Stored verbatim; compressed bytes are the uncompressed bytes.
            dest.copy_from_slice(&compressed[start..start + dest.len()]);
            return Ok(());
        }

        let method = toc
            .compression_methods
            .get(method_index)
            .ok_or_else(|| {
                Error::Read(format!(
                    "block {block_index}: invalid compression method index {method_index}"
                ))
            })?;

        if start == 0 && dest.len() == uncompressed_size {
            // Whole block requested: decompress straight into the output.
            decompress_into(method, compressed, dest)
                .map_err(|e| Error::Read(format!("block {block_index}: {e}")))
        } else {
            // Sub-range: decompress to scratch, then copy the needed bytes.
            let codec =
                get_codec(method).map_err(|e| Error::Read(format!("block {block_index}: {e}")))?;
            let scratch = codec
                .decompress(compressed)
                .map_err(|e| Error::Read(format!("block {block_index}: {e}")))?;
            if scratch.len() != uncompressed_size {
                return Err(Error::Read(format!(
                    "block {block_index}: decompressed {} bytes, TOC declares {uncompressed_size}",
                    scratch.len()
                )));
            }
            dest.copy_from_slice(&scratch[start..start + dest.len()]);
            Ok(())
        }
    }

    fn coalesce_physical_ranges(&self, plans: &[BlockPlan]) -> Result<Vec<PhysicalSegment>> {
        let toc = self.toc_reader.toc();
        let partition_size = toc.header.partition_size;
        let mut segments: Vec<PhysicalSegment> = Vec::new();

        for plan in plans {
            let block = &toc.compression_blocks[plan.block_index];
            let partition_index = (block.offset() / partition_size) as usize;
            if partition_index >= self.partitions.len() {
                return Err(Error::Read(format!(
                    "partition index {partition_index} out of range"
                )));
            }
            let partition_offset = block.offset() % partition_size;
            match segments.last_mut() {
                Some(last)
                    if last.partition_index == partition_index
                        && last.partition_offset + last.length as u64 == partition_offset =>
                {
                    last.length += plan.comp_len;
                }
                _ => segments.push(PhysicalSegment {
                    partition_index,
                    partition_offset,
                    length: plan.comp_len,
                }),
            }
        }
        Ok(segments)
    }

    /// Fill `buffer` with the raw bytes of all planned blocks, one coalesced
    /// read task per physical segment, joined before returning.
    fn read_segments(&self, plans: &[BlockPlan], buffer: &mut [u8]) -> Result<()> {
        let segments = self.coalesce_physical_ranges(plans)?;
        let read_error: Mutex<Option<io::Error>> = Mutex::new(None);

        rayon::scope(|scope| {
            let parts = split_by_lengths(buffer, segments.iter().map(|s| s.length));
            for (segment, part) in segments.iter().zip(parts) {
                let read_error = &read_error;
                scope.spawn(move |_| {
                    if let Err(e) =
                        self.partitions[segment.partition_index]
                            .read_exact_at(segment.partition_offset, part)
                    {
                        error!(
                            "read from container '{}' failed (partition {}, offset {}, size {}): {e}",
                            self.base_path.display(),
                            segment.partition_index,
                            segment.partition_offset,
                            part.len(),
                        );
                        *read_error.lock() = Some(e);
                    }
                });
            }
        });

        match read_error.into_inner() {
            Some(e) => Err(Error::Read(format!(
                "failed reading chunk from container file: {e}"
            ))),
            None => Ok(()),
        }
    }

    /// Task-graph read: one join for the physical reads, then per-block
    /// decode tasks fanned out over disjoint output slices and joined by a
    /// work-stealing scope.
    fn read_chunk_parallel(&self, range: &ResolvedRange) -> Result<Vec<u8>> {
        let toc = self.toc_reader.toc();
        let (first_block, last_block) = toc.block_range(range.resolved_offset, range.resolved_size);
        let plans = plan_blocks(toc, first_block, last_block, range);

        let total_compressed: usize = plans.iter().map(|p| p.comp_len).sum();
        let mut compressed = vec![0u8; total_compressed];
        self.read_segments(&plans, &mut compressed)?;

        let mut output = vec![0u8; range.resolved_size as usize];
        let decode_error: Mutex<Option<Error>> = Mutex::new(None);
        rayon::scope(|scope| {
            let comp_parts =
                split_by_lengths(&mut compressed, plans.iter().map(|p| p.comp_len));
            let out_parts = split_by_lengths(&mut output, plans.iter().map(|p| p.dest_len));
            for ((plan, comp_part), out_part) in plans.iter().zip(comp_parts).zip(out_parts) {
                let decode_error = &decode_error;
                scope.spawn(move |_| {
                    if let Err(e) =
                        self.decode_block(plan.block_index, comp_part, plan.offset_in_block, out_part)
                    {
                        *decode_error.lock() = Some(e);
                    }
                });
            }
        });

        match decode_error.into_inner() {
            Some(e) => Err(e),
            None => Ok(output),
        }
    }
}

fn launch_block_read(
    shared: &Arc<ReaderShared>,
    block_index: usize,
) -> Receiver<io::Result<Vec<u8>>> {
    let (sender, receiver) = bounded(1);
    let shared = Arc::clone(shared);
    rayon::spawn(move || {
        let result = shared.read_block_raw(block_index);
        let _ = sender.send(result);
    });
    receiver
}

// ── Store reader ─────────────────────────────────────────────────────────────

/// Read access to one container: the loaded TOC plus open handle pools for
/// every partition file.  Cheap to share; all methods take `&self`.
pub struct StoreReader {
    shared: Arc<ReaderShared>,
}

impl StoreReader {
    /// Open `<base>.utoc` and every partition's handle pool.  A TOC failure
    /// leaves nothing open.
    pub fn open<P: AsRef<Path>>(base: P, options: OpenOptions) -> Result<Self> {
        let base_path = base.as_ref().to_owned();
        let toc_path = toc_file_path(&base_path);

        let toc_reader = TocReader::read(
            &toc_path,
            TocReadOptions::all(),
            &options.decryption_keys,
            options.verify_key.as_ref(),
        )?;

        let partition_count = toc_reader.toc().header.partition_count;
        let mut partitions = Vec::with_capacity(partition_count as usize);
        for partition_index in 0..partition_count {
            partitions.push(HandlePool::open(&partition_file_path(
                &base_path,
                partition_index,
            ))?);
        }
        debug!(
            "opened container '{}': {} chunks, {} partitions",
            base_path.display(),
            toc_reader.toc().chunk_ids.len(),
            partition_count,
        );

        Ok(Self {
            shared: Arc::new(ReaderShared {
                toc_reader,
                partitions,
                base_path,
            }),
        })
    }

    // ── Reading ──────────────────────────────────────────────────────────────

    /// Synchronous read of a chunk sub-range, with the next block's physical
    /// read kept in flight while the current block decodes.
    pub fn read(&self, chunk_id: &ChunkId, options: &ReadOptions) -> Result<Vec<u8>> {
        let shared = &self.shared;
        let offset_length = shared
            .toc_reader
            .offset_and_length(chunk_id)
            .ok_or(Error::NotFound)?;
        let range = resolve_range(&offset_length, options);
        if range.resolved_size == 0 {
            return Ok(Vec::new());
        }

        let toc = shared.toc_reader.toc();
        let (first_block, last_block) = toc.block_range(range.resolved_offset, range.resolved_size);
        let plans = plan_blocks(toc, first_block, last_block, &range);

        let mut output = vec![0u8; range.resolved_size as usize];
        let mut dest_offset = 0usize;
        let mut pending = Some(launch_block_read(shared, plans[0].block_index));

        for (i, plan) in plans.iter().enumerate() {
            let current = pending.take().expect("pending block read");
            if i + 1 < plans.len() {
                pending = Some(launch_block_read(shared, plans[i + 1].block_index));
            }

            let mut raw = current
                .recv()
                .map_err(|_| Error::Read("block read task disappeared".into()))?
                .map_err(|e| {
                    error!(
                        "read from container '{}' failed: {e}",
                        shared.base_path.display()
                    );
                    Error::Read(format!("failed reading block {}: {e}", plan.block_index))
                })?;

            shared.decode_block(
                plan.block_index,
                &mut raw,
                plan.offset_in_block,
                &mut output[dest_offset..dest_offset + plan.dest_len],
            )?;
            dest_offset += plan.dest_len;
        }
        Ok(output)
    }

    /// Asynchronous read.  Resolution errors surface immediately through the
    /// returned handle; the physical work runs on worker threads.
    pub fn read_async(&self, chunk_id: &ChunkId, options: &ReadOptions) -> ChunkReadTask {
        let offset_length = match self.shared.toc_reader.offset_and_length(chunk_id) {
            Some(value) => value,
            None => return ChunkReadTask::ready(Err(Error::NotFound)),
        };
        let range = resolve_range(&offset_length, options);
        if range.resolved_size == 0 {
            return ChunkReadTask::ready(Ok(Vec::new()));
        }

        let shared = Arc::clone(&self.shared);
        let (sender, receiver) = bounded(1);
        rayon::spawn(move || {
            let result = shared.read_chunk_parallel(&range);
            let _ = sender.send(result);
        });
        ChunkReadTask { receiver }
    }

    /// Raw compressed read: the covering blocks' on-disk bytes (decrypted
    /// only when `decrypt` is set and the container is encrypted, never
    /// decompressed) plus per-block descriptors.
    pub fn read_compressed(
        &self,
        chunk_id: &ChunkId,
        options: &ReadOptions,
        decrypt: bool,
    ) -> Result<CompressedReadResult> {
        let shared = &self.shared;
        let offset_length = shared
            .toc_reader
            .offset_and_length(chunk_id)
            .ok_or(Error::NotFound)?;
        let range = resolve_range(&offset_length, options);
        if range.resolved_size == 0 {
            return Ok(CompressedReadResult::default());
        }

        let toc = shared.toc_reader.toc();
        let block_size = u64::from(toc.header.compression_block_size);
        let (first_block, last_block) = toc.block_range(range.resolved_offset, range.resolved_size);
        let plans = plan_blocks(toc, first_block, last_block, &range);

        let mut blocks = Vec::with_capacity(last_block - first_block + 1);
        let mut total_compressed_size = 0u64;
        let mut current_offset = 0u64;
        for block_index in first_block..=last_block {
            let block = &toc.compression_blocks[block_index];
            let aligned_size = align_to_aes(u64::from(block.compressed_size())) as u32;
            let method_index = block.compression_method_index() as usize;
            blocks.push(CompressedBlockInfo {
                compression_method: toc
                    .compression_methods
                    .get(method_index)
                    .cloned()
                    .unwrap_or_default(),
                compressed_size: block.compressed_size(),
                uncompressed_size: block.uncompressed_size(),
                offset_in_buffer: current_offset,
                aligned_size,
            });
            total_compressed_size += u64::from(block.compressed_size());
            current_offset += u64::from(aligned_size);
        }

        let mut buffer = vec![0u8; current_offset as usize];
        shared.read_segments(&plans, &mut buffer)?;

        if decrypt && shared.is_encrypted() {
            let key = shared.toc_reader.decryption_key().ok_or_else(|| {
                Error::Read("container is encrypted but no key was resolved".into())
            })?;
            for info in &blocks {
                let start = info.offset_in_buffer as usize;
                let end = start + info.aligned_size as usize;
                decrypt_in_place(key, &mut buffer[start..end])
                    .map_err(|e| Error::Read(e.to_string()))?;
            }
        }

        Ok(CompressedReadResult {
            buffer,
            blocks,
            uncompressed_offset: range.resolved_offset % block_size,
            uncompressed_size: range.resolved_size,
            total_compressed_size,
        })
    }

    // ── Enumeration ──────────────────────────────────────────────────────────

    /// Visit every chunk's info record; the callback returns `true` to
    /// continue.  Restartable, no state retained between calls.
    pub fn enumerate_chunks<F: FnMut(ChunkInfo) -> bool>(&self, mut callback: F) -> Result<()> {
        for index in 0..self.shared.toc_reader.toc().chunk_ids.len() as u32 {
            let info = self.shared.toc_reader.chunk_info(index)?;
            if !callback(info) {
                break;
            }
        }
        Ok(())
    }

    pub fn enumerate_compressed_blocks<F: FnMut(&CompressedBlockEntry) -> bool>(
        &self,
        mut callback: F,
    ) {
        for block in &self.shared.toc_reader.toc().compression_blocks {
            if !callback(block) {
                break;
            }
        }
    }

    pub fn enumerate_compressed_blocks_for_chunk<F: FnMut(&CompressedBlockEntry) -> bool>(
        &self,
        chunk_id: &ChunkId,
        mut callback: F,
    ) -> Result<()> {
        let offset_length = self
            .shared
            .toc_reader
            .offset_and_length(chunk_id)
            .ok_or(Error::NotFound)?;
        if offset_length.length() == 0 {
            return Ok(());
        }

        let toc = self.shared.toc_reader.toc();
        let (first_block, last_block) =
            toc.block_range(offset_length.offset(), offset_length.length());
        for block in &toc.compression_blocks[first_block..=last_block] {
            if !callback(block) {
                break;
            }
        }
        Ok(())
    }

    // ── Projections and accessors ────────────────────────────────────────────

    pub fn chunk_info(&self, chunk_id: &ChunkId) -> Result<ChunkInfo> {
        let index = self
            .shared
            .toc_reader
            .entry_index(chunk_id)
            .ok_or(Error::NotFound)?;
        self.shared.toc_reader.chunk_info(index)
    }

    pub fn chunk_info_at(&self, toc_entry_index: u32) -> Result<ChunkInfo> {
        self.shared.toc_reader.chunk_info(toc_entry_index)
    }

    pub fn container_id(&self) -> ContainerId {
        self.shared.toc_reader.toc().header.container_id
    }

    pub fn version(&self) -> u8 {
        self.shared.toc_reader.toc().header.version
    }

    pub fn container_flags(&self) -> ContainerFlags {
        self.shared.toc_reader.toc().header.container_flags
    }

    pub fn encryption_key_guid(&self) -> Uuid {
        self.shared.toc_reader.toc().header.encryption_key_guid
    }

    pub fn chunk_count(&self) -> usize {
        self.shared.toc_reader.toc().chunk_ids.len()
    }

    pub fn compression_block_size(&self) -> u32 {
        self.shared.toc_reader.toc().header.compression_block_size
    }

    pub fn compression_methods(&self) -> &[String] {
        &self.shared.toc_reader.toc().compression_methods
    }

    pub fn container_name(&self) -> String {
        self.shared
            .base_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn container_file_paths(&self) -> Vec<PathBuf> {
        (0..self.shared.toc_reader.toc().header.partition_count)
            .map(|index| partition_file_path(&self.shared.base_path, index))
            .collect()
    }

    /// All filenames from the directory index, in index order.
    pub fn file_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        if let Some(directory) = self.shared.toc_reader.directory_index() {
            directory.iterate(|name, _| {
                names.push(name.to_string());
                true
            });
        }
        names
    }

    /// Filenames whose chunks cover any of the given block indices.
    pub fn file_names_by_block_indices(&self, block_indices: &[usize]) -> Vec<String> {
        let toc = self.shared.toc_reader.toc();
        let mut names = Vec::new();
        if let Some(directory) = self.shared.toc_reader.directory_index() {
            directory.iterate(|name, toc_entry_index| {
                let offset_length = &toc.chunk_offset_lengths[toc_entry_index as usize];
                if offset_length.length() > 0 {
                    let (first_block, last_block) =
                        toc.block_range(offset_length.offset(), offset_length.length());
                    if block_indices
                        .iter()
                        .any(|&b| b >= first_block && b <= last_block)
                    {
                        names.push(name.to_string());
                    }
                }
                true
            });
        }
        names
    }
}
