use std::collections::HashMap;
use std::fs::OpenOptions as FsOpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use castoc::chunk::{ChunkMeta, ChunkMetaFlags, CompressedBlockEntry, OffsetAndLength};
use castoc::crypto::AesKey;
use castoc::reader::{toc_file_path, OpenOptions, ReadOptions, StoreReader};
use castoc::signing::SigningKeyPair;
use castoc::toc::{build_perfect_hash, ContainerWriteSettings, TocReadOptions, TocResource};
use castoc::{
    ChunkHash, ChunkId, ChunkType, ContainerFlags, ContainerId, ContainerSettings,
    ContainerWriter, Error,
};
use uuid::Uuid;

/// Deterministic pseudo-random bytes; incompressible enough that "None" and
/// compression-fallback paths behave predictably.
fn noise(len: usize, mut seed: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    for _ in 0..len {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        out.push((seed >> 33) as u8);
    }
    out
}

fn chunk_id(n: u64) -> ChunkId {
    ChunkId::new(n, n as u16, ChunkType::PackageData)
}

fn base_path(dir: &tempfile::TempDir, name: &str) -> PathBuf {
    dir.path().join(name)
}

// ── TOC round-trip ───────────────────────────────────────────────────────────

#[test]
fn toc_resource_roundtrip_reproduces_all_arrays() {
    let dir = tempfile::tempdir().unwrap();
    let toc_path = toc_file_path(&base_path(&dir, "roundtrip"));

    let input_ids: Vec<ChunkId> = (0..37).map(chunk_id).collect();
    let tables = build_perfect_hash(&input_ids);
    let count = input_ids.len();

    let mut chunk_ids = vec![chunk_id(0); count];
    let mut offsets = vec![OffsetAndLength::default(); count];
    let mut metas = vec![ChunkMeta::default(); count];
    for (input_index, id) in input_ids.iter().enumerate() {
        let slot = tables.permutation[input_index] as usize;
        chunk_ids[slot] = *id;
        offsets[slot] = OffsetAndLength::new(input_index as u64 * 65536, 1000 + input_index as u64);
        metas[slot] = ChunkMeta {
            chunk_hash: ChunkHash::from_blake3(&[input_index as u8]),
            flags: ChunkMetaFlags::COMPRESSED,
        };
    }

    let blocks: Vec<CompressedBlockEntry> = (0..64)
        .map(|i| CompressedBlockEntry::new(i * 65536, 30000 + i as u32, 65536, (i % 3) as u8))
        .collect();

    let mut resource = TocResource {
        chunk_ids: chunk_ids.clone(),
        chunk_offset_lengths: offsets.clone(),
        chunk_perfect_hash_seeds: tables.seeds.clone(),
        chunk_indices_without_perfect_hash: tables.indices_without_perfect_hash.clone(),
        compression_blocks: blocks.clone(),
        compression_methods: vec!["None".into(), "Zstd".into(), "LZ4".into()],
        chunk_metas: metas.clone(),
        ..TocResource::default()
    };

    let settings = ContainerWriteSettings {
        container_id: ContainerId::new(0xABCD),
        encryption_key_guid: Uuid::nil(),
        container_flags: ContainerFlags::COMPRESSED,
        signing_key: None,
    };
    let written = TocResource::write(&toc_path, &mut resource, 65536, 0, &settings).unwrap();
    assert_eq!(written, std::fs::metadata(&toc_path).unwrap().len());

    let parsed = TocResource::read(&toc_path, TocReadOptions::all(), None).unwrap();
    assert_eq!(parsed.chunk_ids, chunk_ids);
    assert_eq!(parsed.chunk_offset_lengths, offsets);
    assert_eq!(parsed.chunk_perfect_hash_seeds, tables.seeds);
    assert_eq!(
        parsed.chunk_indices_without_perfect_hash,
        tables.indices_without_perfect_hash
    );
    assert_eq!(parsed.compression_blocks, blocks);
    assert_eq!(
        parsed.compression_methods,
        vec!["None".to_string(), "Zstd".into(), "LZ4".into()]
    );
    assert_eq!(parsed.chunk_metas, metas);
    assert_eq!(parsed.header.container_id, ContainerId::new(0xABCD));

    // Lookup correctness over the parsed resource: every written id resolves
    // to its offset, unknown ids resolve to nothing.
    for (input_index, id) in input_ids.iter().enumerate() {
        let found = parsed.offset_and_length(id).unwrap();
        assert_eq!(found.offset(), input_index as u64 * 65536);
        assert_eq!(found.length(), 1000 + input_index as u64);
    }
    assert!(parsed
        .offset_and_length(&ChunkId::new(999_999, 0, ChunkType::BulkData))
        .is_none());
}

// ── Write + read through the engine ──────────────────────────────────────────

#[test]
fn full_container_roundtrip_mixed_methods() {
    let dir = tempfile::tempdir().unwrap();
    let base = base_path(&dir, "mixed");

    let compressible = vec![0x41u8; 300_000];
    let incompressible = noise(150_000, 7);
    let small = b"just a few bytes".to_vec();

    let mut writer = ContainerWriter::create(
        &base,
        ContainerSettings {
            container_id: ContainerId::new(1),
            container_flags: ContainerFlags::COMPRESSED.union(ContainerFlags::INDEXED),
            ..ContainerSettings::new()
        },
    )
    .unwrap();
    writer
        .append(chunk_id(0), Some("Game/A.uasset"), &compressible, "Zstd")
        .unwrap();
    writer
        .append(chunk_id(1), Some("Game/B.uasset"), &incompressible, "None")
        .unwrap();
    writer.append(chunk_id(2), None, &small, "LZ4").unwrap();
    writer.finalize().unwrap();

    let reader = StoreReader::open(&base, OpenOptions::default()).unwrap();
    assert_eq!(reader.chunk_count(), 3);

    assert_eq!(reader.read(&chunk_id(0), &ReadOptions::default()).unwrap(), compressible);
    assert_eq!(
        reader.read(&chunk_id(1), &ReadOptions::default()).unwrap(),
        incompressible
    );
    assert_eq!(reader.read(&chunk_id(2), &ReadOptions::default()).unwrap(), small);

    // Unknown chunk is NotFound.
    assert!(matches!(
        reader.read(&chunk_id(77), &ReadOptions::default()),
        Err(Error::NotFound)
    ));

    // Directory index names survived; the unnamed chunk gets a placeholder.
    let info_a = reader.chunk_info(&chunk_id(0)).unwrap();
    assert!(info_a.has_valid_file_name);
    assert_eq!(info_a.file_name, "Game/A.uasset");
    assert!(info_a.is_compressed);

    let info_c = reader.chunk_info(&chunk_id(2)).unwrap();
    assert!(!info_c.has_valid_file_name);
    assert_eq!(info_c.file_name, "<PackageData>");

    // The incompressible chunk fell back to stored-verbatim blocks.
    let info_b = reader.chunk_info(&chunk_id(1)).unwrap();
    assert!(!info_b.is_compressed);
    assert!(info_b.force_uncompressed);

    let mut names = reader.file_names();
    names.sort();
    assert_eq!(names, vec!["Game/A.uasset".to_string(), "Game/B.uasset".into()]);
}

#[test]
fn sub_range_reads_match_source_slices() {
    let dir = tempfile::tempdir().unwrap();
    let base = base_path(&dir, "ranges");
    let data = noise(400_000, 99);

    let mut writer = ContainerWriter::create(&base, ContainerSettings::new()).unwrap();
    writer.append(chunk_id(0), None, &data, "Zstd").unwrap();
    writer.finalize().unwrap();

    let reader = StoreReader::open(&base, OpenOptions::default()).unwrap();

    // Ranges chosen to hit: inside one block, straddling a block boundary,
    // first/last block partials, and clamping past the end.
    let cases = [
        (0u64, 100u64),
        (65_530, 20),
        (70_000, 65_536),
        (131_072, 65_536),
        (399_990, 1_000),
        (123, 0),
    ];
    for (offset, size) in cases {
        let got = reader
            .read(&chunk_id(0), &ReadOptions::range(offset, size))
            .unwrap();
        let end = (offset + size).min(data.len() as u64) as usize;
        let expected = &data[offset.min(data.len() as u64) as usize..end];
        assert_eq!(got, expected, "range ({offset}, {size}) mismatch");
    }

    // An offset past the chunk end clamps to an empty read, not an error.
    let past = reader
        .read(&chunk_id(0), &ReadOptions::range(500_000, 100))
        .unwrap();
    assert!(past.is_empty());
}

#[test]
fn async_read_matches_sync_read() {
    let dir = tempfile::tempdir().unwrap();
    let base = base_path(&dir, "async");
    let data = noise(500_000, 3);

    let mut writer = ContainerWriter::create(&base, ContainerSettings::new()).unwrap();
    writer.append(chunk_id(0), None, &data, "Zstd").unwrap();
    writer.append(chunk_id(1), None, &data[..1000], "None").unwrap();
    writer.finalize().unwrap();

    let reader = StoreReader::open(&base, OpenOptions::default()).unwrap();

    let task_a = reader.read_async(&chunk_id(0), &ReadOptions::default());
    let task_b = reader.read_async(&chunk_id(1), &ReadOptions::range(100, 200));
    let task_missing = reader.read_async(&chunk_id(9), &ReadOptions::default());

    assert_eq!(task_a.wait().unwrap(), data);
    assert_eq!(task_b.wait().unwrap(), &data[100..300]);
    assert!(matches!(task_missing.wait(), Err(Error::NotFound)));
}

// ── Compression passthrough and empty chunks ─────────────────────────────────

#[test]
fn none_passthrough_is_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    let base = base_path(&dir, "passthrough");

    let sizes = [0usize, 1, 15, 16, 65_536, 65_537, 200_000];
    let mut writer = ContainerWriter::create(&base, ContainerSettings::new()).unwrap();
    for (i, &size) in sizes.iter().enumerate() {
        writer
            .append(chunk_id(i as u64), None, &noise(size, i as u64), "None")
            .unwrap();
    }
    writer.finalize().unwrap();

    let reader = StoreReader::open(&base, OpenOptions::default()).unwrap();
    for (i, &size) in sizes.iter().enumerate() {
        let got = reader
            .read(&chunk_id(i as u64), &ReadOptions::default())
            .unwrap();
        assert_eq!(got, noise(size, i as u64), "size {size} mismatch");
    }
}

#[test]
fn empty_chunk_and_zero_size_reads() {
    let dir = tempfile::tempdir().unwrap();
    let base = base_path(&dir, "empty");

    let mut writer = ContainerWriter::create(&base, ContainerSettings::new()).unwrap();
    writer.append(chunk_id(0), None, b"", "Zstd").unwrap();
    writer.append(chunk_id(1), None, b"payload", "None").unwrap();
    writer.finalize().unwrap();

    let reader = StoreReader::open(&base, OpenOptions::default()).unwrap();

    // length == 0 chunk reads as a valid empty buffer.
    assert_eq!(reader.read(&chunk_id(0), &ReadOptions::default()).unwrap(), b"");
    // explicit zero-size read likewise.
    assert_eq!(
        reader.read(&chunk_id(1), &ReadOptions::range(0, 0)).unwrap(),
        b""
    );

    let info = reader.chunk_info(&chunk_id(0)).unwrap();
    assert_eq!(info.size, 0);
    assert_eq!(info.num_compressed_blocks, 0);
}

// ── Partitions ───────────────────────────────────────────────────────────────

#[test]
fn block_at_partition_boundary_resolves_to_next_partition() {
    let dir = tempfile::tempdir().unwrap();
    let base = base_path(&dir, "boundary");

    // 64 KiB stored-verbatim blocks, cap of exactly two blocks per
    // partition: block 2 must land at the boundary offset.
    let partition_size = 2 * 65_536u64;
    let data = noise(3 * 65_536, 11);

    let mut writer = ContainerWriter::create(
        &base,
        ContainerSettings {
            max_partition_size: partition_size,
            ..ContainerSettings::new()
        },
    )
    .unwrap();
    writer.append(chunk_id(0), None, &data, "None").unwrap();
    writer.finalize().unwrap();

    let reader = StoreReader::open(&base, OpenOptions::default()).unwrap();
    let mut offsets = Vec::new();
    reader.enumerate_compressed_blocks(|block| {
        offsets.push(block.offset());
        true
    });
    assert_eq!(offsets, vec![0, 65_536, 131_072]);

    // Offset exactly at k * PartitionSize belongs to partition k, not k - 1.
    assert_eq!(offsets[2] / partition_size, 1);
    assert_eq!(reader.container_file_paths().len(), 2);
    for path in reader.container_file_paths() {
        assert!(path.exists(), "{} missing", path.display());
    }

    assert_eq!(reader.read(&chunk_id(0), &ReadOptions::default()).unwrap(), data);
}

// ── Signing ──────────────────────────────────────────────────────────────────

fn tamper_byte(path: &Path, offset: u64) {
    let mut file = FsOpenOptions::new().read(true).write(true).open(path).unwrap();
    file.seek(SeekFrom::Start(offset)).unwrap();
    let mut byte = [0u8; 1];
    file.read_exact(&mut byte).unwrap();
    byte[0] ^= 0x01;
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.write_all(&byte).unwrap();
}

#[test]
fn signature_tamper_detection() {
    let dir = tempfile::tempdir().unwrap();
    let base = base_path(&dir, "signed");
    let key = SigningKeyPair::generate(1024).unwrap();
    let data = noise(100, 5);

    let mut writer = ContainerWriter::create(
        &base,
        ContainerSettings {
            container_flags: ContainerFlags::SIGNED,
            signing_key: Some(key.clone()),
            ..ContainerSettings::new()
        },
    )
    .unwrap();
    writer.append(chunk_id(0), None, &data, "None").unwrap();
    writer.finalize().unwrap();

    let verified_open = |base: &Path| {
        StoreReader::open(
            base,
            OpenOptions {
                verify_key: Some(key.verify_key()),
                ..OpenOptions::default()
            },
        )
    };

    // Pristine container validates.
    let reader = verified_open(&base).unwrap();
    assert_eq!(reader.read(&chunk_id(0), &ReadOptions::default()).unwrap(), data);
    drop(reader);

    // Flip a byte inside the header's container-id field (offset 56):
    // parsing still succeeds, validation must not.
    let toc = toc_file_path(&base);
    tamper_byte(&toc, 56);
    assert!(matches!(verified_open(&base), Err(Error::Signature(_))));

    // Restore, then flip a byte inside the per-block hash array.
    tamper_byte(&toc, 56);
    verified_open(&base).unwrap();
    // Layout for this container: header 144 + one id 12 + one offset pair 10
    // + one perfect-hash seed 4 + one block entry 12 + no method names, then
    // the signature block: size i32 + two signatures + the hash array.
    let hash_array_offset = 144 + 12 + 10 + 4 + 12 + 4 + 2 * key.signature_size() as u64;
    tamper_byte(&toc, hash_array_offset + 3);
    assert!(matches!(verified_open(&base), Err(Error::Signature(_))));
}

#[test]
fn unsigned_container_fails_when_enforcement_is_on() {
    let dir = tempfile::tempdir().unwrap();
    let base = base_path(&dir, "unsigned");

    let mut writer = ContainerWriter::create(&base, ContainerSettings::new()).unwrap();
    writer.append(chunk_id(0), None, b"data", "None").unwrap();
    writer.finalize().unwrap();

    let key = SigningKeyPair::generate(1024).unwrap();
    assert!(matches!(
        StoreReader::open(
            &base,
            OpenOptions {
                verify_key: Some(key.verify_key()),
                ..OpenOptions::default()
            },
        ),
        Err(Error::Signature(_))
    ));
}

// ── Encryption ───────────────────────────────────────────────────────────────

#[test]
fn encrypted_container_roundtrip_and_missing_key() {
    let dir = tempfile::tempdir().unwrap();
    let base = base_path(&dir, "encrypted");
    let key = AesKey::from_bytes([0x37u8; 32]);
    let key_guid = Uuid::new_v4();
    let data = noise(200_000, 21);

    let mut writer = ContainerWriter::create(
        &base,
        ContainerSettings {
            container_flags: ContainerFlags::COMPRESSED
                .union(ContainerFlags::ENCRYPTED)
                .union(ContainerFlags::INDEXED),
            encryption_key_guid: key_guid,
            encryption_key: Some(key.clone()),
            ..ContainerSettings::new()
        },
    )
    .unwrap();
    writer
        .append(chunk_id(0), Some("Game/Secret.uasset"), &data, "Zstd")
        .unwrap();
    writer.finalize().unwrap();

    // Without the key the reader must not initialize.
    assert!(matches!(
        StoreReader::open(&base, OpenOptions::default()),
        Err(Error::FileOpen { .. })
    ));

    let mut keys = HashMap::new();
    keys.insert(key_guid, key);
    let reader = StoreReader::open(
        &base,
        OpenOptions {
            decryption_keys: keys,
            ..OpenOptions::default()
        },
    )
    .unwrap();

    assert_eq!(reader.read(&chunk_id(0), &ReadOptions::default()).unwrap(), data);
    assert_eq!(reader.file_names(), vec!["Game/Secret.uasset".to_string()]);
    assert_eq!(
        reader.read(&chunk_id(0), &ReadOptions::range(70_000, 1234)).unwrap(),
        &data[70_000..71_234]
    );
}

// ── ReadCompressed ───────────────────────────────────────────────────────────

#[test]
fn read_compressed_returns_raw_blocks() {
    let dir = tempfile::tempdir().unwrap();
    let base = base_path(&dir, "rawread");
    let verbatim = noise(100_000, 31);
    let compressible = vec![0x42u8; 100_000];

    let mut writer = ContainerWriter::create(&base, ContainerSettings::new()).unwrap();
    writer.append(chunk_id(0), None, &verbatim, "None").unwrap();
    writer.append(chunk_id(1), None, &compressible, "Zstd").unwrap();
    writer.finalize().unwrap();

    let reader = StoreReader::open(&base, OpenOptions::default()).unwrap();

    // Stored-verbatim chunk: raw block bytes are the source bytes.
    let result = reader
        .read_compressed(&chunk_id(0), &ReadOptions::default(), false)
        .unwrap();
    assert_eq!(result.uncompressed_size, verbatim.len() as u64);
    assert_eq!(result.blocks.len(), 2); // 100_000 bytes over 64 KiB blocks
    assert_eq!(result.uncompressed_offset, 0);
    let first = &result.blocks[0];
    assert_eq!(first.compression_method, "None");
    assert_eq!(first.compressed_size, 65_536);
    assert_eq!(
        &result.buffer[..first.compressed_size as usize],
        &verbatim[..65_536]
    );
    assert_eq!(
        result.total_compressed_size,
        result.blocks.iter().map(|b| u64::from(b.compressed_size)).sum::<u64>()
    );

    // Compressed chunk: blocks decompress to the source, proving the raw
    // path really returned compressed bytes untouched.
    let result = reader
        .read_compressed(&chunk_id(1), &ReadOptions::default(), false)
        .unwrap();
    let mut rebuilt = Vec::new();
    for block in &result.blocks {
        assert_eq!(block.compression_method, "Zstd");
        assert!(block.compressed_size < block.uncompressed_size);
        let start = block.offset_in_buffer as usize;
        let compressed = &result.buffer[start..start + block.compressed_size as usize];
        rebuilt.extend_from_slice(&zstd::decode_all(compressed).unwrap());
    }
    assert_eq!(rebuilt, compressible);

    // Zero-size resolve yields an empty result, not an error.
    let empty = reader
        .read_compressed(
            &chunk_id(0),
            &ReadOptions::range(verbatim.len() as u64 + 10, 5),
            false,
        )
        .unwrap();
    assert!(empty.buffer.is_empty());
    assert!(empty.blocks.is_empty());
}

#[test]
fn read_compressed_decrypts_only_on_request() {
    let dir = tempfile::tempdir().unwrap();
    let base = base_path(&dir, "rawcrypt");
    let key = AesKey::from_bytes([0x90u8; 32]);
    let key_guid = Uuid::new_v4();
    let data = noise(32_768, 41);

    let mut writer = ContainerWriter::create(
        &base,
        ContainerSettings {
            container_flags: ContainerFlags::ENCRYPTED,
            encryption_key_guid: key_guid,
            encryption_key: Some(key.clone()),
            ..ContainerSettings::new()
        },
    )
    .unwrap();
    writer.append(chunk_id(0), None, &data, "None").unwrap();
    writer.finalize().unwrap();

    let mut keys = HashMap::new();
    keys.insert(key_guid, key);
    let open = || {
        StoreReader::open(
            &base,
            OpenOptions {
                decryption_keys: keys.clone(),
                ..OpenOptions::default()
            },
        )
        .unwrap()
    };

    let raw = open()
        .read_compressed(&chunk_id(0), &ReadOptions::default(), false)
        .unwrap();
    assert_ne!(&raw.buffer[..data.len()], &data[..], "bytes should still be encrypted");

    let decrypted = open()
        .read_compressed(&chunk_id(0), &ReadOptions::default(), true)
        .unwrap();
    assert_eq!(&decrypted.buffer[..data.len()], &data[..]);
}

// ── Enumeration ──────────────────────────────────────────────────────────────

#[test]
fn enumerations_are_restartable_and_stoppable() {
    let dir = tempfile::tempdir().unwrap();
    let base = base_path(&dir, "enumerate");

    let mut writer = ContainerWriter::create(&base, ContainerSettings::new()).unwrap();
    for i in 0..5u64 {
        writer
            .append(chunk_id(i), None, &noise(100_000, i), "None")
            .unwrap();
    }
    writer.finalize().unwrap();

    let reader = StoreReader::open(&base, OpenOptions::default()).unwrap();

    let mut first_pass = 0;
    reader
        .enumerate_chunks(|_| {
            first_pass += 1;
            first_pass < 3
        })
        .unwrap();
    assert_eq!(first_pass, 3);

    let mut second_pass = 0;
    reader
        .enumerate_chunks(|_| {
            second_pass += 1;
            true
        })
        .unwrap();
    assert_eq!(second_pass, 5);

    // Per-chunk block enumeration covers exactly the chunk's block run.
    let info = reader.chunk_info(&chunk_id(2)).unwrap();
    let mut blocks = 0u32;
    let mut total = 0u64;
    reader
        .enumerate_compressed_blocks_for_chunk(&chunk_id(2), |block| {
            blocks += 1;
            total += u64::from(block.compressed_size());
            true
        })
        .unwrap();
    assert_eq!(blocks, info.num_compressed_blocks);
    assert_eq!(total, info.compressed_size);

    assert!(matches!(
        reader.enumerate_compressed_blocks_for_chunk(&chunk_id(42), |_| true),
        Err(Error::NotFound)
    ));
}

// ── The full scenario ────────────────────────────────────────────────────────

#[test]
fn scenario_two_partitions_signed_mixed_methods() {
    let dir = tempfile::tempdir().unwrap();
    let base = base_path(&dir, "scenario");
    let key = SigningKeyPair::generate(1024).unwrap();

    // Three chunks, compression block size 64 KiB, partition cap 1_000_000:
    // chunk 0 compressed, chunks 1 and 2 stored verbatim and large enough to
    // spill the container into a second partition.
    let chunk0 = vec![0x5Au8; 400_000];
    let chunk1 = noise(700_000, 61);
    let chunk2 = noise(500_000, 62);

    let mut writer = ContainerWriter::create(
        &base,
        ContainerSettings {
            container_id: ContainerId::new(0x5157_0221),
            container_flags: ContainerFlags::COMPRESSED.union(ContainerFlags::SIGNED),
            signing_key: Some(key.clone()),
            max_partition_size: 1_000_000,
            ..ContainerSettings::new()
        },
    )
    .unwrap();
    writer.append(chunk_id(0), None, &chunk0, "Zstd").unwrap();
    writer.append(chunk_id(1), None, &chunk1, "None").unwrap();
    writer.append(chunk_id(2), None, &chunk2, "None").unwrap();
    let summary = writer.finalize().unwrap();
    assert_eq!(summary.chunk_count, 3);
    assert_eq!(summary.partition_count, 2);

    let reader = StoreReader::open(
        &base,
        OpenOptions {
            verify_key: Some(key.verify_key()),
            ..OpenOptions::default()
        },
    )
    .unwrap();

    assert_eq!(reader.container_file_paths().len(), 2);
    assert_eq!(reader.read(&chunk_id(0), &ReadOptions::default()).unwrap(), chunk0);
    assert_eq!(reader.read(&chunk_id(1), &ReadOptions::default()).unwrap(), chunk1);
    assert_eq!(reader.read(&chunk_id(2), &ReadOptions::default()).unwrap(), chunk2);

    // Async reads agree with the source bytes too.
    let tasks: Vec<_> = (0..3)
        .map(|i| reader.read_async(&chunk_id(i), &ReadOptions::default()))
        .collect();
    let results: Vec<_> = tasks.into_iter().map(|t| t.wait().unwrap()).collect();
    assert_eq!(results[0], chunk0);
    assert_eq!(results[1], chunk1);
    assert_eq!(results[2], chunk2);
}

// ── Read options on the TOC itself ───────────────────────────────────────────

#[test]
fn partial_toc_read_options() {
    let dir = tempfile::tempdir().unwrap();
    let base = base_path(&dir, "partial");

    let mut writer = ContainerWriter::create(
        &base,
        ContainerSettings {
            container_flags: ContainerFlags::INDEXED,
            ..ContainerSettings::new()
        },
    )
    .unwrap();
    writer
        .append(chunk_id(0), Some("Game/File.uasset"), b"bytes", "None")
        .unwrap();
    writer.finalize().unwrap();

    let toc_path = toc_file_path(&base);

    let minimal = TocResource::read(&toc_path, TocReadOptions::minimal(), None).unwrap();
    assert_eq!(minimal.chunk_ids.len(), 1);
    assert!(minimal.chunk_metas.is_empty());
    assert!(minimal.directory_index_buffer.is_empty());

    let with_index = TocResource::read(
        &toc_path,
        TocReadOptions {
            with_directory_index: true,
            with_toc_meta: false,
        },
        None,
    )
    .unwrap();
    assert!(!with_index.directory_index_buffer.is_empty());
    assert!(with_index.chunk_metas.is_empty());

    let all = TocResource::read(&toc_path, TocReadOptions::all(), None).unwrap();
    assert_eq!(all.chunk_metas.len(), 1);
    assert!(!all.directory_index_buffer.is_empty());
}
