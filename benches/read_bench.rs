use criterion::{black_box, criterion_group, criterion_main, Criterion};

use castoc::reader::{OpenOptions, ReadOptions, StoreReader};
use castoc::{ChunkId, ChunkType, ContainerFlags, ContainerSettings, ContainerWriter};

fn chunk_id(n: u64) -> ChunkId {
    ChunkId::new(n, n as u16, ChunkType::PackageData)
}

fn build_container(dir: &tempfile::TempDir) -> StoreReader {
    let base = dir.path().join("bench");
    let mut writer = ContainerWriter::create(
        &base,
        ContainerSettings {
            container_flags: ContainerFlags::COMPRESSED,
            ..ContainerSettings::new()
        },
    )
    .unwrap();

    let compressible = vec![0x33u8; 1024 * 1024];
    let mut mixed = vec![0u8; 1024 * 1024];
    for (i, byte) in mixed.iter_mut().enumerate() {
        *byte = (i * 31 % 251) as u8;
    }

    writer.append(chunk_id(0), None, &compressible, "Zstd").unwrap();
    writer.append(chunk_id(1), None, &mixed, "None").unwrap();
    writer.append(chunk_id(2), None, &mixed, "LZ4").unwrap();
    writer.finalize().unwrap();

    StoreReader::open(&base, OpenOptions::default()).unwrap()
}

fn bench_sync_read(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let reader = build_container(&dir);

    c.bench_function("read_1mb_zstd", |b| {
        b.iter(|| reader.read(black_box(&chunk_id(0)), &ReadOptions::default()).unwrap())
    });
    c.bench_function("read_1mb_verbatim", |b| {
        b.iter(|| reader.read(black_box(&chunk_id(1)), &ReadOptions::default()).unwrap())
    });
    c.bench_function("read_64kb_subrange", |b| {
        b.iter(|| {
            reader
                .read(black_box(&chunk_id(2)), &ReadOptions::range(100_000, 65_536))
                .unwrap()
        })
    });
}

fn bench_async_read(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let reader = build_container(&dir);

    c.bench_function("read_async_3x1mb", |b| {
        b.iter(|| {
            let tasks: Vec<_> = (0..3)
                .map(|i| reader.read_async(&chunk_id(i), &ReadOptions::default()))
                .collect();
            for task in tasks {
                task.wait().unwrap();
            }
        })
    });
}

fn bench_read_compressed(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let reader = build_container(&dir);

    c.bench_function("read_compressed_1mb", |b| {
        b.iter(|| {
            reader
                .read_compressed(black_box(&chunk_id(0)), &ReadOptions::default(), false)
                .unwrap()
        })
    });
}

criterion_group!(benches, bench_sync_read, bench_async_read, bench_read_compressed);
criterion_main!(benches);
