//! CasToc packed-container format: a `.utoc` table of contents plus one or
//! more `.ucas` chunk-data partitions, with block-level compression,
//! optional AES encryption, optional RSA signing and perfect-hash chunk
//! lookup.
//!
//! ```no_run
//! use castoc::{ChunkId, ChunkType, ContainerSettings, ContainerWriter};
//! use castoc::{OpenOptions, ReadOptions, StoreReader};
//!
//! // Write
//! let mut writer = ContainerWriter::create("game", ContainerSettings::new())?;
//! let id = ChunkId::new(1, 0, ChunkType::PackageData);
//! writer.append(id, Some("Game/Startup.uasset"), b"asset bytes", "Zstd")?;
//! writer.finalize()?;
//!
//! // Read
//! let reader = StoreReader::open("game", OpenOptions::default())?;
//! let data = reader.read(&id, &ReadOptions::default())?;
//! assert_eq!(data, b"asset bytes");
//! # Ok::<(), castoc::Error>(())
//! ```

pub mod chunk;
pub mod codec;
pub mod crypto;
pub mod directory;
pub mod error;
pub mod header;
pub mod reader;
pub mod signing;
pub mod toc;
pub mod writer;

pub use chunk::{
    ChunkHash, ChunkId, ChunkMeta, ChunkMetaFlags, ChunkType, CompressedBlockEntry,
    OffsetAndLength,
};
pub use crypto::AesKey;
pub use error::{Error, Result};
pub use header::{ContainerFlags, ContainerId, TocHeader, TocVersion};
pub use reader::{
    ChunkReadTask, CompressedReadResult, OpenOptions, ReadOptions, StoreReader, TocReader,
};
pub use signing::{SigningKeyPair, VerifyKey};
pub use toc::{ChunkInfo, TocReadOptions, TocResource};
pub use writer::{ContainerSettings, ContainerSummary, ContainerWriter};
