use std::collections::HashMap;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::RsaPublicKey;
use uuid::Uuid;

use castoc::crypto::AesKey;
use castoc::reader::{toc_file_path, OpenOptions, ReadOptions, StoreReader};
use castoc::signing::VerifyKey;
use castoc::toc::{TocReadOptions, TocResource};

#[derive(Parser)]
#[command(name = "castoc", about = "The CasToc container format CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show container metadata
    Info {
        /// Container base path (without .utoc/.ucas extension)
        container: PathBuf,
        /// AES key as 64 hex chars, for encrypted containers
        #[arg(long)]
        aes_key: Option<String>,
    },
    /// List chunks
    List {
        container: PathBuf,
        #[arg(long)]
        aes_key: Option<String>,
    },
    /// List compression blocks
    Blocks {
        container: PathBuf,
        #[arg(long)]
        aes_key: Option<String>,
    },
    /// Extract all chunks into a directory
    Extract {
        container: PathBuf,
        #[arg(short = 'C', long, default_value = ".")]
        output_dir: PathBuf,
        #[arg(long)]
        aes_key: Option<String>,
    },
    /// Validate the container signature with an RSA public key (PEM)
    Verify {
        container: PathBuf,
        #[arg(long)]
        public_key: PathBuf,
        #[arg(long)]
        aes_key: Option<String>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    match Cli::parse().command {
        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { container, aes_key } => {
            let reader = open_reader(&container, &aes_key, None)?;
            println!("── CasToc container ─────────────────────────────────────");
            println!("  Path             {}", container.display());
            println!("  Container id     {}", reader.container_id());
            println!("  TOC version      {}", reader.version());
            let flags = reader.container_flags();
            println!(
                "  Flags            compressed={} encrypted={} signed={} indexed={}",
                flags.contains(castoc::ContainerFlags::COMPRESSED),
                flags.contains(castoc::ContainerFlags::ENCRYPTED),
                flags.contains(castoc::ContainerFlags::SIGNED),
                flags.contains(castoc::ContainerFlags::INDEXED),
            );
            println!("  Key guid         {}", reader.encryption_key_guid());
            println!("  Chunks           {}", reader.chunk_count());
            println!("  Block size       {} B", reader.compression_block_size());
            println!("  Methods          {}", reader.compression_methods().join(", "));
            println!("  Partitions:");
            for path in reader.container_file_paths() {
                println!("    {}", path.display());
            }
        }

        // ── List ─────────────────────────────────────────────────────────────
        Commands::List { container, aes_key } => {
            let reader = open_reader(&container, &aes_key, None)?;
            println!(
                "{:<42} {:>12} {:>12} {:>7} {:>5}  Hash",
                "Name", "Size", "Compressed", "Blocks", "Part"
            );
            reader.enumerate_chunks(|info| {
                println!(
                    "{:<42} {:>12} {:>12} {:>7} {:>5}  {}",
                    info.file_name,
                    info.size,
                    info.compressed_size,
                    info.num_compressed_blocks,
                    info.partition_index,
                    &hex::encode(&info.chunk_hash.as_bytes()[..6]),
                );
                true
            })?;
        }

        // ── Blocks ───────────────────────────────────────────────────────────
        Commands::Blocks { container, aes_key } => {
            let reader = open_reader(&container, &aes_key, None)?;
            let methods = reader.compression_methods().to_vec();
            println!(
                "{:>8} {:>14} {:>12} {:>12}  Method",
                "Index", "Offset", "Compressed", "Uncompressed"
            );
            let mut index = 0usize;
            reader.enumerate_compressed_blocks(|block| {
                let method = methods
                    .get(block.compression_method_index() as usize)
                    .map(String::as_str)
                    .unwrap_or("?");
                println!(
                    "{:>8} {:>14} {:>12} {:>12}  {}",
                    index,
                    block.offset(),
                    block.compressed_size(),
                    block.uncompressed_size(),
                    method,
                );
                index += 1;
                true
            });
        }

        // ── Extract ──────────────────────────────────────────────────────────
        Commands::Extract {
            container,
            output_dir,
            aes_key,
        } => {
            let reader = open_reader(&container, &aes_key, None)?;
            let mut targets = Vec::new();
            reader.enumerate_chunks(|info| {
                let relative = if info.has_valid_file_name {
                    PathBuf::from(&info.file_name)
                } else {
                    PathBuf::from(format!("{}.bin", info.id))
                };
                targets.push((info.id, relative));
                true
            })?;

            for (id, relative) in targets {
                let data = reader.read(&id, &ReadOptions::default())?;
                let path = output_dir.join(&relative);
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&path, &data)?;
                println!("  extracted  {}", path.display());
            }
            println!("Extracted to: {}", output_dir.display());
        }

        // ── Verify ───────────────────────────────────────────────────────────
        Commands::Verify {
            container,
            public_key,
            aes_key,
        } => {
            let pem = std::fs::read_to_string(&public_key)?;
            let key = RsaPublicKey::from_public_key_pem(&pem)
                .or_else(|_| RsaPublicKey::from_pkcs1_pem(&pem))?;
            let reader = open_reader(&container, &aes_key, Some(VerifyKey::from_public_key(key)))?;
            println!(
                "Signature OK: container {} ({} chunks)",
                reader.container_id(),
                reader.chunk_count()
            );
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn open_reader(
    container: &Path,
    aes_key: &Option<String>,
    verify_key: Option<VerifyKey>,
) -> Result<StoreReader, Box<dyn std::error::Error>> {
    let mut decryption_keys: HashMap<Uuid, AesKey> = HashMap::new();
    if let Some(hex_key) = aes_key {
        // The key map is keyed by the container's own key guid; peek at the
        // TOC header to learn it.
        let toc = TocResource::read(
            &toc_file_path(container),
            TocReadOptions::minimal(),
            None,
        )?;
        decryption_keys.insert(toc.header.encryption_key_guid, AesKey::from_hex(hex_key)?);
    }

    Ok(StoreReader::open(
        container,
        OpenOptions {
            decryption_keys,
            verify_key,
        },
    )?)
}
