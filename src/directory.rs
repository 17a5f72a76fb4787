//! Optional directory index: human filenames mapped to TOC entry indices.
//!
//! The reader engine treats the index as an opaque byte buffer inside the
//! TOC; only this module knows its shape.  The serialized form is a JSON
//! document wrapped as `[u32 LE payload length][payload][zero pad]`, padded
//! to the AES block size so the whole buffer can be encrypted independently
//! of the chunk data when the container is encrypted.

use byteorder::{LittleEndian, ReadBytesExt};
use serde::{Deserialize, Serialize};

use crate::crypto::{align_to_aes, decrypt_in_place, encrypt_in_place, AesKey};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DirectoryIndex {
    pub entries: Vec<DirectoryIndexEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryIndexEntry {
    pub name: String,
    pub toc_entry_index: u32,
}

/// Serialize (and optionally encrypt) a directory index into the opaque
/// buffer stored in the TOC.
pub fn build_directory_index_buffer(
    index: &DirectoryIndex,
    key: Option<&AesKey>,
) -> Result<Vec<u8>> {
    let payload = serde_json::to_vec(index)
        .map_err(|e| Error::Write(format!("failed to serialize directory index: {e}")))?;

    let wrapped_len = align_to_aes(4 + payload.len() as u64) as usize;
    let mut buffer = Vec::with_capacity(wrapped_len);
    buffer.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buffer.extend_from_slice(&payload);
    buffer.resize(wrapped_len, 0);

    if let Some(key) = key {
        encrypt_in_place(key, &mut buffer)
            .map_err(|e| Error::Write(format!("failed to encrypt directory index: {e}")))?;
    }
    Ok(buffer)
}

/// Parsed directory index, ready for iteration and name lookup.
#[derive(Debug, Default)]
pub struct DirectoryIndexReader {
    index: DirectoryIndex,
}

impl DirectoryIndexReader {
    /// Decrypt (when a key is given) and parse an index buffer.
    pub fn new(buffer: &[u8], key: Option<&AesKey>) -> Result<Self> {
        let corrupt = |msg: String| Error::CorruptToc(msg);

        let mut buffer = buffer.to_vec();
        if let Some(key) = key {
            decrypt_in_place(key, &mut buffer)
                .map_err(|e| corrupt(format!("directory index: {e}")))?;
        }

        let mut cursor = &buffer[..];
        let payload_len = cursor
            .read_u32::<LittleEndian>()
            .map_err(|_| corrupt("directory index buffer too short".into()))?
            as usize;
        if payload_len > cursor.len() {
            return Err(corrupt(
                "directory index payload length exceeds buffer".into(),
            ));
        }

        let index: DirectoryIndex = serde_json::from_slice(&cursor[..payload_len])
            .map_err(|e| corrupt(format!("corrupt directory index: {e}")))?;
        Ok(Self { index })
    }

    pub fn len(&self) -> usize {
        self.index.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.entries.is_empty()
    }

    /// Visit every `(name, toc_entry_index)` pair; the callback returns
    /// `true` to continue, `false` to stop early.
    pub fn iterate<F: FnMut(&str, u32) -> bool>(&self, mut callback: F) {
        for entry in &self.index.entries {
            if !callback(&entry.name, entry.toc_entry_index) {
                break;
            }
        }
    }

    pub fn lookup(&self, name: &str) -> Option<u32> {
        self.index
            .entries
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.toc_entry_index)
    }
}
