//! Frame codec for ledger files.
//!
//! Every entry on disk is one self-verifying frame:
//!
//! ```text
//! [version: 1 byte][length: 4 bytes LE][payload: N bytes JSON][crc32: 4 bytes LE]
//! ```
//!
//! The CRC covers the payload, so a torn or bit-flipped frame fails loudly
//! on replay instead of deserializing garbage. Files open with a magic
//! header so a ledger file is never confused with anything else.

use std::io::{Error as IoError, ErrorKind, Read, Result as IoResult, Write};

use crc32fast::Hasher;
use serde::{de::DeserializeOwned, Serialize};

/// Current codec version.
const CODEC_VERSION: u8 = 1;

/// Magic bytes identifying kinfold ledger files.
pub const MAGIC: [u8; 4] = *b"KINF";

/// Reject frames claiming more than this many payload bytes.
const MAX_ENTRY_SIZE: usize = 100 * 1024 * 1024;

fn checksum(payload: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(payload);
    hasher.finalize()
}

fn invalid(message: String) -> IoError {
    IoError::new(ErrorKind::InvalidData, message)
}

fn read_array<const N: usize>(reader: &mut impl Read) -> IoResult<[u8; N]> {
    let mut buf = [0u8; N];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

/// Serializes a value into one framed entry.
pub fn encode<T: Serialize>(value: &T) -> IoResult<Vec<u8>> {
    let payload = serde_json::to_vec(value)
        .map_err(|e| invalid(format!("serialization failed: {e}")))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| invalid("entry exceeds u32 length".to_string()))?;

    let mut frame = Vec::with_capacity(1 + 4 + payload.len() + 4);
    frame.push(CODEC_VERSION);
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&payload);
    frame.extend_from_slice(&checksum(&payload).to_le_bytes());
    Ok(frame)
}

/// Reads one framed entry, verifying version, length bound, and checksum.
///
/// # Errors
/// `ErrorKind::UnexpectedEof` on a torn frame; `ErrorKind::InvalidData` on a
/// version mismatch, an oversized length, a failed CRC, or a payload that
/// does not deserialize.
pub fn decode<T: DeserializeOwned>(reader: &mut impl Read) -> IoResult<T> {
    let [version] = read_array::<1>(reader)?;
    if version != CODEC_VERSION {
        return Err(invalid(format!(
            "unsupported codec version: {version} (expected {CODEC_VERSION})"
        )));
    }

    let len = u32::from_le_bytes(read_array::<4>(reader)?) as usize;
    if len > MAX_ENTRY_SIZE {
        return Err(invalid(format!(
            "entry size {len} exceeds maximum {MAX_ENTRY_SIZE}"
        )));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;

    let stored = u32::from_le_bytes(read_array::<4>(reader)?);
    let computed = checksum(&payload);
    if stored != computed {
        return Err(invalid(format!(
            "CRC mismatch: stored={stored:08x}, computed={computed:08x} (data corrupted)"
        )));
    }

    serde_json::from_slice(&payload)
        .map_err(|e| invalid(format!("deserialization failed: {e}")))
}

/// Writes the file header (magic + version).
pub fn write_header(writer: &mut impl Write) -> IoResult<()> {
    writer.write_all(&MAGIC)?;
    writer.write_all(&[CODEC_VERSION])
}

/// Reads and validates the file header, returning the version byte.
pub fn read_header(reader: &mut impl Read) -> IoResult<u8> {
    let magic = read_array::<4>(reader)?;
    if magic != MAGIC {
        return Err(invalid(format!(
            "invalid magic bytes: expected {MAGIC:?}, got {magic:?}"
        )));
    }
    let [version] = read_array::<1>(reader)?;
    Ok(version)
}
