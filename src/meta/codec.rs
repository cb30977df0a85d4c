//! Serialized metadata layout, little-endian, fixed field order:
//!
//! ```text
//! [magic "DMR4": 4] [major: 2] [minor: 2] [payload len: 4]
//! [sequence: 8] [timestamp: 8]
//! [main fingerprint: 316] [spare fingerprint: 316]
//! [entry count: 4] [entries: 16 x N]
//! [CRC32 over everything above: 4]
//! [zero padding to 8 sectors]
//! ```
//!
//! A fingerprint block is path (256, NUL-padded), size in sectors (8),
//! content hash (4), UUID (37, NUL-padded), reserved (11).
//!
//! Rejecting a copy is not fatal here; the reassembly engine evaluates the
//! copies collectively.

use thiserror::Error;

use crate::device::DeviceFingerprint;
use crate::integrity::crc32_of;
use crate::table::RemapEntry;

use super::{MetadataCopy, COPY_BYTES, FORMAT_MAGIC, FORMAT_MAJOR};

const HEADER_LEN: usize = 4 + 2 + 2 + 4 + 8 + 8;
const PATH_LEN: usize = 256;
const UUID_LEN: usize = 37;
const FP_RESERVED_LEN: usize = 11;
const FP_LEN: usize = PATH_LEN + 8 + 4 + UUID_LEN + FP_RESERVED_LEN;
const ENTRY_LEN: usize = 16;
const CRC_LEN: usize = 4;
// fingerprints + entry count, before the entry array
const FIXED_PAYLOAD: usize = 2 * FP_LEN + 4;

/// Hard cap imposed by the 8-sector copy size.
pub const MAX_ENTRIES_PER_COPY: usize = (COPY_BYTES - HEADER_LEN - FIXED_PAYLOAD - CRC_LEN) / ENTRY_LEN;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("buffer too small for a metadata image")]
    Truncated,
    #[error("bad magic {0:#010x}")]
    BadMagic(u32),
    #[error("unknown major version {0}")]
    UnknownVersion(u16),
    #[error("payload length {0} exceeds buffer")]
    LengthOutOfBounds(u32),
    #[error("entry count disagrees with payload length")]
    CountMismatch,
    #[error("crc mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    CrcMismatch { stored: u32, computed: u32 },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error("{0} entries exceed the {1}-entry copy capacity")]
    TooManyEntries(usize, usize),
}

/// Serialize a full image, zero-padded to the fixed copy size.
pub fn encode(copy: &MetadataCopy) -> Result<Vec<u8>, EncodeError> {
    if copy.entries.len() > MAX_ENTRIES_PER_COPY {
        return Err(EncodeError::TooManyEntries(
            copy.entries.len(),
            MAX_ENTRIES_PER_COPY,
        ));
    }

    let payload_len = (FIXED_PAYLOAD + copy.entries.len() * ENTRY_LEN) as u32;
    let mut buf = Vec::with_capacity(COPY_BYTES);
    buf.extend_from_slice(&FORMAT_MAGIC.to_le_bytes());
    buf.extend_from_slice(&copy.version_major.to_le_bytes());
    buf.extend_from_slice(&copy.version_minor.to_le_bytes());
    buf.extend_from_slice(&payload_len.to_le_bytes());
    buf.extend_from_slice(&copy.sequence.to_le_bytes());
    buf.extend_from_slice(&copy.timestamp.to_le_bytes());
    encode_fingerprint(&mut buf, &copy.main_fingerprint);
    encode_fingerprint(&mut buf, &copy.spare_fingerprint);
    buf.extend_from_slice(&(copy.entries.len() as u32).to_le_bytes());
    for entry in &copy.entries {
        buf.extend_from_slice(&entry.main_sector.to_le_bytes());
        buf.extend_from_slice(&entry.spare_sector.to_le_bytes());
    }

    let crc = crc32_of(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    buf.resize(COPY_BYTES, 0);
    Ok(buf)
}

pub fn decode(buf: &[u8]) -> Result<MetadataCopy, DecodeError> {
    if buf.len() < HEADER_LEN + FIXED_PAYLOAD + CRC_LEN {
        return Err(DecodeError::Truncated);
    }

    let magic = read_u32(buf, 0);
    if magic != FORMAT_MAGIC {
        return Err(DecodeError::BadMagic(magic));
    }
    let version_major = read_u16(buf, 4);
    let version_minor = read_u16(buf, 6);
    if version_major != FORMAT_MAJOR {
        return Err(DecodeError::UnknownVersion(version_major));
    }
    let payload_len = read_u32(buf, 8);
    let image_len = HEADER_LEN + payload_len as usize + CRC_LEN;
    if (payload_len as usize) < FIXED_PAYLOAD || image_len > buf.len() {
        return Err(DecodeError::LengthOutOfBounds(payload_len));
    }

    let sequence = read_u64(buf, 12);
    let timestamp = read_u64(buf, 20);
    let main_fingerprint = decode_fingerprint(&buf[HEADER_LEN..HEADER_LEN + FP_LEN]);
    let spare_fingerprint = decode_fingerprint(&buf[HEADER_LEN + FP_LEN..HEADER_LEN + 2 * FP_LEN]);

    let count = read_u32(buf, HEADER_LEN + 2 * FP_LEN) as usize;
    if count * ENTRY_LEN != payload_len as usize - FIXED_PAYLOAD {
        return Err(DecodeError::CountMismatch);
    }

    let crc_offset = HEADER_LEN + payload_len as usize;
    let stored = read_u32(buf, crc_offset);
    let computed = crc32_of(&buf[..crc_offset]);
    if stored != computed {
        return Err(DecodeError::CrcMismatch { stored, computed });
    }

    let mut entries = Vec::with_capacity(count);
    let mut offset = HEADER_LEN + FIXED_PAYLOAD;
    for _ in 0..count {
        let main_sector = read_u64(buf, offset);
        let spare_sector = read_u64(buf, offset + 8);
        entries.push(RemapEntry::new(main_sector, spare_sector));
        offset += ENTRY_LEN;
    }

    Ok(MetadataCopy {
        version_major,
        version_minor,
        sequence,
        timestamp,
        main_fingerprint,
        spare_fingerprint,
        entries,
    })
}

fn encode_fingerprint(buf: &mut Vec<u8>, fp: &DeviceFingerprint) {
    push_padded(buf, fp.path.as_bytes(), PATH_LEN);
    buf.extend_from_slice(&fp.size_sectors.to_le_bytes());
    buf.extend_from_slice(&fp.content_hash.to_le_bytes());
    push_padded(buf, fp.uuid.as_bytes(), UUID_LEN);
    buf.extend_from_slice(&[0u8; FP_RESERVED_LEN]);
}

fn decode_fingerprint(block: &[u8]) -> DeviceFingerprint {
    DeviceFingerprint {
        path: read_padded_str(&block[..PATH_LEN]),
        size_sectors: read_u64(block, PATH_LEN),
        content_hash: read_u32(block, PATH_LEN + 8),
        uuid: read_padded_str(&block[PATH_LEN + 12..PATH_LEN + 12 + UUID_LEN]),
    }
}

// NUL-padded fixed field; over-long values are truncated, keeping one
// trailing NUL so the field always decodes
fn push_padded(buf: &mut Vec<u8>, bytes: &[u8], field_len: usize) {
    let take = bytes.len().min(field_len - 1);
    buf.extend_from_slice(&bytes[..take]);
    buf.extend(std::iter::repeat(0u8).take(field_len - take));
}

fn read_padded_str(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

fn read_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes(buf[offset..offset + 2].try_into().expect("fixed width"))
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(buf[offset..offset + 4].try_into().expect("fixed width"))
}

fn read_u64(buf: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(buf[offset..offset + 8].try_into().expect("fixed width"))
}
