//! Journal record framing.
//!
//! ```text
//! magic (4) | version (2) | length (4) | payload (length) | crc32 (4)
//! ```
//!
//! The CRC covers header and payload. A trailing record cut short by a
//! crash is treated as the end of the journal.

use crate::error::{LedgerError, LedgerResult};

/// Magic bytes identifying a ledger record.
pub const FRAME_MAGIC: [u8; 4] = *b"TXLG";

/// Current frame format version.
pub const FRAME_VERSION: u16 = 1;

/// magic (4) + version (2) + length (4)
pub const HEADER_SIZE: usize = 10;

/// CRC size.
pub const CRC_SIZE: usize = 4;

/// Wraps a payload into a frame.
///
/// # Errors
///
/// Fails if the payload does not fit the 4-byte length field.
pub fn encode_frame(payload: &[u8]) -> LedgerResult<Vec<u8>> {
    let len = u32::try_from(payload.len())
        .map_err(|_| LedgerError::corruption("ledger record payload too large"))?;

    let mut data = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
    data.extend_from_slice(&FRAME_MAGIC);
    data.extend_from_slice(&FRAME_VERSION.to_le_bytes());
    data.extend_from_slice(&len.to_le_bytes());
    data.extend_from_slice(payload);

    let crc = compute_crc32(&data);
    data.extend_from_slice(&crc.to_le_bytes());
    Ok(data)
}

/// Frames decoded from a journal image.
#[derive(Debug, Default)]
pub struct DecodedFrames {
    /// `(offset, payload)` of every complete record.
    pub frames: Vec<(u64, Vec<u8>)>,
    /// Length of the valid prefix; bytes beyond it are a torn tail.
    pub valid_len: u64,
}

/// Splits a journal image into payloads.
///
/// # Errors
///
/// Returns a corruption or checksum error for a complete record that is
/// invalid. An incomplete trailing record is not an error.
pub fn decode_frames(bytes: &[u8]) -> LedgerResult<DecodedFrames> {
    let mut decoded = DecodedFrames::default();
    let mut pos = 0usize;

    while bytes.len() - pos >= HEADER_SIZE {
        let header = &bytes[pos..pos + HEADER_SIZE];
        if header[0..4] != FRAME_MAGIC {
            return Err(LedgerError::corruption(format!("invalid magic at offset {pos}")));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version > FRAME_VERSION {
            return Err(LedgerError::corruption(format!(
                "unsupported version {version} at offset {pos}"
            )));
        }
        let len = u32::from_le_bytes([header[6], header[7], header[8], header[9]]) as usize;

        let total = HEADER_SIZE + len + CRC_SIZE;
        if bytes.len() - pos < total {
            break;
        }

        let payload_end = pos + HEADER_SIZE + len;
        let stored = u32::from_le_bytes([
            bytes[payload_end],
            bytes[payload_end + 1],
            bytes[payload_end + 2],
            bytes[payload_end + 3],
        ]);
        let computed = compute_crc32(&bytes[pos..payload_end]);
        if stored != computed {
            return Err(LedgerError::ChecksumMismatch {
                expected: stored,
                actual: computed,
            });
        }

        decoded
            .frames
            .push((pos as u64, bytes[pos + HEADER_SIZE..payload_end].to_vec()));
        pos += total;
    }

    decoded.valid_len = pos as u64;
    Ok(decoded)
}

/// Computes the CRC32 (IEEE) checksum of data.
pub fn compute_crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut bit = 0;
            while bit < 8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ 0xEDB8_8320
                } else {
                    crc >> 1
                };
                bit += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        crc = (crc >> 8) ^ TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize];
    }
    !crc
}
