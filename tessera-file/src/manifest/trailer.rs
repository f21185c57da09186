use std::ops::Range;

use tessera_error::{TesseraResult, tessera_bail};

use crate::{MAGIC_BYTES, TRAILER_SIZE, VERSION};

/// The fixed-size record at the very end of a file, locating and checksumming the manifest.
///
/// Layout (little-endian):
/// `manifest_offset: u64 | manifest_length: u32 | manifest_crc32: u32 | version: u16 |
/// reserved: u16 | magic: [u8; 4]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trailer {
    pub manifest_offset: u64,
    pub manifest_length: u32,
    pub manifest_checksum: u32,
    pub version: u16,
}

impl Trailer {
    pub fn to_bytes(&self) -> [u8; TRAILER_SIZE] {
        let mut out = [0u8; TRAILER_SIZE];
        out[0..8].copy_from_slice(&self.manifest_offset.to_le_bytes());
        out[8..12].copy_from_slice(&self.manifest_length.to_le_bytes());
        out[12..16].copy_from_slice(&self.manifest_checksum.to_le_bytes());
        out[16..18].copy_from_slice(&self.version.to_le_bytes());
        // 18..20 reserved
        out[20..24].copy_from_slice(&MAGIC_BYTES);
        out
    }

    /// Parse the trailer of a file of `file_size` bytes.
    pub fn parse(bytes: &[u8], file_size: u64) -> TesseraResult<Self> {
        let Ok(bytes) = <&[u8; TRAILER_SIZE]>::try_from(bytes) else {
            tessera_bail!(
                CorruptFile: "trailer must be {} bytes, got {}",
                TRAILER_SIZE,
                bytes.len()
            );
        };

        if bytes[20..24] != MAGIC_BYTES {
            tessera_bail!(
                CorruptFile: "bad magic bytes {}",
                String::from_utf8_lossy(&bytes[20..24])
            );
        }

        let version = u16::from_le_bytes([bytes[16], bytes[17]]);
        if version == 0 {
            tessera_bail!(CorruptFile: "invalid format version 0");
        }
        if version > VERSION {
            tessera_bail!(UnsupportedVersion: version, VERSION);
        }

        let manifest_offset = u64::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]);
        let manifest_length = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        let manifest_checksum = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]);

        let trailer = Self {
            manifest_offset,
            manifest_length,
            manifest_checksum,
            version,
        };

        // The manifest sits between the data and the trailer.
        let expected_end = file_size.checked_sub(TRAILER_SIZE as u64);
        if manifest_offset < MAGIC_BYTES.len() as u64
            || manifest_offset.checked_add(u64::from(manifest_length)) != expected_end
        {
            tessera_bail!(
                CorruptFile: "manifest at {}..+{} does not end at the trailer of a {} byte file",
                manifest_offset,
                manifest_length,
                file_size
            );
        }

        Ok(trailer)
    }

    pub fn manifest_range(&self) -> Range<u64> {
        self.manifest_offset..self.manifest_offset + u64::from(self.manifest_length)
    }

    /// Check the manifest bytes against the recorded checksum.
    pub fn verify_manifest(&self, manifest: &[u8]) -> TesseraResult<()> {
        let actual = crc32fast::hash(manifest);
        if actual != self.manifest_checksum {
            tessera_bail!(
                CorruptFile: "manifest checksum mismatch: expected {:#010x}, got {:#010x}",
                self.manifest_checksum,
                actual
            );
        }
        Ok(())
    }
}
