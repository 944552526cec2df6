use chrono::Utc;

use crate::codec::Codec;
use crate::error::{CairnError, Result};
use crate::resource::{Checksum, ResourceKind};

/// Packfile format version, written plaintext in the trailer.
pub const PACKFILE_VERSION: u32 = 1;

/// Trailer: `version:u32-le` + `footer_length:u8`. Plaintext and fixed-width
/// so parsing can bootstrap without knowing the key.
pub const TRAILER_LEN: usize = 5;

/// One index record: `(checksum:32, kind:u8, offset:u64-le, length:u32-le, flags:u8)`.
const INDEX_ENTRY_LEN: usize = 46;

/// Footer payload: `version:u32, timestamp:i64 (ns), index_offset:u64,
/// index_length:u32, index_checksum:32, blob_count:u32`.
const FOOTER_LEN: usize = 60;

/// Index entry flag: the blob is addressed by an assigned identifier
/// (snapshot headers), so its name is not the hash of its plaintext.
pub const FLAG_IDENTIFIER_ADDRESSED: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub checksum: Checksum,
    pub kind: ResourceKind,
    pub offset: u64,
    pub length: u32,
    pub flags: u8,
}

#[derive(Debug, Clone, Copy)]
pub struct Footer {
    pub version: u32,
    pub timestamp: i64,
    pub index_offset: u64,
    pub index_length: u32,
    pub index_checksum: Checksum,
    pub blob_count: u32,
}

fn encode_index(entries: &[IndexEntry]) -> Vec<u8> {
    let mut out = Vec::with_capacity(entries.len() * INDEX_ENTRY_LEN);
    for entry in entries {
        out.extend_from_slice(&entry.checksum.0);
        out.push(entry.kind as u8);
        out.extend_from_slice(&entry.offset.to_le_bytes());
        out.extend_from_slice(&entry.length.to_le_bytes());
        out.push(entry.flags);
    }
    out
}

fn decode_index(data: &[u8]) -> Result<Vec<IndexEntry>> {
    if data.len() % INDEX_ENTRY_LEN != 0 {
        return Err(CairnError::Corruption(format!(
            "packfile index length {} is not a multiple of the record size",
            data.len()
        )));
    }
    let mut entries = Vec::with_capacity(data.len() / INDEX_ENTRY_LEN);
    for record in data.chunks_exact(INDEX_ENTRY_LEN) {
        let mut checksum = [0u8; 32];
        checksum.copy_from_slice(&record[..32]);
        let kind = ResourceKind::from_u8(record[32])?;
        let offset = u64::from_le_bytes(record[33..41].try_into().expect("8-byte offset"));
        let length = u32::from_le_bytes(record[41..45].try_into().expect("4-byte length"));
        let flags = record[45];
        entries.push(IndexEntry {
            checksum: Checksum(checksum),
            kind,
            offset,
            length,
            flags,
        });
    }
    Ok(entries)
}

fn encode_footer(footer: &Footer) -> Vec<u8> {
    let mut out = Vec::with_capacity(FOOTER_LEN);
    out.extend_from_slice(&footer.version.to_le_bytes());
    out.extend_from_slice(&footer.timestamp.to_le_bytes());
    out.extend_from_slice(&footer.index_offset.to_le_bytes());
    out.extend_from_slice(&footer.index_length.to_le_bytes());
    out.extend_from_slice(&footer.index_checksum.0);
    out.extend_from_slice(&footer.blob_count.to_le_bytes());
    out
}

fn decode_footer(data: &[u8]) -> Result<Footer> {
    if data.len() != FOOTER_LEN {
        return Err(CairnError::Corruption(format!(
            "packfile footer has length {}, expected {FOOTER_LEN}",
            data.len()
        )));
    }
    let mut index_checksum = [0u8; 32];
    index_checksum.copy_from_slice(&data[24..56]);
    Ok(Footer {
        version: u32::from_le_bytes(data[0..4].try_into().expect("4-byte version")),
        timestamp: i64::from_le_bytes(data[4..12].try_into().expect("8-byte timestamp")),
        index_offset: u64::from_le_bytes(data[12..20].try_into().expect("8-byte offset")),
        index_length: u32::from_le_bytes(data[20..24].try_into().expect("4-byte length")),
        index_checksum: Checksum(index_checksum),
        blob_count: u32::from_le_bytes(data[56..60].try_into().expect("4-byte count")),
    })
}

/// A sealed packfile ready for upload.
pub struct FinalizedPackfile {
    /// Checksum of the complete packfile bytes; the blob's storage name.
    pub checksum: Checksum,
    pub bytes: Vec<u8>,
    /// Index entries with offsets/lengths relative to the packfile start.
    pub entries: Vec<IndexEntry>,
}

/// Accumulates codec-encoded blobs and seals them into a packfile:
/// `[blob₁ … blobₙ | index | footer | version:u32-le | footer_length:u8]`.
pub struct PackfileBuilder {
    codec: std::sync::Arc<Codec>,
    max_size: u64,
    buffer: Vec<u8>,
    entries: Vec<IndexEntry>,
}

impl PackfileBuilder {
    pub fn new(codec: std::sync::Arc<Codec>, max_size: u64) -> Self {
        Self {
            codec,
            max_size,
            buffer: Vec::new(),
            entries: Vec::new(),
        }
    }

    /// Add one blob. Computes the checksum of `plaintext` (not the encoded
    /// form), appends the encoded bytes and records the index entry.
    /// Returns `PackfileFull` once the body would exceed the configured
    /// maximum; the caller rolls to a new builder. The first blob is always
    /// accepted so an oversized blob cannot wedge the pipeline.
    pub fn add(&mut self, kind: ResourceKind, plaintext: &[u8]) -> Result<(Checksum, u64, u32)> {
        let checksum = self.codec.checksum(plaintext);
        self.append(kind, checksum, plaintext, 0)?;
        let entry = self.entries.last().expect("entry just appended");
        Ok((checksum, entry.offset, entry.length))
    }

    /// Add a blob addressed by an assigned identifier rather than its
    /// content hash (snapshot headers carry a random id).
    pub fn add_with_identifier(
        &mut self,
        kind: ResourceKind,
        identifier: Checksum,
        plaintext: &[u8],
    ) -> Result<(u64, u32)> {
        self.append(kind, identifier, plaintext, FLAG_IDENTIFIER_ADDRESSED)?;
        let entry = self.entries.last().expect("entry just appended");
        Ok((entry.offset, entry.length))
    }

    fn append(
        &mut self,
        kind: ResourceKind,
        checksum: Checksum,
        plaintext: &[u8],
        flags: u8,
    ) -> Result<()> {
        let encoded = self.codec.encode(kind, plaintext)?;

        if !self.buffer.is_empty()
            && self.buffer.len() as u64 + encoded.len() as u64 > self.max_size
        {
            return Err(CairnError::PackfileFull);
        }

        let offset = self.buffer.len() as u64;
        let length = encoded.len() as u32;
        self.buffer.extend_from_slice(&encoded);
        self.entries.push(IndexEntry {
            checksum,
            kind,
            offset,
            length,
            flags,
        });
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn blob_count(&self) -> usize {
        self.entries.len()
    }

    pub fn size(&self) -> u64 {
        self.buffer.len() as u64
    }

    /// Append the encoded index, the encoded footer and the plaintext
    /// trailer, then checksum the whole file.
    pub fn finalize(self) -> Result<FinalizedPackfile> {
        let mut bytes = self.buffer;
        let index_offset = bytes.len() as u64;

        let index_plain = encode_index(&self.entries);
        let index_encoded = self.codec.encode(ResourceKind::Index, &index_plain)?;
        let index_checksum = self.codec.checksum(&index_encoded);
        let index_length = index_encoded.len() as u32;
        bytes.extend_from_slice(&index_encoded);

        let footer = Footer {
            version: PACKFILE_VERSION,
            timestamp: Utc::now().timestamp_nanos_opt().unwrap_or(0),
            index_offset,
            index_length,
            index_checksum,
            blob_count: self.entries.len() as u32,
        };
        let footer_encoded = self
            .codec
            .encode(ResourceKind::Packfile, &encode_footer(&footer))?;
        if footer_encoded.len() > u8::MAX as usize {
            return Err(CairnError::Other(format!(
                "encoded packfile footer too large: {} bytes",
                footer_encoded.len()
            )));
        }
        let footer_length = footer_encoded.len() as u8;
        bytes.extend_from_slice(&footer_encoded);

        bytes.extend_from_slice(&PACKFILE_VERSION.to_le_bytes());
        bytes.push(footer_length);

        let checksum = self.codec.checksum(&bytes);
        Ok(FinalizedPackfile {
            checksum,
            bytes,
            entries: self.entries,
        })
    }
}

/// Random-access reader over a packfile's full bytes.
pub struct PackfileReader<'a> {
    codec: &'a Codec,
    bytes: &'a [u8],
    footer: Footer,
    entries: Vec<IndexEntry>,
}

impl<'a> PackfileReader<'a> {
    /// Parse the trailer, decode the footer, verify the index checksum and
    /// decode the index.
    pub fn open(codec: &'a Codec, bytes: &'a [u8]) -> Result<Self> {
        if bytes.len() < TRAILER_LEN {
            return Err(CairnError::Corruption("packfile shorter than trailer".into()));
        }
        let trailer_start = bytes.len() - TRAILER_LEN;
        let version = u32::from_le_bytes(
            bytes[trailer_start..trailer_start + 4]
                .try_into()
                .expect("4-byte trailer version"),
        );
        if version > PACKFILE_VERSION {
            return Err(CairnError::UnsupportedVersion(version));
        }
        let footer_length = bytes[bytes.len() - 1] as usize;
        if footer_length == 0 || footer_length > trailer_start {
            return Err(CairnError::Corruption("bad packfile footer length".into()));
        }

        let footer_start = trailer_start - footer_length;
        let footer_plain =
            codec.decode_expect(ResourceKind::Packfile, &bytes[footer_start..trailer_start])?;
        let footer = decode_footer(&footer_plain)?;

        let index_start = footer.index_offset as usize;
        let index_end = index_start + footer.index_length as usize;
        if index_end > footer_start {
            return Err(CairnError::Corruption("packfile index out of bounds".into()));
        }
        let index_bytes = &bytes[index_start..index_end];
        if codec.checksum(index_bytes) != footer.index_checksum {
            return Err(CairnError::Corruption("packfile index checksum mismatch".into()));
        }

        let index_plain = codec.decode_expect(ResourceKind::Index, index_bytes)?;
        let entries = decode_index(&index_plain)?;
        if entries.len() as u32 != footer.blob_count {
            return Err(CairnError::Corruption(format!(
                "packfile blob count mismatch: index has {}, footer says {}",
                entries.len(),
                footer.blob_count
            )));
        }

        Ok(Self {
            codec,
            bytes,
            footer,
            entries,
        })
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn footer(&self) -> &Footer {
        &self.footer
    }

    fn find(&self, checksum: &Checksum) -> Result<&IndexEntry> {
        self.entries
            .iter()
            .find(|e| e.checksum == *checksum)
            .ok_or_else(|| CairnError::NotFound(format!("blob {checksum} not in packfile")))
    }

    /// Fetch and decode one blob, verifying its plaintext checksum against
    /// the index.
    pub fn get_blob(&self, checksum: &Checksum) -> Result<Vec<u8>> {
        let entry = *self.find(checksum)?;
        let start = entry.offset as usize;
        let end = start + entry.length as usize;
        if end > self.bytes.len() {
            return Err(CairnError::Corruption("packfile blob out of bounds".into()));
        }
        let plaintext = self.codec.decode_expect(entry.kind, &self.bytes[start..end])?;
        if entry.flags & FLAG_IDENTIFIER_ADDRESSED == 0
            && self.codec.checksum(&plaintext) != entry.checksum
        {
            return Err(CairnError::Corruption(format!(
                "blob checksum mismatch for {checksum}"
            )));
        }
        Ok(plaintext)
    }

    /// Decode one blob and return a plaintext sub-range. The sub-range is
    /// applied after decode; only the targeted blob is decoded.
    pub fn get_blob_range(
        &self,
        checksum: &Checksum,
        sub_offset: u64,
        sub_length: u32,
    ) -> Result<Vec<u8>> {
        let plaintext = self.get_blob(checksum)?;
        let start = sub_offset as usize;
        let end = start + sub_length as usize;
        if end > plaintext.len() {
            return Err(CairnError::InvalidParams(format!(
                "blob range {start}..{end} out of bounds (blob is {} bytes)",
                plaintext.len()
            )));
        }
        Ok(plaintext[start..end].to_vec())
    }
}
