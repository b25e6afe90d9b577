//! Install-metadata blob: parse and install-form reconstruction.
//!
//! A blob is a 32-byte header, an opaque extended header whose layout
//! depends on the meta type, `content_count` packaged content records
//! (32-byte hash + 24-byte record), `content_meta_count` 16-byte meta
//! keys, and — for patches — trailing extended data.

use tracing::{debug, warn};

use crate::content::{ContentId, ContentType, MetaKey, MetaType};
use crate::{Error, Result};

/// Fixed header size.
pub const META_HEADER_LEN: usize = 0x20;

/// Packaged content record size (hash + record).
pub const PACKAGED_RECORD_LEN: usize = 0x38;

/// Content record size in the rebuilt install form.
pub const CONTENT_RECORD_LEN: usize = 0x18;

/// Meta-key record size.
pub const META_KEY_LEN: usize = 0x10;

/// Rebuilt install header size.
const INSTALL_HEADER_LEN: usize = 0x8;

/// Highest content-type byte accepted from packaged records.
const VALID_CONTENT_TYPE_MAX: u8 = 5;

/// Offset of the required-system-version field inside an application or
/// patch extended header.
const EXT_REQUIRED_VERSION_OFFSET: usize = 8;

/// Offset of the extended-data size inside a patch extended header.
const PATCH_EXT_DATA_SIZE_OFFSET: usize = 12;

/// Minimum patch extended-header size for extended data to be declared.
const PATCH_EXT_HEADER_LEN: usize = 0x18;

/// Parsed fixed header of an install-metadata blob.
#[derive(Debug, Clone, Copy)]
pub struct MetaHeader {
    /// Title this metadata describes.
    pub title_id: u64,
    /// Title version.
    pub version: u32,
    /// Record kind (application, patch, add-on…).
    pub ty: MetaType,
    /// Size of the type-specific extended header.
    pub extended_header_len: u16,
    /// Number of packaged content records.
    pub content_count: u16,
    /// Number of meta-key records.
    pub content_meta_count: u16,
    /// Attribute flags, copied through on rebuild.
    pub attributes: u8,
    /// Storage id as packaged (reset on rebuild).
    pub storage_id: u8,
    /// Install type byte.
    pub install_type: u8,
    /// Committed flag.
    pub committed: u8,
    /// Minimum system version the title declares.
    pub required_system_version: u32,
}

/// One content record as carried in the metadata blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRecord {
    /// Identifier of the content item.
    pub id: ContentId,
    /// Declared size in bytes (wire form splits this into u32 low, u8 high).
    pub size: u64,
    /// Content kind.
    pub ty: ContentType,
    /// Attribute byte, copied through verbatim.
    pub attr: u8,
    /// Id offset for multi-program titles.
    pub id_offset: u8,
}

impl ContentRecord {
    /// Encodes the 24-byte install form.
    #[allow(clippy::cast_possible_truncation)]
    pub fn encode(&self) -> [u8; CONTENT_RECORD_LEN] {
        let mut buf = [0u8; CONTENT_RECORD_LEN];
        buf[0..16].copy_from_slice(&self.id.0);
        buf[16..20].copy_from_slice(&((self.size & 0xFFFF_FFFF) as u32).to_le_bytes());
        buf[20] = ((self.size >> 32) & 0xFF) as u8;
        buf[21] = self.attr;
        buf[22] = self.ty.raw();
        buf[23] = self.id_offset;
        buf
    }

    /// Decodes the 24-byte record form. Returns `None` when the type byte
    /// falls outside the accepted range.
    fn decode(buf: &[u8]) -> Option<Self> {
        let raw_type = buf[22];
        if raw_type > VALID_CONTENT_TYPE_MAX {
            return None;
        }
        let mut id = [0u8; 16];
        id.copy_from_slice(&buf[0..16]);
        let size_low = u64::from(u32_at(buf, 16));
        let size_high = u64::from(buf[20]);
        Some(Self {
            id: ContentId(id),
            size: size_low | (size_high << 32),
            ty: ContentType::from_raw(raw_type)?,
            attr: buf[21],
            id_offset: buf[23],
        })
    }
}

/// A parsed install-metadata blob.
///
/// The extended header is retained opaquely; its only fields this module
/// touches are the required-system-version (zeroed on request during
/// rebuild) and a patch's extended-data size.
#[derive(Debug, Clone)]
pub struct InstallMeta {
    header: MetaHeader,
    extended: Vec<u8>,
    records: Vec<ContentRecord>,
    raw: Vec<u8>,
}

impl InstallMeta {
    /// Parses a metadata blob.
    ///
    /// Records whose content-type byte is out of range are dropped rather
    /// than failing the parse; everything else is length-checked.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < META_HEADER_LEN {
            return Err(Error::MetaTruncated("header"));
        }

        let header = MetaHeader {
            title_id: u64_at(data, 0),
            version: u32_at(data, 8),
            ty: MetaType::from_raw(data[12]),
            extended_header_len: u16_at(data, 14),
            content_count: u16_at(data, 16),
            content_meta_count: u16_at(data, 18),
            attributes: data[20],
            storage_id: data[21],
            install_type: data[22],
            committed: data[23],
            required_system_version: u32_at(data, 24),
        };

        let mut offset = META_HEADER_LEN;
        let ext_len = usize::from(header.extended_header_len);
        if data.len() < offset + ext_len {
            return Err(Error::MetaTruncated("extended header"));
        }
        let extended = data[offset..offset + ext_len].to_vec();
        offset += ext_len;

        let mut records = Vec::with_capacity(usize::from(header.content_count));
        for _ in 0..header.content_count {
            if data.len() < offset + PACKAGED_RECORD_LEN {
                return Err(Error::MetaTruncated("content records"));
            }
            // Skip the 32-byte hash; the platform re-verifies content anyway.
            let record = &data[offset + 32..offset + PACKAGED_RECORD_LEN];
            match ContentRecord::decode(record) {
                Some(rec) => records.push(rec),
                None => debug!(raw_type = record[22], "dropping content record of unknown type"),
            }
            offset += PACKAGED_RECORD_LEN;
        }

        Ok(Self {
            header,
            extended,
            records,
            raw: data.to_vec(),
        })
    }

    /// The fixed header.
    pub fn header(&self) -> &MetaHeader {
        &self.header
    }

    /// The content records that survived parsing, in blob order.
    pub fn records(&self) -> &[ContentRecord] {
        &self.records
    }

    /// The database key this metadata registers under.
    pub fn key(&self) -> MetaKey {
        MetaKey {
            id: self.header.title_id,
            version: self.header.version,
            ty: self.header.ty,
        }
    }

    /// Rebuilds the blob in the form the content-meta database stores.
    ///
    /// `meta_record` describes the container entry carrying this blob; it
    /// is not present in the packaged records and is emitted first. With
    /// `ignore_required_version`, the minimum-firmware field of an
    /// application or patch extended header is zeroed in the output copy.
    pub fn build_install_blob(
        &self,
        meta_record: &ContentRecord,
        ignore_required_version: bool,
    ) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            INSTALL_HEADER_LEN
                + self.extended.len()
                + (self.records.len() + 1) * CONTENT_RECORD_LEN,
        );

        // Install header: counts as stored, storage id reset.
        out.extend_from_slice(&self.header.extended_header_len.to_le_bytes());
        out.extend_from_slice(&(self.records.len() as u16 + 1).to_le_bytes());
        out.extend_from_slice(&self.header.content_meta_count.to_le_bytes());
        out.push(self.header.attributes);
        out.push(0);

        out.extend_from_slice(&self.extended);
        if ignore_required_version
            && matches!(self.header.ty, MetaType::Application | MetaType::Patch)
            && self.extended.len() >= EXT_REQUIRED_VERSION_OFFSET + 4
        {
            let at = INSTALL_HEADER_LEN + EXT_REQUIRED_VERSION_OFFSET;
            out[at..at + 4].fill(0);
        }

        out.extend_from_slice(&meta_record.encode());
        for record in &self.records {
            out.extend_from_slice(&record.encode());
        }

        if matches!(self.header.ty, MetaType::Patch) {
            self.append_patch_extended_data(&mut out);
        }
        out
    }

    /// Appends a patch's raw extended data, located after the packaged
    /// tables in the source blob.
    fn append_patch_extended_data(&self, out: &mut Vec<u8>) {
        if self.extended.len() < PATCH_EXT_HEADER_LEN {
            return;
        }
        let ext_data_len = u32_at(&self.extended, PATCH_EXT_DATA_SIZE_OFFSET) as usize;
        if ext_data_len == 0 {
            return;
        }
        let start = META_HEADER_LEN
            + self.extended.len()
            + usize::from(self.header.content_count) * PACKAGED_RECORD_LEN
            + usize::from(self.header.content_meta_count) * META_KEY_LEN;
        match self.raw.get(start..start + ext_data_len) {
            Some(ext_data) => out.extend_from_slice(ext_data),
            None => warn!(
                declared = ext_data_len,
                "patch extended data exceeds blob; skipping"
            ),
        }
    }
}

fn u16_at(buf: &[u8], off: usize) -> u16 {
    let mut b = [0u8; 2];
    b.copy_from_slice(&buf[off..off + 2]);
    u16::from_le_bytes(b)
}

fn u32_at(buf: &[u8], off: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&buf[off..off + 4]);
    u32::from_le_bytes(b)
}

fn u64_at(buf: &[u8], off: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[off..off + 8]);
    u64::from_le_bytes(b)
}
