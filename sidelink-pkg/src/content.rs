//! Content identifiers, content/meta types, and title-id derivation.

use std::fmt;

/// A 16-byte content identifier.
///
/// Content items are named by their id rendered as 32 lowercase hex chars,
/// so the id doubles as the stem of the carrying entry's file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentId(pub [u8; 16]);

impl ContentId {
    /// Parses 32 hex characters into an id.
    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 32 || !s.is_ascii() {
            return None;
        }
        let mut id = [0u8; 16];
        for (i, byte) in id.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).ok()?;
        }
        Some(Self(id))
    }

    /// Derives the id from an entry name of the form `<32 hex>.<ext…>`.
    pub fn from_entry_name(name: &str) -> Option<Self> {
        let stem = name.split('.').next().unwrap_or(name);
        Self::from_hex(stem)
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Kind of one content item inside a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ContentType {
    /// The install-metadata blob itself.
    Meta = 0,
    /// Program code.
    Program = 1,
    /// Data archive.
    Data = 2,
    /// Control information (icons, names).
    Control = 3,
    /// Offline HTML manual.
    HtmlDocument = 4,
    /// Legal information.
    LegalInformation = 5,
    /// Delta fragment of an update.
    DeltaFragment = 6,
}

impl ContentType {
    /// Maps a raw type byte, if it names a known kind.
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Meta),
            1 => Some(Self::Program),
            2 => Some(Self::Data),
            3 => Some(Self::Control),
            4 => Some(Self::HtmlDocument),
            5 => Some(Self::LegalInformation),
            6 => Some(Self::DeltaFragment),
            _ => None,
        }
    }

    /// The raw wire byte.
    pub fn raw(self) -> u8 {
        self as u8
    }
}

/// Kind of an install-metadata record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaType {
    /// System program.
    SystemProgram,
    /// System data archive.
    SystemData,
    /// System update meta.
    SystemUpdate,
    /// Firmware package A.
    BootImagePackage,
    /// Firmware package B.
    BootImagePackageSafe,
    /// An application.
    Application,
    /// An update for an application.
    Patch,
    /// Add-on content for an application.
    AddOnContent,
    /// Delta package between two versions.
    Delta,
    /// Any value this crate does not model; round-tripped untouched.
    Other(u8),
}

impl MetaType {
    /// Maps a raw meta-type byte.
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0x01 => Self::SystemProgram,
            0x02 => Self::SystemData,
            0x03 => Self::SystemUpdate,
            0x04 => Self::BootImagePackage,
            0x05 => Self::BootImagePackageSafe,
            0x80 => Self::Application,
            0x81 => Self::Patch,
            0x82 => Self::AddOnContent,
            0x83 => Self::Delta,
            other => Self::Other(other),
        }
    }

    /// The raw wire byte.
    pub fn raw(self) -> u8 {
        match self {
            Self::SystemProgram => 0x01,
            Self::SystemData => 0x02,
            Self::SystemUpdate => 0x03,
            Self::BootImagePackage => 0x04,
            Self::BootImagePackageSafe => 0x05,
            Self::Application => 0x80,
            Self::Patch => 0x81,
            Self::AddOnContent => 0x82,
            Self::Delta => 0x83,
            Self::Other(raw) => raw,
        }
    }
}

/// Database key of one install-metadata record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetaKey {
    /// Title id the record belongs to.
    pub id: u64,
    /// Title version.
    pub version: u32,
    /// Record kind.
    pub ty: MetaType,
}

/// Derives the base title an update or add-on attaches to.
///
/// Patches live at `title ^ 0x800`; add-on content clears the low 12 bits
/// of `title ^ 0x1000`. Applications are their own base. This mapping must
/// hold exactly or installed updates attach to the wrong title.
pub fn base_title_id(title_id: u64, ty: MetaType) -> u64 {
    match ty {
        MetaType::Patch => title_id ^ 0x800,
        MetaType::AddOnContent => (title_id ^ 0x1000) & !0xFFF,
        _ => title_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_roundtrip() {
        let id = ContentId::from_hex("000102030405060708090a0b0c0d0e0f").unwrap();
        assert_eq!(id.to_string(), "000102030405060708090a0b0c0d0e0f");
    }

    #[test]
    fn entry_name_parsing() {
        let id = ContentId::from_entry_name("0123456789abcdef0123456789abcdef.cnmt.nca").unwrap();
        assert_eq!(id.to_string(), "0123456789abcdef0123456789abcdef");
        assert!(ContentId::from_entry_name("tooshort.nca").is_none());
        assert!(ContentId::from_entry_name("zz23456789abcdef0123456789abcdef.nca").is_none());
    }

    #[test]
    fn base_title_of_patch() {
        let id = 0x0100_0000_0001_0000;
        assert_eq!(base_title_id(id, MetaType::Patch), id ^ 0x800);
    }

    #[test]
    fn base_title_of_addon() {
        let id = 0x0100_0000_0001_1234;
        assert_eq!(base_title_id(id, MetaType::AddOnContent), (id ^ 0x1000) & !0xFFF);
    }

    #[test]
    fn base_title_of_application_is_identity() {
        let id = 0x0100_0000_0001_0000;
        assert_eq!(base_title_id(id, MetaType::Application), id);
    }

    #[test]
    fn meta_type_raw_roundtrip() {
        for raw in [0x01, 0x05, 0x80, 0x81, 0x82, 0x83, 0x42] {
            assert_eq!(MetaType::from_raw(raw).raw(), raw);
        }
    }
}
