//! Key, application and file parameters passed to DESFire commands.

use zeroize::{Zeroize, ZeroizeOnDrop};

/// Factory-default PICC master key (legacy DES, all zero).
pub const DEFAULT_LEGACY_KEY: [u8; 8] = [0u8; 8];

/// Default AES key of a freshly created application (all zero).
pub const DEFAULT_AES_KEY: [u8; 16] = [0u8; 16];

/// Length of an AES-128 key.
pub const AES_KEY_LEN: usize = 16;

/// An AES-128 key, wiped from memory on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct AesKey([u8; AES_KEY_LEN]);

impl AesKey {
    pub fn new(bytes: [u8; AES_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// The all-zero application default key.
    pub fn application_default() -> Self {
        Self(DEFAULT_AES_KEY)
    }

    pub fn as_bytes(&self) -> &[u8; AES_KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for AesKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AesKey(..)")
    }
}

/// Cipher of an application's keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    /// DES / 2K3DES
    Legacy,
    /// 3K3DES
    TripleDes3K,
    /// AES-128
    Aes,
}

/// Application master key settings byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeySettings(u8);

impl KeySettings {
    /// Master key changeable, listing and create/delete without auth,
    /// configuration changeable (0x0F).
    pub fn factory_default() -> Self {
        Self(0x0F)
    }

    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

impl Default for KeySettings {
    fn default() -> Self {
        Self::factory_default()
    }
}

/// Communication mode for file access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommMode {
    Plain,
    Mac,
    Encrypted,
}

impl CommMode {
    pub fn bits(self) -> u8 {
        match self {
            CommMode::Plain => 0x00,
            CommMode::Mac => 0x01,
            CommMode::Encrypted => 0x03,
        }
    }
}

/// Key number required for each kind of file access.
///
/// `0xE` means free access and `0xF` means denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileAccess {
    pub read: u8,
    pub write: u8,
    pub read_write: u8,
    pub change: u8,
}

impl FileAccess {
    pub const FREE: u8 = 0x0E;
    pub const DENY: u8 = 0x0F;

    /// Every access right bound to a single key.
    pub fn key_only(key_no: u8) -> Self {
        Self {
            read: key_no,
            write: key_no,
            read_write: key_no,
            change: key_no,
        }
    }

    /// The two access-rights bytes, little-endian as sent to the card.
    pub fn to_bytes(self) -> [u8; 2] {
        [
            (self.read_write << 4) | (self.change & 0x0F),
            (self.read << 4) | (self.write & 0x0F),
        ]
    }
}

/// Parameters of a standard data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StandardFile {
    pub file_id: u8,
    pub comm_mode: CommMode,
    pub access: FileAccess,
    pub size: u32,
}

impl StandardFile {
    /// An encrypted file guarded by key 0.
    pub fn encrypted(file_id: u8, size: u32) -> Self {
        Self {
            file_id,
            comm_mode: CommMode::Encrypted,
            access: FileAccess::key_only(0),
            size,
        }
    }
}
