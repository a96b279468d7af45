use std::borrow::Cow;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Where a recorded closure was compiled from. The prefix becomes part of the file id, so two
/// kinds never share an id even when their keys collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompileSiteKind {
    ScriptDump,
    TextConversion,
    ManualReflection,
}

impl CompileSiteKind {
    pub fn prefix(self) -> &'static str {
        match self {
            CompileSiteKind::ScriptDump => "Sm",
            CompileSiteKind::TextConversion => "Into",
            CompileSiteKind::ManualReflection => "Manual",
        }
    }
}

/// Objects that can key a compile site. Equal values must yield equal bytes in every process.
pub trait KeySource {
    fn key_bytes(&self) -> Cow<'_, [u8]>;
}

impl KeySource for str {
    fn key_bytes(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(self.as_bytes())
    }
}

impl KeySource for String {
    fn key_bytes(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(self.as_bytes())
    }
}

impl KeySource for [u8] {
    fn key_bytes(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(self)
    }
}

impl KeySource for Path {
    fn key_bytes(&self) -> Cow<'_, [u8]> {
        Cow::Owned(self.to_string_lossy().replace('\\', "/").into_bytes())
    }
}

impl KeySource for PathBuf {
    fn key_bytes(&self) -> Cow<'_, [u8]> {
        self.as_path().key_bytes()
    }
}

impl<T: KeySource + ?Sized> KeySource for &T {
    fn key_bytes(&self) -> Cow<'_, [u8]> {
        (**self).key_bytes()
    }
}

/// Identifier shared by the recording pass and the serving pass for one script source.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(String);

impl FileId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FileId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// First eight bytes of the blake3 digest of the key, read as a little endian i64.
pub fn stable_hash<K: KeySource + ?Sized>(key: &K) -> i64 {
    let digest = blake3::hash(&key.key_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest.as_bytes()[..8]);
    i64::from_le_bytes(head)
}

pub fn identify<K: KeySource + ?Sized>(kind: CompileSiteKind, key: &K) -> FileId {
    // Shift into [0, 2^64) so the id never carries a sign.
    let shifted = i128::from(stable_hash(key)) + (1i128 << 63);
    FileId(format!("{}{}", kind.prefix(), shifted))
}
