use sha1::{Digest, Sha1};
use std::fmt;

/// A 20-byte SHA-1 digest.
///
/// Used for piece hashes and for the info hash that identifies a torrent.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Sha1Hash(pub [u8; 20]);

/// The SHA-1 of a torrent's info dictionary.
pub type InfoHash = Sha1Hash;

impl Sha1Hash {
    /// Hashes `data`.
    pub fn digest(data: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(data);
        let mut arr = [0u8; 20];
        arr.copy_from_slice(&hasher.finalize());
        Self(arr)
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != 20 {
            return None;
        }
        let mut arr = [0u8; 20];
        arr.copy_from_slice(bytes);
        Some(Self(arr))
    }

    /// Parses a 40-character hex string. Upper and lower case digits are
    /// both accepted.
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex_decode(s)?;
        Self::from_bytes(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex_encode(&self.0)
    }

    /// Returns true if `data` hashes to this digest.
    pub fn matches(&self, data: &[u8]) -> bool {
        Self::digest(data) == *self
    }
}

impl fmt::Debug for Sha1Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sha1Hash({})", self.to_hex())
    }
}

impl fmt::Display for Sha1Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
        use std::fmt::Write;
        let _ = write!(s, "{:02x}", b);
        s
    })
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 || !s.is_ascii() {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}
