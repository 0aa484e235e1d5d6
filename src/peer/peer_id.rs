use std::fmt;

use crate::constants::{CLIENT_PREFIX, ID_LEN};
use rand::Rng;

/// A 20-byte peer identifier.
///
/// Peer ids follow the Azureus-style format `-XX0000-<random>`. Ours use the
/// `-BW0001-` prefix followed by twelve random bytes.
///
/// # Examples
///
/// ```
/// use blockwire::peer::PeerId;
///
/// let peer_id = PeerId::random();
/// assert_eq!(peer_id.as_bytes().len(), 20);
/// assert_eq!(peer_id.client_id(), Some("BW0001"));
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId(pub [u8; ID_LEN]);

impl PeerId {
    /// Generates a peer id from the given random source.
    ///
    /// Seeded generators give reproducible ids in tests.
    pub fn generate<R: Rng>(rng: &mut R) -> Self {
        let mut id = [0u8; ID_LEN];
        id[..CLIENT_PREFIX.len()].copy_from_slice(CLIENT_PREFIX);
        rng.fill(&mut id[CLIENT_PREFIX.len()..]);
        Self(id)
    }

    /// Generates a peer id from the thread-local generator.
    pub fn random() -> Self {
        Self::generate(&mut rand::rng())
    }

    /// Returns `None` if the slice is not exactly 20 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let id: [u8; ID_LEN] = bytes.try_into().ok()?;
        Some(Self(id))
    }

    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    /// The 6-character client id of an Azureus-style peer id.
    pub fn client_id(&self) -> Option<&str> {
        if self.0[0] == b'-' && self.0[7] == b'-' {
            std::str::from_utf8(&self.0[1..7]).ok()
        } else {
            None
        }
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(client) = self.client_id() {
            write!(f, "PeerId({})", client)
        } else {
            write!(f, "PeerId({:02x?})", &self.0[..8])
        }
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            if byte.is_ascii_alphanumeric() || *byte == b'-' {
                write!(f, "{}", *byte as char)?;
            } else {
                write!(f, "%{:02x}", byte)?;
            }
        }
        Ok(())
    }
}
