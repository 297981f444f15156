//! Key material issued to a card.

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Serialize, Serializer};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of the generated key and of the generated secret.
pub const MATERIAL_LEN: usize = 16;

/// Length of [`ProvisioningPayload::to_hex`].
pub const PAYLOAD_HEX_LEN: usize = 4 * MATERIAL_LEN;

/// Fill a fresh 16-byte buffer from the OS CSPRNG.
pub fn random_material() -> [u8; MATERIAL_LEN] {
    let mut bytes = [0u8; MATERIAL_LEN];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Application key and secret bound to a provisioned card.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct ProvisioningPayload {
    key: [u8; MATERIAL_LEN],
    secret: [u8; MATERIAL_LEN],
}

impl ProvisioningPayload {
    pub fn new(key: [u8; MATERIAL_LEN], secret: [u8; MATERIAL_LEN]) -> Self {
        Self { key, secret }
    }

    /// Key written to key slot 0 of the application.
    pub fn key(&self) -> &[u8; MATERIAL_LEN] {
        &self.key
    }

    /// Secret stored in the application's data file.
    pub fn secret(&self) -> &[u8; MATERIAL_LEN] {
        &self.secret
    }

    /// `hex(key) ++ hex(secret)`, always 64 lowercase hex characters.
    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(PAYLOAD_HEX_LEN);
        out.push_str(&hex::encode(self.key));
        out.push_str(&hex::encode(self.secret));
        out
    }

    /// Short BLAKE3 digest for log correlation.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.key);
        hasher.update(&self.secret);
        hex::encode(&hasher.finalize().as_bytes()[..8])
    }
}

impl fmt::Debug for ProvisioningPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvisioningPayload")
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

impl Serialize for ProvisioningPayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}
