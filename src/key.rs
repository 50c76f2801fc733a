use ed25519_dalek::{Signer, SigningKey};

// Entry credit signing key. Only the raw ed25519 seed is supported, there is
// no address encoding or wallet handling here.
pub struct EsKey {
    signing: SigningKey,
}

impl EsKey {
    // Generate a fresh key, for one-off runs and tests
    pub fn new() -> Self {
        EsKey::from_seed(rand::random::<[u8; 32]>())
    }

    pub fn from_seed(seed: [u8; 32]) -> Self {
        EsKey {
            signing: SigningKey::from_bytes(&seed),
        }
    }

    pub fn from_hex(seed: &str) -> Result<Self, hex::FromHexError> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(seed, &mut bytes)?;
        Ok(EsKey::from_seed(bytes))
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.signing.verifying_key().to_bytes()
    }

    pub fn sign(&self, msg: &[u8]) -> [u8; 64] {
        self.signing.sign(msg).to_bytes()
    }
}

impl Default for EsKey {
    fn default() -> Self {
        EsKey::new()
    }
}
