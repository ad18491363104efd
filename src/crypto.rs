/*!
Encryption of spotify tokens at rest
*/
use ring::aead::BoundKey;

use crate::{se, Result};

const NONCE_LEN: usize = 12;

/// ring wants a `NonceSequence` when binding a key. Every value we
/// seal gets a fresh nonce, so the sequence hands out exactly one.
struct SingleNonce(Option<ring::aead::Nonce>);

impl ring::aead::NonceSequence for SingleNonce {
    fn advance(&mut self) -> std::result::Result<ring::aead::Nonce, ring::error::Unspecified> {
        self.0.take().ok_or(ring::error::Unspecified)
    }
}

fn single_nonce(nonce: &[u8]) -> Result<SingleNonce> {
    let nonce = ring::aead::Nonce::try_assume_unique_for_key(nonce)
        .map_err(|_| se!("nonce must be {} bytes", NONCE_LEN))?;
    Ok(SingleNonce(Some(nonce)))
}

fn unbound_key(key: &[u8]) -> Result<ring::aead::UnboundKey> {
    ring::aead::UnboundKey::new(&ring::aead::AES_256_GCM, key)
        .map_err(|_| se!("encryption key must be 32 bytes"))
}

/// Hex encoded ciphertext along with the nonce it was sealed with
#[derive(Debug, Clone, PartialEq)]
pub struct Sealed {
    pub value: String,
    pub nonce: String,
}

impl Sealed {
    /// `nonce:value` form used for the settings table
    pub fn to_stored(&self) -> String {
        format!("{}:{}", self.nonce, self.value)
    }

    pub fn from_stored(s: &str) -> Result<Self> {
        let (nonce, value) = s
            .split_once(':')
            .ok_or_else(|| se!("sealed value missing nonce separator"))?;
        Ok(Self {
            value: value.to_string(),
            nonce: nonce.to_string(),
        })
    }
}

fn new_nonce() -> Result<[u8; NONCE_LEN]> {
    use ring::rand::SecureRandom;
    let mut buf = [0u8; NONCE_LEN];
    ring::rand::SystemRandom::new()
        .fill(&mut buf)
        .map_err(|_| se!("error getting random bytes"))?;
    Ok(buf)
}

/// AES_256_GCM encrypt `plain` under the 32-byte `key`
pub fn seal(plain: &str, key: &[u8]) -> Result<Sealed> {
    let nonce = new_nonce()?;
    let mut key = ring::aead::SealingKey::new(unbound_key(key)?, single_nonce(&nonce)?);
    let mut in_out = plain.as_bytes().to_vec();
    key.seal_in_place_append_tag(ring::aead::Aad::empty(), &mut in_out)
        .map_err(|_| se!("failed encrypting value"))?;
    Ok(Sealed {
        value: hex::encode(&in_out),
        nonce: hex::encode(nonce),
    })
}

/// Reverse of `seal`. Fails if the key is wrong or the value was tampered with.
pub fn open(sealed: &Sealed, key: &[u8]) -> Result<String> {
    let nonce = hex::decode(&sealed.nonce).map_err(|e| se!("nonce hex decode error {}", e))?;
    let mut value = hex::decode(&sealed.value).map_err(|e| se!("value hex decode error {}", e))?;
    let mut key = ring::aead::OpeningKey::new(unbound_key(key)?, single_nonce(&nonce)?);
    let plain = key
        .open_in_place(ring::aead::Aad::empty(), &mut value)
        .map_err(|_| se!("failed decrypting value"))?;
    String::from_utf8(plain.to_vec()).map_err(|e| se!("decrypted value is not utf8 {}", e))
}
