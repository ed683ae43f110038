//! End-to-end message encryption.
//!
//! Every message part is sealed to the recipient's X25519 key under a fresh
//! ephemeral keypair, so each transaction carries its own key agreement.
//!
//! # Key schedule
//!
//! ```text
//! shared   = X25519(ephemeral_secret, recipient_public)
//! ikm      = shared || ephemeral_public || recipient_public
//! aead_key = BLAKE3-derive_key("zmail 2024 envelope aead key", ikm)
//! mac_key  = BLAKE3-derive_key("zmail 2024 envelope mac key", ikm)
//! ct       = XChaCha20-Poly1305(aead_key, nonce, plaintext, aad = ephemeral_public)
//! mac      = BLAKE3-keyed(mac_key, ct || nonce || ephemeral_public)
//! ```
//!
//! # Memo layout
//!
//! ```text
//! 0-1    magic 0x5A 0x4D ("ZM")
//! 2      version 0x01
//! 3-26   nonce (24)
//! 27-58  ephemeral public key (32)
//! 59-90  MAC (32)
//! 91-92  ciphertext length (u16 little-endian)
//! 93..   ciphertext (at most 411 bytes)
//! ```
//!
//! The envelope does not identify the sender.
//!
//! # Address keys
//!
//! [`derive_public_key_from_address`] maps an address string straight to a
//! curve point. Anyone who knows the address can also compute the matching
//! secret with [`derive_address_keypair`], so address-keyed messages only
//! hide content from parties who do not know the recipient address. This is
//! a placeholder until recipients publish a key derived from their spending
//! key with [`derive_encryption_keypair`].

use std::fmt;

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use curve25519_dalek::montgomery::MontgomeryPoint;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::constants::{
    ENVELOPE_HEADER_LEN, ENVELOPE_MAGIC, ENVELOPE_VERSION, MAC_LEN, MAX_CIPHERTEXT_LEN, NONCE_LEN,
    PUBLIC_KEY_LEN,
};
use crate::error::ZmailError;
use crate::types::SpendingKey;

const SPENDING_KEY_CONTEXT: &str = "zmail 2024 spending key to x25519 secret";
const ADDRESS_KEY_CONTEXT: &str = "zmail 2024 address to x25519 secret";
const AEAD_KEY_CONTEXT: &str = "zmail 2024 envelope aead key";
const MAC_KEY_CONTEXT: &str = "zmail 2024 envelope mac key";

/// X25519 public key in Montgomery form.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey([u8; PUBLIC_KEY_LEN]);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; PUBLIC_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.0
    }

    /// Parse a hex-encoded key.
    pub fn from_hex(s: &str) -> Result<Self, ZmailError> {
        let bytes = hex::decode(s).map_err(|e| ZmailError::InvalidKey(e.to_string()))?;
        let bytes: [u8; PUBLIC_KEY_LEN] = bytes
            .try_into()
            .map_err(|_| ZmailError::InvalidKey("public key must be 32 bytes".into()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.0))
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// X25519 secret scalar (already clamped). Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey([u8; 32]);

impl SecretKey {
    fn from_seed(seed: [u8; 32]) -> Self {
        Self(curve25519_dalek::scalar::clamp_integer(seed))
    }

    /// Fresh random secret from the OS RNG.
    pub fn generate() -> Self {
        let mut seed = Zeroizing::new([0u8; 32]);
        OsRng.fill_bytes(&mut seed[..]);
        Self::from_seed(*seed)
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(MontgomeryPoint::mul_base_clamped(self.0).to_bytes())
    }

    fn diffie_hellman(&self, public: &PublicKey) -> Result<Zeroizing<[u8; 32]>, ZmailError> {
        let shared = Zeroizing::new(MontgomeryPoint(public.0).mul_clamped(self.0).to_bytes());
        // Low-order points collapse every secret to zero.
        if bool::from(shared[..].ct_eq(&[0u8; 32][..])) {
            return Err(ZmailError::InvalidKey("low-order public key".into()));
        }
        Ok(shared)
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SecretKey").field(&"[REDACTED]").finish()
    }
}

/// A secret key and its public half.
#[derive(Debug, Clone)]
pub struct EncryptionKeypair {
    pub secret: SecretKey,
    pub public: PublicKey,
}

impl EncryptionKeypair {
    /// Random keypair.
    pub fn generate() -> Self {
        Self::from_secret(SecretKey::generate())
    }

    fn from_secret(secret: SecretKey) -> Self {
        let public = secret.public_key();
        Self { secret, public }
    }
}

/// One sealed message part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedEnvelope {
    /// AEAD output including the Poly1305 tag.
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_LEN],
    pub ephemeral_public_key: PublicKey,
    pub mac: [u8; MAC_LEN],
}

/// Deterministically derive an encryption keypair from a spending key.
pub fn derive_encryption_keypair(
    spending_key: &SpendingKey,
) -> Result<EncryptionKeypair, ZmailError> {
    if spending_key.is_blank() {
        return Err(ZmailError::InvalidKey("spending key is empty".into()));
    }
    let seed = Zeroizing::new(blake3::derive_key(
        SPENDING_KEY_CONTEXT,
        spending_key.expose().as_bytes(),
    ));
    Ok(EncryptionKeypair::from_secret(SecretKey::from_seed(*seed)))
}

/// Keypair bound to an address string. See the module docs for its limits.
pub fn derive_address_keypair(address: &str) -> Result<EncryptionKeypair, ZmailError> {
    let address = address.trim();
    if address.is_empty() {
        return Err(ZmailError::InvalidAddress("address is empty".into()));
    }
    let seed = Zeroizing::new(blake3::derive_key(ADDRESS_KEY_CONTEXT, address.as_bytes()));
    Ok(EncryptionKeypair::from_secret(SecretKey::from_seed(*seed)))
}

/// Public encryption key for `address`.
pub fn derive_public_key_from_address(address: &str) -> Result<PublicKey, ZmailError> {
    Ok(derive_address_keypair(address)?.public)
}

struct EnvelopeKeys {
    aead: Zeroizing<[u8; 32]>,
    mac: Zeroizing<[u8; 32]>,
}

fn envelope_keys(shared: &[u8; 32], ephemeral: &PublicKey, recipient: &PublicKey) -> EnvelopeKeys {
    let mut ikm = Zeroizing::new([0u8; 96]);
    ikm[..32].copy_from_slice(shared);
    ikm[32..64].copy_from_slice(ephemeral.as_bytes());
    ikm[64..].copy_from_slice(recipient.as_bytes());
    EnvelopeKeys {
        aead: Zeroizing::new(blake3::derive_key(AEAD_KEY_CONTEXT, &ikm[..])),
        mac: Zeroizing::new(blake3::derive_key(MAC_KEY_CONTEXT, &ikm[..])),
    }
}

fn envelope_mac(
    mac_key: &[u8; 32],
    ciphertext: &[u8],
    nonce: &[u8; NONCE_LEN],
    ephemeral: &PublicKey,
) -> [u8; MAC_LEN] {
    let mut hasher = blake3::Hasher::new_keyed(mac_key);
    hasher.update(ciphertext);
    hasher.update(nonce);
    hasher.update(ephemeral.as_bytes());
    *hasher.finalize().as_bytes()
}

/// Seal `plaintext` to `recipient`.
pub fn encrypt_message(
    plaintext: &[u8],
    recipient: &PublicKey,
) -> Result<EncryptedEnvelope, ZmailError> {
    let ephemeral = EncryptionKeypair::generate();
    let shared = ephemeral
        .secret
        .diffie_hellman(recipient)
        .map_err(|e| ZmailError::EncryptionFailed(e.to_string()))?;
    let keys = envelope_keys(&shared, &ephemeral.public, recipient);

    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let cipher = XChaCha20Poly1305::new(Key::from_slice(&keys.aead[..]));
    let ciphertext = cipher
        .encrypt(
            XNonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad: ephemeral.public.as_bytes(),
            },
        )
        .map_err(|e| ZmailError::EncryptionFailed(e.to_string()))?;

    let mac = envelope_mac(&keys.mac, &ciphertext, &nonce, &ephemeral.public);
    Ok(EncryptedEnvelope {
        ciphertext,
        nonce,
        ephemeral_public_key: ephemeral.public,
        mac,
    })
}

/// Open an envelope with the recipient's secret key.
///
/// Every failure (wrong key, tampering, low-order ephemeral key) is reported
/// as [`ZmailError::DecryptionFailed`].
pub fn decrypt_message(
    envelope: &EncryptedEnvelope,
    recipient: &SecretKey,
) -> Result<Vec<u8>, ZmailError> {
    let shared = recipient
        .diffie_hellman(&envelope.ephemeral_public_key)
        .map_err(|_| ZmailError::DecryptionFailed)?;
    let keys = envelope_keys(&shared, &envelope.ephemeral_public_key, &recipient.public_key());

    let expected = envelope_mac(
        &keys.mac,
        &envelope.ciphertext,
        &envelope.nonce,
        &envelope.ephemeral_public_key,
    );
    if !bool::from(expected.ct_eq(&envelope.mac)) {
        return Err(ZmailError::DecryptionFailed);
    }

    let cipher = XChaCha20Poly1305::new(Key::from_slice(&keys.aead[..]));
    cipher
        .decrypt(
            XNonce::from_slice(&envelope.nonce),
            Payload {
                msg: &envelope.ciphertext,
                aad: envelope.ephemeral_public_key.as_bytes(),
            },
        )
        .map_err(|_| ZmailError::DecryptionFailed)
}

/// Serialize an envelope into a memo payload of at most 504 bytes.
///
/// Fails with [`ZmailError::MessageTooLong`] when the ciphertext exceeds
/// 411 bytes.
pub fn encode_to_memo(envelope: &EncryptedEnvelope) -> Result<Vec<u8>, ZmailError> {
    let len = envelope.ciphertext.len();
    if len > MAX_CIPHERTEXT_LEN {
        return Err(ZmailError::MessageTooLong {
            size: len,
            max: MAX_CIPHERTEXT_LEN,
        });
    }

    let mut out = Vec::with_capacity(ENVELOPE_HEADER_LEN + len);
    out.extend_from_slice(&ENVELOPE_MAGIC);
    out.push(ENVELOPE_VERSION);
    out.extend_from_slice(&envelope.nonce);
    out.extend_from_slice(envelope.ephemeral_public_key.as_bytes());
    out.extend_from_slice(&envelope.mac);
    // Bounded by MAX_CIPHERTEXT_LEN above.
    out.extend_from_slice(&(len as u16).to_le_bytes());
    out.extend_from_slice(&envelope.ciphertext);
    Ok(out)
}

/// Parse an envelope from a memo payload. Trailing bytes (zero padding) are
/// ignored.
///
/// Returns `None` if the payload is not an envelope.
pub fn decode_from_memo(bytes: &[u8]) -> Option<EncryptedEnvelope> {
    if bytes.len() < ENVELOPE_HEADER_LEN
        || bytes[..2] != ENVELOPE_MAGIC
        || bytes[2] != ENVELOPE_VERSION
    {
        return None;
    }

    let mut offset = 3;
    let nonce: [u8; NONCE_LEN] = bytes[offset..offset + NONCE_LEN].try_into().ok()?;
    offset += NONCE_LEN;
    let ephemeral: [u8; PUBLIC_KEY_LEN] = bytes[offset..offset + PUBLIC_KEY_LEN].try_into().ok()?;
    offset += PUBLIC_KEY_LEN;
    let mac: [u8; MAC_LEN] = bytes[offset..offset + MAC_LEN].try_into().ok()?;
    offset += MAC_LEN;
    let len = usize::from(u16::from_le_bytes([bytes[offset], bytes[offset + 1]]));
    offset += 2;

    if len > MAX_CIPHERTEXT_LEN || offset + len > bytes.len() {
        return None;
    }

    Some(EncryptedEnvelope {
        ciphertext: bytes[offset..offset + len].to_vec(),
        nonce,
        ephemeral_public_key: PublicKey(ephemeral),
        mac,
    })
}
