//! Mnemonic → seed → SLIP-21 key derivation, and AEAD symmetric encryption.
//!
//! Domain-separation paths are protocol constants and must not change:
//! `["Evolu","Owner"]`, `["Evolu","EncryptionKey"]`, `["Evolu","WriteKey"]`,
//! `["Evolu","NodeId"]`. Any peer deriving keys for the same mnemonic must
//! reach the same bytes, so these strings are part of the wire-compatible
//! surface even though they never appear on the wire themselves.

use bip39::Mnemonic;
use chacha20poly1305::aead::{Aead, KeyInit, OsRng};
use chacha20poly1305::{AeadCore, XChaCha20Poly1305, XNonce};
use hmac::{Hmac, Mac};
use sha2::Sha512;

use crate::error::CryptoError;

type HmacSha512 = Hmac<Sha512>;

/// SLIP-21 domain-separation constant: "Symmetric key seed".
const SLIP21_SEED_KEY: &[u8] = b"Symmetric key seed";

/// Validates and expands a BIP-39 mnemonic phrase into a 64-byte seed.
pub fn mnemonic_to_seed(phrase: &str) -> Result<[u8; 64], CryptoError> {
    let mnemonic = Mnemonic::parse_normalized(phrase)
        .map_err(|e| CryptoError::BadMnemonic(e.to_string()))?;
    Ok(mnemonic.to_seed(""))
}

/// A SLIP-21 node: a 32-byte key half and a 32-byte chain-code half.
struct Slip21Node {
    key: [u8; 32],
    chain_code: [u8; 32],
}

fn hmac_sha512(key: &[u8], msg: &[u8]) -> [u8; 64] {
    let mut mac = HmacSha512::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(msg);
    let result = mac.finalize().into_bytes();
    let mut out = [0u8; 64];
    out.copy_from_slice(&result);
    out
}

fn slip21_master(seed: &[u8]) -> Slip21Node {
    let full = hmac_sha512(SLIP21_SEED_KEY, seed);
    split_node(full)
}

fn slip21_child(parent: &Slip21Node, label: &str) -> Slip21Node {
    let mut msg = Vec::with_capacity(1 + label.len());
    msg.push(0x00);
    msg.extend_from_slice(label.as_bytes());
    let full = hmac_sha512(&parent.chain_code, &msg);
    split_node(full)
}

fn split_node(full: [u8; 64]) -> Slip21Node {
    let mut key = [0u8; 32];
    let mut chain_code = [0u8; 32];
    chain_code.copy_from_slice(&full[0..32]);
    key.copy_from_slice(&full[32..64]);
    Slip21Node { key, chain_code }
}

/// Derives a 32-byte symmetric key from `seed` along a labeled SLIP-21 path,
/// e.g. `["Evolu", "EncryptionKey"]`.
#[must_use]
pub fn slip21_derive(seed: &[u8], path: &[&str]) -> [u8; 32] {
    let mut node = slip21_master(seed);
    for label in path {
        node = slip21_child(&node, label);
    }
    node.key
}

/// Encrypts `plaintext` under `key` with XChaCha20-Poly1305, returning
/// `nonce ‖ ciphertext ‖ tag` (the `aead` crate appends the tag to the
/// ciphertext already, so this is `nonce ‖ encrypt_output`).
pub fn encrypt(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
    let ct = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| CryptoError::BadKey)?;
    let mut out = Vec::with_capacity(nonce.len() + ct.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ct);
    Ok(out)
}

/// Decrypts a `nonce ‖ ciphertext ‖ tag` blob produced by [`encrypt`].
pub fn decrypt(key: &[u8; 32], blob: &[u8]) -> Result<Vec<u8>, CryptoError> {
    const NONCE_LEN: usize = 24;
    if blob.len() < NONCE_LEN {
        return Err(CryptoError::DecryptFailed);
    }
    let (nonce_bytes, ct) = blob.split_at(NONCE_LEN);
    let nonce = XNonce::from_slice(nonce_bytes);
    let cipher = XChaCha20Poly1305::new(key.into());
    cipher
        .decrypt(nonce, ct)
        .map_err(|_| CryptoError::DecryptFailed)
}
