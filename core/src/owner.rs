//! The per-owner identity and crypto boundary (§4.2).
//!
//! An [`Owner`] bundles the three trait seams called for in §9: a
//! [`SecurityContext`] (identity), an [`AuthProvider`] (write authentication),
//! and an [`EncryptionProvider`] (payload confidentiality). All three are
//! derived from one mnemonic so a device has exactly one owner bundle per
//! identity, with plaintext test doubles available for fast unit tests that
//! don't need real crypto. A fourth seam, [`PartitionStrategy`], stands apart
//! from the mnemonic-derived bundle: it decides cross-owner sync/access
//! rather than identity, and is the seam a future "groups" layer would
//! implement against.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use subtle::ConstantTimeEq;

use crate::crypto::{decrypt, encrypt, mnemonic_to_seed, slip21_derive};
use crate::error::CryptoError;

const PATH_OWNER: [&str; 2] = ["Evolu", "Owner"];
const PATH_ENCRYPTION_KEY: [&str; 2] = ["Evolu", "EncryptionKey"];
const PATH_WRITE_KEY: [&str; 2] = ["Evolu", "WriteKey"];
const PATH_NODE_ID: [&str; 2] = ["Evolu", "NodeId"];

/// Identity facet of the owner boundary: who am I, and what node am I on.
pub trait SecurityContext: Send + Sync {
    /// The owner's stable identifier.
    fn owner_id(&self) -> &str;
    /// The 64-bit node identifier used as the `node_id` field of every
    /// timestamp this device produces.
    fn node_id(&self) -> u64;
    /// A hint for future partition strategies; today this is simply the
    /// owner id, since there is no server-side partitioning (§9).
    fn partition_hint(&self) -> &str {
        self.owner_id()
    }
}

/// Write-authentication facet: proves the right to write to this owner's
/// data set.
pub trait AuthProvider: Send + Sync {
    /// Produces the bearer credential sent alongside a `WriteRequest`.
    fn create_proof(&self) -> Vec<u8>;
    /// Verifies a proof against the stored credential, in constant time.
    fn verify_proof(stored: &[u8], proof: &[u8]) -> bool
    where
        Self: Sized,
    {
        stored.ct_eq(proof).into()
    }
}

/// Confidentiality facet: encrypts/decrypts CRDT message payloads.
pub trait EncryptionProvider: Send + Sync {
    /// Encrypts a plaintext CRDT message payload.
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;
    /// Decrypts a ciphertext produced by [`EncryptionProvider::encrypt`].
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>;
    /// Cheap pre-check for whether a ciphertext is even worth attempting to
    /// decrypt with this key (e.g. minimum length). Does not guarantee
    /// success; a full `decrypt` may still fail on tampered input.
    fn can_decrypt(&self, ciphertext: &[u8]) -> bool {
        ciphertext.len() >= 24 + 16 // nonce + AEAD tag, at minimum
    }
}

/// Partitioning facet (§9): decides whether an owner's data should sync and
/// whether a peer may access it. A seam for the deferred "groups" layer;
/// today only a single-owner identity strategy exists, where an owner's data
/// never syncs with, or is accessible to, any other owner.
pub trait PartitionStrategy: Send + Sync {
    /// Whether this owner's data should be synced at all.
    fn should_sync(&self, owner_id: &str) -> bool;
    /// Whether `requester_owner_id` may access `owner_id`'s data.
    fn can_access(&self, owner_id: &str, requester_owner_id: &str) -> bool;
    /// Narrows a set of owner ids down to the ones this strategy permits.
    fn filter<'a>(&self, owner_ids: &'a [String]) -> Vec<&'a str> {
        owner_ids.iter().map(String::as_str).filter(|id| self.should_sync(id)).collect()
    }
}

/// The only [`PartitionStrategy`] today: every owner's data is its own
/// island. No cross-owner access, ever.
pub struct SingleOwnerStrategy;

impl PartitionStrategy for SingleOwnerStrategy {
    fn should_sync(&self, _owner_id: &str) -> bool {
        true
    }

    fn can_access(&self, owner_id: &str, requester_owner_id: &str) -> bool {
        owner_id == requester_owner_id
    }
}

/// The real, mnemonic-derived owner identity and key bundle.
#[derive(Clone)]
pub struct Owner {
    owner_id: String,
    encryption_key: [u8; 32],
    write_key: [u8; 16],
    node_id: u64,
}

impl Owner {
    /// Derives a full owner bundle from a BIP-39 mnemonic phrase.
    pub fn from_mnemonic(phrase: &str) -> Result<Self, CryptoError> {
        let seed = mnemonic_to_seed(phrase)?;

        let owner_key = slip21_derive(&seed, &PATH_OWNER);
        let owner_id = URL_SAFE_NO_PAD.encode(owner_key).chars().take(21).collect();

        let mut encryption_key = [0u8; 32];
        encryption_key.copy_from_slice(&slip21_derive(&seed, &PATH_ENCRYPTION_KEY));

        let mut write_key = [0u8; 16];
        write_key.copy_from_slice(&slip21_derive(&seed, &PATH_WRITE_KEY)[0..16]);

        let node_key = slip21_derive(&seed, &PATH_NODE_ID);
        let mut node_id_bytes = [0u8; 8];
        node_id_bytes.copy_from_slice(&node_key[0..8]);
        let node_id = u64::from_be_bytes(node_id_bytes);

        Ok(Self {
            owner_id,
            encryption_key,
            write_key,
            node_id,
        })
    }

    /// Returns the 32-byte encryption key.
    #[must_use]
    pub fn encryption_key(&self) -> &[u8; 32] {
        &self.encryption_key
    }

    /// Returns the 16-byte write-authentication bearer key.
    #[must_use]
    pub fn write_key(&self) -> &[u8; 16] {
        &self.write_key
    }
}

impl SecurityContext for Owner {
    fn owner_id(&self) -> &str {
        &self.owner_id
    }

    fn node_id(&self) -> u64 {
        self.node_id
    }
}

/// The real [`AuthProvider`]: the mnemonic-derived `write_key` as a bearer
/// credential (§9: preserved behind this trait pending a future
/// signature-based swap).
pub struct WriteKeyAuth {
    write_key: [u8; 16],
}

impl WriteKeyAuth {
    /// Creates a bearer-auth provider from an owner's write key.
    #[must_use]
    pub fn new(write_key: [u8; 16]) -> Self {
        Self { write_key }
    }
}

impl AuthProvider for WriteKeyAuth {
    fn create_proof(&self) -> Vec<u8> {
        self.write_key.to_vec()
    }
}

/// The real [`EncryptionProvider`]: XChaCha20-Poly1305 under the owner's
/// encryption key.
pub struct XChaChaProvider {
    encryption_key: [u8; 32],
}

impl XChaChaProvider {
    /// Creates an encryption provider from an owner's encryption key.
    #[must_use]
    pub fn new(encryption_key: [u8; 32]) -> Self {
        Self { encryption_key }
    }
}

impl EncryptionProvider for XChaChaProvider {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        encrypt(&self.encryption_key, plaintext)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        decrypt(&self.encryption_key, ciphertext)
    }
}

/// A no-op [`AuthProvider`] test double: any proof is accepted. Never used
/// in production code paths.
#[cfg(any(test, feature = "test-support"))]
pub struct PlaintextAuth;

#[cfg(any(test, feature = "test-support"))]
impl AuthProvider for PlaintextAuth {
    fn create_proof(&self) -> Vec<u8> {
        Vec::new()
    }

    fn verify_proof(_stored: &[u8], _proof: &[u8]) -> bool {
        true
    }
}

/// A no-op [`EncryptionProvider`] test double: payloads pass through
/// unchanged. Never used in production code paths.
#[cfg(any(test, feature = "test-support"))]
pub struct PlaintextProvider;

#[cfg(any(test, feature = "test-support"))]
impl EncryptionProvider for PlaintextProvider {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Ok(plaintext.to_vec())
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Ok(ciphertext.to_vec())
    }

    fn can_decrypt(&self, _ciphertext: &[u8]) -> bool {
        true
    }
}
