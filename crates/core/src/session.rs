//! Session persistence implementation.
//!
//! The handshake leaves its durable artifacts (the most recent key handle
//! and the most recent identity proof) in a single-slot store so a later
//! session can resume without re-minting. The store exposes exactly two
//! fixed slots, overwritten on each successful mint and read back on
//! startup with an explicit freshness check: a stale identity proof is
//! discarded while the key handle survives.
//!
//! Records are encrypted at rest. An identity proof embeds a live wallet
//! signature that authenticates to the signer network for as long as its
//! statement is fresh, so slots are sealed with AES-256-GCM under a key
//! derived from a caller-supplied secret via HKDF.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use chrono::Utc;
use hkdf::Hkdf;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::errors::{CryptoError, Error};
use crate::identity::IdentityProof;
use crate::key_handle::KeyHandle;

/// Domain-separation info for the vault's derived encryption key.
const VAULT_KEY_INFO: &[u8] = b"entrust-session-vault-v1";

/// The fixed storage slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// The most recent key handle.
    KeyHandle,
    /// The most recent identity proof.
    IdentityProof,
}

impl Slot {
    /// Returns the fixed storage key for the slot.
    pub fn key(&self) -> &'static str {
        match self {
            Slot::KeyHandle => "entrust.key-handle",
            Slot::IdentityProof => "entrust.identity-proof",
        }
    }
}

/// A byte-oriented backing store with two fixed slots.
///
/// Implementations adapt whatever storage the host environment offers
/// (browser local storage, a file, an in-memory map for tests).
pub trait SessionStore {
    /// Returns the bytes stored in a slot, if any.
    fn get(&self, slot: Slot) -> Result<Option<Vec<u8>>, Error>;

    /// Overwrites a slot.
    fn put(&mut self, slot: Slot, bytes: Vec<u8>) -> Result<(), Error>;

    /// Clears a slot.
    fn remove(&mut self, slot: Slot) -> Result<(), Error>;
}

impl<S: SessionStore + ?Sized> SessionStore for &mut S {
    fn get(&self, slot: Slot) -> Result<Option<Vec<u8>>, Error> {
        (**self).get(slot)
    }

    fn put(&mut self, slot: Slot, bytes: Vec<u8>) -> Result<(), Error> {
        (**self).put(slot, bytes)
    }

    fn remove(&mut self, slot: Slot) -> Result<(), Error> {
        (**self).remove(slot)
    }
}

/// An in-memory backing store.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    slots: std::collections::HashMap<&'static str, Vec<u8>>,
}

impl SessionStore for MemorySessionStore {
    fn get(&self, slot: Slot) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.slots.get(slot.key()).cloned())
    }

    fn put(&mut self, slot: Slot, bytes: Vec<u8>) -> Result<(), Error> {
        self.slots.insert(slot.key(), bytes);
        Ok(())
    }

    fn remove(&mut self, slot: Slot) -> Result<(), Error> {
        self.slots.remove(slot.key());
        Ok(())
    }
}

/// A session resumed from storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumedSession {
    /// The persisted key handle.
    pub key_handle: KeyHandle,
    /// The persisted identity proof, if still fresh.
    pub proof: Option<IdentityProof>,
}

/// The persisted identity-proof record, stamped with its save time.
#[derive(Debug, Serialize, Deserialize)]
struct ProofRecord {
    proof: IdentityProof,
    saved_at: chrono::DateTime<Utc>,
}

/// An encrypting wrapper around a [`SessionStore`].
pub struct SessionVault<S: SessionStore> {
    store: S,
    cipher: Aes256Gcm,
}

impl<S: SessionStore> SessionVault<S> {
    /// Given a backing store and a caller-supplied secret, returns a vault
    /// whose encryption key is derived from the secret via HKDF-SHA-256.
    pub fn new(store: S, secret: &[u8]) -> Self {
        let hkdf = Hkdf::<Sha256>::new(None, secret);
        let mut key = [0u8; 32];
        hkdf.expand(VAULT_KEY_INFO, &mut key)
            .expect("32 bytes is a valid HKDF-SHA-256 output length");
        let cipher = Aes256Gcm::new_from_slice(&key).expect("Derived key has the expected length");
        Self { store, cipher }
    }

    /// Persists a freshly-minted key handle and the identity proof that
    /// produced it, overwriting both slots.
    pub fn save(&mut self, key_handle: &KeyHandle, proof: &IdentityProof) -> Result<(), Error> {
        let handle_bytes = serde_json::to_vec(key_handle)
            .map_err(|err| Error::Serialization(err.to_string()))?;
        self.store
            .put(Slot::KeyHandle, self.seal(&handle_bytes)?)?;

        let record = ProofRecord {
            proof: proof.clone(),
            saved_at: Utc::now(),
        };
        let proof_bytes =
            serde_json::to_vec(&record).map_err(|err| Error::Serialization(err.to_string()))?;
        self.store
            .put(Slot::IdentityProof, self.seal(&proof_bytes)?)?;
        Ok(())
    }

    /// Loads the persisted session, if any.
    ///
    /// A proof whose evidence has expired is dropped (and its slot cleared);
    /// the key handle is returned regardless since custodied keys never
    /// expire.
    pub fn load(&mut self) -> Result<Option<ResumedSession>, Error> {
        let Some(sealed_handle) = self.store.get(Slot::KeyHandle)? else {
            return Ok(None);
        };
        let key_handle: KeyHandle = serde_json::from_slice(&self.open(&sealed_handle)?)
            .map_err(|err| Error::Serialization(err.to_string()))?;

        let proof = match self.store.get(Slot::IdentityProof)? {
            Some(sealed_proof) => {
                let record: ProofRecord = serde_json::from_slice(&self.open(&sealed_proof)?)
                    .map_err(|err| Error::Serialization(err.to_string()))?;
                match record.proof.verify(Utc::now()) {
                    Ok(()) => Some(record.proof),
                    Err(Error::Expired(_)) => {
                        self.store.remove(Slot::IdentityProof)?;
                        None
                    }
                    Err(err) => return Err(err),
                }
            }
            None => None,
        };

        Ok(Some(ResumedSession { key_handle, proof }))
    }

    /// Clears both slots.
    pub fn clear(&mut self) -> Result<(), Error> {
        self.store.remove(Slot::KeyHandle)?;
        self.store.remove(Slot::IdentityProof)
    }

    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        let mut nonce_bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| Error::Crypto(CryptoError::DecryptionFailed))?;
        let mut sealed = nonce_bytes.to_vec();
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, Error> {
        if sealed.len() < 12 {
            return Err(Error::Crypto(CryptoError::DecryptionFailed));
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);
        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| Error::Crypto(CryptoError::DecryptionFailed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{IdentityProof, LocalWallet};
    use crate::test_utils::{example_key_handle, example_statement_with_expiration};
    use chrono::Duration;

    fn vault() -> SessionVault<MemorySessionStore> {
        SessionVault::new(MemorySessionStore::default(), b"session secret")
    }

    #[test]
    fn save_and_load_round_trip_works() {
        let wallet = LocalWallet::random();
        let statement =
            example_statement_with_expiration(&wallet, Utc::now() + Duration::minutes(10));
        let proof = IdentityProof::for_wallet(&wallet, &statement).unwrap();
        let (key_handle, _) = example_key_handle();

        let mut vault = vault();
        assert_eq!(vault.load().unwrap(), None);

        vault.save(&key_handle, &proof).unwrap();
        let resumed = vault.load().unwrap().unwrap();
        assert_eq!(resumed.key_handle, key_handle);
        assert_eq!(resumed.proof, Some(proof));
    }

    #[test]
    fn expired_proof_is_dropped_but_key_handle_survives() {
        let wallet = LocalWallet::random();
        // Proof that expires almost immediately.
        let statement =
            example_statement_with_expiration(&wallet, Utc::now() - Duration::seconds(1));
        let proof = IdentityProof::for_wallet(&wallet, &statement).unwrap();
        let (key_handle, _) = example_key_handle();

        let mut vault = vault();
        vault.save(&key_handle, &proof).unwrap();

        let resumed = vault.load().unwrap().unwrap();
        assert_eq!(resumed.key_handle, key_handle);
        assert_eq!(resumed.proof, None);

        // The stale proof slot was cleared on load.
        let resumed_again = vault.load().unwrap().unwrap();
        assert_eq!(resumed_again.proof, None);
    }

    #[test]
    fn wrong_secret_cannot_open_the_vault() {
        let wallet = LocalWallet::random();
        let statement =
            example_statement_with_expiration(&wallet, Utc::now() + Duration::minutes(10));
        let proof = IdentityProof::for_wallet(&wallet, &statement).unwrap();
        let (key_handle, _) = example_key_handle();

        let mut store = MemorySessionStore::default();
        SessionVault::new(&mut store, b"right secret")
            .save(&key_handle, &proof)
            .unwrap();

        let mut wrong = SessionVault::new(&mut store, b"wrong secret");
        assert_eq!(
            wrong.load(),
            Err(Error::Crypto(CryptoError::DecryptionFailed))
        );
    }

    #[test]
    fn clear_empties_both_slots() {
        let wallet = LocalWallet::random();
        let statement =
            example_statement_with_expiration(&wallet, Utc::now() + Duration::minutes(10));
        let proof = IdentityProof::for_wallet(&wallet, &statement).unwrap();
        let (key_handle, _) = example_key_handle();

        let mut vault = vault();
        vault.save(&key_handle, &proof).unwrap();
        vault.clear().unwrap();
        assert_eq!(vault.load().unwrap(), None);
    }
}
