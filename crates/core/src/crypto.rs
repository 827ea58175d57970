//! Cryptography types, abstractions and utilities.
//!
//! Wallet identities sign UTF-8 statements the way Ethereum wallets do:
//! the message is wrapped with the EIP-191 personal-message prefix, hashed
//! with Keccak-256 and signed with recoverable ECDSA over secp256k1.
//!
//! Ref: <https://eips.ethereum.org/EIPS/eip-191>.

use crypto_bigint::modular::constant_mod::ResidueParams;
use crypto_bigint::{impl_modulus, Encoding, NonZero, RandomMod, U256};
use k256::ecdsa::RecoveryId;
use sha3::{Digest, Keccak256};

use crate::errors::CryptoError;

// Re-exported so that downstream crates use consistent key types.
pub use k256::ecdsa::{SigningKey, VerifyingKey};

/// A 20-byte account address derived from a secp256k1 public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address(pub [u8; 20]);

impl Address {
    /// Returns the lowercased `0x`-prefixed hex rendering of the address.
    ///
    /// This is the canonical form used as a wallet identity's method id.
    pub fn to_lower_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// Parses an address from a `0x`-prefixed hex string (case-insensitive).
    pub fn from_hex(value: &str) -> Result<Self, CryptoError> {
        let stripped = value.strip_prefix("0x").unwrap_or(value);
        let bytes: [u8; 20] = hex::decode(stripped)
            .map_err(|_| CryptoError::MalformedAddress)?
            .try_into()
            .map_err(|_| CryptoError::MalformedAddress)?;
        Ok(Self(bytes))
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_lower_hex())
    }
}

/// A recoverable ECDSA/secp256k1 signature in the 65-byte `r || s || v` layout
/// produced by Ethereum wallets, where `v` is `27 + recovery_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletSignature(pub [u8; 65]);

impl WalletSignature {
    /// Returns the `0x`-prefixed hex rendering of the signature.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// Parses a signature from a `0x`-prefixed hex string.
    pub fn from_hex(value: &str) -> Result<Self, CryptoError> {
        let stripped = value.strip_prefix("0x").unwrap_or(value);
        let bytes: [u8; 65] = hex::decode(stripped)
            .map_err(|_| CryptoError::MalformedSignature)?
            .try_into()
            .map_err(|_| CryptoError::MalformedSignature)?;
        Ok(Self(bytes))
    }

    fn split(&self) -> Result<(k256::ecdsa::Signature, RecoveryId), CryptoError> {
        let signature = k256::ecdsa::Signature::from_slice(&self.0[..64])
            .map_err(|_| CryptoError::MalformedSignature)?;
        let v = self.0[64];
        // Accepts both the raw recovery id and the legacy `27 + recovery_id` form.
        let recovery_byte = if v >= 27 { v - 27 } else { v };
        let recovery_id =
            RecoveryId::from_byte(recovery_byte).ok_or(CryptoError::InvalidRecoveryId)?;
        Ok((signature, recovery_id))
    }
}

/// Returns the Keccak-256 digest of the input.
pub fn keccak256(input: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(input);
    hasher.finalize().into()
}

/// Returns the EIP-191 prefixed message bytes for a personal-message signature.
pub fn prefixed_message_bytes(message: &[u8]) -> Vec<u8> {
    let mut bytes = format!("\x19Ethereum Signed Message:\n{}", message.len()).into_bytes();
    bytes.extend_from_slice(message);
    bytes
}

/// Returns the address associated with a secp256k1 verifying key:
/// the last 20 bytes of the Keccak-256 digest of the uncompressed public point.
pub fn address_of(verifying_key: &VerifyingKey) -> Address {
    let point = verifying_key.to_encoded_point(false);
    // Skips the 0x04 uncompressed-point tag.
    let digest = keccak256(&point.as_bytes()[1..]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&digest[12..]);
    Address(address)
}

/// Given a signing key and a UTF-8 message, returns a recoverable personal-message signature.
pub fn sign_message(signing_key: &SigningKey, message: &[u8]) -> WalletSignature {
    let digest = keccak256(&prefixed_message_bytes(message));
    let (signature, recovery_id) = signing_key
        .sign_prehash_recoverable(&digest)
        .expect("Signing with a valid key should not fail");
    let mut bytes = [0u8; 65];
    bytes[..64].copy_from_slice(&signature.to_bytes());
    bytes[64] = 27 + recovery_id.to_byte();
    WalletSignature(bytes)
}

/// Given a prehashed payload (e.g. an arbitrary digest submitted to the signer network),
/// returns a recoverable signature over it.
pub fn sign_prehash(signing_key: &SigningKey, prehash: &[u8; 32]) -> WalletSignature {
    let (signature, recovery_id) = signing_key
        .sign_prehash_recoverable(prehash)
        .expect("Signing with a valid key should not fail");
    let mut bytes = [0u8; 65];
    bytes[..64].copy_from_slice(&signature.to_bytes());
    bytes[64] = 27 + recovery_id.to_byte();
    WalletSignature(bytes)
}

/// Given a UTF-8 message and a recoverable signature over its personal-message digest,
/// returns the address of the signer.
pub fn recover_address(message: &[u8], signature: &WalletSignature) -> Result<Address, CryptoError> {
    let digest = keccak256(&prefixed_message_bytes(message));
    recover_address_from_prehash(&digest, signature)
}

/// Given a prehashed payload and a recoverable signature over it, returns the address of the signer.
pub fn recover_address_from_prehash(
    prehash: &[u8; 32],
    signature: &WalletSignature,
) -> Result<Address, CryptoError> {
    let (sig, recovery_id) = signature.split()?;
    let verifying_key = VerifyingKey::recover_from_prehash(prehash, &sig, recovery_id)
        .map_err(|_| CryptoError::InvalidSignature)?;
    Ok(address_of(&verifying_key))
}

/// Returns an `Ok` result if the personal-message signature over the message
/// recovers to the expected address, or an appropriate `Err` result otherwise.
pub fn verify_wallet_signature(
    message: &[u8],
    signature: &WalletSignature,
    expected: &Address,
) -> Result<(), CryptoError> {
    let recovered = recover_address(message, signature)?;
    if &recovered == expected {
        Ok(())
    } else {
        Err(CryptoError::InvalidSignature)
    }
}

// Order of the `secp256k1` elliptic curve as a `crypto-bigint` modulus type.
// Ref: <https://www.secg.org/sec2-v2.pdf>.
impl_modulus!(
    Secp256k1Order,
    U256,
    "FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFEBAAEDCE6AF48A03BBFD25E8CD0364141"
);

/// Generates a cryptographically secure random `U256` which is less than the order of the
/// `secp256k1` elliptic curve, suitable for nonces and custody token identifiers.
pub fn random_mod() -> U256 {
    let mut rng = rand::thread_rng();
    let modulus = NonZero::new(Secp256k1Order::MODULUS)
        .expect("The order of the `secp256k1` curve should be non-zero");
    U256::random_mod(&mut rng, &modulus)
}

/// Returns a fresh random nonce rendered as 32 hex characters (128 bits).
pub fn random_nonce() -> String {
    hex::encode(&random_mod().to_be_bytes()[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_signing_and_recovery_works() {
        let signing_key = SigningKey::random(&mut rand::thread_rng());
        let address = address_of(signing_key.verifying_key());

        let message = b"example.com wants you to sign in";
        let signature = sign_message(&signing_key, message);

        // Recovered address matches the signing key's address.
        assert_eq!(recover_address(message, &signature).unwrap(), address);
        assert!(verify_wallet_signature(message, &signature, &address).is_ok());

        // Tampered message recovers to a different address.
        assert_ne!(
            recover_address(b"example.com wants you to sign out", &signature).unwrap(),
            address
        );
    }

    #[test]
    fn signature_hex_round_trip_works() {
        let signing_key = SigningKey::random(&mut rand::thread_rng());
        let signature = sign_message(&signing_key, b"payload");

        let parsed = WalletSignature::from_hex(&signature.to_hex()).unwrap();
        assert_eq!(parsed, signature);
    }

    #[test]
    fn address_hex_round_trip_works() {
        let signing_key = SigningKey::random(&mut rand::thread_rng());
        let address = address_of(signing_key.verifying_key());

        let rendered = address.to_lower_hex();
        assert!(rendered.starts_with("0x"));
        assert_eq!(Address::from_hex(&rendered).unwrap(), address);
        // Parsing is case-insensitive.
        assert_eq!(Address::from_hex(&rendered.to_uppercase().replace("0X", "0x")).unwrap(), address);
    }

    #[test]
    fn nonces_are_unique() {
        let nonces: std::collections::HashSet<String> = (0..64).map(|_| random_nonce()).collect();
        assert_eq!(nonces.len(), 64);
    }
}
