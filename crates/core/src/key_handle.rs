//! Custodied key handle implementation.
//!
//! A key handle is the caller-side reference to an asymmetric key pair held
//! in custody by the distributed signer network: the key's public half plus
//! the network-assigned custody token id. Handles are created once by the
//! registrar, reused across sessions and never mutated.

use crypto_bigint::{Encoding, U256};
use serde::{Deserialize, Serialize};

use crate::crypto::{self, Address, VerifyingKey};
use crate::errors::CryptoError;

/// A handle to a custodied key pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyHandle {
    /// The custodied key's public half, SEC1-encoded.
    #[serde(with = "hex_bytes")]
    pub public_key: Vec<u8>,
    /// The network-assigned custody token id.
    #[serde(with = "hex_u256")]
    pub token_id: U256,
}

impl KeyHandle {
    /// Given a SEC1-encoded public key and a custody token id, returns a key handle.
    pub fn new(public_key: Vec<u8>, token_id: U256) -> Self {
        Self {
            public_key,
            token_id,
        }
    }

    /// Returns the deserialized verifying key, or an `Err` result for a
    /// malformed public key.
    pub fn verifying_key(&self) -> Result<VerifyingKey, CryptoError> {
        VerifyingKey::from_sec1_bytes(&self.public_key)
            .map_err(|_| CryptoError::InvalidVerifyingKey)
    }

    /// Returns the account address derived from the custodied public key.
    pub fn address(&self) -> Result<Address, CryptoError> {
        Ok(crypto::address_of(&self.verifying_key()?))
    }

    /// Returns the custody token id as `0x`-prefixed hex.
    pub fn token_id_hex(&self) -> String {
        format!("0x{}", hex::encode(self.token_id.to_be_bytes()))
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let value = String::deserialize(deserializer)?;
        hex::decode(value.strip_prefix("0x").unwrap_or(&value)).map_err(serde::de::Error::custom)
    }
}

mod hex_u256 {
    use crypto_bigint::{Encoding, U256};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(value.to_be_bytes())))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let value = String::deserialize(deserializer)?;
        let bytes: [u8; 32] = hex::decode(value.strip_prefix("0x").unwrap_or(&value))
            .map_err(serde::de::Error::custom)?
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected 32 bytes"))?;
        Ok(U256::from_be_bytes(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SigningKey;

    fn example_handle() -> KeyHandle {
        let signing_key = SigningKey::random(&mut rand::thread_rng());
        KeyHandle::new(
            signing_key
                .verifying_key()
                .to_encoded_point(false)
                .as_bytes()
                .to_vec(),
            crypto::random_mod(),
        )
    }

    #[test]
    fn address_derivation_works() {
        let signing_key = SigningKey::random(&mut rand::thread_rng());
        let handle = KeyHandle::new(
            signing_key
                .verifying_key()
                .to_encoded_point(false)
                .as_bytes()
                .to_vec(),
            crypto::random_mod(),
        );

        assert_eq!(
            handle.address().unwrap(),
            crypto::address_of(signing_key.verifying_key())
        );
    }

    #[test]
    fn malformed_public_key_is_rejected() {
        let handle = KeyHandle::new(vec![0u8; 16], U256::ONE);
        assert_eq!(handle.verifying_key(), Err(CryptoError::InvalidVerifyingKey));
    }

    #[test]
    fn serde_round_trip_works() {
        let handle = example_handle();
        let json = serde_json::to_string(&handle).unwrap();

        // Public halves serialize as hex strings.
        assert!(json.contains("\"0x04"));
        assert_eq!(serde_json::from_str::<KeyHandle>(&json).unwrap(), handle);
    }
}
