//! Relayer accounts: an optional explicit address and an optional signing key.

use k256::ecdsa::SigningKey;
use serde::Deserialize;
use std::fmt;

use crate::abi::{keccak256, parse_address, parse_hex_bytes, Address};
use crate::error::ScanError;

#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct Account {
    /// `0x`-prefixed address; takes precedence over the key-derived one.
    pub address: Option<String>,
    /// `0x`-prefixed secp256k1 private key.
    pub private_key: Option<String>,
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("address", &self.address)
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Account {
    pub fn with_address(address: impl Into<String>) -> Self {
        Self {
            address: Some(address.into()),
            private_key: None,
        }
    }

    pub fn with_private_key(key: impl Into<String>) -> Self {
        Self {
            address: None,
            private_key: Some(key.into()),
        }
    }
}

/// Address of `account`: the explicit one if set, otherwise derived from the private key.
pub fn resolve_address(account: &Account) -> Result<Address, ScanError> {
    match (&account.address, &account.private_key) {
        (Some(address), _) if !address.trim().is_empty() => parse_address(address.trim()),
        (_, Some(key)) if !key.trim().is_empty() => address_from_private_key(key.trim()),
        _ => Err(ScanError::Decode("account has neither address nor private key".into())),
    }
}

/// Last 20 bytes of keccak-256 over the uncompressed public key (without the 0x04 tag).
pub fn address_from_private_key(key: &str) -> Result<Address, ScanError> {
    let bytes: [u8; 32] = parse_hex_bytes(key)?
        .try_into()
        .map_err(|_| ScanError::Decode("private key must be 32 bytes".into()))?;
    let signing_key = SigningKey::from_bytes((&bytes).into())
        .map_err(|e| ScanError::Decode(format!("invalid private key: {e}")))?;
    let point = signing_key.verifying_key().to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[12..]);
    Ok(address)
}

pub fn format_address(address: &Address) -> String {
    format!("0x{}", hex::encode(address))
}
