use std::fmt::{self, Display};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use data_encoding::HEXLOWER;
use hmac::{Hmac, Mac};
use rocket::request::FromParam;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use super::election::ElectionId;

/// Length in bytes of the random salt mixed into each receipt.
pub const SALT_LENGTH: usize = 32;

const DOMAIN: &[u8] = b"eballot-receipt-v1";

pub type HmacSha256 = Hmac<Sha256>;
pub type Salt = [u8; SALT_LENGTH];

/// A SHA-256 receipt hash, rendered as lowercase hex everywhere it leaves the process.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReceiptHash([u8; 32]);

impl ReceiptHash {
    /// Derive the receipt hash for a single recorded choice.
    ///
    /// Every field is length-prefixed or fixed-width so that distinct inputs
    /// never produce the same preimage.
    pub fn compute(
        election_id: ElectionId,
        candidate: &str,
        cast_at: DateTime<Utc>,
        salt: &Salt,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(DOMAIN);
        hasher.update(election_id.to_be_bytes());
        hasher.update((candidate.len() as u64).to_be_bytes());
        hasher.update(candidate.as_bytes());
        hasher.update(cast_at.timestamp_millis().to_be_bytes());
        hasher.update(salt);
        let mut hash = [0_u8; 32];
        hash.copy_from_slice(&hasher.finalize());
        Self(hash)
    }

    /// Server signature over this hash, so a voter can prove the receipt was issued.
    pub fn sign(&self, key: &[u8]) -> String {
        HEXLOWER.encode(&self.mac(key).finalize().into_bytes())
    }

    /// Check a signature produced by [`ReceiptHash::sign`].
    pub fn verify_signature(&self, key: &[u8], signature: &str) -> bool {
        match HEXLOWER.decode(signature.to_ascii_lowercase().as_bytes()) {
            Ok(bytes) => self.mac(key).verify_slice(&bytes).is_ok(),
            Err(_) => false,
        }
    }

    fn mac(&self, key: &[u8]) -> HmacSha256 {
        let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
        mac.update(&self.0);
        mac
    }
}

impl Display for ReceiptHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", HEXLOWER.encode(&self.0))
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct InvalidReceiptHash;

impl Display for InvalidReceiptHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "receipt hash must be 64 hex digits")
    }
}

impl FromStr for ReceiptHash {
    type Err = InvalidReceiptHash;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = HEXLOWER
            .decode(s.trim().to_ascii_lowercase().as_bytes())
            .map_err(|_| InvalidReceiptHash)?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| InvalidReceiptHash)?;
        Ok(Self(bytes))
    }
}

impl Serialize for ReceiptHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ReceiptHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl<'a> FromParam<'a> for ReceiptHash {
    type Error = InvalidReceiptHash;

    fn from_param(param: &'a str) -> Result<Self, Self::Error> {
        param.parse()
    }
}

/// Hex-encode a salt for the voter's copy of the receipt.
pub fn encode_salt(salt: &Salt) -> String {
    HEXLOWER.encode(salt)
}

/// Decode a salt the voter kept; `None` if it is malformed.
pub fn decode_salt(salt: &str) -> Option<Salt> {
    HEXLOWER
        .decode(salt.trim().to_ascii_lowercase().as_bytes())
        .ok()?
        .try_into()
        .ok()
}
