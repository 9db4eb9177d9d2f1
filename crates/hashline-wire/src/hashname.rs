//! Hashname identifiers
//!
//! A hashname is the SHA-256 of an endpoint's DER-encoded public key,
//! rendered as lowercase unpadded base32. The all-zero value stands for
//! "unknown" and never names a real endpoint.

use std::fmt;
use std::str::FromStr;

use base32::Alphabet;
use sha2::{Digest, Sha256};

use crate::error::{WireError, WireResult};
use crate::HASHNAME_LEN;

const BASE32: Alphabet = Alphabet::Rfc4648Lower { padding: false };

/// A 32-byte endpoint identifier
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Hashname([u8; HASHNAME_LEN]);

impl Hashname {
    /// The "unknown" sentinel
    pub const ZERO: Hashname = Hashname([0u8; HASHNAME_LEN]);

    /// Create a hashname from raw bytes
    pub const fn from_bytes(bytes: [u8; HASHNAME_LEN]) -> Self {
        Self(bytes)
    }

    /// Derive the hashname of a public key from its DER encoding
    pub fn for_key(der: &[u8]) -> Self {
        let digest = Sha256::digest(der);
        let mut bytes = [0u8; HASHNAME_LEN];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    /// Get the raw bytes
    pub const fn as_bytes(&self) -> &[u8; HASHNAME_LEN] {
        &self.0
    }

    /// True for the "unknown" sentinel
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; HASHNAME_LEN]
    }

    /// First 5 characters of the base32 form, for log lines
    pub fn short(&self) -> String {
        let mut s = self.to_string();
        s.truncate(5);
        s
    }

    /// XOR distance to another hashname
    pub fn distance(&self, other: &Hashname) -> Distance {
        let mut d = [0u8; HASHNAME_LEN];
        for i in 0..HASHNAME_LEN {
            d[i] = self.0[i] ^ other.0[i];
        }
        Distance(d)
    }
}

impl fmt::Display for Hashname {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&base32::encode(BASE32, &self.0))
    }
}

impl fmt::Debug for Hashname {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hashname({})", self.short())
    }
}

impl FromStr for Hashname {
    type Err = WireError;

    fn from_str(s: &str) -> WireResult<Self> {
        if s.bytes().any(|b| b.is_ascii_uppercase()) {
            return Err(WireError::InvalidHashname("not lowercase base32"));
        }
        let bytes = base32::decode(BASE32, s)
            .ok_or(WireError::InvalidHashname("not lowercase base32"))?;
        if bytes.len() != HASHNAME_LEN {
            return Err(WireError::InvalidHashname("wrong length"));
        }
        let mut arr = [0u8; HASHNAME_LEN];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

/// XOR distance between two hashnames
///
/// Orders lexicographically over the 32 bytes: bigger means farther.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Distance([u8; HASHNAME_LEN]);

impl Distance {
    /// True when the two hashnames were equal
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; HASHNAME_LEN]
    }

    /// Bucket index of this distance: `255 - leading_zeros`
    ///
    /// `None` for the zero distance (self), which the routing table refuses
    /// to store.
    pub fn bucket(&self) -> Option<usize> {
        let mut zeros = 0u32;
        for byte in &self.0 {
            if *byte == 0 {
                zeros += 8;
            } else {
                zeros += byte.leading_zeros();
                break;
            }
        }
        if zeros as usize == HASHNAME_LEN * 8 {
            None
        } else {
            Some(255 - zeros as usize)
        }
    }

    /// Get the raw bytes
    pub const fn as_bytes(&self) -> &[u8; HASHNAME_LEN] {
        &self.0
    }
}

impl fmt::Debug for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Distance(bucket={:?})", self.bucket())
    }
}
