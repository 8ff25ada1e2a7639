//! Content digest parsing, formatting, and incremental hashing.

use sha2::{Digest as _, Sha256};
use std::fmt;
use std::str::FromStr;

/// Hash algorithm tag of a [`Digest`].
///
/// Only SHA-256 is supported; the enum exists so the wire format
/// (`<algorithm>:<hex>`) stays honest about what it encodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Algorithm {
    Sha256,
}

impl Algorithm {
    /// The canonical lowercase algorithm name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
        }
    }

    /// Expected hex string length for this algorithm.
    pub fn hex_len(&self) -> usize {
        match self {
            Self::Sha256 => 64,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A content digest in `<algorithm>:<hex>` form.
///
/// The hex string is always lowercase and its length matches the
/// algorithm; equality is bytewise on both fields.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Digest {
    algorithm: Algorithm,
    hex: String,
}

impl Digest {
    /// Parse a canonical digest string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        let (algo, hex) = s
            .split_once(':')
            .ok_or_else(|| crate::Error::InvalidDigest(format!("missing algorithm tag: {s:?}")))?;

        let algorithm = match algo {
            "sha256" => Algorithm::Sha256,
            other => {
                return Err(crate::Error::InvalidDigest(format!(
                    "unsupported algorithm: {other:?}"
                )));
            }
        };

        if hex.len() != algorithm.hex_len() {
            return Err(crate::Error::InvalidDigest(format!(
                "expected {} hex chars for {algorithm}, got {}",
                algorithm.hex_len(),
                hex.len()
            )));
        }
        if !hex
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(crate::Error::InvalidDigest(format!(
                "non-lowercase-hex character in {hex:?}"
            )));
        }

        Ok(Self {
            algorithm,
            hex: hex.to_string(),
        })
    }

    /// Compute the SHA-256 digest of a byte slice.
    pub fn of(data: &[u8]) -> Self {
        let mut hasher = Hasher::new();
        hasher.update(data);
        hasher.finalize()
    }

    /// Create an incremental hasher that finalizes into a digest.
    pub fn hasher() -> Hasher {
        Hasher::new()
    }

    /// The algorithm tag.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// The lowercase hex string, without the algorithm prefix.
    pub fn hex(&self) -> &str {
        &self.hex
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({}:{}…)", self.algorithm, &self.hex[..12])
    }
}

impl FromStr for Digest {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::parse(s)
    }
}

/// Incremental SHA-256 hasher.
pub struct Hasher(Sha256);

impl Hasher {
    /// Create a new hasher.
    pub fn new() -> Self {
        Self(Sha256::new())
    }

    /// Update the hasher with data.
    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    /// Finalize and return the digest.
    pub fn finalize(self) -> Digest {
        let bytes = self.0.finalize();
        let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
        Digest {
            algorithm: Algorithm::Sha256,
            hex,
        }
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}
