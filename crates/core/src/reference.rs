//! Manifest references: tag or digest.

use crate::digest::Digest;
use std::fmt;

/// Maximum tag length accepted by registries.
const MAX_TAG_LEN: usize = 128;

/// A reference identifying a manifest: either a human-readable tag or a
/// content digest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reference {
    Tag(String),
    Digest(Digest),
}

fn valid_tag(s: &str) -> bool {
    let bytes = s.as_bytes();
    let Some((&first, rest)) = bytes.split_first() else {
        return false;
    };
    if bytes.len() > MAX_TAG_LEN {
        return false;
    }
    if !(first.is_ascii_alphanumeric() || first == b'_') {
        return false;
    }
    rest.iter()
        .all(|&b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'))
}

impl Reference {
    /// Parse a reference string. Anything that parses as a digest is a
    /// digest; everything else is treated as a tag.
    pub fn parse(s: &str) -> crate::Result<Self> {
        if let Ok(d) = Digest::parse(s) {
            return Ok(Self::Digest(d));
        }
        if !valid_tag(s) {
            return Err(crate::Error::InvalidTag(s.to_string()));
        }
        Ok(Self::Tag(s.to_string()))
    }

    pub fn is_tag(&self) -> bool {
        matches!(self, Self::Tag(_))
    }

    pub fn is_digest(&self) -> bool {
        matches!(self, Self::Digest(_))
    }

    /// The digest, if this reference is one.
    pub fn as_digest(&self) -> Option<&Digest> {
        match self {
            Self::Digest(d) => Some(d),
            Self::Tag(_) => None,
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tag(t) => f.write_str(t),
            Self::Digest(d) => d.fmt(f),
        }
    }
}
