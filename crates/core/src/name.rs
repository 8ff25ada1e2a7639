//! Repository name grammar.

use std::fmt;

/// A repository name: one or more `/`-separated path components, each
/// matching `[a-z0-9]+([._-][a-z0-9]+)*`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RepositoryName {
    components: Vec<String>,
}

fn is_word(b: u8) -> bool {
    b.is_ascii_lowercase() || b.is_ascii_digit()
}

/// Validate a single path component against the grammar.
fn valid_component(s: &str) -> bool {
    let mut last_was_word = false;
    for &b in s.as_bytes() {
        if is_word(b) {
            last_was_word = true;
        } else if matches!(b, b'.' | b'_' | b'-') {
            // Separators must sit between word runs, never lead,
            // trail, or repeat.
            if !last_was_word {
                return false;
            }
            last_was_word = false;
        } else {
            return false;
        }
    }
    last_was_word
}

impl RepositoryName {
    /// Parse a `/`-separated repository name.
    pub fn parse(s: &str) -> crate::Result<Self> {
        let components: Vec<String> = s.split('/').map(str::to_string).collect();
        for c in &components {
            if !valid_component(c) {
                return Err(crate::Error::InvalidComponent(c.clone()));
            }
        }
        Ok(Self { components })
    }

    /// The first component.
    pub fn namespace(&self) -> &str {
        &self.components[0]
    }

    /// Everything after the first component, `/`-joined.
    pub fn rest(&self) -> String {
        self.components[1..].join("/")
    }

    /// The individual components.
    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Drop the leading component. A single-component name is kept as-is.
    pub fn strip_namespace(&self) -> Self {
        if self.components.len() <= 1 {
            return self.clone();
        }
        Self {
            components: self.components[1..].to_vec(),
        }
    }

    /// Replace the namespace. For a single-component name the new
    /// namespace is prepended instead.
    pub fn with_namespace(&self, ns: &str) -> Self {
        let ns = ns.to_ascii_lowercase();
        let components = match self.components.len() {
            1 => vec![ns, self.components[0].clone()],
            _ => {
                let mut out = vec![ns];
                out.extend_from_slice(&self.components[1..]);
                out
            }
        };
        Self { components }
    }
}

impl fmt::Display for RepositoryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.components.join("/"))
    }
}
