//! OCI v2 URL grammar.

use crate::name::RepositoryName;
use crate::reference::Reference;
use crate::resolver::NamespaceResolver;
use std::fmt;

/// The two addressable kinds of objects under `/v2/`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Subresource {
    Manifests,
    Blobs,
}

impl Subresource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manifests => "manifests",
            Self::Blobs => "blobs",
        }
    }
}

impl fmt::Display for Subresource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed `/v2/<name>/<subresource>/<reference>` URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OciUrl {
    registry_host: String,
    name: RepositoryName,
    subresource: Subresource,
    reference: Reference,
}

impl OciUrl {
    /// Parse an OCI URL. Accepts a bare path (`/v2/...`) or a full URL
    /// whose host becomes the registry host.
    pub fn parse(s: &str) -> crate::Result<Self> {
        let v2 = s
            .find("/v2/")
            .ok_or_else(|| crate::Error::InvalidUrl(format!("missing /v2/ prefix: {s:?}")))?;
        let host = match s[..v2].split_once("://") {
            Some((_, host)) => host.to_string(),
            None if s[..v2].is_empty() => String::new(),
            None => {
                return Err(crate::Error::InvalidUrl(format!(
                    "garbage before /v2/ prefix: {s:?}"
                )));
            }
        };
        let mut url = Self::parse_path(&s[v2..])?;
        url.registry_host = host;
        Ok(url)
    }

    /// Parse a URL path beginning with `/v2/`. The registry host is left
    /// empty; see [`OciUrl::with_registry_host`].
    pub fn parse_path(path: &str) -> crate::Result<Self> {
        let rest = path
            .strip_prefix("/v2/")
            .ok_or_else(|| crate::Error::InvalidUrl(format!("missing /v2/ prefix: {path:?}")))?;

        // The repository name may itself contain slashes, so split on the
        // last subresource separator.
        let manifests = rest.rfind("/manifests/").map(|i| (i, Subresource::Manifests));
        let blobs = rest.rfind("/blobs/").map(|i| (i, Subresource::Blobs));
        let (idx, subresource) = match (manifests, blobs) {
            (Some(m), Some(b)) => std::cmp::max_by_key(m, b, |(i, _)| *i),
            (Some(m), None) => m,
            (None, Some(b)) => b,
            (None, None) => {
                return Err(crate::Error::InvalidUrl(format!(
                    "missing manifests/blobs subresource: {path:?}"
                )));
            }
        };

        let name = RepositoryName::parse(&rest[..idx])?;
        let sep_len = match subresource {
            Subresource::Manifests => "/manifests/".len(),
            Subresource::Blobs => "/blobs/".len(),
        };
        let reference = Reference::parse(&rest[idx + sep_len..])?;

        if subresource == Subresource::Blobs && !reference.is_digest() {
            return Err(crate::Error::InvalidUrl(format!(
                "expected digest reference for blob, got tag: {reference}"
            )));
        }

        Ok(Self {
            registry_host: String::new(),
            name,
            subresource,
            reference,
        })
    }

    /// Replace the registry host.
    pub fn with_registry_host(mut self, host: &str) -> Self {
        self.registry_host = host.to_string();
        self
    }

    pub fn registry_host(&self) -> &str {
        &self.registry_host
    }

    pub fn name(&self) -> &RepositoryName {
        &self.name
    }

    pub fn subresource(&self) -> Subresource {
        self.subresource
    }

    pub fn reference(&self) -> &Reference {
        &self.reference
    }

    pub fn is_manifest(&self) -> bool {
        self.subresource == Subresource::Manifests
    }

    pub fn is_blob(&self) -> bool {
        self.subresource == Subresource::Blobs
    }

    /// Build the upstream URL: the local repo key (first component) is
    /// stripped and the namespace policy of the upstream applied.
    pub fn upstream_url(&self, resolver: NamespaceResolver) -> String {
        let stripped = self.name.strip_namespace();
        let normalized = resolver.normalize(&stripped);
        format!(
            "https://{}/v2/{}/{}/{}",
            self.registry_host, normalized, self.subresource, self.reference
        )
    }
}

impl fmt::Display for OciUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "https://{}/v2/{}/{}/{}",
            self.registry_host, self.name, self.subresource, self.reference
        )
    }
}
