//! Per-registry namespace policy.

use crate::name::RepositoryName;

/// Decides how a repository name (with its local repo key already
/// stripped) is normalized for a given upstream registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NamespaceResolver {
    /// Docker Hub: single-segment names get the `library` namespace.
    DockerHub,
    /// Leave the namespace untouched.
    Default,
}

impl NamespaceResolver {
    /// Select the resolver for an upstream registry host.
    pub fn for_host(host: &str) -> Self {
        match host {
            "registry-1.docker.io" | "docker.io" => Self::DockerHub,
            _ => Self::Default,
        }
    }

    /// The upstream namespace for a stripped name. A single-segment name
    /// has no namespace of its own; Docker Hub fills in `library`.
    pub fn resolve_namespace(&self, name: &RepositoryName) -> String {
        match self {
            Self::DockerHub if name.components().len() == 1 => "library".to_string(),
            _ => name.namespace().to_string(),
        }
    }

    /// Apply the namespace policy, returning the full upstream name.
    pub fn normalize(&self, name: &RepositoryName) -> RepositoryName {
        match self {
            Self::DockerHub if name.components().len() == 1 => name.with_namespace("library"),
            _ => name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_table() {
        assert_eq!(
            NamespaceResolver::for_host("registry-1.docker.io"),
            NamespaceResolver::DockerHub
        );
        assert_eq!(
            NamespaceResolver::for_host("docker.io"),
            NamespaceResolver::DockerHub
        );
        assert_eq!(
            NamespaceResolver::for_host("quay.io"),
            NamespaceResolver::Default
        );
    }

    #[test]
    fn docker_hub_library_default() {
        let name = RepositoryName::parse("alpine").unwrap();
        assert_eq!(
            NamespaceResolver::DockerHub.resolve_namespace(&name),
            "library"
        );
        assert_eq!(
            NamespaceResolver::DockerHub.normalize(&name).to_string(),
            "library/alpine"
        );
    }

    #[test]
    fn docker_hub_keeps_scoped_names() {
        let name = RepositoryName::parse("grafana/loki").unwrap();
        assert_eq!(
            NamespaceResolver::DockerHub.normalize(&name).to_string(),
            "grafana/loki"
        );
    }

    #[test]
    fn default_is_identity() {
        let name = RepositoryName::parse("coreos/etcd").unwrap();
        assert_eq!(
            NamespaceResolver::Default.normalize(&name).to_string(),
            "coreos/etcd"
        );
        let single = RepositoryName::parse("etcd").unwrap();
        assert_eq!(
            NamespaceResolver::Default.normalize(&single).to_string(),
            "etcd"
        );
    }
}
