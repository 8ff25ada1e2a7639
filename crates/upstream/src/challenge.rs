//! `WWW-Authenticate: Bearer` challenge parsing.

use crate::error::{UpstreamError, UpstreamResult};
use reqwest::Url;

/// A parsed bearer challenge. The realm is the token endpoint; service
/// and scopes become query parameters of the token request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Challenge {
    pub realm: String,
    pub service: Option<String>,
    pub scopes: Vec<String>,
}

impl Challenge {
    /// Parse a `WWW-Authenticate` header value.
    ///
    /// Accepts comma-separated `key=value` pairs after a case-insensitive
    /// `Bearer ` prefix; values may be double-quoted; `scope` values are
    /// whitespace-split. Pairs with unknown keys are ignored. A missing
    /// realm is fatal.
    pub fn parse(header: &str) -> UpstreamResult<Self> {
        let params = header
            .get(..7)
            .filter(|prefix| prefix.eq_ignore_ascii_case("bearer "))
            .map(|_| &header[7..])
            .ok_or(UpstreamError::UnsupportedScheme)?;

        let mut realm = None;
        let mut service = None;
        let mut scopes = Vec::new();

        for part in params.split(',') {
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };
            let key = key.trim().to_ascii_lowercase();
            let mut value = value.trim();
            if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
                value = &value[1..value.len() - 1];
            }
            match key.as_str() {
                "realm" => realm = Some(value.to_string()),
                "service" => service = Some(value.to_string()),
                "scope" => scopes = value.split_whitespace().map(str::to_string).collect(),
                _ => {}
            }
        }

        let realm = realm.ok_or(UpstreamError::MissingRealm)?;
        Ok(Self {
            realm,
            service,
            scopes,
        })
    }

    /// Build the token request URL: `realm?service=…&scope=…&scope=…`.
    pub fn token_url(&self) -> UpstreamResult<Url> {
        let mut url = Url::parse(&self.realm).map_err(|e| UpstreamError::InvalidRealm {
            realm: self.realm.clone(),
            reason: e.to_string(),
        })?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(service) = &self.service {
                query.append_pair("service", service);
            }
            for scope in &self.scopes {
                query.append_pair("scope", scope);
            }
        }
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_quoted_challenge() {
        let header = r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io",scope="repository:library/alpine:pull""#;
        let challenge = Challenge::parse(header).unwrap();
        assert_eq!(challenge.realm, "https://auth.docker.io/token");
        assert_eq!(challenge.service.as_deref(), Some("registry.docker.io"));
        assert_eq!(challenge.scopes, vec!["repository:library/alpine:pull"]);
    }

    #[test]
    fn prefix_is_case_insensitive() {
        let challenge = Challenge::parse(r#"bearer realm="https://t.example/token""#).unwrap();
        assert_eq!(challenge.realm, "https://t.example/token");
        assert!(challenge.service.is_none());
        assert!(challenge.scopes.is_empty());
    }

    #[test]
    fn scopes_split_on_whitespace() {
        let header = r#"Bearer realm="https://t.example/token",scope="repository:a:pull repository:b:pull""#;
        let challenge = Challenge::parse(header).unwrap();
        assert_eq!(
            challenge.scopes,
            vec!["repository:a:pull", "repository:b:pull"]
        );
    }

    #[test]
    fn missing_realm_is_fatal() {
        match Challenge::parse(r#"Bearer service="registry.example""#) {
            Err(UpstreamError::MissingRealm) => {}
            other => panic!("expected MissingRealm, got {other:?}"),
        }
    }

    #[test]
    fn rejects_other_schemes() {
        match Challenge::parse(r#"Basic realm="classic""#) {
            Err(UpstreamError::UnsupportedScheme) => {}
            other => panic!("expected UnsupportedScheme, got {other:?}"),
        }
    }

    #[test]
    fn malformed_pairs_are_skipped() {
        let challenge =
            Challenge::parse(r#"Bearer garbage,realm="https://t.example/token",orphan"#).unwrap();
        assert_eq!(challenge.realm, "https://t.example/token");
    }

    #[test]
    fn token_url_carries_service_and_scopes() {
        let challenge = Challenge {
            realm: "https://auth.example/token".to_string(),
            service: Some("registry.example".to_string()),
            scopes: vec!["repository:x/y:pull".to_string(), "repository:z:pull".to_string()],
        };
        let url = challenge.token_url().unwrap();
        assert_eq!(url.host_str(), Some("auth.example"));
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert!(pairs.contains(&("service".to_string(), "registry.example".to_string())));
        assert_eq!(pairs.iter().filter(|(k, _)| k == "scope").count(), 2);
    }

    #[test]
    fn invalid_realm_is_an_error() {
        let challenge = Challenge {
            realm: "not a url".to_string(),
            service: None,
            scopes: Vec::new(),
        };
        assert!(matches!(
            challenge.token_url(),
            Err(UpstreamError::InvalidRealm { .. })
        ));
    }
}
