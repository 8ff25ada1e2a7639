//! Integration tests for the OCI v2 pull-through surface.

mod common;

use axum::http::StatusCode;
use common::{TestServer, remote};
use httpmock::Method::GET;
use httpmock::MockServer;
use larder_core::Digest;
use larder_core::repo::PackageType;
use larder_storage::BlobStore;

fn docker_remote(server: &MockServer) -> larder_core::repo::RepoConfig {
    remote("upstream", &server.base_url(), PackageType::Docker)
}

#[tokio::test]
async fn ping_reports_v2_api_version() {
    let server = TestServer::new(Vec::new()).await;

    for uri in ["/v2", "/v2/"] {
        let (status, headers, _) = server.get(uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            headers.get("docker-distribution-api-version").unwrap(),
            "registry/2.0"
        );
    }
}

#[tokio::test]
async fn responses_carry_a_correlation_id() {
    let server = TestServer::new(Vec::new()).await;

    let (_, headers, _) = server.get("/v2").await;
    assert!(headers.get("x-correlation-id").is_some());

    let (_, headers, _) = server
        .get_with_headers("/v2", &[("x-correlation-id", "fixed-id")])
        .await;
    assert_eq!(headers.get("x-correlation-id").unwrap(), "fixed-id");
}

#[tokio::test]
async fn unknown_repo_key_is_404() {
    let server = TestServer::new(Vec::new()).await;
    let (status, _, _) = server.get("/v2/nope/alpine/manifests/latest").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unclassified_v2_path_is_404() {
    let upstream = MockServer::start();
    let server = TestServer::new(vec![docker_remote(&upstream)]).await;
    let (status, _, _) = server.get("/v2/upstream/alpine/tags/list").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn tag_reference_on_blob_is_400() {
    let upstream = MockServer::start();
    let server = TestServer::new(vec![docker_remote(&upstream)]).await;
    let (status, _, _) = server.get("/v2/upstream/alpine/blobs/latest").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn invalid_repository_name_is_400() {
    let upstream = MockServer::start();
    let server = TestServer::new(vec![docker_remote(&upstream)]).await;
    let (status, _, _) = server.get("/v2/upstream/Alpine/manifests/latest").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn manifest_passthrough_preserves_status_and_headers() {
    let upstream = MockServer::start();
    let manifest = upstream.mock(|when, then| {
        when.method(GET).path("/v2/alpine/manifests/3.19");
        then.status(200)
            .header("content-type", "application/vnd.oci.image.manifest.v1+json")
            .header(
                "docker-content-digest",
                "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
            )
            .body(r#"{"schemaVersion":2}"#);
    });
    let server = TestServer::new(vec![docker_remote(&upstream)]).await;

    let (status, headers, body) = server.get("/v2/upstream/alpine/manifests/3.19").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers.get("docker-content-digest").unwrap(),
        "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    );
    assert_eq!(&body[..], br#"{"schemaVersion":2}"#);
    manifest.assert();
}

#[tokio::test]
async fn manifest_upstream_status_passes_through() {
    let upstream = MockServer::start();
    upstream.mock(|when, then| {
        when.method(GET).path("/v2/alpine/manifests/gone");
        then.status(404).body("manifest unknown");
    });
    let server = TestServer::new(vec![docker_remote(&upstream)]).await;

    let (status, _, body) = server.get("/v2/upstream/alpine/manifests/gone").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(&body[..], b"manifest unknown");
}

#[tokio::test]
async fn blob_miss_fetches_once_then_serves_from_cache() {
    let data = b"layer bytes for the cache hit test".as_slice();
    let digest = Digest::of(data);

    let upstream = MockServer::start();
    let blob = upstream.mock(|when, then| {
        when.method(GET).path(format!("/v2/alpine/blobs/{digest}"));
        then.status(200).body(data);
    });
    let server = TestServer::new(vec![docker_remote(&upstream)]).await;

    let uri = format!("/v2/upstream/alpine/blobs/{digest}");
    let (status, _, body) = server.get(&uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], data);
    assert_eq!(blob.hits(), 1);
    assert!(server.state.blobs.exists(&digest).await.unwrap());

    // Second request: same bytes, no upstream traffic.
    let (status, _, body) = server.get(&uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], data);
    assert_eq!(blob.hits(), 1);
}

#[tokio::test]
async fn digest_mismatch_streams_but_caches_nothing() {
    let expected = Digest::of(b"what upstream promised");

    let upstream = MockServer::start();
    let blob = upstream.mock(|when, then| {
        when.method(GET).path(format!("/v2/alpine/blobs/{expected}"));
        then.status(200).body("what upstream actually sent");
    });
    let server = TestServer::new(vec![docker_remote(&upstream)]).await;

    let uri = format!("/v2/upstream/alpine/blobs/{expected}");
    let (status, _, body) = server.get(&uri).await;
    // Bytes were already streaming when verification failed.
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"what upstream actually sent");
    assert!(!server.state.blobs.exists(&expected).await.unwrap());

    // The rejected entry is absent, so the next request goes upstream again.
    let (_, _, _) = server.get(&uri).await;
    assert_eq!(blob.hits(), 2);
}

#[tokio::test]
async fn blob_upstream_failure_maps_to_502() {
    let digest = Digest::of(b"unreachable");
    let upstream = MockServer::start();
    upstream.mock(|when, then| {
        when.method(GET).path(format!("/v2/alpine/blobs/{digest}"));
        then.status(500);
    });
    let server = TestServer::new(vec![docker_remote(&upstream)]).await;

    let (status, _, _) = server
        .get(&format!("/v2/upstream/alpine/blobs/{digest}"))
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn unauthorized_upstream_triggers_one_token_fetch() {
    let upstream = MockServer::start();
    let token_endpoint = upstream.mock(|when, then| {
        when.method(GET)
            .path("/token")
            .query_param("service", "registry.example")
            .query_param("scope", "repository:app:pull");
        then.status(200)
            .json_body(serde_json::json!({ "token": "T", "expires_in": 60 }));
    });
    let unauthorized = upstream.mock(|when, then| {
        when.method(GET).path("/v2/app/manifests/latest").matches(|req| {
            !req.headers
                .clone()
                .unwrap_or_default()
                .iter()
                .any(|(name, _)| name.eq_ignore_ascii_case("authorization"))
        });
        then.status(401).header(
            "WWW-Authenticate",
            format!(
                r#"Bearer realm="{}",service="registry.example",scope="repository:app:pull""#,
                upstream.url("/token")
            ),
        );
    });
    let authorized = upstream.mock(|when, then| {
        when.method(GET)
            .path("/v2/app/manifests/latest")
            .header("authorization", "Bearer T");
        then.status(200).body("manifest");
    });
    let server = TestServer::new(vec![docker_remote(&upstream)]).await;

    let (status, _, body) = server.get("/v2/upstream/app/manifests/latest").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"manifest");
    assert_eq!(token_endpoint.hits(), 1);
    assert_eq!(unauthorized.hits(), 1);
    assert_eq!(authorized.hits(), 1);

    // The cached token satisfies the next challenge without a new fetch.
    let (status, _, _) = server.get("/v2/upstream/app/manifests/latest").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(token_endpoint.hits(), 1);
    assert_eq!(authorized.hits(), 2);
}

#[tokio::test]
async fn hop_by_hop_headers_are_not_forwarded() {
    let upstream = MockServer::start();
    let manifest = upstream.mock(|when, then| {
        when.method(GET)
            .path("/v2/alpine/manifests/latest")
            .header("accept", "application/json")
            .header("user-agent", "docker/26.0")
            .matches(|req| {
                !req.headers.clone().unwrap_or_default().iter().any(|(name, _)| {
                    name.eq_ignore_ascii_case("connection")
                        || name.eq_ignore_ascii_case("upgrade")
                        || name.eq_ignore_ascii_case("authorization")
                })
            });
        then.status(200).body("{}");
    });
    let server = TestServer::new(vec![docker_remote(&upstream)]).await;

    let (status, _, _) = server
        .get_with_headers(
            "/v2/upstream/alpine/manifests/latest",
            &[
                ("connection", "close"),
                ("upgrade", "websocket"),
                ("authorization", "Basic Zm9v"),
                ("accept", "application/json"),
                ("user-agent", "docker/26.0"),
            ],
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    manifest.assert();
}
