//! SigV4 authentication tests through the full router.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{body_bytes, body_string, test_server, test_server_with};
use hmac::{Hmac, Mac};
use silo_metadata::repos::UserRepo;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use time::macros::format_description;

const ACCESS_KEY: &str = "AKIATEST";
const SECRET_KEY: &str = "wJalrXUtnFEMI/K7MDENG";
const HOST: &str = "localhost:9000";

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).unwrap();
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Sign a request the way the AWS CLI would (UNSIGNED-PAYLOAD body).
fn signed_request(method: &str, path: &str, secret: &str, body: &[u8]) -> Request<Body> {
    let now = OffsetDateTime::now_utc();
    let amz_date = now
        .format(format_description!(
            "[year][month][day]T[hour][minute][second]Z"
        ))
        .unwrap();
    let scope_date = &amz_date[..8];
    let payload_hash = "UNSIGNED-PAYLOAD";

    // Sorted, AWS-encoded query pairs.
    let (uri_path, query) = path.split_once('?').unwrap_or((path, ""));
    let mut pairs: Vec<String> = query
        .split('&')
        .filter(|p| !p.is_empty())
        .map(|p| {
            let (k, v) = p.split_once('=').unwrap_or((p, ""));
            format!("{k}={v}")
        })
        .collect();
    pairs.sort();
    let canonical_query = pairs.join("&");

    let canonical = format!(
        "{method}\n{uri_path}\n{canonical_query}\n\
         host:{HOST}\nx-amz-content-sha256:{payload_hash}\nx-amz-date:{amz_date}\n\n\
         host;x-amz-content-sha256;x-amz-date\n{payload_hash}"
    );
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{amz_date}\n{scope_date}/us-east-1/s3/aws4_request\n{}",
        sha256_hex(canonical.as_bytes())
    );
    let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), scope_date.as_bytes());
    let k_region = hmac_sha256(&k_date, b"us-east-1");
    let k_service = hmac_sha256(&k_region, b"s3");
    let k_signing = hmac_sha256(&k_service, b"aws4_request");
    let signature = hex::encode(hmac_sha256(&k_signing, string_to_sign.as_bytes()));

    Request::builder()
        .method(method)
        .uri(path)
        .header("host", HOST)
        .header("x-amz-date", &amz_date)
        .header("x-amz-content-sha256", payload_hash)
        .header(
            "authorization",
            format!(
                "AWS4-HMAC-SHA256 Credential={ACCESS_KEY}/{scope_date}/us-east-1/s3/aws4_request, \
                 SignedHeaders=host;x-amz-content-sha256;x-amz-date, Signature={signature}"
            ),
        )
        .body(Body::from(body.to_vec()))
        .unwrap()
}

#[tokio::test]
async fn signed_requests_carry_the_caller_identity() {
    let server = test_server().await;
    server
        .state
        .metadata
        .ensure_user(ACCESS_KEY, SECRET_KEY)
        .await
        .unwrap();

    let res = server
        .request(signed_request("PUT", "/docs", SECRET_KEY, b""))
        .await;
    assert_eq!(res.status(), StatusCode::OK);

    let res = server
        .request(signed_request("PUT", "/docs/k", SECRET_KEY, b"hello"))
        .await;
    assert_eq!(res.status(), StatusCode::OK);

    let res = server
        .request(signed_request("GET", "/docs/k", SECRET_KEY, b""))
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_bytes(res).await, b"hello");
}

#[tokio::test]
async fn buckets_are_invisible_across_owners() {
    let server = test_server().await;
    server
        .state
        .metadata
        .ensure_user(ACCESS_KEY, SECRET_KEY)
        .await
        .unwrap();

    // The signed user owns "docs"; the anonymous caller (owner 0) cannot
    // resolve it.
    let res = server
        .request(signed_request("PUT", "/docs", SECRET_KEY, b""))
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    let res = server
        .request(signed_request("PUT", "/docs/k", SECRET_KEY, b"hello"))
        .await;
    assert_eq!(res.status(), StatusCode::OK);

    let res = server.get_object("docs", "k").await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn bad_signature_is_rejected() {
    let server = test_server().await;
    server
        .state
        .metadata
        .ensure_user(ACCESS_KEY, SECRET_KEY)
        .await
        .unwrap();

    let res = server
        .request(signed_request("GET", "/docs/k", "wrong-secret", b""))
        .await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert!(
        body_string(res)
            .await
            .contains("<Code>SignatureDoesNotMatch</Code>")
    );
}

#[tokio::test]
async fn unknown_access_key_is_rejected() {
    let server = test_server().await;

    let res = server
        .request(signed_request("GET", "/docs/k", SECRET_KEY, b""))
        .await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn unsigned_requests_rejected_unless_anonymous_enabled() {
    let server = test_server_with(|config| {
        config.auth.allow_anonymous = false;
    })
    .await;

    let res = server.get("/").await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    // Probes stay open for load balancers.
    let res = server.get("/healthz").await;
    assert_eq!(res.status(), StatusCode::OK);
    let res = server.get("/readyz").await;
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn signed_query_parameters_are_canonicalized() {
    let server = test_server().await;
    server
        .state
        .metadata
        .ensure_user(ACCESS_KEY, SECRET_KEY)
        .await
        .unwrap();

    let res = server
        .request(signed_request("PUT", "/docs", SECRET_KEY, b""))
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    let res = server
        .request(signed_request("PUT", "/docs/k", SECRET_KEY, b"x"))
        .await;
    assert_eq!(res.status(), StatusCode::OK);

    // Multiple query parameters, deliberately unsorted in the URI.
    let res = server
        .request(signed_request(
            "GET",
            "/docs?list-type=2&delimiter=%2F",
            SECRET_KEY,
            b"",
        ))
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    assert!(body_string(res).await.contains("<ListBucketResult"));
}
