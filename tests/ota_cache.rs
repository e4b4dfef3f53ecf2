//! OTA cache behavior over the HTTP surface: warm-once memoization,
//! traversal rejection, and upstream-miss handling.

mod common;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mock_upstream(firmware: &[u8]) -> MockServer {
    let upstream = MockServer::start().await;

    let catalog = json!([{
        "name": "1.2.0",
        "tag_name": "1.2.0",
        "assets": [{
            "platform": "ESP32-S3-BOX-3",
            "browser_download_url": format!("{}/fw/box3.bin", upstream.uri()),
        }],
    }]);
    Mock::given(method("GET"))
        .and(path("/api/release"))
        .respond_with(ResponseTemplate::new(200).set_body_json(catalog))
        .mount(&upstream)
        .await;
    Mock::given(method("GET"))
        .and(path("/fw/box3.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(firmware))
        .expect(1) // The second OTA request must be served from the cache.
        .mount(&upstream)
        .await;

    upstream
}

#[tokio::test]
async fn ota_is_fetched_once_and_served_from_cache() {
    let upstream = mock_upstream(b"firmware-bytes").await;
    let server = common::spawn(format!("{}/api/release", upstream.uri())).await;
    let client = reqwest::Client::new();

    let url = server.http_url("/api/ota?version=1.2.0&platform=ESP32-S3-BOX-3");

    let first = client.get(&url).send().await.expect("first request");
    assert_eq!(first.status(), 200);
    let first_bytes = first.bytes().await.expect("first body");
    assert_eq!(first_bytes.as_ref(), b"firmware-bytes");

    let second = client.get(&url).send().await.expect("second request");
    assert_eq!(second.status(), 200);
    let second_bytes = second.bytes().await.expect("second body");
    assert_eq!(first_bytes, second_bytes);

    // The .expect(1) on the firmware mock verifies no re-download happened.
    upstream.verify().await;
}

#[tokio::test]
async fn traversal_versions_are_rejected_with_400() {
    let upstream = mock_upstream(b"x").await;
    let server = common::spawn(format!("{}/api/release", upstream.uri())).await;
    let client = reqwest::Client::new();

    let response = client
        .get(server.http_url("/api/ota"))
        .query(&[("version", "0.0.0-mock.0/../../.."), ("platform", "foo")])
        .send()
        .await
        .expect("request");

    assert_eq!(response.status(), 400);
    let body: serde_json::Value = response.json().await.expect("detail body");
    assert!(
        body["detail"]
            .as_str()
            .expect("detail")
            .contains("invalid asset path")
    );
}

#[tokio::test]
async fn unknown_platform_is_404_with_no_cache_side_effect() {
    let upstream = mock_upstream(b"x").await;
    let server = common::spawn(format!("{}/api/release", upstream.uri())).await;
    let client = reqwest::Client::new();

    let response = client
        .get(server.http_url("/api/ota?version=1.2.0&platform=UNKNOWN"))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 404);

    // Nothing was written for the unknown platform.
    let cached = server
        .state
        .releases
        .cached_path("1.2.0", "UNKNOWN")
        .expect("path is safe");
    assert!(!cached.exists());
}

#[tokio::test]
async fn release_list_annotates_was_url_and_cached() {
    let upstream = mock_upstream(b"firmware-bytes").await;
    let server = common::spawn(format!("{}/api/release", upstream.uri())).await;
    let client = reqwest::Client::new();

    // The annotated listing needs the WAS URL satellites dial back to.
    let response = client
        .post(server.http_url("/api/config?type=nvs&apply=false"))
        .json(&json!({"WAS": {"URL": "ws://roost.local:8502/ws"}}))
        .send()
        .await
        .expect("store nvs");
    assert_eq!(response.status(), 200);

    // Nothing cached yet.
    let releases: serde_json::Value = client
        .get(server.http_url("/api/release?type=was"))
        .send()
        .await
        .expect("list")
        .json()
        .await
        .expect("json");
    let asset = &releases[0]["assets"][0];
    assert_eq!(
        asset["was_url"],
        "http://roost.local:8502/api/ota?version=1.2.0&platform=ESP32-S3-BOX-3"
    );
    assert_eq!(asset["cached"], false);

    // Warm the cache, then the flag flips.
    client
        .get(server.http_url("/api/ota?version=1.2.0&platform=ESP32-S3-BOX-3"))
        .send()
        .await
        .expect("warm");
    let releases: serde_json::Value = client
        .get(server.http_url("/api/release?type=was"))
        .send()
        .await
        .expect("list again")
        .json()
        .await
        .expect("json");
    assert_eq!(releases[0]["assets"][0]["cached"], true);
}

#[tokio::test]
async fn admin_cache_and_delete_round_trip() {
    let upstream = mock_upstream(b"firmware-bytes").await;
    let server = common::spawn(format!("{}/api/release", upstream.uri())).await;
    let client = reqwest::Client::new();

    let response = client
        .post(server.http_url("/api/release?action=cache"))
        .json(&json!({
            "version": "1.2.0",
            "platform": "ESP32-S3-BOX-3",
            "url": format!("{}/fw/box3.bin", upstream.uri()),
            "size": 14,
        }))
        .send()
        .await
        .expect("cache");
    assert_eq!(response.status(), 200);
    let cached = server
        .state
        .releases
        .cached_path("1.2.0", "ESP32-S3-BOX-3")
        .expect("path");
    assert!(cached.is_file());

    let response = client
        .post(server.http_url("/api/release?action=delete"))
        .json(&json!({"path": "1.2.0/ESP32-S3-BOX-3.bin"}))
        .send()
        .await
        .expect("delete");
    assert_eq!(response.status(), 200);
    assert!(!cached.exists());

    // Deleting outside the OTA root is rejected.
    let response = client
        .post(server.http_url("/api/release?action=delete"))
        .json(&json!({"path": "../roost.db"}))
        .send()
        .await
        .expect("traversal delete");
    assert_eq!(response.status(), 400);
}
