// Integration tests for `GatewayClient` using wiremock.

use serde_json::json;
use url::Url;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use vigil_api::{Error, GatewayClient, TransportConfig};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, GatewayClient) {
    let server = MockServer::start().await;
    let base = Url::parse(&format!("{}/", server.uri())).unwrap();
    let client = GatewayClient::new(base, &TransportConfig::default()).unwrap();
    (server, client)
}

// ── Auth ────────────────────────────────────────────────────────────

#[tokio::test]
async fn login_returns_token_grant() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_json(json!({ "username": "user@example.com", "password": "hunter2" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "access_token": "at-1",
            "refresh_token": "rt-1",
            "expires_in": 1800
        })))
        .mount(&server)
        .await;

    let grant = client.login("user@example.com", "hunter2").await.unwrap();
    assert_eq!(grant.access_token, "at-1");
    assert_eq!(grant.refresh_token.as_deref(), Some("rt-1"));
    assert_eq!(grant.expires_in, 1800);
}

#[tokio::test]
async fn login_rejection_is_authentication_error() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = client.login("user@example.com", "wrong").await.unwrap_err();
    assert!(matches!(err, Error::Authentication { .. }));
    assert!(err.is_auth());
}

#[tokio::test]
async fn refresh_may_omit_refresh_token() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/oauth/refresh-token"))
        .and(body_json(json!({ "refresh_token": "rt-1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at-2",
            "expires_in": 1800
        })))
        .mount(&server)
        .await;

    let grant = client.refresh("rt-1").await.unwrap();
    assert_eq!(grant.access_token, "at-2");
    assert!(grant.refresh_token.is_none());
}

#[tokio::test]
async fn refresh_rejection_is_not_transient() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/oauth/refresh-token"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let err = client.refresh("stale").await.unwrap_err();
    assert!(matches!(err, Error::RefreshRejected { .. }));
    assert!(err.is_auth());
    assert!(!err.is_transient());
}

// ── Data ────────────────────────────────────────────────────────────

#[tokio::test]
async fn list_locations_sends_bearer_token() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/locations"))
        .and(header("authorization", "Bearer at-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "locationId": "loc-1", "name": "Cabin" },
            { "locationId": "loc-2" }
        ])))
        .mount(&server)
        .await;

    let locations = client.list_locations("at-1").await.unwrap();
    assert_eq!(locations.len(), 2);
    assert_eq!(locations[0].location_id, "loc-1");
    assert_eq!(locations[0].name.as_deref(), Some("Cabin"));
    assert!(locations[1].name.is_none());
}

#[tokio::test]
async fn fetch_snapshot_parses_document() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/home/loc-1"))
        .and(header("authorization", "Bearer at-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "alarmState": "DISARMED",
            "devices": [{
                "id": "d1",
                "features": {
                    "battery": { "states": { "low": { "value": false } } }
                }
            }]
        })))
        .mount(&server)
        .await;

    let doc = client.fetch_snapshot("at-1", "loc-1").await.unwrap();
    assert_eq!(doc.alarm_state.as_deref(), Some("DISARMED"));
    assert_eq!(doc.devices[0].id, "d1");
}

#[tokio::test]
async fn expired_token_on_fetch_is_authentication_error() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/home/loc-1"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = client.fetch_snapshot("expired", "loc-1").await.unwrap_err();
    assert!(matches!(err, Error::Authentication { .. }));
}

#[tokio::test]
async fn malformed_body_is_deserialization_error() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/home/loc-1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let err = client.fetch_snapshot("at-1", "loc-1").await.unwrap_err();
    assert!(matches!(err, Error::Deserialization { .. }));
}

#[tokio::test]
async fn server_error_carries_status() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/home/loc-1"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    match client.fetch_snapshot("at-1", "loc-1").await.unwrap_err() {
        Error::Api { status, message } => {
            assert_eq!(status, 503);
            assert_eq!(message, "maintenance");
        }
        other => panic!("expected Api error, got {other:?}"),
    }
}

// ── Stream URL ──────────────────────────────────────────────────────

#[tokio::test]
async fn stream_url_uses_ws_scheme_and_query_auth() {
    let (server, client) = setup().await;
    drop(server);

    let url = client.stream_url("at-1", "loc-1").unwrap();
    assert!(url.scheme() == "ws" || url.scheme() == "wss");

    let query: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    assert!(query.contains(&("locationId".into(), "loc-1".into())));
    assert!(query.contains(&("token".into(), "Bearer at-1".into())));
}
