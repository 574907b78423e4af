#![allow(clippy::unwrap_used)]
// Integration tests for `SessionClient` using wiremock.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use url::Url;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use sanlink_api::{
    AuthInfo, BackendStatusSink, ClientConfig, Collaborators, DeviceRegistry, Error, SecretRef,
    SessionClient, StaticSecrets,
};

// ── Helpers ─────────────────────────────────────────────────────────

const UNREACHABLE: &str = "http://127.0.0.1:1";

#[derive(Debug, Default)]
struct RecordingSink {
    updates: Mutex<Vec<(String, bool)>>,
}

impl RecordingSink {
    fn updates(&self) -> Vec<(String, bool)> {
        self.updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl BackendStatusSink for RecordingSink {
    async fn set_online(&self, backend_id: &str, online: bool) -> Result<(), Error> {
        self.updates
            .lock()
            .unwrap()
            .push((backend_id.to_owned(), online));
        Ok(())
    }
}

fn rest(suffix: &str) -> String {
    format!("/deviceManager/rest{suffix}")
}

fn ok(data: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "data": data, "error": { "code": 0 } }))
}

fn fail(code: i64, description: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .set_body_json(json!({ "data": {}, "error": { "code": code, "description": description } }))
}

fn login_ok(token: &str) -> ResponseTemplate {
    ok(json!({
        "deviceid": "dev1",
        "iBaseToken": token,
        "vstoreName": "System_vStore",
        "vstoreId": "0",
    }))
}

fn urls(uris: &[&str]) -> Vec<Url> {
    uris.iter().map(|u| Url::parse(u).unwrap()).collect()
}

fn build(
    uris: &[&str],
    devices: Arc<DeviceRegistry>,
    sink: Arc<RecordingSink>,
) -> SessionClient {
    let config = ClientConfig::new("array-a", urls(uris), "admin", SecretRef::new("array-secret"))
        .with_backend_id("backend-a")
        .with_storage("oceanstor-san");
    let secrets = StaticSecrets::new().with("array-secret", AuthInfo::new("admin", "pw"));
    let collaborators = Collaborators::new(devices, Arc::new(secrets), sink);
    SessionClient::new(config, collaborators).unwrap()
}

async fn mount_login(server: &MockServer, token: &str) {
    Mock::given(method("POST"))
        .and(path(rest("/xx/sessions")))
        .respond_with(login_ok(token))
        .mount(server)
        .await;
}

async fn mount_logout(server: &MockServer) {
    Mock::given(method("DELETE"))
        .and(path(rest("/dev1/sessions")))
        .respond_with(ok(json!({})))
        .mount(server)
        .await;
}

async fn mount_system(server: &MockServer, wwn: &str) {
    Mock::given(method("GET"))
        .and(path(rest("/dev1/system/")))
        .respond_with(ok(json!({ "ID": "dev1", "pointRelease": "6.1.5", "wwn": wwn })))
        .mount(server)
        .await;
}

async fn setup() -> (MockServer, SessionClient, Arc<RecordingSink>) {
    let server = MockServer::start().await;
    let sink = Arc::new(RecordingSink::default());
    let client = build(
        &[&server.uri()],
        Arc::new(DeviceRegistry::default()),
        Arc::clone(&sink),
    );
    (server, client, sink)
}

// ── Login and failover ──────────────────────────────────────────────

#[tokio::test]
async fn test_login_records_session() {
    let (server, client, _) = setup().await;
    mount_login(&server, "tok-1").await;

    client.login().await.unwrap();

    assert_eq!(client.device_sn(), "dev1");
    assert_eq!(client.vstore_id(), "0");
    assert_eq!(client.vstore_name(), "System_vStore");
    assert!(client.has_token());
    assert!(client.gate().devices().contains("dev1"));
}

#[tokio::test]
async fn test_login_fails_over_unreachable_address() {
    let server = MockServer::start().await;
    mount_login(&server, "tok-1").await;
    let client = build(
        &[UNREACHABLE, &server.uri()],
        Arc::new(DeviceRegistry::default()),
        Arc::new(RecordingSink::default()),
    );

    client.login().await.unwrap();

    assert_eq!(client.active_url(), format!("{}/deviceManager/rest", server.uri()));
    assert_eq!(client.device_sn(), "dev1");
}

#[tokio::test]
async fn test_successful_address_moves_to_back() {
    let b = MockServer::start().await;
    let c = MockServer::start().await;
    mount_login(&b, "tok-1").await;
    mount_login(&c, "tok-1").await;
    let client = build(
        &[UNREACHABLE, &b.uri(), &c.uri()],
        Arc::new(DeviceRegistry::default()),
        Arc::new(RecordingSink::default()),
    );

    client.login().await.unwrap();

    assert_eq!(client.endpoints(), urls(&[UNREACHABLE, &c.uri(), &b.uri()]));
    assert!(c.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_last_address_answering_keeps_order() {
    let server = MockServer::start().await;
    mount_login(&server, "tok-1").await;
    let second = "http://127.0.0.1:2";
    let client = build(
        &[UNREACHABLE, second, &server.uri()],
        Arc::new(DeviceRegistry::default()),
        Arc::new(RecordingSink::default()),
    );

    client.login().await.unwrap();

    assert_eq!(client.endpoints(), urls(&[UNREACHABLE, second, &server.uri()]));
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_all_addresses_unreachable() {
    let client = build(
        &[UNREACHABLE, "http://127.0.0.1:2"],
        Arc::new(DeviceRegistry::default()),
        Arc::new(RecordingSink::default()),
    );

    let result = client.login().await;

    assert!(
        matches!(result, Err(Error::Unconnected { .. })),
        "expected Unconnected, got: {result:?}"
    );
    assert!(!client.has_token());
}

#[tokio::test]
async fn test_business_reject_stops_failover() {
    let a = MockServer::start().await;
    let b = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(rest("/xx/sessions")))
        .respond_with(fail(50_331_651, "internal error"))
        .mount(&a)
        .await;
    mount_login(&b, "tok-1").await;
    let sink = Arc::new(RecordingSink::default());
    let client = build(
        &[&a.uri(), &b.uri()],
        Arc::new(DeviceRegistry::default()),
        Arc::clone(&sink),
    );

    let result = client.login().await;

    assert!(
        matches!(result, Err(Error::AuthRejected { code: 50_331_651, .. })),
        "expected AuthRejected, got: {result:?}"
    );
    assert!(b.received_requests().await.unwrap().is_empty());
    assert!(sink.updates().is_empty());
    assert_eq!(client.endpoints(), urls(&[&a.uri(), &b.uri()]));
}

#[tokio::test]
async fn test_lockout_marks_backend_offline() {
    let (server, client, sink) = setup().await;
    Mock::given(method("POST"))
        .and(path(rest("/xx/sessions")))
        .respond_with(fail(1_077_949_071, "account locked"))
        .mount(&server)
        .await;

    let result = client.login().await;

    assert!(matches!(result, Err(Error::AuthRejected { code: 1_077_949_071, .. })));
    assert_eq!(sink.updates(), vec![("backend-a".to_owned(), false)]);
}

#[tokio::test]
async fn test_malformed_login_data_logs_out_and_marks_offline() {
    let (server, client, sink) = setup().await;
    Mock::given(method("POST"))
        .and(path(rest("/xx/sessions")))
        .respond_with(ok(json!({ "deviceid": "dev1" })))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(rest("/dev1/sessions")))
        .respond_with(ok(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let result = client.login().await;

    assert!(matches!(result, Err(Error::Decode { .. })), "got: {result:?}");
    assert!(!client.has_token());
    assert_eq!(client.device_sn(), "");
    assert_eq!(sink.updates(), vec![("backend-a".to_owned(), false)]);
    server.verify().await;
}

#[tokio::test]
async fn test_missing_vstore_fields_use_defaults() {
    let (server, client, _) = setup().await;
    Mock::given(method("POST"))
        .and(path(rest("/xx/sessions")))
        .respond_with(ok(json!({ "deviceid": "dev1", "iBaseToken": "tok-1" })))
        .mount(&server)
        .await;

    client.login().await.unwrap();

    assert_eq!(client.vstore_name(), "System_vStore");
    assert_eq!(client.vstore_id(), "0");
}

#[tokio::test]
async fn test_validate_login_does_not_register_device() {
    let (server, client, sink) = setup().await;
    mount_login(&server, "tok-1").await;

    client.validate_login().await.unwrap();

    assert_eq!(client.device_sn(), "dev1");
    assert!(!client.gate().devices().contains("dev1"));
    assert!(sink.updates().is_empty());
}

// ── Request assembly ────────────────────────────────────────────────

#[tokio::test]
async fn test_token_header_only_after_login() {
    let (server, client, _) = setup().await;
    mount_login(&server, "tok-1").await;
    Mock::given(method("GET"))
        .and(path(rest("/dev1/lun")))
        .respond_with(ok(json!([])))
        .mount(&server)
        .await;

    client.login().await.unwrap();
    client.get("/lun", None).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].headers.get("iBaseToken").is_none());
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["username"], "admin");
    assert!(body.get("vstorename").is_none());
    assert_eq!(requests[1].headers.get("iBaseToken").unwrap(), "tok-1");
}

#[tokio::test]
async fn test_non_json_body_is_decode_error() {
    let (server, client, _) = setup().await;
    mount_login(&server, "tok-1").await;
    Mock::given(method("GET"))
        .and(path(rest("/dev1/lun")))
        .respond_with(ResponseTemplate::new(502).set_body_string("<html>bad gateway</html>"))
        .mount(&server)
        .await;

    client.login().await.unwrap();
    let result = client.get("/lun", None).await;

    assert!(matches!(result, Err(Error::Decode { .. })), "got: {result:?}");
}

#[tokio::test]
async fn test_business_error_is_returned_not_raised() {
    let (server, client, _) = setup().await;
    mount_login(&server, "tok-1").await;
    Mock::given(method("POST"))
        .and(path(rest("/dev1/lun")))
        .respond_with(fail(1_077_948_993, "name already exists"))
        .mount(&server)
        .await;

    client.login().await.unwrap();
    let resp = client.post("/lun", Some(&json!({ "NAME": "vol1" }))).await.unwrap();

    assert_eq!(resp.code(), 1_077_948_993);
    assert!(matches!(resp.into_result(), Err(Error::Api { .. })));
}

// ── Relogin ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_expired_session_relogs_and_retries_once() {
    let (server, client, _) = setup().await;
    Mock::given(method("POST"))
        .and(path(rest("/xx/sessions")))
        .respond_with(login_ok("tok-1"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_login(&server, "tok-2").await;
    mount_logout(&server).await;
    mount_system(&server, "wwn-a").await;
    Mock::given(method("GET"))
        .and(path(rest("/dev1/lun")))
        .respond_with(fail(-401, "unauthorized"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(rest("/dev1/lun")))
        .respond_with(ok(json!([{ "ID": "1" }])))
        .mount(&server)
        .await;

    client.login().await.unwrap();
    let resp = client.get("/lun", None).await.unwrap();

    assert!(resp.is_success());
    assert_eq!(resp.data.as_list().unwrap().len(), 1);
    assert_eq!(client.storage_version(), "6.1.5");

    let requests = server.received_requests().await.unwrap();
    let lun_calls: Vec<_> = requests.iter().filter(|r| r.url.path().ends_with("/lun")).collect();
    assert_eq!(lun_calls.len(), 2);
    assert_eq!(lun_calls[1].headers.get("iBaseToken").unwrap(), "tok-2");
}

#[tokio::test]
async fn test_retry_result_is_returned_even_if_expired_again() {
    let (server, client, _) = setup().await;
    mount_login(&server, "tok-1").await;
    mount_logout(&server).await;
    mount_system(&server, "wwn-a").await;
    Mock::given(method("GET"))
        .and(path(rest("/dev1/lun")))
        .respond_with(fail(1_077_949_069, "session expired"))
        .expect(2)
        .mount(&server)
        .await;

    client.login().await.unwrap();
    let resp = client.get("/lun", None).await.unwrap();

    assert!(resp.needs_relogin());
    server.verify().await;
}

#[tokio::test]
async fn test_system_failure_after_relogin() {
    let (server, client, _) = setup().await;
    mount_login(&server, "tok-1").await;
    mount_logout(&server).await;
    Mock::given(method("GET"))
        .and(path(rest("/dev1/system/")))
        .respond_with(ResponseTemplate::new(500).set_body_string("oops"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(rest("/dev1/lun")))
        .respond_with(fail(-401, "unauthorized"))
        .mount(&server)
        .await;

    client.login().await.unwrap();
    let result = client.get("/lun", None).await;

    assert!(
        matches!(result, Err(Error::SystemInfoUnavailable(_))),
        "got: {result:?}"
    );
    assert!(!client.site().is_refreshing());
}

#[tokio::test]
async fn test_concurrent_expiry_triggers_single_relogin() {
    let (server, client, _) = setup().await;
    Mock::given(method("POST"))
        .and(path(rest("/xx/sessions")))
        .respond_with(login_ok("tok-1"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    client.login().await.unwrap();

    Mock::given(method("POST"))
        .and(path(rest("/xx/sessions")))
        .respond_with(login_ok("tok-2").set_delay(Duration::from_millis(200)))
        .expect(1)
        .mount(&server)
        .await;
    mount_logout(&server).await;
    mount_system(&server, "wwn-a").await;
    Mock::given(method("GET"))
        .and(path(rest("/dev1/lun")))
        .respond_with(fail(-401, "unauthorized"))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(rest("/dev1/lun")))
        .respond_with(ok(json!([])))
        .mount(&server)
        .await;

    let (first, second) = tokio::join!(client.get("/lun", None), client.get("/lun", None));

    // A retry racing the other caller's system refresh fails fast.
    for result in [first, second] {
        assert!(
            matches!(result, Ok(_) | Err(Error::SiteRefreshing)),
            "got: {result:?}"
        );
    }
    server.verify().await;
}

#[tokio::test]
async fn test_relogin_detects_site_migration() {
    let (server, client, _) = setup().await;
    Mock::given(method("POST"))
        .and(path(rest("/xx/sessions")))
        .respond_with(login_ok("tok-1"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_login(&server, "tok-2").await;
    mount_logout(&server).await;
    Mock::given(method("GET"))
        .and(path(rest("/dev1/system/")))
        .respond_with(ok(json!({ "pointRelease": "6.1.5", "wwn": "wwn-a" })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_system(&server, "wwn-b").await;
    Mock::given(method("GET"))
        .and(path(rest("/dev1/lun")))
        .respond_with(fail(-401, "unauthorized"))
        .expect(1)
        .mount(&server)
        .await;

    client.login().await.unwrap();
    client.refresh_system_info().await.unwrap();
    let result = client.get("/lun", None).await;

    assert!(
        matches!(result, Err(Error::SiteMismatch { ref observed, ref current })
            if observed == "wwn-a" && current == "wwn-b"),
        "got: {result:?}"
    );
    let requests = server.received_requests().await.unwrap();
    let logins = requests.iter().filter(|r| r.url.path().ends_with("/xx/sessions")).count();
    assert_eq!(logins, 2);
    server.verify().await;
}

#[tokio::test]
async fn test_logout_clears_session() {
    let (server, client, _) = setup().await;
    mount_login(&server, "tok-1").await;
    mount_logout(&server).await;

    client.login().await.unwrap();
    client.logout().await;

    assert!(!client.has_token());
    assert_eq!(client.device_sn(), "");
}

// ── Site awareness ──────────────────────────────────────────────────

#[tokio::test]
async fn test_refreshing_site_fails_fast_without_request() {
    let (server, client, _) = setup().await;
    mount_login(&server, "tok-1").await;
    client.login().await.unwrap();

    let refresh = client.site().begin_refresh();
    let result = client.get("/lun", None).await;
    drop(refresh);

    assert!(matches!(result, Err(Error::SiteRefreshing)), "got: {result:?}");
    let requests = server.received_requests().await.unwrap();
    assert!(requests.iter().all(|r| !r.url.path().ends_with("/lun")));
}

#[tokio::test]
async fn test_site_migration_is_detected_until_login() {
    let (server, client, _) = setup().await;
    mount_login(&server, "tok-1").await;
    Mock::given(method("GET"))
        .and(path(rest("/dev1/system/")))
        .respond_with(ok(json!({ "pointRelease": "6.1.5", "wwn": "wwn-a" })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_system(&server, "wwn-b").await;
    Mock::given(method("GET"))
        .and(path(rest("/dev1/lun")))
        .respond_with(ok(json!([])))
        .mount(&server)
        .await;

    client.login().await.unwrap();
    client.refresh_system_info().await.unwrap();
    client.get("/lun", None).await.unwrap();

    client.refresh_system_info().await.unwrap();
    let result = client.get("/lun", None).await;
    assert!(
        matches!(result, Err(Error::SiteMismatch { ref observed, ref current })
            if observed == "wwn-a" && current == "wwn-b"),
        "got: {result:?}"
    );

    client.login().await.unwrap();
    client.refresh_system_info().await.unwrap();
    client.get("/lun", None).await.unwrap();
}

// ── Concurrency ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_sessions_share_device_permits() {
    let server = MockServer::start().await;
    mount_login(&server, "tok-1").await;
    Mock::given(method("GET"))
        .and(path(rest("/dev1/lun")))
        .respond_with(ok(json!([])).set_delay(Duration::from_millis(300)))
        .mount(&server)
        .await;
    let devices = Arc::new(DeviceRegistry::new(1));
    let a = build(&[&server.uri()], Arc::clone(&devices), Arc::default());
    let b = build(&[&server.uri()], Arc::clone(&devices), Arc::default());
    a.login().await.unwrap();
    b.login().await.unwrap();

    let started = Instant::now();
    let (ra, rb) = tokio::join!(a.get("/lun", None), b.get("/lun", None));
    ra.unwrap();
    rb.unwrap();

    assert!(started.elapsed() >= Duration::from_millis(550));
    assert_eq!(devices.available("dev1"), Some(1));
}

// ── Duplication ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_duplicate_needs_login_before_calls() {
    let (server, client, _) = setup().await;
    mount_login(&server, "tok-1").await;
    Mock::given(method("GET"))
        .and(path(rest("/dev1/lun")))
        .respond_with(ok(json!([])))
        .mount(&server)
        .await;
    client.login().await.unwrap();

    let dup = client.duplicate();
    assert_eq!(dup.device_sn(), "dev1");
    assert!(matches!(dup.get("/lun", None).await, Err(Error::NoTransport { .. })));

    dup.login().await.unwrap();
    dup.get("/lun", None).await.unwrap();
    assert!(client.has_transport());
}

// ── Capabilities ────────────────────────────────────────────────────

#[tokio::test]
async fn test_get_vstore_by_name() {
    let (server, client, _) = setup().await;
    mount_login(&server, "tok-1").await;
    Mock::given(method("GET"))
        .and(path(rest("/dev1/vstore")))
        .and(query_param("filter", "NAME::tenant-a"))
        .respond_with(ok(json!([{ "ID": "7", "NAME": "tenant-a" }])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(rest("/dev1/vstore")))
        .and(query_param("filter", "NAME::missing"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "error": { "code": 0 } })))
        .mount(&server)
        .await;

    client.login().await.unwrap();

    let vstore = client.vstore().get_vstore_by_name("tenant-a").await.unwrap().unwrap();
    assert_eq!(vstore.id, "7");
    assert!(client.vstore().get_vstore_by_name("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_get_system() {
    let (server, client, _) = setup().await;
    mount_login(&server, "tok-1").await;
    mount_system(&server, "wwn-a").await;

    client.login().await.unwrap();
    let system = client.system().get_system().await.unwrap();

    assert_eq!(system.wwn(), Some("wwn-a"));
    assert_eq!(system.point_release(), Some("6.1.5"));
}
