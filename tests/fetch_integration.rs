//! Integration tests for the archive client and login against a mock archive.

use std::sync::Arc;

use irsa_sync_core::auth::Credentials;
use irsa_sync_core::fetch::{FileSource, TableSource};
use irsa_sync_core::{
    ArchiveConfig, AuthError, FetchError, Fetcher, MetaQuery, NightCursor, Partition, Session,
};
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SCI_TABLE: &str = "\
field,ccdid,qid,filtercode,imgtypecode,filefracday,obsjd,nid,infobits.flag
612,9,2,zr,o,20171105123456,2458062.5,308,0
612,10,1,zr,o,20171105123456,2458062.5,308,
";

fn fetcher(server: &MockServer) -> Fetcher {
    let config = ArchiveConfig::for_base_url(&server.uri());
    let session = Session::anonymous(&config).expect("anonymous session");
    Fetcher::new(&config, session.client().clone())
}

#[tokio::test]
async fn test_fetch_table_parses_rows_and_normalizes_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search/sci/"))
        .and(query_param("ct", "csv"))
        .respond_with(ResponseTemplate::new(200).set_body_string(SCI_TABLE))
        .expect(1)
        .mount(&server)
        .await;

    let query = MetaQuery::night(Partition::Science, NightCursor::new(308));
    let records = fetcher(&server)
        .fetch_table(&query)
        .await
        .expect("table should parse");

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].get_i64("ccdid"), Some(9));
    assert_eq!(records[0].get_text("filtercode").as_deref(), Some("zr"));
    assert!(records[0].get("infobits-flag").is_some());
    assert!(records[1].get("infobits-flag").is_some_and(|v| v.is_null()));
}

#[tokio::test]
async fn test_fetch_table_empty_body_is_no_rows() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search/raw/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("\n"))
        .mount(&server)
        .await;

    let query = MetaQuery::night(Partition::Raw, NightCursor::new(2));
    let records = fetcher(&server).fetch_table(&query).await.expect("empty ok");
    assert!(records.is_empty());
}

#[tokio::test]
async fn test_fetch_table_header_only_is_no_rows() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search/sci/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("field,ccdid,qid\n"))
        .mount(&server)
        .await;

    let query = MetaQuery::night(Partition::Science, NightCursor::new(2));
    let records = fetcher(&server).fetch_table(&query).await.expect("empty ok");
    assert!(records.is_empty());
}

#[tokio::test]
async fn test_fetch_table_unauthorized_maps_to_auth_required() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search/sci/"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let query = MetaQuery::night(Partition::Science, NightCursor::new(1));
    let err = fetcher(&server).fetch_table(&query).await.unwrap_err();
    assert!(matches!(err, FetchError::AuthRequired { status: 401, .. }));
    assert!(err.is_auth());
}

#[tokio::test]
async fn test_fetch_table_server_error_is_http_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let query = MetaQuery::night(Partition::Calibration, NightCursor::new(1));
    let err = fetcher(&server).fetch_table(&query).await.unwrap_err();
    assert!(matches!(err, FetchError::HttpStatus { status: 503, .. }));
}

#[tokio::test]
async fn test_fetch_table_ragged_row_is_table_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("a,b\n1,2,3\n"))
        .mount(&server)
        .await;

    let query = MetaQuery::night(Partition::Science, NightCursor::new(1));
    let err = fetcher(&server).fetch_table(&query).await.unwrap_err();
    assert!(matches!(err, FetchError::Table { .. }));
}

#[tokio::test]
async fn test_fetch_file_creates_parent_dirs_and_preserves_bytes() {
    let server = MockServer::start().await;
    let body: Vec<u8> = (0..10_000_u32).map(|i| (i % 251) as u8).collect();
    Mock::given(method("GET"))
        .and(path("/data/sci/2017/1105/123456/a.fits"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .mount(&server)
        .await;

    let temp_dir = TempDir::new().expect("temp dir");
    let dest = temp_dir.path().join("nested/dir/a.fits");
    let url = format!("{}/data/sci/2017/1105/123456/a.fits", server.uri());

    let written = fetcher(&server)
        .fetch_file(&url, &dest, 1024)
        .await
        .expect("download should succeed");

    assert_eq!(written, body.len() as u64);
    assert_eq!(std::fs::read(&dest).expect("read back"), body);
}

#[tokio::test]
async fn test_fetch_file_404_writes_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let temp_dir = TempDir::new().expect("temp dir");
    let dest = temp_dir.path().join("missing.fits");
    let url = format!("{}/data/missing.fits", server.uri());

    let err = fetcher(&server).fetch_file(&url, &dest, 1024).await.unwrap_err();
    assert!(matches!(err, FetchError::HttpStatus { status: 404, .. }));
    assert!(!dest.exists());
}

#[tokio::test]
async fn test_login_stores_session_cookie_for_later_requests() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/login"))
        .and(query_param("josso_cmd", "login"))
        .and(query_param("josso_username", "alice"))
        .respond_with(
            ResponseTemplate::new(200).insert_header("Set-Cookie", "JOSSO_SESSIONID=abc123; Path=/"),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/search/sci/"))
        .and(wiremock::matchers::header("cookie", "JOSSO_SESSIONID=abc123"))
        .respond_with(ResponseTemplate::new(200).set_body_string(SCI_TABLE))
        .expect(1)
        .mount(&server)
        .await;

    let config = ArchiveConfig::for_base_url(&server.uri());
    let session = Session::login(&config, &Credentials::new("alice", "s3cret"))
        .await
        .expect("login should succeed");
    assert!(session.is_authenticated());

    let fetcher = Arc::new(Fetcher::new(&config, session.client().clone()));
    let records = fetcher
        .fetch_table(&MetaQuery::night(Partition::Science, NightCursor::new(308)))
        .await
        .expect("cookie should authorize the query");
    assert_eq!(records.len(), 2);
}

#[tokio::test]
async fn test_login_without_cookie_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let config = ArchiveConfig::for_base_url(&server.uri());
    let err = Session::login(&config, &Credentials::new("alice", "wrong"))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::NoSessionCookie { .. }));
}

#[tokio::test]
async fn test_login_error_does_not_leak_password() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let config = ArchiveConfig::for_base_url(&server.uri());
    let err = Session::login(&config, &Credentials::new("alice", "hunter2"))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Rejected { status: 403 }));
    assert!(!err.to_string().contains("hunter2"));
}
