use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use dav_hub::api;
use dav_hub_core::{DavConfig, DavHandler, FileSystem, MemFs};
use std::sync::Arc;
use tower::util::ServiceExt;

const EXCLUSIVE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<D:lockinfo xmlns:D="DAV:">
  <D:lockscope><D:exclusive/></D:lockscope>
  <D:locktype><D:write/></D:locktype>
</D:lockinfo>"#;

fn app(config: DavConfig) -> Router {
    let fs: Arc<dyn FileSystem> = Arc::new(MemFs::new());
    api::router(DavHandler::new(fs, config), 1 << 20)
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    headers: &[(&str, &str)],
    body: &'static str,
) -> (StatusCode, axum::http::HeaderMap, String) {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let resp = app
        .clone()
        .oneshot(builder.body(Body::from(body)).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let headers = resp.headers().clone();
    let bytes = body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, headers, String::from_utf8(bytes.to_vec()).unwrap())
}

#[tokio::test]
async fn concurrent_lock_requests_have_one_winner() {
    let app = app(DavConfig::default());
    send(&app, "PUT", "/shared.txt", &[], "x").await;

    let (a, b) = tokio::join!(
        send(&app, "LOCK", "/shared.txt", &[], EXCLUSIVE),
        send(&app, "LOCK", "/shared.txt", &[], EXCLUSIVE),
    );
    let mut statuses = vec![a.0, b.0];
    statuses.sort();
    assert_eq!(statuses, vec![StatusCode::OK, StatusCode::LOCKED]);
}

#[tokio::test]
async fn infinite_lock_on_collection_guards_members() {
    let app = app(DavConfig::default());
    send(&app, "MKCOL", "/proj", &[], "").await;
    let (status, headers, body) = send(&app, "LOCK", "/proj", &[], EXCLUSIVE).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("<D:depth>infinity</D:depth>"));
    let token = headers["lock-token"].to_str().unwrap().to_string();

    let (status, _, _) = send(&app, "PUT", "/proj/new.txt", &[], "x").await;
    assert_eq!(status, StatusCode::LOCKED);

    let tagged = format!("</proj> ({token})");
    let (status, _, _) = send(&app, "PUT", "/proj/new.txt", &[("If", tagged.as_str())], "x").await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _, body) = send(
        &app,
        "PROPFIND",
        "/proj/new.txt",
        &[("Depth", "0")],
        r#"<D:propfind xmlns:D="DAV:"><D:prop><D:lockdiscovery/></D:prop></D:propfind>"#,
    )
    .await;
    assert_eq!(status, StatusCode::MULTI_STATUS);
    assert!(body.contains(token.trim_matches(|c| c == '<' || c == '>')));

    let (status, _, _) = send(&app, "UNLOCK", "/proj/new.txt", &[("Lock-Token", token.as_str())], "").await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _, _) = send(&app, "PUT", "/proj/new.txt", &[], "y").await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn read_only_server_refuses_lock() {
    let app = app(DavConfig::default().with_read_only(true));
    let (status, _, _) = send(&app, "LOCK", "/x", &[], EXCLUSIVE).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _, _) = send(&app, "GET", "/x", &[], "").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn timeout_header_is_capped() {
    let app = app(DavConfig::default().with_max_lock_timeout(Some(std::time::Duration::from_secs(60))));
    let (status, _, body) = send(
        &app,
        "LOCK",
        "/t",
        &[("Timeout", "Second-100000")],
        EXCLUSIVE,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let timeout = body
        .split("<D:timeout>")
        .nth(1)
        .and_then(|rest| rest.split("</D:timeout>").next())
        .unwrap();
    let secs: u64 = timeout.trim_start_matches("Second-").parse().unwrap();
    assert!(secs <= 60);
}
