use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use dav_hub::api;
use dav_hub_core::{DavConfig, DavHandler, FileSystem, LocalFs, MemFs};
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::util::ServiceExt;

fn memory_app(config: DavConfig) -> axum::Router {
    let fs: Arc<dyn FileSystem> = Arc::new(MemFs::new());
    api::router(DavHandler::new(fs, config), 1024)
}

#[tokio::test]
async fn options_over_a_real_listener() {
    let app = memory_app(DavConfig::default());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(axum::serve(listener, app.into_make_service()).into_future());

    tokio::time::sleep(Duration::from_millis(100)).await;
    let client = reqwest::Client::new();
    let resp = client
        .request(reqwest::Method::OPTIONS, format!("http://{}/", addr))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    assert_eq!(resp.headers()["dav"], "1, 2");
    assert!(resp.headers()["allow"].to_str().unwrap().contains("PROPFIND"));

    server.abort();
}

#[tokio::test]
async fn local_directory_round_trip() {
    let tempdir = tempfile::tempdir().unwrap();
    let fs: Arc<dyn FileSystem> = Arc::new(LocalFs::new(tempdir.path()));
    let app = api::router(
        DavHandler::new(fs, DavConfig::default().with_prefix("/dav")),
        1 << 20,
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(axum::serve(listener, app.into_make_service()).into_future());
    tokio::time::sleep(Duration::from_millis(100)).await;

    let client = reqwest::Client::new();
    let base = format!("http://{}/dav", addr);
    let mkcol = reqwest::Method::from_bytes(b"MKCOL").unwrap();
    let resp = client
        .request(mkcol, format!("{base}/notes"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 201);

    let resp = client
        .put(format!("{base}/notes/today.txt"))
        .body("remember the milk")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 201);
    assert_eq!(
        std::fs::read_to_string(tempdir.path().join("notes/today.txt")).unwrap(),
        "remember the milk"
    );

    let propfind = reqwest::Method::from_bytes(b"PROPFIND").unwrap();
    let resp = client
        .request(propfind, format!("{base}/notes/"))
        .header("Depth", "1")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 207);
    let body = resp.text().await.unwrap();
    assert!(body.contains("<D:href>/dav/notes/</D:href>"));
    assert!(body.contains("<D:href>/dav/notes/today.txt</D:href>"));
    assert!(body.contains("<D:getcontentlength>17</D:getcontentlength>"));

    let resp = client
        .get(format!("{base}/notes/today.txt"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.text().await.unwrap(), "remember the milk");

    server.abort();
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let app = memory_app(DavConfig::default());
    let req = Request::builder()
        .method("PUT")
        .uri("/big")
        .body(Body::from(vec![b'x'; 4096]))
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn every_verb_reaches_the_engine() {
    let app = memory_app(DavConfig::default());
    let req = Request::builder()
        .method("BREW")
        .uri("/pot")
        .body(Body::empty())
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let req = Request::builder()
        .method("PROPFIND")
        .uri("/")
        .header("Depth", "0")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    assert_eq!(
        resp.headers()["content-type"],
        "application/xml; charset=utf-8"
    );
    let body = body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    assert!(std::str::from_utf8(&body)
        .unwrap()
        .contains("<D:collection/>"));
}
