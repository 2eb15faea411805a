// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Redirect revalidation and timeouts over a real socket

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rag_extract::{
    config::WebConfig,
    fetch::{PinnedHttp, SafeUrl, StaticResolver, UrlGuard},
    ExtractError,
};
use reqwest::Method;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use url::Url;

const LOOPBACK: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

fn guard() -> UrlGuard {
    let resolver = StaticResolver::new().with("sneaky.test", &[LOOPBACK]);
    UrlGuard::new(Arc::new(resolver), &WebConfig::default())
}

/// A validated URL for `public.test`, pinned to the local test server
fn pinned(port: u16) -> SafeUrl {
    SafeUrl {
        url: Url::parse(&format!("http://public.test:{}/start", port)).unwrap(),
        scheme: "http".to_string(),
        hostname: "public.test".to_string(),
        port,
        resolved: vec![LOOPBACK],
    }
}

/// Answer every connection with `response`, or never answer when `None`
async fn serve(response: Option<String>) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let response = response.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let _ = stream.read(&mut buf).await;
                match response {
                    Some(body) => {
                        let _ = stream.write_all(body.as_bytes()).await;
                        let _ = stream.shutdown().await;
                    }
                    None => tokio::time::sleep(Duration::from_secs(30)).await,
                }
            });
        }
    });
    port
}

fn redirect_to(location: &str) -> String {
    format!(
        "HTTP/1.1 302 Found\r\nLocation: {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        location
    )
}

#[tokio::test]
async fn test_redirect_to_blocked_address_is_rejected_at_the_hop() {
    let http = PinnedHttp::new("rag-extract-test", Duration::from_secs(5));
    for location in [
        "http://169.254.169.254/latest/meta-data/",
        "http://sneaky.test/admin",
        "http://[::1]/",
        "file:///etc/passwd",
    ] {
        let port = serve(Some(redirect_to(location))).await;
        let err = http
            .send(&guard(), pinned(port), Method::GET, 5)
            .await
            .unwrap_err();
        assert!(err.is_security_error(), "{} gave {:?}", location, err);
        assert_eq!(err.status_code(), 403);
    }
}

#[tokio::test]
async fn test_redirect_count_is_capped() {
    let port = serve(Some(redirect_to("/again"))).await;
    let http = PinnedHttp::new("rag-extract-test", Duration::from_secs(5));
    let err = http
        .send(&guard(), pinned(port), Method::GET, 0)
        .await
        .unwrap_err();
    assert!(matches!(err, ExtractError::TransientIo(_)), "got {:?}", err);
    assert_eq!(err.status_code(), 502);
}

#[tokio::test]
async fn test_success_is_returned_from_pinned_address() {
    let port = serve(Some(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello"
            .to_string(),
    ))
    .await;
    let http = PinnedHttp::new("rag-extract-test", Duration::from_secs(5));
    let downloaded = http
        .download(&guard(), pinned(port), 5, 1024)
        .await
        .unwrap();
    assert_eq!(downloaded.bytes, b"hello");
    assert_eq!(downloaded.final_url.hostname, "public.test");
}

#[tokio::test]
async fn test_per_request_timeout_cuts_off_a_stalled_server() {
    let port = serve(None).await;
    let http = PinnedHttp::new("rag-extract-test", Duration::from_secs(60))
        .with_timeout(Duration::from_millis(300));

    let started = Instant::now();
    let err = http.probe(&guard(), pinned(port), 5).await.unwrap_err();
    assert!(matches!(err, ExtractError::TransientIo(_)), "got {:?}", err);
    // HEAD and the GET fallback each get the short timeout
    assert!(started.elapsed() < Duration::from_secs(5));
}
