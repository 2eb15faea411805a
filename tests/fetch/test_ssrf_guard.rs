// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Forbidden destinations are refused before any connection is opened

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use rag_extract::{
    config::{ExtractionConfig, WebConfig},
    fetch::{StaticResolver, UrlGuard},
    ExtractError, ExtractionService,
};
use tokio::net::TcpListener;

const PUBLIC_IP: IpAddr = IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34));
const LOOPBACK: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

fn resolver() -> StaticResolver {
    StaticResolver::new()
        .with("public.test", &[PUBLIC_IP])
        .with("sneaky.test", &[LOOPBACK])
        .with("rebind.test", &[PUBLIC_IP, LOOPBACK])
        .with("metadata.test", &[IpAddr::V4(Ipv4Addr::new(169, 254, 169, 254))])
}

fn service() -> ExtractionService {
    ExtractionService::with_resolver(ExtractionConfig::default(), Arc::new(resolver()))
}

/// True when something connected to `listener` within `wait`
async fn was_contacted(listener: &TcpListener, wait: Duration) -> bool {
    tokio::time::timeout(wait, listener.accept()).await.is_ok()
}

#[tokio::test]
async fn test_loopback_listener_is_never_contacted() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let service = service();

    for url in [
        format!("http://127.0.0.1:{}/", port),
        format!("http://localhost:{}/", port),
        format!("http://sneaky.test:{}/", port),
        format!("http://rebind.test:{}/", port),
        format!("http://[::ffff:127.0.0.1]:{}/", port),
        format!("http://2130706433:{}/", port),
    ] {
        let err = service
            .extract_url(&url, &service.fetch_options())
            .await
            .unwrap_err();
        assert!(err.is_security_error(), "{} gave {:?}", url, err);
        assert_eq!(err.status_code(), 403);
    }

    assert!(!was_contacted(&listener, Duration::from_millis(200)).await);
}

#[tokio::test]
async fn test_rendered_fetch_is_rejected_before_browser_launch() {
    let service = service();
    let mut options = service.fetch_options();
    options.render_js = true;
    let err = service
        .extract_url("http://metadata.test/latest/meta-data/", &options)
        .await
        .unwrap_err();
    assert!(matches!(err, ExtractError::SecurityRejection(_)));
}

#[tokio::test]
async fn test_non_http_schemes_are_rejected() {
    let service = service();
    for url in ["file:///etc/passwd", "ftp://public.test/x", "gopher://public.test/"] {
        let err = service
            .extract_url(url, &service.fetch_options())
            .await
            .unwrap_err();
        assert!(err.is_security_error(), "{} gave {:?}", url, err);
    }
}

#[tokio::test]
async fn test_malformed_url_is_bad_request() {
    let service = service();
    let err = service
        .extract_url("not a url", &service.fetch_options())
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 400);
}

#[tokio::test]
async fn test_every_redirect_hop_is_revalidated() {
    let guard = UrlGuard::new(Arc::new(resolver()), &WebConfig::default());
    let first = guard.check("https://public.test/start").await.unwrap();
    assert_eq!(first.resolved, vec![PUBLIC_IP]);

    let relative = guard.next_hop(&first, "/next?page=2").await.unwrap();
    assert_eq!(relative.url.as_str(), "https://public.test/next?page=2");

    for location in [
        "http://127.0.0.1/admin",
        "http://sneaky.test/",
        "http://metadata.test/latest/",
        "http://[::1]:8080/",
        "file:///etc/shadow",
    ] {
        let err = guard.next_hop(&first, location).await.unwrap_err();
        assert!(err.is_security_error(), "{} gave {:?}", location, err);
    }
}

#[tokio::test]
async fn test_configured_blocklists_apply() {
    let web = WebConfig {
        blocked_hosts: vec!["public.test".to_string()],
        blocked_networks: vec!["93.184.0.0/16".to_string()],
        ..WebConfig::default()
    };
    let resolver = resolver().with("other.test", &[PUBLIC_IP]);
    let guard = UrlGuard::new(Arc::new(resolver), &web);

    assert!(guard.check("https://public.test/").await.unwrap_err().is_security_error());
    assert!(guard.check("https://api.public.test/").await.unwrap_err().is_security_error());
    assert!(guard.check("https://other.test/").await.unwrap_err().is_security_error());
}
