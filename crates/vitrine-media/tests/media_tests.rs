//! Integration tests for URI resolution and the media pipeline, using
//! in-process HTTP servers as gateways.

use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, U256};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use base64::Engine;
use image::{DynamicImage, ImageFormat, RgbaImage};
use serde_json::json;
use vitrine_common::{Chain, MediaType, TokenMetadata, TokenUri};
use vitrine_media::{
    MediaProcessor, MemoryBlobStore, ResolveError, ResolverConfig, UriResolver,
};

async fn serve(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

fn resolver_with(config: ResolverConfig) -> Arc<UriResolver> {
    Arc::new(UriResolver::new(config).unwrap())
}

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = DynamicImage::ImageRgba8(RgbaImage::new(width, height));
    let mut out = Vec::new();
    img.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .unwrap();
    out
}

#[tokio::test]
async fn test_ipfs_gateway_fallback_on_timeout() {
    // Primary gateway hangs past the per-attempt timeout.
    let slow = serve(Router::new().route(
        "/ipfs/QmTest",
        get(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            "too late"
        }),
    ))
    .await;
    let fast = serve(Router::new().route("/ipfs/QmTest", get(|| async { "gateway content" }))).await;

    let resolver = resolver_with(ResolverConfig {
        ipfs_gateways: vec![format!("http://{slow}"), format!("http://{fast}")],
        gateway_timeout: Duration::from_millis(300),
        ..ResolverConfig::default()
    });

    let resolved = resolver
        .resolve(&TokenUri::new("ipfs://QmTest"))
        .await
        .expect("secondary gateway should have answered");
    assert_eq!(resolved.bytes, b"gateway content");
}

#[tokio::test]
async fn test_ipfs_gateway_fallback_on_server_error() {
    let broken = serve(Router::new().route(
        "/ipfs/QmTest",
        get(|| async { (StatusCode::BAD_GATEWAY, "down") }),
    ))
    .await;
    let healthy =
        serve(Router::new().route("/ipfs/QmTest", get(|| async { "healthy content" }))).await;

    let resolver = resolver_with(ResolverConfig {
        ipfs_gateways: vec![format!("http://{broken}"), format!("http://{healthy}")],
        gateway_timeout: Duration::from_millis(500),
        ..ResolverConfig::default()
    });

    let resolved = resolver
        .resolve(&TokenUri::new("ipfs://QmTest"))
        .await
        .unwrap();
    assert_eq!(resolved.bytes, b"healthy content");
}

#[tokio::test]
async fn test_all_gateways_exhausted() {
    let broken = serve(Router::new().route(
        "/ipfs/QmGone",
        get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "no") }),
    ))
    .await;

    let resolver = resolver_with(ResolverConfig {
        ipfs_gateways: vec![format!("http://{broken}")],
        gateway_timeout: Duration::from_millis(500),
        ..ResolverConfig::default()
    });

    let err = resolver
        .resolve(&TokenUri::new("ipfs://QmGone"))
        .await
        .unwrap_err();
    assert!(matches!(err, ResolveError::GatewaysExhausted { .. }));
    assert!(!err.is_classification());
}

#[tokio::test]
async fn test_http_transient_error_retried() {
    let hits = Arc::new(AtomicUsize::new(0));
    let router = Router::new()
        .route(
            "/flaky.json",
            get(|State(hits): State<Arc<AtomicUsize>>| async move {
                if hits.fetch_add(1, Ordering::SeqCst) == 0 {
                    (StatusCode::SERVICE_UNAVAILABLE, "warming up").into_response()
                } else {
                    "recovered".into_response()
                }
            }),
        )
        .with_state(hits.clone());
    let addr = serve(router).await;

    let resolver = resolver_with(ResolverConfig {
        gateway_timeout: Duration::from_millis(500),
        http_retries: 2,
        retry_backoff: Duration::from_millis(10),
        ..ResolverConfig::default()
    });

    let resolved = resolver
        .resolve(&TokenUri::new(format!("http://{addr}/flaky.json")))
        .await
        .unwrap();
    assert_eq!(resolved.bytes, b"recovered");
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_http_4xx_not_retried() {
    let hits = Arc::new(AtomicUsize::new(0));
    let router = Router::new()
        .route(
            "/missing.json",
            get(|State(hits): State<Arc<AtomicUsize>>| async move {
                hits.fetch_add(1, Ordering::SeqCst);
                StatusCode::NOT_FOUND
            }),
        )
        .with_state(hits.clone());
    let addr = serve(router).await;

    let resolver = resolver_with(ResolverConfig {
        gateway_timeout: Duration::from_millis(500),
        http_retries: 3,
        retry_backoff: Duration::from_millis(10),
        ..ResolverConfig::default()
    });

    let err = resolver
        .resolve(&TokenUri::new(format!("http://{addr}/missing.json")))
        .await
        .unwrap_err();
    assert!(matches!(err, ResolveError::Rejected { status: 404, .. }));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_image_metadata_builds_image_record_with_thumbnail() {
    let png = png_bytes(1400, 700);
    let addr = serve(Router::new().route(
        "/img.png",
        get(move || {
            let png = png.clone();
            async move { png }
        }),
    ))
    .await;

    let resolver = resolver_with(ResolverConfig {
        gateway_timeout: Duration::from_millis(1000),
        ..ResolverConfig::default()
    });
    let blob_store = Arc::new(MemoryBlobStore::new());
    let processor = MediaProcessor::new(resolver, blob_store.clone());

    let metadata = TokenMetadata::new(json!({"image": format!("http://{addr}/img.png")}));
    let record = processor
        .build_media(
            Chain::Ethereum,
            Address::ZERO,
            U256::from(42u64),
            &metadata,
        )
        .await
        .unwrap();

    assert_eq!(record.media_type, MediaType::Image);
    assert!(!record.media_url.is_empty());
    assert!(record.thumbnail_url.is_some());
    assert_eq!(record.dimensions, Some((1400, 700)));
    assert!(record.active);

    // Both the original and the thumbnail landed in blob storage.
    assert_eq!(blob_store.len(), 2);
}

#[tokio::test]
async fn test_svg_data_uri_builds_svg_record_without_thumbnail() {
    let svg = r#"<svg xmlns="http://www.w3.org/2000/svg"><rect width="4" height="4"/></svg>"#;
    let encoded = base64::engine::general_purpose::STANDARD.encode(svg);
    let metadata = TokenMetadata::new(json!({
        "image": format!("data:image/svg+xml;base64,{encoded}"),
    }));

    let resolver = resolver_with(ResolverConfig::default());
    let blob_store = Arc::new(MemoryBlobStore::new());
    let processor = MediaProcessor::new(resolver, blob_store.clone());

    let record = processor
        .build_media(
            Chain::Ethereum,
            Address::ZERO,
            U256::from(7u64),
            &metadata,
        )
        .await
        .unwrap();

    assert_eq!(record.media_type, MediaType::Svg);
    assert!(record.thumbnail_url.is_none());
    assert!(record.media_url.starts_with("memory://"));

    let stored = blob_store
        .get("media/ethereum/0x0000000000000000000000000000000000000000-0x7")
        .unwrap();
    assert_eq!(stored.content_type, "image/svg+xml");
    assert_eq!(stored.bytes, svg.as_bytes());
}

#[tokio::test]
async fn test_metadata_without_media_field() {
    let resolver = resolver_with(ResolverConfig::default());
    let processor = MediaProcessor::new(resolver, Arc::new(MemoryBlobStore::new()));

    let metadata = TokenMetadata::new(json!({"name": "no media here"}));
    let err = processor
        .build_media(Chain::Ethereum, Address::ZERO, U256::from(1u64), &metadata)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        vitrine_media::MediaError::NoMediaField
    ));
}
