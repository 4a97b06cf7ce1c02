//! Integration tests for the cross-origin policy.

use axum::body::Body;
use http::Request;
use tower::ServiceExt;

use ollama_proxy::config::{BackendConfig, Config, CorsConfig};
use ollama_proxy::proxy::{create_router, AppState};

const SITE: &str = "https://ada.example";

fn setup_app(cors: CorsConfig) -> axum::Router {
    let config = Config {
        backend: BackendConfig {
            url: "http://127.0.0.1:1".to_string(),
            ..Default::default()
        },
        cors,
        ..Default::default()
    };
    create_router(AppState::new(config).unwrap()).unwrap()
}

fn site_only() -> CorsConfig {
    CorsConfig {
        allowed_origins: vec![SITE.to_string()],
        allow_credentials: true,
    }
}

fn preflight(origin: &str) -> Request<Body> {
    Request::builder()
        .method("OPTIONS")
        .uri("/api/chat")
        .header("origin", origin)
        .header("access-control-request-method", "POST")
        .header("access-control-request-headers", "content-type")
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_preflight_allowed_origin() {
    let response = setup_app(site_only()).oneshot(preflight(SITE)).await.unwrap();

    assert!(response.status().is_success());
    let headers = response.headers();
    assert!(headers.contains_key("x-request-id"));
    assert_eq!(headers.get("access-control-allow-origin").unwrap(), SITE);
    assert_eq!(headers.get("access-control-allow-credentials").unwrap(), "true");
    let methods = headers
        .get("access-control-allow-methods")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(methods.contains("POST"));
    let allowed = headers
        .get("access-control-allow-headers")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(allowed.contains("content-type"));
}

#[tokio::test]
async fn test_preflight_other_origin_gets_no_grant() {
    let response = setup_app(site_only())
        .oneshot(preflight("https://elsewhere.example"))
        .await
        .unwrap();

    assert!(response.headers().get("access-control-allow-origin").is_none());
}

#[tokio::test]
async fn test_wildcard_allows_any_origin() {
    let cors = CorsConfig {
        allowed_origins: vec!["*".to_string()],
        allow_credentials: true,
    };
    let response = setup_app(cors)
        .oneshot(preflight("https://anyone.example"))
        .await
        .unwrap();

    assert_eq!(
        response.headers().get("access-control-allow-origin").unwrap(),
        "*"
    );
    assert!(response
        .headers()
        .get("access-control-allow-credentials")
        .is_none());
}

#[tokio::test]
async fn test_simple_request_exposes_request_id() {
    let request = Request::get("/")
        .header("origin", SITE)
        .body(Body::empty())
        .unwrap();
    let response = setup_app(site_only()).oneshot(request).await.unwrap();

    let headers = response.headers();
    assert_eq!(headers.get("access-control-allow-origin").unwrap(), SITE);
    assert!(headers.contains_key("x-request-id"));
    let exposed = headers
        .get("access-control-expose-headers")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(exposed.contains("x-request-id"));
}

#[test]
fn test_invalid_origin_rejected_at_startup() {
    let cors = CorsConfig {
        allowed_origins: vec!["https://bad\norigin".to_string()],
        allow_credentials: false,
    };
    assert!(ollama_proxy::proxy::cors_layer(&cors).is_err());
}
