//! HTTP surface: shared state, router and layers.

pub mod admin;
pub mod auth;
pub mod cart;
pub mod categories;
pub mod chat;
pub mod complaints;
pub mod extract;
pub mod orders;
pub mod payments;
pub mod products;
pub mod rate_limit;
pub mod validation;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, request::Parts, HeaderValue, Method},
    middleware,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};

use crate::auth::TokenService;
use crate::chat::Classifier;
use crate::config::Config;
use crate::domain::events::DomainEvent;
use crate::notify::Notifier;
use crate::payment::PaymentGateway;
use rate_limit::{limit_requests, RateLimiter};

pub const BODY_LIMIT_BYTES: usize = 10 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<Config>,
    pub tokens: TokenService,
    pub payments: Option<Arc<dyn PaymentGateway>>,
    pub notifier: Notifier,
    pub chatbot: Classifier,
}

impl AppState {
    /// Hands committed aggregate events to the notifier, emailing `user_id` when it resolves.
    pub async fn publish(&self, events: Vec<DomainEvent>, user_id: Option<Uuid>) {
        if events.is_empty() { return; }
        let recipient = match user_id {
            Some(id) => sqlx::query_scalar::<_, String>("SELECT email FROM users WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.db)
                .await
                .unwrap_or_else(|e| {
                    tracing::warn!(user_id = %id, "recipient lookup failed: {}", e);
                    None
                }),
            None => None,
        };
        for event in &events {
            self.notifier.dispatch(event, recipient.as_deref()).await;
        }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.client_url);
    let limiter = Arc::new(RateLimiter::from_config(&state.config));
    let api = Router::new()
        .route("/health", get(health))
        .nest("/auth", auth::routes())
        .nest("/products", products::routes())
        .nest("/categories", categories::routes())
        .nest("/cart", cart::routes())
        .nest("/orders", orders::routes())
        .nest("/payments", payments::routes())
        .nest("/complaints", complaints::routes())
        .nest("/admin", admin::routes())
        .nest("/chat", chat::routes())
        .layer(middleware::from_fn_with_state(limiter, limit_requests));

    Router::new()
        .route("/", get(root))
        .nest("/api", api)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// The configured client plus any localhost origin, with credentials.
fn cors_layer(client_url: &str) -> CorsLayer {
    let client = client_url.trim_end_matches('/').to_string();
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _: &Parts| {
            origin.to_str().map(|o| o == client || is_localhost(o)).unwrap_or(false)
        }))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
}

fn is_localhost(origin: &str) -> bool {
    ["http://localhost", "http://127.0.0.1"].iter().any(|prefix| {
        origin.strip_prefix(prefix).is_some_and(|rest| rest.is_empty() || rest.starts_with(':'))
    })
}

async fn root() -> Json<Value> {
    Json(json!({
        "name": "🔧 SparePartsHub API",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Multi-vendor marketplace for bike, car & tractor spare parts 🇮🇳",
        "status": "✅ Running",
        "endpoints": {
            "auth": "/api/auth",
            "products": "/api/products",
            "categories": "/api/categories",
            "cart": "/api/cart",
            "orders": "/api/orders",
            "payments": "/api/payments",
            "complaints": "/api/complaints",
            "admin": "/api/admin",
            "chat": "/api/chat",
            "health": "/api/health"
        }
    }))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "timestamp": Utc::now().to_rfc3339() }))
}

/// `?page=&limit=` as sent by list endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Page {
    pub page: i64,
    pub limit: i64,
}

impl Page {
    pub const MAX_LIMIT: i64 = 100;

    pub fn new(params: &PageParams, default_limit: i64) -> Self {
        Self {
            page: params.page.unwrap_or(1).max(1),
            limit: params.limit.unwrap_or(default_limit).clamp(1, Self::MAX_LIMIT),
        }
    }

    pub fn offset(&self) -> i64 { (self.page - 1) * self.limit }

    pub fn total_pages(&self, total: i64) -> i64 { (total + self.limit - 1) / self.limit }

    /// `{<key>: items, page, totalPages, total}`
    pub fn wrap<T: Serialize>(&self, key: &str, items: Vec<T>, total: i64) -> Json<Value> {
        let mut body = json!({ "page": self.page, "totalPages": self.total_pages(total), "total": total });
        body[key] = json!(items);
        Json(body)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::lazy_state;
    use super::*;
    use crate::auth::AccessClaims;
    use crate::domain::aggregates::Role;
    use axum::{body::Body, http::{Request, StatusCode}};
    use http_body_util::BodyExt;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use tower::ServiceExt;
    use uuid::Uuid;

    async fn send(req: Request<Body>) -> (StatusCode, Value) {
        send_to(router(lazy_state()), req).await
    }

    async fn send_to(app: Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    fn get(uri: &str) -> Request<Body> { Request::builder().uri(uri).body(Body::empty()).unwrap() }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = send(get("/api/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_root_info() {
        let (status, body) = send(get("/")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["endpoints"]["health"], "/api/health");
    }

    #[tokio::test]
    async fn test_missing_token() {
        let (status, body) = send(get("/api/orders/my")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "Access denied. No token provided.");
    }

    #[tokio::test]
    async fn test_invalid_token() {
        let req = Request::builder()
            .uri("/api/auth/me")
            .header(header::AUTHORIZATION, "Bearer not.a.jwt")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "Invalid token.");
    }

    #[tokio::test]
    async fn test_expired_token() {
        let secret = crate::config::test_config().jwt_access_secret;
        let claims = AccessClaims { sub: Uuid::now_v7(), role: Role::Customer, iat: 1_000, exp: 2_000 };
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap();
        let req = Request::builder()
            .uri("/api/cart")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "TOKEN_EXPIRED");
    }

    #[tokio::test]
    async fn test_register_validation() {
        let (status, body) = send(post_json(
            "/api/auth/register",
            json!({ "name": "R", "email": "not-an-email", "password": "123", "role": "wholesaler" }),
        ))
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Validation error");
        let errors = body["errors"].as_array().unwrap();
        assert!(errors.len() >= 4, "{errors:?}");
    }

    #[tokio::test]
    async fn test_admin_self_registration_rejected() {
        let (status, body) = send(post_json(
            "/api/auth/register",
            json!({ "name": "Mallory", "email": "m@example.com", "password": "secret123", "role": "admin" }),
        ))
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["errors"].as_array().unwrap().iter().any(|e| e == "role must be one of [customer, wholesaler]"));
    }

    #[tokio::test]
    async fn test_bad_id_is_json() {
        let (status, body) = send(get("/api/categories/not-a-uuid")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Invalid resource id.");
    }

    #[tokio::test]
    async fn test_bad_query_is_json() {
        let (status, body) = send(get("/api/products?minPrice=abc")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Validation error");
        assert_eq!(body["errors"].as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn test_api_rate_limited() {
        let mut state = lazy_state();
        let mut config = crate::config::test_config();
        config.rate_limit_max = 2;
        state.config = Arc::new(config);
        let app = router(state);

        for _ in 0..2 {
            assert_eq!(send_to(app.clone(), get("/api/health")).await.0, StatusCode::OK);
        }
        let (status, body) = send_to(app.clone(), get("/api/health")).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["message"], "Too many requests, please try again later.");

        // the service banner sits outside /api
        assert_eq!(send_to(app, get("/")).await.0, StatusCode::OK);
    }

    #[test]
    fn test_page_math() {
        let page = Page::new(&PageParams { page: Some(0), limit: Some(500) }, 12);
        assert_eq!(page, Page { page: 1, limit: 100 });
        let page = Page::new(&PageParams { page: Some(3), limit: None }, 12);
        assert_eq!(page.offset(), 24);
        assert_eq!(page.total_pages(25), 3);
        assert_eq!(page.total_pages(0), 0);
        let body = page.wrap("products", vec![1, 2], 26).0;
        assert_eq!(body["totalPages"], 3);
        assert_eq!(body["products"], json!([1, 2]));
    }

    #[test]
    fn test_localhost_origins() {
        assert!(is_localhost("http://localhost:3000"));
        assert!(is_localhost("http://127.0.0.1"));
        assert!(!is_localhost("http://localhost.evil.com"));
    }
}
