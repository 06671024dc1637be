//! Fixed-window request limiting per client address on `/api`.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::config::Config;
use crate::error::ApiError;

const DEFAULT_WINDOW: Duration = Duration::from_secs(15 * 60);
const PRUNE_AT: usize = 10_000;

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

pub struct RateLimiter {
    max: u32,
    window: Duration,
    trust_proxy: bool,
    clients: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(max: u32, window: Duration, trust_proxy: bool) -> Self {
        Self { max, window, trust_proxy, clients: Mutex::new(HashMap::new()) }
    }

    pub fn from_config(config: &Config) -> Self {
        let window = config.rate_limit_window.to_std().unwrap_or(DEFAULT_WINDOW);
        Self::new(config.rate_limit_max, window, config.trust_proxy)
    }

    /// Counts one request for `key`. False once the current window is used up.
    pub async fn allow(&self, key: &str, now: Instant) -> bool {
        let mut clients = self.clients.lock().await;
        if clients.len() >= PRUNE_AT {
            let window = self.window;
            clients.retain(|_, w| now.duration_since(w.started) < window);
        }
        let entry = clients.entry(key.to_string()).or_insert(Window { started: now, count: 0 });
        if now.duration_since(entry.started) >= self.window {
            *entry = Window { started: now, count: 0 };
        }
        if entry.count >= self.max {
            return false;
        }
        entry.count += 1;
        true
    }

    fn client_key(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
        let forwarded = if self.trust_proxy { forwarded_for(headers) } else { None };
        forwarded
            .or_else(|| peer.map(|addr| addr.ip().to_string()))
            .unwrap_or_else(|| "unknown".to_string())
    }
}

/// First hop of `X-Forwarded-For`, if it looks like an address.
fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get("x-forwarded-for")?.to_str().ok()?;
    let first = raw.split(',').next()?.trim();
    if first.is_empty() || first.len() > 64 {
        return None;
    }
    first
        .bytes()
        .all(|b| b.is_ascii_hexdigit() || b == b'.' || b == b':')
        .then(|| first.to_string())
}

pub async fn limit_requests(State(limiter): State<Arc<RateLimiter>>, req: Request, next: Next) -> Response {
    let peer = req.extensions().get::<ConnectInfo<SocketAddr>>().map(|ConnectInfo(addr)| *addr);
    let key = limiter.client_key(req.headers(), peer);
    if !limiter.allow(&key, Instant::now()).await {
        tracing::warn!(client = %key, "rate limit exceeded");
        return ApiError::TooManyRequests.into_response();
    }
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[tokio::test]
    async fn test_window_caps_and_resets() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60), false);
        let start = Instant::now();
        assert!(limiter.allow("10.0.0.1", start).await);
        assert!(limiter.allow("10.0.0.1", start).await);
        assert!(!limiter.allow("10.0.0.1", start + Duration::from_secs(30)).await);
        assert!(limiter.allow("10.0.0.2", start).await);
        assert!(limiter.allow("10.0.0.1", start + Duration::from_secs(60)).await);
    }

    #[test]
    fn test_client_key() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        let peer: SocketAddr = "192.168.1.5:40000".parse().unwrap();

        let direct = RateLimiter::new(1, DEFAULT_WINDOW, false);
        assert_eq!(direct.client_key(&headers, Some(peer)), "192.168.1.5");
        assert_eq!(direct.client_key(&headers, None), "unknown");

        let proxied = RateLimiter::new(1, DEFAULT_WINDOW, true);
        assert_eq!(proxied.client_key(&headers, Some(peer)), "203.0.113.7");
        headers.insert("x-forwarded-for", HeaderValue::from_static("<script>"));
        assert_eq!(proxied.client_key(&headers, Some(peer)), "192.168.1.5");
    }
}
