//! Per-(client, route) token-bucket rate limiting.
//!
//! The bucket decision is a pure function over `(state, now, config)`;
//! state lives in an external key-value store keyed by
//! `rate_limit:{route}:{client}` with a TTL of one refill interval. Any
//! store failure allows the request: availability wins over throttling.

pub mod store;

use std::sync::Arc;

use actix_web::body::{BoxBody, MessageBody};
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::middleware::Next;
use actix_web::{web, Error, HttpResponse};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use self::store::KvStore;

/// Route families that get their own request quota
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteCategory {
    Auth,
    Business,
    Search,
    Review,
}

/// Bucket capacity and refill interval for one route family
#[derive(Debug, Clone, Copy)]
pub struct RouteConfig {
    pub capacity: u32,
    pub interval_secs: u64,
}

impl RouteCategory {
    /// First match wins, mirroring the route table: auth and business by
    /// prefix, search and review by substring.
    pub fn classify(path: &str) -> Option<Self> {
        if path.starts_with("/api/auth") {
            Some(RouteCategory::Auth)
        } else if path.starts_with("/api/business") {
            Some(RouteCategory::Business)
        } else if path.contains("/api/search") {
            Some(RouteCategory::Search)
        } else if path.contains("/api/review") {
            Some(RouteCategory::Review)
        } else {
            None
        }
    }

    pub fn config(self) -> RouteConfig {
        match self {
            RouteCategory::Auth => RouteConfig {
                capacity: 5,
                interval_secs: 60,
            },
            RouteCategory::Business => RouteConfig {
                capacity: 10,
                interval_secs: 60,
            },
            RouteCategory::Search => RouteConfig {
                capacity: 30,
                interval_secs: 60,
            },
            RouteCategory::Review => RouteConfig {
                capacity: 5,
                interval_secs: 60,
            },
        }
    }

    pub fn key_name(self) -> &'static str {
        match self {
            RouteCategory::Auth => "auth",
            RouteCategory::Business => "business",
            RouteCategory::Search => "search",
            RouteCategory::Review => "review",
        }
    }

    pub fn deny_message(self) -> &'static str {
        match self {
            RouteCategory::Auth => "Demasiados intentos. Por favor, espere un momento.",
            RouteCategory::Business => "Demasiadas solicitudes. Por favor, espere un momento.",
            RouteCategory::Search => "Demasiadas búsquedas. Por favor, espere un momento.",
            RouteCategory::Review => "Demasiadas reseñas. Por favor, espere un momento.",
        }
    }
}

/// Persisted bucket state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketState {
    pub tokens: u32,
    /// Unix millis of the last consuming request
    pub last: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Persist `next` with a TTL of one interval, then let the request
    /// through.
    Allowed { next: BucketState },
    /// Nothing is consumed or persisted on denial.
    Denied,
}

/// Token-bucket step. Refill happens in whole-interval cycles anchored to
/// the last consuming request, so this is a coarse sliding-window
/// approximation rather than exact quota accounting.
pub fn decide(state: Option<BucketState>, now_ms: i64, config: &RouteConfig) -> Decision {
    let current = state.unwrap_or(BucketState {
        tokens: config.capacity,
        last: now_ms,
    });

    let interval_ms = config.interval_secs.max(1) as i64 * 1000;
    let elapsed = now_ms.saturating_sub(current.last).max(0);
    let cycles = (elapsed / interval_ms) as u64;
    let restored = cycles.saturating_mul(u64::from(config.capacity));
    let tokens = u64::from(current.tokens)
        .saturating_add(restored)
        .min(u64::from(config.capacity)) as u32;

    if tokens < 1 {
        Decision::Denied
    } else {
        Decision::Allowed {
            next: BucketState {
                tokens: tokens - 1,
                last: now_ms,
            },
        }
    }
}

/// Shared limiter injected as app data and consulted by the middleware.
pub struct RateLimiter {
    store: Arc<dyn KvStore>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Returns whether the request may proceed. Fails open on any store
    /// error.
    pub async fn check(&self, client: &str, category: RouteCategory) -> bool {
        let config = category.config();
        let key = format!("rate_limit:{}:{}", category.key_name(), client);
        let now_ms = Utc::now().timestamp_millis();

        let state = match self.store.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str::<BucketState>(&raw) {
                Ok(state) => Some(state),
                Err(err) => {
                    log::warn!("Discarding corrupt bucket state for {key}: {err}");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                log::warn!("Rate limit read failed, allowing request: {err}");
                return true;
            }
        };

        match decide(state, now_ms, &config) {
            Decision::Denied => false,
            Decision::Allowed { next } => {
                if let Ok(raw) = serde_json::to_string(&next) {
                    if let Err(err) = self.store.set_ex(&key, &raw, config.interval_secs).await {
                        log::warn!("Rate limit write failed, allowing request: {err}");
                    }
                }
                true
            }
        }
    }
}

/// Middleware gate in front of the handlers. Unclassified paths pass
/// through untouched.
pub async fn enforce(
    req: ServiceRequest,
    next: Next<impl MessageBody + 'static>,
) -> Result<ServiceResponse<BoxBody>, Error> {
    let Some(category) = RouteCategory::classify(req.path()) else {
        return Ok(next.call(req).await?.map_into_boxed_body());
    };

    let client = req
        .connection_info()
        .realip_remote_addr()
        .map(str::to_string)
        .unwrap_or_else(|| "anonymous".to_string());

    let allowed = match req.app_data::<web::Data<RateLimiter>>() {
        Some(limiter) => limiter.check(&client, category).await,
        None => true,
    };

    if !allowed {
        let response = HttpResponse::TooManyRequests()
            .json(serde_json::json!({ "error": category.deny_message() }));
        return Ok(req.into_response(response).map_into_boxed_body());
    }

    Ok(next.call(req).await?.map_into_boxed_body())
}
