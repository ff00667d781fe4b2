use crate::errors::AppError;
use axum::http::HeaderMap;
use base64::Engine;
use governor::{DefaultDirectRateLimiter, DefaultKeyedRateLimiter, Quota, RateLimiter};
use nonzero_ext::nonzero;
use std::num::NonZeroU32;
use std::sync::Arc;

/// Decodes `Authorization: Basic ...` into `(user, password)`.
pub fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let auth = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())?;
    let encoded = auth.strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

/// Returns the authenticated user name.
pub fn require_basic(headers: &HeaderMap, username: &str, password: &str) -> Result<String, AppError> {
    let (user, pass) = basic_credentials(headers).ok_or(AppError::Unauthorized)?;
    if user != username || pass != password {
        return Err(AppError::Unauthorized);
    }
    Ok(user)
}

#[derive(Clone)]
pub struct RateLimiters {
    global: Arc<DefaultDirectRateLimiter>,
    per_user: Arc<DefaultKeyedRateLimiter<String>>,
}

impl RateLimiters {
    /// `per_second`/`burst` apply per user; the global limiter allows four
    /// times as much.
    pub fn new(per_second: u32, burst: u32) -> Self {
        let rate = NonZeroU32::new(per_second).unwrap_or(nonzero!(1u32));
        let burst = NonZeroU32::new(burst).unwrap_or(rate);
        let user_quota = Quota::per_second(rate).allow_burst(burst);
        let global_quota = Quota::per_second(rate.saturating_mul(nonzero!(4u32)))
            .allow_burst(burst.saturating_mul(nonzero!(4u32)));
        Self {
            global: Arc::new(RateLimiter::direct(global_quota)),
            per_user: Arc::new(RateLimiter::keyed(user_quota)),
        }
    }

    /// Shared budget for every request, checked before credentials so
    /// guessing is throttled without keying on client-supplied names.
    pub fn check_global(&self) -> Result<(), AppError> {
        self.global.check().map_err(|_| AppError::RateLimited)
    }

    /// Only called with a verified user name.
    pub fn check_user(&self, user: &str) -> Result<(), AppError> {
        self.per_user
            .check_key(&user.to_string())
            .map_err(|_| AppError::RateLimited)
    }

    /// Drops per-user state that has fully replenished.
    pub fn prune(&self) {
        self.per_user.retain_recent();
        self.per_user.shrink_to_fit();
    }

    pub fn tracked_users(&self) -> usize {
        self.per_user.len()
    }
}
