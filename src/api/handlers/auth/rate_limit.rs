//! Fixed-window admission control shared across service instances.
//!
//! Counters are rows in `rate_limit_windows`, keyed by (policy, identity,
//! window start). Each admission check is a single atomic upsert returning
//! the post-increment count; budget comes back automatically at window
//! rollover because the key changes. Rejection costs one counter write and
//! never touches user or token storage.

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::{DateTime, TimeZone, Utc};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, warn, Instrument};

use super::{state::AuthState, types::ApiMessage, utils::extract_client_ip};

/// How often stale counter rows are swept, in multiples of the window.
const SWEEP_WINDOW_MULTIPLE: u32 = 60;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub name: &'static str,
    pub points: u32,
    pub window: Duration,
}

impl RateLimitPolicy {
    #[must_use]
    pub const fn new(name: &'static str, points: u32, window: Duration) -> Self {
        Self {
            name,
            points,
            window,
        }
    }

    /// Budget applied to every request.
    #[must_use]
    pub const fn global(points: u32, window: Duration) -> Self {
        Self::new("global", points, window)
    }

    /// Tighter budget for credential-issuing endpoints.
    #[must_use]
    pub const fn sensitive(points: u32, window: Duration) -> Self {
        Self::new("sensitive", points, window)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Admitted,
    Limited,
}

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Count one request against (policy, identity) and decide admission.
    async fn admit(&self, identity: &str, policy: &RateLimitPolicy) -> Result<RateLimitDecision>;
}

/// Align an instant to the start of its fixed window.
pub(crate) fn window_start(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    let secs = i64::try_from(window.as_secs()).unwrap_or(1).max(1);
    let aligned = now.timestamp().div_euclid(secs) * secs;
    Utc.timestamp_opt(aligned, 0).single().unwrap_or(now)
}

/// Database-backed limiter; the production implementation. Counters are
/// never cached locally, so any number of instances share one budget.
#[derive(Clone)]
pub struct PgRateLimiter {
    pool: PgPool,
}

impl PgRateLimiter {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RateLimiter for PgRateLimiter {
    async fn admit(&self, identity: &str, policy: &RateLimitPolicy) -> Result<RateLimitDecision> {
        let start = window_start(Utc::now(), policy.window);

        let query = r"
            INSERT INTO rate_limit_windows
                (policy, identity, window_start, count)
            VALUES ($1, $2, $3, 1)
            ON CONFLICT (policy, identity, window_start)
                DO UPDATE SET count = rate_limit_windows.count + 1
            RETURNING count
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(policy.name)
            .bind(identity)
            .bind(start)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to update rate limit window")?;

        let count: i64 = row.get("count");

        if count > i64::from(policy.points) {
            Ok(RateLimitDecision::Limited)
        } else {
            Ok(RateLimitDecision::Admitted)
        }
    }
}

/// In-process limiter with the same window math as [`PgRateLimiter`]. Only
/// for tests and single-instance development; it cannot share budget between
/// instances.
#[derive(Debug, Default)]
pub struct MemoryRateLimiter {
    windows: Mutex<HashMap<(&'static str, String), (i64, u32)>>,
}

impl MemoryRateLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn admit_at(
        &self,
        now: DateTime<Utc>,
        identity: &str,
        policy: &RateLimitPolicy,
    ) -> RateLimitDecision {
        let start = window_start(now, policy.window).timestamp();
        let mut windows = self.windows.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        let entry = windows
            .entry((policy.name, identity.to_string()))
            .or_insert((start, 0));
        if entry.0 != start {
            *entry = (start, 0);
        }
        entry.1 += 1;

        if entry.1 > policy.points {
            RateLimitDecision::Limited
        } else {
            RateLimitDecision::Admitted
        }
    }
}

#[async_trait]
impl RateLimiter for MemoryRateLimiter {
    async fn admit(&self, identity: &str, policy: &RateLimitPolicy) -> Result<RateLimitDecision> {
        Ok(self.admit_at(Utc::now(), identity, policy))
    }
}

#[derive(Clone, Debug)]
pub struct NoopRateLimiter;

#[async_trait]
impl RateLimiter for NoopRateLimiter {
    async fn admit(&self, _identity: &str, _policy: &RateLimitPolicy) -> Result<RateLimitDecision> {
        Ok(RateLimitDecision::Admitted)
    }
}

/// Admission filter in front of every route: global policy always, sensitive
/// policy additionally on configured paths. Pure gate; rejected requests
/// never reach the auth flows.
pub async fn admission(
    Extension(state): Extension<Arc<AuthState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let identity = extract_client_ip(request.headers())
        .or_else(|| connect_info.map(|ConnectInfo(addr)| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string());

    match gate(&state, &identity, request.uri().path()).await {
        Ok(None) => next.run(request).await,
        Ok(Some(status)) => {
            warn!("Rate limit exceeded for {identity}");
            (status, Json(ApiMessage::failure("Too many requests"))).into_response()
        }
        Err(err) => {
            // Fail closed: an unreachable counter must not open the gate.
            error!("Rate limiter failure: {err:?}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiMessage::failure("Internal server error")),
            )
                .into_response()
        }
    }
}

async fn gate(state: &AuthState, identity: &str, path: &str) -> Result<Option<StatusCode>> {
    let config = state.config();

    if state.limiter().admit(identity, config.global_policy()).await?
        == RateLimitDecision::Limited
    {
        return Ok(Some(StatusCode::TOO_MANY_REQUESTS));
    }

    // The sensitive tier keeps the 409 the gateway contract expects.
    if config.is_sensitive(path)
        && state
            .limiter()
            .admit(identity, config.sensitive_policy())
            .await?
            == RateLimitDecision::Limited
    {
        return Ok(Some(StatusCode::CONFLICT));
    }

    Ok(None)
}

/// Periodically drop counter rows whose window has long passed. The limiter
/// never reads stale rows (the window key moves on), so this is storage
/// hygiene only.
pub(crate) fn spawn_window_sweeper(pool: PgPool, window: Duration) {
    let interval = window.saturating_mul(SWEEP_WINDOW_MULTIPLE).max(Duration::from_secs(60));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match sweep_windows(&pool, window).await {
                Ok(0) => {}
                Ok(swept) => tracing::debug!("Swept {swept} stale rate limit windows"),
                Err(err) => warn!("Rate limit sweep failed: {err:?}"),
            }
        }
    });
}

async fn sweep_windows(pool: &PgPool, window: Duration) -> Result<u64> {
    let keep_seconds = i64::try_from(window.as_secs()).unwrap_or(1).max(1) * 2;

    let query = r"
        DELETE FROM rate_limit_windows
        WHERE window_start < NOW() - ($1 * INTERVAL '1 second')
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(keep_seconds)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to sweep rate limit windows")?;

    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(seconds, 0).single().expect("timestamp")
    }

    #[test]
    fn window_start_aligns_to_duration() {
        let window = Duration::from_secs(5);
        assert_eq!(window_start(at(100), window), at(100));
        assert_eq!(window_start(at(103), window), at(100));
        assert_eq!(window_start(at(104), window), at(100));
        assert_eq!(window_start(at(105), window), at(105));
    }

    #[test]
    fn window_start_one_second_windows() {
        let window = Duration::from_secs(1);
        assert_eq!(window_start(at(42), window), at(42));
        assert_ne!(window_start(at(42), window), window_start(at(43), window));
    }

    #[test]
    fn budget_exhausts_within_window() {
        let limiter = MemoryRateLimiter::new();
        let policy = RateLimitPolicy::global(3, Duration::from_secs(10));
        let now = at(1000);

        for _ in 0..3 {
            assert_eq!(
                limiter.admit_at(now, "203.0.113.7", &policy),
                RateLimitDecision::Admitted
            );
        }
        // the (N+1)-th request in the same window is rejected
        assert_eq!(
            limiter.admit_at(now, "203.0.113.7", &policy),
            RateLimitDecision::Limited
        );
        // other identities keep their own budget
        assert_eq!(
            limiter.admit_at(now, "203.0.113.8", &policy),
            RateLimitDecision::Admitted
        );
    }

    #[test]
    fn budget_returns_at_rollover() {
        let limiter = MemoryRateLimiter::new();
        let policy = RateLimitPolicy::sensitive(1, Duration::from_secs(1));

        assert_eq!(
            limiter.admit_at(at(1000), "203.0.113.7", &policy),
            RateLimitDecision::Admitted
        );
        assert_eq!(
            limiter.admit_at(at(1000), "203.0.113.7", &policy),
            RateLimitDecision::Limited
        );
        // next window, fresh budget
        assert_eq!(
            limiter.admit_at(at(1001), "203.0.113.7", &policy),
            RateLimitDecision::Admitted
        );
    }

    #[test]
    fn policies_are_counted_independently() {
        let limiter = MemoryRateLimiter::new();
        let window = Duration::from_secs(1);
        let global = RateLimitPolicy::global(10, window);
        let sensitive = RateLimitPolicy::sensitive(1, window);
        let now = at(1000);

        assert_eq!(
            limiter.admit_at(now, "203.0.113.7", &sensitive),
            RateLimitDecision::Admitted
        );
        assert_eq!(
            limiter.admit_at(now, "203.0.113.7", &sensitive),
            RateLimitDecision::Limited
        );
        // the global budget for the same identity is untouched
        assert_eq!(
            limiter.admit_at(now, "203.0.113.7", &global),
            RateLimitDecision::Admitted
        );
    }

    #[tokio::test]
    async fn noop_rate_limiter_allows() {
        let limiter = NoopRateLimiter;
        let policy = RateLimitPolicy::global(1, Duration::from_secs(1));
        assert_eq!(
            limiter.admit("203.0.113.7", &policy).await.expect("admit"),
            RateLimitDecision::Admitted
        );
        assert_eq!(
            limiter.admit("203.0.113.7", &policy).await.expect("admit"),
            RateLimitDecision::Admitted
        );
    }
}
