//! Registration, login and refresh token rotation, plus the admission
//! rate limiting that fronts them.

pub mod login;
pub mod rate_limit;
pub mod refresh;
pub mod register;
pub mod state;
mod storage;
pub mod tokens;
pub mod types;
mod utils;

pub use rate_limit::{
    admission, MemoryRateLimiter, NoopRateLimiter, PgRateLimiter, RateLimitDecision,
    RateLimitPolicy, RateLimiter,
};
pub use state::{AuthConfig, AuthState};
pub use tokens::{AccessTokenClaims, TokenIssuer, TokenPair};

use axum::{http::StatusCode, response::IntoResponse, Json};
use tracing::instrument;

use types::ApiMessage;

#[utoipa::path(
    post,
    path= "/logout",
    responses (
        (status = 501, description = "Logout is not implemented", body = [ApiMessage]),
    ),
    tag = "auth"
)]
// TODO: delete the presented refresh token server-side instead of leaving
// invalidation to the client dropping it.
#[instrument]
pub async fn logout() -> impl IntoResponse {
    (
        StatusCode::NOT_IMPLEMENTED,
        Json(ApiMessage::failure("Logout is not implemented")),
    )
}
