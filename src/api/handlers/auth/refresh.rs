//! Refresh token redemption with rotation.
//!
//! The presented token is consumed (deleted) before any other check: an
//! unknown, already-used or expired token all end with the row gone and a
//! 401. Only a live token yields a fresh pair, and the old value can never
//! be redeemed twice, even by concurrent requests.

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{error, instrument, warn};

use super::state::AuthState;
use super::storage::{self, ConsumedToken};
use super::types::{ApiMessage, RefreshRequest, TokenPairResponse};
use super::utils;

#[derive(Debug, PartialEq, Eq)]
enum RotationDecision {
    /// No row matched: never issued, already used or belonging to a deleted
    /// user.
    Invalid,
    /// The row existed but its expiry had passed. It is consumed regardless.
    Expired,
    Rotate(uuid::Uuid),
}

fn evaluate(consumed: Option<ConsumedToken>, now: DateTime<Utc>) -> RotationDecision {
    match consumed {
        None => RotationDecision::Invalid,
        Some(token) if token.expires_at <= now => RotationDecision::Expired,
        Some(token) => RotationDecision::Rotate(token.user_id),
    }
}

#[utoipa::path(
    post,
    path= "/refresh-token",
    request_body = RefreshRequest,
    responses (
        (status = 200, description = "Token rotated, new pair issued", body = [TokenPairResponse], content_type = "application/json"),
        (status = 400, description = "Missing refresh token", body = [ApiMessage]),
        (status = 401, description = "Unknown, already used or expired refresh token", body = [ApiMessage]),
        (status = 500, description = "Rotation could not be completed", body = [ApiMessage]),
    ),
    tag = "auth"
)]
#[instrument(skip(pool, state, payload))]
pub async fn refresh(
    Extension(pool): Extension<PgPool>,
    Extension(state): Extension<Arc<AuthState>>,
    payload: Option<Json<RefreshRequest>>,
) -> impl IntoResponse {
    let token = match payload {
        Some(Json(request)) if !request.refresh_token.is_empty() => request.refresh_token,
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiMessage::failure("Refresh token is required")),
            )
                .into_response();
        }
    };

    let consumed =
        match storage::consume_refresh_token(&pool, &utils::hash_refresh_token(&token)).await {
            Ok(consumed) => consumed,
            Err(err) => {
                error!("Failed to consume refresh token: {err:?}");
                return internal_error();
            }
        };

    let user_id = match evaluate(consumed, Utc::now()) {
        RotationDecision::Invalid => {
            return (
                StatusCode::UNAUTHORIZED,
                Json(ApiMessage::failure("Invalid refresh token")),
            )
                .into_response();
        }
        RotationDecision::Expired => {
            return (
                StatusCode::UNAUTHORIZED,
                Json(ApiMessage::failure("Refresh token expired")),
            )
                .into_response();
        }
        RotationDecision::Rotate(user_id) => user_id,
    };

    let user = match storage::lookup_user_by_id(&pool, user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            // The token row outlived its user; FK cascade should prevent
            // this, so flag it.
            warn!("Refresh token consumed for missing user {user_id}");
            return (
                StatusCode::UNAUTHORIZED,
                Json(ApiMessage::failure("Invalid refresh token")),
            )
                .into_response();
        }
        Err(err) => {
            error!("Failed to lookup user during rotation: {err:?}");
            return internal_error();
        }
    };

    match state.issuer().issue(&pool, user.id, &user.username).await {
        Ok(pair) => (
            StatusCode::OK,
            Json(TokenPairResponse {
                success: true,
                message: "Token refreshed".to_string(),
                access_token: pair.access_token,
                refresh_token: pair.refresh_token,
                user_id: None,
            }),
        )
            .into_response(),
        Err(err) => {
            error!("Failed to issue tokens at rotation: {err:?}");
            internal_error()
        }
    }
}

fn internal_error() -> axum::response::Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiMessage::failure("Internal server error")),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    #[test]
    fn missing_row_is_invalid() {
        assert_eq!(evaluate(None, Utc::now()), RotationDecision::Invalid);
    }

    #[test]
    fn expired_row_is_expired_not_invalid() {
        let now = Utc::now();
        let consumed = ConsumedToken {
            user_id: Uuid::new_v4(),
            expires_at: now - Duration::seconds(1),
        };
        assert_eq!(evaluate(Some(consumed), now), RotationDecision::Expired);
    }

    #[test]
    fn expiry_boundary_counts_as_expired() {
        let now = Utc::now();
        let consumed = ConsumedToken {
            user_id: Uuid::new_v4(),
            expires_at: now,
        };
        assert_eq!(evaluate(Some(consumed), now), RotationDecision::Expired);
    }

    #[test]
    fn live_row_rotates_for_its_owner() {
        let now = Utc::now();
        let user_id = Uuid::new_v4();
        let consumed = ConsumedToken {
            user_id,
            expires_at: now + Duration::days(7),
        };
        assert_eq!(
            evaluate(Some(consumed), now),
            RotationDecision::Rotate(user_id)
        );
    }
}
