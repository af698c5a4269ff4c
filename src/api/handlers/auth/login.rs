use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{error, instrument};

use super::state::AuthState;
use super::storage;
use super::types::{ApiMessage, LoginRequest, TokenPairResponse};
use super::utils;

// Unknown email and wrong password share one response so the endpoint cannot
// be used to probe which addresses have accounts.
const INVALID_CREDENTIALS: &str = "Invalid credentials";

#[utoipa::path(
    post,
    path= "/login",
    request_body = LoginRequest,
    responses (
        (status = 200, description = "Credentials accepted, token pair issued", body = [TokenPairResponse], content_type = "application/json"),
        (status = 400, description = "Invalid input or credentials", body = [ApiMessage]),
        (status = 500, description = "Login could not be completed", body = [ApiMessage]),
    ),
    tag = "auth"
)]
#[instrument(skip(pool, state, payload))]
pub async fn login(
    Extension(pool): Extension<PgPool>,
    Extension(state): Extension<Arc<AuthState>>,
    payload: Option<Json<LoginRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiMessage::failure("Missing payload")),
        )
            .into_response();
    };

    let email = utils::normalize_email(&request.email);

    if let Err(message) = utils::validate_login(&email, &request.password) {
        return (StatusCode::BAD_REQUEST, Json(ApiMessage::failure(message))).into_response();
    }

    let user = match storage::lookup_user_by_email(&pool, &email).await {
        Ok(Some(user)) => user,
        Ok(None) => return invalid_credentials(),
        Err(err) => {
            error!("Failed to lookup user: {err:?}");
            return internal_error();
        }
    };

    match utils::verify_password(&request.password, &user.password_hash) {
        Ok(true) => {}
        Ok(false) => return invalid_credentials(),
        Err(err) => {
            error!("Failed to verify password: {err:?}");
            return internal_error();
        }
    }

    match state.issuer().issue(&pool, user.id, &user.username).await {
        Ok(pair) => (
            StatusCode::OK,
            Json(TokenPairResponse {
                success: true,
                message: "Login successful".to_string(),
                access_token: pair.access_token,
                refresh_token: pair.refresh_token,
                user_id: Some(user.id.to_string()),
            }),
        )
            .into_response(),
        Err(err) => {
            error!("Failed to issue tokens at login: {err:?}");
            internal_error()
        }
    }
}

fn invalid_credentials() -> axum::response::Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ApiMessage::failure(INVALID_CREDENTIALS)),
    )
        .into_response()
}

fn internal_error() -> axum::response::Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiMessage::failure("Internal server error")),
    )
        .into_response()
}
