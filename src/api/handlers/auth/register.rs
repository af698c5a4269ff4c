use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{error, instrument};

use super::state::AuthState;
use super::storage::{self, InsertUserOutcome};
use super::types::{ApiMessage, RegisterRequest, TokenPairResponse};
use super::utils;

#[utoipa::path(
    post,
    path= "/register",
    request_body = RegisterRequest,
    responses (
        (status = 201, description = "User registered, token pair issued", body = [TokenPairResponse], content_type = "application/json"),
        (status = 400, description = "Invalid registration input", body = [ApiMessage]),
        (status = 409, description = "Username or email already taken", body = [ApiMessage]),
        (status = 500, description = "Registration could not be completed", body = [ApiMessage]),
    ),
    tag = "auth"
)]
#[instrument(skip(pool, state, payload))]
pub async fn register(
    Extension(pool): Extension<PgPool>,
    Extension(state): Extension<Arc<AuthState>>,
    payload: Option<Json<RegisterRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiMessage::failure("Missing payload")),
        )
            .into_response();
    };

    let username = request.username.trim().to_string();
    let email = utils::normalize_email(&request.email);

    if let Err(message) = utils::validate_registration(&username, &email, &request.password) {
        return (StatusCode::BAD_REQUEST, Json(ApiMessage::failure(message))).into_response();
    }

    let password_hash = match utils::hash_password(&request.password) {
        Ok(hash) => hash,
        Err(err) => {
            error!("Failed to hash password: {err:?}");
            return internal_error();
        }
    };

    let user_id = match storage::insert_user(&pool, &username, &email, &password_hash).await {
        Ok(InsertUserOutcome::Created(id)) => id,
        Ok(InsertUserOutcome::Conflict) => {
            return (
                StatusCode::CONFLICT,
                Json(ApiMessage::failure("User already exists")),
            )
                .into_response();
        }
        Err(err) => {
            error!("Failed to insert user: {err:?}");
            return internal_error();
        }
    };

    match state.issuer().issue(&pool, user_id, &username).await {
        Ok(pair) => (
            StatusCode::CREATED,
            Json(TokenPairResponse {
                success: true,
                message: "User registered successfully".to_string(),
                access_token: pair.access_token,
                refresh_token: pair.refresh_token,
                user_id: Some(user_id.to_string()),
            }),
        )
            .into_response(),
        Err(err) => {
            error!("Failed to issue tokens for new user: {err:?}");
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
