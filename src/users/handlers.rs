use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, patch},
    Json, Router,
};
use serde_json::{json, Value};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    auth::{
        extractors::{authorize, CurrentUser},
        PublicUser,
    },
    error::ApiError,
    query::{ListParams, ListQuery},
    response::Envelope,
    state::AppState,
    users::{
        dto::{AdminUpdateUserRequest, UpdateMeRequest},
        repo::{Role, User, USER_COLUMNS, USER_FILTERS},
    },
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users).post(create_user))
        .route("/users/me", get(get_me))
        .route("/users/update-me", patch(update_me))
        .route("/users/delete-me", delete(delete_me))
        .route(
            "/users/:id",
            get(get_user).patch(update_user).delete(delete_user),
        )
}

#[instrument(skip(state, current, raw))]
pub async fn list_users(
    State(state): State<AppState>,
    CurrentUser(current): CurrentUser,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Json<Envelope<Value>>, ApiError> {
    authorize(&current, &[Role::Admin])?;

    let params = ListParams::parse(&raw, &USER_FILTERS)?;
    let select = format!("SELECT {USER_COLUMNS} FROM users WHERE active = TRUE");
    let users: Vec<User> = ListQuery::new(
        &select,
        "SELECT COUNT(*) FROM users WHERE active = TRUE",
        &params,
    )
    .fetch_all(&state.db)
    .await?;

    let count = users.len();
    let users = crate::query::project(
        serde_json::to_value(&users).map_err(anyhow::Error::from)?,
        &params.fields,
    );
    Ok(Json(Envelope::success(
        json!({ "count": count, "users": users }),
    )))
}

/// Signup owns user creation; this slot on the admin surface only redirects.
pub async fn create_user() -> ApiError {
    ApiError::Validation("this route is not defined, please use /users/signup instead".into())
}

#[instrument(skip(current))]
pub async fn get_me(CurrentUser(current): CurrentUser) -> Json<Envelope<Value>> {
    Json(Envelope::success(
        json!({ "user": PublicUser::from(&current) }),
    ))
}

#[instrument(skip(state, current, payload))]
pub async fn update_me(
    State(state): State<AppState>,
    CurrentUser(current): CurrentUser,
    Json(payload): Json<UpdateMeRequest>,
) -> Result<Json<Envelope<Value>>, ApiError> {
    if payload.password.is_some() || payload.password_confirm.is_some() {
        return Err(ApiError::Validation(
            "this route is not for password updates, please use /update-password".into(),
        ));
    }

    let email = payload.email.map(|e| e.trim().to_lowercase());
    let updated = User::update_profile(
        &state.db,
        current.id,
        payload.name.as_deref(),
        email.as_deref(),
        payload.photo.as_deref(),
        None,
    )
    .await?;

    info!(user_id = %updated.id, "profile updated");
    Ok(Json(Envelope::success(
        json!({ "user": PublicUser::from(&updated) }),
    )))
}

#[instrument(skip(state, current))]
pub async fn delete_me(
    State(state): State<AppState>,
    CurrentUser(current): CurrentUser,
) -> Result<StatusCode, ApiError> {
    User::deactivate(&state.db, current.id).await?;
    info!(user_id = %current.id, "account deactivated");
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, current))]
pub async fn get_user(
    State(state): State<AppState>,
    CurrentUser(current): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Envelope<Value>>, ApiError> {
    authorize(&current, &[Role::Admin])?;

    let user = User::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("no user found with that id".into()))?;
    Ok(Json(Envelope::success(json!({ "user": user }))))
}

#[instrument(skip(state, current, payload))]
pub async fn update_user(
    State(state): State<AppState>,
    CurrentUser(current): CurrentUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<AdminUpdateUserRequest>,
) -> Result<Json<Envelope<Value>>, ApiError> {
    authorize(&current, &[Role::Admin])?;

    let email = payload.email.map(|e| e.trim().to_lowercase());
    let updated = User::update_profile(
        &state.db,
        id,
        payload.name.as_deref(),
        email.as_deref(),
        payload.photo.as_deref(),
        payload.role,
    )
    .await
    .map_err(|e| match e {
        sqlx::Error::RowNotFound => ApiError::NotFound("no user found with that id".into()),
        other => ApiError::Store(other),
    })?;

    info!(user_id = %id, "user updated by admin");
    Ok(Json(Envelope::success(json!({ "user": updated }))))
}

#[instrument(skip(state, current))]
pub async fn delete_user(
    State(state): State<AppState>,
    CurrentUser(current): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    authorize(&current, &[Role::Admin])?;

    if !User::delete(&state.db, id).await? {
        return Err(ApiError::NotFound("no user found with that id".into()));
    }
    info!(user_id = %id, "user deleted by admin");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;

    #[tokio::test]
    async fn posting_a_user_points_at_signup() {
        let response = create_user().await.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
