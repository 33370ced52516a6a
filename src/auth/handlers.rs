use axum::{
    extract::{FromRef, Path, State},
    http::StatusCode,
    routing::{patch, post},
    Json, Router,
};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Value};
use time::Duration;
use tracing::{error, info, instrument, warn};

use crate::{
    auth::{
        dto::{
            ForgotPasswordRequest, LoginRequest, PublicUser, ResetPasswordRequest, SignupRequest,
            UpdatePasswordRequest,
        },
        extractors::CurrentUser,
        jwt::JwtKeys,
        password,
    },
    error::ApiError,
    response::Envelope,
    state::AppState,
    users::repo::User,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/users/signup", post(signup))
        .route("/users/login", post(login))
        .route("/users/forgot-password", post(forgot_password))
        .route("/users/reset-password/:token", patch(reset_password))
        .route("/users/update-password", patch(update_password))
}

fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Shared checks for any endpoint that sets a new credential. Runs before
/// any write, so a mismatch never leaves a partial record behind.
fn validate_new_password(password: &str, confirm: &str) -> Result<(), ApiError> {
    if password.len() < 8 {
        return Err(ApiError::Validation(
            "password must be at least 8 characters".into(),
        ));
    }
    if password != confirm {
        return Err(ApiError::Validation("passwords do not match".into()));
    }
    Ok(())
}

fn reset_mail_subject(ttl_minutes: i64) -> String {
    format!("Your password reset token (valid for {ttl_minutes} minutes)")
}

fn logged_in_response(user: &User, token: String) -> Json<Envelope<Value>> {
    Json(Envelope::with_token(
        json!({ "user": PublicUser::from(user) }),
        token,
    ))
}

#[instrument(skip(state, payload))]
pub async fn signup(
    State(state): State<AppState>,
    Json(mut payload): Json<SignupRequest>,
) -> Result<(StatusCode, Json<Envelope<Value>>), ApiError> {
    payload.email = payload.email.trim().to_lowercase();

    if !is_valid_email(&payload.email) {
        warn!(email = %payload.email, "invalid email");
        return Err(ApiError::Validation("invalid email address".into()));
    }
    validate_new_password(&payload.password, &payload.password_confirm)?;

    let hash = password::hash_password(&payload.password)?;
    // Role is always 'user' here; privileged roles are granted by an admin.
    let user = User::create(&state.db, payload.name.trim(), &payload.email, &hash).await?;

    let token = JwtKeys::from_ref(&state).sign(user.id)?;
    info!(user_id = %user.id, email = %user.email, "user signed up");
    Ok((StatusCode::CREATED, logged_in_response(&user, token)))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(mut payload): Json<LoginRequest>,
) -> Result<Json<Envelope<Value>>, ApiError> {
    payload.email = payload.email.trim().to_lowercase();

    let user = User::find_active_by_email(&state.db, &payload.email)
        .await?
        .ok_or_else(|| {
            warn!(email = %payload.email, "login unknown email");
            ApiError::IncorrectCredentials
        })?;

    if !password::verify_password(&payload.password, &user.password_hash)? {
        warn!(user_id = %user.id, "login invalid password");
        return Err(ApiError::IncorrectCredentials);
    }

    let token = JwtKeys::from_ref(&state).sign(user.id)?;
    info!(user_id = %user.id, "user logged in");
    Ok(logged_in_response(&user, token))
}

#[instrument(skip(state, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(payload): Json<ForgotPasswordRequest>,
) -> Result<Json<Envelope<()>>, ApiError> {
    let email = payload.email.trim().to_lowercase();
    let user = User::find_active_by_email(&state.db, &email)
        .await?
        .ok_or_else(|| ApiError::NotFound("there is no user with that email address".into()))?;

    let (plain, digest) = password::issue_reset_token();
    let expires_at =
        time::OffsetDateTime::now_utc() + Duration::minutes(state.config.reset_token_ttl_minutes);
    User::set_reset_token(&state.db, user.id, &digest, expires_at).await?;

    let reset_url = format!(
        "{}/api/v1/users/reset-password/{}",
        state.config.base_url, plain
    );
    let body = format!(
        "Forgot your password? Submit a PATCH request with your new password to {reset_url}\n\
         If you didn't forget your password, please ignore this email."
    );

    let subject = reset_mail_subject(state.config.reset_token_ttl_minutes);
    if let Err(e) = state.mailer.send(&user.email, &subject, &body).await
    {
        // Delivery failed, so the token can never reach its owner; clear it
        // rather than leave a live reset window dangling.
        error!(error = %e, user_id = %user.id, "reset mail delivery failed");
        User::clear_reset_token(&state.db, user.id).await?;
        return Err(ApiError::MailDelivery);
    }

    info!(user_id = %user.id, "reset token issued");
    Ok(Json(Envelope::message("token sent to email")))
}

#[instrument(skip(state, payload, token))]
pub async fn reset_password(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<Json<Envelope<Value>>, ApiError> {
    let digest = password::hash_reset_token(&token);
    let user = User::find_by_reset_digest(&state.db, &digest)
        .await?
        .ok_or_else(|| ApiError::Validation("token is invalid or has expired".into()))?;

    validate_new_password(&payload.password, &payload.password_confirm)?;
    let hash = password::hash_password(&payload.password)?;
    User::update_password(&state.db, user.id, &hash).await?;

    // The rotation just stamped password_changed_at, so issue a fresh token.
    let token = JwtKeys::from_ref(&state).sign(user.id)?;
    info!(user_id = %user.id, "password reset");
    Ok(logged_in_response(&user, token))
}

#[instrument(skip(state, current, payload))]
pub async fn update_password(
    State(state): State<AppState>,
    CurrentUser(current): CurrentUser,
    Json(payload): Json<UpdatePasswordRequest>,
) -> Result<Json<Envelope<Value>>, ApiError> {
    if !password::verify_password(&payload.current_password, &current.password_hash)? {
        warn!(user_id = %current.id, "update-password with wrong current password");
        return Err(ApiError::IncorrectCredentials);
    }

    validate_new_password(&payload.password, &payload.password_confirm)?;
    let hash = password::hash_password(&payload.password)?;
    User::update_password(&state.db, current.id, &hash).await?;

    let token = JwtKeys::from_ref(&state).sign(current.id)?;
    info!(user_id = %current.id, "password updated");
    Ok(logged_in_response(&current, token))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_validation() {
        assert!(is_valid_email("jonas@example.com"));
        assert!(!is_valid_email("not-an-email"));
        assert!(!is_valid_email("two@at@signs.com"));
    }

    #[test]
    fn mismatched_confirmation_fails_before_any_write() {
        let err = validate_new_password("long-enough-pass", "different-pass").unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[test]
    fn short_password_is_rejected() {
        let err = validate_new_password("short", "short").unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[test]
    fn matching_password_passes() {
        assert!(validate_new_password("long-enough-pass", "long-enough-pass").is_ok());
    }

    #[test]
    fn reset_subject_carries_the_configured_ttl() {
        assert_eq!(
            reset_mail_subject(15),
            "Your password reset token (valid for 15 minutes)"
        );
    }
}
