use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::extractors::{authorize, CurrentUser},
    error::ApiError,
    query::{self, Filter, ListParams, ListQuery},
    response::Envelope,
    reviews::{
        dto::{CreateReviewRequest, UpdateReviewRequest},
        repo::{self, Review, REVIEW_COLUMNS, REVIEW_FILTERS},
    },
    state::AppState,
    users::repo::{Role, User},
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/tours/:tour_id/reviews",
            get(list_tour_reviews).post(create_review),
        )
        .route(
            "/reviews/:id",
            get(get_review).patch(update_review).delete(delete_review),
        )
}

fn validate_rating(rating: i32) -> Result<(), ApiError> {
    if !(1..=5).contains(&rating) {
        return Err(ApiError::Validation(
            "rating must be between 1 and 5".into(),
        ));
    }
    Ok(())
}

#[instrument(skip(state, raw))]
pub async fn list_tour_reviews(
    State(state): State<AppState>,
    CurrentUser(_): CurrentUser,
    Path(tour_id): Path<Uuid>,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Json<Envelope<Value>>, ApiError> {
    let params = ListParams::parse(&raw, &REVIEW_FILTERS)?;
    let select = format!("SELECT {REVIEW_COLUMNS} FROM reviews WHERE TRUE");
    let reviews: Vec<Review> =
        ListQuery::new(&select, "SELECT COUNT(*) FROM reviews WHERE TRUE", &params)
            .prefilter(Filter::id_eq("tour_id", tour_id))
            .fetch_all(&state.db)
            .await?;

    let count = reviews.len();
    let reviews = query::project(
        serde_json::to_value(&reviews).map_err(anyhow::Error::from)?,
        &params.fields,
    );
    Ok(Json(Envelope::success(
        json!({ "count": count, "reviews": reviews }),
    )))
}

#[instrument(skip(state, current, payload))]
pub async fn create_review(
    State(state): State<AppState>,
    CurrentUser(current): CurrentUser,
    Path(tour_id): Path<Uuid>,
    Json(payload): Json<CreateReviewRequest>,
) -> Result<(StatusCode, Json<Envelope<Value>>), ApiError> {
    validate_rating(payload.rating)?;
    if payload.body.trim().is_empty() {
        return Err(ApiError::Validation("review can not be empty".into()));
    }

    // Authorship stamping: the URL names the tour, the token names the author.
    let tour_id = payload.tour.unwrap_or(tour_id);
    let author = match payload.user {
        Some(other) if other != current.id => {
            authorize(&current, &[Role::Admin])?;
            other
        }
        _ => current.id,
    };

    let review = Review::create(&state.db, payload.body.trim(), payload.rating, author, tour_id)
        .await?;
    let (quantity, average) = repo::recalculate_tour_ratings(&state.db, tour_id).await?;

    info!(review_id = %review.id, %tour_id, quantity, average, "review created");
    Ok((
        StatusCode::CREATED,
        Json(Envelope::success(json!({ "review": review }))),
    ))
}

#[instrument(skip(state))]
pub async fn get_review(
    State(state): State<AppState>,
    CurrentUser(_): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Envelope<Value>>, ApiError> {
    let review = Review::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("no review found with that id".into()))?;
    Ok(Json(Envelope::success(json!({ "review": review }))))
}

/// Authors manage their own reviews; admins can manage any.
fn authorize_review_write(current: &User, review: &Review) -> Result<(), ApiError> {
    if review.user_id == current.id || current.role == Role::Admin {
        Ok(())
    } else {
        warn!(user_id = %current.id, review_id = %review.id, "review write denied");
        Err(ApiError::Forbidden)
    }
}

#[instrument(skip(state, current, payload))]
pub async fn update_review(
    State(state): State<AppState>,
    CurrentUser(current): CurrentUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateReviewRequest>,
) -> Result<Json<Envelope<Value>>, ApiError> {
    if let Some(rating) = payload.rating {
        validate_rating(rating)?;
    }

    let review = Review::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("no review found with that id".into()))?;
    authorize_review_write(&current, &review)?;

    let updated = Review::update(&state.db, id, payload.body.as_deref(), payload.rating).await?;
    let (quantity, average) = repo::recalculate_tour_ratings(&state.db, review.tour_id).await?;

    info!(review_id = %id, quantity, average, "review updated");
    Ok(Json(Envelope::success(json!({ "review": updated }))))
}

#[instrument(skip(state, current))]
pub async fn delete_review(
    State(state): State<AppState>,
    CurrentUser(current): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let review = Review::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("no review found with that id".into()))?;
    authorize_review_write(&current, &review)?;

    Review::delete(&state.db, id).await?;
    let (quantity, average) = repo::recalculate_tour_ratings(&state.db, review.tour_id).await?;

    info!(review_id = %id, quantity, average, "review deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn user(role: Role) -> User {
        User {
            id: Uuid::new_v4(),
            name: "someone".into(),
            email: "someone@example.com".into(),
            password_hash: "hash".into(),
            role,
            photo: None,
            password_changed_at: None,
            password_reset_hash: None,
            password_reset_expires_at: None,
            active: true,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    fn review_by(user_id: Uuid) -> Review {
        Review {
            id: Uuid::new_v4(),
            body: "great tour".into(),
            rating: 5,
            user_id,
            tour_id: Uuid::new_v4(),
            created_at: OffsetDateTime::now_utc(),
            updated_at: None,
        }
    }

    #[test]
    fn rating_bounds() {
        assert!(validate_rating(1).is_ok());
        assert!(validate_rating(5).is_ok());
        assert!(validate_rating(0).is_err());
        assert!(validate_rating(6).is_err());
    }

    #[test]
    fn author_and_admin_may_write_others_may_not() {
        let author = user(Role::User);
        let admin = user(Role::Admin);
        let stranger = user(Role::Guide);
        let review = review_by(author.id);

        assert!(authorize_review_write(&author, &review).is_ok());
        assert!(authorize_review_write(&admin, &review).is_ok());
        assert!(matches!(
            authorize_review_write(&stranger, &review),
            Err(ApiError::Forbidden)
        ));
    }
}
