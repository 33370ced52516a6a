use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use time::{format_description::well_known::Rfc3339, Date, Month, OffsetDateTime};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    auth::{
        extractors::{authorize, CurrentUser},
        PublicUser,
    },
    error::ApiError,
    query::{self, ListParams, ListQuery},
    response::Envelope,
    reviews::repo::Review,
    state::AppState,
    tours::{
        dto::{CreateTourRequest, TourDetails, UpdateTourRequest},
        repo::{Tour, TOUR_COLUMNS, TOUR_FILTERS},
    },
    users::repo::Role,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/tours", get(list_tours).post(create_tour))
        .route("/tours/top-5-cheap", get(top_five_cheap))
        .route("/tours/tour-stats", get(tour_stats))
        .route("/tours/monthly-plan/:year", get(monthly_plan))
        .route(
            "/tours/:id",
            get(get_tour).patch(update_tour).delete(delete_tour),
        )
}

/// Shared list execution; secret tours never show up in listings.
async fn run_list(
    state: &AppState,
    raw: HashMap<String, String>,
) -> Result<Json<Envelope<Value>>, ApiError> {
    let params = ListParams::parse(&raw, &TOUR_FILTERS)?;
    let select = format!("SELECT {TOUR_COLUMNS} FROM tours WHERE secret = FALSE");
    let tours: Vec<Tour> = ListQuery::new(
        &select,
        "SELECT COUNT(*) FROM tours WHERE secret = FALSE",
        &params,
    )
    .fetch_all(&state.db)
    .await?;

    let count = tours.len();
    let tours = query::project(
        serde_json::to_value(&tours).map_err(anyhow::Error::from)?,
        &params.fields,
    );
    Ok(Json(Envelope::success(
        json!({ "count": count, "tours": tours }),
    )))
}

#[instrument(skip(state, raw))]
pub async fn list_tours(
    State(state): State<AppState>,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Json<Envelope<Value>>, ApiError> {
    run_list(&state, raw).await
}

/// Alias route: presets the pipeline directives and reuses the plain listing.
#[instrument(skip(state, raw))]
pub async fn top_five_cheap(
    State(state): State<AppState>,
    Query(mut raw): Query<HashMap<String, String>>,
) -> Result<Json<Envelope<Value>>, ApiError> {
    raw.insert("limit".into(), "5".into());
    raw.insert("sort".into(), "-ratings_average,price".into());
    raw.insert(
        "fields".into(),
        "name,price,ratings_average,summary,difficulty".into(),
    );
    run_list(&state, raw).await
}

#[instrument(skip(state))]
pub async fn tour_stats(
    State(state): State<AppState>,
) -> Result<Json<Envelope<Value>>, ApiError> {
    let stats = Tour::stats(&state.db).await?;
    Ok(Json(Envelope::success(json!({ "stats": stats }))))
}

fn year_bounds(year: i32) -> Result<(OffsetDateTime, OffsetDateTime), ApiError> {
    let start_of = |y: i32| {
        Date::from_calendar_date(y, Month::January, 1)
            .map(|d| d.midnight().assume_utc())
            .map_err(|_| ApiError::Validation("invalid year".into()))
    };
    Ok((start_of(year)?, start_of(year + 1)?))
}

#[instrument(skip(state, current))]
pub async fn monthly_plan(
    State(state): State<AppState>,
    CurrentUser(current): CurrentUser,
    Path(year): Path<i32>,
) -> Result<Json<Envelope<Value>>, ApiError> {
    authorize(&current, &[Role::Admin, Role::LeadGuide, Role::Guide])?;

    let (from, to) = year_bounds(year)?;
    let plan = Tour::monthly_plan(&state.db, from, to).await?;
    Ok(Json(Envelope::success(json!({ "plan": plan }))))
}

#[instrument(skip(state))]
pub async fn get_tour(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Envelope<Value>>, ApiError> {
    let tour = Tour::find_visible_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("no tour found with that id".into()))?;

    let guides = Tour::guides_of(&state.db, tour.id).await?;
    let reviews = Review::list_for_tour(&state.db, tour.id).await?;
    let start_dates = Tour::start_dates_of(&state.db, tour.id)
        .await?
        .into_iter()
        .map(|d| d.format(&Rfc3339).map_err(anyhow::Error::from))
        .collect::<Result<Vec<_>, _>>()?;

    let details = TourDetails {
        duration_weeks: tour.duration_weeks(),
        start_dates,
        guides: guides.iter().map(PublicUser::from).collect(),
        reviews,
        tour,
    };
    Ok(Json(Envelope::success(json!({ "tour": details }))))
}

fn parse_start_dates(dates: &[String]) -> Result<Vec<OffsetDateTime>, ApiError> {
    dates
        .iter()
        .map(|d| {
            OffsetDateTime::parse(d, &Rfc3339).map_err(|_| {
                ApiError::Validation(format!("'{d}' is not an RFC 3339 start date"))
            })
        })
        .collect()
}

fn validate_price(price: f64) -> Result<(), ApiError> {
    if !price.is_finite() || price <= 0.0 {
        return Err(ApiError::Validation("a tour must have a positive price".into()));
    }
    Ok(())
}

#[instrument(skip(state, current, payload))]
pub async fn create_tour(
    State(state): State<AppState>,
    CurrentUser(current): CurrentUser,
    Json(payload): Json<CreateTourRequest>,
) -> Result<(StatusCode, Json<Envelope<Value>>), ApiError> {
    authorize(&current, &[Role::Admin, Role::LeadGuide])?;

    validate_price(payload.price)?;
    let start_dates = parse_start_dates(&payload.start_dates)?;
    let tour = Tour::create(&state.db, &payload, &start_dates).await?;

    info!(tour_id = %tour.id, name = %tour.name, "tour created");
    Ok((
        StatusCode::CREATED,
        Json(Envelope::success(json!({ "tour": tour }))),
    ))
}

#[instrument(skip(state, current, payload))]
pub async fn update_tour(
    State(state): State<AppState>,
    CurrentUser(current): CurrentUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateTourRequest>,
) -> Result<Json<Envelope<Value>>, ApiError> {
    authorize(&current, &[Role::Admin, Role::LeadGuide])?;

    if let Some(price) = payload.price {
        validate_price(price)?;
    }
    let start_dates = payload
        .start_dates
        .as_deref()
        .map(parse_start_dates)
        .transpose()?;

    let tour = Tour::update(&state.db, id, &payload, start_dates.as_deref())
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => ApiError::NotFound("no tour found with that id".into()),
            other => ApiError::Store(other),
        })?;

    info!(tour_id = %id, "tour updated");
    Ok(Json(Envelope::success(json!({ "tour": tour }))))
}

#[instrument(skip(state, current))]
pub async fn delete_tour(
    State(state): State<AppState>,
    CurrentUser(current): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    authorize(&current, &[Role::Admin, Role::LeadGuide])?;

    if !Tour::delete(&state.db, id).await? {
        return Err(ApiError::NotFound("no tour found with that id".into()));
    }
    info!(tour_id = %id, "tour deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn year_bounds_cover_the_whole_year() {
        let (from, to) = year_bounds(2021).unwrap();
        assert_eq!(from.year(), 2021);
        assert_eq!(to.year(), 2022);
        assert!(from < to);
    }

    #[test]
    fn start_dates_must_be_rfc3339() {
        let ok = parse_start_dates(&["2021-06-19T09:00:00Z".into()]).unwrap();
        assert_eq!(ok.len(), 1);
        let err = parse_start_dates(&["next tuesday".into()]).unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[test]
    fn price_must_be_positive_and_finite() {
        assert!(validate_price(397.0).is_ok());
        assert!(validate_price(0.0).is_err());
        assert!(validate_price(f64::NAN).is_err());
    }
}
