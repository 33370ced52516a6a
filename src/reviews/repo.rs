use serde::Serialize;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::query::{ColumnKind, FilterSchema};

/// Rating aggregate a tour falls back to when it has no reviews at all.
pub const DEFAULT_RATINGS_AVERAGE: f64 = 4.5;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Review {
    pub id: Uuid,
    pub body: String,
    pub rating: i32,
    pub user_id: Uuid,
    pub tour_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub updated_at: Option<OffsetDateTime>,
}

pub const REVIEW_COLUMNS: &str = "id, body, rating, user_id, tour_id, created_at, updated_at";

pub const REVIEW_FILTERS: FilterSchema = FilterSchema {
    columns: &[
        ("rating", ColumnKind::Numeric),
        ("created_at", ColumnKind::Timestamp),
    ],
};

impl Review {
    pub async fn find_by_id(db: &PgPool, id: Uuid) -> anyhow::Result<Option<Review>> {
        let review = sqlx::query_as::<_, Review>(&format!(
            "SELECT {REVIEW_COLUMNS} FROM reviews WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(review)
    }

    pub async fn create(
        db: &PgPool,
        body: &str,
        rating: i32,
        user_id: Uuid,
        tour_id: Uuid,
    ) -> Result<Review, sqlx::Error> {
        sqlx::query_as::<_, Review>(&format!(
            "INSERT INTO reviews (body, rating, user_id, tour_id) VALUES ($1, $2, $3, $4) \
             RETURNING {REVIEW_COLUMNS}"
        ))
        .bind(body)
        .bind(rating)
        .bind(user_id)
        .bind(tour_id)
        .fetch_one(db)
        .await
    }

    pub async fn update(
        db: &PgPool,
        id: Uuid,
        body: Option<&str>,
        rating: Option<i32>,
    ) -> Result<Review, sqlx::Error> {
        sqlx::query_as::<_, Review>(&format!(
            "UPDATE reviews SET body = COALESCE($1, body), rating = COALESCE($2, rating), \
             updated_at = now() WHERE id = $3 RETURNING {REVIEW_COLUMNS}"
        ))
        .bind(body)
        .bind(rating)
        .bind(id)
        .fetch_one(db)
        .await
    }

    pub async fn delete(db: &PgPool, id: Uuid) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM reviews WHERE id = $1")
            .bind(id)
            .execute(db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Reverse-populated reviews for a single-tour read.
    pub async fn list_for_tour(db: &PgPool, tour_id: Uuid) -> anyhow::Result<Vec<Review>> {
        let reviews = sqlx::query_as::<_, Review>(&format!(
            "SELECT {REVIEW_COLUMNS} FROM reviews WHERE tour_id = $1 ORDER BY created_at DESC"
        ))
        .bind(tour_id)
        .fetch_all(db)
        .await?;
        Ok(reviews)
    }
}

/// Maps a grouped (count, mean) result onto the persisted aggregate pair.
/// With no reviews left the aggregate resets to the defined default instead
/// of keeping whatever history left behind.
pub fn aggregate_from(count: i64, average: Option<f64>) -> (i32, f64) {
    match average {
        Some(avg) if count > 0 => (count as i32, avg),
        _ => (0, DEFAULT_RATINGS_AVERAGE),
    }
}

/// Recomputes a tour's rating aggregate from its current reviews. Runs after
/// every review write; a pure function of present state, so re-running it is
/// always safe.
pub async fn recalculate_tour_ratings(db: &PgPool, tour_id: Uuid) -> anyhow::Result<(i32, f64)> {
    let (count, average): (i64, Option<f64>) = sqlx::query_as(
        "SELECT COUNT(*), AVG(rating)::float8 FROM reviews WHERE tour_id = $1",
    )
    .bind(tour_id)
    .fetch_one(db)
    .await?;

    let (quantity, average) = aggregate_from(count, average);
    sqlx::query("UPDATE tours SET ratings_quantity = $1, ratings_average = $2 WHERE id = $3")
        .bind(quantity)
        .bind(average)
        .bind(tour_id)
        .execute(db)
        .await?;
    Ok((quantity, average))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_reviews_average_as_expected() {
        // ratings 4 and 5 -> quantity 2, average 4.5
        assert_eq!(aggregate_from(2, Some(4.5)), (2, 4.5));
    }

    #[test]
    fn empty_review_set_resets_to_default() {
        assert_eq!(aggregate_from(0, None), (0, DEFAULT_RATINGS_AVERAGE));
    }

    #[test]
    fn recompute_is_idempotent_over_same_rows() {
        let first = aggregate_from(3, Some(4.0));
        let second = aggregate_from(3, Some(4.0));
        assert_eq!(first, second);
    }
}
