use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::query::{ColumnKind, FilterSchema};
use crate::tours::dto::{CreateTourRequest, UpdateTourRequest};
use crate::users::repo::User;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "tour_difficulty", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Difficult,
}

/// Tour record. The rating aggregate pair is derived state, written only by
/// the review aggregation routine.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Tour {
    pub id: Uuid,
    pub name: String,
    pub price: f64,
    pub difficulty: Difficulty,
    pub duration: i32,
    pub max_group_size: i32,
    pub summary: String,
    pub description: Option<String>,
    pub ratings_average: f64,
    pub ratings_quantity: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_location: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locations: Option<serde_json::Value>,
    #[serde(skip_serializing)]
    pub secret: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Tour {
    /// Computed at serialization time, never persisted.
    pub fn duration_weeks(&self) -> f64 {
        f64::from(self.duration) / 7.0
    }
}

pub const TOUR_COLUMNS: &str = "id, name, price, difficulty, duration, max_group_size, summary, \
     description, ratings_average, ratings_quantity, start_location, locations, secret, created_at";

pub const TOUR_FILTERS: FilterSchema = FilterSchema {
    columns: &[
        ("name", ColumnKind::Text),
        ("price", ColumnKind::Numeric),
        ("difficulty", ColumnKind::Text),
        ("duration", ColumnKind::Numeric),
        ("max_group_size", ColumnKind::Numeric),
        ("ratings_average", ColumnKind::Numeric),
        ("ratings_quantity", ColumnKind::Numeric),
        ("created_at", ColumnKind::Timestamp),
    ],
};

/// Per-difficulty aggregate over well-rated tours.
#[derive(Debug, Serialize, FromRow)]
pub struct TourStatsRow {
    pub difficulty: String,
    pub num_tours: i64,
    pub num_ratings: i64,
    pub avg_rating: Option<f64>,
    pub avg_price: Option<f64>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
}

#[derive(Debug, Serialize, FromRow)]
pub struct MonthlyPlanRow {
    pub month: i32,
    pub num_tour_starts: i64,
    pub tours: Vec<String>,
}

impl Tour {
    /// Single-tour lookup; secret tours stay invisible here too.
    pub async fn find_visible_by_id(db: &PgPool, id: Uuid) -> anyhow::Result<Option<Tour>> {
        let tour = sqlx::query_as::<_, Tour>(&format!(
            "SELECT {TOUR_COLUMNS} FROM tours WHERE id = $1 AND secret = FALSE"
        ))
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(tour)
    }

    pub async fn create(
        db: &PgPool,
        req: &CreateTourRequest,
        start_dates: &[OffsetDateTime],
    ) -> Result<Tour, sqlx::Error> {
        let mut tx = db.begin().await?;
        let tour = sqlx::query_as::<_, Tour>(&format!(
            "INSERT INTO tours (name, price, difficulty, duration, max_group_size, summary, \
             description, start_location, locations, secret) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) RETURNING {TOUR_COLUMNS}"
        ))
        .bind(&req.name)
        .bind(req.price)
        .bind(req.difficulty)
        .bind(req.duration)
        .bind(req.max_group_size)
        .bind(&req.summary)
        .bind(&req.description)
        .bind(req.start_location.clone())
        .bind(req.locations.clone())
        .bind(req.secret)
        .fetch_one(&mut *tx)
        .await?;

        replace_start_dates(&mut tx, tour.id, start_dates).await?;
        replace_guides(&mut tx, tour.id, &req.guides).await?;
        tx.commit().await?;
        Ok(tour)
    }

    pub async fn update(
        db: &PgPool,
        id: Uuid,
        req: &UpdateTourRequest,
        start_dates: Option<&[OffsetDateTime]>,
    ) -> Result<Tour, sqlx::Error> {
        let mut tx = db.begin().await?;
        let tour = sqlx::query_as::<_, Tour>(&format!(
            "UPDATE tours SET name = COALESCE($1, name), price = COALESCE($2, price), \
             difficulty = COALESCE($3, difficulty), duration = COALESCE($4, duration), \
             max_group_size = COALESCE($5, max_group_size), summary = COALESCE($6, summary), \
             description = COALESCE($7, description), \
             start_location = COALESCE($8, start_location), \
             locations = COALESCE($9, locations), secret = COALESCE($10, secret) \
             WHERE id = $11 RETURNING {TOUR_COLUMNS}"
        ))
        .bind(&req.name)
        .bind(req.price)
        .bind(req.difficulty)
        .bind(req.duration)
        .bind(req.max_group_size)
        .bind(&req.summary)
        .bind(&req.description)
        .bind(req.start_location.clone())
        .bind(req.locations.clone())
        .bind(req.secret)
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        if let Some(dates) = start_dates {
            replace_start_dates(&mut tx, id, dates).await?;
        }
        if let Some(guides) = &req.guides {
            replace_guides(&mut tx, id, guides).await?;
        }
        tx.commit().await?;
        Ok(tour)
    }

    pub async fn delete(db: &PgPool, id: Uuid) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM tours WHERE id = $1")
            .bind(id)
            .execute(db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Reference resolution for a tour's guides.
    pub async fn guides_of(db: &PgPool, tour_id: Uuid) -> anyhow::Result<Vec<User>> {
        let guides = sqlx::query_as::<_, User>(
            "SELECT u.id, u.name, u.email, u.password_hash, u.role, u.photo, \
             u.password_changed_at, u.password_reset_hash, u.password_reset_expires_at, \
             u.active, u.created_at \
             FROM users u JOIN tour_guides g ON g.user_id = u.id \
             WHERE g.tour_id = $1 ORDER BY u.name",
        )
        .bind(tour_id)
        .fetch_all(db)
        .await?;
        Ok(guides)
    }

    pub async fn start_dates_of(db: &PgPool, tour_id: Uuid) -> anyhow::Result<Vec<OffsetDateTime>> {
        let dates = sqlx::query_scalar::<_, OffsetDateTime>(
            "SELECT starts_at FROM tour_start_dates WHERE tour_id = $1 ORDER BY starts_at",
        )
        .bind(tour_id)
        .fetch_all(db)
        .await?;
        Ok(dates)
    }

    pub async fn stats(db: &PgPool) -> anyhow::Result<Vec<TourStatsRow>> {
        let rows = sqlx::query_as::<_, TourStatsRow>(
            "SELECT upper(difficulty::text) AS difficulty, \
             COUNT(*) AS num_tours, \
             COALESCE(SUM(ratings_quantity), 0) AS num_ratings, \
             AVG(ratings_average) AS avg_rating, \
             AVG(price) AS avg_price, \
             MIN(price) AS min_price, \
             MAX(price) AS max_price \
             FROM tours WHERE ratings_average >= 4.5 \
             GROUP BY upper(difficulty::text) \
             ORDER BY avg_price",
        )
        .fetch_all(db)
        .await?;
        Ok(rows)
    }

    pub async fn monthly_plan(
        db: &PgPool,
        from: OffsetDateTime,
        to: OffsetDateTime,
    ) -> anyhow::Result<Vec<MonthlyPlanRow>> {
        let rows = sqlx::query_as::<_, MonthlyPlanRow>(
            "SELECT EXTRACT(MONTH FROM d.starts_at)::int4 AS month, \
             COUNT(*) AS num_tour_starts, \
             ARRAY_AGG(t.name ORDER BY t.name) AS tours \
             FROM tour_start_dates d JOIN tours t ON t.id = d.tour_id \
             WHERE d.starts_at >= $1 AND d.starts_at < $2 \
             GROUP BY 1 \
             ORDER BY num_tour_starts DESC, month ASC \
             LIMIT 12",
        )
        .bind(from)
        .bind(to)
        .fetch_all(db)
        .await?;
        Ok(rows)
    }
}

async fn replace_start_dates(
    tx: &mut Transaction<'_, Postgres>,
    tour_id: Uuid,
    dates: &[OffsetDateTime],
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM tour_start_dates WHERE tour_id = $1")
        .bind(tour_id)
        .execute(&mut **tx)
        .await?;
    for starts_at in dates {
        sqlx::query("INSERT INTO tour_start_dates (tour_id, starts_at) VALUES ($1, $2)")
            .bind(tour_id)
            .bind(*starts_at)
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}

async fn replace_guides(
    tx: &mut Transaction<'_, Postgres>,
    tour_id: Uuid,
    guides: &[Uuid],
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM tour_guides WHERE tour_id = $1")
        .bind(tour_id)
        .execute(&mut **tx)
        .await?;
    for user_id in guides {
        sqlx::query("INSERT INTO tour_guides (tour_id, user_id) VALUES ($1, $2)")
            .bind(tour_id)
            .bind(*user_id)
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tour() -> Tour {
        Tour {
            id: Uuid::new_v4(),
            name: "The Forest Hiker".into(),
            price: 397.0,
            difficulty: Difficulty::Easy,
            duration: 7,
            max_group_size: 25,
            summary: "Breathtaking hike".into(),
            description: None,
            ratings_average: 4.5,
            ratings_quantity: 0,
            start_location: None,
            locations: None,
            secret: true,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn duration_weeks_is_derived_from_days() {
        let tour = sample_tour();
        assert!((tour.duration_weeks() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn secret_flag_does_not_serialize() {
        let out = serde_json::to_value(sample_tour()).unwrap();
        assert!(out.get("secret").is_none());
        assert_eq!(out["difficulty"], "easy");
    }
}
