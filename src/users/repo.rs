use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::query::{ColumnKind, FilterSchema};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_role", rename_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    User,
    Guide,
    LeadGuide,
    Admin,
}

/// User record. Credential and reset-token fields never serialize.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    pub photo: Option<String>,
    #[serde(skip_serializing)]
    pub password_changed_at: Option<OffsetDateTime>,
    #[serde(skip_serializing)]
    pub password_reset_hash: Option<String>,
    #[serde(skip_serializing)]
    pub password_reset_expires_at: Option<OffsetDateTime>,
    #[serde(skip_serializing)]
    pub active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

pub const USER_COLUMNS: &str = "id, name, email, password_hash, role, photo, \
     password_changed_at, password_reset_hash, password_reset_expires_at, active, created_at";

pub const USER_FILTERS: FilterSchema = FilterSchema {
    columns: &[
        ("name", ColumnKind::Text),
        ("email", ColumnKind::Text),
        ("role", ColumnKind::Text),
        ("created_at", ColumnKind::Timestamp),
    ],
};

impl User {
    pub async fn find_by_id(db: &PgPool, id: Uuid) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    /// Lookup for login and password reset; inactive accounts are invisible.
    pub async fn find_active_by_email(db: &PgPool, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1 AND active = TRUE"
        ))
        .bind(email)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    pub async fn create(
        db: &PgPool,
        name: &str,
        email: &str,
        password_hash: &str,
    ) -> Result<User, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (name, email, password_hash) VALUES ($1, $2, $3) \
             RETURNING {USER_COLUMNS}"
        ))
        .bind(name)
        .bind(email)
        .bind(password_hash)
        .fetch_one(db)
        .await
    }

    pub async fn set_reset_token(
        db: &PgPool,
        id: Uuid,
        digest: &str,
        expires_at: OffsetDateTime,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE users SET password_reset_hash = $1, password_reset_expires_at = $2 \
             WHERE id = $3",
        )
        .bind(digest)
        .bind(expires_at)
        .bind(id)
        .execute(db)
        .await?;
        Ok(())
    }

    pub async fn clear_reset_token(db: &PgPool, id: Uuid) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE users SET password_reset_hash = NULL, password_reset_expires_at = NULL \
             WHERE id = $1",
        )
        .bind(id)
        .execute(db)
        .await?;
        Ok(())
    }

    /// Finds the holder of an unexpired reset token by its digest.
    pub async fn find_by_reset_digest(db: &PgPool, digest: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users \
             WHERE password_reset_hash = $1 AND password_reset_expires_at > now() \
             AND active = TRUE"
        ))
        .bind(digest)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    /// Sets a new credential and stamps the rotation, clearing any pending
    /// reset token. Tokens issued before this moment become stale.
    pub async fn update_password(db: &PgPool, id: Uuid, password_hash: &str) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE users SET password_hash = $1, password_changed_at = now(), \
             password_reset_hash = NULL, password_reset_expires_at = NULL WHERE id = $2",
        )
        .bind(password_hash)
        .bind(id)
        .execute(db)
        .await?;
        Ok(())
    }

    pub async fn update_profile(
        db: &PgPool,
        id: Uuid,
        name: Option<&str>,
        email: Option<&str>,
        photo: Option<&str>,
        role: Option<Role>,
    ) -> Result<User, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET name = COALESCE($1, name), email = COALESCE($2, email), \
             photo = COALESCE($3, photo), role = COALESCE($4, role) \
             WHERE id = $5 RETURNING {USER_COLUMNS}"
        ))
        .bind(name)
        .bind(email)
        .bind(photo)
        .bind(role)
        .bind(id)
        .fetch_one(db)
        .await
    }

    /// Soft delete: the row stays but drops out of listings and auth.
    pub async fn deactivate(db: &PgPool, id: Uuid) -> anyhow::Result<()> {
        sqlx::query("UPDATE users SET active = FALSE WHERE id = $1")
            .bind(id)
            .execute(db)
            .await?;
        Ok(())
    }

    pub async fn delete(db: &PgPool, id: Uuid) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(db)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_serialize_kebab_case() {
        assert_eq!(serde_json::to_value(Role::LeadGuide).unwrap(), "lead-guide");
        assert_eq!(serde_json::to_value(Role::Admin).unwrap(), "admin");
    }

    #[test]
    fn secret_fields_never_serialize() {
        let user = User {
            id: Uuid::new_v4(),
            name: "Jonas".into(),
            email: "jonas@example.com".into(),
            password_hash: "argon2-hash".into(),
            role: Role::User,
            photo: None,
            password_changed_at: None,
            password_reset_hash: Some("digest".into()),
            password_reset_expires_at: None,
            active: true,
            created_at: OffsetDateTime::now_utc(),
        };
        let out = serde_json::to_value(&user).unwrap();
        assert!(out.get("password_hash").is_none());
        assert!(out.get("password_reset_hash").is_none());
        assert!(out.get("active").is_none());
        assert_eq!(out["email"], "jonas@example.com");
    }
}
