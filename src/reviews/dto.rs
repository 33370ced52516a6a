use serde::Deserialize;
use uuid::Uuid;

/// Review creation body. `tour` and `user` default to the nested route's
/// tour and the authenticated user; only admins may author for someone else.
#[derive(Debug, Deserialize)]
pub struct CreateReviewRequest {
    #[serde(alias = "review")]
    pub body: String,
    pub rating: i32,
    pub tour: Option<Uuid>,
    pub user: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateReviewRequest {
    #[serde(alias = "review")]
    pub body: Option<String>,
    pub rating: Option<i32>,
}
