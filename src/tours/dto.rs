use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::auth::PublicUser;
use crate::reviews::repo::Review;
use crate::tours::repo::{Difficulty, Tour};

#[derive(Debug, Deserialize)]
pub struct CreateTourRequest {
    pub name: String,
    pub price: f64,
    pub difficulty: Difficulty,
    pub duration: i32,
    #[serde(alias = "maxGroupSize")]
    pub max_group_size: i32,
    pub summary: String,
    pub description: Option<String>,
    #[serde(alias = "startLocation")]
    pub start_location: Option<Value>,
    pub locations: Option<Value>,
    #[serde(default)]
    pub secret: bool,
    /// RFC 3339 timestamps; parsed by the handler before any write.
    #[serde(default, alias = "startDates")]
    pub start_dates: Vec<String>,
    #[serde(default)]
    pub guides: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTourRequest {
    pub name: Option<String>,
    pub price: Option<f64>,
    pub difficulty: Option<Difficulty>,
    pub duration: Option<i32>,
    #[serde(alias = "maxGroupSize")]
    pub max_group_size: Option<i32>,
    pub summary: Option<String>,
    pub description: Option<String>,
    #[serde(alias = "startLocation")]
    pub start_location: Option<Value>,
    pub locations: Option<Value>,
    pub secret: Option<bool>,
    #[serde(alias = "startDates")]
    pub start_dates: Option<Vec<String>>,
    pub guides: Option<Vec<Uuid>>,
}

/// Single-tour read: the row plus its populated references and the
/// computed week figure.
#[derive(Debug, Serialize)]
pub struct TourDetails {
    #[serde(flatten)]
    pub tour: Tour,
    pub duration_weeks: f64,
    pub start_dates: Vec<String>,
    pub guides: Vec<PublicUser>,
    pub reviews: Vec<Review>,
}
