use crate::state::AppState;
use axum::Router;

mod dto;
pub mod extractors;
pub mod handlers;
pub mod jwt;
pub mod password;

pub use dto::PublicUser;

pub fn router() -> Router<AppState> {
    handlers::routes()
}
