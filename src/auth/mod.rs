use crate::state::AppState;
use axum::Router;

mod dto;
pub mod google;
pub mod handlers;
mod password;
pub mod repo;
pub mod repo_types;
pub mod services;

pub fn router() -> Router<AppState> {
    handlers::auth_routes()
}
