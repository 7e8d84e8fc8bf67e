mod error;
mod sessions;

use axum::Router;

use crate::auth::AuthState;

pub use error::ApiError;

/// Create the API router.
pub fn create_api_router(state: AuthState) -> Router {
    Router::new().nest("/auth", sessions::router(state))
}
