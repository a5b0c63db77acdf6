//! HTTP API module.
//!
//! Serves the spawn fallback and the forward-auth callback the edge router
//! calls for every request to an established session route.

mod error;
pub mod handlers;
mod routes;
mod state;

pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
