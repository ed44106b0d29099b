//! Admin HTTP API for the Matching Engine

pub mod error;
pub mod handlers;
pub mod routes;

pub use error::ApiError;
pub use handlers::ApiState;
pub use routes::create_router;
