//! Request Surface (C9): the only axum-facing module in the crate.

pub mod handlers;
pub mod routes;

pub use routes::build_router;
