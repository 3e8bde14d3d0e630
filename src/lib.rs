pub mod auth;
pub mod authz;
pub mod error;
pub mod lifecycle;
pub mod models;
pub mod openapi;
pub mod purge;
pub mod repo;
pub mod routes;
pub mod storage;

// Re-export commonly used items for tests / external users
pub use routes::{config, AppState};
