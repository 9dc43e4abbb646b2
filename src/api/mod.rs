//! Read-only HTTP surface for operators

pub mod routes;
pub mod server;

pub use server::{create_app, AppState};
