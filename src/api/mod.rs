//! HTTP API.
//!
//! Every route lives under `/api`. Routes other than health, sign-in,
//! password reset and the GeoNames proxies require a session.

mod account;
mod admin;
pub mod auth;
mod community;
mod errors;
mod geo;
pub mod routes;
mod types;
mod walks;

pub use routes::{router, serve, AppState};
