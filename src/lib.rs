//! # WalkWithUs
//!
//! Backend for organizing and joining local group walks.
//!
//! Walkers sign up with email or an external identity, browse walks in their
//! city, book a spot and share how it went. Organizers can restrict a walk to
//! an audience (sex, age group, community) and everyone it targets gets a
//! push notification when the walk is published.
//!
//! ## Modules
//! - `store`: JSON-file backed document collections
//! - `accounts`: users, sessions, passwords and terms
//! - `walks`: walks, bookings and capacity rules
//! - `matching`: audience targeting of walks
//! - `community`: feedback, reviews, experiences and reports
//! - `badges`: walk counts and badge levels
//! - `notify`: Expo push and SendGrid email delivery
//! - `jobs`: hourly walk reminders and daily retention nudges
//! - `weather`, `geo`: Open-Meteo forecasts and GeoNames lookups
//! - `admin`, `stats`: moderation and dashboard statistics
//! - `api`: the HTTP surface

pub mod accounts;
pub mod admin;
pub mod api;
pub mod badges;
pub mod community;
pub mod config;
pub mod geo;
pub mod jobs;
pub mod matching;
pub mod notify;
pub mod stats;
pub mod store;
pub mod walks;
pub mod weather;

pub use config::Config;
