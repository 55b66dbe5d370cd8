//! API route handlers.

pub mod auth;
pub mod health;
pub mod products;
pub mod reviews;
pub mod uploads;
pub mod users;
