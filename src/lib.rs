pub mod auth;
pub mod booking;
pub mod config;
pub mod errors;
pub mod models;
pub mod routes;
pub mod slots;
pub mod startup;
pub mod telemetry;
pub mod utils;
