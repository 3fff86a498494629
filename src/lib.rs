// Library entry point for microblog
// Exposes modules for testing

pub mod api;
pub mod auth;
pub mod config;
pub mod media;
pub mod middleware;
pub mod models;
pub mod store;
