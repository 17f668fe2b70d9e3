// Library exports for TextSwap
// This allows integration tests and external code to use TextSwap modules

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod market;
pub mod routes;
pub mod state;
